//! `formdag inspect`: show what an .fdf file holds.

use std::path::Path;

use anyhow::{Context, Result};
use formdag_core::ValueTypeRegistry;
use formdag_form::FormFile;

pub fn run(path: &Path) -> Result<()> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let sections =
        FormFile::sections(&data).with_context(|| format!("reading {}", path.display()))?;
    let file = FormFile::from_bytes(&data, &ValueTypeRegistry::with_defaults())
        .with_context(|| format!("reading {}", path.display()))?;

    println!("--- {} ---", path.display());
    println!("  Title:        {}", file.title);
    println!("  Id:           {}", file.id);
    println!("  Nodes:        {}", file.instance.root().subtree_len());
    println!("  Triggerables: {}", file.triggerables.len());
    println!(
        "  Engine:       non_relevant={:?} publish_summaries={}",
        file.config.non_relevant, file.config.publish_summaries
    );

    println!();
    println!("Sections:");
    for info in &sections {
        let name = info.section.map_or("unknown", |s| s.name());
        println!("  {} {:>8} bytes  {name}", info.tag, info.length);
    }

    println!();
    println!("Binds:");
    for (index, triggerable) in file.triggerables.iter().enumerate() {
        println!("  #{index} {triggerable}");
    }

    let answers = super::run::answers(&file.instance);
    if !answers.is_empty() {
        println!();
        println!("Answers:");
        for (reference, value) in &answers {
            println!("  {reference} = {value}");
        }
    }
    Ok(())
}
