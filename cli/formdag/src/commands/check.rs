//! `formdag check`: build a form and print its evaluation order.

use std::path::Path;

use anyhow::Result;

use crate::config::FormdagConfig;

pub fn run(form: &Path, config: &FormdagConfig) -> Result<()> {
    let form = super::load_form(form, config, None)?;
    let dag = form.dag();

    println!("{} ({})", form.title(), form.id());
    println!(
        "  {} triggerables, {} dependencies",
        dag.registry().len(),
        dag.graph().edge_count()
    );
    println!();
    println!("Evaluation order:");
    for (position, &id) in dag.graph().order().iter().enumerate() {
        let Some(triggerable) = dag.registry().get(id) else {
            continue;
        };
        let triggers: Vec<String> = triggerable.triggers().iter().map(ToString::to_string).collect();
        if triggers.is_empty() {
            println!("  {:>3}. {id} {triggerable}", position + 1);
        } else {
            println!(
                "  {:>3}. {id} {triggerable}  <- {}",
                position + 1,
                triggers.join(", ")
            );
        }
    }
    Ok(())
}
