//! `formdag pack`: store a form as an .fdf file.

use std::path::Path;

use anyhow::{Context, Result};
use formdag_form::FormFile;

use crate::config::FormdagConfig;

pub fn run(form: &Path, output: Option<&Path>, initialize: bool, config: &FormdagConfig) -> Result<()> {
    let output = match output {
        Some(path) => path.to_path_buf(),
        None => form.with_extension("fdf"),
    };
    let mut built = super::load_form(form, config, None)?;
    if initialize {
        built.initialize();
    }

    let file = FormFile::from_form(&built);
    let bytes = file.to_bytes()?;
    std::fs::write(&output, &bytes).with_context(|| format!("writing {}", output.display()))?;

    println!(
        "wrote {} ({} bytes, {} triggerables)",
        output.display(),
        bytes.len(),
        file.triggerables.len()
    );
    Ok(())
}
