//! CLI command implementations.

pub mod check;
pub mod inspect;
pub mod pack;
pub mod run;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use formdag_core::ValueTypeRegistry;
use formdag_dag::EventNotifier;
use formdag_form::{FormBuilder, FormDef, FormDefinition, FormFile};

use crate::config::FormdagConfig;

/// Start a builder from a `.json` definition or a stored `.fdf` file.
pub fn form_builder(path: &Path, config: &FormdagConfig) -> Result<FormBuilder> {
    let stored = path.extension().is_some_and(|ext| ext == "fdf");
    if stored {
        let file = FormFile::read_from(path, &ValueTypeRegistry::with_defaults())
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(FormBuilder::from_file(file))
    } else {
        let definition = FormDefinition::from_path(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(FormBuilder::new(definition).with_config(config.engine.clone()))
    }
}

/// Load a form from a `.json` definition or a stored `.fdf` file.
pub fn load_form(
    path: &Path,
    config: &FormdagConfig,
    notifier: Option<Arc<dyn EventNotifier>>,
) -> Result<FormDef> {
    let builder = form_builder(path, config)?;
    let builder = match notifier {
        Some(notifier) => builder.with_notifier(notifier),
        None => builder,
    };
    builder
        .build()
        .with_context(|| format!("building {}", path.display()))
}
