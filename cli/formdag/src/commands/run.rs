//! `formdag run`: initialise a form, optionally over the answers of a stored
//! form, replay an edit script, print the resulting events and answers.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use formdag_core::{FormInstance, TreeReference, Value, ValueTypeRegistry};
use formdag_dag::{Event, EventNotifier, LogNotifier, RecalcReport};
use formdag_form::{FormBuilder, FormDef, FormFile};
use serde::Deserialize;

use crate::config::FormdagConfig;

/// One step of an edit script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Edit {
    /// Answer a question; a missing value clears it.
    Set {
        reference: TreeReference,
        #[serde(default)]
        value: Option<String>,
    },
    Insert {
        parent: TreeReference,
        name: String,
        #[serde(default)]
        position: usize,
    },
    Delete { reference: TreeReference },
}

impl std::fmt::Display for Edit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edit::Set {
                reference,
                value: Some(value),
            } => write!(f, "set {reference} = {value}"),
            Edit::Set {
                reference,
                value: None,
            } => write!(f, "clear {reference}"),
            Edit::Insert {
                parent,
                name,
                position,
            } => write!(f, "insert {parent}/{name} at {position}"),
            Edit::Delete { reference } => write!(f, "delete {reference}"),
        }
    }
}

/// Prints events as they are published.
struct PrintNotifier;

impl EventNotifier for PrintNotifier {
    fn publish_event(&self, event: &Event) {
        println!("  {event}");
    }
}

pub fn run(
    path: &Path,
    script: Option<&Path>,
    answers_from: Option<&Path>,
    json: bool,
    config: &FormdagConfig,
) -> Result<()> {
    let edits = match script {
        Some(path) => load_script(path)?,
        None => Vec::new(),
    };
    // JSON output keeps stdout machine-readable; events go to the log.
    let notifier: Arc<dyn EventNotifier> = if json {
        Arc::new(LogNotifier)
    } else {
        Arc::new(PrintNotifier)
    };
    let mut builder = super::form_builder(path, config)?.with_notifier(notifier);
    if let Some(saved) = answers_from {
        builder = with_saved_answers(builder, saved)?;
    }
    let mut form = builder
        .build()
        .with_context(|| format!("building {}", path.display()))?;

    if !json {
        println!("initialize");
    }
    let mut total = form.initialize();
    for edit in &edits {
        if !json {
            println!("{edit}");
        }
        let report = apply(&mut form, edit).with_context(|| format!("applying '{edit}'"))?;
        total.merge(report);
    }
    for failure in &total.failures {
        log::warn!("{} at {}: {}", failure.triggerable, failure.target, failure.reason);
    }

    let answers = answers(form.instance());
    if json {
        println!("{}", serde_json::to_string_pretty(&answers)?);
    } else {
        println!();
        println!(
            "{} evaluations, {} updates, {} failures",
            total.evaluated.len(),
            total.updates.len(),
            total.failures.len()
        );
        println!("Answers:");
        for (reference, value) in &answers {
            println!("  {reference} = {value}");
        }
    }
    Ok(())
}

/// Restore the answers held by the stored form at `path`.
pub fn with_saved_answers(builder: FormBuilder, path: &Path) -> Result<FormBuilder> {
    let saved = FormFile::read_from(path, &ValueTypeRegistry::with_defaults())
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(builder.with_answers(saved.instance))
}

pub fn load_script(path: &Path) -> Result<Vec<Edit>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

pub fn apply(form: &mut FormDef, edit: &Edit) -> Result<RecalcReport> {
    let report = match edit {
        Edit::Set { reference, value } => {
            let value = value.as_ref().map(|text| Value::Text(text.clone()));
            form.set_value(reference, value)?
        }
        Edit::Insert {
            parent,
            name,
            position,
        } => form.insert_repeat(parent, name, *position)?.1,
        Edit::Delete { reference } => form.delete_repeat(reference)?,
    };
    Ok(report)
}

/// Every answered node, keyed by reference.
pub fn answers(instance: &FormInstance) -> BTreeMap<String, String> {
    instance
        .all_refs()
        .into_iter()
        .filter_map(|reference| {
            let value = instance.resolve(&reference)?.value()?;
            Some((reference.to_string(), value.display_text()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixtures() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
    }

    #[test]
    fn parse_script() {
        let edits = load_script(&fixtures().join("household-edits.json")).unwrap();
        assert_eq!(edits.len(), 3);
        assert!(matches!(&edits[0], Edit::Insert { position: 1, .. }));
        assert_eq!(edits[1].to_string(), "delete /data[0]/houseM[0]");
    }

    #[test]
    fn replay_household_script() {
        let config = FormdagConfig::default();
        let mut form =
            crate::commands::load_form(&fixtures().join("household.json"), &config, None).unwrap();
        let mut total = form.initialize();
        for edit in load_script(&fixtures().join("household-edits.json")).unwrap() {
            total.merge(apply(&mut form, &edit).unwrap());
        }
        assert!(total.failures.is_empty());
        assert!(total
            .updates
            .iter()
            .any(|u| u.triggerable.is_none() && u.target.to_string() == "/data[0]/houseM[0]/no[0]"));

        let answers = answers(form.instance());
        assert_eq!(answers["/data[0]/houseM[0]/no[0]"], "7");
        assert_eq!(answers["/data[0]/houseM[1]/no[0]"], "2");
        assert_eq!(answers["/data[0]/houseM[3]/no[0]"], "4");
        assert!(!answers.contains_key("/data[0]/houseM[4]/no[0]"));
    }

    #[test]
    fn saved_answers_seed_a_fresh_form() {
        let config = FormdagConfig::default();
        let definition = fixtures().join("household.json");
        let mut edited = crate::commands::load_form(&definition, &config, None).unwrap();
        edited.initialize();
        for edit in load_script(&fixtures().join("household-edits.json")).unwrap() {
            apply(&mut edited, &edit).unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        let saved = dir.path().join("answers.fdf");
        FormFile::from_form(&edited).write_to(&saved).unwrap();

        let builder = crate::commands::form_builder(&definition, &config).unwrap();
        let mut form = with_saved_answers(builder, &saved).unwrap().build().unwrap();
        let report = form.initialize();

        assert!(report.failures.is_empty());
        assert_eq!(form.instance().root().series_count("houseM"), 4);
        let restored = answers(form.instance());
        let before = answers(edited.instance());
        assert!(restored.keys().eq(before.keys()));
        // Initialising recalculates restored nodes, so the position wins.
        assert_eq!(before["/data[0]/houseM[0]/no[0]"], "7");
        assert_eq!(restored["/data[0]/houseM[0]/no[0]"], "1");
        assert_eq!(restored["/data[0]/houseM[3]/no[0]"], "4");
    }

    #[test]
    fn failed_edit_names_the_edit() {
        let config = FormdagConfig::default();
        let mut form =
            crate::commands::load_form(&fixtures().join("household.json"), &config, None).unwrap();
        let edit = Edit::Delete {
            reference: TreeReference::parse("/data[0]/houseM[9]").unwrap(),
        };
        let err = apply(&mut form, &edit)
            .with_context(|| format!("applying '{edit}'"))
            .unwrap_err();
        assert!(format!("{err:#}").starts_with("applying 'delete /data[0]/houseM[9]'"));
    }
}
