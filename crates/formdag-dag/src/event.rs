//! Diagnostic events published while recalculating.
//!
//! Events are for observers only: publishing never affects control flow
//! and notifiers must not touch the tree.

use std::sync::{Arc, Mutex};

use formdag_core::{TreeReference, Value};

/// One recalculation step, as seen by a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    what: String,
    reference: Option<TreeReference>,
    value: Option<String>,
}

impl Event {
    pub fn new(what: impl Into<String>, reference: Option<TreeReference>, value: Option<String>) -> Self {
        Self {
            what: what.into(),
            reference,
            value,
        }
    }

    /// A value written to `reference`. `value` is the raw evaluation
    /// result, before conversion to the node's type.
    pub fn recalculate(reference: &TreeReference, value: Option<&Value>) -> Self {
        Self::new(
            "Recalculate",
            Some(reference.clone()),
            value.map(Value::display_text),
        )
    }

    /// A value removed because an ancestor became non-relevant.
    pub fn cleared(reference: &TreeReference) -> Self {
        Self::new("Clear", Some(reference.clone()), None)
    }

    /// A structural-edit summary such as
    /// `Deleted: houseM [2]: 1 triggerables were fired.`
    pub fn summary(lead: &str, reference: &TreeReference, fired: usize) -> Self {
        Self::new(
            format!(
                "{lead}: {}: {fired} triggerables were fired.",
                reference.short_string()
            ),
            None,
            None,
        )
    }

    pub fn what(&self) -> &str {
        &self.what
    }

    pub fn reference(&self) -> Option<&TreeReference> {
        self.reference.as_ref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// `Processing '<what>' for <short ref>[ (<value>)]`
    pub fn display_message(&self) -> String {
        let target = self
            .reference
            .as_ref()
            .map(TreeReference::short_string)
            .unwrap_or_default();
        match &self.value {
            Some(value) => format!("Processing '{}' for {target} ({value})", self.what),
            None => format!("Processing '{}' for {target}", self.what),
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_message())
    }
}

/// Receives engine events.
pub trait EventNotifier {
    fn publish_event(&self, event: &Event);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl EventNotifier for NullNotifier {
    fn publish_event(&self, _event: &Event) {}
}

/// Collects events into a shared buffer. Clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().iter().map(Event::display_message).collect()
    }

    pub fn clear(&self) {
        match self.events.lock() {
            Ok(mut events) => events.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl EventNotifier for RecordingNotifier {
    fn publish_event(&self, event: &Event) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Forwards events to the `log` facade at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl EventNotifier for LogNotifier {
    fn publish_event(&self, event: &Event) {
        log::info!(target: "formdag::event", "{}", event.display_message());
    }
}
