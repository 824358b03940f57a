//! Instance tree nodes.
//!
//! A [`TreeElement`] owns its children. Siblings sharing a name form a
//! repeat series whose concrete instances are numbered `0..n` without gaps;
//! the series template, if any, sits beside them with
//! [`Multiplicity::Template`].

use serde::{Deserialize, Serialize};

use crate::reference::{Multiplicity, TreeReference};
use crate::value::{DataType, Value};

/// A node attribute, optionally namespaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(namespace: Option<&str>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Outcome of the most recent constraint check on a node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConstraintState {
    #[default]
    Unchecked,
    Valid,
    Invalid {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The constraint expression itself failed to evaluate.
    Error { message: String },
}

/// A node of the instance tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeElement {
    name: String,
    multiplicity: Multiplicity,
    children: Vec<TreeElement>,
    attributes: Vec<Attribute>,
    data_type: DataType,
    value: Option<Value>,
    relevant: bool,
    inherited_relevant: bool,
    required: bool,
    constraint: ConstraintState,
}

impl TreeElement {
    /// A relevant, empty node at multiplicity 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            multiplicity: Multiplicity::Index(0),
            children: Vec::new(),
            attributes: Vec::new(),
            data_type: DataType::Unspecified,
            value: None,
            relevant: true,
            inherited_relevant: true,
            required: false,
            constraint: ConstraintState::Unchecked,
        }
    }

    /// The blueprint of a repeat series.
    pub fn template(name: impl Into<String>) -> Self {
        let mut element = Self::new(name);
        element.multiplicity = Multiplicity::Template;
        element
    }

    pub fn with_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.set_attribute(attribute);
        self
    }

    /// Append a child. Non-template children are numbered after the
    /// existing instances of their series.
    pub fn with_child(mut self, child: TreeElement) -> Self {
        self.add_child(child);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn multiplicity(&self) -> Multiplicity {
        self.multiplicity
    }

    pub fn set_multiplicity(&mut self, multiplicity: Multiplicity) {
        self.multiplicity = multiplicity;
    }

    pub fn is_template(&self) -> bool {
        self.multiplicity == Multiplicity::Template
    }

    pub fn children(&self) -> &[TreeElement] {
        &self.children
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, namespace: Option<&str>, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.as_deref() == namespace && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Insert or overwrite an attribute keyed by namespace and name.
    pub fn set_attribute(&mut self, attribute: Attribute) {
        match self
            .attributes
            .iter_mut()
            .find(|a| a.namespace == attribute.namespace && a.name == attribute.name)
        {
            Some(existing) => existing.value = attribute.value,
            None => self.attributes.push(attribute),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Replace the value, returning the previous one.
    pub fn set_value(&mut self, value: Option<Value>) -> Option<Value> {
        std::mem::replace(&mut self.value, value)
    }

    /// Effective relevance: the node's own flag and every ancestor's.
    pub fn is_relevant(&self) -> bool {
        self.relevant && self.inherited_relevant
    }

    /// The node's own relevance flag, ignoring ancestors.
    pub fn relevant_flag(&self) -> bool {
        self.relevant
    }

    /// Set the node's own relevance flag and push the effective relevance
    /// down to every descendant. Returns whether the flag changed.
    pub fn set_relevant(&mut self, relevant: bool) -> bool {
        let changed = self.relevant != relevant;
        self.relevant = relevant;
        self.propagate_relevance();
        changed
    }

    fn propagate_relevance(&mut self) {
        let effective = self.is_relevant();
        for child in &mut self.children {
            child.inherited_relevant = effective;
            child.propagate_relevance();
        }
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Returns whether the flag changed.
    pub fn set_required(&mut self, required: bool) -> bool {
        let changed = self.required != required;
        self.required = required;
        changed
    }

    pub fn constraint(&self) -> &ConstraintState {
        &self.constraint
    }

    /// Returns whether the state changed.
    pub fn set_constraint(&mut self, state: ConstraintState) -> bool {
        if self.constraint == state {
            return false;
        }
        self.constraint = state;
        true
    }

    /// The child with `name` at `multiplicity`, templates included.
    pub fn child(&self, name: &str, multiplicity: Multiplicity) -> Option<&TreeElement> {
        self.children
            .iter()
            .find(|c| c.name == name && c.multiplicity == multiplicity)
    }

    pub fn child_mut(&mut self, name: &str, multiplicity: Multiplicity) -> Option<&mut TreeElement> {
        self.children
            .iter_mut()
            .find(|c| c.name == name && c.multiplicity == multiplicity)
    }

    /// Concrete instances named `name`, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a TreeElement> {
        self.children
            .iter()
            .filter(move |c| c.name == name && !c.is_template())
    }

    pub fn template_child(&self, name: &str) -> Option<&TreeElement> {
        self.child(name, Multiplicity::Template)
    }

    /// Number of concrete instances in the series `name`.
    pub fn series_count(&self, name: &str) -> usize {
        self.children_named(name).count()
    }

    /// Whether any child, template or instance, carries `name`.
    pub fn has_child_named(&self, name: &str) -> bool {
        self.children.iter().any(|c| c.name == name)
    }

    /// Append a child. Instances get the next free multiplicity of their
    /// series and inherit this node's effective relevance.
    pub fn add_child(&mut self, mut child: TreeElement) {
        if !child.is_template() {
            child.multiplicity = Multiplicity::Index(self.series_count(&child.name));
        }
        child.inherited_relevant = self.is_relevant();
        child.propagate_relevance();
        self.children.push(child);
    }

    /// Insert an instance into its series at `position` (clamped to the
    /// series length), shifting later siblings up by one. Returns the
    /// multiplicity it was given.
    pub fn insert_instance(&mut self, mut child: TreeElement, position: usize) -> Multiplicity {
        let position = position.min(self.series_count(&child.name));
        for sibling in self.children.iter_mut().filter(|c| c.name == child.name) {
            if let Multiplicity::Index(m) = sibling.multiplicity {
                if m >= position {
                    sibling.multiplicity = Multiplicity::Index(m + 1);
                }
            }
        }

        // Keep document order: after the template and every sibling numbered
        // below the new position, otherwise before the first sibling.
        let slot = self
            .children
            .iter()
            .rposition(|c| {
                c.name == child.name
                    && match c.multiplicity {
                        Multiplicity::Index(m) => m < position,
                        _ => true,
                    }
            })
            .map(|i| i + 1)
            .or_else(|| self.children.iter().position(|c| c.name == child.name))
            .unwrap_or(self.children.len());

        let multiplicity = Multiplicity::Index(position);
        child.multiplicity = multiplicity;
        child.inherited_relevant = self.is_relevant();
        child.propagate_relevance();
        self.children.insert(slot, child);
        multiplicity
    }

    /// Remove the instance `name[index]` and close the gap it leaves.
    pub fn remove_instance(&mut self, name: &str, index: usize) -> Option<TreeElement> {
        let slot = self
            .children
            .iter()
            .position(|c| c.name == name && c.multiplicity == Multiplicity::Index(index))?;
        let removed = self.children.remove(slot);
        self.renumber_series(name);
        Some(removed)
    }

    /// Renumber the instances of `name` as `0..n` in document order.
    pub fn renumber_series(&mut self, name: &str) {
        let mut next = 0;
        for child in self
            .children
            .iter_mut()
            .filter(|c| c.name == name && !c.is_template())
        {
            child.multiplicity = Multiplicity::Index(next);
            next += 1;
        }
    }

    /// Copy this subtree as a fresh node at `multiplicity`. Nested
    /// templates are kept; state flags are reset.
    pub fn deep_copy(&self, multiplicity: Multiplicity) -> TreeElement {
        let mut copy = self.clone();
        copy.multiplicity = multiplicity;
        copy.reset_state();
        copy
    }

    fn reset_state(&mut self) {
        self.relevant = true;
        self.inherited_relevant = true;
        self.required = false;
        self.constraint = ConstraintState::Unchecked;
        for child in &mut self.children {
            child.reset_state();
        }
    }

    /// Restore saved answers onto this (template-shaped) subtree.
    ///
    /// Values and attributes are copied from `saved`. Repeat instances
    /// present in `saved` but missing here are created from this node's
    /// templates. Saved children with no counterpart and no template are
    /// ignored.
    pub fn populate(&mut self, saved: &TreeElement) {
        if saved.value.is_some() {
            self.value = saved.value.clone();
        }
        for attribute in &saved.attributes {
            self.set_attribute(attribute.clone());
        }

        for saved_child in saved.children.iter().filter(|c| !c.is_template()) {
            let exists = self
                .child(&saved_child.name, saved_child.multiplicity)
                .is_some();
            if !exists {
                let Some(template) = self.template_child(&saved_child.name) else {
                    continue;
                };
                let fresh = template.deep_copy(saved_child.multiplicity);
                self.add_child(fresh);
                // `add_child` numbers the instance from the series length;
                // align it with the saved multiplicity.
                self.renumber_series(&saved_child.name);
            }
            if let Some(child) = self.child_mut(&saved_child.name, saved_child.multiplicity) {
                child.populate(saved_child);
            }
        }
    }

    /// References of this node and every non-template descendant in
    /// document order, given this node's own reference `base`.
    pub fn subtree_refs(&self, base: &TreeReference) -> Vec<TreeReference> {
        let mut out = Vec::new();
        self.collect_refs(base, &mut out);
        out
    }

    fn collect_refs(&self, base: &TreeReference, out: &mut Vec<TreeReference>) {
        out.push(base.clone());
        for child in self.children.iter().filter(|c| !c.is_template()) {
            child.collect_refs(&base.child_at(&child.name, child.multiplicity), out);
        }
    }

    /// Number of nodes in this subtree, templates included.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(TreeElement::subtree_len).sum::<usize>()
    }

    /// Clear this node's value and every descendant's. Returns the number of
    /// values that were present.
    pub fn clear_values(&mut self) -> usize {
        let mut cleared = usize::from(self.value.take().is_some());
        for child in self.children.iter_mut().filter(|c| !c.is_template()) {
            cleared += child.clear_values();
        }
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn house_series() -> TreeElement {
        TreeElement::new("data")
            .with_child(
                TreeElement::template("houseM").with_child(TreeElement::new("no").with_type(DataType::Int)),
            )
            .with_child(TreeElement::new("houseM").with_child(TreeElement::new("no")))
            .with_child(TreeElement::new("houseM").with_child(TreeElement::new("no")))
    }

    fn multiplicities(parent: &TreeElement, name: &str) -> Vec<Multiplicity> {
        parent
            .children()
            .iter()
            .filter(|c| c.name() == name)
            .map(TreeElement::multiplicity)
            .collect()
    }

    #[test]
    fn with_child_numbers_series() {
        let data = house_series();
        assert_eq!(
            multiplicities(&data, "houseM"),
            vec![
                Multiplicity::Template,
                Multiplicity::Index(0),
                Multiplicity::Index(1)
            ]
        );
        assert_eq!(data.series_count("houseM"), 2);
        assert!(data.template_child("houseM").is_some());
    }

    #[test]
    fn insert_instance_shifts_later_siblings() {
        let mut data = house_series();
        let fresh = data.template_child("houseM").unwrap().deep_copy(Multiplicity::Index(0));
        let at = data.insert_instance(fresh, 1);
        assert_eq!(at, Multiplicity::Index(1));
        assert_eq!(
            multiplicities(&data, "houseM"),
            vec![
                Multiplicity::Template,
                Multiplicity::Index(0),
                Multiplicity::Index(1),
                Multiplicity::Index(2)
            ]
        );
        // The new instance came from the template: its child carries the type.
        let inserted = data.child("houseM", Multiplicity::Index(1)).unwrap();
        assert_eq!(
            inserted.child("no", Multiplicity::Index(0)).unwrap().data_type(),
            DataType::Int
        );
    }

    #[test]
    fn insert_position_is_clamped() {
        let mut data = house_series();
        let fresh = data.template_child("houseM").unwrap().deep_copy(Multiplicity::Index(0));
        assert_eq!(data.insert_instance(fresh, 99), Multiplicity::Index(2));
    }

    #[test]
    fn remove_instance_closes_gap() {
        let mut data = house_series()
            .with_child(TreeElement::new("houseM").with_value(Value::Text("third".into())));
        let removed = data.remove_instance("houseM", 1).unwrap();
        assert_eq!(removed.multiplicity(), Multiplicity::Index(1));
        assert_eq!(data.series_count("houseM"), 2);
        let last = data.child("houseM", Multiplicity::Index(1)).unwrap();
        assert_eq!(last.value(), Some(&Value::Text("third".into())));
        assert!(data.remove_instance("houseM", 5).is_none());
    }

    #[test]
    fn relevance_is_inherited() {
        let mut data = house_series();
        let house = data.child_mut("houseM", Multiplicity::Index(0)).unwrap();
        assert!(house.set_relevant(false));
        assert!(!house.set_relevant(false));
        let no = house.child("no", Multiplicity::Index(0)).unwrap();
        assert!(no.relevant_flag());
        assert!(!no.is_relevant());

        house.set_relevant(true);
        assert!(house.child("no", Multiplicity::Index(0)).unwrap().is_relevant());
    }

    #[test]
    fn attributes_keyed_by_namespace() {
        let mut node = TreeElement::new("x")
            .with_attribute(Attribute::new(None, "id", "a"))
            .with_attribute(Attribute::new(Some("http://example.org/ns"), "id", "b"));
        assert_eq!(node.attribute(None, "id"), Some("a"));
        assert_eq!(node.attribute(Some("http://example.org/ns"), "id"), Some("b"));
        node.set_attribute(Attribute::new(None, "id", "c"));
        assert_eq!(node.attribute(None, "id"), Some("c"));
        assert_eq!(node.attributes().len(), 2);
    }

    #[test]
    fn populate_restores_values_and_instances() {
        let blank = TreeElement::new("data").with_child(
            TreeElement::template("houseM")
                .with_child(TreeElement::new("no").with_type(DataType::Int)),
        );

        let saved = TreeElement::new("data")
            .with_attribute(Attribute::new(Some("http://openrosa.org/xforms"), "version", "3"))
            .with_child(
                TreeElement::new("houseM")
                    .with_child(TreeElement::new("no").with_value(Value::Int(1))),
            )
            .with_child(
                TreeElement::new("houseM")
                    .with_child(TreeElement::new("no").with_value(Value::Int(2))),
            )
            .with_child(TreeElement::new("stray").with_value(Value::Int(9)));

        let mut restored = blank.clone();
        restored.populate(&saved);

        assert_eq!(restored.series_count("houseM"), 2);
        assert!(!restored.has_child_named("stray"));
        assert_eq!(
            restored.attribute(Some("http://openrosa.org/xforms"), "version"),
            Some("3")
        );
        let second = restored
            .child("houseM", Multiplicity::Index(1))
            .and_then(|h| h.child("no", Multiplicity::Index(0)))
            .unwrap();
        assert_eq!(second.value(), Some(&Value::Int(2)));
        assert_eq!(second.data_type(), DataType::Int);
    }

    #[test]
    fn clear_values_skips_templates() {
        let mut data = house_series().with_value(Value::Text("root".into()));
        data.child_mut("houseM", Multiplicity::Index(0))
            .unwrap()
            .child_mut("no", Multiplicity::Index(0))
            .unwrap()
            .set_value(Some(Value::Int(1)));
        assert_eq!(data.clear_values(), 2);
        assert!(data.value().is_none());
    }

    #[test]
    fn subtree_len_counts_templates() {
        assert_eq!(house_series().subtree_len(), 7);
    }
}
