//! The JSON form definition: an instance skeleton plus binds.
//!
//! ```json
//! {
//!   "title": "Household",
//!   "instance": {
//!     "name": "data",
//!     "children": [
//!       { "name": "houseM", "template": true,
//!         "children": [{ "name": "no", "type": "int" }] }
//!     ]
//!   },
//!   "binds": [
//!     { "target": "/data/houseM/no", "calculate": { "position": ".." } }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use formdag_core::{
    Attribute, CoreError, DataType, Expr, FormInstance, TreeElement, TreeReference,
    ValueTypeRegistry,
};
use formdag_dag::{ActionEvent, Triggerable};

use crate::error::FormError;
use crate::FormId;

/// A form as authored: title, instance skeleton and binds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDefinition {
    /// Fresh when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FormId>,
    pub title: String,
    pub instance: InstanceNode,
    #[serde(default)]
    pub binds: Vec<Bind>,
}

/// One node of the instance skeleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceNode {
    pub name: String,
    /// Marks the blueprint of a repeat series.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub template: bool,
    #[serde(default, rename = "type")]
    pub data_type: DataType,
    /// Initial answer, as text in the node's type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<InstanceNode>,
}

/// Expressions bound to one target node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bind {
    pub target: TreeReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculate: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionBind>,
}

/// A value-setting action: when `on` happens, write `value` to the bind's
/// target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionBind {
    #[serde(flatten)]
    pub event: ActionEvent,
    pub value: Expr,
}

impl FormDefinition {
    pub fn from_json(json: &str) -> Result<Self, FormError> {
        serde_json::from_str(json).map_err(|e| FormError::Definition(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self, FormError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Build the instance tree, constructing initial answers through
    /// `values`.
    pub fn instance(&self, values: &ValueTypeRegistry) -> Result<FormInstance, FormError> {
        Ok(FormInstance::new(self.instance.to_element(values)?))
    }

    /// Every bind's triggerables, in declaration order.
    pub fn triggerables(&self) -> Result<Vec<Triggerable>, FormError> {
        let mut out = Vec::new();
        for bind in &self.binds {
            let triggerables = bind.triggerables().map_err(|source| FormError::InvalidBind {
                target: bind.target.to_string(),
                source,
            })?;
            out.extend(triggerables);
        }
        Ok(out)
    }
}

impl InstanceNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: false,
            data_type: DataType::Unspecified,
            value: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    fn to_element(&self, values: &ValueTypeRegistry) -> Result<TreeElement, FormError> {
        let mut element = if self.template {
            TreeElement::template(&self.name)
        } else {
            TreeElement::new(&self.name)
        }
        .with_type(self.data_type);
        if let Some(text) = &self.value {
            element = element.with_value(values.construct(self.data_type.tag(), text)?);
        }
        for attribute in &self.attributes {
            element = element.with_attribute(attribute.clone());
        }
        for child in &self.children {
            element.add_child(child.to_element(values)?);
        }
        Ok(element)
    }
}

impl Bind {
    pub fn new(target: TreeReference) -> Self {
        Self {
            target,
            calculate: None,
            relevant: None,
            required: None,
            constraint: None,
            constraint_message: None,
            actions: Vec::new(),
        }
    }

    /// Calculate, relevant, required, constraint, then actions.
    pub fn triggerables(&self) -> Result<Vec<Triggerable>, CoreError> {
        let target = &self.target;
        let mut out = Vec::new();
        if let Some(expr) = &self.calculate {
            out.push(Triggerable::calculate(expr.clone(), target.clone())?);
        }
        if let Some(expr) = &self.relevant {
            out.push(Triggerable::relevant(expr.clone(), target.clone())?);
        }
        if let Some(expr) = &self.required {
            out.push(Triggerable::required(expr.clone(), target.clone())?);
        }
        if let Some(expr) = &self.constraint {
            out.push(Triggerable::constraint(
                expr.clone(),
                target.clone(),
                self.constraint_message.clone(),
            )?);
        }
        for action in &self.actions {
            out.push(Triggerable::set_value(
                action.value.clone(),
                target.clone(),
                action.event.clone(),
            )?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formdag_core::{Multiplicity, Value};
    use formdag_dag::TriggerableKind;

    const HOUSEHOLD: &str = r#"{
        "title": "Household",
        "instance": {
            "name": "data",
            "children": [
                { "name": "houseM", "template": true,
                  "children": [{ "name": "no", "type": "int" }] },
                { "name": "houseM", "children": [{ "name": "no", "type": "int", "value": "1" }] },
                { "name": "houseM", "children": [{ "name": "no", "type": "int" }] }
            ]
        },
        "binds": [
            { "target": "/data/houseM/no", "calculate": { "position": ".." },
              "constraint": { "binary": { "op": "gt", "lhs": { "ref": "." },
                              "rhs": { "literal": { "type": "int", "value": 0 } } } },
              "constraint_message": "positive" }
        ]
    }"#;

    #[test]
    fn parses_and_builds_instance() {
        let definition = FormDefinition::from_json(HOUSEHOLD).unwrap();
        assert!(definition.id.is_none());
        let instance = definition.instance(&ValueTypeRegistry::with_defaults()).unwrap();
        let root = instance.root();
        assert_eq!(root.series_count("houseM"), 2);
        assert!(root.template_child("houseM").is_some());
        let first = root.child("houseM", Multiplicity::Index(0)).unwrap();
        assert_eq!(first.children()[0].value(), Some(&Value::Int(1)));
        assert!(root.child("houseM", Multiplicity::Index(1)).is_some());
    }

    #[test]
    fn binds_expand_in_declaration_order() {
        let definition = FormDefinition::from_json(HOUSEHOLD).unwrap();
        let triggerables = definition.triggerables().unwrap();
        assert_eq!(triggerables.len(), 2);
        assert_eq!(triggerables[0].kind(), &TriggerableKind::Calculate);
        assert_eq!(
            triggerables[1].kind(),
            &TriggerableKind::Constraint {
                message: Some("positive".into())
            }
        );
    }

    #[test]
    fn action_event_is_flattened() {
        let action: ActionBind = serde_json::from_str(
            r#"{ "on": "value_changed", "source": "/data/a", "value": "now" }"#,
        )
        .unwrap();
        assert_eq!(
            action.event,
            ActionEvent::ValueChanged {
                source: TreeReference::parse("/data/a").unwrap()
            }
        );
        assert_eq!(action.value, Expr::Now);
    }

    #[test]
    fn bad_initial_value_is_rejected() {
        let mut definition = FormDefinition::from_json(HOUSEHOLD).unwrap();
        definition.instance.children[1].children[0].value = Some("many".into());
        let err = definition
            .instance(&ValueTypeRegistry::with_defaults())
            .unwrap_err();
        assert!(matches!(err, FormError::Core(CoreError::InvalidValue { .. })));
    }

    #[test]
    fn relative_bind_target_is_rejected() {
        let mut definition = FormDefinition::from_json(HOUSEHOLD).unwrap();
        definition.binds[0].target = TreeReference::parse("../no").unwrap();
        assert!(matches!(
            definition.triggerables(),
            Err(FormError::InvalidBind { .. })
        ));
    }
}
