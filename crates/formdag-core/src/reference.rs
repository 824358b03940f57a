//! Tree references: paths that address nodes of the instance tree.
//!
//! A [`TreeReference`] is an ordered list of `(name, multiplicity)` steps.
//! Absolute references start at the instance root; relative references are
//! resolved against a context node after climbing `up` levels. A reference
//! with any [`Multiplicity::Unbound`] step is *generic* and matches every
//! instance of the repeat series at that step.
//!
//! Path syntax: `/data/house[1]/age`, `../age`, `./age`, `/data/house[@template]`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Position of a node within its repeat series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Multiplicity {
    /// Any instance. Only appears in references.
    Unbound,
    /// The blueprint instance of a repeat series.
    Template,
    /// A concrete, 0-based instance.
    Index(usize),
}

impl Multiplicity {
    /// False only for [`Multiplicity::Unbound`].
    pub fn is_bound(self) -> bool {
        !matches!(self, Multiplicity::Unbound)
    }

    /// The concrete position, if any.
    pub fn index(self) -> Option<usize> {
        match self {
            Multiplicity::Index(i) => Some(i),
            _ => None,
        }
    }

    /// Whether two steps with these multiplicities can denote the same node.
    pub fn overlaps(self, other: Multiplicity) -> bool {
        match (self, other) {
            (Multiplicity::Unbound, _) | (_, Multiplicity::Unbound) => true,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Multiplicity::Unbound => Ok(()),
            Multiplicity::Template => write!(f, "[@template]"),
            Multiplicity::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// One level of a reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefStep {
    pub name: String,
    pub multiplicity: Multiplicity,
}

impl RefStep {
    pub fn new(name: impl Into<String>, multiplicity: Multiplicity) -> Self {
        Self {
            name: name.into(),
            multiplicity,
        }
    }

    /// A step matching every instance named `name`.
    pub fn unbound(name: impl Into<String>) -> Self {
        Self::new(name, Multiplicity::Unbound)
    }
}

/// Whether a reference starts at the root or at a context node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RefKind {
    Absolute,
    /// Climb `up` levels from the context node, then follow the steps.
    Relative { up: usize },
}

/// An immutable path into the instance tree.
///
/// Equality and hashing include the [`RefKind`]: `/data/age` and `data/age`
/// are different references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TreeReference {
    kind: RefKind,
    steps: Vec<RefStep>,
}

impl TreeReference {
    /// Build an absolute reference from its steps.
    pub fn absolute(steps: Vec<RefStep>) -> Self {
        Self {
            kind: RefKind::Absolute,
            steps,
        }
    }

    /// Build a relative reference that climbs `up` levels before `steps`.
    pub fn relative(up: usize, steps: Vec<RefStep>) -> Self {
        Self {
            kind: RefKind::Relative { up },
            steps,
        }
    }

    /// The concrete reference of an instance root named `name`.
    pub fn root(name: &str) -> Self {
        Self::absolute(vec![RefStep::new(name, Multiplicity::Index(0))])
    }

    /// Parse path syntax.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        input.parse()
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    pub fn is_absolute(&self) -> bool {
        self.kind == RefKind::Absolute
    }

    /// True when at least one step is unbound.
    pub fn is_generic(&self) -> bool {
        self.steps.iter().any(|s| !s.multiplicity.is_bound())
    }

    pub fn steps(&self) -> &[RefStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn name_last(&self) -> Option<&str> {
        self.steps.last().map(|s| s.name.as_str())
    }

    pub fn multiplicity_last(&self) -> Option<Multiplicity> {
        self.steps.last().map(|s| s.multiplicity)
    }

    /// Extend with a step matching every instance named `name`.
    pub fn child(&self, name: &str) -> Self {
        self.child_at(name, Multiplicity::Unbound)
    }

    /// Extend with a step at a specific multiplicity.
    pub fn child_at(&self, name: &str, multiplicity: Multiplicity) -> Self {
        let mut steps = self.steps.clone();
        steps.push(RefStep::new(name, multiplicity));
        Self {
            kind: self.kind,
            steps,
        }
    }

    /// The enclosing reference. An absolute root has no parent.
    pub fn parent(&self) -> Option<Self> {
        match self.kind {
            RefKind::Absolute => {
                if self.steps.len() <= 1 {
                    return None;
                }
                Some(Self::absolute(self.steps[..self.steps.len() - 1].to_vec()))
            }
            RefKind::Relative { up } => {
                if self.steps.is_empty() {
                    Some(Self::relative(up + 1, Vec::new()))
                } else {
                    Some(Self::relative(
                        up,
                        self.steps[..self.steps.len() - 1].to_vec(),
                    ))
                }
            }
        }
    }

    /// Drop every multiplicity, producing the pattern of the whole series.
    pub fn genericize(&self) -> Self {
        Self {
            kind: self.kind,
            steps: self
                .steps
                .iter()
                .map(|s| RefStep::unbound(s.name.clone()))
                .collect(),
        }
    }

    /// Anchor this reference to a context.
    ///
    /// Relative references climb from `context` and append their steps.
    /// Absolute references keep their steps but take the context's
    /// multiplicities for unbound steps along the shared prefix, stopping at
    /// the first step where names or bound multiplicities disagree.
    pub fn contextualize(&self, context: &TreeReference) -> Result<Self, CoreError> {
        match self.kind {
            RefKind::Relative { up } => {
                if !context.is_absolute() {
                    return Err(CoreError::NeedsContext {
                        reference: self.to_string(),
                        context: context.to_string(),
                    });
                }
                if up > context.steps.len() {
                    return Err(CoreError::InvalidReference {
                        input: self.to_string(),
                        reason: format!("climbs above the root of {context}"),
                    });
                }
                let mut steps = context.steps[..context.steps.len() - up].to_vec();
                steps.extend(self.steps.iter().cloned());
                Ok(Self::absolute(steps))
            }
            RefKind::Absolute => {
                let mut steps = self.steps.clone();
                if context.is_absolute() {
                    for (step, ctx) in steps.iter_mut().zip(&context.steps) {
                        if step.name != ctx.name {
                            break;
                        }
                        if !step.multiplicity.is_bound() {
                            step.multiplicity = ctx.multiplicity;
                        } else if ctx.multiplicity.is_bound()
                            && step.multiplicity != ctx.multiplicity
                        {
                            break;
                        }
                    }
                }
                Ok(Self::absolute(steps))
            }
        }
    }

    /// Pattern intersection: can both references denote the same node under
    /// some instantiation of their unbound steps?
    pub fn intersects(&self, other: &TreeReference) -> bool {
        self.kind == other.kind
            && self.steps.len() == other.steps.len()
            && self.prefix_overlaps(other)
    }

    /// Ancestor-or-self pattern test: can `other` denote this node or one of
    /// its descendants?
    pub fn covers(&self, other: &TreeReference) -> bool {
        self.kind == other.kind
            && self.steps.len() <= other.steps.len()
            && self.prefix_overlaps(other)
    }

    fn prefix_overlaps(&self, other: &TreeReference) -> bool {
        self.steps
            .iter()
            .zip(&other.steps)
            .all(|(a, b)| a.name == b.name && a.multiplicity.overlaps(b.multiplicity))
    }

    /// Compact form used in diagnostics: the last name followed by the
    /// 1-based positions of every level below the root, e.g. `no [2_1]`.
    pub fn short_string(&self) -> String {
        let name = self.name_last().unwrap_or("");
        let positions: Vec<String> = self
            .steps
            .iter()
            .skip(1)
            .filter_map(|s| s.multiplicity.index())
            .map(|i| (i + 1).to_string())
            .collect();
        format!("{name} [{}]", positions.join("_"))
    }
}

fn invalid(input: &str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidReference {
        input: input.to_string(),
        reason: reason.into(),
    }
}

fn parse_step(segment: &str, input: &str) -> Result<RefStep, CoreError> {
    let (name, multiplicity) = match segment.find('[') {
        None => (segment, Multiplicity::Unbound),
        Some(open) => {
            let inner = segment[open + 1..]
                .strip_suffix(']')
                .ok_or_else(|| invalid(input, "unterminated '['"))?;
            let multiplicity = if inner == "@template" {
                Multiplicity::Template
            } else {
                let index = inner
                    .parse::<usize>()
                    .map_err(|_| invalid(input, format!("bad index '{inner}'")))?;
                Multiplicity::Index(index)
            };
            (&segment[..open], multiplicity)
        }
    };
    let valid_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    if !valid_name {
        return Err(invalid(input, format!("bad step name '{name}'")));
    }
    Ok(RefStep::new(name, multiplicity))
}

impl FromStr for TreeReference {
    type Err = CoreError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid(input, "empty reference"));
        }
        let (absolute, body) = match trimmed.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        if absolute && body.is_empty() {
            return Err(invalid(input, "absolute reference needs a root step"));
        }

        let mut up = 0;
        let mut steps = Vec::new();
        for segment in body.split('/') {
            match segment {
                "" => return Err(invalid(input, "empty path segment")),
                "." => {
                    if absolute || !steps.is_empty() {
                        return Err(invalid(input, "'.' is only allowed before named steps"));
                    }
                }
                ".." => {
                    if absolute || !steps.is_empty() {
                        return Err(invalid(input, "'..' is only allowed before named steps"));
                    }
                    up += 1;
                }
                _ => steps.push(parse_step(segment, input)?),
            }
        }

        Ok(if absolute {
            Self::absolute(steps)
        } else {
            Self::relative(up, steps)
        })
    }
}

impl fmt::Display for TreeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RefKind::Absolute => {
                for step in &self.steps {
                    write!(f, "/{}{}", step.name, step.multiplicity)?;
                }
                Ok(())
            }
            RefKind::Relative { up } => {
                let mut parts: Vec<String> = vec!["..".to_string(); up];
                parts.extend(
                    self.steps
                        .iter()
                        .map(|s| format!("{}{}", s.name, s.multiplicity)),
                );
                if parts.is_empty() {
                    write!(f, ".")
                } else {
                    write!(f, "{}", parts.join("/"))
                }
            }
        }
    }
}

impl TryFrom<String> for TreeReference {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TreeReference> for String {
    fn from(value: TreeReference) -> Self {
        value.to_string()
    }
}
