//! The evaluator seam and the reference evaluator for [`Expr`].
//!
//! The engine never inspects expressions; it hands each one to an
//! [`Evaluator`] together with the concrete node being computed.

use std::cmp::Ordering;
use std::sync::Arc;

use formdag_core::{BinaryOp, Expr, FormInstance, Multiplicity, TreeReference, Value};

use crate::clock::{Clock, SystemClock};
use crate::error::EvaluationError;

/// What an expression is evaluated against: the tree and the concrete
/// node relative references start from.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub instance: &'a FormInstance,
    pub context: &'a TreeReference,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(instance: &'a FormInstance, context: &'a TreeReference) -> Self {
        Self { instance, context }
    }
}

/// Computes expression values. Must only read the tree it is given (and,
/// for clock functions, the time).
pub trait Evaluator {
    fn evaluate(&self, expr: &Expr, cx: &EvaluationContext<'_>) -> Result<Value, EvaluationError>;
}

/// Evaluates [`Expr`] trees.
///
/// Node references are anchored at the context node, so inside a repeat
/// instance `/data/item/price` means that instance's price. Aggregates
/// (`count`, `sum`) over absolute references see every instance.
#[derive(Clone)]
pub struct ExprEvaluator {
    clock: Arc<dyn Clock>,
}

impl Default for ExprEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for ExprEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExprEvaluator").finish_non_exhaustive()
    }
}

impl ExprEvaluator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn nodes(
        &self,
        reference: &TreeReference,
        cx: &EvaluationContext<'_>,
        anchored: bool,
    ) -> Result<Vec<TreeReference>, EvaluationError> {
        let reference = if anchored || !reference.is_absolute() {
            reference.contextualize(cx.context)?
        } else {
            reference.clone()
        };
        Ok(cx.instance.expand(&reference, None)?)
    }

    fn number(&self, expr: &Expr, cx: &EvaluationContext<'_>) -> Result<f64, EvaluationError> {
        let value = self.evaluate(expr, cx)?;
        value
            .as_number()
            .ok_or_else(|| EvaluationError::NotNumeric(value.display_text()))
    }

    fn binary(
        &self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        cx: &EvaluationContext<'_>,
    ) -> Result<Value, EvaluationError> {
        let value = match op {
            BinaryOp::And => {
                Value::Boolean(self.evaluate(lhs, cx)?.as_bool() && self.evaluate(rhs, cx)?.as_bool())
            }
            BinaryOp::Or => {
                Value::Boolean(self.evaluate(lhs, cx)?.as_bool() || self.evaluate(rhs, cx)?.as_bool())
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let a = self.number(lhs, cx)?;
                let b = self.number(rhs, cx)?;
                let result = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div if b == 0.0 => return Err(EvaluationError::DivisionByZero),
                    BinaryOp::Div => a / b,
                    BinaryOp::Mod if b == 0.0 => return Err(EvaluationError::DivisionByZero),
                    _ => a % b,
                };
                Value::Decimal(result)
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let a = self.evaluate(lhs, cx)?;
                let b = self.evaluate(rhs, cx)?;
                let ordering = compare(&a, &b);
                let holds = match op {
                    BinaryOp::Eq => ordering == Some(Ordering::Equal),
                    BinaryOp::Ne => ordering != Some(Ordering::Equal),
                    BinaryOp::Lt => ordering == Some(Ordering::Less),
                    BinaryOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                    BinaryOp::Gt => ordering == Some(Ordering::Greater),
                    _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                };
                Value::Boolean(holds)
            }
        };
        Ok(value)
    }
}

/// Numeric comparison when both sides are numbers, text otherwise.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    let numeric = |v: &Value| !matches!(v, Value::Text(_)) || v.as_number().is_some();
    if numeric(a) && numeric(b) {
        if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
            return x.partial_cmp(&y);
        }
    }
    Some(a.display_text().cmp(&b.display_text()))
}

impl Evaluator for ExprEvaluator {
    fn evaluate(&self, expr: &Expr, cx: &EvaluationContext<'_>) -> Result<Value, EvaluationError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ref(reference) => {
                let nodes = self.nodes(reference, cx, true)?;
                let value = nodes
                    .first()
                    .and_then(|r| cx.instance.resolve(r))
                    .and_then(|node| node.value().cloned());
                Ok(value.unwrap_or_else(|| Value::Text(String::new())))
            }
            Expr::Position(reference) => {
                let nodes = self.nodes(reference, cx, true)?;
                let first = nodes
                    .first()
                    .ok_or_else(|| EvaluationError::NoPosition(reference.clone()))?;
                match first.multiplicity_last() {
                    Some(Multiplicity::Index(i)) => Ok(Value::Decimal((i + 1) as f64)),
                    _ => Err(EvaluationError::NoPosition(first.clone())),
                }
            }
            Expr::Count(reference) => {
                let nodes = self.nodes(reference, cx, false)?;
                Ok(Value::Decimal(nodes.len() as f64))
            }
            Expr::Sum(reference) => {
                let mut total = 0.0;
                for r in self.nodes(reference, cx, false)? {
                    let Some(value) = cx.instance.resolve(&r).and_then(|n| n.value()) else {
                        continue;
                    };
                    total += value
                        .as_number()
                        .ok_or_else(|| EvaluationError::NotNumeric(value.display_text()))?;
                }
                Ok(Value::Decimal(total))
            }
            Expr::Now => Ok(Value::DateTime(self.clock.now())),
            Expr::Today => Ok(Value::Date(self.clock.now().date())),
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, cx),
            Expr::Not(inner) => Ok(Value::Boolean(!self.evaluate(inner, cx)?.as_bool())),
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                if self.evaluate(condition, cx)?.as_bool() {
                    self.evaluate(then, cx)
                } else {
                    self.evaluate(otherwise, cx)
                }
            }
            Expr::Concat(parts) => {
                let mut text = String::new();
                for part in parts {
                    text.push_str(&self.evaluate(part, cx)?.display_text());
                }
                Ok(Value::Text(text))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::NaiveDate;
    use formdag_core::{DataType, TreeElement};

    fn r(s: &str) -> TreeReference {
        TreeReference::parse(s).unwrap()
    }

    fn instance() -> FormInstance {
        let mut root = TreeElement::new("data")
            .with_child(TreeElement::template("item").with_child(TreeElement::new("price")))
            .with_child(TreeElement::new("rate").with_value(Value::Decimal(1.5)));
        for price in [10, 20, 30] {
            root.add_child(
                TreeElement::new("item").with_child(
                    TreeElement::new("price")
                        .with_type(DataType::Int)
                        .with_value(Value::Int(price)),
                ),
            );
        }
        FormInstance::new(root)
    }

    fn eval(expr: Expr, context: &str) -> Result<Value, EvaluationError> {
        let instance = instance();
        let context = r(context);
        ExprEvaluator::default().evaluate(&expr, &EvaluationContext::new(&instance, &context))
    }

    #[test]
    fn references_anchor_at_context() {
        let v = eval(Expr::Ref(r("/data/item/price")), "/data[0]/item[1]/price[0]").unwrap();
        assert_eq!(v, Value::Int(20));
        let v = eval(Expr::Ref(r("../price")), "/data[0]/item[2]/price[0]").unwrap();
        assert_eq!(v, Value::Int(30));
    }

    #[test]
    fn missing_value_is_empty_text() {
        let v = eval(Expr::Ref(r("/data/nothing")), "/data[0]").unwrap();
        assert!(v.is_blank());
    }

    #[test]
    fn position_is_one_based_decimal() {
        let v = eval(Expr::Position(r("..")), "/data[0]/item[1]/price[0]").unwrap();
        assert_eq!(v, Value::Decimal(2.0));
        assert!(eval(Expr::Position(r("/data/nothing")), "/data[0]").is_err());
    }

    #[test]
    fn aggregates_see_every_instance() {
        let count = eval(Expr::Count(r("/data/item")), "/data[0]/item[0]/price[0]").unwrap();
        assert_eq!(count, Value::Decimal(3.0));
        let sum = eval(Expr::Sum(r("/data/item/price")), "/data[0]/rate[0]").unwrap();
        assert_eq!(sum, Value::Decimal(60.0));
    }

    #[test]
    fn arithmetic_and_division_by_zero() {
        let product = Expr::binary(
            BinaryOp::Mul,
            Expr::Ref(r("../price")),
            Expr::Ref(r("/data/rate")),
        );
        assert_eq!(
            eval(product, "/data[0]/item[0]/price[0]").unwrap(),
            Value::Decimal(15.0)
        );
        let div = Expr::binary(
            BinaryOp::Div,
            Expr::literal(Value::Int(1)),
            Expr::literal(Value::Int(0)),
        );
        assert_eq!(eval(div, "/data[0]"), Err(EvaluationError::DivisionByZero));
        let bad = Expr::binary(
            BinaryOp::Add,
            Expr::literal(Value::Text("x".into())),
            Expr::literal(Value::Int(1)),
        );
        assert!(matches!(eval(bad, "/data[0]"), Err(EvaluationError::NotNumeric(_))));
    }

    #[test]
    fn comparisons_numeric_then_text() {
        let gt = Expr::binary(
            BinaryOp::Gt,
            Expr::literal(Value::Text("10".into())),
            Expr::literal(Value::Int(9)),
        );
        assert_eq!(eval(gt, "/data[0]").unwrap(), Value::Boolean(true));
        let eq = Expr::binary(
            BinaryOp::Eq,
            Expr::literal(Value::Text("yes".into())),
            Expr::literal(Value::Text("yes".into())),
        );
        assert_eq!(eval(eq, "/data[0]").unwrap(), Value::Boolean(true));
    }

    #[test]
    fn conditionals_and_concat() {
        let expr = Expr::if_then_else(
            Expr::not(Expr::literal(Value::Boolean(false))),
            Expr::Concat(vec![
                Expr::literal(Value::Text("n=".into())),
                Expr::Count(r("/data/item")),
            ]),
            Expr::literal(Value::Text("never".into())),
        );
        assert_eq!(eval(expr, "/data[0]").unwrap(), Value::Text("n=3.0".into()));
    }

    #[test]
    fn clock_functions_read_injected_clock() {
        let at = NaiveDate::from_ymd_opt(2020, 5, 17)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        let evaluator = ExprEvaluator::new(Arc::new(FixedClock::new(at)));
        let instance = instance();
        let context = instance.root_ref();
        let cx = EvaluationContext::new(&instance, &context);
        assert_eq!(evaluator.evaluate(&Expr::Now, &cx).unwrap(), Value::DateTime(at));
        assert_eq!(
            evaluator.evaluate(&Expr::Today, &cx).unwrap(),
            Value::Date(at.date())
        );
    }
}
