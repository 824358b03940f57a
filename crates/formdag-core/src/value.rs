//! Typed answer values stored on instance nodes.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Declared data type of an instance node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// No declared type; values are stored as produced.
    #[default]
    Unspecified,
    Text,
    Int,
    Decimal,
    Boolean,
    Date,
    Time,
    DateTime,
}

impl DataType {
    /// Stable tag used in stored forms and the value-type registry.
    pub fn tag(self) -> &'static str {
        match self {
            DataType::Unspecified => "unspecified",
            DataType::Text => "text",
            DataType::Int => "int",
            DataType::Decimal => "decimal",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Time => "time",
            DataType::DateTime => "datetime",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        let data_type = match tag {
            "unspecified" => DataType::Unspecified,
            "text" => DataType::Text,
            "int" => DataType::Int,
            "decimal" => DataType::Decimal,
            "boolean" => DataType::Boolean,
            "date" => DataType::Date,
            "time" => DataType::Time,
            "datetime" => DataType::DateTime,
            _ => return None,
        };
        Some(data_type)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A typed answer value.
///
/// Equality is structural, except that a NaN decimal equals any other NaN
/// decimal so that rewriting an unchanged result is recognised as a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Text(String),
    Int(i64),
    Decimal(f64),
    Boolean(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Text(_) => DataType::Text,
            Value::Int(_) => DataType::Int,
            Value::Decimal(_) => DataType::Decimal,
            Value::Boolean(_) => DataType::Boolean,
            Value::Date(_) => DataType::Date,
            Value::Time(_) => DataType::Time,
            Value::DateTime(_) => DataType::DateTime,
        }
    }

    /// Human-readable text. Decimals always carry a fractional part (`2.0`).
    pub fn display_text(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Decimal(d) => format!("{d:?}"),
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format(DATE_FORMAT).to_string(),
            Value::Time(t) => t.format(TIME_FORMAT).to_string(),
            Value::DateTime(dt) => dt.format(DATE_TIME_FORMAT).to_string(),
        }
    }

    /// An empty text answer counts as no answer.
    pub fn is_blank(&self) -> bool {
        matches!(self, Value::Text(s) if s.is_empty())
    }

    /// Parse `text` as a value of `data_type`.
    ///
    /// [`DataType::Unspecified`] yields text.
    pub fn parse(data_type: DataType, text: &str) -> Result<Value, CoreError> {
        let bad = || CoreError::InvalidValue {
            text: text.to_string(),
            data_type: data_type.to_string(),
        };
        let trimmed = text.trim();
        let value = match data_type {
            DataType::Unspecified | DataType::Text => Value::Text(text.to_string()),
            DataType::Int => Value::Int(trimmed.parse().map_err(|_| bad())?),
            DataType::Decimal => Value::Decimal(trimmed.parse().map_err(|_| bad())?),
            DataType::Boolean => match trimmed {
                "true" | "1" => Value::Boolean(true),
                "false" | "0" => Value::Boolean(false),
                _ => return Err(bad()),
            },
            DataType::Date => {
                Value::Date(NaiveDate::parse_from_str(trimmed, DATE_FORMAT).map_err(|_| bad())?)
            }
            DataType::Time => {
                Value::Time(NaiveTime::parse_from_str(trimmed, TIME_FORMAT).map_err(|_| bad())?)
            }
            DataType::DateTime => Value::DateTime(
                NaiveDateTime::parse_from_str(trimmed, DATE_TIME_FORMAT).map_err(|_| bad())?,
            ),
        };
        Ok(value)
    }

    /// Numeric view used by arithmetic and comparisons.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Decimal(d) => Some(*d),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Date(_) | Value::Time(_) | Value::DateTime(_) => None,
        }
    }

    /// Truthiness: non-empty text, non-zero numbers, any date or time.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Text(s) => !s.is_empty(),
            Value::Int(i) => *i != 0,
            Value::Decimal(d) => *d != 0.0 && !d.is_nan(),
            Value::Boolean(b) => *b,
            Value::Date(_) | Value::Time(_) | Value::DateTime(_) => true,
        }
    }

    /// Convert to the declared type of a target node.
    pub fn cast(&self, to: DataType) -> Result<Value, CoreError> {
        if to == DataType::Unspecified || to == self.data_type() {
            return Ok(self.clone());
        }
        let bad = || CoreError::InvalidValue {
            text: self.display_text(),
            data_type: to.to_string(),
        };
        let value = match (to, self) {
            (DataType::Text, v) => Value::Text(v.display_text()),
            (DataType::Int, v) => {
                let n = v.as_number().filter(|n| n.is_finite()).ok_or_else(bad)?;
                Value::Int(n.trunc() as i64)
            }
            (DataType::Decimal, v) => Value::Decimal(v.as_number().ok_or_else(bad)?),
            (DataType::Boolean, v) => Value::Boolean(v.as_bool()),
            (DataType::Date, Value::DateTime(dt)) => Value::Date(dt.date()),
            (DataType::Time, Value::DateTime(dt)) => Value::Time(dt.time()),
            (DataType::DateTime, Value::Date(d)) => {
                Value::DateTime(d.and_hms_opt(0, 0, 0).ok_or_else(bad)?)
            }
            (_, Value::Text(s)) => Value::parse(to, s)?,
            _ => return Err(bad()),
        };
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_text())
    }
}
