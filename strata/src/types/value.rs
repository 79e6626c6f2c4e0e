//! Typed cell values and the inference rules that map document leaves to them.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorKind, StrataResult};
use crate::schema::lattice::DataType;
use crate::strata_error;

/// A single typed cell of a normalized row.
///
/// [`Value`] is the unit of data carried through package row files and handed
/// to destinations. Each variant maps onto exactly one [`DataType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Decimal(BigDecimal),
    Timestamp(DateTime<Utc>),
    Text(String),
    /// A nested structure that was not flattened, kept as raw JSON.
    Complex(serde_json::Value),
}

impl Value {
    /// Returns the lattice type of this value, or `None` for nulls.
    ///
    /// Nulls carry no type information; they never create columns and never
    /// participate in widening.
    pub fn kind(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(DataType::Bool),
            Value::Integer(_) => Some(DataType::Integer),
            Value::Float(_) => Some(DataType::Float),
            Value::Decimal(_) => Some(DataType::Decimal),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Text(_) => Some(DataType::Text),
            Value::Complex(_) => Some(DataType::Complex),
        }
    }

    /// Infers a typed value from a scalar document leaf.
    ///
    /// Strings that parse as RFC 3339 timestamps are detected as
    /// [`Value::Timestamp`]; everything else keeps its JSON type. Arrays and
    /// objects become [`Value::Complex`].
    pub fn infer_from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => match DateTime::parse_from_rfc3339(s) {
                Ok(ts) => Value::Timestamp(ts.with_timezone(&Utc)),
                Err(_) => Value::Text(s.clone()),
            },
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                Value::Complex(value.clone())
            }
        }
    }

    /// Rewrites this value into the given column type.
    ///
    /// The caller has already established via the lattice that `to` is equal to
    /// or wider than this value's own type, so every arm here is a plain
    /// widening. A request outside the lattice order fails with a conversion
    /// error rather than producing a lossy cast.
    pub fn coerce_to(self, to: DataType) -> StrataResult<Value> {
        let from = match self.kind() {
            // Nulls stay nulls in every column type.
            None => return Ok(Value::Null),
            Some(kind) => kind,
        };

        if from == to {
            return Ok(self);
        }

        let widened = match (self, to) {
            (Value::Bool(b), DataType::Integer) => Value::Integer(i64::from(b)),
            (Value::Bool(b), DataType::Float) => Value::Float(f64::from(u8::from(b))),
            (Value::Bool(b), DataType::Decimal) => Value::Decimal(BigDecimal::from(i64::from(b))),
            (Value::Bool(b), DataType::Text) => Value::Text(b.to_string()),
            (Value::Integer(i), DataType::Float) => Value::Float(i as f64),
            (Value::Integer(i), DataType::Decimal) => Value::Decimal(BigDecimal::from(i)),
            (Value::Integer(i), DataType::Text) => Value::Text(i.to_string()),
            (Value::Float(v), DataType::Decimal) => match BigDecimal::try_from(v) {
                Ok(d) => Value::Decimal(d),
                Err(_) => {
                    return Err(strata_error!(
                        ErrorKind::ConversionError,
                        "Float cannot be represented as decimal",
                        v
                    ));
                }
            },
            (Value::Float(v), DataType::Text) => Value::Text(v.to_string()),
            (Value::Decimal(d), DataType::Text) => Value::Text(d.to_string()),
            (Value::Timestamp(ts), DataType::Text) => {
                Value::Text(ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
            }
            // Numeric values entering a timestamp column are read as Unix epoch
            // seconds, matching how upstream feeds encode event times.
            (value @ Value::Bool(_), DataType::Timestamp)
            | (value @ Value::Integer(_), DataType::Timestamp)
            | (value @ Value::Float(_), DataType::Timestamp)
            | (value @ Value::Decimal(_), DataType::Timestamp) => {
                match epoch_to_timestamp(&value) {
                    Some(ts) => Value::Timestamp(ts),
                    None => {
                        return Err(strata_error!(
                            ErrorKind::ConversionError,
                            "Value is out of range for a timestamp",
                            value
                        ));
                    }
                }
            }
            (value, to) => {
                return Err(strata_error!(
                    ErrorKind::ConversionError,
                    "Value cannot be widened into the requested type",
                    format!("{from} -> {to}: {value:?}")
                ));
            }
        };

        Ok(widened)
    }

    /// Serializes this value into the JSON representation used by row files.
    ///
    /// Timestamps become RFC 3339 strings and decimals become plain decimal
    /// strings so that records survive a round trip through newline-delimited
    /// JSON without losing precision.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::Number((*i).into()),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Decimal(d) => serde_json::Value::String(d.to_string()),
            Value::Timestamp(ts) => serde_json::Value::String(
                ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
            ),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Complex(v) => v.clone(),
        }
    }

    /// Rereads a row file JSON value as the given column type.
    ///
    /// This is the inverse of [`Value::to_json`] for a known [`DataType`] and
    /// is used when verifying or re-staging persisted row files.
    pub fn from_json_typed(data_type: DataType, value: &serde_json::Value) -> StrataResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        // A column may have been widened after earlier rows of the same package
        // were written, so each arm also accepts representations of narrower
        // types and widens them on the fly.
        let parsed = match data_type {
            DataType::Bool => value.as_bool().map(Value::Bool),
            DataType::Integer => value.as_i64().map(Value::Integer),
            DataType::Float => value.as_f64().map(Value::Float),
            DataType::Decimal => match value {
                serde_json::Value::String(s) => BigDecimal::from_str(s).ok().map(Value::Decimal),
                serde_json::Value::Number(n) => {
                    BigDecimal::from_str(&n.to_string()).ok().map(Value::Decimal)
                }
                serde_json::Value::Bool(b) => Some(Value::Decimal(BigDecimal::from(i64::from(*b)))),
                _ => None,
            },
            DataType::Timestamp => match value {
                serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|ts| Value::Timestamp(ts.with_timezone(&Utc))),
                serde_json::Value::Number(_) | serde_json::Value::Bool(_) => {
                    Value::from_json_typed(DataType::Float, value)
                        .ok()
                        .and_then(|v| v.coerce_to(DataType::Timestamp).ok())
                }
                _ => None,
            },
            DataType::Text => match value {
                serde_json::Value::String(s) => Some(Value::Text(s.to_string())),
                serde_json::Value::Number(n) => Some(Value::Text(n.to_string())),
                serde_json::Value::Bool(b) => Some(Value::Text(b.to_string())),
                _ => None,
            },
            DataType::Complex => Some(Value::Complex(value.clone())),
        };

        parsed.ok_or_else(|| {
            strata_error!(
                ErrorKind::ConversionError,
                "Row file value does not match its column type",
                format!("expected {data_type}, got {value}")
            )
        })
    }

    /// Returns an estimate of bytes owned by this value, used for flush
    /// threshold accounting in the package builder.
    pub fn size_hint(&self) -> usize {
        let heap = match self {
            Value::Text(s) => s.capacity(),
            Value::Complex(v) => estimate_json_bytes(v),
            Value::Decimal(_) => 16,
            _ => 0,
        };
        std::mem::size_of::<Value>() + heap
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Value::Text(s) => f.write_str(s),
            Value::Complex(v) => write!(f, "{v}"),
        }
    }
}

/// Interprets a numeric value as Unix epoch seconds.
fn epoch_to_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Bool(b) => DateTime::from_timestamp(i64::from(*b), 0),
        Value::Integer(i) => DateTime::from_timestamp(*i, 0),
        Value::Float(v) => {
            let secs = v.trunc();
            let nanos = ((v - secs) * 1_000_000_000.0).abs() as u32;
            DateTime::from_timestamp(secs as i64, nanos)
        }
        Value::Decimal(d) => {
            use bigdecimal::ToPrimitive;
            d.to_f64().and_then(|v| epoch_to_timestamp(&Value::Float(v)))
        }
        _ => None,
    }
}

/// Returns an estimate of heap bytes owned by a JSON value.
fn estimate_json_bytes(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Null | serde_json::Value::Bool(_) | serde_json::Value::Number(_) => 8,
        serde_json::Value::String(s) => s.capacity(),
        serde_json::Value::Array(items) => items.iter().map(estimate_json_bytes).sum(),
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| k.capacity() + estimate_json_bytes(v))
            .sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn infers_scalar_kinds() {
        assert_eq!(Value::infer_from_json(&json!(true)).kind(), Some(DataType::Bool));
        assert_eq!(Value::infer_from_json(&json!(42)).kind(), Some(DataType::Integer));
        assert_eq!(Value::infer_from_json(&json!(1.5)).kind(), Some(DataType::Float));
        assert_eq!(Value::infer_from_json(&json!("hello")).kind(), Some(DataType::Text));
        assert_eq!(
            Value::infer_from_json(&json!({"a": 1})).kind(),
            Some(DataType::Complex)
        );
        assert_eq!(Value::infer_from_json(&json!(null)).kind(), None);
    }

    #[test]
    fn detects_iso_timestamps() {
        let value = Value::infer_from_json(&json!("2024-05-01T10:30:00Z"));
        assert_eq!(value.kind(), Some(DataType::Timestamp));

        // A plain date without a time component stays text.
        let value = Value::infer_from_json(&json!("2024-05-01"));
        assert_eq!(value.kind(), Some(DataType::Text));
    }

    #[test]
    fn coerces_along_the_lattice() {
        assert_eq!(
            Value::Integer(3).coerce_to(DataType::Float).unwrap(),
            Value::Float(3.0)
        );
        assert_eq!(
            Value::Bool(true).coerce_to(DataType::Text).unwrap(),
            Value::Text("true".to_string())
        );
        assert_eq!(
            Value::Null.coerce_to(DataType::Text).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn rejects_narrowing_coercion() {
        assert!(Value::Text("abc".to_string())
            .coerce_to(DataType::Integer)
            .is_err());
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let values = [
            Value::Bool(false),
            Value::Integer(-7),
            Value::Float(2.25),
            Value::Decimal(BigDecimal::from_str("12.3400").unwrap()),
            Value::Timestamp("2024-05-01T10:30:00Z".parse().unwrap()),
            Value::Text("payload".to_string()),
            Value::Complex(json!({"k": [1, 2]})),
        ];

        for value in values {
            let data_type = value.kind().unwrap();
            let json = value.to_json();
            let back = Value::from_json_typed(data_type, &json).unwrap();
            assert_eq!(back, value);
        }
    }
}
