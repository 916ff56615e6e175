//! Filter values and their canonical text form.
//!
//! Two values produce the same canonical text exactly when a query would
//! treat them as the same comparison operand:
//!
//! - integers and integral doubles share the `number` type and spelling, so
//!   `1` and `1.0` are equal; `-0.0` is `0`
//! - strings never coerce, so `1` and `"1"` differ by type tag
//! - `NaN` and infinities have fixed spellings
//! - free text is escaped so user data cannot forge separators
//!
//! Type tags have a total order used when values of mixed types are
//! compared: `null < boolean < number < string < array`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

use crate::error::QueryError;

/// Largest magnitude at which every integer is exactly representable as f64.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    Null,
    Boolean,
    Number,
    String,
    Array,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operand of a filter or cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum FilterValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Array(Vec<FilterValue>),
}

impl FilterValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Integer(_) | Self::Double(_) => ValueType::Number,
            Self::String(_) => ValueType::String,
            Self::Array(_) => ValueType::Array,
        }
    }

    pub fn as_array(&self) -> Option<&[FilterValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Stable text form used inside fragment ids.
    pub fn canonical(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Double(d) => canonical_double(*d),
            Self::String(s) => escape_segment(s).into_owned(),
            Self::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| format!("{}:{}", item.value_type(), item.canonical()))
                    .collect();
                format!("[{}]", parts.join(";"))
            }
        }
    }
}

fn canonical_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        let spelling = if d > 0.0 { "Infinity" } else { "-Infinity" };
        spelling.to_string()
    } else if d.fract() == 0.0 && d.abs() < MAX_SAFE_INTEGER {
        (d as i64).to_string()
    } else {
        d.to_string()
    }
}

/// Escapes characters that carry meaning in fragment ids and identities.
pub(crate) fn escape_segment(raw: &str) -> Cow<'_, str> {
    const RESERVED: &[char] = &['\\', ',', ':', ';', '{', '}', '[', ']'];

    if !raw.contains(RESERVED) {
        return Cow::Borrowed(raw);
    }

    let mut escaped = String::with_capacity(raw.len() + 4);
    for ch in raw.chars() {
        if RESERVED.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    Cow::Owned(escaped)
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for FilterValue {
    fn from(value: u32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        Self::Array(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl TryFrom<Value> for FilterValue {
    type Error = QueryError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(_) => {
                return Err(QueryError::InvalidValue(
                    "objects cannot be used as filter values".to_string(),
                ))
            }
        })
    }
}
