//! # Query Modifiers
//!
//! A modifier is one ordering, limit or filter applied to a query. Each one
//! carries a fragment id derived only from its meaning:
//!
//! ```text
//! order-{name}:{key}                        order_by("age", None)      -> order-age:
//! limit-{direction}:{count}                 limit(First, 10)           -> limit-first:10
//! filter-{name}:{op}:{type}:{value}:{key}   filter("age", "==", 30)    -> filter-age:==:number:30:
//! ```
//!
//! Two modifiers with the same meaning always have the same id, and any
//! difference in field, operator, value, value type or key changes it. Names,
//! keys and string values are escaped before they are embedded.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{QueryError, Result};
use crate::value::{escape_segment, FilterValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModifierKind {
    OrderBy,
    Limit,
    Filter,
}

impl ModifierKind {
    /// Prefix used in fragment ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderBy => "order",
            Self::Limit => "limit",
            Self::Filter => "filter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LimitDirection {
    First,
    Last,
}

impl LimitDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Last => "last",
        }
    }
}

impl FromStr for LimitDirection {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "first" | "limitToFirst" => Ok(Self::First),
            "last" | "limitToLast" => Ok(Self::Last),
            other => Err(QueryError::UnknownDirection(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
    StartAt,
    StartAfter,
    EndAt,
    EndBefore,
}

impl FilterOp {
    /// Symbol used in builders and fragment ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::ArrayContains => "array-contains",
            Self::ArrayContainsAny => "array-contains-any",
            Self::In => "in",
            Self::NotIn => "not-in",
            Self::StartAt => "startAt",
            Self::StartAfter => "startAfter",
            Self::EndAt => "endAt",
            Self::EndBefore => "endBefore",
        }
    }

    /// Name hosts use for the operator.
    pub fn native_name(&self) -> &'static str {
        match self {
            Self::Equal => "EQUAL",
            Self::NotEqual => "NOT_EQUAL",
            Self::LessThan => "LESS_THAN",
            Self::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            Self::GreaterThan => "GREATER_THAN",
            Self::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            Self::ArrayContains => "ARRAY_CONTAINS",
            Self::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
            Self::StartAt => "START_AT",
            Self::StartAfter => "START_AFTER",
            Self::EndAt => "END_AT",
            Self::EndBefore => "END_BEFORE",
        }
    }

    /// Operators whose value must be a non-empty array.
    pub fn takes_array(&self) -> bool {
        matches!(self, Self::In | Self::NotIn | Self::ArrayContainsAny)
    }

    pub fn is_start_cursor(&self) -> bool {
        matches!(self, Self::StartAt | Self::StartAfter)
    }

    pub fn is_end_cursor(&self) -> bool {
        matches!(self, Self::EndAt | Self::EndBefore)
    }
}

impl FromStr for FilterOp {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "==" => Self::Equal,
            "!=" => Self::NotEqual,
            "<" => Self::LessThan,
            "<=" => Self::LessThanOrEqual,
            ">" => Self::GreaterThan,
            ">=" => Self::GreaterThanOrEqual,
            "array-contains" => Self::ArrayContains,
            "array-contains-any" => Self::ArrayContainsAny,
            "in" => Self::In,
            "not-in" => Self::NotIn,
            "startAt" => Self::StartAt,
            "startAfter" => Self::StartAfter,
            "endAt" => Self::EndAt,
            "endBefore" => Self::EndBefore,
            other => return Err(QueryError::UnknownOperator(other.to_string())),
        })
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific fields of a modifier. Serialized form is what the host
/// receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ModifierSpec {
    #[serde(rename_all = "camelCase")]
    OrderBy { name: String, key: Option<String> },
    #[serde(rename_all = "camelCase")]
    Limit { direction: LimitDirection, count: u32 },
    #[serde(rename_all = "camelCase")]
    Filter {
        name: String,
        #[serde(serialize_with = "serialize_op")]
        operator: FilterOp,
        value: FilterValue,
        key: Option<String>,
    },
}

fn serialize_op<S: serde::Serializer>(op: &FilterOp, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(op.native_name())
}

/// One immutable modifier plus its fragment id.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryModifier {
    spec: ModifierSpec,
    fragment_id: String,
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(QueryError::InvalidField(
            "field name must not be empty".to_string(),
        ));
    }
    Ok(())
}

impl QueryModifier {
    /// Ordering by `name`, optionally qualified by `key` (a direction or a
    /// child path, host specific).
    pub fn order_by(name: impl Into<String>, key: Option<&str>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        let key = key.map(str::to_string);

        let fragment_id = format!(
            "{}-{}:{}",
            ModifierKind::OrderBy.as_str(),
            escape_segment(&name),
            escape_segment(key.as_deref().unwrap_or(""))
        );
        Ok(Self {
            spec: ModifierSpec::OrderBy { name, key },
            fragment_id,
        })
    }

    pub fn limit(direction: LimitDirection, count: u32) -> Result<Self> {
        if count == 0 {
            return Err(QueryError::InvalidLimit(
                "limit must be greater than 0".to_string(),
            ));
        }

        let fragment_id = format!(
            "{}-{}:{}",
            ModifierKind::Limit.as_str(),
            direction.as_str(),
            count
        );
        Ok(Self {
            spec: ModifierSpec::Limit { direction, count },
            fragment_id,
        })
    }

    /// Filter or cursor on `name`. `key` disambiguates cursors on equal
    /// values.
    pub fn filter(
        name: impl Into<String>,
        operator: FilterOp,
        value: FilterValue,
        key: Option<&str>,
    ) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;

        if operator.takes_array() {
            match value.as_array() {
                Some(items) if !items.is_empty() => {}
                _ => {
                    return Err(QueryError::InvalidValue(format!(
                        "'{}' requires a non-empty array",
                        operator
                    )))
                }
            }
        }

        let key = key.map(str::to_string);
        let fragment_id = format!(
            "{}-{}:{}:{}:{}:{}",
            ModifierKind::Filter.as_str(),
            escape_segment(&name),
            operator.as_str(),
            value.value_type(),
            value.canonical(),
            escape_segment(key.as_deref().unwrap_or(""))
        );
        Ok(Self {
            spec: ModifierSpec::Filter {
                name,
                operator,
                value,
                key,
            },
            fragment_id,
        })
    }

    pub fn kind(&self) -> ModifierKind {
        match self.spec {
            ModifierSpec::OrderBy { .. } => ModifierKind::OrderBy,
            ModifierSpec::Limit { .. } => ModifierKind::Limit,
            ModifierSpec::Filter { .. } => ModifierKind::Filter,
        }
    }

    pub fn spec(&self) -> &ModifierSpec {
        &self.spec
    }

    pub fn fragment_id(&self) -> &str {
        &self.fragment_id
    }

    /// Operator of a filter modifier.
    pub fn operator(&self) -> Option<FilterOp> {
        match &self.spec {
            ModifierSpec::Filter { operator, .. } => Some(*operator),
            _ => None,
        }
    }

    /// Field an order-by modifier sorts on.
    pub fn order_field(&self) -> Option<&str> {
        match &self.spec {
            ModifierSpec::OrderBy { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for QueryModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fragment_id)
    }
}
