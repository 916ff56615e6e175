//! # Queries and Canonical Identity
//!
//! A [`Query`] is a target path plus an ordered list of modifiers. It is a
//! persistent value: every builder returns a new query sharing nothing
//! mutable with the receiver.
//!
//! ## Canonical identity
//!
//! The identity ignores the order modifiers were applied in:
//!
//! ```text
//! modifiers:  [limit-first:10, order-age:]
//! sorted:     [limit-first:10, order-age:]      (ordinal byte order)
//! identity:   {limit-first:10,order-age:}
//! empty:      {}
//! ```
//!
//! Queries with the same identity on the same target are interchangeable, so
//! the multiplexer shares one native subscription between them. The routing
//! key combines scope, path and identity: `{scope}$/{path}${identity}`, with
//! `\` and `$` in scope and path backslash-escaped so the first two `$`
//! separators are unambiguous.
//!
//! ## Validation
//!
//! Builders reject combinations a host would refuse anyway (a second limit,
//! two `!=` filters, `in` with `not-in`, ...). These errors are returned
//! immediately and never reach the host.

use bridge_traits::QueryDescriptor;
use std::borrow::Cow;
use std::fmt;
use std::iter;
use std::sync::Arc;

use crate::error::{QueryError, Result};
use crate::modifier::{FilterOp, LimitDirection, ModifierKind, QueryModifier};
use crate::value::FilterValue;

/// Field name recorded on cursor modifiers created by `start_at`/`end_at`.
const CURSOR_FIELD: &str = "cursor";

/// Where a query reads from.
///
/// `scope` separates otherwise equal paths, for example the same collection
/// in two apps or behind two custom database URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QueryTarget {
    scope: String,
    path: String,
}

impl QueryTarget {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self::scoped("", path)
    }

    pub fn scoped(scope: impl Into<String>, path: impl AsRef<str>) -> Self {
        Self {
            scope: scope.into(),
            path: path.as_ref().trim_matches('/').to_string(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Order-insensitive identity of a modifier set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalQueryIdentity(String);

impl CanonicalQueryIdentity {
    pub fn from_modifiers(modifiers: &[QueryModifier]) -> Self {
        let mut ids: Vec<&str> = modifiers.iter().map(QueryModifier::fragment_id).collect();
        ids.sort_unstable();
        Self(format!("{{{}}}", ids.join(",")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalQueryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Query {
    target: QueryTarget,
    modifiers: Arc<[QueryModifier]>,
}

impl Query {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self::at(QueryTarget::new(path))
    }

    pub fn at(target: QueryTarget) -> Self {
        Self {
            target,
            modifiers: Arc::from(Vec::new()),
        }
    }

    pub fn target(&self) -> &QueryTarget {
        &self.target
    }

    pub fn path(&self) -> &str {
        self.target.path()
    }

    /// Modifiers in application order.
    pub fn modifiers(&self) -> &[QueryModifier] {
        &self.modifiers
    }

    /// New query with `modifier` appended. Does not validate combinations;
    /// the named builders do.
    pub fn append(&self, modifier: QueryModifier) -> Query {
        Query {
            target: self.target.clone(),
            modifiers: self
                .modifiers
                .iter()
                .cloned()
                .chain(iter::once(modifier))
                .collect(),
        }
    }

    pub fn identity(&self) -> CanonicalQueryIdentity {
        CanonicalQueryIdentity::from_modifiers(&self.modifiers)
    }

    /// Routing key shared by every equivalent query on the same target.
    pub fn key(&self) -> String {
        format!(
            "{}$/{}${}",
            escape_key_part(self.target.scope()),
            escape_key_part(self.target.path()),
            self.identity()
        )
    }

    /// Same target and same canonical identity.
    pub fn is_equal(&self, other: &Query) -> bool {
        self.target == other.target && self.identity() == other.identity()
    }

    /// Description handed to the host when the query is first attached.
    pub fn descriptor(&self) -> QueryDescriptor {
        let specs: Vec<_> = self.modifiers.iter().map(QueryModifier::spec).collect();
        QueryDescriptor {
            key: self.key(),
            path: self.target.path().to_string(),
            identity: self.identity().to_string(),
            modifiers: serde_json::to_value(specs).unwrap_or_default(),
        }
    }

    fn has_kind(&self, kind: ModifierKind) -> bool {
        self.modifiers.iter().any(|m| m.kind() == kind)
    }

    fn has_operator(&self, predicate: impl Fn(FilterOp) -> bool) -> bool {
        self.modifiers
            .iter()
            .filter_map(QueryModifier::operator)
            .any(predicate)
    }

    // ========================================================================
    // Builders
    // ========================================================================

    pub fn order_by(&self, name: &str) -> Result<Query> {
        self.order_by_key(name, None)
    }

    pub fn order_by_key(&self, name: &str, key: Option<&str>) -> Result<Query> {
        if self.modifiers.iter().any(|m| m.order_field() == Some(name)) {
            return Err(QueryError::DuplicateOrderBy(name.to_string()));
        }
        Ok(self.append(QueryModifier::order_by(name, key)?))
    }

    /// `direction` is `first` or `last`.
    pub fn limit(&self, direction: &str, count: u32) -> Result<Query> {
        self.limit_with(direction.parse()?, count)
    }

    pub fn limit_to_first(&self, count: u32) -> Result<Query> {
        self.limit_with(LimitDirection::First, count)
    }

    pub fn limit_to_last(&self, count: u32) -> Result<Query> {
        self.limit_with(LimitDirection::Last, count)
    }

    fn limit_with(&self, direction: LimitDirection, count: u32) -> Result<Query> {
        if self.has_kind(ModifierKind::Limit) {
            return Err(QueryError::LimitAlreadySet);
        }
        Ok(self.append(QueryModifier::limit(direction, count)?))
    }

    /// Filter with an operator symbol such as `==`, `<=` or `not-in`.
    pub fn filter(&self, name: &str, op: &str, value: impl Into<FilterValue>) -> Result<Query> {
        self.filter_op(name, op.parse()?, value.into(), None)
    }

    pub fn filter_op(
        &self,
        name: &str,
        op: FilterOp,
        value: FilterValue,
        key: Option<&str>,
    ) -> Result<Query> {
        self.check_filter_combination(op)?;
        Ok(self.append(QueryModifier::filter(name, op, value, key)?))
    }

    pub fn start_at(&self, value: impl Into<FilterValue>, key: Option<&str>) -> Result<Query> {
        self.filter_op(CURSOR_FIELD, FilterOp::StartAt, value.into(), key)
    }

    pub fn start_after(&self, value: impl Into<FilterValue>, key: Option<&str>) -> Result<Query> {
        self.filter_op(CURSOR_FIELD, FilterOp::StartAfter, value.into(), key)
    }

    pub fn end_at(&self, value: impl Into<FilterValue>, key: Option<&str>) -> Result<Query> {
        self.filter_op(CURSOR_FIELD, FilterOp::EndAt, value.into(), key)
    }

    pub fn end_before(&self, value: impl Into<FilterValue>, key: Option<&str>) -> Result<Query> {
        self.filter_op(CURSOR_FIELD, FilterOp::EndBefore, value.into(), key)
    }

    /// Start and end at the same value.
    pub fn equal_to(&self, value: impl Into<FilterValue>, key: Option<&str>) -> Result<Query> {
        let value = value.into();
        self.start_at(value.clone(), key)?.end_at(value, key)
    }

    fn check_filter_combination(&self, op: FilterOp) -> Result<()> {
        let conflict =
            |message: &str| -> Result<()> { Err(QueryError::ConflictingFilters(message.to_string())) };

        if op.is_start_cursor() && self.has_operator(|o| o.is_start_cursor()) {
            return Err(QueryError::CursorAlreadySet("start"));
        }
        if op.is_end_cursor() && self.has_operator(|o| o.is_end_cursor()) {
            return Err(QueryError::CursorAlreadySet("end"));
        }

        match op {
            FilterOp::NotEqual if self.has_operator(|o| o == FilterOp::NotEqual) => {
                conflict("only one '!=' filter is allowed")
            }
            FilterOp::NotEqual if self.has_operator(|o| o == FilterOp::NotIn) => {
                conflict("'!=' cannot be combined with 'not-in'")
            }
            FilterOp::NotIn if self.has_operator(|o| o == FilterOp::NotIn) => {
                conflict("only one 'not-in' filter is allowed")
            }
            FilterOp::NotIn if self.has_operator(|o| o == FilterOp::In) => {
                conflict("'not-in' cannot be combined with 'in'")
            }
            FilterOp::NotIn if self.has_operator(|o| o == FilterOp::NotEqual) => {
                conflict("'not-in' cannot be combined with '!='")
            }
            FilterOp::In if self.has_operator(|o| o == FilterOp::NotIn) => {
                conflict("'in' cannot be combined with 'not-in'")
            }
            FilterOp::ArrayContains if self.has_operator(|o| o == FilterOp::ArrayContains) => {
                conflict("only one 'array-contains' filter is allowed")
            }
            FilterOp::ArrayContainsAny
                if self.has_operator(|o| o == FilterOp::ArrayContainsAny) =>
            {
                conflict("only one 'array-contains-any' filter is allowed")
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn escape_key_part(raw: &str) -> Cow<'_, str> {
    if !raw.contains(['\\', '$']) {
        return Cow::Borrowed(raw);
    }
    let mut escaped = String::with_capacity(raw.len() + 2);
    for ch in raw.chars() {
        if ch == '\\' || ch == '$' {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    Cow::Owned(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_identity() {
        let query = Query::new("users");
        assert_eq!(query.identity().as_str(), "{}");
        assert_eq!(query.key(), "$/users${}");
    }

    #[test]
    fn test_identity_is_order_insensitive() {
        let base = Query::new("users");
        let a = base.order_by("age").unwrap().limit("first", 10).unwrap();
        let b = base.limit("first", 10).unwrap().order_by("age").unwrap();

        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.identity().as_str(), "{limit-first:10,order-age:}");
        assert!(a.is_equal(&b));
    }

    #[test]
    fn test_identity_is_sensitive_to_each_modifier() {
        let base = Query::new("users");
        let a = base.order_by("age").unwrap().limit("first", 10).unwrap();
        let b = base.order_by("age").unwrap().limit("first", 11).unwrap();
        assert_ne!(a.identity(), b.identity());

        let eq = base.filter("age", "==", 30).unwrap();
        let gte = base.filter("age", ">=", 30).unwrap();
        assert_ne!(eq.identity(), gte.identity());

        let number = base.filter("id", "==", 1).unwrap();
        let text = base.filter("id", "==", "1").unwrap();
        assert_ne!(number.identity(), text.identity());
    }

    #[test]
    fn test_builders_do_not_mutate_receiver() {
        let q = Query::new("users");
        let q2 = q.order_by("age").unwrap();

        assert!(q.modifiers().is_empty());
        assert_eq!(q.identity().as_str(), "{}");
        assert_eq!(q2.modifiers().len(), 1);

        let q3 = q2.limit_to_first(5).unwrap();
        assert_eq!(q2.modifiers().len(), 1);
        assert_eq!(q3.modifiers().len(), 2);
    }

    #[test]
    fn test_modifiers_keep_application_order() {
        let q = Query::new("users")
            .limit_to_last(3)
            .unwrap()
            .order_by("age")
            .unwrap();
        let ids: Vec<&str> = q.modifiers().iter().map(QueryModifier::fragment_id).collect();
        assert_eq!(ids, vec!["limit-last:3", "order-age:"]);
    }

    #[test]
    fn test_scope_and_path_separate_keys() {
        let a = Query::at(QueryTarget::scoped("[DEFAULT]", "users"));
        let b = Query::at(QueryTarget::scoped("other", "users"));
        let c = Query::new("/users/");

        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.key(), b.key());
        assert!(!a.is_equal(&b));
        assert_eq!(c.path(), "users");
        assert_eq!(a.to_string(), "[DEFAULT]$/users${}");
    }

    #[test]
    fn test_separator_in_scope_or_path_cannot_collide() {
        let a = Query::at(QueryTarget::scoped("a$/b", "c"));
        let b = Query::at(QueryTarget::scoped("a", "b$/c"));

        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), "a\\$/b$/c${}");
        assert_eq!(b.key(), "a$/b\\$/c${}");

        let slash = Query::at(QueryTarget::scoped("x\\", "y"));
        let escaped_dollar = Query::at(QueryTarget::scoped("x", "\\y"));
        assert_ne!(slash.key(), escaped_dollar.key());
    }

    #[test]
    fn test_limit_validation() {
        let q = Query::new("users").limit_to_first(1).unwrap();
        assert_eq!(q.limit_to_last(1).unwrap_err(), QueryError::LimitAlreadySet);
        assert!(matches!(
            Query::new("users").limit("sideways", 1),
            Err(QueryError::UnknownDirection(_))
        ));
        assert!(matches!(
            Query::new("users").limit("first", 0),
            Err(QueryError::InvalidLimit(_))
        ));
    }

    #[test]
    fn test_order_by_validation() {
        let q = Query::new("users").order_by("age").unwrap();
        assert_eq!(
            q.order_by("age").unwrap_err(),
            QueryError::DuplicateOrderBy("age".into())
        );
        assert!(q.order_by("name").is_ok());
    }

    #[test]
    fn test_cursor_validation() {
        let q = Query::new("scores").order_by("value").unwrap().start_at(10, None).unwrap();
        assert_eq!(
            q.start_after(11, None).unwrap_err(),
            QueryError::CursorAlreadySet("start")
        );
        let q = q.end_at(20, Some("k")).unwrap();
        assert_eq!(q.end_before(30, None).unwrap_err(), QueryError::CursorAlreadySet("end"));

        let both = Query::new("scores").equal_to("x", None).unwrap();
        assert_eq!(both.modifiers().len(), 2);
    }

    #[test]
    fn test_filter_combination_rules() {
        let base = Query::new("cities");

        let ne = base.filter("state", "!=", "CA").unwrap();
        assert!(matches!(
            ne.filter("country", "!=", "US"),
            Err(QueryError::ConflictingFilters(_))
        ));
        assert!(matches!(
            ne.filter("region", "not-in", vec!["west"]),
            Err(QueryError::ConflictingFilters(_))
        ));

        let within = base.filter("region", "in", vec!["west", "east"]).unwrap();
        assert!(matches!(
            within.filter("region", "not-in", vec!["north"]),
            Err(QueryError::ConflictingFilters(_))
        ));

        let contains = base.filter("tags", "array-contains", "a").unwrap();
        assert!(matches!(
            contains.filter("tags", "array-contains", "b"),
            Err(QueryError::ConflictingFilters(_))
        ));
        assert!(contains.filter("tags", "array-contains-any", vec!["b"]).is_ok());

        assert!(matches!(
            base.filter("tags", "like", "a"),
            Err(QueryError::UnknownOperator(_))
        ));
    }

    #[test]
    fn test_descriptor() {
        let q = Query::at(QueryTarget::scoped("app", "users"))
            .filter("age", ">", 18)
            .unwrap()
            .limit_to_first(2)
            .unwrap();
        let descriptor = q.descriptor();

        assert_eq!(descriptor.key, q.key());
        assert_eq!(descriptor.path, "users");
        assert_eq!(descriptor.identity, "{filter-age:>:number:18:,limit-first:2}");
        assert_eq!(
            descriptor.modifiers,
            json!([
                { "type": "filter", "name": "age", "operator": "GREATER_THAN",
                  "value": { "type": "integer", "value": 18 }, "key": null },
                { "type": "limit", "direction": "first", "count": 2 }
            ])
        );
    }
}
