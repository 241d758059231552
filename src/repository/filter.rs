//! Filtering, ordering, and query-builder state
//!
//! [`FilterCondition`] is the backend-neutral (field, operator, value) triple
//! both adapters translate from. Conditions accumulate conjunctively in
//! [`QueryState`]; the boolean combinators (`or`, `nor`) regroup previously
//! accumulated predicates as one alternative branch, see
//! [`QueryState::push_group`].

use std::fmt;

use chrono::{DateTime, Utc};

/// Direction for ordering results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Sort in ascending order (A-Z, 0-9)
    #[default]
    Ascending,
    /// Sort in descending order (Z-A, 9-0)
    Descending,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "asc"),
            Self::Descending => write!(f, "desc"),
        }
    }
}

/// Comparison operators for filter conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    /// Equal to
    Equal,
    /// Not equal to
    NotEqual,
    /// Greater than
    GreaterThan,
    /// Greater than or equal to
    GreaterThanOrEqual,
    /// Less than
    LessThan,
    /// Less than or equal to
    LessThanOrEqual,
    /// Pattern matching with SQL `%`/`_` wildcards; the document adapter
    /// converts the pattern to a case-insensitive regular expression
    Like,
    /// Value is in a list
    In,
    /// Value is not in a list
    NotIn,
    /// Value lies in an inclusive range (start and end in a two-element list)
    Between,
    /// Value is null
    IsNull,
    /// Value is not null
    IsNotNull,
    /// Field is present (document stores); maps to a null check on the
    /// relational adapter, where every column exists
    Exists,
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "<>"),
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterThanOrEqual => write!(f, ">="),
            Self::LessThan => write!(f, "<"),
            Self::LessThanOrEqual => write!(f, "<="),
            Self::Like => write!(f, "LIKE"),
            Self::In => write!(f, "IN"),
            Self::NotIn => write!(f, "NOT IN"),
            Self::Between => write!(f, "BETWEEN"),
            Self::IsNull => write!(f, "IS NULL"),
            Self::IsNotNull => write!(f, "IS NOT NULL"),
            Self::Exists => write!(f, "EXISTS"),
        }
    }
}

/// A value usable in filter conditions, field updates, and projections
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// String value
    String(String),
    /// 64-bit integer value
    Int(i64),
    /// 64-bit floating point value
    Float(f64),
    /// Boolean value
    Bool(bool),
    /// UTC timestamp
    DateTime(DateTime<Utc>),
    /// List of values (for IN / NOT IN / BETWEEN)
    List(Vec<FieldValue>),
    /// Null value
    Null,
}

impl FieldValue {
    /// The contained string, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The contained integer, if this is an integer value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::DateTime(ts)
    }
}

impl<V: Into<FieldValue>> From<Vec<V>> for FieldValue {
    fn from(values: Vec<V>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<V: Into<FieldValue>> From<Option<V>> for FieldValue {
    fn from(value: Option<V>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A single filter condition
///
/// # Example
///
/// ```rust
/// use polystore::repository::FilterCondition;
///
/// let active = FilterCondition::eq("status", "active");
/// let adult = FilterCondition::gte("age", 18);
/// let recent = FilterCondition::like("email", "%@example.com");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    /// The field name to filter on
    pub field: String,
    /// The comparison operator
    pub operator: FilterOperator,
    /// The value to compare against
    pub value: FieldValue,
}

impl FilterCondition {
    /// Create a filter condition from its parts
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: FieldValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// field = value
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOperator::Equal, value.into())
    }

    /// field <> value
    pub fn ne(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOperator::NotEqual, value.into())
    }

    /// field > value
    pub fn gt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOperator::GreaterThan, value.into())
    }

    /// field >= value
    pub fn gte(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOperator::GreaterThanOrEqual, value.into())
    }

    /// field < value
    pub fn lt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOperator::LessThan, value.into())
    }

    /// field <= value
    pub fn lte(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOperator::LessThanOrEqual, value.into())
    }

    /// Pattern match with SQL `%`/`_` wildcards
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::Like, FieldValue::String(pattern.into()))
    }

    /// field is one of the given values
    pub fn is_in(field: impl Into<String>, values: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOperator::In, values.into())
    }

    /// field is none of the given values
    pub fn not_in(field: impl Into<String>, values: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOperator::NotIn, values.into())
    }

    /// start <= field <= end
    pub fn between(
        field: impl Into<String>,
        start: impl Into<FieldValue>,
        end: impl Into<FieldValue>,
    ) -> Self {
        Self::new(
            field,
            FilterOperator::Between,
            FieldValue::List(vec![start.into(), end.into()]),
        )
    }

    /// field is null
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNull, FieldValue::Null)
    }

    /// field is not null
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNotNull, FieldValue::Null)
    }

    /// field is present (or absent when `present` is false)
    pub fn exists(field: impl Into<String>, present: bool) -> Self {
        Self::new(field, FilterOperator::Exists, FieldValue::Bool(present))
    }
}

/// Boolean operator of a combinator group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOp {
    /// At least one branch matches
    Or,
    /// Every branch matches
    And,
    /// No branch matches
    Nor,
}

/// A group of alternative branches; each branch is a conjunction
#[derive(Debug, Clone, PartialEq)]
pub struct BoolGroup {
    /// The operator joining the branches
    pub op: GroupOp,
    /// Alternative branches; conditions within a branch are AND-ed
    pub branches: Vec<Vec<FilterCondition>>,
}

/// Accumulated builder state shared by both adapters
///
/// A `QueryState` is exclusively owned by the query chain that created it;
/// chain calls mutate it in place. Translation to the backend's native query
/// model happens only when a terminal method executes.
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    /// Conjunctive (AND-ed) conditions
    pub conditions: Vec<FilterCondition>,
    /// At most one boolean combinator group, AND-ed with `conditions`
    pub group: Option<BoolGroup>,
    /// Sort terms, first entry has priority
    pub order: Vec<(String, OrderDirection)>,
    /// Maximum number of results
    pub limit: Option<i64>,
    /// Number of results to skip
    pub offset: Option<i64>,
    /// Relations to eager-load (relational adapter only)
    pub relations: Vec<String>,
}

impl QueryState {
    /// State seeded with a single condition
    pub fn with_condition(condition: FilterCondition) -> Self {
        Self {
            conditions: vec![condition],
            ..Self::default()
        }
    }

    /// Append a conjunctive condition
    pub fn push(&mut self, condition: FilterCondition) {
        self.conditions.push(condition);
    }

    /// Add `condition` as an alternative branch of the `op` group.
    ///
    /// On the first combinator call, every predicate accumulated so far moves
    /// into a single implicit AND branch, and the group starts with that
    /// branch as its first alternative and `condition` as the second.
    /// Subsequent calls append further alternatives to the same group.
    ///
    /// The group's operator is fixed by the first combinator used in a chain;
    /// a later call with a different operator keeps the existing operator
    /// (mixing combinators in one chain is a caller bug and is logged).
    pub fn push_group(&mut self, op: GroupOp, condition: FilterCondition) {
        match &mut self.group {
            Some(group) => {
                if group.op != op {
                    tracing::warn!(
                        requested = ?op,
                        existing = ?group.op,
                        "boolean combinator mismatch; keeping the group's original operator"
                    );
                }
                group.branches.push(vec![condition]);
            }
            None => {
                let mut branches = Vec::new();
                if !self.conditions.is_empty() {
                    branches.push(std::mem::take(&mut self.conditions));
                }
                branches.push(vec![condition]);
                self.group = Some(BoolGroup { op, branches });
            }
        }
    }

    /// Append one sort term
    pub fn push_order(&mut self, field: impl Into<String>, direction: OrderDirection) {
        self.order.push((field.into(), direction));
    }

    /// True when no condition or group has been accumulated
    pub fn is_unfiltered(&self) -> bool {
        self.conditions.is_empty() && self.group.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_direction_display() {
        assert_eq!(format!("{}", OrderDirection::Ascending), "asc");
        assert_eq!(format!("{}", OrderDirection::Descending), "desc");
        assert_eq!(OrderDirection::default(), OrderDirection::Ascending);
    }

    #[test]
    fn field_value_conversions() {
        assert_eq!(FieldValue::from("x"), FieldValue::String("x".to_string()));
        assert_eq!(FieldValue::from(42_i32), FieldValue::Int(42));
        assert_eq!(FieldValue::from(42_i64), FieldValue::Int(42));
        assert_eq!(FieldValue::from(2.5), FieldValue::Float(2.5));
        assert_eq!(FieldValue::from(true), FieldValue::Bool(true));
        assert_eq!(FieldValue::from(None::<i64>), FieldValue::Null);
        assert_eq!(
            FieldValue::from(vec!["a", "b"]),
            FieldValue::List(vec![
                FieldValue::String("a".to_string()),
                FieldValue::String("b".to_string()),
            ])
        );
    }

    #[test]
    fn condition_constructors() {
        let c = FilterCondition::eq("status", "active");
        assert_eq!(c.operator, FilterOperator::Equal);
        assert_eq!(c.value, FieldValue::String("active".to_string()));

        let c = FilterCondition::between("age", 18, 65);
        assert_eq!(c.operator, FilterOperator::Between);
        assert_eq!(
            c.value,
            FieldValue::List(vec![FieldValue::Int(18), FieldValue::Int(65)])
        );

        let c = FilterCondition::is_null("deleted_at");
        assert_eq!(c.operator, FilterOperator::IsNull);
        assert_eq!(c.value, FieldValue::Null);

        let c = FilterCondition::exists("avatar", true);
        assert_eq!(c.operator, FilterOperator::Exists);
    }

    #[test]
    fn first_or_regroups_accumulated_predicates() {
        let mut state = QueryState::with_condition(FilterCondition::eq("role", "admin"));
        state.push(FilterCondition::eq("is_active", true));
        state.push_group(GroupOp::Or, FilterCondition::eq("role", "moderator"));

        assert!(state.conditions.is_empty());
        let group = state.group.expect("group");
        assert_eq!(group.op, GroupOp::Or);
        assert_eq!(group.branches.len(), 2);
        // First alternative is the implicit AND branch of everything prior.
        assert_eq!(group.branches[0].len(), 2);
        assert_eq!(group.branches[1].len(), 1);
        assert_eq!(group.branches[1][0], FilterCondition::eq("role", "moderator"));
    }

    #[test]
    fn subsequent_or_appends_alternatives() {
        let mut state = QueryState::with_condition(FilterCondition::eq("role", "admin"));
        state.push_group(GroupOp::Or, FilterCondition::eq("role", "moderator"));
        state.push_group(GroupOp::Or, FilterCondition::eq("role", "user"));

        let group = state.group.expect("group");
        assert_eq!(group.branches.len(), 3);
    }

    #[test]
    fn or_on_empty_state_has_single_alternative() {
        let mut state = QueryState::default();
        state.push_group(GroupOp::Or, FilterCondition::eq("role", "admin"));

        let group = state.group.expect("group");
        assert_eq!(group.branches.len(), 1);
    }

    #[test]
    fn conditions_after_group_stay_conjunctive() {
        let mut state = QueryState::with_condition(FilterCondition::eq("role", "admin"));
        state.push_group(GroupOp::Or, FilterCondition::eq("role", "moderator"));
        state.push(FilterCondition::eq("is_active", true));

        assert_eq!(state.conditions.len(), 1);
        assert_eq!(state.group.as_ref().expect("group").branches.len(), 2);
    }

    #[test]
    fn mismatched_combinator_keeps_operator() {
        let mut state = QueryState::with_condition(FilterCondition::eq("role", "admin"));
        state.push_group(GroupOp::Or, FilterCondition::eq("role", "moderator"));
        state.push_group(GroupOp::Nor, FilterCondition::eq("role", "user"));

        let group = state.group.expect("group");
        assert_eq!(group.op, GroupOp::Or);
        assert_eq!(group.branches.len(), 3);
    }

    #[test]
    fn unfiltered_predicate() {
        let state = QueryState::default();
        assert!(state.is_unfiltered());
        let state = QueryState::with_condition(FilterCondition::eq("a", 1));
        assert!(!state.is_unfiltered());
    }
}
