//! Query builder and SQL clause rendering for the relational adapter

use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};

use crate::repository::{
    BoolGroup, FieldValue, FilterCondition, FilterOperator, GroupOp, OrderDirection, Query,
    QueryState, RepositoryError, RepositoryOperation, RepositoryResult,
};

use super::entity::SqlEntity;
use super::repository::{Route, SqlRepository};

/// Chainable query over a PostgreSQL table
///
/// Created by the repository's query-entry methods; owned exclusively by the
/// call chain that created it.
pub struct SqlQuery<T: SqlEntity> {
    repo: SqlRepository<T>,
    state: QueryState,
}

impl<T: SqlEntity> SqlQuery<T> {
    pub(crate) fn new(repo: SqlRepository<T>, state: QueryState) -> Self {
        Self { repo, state }
    }
}

impl<T: SqlEntity> Query<T> for SqlQuery<T> {
    fn filter(mut self, condition: FilterCondition) -> Self {
        self.state.push(condition);
        self
    }

    fn combine(mut self, op: GroupOp, condition: FilterCondition) -> Self {
        self.state.push_group(op, condition);
        self
    }

    fn with(mut self, relation: impl Into<String>) -> Self {
        self.state.relations.push(relation.into());
        self
    }

    fn order_by(mut self, field: impl Into<String>, direction: OrderDirection) -> Self {
        self.state.push_order(field, direction);
        self
    }

    fn limit(mut self, limit: i64) -> Self {
        self.state.limit = Some(limit);
        self
    }

    fn offset(mut self, offset: i64) -> Self {
        self.state.offset = Some(offset);
        self
    }

    async fn find(&self) -> RepositoryResult<Vec<T>> {
        let mut qb = select_builder(T::table(), &self.state)?;
        let mut rows = self
            .repo
            .fetch_all(&mut qb, Route::Read, RepositoryOperation::Find)
            .await?;
        for relation in &self.state.relations {
            T::load_relation(self.repo.read_pool(), &mut rows, relation).await?;
        }
        Ok(rows)
    }

    async fn first(&self) -> RepositoryResult<T> {
        let mut state = self.state.clone();
        state.limit = Some(1);
        let mut qb = select_builder(T::table(), &state)?;
        let row = self
            .repo
            .fetch_optional(&mut qb, Route::Read, RepositoryOperation::First)
            .await?;
        let mut record = row.ok_or_else(|| {
            RepositoryError::new(
                RepositoryOperation::First,
                crate::repository::RepositoryErrorKind::NotFound,
                "record not found",
            )
            .with_entity(T::table())
        })?;
        for relation in &self.state.relations {
            T::load_relation(self.repo.read_pool(), std::slice::from_mut(&mut record), relation)
                .await?;
        }
        Ok(record)
    }

    async fn count(&self) -> RepositoryResult<i64> {
        let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", T::table()));
        push_where(&mut qb, &self.state)?;
        self.repo
            .fetch_scalar(&mut qb, Route::Read, RepositoryOperation::Count)
            .await
    }

    async fn pluck(&self, field: &str) -> RepositoryResult<Vec<FieldValue>> {
        validate_field(field)?;
        let mut qb = QueryBuilder::new(format!("SELECT {} FROM {}", field, T::table()));
        push_where(&mut qb, &self.state)?;
        push_order(&mut qb, &self.state)?;
        push_paging(&mut qb, &self.state);
        let rows = self
            .repo
            .fetch_rows(&mut qb, Route::Read, RepositoryOperation::Pluck)
            .await?;
        // Values whose column type has no FieldValue mapping are dropped.
        Ok(rows.iter().filter_map(decode_column).collect())
    }

    async fn delete(&self) -> RepositoryResult<u64> {
        let mut qb = QueryBuilder::new(format!("DELETE FROM {}", T::table()));
        push_where(&mut qb, &self.state)?;
        self.repo.execute(&mut qb, RepositoryOperation::Delete).await
    }

    async fn update(&self, fields: Vec<(String, FieldValue)>) -> RepositoryResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", T::table()));
        for (i, (field, value)) in fields.iter().enumerate() {
            validate_field(field)?;
            if i > 0 {
                qb.push(", ");
            }
            qb.push(field.as_str());
            qb.push(" = ");
            bind_scalar(&mut qb, value)?;
        }
        push_where(&mut qb, &self.state)?;
        self.repo.execute(&mut qb, RepositoryOperation::Update).await
    }
}

/// Reject field names that are not plain (optionally qualified) identifiers
/// before they are interpolated into SQL
pub(crate) fn validate_field(field: &str) -> RepositoryResult<()> {
    let valid = field
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(RepositoryError::backend(
            RepositoryOperation::Find,
            format!("invalid field name `{field}`"),
        ))
    }
}

/// `SELECT * FROM {table}` plus WHERE, ORDER BY, LIMIT/OFFSET from `state`
pub(crate) fn select_builder(
    table: &str,
    state: &QueryState,
) -> RepositoryResult<QueryBuilder<'static, Postgres>> {
    let mut qb = QueryBuilder::new(format!("SELECT * FROM {table}"));
    push_where(&mut qb, state)?;
    push_order(&mut qb, state)?;
    push_paging(&mut qb, state);
    Ok(qb)
}

/// Append the WHERE clause for the accumulated conditions and boolean group
pub(crate) fn push_where(
    qb: &mut QueryBuilder<'static, Postgres>,
    state: &QueryState,
) -> RepositoryResult<()> {
    if state.is_unfiltered() {
        return Ok(());
    }
    qb.push(" WHERE ");
    let mut first = true;
    for condition in &state.conditions {
        if !first {
            qb.push(" AND ");
        }
        first = false;
        push_condition(qb, condition)?;
    }
    if let Some(group) = &state.group {
        if !first {
            qb.push(" AND ");
        }
        push_group(qb, group)?;
    }
    Ok(())
}

fn push_group(qb: &mut QueryBuilder<'static, Postgres>, group: &BoolGroup) -> RepositoryResult<()> {
    if group.op == GroupOp::Nor {
        qb.push("NOT ");
    }
    let joiner = match group.op {
        GroupOp::And => " AND ",
        GroupOp::Or | GroupOp::Nor => " OR ",
    };
    qb.push("(");
    for (i, branch) in group.branches.iter().enumerate() {
        if i > 0 {
            qb.push(joiner);
        }
        qb.push("(");
        for (j, condition) in branch.iter().enumerate() {
            if j > 0 {
                qb.push(" AND ");
            }
            push_condition(qb, condition)?;
        }
        qb.push(")");
    }
    qb.push(")");
    Ok(())
}

fn push_condition(
    qb: &mut QueryBuilder<'static, Postgres>,
    condition: &FilterCondition,
) -> RepositoryResult<()> {
    validate_field(&condition.field)?;
    let field = condition.field.as_str();
    match condition.operator {
        FilterOperator::Equal => match &condition.value {
            FieldValue::Null => {
                qb.push(field);
                qb.push(" IS NULL");
            }
            value => {
                qb.push(field);
                qb.push(" = ");
                bind_scalar(qb, value)?;
            }
        },
        FilterOperator::NotEqual => match &condition.value {
            FieldValue::Null => {
                qb.push(field);
                qb.push(" IS NOT NULL");
            }
            value => {
                qb.push(field);
                qb.push(" <> ");
                bind_scalar(qb, value)?;
            }
        },
        FilterOperator::GreaterThan => {
            qb.push(field);
            qb.push(" > ");
            bind_scalar(qb, &condition.value)?;
        }
        FilterOperator::GreaterThanOrEqual => {
            qb.push(field);
            qb.push(" >= ");
            bind_scalar(qb, &condition.value)?;
        }
        FilterOperator::LessThan => {
            qb.push(field);
            qb.push(" < ");
            bind_scalar(qb, &condition.value)?;
        }
        FilterOperator::LessThanOrEqual => {
            qb.push(field);
            qb.push(" <= ");
            bind_scalar(qb, &condition.value)?;
        }
        FilterOperator::Like => {
            qb.push(field);
            qb.push(" LIKE ");
            bind_scalar(qb, &condition.value)?;
        }
        FilterOperator::In => push_list(qb, field, &condition.value, false)?,
        FilterOperator::NotIn => push_list(qb, field, &condition.value, true)?,
        FilterOperator::Between => {
            let FieldValue::List(bounds) = &condition.value else {
                return Err(invalid_filter(field, "BETWEEN requires a two-element list"));
            };
            let [start, end] = bounds.as_slice() else {
                return Err(invalid_filter(field, "BETWEEN requires a two-element list"));
            };
            qb.push("(");
            qb.push(field);
            qb.push(" >= ");
            bind_scalar(qb, start)?;
            qb.push(" AND ");
            qb.push(field);
            qb.push(" <= ");
            bind_scalar(qb, end)?;
            qb.push(")");
        }
        FilterOperator::IsNull => {
            qb.push(field);
            qb.push(" IS NULL");
        }
        FilterOperator::IsNotNull => {
            qb.push(field);
            qb.push(" IS NOT NULL");
        }
        // Every column exists on a relational schema; presence degrades to a
        // null check.
        FilterOperator::Exists => {
            qb.push(field);
            qb.push(match condition.value {
                FieldValue::Bool(false) => " IS NULL",
                _ => " IS NOT NULL",
            });
        }
    }
    Ok(())
}

fn push_list(
    qb: &mut QueryBuilder<'static, Postgres>,
    field: &str,
    value: &FieldValue,
    negated: bool,
) -> RepositoryResult<()> {
    let FieldValue::List(values) = value else {
        return Err(invalid_filter(field, "IN requires a list value"));
    };
    if values.is_empty() {
        // IN over the empty list matches nothing.
        qb.push(if negated { "TRUE" } else { "FALSE" });
        return Ok(());
    }
    qb.push(field);
    qb.push(if negated { " <> ALL(" } else { " = ANY(" });
    if values.iter().all(|v| matches!(v, FieldValue::Int(_))) {
        let list: Vec<i64> = values.iter().filter_map(FieldValue::as_int).collect();
        qb.push_bind(list);
    } else if values.iter().all(|v| matches!(v, FieldValue::String(_))) {
        let list: Vec<String> = values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        qb.push_bind(list);
    } else {
        return Err(invalid_filter(
            field,
            "IN list values must be all strings or all integers",
        ));
    }
    qb.push(")");
    Ok(())
}

/// Bind one scalar value; `Null` renders as a literal, lists are rejected
pub(crate) fn bind_scalar(
    qb: &mut QueryBuilder<'static, Postgres>,
    value: &FieldValue,
) -> RepositoryResult<()> {
    match value {
        FieldValue::String(s) => {
            qb.push_bind(s.clone());
        }
        FieldValue::Int(n) => {
            qb.push_bind(*n);
        }
        FieldValue::Float(x) => {
            qb.push_bind(*x);
        }
        FieldValue::Bool(b) => {
            qb.push_bind(*b);
        }
        FieldValue::DateTime(ts) => {
            qb.push_bind(*ts);
        }
        FieldValue::Null => {
            qb.push("NULL");
        }
        FieldValue::List(_) => {
            return Err(RepositoryError::backend(
                RepositoryOperation::Find,
                "list value in scalar position",
            ));
        }
    }
    Ok(())
}

/// Append the ORDER BY clause
pub(crate) fn push_order(
    qb: &mut QueryBuilder<'static, Postgres>,
    state: &QueryState,
) -> RepositoryResult<()> {
    if state.order.is_empty() {
        return Ok(());
    }
    qb.push(" ORDER BY ");
    for (i, (field, direction)) in state.order.iter().enumerate() {
        validate_field(field)?;
        if i > 0 {
            qb.push(", ");
        }
        qb.push(field.as_str());
        qb.push(match direction {
            OrderDirection::Ascending => " ASC",
            OrderDirection::Descending => " DESC",
        });
    }
    Ok(())
}

/// Append LIMIT/OFFSET as bound parameters
pub(crate) fn push_paging(qb: &mut QueryBuilder<'static, Postgres>, state: &QueryState) {
    if let Some(limit) = state.limit {
        qb.push(" LIMIT ");
        qb.push_bind(limit);
    }
    if let Some(offset) = state.offset {
        qb.push(" OFFSET ");
        qb.push_bind(offset);
    }
}

fn invalid_filter(field: &str, message: &str) -> RepositoryError {
    RepositoryError::backend(
        RepositoryOperation::Find,
        format!("{message} (field `{field}`)"),
    )
}

/// Decode the first column of a row into a [`FieldValue`], if its type maps
fn decode_column(row: &PgRow) -> Option<FieldValue> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(0) {
        return Some(v.map_or(FieldValue::Null, FieldValue::Int));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(0) {
        return Some(v.map_or(FieldValue::Null, |n| FieldValue::Int(i64::from(n))));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(0) {
        return Some(v.map_or(FieldValue::Null, FieldValue::Float));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(0) {
        return Some(v.map_or(FieldValue::Null, FieldValue::Bool));
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(0) {
        return Some(v.map_or(FieldValue::Null, FieldValue::DateTime));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(0) {
        return Some(v.map_or(FieldValue::Null, FieldValue::String));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::FilterCondition;

    fn rendered(state: &QueryState) -> String {
        select_builder("users", state).expect("render").sql().to_string()
    }

    #[test]
    fn bare_select() {
        assert_eq!(rendered(&QueryState::default()), "SELECT * FROM users");
    }

    #[test]
    fn equality_condition() {
        let state = QueryState::with_condition(FilterCondition::eq("email", "a@b.c"));
        assert_eq!(rendered(&state), "SELECT * FROM users WHERE email = $1");
    }

    #[test]
    fn conjunctive_conditions() {
        let mut state = QueryState::with_condition(FilterCondition::eq("role", "admin"));
        state.push(FilterCondition::gte("age", 18));
        assert_eq!(
            rendered(&state),
            "SELECT * FROM users WHERE role = $1 AND age >= $2"
        );
    }

    #[test]
    fn null_checks() {
        let mut state = QueryState::with_condition(FilterCondition::is_null("deleted_at"));
        state.push(FilterCondition::is_not_null("email_verified_at"));
        assert_eq!(
            rendered(&state),
            "SELECT * FROM users WHERE deleted_at IS NULL AND email_verified_at IS NOT NULL"
        );
    }

    #[test]
    fn equality_with_null_renders_is_null() {
        let state = QueryState::with_condition(FilterCondition::eq("avatar", FieldValue::Null));
        assert_eq!(rendered(&state), "SELECT * FROM users WHERE avatar IS NULL");
    }

    #[test]
    fn in_lists_bind_as_arrays() {
        let state = QueryState::with_condition(FilterCondition::is_in(
            "role",
            vec!["admin", "moderator"],
        ));
        assert_eq!(rendered(&state), "SELECT * FROM users WHERE role = ANY($1)");

        let state =
            QueryState::with_condition(FilterCondition::not_in("id", vec![1_i64, 2, 3]));
        assert_eq!(rendered(&state), "SELECT * FROM users WHERE id <> ALL($1)");
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let state =
            QueryState::with_condition(FilterCondition::is_in("role", Vec::<String>::new()));
        assert_eq!(rendered(&state), "SELECT * FROM users WHERE FALSE");

        let state =
            QueryState::with_condition(FilterCondition::not_in("role", Vec::<String>::new()));
        assert_eq!(rendered(&state), "SELECT * FROM users WHERE TRUE");
    }

    #[test]
    fn between_renders_inclusive_range() {
        let state = QueryState::with_condition(FilterCondition::between("age", 18, 65));
        assert_eq!(
            rendered(&state),
            "SELECT * FROM users WHERE (age >= $1 AND age <= $2)"
        );
    }

    #[test]
    fn like_condition() {
        let state = QueryState::with_condition(FilterCondition::like("email", "%@example.com"));
        assert_eq!(rendered(&state), "SELECT * FROM users WHERE email LIKE $1");
    }

    #[test]
    fn or_group_regroups_prior_conditions() {
        let mut state = QueryState::with_condition(FilterCondition::eq("role", "admin"));
        state.push_group(GroupOp::Or, FilterCondition::eq("role", "moderator"));
        assert_eq!(
            rendered(&state),
            "SELECT * FROM users WHERE ((role = $1) OR (role = $2))"
        );
    }

    #[test]
    fn or_group_with_conjunctive_tail() {
        let mut state = QueryState::with_condition(FilterCondition::eq("role", "admin"));
        state.push_group(GroupOp::Or, FilterCondition::eq("role", "moderator"));
        state.push(FilterCondition::eq("is_active", true));
        assert_eq!(
            rendered(&state),
            "SELECT * FROM users WHERE is_active = $1 AND ((role = $2) OR (role = $3))"
        );
    }

    #[test]
    fn multi_condition_branch_renders_as_conjunction() {
        let mut state = QueryState::with_condition(FilterCondition::eq("role", "admin"));
        state.push(FilterCondition::eq("is_active", true));
        state.push_group(GroupOp::Or, FilterCondition::eq("role", "moderator"));
        assert_eq!(
            rendered(&state),
            "SELECT * FROM users WHERE ((role = $1 AND is_active = $2) OR (role = $3))"
        );
    }

    #[test]
    fn nor_group_negates_disjunction() {
        let mut state = QueryState::default();
        state.push_group(GroupOp::Nor, FilterCondition::eq("role", "admin"));
        state.push_group(GroupOp::Nor, FilterCondition::eq("role", "moderator"));
        assert_eq!(
            rendered(&state),
            "SELECT * FROM users WHERE NOT ((role = $1) OR (role = $2))"
        );
    }

    #[test]
    fn order_limit_offset() {
        let mut state = QueryState::default();
        state.push_order("created_at", OrderDirection::Descending);
        state.push_order("name", OrderDirection::Ascending);
        state.limit = Some(20);
        state.offset = Some(40);
        assert_eq!(
            rendered(&state),
            "SELECT * FROM users ORDER BY created_at DESC, name ASC LIMIT $1 OFFSET $2"
        );
    }

    #[test]
    fn exists_degrades_to_null_check() {
        let state = QueryState::with_condition(FilterCondition::exists("avatar", true));
        assert_eq!(rendered(&state), "SELECT * FROM users WHERE avatar IS NOT NULL");

        let state = QueryState::with_condition(FilterCondition::exists("avatar", false));
        assert_eq!(rendered(&state), "SELECT * FROM users WHERE avatar IS NULL");
    }

    #[test]
    fn field_names_are_validated() {
        assert!(validate_field("email").is_ok());
        assert!(validate_field("users.email").is_ok());
        assert!(validate_field("_private").is_ok());
        assert!(validate_field("1bad").is_err());
        assert!(validate_field("email; DROP TABLE users").is_err());
        assert!(validate_field("email = 'x' OR '1'='1'").is_err());
        assert!(validate_field("").is_err());

        let state = QueryState::with_condition(FilterCondition::eq("a; --", 1));
        assert!(select_builder("users", &state).is_err());
    }

    #[test]
    fn heterogeneous_in_list_is_rejected() {
        let state = QueryState::with_condition(FilterCondition::is_in(
            "role",
            FieldValue::List(vec![FieldValue::Int(1), FieldValue::String("x".into())]),
        ));
        assert!(select_builder("users", &state).is_err());
    }
}
