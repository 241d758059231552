//! Query builder and BSON filter rendering for the document adapter

use mongodb::bson::{doc, Bson, Document, Regex};

use crate::repository::{
    FieldValue, FilterCondition, FilterOperator, GroupOp, OrderDirection, Query, QueryState,
    RepositoryError, RepositoryOperation, RepositoryResult,
};

use super::entity::DocumentEntity;
use super::repository::DocumentRepository;

/// Chainable query over a MongoDB collection
///
/// Created by the repository's query-entry methods; owned exclusively by the
/// call chain that created it.
pub struct DocumentQuery<T: DocumentEntity> {
    repo: DocumentRepository<T>,
    state: QueryState,
}

impl<T: DocumentEntity> DocumentQuery<T> {
    pub(crate) fn new(repo: DocumentRepository<T>, state: QueryState) -> Self {
        Self { repo, state }
    }
}

impl<T: DocumentEntity> Query<T> for DocumentQuery<T> {
    fn filter(mut self, condition: FilterCondition) -> Self {
        self.state.push(condition);
        self
    }

    fn combine(mut self, op: GroupOp, condition: FilterCondition) -> Self {
        self.state.push_group(op, condition);
        self
    }

    /// The document store has no join primitive; relation prefetch is not
    /// supported and the request is ignored
    fn with(self, relation: impl Into<String>) -> Self {
        let relation: String = relation.into();
        tracing::debug!(
            collection = T::collection_name(),
            relation = %relation,
            "relation prefetch is not supported by the document adapter"
        );
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
        let filter = render_filter(&self.state)?;
        self.repo.run_find(filter, &self.state).await
    }

    async fn first(&self) -> RepositoryResult<T> {
        let filter = render_filter(&self.state)?;
        self.repo
            .run_find_one(filter, &self.state)
            .await?
            .ok_or_else(|| {
                RepositoryError::new(
                    RepositoryOperation::First,
                    crate::repository::RepositoryErrorKind::NotFound,
                    "record not found",
                )
                .with_entity(T::collection_name())
            })
    }

    /// Counts against the same filter, ignoring limit and offset
    async fn count(&self) -> RepositoryResult<i64> {
        let filter = render_filter(&self.state)?;
        self.repo.run_count(filter, None).await
    }

    /// Bounded count: stops at the first match
    async fn exists(&self) -> RepositoryResult<bool> {
        let filter = render_filter(&self.state)?;
        Ok(self.repo.run_count(filter, Some(1)).await? > 0)
    }

    async fn pluck(&self, field: &str) -> RepositoryResult<Vec<FieldValue>> {
        let filter = render_filter(&self.state)?;
        self.repo.run_pluck(filter, &self.state, field).await
    }

    async fn delete(&self) -> RepositoryResult<u64> {
        let filter = render_filter(&self.state)?;
        self.repo.run_delete_many(filter).await
    }

    async fn update(&self, fields: Vec<(String, FieldValue)>) -> RepositoryResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let filter = render_filter(&self.state)?;
        let mut set = Document::new();
        for (field, value) in &fields {
            set.insert(field.clone(), bson_value(value));
        }
        self.repo.run_update_many(filter, doc! { "$set": set }).await
    }
}

/// Convert a [`FieldValue`] into its BSON representation
pub(crate) fn bson_value(value: &FieldValue) -> Bson {
    match value {
        FieldValue::String(s) => Bson::String(s.clone()),
        FieldValue::Int(n) => Bson::Int64(*n),
        FieldValue::Float(x) => Bson::Double(*x),
        FieldValue::Bool(b) => Bson::Boolean(*b),
        FieldValue::DateTime(ts) => Bson::DateTime(mongodb::bson::DateTime::from_chrono(*ts)),
        FieldValue::List(values) => Bson::Array(values.iter().map(bson_value).collect()),
        FieldValue::Null => Bson::Null,
    }
}

/// Convert a BSON value back into a [`FieldValue`] (for projections)
///
/// `ObjectId`s come back in their external hex form; BSON types with no
/// `FieldValue` mapping collapse to `Null`, which the `pluck_*` narrowing
/// helpers then drop.
pub(crate) fn field_value(bson: &Bson) -> FieldValue {
    match bson {
        Bson::String(s) => FieldValue::String(s.clone()),
        Bson::Int32(n) => FieldValue::Int(i64::from(*n)),
        Bson::Int64(n) => FieldValue::Int(*n),
        Bson::Double(x) => FieldValue::Float(*x),
        Bson::Boolean(b) => FieldValue::Bool(*b),
        Bson::DateTime(ts) => FieldValue::DateTime(ts.to_chrono()),
        Bson::ObjectId(oid) => FieldValue::String(oid.to_hex()),
        Bson::Array(items) => FieldValue::List(items.iter().map(field_value).collect()),
        _ => FieldValue::Null,
    }
}

/// Render the accumulated state into a MongoDB filter document
pub(crate) fn render_filter(state: &QueryState) -> RepositoryResult<Document> {
    let mut filter = Document::new();
    for condition in &state.conditions {
        apply_condition(&mut filter, condition)?;
    }
    if let Some(group) = &state.group {
        let mut branches = Vec::with_capacity(group.branches.len());
        for branch in &group.branches {
            let mut rendered = Document::new();
            for condition in branch {
                apply_condition(&mut rendered, condition)?;
            }
            branches.push(Bson::Document(rendered));
        }
        let key = match group.op {
            GroupOp::Or => "$or",
            GroupOp::And => "$and",
            GroupOp::Nor => "$nor",
        };
        filter.insert(key, Bson::Array(branches));
    }
    Ok(filter)
}

/// Render the sort specification, if any
pub(crate) fn render_sort(state: &QueryState) -> Option<Document> {
    if state.order.is_empty() {
        return None;
    }
    let mut sort = Document::new();
    for (field, direction) in &state.order {
        let order = match direction {
            OrderDirection::Ascending => 1,
            OrderDirection::Descending => -1,
        };
        sort.insert(field.clone(), order);
    }
    Some(sort)
}

fn apply_condition(filter: &mut Document, condition: &FilterCondition) -> RepositoryResult<()> {
    let field = condition.field.as_str();
    match condition.operator {
        FilterOperator::Equal => {
            filter.insert(field, bson_value(&condition.value));
        }
        FilterOperator::NotEqual => merge_operator(filter, field, "$ne", &condition.value),
        FilterOperator::GreaterThan => merge_operator(filter, field, "$gt", &condition.value),
        FilterOperator::GreaterThanOrEqual => {
            merge_operator(filter, field, "$gte", &condition.value)
        }
        FilterOperator::LessThan => merge_operator(filter, field, "$lt", &condition.value),
        FilterOperator::LessThanOrEqual => merge_operator(filter, field, "$lte", &condition.value),
        FilterOperator::Like => {
            let FieldValue::String(pattern) = &condition.value else {
                return Err(invalid_filter(field, "LIKE requires a string pattern"));
            };
            filter.insert(
                field,
                Bson::RegularExpression(Regex {
                    pattern: like_to_regex(pattern),
                    options: "i".to_string(),
                }),
            );
        }
        FilterOperator::In => {
            require_list(field, &condition.value)?;
            merge_operator(filter, field, "$in", &condition.value);
        }
        FilterOperator::NotIn => {
            require_list(field, &condition.value)?;
            merge_operator(filter, field, "$nin", &condition.value);
        }
        FilterOperator::Between => {
            let FieldValue::List(bounds) = &condition.value else {
                return Err(invalid_filter(field, "BETWEEN requires a two-element list"));
            };
            let [start, end] = bounds.as_slice() else {
                return Err(invalid_filter(field, "BETWEEN requires a two-element list"));
            };
            merge_operator(filter, field, "$gte", start);
            merge_operator(filter, field, "$lte", end);
        }
        FilterOperator::IsNull => merge_operator(filter, field, "$eq", &FieldValue::Null),
        FilterOperator::IsNotNull => merge_operator(filter, field, "$ne", &FieldValue::Null),
        FilterOperator::Exists => {
            let present = matches!(condition.value, FieldValue::Bool(true));
            merge_operator(filter, field, "$exists", &FieldValue::Bool(present));
        }
    }
    Ok(())
}

/// Insert `op: value` under `field`, merging with an existing operator
/// sub-document so range conditions on one field combine
fn merge_operator(filter: &mut Document, field: &str, op: &str, value: &FieldValue) {
    let rendered = bson_value(value);
    match filter.get_mut(field) {
        Some(Bson::Document(existing)) => {
            existing.insert(op, rendered);
        }
        _ => {
            let mut operators = Document::new();
            operators.insert(op, rendered);
            filter.insert(field, operators);
        }
    }
}

fn require_list(field: &str, value: &FieldValue) -> RepositoryResult<()> {
    match value {
        FieldValue::List(_) => Ok(()),
        _ => Err(invalid_filter(field, "IN requires a list value")),
    }
}

fn invalid_filter(field: &str, message: &str) -> RepositoryError {
    RepositoryError::backend(
        RepositoryOperation::Find,
        format!("{message} (field `{field}`)"),
    )
}

/// Convert a SQL `%`/`_` wildcard pattern into an anchored regular
/// expression, escaping regex metacharacters in the literal parts
pub(crate) fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '.' | '+' | '*' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|'
            | '\\' => {
                regex.push('\\');
                regex.push(c);
            }
            _ => regex.push(c),
        }
    }
    regex.push('$');
    regex
}
