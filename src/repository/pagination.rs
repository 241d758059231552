//! Backend-agnostic pagination executor
//!
//! [`Paginator`] wraps any [`Query`], issues a count plus a bounded fetch
//! through the bound adapter, and assembles the uniform [`PaginationMeta`]
//! result. The meta shape is a wire contract serialized verbatim into API
//! responses: `{page, per_page, total, total_pages, has_next, has_prev}`.
//!
//! The two round trips (count, then fetch) share no snapshot isolation on
//! either backend; concurrent writes between them can produce a `total` that
//! does not exactly match the returned page.

use std::marker::PhantomData;

use serde::ser::{Serialize, SerializeStruct, Serializer};

use super::traits::{Query, RepositoryResult};

/// Per-page default applied when the requested size is out of range
const DEFAULT_PER_PAGE: i64 = 10;

/// Pagination metadata
///
/// `has_next` and `has_prev` are derived from `page` and `total_pages`
/// rather than stored, so they can never disagree with them; serialization
/// emits them as plain boolean fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationMeta {
    /// Current page, 1-based
    pub page: i64,
    /// Page size used for the fetch
    pub per_page: i64,
    /// Total matching records
    pub total: i64,
    /// Total pages, integer ceiling of `total / per_page`
    pub total_pages: i64,
}

impl PaginationMeta {
    /// Assemble the meta for a page of a `total`-record result set
    ///
    /// `page` and `per_page` must already be normalized (both >= 1).
    pub fn new(page: i64, per_page: i64, total: i64) -> Self {
        let total_pages = total / per_page + i64::from(total % per_page != 0);
        Self {
            page,
            per_page,
            total,
            total_pages,
        }
    }

    /// True when a page after the current one exists
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    /// True when a page before the current one exists
    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}

impl Serialize for PaginationMeta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PaginationMeta", 6)?;
        state.serialize_field("page", &self.page)?;
        state.serialize_field("per_page", &self.per_page)?;
        state.serialize_field("total", &self.total)?;
        state.serialize_field("total_pages", &self.total_pages)?;
        state.serialize_field("has_next", &self.has_next())?;
        state.serialize_field("has_prev", &self.has_prev())?;
        state.end()
    }
}

/// Pagination executor over an accumulated query
///
/// Created by [`Query::paginate`]; executes with [`execute`](Self::execute).
pub struct Paginator<T, Q> {
    query: Q,
    page: i64,
    per_page: i64,
    _record: PhantomData<fn() -> T>,
}

impl<T, Q: Query<T>> Paginator<T, Q> {
    /// Wrap `query` with the requested page coordinates
    pub fn new(query: Q, page: i64, per_page: i64) -> Self {
        Self {
            query,
            page,
            per_page,
            _record: PhantomData,
        }
    }

    /// Issue the count and the bounded fetch, returning meta plus records
    ///
    /// Out-of-range inputs are clamped (`page < 1` to 1, `per_page < 1` to
    /// 10), never rejected.
    pub async fn execute(self) -> RepositoryResult<(PaginationMeta, Vec<T>)> {
        let page = self.page.max(1);
        let per_page = if self.per_page < 1 {
            DEFAULT_PER_PAGE
        } else {
            self.per_page
        };

        let total = self.query.count().await?;
        let records = self
            .query
            .limit(per_page)
            .offset((page - 1) * per_page)
            .find()
            .await?;

        Ok((PaginationMeta::new(page, per_page, total), records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::error::RepositoryError;
    use crate::repository::filter::{FieldValue, FilterCondition, GroupOp, OrderDirection};

    /// In-memory query over a fixed record set, for executor tests
    struct FixedQuery {
        records: Vec<i64>,
        limit: Option<i64>,
        offset: Option<i64>,
    }

    impl FixedQuery {
        fn over(n: i64) -> Self {
            Self {
                records: (0..n).collect(),
                limit: None,
                offset: None,
            }
        }
    }

    impl Query<i64> for FixedQuery {
        fn filter(self, _condition: FilterCondition) -> Self {
            self
        }

        fn combine(self, _op: GroupOp, _condition: FilterCondition) -> Self {
            self
        }

        fn with(self, _relation: impl Into<String>) -> Self {
            self
        }

        fn order_by(self, _field: impl Into<String>, _direction: OrderDirection) -> Self {
            self
        }

        fn limit(mut self, limit: i64) -> Self {
            self.limit = Some(limit);
            self
        }

        fn offset(mut self, offset: i64) -> Self {
            self.offset = Some(offset);
            self
        }

        async fn find(&self) -> RepositoryResult<Vec<i64>> {
            let skip = self.offset.unwrap_or(0).max(0) as usize;
            let take = self.limit.map_or(usize::MAX, |l| l.max(0) as usize);
            Ok(self.records.iter().copied().skip(skip).take(take).collect())
        }

        async fn first(&self) -> RepositoryResult<i64> {
            self.records
                .first()
                .copied()
                .ok_or_else(|| RepositoryError::not_found("records", "first"))
        }

        async fn count(&self) -> RepositoryResult<i64> {
            Ok(self.records.len() as i64)
        }

        async fn pluck(&self, _field: &str) -> RepositoryResult<Vec<FieldValue>> {
            Ok(self.records.iter().map(|n| FieldValue::Int(*n)).collect())
        }

        async fn delete(&self) -> RepositoryResult<u64> {
            Ok(0)
        }

        async fn update(&self, _fields: Vec<(String, FieldValue)>) -> RepositoryResult<u64> {
            Ok(0)
        }
    }

    #[test]
    fn meta_arithmetic() {
        let meta = PaginationMeta::new(1, 20, 57);
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_next());
        assert!(!meta.has_prev());

        let meta = PaginationMeta::new(2, 20, 57);
        assert!(meta.has_next());
        assert!(meta.has_prev());

        let meta = PaginationMeta::new(3, 20, 57);
        assert!(!meta.has_next());
        assert!(meta.has_prev());
    }

    #[test]
    fn meta_exact_multiple() {
        let meta = PaginationMeta::new(1, 20, 60);
        assert_eq!(meta.total_pages, 3);
    }

    #[test]
    fn meta_empty_result_set() {
        let meta = PaginationMeta::new(1, 10, 0);
        assert_eq!(meta.total_pages, 0);
        assert!(!meta.has_next());
        assert!(!meta.has_prev());
    }

    #[test]
    fn meta_wire_shape() {
        let meta = PaginationMeta::new(2, 20, 57);
        let value = serde_json::to_value(meta).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "page": 2,
                "per_page": 20,
                "total": 57,
                "total_pages": 3,
                "has_next": true,
                "has_prev": true,
            })
        );
    }

    #[tokio::test]
    async fn executor_fetches_requested_page() {
        let (meta, records) = FixedQuery::over(57).paginate(2, 20).execute().await.unwrap();
        assert_eq!(meta.page, 2);
        assert_eq!(meta.per_page, 20);
        assert_eq!(meta.total, 57);
        assert_eq!(meta.total_pages, 3);
        assert_eq!(records.len(), 20);
        assert_eq!(records[0], 20);
    }

    #[tokio::test]
    async fn executor_last_page_is_short() {
        let (meta, records) = FixedQuery::over(57).paginate(3, 20).execute().await.unwrap();
        assert_eq!(records.len(), 17);
        assert!(!meta.has_next());
    }

    #[tokio::test]
    async fn executor_clamps_out_of_range_input() {
        let (meta, records) = FixedQuery::over(57).paginate(0, 0).execute().await.unwrap();
        assert_eq!(meta.page, 1);
        assert_eq!(meta.per_page, 10);
        assert_eq!(records.len(), 10);

        let (meta, _) = FixedQuery::over(57).paginate(-3, -1).execute().await.unwrap();
        assert_eq!(meta.page, 1);
        assert_eq!(meta.per_page, 10);
    }

    #[tokio::test]
    async fn executor_page_past_end_is_empty() {
        let (meta, records) = FixedQuery::over(5).paginate(9, 10).execute().await.unwrap();
        assert_eq!(meta.page, 9);
        assert!(records.is_empty());
        assert!(!meta.has_next());
        assert!(meta.has_prev());
    }
}
