//! Repository implementation for the document adapter

use futures::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{CountOptions, FindOneOptions, FindOptions};
use mongodb::Collection;

use crate::repository::{
    FieldValue, HandleKind, QueryState, Repository, RepositoryError, RepositoryErrorKind,
    RepositoryOperation, RepositoryResult, SharedSession, TransactionHandle,
};

use super::entity::DocumentEntity;
use super::query::{field_value, render_sort, DocumentQuery};

/// [`Repository`] over a MongoDB collection
///
/// Immutable after construction and cheap to clone. A session-bound copy
/// (see [`with_transaction`](Repository::with_transaction)) threads the
/// client session through every operation.
pub struct DocumentRepository<T: DocumentEntity> {
    collection: Collection<T>,
    session: Option<SharedSession>,
}

impl<T: DocumentEntity> Clone for DocumentRepository<T> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            session: self.session.clone(),
        }
    }
}

impl<T: DocumentEntity> DocumentRepository<T> {
    /// Bind the adapter to a configured collection handle
    pub fn new(collection: Collection<T>) -> Self {
        Self {
            collection,
            session: None,
        }
    }

    /// The underlying collection, for store-specific operations the generic
    /// contract does not cover (aggregations, index management)
    pub fn collection(&self) -> &Collection<T> {
        &self.collection
    }

    /// Decode an external identifier into its native `ObjectId` form
    pub fn parse_object_id(id: &str) -> RepositoryResult<ObjectId> {
        ObjectId::parse_str(id).map_err(|_| RepositoryError::invalid_id(T::collection_name(), id))
    }

    fn find_options(state: &QueryState) -> FindOptions {
        FindOptions::builder()
            .sort(render_sort(state))
            .skip(state.offset.map(|n| n.max(0) as u64))
            .limit(state.limit)
            .build()
    }

    pub(crate) async fn run_find(
        &self,
        filter: Document,
        state: &QueryState,
    ) -> RepositoryResult<Vec<T>> {
        let options = Self::find_options(state);
        match &self.session {
            Some(session) => {
                let mut guard = session.lock().await;
                let mut cursor = self
                    .collection
                    .find(filter)
                    .with_options(options)
                    .session(&mut *guard)
                    .await
                    .map_err(|e| map_mongo_error(RepositoryOperation::Find, T::collection_name(), &e))?;
                let mut records = Vec::new();
                while let Some(record) = cursor.next(&mut *guard).await {
                    records.push(record.map_err(|e| {
                        map_mongo_error(RepositoryOperation::Find, T::collection_name(), &e)
                    })?);
                }
                Ok(records)
            }
            None => {
                let cursor = self
                    .collection
                    .find(filter)
                    .with_options(options)
                    .await
                    .map_err(|e| map_mongo_error(RepositoryOperation::Find, T::collection_name(), &e))?;
                cursor.try_collect().await.map_err(|e| {
                    map_mongo_error(RepositoryOperation::Find, T::collection_name(), &e)
                })
            }
        }
    }

    pub(crate) async fn run_find_one(
        &self,
        filter: Document,
        state: &QueryState,
    ) -> RepositoryResult<Option<T>> {
        let options = FindOneOptions::builder()
            .sort(render_sort(state))
            .skip(state.offset.map(|n| n.max(0) as u64))
            .build();
        let action = self.collection.find_one(filter).with_options(options);
        let result = match &self.session {
            Some(session) => {
                let mut guard = session.lock().await;
                action.session(&mut *guard).await
            }
            None => action.await,
        };
        result.map_err(|e| map_mongo_error(RepositoryOperation::First, T::collection_name(), &e))
    }

    pub(crate) async fn run_count(
        &self,
        filter: Document,
        limit: Option<u64>,
    ) -> RepositoryResult<i64> {
        let options = CountOptions::builder().limit(limit).build();
        let action = self.collection.count_documents(filter).with_options(options);
        let result = match &self.session {
            Some(session) => {
                let mut guard = session.lock().await;
                action.session(&mut *guard).await
            }
            None => action.await,
        };
        result
            .map(|count| count as i64)
            .map_err(|e| map_mongo_error(RepositoryOperation::Count, T::collection_name(), &e))
    }

    pub(crate) async fn run_pluck(
        &self,
        filter: Document,
        state: &QueryState,
        field: &str,
    ) -> RepositoryResult<Vec<FieldValue>> {
        let options = FindOptions::builder()
            .sort(render_sort(state))
            .skip(state.offset.map(|n| n.max(0) as u64))
            .limit(state.limit)
            .projection(doc! { field: 1, "_id": if field == "_id" { 1 } else { 0 } })
            .build();
        let raw = self.collection.clone_with_type::<Document>();
        let documents: Vec<Document> = match &self.session {
            Some(session) => {
                let mut guard = session.lock().await;
                let mut cursor = raw
                    .find(filter)
                    .with_options(options)
                    .session(&mut *guard)
                    .await
                    .map_err(|e| map_mongo_error(RepositoryOperation::Pluck, T::collection_name(), &e))?;
                let mut documents = Vec::new();
                while let Some(document) = cursor.next(&mut *guard).await {
                    documents.push(document.map_err(|e| {
                        map_mongo_error(RepositoryOperation::Pluck, T::collection_name(), &e)
                    })?);
                }
                documents
            }
            None => {
                let cursor = raw.find(filter).with_options(options).await.map_err(|e| {
                    map_mongo_error(RepositoryOperation::Pluck, T::collection_name(), &e)
                })?;
                cursor.try_collect().await.map_err(|e| {
                    map_mongo_error(RepositoryOperation::Pluck, T::collection_name(), &e)
                })?
            }
        };
        // Documents missing the field are skipped, matching the documented
        // narrowing behavior of the pluck helpers.
        Ok(documents
            .iter()
            .filter_map(|document| document.get(field).map(field_value))
            .collect())
    }

    async fn run_insert_one(&self, data: &T) -> RepositoryResult<Bson> {
        let action = self.collection.insert_one(data);
        let result = match &self.session {
            Some(session) => {
                let mut guard = session.lock().await;
                action.session(&mut *guard).await
            }
            None => action.await,
        };
        result
            .map(|inserted| inserted.inserted_id)
            .map_err(|e| map_mongo_error(RepositoryOperation::Create, T::collection_name(), &e))
    }

    async fn run_insert_many(&self, data: &[T]) -> RepositoryResult<()> {
        let action = self.collection.insert_many(data);
        let result = match &self.session {
            Some(session) => {
                let mut guard = session.lock().await;
                action.session(&mut *guard).await
            }
            None => action.await,
        };
        result.map(|_| ()).map_err(|e| {
            map_mongo_error(RepositoryOperation::CreateBatch, T::collection_name(), &e)
        })
    }

    /// Replace one document, returning the matched count
    async fn run_replace_one(
        &self,
        op: RepositoryOperation,
        filter: Document,
        data: &T,
    ) -> RepositoryResult<u64> {
        let action = self.collection.replace_one(filter, data);
        let result = match &self.session {
            Some(session) => {
                let mut guard = session.lock().await;
                action.session(&mut *guard).await
            }
            None => action.await,
        };
        result
            .map(|updated| updated.matched_count)
            .map_err(|e| map_mongo_error(op, T::collection_name(), &e))
    }

    pub(crate) async fn run_update_one(
        &self,
        op: RepositoryOperation,
        filter: Document,
        update: Document,
    ) -> RepositoryResult<u64> {
        let action = self.collection.update_one(filter, update);
        let result = match &self.session {
            Some(session) => {
                let mut guard = session.lock().await;
                action.session(&mut *guard).await
            }
            None => action.await,
        };
        result
            .map(|updated| updated.matched_count)
            .map_err(|e| map_mongo_error(op, T::collection_name(), &e))
    }

    pub(crate) async fn run_update_many(
        &self,
        filter: Document,
        update: Document,
    ) -> RepositoryResult<u64> {
        let action = self.collection.update_many(filter, update);
        let result = match &self.session {
            Some(session) => {
                let mut guard = session.lock().await;
                action.session(&mut *guard).await
            }
            None => action.await,
        };
        result
            .map(|updated| updated.modified_count)
            .map_err(|e| map_mongo_error(RepositoryOperation::Update, T::collection_name(), &e))
    }

    async fn run_delete_one(
        &self,
        op: RepositoryOperation,
        filter: Document,
    ) -> RepositoryResult<u64> {
        let action = self.collection.delete_one(filter);
        let result = match &self.session {
            Some(session) => {
                let mut guard = session.lock().await;
                action.session(&mut *guard).await
            }
            None => action.await,
        };
        result
            .map(|deleted| deleted.deleted_count)
            .map_err(|e| map_mongo_error(op, T::collection_name(), &e))
    }

    pub(crate) async fn run_delete_many(&self, filter: Document) -> RepositoryResult<u64> {
        let action = self.collection.delete_many(filter);
        let result = match &self.session {
            Some(session) => {
                let mut guard = session.lock().await;
                action.session(&mut *guard).await
            }
            None => action.await,
        };
        result
            .map(|deleted| deleted.deleted_count)
            .map_err(|e| map_mongo_error(RepositoryOperation::Delete, T::collection_name(), &e))
    }
}

impl<T: DocumentEntity> Repository<T> for DocumentRepository<T> {
    type Query = DocumentQuery<T>;

    fn entity_name(&self) -> &str {
        T::collection_name()
    }

    async fn find_by_id(&self, id: &str) -> RepositoryResult<T> {
        let oid = Self::parse_object_id(id)?;
        self.run_find_one(doc! { "_id": oid }, &QueryState::default())
            .await?
            .ok_or_else(|| RepositoryError::not_found(T::collection_name(), id))
    }

    async fn first(&self) -> RepositoryResult<T> {
        let mut state = QueryState::default();
        state.push_order("_id", crate::repository::OrderDirection::Ascending);
        self.run_find_one(Document::new(), &state)
            .await?
            .ok_or_else(|| {
                RepositoryError::new(
                    RepositoryOperation::First,
                    RepositoryErrorKind::NotFound,
                    "record not found",
                )
                .with_entity(T::collection_name())
            })
    }

    async fn find_all(&self) -> RepositoryResult<Vec<T>> {
        self.run_find(Document::new(), &QueryState::default()).await
    }

    async fn create(&self, data: &T) -> RepositoryResult<String> {
        let inserted_id = self.run_insert_one(data).await?;
        let id = match inserted_id {
            Bson::ObjectId(oid) => oid.to_hex(),
            Bson::String(s) => s,
            other => other.to_string(),
        };
        tracing::debug!(collection = T::collection_name(), id = %id, "document created");
        Ok(id)
    }

    /// One multi-document insert call
    async fn create_batch(&self, data: &[T]) -> RepositoryResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.run_insert_many(data).await
    }

    async fn update(&self, id: &str, data: &T) -> RepositoryResult<()> {
        let oid = Self::parse_object_id(id)?;
        let matched = self
            .run_replace_one(RepositoryOperation::Update, doc! { "_id": oid }, data)
            .await?;
        if matched == 0 {
            return Err(RepositoryError::not_found(T::collection_name(), id)
                .with_operation(RepositoryOperation::Update));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> RepositoryResult<()> {
        let oid = Self::parse_object_id(id)?;
        let deleted = self
            .run_delete_one(RepositoryOperation::Delete, doc! { "_id": oid })
            .await?;
        if deleted == 0 {
            return Err(RepositoryError::not_found(T::collection_name(), id)
                .with_operation(RepositoryOperation::Delete));
        }
        Ok(())
    }

    /// Sequential per-id replaces with no enclosing transaction: a failure
    /// partway through leaves earlier updates committed. This is weaker than
    /// the relational adapter's all-or-nothing batch and is part of the
    /// adapter's contract, not an oversight.
    async fn update_batch(&self, ids: &[String], data: &[T]) -> RepositoryResult<()> {
        if ids.len() != data.len() {
            return Err(RepositoryError::backend(
                RepositoryOperation::UpdateBatch,
                "ids and data must have the same length",
            )
            .with_entity(T::collection_name()));
        }
        for (id, record) in ids.iter().zip(data) {
            let oid = Self::parse_object_id(id)?;
            self.run_replace_one(
                RepositoryOperation::UpdateBatch,
                doc! { "_id": oid },
                record,
            )
            .await?;
        }
        Ok(())
    }

    /// Sequential per-id deletes; same weaker guarantee as
    /// [`update_batch`](Self::update_batch)
    async fn delete_batch(&self, ids: &[String]) -> RepositoryResult<()> {
        for id in ids {
            let oid = Self::parse_object_id(id)?;
            self.run_delete_one(RepositoryOperation::DeleteBatch, doc! { "_id": oid })
                .await?;
        }
        Ok(())
    }

    fn query(&self) -> Self::Query {
        DocumentQuery::new(self.clone(), QueryState::default())
    }

    /// Native atomic `$inc`; no read-modify-write
    async fn increment(&self, id: &str, field: &str, delta: i64) -> RepositoryResult<()> {
        let oid = Self::parse_object_id(id)?;
        self.run_update_one(
            RepositoryOperation::Increment,
            doc! { "_id": oid },
            doc! { "$inc": { field: delta } },
        )
        .await?;
        Ok(())
    }

    fn with_transaction(&self, tx: &TransactionHandle) -> Self {
        let HandleKind::Document(session) = &tx.kind else {
            panic!("invalid transaction handle for document repository");
        };
        Self {
            collection: self.collection.clone(),
            session: Some(session.clone()),
        }
    }
}

/// Normalize a driver error into the repository taxonomy
pub(crate) fn map_mongo_error(
    op: RepositoryOperation,
    entity: &str,
    err: &mongodb::error::Error,
) -> RepositoryError {
    if is_duplicate_key(err) {
        return RepositoryError::duplicate(entity, err.to_string()).with_operation(op);
    }
    RepositoryError::backend(op, err.to_string()).with_entity(entity)
}

/// True when the error reports a duplicate key (code 11000)
fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == 11000,
        ErrorKind::InsertMany(insert) => insert
            .write_errors
            .as_ref()
            .is_some_and(|errors| errors.iter().any(|write| write.code == 11000)),
        _ => false,
    }
}
