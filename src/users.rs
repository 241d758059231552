//! User repository composition
//!
//! Concrete example of composing the generic [`Repository`] contract with
//! typed finder methods. The adapter is selected once at construction from
//! [`StorageBackend`] configuration; callers work with the backend-neutral
//! [`User`] record and external string identifiers throughout.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::config::StorageBackend;
use crate::database::Database;
use crate::document::{DocumentEntity, DocumentRepository};
use crate::error::{Result as StoreResult, StoreError};
use crate::repository::{
    FieldValue, OrderDirection, PaginationMeta, Query, QueryState, Repository, RepositoryError,
    RepositoryOperation, RepositoryResult, TransactionHandle,
};
use crate::sql::{SqlEntity, SqlRepository};

/// Administrator role
pub const ROLE_ADMIN: &str = "admin";
/// Moderator role
pub const ROLE_MODERATOR: &str = "moderator";
/// Default role
pub const ROLE_USER: &str = "user";

/// Backend-neutral user record returned by [`UserRepository`]
#[derive(Debug, Clone, Serialize)]
pub struct User {
    /// External string identifier
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Sessions eager-loaded through the `sessions` relation; always empty
    /// on the document backend, which has no relation prefetch
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<UserSession>,
}

/// An authenticated session belonging to a user (relational backend)
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserSession {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a user
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    /// Already-hashed password; hashing happens upstream
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    ROLE_USER.to_string()
}

impl NewUser {
    fn row(&self, now: DateTime<Utc>) -> UserRow {
        UserRow {
            id: 0,
            email: self.email.clone(),
            password: self.password.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            role: self.role.clone(),
            is_active: true,
            email_verified: false,
            email_verified_at: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
            sessions: Vec::new(),
        }
    }

    fn document(&self, now: DateTime<Utc>) -> UserDocument {
        UserDocument {
            id: None,
            email: self.email.clone(),
            password: self.password.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            role: self.role.clone(),
            is_active: true,
            email_verified: false,
            email_verified_at: None,
            last_login_at: None,
            created_at: BsonDateTime::from_chrono(now),
            updated_at: BsonDateTime::from_chrono(now),
        }
    }
}

/// Row shape for the relational backend
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub password: String,
    pub name: String,
    pub avatar: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub email_verified: bool,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub sessions: Vec<UserSession>,
}

impl SqlEntity for UserRow {
    fn table() -> &'static str {
        "users"
    }

    fn insert_columns() -> &'static [&'static str] {
        &[
            "email",
            "password",
            "name",
            "avatar",
            "role",
            "is_active",
            "email_verified",
            "email_verified_at",
            "last_login_at",
            "created_at",
            "updated_at",
        ]
    }

    fn insert_values(&self) -> Vec<FieldValue> {
        vec![
            self.email.clone().into(),
            self.password.clone().into(),
            self.name.clone().into(),
            self.avatar.clone().into(),
            self.role.clone().into(),
            self.is_active.into(),
            self.email_verified.into(),
            self.email_verified_at.into(),
            self.last_login_at.into(),
            self.created_at.into(),
            self.updated_at.into(),
        ]
    }

    fn update_pairs(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("email", self.email.clone().into()),
            ("password", self.password.clone().into()),
            ("name", self.name.clone().into()),
            ("avatar", self.avatar.clone().into()),
            ("role", self.role.clone().into()),
            ("is_active", self.is_active.into()),
            ("email_verified", self.email_verified.into()),
            ("email_verified_at", self.email_verified_at.into()),
            ("last_login_at", self.last_login_at.into()),
            ("updated_at", self.updated_at.into()),
        ]
    }

    fn load_relation(
        pool: &PgPool,
        rows: &mut [Self],
        relation: &str,
    ) -> impl std::future::Future<Output = RepositoryResult<()>> + Send {
        async move {
            match relation {
                "sessions" => {
                    if rows.is_empty() {
                        return Ok(());
                    }
                    let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
                    let sessions: Vec<UserSession> = sqlx::query_as(
                        "SELECT id, user_id, token, expires_at, created_at \
                         FROM sessions WHERE user_id = ANY($1) ORDER BY created_at",
                    )
                    .bind(ids)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| {
                        RepositoryError::backend(RepositoryOperation::Find, e.to_string())
                            .with_entity("sessions")
                    })?;

                    let mut by_user: HashMap<i64, Vec<UserSession>> = HashMap::new();
                    for session in sessions {
                        by_user.entry(session.user_id).or_default().push(session);
                    }
                    for row in rows.iter_mut() {
                        row.sessions = by_user.remove(&row.id).unwrap_or_default();
                    }
                    Ok(())
                }
                other => Err(RepositoryError::backend(
                    RepositoryOperation::Find,
                    format!("unknown relation `{other}` for users"),
                )),
            }
        }
    }
}

/// Document shape for the document backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified_at: Option<BsonDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<BsonDateTime>,
    pub created_at: BsonDateTime,
    pub updated_at: BsonDateTime,
}

impl DocumentEntity for UserDocument {
    fn collection_name() -> &'static str {
        "users"
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id.to_string(),
            email: row.email,
            password: row.password,
            name: row.name,
            avatar: row.avatar,
            role: row.role,
            is_active: row.is_active,
            email_verified: row.email_verified,
            email_verified_at: row.email_verified_at,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sessions: row.sessions,
        }
    }
}

impl From<UserDocument> for User {
    fn from(document: UserDocument) -> Self {
        Self {
            id: document.id.map(|oid| oid.to_hex()).unwrap_or_default(),
            email: document.email,
            password: document.password,
            name: document.name,
            avatar: document.avatar,
            role: document.role,
            is_active: document.is_active,
            email_verified: document.email_verified,
            email_verified_at: document.email_verified_at.map(|ts| ts.to_chrono()),
            last_login_at: document.last_login_at.map(|ts| ts.to_chrono()),
            created_at: document.created_at.to_chrono(),
            updated_at: document.updated_at.to_chrono(),
            sessions: Vec::new(),
        }
    }
}

enum UserStore {
    Sql(SqlRepository<UserRow>),
    Document(DocumentRepository<UserDocument>),
}

/// User repository bound to the configured backend
pub struct UserRepository {
    store: UserStore,
}

impl UserRepository {
    /// Bind to whichever backend `db` was configured for
    pub fn new(db: &Database) -> StoreResult<Self> {
        match db.backend() {
            StorageBackend::Postgres => {
                let pools = db
                    .sql_pools()
                    .ok_or(StoreError::MissingConfig("postgres"))?;
                Ok(Self {
                    store: UserStore::Sql(SqlRepository::new(pools.clone())),
                })
            }
            StorageBackend::Mongodb => {
                let collection = db
                    .collection::<UserDocument>()
                    .ok_or(StoreError::MissingConfig("mongodb"))?;
                Ok(Self {
                    store: UserStore::Document(DocumentRepository::new(collection)),
                })
            }
        }
    }

    /// The backend this repository is bound to
    pub fn backend(&self) -> StorageBackend {
        match &self.store {
            UserStore::Sql(_) => StorageBackend::Postgres,
            UserStore::Document(_) => StorageBackend::Mongodb,
        }
    }

    /// A copy bound to the supplied transaction handle
    ///
    /// # Panics
    ///
    /// Panics when the handle was produced for the other backend.
    pub fn with_transaction(&self, tx: &TransactionHandle) -> Self {
        match &self.store {
            UserStore::Sql(repo) => Self {
                store: UserStore::Sql(repo.with_transaction(tx)),
            },
            UserStore::Document(repo) => Self {
                store: UserStore::Document(repo.with_transaction(tx)),
            },
        }
    }

    /// Insert a new user, returning its external identifier
    pub async fn create(&self, new_user: &NewUser) -> RepositoryResult<String> {
        let now = Utc::now();
        match &self.store {
            UserStore::Sql(repo) => repo.create(&new_user.row(now)).await,
            UserStore::Document(repo) => repo.create(&new_user.document(now)).await,
        }
    }

    pub async fn find_by_id(&self, id: &str) -> RepositoryResult<User> {
        match &self.store {
            UserStore::Sql(repo) => repo.find_by_id(id).await.map(User::from),
            UserStore::Document(repo) => repo.find_by_id(id).await.map(User::from),
        }
    }

    pub async fn find_or_fail(&self, id: &str) -> RepositoryResult<User> {
        match &self.store {
            UserStore::Sql(repo) => repo.find_or_fail(id).await.map(User::from),
            UserStore::Document(repo) => repo.find_or_fail(id).await.map(User::from),
        }
    }

    pub async fn delete(&self, id: &str) -> RepositoryResult<()> {
        match &self.store {
            UserStore::Sql(repo) => repo.delete(id).await,
            UserStore::Document(repo) => repo.delete(id).await,
        }
    }

    pub async fn find_by_email(&self, email: &str) -> RepositoryResult<User> {
        let result = match &self.store {
            UserStore::Sql(repo) => repo.where_eq("email", email).first().await.map(User::from),
            UserStore::Document(repo) => {
                repo.where_eq("email", email).first().await.map(User::from)
            }
        };
        result.map_err(|e| {
            if e.is_not_found() {
                e.with_message(format!("user with email {email} not found"))
            } else {
                e
            }
        })
    }

    pub async fn find_by_role(&self, role: &str) -> RepositoryResult<Vec<User>> {
        match &self.store {
            UserStore::Sql(repo) => Ok(to_users(repo.where_eq("role", role).find().await?)),
            UserStore::Document(repo) => Ok(to_users(repo.where_eq("role", role).find().await?)),
        }
    }

    pub async fn find_active(&self) -> RepositoryResult<Vec<User>> {
        match &self.store {
            UserStore::Sql(repo) => Ok(to_users(repo.where_eq("is_active", true).find().await?)),
            UserStore::Document(repo) => {
                Ok(to_users(repo.where_eq("is_active", true).find().await?))
            }
        }
    }

    /// Active users with their sessions eager-loaded; on the document
    /// backend the relation request is a no-op and sessions stay empty
    pub async fn find_active_with_sessions(&self) -> RepositoryResult<Vec<User>> {
        match &self.store {
            UserStore::Sql(repo) => Ok(to_users(
                repo.where_eq("is_active", true)
                    .with("sessions")
                    .find()
                    .await?,
            )),
            UserStore::Document(repo) => Ok(to_users(
                repo.where_eq("is_active", true)
                    .with("sessions")
                    .find()
                    .await?,
            )),
        }
    }

    pub async fn find_verified(&self) -> RepositoryResult<Vec<User>> {
        match &self.store {
            UserStore::Sql(repo) => {
                Ok(to_users(repo.where_eq("email_verified", true).find().await?))
            }
            UserStore::Document(repo) => {
                Ok(to_users(repo.where_eq("email_verified", true).find().await?))
            }
        }
    }

    /// Case-insensitive search over name and email
    pub async fn search(&self, term: &str) -> RepositoryResult<Vec<User>> {
        match &self.store {
            UserStore::Sql(repo) => {
                let pattern = format!("%{term}%");
                let rows = repo
                    .raw(
                        "SELECT * FROM users WHERE name ILIKE $1 OR email ILIKE $1",
                        vec![pattern.into()],
                    )
                    .await?;
                Ok(to_users(rows))
            }
            UserStore::Document(repo) => {
                let filter = doc! {
                    "$or": [
                        { "name": { "$regex": term, "$options": "i" } },
                        { "email": { "$regex": term, "$options": "i" } },
                    ]
                };
                let documents = repo.run_find(filter, &QueryState::default()).await?;
                Ok(to_users(documents))
            }
        }
    }

    /// One page of users, newest first
    pub async fn list(
        &self,
        page: i64,
        per_page: i64,
    ) -> RepositoryResult<(PaginationMeta, Vec<User>)> {
        match &self.store {
            UserStore::Sql(repo) => {
                let (meta, rows) = repo
                    .order_by("created_at", OrderDirection::Descending)
                    .paginate(page, per_page)
                    .execute()
                    .await?;
                Ok((meta, to_users(rows)))
            }
            UserStore::Document(repo) => {
                let (meta, documents) = repo
                    .order_by("created_at", OrderDirection::Descending)
                    .paginate(page, per_page)
                    .execute()
                    .await?;
                Ok((meta, to_users(documents)))
            }
        }
    }

    pub async fn update_last_login(&self, id: &str) -> RepositoryResult<()> {
        let now = Utc::now();
        self.set_fields(
            id,
            vec![
                ("last_login_at".to_string(), now.into()),
                ("updated_at".to_string(), now.into()),
            ],
        )
        .await
    }

    pub async fn verify_email(&self, id: &str) -> RepositoryResult<()> {
        let now = Utc::now();
        self.set_fields(
            id,
            vec![
                ("email_verified".to_string(), true.into()),
                ("email_verified_at".to_string(), now.into()),
                ("updated_at".to_string(), now.into()),
            ],
        )
        .await
    }

    pub async fn change_password(&self, id: &str, password_hash: &str) -> RepositoryResult<()> {
        self.set_fields(
            id,
            vec![
                ("password".to_string(), password_hash.into()),
                ("updated_at".to_string(), Utc::now().into()),
            ],
        )
        .await
    }

    pub async fn count_by_role(&self, role: &str) -> RepositoryResult<i64> {
        match &self.store {
            UserStore::Sql(repo) => repo.where_eq("role", role).count().await,
            UserStore::Document(repo) => repo.where_eq("role", role).count().await,
        }
    }

    /// Set fields on the identified user; `NotFound` when nothing matched
    async fn set_fields(
        &self,
        id: &str,
        fields: Vec<(String, FieldValue)>,
    ) -> RepositoryResult<()> {
        match &self.store {
            UserStore::Sql(repo) => {
                let key = sql_key(id)?;
                let affected = repo.where_eq("id", key).update(fields).await?;
                if affected == 0 {
                    return Err(RepositoryError::not_found("users", id)
                        .with_operation(RepositoryOperation::Update));
                }
                Ok(())
            }
            UserStore::Document(repo) => {
                let oid = DocumentRepository::<UserDocument>::parse_object_id(id)?;
                let mut set = mongodb::bson::Document::new();
                for (field, value) in &fields {
                    set.insert(field.clone(), crate::document::bson_value(value));
                }
                let matched = repo
                    .run_update_one(
                        RepositoryOperation::Update,
                        doc! { "_id": oid },
                        doc! { "$set": set },
                    )
                    .await?;
                if matched == 0 {
                    return Err(RepositoryError::not_found("users", id)
                        .with_operation(RepositoryOperation::Update));
                }
                Ok(())
            }
        }
    }
}

fn to_users<R: Into<User>>(records: Vec<R>) -> Vec<User> {
    records.into_iter().map(Into::into).collect()
}

fn sql_key(id: &str) -> RepositoryResult<i64> {
    id.trim()
        .parse()
        .map_err(|_| RepositoryError::invalid_id("users", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NewUser {
        NewUser {
            email: "alice@example.com".to_string(),
            password: "hashed".to_string(),
            name: "Alice".to_string(),
            avatar: None,
            role: ROLE_ADMIN.to_string(),
        }
    }

    #[test]
    fn insert_values_align_with_columns() {
        let row = sample().row(Utc::now());
        assert_eq!(UserRow::insert_columns().len(), row.insert_values().len());
    }

    #[test]
    fn row_converts_with_string_id() {
        let mut row = sample().row(Utc::now());
        row.id = 42;
        let user = User::from(row);
        assert_eq!(user.id, "42");
        assert_eq!(user.role, ROLE_ADMIN);
        assert!(user.is_active);
        assert!(!user.email_verified);
        assert!(user.sessions.is_empty());
    }

    #[test]
    fn document_converts_with_hex_id() {
        let oid = ObjectId::new();
        let mut document = sample().document(Utc::now());
        document.id = Some(oid);
        let user = User::from(document);
        assert_eq!(user.id, oid.to_hex());
        assert_eq!(user.email, "alice@example.com");
    }

    #[test]
    fn unsaved_document_converts_with_empty_id() {
        let user = User::from(sample().document(Utc::now()));
        assert!(user.id.is_empty());
    }

    #[test]
    fn document_timestamps_round_trip() {
        let now = Utc::now();
        let document = sample().document(now);
        let user = User::from(document);
        // BSON stores millisecond precision.
        assert_eq!(user.created_at.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn new_user_defaults() {
        let new_user: NewUser = serde_json::from_value(serde_json::json!({
            "email": "bob@example.com",
            "password": "hashed",
            "name": "Bob",
        }))
        .expect("deserialize");
        assert_eq!(new_user.role, ROLE_USER);
        assert!(new_user.avatar.is_none());
    }

    #[test]
    fn sql_key_rejects_non_numeric() {
        assert_eq!(sql_key("42").unwrap(), 42);
        assert!(sql_key("64f1b1b1b1b1b1b1b1b1b1b1").unwrap_err().is_invalid_id());
    }

    #[test]
    fn serialized_user_hides_password() {
        let mut row = sample().row(Utc::now());
        row.id = 1;
        let value = serde_json::to_value(User::from(row)).expect("serialize");
        assert!(value.get("password").is_none());
        assert_eq!(value["email"], "alice@example.com");
    }
}
