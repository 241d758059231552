//! Document adapter integration tests
//!
//! These run against a live MongoDB server and are ignored by default:
//!
//! ```sh
//! POLYSTORE_TEST_MONGODB_URL=mongodb://localhost:27017 \
//!     cargo test --test document_repository -- --ignored
//! ```
//!
//! Each test scopes its documents with a unique tag, so the suite is safe to
//! run concurrently against a shared database.

use std::time::{SystemTime, UNIX_EPOCH};

use mongodb::bson::oid::ObjectId;
use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::IndexModel;
use polystore::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    email: String,
    name: String,
    role: String,
    counter: i64,
}

impl DocumentEntity for Account {
    fn collection_name() -> &'static str {
        "test_accounts"
    }
}

fn account(email: String, role: &str) -> Account {
    Account {
        id: None,
        name: "account".to_string(),
        email,
        role: role.to_string(),
        counter: 0,
    }
}

fn tag(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    format!("{name}-{nanos}")
}

async fn repo() -> DocumentRepository<Account> {
    let url = std::env::var("POLYSTORE_TEST_MONGODB_URL")
        .expect("set POLYSTORE_TEST_MONGODB_URL to run document integration tests");
    let client = mongodb::Client::with_uri_str(&url).await.expect("connect");
    let collection = client
        .database("polystore_test")
        .collection::<Account>(Account::collection_name());
    collection
        .create_index(
            IndexModel::builder()
                .keys(doc! { "email": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        )
        .await
        .expect("unique index");
    DocumentRepository::new(collection)
}

#[tokio::test]
#[ignore = "requires a live MongoDB server"]
async fn create_find_round_trip() {
    let repo = repo().await;
    let email = tag("round-trip");
    let id = repo.create(&account(email.clone(), "user")).await.unwrap();

    // The hex identifier from create is accepted unchanged by find_by_id.
    assert_eq!(id.len(), 24);
    let found = repo.find_by_id(&id).await.unwrap();
    assert_eq!(found.email, email);
    assert_eq!(found.id.expect("id").to_hex(), id);
}

#[tokio::test]
#[ignore = "requires a live MongoDB server"]
async fn missing_record_is_not_found() {
    let repo = repo().await;
    let absent = ObjectId::new().to_hex();

    let err = repo.find_by_id(&absent).await.unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::NotFound);

    let err = repo
        .update(&absent, &account(tag("missing"), "user"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::NotFound);

    let err = repo.delete(&absent).await.unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::NotFound);
}

#[tokio::test]
#[ignore = "requires a live MongoDB server"]
async fn malformed_id_is_invalid_id_not_driver_error() {
    let repo = repo().await;
    for bad in ["42", "zzz", "zzzzzzzzzzzzzzzzzzzzzzzz", ""] {
        let err = repo.find_by_id(bad).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidId, "id: {bad:?}");
    }
}

#[tokio::test]
#[ignore = "requires a live MongoDB server"]
async fn count_agrees_with_find() {
    let repo = repo().await;
    let role = tag("count");
    for _ in 0..3 {
        repo.create(&account(tag("count-member"), &role)).await.unwrap();
    }

    let count = repo.where_eq("role", role.as_str()).count().await.unwrap();
    let found = repo.where_eq("role", role.as_str()).find().await.unwrap();
    assert_eq!(count, found.len() as i64);
    assert_eq!(count, 3);
}

#[tokio::test]
#[ignore = "requires a live MongoDB server"]
async fn or_where_returns_exact_union() {
    let repo = repo().await;
    let admin = tag("or-admin");
    let moderator = tag("or-moderator");
    let other = tag("or-other");
    let a = repo.create(&account(tag("a"), &admin)).await.unwrap();
    let b = repo.create(&account(tag("b"), &moderator)).await.unwrap();
    repo.create(&account(tag("c"), &other)).await.unwrap();

    let found = repo
        .where_eq("role", admin.as_str())
        .or_where("role", moderator.as_str())
        .find()
        .await
        .unwrap();

    let mut ids: Vec<String> = found
        .iter()
        .map(|d| d.id.expect("id").to_hex())
        .collect();
    ids.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
#[ignore = "requires a live MongoDB server"]
async fn increment_and_decrement_cancel_out() {
    let repo = repo().await;
    let id = repo.create(&account(tag("counter"), "user")).await.unwrap();

    repo.increment(&id, "counter", 10).await.unwrap();
    assert_eq!(repo.find_by_id(&id).await.unwrap().counter, 10);

    repo.decrement(&id, "counter", 10).await.unwrap();
    assert_eq!(repo.find_by_id(&id).await.unwrap().counter, 0);
}

#[tokio::test]
#[ignore = "requires a live MongoDB server"]
async fn concurrent_increments_do_not_lose_updates() {
    let repo = repo().await;
    let id = repo.create(&account(tag("atomic"), "user")).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let repo = repo.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            repo.increment(&id, "counter", 1).await
        }));
    }
    for task in tasks {
        task.await.expect("join").unwrap();
    }

    assert_eq!(repo.find_by_id(&id).await.unwrap().counter, 8);
}

/// The document adapter's batch update is explicitly weaker than the
/// relational adapter's: updates apply sequentially with no transaction, so
/// a failure partway through leaves earlier updates committed.
#[tokio::test]
#[ignore = "requires a live MongoDB server"]
async fn update_batch_failure_leaves_earlier_updates_committed() {
    let repo = repo().await;
    let role = tag("batch");
    let first_email = tag("batch-first");
    let ids = vec![
        repo.create(&account(first_email.clone(), &role)).await.unwrap(),
        repo.create(&account(tag("batch-second"), &role)).await.unwrap(),
        repo.create(&account(tag("batch-third"), &role)).await.unwrap(),
    ];

    let mut updates = vec![
        account(tag("batch-first-new"), &role),
        // Duplicates the first account's original email: unique violation.
        account(first_email.clone(), &role),
        account(tag("batch-third-new"), &role),
    ];
    for update in &mut updates {
        update.name = "updated".to_string();
    }

    let err = repo.update_batch(&ids, &updates).await.unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::Duplicate);

    // First update persisted despite the later failure.
    assert_eq!(repo.find_by_id(&ids[0]).await.unwrap().name, "updated");
    // The failing update and everything after it did not apply.
    assert_eq!(repo.find_by_id(&ids[1]).await.unwrap().name, "account");
    assert_eq!(repo.find_by_id(&ids[2]).await.unwrap().name, "account");
}

#[tokio::test]
#[ignore = "requires a live MongoDB server"]
async fn duplicate_create_is_normalized() {
    let repo = repo().await;
    let email = tag("duplicate");
    repo.create(&account(email.clone(), "user")).await.unwrap();

    let err = repo.create(&account(email, "user")).await.unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::Duplicate);
}

#[tokio::test]
#[ignore = "requires a live MongoDB server"]
async fn pagination_issues_count_and_bounded_fetch() {
    let repo = repo().await;
    let role = tag("page");
    for _ in 0..5 {
        repo.create(&account(tag("page-member"), &role)).await.unwrap();
    }

    let (meta, documents) = repo
        .where_eq("role", role.as_str())
        .order_by_asc("_id")
        .paginate(2, 2)
        .execute()
        .await
        .unwrap();

    assert_eq!(meta.total, 5);
    assert_eq!(meta.total_pages, 3);
    assert!(meta.has_next());
    assert!(meta.has_prev());
    assert_eq!(documents.len(), 2);
}

#[tokio::test]
#[ignore = "requires a live MongoDB server"]
async fn pluck_projects_a_single_field() {
    let repo = repo().await;
    let role = tag("pluck");
    let email = tag("pluck-member");
    repo.create(&account(email.clone(), &role)).await.unwrap();

    let emails = repo
        .where_eq("role", role.as_str())
        .pluck_string("email")
        .await
        .unwrap();
    assert_eq!(emails, vec![email]);

    let counters = repo
        .where_eq("role", role.as_str())
        .pluck_int("counter")
        .await
        .unwrap();
    assert_eq!(counters, vec![0]);
}

#[tokio::test]
#[ignore = "requires a live MongoDB server"]
async fn relation_prefetch_is_ignored_not_fatal() {
    let repo = repo().await;
    let role = tag("with");
    repo.create(&account(tag("with-member"), &role)).await.unwrap();

    // `with` has no join to perform; results are unchanged.
    let found = repo
        .where_eq("role", role.as_str())
        .with("sessions")
        .find()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
#[ignore = "requires a live MongoDB server"]
async fn delete_batch_removes_each_identified_document() {
    let repo = repo().await;
    let role = tag("delete-batch");
    let ids = vec![
        repo.create(&account(tag("d1"), &role)).await.unwrap(),
        repo.create(&account(tag("d2"), &role)).await.unwrap(),
    ];

    repo.delete_batch(&ids).await.unwrap();
    assert_eq!(repo.where_eq("role", role.as_str()).count().await.unwrap(), 0);
}
