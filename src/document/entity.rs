//! Entity trait for the document adapter

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A record type stored in a MongoDB collection
///
/// Documents are plain serde types; the driver handles BSON conversion. An
/// entity that wants the store-generated identifier back after insertion
/// should model `_id` as `Option<ObjectId>` with
/// `#[serde(skip_serializing_if = "Option::is_none")]`.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct Account {
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     id: Option<ObjectId>,
///     email: String,
///     balance: i64,
/// }
///
/// impl DocumentEntity for Account {
///     fn collection_name() -> &'static str {
///         "accounts"
///     }
/// }
/// ```
pub trait DocumentEntity: Serialize + DeserializeOwned + Send + Sync + Unpin {
    /// Collection name
    fn collection_name() -> &'static str;
}
