//! The storage client contract.
//!
//! Every backend adapter implements [`StorageClient`], a uniform async
//! surface over wire-format documents (`bson::Document`). The engine is the
//! only caller; it handles schemas, hooks, and population above this line,
//! so adapters stay oblivious to models.
//!
//! Adapters are paired with a [`ClientFactory`] that claims connection
//! targets and produces connected clients. Factories never mutate global
//! state: connecting yields an owned client for the caller to thread through
//! a database handle.
//!
//! # Error Handling
//!
//! Not-found outcomes are not errors anywhere on this surface: lookups
//! resolve to `Ok(None)` and delete-family operations to `Ok(0)`. Native
//! backend failures surface as [`DbError::Backend`](crate::error::DbError)
//! with at most one attempt per call.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::error::DbResult;
use crate::query::Query;

/// The shape of a backend's native document ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeIdKind {
    /// Ids are strings (embedded and cloud stores).
    String,
    /// Ids are BSON object ids (networked store).
    ObjectId,
}

/// Options applied to `find`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Sort keys in priority order; a leading `-` means descending.
    pub sort: Vec<String>,
    /// Number of matching documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
}

impl FindOptions {
    /// Sorts by the given fields (`-` prefix for descending).
    pub fn sort<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.sort = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Skips the first `skip` matches.
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Caps the result at `limit` documents.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Options applied to `find_one_and_update`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Insert a fresh document when nothing matches.
    pub upsert: bool,
}

/// Options applied to `create_index`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// Reject duplicate values for the indexed field.
    pub unique: bool,
    /// Skip documents missing the indexed field.
    pub sparse: bool,
}

/// Uniform async interface over a connected document store.
///
/// Implementations must be thread-safe; the engine shares one client across
/// concurrent tasks behind an `Arc`.
#[async_trait]
pub trait StorageClient: Send + Sync + Debug {
    /// Saves a wire document. `id: None` inserts and returns the fresh
    /// backend-generated id; `id: Some` upserts under that id and returns it
    /// unchanged.
    async fn save(&self, collection: &str, id: Option<&Bson>, values: Document)
    -> DbResult<Bson>;

    /// Deletes the document with the given id. Returns the number of
    /// documents removed (0 or 1).
    async fn delete(&self, collection: &str, id: &Bson) -> DbResult<u64>;

    /// Deletes the first document matching the query.
    async fn delete_one(&self, collection: &str, query: &Query) -> DbResult<u64>;

    /// Deletes every document matching the query.
    async fn delete_many(&self, collection: &str, query: &Query) -> DbResult<u64>;

    /// Finds the first document matching the query.
    async fn find_one(&self, collection: &str, query: &Query) -> DbResult<Option<Document>>;

    /// Finds every document matching the query, honoring sort, skip, and
    /// limit.
    async fn find(
        &self,
        collection: &str,
        query: &Query,
        options: &FindOptions,
    ) -> DbResult<Vec<Document>>;

    /// Applies `values` to the first match and returns the post-image.
    /// With `upsert`, a miss inserts `values` as a fresh document instead of
    /// resolving to `Ok(None)`.
    async fn find_one_and_update(
        &self,
        collection: &str,
        query: &Query,
        values: Document,
        options: &UpdateOptions,
    ) -> DbResult<Option<Document>>;

    /// Deletes the first match and returns it.
    async fn find_one_and_delete(&self, collection: &str, query: &Query)
    -> DbResult<Option<Document>>;

    /// Counts documents matching the query.
    async fn count(&self, collection: &str, query: &Query) -> DbResult<u64>;

    /// Creates a single-field index. Backends without real indexes treat
    /// this as a no-op.
    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        options: &IndexOptions,
    ) -> DbResult<()>;

    /// Removes every document in the collection.
    async fn clear_collection(&self, collection: &str) -> DbResult<()>;

    /// Removes every collection in the database.
    async fn drop_database(&self) -> DbResult<()>;

    /// Releases the connection. Further calls on the client are undefined.
    async fn close(&self) -> DbResult<()>;

    /// Whether the value has the shape of this backend's native ids.
    fn is_native_id(&self, value: &Bson) -> bool;

    /// The shape of ids this backend generates.
    fn native_id_kind(&self) -> NativeIdKind;

    /// Renders a native id in its canonical string form.
    fn to_canonical_id(&self, id: &Bson) -> String;
}

/// What a caller hands to `connect`.
///
/// Embedded and networked stores are addressed by url scheme; the cloud
/// store takes a structured options document and is detected by shape, not
/// by scheme.
#[derive(Debug, Clone)]
pub enum ConnectTarget {
    /// A connection url, e.g. `nedb://memory` or `mongodb://host/db`.
    Url(String),
    /// Structured connection options for stores without a url form.
    Options(Document),
}

impl ConnectTarget {
    /// The url, when this target is url-shaped.
    pub fn as_url(&self) -> Option<&str> {
        match self {
            ConnectTarget::Url(url) => Some(url),
            ConnectTarget::Options(_) => None,
        }
    }

    /// The options document, when this target is options-shaped.
    pub fn as_options(&self) -> Option<&Document> {
        match self {
            ConnectTarget::Url(_) => None,
            ConnectTarget::Options(options) => Some(options),
        }
    }
}

impl From<&str> for ConnectTarget {
    fn from(url: &str) -> Self {
        ConnectTarget::Url(url.to_owned())
    }
}

impl From<String> for ConnectTarget {
    fn from(url: String) -> Self {
        ConnectTarget::Url(url)
    }
}

impl From<Document> for ConnectTarget {
    fn from(options: Document) -> Self {
        ConnectTarget::Options(options)
    }
}

/// Factory that claims connection targets and produces connected clients.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Whether this factory recognizes the target. Pure: must never fail on
    /// malformed input, only decline it.
    fn can_handle(&self, target: &ConnectTarget) -> bool;

    /// Connects to the target.
    async fn connect(&self, target: &ConnectTarget) -> DbResult<Arc<dyn StorageClient>>;
}
