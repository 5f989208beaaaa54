//! Cloud document-database adapter for docmap.
//!
//! Answers structured connection options carrying a `projectId`, e.g.
//!
//! ```ignore
//! let db = registry
//!     .connect(doc! { "projectId": "my-app", "endpoint": "http://localhost:8080" })
//!     .await?;
//! ```
//!
//! Talks to the store over its REST surface, so an `endpoint` option can
//! point everything at a local emulator. Queries the store cannot express
//! natively are planned as a fan-out of point lookups and filter chains
//! whose results are unioned and deduplicated by id.

mod codec;
mod query;
mod store;
mod transport;

use std::sync::Arc;

use async_trait::async_trait;
use bson::Document;

use docmap_core::client::{ClientFactory, ConnectTarget, StorageClient};
use docmap_core::error::{DbError, DbResult};

pub use store::FirestoreStore;

/// Factory claiming structured options that name a cloud project.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirestoreFactory;

#[async_trait]
impl ClientFactory for FirestoreFactory {
    fn can_handle(&self, target: &ConnectTarget) -> bool {
        target
            .as_options()
            .is_some_and(|options| options.get_str("projectId").is_ok())
    }

    async fn connect(&self, target: &ConnectTarget) -> DbResult<Arc<dyn StorageClient>> {
        let options = target
            .as_options()
            .cloned()
            .unwrap_or_else(Document::new);
        if options.is_empty() {
            return Err(DbError::Connection("cloud store needs connection options".into()));
        }
        Ok(Arc::new(FirestoreStore::from_options(&options)?))
    }
}
