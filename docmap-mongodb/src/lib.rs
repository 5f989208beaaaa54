//! Networked document-database adapter for docmap.
//!
//! Answers `mongodb://` (and `mongodb+srv://`) connection urls over the
//! official driver. The url must name a default database, e.g.
//! `mongodb://localhost:27017/app`.

mod query;
mod store;

use std::sync::Arc;

use async_trait::async_trait;

use docmap_core::client::{ClientFactory, ConnectTarget, StorageClient};
use docmap_core::error::DbResult;

pub use store::MongoDbStore;

/// Factory claiming `mongodb` url schemes.
#[derive(Debug, Default, Clone, Copy)]
pub struct MongoDbFactory;

#[async_trait]
impl ClientFactory for MongoDbFactory {
    fn can_handle(&self, target: &ConnectTarget) -> bool {
        target.as_url().is_some_and(|url| url.starts_with("mongodb"))
    }

    async fn connect(&self, target: &ConnectTarget) -> DbResult<Arc<dyn StorageClient>> {
        let url = target.as_url().unwrap_or_default();
        Ok(Arc::new(MongoDbStore::connect(url).await?))
    }
}
