//! Embedded file-backed storage adapter for docmap.
//!
//! Answers `nedb://` connection urls. `nedb://memory` opens a temporary
//! in-process database; `nedb:///var/lib/app` persists to that directory.
//!
//! # Example
//!
//! ```ignore
//! use docmap_core::{ClientRegistry, ConnectTarget};
//! use docmap_nedb::NeDbFactory;
//!
//! let mut registry = ClientRegistry::new();
//! registry.add(NeDbFactory);
//! let db = registry.connect(&ConnectTarget::from("nedb://memory")).await?;
//! ```

mod evaluator;
mod store;

use std::sync::Arc;

use async_trait::async_trait;

use docmap_core::client::{ClientFactory, ConnectTarget, StorageClient};
use docmap_core::error::DbResult;

pub use store::{NeDbStore, MEMORY_MARKER, SCHEME};

/// Factory claiming `nedb://` urls.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeDbFactory;

#[async_trait]
impl ClientFactory for NeDbFactory {
    fn can_handle(&self, target: &ConnectTarget) -> bool {
        target.as_url().is_some_and(|url| url.starts_with(SCHEME))
    }

    async fn connect(&self, target: &ConnectTarget) -> DbResult<Arc<dyn StorageClient>> {
        let url = target.as_url().unwrap_or_default();
        Ok(Arc::new(NeDbStore::open(url)?))
    }
}
