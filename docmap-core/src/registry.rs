//! Ordered registry of client factories.

use std::sync::Arc;

use tracing::debug;

use crate::client::{ClientFactory, ConnectTarget, StorageClient};
use crate::db::Database;
use crate::error::{DbError, DbResult};

/// An ordered list of [`ClientFactory`] instances.
///
/// Dispatch is first-match-wins in registration order, so registering a
/// custom factory before the stock ones lets it shadow them, while appending
/// after leaves the stock behavior intact.
#[derive(Default)]
pub struct ClientRegistry {
    factories: Vec<Box<dyn ClientFactory>>,
}

impl ClientRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a factory. Earlier registrations take precedence.
    pub fn add(&mut self, factory: impl ClientFactory + 'static) -> &mut Self {
        self.factories.push(Box::new(factory));
        self
    }

    /// The first registered factory that claims the target.
    pub fn get_factory(&self, target: &ConnectTarget) -> Option<&dyn ClientFactory> {
        self.factories.iter().map(AsRef::as_ref).find(|factory| factory.can_handle(target))
    }

    /// Resolves the target to a factory and connects.
    pub async fn connect_client(
        &self,
        target: &ConnectTarget,
    ) -> DbResult<Arc<dyn StorageClient>> {
        let factory = self
            .get_factory(target)
            .ok_or_else(|| DbError::Connection("Unrecognized DB connection url.".into()))?;
        debug!(?target, "connecting storage client");
        factory.connect(target).await
    }

    /// Connects and wraps the client in a fresh [`Database`] handle.
    pub async fn connect(&self, target: &ConnectTarget) -> DbResult<Database> {
        Ok(Database::new(self.connect_client(target).await?))
    }
}
