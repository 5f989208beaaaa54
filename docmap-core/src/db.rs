//! The database handle.

use std::sync::Arc;

use crate::client::StorageClient;
use crate::collection::ModelCollection;
use crate::error::DbResult;
use crate::model::{Model, ModelRegistry};

/// An owned handle to one connected store plus the models registered on it.
///
/// There is no process-global client: every document operation takes the
/// handle it should run against, so multiple connections coexist and tests
/// stay isolated. Cloning is cheap and shares the underlying client and
/// model registry.
#[derive(Debug, Clone)]
pub struct Database {
    client: Arc<dyn StorageClient>,
    models: Arc<ModelRegistry>,
}

impl Database {
    /// Wraps a connected client with an empty model registry.
    pub fn new(client: Arc<dyn StorageClient>) -> Self {
        Database { client, models: Arc::new(ModelRegistry::new()) }
    }

    /// The underlying storage client.
    pub fn client(&self) -> &Arc<dyn StorageClient> {
        &self.client
    }

    /// The model registry.
    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Registers a model on this handle.
    pub fn register_model(&self, model: Arc<Model>) -> DbResult<()> {
        self.models.register(model)
    }

    /// Looks up a registered model by name.
    pub fn model(&self, name: &str) -> DbResult<Arc<Model>> {
        self.models.require(name)
    }

    /// A collection-level operations handle for a registered model.
    pub fn collection(&self, model: &str) -> DbResult<ModelCollection<'_>> {
        Ok(ModelCollection::new(self, self.models.require(model)?))
    }

    /// Removes every collection in the backing database.
    pub async fn drop_database(&self) -> DbResult<()> {
        self.client.drop_database().await
    }

    /// Releases the underlying connection.
    pub async fn close(&self) -> DbResult<()> {
        self.client.close().await
    }
}
