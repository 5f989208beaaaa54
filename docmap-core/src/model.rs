//! Models, lifecycle hooks, and the model registry.
//!
//! A [`Model`] binds a name, a collection, and a [`Schema`] together with
//! ordered lists of lifecycle hooks. Models are registered by name in a
//! [`ModelRegistry`] owned by the database handle, which is how embedded and
//! reference fields resolve their targets at runtime. The registry holding
//! `Arc<Model>` by name is also what lets reference graphs contain cycles.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;

use crate::document::Doc;
use crate::error::{DbError, DbResult};
use crate::schema::Schema;

/// Whether instances of a model are stored as root documents with their own
/// identity or inlined into a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Root document: lives in a collection, carries a native id.
    Document,
    /// Embedded document: serialized inline, never has an id.
    Embedded,
}

/// Lifecycle phases an async hook may attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    PreValidate,
    PostValidate,
    PreSave,
    PostSave,
    PreDelete,
    PostDelete,
    PostFind,
}

/// An async lifecycle callback. Hooks run sequentially in registration
/// order; the first failure aborts the lifecycle operation.
pub type Hook = Arc<dyn for<'a> Fn(&'a mut Doc) -> BoxFuture<'a, DbResult<()>> + Send + Sync>;

/// A synchronous hook run once at document instantiation, after defaults are
/// applied.
pub type InitHook = Arc<dyn Fn(&mut Doc) -> DbResult<()> + Send + Sync>;

/// Ordered hook lists, one per phase.
#[derive(Default, Clone)]
pub struct Hooks {
    pre_init: Vec<InitHook>,
    phases: HashMap<HookPhase, Vec<Hook>>,
}

impl Hooks {
    fn push(&mut self, phase: HookPhase, hook: Hook) {
        self.phases.entry(phase).or_default().push(hook);
    }

    /// Runs every `pre_init` hook in registration order.
    pub fn run_pre_init(&self, doc: &mut Doc) -> DbResult<()> {
        for hook in &self.pre_init {
            hook(doc)?;
        }
        Ok(())
    }

    /// Runs the phase's hooks in registration order, awaiting each in turn.
    pub async fn run(&self, phase: HookPhase, doc: &mut Doc) -> DbResult<()> {
        if let Some(hooks) = self.phases.get(&phase) {
            for hook in hooks {
                hook(doc).await?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<HookPhase, usize> =
            self.phases.iter().map(|(phase, hooks)| (*phase, hooks.len())).collect();
        f.debug_struct("Hooks")
            .field("pre_init", &self.pre_init.len())
            .field("phases", &counts)
            .finish()
    }
}

/// A named document shape: schema plus lifecycle behavior.
pub struct Model {
    name: String,
    collection: String,
    kind: ModelKind,
    schema: Schema,
    hooks: Hooks,
    indexes_created: AtomicBool,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("kind", &self.kind)
            .field("schema", &self.schema)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl Model {
    /// Starts building a root-document model. The collection name defaults
    /// to the lowercased model name with an `s` suffix.
    pub fn document(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name.into(), ModelKind::Document)
    }

    /// Starts building an embedded-document model.
    pub fn embedded(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name.into(), ModelKind::Embedded)
    }

    /// The model's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether instances are root documents or embedded.
    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// The declared schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The lifecycle hook lists.
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Field names declared `unique`, in schema order.
    pub fn unique_fields(&self) -> impl Iterator<Item = &str> {
        self.schema.iter().filter(|(_, spec)| spec.unique).map(|(name, _)| name)
    }

    /// Flips the one-shot index flag. Returns `true` exactly once per model
    /// instance, so index creation runs at most one time.
    pub(crate) fn mark_indexes_created(&self) -> bool {
        !self.indexes_created.swap(true, Ordering::SeqCst)
    }
}

/// Builder for [`Model`].
pub struct ModelBuilder {
    name: String,
    collection: Option<String>,
    kind: ModelKind,
    schema: Schema,
    hooks: Hooks,
}

impl ModelBuilder {
    fn new(name: String, kind: ModelKind) -> Self {
        ModelBuilder { name, collection: None, kind, schema: Schema::default(), hooks: Hooks::default() }
    }

    /// Overrides the backing collection name.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Sets the schema.
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// Appends an async hook to a phase. Hooks run in the order appended.
    pub fn hook<F>(mut self, phase: HookPhase, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut Doc) -> BoxFuture<'a, DbResult<()>> + Send + Sync + 'static,
    {
        self.hooks.push(phase, Arc::new(hook));
        self
    }

    /// Appends a synchronous instantiation hook.
    pub fn pre_init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Doc) -> DbResult<()> + Send + Sync + 'static,
    {
        self.hooks.pre_init.push(Arc::new(hook));
        self
    }

    /// Finalizes the model.
    pub fn build(self) -> Arc<Model> {
        let collection =
            self.collection.unwrap_or_else(|| format!("{}s", self.name.to_lowercase()));
        Arc::new(Model {
            name: self.name,
            collection,
            kind: self.kind,
            schema: self.schema,
            hooks: self.hooks,
            indexes_created: AtomicBool::new(false),
        })
    }
}

/// Name-indexed set of registered models.
///
/// Shared behind the database handle; lookups clone the `Arc`.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<String, Arc<Model>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model under its name. Re-registering a name is a schema
    /// authoring error.
    pub fn register(&self, model: Arc<Model>) -> DbResult<()> {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        if models.contains_key(model.name()) {
            return Err(DbError::Schema(format!(
                "model '{}' is already registered",
                model.name()
            )));
        }
        models.insert(model.name().to_owned(), model);
        Ok(())
    }

    /// Looks up a model by name.
    pub fn get(&self, name: &str) -> Option<Arc<Model>> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models.get(name).cloned()
    }

    /// Looks up a model, converting absence into a schema error.
    pub fn require(&self, name: &str) -> DbResult<Arc<Model>> {
        self.get(name)
            .ok_or_else(|| DbError::Schema(format!("model '{name}' is not registered")))
    }
}
