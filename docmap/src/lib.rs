//! Main docmap crate providing declarative document mapping over pluggable
//! storage backends.
//!
//! This crate is the primary entry point for users of the docmap framework.
//! It re-exports the core types from the sub-crates and wires the bundled
//! backends into a default [`ClientRegistry`], so one `connect` call yields a
//! working [`Database`] for any supported target.
//!
//! # Quick Start
//!
//! ```ignore
//! use docmap::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> DbResult<()> {
//!     // Connect an in-process store (use a filesystem path for persistence).
//!     let db = docmap::connect("nedb://memory").await?;
//!
//!     // Declare a model: a named schema plus a collection.
//!     let person = Model::document("Person")
//!         .schema(
//!             Schema::builder()
//!                 .field("name", FieldSpec::new(FieldType::Scalar(ScalarKind::String)).required())
//!                 .scalar("age", ScalarKind::Number)
//!                 .build()?,
//!         )
//!         .build();
//!     db.register_model(person)?;
//!
//!     // Create, mutate, save.
//!     let people = db.collection("Person")?;
//!     let mut doc = people.create()?;
//!     doc.set("name", "Alice")?;
//!     doc.set("age", 30)?;
//!     doc.save(&db).await?;
//!
//!     // Query it back.
//!     let found = people
//!         .find_one(&Query::builder().clause(Filter::eq("name", "Alice")).build(),
//!                   &QueryOpts::default())
//!         .await?;
//!     println!("found: {found:?}");
//!
//!     db.close().await
//! }
//! ```
//!
//! # Backends
//!
//! - [`nedb`] - Embedded on-disk or in-memory storage (`nedb://` urls)
//! - [`mongodb`] - Networked document database (requires the `mongodb` feature)
//! - [`firestore`] - Cloud document database addressed by structured options
//!   (requires the `firestore` feature)
//!
//! Connection targets are claimed first-match in the order above; use
//! [`registry`](fn@registry) and [`ClientRegistry::add`] to prepend or append
//! custom backends.

pub mod prelude;

pub use docmap_core::{
    client, collection, db, document, error, model, populate, query, registry as client_registry,
    schema, types, value,
};

pub use docmap_core::{
    ClientFactory, ClientRegistry, ConnectTarget, Database, DbError, DbResult, Doc, FieldSpec,
    FieldType, FieldValue, Filter, FindOptions, HookPhase, Model, ModelCollection, ModelKind,
    Populate, Query, QueryOpts, ScalarKind, Schema, StorageClient, UpdateQueryOpts,
};

// Re-export BSON types for convenience
pub use bson;

/// Embedded storage backend.
pub mod nedb {
    pub use docmap_nedb::{NeDbFactory, NeDbStore, MEMORY_MARKER, SCHEME};
}

/// Networked storage backend.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmap_mongodb::{MongoDbFactory, MongoDbStore};
}

/// Cloud storage backend.
///
/// This module is only available when the `firestore` feature is enabled.
#[cfg(feature = "firestore")]
pub mod firestore {
    pub use docmap_firestore::{FirestoreFactory, FirestoreStore};
}

/// Builds a registry with every bundled backend, in claim order: embedded,
/// networked, cloud.
pub fn registry() -> ClientRegistry {
    let mut registry = ClientRegistry::new();
    registry.add(docmap_nedb::NeDbFactory);
    #[cfg(feature = "mongodb")]
    registry.add(docmap_mongodb::MongoDbFactory);
    #[cfg(feature = "firestore")]
    registry.add(docmap_firestore::FirestoreFactory);
    registry
}

/// Connects a [`Database`] through the default registry.
pub async fn connect(target: impl Into<ConnectTarget>) -> DbResult<Database> {
    registry().connect(&target.into()).await
}
