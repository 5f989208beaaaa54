//! A schema-validated document mapping layer over pluggable document stores.
//!
//! This crate is the core of the docmap project and provides:
//!
//! - **Schemas and models** ([`schema`], [`model`]) - Declarative field specifications,
//!   lifecycle hooks, and the model registry
//! - **Live documents** ([`document`], [`value`]) - Instantiation, validation,
//!   canonicalization, and the save/delete lifecycle
//! - **Reference population** ([`populate`]) - Depth-one resolution of cross-document
//!   references, cyclic graphs included
//! - **Query and translation API** ([`query`]) - Conjunction queries with a visitor
//!   seam for backend translation
//! - **Storage contract** ([`client`]) - The uniform async interface backend adapters
//!   implement, plus the factory trait for connection dispatch
//! - **Client registry and database handle** ([`registry`], [`db`]) - Ordered
//!   first-match dispatch over factories and the owned connection handle
//! - **Collections interface** ([`collection`]) - Query-side operations per model
//! - **Error handling** ([`error`]) - Error taxonomy and result alias
//!
//! # Example
//!
//! ```ignore
//! use docmap_core::{Doc, Model, Schema, ScalarKind};
//!
//! let schema = Schema::builder()
//!     .scalar("name", ScalarKind::String)
//!     .reference("boss", "person")
//!     .build()?;
//! let person = Model::document("person").schema(schema).build();
//! db.register_model(person.clone())?;
//!
//! let mut alice = Doc::new(person)?;
//! alice.set("name", "Alice")?;
//! alice.save(&db).await?;
//! # Ok::<(), docmap_core::DbError>(())
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmap_core;

pub mod client;
pub mod collection;
pub mod db;
pub mod document;
pub mod error;
pub mod model;
pub mod populate;
pub mod query;
pub mod registry;
pub mod schema;
pub mod types;
pub mod value;

pub use client::{
    ClientFactory, ConnectTarget, FindOptions, IndexOptions, NativeIdKind, StorageClient,
    UpdateOptions,
};
pub use collection::{ModelCollection, QueryOpts, UpdateQueryOpts};
pub use db::Database;
pub use document::Doc;
pub use error::{DbError, DbResult};
pub use model::{HookPhase, Model, ModelKind, ModelRegistry};
pub use populate::Populate;
pub use query::{Clause, Cond, Filter, Query, QueryVisitor};
pub use registry::ClientRegistry;
pub use schema::{FieldSpec, FieldValidator, Schema};
pub use types::{FieldType, ScalarKind};
pub use value::{FieldValue, RefValue};
