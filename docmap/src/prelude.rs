//! Convenient re-exports of commonly used types from docmap.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmap::prelude::*;
//! ```
//!
//! This provides access to:
//! - Model declaration and schema building
//! - Document handles and hooks
//! - Query construction and filtering
//! - Collection interfaces and population controls
//! - Backend traits, the client registry, and error types

pub use docmap_core::{
    client::{ClientFactory, ConnectTarget, FindOptions, IndexOptions, NativeIdKind, StorageClient, UpdateOptions},
    collection::{ModelCollection, QueryOpts, UpdateQueryOpts},
    db::Database,
    document::Doc,
    error::{DbError, DbResult},
    model::{HookPhase, Model, ModelKind, ModelRegistry},
    populate::Populate,
    query::{Clause, Cond, Filter, Query, QueryBuilder, QueryVisitor, SortDirection, SortKey},
    registry::ClientRegistry,
    schema::{FieldSpec, FieldValidator, Schema, SchemaBuilder},
    types::{FieldType, ScalarKind},
    value::{FieldValue, RefValue},
};
