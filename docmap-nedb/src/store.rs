//! Embedded file-backed storage client.
//!
//! Records are BSON wire documents serialized into a `sled` keyspace, one
//! tree per collection, keyed by a generated 16-character alphanumeric id.
//! `nedb://memory` opens a temporary database that vanishes on drop; any
//! other `nedb://` url is treated as a directory path.
//!
//! Queries scan the collection and filter in process. For the small to
//! medium datasets an embedded store serves, a scan is acceptable; larger
//! workloads belong on the networked backend.

use std::collections::HashMap;
use std::fmt::Display;

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use docmap_core::client::{FindOptions, IndexOptions, NativeIdKind, StorageClient, UpdateOptions};
use docmap_core::error::{DbError, DbResult};
use docmap_core::query::{parse_sort, Query};

use crate::evaluator::{sort_documents, ClauseMatcher};

/// Url scheme the embedded store answers to.
pub const SCHEME: &str = "nedb://";
/// Url marker for a non-persistent database.
pub const MEMORY_MARKER: &str = "memory";

const ID_LEN: usize = 16;

fn backend_err(err: impl Display) -> DbError {
    DbError::Backend(err.to_string())
}

fn generate_id() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(ID_LEN).map(char::from).collect()
}

fn is_id_shaped(value: &str) -> bool {
    value.len() == ID_LEN && value.chars().all(|c| c.is_ascii_alphanumeric())
}

fn encode(record: &Document) -> DbResult<Vec<u8>> {
    bson::serialize_to_vec(record).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> DbResult<Document> {
    bson::deserialize_from_slice(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

/// Embedded document store over a `sled` database.
#[derive(Debug)]
pub struct NeDbStore {
    db: sled::Db,
    // Opened trees are cached so repeated collection access skips sled's
    // tree bookkeeping.
    trees: RwLock<HashMap<String, sled::Tree>>,
}

impl NeDbStore {
    /// Opens the database addressed by a `nedb://` url.
    pub fn open(url: &str) -> DbResult<Self> {
        let target = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| DbError::Connection(format!("not an embedded-store url: {url}")))?;
        let db = if target == MEMORY_MARKER {
            debug!("opening temporary embedded store");
            sled::Config::new()
                .temporary(true)
                .open()
                .map_err(|e| DbError::Connection(e.to_string()))?
        } else {
            debug!(path = target, "opening embedded store");
            sled::open(target).map_err(|e| DbError::Connection(e.to_string()))?
        };
        Ok(NeDbStore { db, trees: RwLock::new(HashMap::new()) })
    }

    async fn tree(&self, collection: &str) -> DbResult<sled::Tree> {
        {
            let trees = self.trees.read().await;
            if let Some(tree) = trees.get(collection) {
                return Ok(tree.clone());
            }
        }
        let mut trees = self.trees.write().await;
        if let Some(tree) = trees.get(collection) {
            return Ok(tree.clone());
        }
        let tree = self.db.open_tree(collection).map_err(backend_err)?;
        trees.insert(collection.to_owned(), tree.clone());
        Ok(tree)
    }

    async fn scan(&self, collection: &str, query: &Query) -> DbResult<Vec<Document>> {
        let tree = self.tree(collection).await?;
        let mut found = Vec::new();
        for entry in tree.iter() {
            let (_, bytes) = entry.map_err(backend_err)?;
            let record = decode(&bytes)?;
            if ClauseMatcher::matches(&record, query) {
                found.push(record);
            }
        }
        Ok(found)
    }

    fn id_key(id: &Bson) -> DbResult<String> {
        match id {
            Bson::String(s) => Ok(s.clone()),
            other => Err(DbError::Backend(format!(
                "embedded store ids are strings, got {other}"
            ))),
        }
    }

    fn write_record(
        tree: &sled::Tree,
        key: &str,
        mut record: Document,
    ) -> DbResult<()> {
        record.insert("_id", Bson::String(key.to_owned()));
        tree.insert(key, encode(&record)?).map_err(backend_err)?;
        Ok(())
    }

    fn fresh_key(tree: &sled::Tree) -> DbResult<String> {
        // Collisions over 62^16 keys are vanishingly rare, but the loop
        // keeps insert semantics exact.
        loop {
            let key = generate_id();
            if !tree.contains_key(&key).map_err(backend_err)? {
                return Ok(key);
            }
        }
    }
}

#[async_trait]
impl StorageClient for NeDbStore {
    async fn save(
        &self,
        collection: &str,
        id: Option<&Bson>,
        values: Document,
    ) -> DbResult<Bson> {
        let tree = self.tree(collection).await?;
        let key = match id {
            Some(id) => Self::id_key(id)?,
            None => Self::fresh_key(&tree)?,
        };
        Self::write_record(&tree, &key, values)?;
        Ok(Bson::String(key))
    }

    async fn delete(&self, collection: &str, id: &Bson) -> DbResult<u64> {
        let tree = self.tree(collection).await?;
        let removed = tree.remove(Self::id_key(id)?).map_err(backend_err)?;
        Ok(u64::from(removed.is_some()))
    }

    async fn delete_one(&self, collection: &str, query: &Query) -> DbResult<u64> {
        match self.find_one(collection, query).await? {
            Some(record) => match record.get("_id") {
                Some(id) => self.delete(collection, &id.clone()).await,
                None => Ok(0),
            },
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &str, query: &Query) -> DbResult<u64> {
        let tree = self.tree(collection).await?;
        let matches = self.scan(collection, query).await?;
        let mut removed = 0;
        for record in &matches {
            if let Some(Bson::String(key)) = record.get("_id") {
                if tree.remove(key).map_err(backend_err)?.is_some() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn find_one(&self, collection: &str, query: &Query) -> DbResult<Option<Document>> {
        let tree = self.tree(collection).await?;
        for entry in tree.iter() {
            let (_, bytes) = entry.map_err(backend_err)?;
            let record = decode(&bytes)?;
            if ClauseMatcher::matches(&record, query) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn find(
        &self,
        collection: &str,
        query: &Query,
        options: &FindOptions,
    ) -> DbResult<Vec<Document>> {
        let mut found = self.scan(collection, query).await?;
        if !options.sort.is_empty() {
            sort_documents(&mut found, &parse_sort(&options.sort));
        }
        if let Some(skip) = options.skip {
            let skip = (skip as usize).min(found.len());
            found.drain(..skip);
        }
        if let Some(limit) = options.limit {
            found.truncate(limit as usize);
        }
        Ok(found)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        query: &Query,
        values: Document,
        options: &UpdateOptions,
    ) -> DbResult<Option<Document>> {
        let tree = self.tree(collection).await?;
        match self.find_one(collection, query).await? {
            Some(mut current) => {
                let key = match current.get("_id") {
                    Some(Bson::String(key)) => key.clone(),
                    _ => return Err(DbError::Backend("stored record has no id".into())),
                };
                for (field, value) in values {
                    current.insert(field, value);
                }
                Self::write_record(&tree, &key, current.clone())?;
                current.insert("_id", Bson::String(key));
                Ok(Some(current))
            }
            None if options.upsert => {
                let key = Self::fresh_key(&tree)?;
                let mut record = values;
                Self::write_record(&tree, &key, record.clone())?;
                record.insert("_id", Bson::String(key));
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        query: &Query,
    ) -> DbResult<Option<Document>> {
        let tree = self.tree(collection).await?;
        match self.find_one(collection, query).await? {
            Some(record) => {
                if let Some(Bson::String(key)) = record.get("_id") {
                    tree.remove(key).map_err(backend_err)?;
                }
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn count(&self, collection: &str, query: &Query) -> DbResult<u64> {
        Ok(self.scan(collection, query).await?.len() as u64)
    }

    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        _options: &IndexOptions,
    ) -> DbResult<()> {
        // No secondary indexes in the embedded store; queries always scan.
        debug!(collection, field, "index request ignored by embedded store");
        Ok(())
    }

    async fn clear_collection(&self, collection: &str) -> DbResult<()> {
        let tree = self.tree(collection).await?;
        tree.clear().map_err(backend_err)?;
        Ok(())
    }

    async fn drop_database(&self) -> DbResult<()> {
        let mut trees = self.trees.write().await;
        trees.clear();
        for name in self.db.tree_names() {
            if name == self.db.name() {
                continue;
            }
            self.db.drop_tree(&name).map_err(backend_err)?;
        }
        Ok(())
    }

    async fn close(&self) -> DbResult<()> {
        self.db.flush_async().await.map_err(backend_err)?;
        Ok(())
    }

    fn is_native_id(&self, value: &Bson) -> bool {
        matches!(value, Bson::String(s) if is_id_shaped(s))
    }

    fn native_id_kind(&self) -> NativeIdKind {
        NativeIdKind::String
    }

    fn to_canonical_id(&self, id: &Bson) -> String {
        match id {
            Bson::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_sixteen_alphanumerics() {
        for _ in 0..32 {
            let id = generate_id();
            assert!(is_id_shaped(&id), "bad id: {id}");
        }
    }

    #[test]
    fn id_shape_check() {
        assert!(is_id_shaped("abcDEF1234567890"));
        assert!(!is_id_shaped("short"));
        assert!(!is_id_shaped("abcDEF1234567-90"));
        assert!(!is_id_shaped("abcDEF12345678901"));
    }
}
