//! Cloud document-database client.
//!
//! Executes [`QueryPlan`](crate::query::QueryPlan)s produced by the planner:
//! point lookups and filter chains run concurrently, their results are
//! unioned, and the union is deduplicated by id. Sort, skip, and limit are
//! pushed down only when the plan is a single structured query; fanned-out
//! plans reject them rather than return misordered pages.

use std::collections::HashSet;

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::future::try_join_all;
use tracing::debug;

use docmap_core::client::{FindOptions, IndexOptions, NativeIdKind, StorageClient, UpdateOptions};
use docmap_core::error::{DbError, DbResult};
use docmap_core::query::{Query, QueryVisitor};

use crate::query::{FirestorePlanner, QueryPlan};
use crate::transport::{FirestoreConfig, FirestoreTransport, Transport};

/// Cloud storage client over the REST transport.
#[derive(Debug)]
pub struct FirestoreStore<T = FirestoreTransport> {
    transport: T,
}

impl FirestoreStore {
    /// Builds a client from a structured options document.
    pub fn from_options(options: &Document) -> DbResult<Self> {
        let config = FirestoreConfig::from_options(options)?;
        Ok(FirestoreStore { transport: FirestoreTransport::new(config) })
    }
}

impl<T: Transport> FirestoreStore<T> {
    fn plan(query: &Query) -> DbResult<QueryPlan> {
        FirestorePlanner::new().visit_query(query)
    }

    fn id_str(id: &Bson) -> DbResult<&str> {
        match id {
            Bson::String(s) => Ok(s),
            other => Err(DbError::Backend(format!("cloud store ids are strings, got {other}"))),
        }
    }

    /// Runs every lookup and chain of a plan and unions the results,
    /// deduplicated by id.
    async fn execute(
        &self,
        collection: &str,
        plan: &QueryPlan,
        options: &FindOptions,
    ) -> DbResult<Vec<Document>> {
        if plan.is_fan_out()
            && (!options.sort.is_empty() || options.skip.is_some() || options.limit.is_some())
        {
            return Err(DbError::NotSupported(
                "sort, skip, and limit cannot combine with a fanned-out cloud query".into(),
            ));
        }

        let mut records = Vec::new();
        if let Some(chain) = plan.single_chain() {
            records = self
                .transport
                .run_query(collection, chain, &options.sort, options.skip, options.limit)
                .await?;
        } else {
            debug!(
                lookups = plan.lookups.len(),
                chains = plan.chains.len(),
                "executing fanned-out cloud query"
            );
            let lookups = plan.lookups.iter().map(|id| async move {
                self.transport.get_document(collection, Self::id_str(id)?).await
            });
            let chains = plan.chains.iter().map(|chain| {
                self.transport.run_query(collection, chain, &[], None, None)
            });
            let (found, queried) =
                futures::try_join!(try_join_all(lookups), try_join_all(chains))?;
            records.extend(found.into_iter().flatten());
            records.extend(queried.into_iter().flatten());
        }

        // Chains may overlap; keep the first occurrence of each id.
        let mut seen = HashSet::new();
        records.retain(|record| match record.get_str("_id") {
            Ok(id) => seen.insert(id.to_owned()),
            Err(_) => true,
        });
        Ok(records)
    }
}

#[async_trait]
impl<T: Transport> StorageClient for FirestoreStore<T> {
    async fn save(
        &self,
        collection: &str,
        id: Option<&Bson>,
        mut values: Document,
    ) -> DbResult<Bson> {
        values.remove("_id");
        match id {
            None => {
                let id = self.transport.create_document(collection, &values).await?;
                Ok(Bson::String(id))
            }
            Some(id) => {
                self.transport.set_document(collection, Self::id_str(id)?, &values).await?;
                Ok(id.clone())
            }
        }
    }

    async fn delete(&self, collection: &str, id: &Bson) -> DbResult<u64> {
        let id = Self::id_str(id)?;
        // The REST delete is idempotent, so existence decides the count.
        match self.transport.get_document(collection, id).await? {
            Some(_) => {
                self.transport.delete_document(collection, id).await?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_one(&self, collection: &str, query: &Query) -> DbResult<u64> {
        // A match without an id cannot be addressed, so it counts as zero.
        match self.find_one(collection, query).await? {
            Some(record) => match record.get_str("_id") {
                Ok(id) => {
                    self.transport.delete_document(collection, id).await?;
                    Ok(1)
                }
                Err(_) => Ok(0),
            },
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &str, query: &Query) -> DbResult<u64> {
        let plan = Self::plan(query)?;
        let records = self.execute(collection, &plan, &FindOptions::default()).await?;
        let deletions = records.iter().filter_map(|record| {
            record
                .get_str("_id")
                .ok()
                .map(|id| self.transport.delete_document(collection, id))
        });
        let deleted = try_join_all(deletions).await?;
        Ok(deleted.len() as u64)
    }

    async fn find_one(&self, collection: &str, query: &Query) -> DbResult<Option<Document>> {
        let plan = Self::plan(query)?;
        let options = match plan.single_chain() {
            Some(_) => FindOptions::default().limit(1),
            None => FindOptions::default(),
        };
        let mut records = self.execute(collection, &plan, &options).await?;
        Ok(if records.is_empty() { None } else { Some(records.remove(0)) })
    }

    async fn find(
        &self,
        collection: &str,
        query: &Query,
        options: &FindOptions,
    ) -> DbResult<Vec<Document>> {
        let plan = Self::plan(query)?;
        self.execute(collection, &plan, options).await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        query: &Query,
        values: Document,
        options: &UpdateOptions,
    ) -> DbResult<Option<Document>> {
        match self.find_one(collection, query).await? {
            Some(mut current) => {
                let id = current
                    .get_str("_id")
                    .map_err(|_| DbError::Backend("stored record has no id".into()))?
                    .to_owned();
                for (field, value) in values {
                    current.insert(field, value);
                }
                current.remove("_id");
                self.transport.set_document(collection, &id, &current).await?;
                current.insert("_id", Bson::String(id));
                Ok(Some(current))
            }
            None if options.upsert => {
                let mut record = values;
                record.remove("_id");
                let id = self.transport.create_document(collection, &record).await?;
                record.insert("_id", Bson::String(id));
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
        match self.find_one(collection, query).await? {
            Some(record) => {
                if let Ok(id) = record.get_str("_id") {
                    self.transport.delete_document(collection, id).await?;
                }
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn count(&self, collection: &str, query: &Query) -> DbResult<u64> {
        let plan = Self::plan(query)?;
        let records = self.execute(collection, &plan, &FindOptions::default()).await?;
        Ok(records.len() as u64)
    }

    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        _options: &IndexOptions,
    ) -> DbResult<()> {
        // Cloud store indexes are provisioned out of band.
        debug!(collection, field, "index request ignored by cloud store");
        Ok(())
    }

    async fn clear_collection(&self, collection: &str) -> DbResult<()> {
        self.delete_many(collection, &Query::new()).await?;
        Ok(())
    }

    async fn drop_database(&self) -> DbResult<()> {
        Err(DbError::NotSupported(
            "cloud databases cannot be dropped through this client".into(),
        ))
    }

    async fn close(&self) -> DbResult<()> {
        // The REST transport holds no connection state.
        Ok(())
    }

    fn is_native_id(&self, value: &Bson) -> bool {
        matches!(value, Bson::String(s)
            if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'))
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
    use std::collections::HashMap;
    use std::sync::Mutex;

    use bson::doc;
    use docmap_core::query::Filter;

    use crate::query::WhereFilter;

    /// Transport with pre-programmed responses, keyed by lookup id and by
    /// filter chain.
    #[derive(Debug, Default)]
    struct CannedTransport {
        lookups: HashMap<String, Document>,
        chains: HashMap<String, Vec<Document>>,
        deleted: Mutex<Vec<String>>,
    }

    fn chain_key(chain: &[WhereFilter]) -> String {
        chain.iter().map(|filter| format!("{}={};", filter.path, filter.value)).collect()
    }

    fn key(path: &str, value: impl Into<Bson>) -> String {
        format!("{path}={};", value.into())
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn get_document(&self, _collection: &str, id: &str) -> DbResult<Option<Document>> {
            Ok(self.lookups.get(id).cloned())
        }

        async fn create_document(
            &self,
            _collection: &str,
            _values: &Document,
        ) -> DbResult<String> {
            Ok("fresh".to_owned())
        }

        async fn set_document(
            &self,
            _collection: &str,
            _id: &str,
            _values: &Document,
        ) -> DbResult<()> {
            Ok(())
        }

        async fn delete_document(&self, _collection: &str, id: &str) -> DbResult<()> {
            self.deleted.lock().unwrap().push(id.to_owned());
            Ok(())
        }

        async fn run_query(
            &self,
            _collection: &str,
            chain: &[WhereFilter],
            _sort: &[String],
            _skip: Option<u64>,
            limit: Option<u64>,
        ) -> DbResult<Vec<Document>> {
            let mut records = self.chains.get(&chain_key(chain)).cloned().unwrap_or_default();
            if let Some(limit) = limit {
                records.truncate(limit as usize);
            }
            Ok(records)
        }
    }

    fn store(transport: CannedTransport) -> FirestoreStore<CannedTransport> {
        FirestoreStore { transport }
    }

    #[tokio::test]
    async fn membership_fan_out_unions_chains_and_dedups_by_id() {
        let shared = doc! { "_id": "shared", "size": 1 };
        let mut transport = CannedTransport::default();
        transport
            .chains
            .insert(key("size", 1), vec![doc! { "_id": "a", "size": 1 }, shared.clone()]);
        transport
            .chains
            .insert(key("size", 2), vec![shared, doc! { "_id": "b", "size": 2 }]);
        let store = store(transport);

        let query = Query::builder()
            .clause(Filter::any_of("size", [Bson::from(1), Bson::from(2)]))
            .build();
        let found = store.find("widgets", &query, &FindOptions::default()).await.unwrap();
        // The record matching both chains appears once, at its first position.
        let ids: Vec<&str> = found.iter().map(|record| record.get_str("_id").unwrap()).collect();
        assert_eq!(ids, ["a", "shared", "b"]);
        assert_eq!(store.count("widgets", &query).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn point_lookups_union_with_chains_without_duplicates() {
        let alice = doc! { "_id": "alice", "size": 1 };
        let mut transport = CannedTransport::default();
        transport.lookups.insert("alice".to_owned(), alice.clone());
        transport
            .chains
            .insert(key("size", 1), vec![alice, doc! { "_id": "bob", "size": 1 }]);
        let store = store(transport);

        let query = Query::from_document(&doc! {
            "_id": "alice",
            "size": { "$in": [1] },
        })
        .unwrap();
        assert_eq!(store.count("widgets", &query).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn fanned_out_plans_reject_sort_skip_and_limit() {
        let store = store(CannedTransport::default());
        let query = Query::builder()
            .clause(Filter::any_of("size", [Bson::from(1), Bson::from(2)]))
            .build();
        let err = store
            .find("widgets", &query, &FindOptions::default().sort(["-size"]))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotSupported(_)));
    }

    #[tokio::test]
    async fn find_one_pushes_a_limit_onto_single_chains() {
        let mut transport = CannedTransport::default();
        transport.chains.insert(
            key("name", "Alice"),
            vec![doc! { "_id": "first", "name": "Alice" }, doc! { "_id": "second", "name": "Alice" }],
        );
        let store = store(transport);

        let query = Query::builder().clause(Filter::eq("name", "Alice")).build();
        let found = store.find_one("widgets", &query).await.unwrap().unwrap();
        assert_eq!(found.get_str("_id").unwrap(), "first");
    }

    #[tokio::test]
    async fn delete_one_deletes_and_counts_the_match() {
        let mut transport = CannedTransport::default();
        transport
            .chains
            .insert(key("name", "Alice"), vec![doc! { "_id": "alice", "name": "Alice" }]);
        let store = store(transport);

        let query = Query::builder().clause(Filter::eq("name", "Alice")).build();
        assert_eq!(store.delete_one("widgets", &query).await.unwrap(), 1);
        assert_eq!(*store.transport.deleted.lock().unwrap(), vec!["alice".to_owned()]);
    }

    #[tokio::test]
    async fn delete_one_counts_zero_when_the_match_has_no_id() {
        let mut transport = CannedTransport::default();
        transport.chains.insert(key("name", "Ghost"), vec![doc! { "name": "Ghost" }]);
        let store = store(transport);

        let query = Query::builder().clause(Filter::eq("name", "Ghost")).build();
        assert_eq!(store.delete_one("widgets", &query).await.unwrap(), 0);
        assert!(store.transport.deleted.lock().unwrap().is_empty());
    }
}
