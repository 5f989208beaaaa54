//! Networked document-database client over the official MongoDB driver.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document};
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, ReturnDocument};
use mongodb::{Client, Collection as MongoCollection, IndexModel};
use tracing::debug;

use docmap_core::client::{FindOptions, IndexOptions, NativeIdKind, StorageClient, UpdateOptions};
use docmap_core::error::{DbError, DbResult};
use docmap_core::query::{parse_sort, Query, QueryVisitor, SortDirection};

use crate::query::{cast_id, MongoQueryTranslator};

fn backend_err(err: mongodb::error::Error) -> DbError {
    DbError::Backend(err.to_string())
}

/// Networked storage client bound to one database of a MongoDB deployment.
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    /// Connects to the deployment named by a `mongodb://` url. The url must
    /// carry a default database path segment.
    pub async fn connect(url: &str) -> DbResult<Self> {
        let options = ClientOptions::parse(url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        let database = options
            .default_database
            .clone()
            .ok_or_else(|| DbError::Connection(format!("url names no database: {url}")))?;
        debug!(database, "connecting to networked store");
        let client = Client::with_options(options).map_err(|e| DbError::Connection(e.to_string()))?;
        Ok(MongoDbStore { client, database })
    }

    fn collection(&self, name: &str) -> MongoCollection<Document> {
        self.client.database(&self.database).collection(name)
    }

    fn translate(query: &Query) -> DbResult<Document> {
        MongoQueryTranslator::new().visit_query(query)
    }

    fn sort_document(fields: &[String]) -> Document {
        let mut sort = Document::new();
        for key in parse_sort(fields) {
            let direction = match key.direction {
                SortDirection::Asc => 1,
                SortDirection::Desc => -1,
            };
            sort.insert(key.field, direction);
        }
        sort
    }
}

#[async_trait]
impl StorageClient for MongoDbStore {
    async fn save(
        &self,
        collection: &str,
        id: Option<&Bson>,
        mut values: Document,
    ) -> DbResult<Bson> {
        let col = self.collection(collection);
        match id {
            None => {
                values.remove("_id");
                let result = col.insert_one(values).await.map_err(backend_err)?;
                Ok(result.inserted_id)
            }
            Some(id) => {
                let id = cast_id(id);
                col.update_one(doc! { "_id": id.clone() }, doc! { "$set": values })
                    .upsert(true)
                    .await
                    .map_err(backend_err)?;
                Ok(id)
            }
        }
    }

    async fn delete(&self, collection: &str, id: &Bson) -> DbResult<u64> {
        let result = self
            .collection(collection)
            .delete_one(doc! { "_id": cast_id(id) })
            .await
            .map_err(backend_err)?;
        Ok(result.deleted_count)
    }

    async fn delete_one(&self, collection: &str, query: &Query) -> DbResult<u64> {
        let result = self
            .collection(collection)
            .delete_one(Self::translate(query)?)
            .await
            .map_err(backend_err)?;
        Ok(result.deleted_count)
    }

    async fn delete_many(&self, collection: &str, query: &Query) -> DbResult<u64> {
        let result = self
            .collection(collection)
            .delete_many(Self::translate(query)?)
            .await
            .map_err(backend_err)?;
        Ok(result.deleted_count)
    }

    async fn find_one(&self, collection: &str, query: &Query) -> DbResult<Option<Document>> {
        self.collection(collection)
            .find_one(Self::translate(query)?)
            .await
            .map_err(backend_err)
    }

    async fn find(
        &self,
        collection: &str,
        query: &Query,
        options: &FindOptions,
    ) -> DbResult<Vec<Document>> {
        let coll = self.collection(collection);
        let mut action = coll.find(Self::translate(query)?);
        if !options.sort.is_empty() {
            action = action.sort(Self::sort_document(&options.sort));
        }
        if let Some(skip) = options.skip {
            action = action.skip(skip);
        }
        if let Some(limit) = options.limit {
            action = action.limit(limit as i64);
        }
        let cursor = action.await.map_err(backend_err)?;
        cursor.try_collect().await.map_err(backend_err)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        query: &Query,
        values: Document,
        options: &UpdateOptions,
    ) -> DbResult<Option<Document>> {
        // Upserting writes the values only when inserting, matching the
        // "insert the given document on miss" contract.
        let update = if options.upsert {
            doc! { "$setOnInsert": values }
        } else {
            doc! { "$set": values }
        };
        self.collection(collection)
            .find_one_and_update(Self::translate(query)?, update)
            .upsert(options.upsert)
            .return_document(ReturnDocument::After)
            .await
            .map_err(backend_err)
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        query: &Query,
    ) -> DbResult<Option<Document>> {
        self.collection(collection)
            .find_one_and_delete(Self::translate(query)?)
            .await
            .map_err(backend_err)
    }

    async fn count(&self, collection: &str, query: &Query) -> DbResult<u64> {
        self.collection(collection)
            .count_documents(Self::translate(query)?)
            .await
            .map_err(backend_err)
    }

    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        options: &IndexOptions,
    ) -> DbResult<()> {
        let index_options = mongodb::options::IndexOptions::builder()
            .unique(options.unique)
            .sparse(options.sparse)
            .build();
        let model = IndexModel::builder()
            .keys(doc! { field: 1 })
            .options(index_options)
            .build();
        self.collection(collection).create_index(model).await.map_err(backend_err)?;
        Ok(())
    }

    async fn clear_collection(&self, collection: &str) -> DbResult<()> {
        self.collection(collection).drop().await.map_err(backend_err)
    }

    async fn drop_database(&self) -> DbResult<()> {
        self.client.database(&self.database).drop().await.map_err(backend_err)
    }

    async fn close(&self) -> DbResult<()> {
        self.client.clone().shutdown().await;
        Ok(())
    }

    fn is_native_id(&self, value: &Bson) -> bool {
        match value {
            Bson::ObjectId(_) => true,
            Bson::String(s) => ObjectId::parse_str(s).is_ok(),
            _ => false,
        }
    }

    fn native_id_kind(&self) -> NativeIdKind {
        NativeIdKind::ObjectId
    }

    fn to_canonical_id(&self, id: &Bson) -> String {
        match id {
            Bson::ObjectId(oid) => oid.to_hex(),
            Bson::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
