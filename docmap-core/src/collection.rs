//! Collection-level operations for one model.
//!
//! A [`ModelCollection`] borrows the [`Database`] handle and pairs it with a
//! registered model, exposing the query side of the document lifecycle:
//! lookups, bulk deletes, counting, and index management. Lookup results are
//! rehydrated into live [`Doc`]s, projected, populated, and run through the
//! model's `post_find` hooks before they reach the caller.

use std::sync::Arc;

use bson::{Bson, Document};
use tracing::debug;

use crate::client::{FindOptions, UpdateOptions};
use crate::db::Database;
use crate::document::{self, Doc};
use crate::error::DbResult;
use crate::model::{HookPhase, Model};
use crate::populate::{self, Populate};
use crate::query::Query;
use crate::value::FieldValue;

/// Options applied to collection lookups.
#[derive(Debug, Clone, Default)]
pub struct QueryOpts {
    /// Which reference fields to resolve; defaults to all of them.
    pub populate: Populate,
    /// Field names to retain; empty keeps everything. `_id` is always kept.
    pub select: Vec<String>,
    /// Sort keys in priority order; a leading `-` means descending.
    pub sort: Vec<String>,
    /// Number of matching documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
}

impl QueryOpts {
    pub fn populate(mut self, populate: Populate) -> Self {
        self.populate = populate;
        self
    }

    pub fn select<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn sort<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.sort = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    fn find_options(&self) -> FindOptions {
        FindOptions { sort: self.sort.clone(), skip: self.skip, limit: self.limit }
    }
}

/// Options applied to `find_one_and_update`.
#[derive(Debug, Clone, Default)]
pub struct UpdateQueryOpts {
    /// Insert `values` as a fresh document when nothing matches.
    pub upsert: bool,
    /// Which reference fields to resolve on the returned document.
    pub populate: Populate,
}

impl UpdateQueryOpts {
    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    pub fn populate(mut self, populate: Populate) -> Self {
        self.populate = populate;
        self
    }
}

/// Query-side handle for one model on one database.
pub struct ModelCollection<'a> {
    db: &'a Database,
    model: Arc<Model>,
}

impl<'a> ModelCollection<'a> {
    pub fn new(db: &'a Database, model: Arc<Model>) -> Self {
        ModelCollection { db, model }
    }

    /// The model this handle operates on.
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Instantiates a fresh unsaved document of this model.
    pub fn create(&self) -> DbResult<Doc> {
        Doc::new(self.model.clone())
    }

    /// Finds the first match.
    pub async fn find_one(&self, query: &Query, opts: &QueryOpts) -> DbResult<Option<Doc>> {
        let raw = self.db.client().find_one(self.model.collection(), query).await?;
        match raw {
            Some(data) => Ok(Some(self.rehydrate_one(&data, opts).await?)),
            None => Ok(None),
        }
    }

    /// Finds a document by its native id.
    pub async fn find_by_id(&self, id: impl Into<Bson>, opts: &QueryOpts) -> DbResult<Option<Doc>> {
        self.find_one(&Query::by_id(id), opts).await
    }

    /// Finds every match, honoring sort, skip, and limit.
    pub async fn find(&self, query: &Query, opts: &QueryOpts) -> DbResult<Vec<Doc>> {
        let raw = self
            .db
            .client()
            .find(self.model.collection(), query, &opts.find_options())
            .await?;
        debug!(model = self.model.name(), matched = raw.len(), "find");
        let mut docs = Vec::with_capacity(raw.len());
        for data in &raw {
            let mut doc = Doc::from_data(self.model.clone(), self.db.models(), data)?;
            apply_select(&mut doc, &opts.select)?;
            docs.push(doc);
        }
        populate::populate_docs(self.db, &mut docs, &opts.populate).await?;
        for doc in &mut docs {
            self.model.hooks().run(HookPhase::PostFind, doc).await?;
        }
        Ok(docs)
    }

    /// Applies `values` to the first match and returns the post-image as a
    /// live document. With `upsert`, a miss inserts instead.
    pub async fn find_one_and_update(
        &self,
        query: &Query,
        values: Document,
        opts: &UpdateQueryOpts,
    ) -> DbResult<Option<Doc>> {
        let options = UpdateOptions { upsert: opts.upsert };
        let raw = self
            .db
            .client()
            .find_one_and_update(self.model.collection(), query, values, &options)
            .await?;
        match raw {
            Some(data) => {
                let mut doc = Doc::from_data(self.model.clone(), self.db.models(), &data)?;
                populate::populate_docs(self.db, std::slice::from_mut(&mut doc), &opts.populate)
                    .await?;
                self.model.hooks().run(HookPhase::PostFind, &mut doc).await?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// Deletes the first match and returns the number removed (0 or 1).
    pub async fn find_one_and_delete(&self, query: &Query) -> DbResult<u64> {
        let removed =
            self.db.client().find_one_and_delete(self.model.collection(), query).await?;
        Ok(u64::from(removed.is_some()))
    }

    /// Deletes the first match.
    pub async fn delete_one(&self, query: &Query) -> DbResult<u64> {
        self.db.client().delete_one(self.model.collection(), query).await
    }

    /// Deletes every match.
    pub async fn delete_many(&self, query: &Query) -> DbResult<u64> {
        self.db.client().delete_many(self.model.collection(), query).await
    }

    /// Counts matches.
    pub async fn count(&self, query: &Query) -> DbResult<u64> {
        self.db.client().count(self.model.collection(), query).await
    }

    /// Creates the model's unique indexes, at most once per model instance.
    pub async fn create_indexes(&self) -> DbResult<()> {
        document::ensure_indexes(self.db, &self.model).await
    }

    /// Removes every document in the model's collection.
    pub async fn clear(&self) -> DbResult<()> {
        self.db.client().clear_collection(self.model.collection()).await
    }

    async fn rehydrate_one(&self, data: &Document, opts: &QueryOpts) -> DbResult<Doc> {
        let mut doc = Doc::from_data(self.model.clone(), self.db.models(), data)?;
        apply_select(&mut doc, &opts.select)?;
        populate::populate_docs(self.db, std::slice::from_mut(&mut doc), &opts.populate).await?;
        self.model.hooks().run(HookPhase::PostFind, &mut doc).await?;
        Ok(doc)
    }
}

/// Clears fields outside the selection. The id always survives projection.
fn apply_select(doc: &mut Doc, select: &[String]) -> DbResult<()> {
    if select.is_empty() {
        return Ok(());
    }
    let names: Vec<String> =
        doc.model().schema().iter().map(|(name, _)| name.to_owned()).collect();
    for name in names {
        if !select.iter().any(|s| s == &name) {
            doc.set(&name, FieldValue::Null)?;
        }
    }
    Ok(())
}
