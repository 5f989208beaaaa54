//! Engine lifecycle tests over an instrumented in-memory client.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use docmap_core::client::{FindOptions, IndexOptions, NativeIdKind, StorageClient, UpdateOptions};
use docmap_core::query::{Clause, Cond, Query};
use docmap_core::schema::FieldSpec;
use docmap_core::{
    Database, DbError, DbResult, Doc, FieldType, FieldValue, HookPhase, Model, Populate, QueryOpts,
    RefValue, ScalarKind, Schema,
};
use futures::FutureExt;
use uuid::Uuid;

/// In-memory client that counts writes, so tests can assert that failed
/// lifecycles never reach the backend.
#[derive(Debug, Default)]
struct CountingClient {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    writes: AtomicUsize,
}

impl CountingClient {
    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn matches(clauses: &[Clause], doc: &Document) -> bool {
        clauses.iter().all(|clause| {
            let value = doc.get(&clause.path);
            match &clause.cond {
                Cond::Eq(expected) => value == Some(expected),
                Cond::In(expected) => value.is_some_and(|v| expected.contains(v)),
                _ => false,
            }
        })
    }
}

#[async_trait]
impl StorageClient for CountingClient {
    async fn save(
        &self,
        collection: &str,
        id: Option<&Bson>,
        mut values: Document,
    ) -> DbResult<Bson> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_owned()).or_default();
        match id {
            None => {
                let id = Bson::String(Uuid::new_v4().simple().to_string());
                values.insert("_id", id.clone());
                docs.push(values);
                Ok(id)
            }
            Some(id) => {
                values.insert("_id", id.clone());
                match docs.iter_mut().find(|d| d.get("_id") == Some(id)) {
                    Some(slot) => *slot = values,
                    None => docs.push(values),
                }
                Ok(id.clone())
            }
        }
    }

    async fn delete(&self, collection: &str, id: &Bson) -> DbResult<u64> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_owned()).or_default();
        let before = docs.len();
        docs.retain(|d| d.get("_id") != Some(id));
        Ok((before - docs.len()) as u64)
    }

    async fn delete_one(&self, collection: &str, query: &Query) -> DbResult<u64> {
        let target = self.find_one(collection, query).await?;
        match target.and_then(|d| d.get("_id").cloned()) {
            Some(id) => self.delete(collection, &id).await,
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &str, query: &Query) -> DbResult<u64> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_owned()).or_default();
        let before = docs.len();
        docs.retain(|d| !Self::matches(query.clauses(), d));
        Ok((before - docs.len()) as u64)
    }

    async fn find_one(&self, collection: &str, query: &Query) -> DbResult<Option<Document>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| Self::matches(query.clauses(), d)))
            .cloned())
    }

    async fn find(
        &self,
        collection: &str,
        query: &Query,
        options: &FindOptions,
    ) -> DbResult<Vec<Document>> {
        let collections = self.collections.lock().unwrap();
        let mut found: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter().filter(|d| Self::matches(query.clauses(), d)).cloned().collect()
            })
            .unwrap_or_default();
        if let Some(skip) = options.skip {
            found.drain(..found.len().min(skip as usize));
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
        let existing = self.find_one(collection, query).await?;
        match existing {
            Some(mut current) => {
                let id = current.get("_id").cloned().ok_or_else(|| {
                    DbError::Backend("stored document has no _id".into())
                })?;
                for (k, v) in values {
                    current.insert(k, v);
                }
                current.remove("_id");
                self.save(collection, Some(&id), current.clone()).await?;
                current.insert("_id", id);
                Ok(Some(current))
            }
            None if options.upsert => {
                let id = self.save(collection, None, values).await?;
                self.find_one(collection, &Query::by_id(id)).await
            }
            None => Ok(None),
        }
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        query: &Query,
    ) -> DbResult<Option<Document>> {
        let target = self.find_one(collection, query).await?;
        if let Some(id) = target.as_ref().and_then(|d| d.get("_id")) {
            self.delete(collection, &id.clone()).await?;
        }
        Ok(target)
    }

    async fn count(&self, collection: &str, query: &Query) -> DbResult<u64> {
        Ok(self.find(collection, query, &FindOptions::default()).await?.len() as u64)
    }

    async fn create_index(
        &self,
        _collection: &str,
        _field: &str,
        _options: &IndexOptions,
    ) -> DbResult<()> {
        Ok(())
    }

    async fn clear_collection(&self, collection: &str) -> DbResult<()> {
        self.collections.lock().unwrap().remove(collection);
        Ok(())
    }

    async fn drop_database(&self) -> DbResult<()> {
        self.collections.lock().unwrap().clear();
        Ok(())
    }

    async fn close(&self) -> DbResult<()> {
        Ok(())
    }

    fn is_native_id(&self, value: &Bson) -> bool {
        matches!(value, Bson::String(s) if !s.is_empty())
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

fn test_db() -> (Database, Arc<CountingClient>) {
    let client = Arc::new(CountingClient::default());
    (Database::new(client.clone()), client)
}

fn person_model() -> Arc<Model> {
    let schema = Schema::builder()
        .field("name", FieldSpec::new(FieldType::Scalar(ScalarKind::String)).required())
        .scalar("age", ScalarKind::Number)
        .reference("boss", "person")
        .build()
        .unwrap();
    Model::document("person").collection("people").schema(schema).build()
}

#[tokio::test]
async fn failed_validation_performs_zero_writes() {
    let (db, client) = test_db();
    db.register_model(person_model()).unwrap();
    let mut doc = db.collection("person").unwrap().create().unwrap();
    doc.set("age", 33).unwrap();

    let err = doc.save(&db).await.unwrap_err();
    assert!(matches!(err, DbError::Validation { ref field, .. } if field == "name"));
    assert_eq!(client.writes(), 0);
    assert!(doc.id().is_none());
}

#[tokio::test]
async fn first_save_inserts_and_adopts_id_later_saves_update() {
    let (db, _client) = test_db();
    db.register_model(person_model()).unwrap();
    let people = db.collection("person").unwrap();

    let mut doc = people.create().unwrap();
    doc.set("name", "Alice").unwrap();
    doc.save(&db).await.unwrap();
    let first_id = doc.id().cloned().unwrap();

    doc.set("age", 31).unwrap();
    doc.save(&db).await.unwrap();
    assert_eq!(doc.id().cloned().unwrap(), first_id);

    assert_eq!(people.count(&Query::new()).await.unwrap(), 1);
    let found = people
        .find_by_id(first_id, &QueryOpts::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("age"), Some(&FieldValue::Scalar(Bson::Int64(31))));
}

#[tokio::test]
async fn upsert_with_explicit_id_keeps_the_id() {
    let (_db, client) = test_db();
    let id = Bson::String("fixed-id".into());
    let returned = client
        .save("people", Some(&id), doc! { "name": "Pinned" })
        .await
        .unwrap();
    assert_eq!(returned, id);
    let stored = client.find_one("people", &Query::by_id(id.clone())).await.unwrap().unwrap();
    assert_eq!(stored.get_str("name").unwrap(), "Pinned");
}

#[tokio::test]
async fn cyclic_references_populate_exactly_one_level() {
    let (db, _client) = test_db();
    db.register_model(person_model()).unwrap();
    let people = db.collection("person").unwrap();

    let mut boss = people.create().unwrap();
    boss.set("name", "Boss").unwrap();
    boss.save(&db).await.unwrap();

    let mut worker = people.create().unwrap();
    worker.set("name", "Worker").unwrap();
    worker.set("boss", boss.id().cloned().unwrap()).unwrap();
    worker.save(&db).await.unwrap();

    // Close the cycle: the boss reports to the worker.
    boss.set("boss", worker.id().cloned().unwrap()).unwrap();
    boss.save(&db).await.unwrap();

    let found = people
        .find_by_id(worker.id().cloned().unwrap(), &QueryOpts::default())
        .await
        .unwrap()
        .unwrap();
    let populated_boss = match found.get("boss") {
        Some(FieldValue::Ref(RefValue::Doc(doc))) => doc,
        other => panic!("boss not populated: {other:?}"),
    };
    assert_eq!(
        populated_boss.get("name"),
        Some(&FieldValue::Scalar(Bson::String("Boss".into())))
    );
    // One level only: the inner reference stays an id.
    assert!(matches!(
        populated_boss.get("boss"),
        Some(FieldValue::Ref(RefValue::Id(_)))
    ));
}

#[tokio::test]
async fn missing_reference_resolves_to_null() {
    let (db, _client) = test_db();
    db.register_model(person_model()).unwrap();
    let people = db.collection("person").unwrap();

    let mut doc = people.create().unwrap();
    doc.set("name", "Orphan").unwrap();
    doc.set("boss", Bson::String("gone-gone-gone".into())).unwrap();
    doc.save(&db).await.unwrap();

    let found = people
        .find_by_id(doc.id().cloned().unwrap(), &QueryOpts::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("boss"), Some(&FieldValue::Null));
}

#[tokio::test]
async fn unresolved_array_references_shrink_the_array() {
    let (db, _client) = test_db();
    let schema = Schema::builder()
        .field("name", FieldSpec::new(FieldType::Scalar(ScalarKind::String)).required())
        .field(
            "reports",
            FieldSpec::new(FieldType::array_of(FieldType::reference("employee"))),
        )
        .build()
        .unwrap();
    db.register_model(Model::document("employee").schema(schema).build()).unwrap();
    let employees = db.collection("employee").unwrap();

    let mut real = employees.create().unwrap();
    real.set("name", "Real").unwrap();
    real.save(&db).await.unwrap();

    let mut manager = employees.create().unwrap();
    manager.set("name", "Manager").unwrap();
    manager
        .set(
            "reports",
            vec![
                FieldValue::Ref(RefValue::Id(real.id().cloned().unwrap())),
                FieldValue::Ref(RefValue::Id(Bson::String("long-gone".into()))),
            ],
        )
        .unwrap();
    manager.save(&db).await.unwrap();

    let found = employees
        .find_by_id(manager.id().cloned().unwrap(), &QueryOpts::default())
        .await
        .unwrap()
        .unwrap();
    let reports = found.get("reports").and_then(FieldValue::as_array).unwrap();
    assert_eq!(reports.len(), 1);
    assert!(matches!(&reports[0], FieldValue::Ref(r) if r.is_populated()));
}

#[tokio::test]
async fn populate_none_leaves_references_as_ids() {
    let (db, _client) = test_db();
    db.register_model(person_model()).unwrap();
    let people = db.collection("person").unwrap();

    let mut boss = people.create().unwrap();
    boss.set("name", "Boss").unwrap();
    boss.save(&db).await.unwrap();
    let mut worker = people.create().unwrap();
    worker.set("name", "Worker").unwrap();
    worker.set("boss", boss.id().cloned().unwrap()).unwrap();
    worker.save(&db).await.unwrap();

    let opts = QueryOpts::default().populate(Populate::None);
    let found = people
        .find_by_id(worker.id().cloned().unwrap(), &opts)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(found.get("boss"), Some(FieldValue::Ref(RefValue::Id(_)))));
}

#[tokio::test]
async fn select_projects_fields_but_keeps_id() {
    let (db, _client) = test_db();
    db.register_model(person_model()).unwrap();
    let people = db.collection("person").unwrap();

    let mut doc = people.create().unwrap();
    doc.set("name", "Alice").unwrap();
    doc.set("age", 30).unwrap();
    doc.save(&db).await.unwrap();

    let opts = QueryOpts::default().select(["name"]);
    let found = people
        .find_by_id(doc.id().cloned().unwrap(), &opts)
        .await
        .unwrap()
        .unwrap();
    assert!(found.id().is_some());
    assert_eq!(
        found.get("name"),
        Some(&FieldValue::Scalar(Bson::String("Alice".into())))
    );
    assert_eq!(found.get("age"), Some(&FieldValue::Null));
}

#[tokio::test]
async fn hooks_run_in_registration_order_and_abort_on_failure() {
    let (db, client) = test_db();
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let schema = Schema::builder().scalar("name", ScalarKind::String).build().unwrap();
    let t1 = trace.clone();
    let t2 = trace.clone();
    let model = Model::document("audited")
        .schema(schema)
        .hook(HookPhase::PreSave, move |_doc: &mut Doc| {
            let t1 = t1.clone();
            async move {
                t1.lock().unwrap().push("first");
                Ok(())
            }
            .boxed()
        })
        .hook(HookPhase::PreSave, move |_doc: &mut Doc| {
            let t2 = t2.clone();
            async move {
                t2.lock().unwrap().push("second");
                Err(DbError::Backend("hook refused".into()))
            }
            .boxed()
        })
        .hook(HookPhase::PreSave, |_doc: &mut Doc| {
            async move { panic!("must not run after a failed hook") }.boxed()
        })
        .build();
    db.register_model(model.clone()).unwrap();

    let mut doc = Doc::new(model).unwrap();
    doc.set("name", "x").unwrap();
    let err = doc.save(&db).await.unwrap_err();
    assert!(matches!(err, DbError::Backend(_)));
    assert_eq!(*trace.lock().unwrap(), vec!["first", "second"]);
    assert_eq!(client.writes(), 0);
}

#[tokio::test]
async fn find_one_and_update_upserts_and_returns_post_image() {
    let (db, _client) = test_db();
    db.register_model(person_model()).unwrap();
    let people = db.collection("person").unwrap();

    let opts = docmap_core::UpdateQueryOpts::default().upsert();
    let created = people
        .find_one_and_update(
            &Query::builder().clause(docmap_core::Filter::eq("name", "Ghost")).build(),
            doc! { "name": "Ghost", "age": 1_i64 },
            &opts,
        )
        .await
        .unwrap()
        .unwrap();
    assert!(created.id().is_some());

    let updated = people
        .find_one_and_update(
            &Query::builder().clause(docmap_core::Filter::eq("name", "Ghost")).build(),
            doc! { "age": 2_i64 },
            &docmap_core::UpdateQueryOpts::default(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.get("age"), Some(&FieldValue::Scalar(Bson::Int64(2))));
    assert_eq!(updated.id(), created.id());
}
