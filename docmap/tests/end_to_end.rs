//! Full document lifecycle over the embedded backend.

use bson::{doc, Bson};

use docmap::prelude::*;

fn person_model() -> std::sync::Arc<Model> {
    Model::document("Person")
        .schema(
            Schema::builder()
                .field(
                    "name",
                    FieldSpec::new(FieldType::Scalar(ScalarKind::String)).required(),
                )
                .scalar("age", ScalarKind::Number)
                .reference("friend", "Person")
                .build()
                .unwrap(),
        )
        .build()
}

async fn person_db() -> Database {
    let db = docmap::connect("nedb://memory").await.unwrap();
    db.register_model(person_model()).unwrap();
    db
}

#[tokio::test]
async fn save_find_update_delete_round_trip() {
    let db = person_db().await;
    let people = db.collection("Person").unwrap();

    let mut alice = people.create().unwrap();
    alice.set("name", "Alice").unwrap();
    alice.set("age", 30).unwrap();
    alice.save(&db).await.unwrap();
    let id = alice.id().cloned().unwrap();

    let found = people
        .find_by_id(id.clone(), &QueryOpts::default())
        .await
        .unwrap()
        .expect("saved document is findable");
    assert_eq!(found.get("name").unwrap().as_scalar(), Some(&Bson::String("Alice".into())));

    let updated = people
        .find_one_and_update(
            &Query::by_id(id.clone()),
            doc! { "age": 31_i64 },
            &UpdateQueryOpts::default(),
        )
        .await
        .unwrap()
        .expect("update returns the post-image");
    assert_eq!(updated.get("age").unwrap().as_scalar(), Some(&Bson::Int64(31)));

    assert_eq!(people.count(&Query::new()).await.unwrap(), 1);
    assert_eq!(people.delete_many(&Query::new()).await.unwrap(), 1);
    assert_eq!(people.count(&Query::new()).await.unwrap(), 0);

    db.close().await.unwrap();
}

#[tokio::test]
async fn mutual_friends_populate_one_level() {
    let db = person_db().await;
    let people = db.collection("Person").unwrap();

    let mut alice = people.create().unwrap();
    alice.set("name", "Alice").unwrap();
    alice.save(&db).await.unwrap();

    let mut bob = people.create().unwrap();
    bob.set("name", "Bob").unwrap();
    bob.set("friend", alice.id().cloned().unwrap()).unwrap();
    bob.save(&db).await.unwrap();

    alice.set("friend", bob.id().cloned().unwrap()).unwrap();
    alice.save(&db).await.unwrap();

    let found = people
        .find_one(
            &Query::builder().clause(Filter::eq("name", "Alice")).build(),
            &QueryOpts::default(),
        )
        .await
        .unwrap()
        .expect("alice exists");

    // Alice's friend is a full document; the cycle stops there, so the
    // nested friend stays a bare id.
    let friend = found.get("friend").unwrap().as_ref_value().unwrap();
    assert!(friend.is_populated());
    let RefValue::Doc(bob_doc) = friend else { panic!("friend not populated") };
    assert_eq!(bob_doc.get("name").unwrap().as_scalar(), Some(&Bson::String("Bob".into())));
    let inner = bob_doc.get("friend").unwrap().as_ref_value().unwrap();
    assert!(!inner.is_populated());
    assert_eq!(inner.id(), alice.id());

    db.close().await.unwrap();
}

#[tokio::test]
async fn populate_none_and_select_narrow_the_result() {
    let db = person_db().await;
    let people = db.collection("Person").unwrap();

    let mut alice = people.create().unwrap();
    alice.set("name", "Alice").unwrap();
    alice.set("age", 30).unwrap();
    alice.save(&db).await.unwrap();

    let mut bob = people.create().unwrap();
    bob.set("name", "Bob").unwrap();
    bob.set("friend", alice.id().cloned().unwrap()).unwrap();
    bob.save(&db).await.unwrap();

    let found = people
        .find_one(
            &Query::builder().clause(Filter::eq("name", "Bob")).build(),
            &QueryOpts::default().populate(Populate::None).select(["name"]),
        )
        .await
        .unwrap()
        .expect("bob exists");

    assert_eq!(found.id(), bob.id());
    assert_eq!(found.get("name").unwrap().as_scalar(), Some(&Bson::String("Bob".into())));
    // Unselected fields come back null, references stay as ids.
    assert!(found.get("age").unwrap().is_null());
    assert!(found.get("friend").unwrap().is_null());

    db.close().await.unwrap();
}

#[tokio::test]
async fn sorting_and_paging_flow_through_the_facade() {
    let db = person_db().await;
    let people = db.collection("Person").unwrap();

    for (name, age) in [("Alice", 30), ("Bob", 25), ("Cara", 35), ("Dan", 20)] {
        let mut doc = people.create().unwrap();
        doc.set("name", name).unwrap();
        doc.set("age", age).unwrap();
        doc.save(&db).await.unwrap();
    }

    let page = people
        .find(
            &Query::new(),
            &QueryOpts::default().sort(["-age"]).skip(1).limit(2),
        )
        .await
        .unwrap();
    let names: Vec<_> = page
        .iter()
        .map(|doc| doc.get("name").unwrap().as_scalar().cloned().unwrap())
        .collect();
    assert_eq!(names, vec![Bson::String("Alice".into()), Bson::String("Bob".into())]);

    db.close().await.unwrap();
}

#[tokio::test]
async fn required_fields_block_the_save() {
    let db = person_db().await;
    let people = db.collection("Person").unwrap();

    let mut nameless = people.create().unwrap();
    nameless.set("age", 30).unwrap();
    let err = nameless.save(&db).await.unwrap_err();
    assert!(matches!(err, DbError::Validation { ref field, .. } if field == "name"));
    assert_eq!(people.count(&Query::new()).await.unwrap(), 0);

    db.close().await.unwrap();
}
