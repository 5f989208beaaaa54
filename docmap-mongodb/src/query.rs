//! Query translation from docmap clauses to MongoDB filter syntax.
//!
//! The networked store speaks the same dialect the query model was designed
//! around, so translation is a direct walk: every clause becomes an operator
//! document under its field path, and multiple clauses on one path merge
//! into a single operator block.

use bson::oid::ObjectId;
use bson::{doc, Bson, Document};

use docmap_core::error::DbError;
use docmap_core::query::{Cond, QueryVisitor};

/// Converts a 24-hex-character string into an object id. Ids crossing the
/// engine as strings (canonical form) must reach the wire as object ids.
pub(crate) fn cast_id(value: &Bson) -> Bson {
    match value {
        Bson::String(s) => match ObjectId::parse_str(s) {
            Ok(oid) => Bson::ObjectId(oid),
            Err(_) => value.clone(),
        },
        other => other.clone(),
    }
}

/// Translates docmap queries into MongoDB filter documents.
#[derive(Default)]
pub(crate) struct MongoQueryTranslator {
    filter: Document,
}

impl MongoQueryTranslator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DbError;

    fn visit_clause(&mut self, path: &str, cond: &Cond) -> Result<(), Self::Error> {
        let is_id = path == "_id";
        let value = |v: &Bson| if is_id { cast_id(v) } else { v.clone() };
        let values = |vs: &[Bson]| -> Vec<Bson> { vs.iter().map(&value).collect() };
        let ops = match cond {
            Cond::Eq(v) => doc! { "$eq": value(v) },
            Cond::Ne(v) => doc! { "$ne": value(v) },
            Cond::Gt(v) => doc! { "$gt": value(v) },
            Cond::Gte(v) => doc! { "$gte": value(v) },
            Cond::Lt(v) => doc! { "$lt": value(v) },
            Cond::Lte(v) => doc! { "$lte": value(v) },
            Cond::In(vs) => doc! { "$in": values(vs) },
            Cond::Nin(vs) => doc! { "$nin": values(vs) },
            Cond::Exists(want) => doc! { "$exists": *want },
        };
        match self.filter.get_document_mut(path) {
            Ok(existing) => existing.extend(ops),
            Err(_) => {
                self.filter.insert(path, ops);
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Self::Output, Self::Error> {
        Ok(self.filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmap_core::query::{Filter, Query};

    fn translate(query: &Query) -> Document {
        MongoQueryTranslator::new().visit_query(query).unwrap()
    }

    #[test]
    fn clauses_become_operator_documents() {
        let query = Query::builder()
            .clause(Filter::eq("name", "Alice"))
            .clause(Filter::any_of("tags", [Bson::from("a"), Bson::from("b")]))
            .build();
        assert_eq!(
            translate(&query),
            doc! {
                "name": { "$eq": "Alice" },
                "tags": { "$in": ["a", "b"] },
            }
        );
    }

    #[test]
    fn clauses_on_one_path_merge() {
        let query = Query::builder()
            .clause(Filter::gt("age", 18))
            .clause(Filter::lte("age", 65))
            .build();
        assert_eq!(translate(&query), doc! { "age": { "$gt": 18, "$lte": 65 } });
    }

    #[test]
    fn hex_string_ids_become_object_ids() {
        let hex = "0123456789abcdef01234567";
        let query = Query::by_id(hex);
        let filter = translate(&query);
        let id = filter.get_document("_id").unwrap().get("$eq").unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        // Non-hex strings pass through untouched.
        let query = Query::by_id("not-an-object-id");
        let filter = translate(&query);
        let id = filter.get_document("_id").unwrap().get("$eq").unwrap();
        assert_eq!(id, &Bson::String("not-an-object-id".into()));
    }

    #[test]
    fn empty_query_translates_to_empty_filter() {
        assert_eq!(translate(&Query::new()), doc! {});
    }
}
