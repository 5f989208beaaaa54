//! In-process query evaluation for the embedded store.
//!
//! The embedded store has no query engine of its own: `find` scans a
//! collection and filters records here. Evaluation normalizes BSON values
//! into [`Comparable`]s so mixed numeric widths compare by value, the way
//! the networked store would compare them.

use std::cmp::Ordering;
use std::collections::HashMap;

use bson::{Bson, Document, datetime::DateTime};

use docmap_core::error::DbError;
use docmap_core::query::{Cond, Query, QueryVisitor, SortDirection, SortKey};

/// Type-erased, comparable representation of BSON values.
///
/// Normalizes numeric types to f64 so `Int32(3)` equals `Int64(3)` equals
/// `Double(3.0)` under comparison.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// String value
    String(&'a str),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => {
                Comparable::Array(arr.iter().map(Comparable::from).collect::<Vec<_>>())
            }
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>(),
            ),
            _ => Comparable::Null, // Other types are not comparable
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a dotted path against a wire document.
pub(crate) fn resolve_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current = doc;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let value = current.get(segment)?;
        if segments.peek().is_none() {
            return Some(value);
        }
        current = value.as_document()?;
    }
    None
}

/// Visitor that evaluates a query's conjunction against one document.
pub(crate) struct ClauseMatcher<'a> {
    document: &'a Document,
    matched: bool,
}

impl<'a> ClauseMatcher<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document, matched: true }
    }

    /// Whether the document satisfies every clause of the query.
    pub fn matches(document: &Document, query: &Query) -> bool {
        ClauseMatcher::new(document).visit_query(query).unwrap_or(false)
    }

    fn eval(&self, path: &str, cond: &Cond) -> bool {
        let value = resolve_path(self.document, path);
        if let Cond::Exists(want) = cond {
            let present = value.is_some_and(|v| !matches!(v, Bson::Null));
            return present == *want;
        }
        let Some(value) = value else {
            return false;
        };
        let left = Comparable::from(value);
        match cond {
            Cond::Eq(expected) => left == Comparable::from(expected),
            Cond::Ne(expected) => left != Comparable::from(expected),
            Cond::Gt(_) | Cond::Gte(_) | Cond::Lt(_) | Cond::Lte(_) => {
                let expected = match cond {
                    Cond::Gt(e) | Cond::Gte(e) | Cond::Lt(e) | Cond::Lte(e) => e,
                    _ => unreachable!(),
                };
                match left.partial_cmp(&Comparable::from(expected)) {
                    Some(ordering) => match cond {
                        Cond::Gt(_) => ordering == Ordering::Greater,
                        Cond::Gte(_) => ordering != Ordering::Less,
                        Cond::Lt(_) => ordering == Ordering::Less,
                        Cond::Lte(_) => ordering != Ordering::Greater,
                        _ => unreachable!(),
                    },
                    None => false,
                }
            }
            Cond::In(expected) => contains_any(&left, expected),
            Cond::Nin(expected) => !contains_any(&left, expected),
            Cond::Exists(_) => unreachable!(),
        }
    }
}

/// Membership test: a scalar field matches when it equals any expected
/// value; an array field matches when any element does.
fn contains_any(left: &Comparable<'_>, expected: &[Bson]) -> bool {
    match left {
        Comparable::Array(items) => expected
            .iter()
            .any(|e| items.iter().any(|item| *item == Comparable::from(e))),
        single => expected.iter().any(|e| *single == Comparable::from(e)),
    }
}

impl<'a> QueryVisitor for ClauseMatcher<'a> {
    type Output = bool;
    type Error = DbError;

    fn visit_clause(&mut self, path: &str, cond: &Cond) -> Result<(), Self::Error> {
        if self.matched {
            self.matched = self.eval(path, cond);
        }
        Ok(())
    }

    fn finish(self) -> Result<Self::Output, Self::Error> {
        Ok(self.matched)
    }
}

/// Sorts wire documents in place by the given keys, in priority order.
/// Incomparable values keep their relative order.
pub(crate) fn sort_documents(documents: &mut [Document], keys: &[SortKey]) {
    documents.sort_by(|a, b| {
        for key in keys {
            let left = resolve_path(a, &key.field).map(Comparable::from);
            let right = resolve_path(b, &key.field).map(Comparable::from);
            let ordering = match (left, right) {
                (Some(l), Some(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            let ordering = match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docmap_core::query::{Filter, Query};

    fn alice() -> Document {
        doc! { "name": "Alice", "age": 30_i64, "meta": { "score": 7 }, "tags": ["a", "b"] }
    }

    #[test]
    fn matches_equality_and_ranges() {
        let doc = alice();
        let q = Query::builder()
            .clause(Filter::eq("name", "Alice"))
            .clause(Filter::gt("age", 18))
            .build();
        assert!(ClauseMatcher::matches(&doc, &q));
        let q = Query::builder().clause(Filter::lt("age", 18)).build();
        assert!(!ClauseMatcher::matches(&doc, &q));
    }

    #[test]
    fn numeric_widths_compare_by_value() {
        let doc = alice();
        let q = Query::builder().clause(Filter::eq("age", 30_i32)).build();
        assert!(ClauseMatcher::matches(&doc, &q));
    }

    #[test]
    fn dotted_paths_reach_nested_fields() {
        let doc = alice();
        let q = Query::builder().clause(Filter::gte("meta.score", 7)).build();
        assert!(ClauseMatcher::matches(&doc, &q));
        let q = Query::builder().clause(Filter::eq("meta.missing", 1)).build();
        assert!(!ClauseMatcher::matches(&doc, &q));
    }

    #[test]
    fn in_matches_scalars_and_array_elements() {
        let doc = alice();
        let q = Query::builder()
            .clause(Filter::any_of("name", [Bson::from("Bob"), Bson::from("Alice")]))
            .build();
        assert!(ClauseMatcher::matches(&doc, &q));
        let q = Query::builder().clause(Filter::any_of("tags", [Bson::from("b")])).build();
        assert!(ClauseMatcher::matches(&doc, &q));
        let q = Query::builder().clause(Filter::none_of("tags", [Bson::from("b")])).build();
        assert!(!ClauseMatcher::matches(&doc, &q));
    }

    #[test]
    fn exists_checks_presence_and_null() {
        let doc = doc! { "a": 1, "b": Bson::Null };
        let q = Query::builder().clause(Filter::exists("a")).build();
        assert!(ClauseMatcher::matches(&doc, &q));
        let q = Query::builder().clause(Filter::exists("b")).build();
        assert!(!ClauseMatcher::matches(&doc, &q));
        let q = Query::builder().clause(Filter::not_exists("c")).build();
        assert!(ClauseMatcher::matches(&doc, &q));
    }

    #[test]
    fn sort_orders_by_priority_and_direction() {
        let mut docs = vec![
            doc! { "name": "b", "age": 2_i64 },
            doc! { "name": "a", "age": 3_i64 },
            doc! { "name": "b", "age": 1_i64 },
        ];
        sort_documents(&mut docs, &docmap_core::query::parse_sort(&["name", "-age"]));
        let order: Vec<(String, i64)> = docs
            .iter()
            .map(|d| (d.get_str("name").unwrap().to_owned(), d.get_i64("age").unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![("a".into(), 3), ("b".into(), 2), ("b".into(), 1)]
        );
    }
}
