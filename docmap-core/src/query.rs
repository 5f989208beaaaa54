//! Query construction and translation API for document stores.
//!
//! A [`Query`] is a conjunction of clauses over dotted field paths. It can be
//! built fluently through [`Filter`] or parsed from a BSON document in the
//! networked-store dialect via [`Query::from_document`]. Backends translate
//! queries through the [`QueryVisitor`] seam rather than matching on the
//! clause enum directly.
//!
//! # Query Building
//!
//! ```ignore
//! use docmap::query::{Query, Filter};
//!
//! let query = Query::builder()
//!     .clause(Filter::eq("status", "active"))
//!     .clause(Filter::gt("age", 18))
//!     .build();
//! ```

use bson::{Bson, Document};

use crate::error::{DbError, DbResult};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

/// One resolved sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    /// The field path to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Parses sort field names into keys. A leading `-` selects descending
/// order, anything else ascending.
pub fn parse_sort<S: AsRef<str>>(fields: &[S]) -> Vec<SortKey> {
    fields
        .iter()
        .map(|field| {
            let field = field.as_ref();
            match field.strip_prefix('-') {
                Some(rest) => SortKey { field: rest.to_owned(), direction: SortDirection::Desc },
                None => SortKey { field: field.to_owned(), direction: SortDirection::Asc },
            }
        })
        .collect()
}

/// A single-field condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    /// Equal to (exact match).
    Eq(Bson),
    /// Not equal to.
    Ne(Bson),
    /// Greater than.
    Gt(Bson),
    /// Greater than or equal to.
    Gte(Bson),
    /// Less than.
    Lt(Bson),
    /// Less than or equal to.
    Lte(Bson),
    /// Equal to any of the values.
    In(Vec<Bson>),
    /// Equal to none of the values.
    Nin(Vec<Bson>),
    /// Whether the field is present and non-null.
    Exists(bool),
}

/// A condition bound to a dotted field path.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    /// The dotted field path the condition applies to.
    pub path: String,
    /// The condition.
    pub cond: Cond,
}

impl Clause {
    pub fn new(path: impl Into<String>, cond: Cond) -> Self {
        Clause { path: path.into(), cond }
    }
}

/// A structured query: the conjunction of its clauses.
///
/// An empty query matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    clauses: Vec<Clause>,
}

impl Query {
    /// Creates an empty query that matches everything.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder { query: Query::default() }
    }

    /// A query matching documents whose `_id` equals the given id.
    pub fn by_id(id: impl Into<Bson>) -> Self {
        Query { clauses: vec![Clause::new("_id", Cond::Eq(id.into()))] }
    }

    /// A query matching documents whose `_id` is any of the given ids.
    pub fn by_ids(ids: impl IntoIterator<Item = Bson>) -> Self {
        Query { clauses: vec![Clause::new("_id", Cond::In(ids.into_iter().collect()))] }
    }

    /// The clauses, in construction order.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Whether this query has no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Parses a filter document in the networked-store dialect.
    ///
    /// Nested plain documents flatten into dotted paths; a document whose
    /// keys all start with `$` is an operator block applying to its parent
    /// path. Anything else is an equality clause.
    ///
    /// ```text
    /// { "name": "Alice", "meta": { "score": { "$gte": 3 } } }
    ///   ==> name == "Alice"  AND  meta.score >= 3
    /// ```
    pub fn from_document(filter: &Document) -> DbResult<Self> {
        let mut clauses = Vec::new();
        flatten_into("", filter, &mut clauses)?;
        Ok(Query { clauses })
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() { key.to_owned() } else { format!("{prefix}.{key}") }
}

fn flatten_into(prefix: &str, filter: &Document, clauses: &mut Vec<Clause>) -> DbResult<()> {
    for (key, value) in filter {
        let path = join_path(prefix, key);
        match value {
            Bson::Document(inner)
                if !inner.is_empty() && inner.keys().all(|k| k.starts_with('$')) =>
            {
                for (op, operand) in inner {
                    clauses.push(Clause::new(path.clone(), parse_operator(&path, op, operand)?));
                }
            }
            Bson::Document(inner) => flatten_into(&path, inner, clauses)?,
            other => clauses.push(Clause::new(path, Cond::Eq(other.clone()))),
        }
    }
    Ok(())
}

fn parse_operator(path: &str, op: &str, operand: &Bson) -> DbResult<Cond> {
    let values = |operand: &Bson| -> DbResult<Vec<Bson>> {
        match operand {
            Bson::Array(items) => Ok(items.clone()),
            _ => Err(DbError::Schema(format!("'{op}' on field '{path}' expects an array"))),
        }
    };
    match op {
        "$eq" => Ok(Cond::Eq(operand.clone())),
        "$ne" => Ok(Cond::Ne(operand.clone())),
        "$gt" => Ok(Cond::Gt(operand.clone())),
        "$gte" => Ok(Cond::Gte(operand.clone())),
        "$lt" => Ok(Cond::Lt(operand.clone())),
        "$lte" => Ok(Cond::Lte(operand.clone())),
        "$in" => Ok(Cond::In(values(operand)?)),
        "$nin" => Ok(Cond::Nin(values(operand)?)),
        "$exists" => match operand {
            Bson::Boolean(b) => Ok(Cond::Exists(*b)),
            _ => Err(DbError::Schema(format!("'$exists' on field '{path}' expects a boolean"))),
        },
        other => Err(DbError::NotSupported(format!("query operator '{other}'"))),
    }
}

/// Helper struct for constructing clauses.
///
/// Provides static methods to construct common clauses in a type-safe
/// manner. All methods accept field paths and values as `Into<String>` and
/// `Into<Bson>` for ergonomics.
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the specified value.
    pub fn eq(path: impl Into<String>, value: impl Into<Bson>) -> Clause {
        Clause::new(path, Cond::Eq(value.into()))
    }

    /// Matches documents where the field does not equal the specified value.
    pub fn ne(path: impl Into<String>, value: impl Into<Bson>) -> Clause {
        Clause::new(path, Cond::Ne(value.into()))
    }

    /// Matches documents where the field is greater than the specified value.
    pub fn gt(path: impl Into<String>, value: impl Into<Bson>) -> Clause {
        Clause::new(path, Cond::Gt(value.into()))
    }

    /// Matches documents where the field is greater than or equal to the
    /// specified value.
    pub fn gte(path: impl Into<String>, value: impl Into<Bson>) -> Clause {
        Clause::new(path, Cond::Gte(value.into()))
    }

    /// Matches documents where the field is less than the specified value.
    pub fn lt(path: impl Into<String>, value: impl Into<Bson>) -> Clause {
        Clause::new(path, Cond::Lt(value.into()))
    }

    /// Matches documents where the field is less than or equal to the
    /// specified value.
    pub fn lte(path: impl Into<String>, value: impl Into<Bson>) -> Clause {
        Clause::new(path, Cond::Lte(value.into()))
    }

    /// Matches documents where the field equals any of the specified values.
    pub fn any_of(path: impl Into<String>, values: impl IntoIterator<Item = Bson>) -> Clause {
        Clause::new(path, Cond::In(values.into_iter().collect()))
    }

    /// Matches documents where the field equals none of the specified values.
    pub fn none_of(path: impl Into<String>, values: impl IntoIterator<Item = Bson>) -> Clause {
        Clause::new(path, Cond::Nin(values.into_iter().collect()))
    }

    /// Matches documents where the field is present and non-null.
    pub fn exists(path: impl Into<String>) -> Clause {
        Clause::new(path, Cond::Exists(true))
    }

    /// Matches documents where the field is missing or null.
    pub fn not_exists(path: impl Into<String>) -> Clause {
        Clause::new(path, Cond::Exists(false))
    }
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Appends a clause to the conjunction.
    pub fn clause(mut self, clause: Clause) -> Self {
        self.query.clauses.push(clause);
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

/// Translation seam for backends.
///
/// Each adapter implements this to walk a query's clauses and accumulate a
/// native representation (operator documents, structured-query plans, or an
/// in-process match).
pub trait QueryVisitor {
    type Output;
    type Error: Into<DbError>;

    fn visit_clause(&mut self, path: &str, cond: &Cond) -> Result<(), Self::Error>;

    /// Consumes the accumulated state.
    fn finish(self) -> Result<Self::Output, Self::Error>;

    /// Walks every clause in order, then finishes.
    fn visit_query(mut self, query: &Query) -> Result<Self::Output, Self::Error>
    where
        Self: Sized,
    {
        for clause in query.clauses() {
            self.visit_clause(&clause.path, &clause.cond)?;
        }
        self.finish()
    }
}
