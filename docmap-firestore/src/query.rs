//! Query planning for the cloud store.
//!
//! The cloud store's structured queries can AND together equality and range
//! filters, but have no `$ne`/`$nin`, no disjunction, and address documents
//! by id only through point lookups. Translation therefore produces a
//! [`QueryPlan`]:
//!
//! - `_id` clauses become point lookups, one per id (`_id $in` contributes
//!   one lookup per member);
//! - every other supported clause becomes a filter chained onto a structured
//!   query (chaining is logical AND);
//! - a non-identity `$in` multiplies the plan: each member yields an
//!   independent single-equality chain, cartesian with the base chain.
//!
//! Executing a plan means issuing every lookup and every chain, unioning the
//! results, and deduplicating by id.

use bson::Bson;

use docmap_core::error::DbError;
use docmap_core::query::{Cond, QueryVisitor};

/// Filter operators the cloud store can express natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    /// The REST protocol's operator name.
    pub fn wire_name(self) -> &'static str {
        match self {
            FilterOp::Eq => "EQUAL",
            FilterOp::Gt => "GREATER_THAN",
            FilterOp::Gte => "GREATER_THAN_OR_EQUAL",
            FilterOp::Lt => "LESS_THAN",
            FilterOp::Lte => "LESS_THAN_OR_EQUAL",
        }
    }
}

/// One filter in a structured-query chain.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereFilter {
    pub path: String,
    pub op: FilterOp,
    pub value: Bson,
}

/// The executable shape of a translated query.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct QueryPlan {
    /// Ids to fetch as point lookups.
    pub lookups: Vec<Bson>,
    /// Independent filter chains, each a conjunction.
    pub chains: Vec<Vec<WhereFilter>>,
}

impl QueryPlan {
    /// Whether executing this plan issues more than one backend request.
    pub fn is_fan_out(&self) -> bool {
        self.lookups.len() + self.chains.len() > 1
    }

    /// The single chain, when the plan is one structured query and nothing
    /// else.
    pub fn single_chain(&self) -> Option<&[WhereFilter]> {
        if self.lookups.is_empty() && self.chains.len() == 1 {
            Some(&self.chains[0])
        } else {
            None
        }
    }
}

/// Builds a [`QueryPlan`] from a query's clauses.
#[derive(Default)]
pub(crate) struct FirestorePlanner {
    lookups: Vec<Bson>,
    base: Vec<WhereFilter>,
    expansions: Vec<(String, Vec<Bson>)>,
}

impl FirestorePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_lookup(&mut self, id: Bson) {
        if !self.lookups.contains(&id) {
            self.lookups.push(id);
        }
    }
}

impl QueryVisitor for FirestorePlanner {
    type Output = QueryPlan;
    type Error = DbError;

    fn visit_clause(&mut self, path: &str, cond: &Cond) -> Result<(), Self::Error> {
        if path == "_id" {
            return match cond {
                Cond::Eq(id) => {
                    self.push_lookup(id.clone());
                    Ok(())
                }
                Cond::In(ids) => {
                    for id in ids {
                        self.push_lookup(id.clone());
                    }
                    Ok(())
                }
                _ => Err(DbError::NotSupported(
                    "cloud store ids only support equality and membership".into(),
                )),
            };
        }
        let op = |op: FilterOp, value: &Bson| WhereFilter {
            path: path.to_owned(),
            op,
            value: value.clone(),
        };
        match cond {
            Cond::Eq(v) => self.base.push(op(FilterOp::Eq, v)),
            Cond::Gt(v) => self.base.push(op(FilterOp::Gt, v)),
            Cond::Gte(v) => self.base.push(op(FilterOp::Gte, v)),
            Cond::Lt(v) => self.base.push(op(FilterOp::Lt, v)),
            Cond::Lte(v) => self.base.push(op(FilterOp::Lte, v)),
            Cond::In(values) => {
                self.expansions.push((path.to_owned(), values.clone()));
            }
            Cond::Ne(_) | Cond::Nin(_) => {
                return Err(DbError::NotSupported(format!(
                    "cloud store has no negative operator for field '{path}'"
                )));
            }
            Cond::Exists(_) => {
                return Err(DbError::NotSupported(format!(
                    "cloud store cannot test field presence for '{path}'"
                )));
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Self::Output, Self::Error> {
        // Cartesian expansion: every `$in` member multiplies the chains.
        let mut chains: Vec<Vec<WhereFilter>> = vec![self.base];
        for (path, values) in self.expansions {
            let mut expanded = Vec::with_capacity(chains.len() * values.len());
            for chain in &chains {
                for value in &values {
                    let mut next = chain.clone();
                    next.push(WhereFilter {
                        path: path.clone(),
                        op: FilterOp::Eq,
                        value: value.clone(),
                    });
                    expanded.push(next);
                }
            }
            chains = expanded;
        }

        // A purely id-addressed query has no chains; the no-clause query
        // keeps one empty chain, the full scan.
        if !self.lookups.is_empty() && chains == vec![Vec::new()] {
            chains.clear();
        }
        Ok(QueryPlan { lookups: self.lookups, chains })
    }
}
