//! Reference population.
//!
//! Population resolves reference fields from stored ids to live documents,
//! exactly one level deep per call. Ids are gathered across all input
//! documents, batched per referenced model, and fetched once each; the
//! resulting documents are spliced back into their slots without populating
//! their own reference fields. Depth-one resolution is what makes cyclic
//! reference graphs terminate regardless of cycle length.

use std::collections::HashMap;

use bson::Bson;
use tracing::debug;

use crate::client::FindOptions;
use crate::db::Database;
use crate::document::Doc;
use crate::error::DbResult;
use crate::query::Query;
use crate::types::FieldType;
use crate::value::{FieldValue, RefValue};

/// Which reference fields a lookup should populate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Populate {
    /// Populate every reference field (the default).
    #[default]
    All,
    /// Populate only the named top-level fields.
    Fields(Vec<String>),
    /// Leave all references as ids.
    None,
}

impl Populate {
    /// Whether the named top-level field is selected.
    pub fn wants(&self, field: &str) -> bool {
        match self {
            Populate::All => true,
            Populate::Fields(fields) => fields.iter().any(|f| f == field),
            Populate::None => false,
        }
    }

    /// Whether nothing is selected at all.
    pub fn is_none(&self) -> bool {
        match self {
            Populate::None => true,
            Populate::Fields(fields) => fields.is_empty(),
            Populate::All => false,
        }
    }
}

/// Resolves reference fields on the given documents, one level deep.
///
/// Every referenced id is fetched at most once per call. A scalar reference
/// whose id no longer resolves to a stored document becomes `Null`; inside a
/// reference array the unresolved entries are removed, so the array shrinks
/// rather than carrying `Null` holes.
pub async fn populate_docs(db: &Database, docs: &mut [Doc], populate: &Populate) -> DbResult<()> {
    if populate.is_none() || docs.is_empty() {
        return Ok(());
    }

    // Gather wanted ids, grouped by the referenced model.
    let mut wanted: HashMap<String, Vec<Bson>> = HashMap::new();
    for doc in docs.iter() {
        for (name, spec) in doc.model().schema().iter() {
            if !populate.wants(name) {
                continue;
            }
            if let Some(value) = doc.get(name) {
                collect_ids(value, &spec.field_type, &mut wanted);
            }
        }
    }
    if wanted.is_empty() {
        return Ok(());
    }

    // One batched fetch per referenced model.
    let mut fetched: HashMap<String, HashMap<String, Doc>> = HashMap::new();
    for (model_name, ids) in wanted {
        let model = db.model(&model_name)?;
        debug!(model = %model_name, count = ids.len(), "populating references");
        let raw = db
            .client()
            .find(model.collection(), &Query::by_ids(ids), &FindOptions::default())
            .await?;
        let mut by_id = HashMap::with_capacity(raw.len());
        for data in &raw {
            let resolved = Doc::from_data(model.clone(), db.models(), data)?;
            if let Some(id) = resolved.id() {
                by_id.insert(db.client().to_canonical_id(id), resolved);
            }
        }
        fetched.insert(model_name, by_id);
    }

    // Splice resolved documents back into their slots.
    for doc in docs.iter_mut() {
        let schema = doc.model().schema().clone();
        for (name, spec) in schema.iter() {
            if !populate.wants(name) {
                continue;
            }
            if let Some(value) = doc.get_mut(name) {
                splice(value, &spec.field_type, db, &fetched);
            }
        }
    }
    Ok(())
}

fn collect_ids(value: &FieldValue, field_type: &FieldType, wanted: &mut HashMap<String, Vec<Bson>>) {
    match (value, field_type) {
        (FieldValue::Ref(RefValue::Id(id)), FieldType::Reference(model)) => {
            let ids = wanted.entry(model.clone()).or_default();
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        (FieldValue::Array(items), FieldType::Array(inner)) => {
            for item in items {
                collect_ids(item, inner, wanted);
            }
        }
        (FieldValue::Embedded(doc), FieldType::Embedded(_)) => {
            for (name, spec) in doc.model().schema().iter() {
                if let Some(inner_value) = doc.get(name) {
                    collect_ids(inner_value, &spec.field_type, wanted);
                }
            }
        }
        _ => {}
    }
}

fn splice(
    value: &mut FieldValue,
    field_type: &FieldType,
    db: &Database,
    fetched: &HashMap<String, HashMap<String, Doc>>,
) {
    match (value, field_type) {
        (value @ FieldValue::Ref(RefValue::Id(_)), FieldType::Reference(model)) => {
            let FieldValue::Ref(RefValue::Id(id)) = &*value else { return };
            let resolved = fetched
                .get(model)
                .and_then(|by_id| by_id.get(&db.client().to_canonical_id(id)));
            *value = match resolved {
                Some(doc) => FieldValue::Ref(RefValue::Doc(Box::new(doc.clone()))),
                None => FieldValue::Null,
            };
        }
        (FieldValue::Array(items), FieldType::Array(inner)) => {
            for item in items.iter_mut() {
                splice(item, inner, db, fetched);
            }
            // Dangling array references vanish instead of leaving holes.
            if matches!(**inner, FieldType::Reference(_)) {
                items.retain(|item| !item.is_null());
            }
        }
        (FieldValue::Embedded(doc), FieldType::Embedded(_)) => {
            let schema = doc.model().schema().clone();
            for (name, spec) in schema.iter() {
                if let Some(inner_value) = doc.get_mut(name) {
                    splice(inner_value, &spec.field_type, db, fetched);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populate_selection() {
        assert!(Populate::All.wants("anything"));
        assert!(!Populate::None.wants("anything"));
        let some = Populate::Fields(vec!["boss".into()]);
        assert!(some.wants("boss"));
        assert!(!some.wants("reports"));
        assert!(!some.is_none());
        assert!(Populate::Fields(vec![]).is_none());
    }
}
