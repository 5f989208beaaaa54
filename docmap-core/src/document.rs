//! Live documents and the save/delete lifecycle.
//!
//! A [`Doc`] is one instance of a registered [`Model`]: an optional native id
//! plus a field map constrained by the model's schema. Construction applies
//! schema defaults, assignment type-checks eagerly, and `save` runs the full
//! lifecycle: hooks, validation, canonicalization, serialization, and the
//! backend write.

use std::collections::HashMap;
use std::sync::Arc;

use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::client::StorageClient;
use crate::db::Database;
use crate::error::{DbError, DbResult};
use crate::model::{HookPhase, Model, ModelKind, ModelRegistry};
use crate::types::{self, FieldType};
use crate::value::{FieldValue, RefValue};

/// A live document bound to its model.
#[derive(Clone)]
pub struct Doc {
    model: Arc<Model>,
    id: Option<Bson>,
    fields: HashMap<String, FieldValue>,
}

impl std::fmt::Debug for Doc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Doc")
            .field("model", &self.model.name())
            .field("id", &self.id)
            .field("fields", &self.fields)
            .finish()
    }
}

impl PartialEq for Doc {
    /// Documents are equal when they share a model name, id, and field
    /// values.
    fn eq(&self, other: &Self) -> bool {
        self.model.name() == other.model.name()
            && self.id == other.id
            && self.fields == other.fields
    }
}

impl Doc {
    /// Instantiates a document with schema defaults applied.
    ///
    /// Fields with a declared default get a fresh copy of it; array fields
    /// without one get a fresh empty vector; everything else starts `Null`.
    /// The model's `pre_init` hooks run last and may seed further state.
    pub fn new(model: Arc<Model>) -> DbResult<Self> {
        let mut fields = HashMap::with_capacity(model.schema().len());
        for (name, spec) in model.schema().iter() {
            let value = match &spec.default {
                Some(default) => default.clone(),
                None => match &spec.field_type {
                    FieldType::Array(_) => FieldValue::Array(Vec::new()),
                    _ => FieldValue::Null,
                },
            };
            fields.insert(name.to_owned(), value);
        }
        let mut doc = Doc { model: model.clone(), id: None, fields };
        model.hooks().run_pre_init(&mut doc)?;
        Ok(doc)
    }

    /// The model this document is an instance of.
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// The model's registered name.
    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Whether this is an embedded document (no identity of its own).
    pub fn is_embedded(&self) -> bool {
        self.model.kind() == ModelKind::Embedded
    }

    /// The native id, absent until the first successful insert.
    pub fn id(&self) -> Option<&Bson> {
        self.id.as_ref()
    }

    pub(crate) fn set_id(&mut self, id: Bson) {
        self.id = Some(id);
    }

    /// Reads a field's current value.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        self.fields.get_mut(name)
    }

    /// Assigns a field, type-checking against the schema eagerly.
    ///
    /// A bare scalar assigned to a reference field is treated as a native
    /// id. Unknown fields and type mismatches are schema errors; `required`
    /// and `choices` are deferred to [`validate`](Doc::validate) so a
    /// document may pass through incomplete intermediate states.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> DbResult<()> {
        let spec = self
            .model
            .schema()
            .field(name)
            .ok_or_else(|| {
                DbError::Schema(format!(
                    "model '{}' has no field '{name}'",
                    self.model.name()
                ))
            })?;
        let value = coerce_to_type(value.into(), &spec.field_type);
        if !types::is_valid_type(&value, &spec.field_type) {
            return Err(DbError::Schema(format!(
                "value for field '{name}' does not match its declared type"
            )));
        }
        self.fields.insert(name.to_owned(), value);
        Ok(())
    }

    /// Clears a field back to `Null`.
    pub fn unset(&mut self, name: &str) -> DbResult<()> {
        self.set(name, FieldValue::Null)
    }

    /// Normalizes field values into their canonical representations.
    ///
    /// Dates given as RFC 3339 strings or epoch milliseconds become BSON
    /// datetimes; 32-bit integers widen to 64-bit. Recurses into arrays and
    /// embedded documents. Idempotent: canonical values pass through
    /// unchanged.
    pub fn canonicalize(&mut self) -> DbResult<()> {
        for (name, spec) in self.model.schema().iter() {
            if let Some(value) = self.fields.get_mut(name) {
                canonicalize_value(value, &spec.field_type)?;
            }
        }
        Ok(())
    }

    /// Checks every field against its declaration, in schema order, failing
    /// on the first violation: type shape, `required`, `choices`, then the
    /// custom validator. Recurses into embedded documents with dotted field
    /// paths in errors.
    pub fn validate(&self) -> DbResult<()> {
        self.validate_at("")
    }

    fn validate_at(&self, prefix: &str) -> DbResult<()> {
        for (name, spec) in self.model.schema().iter() {
            let path =
                if prefix.is_empty() { name.to_owned() } else { format!("{prefix}.{name}") };
            let value = self.fields.get(name).unwrap_or(&FieldValue::Null);
            if !types::is_valid_type(value, &spec.field_type) {
                return Err(DbError::validation(path, "value does not match declared type"));
            }
            if spec.required && types::is_empty_value(value) {
                return Err(DbError::validation(path, "required field is missing or empty"));
            }
            if !types::is_in_choices(spec.choices.as_deref(), value) {
                return Err(DbError::validation(path, "value is not among the declared choices"));
            }
            if let Some(validator) = &spec.validator {
                if let Err(reason) = validator.validate(value) {
                    return Err(DbError::validation(path, reason));
                }
            }
            match value {
                FieldValue::Embedded(inner) => inner.validate_at(&path)?,
                FieldValue::Array(items) => {
                    for item in items {
                        if let FieldValue::Embedded(inner) = item {
                            inner.validate_at(&path)?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Serializes to a wire document in schema order.
    ///
    /// Embedded documents nest in full; reference fields flatten to their
    /// ids. `include_id` controls whether a present `_id` key is written.
    pub fn to_data(&self, include_id: bool) -> DbResult<Document> {
        let mut data = Document::new();
        if include_id {
            if let Some(id) = &self.id {
                data.insert("_id", id.clone());
            }
        }
        for (name, _) in self.model.schema().iter() {
            let value = self.fields.get(name).unwrap_or(&FieldValue::Null);
            data.insert(name, serialize_value(name, value)?);
        }
        Ok(data)
    }

    /// Rehydrates a document from its wire form.
    ///
    /// Reference fields come back as stored ids; no population happens
    /// here. Keys the schema does not declare are ignored.
    pub fn from_data(
        model: Arc<Model>,
        registry: &ModelRegistry,
        raw: &Document,
    ) -> DbResult<Self> {
        let mut fields = HashMap::with_capacity(model.schema().len());
        for (name, spec) in model.schema().iter() {
            let value = match raw.get(name) {
                Some(raw_value) => deserialize_value(name, raw_value, &spec.field_type, registry)?,
                None => FieldValue::Null,
            };
            fields.insert(name.to_owned(), value);
        }
        let id = match raw.get("_id") {
            Some(Bson::Null) | None => None,
            Some(id) => Some(id.clone()),
        };
        Ok(Doc { model, id, fields })
    }

    /// Renders the document as a JSON value, id included.
    pub fn to_json(&self) -> DbResult<serde_json::Value> {
        Ok(serde_json::to_value(self.to_data(true)?)?)
    }

    /// Persists the document through the database's client.
    ///
    /// Lifecycle: `pre_validate` hooks, [`validate`](Doc::validate),
    /// [`canonicalize`](Doc::canonicalize), `post_validate`, `pre_save`, the
    /// backend write, then `post_save`. A validation failure aborts before
    /// any mutation or backend write. The first save inserts and adopts the
    /// backend-generated id; later saves upsert in place.
    pub async fn save(&mut self, db: &Database) -> DbResult<()> {
        if self.is_embedded() {
            return Err(DbError::Schema(format!(
                "embedded model '{}' cannot be saved directly",
                self.model.name()
            )));
        }

        let model = self.model.clone();
        model.hooks().run(HookPhase::PreValidate, self).await?;
        self.validate()?;
        self.check_reference_ids(db.client().as_ref())?;
        self.canonicalize()?;
        model.hooks().run(HookPhase::PostValidate, self).await?;
        model.hooks().run(HookPhase::PreSave, self).await?;

        ensure_indexes(db, &model).await?;

        let data = self.to_data(false)?;
        let saved_id =
            db.client().save(model.collection(), self.id.as_ref(), data).await?;
        if self.id.is_none() {
            debug!(model = model.name(), id = %saved_id, "inserted document");
            self.id = Some(saved_id);
        }

        model.hooks().run(HookPhase::PostSave, self).await?;
        Ok(())
    }

    /// Deletes the document. Returns the number of documents removed: 0 when
    /// the document was never saved, 1 otherwise.
    pub async fn delete(&mut self, db: &Database) -> DbResult<u64> {
        let model = self.model.clone();
        model.hooks().run(HookPhase::PreDelete, self).await?;
        let deleted = match &self.id {
            None => 0,
            Some(id) => db.client().delete(model.collection(), id).await?,
        };
        model.hooks().run(HookPhase::PostDelete, self).await?;
        Ok(deleted)
    }

    /// Rejects reference ids whose shape the active backend does not
    /// recognize, so a foreign or corrupted id never reaches the wire.
    fn check_reference_ids(&self, client: &dyn StorageClient) -> DbResult<()> {
        for (name, spec) in self.model.schema().iter() {
            let value = self.fields.get(name).unwrap_or(&FieldValue::Null);
            check_reference_value(name, value, &spec.field_type, client)?;
        }
        Ok(())
    }
}

/// Creates unique indexes for a model, once per model instance.
pub(crate) async fn ensure_indexes(db: &Database, model: &Arc<Model>) -> DbResult<()> {
    if !model.mark_indexes_created() {
        return Ok(());
    }
    for field in model.unique_fields() {
        let options = crate::client::IndexOptions { unique: true, sparse: false };
        db.client().create_index(model.collection(), field, &options).await?;
    }
    Ok(())
}

fn check_reference_value(
    field: &str,
    value: &FieldValue,
    field_type: &FieldType,
    client: &dyn StorageClient,
) -> DbResult<()> {
    match (value, field_type) {
        (FieldValue::Ref(RefValue::Id(id)), FieldType::Reference(_)) => {
            if !client.is_native_id(id) {
                return Err(DbError::validation(
                    field,
                    "reference id does not match the backend's native id shape",
                ));
            }
        }
        (FieldValue::Array(items), FieldType::Array(inner)) => {
            for item in items {
                check_reference_value(field, item, inner, client)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn coerce_to_type(value: FieldValue, field_type: &FieldType) -> FieldValue {
    match (value, field_type) {
        // A bare scalar assigned to a reference field is a native id.
        (FieldValue::Scalar(raw), FieldType::Reference(_)) => {
            FieldValue::Ref(RefValue::Id(raw))
        }
        (FieldValue::Array(items), FieldType::Array(inner)) => FieldValue::Array(
            items.into_iter().map(|item| coerce_to_type(item, inner)).collect(),
        ),
        (value, _) => value,
    }
}

fn canonicalize_value(value: &mut FieldValue, field_type: &FieldType) -> DbResult<()> {
    match (value, field_type) {
        (FieldValue::Scalar(raw), FieldType::Scalar(kind)) => {
            canonicalize_scalar(raw, *kind)?;
        }
        (FieldValue::Array(items), FieldType::Array(inner)) => {
            for item in items {
                canonicalize_value(item, inner)?;
            }
        }
        (FieldValue::Embedded(doc), FieldType::Embedded(_)) => {
            doc.canonicalize()?;
        }
        _ => {}
    }
    Ok(())
}

fn canonicalize_scalar(raw: &mut Bson, kind: crate::types::ScalarKind) -> DbResult<()> {
    use crate::types::ScalarKind;
    match kind {
        ScalarKind::Date => {
            let canonical = match &*raw {
                Bson::String(s) => {
                    let parsed = DateTime::parse_from_rfc3339(s).map_err(|e| {
                        DbError::Serialization(format!("invalid date string '{s}': {e}"))
                    })?;
                    Some(Bson::DateTime(bson::DateTime::from_chrono(
                        parsed.with_timezone(&Utc),
                    )))
                }
                Bson::Int32(ms) => {
                    Some(Bson::DateTime(bson::DateTime::from_millis(i64::from(*ms))))
                }
                Bson::Int64(ms) => Some(Bson::DateTime(bson::DateTime::from_millis(*ms))),
                _ => None,
            };
            if let Some(canonical) = canonical {
                *raw = canonical;
            }
        }
        ScalarKind::Number => {
            if let Bson::Int32(n) = &*raw {
                *raw = Bson::Int64(i64::from(*n));
            }
        }
        _ => {}
    }
    Ok(())
}

fn serialize_value(field: &str, value: &FieldValue) -> DbResult<Bson> {
    match value {
        FieldValue::Null => Ok(Bson::Null),
        FieldValue::Scalar(raw) => Ok(raw.clone()),
        FieldValue::Array(items) => Ok(Bson::Array(
            items
                .iter()
                .map(|item| serialize_value(field, item))
                .collect::<DbResult<Vec<_>>>()?,
        )),
        FieldValue::Embedded(doc) => Ok(Bson::Document(doc.to_data(false)?)),
        FieldValue::Ref(reference) => match reference.id() {
            Some(id) => Ok(id.clone()),
            None => Err(DbError::validation(
                field,
                "referenced document has no id; save it first",
            )),
        },
    }
}

fn deserialize_value(
    field: &str,
    raw: &Bson,
    field_type: &FieldType,
    registry: &ModelRegistry,
) -> DbResult<FieldValue> {
    if matches!(raw, Bson::Null) {
        return Ok(FieldValue::Null);
    }
    match field_type {
        FieldType::Scalar(_) => Ok(FieldValue::Scalar(raw.clone())),
        FieldType::Array(inner) => match raw {
            Bson::Array(items) => Ok(FieldValue::Array(
                items
                    .iter()
                    .map(|item| deserialize_value(field, item, inner, registry))
                    .collect::<DbResult<Vec<_>>>()?,
            )),
            _ => Err(DbError::Serialization(format!(
                "stored value for array field '{field}' is not an array"
            ))),
        },
        FieldType::Embedded(model_name) => match raw {
            Bson::Document(inner) => {
                let model = registry.require(model_name)?;
                Ok(FieldValue::Embedded(Box::new(Doc::from_data(model, registry, inner)?)))
            }
            _ => Err(DbError::Serialization(format!(
                "stored value for embedded field '{field}' is not a document"
            ))),
        },
        FieldType::Reference(_) => Ok(FieldValue::Ref(RefValue::Id(raw.clone()))),
    }
}
