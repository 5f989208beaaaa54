//! Declarative schemas.
//!
//! A [`Schema`] is an ordered list of named field specifications. Order
//! matters: validation reports the first failing field in declaration order,
//! and serialized documents keep fields in that order. Authoring mistakes
//! (a default that does not fit its type, choices on a non-scalar field) are
//! rejected synchronously by [`SchemaBuilder::build`], never deferred to a
//! lifecycle operation.

use std::fmt;
use std::sync::Arc;

use bson::Bson;

use crate::error::{DbError, DbResult};
use crate::types::{self, FieldType, ScalarKind};
use crate::value::FieldValue;

/// A custom per-field validation check, run after the built-in type,
/// required, and choices checks.
pub trait FieldValidator: Send + Sync {
    /// Returns `Err` with a human-readable reason when the value is rejected.
    fn validate(&self, value: &FieldValue) -> Result<(), String>;
}

impl<F> FieldValidator for F
where
    F: Fn(&FieldValue) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, value: &FieldValue) -> Result<(), String> {
        self(value)
    }
}

/// Everything declared about a single field.
#[derive(Clone)]
pub struct FieldSpec {
    /// The field's declared type.
    pub field_type: FieldType,
    /// Value assigned at construction when the caller provides none.
    pub default: Option<FieldValue>,
    /// Whether the field must hold a non-empty value at validation time.
    pub required: bool,
    /// Whether saves should maintain a unique index on this field.
    pub unique: bool,
    /// Closed set of admissible scalar values, if any.
    pub choices: Option<Vec<Bson>>,
    /// Optional custom validator.
    pub validator: Option<Arc<dyn FieldValidator>>,
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("field_type", &self.field_type)
            .field("default", &self.default)
            .field("required", &self.required)
            .field("unique", &self.unique)
            .field("choices", &self.choices)
            .field("validator", &self.validator.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl FieldSpec {
    /// A plain optional field of the given type with no constraints.
    pub fn new(field_type: FieldType) -> Self {
        FieldSpec {
            field_type,
            default: None,
            required: false,
            unique: false,
            choices: None,
            validator: None,
        }
    }

    /// Sets the default value.
    pub fn default_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Marks the field required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Restricts the field to a closed set of scalar values.
    pub fn choices(mut self, choices: impl IntoIterator<Item = Bson>) -> Self {
        self.choices = Some(choices.into_iter().collect());
        self
    }

    /// Attaches a custom validator.
    pub fn validator(mut self, validator: impl FieldValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

/// An ordered, immutable set of field specifications.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<(String, FieldSpec)>,
}

impl Schema {
    /// Starts building a schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder { fields: Vec::new() }
    }

    /// Looks up a field specification by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, spec)| spec)
    }

    /// Iterates fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema declares no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Builder enforcing schema-authoring invariants up front.
pub struct SchemaBuilder {
    fields: Vec<(String, FieldSpec)>,
}

impl SchemaBuilder {
    /// Declares a field with a full specification.
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.push((name.into(), spec));
        self
    }

    /// Declares a plain optional scalar field.
    pub fn scalar(self, name: impl Into<String>, kind: ScalarKind) -> Self {
        self.field(name, FieldSpec::new(FieldType::Scalar(kind)))
    }

    /// Declares a reference field to the named model.
    pub fn reference(self, name: impl Into<String>, model: impl Into<String>) -> Self {
        self.field(name, FieldSpec::new(FieldType::reference(model)))
    }

    /// Declares an embedded-document field of the named model.
    pub fn embedded(self, name: impl Into<String>, model: impl Into<String>) -> Self {
        self.field(name, FieldSpec::new(FieldType::embedded(model)))
    }

    /// Validates the declarations and produces the schema.
    ///
    /// Rejects duplicate field names, a reserved `_id` field, defaults that
    /// do not fit the declared type, choices on non-scalar fields, and
    /// choices whose members do not fit the declared scalar kind.
    pub fn build(self) -> DbResult<Schema> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.fields.len());
        for (name, spec) in &self.fields {
            if name == "_id" {
                return Err(DbError::Schema(
                    "'_id' is managed by the engine and cannot be declared".into(),
                ));
            }
            if seen.contains(&name.as_str()) {
                return Err(DbError::Schema(format!("duplicate field '{name}'")));
            }
            seen.push(name);

            if let Some(default) = &spec.default {
                if !types::is_valid_type(default, &spec.field_type) {
                    return Err(DbError::Schema(format!(
                        "default for field '{name}' does not match its declared type"
                    )));
                }
            }

            if let Some(choices) = &spec.choices {
                let element_kind = match &spec.field_type {
                    FieldType::Scalar(kind) => *kind,
                    FieldType::Array(inner) => match inner.as_ref() {
                        FieldType::Scalar(kind) => *kind,
                        _ => {
                            return Err(DbError::Schema(format!(
                                "choices on field '{name}' require a scalar element type"
                            )));
                        }
                    },
                    _ => {
                        return Err(DbError::Schema(format!(
                            "choices on field '{name}' require a scalar type"
                        )));
                    }
                };
                for choice in choices {
                    if !types::scalar_matches(choice, element_kind) {
                        return Err(DbError::Schema(format!(
                            "choice {choice} for field '{name}' does not match its declared type"
                        )));
                    }
                }
            }
        }
        Ok(Schema { fields: self.fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_keeps_declaration_order() {
        let schema = Schema::builder()
            .scalar("name", ScalarKind::String)
            .scalar("age", ScalarKind::Number)
            .scalar("active", ScalarKind::Boolean)
            .build()
            .unwrap();
        let names: Vec<&str> = schema.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["name", "age", "active"]);
    }

    #[test]
    fn rejects_duplicate_fields() {
        let err = Schema::builder()
            .scalar("name", ScalarKind::String)
            .scalar("name", ScalarKind::Number)
            .build()
            .unwrap_err();
        assert!(matches!(err, DbError::Schema(_)));
    }

    #[test]
    fn rejects_reserved_id_field() {
        let err = Schema::builder().scalar("_id", ScalarKind::String).build().unwrap_err();
        assert!(matches!(err, DbError::Schema(_)));
    }

    #[test]
    fn rejects_mismatched_default() {
        let err = Schema::builder()
            .field(
                "age",
                FieldSpec::new(FieldType::Scalar(ScalarKind::Number)).default_value("young"),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, DbError::Schema(_)));
    }

    #[test]
    fn rejects_choices_on_reference() {
        let err = Schema::builder()
            .field(
                "owner",
                FieldSpec::new(FieldType::reference("user")).choices([Bson::Int32(1)]),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, DbError::Schema(_)));
    }

    #[test]
    fn accepts_choices_on_scalar_arrays() {
        let schema = Schema::builder()
            .field(
                "tags",
                FieldSpec::new(FieldType::array_of(FieldType::Scalar(ScalarKind::String)))
                    .choices([Bson::String("a".into()), Bson::String("b".into())]),
            )
            .build();
        assert!(schema.is_ok());
    }
}
