//! Type descriptors and pure validation predicates.
//!
//! Every schema field declares exactly one [`FieldType`]. The predicates in
//! this module are side-effect free: a mismatched value reports failure by
//! returning `false`, never by panicking. Absence (`Null`) is always
//! permitted; presence is what gets type-checked, and `required` is a
//! separate constraint enforced by validation.

use bson::Bson;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::value::{FieldValue, RefValue};

/// The closed set of scalar kinds a field may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarKind {
    /// UTF-8 string.
    String,
    /// Integer or floating point number.
    Number,
    /// Boolean.
    Boolean,
    /// Point in time, canonicalized to a BSON datetime.
    Date,
    /// Opaque byte buffer.
    Binary,
    /// Free-form BSON document with no declared inner schema.
    Object,
}

/// Declarative type of a schema field.
///
/// This is a closed tagged descriptor: arrays carry exactly one element type,
/// so "array of mixed types" is unrepresentable rather than a runtime error.
/// Embedded and reference targets are named models resolved through the
/// model registry at use time, which is what lets reference graphs contain
/// cycles without the descriptors themselves being cyclic.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// A primitive value of the given kind.
    Scalar(ScalarKind),
    /// A homogeneous array of the inner type.
    Array(Box<FieldType>),
    /// A sub-document stored inline, by value, with no identity of its own.
    Embedded(String),
    /// Another document, stored as its native id and resolved via population.
    Reference(String),
}

impl FieldType {
    /// Convenience constructor for an array of the given element type.
    pub fn array_of(inner: FieldType) -> Self {
        FieldType::Array(Box::new(inner))
    }

    /// Convenience constructor for an embedded-document field.
    pub fn embedded(model: impl Into<String>) -> Self {
        FieldType::Embedded(model.into())
    }

    /// Convenience constructor for a reference field.
    pub fn reference(model: impl Into<String>) -> Self {
        FieldType::Reference(model.into())
    }
}

/// Checks whether a raw BSON value is acceptable for a scalar kind.
///
/// `Date` accepts the canonical datetime as well as the encodings
/// `canonicalize` knows how to coerce: RFC 3339 strings and epoch-millisecond
/// numbers.
pub fn scalar_matches(value: &Bson, kind: ScalarKind) -> bool {
    match kind {
        ScalarKind::String => matches!(value, Bson::String(_)),
        ScalarKind::Number => {
            matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
        }
        ScalarKind::Boolean => matches!(value, Bson::Boolean(_)),
        ScalarKind::Date => match value {
            Bson::DateTime(_) | Bson::Int32(_) | Bson::Int64(_) => true,
            Bson::String(s) => DateTime::parse_from_rfc3339(s).is_ok(),
            _ => false,
        },
        ScalarKind::Binary => matches!(value, Bson::Binary(_)),
        ScalarKind::Object => matches!(value, Bson::Document(_)),
    }
}

/// Checks a field value against its declared type.
///
/// `Null` is always valid. Array fields check every element against the
/// inner type. Embedded and reference values must name the declared model;
/// a reference held as a raw id is accepted here and its id shape is checked
/// against the active client at save time.
pub fn is_valid_type(value: &FieldValue, field_type: &FieldType) -> bool {
    match value {
        FieldValue::Null => true,
        FieldValue::Scalar(raw) => match field_type {
            FieldType::Scalar(kind) => scalar_matches(raw, *kind),
            _ => false,
        },
        FieldValue::Array(items) => match field_type {
            FieldType::Array(inner) => items.iter().all(|item| is_valid_type(item, inner)),
            _ => false,
        },
        FieldValue::Embedded(doc) => match field_type {
            FieldType::Embedded(model) => doc.model_name() == model,
            _ => false,
        },
        FieldValue::Ref(reference) => match field_type {
            FieldType::Reference(model) => match reference {
                RefValue::Id(_) => true,
                RefValue::Doc(doc) => doc.model_name() == model,
            },
            _ => false,
        },
    }
}

/// Tests membership of a value in a `choices` list.
///
/// A missing choices list admits everything. Arrays are admitted when every
/// element is a member; embedded documents and references are only
/// constrained by their type, never by choices.
pub fn is_in_choices(choices: Option<&[Bson]>, value: &FieldValue) -> bool {
    let Some(choices) = choices else {
        return true;
    };
    match value {
        FieldValue::Null => true,
        FieldValue::Scalar(raw) => choices.contains(raw),
        FieldValue::Array(items) => items.iter().all(|item| is_in_choices(Some(choices), item)),
        _ => false,
    }
}

/// Tests whether a value counts as absent for `required` checks.
///
/// Empty strings, arrays, and documents are treated as absent; numbers,
/// booleans, and dates are always present once set.
pub fn is_empty_value(value: &FieldValue) -> bool {
    match value {
        FieldValue::Null => true,
        FieldValue::Scalar(Bson::String(s)) => s.is_empty(),
        FieldValue::Scalar(Bson::Document(d)) => d.is_empty(),
        FieldValue::Scalar(_) => false,
        FieldValue::Array(items) => items.is_empty(),
        FieldValue::Embedded(_) | FieldValue::Ref(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn null_is_valid_for_every_type() {
        let types = [
            FieldType::Scalar(ScalarKind::String),
            FieldType::Scalar(ScalarKind::Number),
            FieldType::array_of(FieldType::Scalar(ScalarKind::Boolean)),
            FieldType::reference("other"),
            FieldType::embedded("address"),
        ];
        for ty in &types {
            assert!(is_valid_type(&FieldValue::Null, ty));
        }
    }

    #[test]
    fn scalar_kinds_match_their_bson_shapes() {
        assert!(scalar_matches(&Bson::String("hi".into()), ScalarKind::String));
        assert!(scalar_matches(&Bson::Int32(3), ScalarKind::Number));
        assert!(scalar_matches(&Bson::Int64(3), ScalarKind::Number));
        assert!(scalar_matches(&Bson::Double(3.5), ScalarKind::Number));
        assert!(scalar_matches(&Bson::Boolean(true), ScalarKind::Boolean));
        assert!(scalar_matches(&Bson::Document(doc! {"a": 1}), ScalarKind::Object));
        assert!(!scalar_matches(&Bson::String("hi".into()), ScalarKind::Number));
        assert!(!scalar_matches(&Bson::Boolean(false), ScalarKind::String));
    }

    #[test]
    fn dates_accept_coercible_encodings() {
        assert!(scalar_matches(&Bson::DateTime(bson::DateTime::now()), ScalarKind::Date));
        assert!(scalar_matches(&Bson::String("2020-01-01T00:00:00Z".into()), ScalarKind::Date));
        assert!(scalar_matches(&Bson::Int64(1_577_836_800_000), ScalarKind::Date));
        assert!(!scalar_matches(&Bson::String("not a date".into()), ScalarKind::Date));
    }

    #[test]
    fn arrays_check_every_element() {
        let ty = FieldType::array_of(FieldType::Scalar(ScalarKind::Number));
        let good = FieldValue::Array(vec![
            FieldValue::Scalar(Bson::Int32(1)),
            FieldValue::Scalar(Bson::Double(2.0)),
        ]);
        let bad = FieldValue::Array(vec![
            FieldValue::Scalar(Bson::Int32(1)),
            FieldValue::Scalar(Bson::String("two".into())),
        ]);
        assert!(is_valid_type(&good, &ty));
        assert!(!is_valid_type(&bad, &ty));
    }

    #[test]
    fn choices_only_constrain_scalars() {
        let choices = [Bson::String("red".into()), Bson::String("blue".into())];
        assert!(is_in_choices(Some(&choices), &FieldValue::Scalar(Bson::String("red".into()))));
        assert!(!is_in_choices(Some(&choices), &FieldValue::Scalar(Bson::String("green".into()))));
        assert!(is_in_choices(None, &FieldValue::Scalar(Bson::String("green".into()))));
        assert!(is_in_choices(Some(&choices), &FieldValue::Null));
    }

    #[test]
    fn empty_values() {
        assert!(is_empty_value(&FieldValue::Null));
        assert!(is_empty_value(&FieldValue::Scalar(Bson::String(String::new()))));
        assert!(is_empty_value(&FieldValue::Array(vec![])));
        assert!(!is_empty_value(&FieldValue::Scalar(Bson::Int32(0))));
        assert!(!is_empty_value(&FieldValue::Scalar(Bson::Boolean(false))));
    }
}
