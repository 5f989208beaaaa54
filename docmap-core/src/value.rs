//! Runtime field values.
//!
//! A [`FieldValue`] is what a document actually holds for a field, mirroring
//! the [`FieldType`](crate::types::FieldType) shape tree. References keep
//! their dual nature explicit: a [`RefValue`] is either a bare native id or a
//! populated document, and flattening back to an id happens at save time.

use bson::Bson;

use crate::document::Doc;

/// A reference field's payload.
#[derive(Debug, Clone)]
pub enum RefValue {
    /// The referenced document's native id, as stored on the wire.
    Id(Bson),
    /// A populated (one level deep) copy of the referenced document.
    Doc(Box<Doc>),
}

impl RefValue {
    /// The native id of the referenced document, whether or not it has been
    /// populated. Populated documents that were never saved have no id.
    pub fn id(&self) -> Option<&Bson> {
        match self {
            RefValue::Id(id) => Some(id),
            RefValue::Doc(doc) => doc.id(),
        }
    }

    /// Whether this reference has been resolved to a full document.
    pub fn is_populated(&self) -> bool {
        matches!(self, RefValue::Doc(_))
    }
}

impl PartialEq for RefValue {
    /// Two references are equal when they point at the same native id,
    /// regardless of population state.
    fn eq(&self, other: &Self) -> bool {
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// The value a document holds for one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Absent. Valid for every field type; `required` is checked separately.
    Null,
    /// A primitive BSON value.
    Scalar(Bson),
    /// A homogeneous array of inner values.
    Array(Vec<FieldValue>),
    /// An inline sub-document with no identity of its own.
    Embedded(Box<Doc>),
    /// A cross-document reference.
    Ref(RefValue),
}

impl FieldValue {
    /// Whether this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// The scalar payload, if this is a scalar value.
    pub fn as_scalar(&self) -> Option<&Bson> {
        match self {
            FieldValue::Scalar(raw) => Some(raw),
            _ => None,
        }
    }

    /// The array payload, if this is an array value.
    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// The embedded document, if this is an embedded value.
    pub fn as_embedded(&self) -> Option<&Doc> {
        match self {
            FieldValue::Embedded(doc) => Some(doc),
            _ => None,
        }
    }

    /// The reference payload, if this is a reference value.
    pub fn as_ref_value(&self) -> Option<&RefValue> {
        match self {
            FieldValue::Ref(reference) => Some(reference),
            _ => None,
        }
    }
}

impl From<Bson> for FieldValue {
    fn from(raw: Bson) -> Self {
        match raw {
            Bson::Null => FieldValue::Null,
            other => FieldValue::Scalar(other),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Scalar(Bson::String(s.to_owned()))
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Scalar(Bson::String(s))
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        FieldValue::Scalar(Bson::Int32(n))
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Scalar(Bson::Int64(n))
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Scalar(Bson::Double(n))
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Scalar(Bson::Boolean(b))
    }
}

impl From<bson::DateTime> for FieldValue {
    fn from(dt: bson::DateTime) -> Self {
        FieldValue::Scalar(Bson::DateTime(dt))
    }
}

impl From<Doc> for FieldValue {
    /// Embedded models become embedded values; document models become
    /// populated references.
    fn from(doc: Doc) -> Self {
        if doc.is_embedded() {
            FieldValue::Embedded(Box::new(doc))
        } else {
            FieldValue::Ref(RefValue::Doc(Box::new(doc)))
        }
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(items: Vec<T>) -> Self {
        FieldValue::Array(items.into_iter().map(Into::into).collect())
    }
}
