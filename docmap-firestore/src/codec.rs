//! BSON to Firestore value mapping.
//!
//! The cloud store's REST surface types every field as a tagged JSON value
//! (`stringValue`, `integerValue`, `mapValue`, ...). This module converts
//! between those and the engine's wire documents. Integers travel as
//! strings per the REST protocol; timestamps as RFC 3339.

use bson::{Bson, Document};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use docmap_core::error::{DbError, DbResult};

/// Encodes a wire document into a Firestore `fields` map.
pub(crate) fn encode_fields(document: &Document) -> DbResult<Value> {
    let mut fields = Map::new();
    for (key, value) in document {
        fields.insert(key.clone(), encode_value(value)?);
    }
    Ok(Value::Object(fields))
}

fn encode_value(value: &Bson) -> DbResult<Value> {
    Ok(match value {
        Bson::Null => json!({ "nullValue": null }),
        Bson::Boolean(b) => json!({ "booleanValue": b }),
        Bson::Int32(n) => json!({ "integerValue": n.to_string() }),
        Bson::Int64(n) => json!({ "integerValue": n.to_string() }),
        Bson::Double(n) => json!({ "doubleValue": n }),
        Bson::String(s) => json!({ "stringValue": s }),
        Bson::DateTime(dt) => {
            let rfc3339 = dt.to_chrono().to_rfc3339_opts(SecondsFormat::Millis, true);
            json!({ "timestampValue": rfc3339 })
        }
        Bson::Array(items) => {
            let values = items.iter().map(encode_value).collect::<DbResult<Vec<_>>>()?;
            json!({ "arrayValue": { "values": values } })
        }
        Bson::Document(inner) => json!({ "mapValue": { "fields": encode_fields(inner)? } }),
        other => {
            return Err(DbError::NotSupported(format!(
                "cloud store cannot encode value: {other}"
            )));
        }
    })
}

/// Decodes a Firestore `fields` map into a wire document.
pub(crate) fn decode_fields(fields: &Value) -> DbResult<Document> {
    let Some(fields) = fields.as_object() else {
        return Ok(Document::new());
    };
    let mut document = Document::new();
    for (key, value) in fields {
        document.insert(key.clone(), decode_value(value)?);
    }
    Ok(document)
}

fn decode_value(value: &Value) -> DbResult<Bson> {
    let Some(tagged) = value.as_object() else {
        return Err(DbError::Serialization(format!("malformed cloud value: {value}")));
    };
    let Some((tag, payload)) = tagged.iter().next() else {
        return Ok(Bson::Null);
    };
    Ok(match tag.as_str() {
        "nullValue" => Bson::Null,
        "booleanValue" => Bson::Boolean(payload.as_bool().unwrap_or_default()),
        "integerValue" => {
            let raw = payload.as_str().map(str::to_owned).unwrap_or_else(|| payload.to_string());
            Bson::Int64(raw.parse().map_err(|_| {
                DbError::Serialization(format!("bad integer value: {raw}"))
            })?)
        }
        "doubleValue" => Bson::Double(payload.as_f64().unwrap_or_default()),
        "stringValue" => Bson::String(payload.as_str().unwrap_or_default().to_owned()),
        "timestampValue" => {
            let raw = payload.as_str().unwrap_or_default();
            let parsed: DateTime<Utc> = raw
                .parse()
                .map_err(|_| DbError::Serialization(format!("bad timestamp: {raw}")))?;
            Bson::DateTime(bson::DateTime::from_chrono(parsed))
        }
        "arrayValue" => {
            let values = payload.get("values").and_then(Value::as_array);
            match values {
                Some(values) => Bson::Array(
                    values.iter().map(decode_value).collect::<DbResult<Vec<_>>>()?,
                ),
                None => Bson::Array(Vec::new()),
            }
        }
        "mapValue" => {
            let fields = payload.get("fields").cloned().unwrap_or(Value::Null);
            Bson::Document(decode_fields(&fields)?)
        }
        other => {
            return Err(DbError::Serialization(format!("unknown cloud value tag: {other}")));
        }
    })
}
