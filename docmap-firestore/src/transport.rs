//! REST transport for the cloud store.
//!
//! Speaks the Firestore v1 document API: point reads and writes under
//! `projects/{project}/databases/{db}/documents`, and `:runQuery` for
//! structured queries. An `endpoint` option redirects everything at a local
//! emulator; an `accessToken` option adds bearer auth.

use std::fmt;

use async_trait::async_trait;
use bson::{Bson, Document};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use docmap_core::error::{DbError, DbResult};
use docmap_core::query::{parse_sort, SortDirection};

use crate::codec::{decode_fields, encode_fields};
use crate::query::WhereFilter;

const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com";

fn transport_err(err: reqwest::Error) -> DbError {
    DbError::Backend(err.to_string())
}

/// Connection settings parsed out of the options document.
#[derive(Debug, Clone)]
pub(crate) struct FirestoreConfig {
    pub project_id: String,
    pub database_id: String,
    pub endpoint: String,
    pub access_token: Option<String>,
}

impl FirestoreConfig {
    /// Reads the options document. `projectId` is required; `databaseId`,
    /// `endpoint`, and `accessToken` are optional.
    pub fn from_options(options: &Document) -> DbResult<Self> {
        let project_id = options
            .get_str("projectId")
            .map_err(|_| DbError::Connection("cloud store options need a 'projectId'".into()))?
            .to_owned();
        Ok(FirestoreConfig {
            project_id,
            database_id: options
                .get_str("databaseId")
                .unwrap_or("(default)")
                .to_owned(),
            endpoint: options
                .get_str("endpoint")
                .unwrap_or(DEFAULT_ENDPOINT)
                .trim_end_matches('/')
                .to_owned(),
            access_token: options.get_str("accessToken").ok().map(str::to_owned),
        })
    }
}

/// Operations the store issues against the document API.
///
/// A trait seam between plan execution and HTTP, so the store logic can run
/// against a canned transport.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Fetches one document by id. Absence is `Ok(None)`.
    async fn get_document(&self, collection: &str, id: &str) -> DbResult<Option<Document>>;

    /// Creates a document with a server-assigned id and returns the id.
    async fn create_document(&self, collection: &str, values: &Document) -> DbResult<String>;

    /// Writes a document under a caller-chosen id, replacing any existing
    /// content.
    async fn set_document(&self, collection: &str, id: &str, values: &Document) -> DbResult<()>;

    /// Deletes a document by id. Deleting a missing document succeeds.
    async fn delete_document(&self, collection: &str, id: &str) -> DbResult<()>;

    /// Runs one structured query chain against a collection.
    async fn run_query(
        &self,
        collection: &str,
        chain: &[WhereFilter],
        sort: &[String],
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> DbResult<Vec<Document>>;
}

/// Thin HTTP client over the document API.
#[derive(Debug)]
pub struct FirestoreTransport {
    http: reqwest::Client,
    config: FirestoreConfig,
}

impl FirestoreTransport {
    pub(crate) fn new(config: FirestoreConfig) -> Self {
        debug!(project = config.project_id, "connecting cloud store transport");
        FirestoreTransport { http: reqwest::Client::new(), config }
    }

    /// `projects/{p}/databases/{db}/documents`
    fn parent(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.config.project_id, self.config.database_id
        )
    }

    fn documents_url(&self) -> String {
        format!("{}/v1/{}", self.config.endpoint, self.parent())
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response) -> DbResult<Value> {
        let status = response.status();
        let body: Value = response.json().await.map_err(transport_err)?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(DbError::Backend(format!("cloud store returned {status}: {body}")))
        }
    }

    /// Extracts the document id from a resource name
    /// (`.../documents/{collection}/{id}`).
    fn id_from_name(name: &str) -> String {
        name.rsplit('/').next().unwrap_or(name).to_owned()
    }

    fn into_record(body: &Value) -> DbResult<Document> {
        let mut record = decode_fields(body.get("fields").unwrap_or(&Value::Null))?;
        if let Some(name) = body.get("name").and_then(Value::as_str) {
            record.insert("_id", Bson::String(Self::id_from_name(name)));
        }
        Ok(record)
    }
}

#[async_trait]
impl Transport for FirestoreTransport {
    async fn get_document(&self, collection: &str, id: &str) -> DbResult<Option<Document>> {
        let url = format!("{}/{collection}/{id}", self.documents_url());
        let response = self.request(self.http.get(&url)).send().await.map_err(transport_err)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::check(response).await?;
        Ok(Some(Self::into_record(&body)?))
    }

    async fn create_document(&self, collection: &str, values: &Document) -> DbResult<String> {
        let url = format!("{}/{collection}", self.documents_url());
        let body = json!({ "fields": encode_fields(values)? });
        let response =
            self.request(self.http.post(&url).json(&body)).send().await.map_err(transport_err)?;
        let body = Self::check(response).await?;
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| DbError::Backend("create response carries no name".into()))?;
        Ok(Self::id_from_name(name))
    }

    async fn set_document(&self, collection: &str, id: &str, values: &Document) -> DbResult<()> {
        let url = format!("{}/{collection}/{id}", self.documents_url());
        let body = json!({ "fields": encode_fields(values)? });
        let response =
            self.request(self.http.patch(&url).json(&body)).send().await.map_err(transport_err)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> DbResult<()> {
        let url = format!("{}/{collection}/{id}", self.documents_url());
        let response =
            self.request(self.http.delete(&url)).send().await.map_err(transport_err)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn run_query(
        &self,
        collection: &str,
        chain: &[WhereFilter],
        sort: &[String],
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> DbResult<Vec<Document>> {
        let url = format!("{}/v1/{}:runQuery", self.config.endpoint, self.parent());
        let mut structured = json!({ "from": [{ "collectionId": collection }] });

        if !chain.is_empty() {
            let filters: Vec<Value> = chain
                .iter()
                .map(|filter| {
                    Ok(json!({
                        "fieldFilter": {
                            "field": { "fieldPath": filter.path },
                            "op": filter.op.wire_name(),
                            "value": encode_single(&filter.value)?,
                        }
                    }))
                })
                .collect::<DbResult<_>>()?;
            structured["where"] = json!({
                "compositeFilter": { "op": "AND", "filters": filters }
            });
        }
        if !sort.is_empty() {
            let order_by: Vec<Value> = parse_sort(sort)
                .into_iter()
                .map(|key| {
                    json!({
                        "field": { "fieldPath": key.field },
                        "direction": match key.direction {
                            SortDirection::Asc => "ASCENDING",
                            SortDirection::Desc => "DESCENDING",
                        },
                    })
                })
                .collect();
            structured["orderBy"] = Value::Array(order_by);
        }
        if let Some(skip) = skip {
            structured["offset"] = json!(skip);
        }
        if let Some(limit) = limit {
            structured["limit"] = json!(limit);
        }

        let body = json!({ "structuredQuery": structured });
        let response =
            self.request(self.http.post(&url).json(&body)).send().await.map_err(transport_err)?;
        let body = Self::check(response).await?;

        // runQuery streams an array of results; entries without a document
        // are progress markers.
        let entries = body.as_array().cloned().unwrap_or_default();
        let mut records = Vec::new();
        for entry in &entries {
            if let Some(document) = entry.get("document") {
                records.push(Self::into_record(document)?);
            }
        }
        Ok(records)
    }
}

fn encode_single(value: &Bson) -> DbResult<Value> {
    let wrapped = Document::from_iter([("v".to_owned(), value.clone())]);
    let mut fields = encode_fields(&wrapped)?;
    fields
        .as_object_mut()
        .and_then(|map| map.remove("v"))
        .ok_or_else(|| DbError::Serialization("filter value failed to encode".into()))
}
