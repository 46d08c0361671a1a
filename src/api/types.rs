use crate::error::StoreError;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use url::Url;

/// Opaque per-revision version marker. The server totally orders these; the
/// client only ever compares them for equality and echoes them back.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Etag(String);

impl Etag {
    pub fn new(value: impl Into<String>) -> Self {
        Etag(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Etag {
    fn from(value: &str) -> Self {
        Etag(value.to_string())
    }
}

#[derive(Clone, Debug)]
pub enum Credentials {
    ApiKey(String),
    Basic { username: String, password: String },
}

/// One concrete server to talk to for one attempt. Produced by the replica
/// directory, immutable while the attempt is in flight.
#[derive(Clone, Debug)]
pub struct EndpointDescriptor {
    pub url: Url,
    pub credentials: Option<Credentials>,
}

impl EndpointDescriptor {
    pub fn new(url: Url, credentials: Option<Credentials>) -> Self {
        EndpointDescriptor { url, credentials }
    }
}

/// A document as the caller sees it: payload and metadata split apart, the
/// transport-level fields lifted out of the metadata blob.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
    pub metadata: Value,
    pub etag: Option<Etag>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Document {
    /// Splits a wire-format result object (payload with an embedded
    /// `@metadata` object) into a `Document`. Returns `None` when the object
    /// carries no identity, e.g. a projection.
    pub(crate) fn from_wire(value: &Value) -> Option<Document> {
        let metadata = value.get("@metadata")?;
        let id = metadata.get("@id")?.as_str()?.to_string();
        let etag = metadata
            .get("@etag")
            .and_then(|v| v.as_str())
            .map(Etag::from);
        let last_modified = metadata
            .get("Last-Modified")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let mut data = value.clone();
        data.as_object_mut()?.remove("@metadata");

        Some(Document {
            id,
            data,
            metadata: metadata.clone(),
            etag,
            last_modified,
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PutResult {
    #[serde(rename = "Key")]
    pub id: String,
    #[serde(rename = "ETag")]
    pub etag: Etag,
}

/// Result of a batched load: one slot per requested id, in request order,
/// `None` where the server had no document.
#[derive(Clone, Debug, Default)]
pub struct MultiLoadResult {
    pub results: Vec<Option<Document>>,
    pub includes: Vec<Document>,
}

#[derive(Clone, Debug, Default)]
pub struct IndexQuery {
    pub query: String,
    pub start: i64,
    pub page_size: Option<i64>,
}

impl IndexQuery {
    pub fn new(query: impl Into<String>) -> Self {
        IndexQuery {
            query: query.into(),
            start: 0,
            page_size: None,
        }
    }

    pub(crate) fn append_to(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        if !self.query.is_empty() {
            pairs.append_pair("query", &self.query);
        }
        pairs.append_pair("start", &self.start.to_string());
        if let Some(page_size) = self.page_size {
            pairs.append_pair("pageSize", &page_size.to_string());
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct QueryResult {
    pub results: Vec<Value>,
    pub includes: Vec<Value>,
    pub total_results: i64,
    pub skipped_results: i64,
    pub is_stale: bool,
    pub index_name: Option<String>,
    pub index_etag: Option<Etag>,
    pub result_etag: Option<Etag>,
}

/// Freshness metadata carried in the response headers of a streamed query,
/// available before any of the body has been consumed.
#[derive(Clone, Debug)]
pub struct QueryHeaderInfo {
    pub index: String,
    pub index_timestamp: DateTime<FixedOffset>,
    pub index_etag: Etag,
    pub result_etag: Etag,
    pub is_stale: bool,
    pub total_results: i64,
}

impl QueryHeaderInfo {
    pub(crate) fn parse(headers: &[(String, String)]) -> Result<QueryHeaderInfo, StoreError> {
        let index_timestamp = required_header(headers, "Raven-Index-Timestamp")?;
        let index_timestamp = DateTime::parse_from_rfc3339(index_timestamp).map_err(|e| {
            StoreError::Protocol(format!("malformed Raven-Index-Timestamp header: {}", e))
        })?;
        let is_stale = required_header(headers, "Raven-Is-Stale")?
            .to_ascii_lowercase()
            .parse::<bool>()
            .map_err(|e| StoreError::Protocol(format!("malformed Raven-Is-Stale header: {}", e)))?;
        let total_results = required_header(headers, "Raven-Total-Results")?
            .parse::<i64>()
            .map_err(|e| {
                StoreError::Protocol(format!("malformed Raven-Total-Results header: {}", e))
            })?;

        Ok(QueryHeaderInfo {
            index: required_header(headers, "Raven-Index")?.to_string(),
            index_timestamp,
            index_etag: Etag::from(required_header(headers, "Raven-Index-Etag")?),
            result_etag: Etag::from(required_header(headers, "Raven-Result-Etag")?),
            is_stale,
            total_results,
        })
    }
}

fn required_header<'a>(headers: &'a [(String, String)], name: &str) -> Result<&'a str, StoreError> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| StoreError::Protocol(format!("missing response header: {}", name)))
}

/// Caller-owned paging state for document streams. The cursor records the
/// server's continuation token here when it reads the stream trailer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PagingInformation {
    pub start: i64,
    pub page_size: i64,
    pub next_page_start: Option<i64>,
}

impl PagingInformation {
    pub(crate) fn fill(&mut self, start: i64, page_size: i64, next_page_start: i64) {
        self.start = start;
        self.page_size = page_size;
        self.next_page_start = Some(next_page_start);
    }

    /// True when this state was filled by a previous page of the same scan,
    /// meaning the recorded continuation token supersedes `start`.
    pub(crate) fn is_for_previous_page(&self, start: i64, page_size: i64) -> bool {
        self.next_page_start.is_some() && self.start == start && self.page_size == page_size
    }
}

#[derive(Clone, Debug, Default)]
pub struct StreamDocsOptions {
    pub from_etag: Option<Etag>,
    pub starts_with: Option<String>,
    pub matches: Option<String>,
    pub exclude: Option<String>,
    pub skip_after: Option<String>,
    pub start: i64,
    pub page_size: Option<i64>,
}
