use crate::api::Credentials;
use crate::error::{StoreError, TransportError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use url::Url;

/// HTTP-verb-like tag. The dispatcher only looks at `is_read` to decide
/// failover eligibility; the transport maps it onto the wire method.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verb {
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn is_read(self) -> bool {
        matches!(self, Verb::Get | Verb::Head)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Head => "HEAD",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Verb,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub credentials: Option<Credentials>,
}

impl TransportRequest {
    pub fn new(method: Verb, url: Url) -> Self {
        TransportRequest {
            method,
            url,
            headers: Vec::new(),
            body: None,
            credentials: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }
}

/// A fully buffered response. Large result sets go through `open_stream` and
/// `BodyStream` instead.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| StoreError::Protocol(format!("malformed response body: {}", e)))
    }
}

pub struct StreamedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Box<dyn BodyStream>,
}

/// Forward-only chunk source backing a stream cursor. `None` means the body
/// is exhausted; implementations must keep returning `None` afterwards.
#[async_trait::async_trait]
pub trait BodyStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// The wire boundary. Connection pooling, compression, and timeouts live
/// behind this trait; everything above it reasons about whole requests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;

    async fn open_stream(
        &self,
        request: TransportRequest,
    ) -> Result<StreamedResponse, TransportError>;
}
