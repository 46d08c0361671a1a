use crate::api::Credentials;
use crate::error::TransportError;
use crate::transport::types::{
    BodyStream, StreamedResponse, Transport, TransportRequest, TransportResponse, Verb,
};
use bytes::Bytes;
use tokio::time::Duration;

/// Default `Transport` over a shared reqwest client. One instance per client
/// (or shared between clients) so the connection pool is reused.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Initialization(e.to_string()))?;
        Ok(HttpTransport { client })
    }

    fn build(&self, request: &TransportRequest) -> reqwest::RequestBuilder {
        let method = match request.method {
            Verb::Get => reqwest::Method::GET,
            Verb::Head => reqwest::Method::HEAD,
            Verb::Post => reqwest::Method::POST,
            Verb::Put => reqwest::Method::PUT,
            Verb::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        match &request.credentials {
            Some(Credentials::ApiKey(key)) => {
                builder = builder.bearer_auth(key);
            }
            Some(Credentials::Basic { username, password }) => {
                builder = builder.basic_auth(username, Some(password));
            }
            None => {}
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }
        builder
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let url = request.url.clone();
        let response = self
            .build(&request)
            .send()
            .await
            .map_err(|e| map_error(&url, e))?;

        let status = response.status().as_u16();
        let headers = collect_headers(&response);
        let body = response.bytes().await.map_err(|e| map_error(&url, e))?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }

    async fn open_stream(
        &self,
        request: TransportRequest,
    ) -> Result<StreamedResponse, TransportError> {
        let url = request.url.clone();
        let response = self
            .build(&request)
            .send()
            .await
            .map_err(|e| map_error(&url, e))?;

        let status = response.status().as_u16();
        let headers = collect_headers(&response);

        Ok(StreamedResponse {
            status,
            headers,
            body: Box::new(ReqwestBody {
                url: url.to_string(),
                response,
            }),
        })
    }
}

struct ReqwestBody {
    url: String,
    response: reqwest::Response,
}

#[async_trait::async_trait]
impl BodyStream for ReqwestBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.response.chunk().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    url: self.url.clone(),
                }
            } else {
                TransportError::Io {
                    url: self.url.clone(),
                    message: e.to_string(),
                }
            }
        })
    }
}

fn collect_headers(response: &reqwest::Response) -> Vec<(String, String)> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn map_error(url: &url::Url, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else if e.is_connect() {
        TransportError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else {
        TransportError::Io {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}
