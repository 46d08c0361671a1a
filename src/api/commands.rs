use crate::api::types::{
    Document, EndpointDescriptor, Etag, IndexQuery, MultiLoadResult, PutResult, QueryHeaderInfo,
    QueryResult, StreamDocsOptions,
};
use crate::concurrency::concurrency_violation;
use crate::conflict::{
    conflict_ids_from_body, embedded_conflict, replication_conflict_id, ConflictResolver,
    Resolution,
};
use crate::error::StoreError;
use crate::stream::StreamCursor;
use crate::transport::{
    parse_auth_token, server_error, Transport, TransportRequest, TransportResponse, Verb,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use url::Url;

#[derive(Deserialize)]
struct MultiLoadPayload {
    #[serde(rename = "Results")]
    results: Vec<Value>,
    #[serde(rename = "Includes", default)]
    includes: Vec<Value>,
}

#[derive(Deserialize)]
struct QueryPayload {
    #[serde(rename = "Results")]
    results: Vec<Value>,
    #[serde(rename = "Includes", default)]
    includes: Vec<Value>,
    #[serde(rename = "TotalResults", default)]
    total_results: i64,
    #[serde(rename = "SkippedResults", default)]
    skipped_results: i64,
    #[serde(rename = "IsStale", default)]
    is_stale: bool,
    #[serde(rename = "IndexName", default)]
    index_name: Option<String>,
    #[serde(rename = "IndexEtag", default)]
    index_etag: Option<Etag>,
    #[serde(rename = "ResultEtag", default)]
    result_etag: Option<Etag>,
}

/// The per-endpoint half of every operation: builds the request, executes it
/// through the transport, and routes failure responses into the error
/// taxonomy. Conflict handling lives here because a conflicted response has
/// to be resolved against the same endpoint that produced it; failover is
/// the dispatcher's job, one layer up.
pub(crate) struct Commands {
    pub(crate) logger: slog::Logger,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) resolver: ConflictResolver,
}

impl Commands {
    pub(crate) async fn direct_get(
        &self,
        endpoint: &EndpointDescriptor,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let response = self.fetch_document(endpoint, id).await?;
        match response.status {
            409 => {
                let candidate_ids = conflict_ids_from_body(&response.body)?;
                let etag = response.header("ETag").map(Etag::from);

                let _guard = self.resolver.enter()?;
                match self
                    .resolver
                    .resolve(self, endpoint, id, etag.as_ref(), &candidate_ids)
                    .await?
                {
                    Resolution::Resolved => {
                        // Re-read once with the guard still held; the merged
                        // document must come back clean or something is
                        // feeding conflicts faster than we can resolve them.
                        let response = self.fetch_document(endpoint, id).await?;
                        if response.status == 409 {
                            return Err(StoreError::ConflictResolutionRecursion);
                        }
                        self.parse_document_response(response, id)
                    }
                    Resolution::Unresolved => Err(StoreError::Conflict {
                        document_id: id.to_string(),
                        candidate_version_ids: candidate_ids,
                        etag,
                    }),
                }
            }
            _ => self.parse_document_response(response, id),
        }
    }

    async fn fetch_document(
        &self,
        endpoint: &EndpointDescriptor,
        id: &str,
    ) -> Result<TransportResponse, StoreError> {
        let mut url = join(endpoint, &["docs"]);
        url.query_pairs_mut().append_pair("id", id);
        let request =
            TransportRequest::new(Verb::Get, url).with_credentials(endpoint.credentials.clone());
        Ok(self.transport.execute(request).await?)
    }

    fn parse_document_response(
        &self,
        response: TransportResponse,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        match response.status {
            404 => Ok(None),
            status if (200..300).contains(&status) => {
                let value: Value = response.json()?;
                let document = Document::from_wire(&value).unwrap_or_else(|| Document {
                    id: id.to_string(),
                    data: value,
                    metadata: Value::Object(Default::default()),
                    etag: response.header("ETag").map(Etag::from),
                    last_modified: None,
                });
                Ok(Some(document))
            }
            _ => Err(server_error(&response)),
        }
    }

    pub(crate) async fn direct_get_many(
        &self,
        endpoint: &EndpointDescriptor,
        ids: &[String],
        includes: &[String],
    ) -> Result<MultiLoadResult, StoreError> {
        let payload = self.multi_load_once(endpoint, ids, includes).await?;
        let documents = collect_documents(&payload.results, &payload.includes);

        let payload = if self.check_documents(endpoint, &documents, false).await? {
            // Something was resolved; re-issue the whole load against the
            // same endpoint so the caller never sees a half-resolved set. A
            // conflict surviving the retry trips the recursion guard inside
            // the check.
            let _guard = self.resolver.enter()?;
            let retried = self.multi_load_once(endpoint, ids, includes).await?;
            let documents = collect_documents(&retried.results, &retried.includes);
            self.check_documents(endpoint, &documents, false).await?;
            retried
        } else {
            payload
        };

        Ok(project_multi_load(ids, payload))
    }

    async fn multi_load_once(
        &self,
        endpoint: &EndpointDescriptor,
        ids: &[String],
        includes: &[String],
    ) -> Result<MultiLoadPayload, StoreError> {
        let mut url = join(endpoint, &["queries"]);
        for include in includes {
            url.query_pairs_mut().append_pair("include", include);
        }
        let body = serde_json::to_vec(ids)
            .map_err(|e| StoreError::Protocol(format!("could not encode id list: {}", e)))?;

        // Logical GET even though the wire request is a POST; the id list
        // does not fit in a query string.
        let request = TransportRequest::new(Verb::Post, url)
            .with_body(body.into())
            .with_credentials(endpoint.credentials.clone());
        let response = self.transport.execute(request).await?;

        if response.status == 409 {
            return Err(concurrency_violation(&response.body));
        }
        if !response.is_success() {
            return Err(server_error(&response));
        }
        response.json::<MultiLoadPayload>()
    }

    pub(crate) async fn direct_put(
        &self,
        endpoint: &EndpointDescriptor,
        id: &str,
        expected_etag: Option<Etag>,
        data: Value,
        metadata: Value,
    ) -> Result<PutResult, StoreError> {
        let url = join(endpoint, &["docs", id]);
        let body = serde_json::to_vec(&data)
            .map_err(|e| StoreError::Protocol(format!("could not encode document: {}", e)))?;

        let mut request = TransportRequest::new(Verb::Put, url)
            .with_body(body.into())
            .with_credentials(endpoint.credentials.clone());
        if let Some(etag) = &expected_etag {
            request = request.with_header("If-Match", etag.as_str());
        }
        if let Some(metadata) = metadata.as_object() {
            for (name, value) in metadata {
                if name.starts_with('@') {
                    continue;
                }
                let value = match value.as_str() {
                    Some(s) => s.to_string(),
                    None => value.to_string(),
                };
                request = request.with_header(name.clone(), value);
            }
        }

        let response = self.transport.execute(request).await?;
        if response.status == 409 {
            return Err(concurrency_violation(&response.body));
        }
        if !response.is_success() {
            return Err(server_error(&response));
        }
        response.json::<PutResult>()
    }

    pub(crate) async fn direct_delete(
        &self,
        endpoint: &EndpointDescriptor,
        id: &str,
        expected_etag: Option<Etag>,
    ) -> Result<(), StoreError> {
        let url = join(endpoint, &["docs", id]);
        let mut request =
            TransportRequest::new(Verb::Delete, url).with_credentials(endpoint.credentials.clone());
        if let Some(etag) = &expected_etag {
            request = request.with_header("If-Match", etag.as_str());
        }

        let response = self.transport.execute(request).await?;
        match response.status {
            409 => Err(concurrency_violation(&response.body)),
            // Deleting what is not there is absence, not failure.
            404 => Ok(()),
            status if (200..300).contains(&status) => Ok(()),
            _ => Err(server_error(&response)),
        }
    }

    pub(crate) async fn direct_query(
        &self,
        endpoint: &EndpointDescriptor,
        index: &str,
        query: &IndexQuery,
    ) -> Result<QueryResult, StoreError> {
        let payload = self.query_once(endpoint, index, query).await?;
        let documents = collect_documents(&payload.results, &payload.includes);

        let payload = if self.check_documents(endpoint, &documents, true).await? {
            let _guard = self.resolver.enter()?;
            let retried = self.query_once(endpoint, index, query).await?;
            let documents = collect_documents(&retried.results, &retried.includes);
            self.check_documents(endpoint, &documents, true).await?;
            retried
        } else {
            payload
        };

        Ok(QueryResult {
            results: payload.results,
            includes: payload.includes,
            total_results: payload.total_results,
            skipped_results: payload.skipped_results,
            is_stale: payload.is_stale,
            index_name: payload.index_name,
            index_etag: payload.index_etag,
            result_etag: payload.result_etag,
        })
    }

    async fn query_once(
        &self,
        endpoint: &EndpointDescriptor,
        index: &str,
        query: &IndexQuery,
    ) -> Result<QueryPayload, StoreError> {
        let mut url = join(endpoint, &["indexes", index]);
        query.append_to(&mut url);
        let request =
            TransportRequest::new(Verb::Get, url).with_credentials(endpoint.credentials.clone());
        let response = self.transport.execute(request).await?;

        if response.status == 409 {
            return Err(concurrency_violation(&response.body));
        }
        if !response.is_success() {
            return Err(server_error(&response));
        }
        response.json::<QueryPayload>()
    }

    pub(crate) async fn direct_starts_with(
        &self,
        endpoint: &EndpointDescriptor,
        prefix: &str,
        matches: Option<&str>,
        start: i64,
        page_size: Option<i64>,
    ) -> Result<Vec<Document>, StoreError> {
        let results = self
            .starts_with_once(endpoint, prefix, matches, start, page_size)
            .await?;

        let results = if self.check_documents(endpoint, &results, true).await? {
            let _guard = self.resolver.enter()?;
            let retried = self
                .starts_with_once(endpoint, prefix, matches, start, page_size)
                .await?;
            self.check_documents(endpoint, &retried, true).await?;
            retried
        } else {
            results
        };

        Ok(results.iter().filter_map(Document::from_wire).collect())
    }

    async fn starts_with_once(
        &self,
        endpoint: &EndpointDescriptor,
        prefix: &str,
        matches: Option<&str>,
        start: i64,
        page_size: Option<i64>,
    ) -> Result<Vec<Value>, StoreError> {
        let mut url = join(endpoint, &["docs"]);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("startsWith", prefix);
            if let Some(matches) = matches {
                pairs.append_pair("matches", matches);
            }
            pairs.append_pair("start", &start.to_string());
            if let Some(page_size) = page_size {
                pairs.append_pair("pageSize", &page_size.to_string());
            }
        }
        let request =
            TransportRequest::new(Verb::Get, url).with_credentials(endpoint.credentials.clone());
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(server_error(&response));
        }
        response.json::<Vec<Value>>()
    }

    pub(crate) async fn direct_stream_query(
        &self,
        endpoint: &EndpointDescriptor,
        index: &str,
        query: &IndexQuery,
    ) -> Result<(QueryHeaderInfo, StreamCursor<'static>), StoreError> {
        let token = self.single_auth_token(endpoint).await?;

        let mut url = join(endpoint, &["streams", "query", index]);
        query.append_to(&mut url);
        let request = TransportRequest::new(Verb::Get, url)
            .with_header("Single-Use-Auth-Token", token)
            .with_credentials(endpoint.credentials.clone());

        let streamed = self.transport.open_stream(request).await?;
        if !(200..300).contains(&streamed.status) {
            return Err(StoreError::Server {
                status: streamed.status,
                message: "streamed query request failed".to_string(),
            });
        }

        let header_info = QueryHeaderInfo::parse(&streamed.headers)?;
        Ok((header_info, StreamCursor::new(streamed.body, 0, 0, None)))
    }

    pub(crate) async fn direct_stream_docs(
        &self,
        endpoint: &EndpointDescriptor,
        options: &StreamDocsOptions,
        actual_start: i64,
    ) -> Result<StreamCursor<'static>, StoreError> {
        let token = self.single_auth_token(endpoint).await?;

        let mut url = join(endpoint, &["streams", "docs"]);
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(etag) = &options.from_etag {
                pairs.append_pair("etag", etag.as_str());
            }
            if let Some(starts_with) = &options.starts_with {
                pairs.append_pair("startsWith", starts_with);
            }
            if let Some(matches) = &options.matches {
                pairs.append_pair("matches", matches);
            }
            if let Some(exclude) = &options.exclude {
                pairs.append_pair("exclude", exclude);
            }
            if let Some(skip_after) = &options.skip_after {
                pairs.append_pair("skipAfter", skip_after);
            }
            pairs.append_pair("start", &actual_start.to_string());
            if let Some(page_size) = options.page_size {
                pairs.append_pair("pageSize", &page_size.to_string());
            }
        }
        let request = TransportRequest::new(Verb::Get, url)
            .with_header("Single-Use-Auth-Token", token)
            .with_credentials(endpoint.credentials.clone());

        let streamed = self.transport.open_stream(request).await?;
        if !(200..300).contains(&streamed.status) {
            return Err(StoreError::Server {
                status: streamed.status,
                message: "streamed docs request failed".to_string(),
            });
        }

        Ok(StreamCursor::new(
            streamed.body,
            options.start,
            options.page_size.unwrap_or(0),
            None,
        ))
    }

    /// Streams authenticate with a short-lived token instead of the regular
    /// credentials, so the long-lived response cannot replay them.
    async fn single_auth_token(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> Result<String, StoreError> {
        let url = join(endpoint, &["singleAuthToken"]);
        let request =
            TransportRequest::new(Verb::Get, url).with_credentials(endpoint.credentials.clone());
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(server_error(&response));
        }
        parse_auth_token(&response)
    }

    async fn check_documents(
        &self,
        endpoint: &EndpointDescriptor,
        documents: &[Value],
        query_path: bool,
    ) -> Result<bool, StoreError> {
        let mut requires_retry = false;
        for document in documents {
            requires_retry |= self
                .assert_non_conflicted(endpoint, document, query_path)
                .await?;
        }
        Ok(requires_retry)
    }

    /// One document out of a multi-document result. Returns true when the
    /// document was conflicted and a listener resolved it, meaning the whole
    /// operation has to be re-issued.
    async fn assert_non_conflicted(
        &self,
        endpoint: &EndpointDescriptor,
        document: &Value,
        query_path: bool,
    ) -> Result<bool, StoreError> {
        if let Some(conflict) = embedded_conflict(document)? {
            let _guard = self.resolver.enter()?;
            return match self
                .resolver
                .resolve(
                    self,
                    endpoint,
                    &conflict.document_id,
                    conflict.etag.as_ref(),
                    &conflict.candidate_version_ids,
                )
                .await?
            {
                Resolution::Resolved => Ok(true),
                Resolution::Unresolved => Err(StoreError::Conflict {
                    document_id: conflict.document_id,
                    candidate_version_ids: conflict.candidate_version_ids,
                    etag: conflict.etag,
                }),
            };
        }

        if query_path {
            if let Some(conflicted_id) = replication_conflict_id(document) {
                slog::debug!(
                    self.logger,
                    "Query returned still-conflicted document {}",
                    conflicted_id
                );
                return Err(StoreError::Conflict {
                    document_id: conflicted_id.clone(),
                    candidate_version_ids: vec![conflicted_id],
                    etag: None,
                });
            }
        }

        Ok(false)
    }
}

fn collect_documents(results: &[Value], includes: &[Value]) -> Vec<Value> {
    results
        .iter()
        .chain(includes.iter())
        .filter(|v| !v.is_null())
        .cloned()
        .collect()
}

/// Requested-id to result-slot projection. Results are matched by document
/// id (case-insensitive); when the server hands back at least as many
/// results as unique requested ids, unmatched ids fall back to their
/// positional slot, which tolerates responses that renamed or dropped ids.
fn project_multi_load(ids: &[String], payload: MultiLoadPayload) -> MultiLoadResult {
    let mut unique: Vec<&String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for id in ids {
        if seen.insert(id.to_lowercase()) {
            unique.push(id);
        }
    }

    let mut by_id: HashMap<String, Value> = HashMap::new();
    for result in &payload.results {
        let id = result
            .get("@metadata")
            .and_then(|m| m.get("@id"))
            .and_then(|v| v.as_str());
        if let Some(id) = id {
            by_id.entry(id.to_lowercase()).or_insert_with(|| result.clone());
        }
    }

    if payload.results.len() >= unique.len() {
        for (i, id) in unique.iter().enumerate() {
            by_id
                .entry(id.to_lowercase())
                .or_insert_with(|| payload.results[i].clone());
        }
    }

    let results = ids
        .iter()
        .map(|id| {
            by_id
                .get(&id.to_lowercase())
                .and_then(|value| document_for(id, value))
        })
        .collect();

    let includes = payload
        .includes
        .iter()
        .filter_map(Document::from_wire)
        .collect();

    MultiLoadResult { results, includes }
}

fn document_for(id: &str, value: &Value) -> Option<Document> {
    if value.is_null() {
        return None;
    }
    Document::from_wire(value).or_else(|| {
        Some(Document {
            id: id.to_string(),
            data: value.clone(),
            metadata: value
                .get("@metadata")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default())),
            etag: None,
            last_modified: None,
        })
    })
}

fn join(endpoint: &EndpointDescriptor, segments: &[&str]) -> Url {
    let mut url = endpoint.url.clone();
    url.path_segments_mut()
        .expect("endpoint url is a valid base url")
        .pop_if_empty()
        .extend(segments);
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint(url: &str) -> EndpointDescriptor {
        EndpointDescriptor::new(Url::parse(url).unwrap(), None)
    }

    fn wire_doc(id: &str, body: Value) -> Value {
        let mut doc = body;
        doc.as_object_mut()
            .unwrap()
            .insert("@metadata".to_string(), json!({ "@id": id }));
        doc
    }

    #[test]
    fn join_escapes_path_segments() {
        let url = join(&endpoint("http://primary:8080"), &["docs", "users/1"]);
        assert_eq!(url.as_str(), "http://primary:8080/docs/users%2F1");
    }

    #[test]
    fn join_keeps_existing_base_path() {
        let url = join(&endpoint("http://primary:8080/databases/north/"), &["docs"]);
        assert_eq!(url.as_str(), "http://primary:8080/databases/north/docs");
    }

    #[test]
    fn multi_load_matches_results_by_id() {
        let payload = MultiLoadPayload {
            results: vec![
                wire_doc("docs/2", json!({"n": 2})),
                wire_doc("docs/1", json!({"n": 1})),
            ],
            includes: vec![],
        };
        let ids = vec!["docs/1".to_string(), "docs/2".to_string()];

        let loaded = project_multi_load(&ids, payload);
        assert_eq!(loaded.results[0].as_ref().unwrap().data, json!({"n": 1}));
        assert_eq!(loaded.results[1].as_ref().unwrap().data, json!({"n": 2}));
    }

    #[test]
    fn multi_load_id_matching_is_case_insensitive() {
        let payload = MultiLoadPayload {
            results: vec![wire_doc("Docs/1", json!({"n": 1}))],
            includes: vec![],
        };
        let ids = vec!["docs/1".to_string()];

        let loaded = project_multi_load(&ids, payload);
        assert!(loaded.results[0].is_some());
    }

    #[test]
    fn multi_load_missing_documents_stay_none() {
        let payload = MultiLoadPayload {
            results: vec![wire_doc("docs/1", json!({"n": 1}))],
            includes: vec![],
        };
        let ids = vec!["docs/1".to_string(), "docs/404".to_string()];

        let loaded = project_multi_load(&ids, payload);
        assert!(loaded.results[0].is_some());
        assert!(loaded.results[1].is_none());
    }

    #[test]
    fn multi_load_falls_back_to_positional_matching() {
        // Results without usable ids, but arity matches the request: assume
        // the server answered in request order.
        let payload = MultiLoadPayload {
            results: vec![json!({"n": 1}), json!({"n": 2})],
            includes: vec![],
        };
        let ids = vec!["docs/1".to_string(), "docs/2".to_string()];

        let loaded = project_multi_load(&ids, payload);
        let first = loaded.results[0].as_ref().unwrap();
        assert_eq!(first.id, "docs/1");
        assert_eq!(first.data, json!({"n": 1}));
        let second = loaded.results[1].as_ref().unwrap();
        assert_eq!(second.id, "docs/2");
    }

    #[test]
    fn multi_load_short_response_does_not_fall_back() {
        let payload = MultiLoadPayload {
            results: vec![json!({"n": 1})],
            includes: vec![],
        };
        let ids = vec!["docs/1".to_string(), "docs/2".to_string()];

        let loaded = project_multi_load(&ids, payload);
        assert!(loaded.results[0].is_none());
        assert!(loaded.results[1].is_none());
    }

    #[test]
    fn multi_load_duplicate_ids_share_a_document() {
        let payload = MultiLoadPayload {
            results: vec![wire_doc("docs/1", json!({"n": 1}))],
            includes: vec![],
        };
        let ids = vec!["docs/1".to_string(), "docs/1".to_string()];

        let loaded = project_multi_load(&ids, payload);
        assert!(loaded.results[0].is_some());
        assert_eq!(loaded.results[0], loaded.results[1]);
    }
}
