use crate::api::commands::Commands;
use crate::api::types::{
    Document, EndpointDescriptor, Etag, IndexQuery, MultiLoadResult, PagingInformation, PutResult,
    QueryHeaderInfo, QueryResult, StreamDocsOptions,
};
use crate::dispatch::OperationDispatcher;
use crate::error::StoreError;
use crate::stream::StreamCursor;
use crate::transport::Verb;
use serde_json::Value;
use std::sync::Arc;

/// Replication-aware client for one database. Cheap to clone; clones share
/// the dispatcher, conflict resolver, and transport.
///
/// Every operation goes through the dispatcher: a striped replica is picked
/// for reads, transient failures walk the replica list, and the endpoint
/// that finally answers also handles any conflict fallout, so callers only
/// see clean results or typed errors.
#[derive(Clone)]
pub struct StoreClient {
    inner: Arc<ClientInner>,
    force_primary: bool,
}

pub(crate) struct ClientInner {
    pub(crate) dispatcher: OperationDispatcher,
    pub(crate) commands: Commands,
    pub(crate) primary: EndpointDescriptor,
}

impl StoreClient {
    pub(crate) fn new(
        dispatcher: OperationDispatcher,
        commands: Commands,
        primary: EndpointDescriptor,
    ) -> Self {
        StoreClient {
            inner: Arc::new(ClientInner {
                dispatcher,
                commands,
                primary,
            }),
            force_primary: false,
        }
    }

    /// A handle whose operations always start at the primary, read striping
    /// disabled. Use it for read-your-own-writes sequences; the override is
    /// scoped to the returned handle.
    pub fn force_primary(&self) -> StoreClient {
        StoreClient {
            inner: Arc::clone(&self.inner),
            force_primary: true,
        }
    }

    /// Loads one document. Missing documents are `None`; an unresolvable
    /// replication conflict is a `StoreError::Conflict`.
    pub async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        self.inner
            .dispatcher
            .execute(Verb::Get, self.force_primary, move |endpoint| {
                let inner = Arc::clone(&inner);
                let id = id.clone();
                async move { inner.commands.direct_get(&endpoint, &id).await }
            })
            .await
    }

    /// Loads several documents in one round trip, plus any documents they
    /// reference through the listed include paths.
    pub async fn get_many(
        &self,
        ids: &[String],
        includes: &[String],
    ) -> Result<MultiLoadResult, StoreError> {
        let inner = Arc::clone(&self.inner);
        let ids = ids.to_vec();
        let includes = includes.to_vec();
        self.inner
            .dispatcher
            .execute(Verb::Get, self.force_primary, move |endpoint| {
                let inner = Arc::clone(&inner);
                let ids = ids.clone();
                let includes = includes.clone();
                async move { inner.commands.direct_get_many(&endpoint, &ids, &includes).await }
            })
            .await
    }

    /// Writes a document. `expected_etag` of `None` overwrites
    /// unconditionally; otherwise a stale marker surfaces as
    /// `StoreError::Concurrency` carrying both markers.
    pub async fn put(
        &self,
        id: &str,
        expected_etag: Option<&Etag>,
        data: Value,
        metadata: Value,
    ) -> Result<PutResult, StoreError> {
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        let expected_etag = expected_etag.cloned();
        self.inner
            .dispatcher
            .execute(Verb::Put, self.force_primary, move |endpoint| {
                let inner = Arc::clone(&inner);
                let id = id.clone();
                let expected_etag = expected_etag.clone();
                let data = data.clone();
                let metadata = metadata.clone();
                async move {
                    inner
                        .commands
                        .direct_put(&endpoint, &id, expected_etag, data, metadata)
                        .await
                }
            })
            .await
    }

    /// Deletes a document, with the same optimistic-concurrency semantics as
    /// `put`. Deleting a missing document succeeds.
    pub async fn delete(&self, id: &str, expected_etag: Option<&Etag>) -> Result<(), StoreError> {
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        let expected_etag = expected_etag.cloned();
        self.inner
            .dispatcher
            .execute(Verb::Delete, self.force_primary, move |endpoint| {
                let inner = Arc::clone(&inner);
                let id = id.clone();
                let expected_etag = expected_etag.clone();
                async move {
                    inner
                        .commands
                        .direct_delete(&endpoint, &id, expected_etag)
                        .await
                }
            })
            .await
    }

    pub async fn query(&self, index: &str, query: &IndexQuery) -> Result<QueryResult, StoreError> {
        let inner = Arc::clone(&self.inner);
        let index = index.to_string();
        let query = query.clone();
        self.inner
            .dispatcher
            .execute(Verb::Get, self.force_primary, move |endpoint| {
                let inner = Arc::clone(&inner);
                let index = index.clone();
                let query = query.clone();
                async move { inner.commands.direct_query(&endpoint, &index, &query).await }
            })
            .await
    }

    /// Loads documents whose ids share a prefix.
    pub async fn starts_with(
        &self,
        prefix: &str,
        matches: Option<&str>,
        start: i64,
        page_size: Option<i64>,
    ) -> Result<Vec<Document>, StoreError> {
        let inner = Arc::clone(&self.inner);
        let prefix = prefix.to_string();
        let matches = matches.map(str::to_string);
        self.inner
            .dispatcher
            .execute(Verb::Get, self.force_primary, move |endpoint| {
                let inner = Arc::clone(&inner);
                let prefix = prefix.clone();
                let matches = matches.clone();
                async move {
                    inner
                        .commands
                        .direct_starts_with(&endpoint, &prefix, matches.as_deref(), start, page_size)
                        .await
                }
            })
            .await
    }

    /// Opens a forward-only stream over an index query. The freshness
    /// headers are available immediately; the cursor lazily parses the body.
    pub async fn stream_query(
        &self,
        index: &str,
        query: &IndexQuery,
    ) -> Result<(QueryHeaderInfo, StreamCursor<'static>), StoreError> {
        let inner = Arc::clone(&self.inner);
        let index = index.to_string();
        let query = query.clone();
        self.inner
            .dispatcher
            .execute(Verb::Get, self.force_primary, move |endpoint| {
                let inner = Arc::clone(&inner);
                let index = index.clone();
                let query = query.clone();
                async move {
                    inner
                        .commands
                        .direct_stream_query(&endpoint, &index, &query)
                        .await
                }
            })
            .await
    }

    /// Opens a forward-only stream over whole documents. When `paging` holds
    /// the state filled by a previous page of the same scan, the stream
    /// resumes from the recorded continuation token; the token of this page
    /// is recorded back into it when the cursor drains.
    pub async fn stream_docs<'p>(
        &self,
        options: &StreamDocsOptions,
        paging: Option<&'p mut PagingInformation>,
    ) -> Result<StreamCursor<'p>, StoreError> {
        if options.from_etag.is_some() && options.starts_with.is_some() {
            return Err(StoreError::InvalidConfig(
                "from_etag and starts_with are mutually exclusive".to_string(),
            ));
        }

        let effective_page_size = options.page_size.unwrap_or(0);
        let actual_start = match &paging {
            Some(p) if p.is_for_previous_page(options.start, effective_page_size) => {
                p.next_page_start.unwrap_or(options.start)
            }
            _ => options.start,
        };

        let cursor = if options.from_etag.is_some() {
            // Etags are node-specific; an etag-based scan cannot fail over
            // to a replica whose etag sequence is unrelated.
            self.inner
                .commands
                .direct_stream_docs(&self.inner.primary, options, actual_start)
                .await?
        } else {
            let inner = Arc::clone(&self.inner);
            let options = options.clone();
            self.inner
                .dispatcher
                .execute(Verb::Get, self.force_primary, move |endpoint| {
                    let inner = Arc::clone(&inner);
                    let options = options.clone();
                    async move {
                        inner
                            .commands
                            .direct_stream_docs(&endpoint, &options, actual_start)
                            .await
                    }
                })
                .await?
        };

        Ok(cursor.with_paging(paging))
    }
}
