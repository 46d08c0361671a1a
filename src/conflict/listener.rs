use crate::api::Document;

/// Caller-supplied merge strategy for divergent document versions.
/// Listeners run in registration order; the first one to return a merged
/// document wins and the merge is written back to the server.
#[async_trait::async_trait]
pub trait ConflictListener: Send + Sync {
    /// Returns the merged document, or `None` when this listener cannot
    /// resolve the given candidates.
    async fn try_resolve(&self, document_id: &str, candidates: &[Document]) -> Option<Document>;
}
