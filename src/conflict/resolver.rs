use crate::api::commands::Commands;
use crate::api::{Document, EndpointDescriptor, Etag};
use crate::conflict::listener::ConflictListener;
use crate::error::StoreError;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Resolution {
    Resolved,
    Unresolved,
}

enum ResolveStep {
    FetchCandidates,
    ApplyListeners(Vec<Document>),
    Done(Resolution),
}

/// Drives `Normal -> ConflictDetected -> Resolving -> {Resolved, Unresolved}`
/// for one client instance. The depth counter doubles as the re-entrancy
/// guard: resolution triggered while a resolution (or its post-resolution
/// retry) is in flight is an invariant violation, not something to loop on.
pub(crate) struct ConflictResolver {
    logger: slog::Logger,
    listeners: Vec<Arc<dyn ConflictListener>>,
    depth: AtomicU32,
}

impl ConflictResolver {
    pub(crate) fn new(logger: slog::Logger, listeners: Vec<Arc<dyn ConflictListener>>) -> Self {
        ConflictResolver {
            logger,
            listeners,
            depth: AtomicU32::new(0),
        }
    }

    /// Claims the resolution scope. Callers hold the returned guard across
    /// the whole resolve-then-retry sequence so a second conflict inside it
    /// fails fast instead of recursing.
    pub(crate) fn enter(&self) -> Result<RecursionGuard<'_>, StoreError> {
        if self.depth.fetch_add(1, Ordering::SeqCst) > 0 {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::ConflictResolutionRecursion);
        }
        Ok(RecursionGuard { depth: &self.depth })
    }

    /// One resolution pass for one conflicted document. The caller must
    /// already hold the recursion guard. Fetches the candidate versions in a
    /// single batched read, offers them to each listener in registration
    /// order, and writes the first merge back under the conflicted marker so
    /// a racing third writer fails its own write instead of being silently
    /// overwritten.
    pub(crate) fn resolve<'a>(
        &'a self,
        ops: &'a Commands,
        endpoint: &'a EndpointDescriptor,
        document_id: &'a str,
        etag: Option<&'a Etag>,
        candidate_ids: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Resolution, StoreError>> + Send + 'a>> {
        // Returned as a boxed `dyn Future + Send` rather than an `async fn`:
        // the batched read below checks its own results for conflicts, which
        // can land back here. The recursion guard cuts the loop at runtime;
        // erasing the recursive edge to a `dyn + Send` return type cuts the
        // otherwise-cyclic `Send` inference at compile time.
        Box::pin(async move {
            if self.listeners.is_empty() {
                return Ok(Resolution::Unresolved);
            }

            slog::debug!(
                self.logger,
                "Conflict detected on {}, {} candidate versions",
                document_id,
                candidate_ids.len()
            );

            let mut step = ResolveStep::FetchCandidates;
            loop {
                step = match step {
                    ResolveStep::FetchCandidates => {
                        let loaded = ops.direct_get_many(endpoint, candidate_ids, &[]).await?;
                        let candidates: Vec<Document> =
                            loaded.results.into_iter().flatten().collect();
                        ResolveStep::ApplyListeners(candidates)
                    }
                    ResolveStep::ApplyListeners(candidates) => {
                        let mut outcome = Resolution::Unresolved;
                        for listener in &self.listeners {
                            if let Some(resolved) =
                                listener.try_resolve(document_id, &candidates).await
                            {
                                slog::info!(
                                    self.logger,
                                    "Conflict on {} resolved by listener, writing merged document back",
                                    document_id
                                );
                                ops.direct_put(
                                    endpoint,
                                    document_id,
                                    etag.cloned(),
                                    resolved.data,
                                    resolved.metadata,
                                )
                                .await?;
                                outcome = Resolution::Resolved;
                                break;
                            }
                        }
                        ResolveStep::Done(outcome)
                    }
                    ResolveStep::Done(outcome) => return Ok(outcome),
                };
            }
        })
    }
}

/// Stack-owned slice of the resolution scope; releasing on drop covers every
/// exit path, early returns and `?` included.
pub(crate) struct RecursionGuard<'a> {
    depth: &'a AtomicU32,
}

impl Drop for RecursionGuard<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ConflictResolver {
        ConflictResolver::new(
            slog::Logger::root(slog::Discard, slog::o!()),
            Vec::new(),
        )
    }

    #[test]
    fn nested_entry_is_an_invariant_violation() {
        let resolver = resolver();
        let guard = resolver.enter().unwrap();
        assert!(matches!(
            resolver.enter(),
            Err(StoreError::ConflictResolutionRecursion)
        ));
        drop(guard);
        assert!(resolver.enter().is_ok());
    }

    #[test]
    fn guard_releases_on_drop() {
        let resolver = resolver();
        for _ in 0..3 {
            let guard = resolver.enter().unwrap();
            drop(guard);
        }
    }
}
