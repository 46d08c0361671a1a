use crate::api::{EndpointDescriptor, FailoverPolicy};
use crate::directory::{Outcome, ReplicaDirectory};
use crate::dispatch::striping::striped_start_index;
use crate::error::StoreError;
use crate::transport::Verb;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Runs one logical operation against the cluster: asks the directory for
/// candidates, picks a striped starting replica for reads, walks the list
/// sequentially on retryable failures, and reports every attempt's outcome
/// back to the directory. Candidates are never tried concurrently.
pub(crate) struct OperationDispatcher {
    logger: slog::Logger,
    directory: Arc<dyn ReplicaDirectory>,
    primary: EndpointDescriptor,
    policy: FailoverPolicy,
    striping_enabled: bool,
    allow_concurrent: bool,
    request_count: AtomicU64,
    in_flight: AtomicBool,
}

impl OperationDispatcher {
    pub(crate) fn new(
        logger: slog::Logger,
        directory: Arc<dyn ReplicaDirectory>,
        primary: EndpointDescriptor,
        policy: FailoverPolicy,
        striping_enabled: bool,
        allow_concurrent: bool,
    ) -> Self {
        let striping_base = directory.read_striping_base();
        OperationDispatcher {
            logger,
            directory,
            primary,
            policy,
            striping_enabled,
            allow_concurrent,
            request_count: AtomicU64::new(striping_base),
            in_flight: AtomicBool::new(false),
        }
    }

    pub(crate) async fn execute<T, F, Fut>(
        &self,
        verb: Verb,
        force_primary: bool,
        operation: F,
    ) -> Result<T, StoreError>
    where
        F: Fn(EndpointDescriptor) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let _slot = self.claim_slot()?;

        // One increment per logical call, not per attempt.
        let counter = self.request_count.fetch_add(1, Ordering::SeqCst);

        let candidates = self.directory.candidates(&self.primary).await;
        if candidates.is_empty() {
            return Err(StoreError::NoUsableEndpoints);
        }

        let striping_active = self.striping_enabled && self.policy.allows_secondary(Verb::Get);
        let start = striped_start_index(
            counter,
            candidates.len(),
            verb.is_read(),
            force_primary,
            striping_active,
        );

        let mut last_error: Option<StoreError> = None;
        for i in 0..candidates.len() {
            let candidate = &candidates[(start + i) % candidates.len()];
            let is_primary = candidate.url == self.primary.url;

            if !is_primary && !self.policy.allows_secondary(verb) {
                match last_error {
                    Some(err) => {
                        return Err(StoreError::FailoverDisabled {
                            verb,
                            policy: self.policy,
                            source: Box::new(err),
                        });
                    }
                    // No failure yet, the primary just has not come up in the
                    // rotation. Keep walking; it is still ahead of us.
                    None => continue,
                }
            }

            match operation(candidate.clone()).await {
                Ok(value) => {
                    self.directory.report_outcome(&candidate.url, Outcome::Success);
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    // The endpoint answered; the answer just was not what the
                    // caller hoped for. Its health is fine.
                    self.directory.report_outcome(&candidate.url, Outcome::Success);
                    return Err(err);
                }
                Err(err) => {
                    self.directory.report_outcome(&candidate.url, Outcome::Failure);
                    slog::warn!(
                        self.logger,
                        "Request to {} failed, trying next replica: {}",
                        candidate.url,
                        err
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or(StoreError::NoUsableEndpoints))
    }

    fn claim_slot(&self) -> Result<InFlightSlot<'_>, StoreError> {
        if self.allow_concurrent {
            return Ok(InFlightSlot { flag: None });
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StoreError::ConcurrentOperation);
        }
        Ok(InFlightSlot {
            flag: Some(&self.in_flight),
        })
    }
}

/// Releases the in-flight flag on every exit path, including panics and
/// early returns.
struct InFlightSlot<'a> {
    flag: Option<&'a AtomicBool>,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        if let Some(flag) = self.flag {
            flag.store(false, Ordering::SeqCst);
        }
    }
}
