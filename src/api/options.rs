use crate::transport::Verb;
use std::convert::TryFrom;
use tokio::time::Duration;

/// Which operations may be retried against a secondary after the preferred
/// replica fails.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FailoverPolicy {
    /// Never touch a secondary; the first failure surfaces immediately.
    FailImmediately,
    /// Reads may fail over, writes stay on the primary.
    AllowReadsFromSecondaries,
    /// Both reads and writes may fail over. Only safe when the cluster
    /// resolves multi-master write conflicts, which is what the conflict
    /// resolver is for.
    AllowReadsAndWritesToSecondaries,
}

impl FailoverPolicy {
    pub(crate) fn allows_secondary(&self, verb: Verb) -> bool {
        match self {
            FailoverPolicy::FailImmediately => false,
            FailoverPolicy::AllowReadsFromSecondaries => verb.is_read(),
            FailoverPolicy::AllowReadsAndWritesToSecondaries => true,
        }
    }
}

#[derive(Clone, Default)]
pub struct StoreOptions {
    pub failover_policy: Option<FailoverPolicy>,
    /// When false, a second logical call while one is in flight is a usage
    /// error rather than being allowed to interleave.
    pub allow_concurrent_operations: Option<bool>,
    pub read_striping: Option<bool>,
    /// Consecutive failures before the default directory skips an endpoint.
    pub failure_threshold: Option<u64>,
    pub request_timeout: Option<Duration>,
}

pub(crate) struct StoreOptionsValidated {
    pub failover_policy: FailoverPolicy,
    pub allow_concurrent_operations: bool,
    pub read_striping: bool,
    pub failure_threshold: u64,
    pub request_timeout: Duration,
}

impl StoreOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.failure_threshold == 0 {
            return Err("Failure threshold must be at least 1");
        }
        if self.request_timeout == Duration::from_millis(0) {
            return Err("Request timeout must be non-zero");
        }
        Ok(())
    }
}

impl TryFrom<StoreOptions> for StoreOptionsValidated {
    type Error = &'static str;

    fn try_from(options: StoreOptions) -> Result<Self, Self::Error> {
        let values = StoreOptionsValidated {
            failover_policy: options
                .failover_policy
                .unwrap_or(FailoverPolicy::AllowReadsFromSecondaries),
            allow_concurrent_operations: options.allow_concurrent_operations.unwrap_or(true),
            read_striping: options.read_striping.unwrap_or(true),
            failure_threshold: options.failure_threshold.unwrap_or(3),
            request_timeout: options.request_timeout.unwrap_or(Duration::from_secs(30)),
        };

        values.validate()?;
        Ok(values)
    }
}
