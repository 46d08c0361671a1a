use crate::api::EndpointDescriptor;
use crate::directory::directory::{Outcome, ReplicaDirectory};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use url::Url;

/// Default directory over a static replica list. Tracks a consecutive
/// failure streak per endpoint and skips endpoints whose streak has reached
/// the threshold, unless that would leave nothing to try.
///
/// Share one instance (via `Arc`) between all clients talking to the same
/// cluster so they agree on which replicas are down.
pub struct FailureTrackingDirectory {
    replicas: Vec<EndpointDescriptor>,
    failure_threshold: u64,
    streaks: Mutex<HashMap<String, u64>>,
    striping_base: AtomicU64,
}

impl FailureTrackingDirectory {
    pub fn new(replicas: Vec<EndpointDescriptor>) -> Self {
        Self::with_threshold(replicas, 3)
    }

    pub fn with_threshold(replicas: Vec<EndpointDescriptor>, failure_threshold: u64) -> Self {
        FailureTrackingDirectory {
            replicas,
            failure_threshold: failure_threshold.max(1),
            streaks: Mutex::new(HashMap::new()),
            striping_base: AtomicU64::new(0),
        }
    }

    pub fn failure_streak(&self, url: &Url) -> u64 {
        let streaks = self.streaks.lock().unwrap();
        streaks.get(url.as_str()).copied().unwrap_or(0)
    }

    fn is_unhealthy(&self, url: &Url) -> bool {
        self.failure_streak(url) >= self.failure_threshold
    }
}

#[async_trait::async_trait]
impl ReplicaDirectory for FailureTrackingDirectory {
    async fn candidates(&self, primary: &EndpointDescriptor) -> Vec<EndpointDescriptor> {
        let mut all = Vec::with_capacity(1 + self.replicas.len());
        all.push(primary.clone());
        all.extend(self.replicas.iter().cloned());

        let healthy: Vec<EndpointDescriptor> = all
            .iter()
            .filter(|e| !self.is_unhealthy(&e.url))
            .cloned()
            .collect();

        // Everything marked down: hand back the full list and let the
        // dispatcher discover whether anyone has recovered.
        if healthy.is_empty() {
            return all;
        }
        healthy
    }

    fn report_outcome(&self, url: &Url, outcome: Outcome) {
        let mut streaks = self.streaks.lock().unwrap();
        match outcome {
            Outcome::Success => {
                streaks.remove(url.as_str());
            }
            Outcome::Failure => {
                *streaks.entry(url.as_str().to_string()).or_insert(0) += 1;
            }
        }
    }

    fn read_striping_base(&self) -> u64 {
        self.striping_base.fetch_add(1, Ordering::SeqCst)
    }
}
