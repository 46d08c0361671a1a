use crate::api::EndpointDescriptor;
use url::Url;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Where the dispatcher gets its candidate replicas from, and where it
/// reports how each attempt went. Health state behind an implementation is
/// shared by every client pointed at the same cluster, so implementations
/// must tolerate concurrent reads and updates.
#[async_trait::async_trait]
pub trait ReplicaDirectory: Send + Sync {
    /// Ordered candidate list for one logical operation, primary first.
    /// Implementations may skip endpoints they currently consider unhealthy.
    async fn candidates(&self, primary: &EndpointDescriptor) -> Vec<EndpointDescriptor>;

    fn report_outcome(&self, url: &Url, outcome: Outcome);

    /// Base value for the read-striping counter of a newly created client.
    /// Each call returns a different value so clients created together do not
    /// all stripe onto the same replica.
    fn read_striping_base(&self) -> u64;
}
