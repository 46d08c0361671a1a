mod directory;
mod failure_tracking;

pub use directory::Outcome;
pub use directory::ReplicaDirectory;
pub use failure_tracking::FailureTrackingDirectory;
