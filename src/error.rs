use crate::api::Etag;
use crate::api::FailoverPolicy;
use crate::transport::Verb;

/// Unified error for every operation the client exposes. The dispatcher keys
/// its retry decisions off `is_retryable`, so adding a variant means deciding
/// whether it is safe to replay against another replica.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transport failure")]
    Transport(#[from] TransportError),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    /// Divergent replicated copies of one document. Recoverable through a
    /// registered conflict listener; otherwise the caller has to pick a
    /// version using the candidate ids carried here.
    #[error("conflict detected on {document_id}, conflict must be resolved before the document will be accessible")]
    Conflict {
        document_id: String,
        candidate_version_ids: Vec<String>,
        etag: Option<Etag>,
    },

    /// The same document was modified between our read and write on the same
    /// authoritative copy. Not a replication conflict, never auto-retried.
    #[error("{message}")]
    Concurrency {
        url: String,
        expected_etag: Etag,
        actual_etag: Etag,
        message: String,
    },

    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The server reported a failure through the streaming trailer after it
    /// had already committed a 200 status line.
    #[error("server error in stream: {0}")]
    ServerStream(String),

    #[error("encountered another conflict while already resolving a conflict, conflict resolution cannot recurse")]
    ConflictResolutionRecursion,

    #[error("replica directory returned no usable endpoints")]
    NoUsableEndpoints,

    #[error("only a single concurrent operation is allowed per client instance")]
    ConcurrentOperation,

    #[error("could not fail over {verb:?} operation to a secondary, failover behavior is {policy:?}")]
    FailoverDisabled {
        verb: Verb,
        policy: FailoverPolicy,
        #[source]
        source: Box<StoreError>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Transient failures are worth replaying against the next replica.
    /// Everything else either already has a definitive answer from a healthy
    /// server (conflict, concurrency) or is a bug on one side of the wire.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Transport(_) => true,
            StoreError::Server { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("i/o failure talking to {url}: {message}")]
    Io { url: String, message: String },

    #[error("could not initialize http client: {0}")]
    Initialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses_are_retryable() {
        for status in &[500u16, 502, 503, 408] {
            let err = StoreError::Server {
                status: *status,
                message: String::new(),
            };
            assert!(err.is_retryable(), "status {} should be retryable", status);
        }
    }

    #[test]
    fn definitive_answers_are_not_retryable() {
        let conflict = StoreError::Conflict {
            document_id: "docs/1".to_string(),
            candidate_version_ids: vec![],
            etag: None,
        };
        assert!(!conflict.is_retryable());

        let bad_request = StoreError::Server {
            status: 400,
            message: String::new(),
        };
        assert!(!bad_request.is_retryable());

        assert!(!StoreError::ConflictResolutionRecursion.is_retryable());
    }
}
