mod api;
mod concurrency;
mod conflict;
mod directory;
mod dispatch;
mod error;
mod stream;
mod transport;

pub use api::try_create_store_client;
pub use api::ClientCreationError;
pub use api::Credentials;
pub use api::Document;
pub use api::EndpointDescriptor;
pub use api::Etag;
pub use api::FailoverPolicy;
pub use api::IndexQuery;
pub use api::MultiLoadResult;
pub use api::PagingInformation;
pub use api::PutResult;
pub use api::QueryHeaderInfo;
pub use api::QueryResult;
pub use api::StoreClient;
pub use api::StoreClientConfig;
pub use api::StoreOptions;
pub use api::StreamDocsOptions;
pub use conflict::ConflictListener;
pub use directory::FailureTrackingDirectory;
pub use directory::Outcome;
pub use directory::ReplicaDirectory;
pub use error::StoreError;
pub use error::TransportError;
pub use stream::StreamCursor;
pub use transport::BodyStream;
pub use transport::HttpTransport;
pub use transport::StreamedResponse;
pub use transport::Transport;
pub use transport::TransportRequest;
pub use transport::TransportResponse;
pub use transport::Verb;
