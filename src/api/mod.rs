//! This mod holds the library's client-facing API.
mod client;
pub(crate) mod commands;
mod options;
mod types;
mod wiring;

pub use client::StoreClient;
pub use options::FailoverPolicy;
pub use options::StoreOptions;
pub use types::Credentials;
pub use types::Document;
pub use types::EndpointDescriptor;
pub use types::Etag;
pub use types::IndexQuery;
pub use types::MultiLoadResult;
pub use types::PagingInformation;
pub use types::PutResult;
pub use types::QueryHeaderInfo;
pub use types::QueryResult;
pub use types::StreamDocsOptions;
pub use wiring::try_create_store_client;
pub use wiring::ClientCreationError;
pub use wiring::StoreClientConfig;
