use crate::api::client::StoreClient;
use crate::api::commands::Commands;
use crate::api::options::{StoreOptions, StoreOptionsValidated};
use crate::api::types::{Credentials, EndpointDescriptor};
use crate::conflict::{ConflictListener, ConflictResolver};
use crate::directory::{FailureTrackingDirectory, ReplicaDirectory};
use crate::dispatch::OperationDispatcher;
use crate::error::TransportError;
use crate::transport::{HttpTransport, Transport};
use std::convert::TryInto;
use std::sync::Arc;
use url::Url;

pub struct StoreClientConfig {
    pub primary_url: String,
    pub credentials: Option<Credentials>,
    /// Used by the default directory. Ignored when `directory` is supplied;
    /// an injected directory knows its own topology.
    pub replica_urls: Vec<String>,
    pub logger: slog::Logger,
    pub directory: Option<Arc<dyn ReplicaDirectory>>,
    pub transport: Option<Arc<dyn Transport>>,
    pub conflict_listeners: Vec<Arc<dyn ConflictListener>>,
    pub options: StoreOptions,
}

pub fn try_create_store_client(config: StoreClientConfig) -> Result<StoreClient, ClientCreationError> {
    let options: StoreOptionsValidated = config
        .options
        .try_into()
        .map_err(ClientCreationError::InvalidOptions)?;

    let primary_url = parse_endpoint_url(&config.primary_url)?;
    let primary = EndpointDescriptor::new(primary_url, config.credentials.clone());

    let directory: Arc<dyn ReplicaDirectory> = match config.directory {
        Some(directory) => directory,
        None => {
            let mut replicas = Vec::with_capacity(config.replica_urls.len());
            for raw in &config.replica_urls {
                let url = parse_endpoint_url(raw)?;
                replicas.push(EndpointDescriptor::new(url, config.credentials.clone()));
            }
            Arc::new(FailureTrackingDirectory::with_threshold(
                replicas,
                options.failure_threshold,
            ))
        }
    };

    let transport: Arc<dyn Transport> = match config.transport {
        Some(transport) => transport,
        None => Arc::new(
            HttpTransport::new(options.request_timeout)
                .map_err(ClientCreationError::TransportInitialization)?,
        ),
    };

    let resolver = ConflictResolver::new(config.logger.clone(), config.conflict_listeners);
    let commands = Commands {
        logger: config.logger.clone(),
        transport,
        resolver,
    };
    let dispatcher = OperationDispatcher::new(
        config.logger,
        directory,
        primary.clone(),
        options.failover_policy,
        options.read_striping,
        options.allow_concurrent_operations,
    );

    Ok(StoreClient::new(dispatcher, commands, primary))
}

fn parse_endpoint_url(raw: &str) -> Result<Url, ClientCreationError> {
    let url = Url::parse(raw).map_err(|e| ClientCreationError::InvalidUrl {
        url: raw.to_string(),
        source: e,
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ClientCreationError::UnsupportedScheme(raw.to_string()));
    }
    Ok(url)
}

#[derive(Debug, thiserror::Error)]
pub enum ClientCreationError {
    #[error("invalid endpoint url {url}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("endpoint url must use http or https: {0}")]
    UnsupportedScheme(String),

    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),

    #[error("failed to initialize http transport")]
    TransportInitialization(#[source] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn config(primary: &str) -> StoreClientConfig {
        StoreClientConfig {
            primary_url: primary.to_string(),
            credentials: None,
            replica_urls: vec![],
            logger: test_logger(),
            directory: None,
            transport: None,
            conflict_listeners: vec![],
            options: StoreOptions::default(),
        }
    }

    #[test]
    fn creates_a_client_with_defaults() {
        assert!(try_create_store_client(config("http://primary:8080")).is_ok());
    }

    #[test]
    fn rejects_a_malformed_primary_url() {
        assert!(matches!(
            try_create_store_client(config("not a url")),
            Err(ClientCreationError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(matches!(
            try_create_store_client(config("ftp://primary:21")),
            Err(ClientCreationError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn rejects_a_malformed_replica_url() {
        let mut config = config("http://primary:8080");
        config.replica_urls = vec!["::nope::".to_string()];
        assert!(matches!(
            try_create_store_client(config),
            Err(ClientCreationError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn rejects_invalid_options() {
        let mut config = config("http://primary:8080");
        config.options.failure_threshold = Some(0);
        assert!(matches!(
            try_create_store_client(config),
            Err(ClientCreationError::InvalidOptions(_))
        ));
    }
}
