mod http;
mod types;
mod wire;

pub use http::HttpTransport;
pub use types::BodyStream;
pub use types::StreamedResponse;
pub use types::Transport;
pub use types::TransportRequest;
pub use types::TransportResponse;
pub use types::Verb;

pub(crate) use wire::parse_auth_token;
pub(crate) use wire::server_error;
