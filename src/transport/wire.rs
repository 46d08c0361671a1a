use crate::error::StoreError;
use crate::transport::types::TransportResponse;
use serde::Deserialize;

#[derive(Deserialize)]
struct AuthTokenBody {
    #[serde(rename = "Token")]
    token: String,
}

#[derive(Deserialize)]
struct ServerErrorBody {
    #[serde(rename = "Error")]
    error: String,
}

pub(crate) fn parse_auth_token(response: &TransportResponse) -> Result<String, StoreError> {
    let body: AuthTokenBody = response.json()?;
    Ok(body.token)
}

/// Maps a non-2xx response onto the error taxonomy, pulling the message out
/// of the standard `{"Error": "..."}` body when the server sent one.
pub(crate) fn server_error(response: &TransportResponse) -> StoreError {
    let message = serde_json::from_slice::<ServerErrorBody>(&response.body)
        .map(|body| body.error)
        .unwrap_or_else(|_| String::from_utf8_lossy(&response.body).trim().to_string());

    StoreError::Server {
        status: response.status,
        message,
    }
}
