use crate::api::Etag;
use crate::error::StoreError;
use serde::Deserialize;

/// Body the server sends with a 409 on a write whose expected version marker
/// no longer matches. This is an optimistic-concurrency miss on a single
/// authoritative copy; do not confuse it with a replication conflict, which
/// means two copies diverged.
#[derive(Deserialize)]
struct ConcurrencyErrorBody {
    url: String,
    #[serde(rename = "actualETag")]
    actual_etag: Etag,
    #[serde(rename = "expectedETag")]
    expected_etag: Etag,
    error: String,
}

/// Parses the structured 409 body of a failed conditional write into the
/// typed concurrency error. A body that does not match the expected shape is
/// a protocol violation, not a concurrency miss.
pub(crate) fn concurrency_violation(body: &[u8]) -> StoreError {
    match serde_json::from_slice::<ConcurrencyErrorBody>(body) {
        Ok(parsed) => StoreError::Concurrency {
            url: parsed.url,
            expected_etag: parsed.expected_etag,
            actual_etag: parsed.actual_etag,
            message: parsed.error,
        },
        Err(e) => StoreError::Protocol(format!("malformed concurrency error body: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_markers_out_of_the_body() {
        let body = br#"{
            "url": "/docs/users/1",
            "actualETag": "E2",
            "expectedETag": "E1",
            "error": "PUT attempted on document 'users/1' using a non current etag"
        }"#;

        match concurrency_violation(body) {
            StoreError::Concurrency {
                url,
                expected_etag,
                actual_etag,
                message,
            } => {
                assert_eq!(url, "/docs/users/1");
                assert_eq!(expected_etag, Etag::from("E1"));
                assert_eq!(actual_etag, Etag::from("E2"));
                assert!(message.contains("non current etag"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn malformed_body_is_a_protocol_violation() {
        assert!(matches!(
            concurrency_violation(b"<html>proxy error</html>"),
            StoreError::Protocol(_)
        ));
    }
}
