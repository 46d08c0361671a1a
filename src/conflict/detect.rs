use crate::api::Etag;
use crate::error::StoreError;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct ConflictsBody {
    #[serde(rename = "Conflicts")]
    conflicts: Vec<String>,
}

/// Candidate version ids out of a 409 response body.
pub(crate) fn conflict_ids_from_body(body: &[u8]) -> Result<Vec<String>, StoreError> {
    serde_json::from_slice::<ConflictsBody>(body)
        .map(|b| b.conflicts)
        .map_err(|_| {
            StoreError::Protocol(
                "could not get conflict ids from conflicted document, \
                 are you trying to resolve a conflict when using metadata-only?"
                    .to_string(),
            )
        })
}

pub(crate) struct EmbeddedConflict {
    pub document_id: String,
    pub etag: Option<Etag>,
    pub candidate_version_ids: Vec<String>,
}

/// A conflicted document smuggled inside a multi-document result: the slot
/// holds the conflict listing instead of the document, and its metadata
/// carries the 409 it would have gotten as a standalone read.
pub(crate) fn embedded_conflict(doc: &Value) -> Result<Option<EmbeddedConflict>, StoreError> {
    let metadata = match doc.get("@metadata") {
        Some(metadata) => metadata,
        None => return Ok(None),
    };

    let status = metadata
        .get("@Http-Status-Code")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if status != 409 {
        return Ok(None);
    }

    let document_id = metadata
        .get("@id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            StoreError::Protocol("conflicted result is missing its document id".to_string())
        })?
        .to_string();
    let etag = metadata
        .get("@etag")
        .and_then(|v| v.as_str())
        .map(Etag::from);
    let candidate_version_ids = doc
        .get("Conflicts")
        .and_then(|v| v.as_array())
        .map(|ids| {
            ids.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        })
        .ok_or_else(|| {
            StoreError::Protocol(
                "could not get conflict ids from conflicted document, \
                 are you trying to resolve a conflict when using metadata-only?"
                    .to_string(),
            )
        })?;

    Ok(Some(EmbeddedConflict {
        document_id,
        etag,
        candidate_version_ids,
    }))
}

/// Query results are not resolved in place; a document still flagged as a
/// replication conflict surfaces as a conflict error carrying its own id.
pub(crate) fn replication_conflict_id(doc: &Value) -> Option<String> {
    let metadata = doc.get("@metadata")?;
    if metadata
        .get("Raven-Replication-Conflict")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        return metadata
            .get("@id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
    }
    None
}
