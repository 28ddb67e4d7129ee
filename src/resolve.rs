use crate::domain::RecordName;
use crate::error::SyncError;
use crate::models::SequencingRequest;
use crate::pulsar::{self, LimsClient};

/// Finds the sequencing request a project's `library_name` refers to.
///
/// Requests migrated from the previous LIMS keep their old `SREQ-<n>` id in
/// the name field, and those ids collide with current primary keys. So the
/// name is searched first, and the numeric suffix is only used as a record id
/// when no name matches.
pub fn resolve_request(
    lims: &impl LimsClient,
    name_hint: &str,
) -> Result<SequencingRequest, SyncError> {
    let mut by_name = pulsar::find_by_name::<SequencingRequest>(lims, name_hint)?;
    match by_name.len() {
        1 => {
            let request = by_name.remove(0);
            tracing::debug!(name = name_hint, request_id = request.id, "request matched by name");
            return Ok(request);
        }
        0 => {}
        count => {
            return Err(SyncError::AmbiguousLookup {
                name: name_hint.to_string(),
                count,
            });
        }
    }

    let Some(record_name) = RecordName::parse(name_hint) else {
        return Err(SyncError::RequestNotFound(name_hint.to_string()));
    };
    match pulsar::fetch::<SequencingRequest>(lims, record_name.id)? {
        Some(request) => {
            tracing::debug!(
                name = name_hint,
                prefix = %record_name.prefix,
                request_id = request.id,
                "request matched by record id"
            );
            Ok(request)
        }
        None => Err(SyncError::RequestNotFound(name_hint.to_string())),
    }
}
