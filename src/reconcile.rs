use serde::Serialize;

use crate::dnanexus::ProjectBundle;
use crate::domain::RunStatus;
use crate::error::SyncError;
use crate::models::{
    DataStorage, DataStorageProvider, NewDataStorage, NewSequencingRun, SequencingRequest,
    SequencingRequestPatch, SequencingRun, SequencingRunPatch,
};
use crate::pulsar::{self, LimsClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAction {
    MatchedByName,
    MatchedByStorage,
    Created,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReconciliation {
    pub run: SequencingRun,
    pub action: RunAction,
    /// An existing run had to be patched to gain storage or `finished` status.
    pub repaired: bool,
}

/// Upgrades `request.paired_end` to true when the project was sequenced paired-end.
///
/// Never downgrades. Returns whether the request was patched.
pub fn reconcile_paired_end(
    lims: &impl LimsClient,
    request: &mut SequencingRequest,
    observed_paired: &str,
) -> Result<bool, SyncError> {
    if request.paired_end || observed_paired != "true" {
        return Ok(false);
    }
    pulsar::patch(lims, request.id, &SequencingRequestPatch { paired_end: true })?;
    tracing::info!(request_id = request.id, "set paired_end on sequencing request");
    request.paired_end = true;
    Ok(true)
}

/// Finds the run of `request` that holds `bundle`'s data, or creates it.
///
/// A run matches when its name equals the project's `seq_run_name` ignoring
/// case, or when its data storage points at the project. The first match in
/// linkage order wins. The returned run is always `finished` and linked to a
/// data storage.
pub fn reconcile_run(
    lims: &impl LimsClient,
    request: &SequencingRequest,
    bundle: &ProjectBundle,
    storage_provider: &str,
) -> Result<RunReconciliation, SyncError> {
    let run_name = bundle.seq_run_name()?;
    let target = run_name.to_lowercase();

    for &run_id in &request.sequencing_run_ids {
        let run = pulsar::fetch_existing::<SequencingRun>(lims, run_id)?;
        if run.name.to_lowercase() == target {
            tracing::debug!(run_id, run_name, "run matched by name");
            return ensure_finished(lims, run, RunAction::MatchedByName, bundle, storage_provider);
        }
        if let Some(storage_id) = run.data_storage_id {
            let storage = pulsar::fetch::<DataStorage>(lims, storage_id)?;
            let points_here = storage
                .and_then(|storage| storage.project_identifier)
                .is_some_and(|identifier| identifier == bundle.project_id.as_str());
            if points_here {
                tracing::debug!(run_id, storage_id, "run matched by data storage");
                return ensure_finished(
                    lims,
                    run,
                    RunAction::MatchedByStorage,
                    bundle,
                    storage_provider,
                );
            }
        }
    }

    // Read the lane before creating anything so a bad property leaves no orphan storage.
    let lane = bundle.lane()?;
    let storage = ensure_data_storage(lims, bundle, storage_provider)?;
    let run = pulsar::create(
        lims,
        &NewSequencingRun {
            name: run_name.to_string(),
            sequencing_request_id: request.id,
            status: RunStatus::Finished,
            lane,
            data_storage_id: storage.id,
        },
    )?;
    tracing::info!(
        run_id = run.id,
        request_id = request.id,
        run_name,
        "created sequencing run"
    );
    Ok(RunReconciliation {
        run,
        action: RunAction::Created,
        repaired: false,
    })
}

fn ensure_finished(
    lims: &impl LimsClient,
    run: SequencingRun,
    action: RunAction,
    bundle: &ProjectBundle,
    storage_provider: &str,
) -> Result<RunReconciliation, SyncError> {
    let mut fields = SequencingRunPatch::default();
    if run.data_storage_id.is_none() {
        fields.data_storage_id = Some(ensure_data_storage(lims, bundle, storage_provider)?.id);
    }
    if fields.data_storage_id.is_some() || !run.is_finished() {
        fields.status = Some(RunStatus::Finished);
    }
    if fields.is_empty() {
        return Ok(RunReconciliation {
            run,
            action,
            repaired: false,
        });
    }

    let mut patched = pulsar::patch(lims, run.id, &fields)?;
    tracing::info!(run_id = run.id, ?fields, "repaired existing sequencing run");
    // Partial PATCH responses omit the fields that were just written.
    if patched.data_storage_id.is_none() {
        patched.data_storage_id = fields.data_storage_id.or(run.data_storage_id);
    }
    if patched.status.is_none() {
        patched.status = Some(RunStatus::Finished);
    }
    Ok(RunReconciliation {
        run: patched,
        action,
        repaired: true,
    })
}

/// Returns the project's data storage, creating it only when none exists.
///
/// An earlier import may have created the storage and then failed before
/// the run was written.
fn ensure_data_storage(
    lims: &impl LimsClient,
    bundle: &ProjectBundle,
    storage_provider: &str,
) -> Result<DataStorage, SyncError> {
    let existing = pulsar::find_by_field::<DataStorage>(
        lims,
        "project_identifier",
        bundle.project_id.as_str(),
    )?;
    if let Some(storage) = existing {
        tracing::debug!(
            storage_id = storage.id,
            project_id = %bundle.project_id,
            "reusing data storage"
        );
        return Ok(storage);
    }

    let provider_id = storage_provider_id(lims, storage_provider)?;
    let storage = pulsar::create(
        lims,
        &NewDataStorage {
            name: bundle.name.clone(),
            project_identifier: bundle.project_id.to_string(),
            data_storage_provider_id: provider_id,
        },
    )?;
    tracing::info!(
        storage_id = storage.id,
        project_id = %bundle.project_id,
        "created data storage"
    );
    Ok(storage)
}

pub fn storage_provider_id(lims: &impl LimsClient, name: &str) -> Result<i64, SyncError> {
    let mut providers = pulsar::find_by_name::<DataStorageProvider>(lims, name)?;
    if providers.len() != 1 {
        return Err(SyncError::ProviderNotFound(format!(
            "{name} ({} matches)",
            providers.len()
        )));
    }
    Ok(providers.remove(0).id)
}
