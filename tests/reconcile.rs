mod common;

use std::sync::Mutex;

use assert_matches::assert_matches;
use serde_json::{Value, json};

use seqrun_sync::domain::RunStatus;
use seqrun_sync::error::SyncError;
use seqrun_sync::models::{RecordKind, SequencingRequest};
use seqrun_sync::pulsar::{self, LimsClient};
use seqrun_sync::reconcile::{RunAction, reconcile_paired_end, reconcile_run};

use common::{MemoryLims, bundle, project_id, seed_provider, seed_request};

fn request(lims: &impl LimsClient, id: i64) -> SequencingRequest {
    pulsar::fetch_existing(lims, id).unwrap()
}

/// Fails the first sequencing run create with a gateway error, after the
/// data storage for the project was already written.
struct RunCreateFailsOnce {
    inner: MemoryLims,
    failed: Mutex<bool>,
}

impl LimsClient for RunCreateFailsOnce {
    fn find_by_name(&self, kind: RecordKind, name: &str) -> Result<Vec<Value>, SyncError> {
        self.inner.find_by_name(kind, name)
    }

    fn find_by_field(
        &self,
        kind: RecordKind,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>, SyncError> {
        self.inner.find_by_field(kind, field, value)
    }

    fn get(&self, kind: RecordKind, id: i64) -> Result<Option<Value>, SyncError> {
        self.inner.get(kind, id)
    }

    fn create(&self, kind: RecordKind, payload: Value) -> Result<Value, SyncError> {
        let mut failed = self.failed.lock().unwrap();
        if kind == RecordKind::SequencingRun && !*failed {
            *failed = true;
            return Err(SyncError::LimsStatus {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        drop(failed);
        self.inner.create(kind, payload)
    }

    fn patch(&self, kind: RecordKind, id: i64, fields: Value) -> Result<Value, SyncError> {
        self.inner.patch(kind, id, fields)
    }
}

#[test]
fn creates_storage_and_finished_run_once() {
    let lims = MemoryLims::default();
    seed_provider(&lims);
    seed_request(&lims, 10, "SREQ-10", true, &[]);
    let project = project_id(1);
    let bundle = bundle(&project, "SREQ-10", "HWJ5TBBXX", "true");

    let first = reconcile_run(&lims, &request(&lims, 10), &bundle, "DNAnexus").unwrap();
    assert_eq!(first.action, RunAction::Created);
    assert_eq!(first.run.status, Some(RunStatus::Finished));
    assert_eq!(first.run.lane, Some(2));
    assert_eq!(first.run.name, "HWJ5TBBXX");

    let storage = lims
        .record(RecordKind::DataStorage, first.run.data_storage_id.unwrap())
        .unwrap();
    assert_eq!(storage["project_identifier"], json!(project.as_str()));
    assert_eq!(storage["data_storage_provider_id"], json!(1));

    // The second attempt sees the run linked to the request and writes nothing.
    let second = reconcile_run(&lims, &request(&lims, 10), &bundle, "DNAnexus").unwrap();
    assert_eq!(second.action, RunAction::MatchedByName);
    assert_eq!(second.run.id, first.run.id);
    assert!(!second.repaired);
    assert_eq!(lims.created(RecordKind::DataStorage), 1);
    assert_eq!(lims.created(RecordKind::SequencingRun), 1);
}

#[test]
fn run_name_match_ignores_case() {
    let lims = MemoryLims::default();
    seed_provider(&lims);
    lims.insert(
        RecordKind::DataStorage,
        json!({ "id": 5, "project_identifier": "project-elsewhere" }),
    );
    lims.insert(
        RecordKind::SequencingRun,
        json!({ "id": 30, "name": "hwj5tbbxx", "status": "finished", "data_storage_id": 5 }),
    );
    lims.insert(
        RecordKind::SequencingRequest,
        json!({ "id": 10, "name": "SREQ-10", "sequencing_run_ids": [30] }),
    );

    let bundle = bundle(&project_id(1), "SREQ-10", "HWJ5TBBXX", "");
    let reconciled = reconcile_run(&lims, &request(&lims, 10), &bundle, "DNAnexus").unwrap();
    assert_eq!(reconciled.action, RunAction::MatchedByName);
    assert_eq!(reconciled.run.id, 30);
    assert_eq!(lims.total_created(), 0);
}

#[test]
fn storage_pointing_at_project_matches_renamed_run() {
    let lims = MemoryLims::default();
    seed_provider(&lims);
    let project = project_id(2);
    lims.insert(
        RecordKind::DataStorage,
        json!({ "id": 6, "project_identifier": project.as_str() }),
    );
    lims.insert(
        RecordKind::SequencingRun,
        json!({ "id": 31, "name": "renamed by hand", "status": "finished", "data_storage_id": 6 }),
    );
    lims.insert(
        RecordKind::SequencingRequest,
        json!({ "id": 11, "name": "SREQ-11", "sequencing_run_ids": [31] }),
    );

    let bundle = bundle(&project, "SREQ-11", "HWJ5TBBXX", "");
    let reconciled = reconcile_run(&lims, &request(&lims, 11), &bundle, "DNAnexus").unwrap();
    assert_eq!(reconciled.action, RunAction::MatchedByStorage);
    assert_eq!(reconciled.run.id, 31);
    assert_eq!(lims.total_created(), 0);
}

#[test]
fn matched_run_without_storage_is_repaired() {
    let lims = MemoryLims::default();
    seed_provider(&lims);
    lims.insert(
        RecordKind::SequencingRun,
        json!({ "id": 32, "name": "HWJ5TBBXX", "status": "started" }),
    );
    lims.insert(
        RecordKind::SequencingRequest,
        json!({ "id": 12, "name": "SREQ-12", "sequencing_run_ids": [32] }),
    );

    let bundle = bundle(&project_id(3), "SREQ-12", "HWJ5TBBXX", "");
    let reconciled = reconcile_run(&lims, &request(&lims, 12), &bundle, "DNAnexus").unwrap();
    assert!(reconciled.repaired);
    assert_eq!(reconciled.run.status, Some(RunStatus::Finished));
    assert!(reconciled.run.data_storage_id.is_some());
    assert_eq!(lims.created(RecordKind::DataStorage), 1);
    assert_eq!(lims.created(RecordKind::SequencingRun), 0);

    let stored = lims.record(RecordKind::SequencingRun, 32).unwrap();
    assert_eq!(stored["status"], json!("finished"));
}

#[test]
fn bad_lane_creates_nothing() {
    let lims = MemoryLims::default();
    seed_provider(&lims);
    seed_request(&lims, 13, "SREQ-13", false, &[]);
    let mut bundle = bundle(&project_id(4), "SREQ-13", "HWJ5TBBXX", "");
    bundle
        .properties
        .insert("seq_lane_index".to_string(), "lane two".to_string());

    assert_matches!(
        reconcile_run(&lims, &request(&lims, 13), &bundle, "DNAnexus"),
        Err(SyncError::MalformedProperty { .. })
    );
    assert_eq!(lims.total_created(), 0);
}

#[test]
fn unknown_provider_is_reported() {
    let lims = MemoryLims::default();
    seed_request(&lims, 14, "SREQ-14", false, &[]);
    let bundle = bundle(&project_id(5), "SREQ-14", "HWJ5TBBXX", "");

    assert_matches!(
        reconcile_run(&lims, &request(&lims, 14), &bundle, "DNAnexus"),
        Err(SyncError::ProviderNotFound(_))
    );
}

#[test]
fn paired_end_is_upgraded_never_downgraded() {
    let lims = MemoryLims::default();
    seed_request(&lims, 20, "single", false, &[]);
    seed_request(&lims, 21, "paired", true, &[]);

    let mut single = request(&lims, 20);
    assert!(reconcile_paired_end(&lims, &mut single, "true").unwrap());
    assert!(single.paired_end);
    assert_eq!(
        lims.record(RecordKind::SequencingRequest, 20).unwrap()["paired_end"],
        json!(true)
    );

    let mut paired = request(&lims, 21);
    assert!(!reconcile_paired_end(&lims, &mut paired, "false").unwrap());
    assert!(!reconcile_paired_end(&lims, &mut paired, "").unwrap());
    assert!(paired.paired_end);

    let mut unknown = request(&lims, 20);
    unknown.paired_end = false;
    assert!(!reconcile_paired_end(&lims, &mut unknown, "").unwrap());
    assert_eq!(lims.patched(RecordKind::SequencingRequest), 1);
}

#[test]
fn rerun_after_failed_run_create_reuses_storage() {
    let inner = MemoryLims::default();
    seed_provider(&inner);
    seed_request(&inner, 15, "SREQ-15", true, &[]);
    let lims = RunCreateFailsOnce {
        inner,
        failed: Mutex::new(false),
    };
    let project = project_id(6);
    let bundle = bundle(&project, "SREQ-15", "HWJ5TBBXX", "true");

    assert_matches!(
        reconcile_run(&lims, &request(&lims, 15), &bundle, "DNAnexus"),
        Err(SyncError::LimsStatus { status: 502, .. })
    );
    assert_eq!(lims.inner.created(RecordKind::DataStorage), 1);

    let reconciled = reconcile_run(&lims, &request(&lims, 15), &bundle, "DNAnexus").unwrap();
    assert_eq!(reconciled.action, RunAction::Created);
    assert_eq!(lims.inner.created(RecordKind::DataStorage), 1);
    assert_eq!(lims.inner.created(RecordKind::SequencingRun), 1);

    let storages: Vec<_> = lims
        .inner
        .all(RecordKind::DataStorage)
        .into_iter()
        .filter(|storage| storage["project_identifier"] == json!(project.as_str()))
        .collect();
    assert_eq!(storages.len(), 1);
    assert_eq!(reconciled.run.data_storage_id, storages[0]["id"].as_i64());
}

#[test]
fn first_linked_run_wins() {
    let lims = MemoryLims::default();
    seed_provider(&lims);
    let project = project_id(7);
    lims.insert(
        RecordKind::DataStorage,
        json!({ "id": 7, "project_identifier": project.as_str() }),
    );
    lims.insert(
        RecordKind::SequencingRun,
        json!({ "id": 41, "name": "HWJ5TBBXX", "status": "finished", "data_storage_id": 7 }),
    );
    lims.insert(
        RecordKind::SequencingRun,
        json!({ "id": 40, "name": "hwj5tbbxx", "status": "finished", "data_storage_id": 7 }),
    );
    lims.insert(
        RecordKind::SequencingRequest,
        json!({ "id": 16, "name": "SREQ-16", "sequencing_run_ids": [41, 40] }),
    );

    let bundle = bundle(&project, "SREQ-16", "HWJ5TBBXX", "");
    let reconciled = reconcile_run(&lims, &request(&lims, 16), &bundle, "DNAnexus").unwrap();
    assert_eq!(reconciled.run.id, 41);
    assert_eq!(reconciled.action, RunAction::MatchedByName);
    assert_eq!(lims.total_created(), 0);
}

#[test]
fn storage_match_earlier_in_linkage_beats_later_name_match() {
    let lims = MemoryLims::default();
    seed_provider(&lims);
    let project = project_id(8);
    lims.insert(
        RecordKind::DataStorage,
        json!({ "id": 8, "project_identifier": project.as_str() }),
    );
    lims.insert(
        RecordKind::SequencingRun,
        json!({ "id": 42, "name": "renamed", "status": "finished", "data_storage_id": 8 }),
    );
    lims.insert(
        RecordKind::SequencingRun,
        json!({ "id": 43, "name": "HWJ5TBBXX", "status": "finished", "data_storage_id": 8 }),
    );
    lims.insert(
        RecordKind::SequencingRequest,
        json!({ "id": 17, "name": "SREQ-17", "sequencing_run_ids": [42, 43] }),
    );

    let bundle = bundle(&project, "SREQ-17", "HWJ5TBBXX", "");
    let reconciled = reconcile_run(&lims, &request(&lims, 17), &bundle, "DNAnexus").unwrap();
    assert_eq!(reconciled.run.id, 42);
    assert_eq!(reconciled.action, RunAction::MatchedByStorage);
}

#[test]
fn single_end_request_stays_single_end() {
    let lims = MemoryLims::default();
    seed_request(&lims, 22, "single", false, &[]);

    let mut single = request(&lims, 22);
    assert!(!reconcile_paired_end(&lims, &mut single, "false").unwrap());
    assert!(!single.paired_end);
    assert_eq!(
        lims.record(RecordKind::SequencingRequest, 22).unwrap()["paired_end"],
        json!(false)
    );
    assert_eq!(lims.patched(RecordKind::SequencingRequest), 0);
}
