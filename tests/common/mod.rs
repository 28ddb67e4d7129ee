#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::{Map, Value, json};

use seqrun_sync::dnanexus::{
    CloudPlatform, FastqFile, LIBRARY_NAME, PAIRED, ProjectBundle, READ, SEQ_LANE_INDEX,
    SEQ_RUN_NAME, TransferRequest,
};
use seqrun_sync::domain::{FileLocator, ProjectId};
use seqrun_sync::error::SyncError;
use seqrun_sync::metrics::{AlignmentMetrics, MetricCategory};
use seqrun_sync::models::RecordKind;
use seqrun_sync::pulsar::LimsClient;

pub fn project_id(n: u32) -> ProjectId {
    format!("project-{n:024}").parse().unwrap()
}

pub fn file_locator(project: &ProjectId, n: u32) -> FileLocator {
    FileLocator::new(project.clone(), &format!("file-{n:024}")).unwrap()
}

/// Pulsar stand-in that keeps records as JSON and maintains the reverse
/// links (request -> runs, run -> results) the server computes.
pub struct MemoryLims {
    records: Mutex<BTreeMap<RecordKind, BTreeMap<i64, Value>>>,
    next_id: Mutex<i64>,
    creates: Mutex<Vec<RecordKind>>,
    patches: Mutex<Vec<(RecordKind, i64)>>,
}

impl Default for MemoryLims {
    fn default() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            next_id: Mutex::new(1000),
            creates: Mutex::new(Vec::new()),
            patches: Mutex::new(Vec::new()),
        }
    }
}

impl MemoryLims {
    pub fn insert(&self, kind: RecordKind, record: Value) {
        let id = record["id"].as_i64().unwrap();
        self.records
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .insert(id, record);
    }

    pub fn record(&self, kind: RecordKind, id: i64) -> Option<Value> {
        self.records
            .lock()
            .unwrap()
            .get(&kind)
            .and_then(|records| records.get(&id))
            .cloned()
    }

    pub fn all(&self, kind: RecordKind) -> Vec<Value> {
        self.records
            .lock()
            .unwrap()
            .get(&kind)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn created(&self, kind: RecordKind) -> usize {
        self.creates
            .lock()
            .unwrap()
            .iter()
            .filter(|created| **created == kind)
            .count()
    }

    pub fn total_created(&self) -> usize {
        self.creates.lock().unwrap().len()
    }

    pub fn patched(&self, kind: RecordKind) -> usize {
        self.patches
            .lock()
            .unwrap()
            .iter()
            .filter(|(patched, _)| *patched == kind)
            .count()
    }

    fn link(&self, kind: RecordKind, parent_id: i64, field: &str, child_id: i64) {
        let mut records = self.records.lock().unwrap();
        if let Some(parent) = records
            .get_mut(&kind)
            .and_then(|records| records.get_mut(&parent_id))
        {
            let ids = parent
                .as_object_mut()
                .unwrap()
                .entry(field)
                .or_insert_with(|| json!([]));
            ids.as_array_mut().unwrap().push(json!(child_id));
        }
    }
}

impl LimsClient for MemoryLims {
    fn find_by_name(&self, kind: RecordKind, name: &str) -> Result<Vec<Value>, SyncError> {
        Ok(self
            .all(kind)
            .into_iter()
            .filter(|record| {
                record["name"]
                    .as_str()
                    .is_some_and(|candidate| candidate.eq_ignore_ascii_case(name))
            })
            .collect())
    }

    fn find_by_field(
        &self,
        kind: RecordKind,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>, SyncError> {
        Ok(self.all(kind).into_iter().find(|record| {
            record
                .get(field)
                .is_some_and(|found| found.as_str() == Some(value) || found.to_string() == value)
        }))
    }

    fn get(&self, kind: RecordKind, id: i64) -> Result<Option<Value>, SyncError> {
        Ok(self.record(kind, id))
    }

    fn create(&self, kind: RecordKind, payload: Value) -> Result<Value, SyncError> {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        let mut record = payload;
        record["id"] = json!(id);
        self.insert(kind, record.clone());
        self.creates.lock().unwrap().push(kind);

        match kind {
            RecordKind::SequencingRun => {
                if let Some(request_id) = record["sequencing_request_id"].as_i64() {
                    self.link(
                        RecordKind::SequencingRequest,
                        request_id,
                        "sequencing_run_ids",
                        id,
                    );
                }
            }
            RecordKind::SequencingResult => {
                if let Some(run_id) = record["sequencing_run_id"].as_i64() {
                    self.link(
                        RecordKind::SequencingRun,
                        run_id,
                        "sequencing_result_ids",
                        id,
                    );
                }
            }
            _ => {}
        }
        Ok(record)
    }

    fn patch(&self, kind: RecordKind, id: i64, fields: Value) -> Result<Value, SyncError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&kind)
            .and_then(|records| records.get_mut(&id))
            .ok_or_else(|| SyncError::LimsStatus {
                status: 404,
                message: format!("{kind} {id} does not exist"),
            })?;
        if let (Some(target), Value::Object(fields)) = (record.as_object_mut(), fields) {
            for (key, value) in fields {
                target.insert(key, value);
            }
        }
        self.patches.lock().unwrap().push((kind, id));
        Ok(record.clone())
    }
}

/// DNAnexus stand-in serving fixed project metadata, FASTQs and metrics.
#[derive(Default)]
pub struct CannedCloud {
    pub pending: BTreeMap<ProjectId, String>,
    pub bundles: BTreeMap<ProjectId, ProjectBundle>,
    pub fastqs: BTreeMap<String, Vec<FastqFile>>,
    pub metrics: BTreeMap<String, AlignmentMetrics>,
    pub accepted_with: Mutex<Vec<TransferRequest>>,
}

impl CannedCloud {
    pub fn add_project(&mut self, bundle: ProjectBundle) {
        self.bundles.insert(bundle.project_id.clone(), bundle);
    }

    pub fn add_fastq(&mut self, barcode: &str, locator: FileLocator, read: &str) {
        let mut properties = BTreeMap::new();
        properties.insert(READ.to_string(), read.to_string());
        self.fastqs
            .entry(barcode.to_string())
            .or_default()
            .push(FastqFile {
                name: format!("{barcode}_R{read}.fastq.gz"),
                locator,
                properties,
            });
    }

    pub fn add_metrics(&mut self, metrics: AlignmentMetrics) {
        self.metrics.insert(metrics.barcode().to_string(), metrics);
    }
}

impl CloudPlatform for CannedCloud {
    fn accept_pending_transfers(
        &self,
        request: &TransferRequest,
    ) -> Result<BTreeMap<ProjectId, String>, SyncError> {
        self.accepted_with.lock().unwrap().push(request.clone());
        Ok(self.pending.clone())
    }

    fn fetch_project_bundle(&self, project: &ProjectId) -> Result<ProjectBundle, SyncError> {
        self.bundles
            .get(project)
            .cloned()
            .ok_or_else(|| SyncError::DnanexusStatus {
                status: 404,
                message: format!("{project} not found"),
            })
    }

    fn fetch_fastq_files(
        &self,
        _bundle: &ProjectBundle,
        barcode: &str,
    ) -> Result<Vec<FastqFile>, SyncError> {
        Ok(self.fastqs.get(barcode).cloned().unwrap_or_default())
    }

    fn fetch_alignment_metrics(
        &self,
        _bundle: &ProjectBundle,
        barcode: &str,
    ) -> Result<AlignmentMetrics, SyncError> {
        self.metrics
            .get(barcode)
            .cloned()
            .ok_or_else(|| SyncError::MissingMetrics {
                barcode: barcode.to_string(),
                category: "alignment_summary_metrics file".to_string(),
            })
    }
}

pub fn bundle(project: &ProjectId, library_name: &str, run_name: &str, paired: &str) -> ProjectBundle {
    let mut properties = BTreeMap::new();
    properties.insert(LIBRARY_NAME.to_string(), library_name.to_string());
    properties.insert(SEQ_RUN_NAME.to_string(), run_name.to_string());
    properties.insert(SEQ_LANE_INDEX.to_string(), "2".to_string());
    if !paired.is_empty() {
        properties.insert(PAIRED.to_string(), paired.to_string());
    }
    ProjectBundle {
        project_id: project.clone(),
        name: format!("{run_name} lane 2"),
        properties,
    }
}

/// Paired-end metrics: read 1 aligned 98.5%, read 2 97.5%, pairs 96%.
pub fn paired_metrics(barcode: &str) -> AlignmentMetrics {
    let mut metrics = AlignmentMetrics::new(barcode);
    for (category, reads, aligned) in [
        (MetricCategory::FirstOfPair, "990", "0.985"),
        (MetricCategory::SecondOfPair, "980", "0.975"),
        (MetricCategory::Pair, "1970", "0.98"),
    ] {
        metrics.insert(category, "PF_READS", reads);
        metrics.insert(category, "PCT_PF_READS_ALIGNED", aligned);
        metrics.insert(category, "PCT_READS_ALIGNED_IN_PAIRS", "0.96");
    }
    metrics
}

pub fn single_end_metrics(barcode: &str) -> AlignmentMetrics {
    let mut metrics = AlignmentMetrics::new(barcode);
    metrics.insert(MetricCategory::Unpaired, "PF_READS", "500");
    metrics.insert(MetricCategory::Unpaired, "PCT_PF_READS_ALIGNED", "0.9");
    metrics.insert(MetricCategory::Unpaired, "PCT_READS_ALIGNED_IN_PAIRS", "0");
    metrics
}

pub fn seed_provider(lims: &MemoryLims) {
    lims.insert(
        RecordKind::DataStorageProvider,
        json!({ "id": 1, "name": "DNAnexus" }),
    );
}

pub fn seed_request(lims: &MemoryLims, id: i64, name: &str, paired_end: bool, library_ids: &[i64]) {
    lims.insert(
        RecordKind::SequencingRequest,
        json!({
            "id": id,
            "name": name,
            "paired_end": paired_end,
            "library_ids": library_ids,
            "sequencing_run_ids": [],
        }),
    );
}

/// Library `id` with its own barcode record `id + 500` holding `sequence`.
pub fn seed_library(lims: &MemoryLims, id: i64, sequence: Option<&str>) {
    let barcode_id = sequence.map(|sequence| {
        let barcode_id = id + 500;
        lims.insert(
            RecordKind::Barcode,
            json!({ "id": barcode_id, "sequence": sequence }),
        );
        barcode_id
    });
    let mut library = Map::new();
    library.insert("id".to_string(), json!(id));
    library.insert("name".to_string(), json!(format!("L-{id}")));
    library.insert("barcode_id".to_string(), json!(barcode_id));
    lims.insert(RecordKind::Library, Value::Object(library));
}
