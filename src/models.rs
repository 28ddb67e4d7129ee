use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::RunStatus;
use crate::error::SyncError;

/// Pulsar model backing a record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    SequencingRequest,
    Library,
    Barcode,
    PairedBarcode,
    SequencingRun,
    SequencingResult,
    DataStorage,
    DataStorageProvider,
}

impl RecordKind {
    /// Path segment of the model's REST resource.
    pub fn endpoint(self) -> &'static str {
        match self {
            RecordKind::SequencingRequest => "sequencing_requests",
            RecordKind::Library => "libraries",
            RecordKind::Barcode => "barcodes",
            RecordKind::PairedBarcode => "paired_barcodes",
            RecordKind::SequencingRun => "sequencing_runs",
            RecordKind::SequencingResult => "sequencing_results",
            RecordKind::DataStorage => "data_storages",
            RecordKind::DataStorageProvider => "data_storage_providers",
        }
    }

    /// Key the server expects request bodies to be wrapped in.
    pub fn param_key(self) -> &'static str {
        match self {
            RecordKind::SequencingRequest => "sequencing_request",
            RecordKind::Library => "library",
            RecordKind::Barcode => "barcode",
            RecordKind::PairedBarcode => "paired_barcode",
            RecordKind::SequencingRun => "sequencing_run",
            RecordKind::SequencingResult => "sequencing_result",
            RecordKind::DataStorage => "data_storage",
            RecordKind::DataStorageProvider => "data_storage_provider",
        }
    }

    /// Abbreviation used in record display names such as `SREQ-25`.
    pub fn abbreviation(self) -> &'static str {
        match self {
            RecordKind::SequencingRequest => "SREQ",
            RecordKind::Library => "L",
            RecordKind::Barcode => "BC",
            RecordKind::PairedBarcode => "PBC",
            RecordKind::SequencingRun => "SRUN",
            RecordKind::SequencingResult => "SRES",
            RecordKind::DataStorage => "DS",
            RecordKind::DataStorageProvider => "DSP",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.param_key())
    }
}

pub trait Record: DeserializeOwned {
    const KIND: RecordKind;

    fn id(&self) -> i64;
}

/// Typed body of a create or patch call.
pub trait Payload: Serialize {
    type Output: Record;

    fn validate(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencingRequest {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub paired_end: bool,
    #[serde(default)]
    pub library_ids: Vec<i64>,
    #[serde(default)]
    pub sequencing_run_ids: Vec<i64>,
}

impl SequencingRequest {
    pub fn display_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => format!("{}-{}", RecordKind::SequencingRequest.abbreviation(), self.id),
        }
    }
}

impl Record for SequencingRequest {
    const KIND: RecordKind = RecordKind::SequencingRequest;

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub barcode_id: Option<i64>,
    #[serde(default)]
    pub paired_barcode_id: Option<i64>,
}

impl Record for Library {
    const KIND: RecordKind = RecordKind::Library;

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Barcode {
    pub id: i64,
    #[serde(default)]
    pub sequence: Option<String>,
}

impl Record for Barcode {
    const KIND: RecordKind = RecordKind::Barcode;

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedBarcode {
    pub id: i64,
    #[serde(default)]
    pub index1_id: Option<i64>,
    #[serde(default)]
    pub index2_id: Option<i64>,
}

impl Record for PairedBarcode {
    const KIND: RecordKind = RecordKind::PairedBarcode;

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencingRun {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub lane: Option<u32>,
    #[serde(default)]
    pub data_storage_id: Option<i64>,
    #[serde(default)]
    pub sequencing_request_id: Option<i64>,
    #[serde(default)]
    pub sequencing_result_ids: Vec<i64>,
    #[serde(default)]
    pub forward_read_len: Option<u32>,
    #[serde(default)]
    pub reverse_read_len: Option<u32>,
}

impl SequencingRun {
    pub fn is_finished(&self) -> bool {
        self.status == Some(RunStatus::Finished)
    }
}

impl Record for SequencingRun {
    const KIND: RecordKind = RecordKind::SequencingRun;

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStorage {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub project_identifier: Option<String>,
    #[serde(default)]
    pub data_storage_provider_id: Option<i64>,
}

impl Record for DataStorage {
    const KIND: RecordKind = RecordKind::DataStorage;

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStorageProvider {
    pub id: i64,
    pub name: String,
}

impl Record for DataStorageProvider {
    const KIND: RecordKind = RecordKind::DataStorageProvider;

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencingResult {
    pub id: i64,
    pub library_id: i64,
    pub sequencing_run_id: i64,
    #[serde(default)]
    pub mapper: Option<String>,
    #[serde(default)]
    pub read1_uri: Option<String>,
    #[serde(default)]
    pub read1_count: Option<u64>,
    #[serde(default)]
    pub read1_aligned_perc: Option<f64>,
    #[serde(default)]
    pub read2_uri: Option<String>,
    #[serde(default)]
    pub read2_count: Option<u64>,
    #[serde(default)]
    pub read2_aligned_perc: Option<f64>,
    #[serde(default)]
    pub pair_aligned_perc: Option<f64>,
}

impl Record for SequencingResult {
    const KIND: RecordKind = RecordKind::SequencingResult;

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDataStorage {
    pub name: String,
    pub project_identifier: String,
    pub data_storage_provider_id: i64,
}

impl Payload for NewDataStorage {
    type Output = DataStorage;

    fn validate(&self) -> Result<(), SyncError> {
        if self.project_identifier.trim().is_empty() {
            return Err(invalid(RecordKind::DataStorage, "empty project_identifier"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSequencingRun {
    pub name: String,
    pub sequencing_request_id: i64,
    pub status: RunStatus,
    pub lane: u32,
    pub data_storage_id: i64,
}

impl Payload for NewSequencingRun {
    type Output = SequencingRun;

    fn validate(&self) -> Result<(), SyncError> {
        if self.name.trim().is_empty() {
            return Err(invalid(RecordKind::SequencingRun, "empty name"));
        }
        Ok(())
    }
}

/// Fields of a sequencing run that the importer may repair.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SequencingRunPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_storage_id: Option<i64>,
}

impl SequencingRunPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.data_storage_id.is_none()
    }
}

impl Payload for SequencingRunPatch {
    type Output = SequencingRun;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequencingRequestPatch {
    pub paired_end: bool,
}

impl Payload for SequencingRequestPatch {
    type Output = SequencingRequest;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSequencingResult {
    pub library_id: i64,
    pub sequencing_run_id: i64,
    pub mapper: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read1_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read1_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read1_aligned_perc: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read2_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read2_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read2_aligned_perc: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair_aligned_perc: Option<f64>,
}

impl NewSequencingResult {
    pub fn new(library_id: i64, sequencing_run_id: i64, mapper: &str) -> Self {
        Self {
            library_id,
            sequencing_run_id,
            mapper: mapper.to_string(),
            read1_uri: None,
            read1_count: None,
            read1_aligned_perc: None,
            read2_uri: None,
            read2_count: None,
            read2_aligned_perc: None,
            pair_aligned_perc: None,
        }
    }

    /// True when `existing` already records every read URI this payload carries.
    pub fn is_satisfied_by(&self, existing: &SequencingResult) -> bool {
        if existing.library_id != self.library_id
            || existing.sequencing_run_id != self.sequencing_run_id
        {
            return false;
        }
        let same = |wanted: &Option<String>, have: &Option<String>| match wanted {
            Some(uri) => have.as_deref() == Some(uri.as_str()),
            None => true,
        };
        same(&self.read1_uri, &existing.read1_uri) && same(&self.read2_uri, &existing.read2_uri)
    }
}

impl Payload for NewSequencingResult {
    type Output = SequencingResult;

    fn validate(&self) -> Result<(), SyncError> {
        if self.read1_uri.is_none() && self.read2_uri.is_none() {
            return Err(invalid(RecordKind::SequencingResult, "no read URI"));
        }
        let percentages = [
            self.read1_aligned_perc,
            self.read2_aligned_perc,
            self.pair_aligned_perc,
        ];
        if let Some(bad) = percentages
            .into_iter()
            .flatten()
            .find(|value| !(0.0..=100.0).contains(value))
        {
            return Err(invalid(
                RecordKind::SequencingResult,
                &format!("percentage {bad} outside 0-100"),
            ));
        }
        Ok(())
    }
}

fn invalid(kind: RecordKind, message: &str) -> SyncError {
    SyncError::InvalidPayload {
        kind: kind.to_string(),
        message: message.to_string(),
    }
}
