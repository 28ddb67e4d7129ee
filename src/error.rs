use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("found {count} sequencing requests named '{name}'")]
    #[diagnostic(help("rename the duplicates in the LIMS, then re-run the import"))]
    AmbiguousLookup { name: String, count: usize },

    #[error("no sequencing request matches '{0}' by name or record id")]
    RequestNotFound(String),

    #[error("library {library_id} does not have a barcode set")]
    BarcodeNotSet { library_id: i64 },

    #[error("no FASTQ files for barcode {barcode} in project {project}")]
    FastqNotFound { project: String, barcode: String },

    #[error("unknown read number '{value}' on file {file}; expected 1 or 2")]
    UnknownReadNumber { file: String, value: String },

    #[error("invalid DNAnexus project id: {0}")]
    InvalidProjectId(String),

    #[error("invalid DNAnexus file locator: {0}")]
    InvalidFileLocator(String),

    #[error("project {project} is missing property '{key}'")]
    MissingProperty { project: String, key: String },

    #[error("project {project} has malformed property {key}='{value}'")]
    MalformedProperty {
        project: String,
        key: String,
        value: String,
    },

    #[error("alignment metrics for barcode {barcode} lack {category}")]
    MissingMetrics { barcode: String, category: String },

    #[error("failed to parse alignment summary metrics: {0}")]
    MetricsParse(String),

    #[error("data storage provider not found: {0}")]
    ProviderNotFound(String),

    #[error("refusing to send invalid {kind} payload: {message}")]
    InvalidPayload { kind: String, message: String },

    #[error("failed to decode {kind} record: {message}")]
    RecordDecode { kind: String, message: String },

    #[error("LIMS request failed: {0}")]
    LimsHttp(String),

    #[error("LIMS returned status {status}: {message}")]
    LimsStatus { status: u16, message: String },

    #[error("DNAnexus request failed: {0}")]
    DnanexusHttp(String),

    #[error("DNAnexus returned status {status}: {message}")]
    DnanexusStatus { status: u16, message: String },

    #[error("missing setting: {0}")]
    #[diagnostic(help("set it in seqrun-sync.json or through the environment"))]
    MissingSetting(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl SyncError {
    /// Errors that abort a single project import but leave the batch running.
    pub fn is_project_scoped(&self) -> bool {
        matches!(
            self,
            SyncError::AmbiguousLookup { .. }
                | SyncError::RequestNotFound(_)
                | SyncError::BarcodeNotSet { .. }
                | SyncError::FastqNotFound { .. }
                | SyncError::UnknownReadNumber { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::AmbiguousLookup { .. } => "ambiguous_lookup",
            SyncError::RequestNotFound(_) => "request_not_found",
            SyncError::BarcodeNotSet { .. } => "barcode_not_set",
            SyncError::FastqNotFound { .. } => "fastq_not_found",
            SyncError::UnknownReadNumber { .. } => "unknown_read_number",
            SyncError::InvalidProjectId(_) => "invalid_project_id",
            SyncError::InvalidFileLocator(_) => "invalid_file_locator",
            SyncError::MissingProperty { .. } => "missing_property",
            SyncError::MalformedProperty { .. } => "malformed_property",
            SyncError::MissingMetrics { .. } => "missing_metrics",
            SyncError::MetricsParse(_) => "metrics_parse",
            SyncError::ProviderNotFound(_) => "provider_not_found",
            SyncError::InvalidPayload { .. } => "invalid_payload",
            SyncError::RecordDecode { .. } => "record_decode",
            SyncError::LimsHttp(_) | SyncError::LimsStatus { .. } => "lims_transport",
            SyncError::DnanexusHttp(_) | SyncError::DnanexusStatus { .. } => "dnanexus_transport",
            SyncError::MissingSetting(_) | SyncError::ConfigRead(_) | SyncError::ConfigParse(_) => {
                "config"
            }
            SyncError::Filesystem(_) => "filesystem",
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::LimsHttp(_)
                | SyncError::LimsStatus { .. }
                | SyncError::DnanexusHttp(_)
                | SyncError::DnanexusStatus { .. }
        )
    }
}
