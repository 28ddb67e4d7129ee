use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

static PROJECT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^project-[0-9A-Za-z]{24}$").unwrap());
static FILE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^file-[0-9A-Za-z]{24}$").unwrap());
static RECORD_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9_]*)-(\d+)$").unwrap());

/// DNAnexus project identifier, e.g. `project-FPg8yJQ900P4ZgzxFZbgJZY2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !PROJECT_ID_RE.is_match(trimmed) {
            return Err(SyncError::InvalidProjectId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for ProjectId {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProjectId> for String {
    fn from(value: ProjectId) -> Self {
        value.0
    }
}

/// `project-id:file-id` pair locating one file in one project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileLocator {
    project: ProjectId,
    file_id: String,
}

impl FileLocator {
    pub fn new(project: ProjectId, file_id: &str) -> Result<Self, SyncError> {
        if !FILE_ID_RE.is_match(file_id) {
            return Err(SyncError::InvalidFileLocator(format!("{project}:{file_id}")));
        }
        Ok(Self {
            project,
            file_id: file_id.to_string(),
        })
    }

    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }
}

impl fmt::Display for FileLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.file_id)
    }
}

impl FromStr for FileLocator {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (project, file_id) = value
            .trim()
            .split_once(':')
            .ok_or_else(|| SyncError::InvalidFileLocator(value.to_string()))?;
        let project = project
            .parse()
            .map_err(|_| SyncError::InvalidFileLocator(value.to_string()))?;
        Self::new(project, file_id)
    }
}

/// Record id in the `<prefix>-<numeric-id>` convention, e.g. `SREQ-25`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordName {
    pub prefix: String,
    pub id: i64,
}

impl RecordName {
    /// Returns `None` when `value` does not follow the convention.
    pub fn parse(value: &str) -> Option<Self> {
        let captures = RECORD_NAME_RE.captures(value.trim())?;
        let id = captures[2].parse().ok()?;
        Some(Self {
            prefix: captures[1].to_string(),
            id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReadNumber {
    One,
    Two,
}

impl ReadNumber {
    pub fn as_u8(self) -> u8 {
        match self {
            ReadNumber::One => 1,
            ReadNumber::Two => 2,
        }
    }
}

impl fmt::Display for ReadNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

impl FromStr for ReadNumber {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().parse::<i64>() {
            Ok(1) => Ok(ReadNumber::One),
            Ok(2) => Ok(ReadNumber::Two),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Started,
    Finished,
    Failed,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Started => write!(f, "started"),
            RunStatus::Finished => write!(f, "finished"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// How FASTQ files of one library are turned into sequencing results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResultLayout {
    /// One result per library and run, carrying read 1, read 2 and pair fields.
    #[default]
    Merged,
    /// One result per FASTQ file.
    #[value(name = "per_read")]
    PerRead,
}
