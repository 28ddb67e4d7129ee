use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::domain::{FileLocator, ProjectId};
use crate::error::SyncError;
use crate::metrics::{self, AlignmentMetrics};
use crate::pulsar::{is_retryable_error, is_retryable_status};

pub const LIBRARY_NAME: &str = "library_name";
pub const SEQ_RUN_NAME: &str = "seq_run_name";
pub const SEQ_LANE_INDEX: &str = "seq_lane_index";
pub const PAIRED: &str = "paired";
pub const READ: &str = "read";
pub const BARCODE: &str = "barcode";

/// Read-only snapshot of a DNAnexus project's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectBundle {
    pub project_id: ProjectId,
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

impl ProjectBundle {
    pub fn property(&self, key: &str) -> Result<&str, SyncError> {
        self.properties
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| SyncError::MissingProperty {
                project: self.project_id.to_string(),
                key: key.to_string(),
            })
    }

    pub fn library_name(&self) -> Result<&str, SyncError> {
        self.property(LIBRARY_NAME)
    }

    pub fn seq_run_name(&self) -> Result<&str, SyncError> {
        self.property(SEQ_RUN_NAME)
    }

    /// Raw `paired` property; empty when the project does not say.
    pub fn paired(&self) -> &str {
        self.properties.get(PAIRED).map(String::as_str).unwrap_or("")
    }

    pub fn lane(&self) -> Result<u32, SyncError> {
        let raw = self.property(SEQ_LANE_INDEX)?;
        raw.trim()
            .parse()
            .map_err(|_| SyncError::MalformedProperty {
                project: self.project_id.to_string(),
                key: SEQ_LANE_INDEX.to_string(),
                value: raw.to_string(),
            })
    }
}

/// FASTQ output of one barcode together with its file properties.
#[derive(Debug, Clone, PartialEq)]
pub struct FastqFile {
    pub locator: FileLocator,
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

impl FastqFile {
    pub fn read_property(&self) -> &str {
        self.properties.get(READ).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Billing org that takes ownership of the projects.
    pub org: String,
    /// Only accept projects whose `queue` property matches.
    pub queue: Option<String>,
    /// Permission level granted to the org after acceptance.
    pub share_level: String,
}

pub trait CloudPlatform {
    fn accept_pending_transfers(
        &self,
        request: &TransferRequest,
    ) -> Result<BTreeMap<ProjectId, String>, SyncError>;
    fn fetch_project_bundle(&self, project: &ProjectId) -> Result<ProjectBundle, SyncError>;
    fn fetch_fastq_files(
        &self,
        bundle: &ProjectBundle,
        barcode: &str,
    ) -> Result<Vec<FastqFile>, SyncError>;
    fn fetch_alignment_metrics(
        &self,
        bundle: &ProjectBundle,
        barcode: &str,
    ) -> Result<AlignmentMetrics, SyncError>;
}

impl<C: CloudPlatform + ?Sized> CloudPlatform for &C {
    fn accept_pending_transfers(
        &self,
        request: &TransferRequest,
    ) -> Result<BTreeMap<ProjectId, String>, SyncError> {
        (**self).accept_pending_transfers(request)
    }

    fn fetch_project_bundle(&self, project: &ProjectId) -> Result<ProjectBundle, SyncError> {
        (**self).fetch_project_bundle(project)
    }

    fn fetch_fastq_files(
        &self,
        bundle: &ProjectBundle,
        barcode: &str,
    ) -> Result<Vec<FastqFile>, SyncError> {
        (**self).fetch_fastq_files(bundle, barcode)
    }

    fn fetch_alignment_metrics(
        &self,
        bundle: &ProjectBundle,
        barcode: &str,
    ) -> Result<AlignmentMetrics, SyncError> {
        (**self).fetch_alignment_metrics(bundle, barcode)
    }
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    results: Vec<FoundObject>,
    #[serde(default)]
    next: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FoundObject {
    id: String,
    #[serde(default)]
    describe: Description,
}

#[derive(Debug, Default, Deserialize)]
struct Description {
    #[serde(default)]
    name: String,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default, rename = "pendingTransfer")]
    pending_transfer: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DownloadLink {
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

#[derive(Clone)]
pub struct DnanexusHttpClient {
    client: Client,
    download_client: Client,
    base_url: String,
}

impl DnanexusHttpClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, SyncError> {
        let user_agent = HeaderValue::from_str(&format!("seqrun-sync/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| SyncError::DnanexusHttp(err.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, user_agent.clone());
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|err| SyncError::DnanexusHttp(err.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SyncError::DnanexusHttp(err.to_string()))?;

        // Download URLs are pre-signed and must not carry the API token.
        let mut download_headers = HeaderMap::new();
        download_headers.insert(USER_AGENT, user_agent);
        let download_client = Client::builder()
            .default_headers(download_headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| SyncError::DnanexusHttp(err.to_string()))?;

        Ok(Self {
            client,
            download_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn call(&self, route: &str, body: &Value) -> Result<Value, SyncError> {
        let url = format!("{}/{}", self.base_url, route.trim_start_matches('/'));
        let response = self.send_with_retries(|| self.client.post(&url).json(body))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| SyncError::DnanexusHttp(err.to_string()))
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, SyncError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "DNAnexus request failed".to_string());
        Err(SyncError::DnanexusStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, SyncError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(status, attempt, "retrying DNAnexus request");
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(error = %err, attempt, "retrying DNAnexus request");
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(SyncError::DnanexusHttp(err.to_string()));
                }
            }
        }
    }

    /// Runs a `/system/find*` query to exhaustion.
    fn find_all(&self, route: &str, query: Value) -> Result<Vec<FoundObject>, SyncError> {
        let mut found = Vec::new();
        let mut query = query;
        loop {
            let page: FindResponse = serde_json::from_value(self.call(route, &query)?)
                .map_err(|err| SyncError::DnanexusHttp(err.to_string()))?;
            found.extend(page.results);
            match page.next {
                Some(next) if !next.is_null() => query["starting"] = next,
                _ => break,
            }
        }
        Ok(found)
    }

    fn find_files(
        &self,
        project: &ProjectId,
        glob: &str,
        properties: Option<Value>,
    ) -> Result<Vec<FoundObject>, SyncError> {
        let mut query = json!({
            "scope": { "project": project.as_str(), "folder": "/", "recurse": true },
            "class": "file",
            "name": { "glob": glob },
            "describe": { "fields": { "name": true, "properties": true } },
        });
        if let Some(properties) = properties {
            query["properties"] = properties;
        }
        self.find_all("system/findDataObjects", query)
    }

    fn download_text(&self, file: &FileLocator) -> Result<String, SyncError> {
        let link: DownloadLink = serde_json::from_value(self.call(
            &format!("{}/download", file.file_id()),
            &json!({ "duration": 900, "project": file.project().as_str() }),
        )?)
        .map_err(|err| SyncError::DnanexusHttp(err.to_string()))?;

        let response = self.send_with_retries(|| {
            let mut request = self.download_client.get(&link.url);
            for (name, value) in &link.headers {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    request = request.header(name, value);
                }
            }
            request
        })?;
        let bytes = Self::handle_status(response)?
            .bytes()
            .map_err(|err| SyncError::DnanexusHttp(err.to_string()))?;
        decode_text(&bytes)
    }
}

impl CloudPlatform for DnanexusHttpClient {
    fn accept_pending_transfers(
        &self,
        request: &TransferRequest,
    ) -> Result<BTreeMap<ProjectId, String>, SyncError> {
        let candidates = self.find_all(
            "system/findProjects",
            json!({
                "level": "VIEW",
                "describe": {
                    "fields": { "name": true, "pendingTransfer": true, "properties": true }
                },
            }),
        )?;

        let mut accepted = BTreeMap::new();
        for candidate in candidates {
            let pending = candidate
                .describe
                .pending_transfer
                .as_ref()
                .is_some_and(|value| !value.is_null());
            if !pending {
                continue;
            }
            if let Some(queue) = &request.queue {
                if candidate.describe.properties.get("queue") != Some(queue) {
                    continue;
                }
            }
            let project: ProjectId = candidate.id.parse()?;
            self.call(
                &format!("{project}/acceptTransfer"),
                &json!({ "billTo": request.org }),
            )?;
            self.call(
                &format!("{project}/invite"),
                &json!({
                    "invitee": request.org,
                    "level": request.share_level,
                    "suppressEmailNotification": true,
                }),
            )?;
            tracing::info!(project_id = %project, org = %request.org, "accepted project transfer");
            accepted.insert(project, candidate.describe.name);
        }
        Ok(accepted)
    }

    fn fetch_project_bundle(&self, project: &ProjectId) -> Result<ProjectBundle, SyncError> {
        let raw = self.call(
            &format!("{project}/describe"),
            &json!({ "fields": { "name": true, "properties": true } }),
        )?;
        let description: Description = serde_json::from_value(raw)
            .map_err(|err| SyncError::DnanexusHttp(err.to_string()))?;
        Ok(ProjectBundle {
            project_id: project.clone(),
            name: description.name,
            properties: description.properties,
        })
    }

    fn fetch_fastq_files(
        &self,
        bundle: &ProjectBundle,
        barcode: &str,
    ) -> Result<Vec<FastqFile>, SyncError> {
        let mut files = self
            .find_files(
                &bundle.project_id,
                "*.fastq.gz",
                Some(json!({ BARCODE: barcode })),
            )?
            .into_iter()
            .map(|found| {
                Ok(FastqFile {
                    locator: FileLocator::new(bundle.project_id.clone(), &found.id)?,
                    name: found.describe.name,
                    properties: found.describe.properties,
                })
            })
            .collect::<Result<Vec<_>, SyncError>>()?;
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    fn fetch_alignment_metrics(
        &self,
        bundle: &ProjectBundle,
        barcode: &str,
    ) -> Result<AlignmentMetrics, SyncError> {
        let mut found = self.find_files(
            &bundle.project_id,
            &format!("*{barcode}*alignment_summary_metrics*"),
            None,
        )?;
        found.sort_by(|a, b| a.describe.name.cmp(&b.describe.name));
        let file = found.first().ok_or_else(|| SyncError::MissingMetrics {
            barcode: barcode.to_string(),
            category: "alignment_summary_metrics file".to_string(),
        })?;
        if found.len() > 1 {
            tracing::debug!(
                project_id = %bundle.project_id,
                barcode,
                chosen = %file.describe.name,
                "several alignment summary metrics files match"
            );
        }
        let locator = FileLocator::new(bundle.project_id.clone(), &file.id)?;
        let text = self.download_text(&locator)?;
        metrics::parse(barcode, &text)
    }
}

fn decode_text(bytes: &[u8]) -> Result<String, SyncError> {
    let mut text = String::new();
    if bytes.starts_with(&[0x1f, 0x8b]) {
        GzDecoder::new(bytes)
            .read_to_string(&mut text)
            .map_err(|err| SyncError::MetricsParse(err.to_string()))?;
    } else {
        text = String::from_utf8(bytes.to_vec())
            .map_err(|err| SyncError::MetricsParse(err.to_string()))?;
    }
    Ok(text)
}
