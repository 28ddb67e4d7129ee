use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::dnanexus::TransferRequest;
use crate::domain::ResultLayout;
use crate::error::SyncError;

pub const DEFAULT_CONFIG_FILE: &str = "seqrun-sync.json";
pub const DEFAULT_DNANEXUS_URL: &str = "https://api.dnanexus.com";
pub const DEFAULT_ORG: &str = "org-snyder_encode";
pub const DEFAULT_SHARE_LEVEL: &str = "CONTRIBUTE";
pub const DEFAULT_STORAGE_PROVIDER: &str = "DNAnexus";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub lims_url: Option<String>,
    #[serde(default)]
    pub dnanexus_url: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub share_level: Option<String>,
    #[serde(default)]
    pub storage_provider: Option<String>,
    #[serde(default)]
    pub result_layout: Option<ResultLayout>,
    #[serde(default)]
    pub fail_on_project_error: Option<bool>,
    #[serde(default)]
    pub log_dir: Option<Utf8PathBuf>,
}

/// Values read from the process environment; tokens never come from the file.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub lims_url: Option<String>,
    pub lims_token: Option<String>,
    pub dnanexus_url: Option<String>,
    pub dnanexus_token: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            lims_url: read("PULSAR_API_URL"),
            lims_token: read("PULSAR_TOKEN"),
            dnanexus_url: read("DX_API_URL"),
            dnanexus_token: read("DX_API_TOKEN"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub lims_url: String,
    pub lims_token: Option<String>,
    pub dnanexus_url: String,
    pub dnanexus_token: Option<String>,
    pub transfer: TransferRequest,
    pub storage_provider: String,
    pub result_layout: ResultLayout,
    pub fail_on_project_error: bool,
    pub log_dir: Utf8PathBuf,
}

impl ResolvedConfig {
    pub fn lims_token(&self) -> Result<&str, SyncError> {
        self.lims_token
            .as_deref()
            .ok_or_else(|| SyncError::MissingSetting("PULSAR_TOKEN".to_string()))
    }

    pub fn dnanexus_token(&self) -> Result<&str, SyncError> {
        self.dnanexus_token
            .as_deref()
            .ok_or_else(|| SyncError::MissingSetting("DX_API_TOKEN".to_string()))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SyncError> {
        let config = Self::load(path)?;
        Self::resolve_config(config, EnvOverrides::from_env())
    }

    /// Reads the config file; a missing default file yields the defaults.
    pub fn load(path: Option<&str>) -> Result<Config, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| SyncError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config, env: EnvOverrides) -> Result<ResolvedConfig, SyncError> {
        let lims_url = env
            .lims_url
            .or(config.lims_url)
            .ok_or_else(|| SyncError::MissingSetting("lims_url".to_string()))?;
        let dnanexus_url = env
            .dnanexus_url
            .or(config.dnanexus_url)
            .unwrap_or_else(|| DEFAULT_DNANEXUS_URL.to_string());
        let log_dir = match config.log_dir {
            Some(dir) => dir,
            None => default_log_dir()?,
        };

        Ok(ResolvedConfig {
            lims_url,
            lims_token: env.lims_token,
            dnanexus_url,
            dnanexus_token: env.dnanexus_token,
            transfer: TransferRequest {
                org: config.org.unwrap_or_else(|| DEFAULT_ORG.to_string()),
                queue: config.queue,
                share_level: config
                    .share_level
                    .unwrap_or_else(|| DEFAULT_SHARE_LEVEL.to_string()),
            },
            storage_provider: config
                .storage_provider
                .unwrap_or_else(|| DEFAULT_STORAGE_PROVIDER.to_string()),
            result_layout: config.result_layout.unwrap_or_default(),
            fail_on_project_error: config.fail_on_project_error.unwrap_or(false),
            log_dir,
        })
    }
}

pub fn default_log_dir() -> Result<Utf8PathBuf, SyncError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.data_local_dir().join("seqrun-sync").join("logs")).ok()
        })
        .ok_or_else(|| SyncError::Filesystem("unable to resolve log directory".to_string()))
}
