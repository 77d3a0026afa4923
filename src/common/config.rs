//! Configuration schema, defaults, and layered loading.
//!
//! Precedence: defaults < config file < environment
use anyhow::{ensure, Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

const MAX_WORKERS: usize = 64;
const MAX_BATCH_SIZE: usize = 10_000;

/// Direct server URL override, checked before the config file.
pub const ENV_URL: &str = "VAULT_URL";

pub fn url_from_env() -> Option<String> {
    std::env::var(ENV_URL).ok().filter(|v| !v.is_empty())
}

/// Default files per upload batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;
/// Default concurrent upload workers.
pub const DEFAULT_UPLOAD_WORKERS: usize = 4;
/// Default metadata request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "vaultctl")
        .map(|p| p.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("vaultctl.toml"))
}

/// Location of the cached session token.
pub fn session_cache_path() -> PathBuf {
    ProjectDirs::from("", "", "vaultctl")
        .map(|p| p.config_dir().join(".session"))
        .unwrap_or_else(|| PathBuf::from(".vaultctl-session"))
}

/// Container format for batch archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    #[default]
    Tar,
    Zip,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Tar => ".tar",
            ArchiveFormat::Zip => ".zip",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "application/x-tar",
            ArchiveFormat::Zip => "application/zip",
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tar" => Ok(ArchiveFormat::Tar),
            "zip" => Ok(ArchiveFormat::Zip),
            other => anyhow::bail!("unsupported archive format: {other}"),
        }
    }
}

/// Server-side handling of data that already exists at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    None,
    Append,
    #[default]
    Delete,
}

impl OverwritePolicy {
    pub fn as_param(&self) -> &'static str {
        match self {
            OverwritePolicy::None => "none",
            OverwritePolicy::Append => "append",
            OverwritePolicy::Delete => "delete",
        }
    }
}

impl FromStr for OverwritePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(OverwritePolicy::None),
            "append" => Ok(OverwritePolicy::Append),
            "delete" => Ok(OverwritePolicy::Delete),
            other => anyhow::bail!("unsupported overwrite policy: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub verify_ssl: bool,
    pub timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            verify_ssl: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Transfer tuning parameters shared by upload and download paths.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Max files per batch archive
    pub batch_size: usize,
    /// Max concurrent batch transfers
    pub upload_workers: usize,
    pub archive_format: ArchiveFormat,
    pub overwrite: OverwritePolicy,
    /// Import straight into the archive instead of the staging area
    pub direct_archive: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            upload_workers: DEFAULT_UPLOAD_WORKERS,
            archive_format: ArchiveFormat::default(),
            overwrite: OverwritePolicy::default(),
            direct_archive: true,
        }
    }
}

/// Fully resolved application configuration after all layers merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub transfer: TransferSettings,
}

impl AppConfig {
    /// Validates transfer bounds and rejects unsafe values.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.transfer.batch_size >= 1,
            "Invalid config: transfer.batch_size must be >= 1"
        );
        ensure!(
            self.transfer.batch_size <= MAX_BATCH_SIZE,
            "Invalid config: transfer.batch_size must be <= {MAX_BATCH_SIZE}"
        );
        ensure!(
            self.transfer.upload_workers >= 1,
            "Invalid config: transfer.upload_workers must be >= 1"
        );
        ensure!(
            self.transfer.upload_workers <= MAX_WORKERS,
            "Invalid config: transfer.upload_workers must be <= {MAX_WORKERS}"
        );
        ensure!(
            self.server.timeout_secs >= 1,
            "Invalid config: server.timeout_secs must be >= 1"
        );
        Ok(())
    }
}

/// Loads config from defaults/file/env.
pub fn load_config() -> Result<AppConfig> {
    let path = config_path();

    let config: AppConfig = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("VAULT_").split("_"))
        .extract()
        .context("Failed to load configuration")?;

    config.validate()?;

    Ok(config)
}
