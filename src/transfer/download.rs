//! Label resolution and streamed archive downloads.
//!
//! Downloads are single-stream: one GET per archive, chunked writes to
//! disk, byte-level progress against Content-Length when the server
//! provides it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::client::ArchiveClient;
use crate::common::progress::{ByteProgress, OperationSummary};
use crate::common::ApiError;
use crate::transfer::extract::extract_archive;

/// Server-assigned accession IDs carry this prefix; anything else is a
/// human label that needs a lookup first.
pub const EXPERIMENT_ID_PREFIX: &str = "ARC_E";

pub type ByteProgressFn = Arc<dyn Fn(ByteProgress) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub output_dir: PathBuf,
    /// Unpack the fetched archive next to it.
    pub extract: bool,
    /// Remove the archive after successful extraction.
    pub cleanup: bool,
}

impl DownloadOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            extract: true,
            cleanup: true,
        }
    }
}

pub struct Downloader {
    client: Arc<ArchiveClient>,
}

impl Downloader {
    pub fn new(client: Arc<ArchiveClient>) -> Self {
        Self { client }
    }

    /// Resolve a human session label to the server-internal accession ID.
    /// IDs already matching the accession pattern pass through untouched;
    /// labels without a project scope are used as-is.
    pub async fn resolve_experiment_id(
        &self,
        project: Option<&str>,
        session: &str,
    ) -> Result<String, ApiError> {
        if session.starts_with(EXPERIMENT_ID_PREFIX) {
            return Ok(session.to_string());
        }
        let Some(project) = project else {
            return Ok(session.to_string());
        };

        let path = format!("/data/projects/{project}/experiments/{session}");
        let value = self.client.get_json(&path, &[]).await?;

        extract_experiment_id(&value).ok_or_else(|| {
            ApiError::Validation(format!(
                "session '{session}' not found in project '{project}'"
            ))
        })
    }

    /// Download an entire imaging session (all scans) as one archive.
    pub async fn download_session(
        &self,
        project: Option<&str>,
        session: &str,
        options: &DownloadOptions,
        progress: Option<ByteProgressFn>,
    ) -> OperationSummary {
        let started = Instant::now();
        let mut summary = OperationSummary {
            total: 1,
            ..Default::default()
        };

        let result = async {
            let experiment = self.resolve_experiment_id(project, session).await?;
            let path = format!("/data/experiments/{experiment}/scans/ALL/files");
            let archive_path = options.output_dir.join(format!("{session}.zip"));
            let extract_dir = options.output_dir.join(session);
            self.fetch_archive(&path, &archive_path, &extract_dir, options, progress)
                .await
        }
        .await;

        finish_summary(&mut summary, result, started);
        summary
    }

    /// Download a subset of scans in a single request (comma-joined IDs).
    /// With no resource filter the server includes everything it holds for
    /// those scans.
    pub async fn download_scans(
        &self,
        project: Option<&str>,
        session: &str,
        scan_ids: &[String],
        resource: Option<&str>,
        options: &DownloadOptions,
        progress: Option<ByteProgressFn>,
    ) -> OperationSummary {
        let started = Instant::now();
        let mut summary = OperationSummary {
            total: scan_ids.len(),
            ..Default::default()
        };

        if scan_ids.is_empty() {
            summary.errors.push("no scans requested".to_string());
            summary.duration = started.elapsed();
            return summary;
        }

        let result = async {
            let experiment = self.resolve_experiment_id(project, session).await?;
            let scan_spec = scan_ids.join(",");
            let path = match resource {
                Some(resource) => format!(
                    "/data/experiments/{experiment}/scans/{scan_spec}/resources/{resource}/files"
                ),
                None => format!("/data/experiments/{experiment}/scans/{scan_spec}/files"),
            };
            let archive_path = options.output_dir.join("scans.zip");
            let extract_dir = options.output_dir.join("scans");
            self.fetch_archive(&path, &archive_path, &extract_dir, options, progress)
                .await
        }
        .await;

        match result {
            Ok(fetched) => {
                summary.succeeded = scan_ids.len();
                summary.total_files = fetched.files;
                summary.total_bytes = fetched.bytes;
            }
            Err(err) => {
                summary.failed = scan_ids.len();
                summary.errors.push(err.to_string());
            }
        }
        summary.duration = started.elapsed();
        summary
    }

    /// Download one named resource, session-level or scan-level.
    pub async fn download_resource(
        &self,
        project: Option<&str>,
        session: &str,
        scan: Option<&str>,
        resource_label: &str,
        options: &DownloadOptions,
        progress: Option<ByteProgressFn>,
    ) -> OperationSummary {
        let started = Instant::now();
        let mut summary = OperationSummary {
            total: 1,
            ..Default::default()
        };

        let result = async {
            let experiment = self.resolve_experiment_id(project, session).await?;
            let path = match scan {
                Some(scan) => format!(
                    "/data/experiments/{experiment}/scans/{scan}/resources/{resource_label}/files"
                ),
                None => {
                    format!("/data/experiments/{experiment}/resources/{resource_label}/files")
                }
            };
            let archive_path = options.output_dir.join(format!("{resource_label}.zip"));
            let extract_dir = options.output_dir.join(resource_label);
            self.fetch_archive(&path, &archive_path, &extract_dir, options, progress)
                .await
        }
        .await;

        finish_summary(&mut summary, result, started);
        summary
    }

    async fn fetch_archive(
        &self,
        path: &str,
        archive_path: &Path,
        extract_dir: &Path,
        options: &DownloadOptions,
        progress: Option<ByteProgressFn>,
    ) -> Result<Fetched, ApiError> {
        tokio::fs::create_dir_all(&options.output_dir).await?;

        let query = [("format", "zip".to_string())];
        let bytes = self
            .stream_to_file(path, &query, archive_path, progress.as_ref())
            .await?;

        if !options.extract {
            return Ok(Fetched { bytes, files: 1 });
        }

        // A corrupted archive surfaces here; the file stays on disk for
        // inspection.
        extract_archive(archive_path, extract_dir, true)?;
        let files = count_files(extract_dir);

        if options.cleanup {
            if let Err(err) = tokio::fs::remove_file(archive_path).await {
                tracing::warn!(
                    path = %archive_path.display(),
                    error = %err,
                    "failed to remove downloaded archive"
                );
            }
        }

        Ok(Fetched { bytes, files })
    }

    /// Stream a response body to disk in chunks, reporting bytes received
    /// against the declared content length (absent means indeterminate).
    async fn stream_to_file(
        &self,
        path: &str,
        query: &[(&str, String)],
        destination: &Path,
        progress: Option<&ByteProgressFn>,
    ) -> Result<u64, ApiError> {
        let resp = self.client.get_stream(path, query).await?;
        let total = resp.content_length();

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(destination).await?;

        let mut stream = resp.bytes_stream();
        let mut received: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(ApiError::from_reqwest)?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            if let Some(callback) = progress {
                callback(ByteProgress { received, total });
            }
        }
        file.flush().await?;

        Ok(received)
    }
}

struct Fetched {
    bytes: u64,
    files: usize,
}

fn finish_summary(
    summary: &mut OperationSummary,
    result: Result<Fetched, ApiError>,
    started: Instant,
) {
    match result {
        Ok(fetched) => {
            summary.succeeded = 1;
            summary.total_files = fetched.files;
            summary.total_bytes = fetched.bytes;
        }
        Err(err) => {
            summary.failed = 1;
            summary.errors.push(err.to_string());
        }
    }
    summary.duration = started.elapsed();
}

fn count_files(dir: &Path) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

/// Two response shapes exist depending on endpoint vintage:
/// `items[0].data_fields.ID` and `ResultSet.Result[0].ID`.
fn extract_experiment_id(value: &serde_json::Value) -> Option<String> {
    let from_items = value
        .get("items")
        .and_then(|items| items.get(0))
        .and_then(|item| item.get("data_fields"))
        .and_then(|fields| fields.get("ID"));
    let from_results = value
        .get("ResultSet")
        .and_then(|rs| rs.get("Result"))
        .and_then(|r| r.get(0))
        .and_then(|r| r.get("ID"));

    match from_items.or(from_results)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
