//! Concurrent batched upload through the archive import endpoint.
//!
//! One long-lived semaphore bounds in-flight batches. A failing batch is
//! isolated: its outcome lands in the summary and siblings keep going.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use reqwest::Method;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::client::{ArchiveClient, Payload, RetryPolicy};
use crate::common::progress::{BatchProgress, OperationSummary, TransferOutcome};
use crate::common::{ArchiveFormat, OverwritePolicy};
use crate::transfer::archive::build_archive;
use crate::transfer::batch::TransferBatch;

pub const IMPORT_PATH: &str = "/data/services/import";
pub const DEFAULT_IMPORT_HANDLER: &str = "DICOM-zip";

pub type BatchProgressFn = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Where an imported archive lands, plus the server-side merge policy.
#[derive(Debug, Clone)]
pub struct UploadDestination {
    pub project: String,
    pub subject: String,
    pub session: String,
    pub overwrite: OverwritePolicy,
    pub direct_archive: bool,
}

impl UploadDestination {
    fn query_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("import-handler", DEFAULT_IMPORT_HANDLER.to_string()),
            ("Ignore-Unparsable", "true".to_string()),
            ("project", self.project.clone()),
            ("subject", self.subject.clone()),
            ("session", self.session.clone()),
            ("overwrite", self.overwrite.as_param().to_string()),
            ("overwrite_files", "true".to_string()),
            ("quarantine", "false".to_string()),
            ("triggerPipelines", "true".to_string()),
            ("rename", "false".to_string()),
            (
                "Direct-Archive",
                if self.direct_archive { "true" } else { "false" }.to_string(),
            ),
            ("inbody", "true".to_string()),
        ]
    }
}

pub struct Uploader {
    client: Arc<ArchiveClient>,
    // Sized once at construction; all batch tasks share it.
    limiter: Arc<Semaphore>,
    format: ArchiveFormat,
    retry: RetryPolicy,
}

impl Uploader {
    pub fn new(client: Arc<ArchiveClient>, workers: usize, format: ArchiveFormat) -> Self {
        Self {
            client,
            limiter: Arc::new(Semaphore::new(workers.max(1))),
            format,
            retry: RetryPolicy::upload(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Upload every batch, at most `workers` in flight. The summary is a
    /// multiset merge of outcomes; completion order does not matter, but
    /// the progress callback sees a strictly increasing completed count.
    pub async fn upload_batches(
        &self,
        batches: Vec<TransferBatch>,
        base_dir: &Path,
        destination: &UploadDestination,
        progress: Option<BatchProgressFn>,
    ) -> OperationSummary {
        let started = Instant::now();
        let total = batches.len();
        let mut summary = OperationSummary {
            total,
            ..Default::default()
        };

        // Counter and callback share one lock so observers never see the
        // completed count move backwards.
        let completed = Arc::new(Mutex::new(0usize));
        let mut tasks: JoinSet<TransferOutcome> = JoinSet::new();

        for batch in batches {
            let client = Arc::clone(&self.client);
            let limiter = Arc::clone(&self.limiter);
            let completed = Arc::clone(&completed);
            let progress = progress.clone();
            let params = destination.query_params();
            let base_dir = base_dir.to_path_buf();
            let format = self.format;
            let retry = self.retry;

            tasks.spawn(async move {
                let _permit = match limiter.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return failed_outcome(
                            batch.batch_id,
                            batch.files.len(),
                            Instant::now(),
                            "worker pool closed",
                        )
                    }
                };

                let outcome = upload_one_batch(client, batch, base_dir, format, params, retry).await;

                {
                    let mut done = match completed.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    *done += 1;
                    if let Some(callback) = progress.as_ref() {
                        callback(BatchProgress {
                            completed: *done,
                            total,
                            batch_id: outcome.batch_id,
                            success: outcome.success,
                        });
                    }
                }

                outcome
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(&outcome),
                Err(err) => {
                    summary.failed += 1;
                    summary.errors.push(format!("worker task failed: {err}"));
                }
            }
        }

        summary.duration = started.elapsed();
        if !summary.success() {
            tracing::warn!(
                failed = summary.failed,
                total = summary.total,
                "upload completed with failures"
            );
        }
        summary
    }
}

async fn upload_one_batch(
    client: Arc<ArchiveClient>,
    batch: TransferBatch,
    base_dir: PathBuf,
    format: ArchiveFormat,
    params: Vec<(&'static str, String)>,
    retry: RetryPolicy,
) -> TransferOutcome {
    let started = Instant::now();
    let batch_id = batch.batch_id;
    let file_count = batch.files.len();

    // Zip/tar construction is blocking work.
    let files = batch.files;
    let archive = match tokio::task::spawn_blocking(move || build_archive(&files, &base_dir, format))
        .await
    {
        Ok(Ok(archive)) => archive,
        Ok(Err(err)) => {
            return failed_outcome(batch_id, file_count, started, &format!("archive: {err:#}"))
        }
        Err(err) => {
            return failed_outcome(batch_id, file_count, started, &format!("archive task: {err}"))
        }
    };

    let archive_bytes = archive.bytes();
    tracing::debug!(batch_id, file_count, archive_bytes, "uploading batch");

    let result = client
        .execute(
            Method::POST,
            IMPORT_PATH,
            &params,
            Payload::File {
                content_type: format.content_type(),
                path: archive.path().to_path_buf(),
            },
            &retry,
        )
        .await;

    // Temp archive removed here on success and failure alike.
    drop(archive);

    match result {
        Ok(_) => TransferOutcome {
            batch_id,
            success: true,
            duration: started.elapsed(),
            file_count,
            archive_bytes,
            error: None,
        },
        Err(err) => TransferOutcome {
            batch_id,
            success: false,
            duration: started.elapsed(),
            file_count,
            archive_bytes,
            error: Some(err.to_string()),
        },
    }
}

fn failed_outcome(
    batch_id: usize,
    file_count: usize,
    started: Instant,
    error: &str,
) -> TransferOutcome {
    TransferOutcome {
        batch_id,
        success: false,
        duration: started.elapsed(),
        file_count,
        archive_bytes: 0,
        error: Some(error.to_string()),
    }
}
