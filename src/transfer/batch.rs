//! Batch partitioning and pre-flight path validation.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::common::ApiError;

/// A bounded group of files destined for one archive upload. Lives for a
/// single transfer attempt and is never shared across workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBatch {
    pub batch_id: usize,
    pub files: Vec<PathBuf>,
}

/// Split into chunks of at most `batch_size`; only the last batch may be
/// shorter. `batch_size == 0` puts everything in one batch.
pub fn split_fixed(files: &[PathBuf], batch_size: usize) -> Vec<TransferBatch> {
    if files.is_empty() {
        return Vec::new();
    }
    if batch_size == 0 {
        return vec![TransferBatch {
            batch_id: 1,
            files: files.to_vec(),
        }];
    }

    files
        .chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| TransferBatch {
            batch_id: index + 1,
            files: chunk.to_vec(),
        })
        .collect()
}

/// Round-robin into exactly `min(n, len)` non-empty batches. Useful when
/// the worker count is fixed regardless of file count.
pub fn split_n_way(files: &[PathBuf], n: usize) -> Vec<TransferBatch> {
    if files.is_empty() {
        return Vec::new();
    }
    if n == 0 {
        return vec![TransferBatch {
            batch_id: 1,
            files: files.to_vec(),
        }];
    }

    let count = n.min(files.len());
    let mut batches: Vec<TransferBatch> = (1..=count)
        .map(|batch_id| TransferBatch {
            batch_id,
            files: Vec::new(),
        })
        .collect();

    for (index, file) in files.iter().enumerate() {
        batches[index % count].files.push(file.clone());
    }

    batches
}

/// Reject a file set containing the same resolved path twice, even via
/// different relative spellings. Runs before any network call.
pub fn check_unique_paths(files: &[PathBuf]) -> Result<(), ApiError> {
    let mut seen: HashMap<PathBuf, &PathBuf> = HashMap::with_capacity(files.len());

    for file in files {
        let resolved = std::fs::canonicalize(file).map_err(|err| ApiError::PathValidation {
            path: file.clone(),
            reason: err.to_string(),
        })?;

        if let Some(previous) = seen.insert(resolved, file) {
            return Err(ApiError::Validation(format!(
                "duplicate file queued for transfer: {} and {} resolve to the same path",
                previous.display(),
                file.display()
            )));
        }
    }

    Ok(())
}
