//! Archive extraction with wrapper-segment stripping.
//!
//! Server archives wrap their content in a session-label directory; the
//! first segment is stripped so files land directly under the destination.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::common::ApiError;

/// Unpack `archive_path` under `destination`, returning the number of files
/// written. Hidden entries are skipped; entries reduced to a single segment
/// are written as-is.
pub fn extract_archive(
    archive_path: &Path,
    destination: &Path,
    strip_leading_segment: bool,
) -> Result<usize, ApiError> {
    let file = std::fs::File::open(archive_path)?;
    let mut zip = ZipArchive::new(file).map_err(|err| corrupt(archive_path, err.to_string()))?;

    let mut written = 0usize;
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|err| corrupt(archive_path, err.to_string()))?;
        if entry.is_dir() {
            continue;
        }

        let Some(relative) = sanitized_entry_path(entry.name(), strip_leading_segment) else {
            continue;
        };

        let target = destination.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out).map_err(|err| {
            // Truncated or undecodable entry data, as opposed to a local
            // write failure.
            if matches!(err.kind(), ErrorKind::InvalidData | ErrorKind::UnexpectedEof) {
                corrupt(archive_path, err.to_string())
            } else {
                ApiError::Io(err)
            }
        })?;
        written += 1;
    }

    Ok(written)
}

/// Extract every zip directly inside `session_dir` into a sibling directory
/// named after the archive. A corrupted archive is recorded and left on
/// disk for inspection; the rest keep going.
pub fn extract_session_archives(session_dir: &Path, cleanup: bool) -> (usize, Vec<String>) {
    let mut archives: Vec<PathBuf> = match std::fs::read_dir(session_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("zip")))
            .collect(),
        Err(err) => {
            return (0, vec![format!("{}: {err}", session_dir.display())]);
        }
    };
    archives.sort();

    let mut extracted = 0usize;
    let mut errors = Vec::new();

    for archive_path in archives {
        let stem = archive_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        let target = session_dir.join(stem);

        match extract_archive(&archive_path, &target, true) {
            Ok(count) => {
                tracing::debug!(
                    archive = %archive_path.display(),
                    files = count,
                    "extracted archive"
                );
                extracted += 1;
                if cleanup {
                    if let Err(err) = std::fs::remove_file(&archive_path) {
                        tracing::warn!(
                            path = %archive_path.display(),
                            error = %err,
                            "failed to remove extracted archive"
                        );
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    archive = %archive_path.display(),
                    error = %err,
                    "skipping unreadable archive"
                );
                errors.push(format!(
                    "{}: {err}",
                    archive_path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                ));
            }
        }
    }

    (extracted, errors)
}

/// Entry name -> destination-relative path. `None` means skip: hidden
/// segments, and with them `..` traversal, never reach the filesystem.
fn sanitized_entry_path(name: &str, strip_leading_segment: bool) -> Option<PathBuf> {
    let segments: Vec<&str> = name
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if segments.is_empty() {
        return None;
    }
    if segments.iter().any(|s| s.starts_with('.')) {
        return None;
    }

    let start = if strip_leading_segment && segments.len() > 1 {
        1
    } else {
        0
    };
    Some(segments[start..].iter().collect())
}

fn corrupt(path: &Path, reason: String) -> ApiError {
    ApiError::ArchiveCorrupt {
        path: path.to_path_buf(),
        reason,
    }
}
