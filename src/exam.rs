//! Exam-root classification: one walk, three disjoint sets.
//!
//! A top-level directory is a resource directory only while no DICOM-like
//! file has been seen anywhere beneath it; the first hit evicts it
//! permanently. Hidden path segments are pruned before descent.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::common::ApiError;

/// Extensions recognized as imaging data (case-insensitive).
pub const DICOM_EXTENSIONS: [&str; 4] = ["dcm", "dicom", "ima", "img"];

/// Classification result. The three sets partition the relevant namespace
/// and are sorted for reproducible output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamClassification {
    /// DICOM-like files anywhere under the root (recursive).
    pub dicom_files: Vec<PathBuf>,
    /// Top-level directories containing no DICOM-like files.
    pub resource_dirs: Vec<PathBuf>,
    /// Top-level non-hidden files that are not DICOM-like.
    pub misc_files: Vec<PathBuf>,
}

/// A file is DICOM-like when its extension is in the known set or when it
/// has no extension at all (raw scanner output commonly lacks one).
pub fn is_dicom_like(path: &Path) -> bool {
    match path.extension().and_then(OsStr::to_str) {
        Some(ext) => DICOM_EXTENSIONS.iter().any(|d| ext.eq_ignore_ascii_case(d)),
        None => true,
    }
}

fn is_hidden(name: &OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

/// Classify an exam root in a single recursive pass.
pub fn classify_exam_root(root: &Path) -> Result<ExamClassification, ApiError> {
    if !root.is_dir() {
        return Err(ApiError::PathValidation {
            path: root.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }

    let mut dicom_files = Vec::new();
    let mut misc_files = Vec::new();
    // Top-level dir -> has a DICOM-like descendant. Keys arrive before
    // their children because the walk is depth-first.
    let mut top_level_dirs: BTreeMap<PathBuf, bool> = BTreeMap::new();

    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

    for entry in walker.filter_map(|e| e.ok()) {
        if entry.file_type().is_dir() {
            if entry.depth() == 1 {
                top_level_dirs.insert(entry.path().to_path_buf(), false);
            }
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if is_dicom_like(path) {
            dicom_files.push(path.to_path_buf());
            if entry.depth() > 1 {
                if let Some(top) = top_level_owner(root, path) {
                    if let Some(has_dicom) = top_level_dirs.get_mut(&top) {
                        *has_dicom = true;
                    }
                }
            }
        } else if entry.depth() == 1 {
            misc_files.push(path.to_path_buf());
        }
    }

    dicom_files.sort();
    misc_files.sort();
    let resource_dirs = top_level_dirs
        .into_iter()
        .filter(|(_, has_dicom)| !has_dicom)
        .map(|(dir, _)| dir)
        .collect();

    Ok(ExamClassification {
        dicom_files,
        resource_dirs,
        misc_files,
    })
}

/// First path segment under `root` that owns this nested file.
fn top_level_owner(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(root).ok()?;
    let first = relative.components().next()?;
    Some(root.join(first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn dicom_like_by_extension_or_absence() {
        assert!(is_dicom_like(Path::new("scan.dcm")));
        assert!(is_dicom_like(Path::new("scan.DCM")));
        assert!(is_dicom_like(Path::new("scan.IMA")));
        assert!(is_dicom_like(Path::new("MR000001")));
        assert!(!is_dicom_like(Path::new("notes.txt")));
        assert!(!is_dicom_like(Path::new("report.pdf")));
    }

    #[test]
    fn missing_root_is_a_path_validation_error() {
        let result = classify_exam_root(Path::new("/no/such/exam/root"));
        assert!(matches!(result, Err(ApiError::PathValidation { .. })));
    }

    #[test]
    fn nested_dicom_evicts_top_level_dir_from_resources() {
        let root = TempDir::new().unwrap();
        // Mixed directory: mostly text, one nested DICOM file.
        touch(&root.path().join("mixed/readme.txt"));
        touch(&root.path().join("mixed/deep/scan.dcm"));
        // Pure ancillary directory.
        touch(&root.path().join("reports/summary.pdf"));

        let result = classify_exam_root(root.path()).unwrap();

        assert_eq!(result.resource_dirs, vec![root.path().join("reports")]);
        assert_eq!(
            result.dicom_files,
            vec![root.path().join("mixed/deep/scan.dcm")]
        );
    }

    #[test]
    fn hidden_segments_are_pruned_everywhere() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join(".DS_Store"));
        touch(&root.path().join(".cache/scan.dcm"));
        touch(&root.path().join("series/.hidden.dcm"));
        touch(&root.path().join("series/scan.dcm"));

        let result = classify_exam_root(root.path()).unwrap();

        assert_eq!(result.dicom_files, vec![root.path().join("series/scan.dcm")]);
        assert!(result.resource_dirs.is_empty());
        assert!(result.misc_files.is_empty());
    }

    #[test]
    fn top_level_files_split_between_dicom_and_misc() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join("scan.dcm"));
        touch(&root.path().join("RAW0001"));
        touch(&root.path().join("notes.txt"));

        let result = classify_exam_root(root.path()).unwrap();

        assert_eq!(
            result.dicom_files,
            vec![root.path().join("RAW0001"), root.path().join("scan.dcm")]
        );
        assert_eq!(result.misc_files, vec![root.path().join("notes.txt")]);
    }

    #[test]
    fn non_dicom_inside_subdirectories_is_not_misc() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join("reports/notes.txt"));

        let result = classify_exam_root(root.path()).unwrap();

        assert!(result.misc_files.is_empty());
        assert_eq!(result.resource_dirs, vec![root.path().join("reports")]);
    }

    #[test]
    fn output_is_sorted_and_deterministic() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join("b/scan.dcm"));
        touch(&root.path().join("a/scan.dcm"));
        touch(&root.path().join("zeta/report.pdf"));
        touch(&root.path().join("alpha/report.pdf"));

        let first = classify_exam_root(root.path()).unwrap();
        let second = classify_exam_root(root.path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.resource_dirs,
            vec![root.path().join("alpha"), root.path().join("zeta")]
        );
        let mut sorted = first.dicom_files.clone();
        sorted.sort();
        assert_eq!(first.dicom_files, sorted);
    }
}
