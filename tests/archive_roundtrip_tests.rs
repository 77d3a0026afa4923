//! Round-trip: files packed into an archive, then extracted with the
//! wrapper segment stripped, reconstruct their original relative paths.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use vaultctl::common::ArchiveFormat;
use vaultctl::transfer::{build_archive, extract_archive};

fn touch(path: &Path, content: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn relative_files(root: &Path) -> BTreeSet<PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
        .collect()
}

#[test]
fn zip_round_trip_strips_wrapper_and_drops_hidden_entries() {
    let work = TempDir::new().unwrap();

    // Exam tree wrapped the way servers wrap session archives: a single
    // leading label directory around the real content.
    let wrapper = work.path().join("SESSION_LABEL");
    let originals = [
        PathBuf::from("scans/3/DICOM/img_0001.dcm"),
        PathBuf::from("scans/3/DICOM/img_0002.dcm"),
        PathBuf::from("resources/notes.txt"),
        PathBuf::from("RAW0001"),
    ];
    for rel in &originals {
        touch(&wrapper.join(rel), rel.to_string_lossy().as_bytes());
    }
    let hidden = wrapper.join(".DS_Store");
    touch(&hidden, b"junk");

    let mut files: Vec<PathBuf> = originals.iter().map(|rel| wrapper.join(rel)).collect();
    files.push(hidden);

    // base_dir is the wrapper's parent, so entry names carry the wrapper
    // segment exactly like a server-produced archive.
    let archive = build_archive(&files, work.path(), ArchiveFormat::Zip).unwrap();

    let dest = work.path().join("restored");
    let written = extract_archive(archive.path(), &dest, true).unwrap();

    assert_eq!(written, originals.len(), "hidden entry must not be written");

    let restored = relative_files(&dest);
    let expected: BTreeSet<PathBuf> = originals.iter().cloned().collect();
    assert_eq!(restored, expected);

    // Content survives the trip.
    for rel in &originals {
        assert_eq!(
            std::fs::read(dest.join(rel)).unwrap(),
            rel.to_string_lossy().as_bytes()
        );
    }
}

#[test]
fn single_segment_entries_survive_without_stripping() {
    let work = TempDir::new().unwrap();

    let file = work.path().join("standalone.dcm");
    touch(&file, b"payload");

    // base_dir equals the file's parent: the entry has one segment only.
    let archive = build_archive(&[file], work.path(), ArchiveFormat::Zip).unwrap();

    let dest = work.path().join("restored");
    let written = extract_archive(archive.path(), &dest, true).unwrap();

    assert_eq!(written, 1);
    assert_eq!(std::fs::read(dest.join("standalone.dcm")).unwrap(), b"payload");
}
