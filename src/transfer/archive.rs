//! Temp archive construction with RAII cleanup.
//!
//! Each batch packs into one private archive in the system temp directory;
//! the file disappears when the handle drops, on every exit path.

use anyhow::{Context, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zip::write::FileOptions;

use crate::common::ArchiveFormat;

pub struct TempArchive {
    path: PathBuf,
    bytes: u64,
}

impl TempArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for TempArchive {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove temp archive");
        }
    }
}

/// Pack `files` into a single archive, naming entries relative to
/// `base_dir`. Files outside `base_dir` fall back to their bare filename.
pub fn build_archive(
    files: &[PathBuf],
    base_dir: &Path,
    format: ArchiveFormat,
) -> Result<TempArchive> {
    if files.is_empty() {
        anyhow::bail!("No files to archive");
    }

    let entries: Vec<(PathBuf, String)> = files
        .iter()
        .map(|file| (file.clone(), entry_name(file, base_dir)))
        .collect();

    let archive_path =
        std::env::temp_dir().join(format!("vaultctl-{}{}", Uuid::new_v4(), format.extension()));

    let result = match format {
        ArchiveFormat::Zip => write_zip_archive(&archive_path, &entries),
        ArchiveFormat::Tar => write_tar_archive(&archive_path, &entries),
    };
    if let Err(err) = result {
        // Writer may have left a partial file behind.
        let _ = std::fs::remove_file(&archive_path);
        return Err(err);
    }

    let bytes = std::fs::metadata(&archive_path)
        .with_context(|| format!("Failed to stat {}", archive_path.display()))?
        .len();

    Ok(TempArchive {
        path: archive_path,
        bytes,
    })
}

fn entry_name(file: &Path, base_dir: &Path) -> String {
    let relative = file
        .strip_prefix(base_dir)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| {
            PathBuf::from(file.file_name().map(|n| n.to_os_string()).unwrap_or_default())
        });
    relative.to_string_lossy().replace('\\', "/")
}

fn write_zip_archive(archive_path: &Path, entries: &[(PathBuf, String)]) -> Result<()> {
    let file = File::create(archive_path)
        .with_context(|| format!("Failed to create zip archive {}", archive_path.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .large_file(true);

    for (source_path, entry_name) in entries {
        let mut source = File::open(source_path)
            .with_context(|| format!("Failed to open {}", source_path.display()))?;
        writer
            .start_file(entry_name.as_str(), options)
            .with_context(|| format!("Failed to start zip entry {entry_name}"))?;
        io::copy(&mut source, &mut writer)
            .with_context(|| format!("Failed to add {} to zip", source_path.display()))?;
    }

    writer.finish().context("Failed to finalize zip archive")?;
    Ok(())
}

fn write_tar_archive(archive_path: &Path, entries: &[(PathBuf, String)]) -> Result<()> {
    let file = File::create(archive_path)
        .with_context(|| format!("Failed to create tar archive {}", archive_path.display()))?;
    let mut builder = tar::Builder::new(file);

    for (source_path, entry_name) in entries {
        builder
            .append_path_with_name(source_path, entry_name)
            .with_context(|| format!("Failed to add {} to tar", source_path.display()))?;
    }

    builder.finish().context("Failed to finalize tar archive")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn write_tree(dir: &TempDir) -> Vec<PathBuf> {
        let series = dir.path().join("series_01");
        std::fs::create_dir_all(&series).unwrap();
        let a = series.join("scan_a.dcm");
        let b = series.join("scan_b.dcm");
        std::fs::write(&a, b"aaaa").unwrap();
        std::fs::write(&b, b"bbbb").unwrap();
        vec![a, b]
    }

    #[test]
    fn zip_archive_preserves_relative_names() {
        let dir = TempDir::new().unwrap();
        let files = write_tree(&dir);

        let archive = build_archive(&files, dir.path(), ArchiveFormat::Zip).unwrap();
        assert!(archive.bytes() > 0);

        let mut zip = zip::ZipArchive::new(File::open(archive.path()).unwrap()).unwrap();
        let mut names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["series_01/scan_a.dcm", "series_01/scan_b.dcm"]);

        let mut content = String::new();
        zip.by_name("series_01/scan_a.dcm")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "aaaa");
    }

    #[test]
    fn tar_archive_preserves_relative_names() {
        let dir = TempDir::new().unwrap();
        let files = write_tree(&dir);

        let archive = build_archive(&files, dir.path(), ArchiveFormat::Tar).unwrap();

        let mut tar = tar::Archive::new(File::open(archive.path()).unwrap());
        let mut names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["series_01/scan_a.dcm", "series_01/scan_b.dcm"]);
    }

    #[test]
    fn temp_file_is_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let files = write_tree(&dir);

        let archive = build_archive(&files, dir.path(), ArchiveFormat::Zip).unwrap();
        let path = archive.path().to_path_buf();
        assert!(path.exists());

        drop(archive);
        assert!(!path.exists());
    }

    #[test]
    fn empty_file_set_is_rejected() {
        assert!(build_archive(&[], Path::new("/tmp"), ArchiveFormat::Zip).is_err());
    }
}
