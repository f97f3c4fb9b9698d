use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::{Result, TransportError};

const ARCHIVE_FILE: &str = "snapshot.zip";
const EXTRACT_DIR: &str = "contents";

/// A snapshot unpacked into its own scratch directory.
///
/// The directory is removed when this value is dropped, so every exit path of
/// a migration releases it. `close` does the same but reports failures.
pub struct ExtractedSnapshot {
    workspace: TempDir,
    root: PathBuf,
}

impl ExtractedSnapshot {
    /// The snapshot's single top-level directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn close(self) {
        let path = self.workspace.path().to_path_buf();
        if let Err(e) = self.workspace.close() {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch directory");
        }
    }
}

/// Writes the archive under `scratch_dir` and extracts it.
///
/// Snapshots from the code host wrap their contents in exactly one top-level
/// directory; anything else is rejected as malformed.
pub fn extract_snapshot(archive: &[u8], scratch_dir: &Path) -> Result<ExtractedSnapshot> {
    fs::create_dir_all(scratch_dir)?;
    let workspace = tempfile::Builder::new()
        .prefix("snapshot-")
        .tempdir_in(scratch_dir)?;

    let archive_path = workspace.path().join(ARCHIVE_FILE);
    fs::write(&archive_path, archive)?;

    let extract_dir = workspace.path().join(EXTRACT_DIR);
    fs::create_dir(&extract_dir)?;

    let mut zip = zip::ZipArchive::new(File::open(&archive_path)?)
        .map_err(|e| TransportError::MalformedSnapshot(e.to_string()))?;
    zip.extract(&extract_dir)
        .map_err(|e| TransportError::MalformedSnapshot(e.to_string()))?;

    let root = single_root(&extract_dir)?;
    tracing::debug!(entries = zip.len(), "extracted snapshot");

    Ok(ExtractedSnapshot { workspace, root })
}

fn single_root(dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;

    match entries.as_slice() {
        [entry] => {
            if entry.file_type()?.is_dir() {
                Ok(entry.path())
            } else {
                Err(TransportError::MalformedSnapshot(
                    "top-level entry is not a directory".to_string(),
                ))
            }
        }
        [] => Err(TransportError::MalformedSnapshot(
            "archive is empty".to_string(),
        )),
        many => Err(TransportError::MalformedSnapshot(format!(
            "expected one top-level directory, found {} entries",
            many.len()
        ))),
    }
}

#[cfg(test)]
pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
