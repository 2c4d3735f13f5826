use crate::error::StorageError;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Zip `session_root` into `<parent>/<folder>.zip`. Entry names keep the
/// session folder as their first component.
pub(super) fn create_archive(session_root: &Path) -> Result<PathBuf, StorageError> {
    let archive_error = |path: &Path, details: String| StorageError::Archive {
        path: path.display().to_string(),
        details,
    };

    let parent = session_root
        .parent()
        .ok_or_else(|| archive_error(session_root, "session folder has no parent".into()))?;
    let folder = session_root
        .file_name()
        .ok_or_else(|| archive_error(session_root, "session folder has no name".into()))?
        .to_string_lossy()
        .into_owned();

    let zip_path = parent.join(format!("{}.zip", folder));
    let file = File::create(&zip_path).map_err(|e| archive_error(&zip_path, e.to_string()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut pending = vec![(session_root.to_path_buf(), folder)];
    while let Some((dir, prefix)) = pending.pop() {
        zip.add_directory(format!("{}/", prefix), options)
            .map_err(|e| archive_error(&zip_path, e.to_string()))?;

        let mut children = fs::read_dir(&dir)
            .and_then(|entries| entries.collect::<io::Result<Vec<_>>>())
            .map_err(|e| archive_error(&dir, e.to_string()))?;
        children.sort_by_key(|entry| entry.file_name());

        for entry in children {
            let path = entry.path();
            let name = format!("{}/{}", prefix, entry.file_name().to_string_lossy());

            if path.is_dir() {
                pending.push((path, name));
                continue;
            }

            zip.start_file(name.as_str(), options)
                .map_err(|e| archive_error(&zip_path, e.to_string()))?;
            let mut source = File::open(&path).map_err(|e| archive_error(&path, e.to_string()))?;
            io::copy(&mut source, &mut zip).map_err(|e| archive_error(&path, e.to_string()))?;
            debug!("Archived {}", name);
        }
    }

    zip.finish()
        .map_err(|e| archive_error(&zip_path, e.to_string()))?;

    Ok(zip_path)
}
