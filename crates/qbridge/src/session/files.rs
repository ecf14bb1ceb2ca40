use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use qbridge_protocol::FileEntry;
use walkdir::WalkDir;

/// Regular files below `dir`, sorted by relative path. Hidden entries are
/// skipped. A missing directory lists as empty.
pub fn list_files(dir: &Path) -> io::Result<Vec<FileEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::debug!("Skipping unreadable entry under {:?}: {}", dir, e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = entry.metadata().map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);

        files.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: relative,
            size: metadata.len(),
            modified,
            mime_type: mime_guess::from_path(entry.path())
                .first()
                .map(|m| m.essence_str().to_string()),
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
