use super::{FsError, FsResult};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_dir: bool,
    /// Bytes; 0 for directories.
    pub size: u64,
    pub modified: SystemTime,
}

/// Lists `dir`, directories first, then case-insensitive by name.
///
/// Entries whose metadata cannot be read (permission errors, files deleted
/// mid-listing) are left out instead of failing the whole listing.
pub fn list(dir: &Path) -> FsResult<Vec<DirectoryEntry>> {
    let read = fs::read_dir(dir).map_err(FsError::io("read_dir", dir))?;
    let mut items = Vec::new();
    for entry in read {
        let Ok(entry) = entry else { continue };
        // DirEntry::metadata does not traverse symlinks.
        let Ok(meta) = entry.metadata() else { continue };
        let is_dir = meta.is_dir();
        items.push(DirectoryEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
            size: if is_dir { 0 } else { meta.len() },
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    sort_entries(&mut items);
    Ok(items)
}

pub(crate) fn sort_entries(items: &mut [DirectoryEntry]) {
    items.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });
}
