use super::{FsError, FsResult};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

/// Member listing everything left out of a partial archive.
pub const SKIPPED_MANIFEST: &str = ".porter-skipped.txt";

/// Input size cap used when none is configured (1 GiB).
pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Relative to the archived directory.
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug)]
pub struct Archive {
    pub bytes: Vec<u8>,
    pub file_count: usize,
    pub skipped: Vec<SkippedEntry>,
}

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

/// Zips a confined file or directory tree into memory.
///
/// The source itself must be readable; inside a directory walk, members that
/// cannot be read are skipped, logged and listed in [`SKIPPED_MANIFEST`].
/// Fails with [`FsError::ArchiveTooLarge`] once the files read exceed
/// `max_bytes`.
pub fn build_zip(source: &Path, max_bytes: u64) -> FsResult<Archive> {
    let meta = fs::metadata(source).map_err(FsError::io("stat", source))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut budget = Budget { used: 0, limit: max_bytes };
    let mut file_count = 0usize;
    let mut skipped = Vec::new();

    if meta.is_dir() {
        walk_dir(&mut writer, source, &mut budget, &mut file_count, &mut skipped)?;
    } else {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let cap = budget.reserve(meta.len())?;
        let mut file = File::open(source).map_err(FsError::io("open", source))?;
        writer.start_file(name, file_options())?;
        let copied = io::copy(&mut (&mut file).take(cap), &mut writer)
            .map_err(FsError::io("read", source))?;
        budget.settle(meta.len(), copied)?;
        file_count = 1;
    }

    if !skipped.is_empty() {
        let mut manifest = String::new();
        for s in &skipped {
            let _ = writeln!(manifest, "{}\t{}", zip_name(&s.path), s.reason);
        }
        writer.start_file(SKIPPED_MANIFEST, file_options())?;
        writer
            .write_all(manifest.as_bytes())
            .map_err(|source| FsError::Io { op: "write manifest", source })?;
    }

    let bytes = writer.finish()?.into_inner();
    Ok(Archive { bytes, file_count, skipped })
}

/// Running total of source bytes read into one archive.
struct Budget {
    used: u64,
    limit: u64,
}

impl Budget {
    fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    /// Claims `len` bytes up front so oversized files are never read.
    /// Returns the read cap for this file, one byte past what still fits.
    fn reserve(&mut self, len: u64) -> FsResult<u64> {
        if len > self.remaining() {
            return Err(FsError::ArchiveTooLarge { limit: self.limit });
        }
        self.used += len;
        Ok(len.saturating_add(self.remaining()).saturating_add(1))
    }

    /// Swaps a reservation for the bytes actually copied; files can change
    /// size between stat and read.
    fn settle(&mut self, reserved: u64, copied: u64) -> FsResult<()> {
        self.used = self.used - reserved + copied;
        if self.used > self.limit {
            return Err(FsError::ArchiveTooLarge { limit: self.limit });
        }
        Ok(())
    }
}

fn walk_dir(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    base: &Path,
    budget: &mut Budget,
    file_count: &mut usize,
    skipped: &mut Vec<SkippedEntry>,
) -> FsResult<()> {
    let mut record = |path: &Path, reason: String| {
        let rel = path.strip_prefix(base).unwrap_or(path).to_path_buf();
        tracing::warn!(path = %rel.display(), reason = %reason, "archive member skipped");
        skipped.push(SkippedEntry { path: rel, reason });
    };

    for entry in WalkDir::new(base).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                if e.depth() == 0 {
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk failed"));
                    return Err(FsError::io("read_dir", base)(source));
                }
                let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                record(&path, e.to_string());
                continue;
            }
        };
        if entry.depth() == 0 || entry.file_type().is_dir() {
            continue;
        }
        if !entry.file_type().is_file() {
            let kind = if entry.path_is_symlink() { "symlink" } else { "special file" };
            record(entry.path(), format!("{kind} not archived"));
            continue;
        }
        let rel = entry.path().strip_prefix(base).unwrap_or(entry.path());
        let mut file = match File::open(entry.path()) {
            Ok(f) => f,
            Err(e) => {
                record(entry.path(), e.to_string());
                continue;
            }
        };
        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        let cap = budget.reserve(len)?;
        writer.start_file(zip_name(rel), file_options())?;
        match io::copy(&mut (&mut file).take(cap), writer) {
            Ok(copied) => budget.settle(len, copied)?,
            Err(e) => {
                writer.abort_file()?;
                budget.settle(len, 0)?;
                record(entry.path(), e.to_string());
                continue;
            }
        }
        *file_count += 1;
    }
    Ok(())
}

fn zip_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Download name for an archive of `relative` (without the `.zip` suffix).
pub fn archive_name(relative: &Path, absolute: &Path) -> String {
    let flat = zip_name(relative);
    if !flat.is_empty() && flat != "." {
        return flat.replace('/', "_");
    }
    match absolute.file_name() {
        Some(n) if !n.is_empty() => n.to_string_lossy().into_owned(),
        _ => "download".to_string(),
    }
}
