pub mod archive;
pub mod breadcrumb;
pub mod list;
pub mod ops;
pub mod resolve;

use std::io;
use std::path::Path;
use thiserror::Error;

pub use archive::Archive;
pub use list::DirectoryEntry;
pub use resolve::{AllowedRoots, ResolvedLocation, SymlinkPolicy};

#[derive(Debug, Error)]
pub enum FsError {
    #[error("invalid root")]
    InvalidRoot,
    #[error("path escapes root")]
    PathEscape,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("archive exceeds {limit} bytes")]
    ArchiveTooLarge { limit: u64 },
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    /// Maps an io error for `path` onto the taxonomy, keeping only the file
    /// name in the message so absolute server paths never reach clients.
    pub(crate) fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> FsError + 'a {
        move |source| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| ".".to_string());
            match source.kind() {
                io::ErrorKind::NotFound => FsError::NotFound(name),
                io::ErrorKind::AlreadyExists => FsError::AlreadyExists(name),
                _ => FsError::Io { op, source },
            }
        }
    }
}

/// The closed set of operations a client can request against a location.
#[derive(Debug, Clone)]
pub enum Operation {
    List,
    MakeDir { name: String },
    Delete { name: String },
    Rename { old: String, new: String },
    Archive,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::MakeDir { .. } => "mkdir",
            Operation::Delete { .. } => "delete",
            Operation::Rename { .. } => "rename",
            Operation::Archive => "zip",
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Listing(Vec<DirectoryEntry>),
    Done,
    Archive(Archive),
}

/// Confinement gate shared by every request handler.
#[derive(Debug)]
pub struct FileManager {
    roots: AllowedRoots,
    max_archive_bytes: u64,
}

impl FileManager {
    pub fn new(roots: AllowedRoots) -> Self {
        Self { roots, max_archive_bytes: archive::DEFAULT_MAX_BYTES }
    }

    /// Caps the total size of the files read into a single archive.
    pub fn with_archive_limit(mut self, max_bytes: u64) -> Self {
        self.max_archive_bytes = max_bytes;
        self
    }

    pub fn roots(&self) -> &AllowedRoots {
        &self.roots
    }

    pub fn resolve(&self, root: &str, path: &str) -> FsResult<ResolvedLocation> {
        self.roots.resolve(root, path)
    }

    /// Resolves `root`/`path` and only then runs `op` against the result.
    pub fn execute(&self, root: &str, path: &str, op: Operation) -> FsResult<(ResolvedLocation, Outcome)> {
        let location = self.roots.resolve(root, path)?;
        let dir = location.absolute.as_path();
        let outcome = match op {
            Operation::List => Outcome::Listing(list::list(dir)?),
            Operation::MakeDir { name } => {
                ops::make_directory(dir, &name)?;
                Outcome::Done
            }
            Operation::Delete { name } => {
                ops::delete(dir, &name)?;
                Outcome::Done
            }
            Operation::Rename { old, new } => {
                ops::rename(dir, &old, &new)?;
                Outcome::Done
            }
            Operation::Archive => Outcome::Archive(archive::build_zip(dir, self.max_archive_bytes)?),
        };
        Ok((location, outcome))
    }
}
