use super::{FsError, FsResult};
use anyhow::Context;
use path_clean::PathClean;
use serde::Deserialize;
use std::io;
use std::path::{Component, Path, PathBuf};

/// How symlinks inside a root are treated during resolution.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SymlinkPolicy {
    /// Purely lexical confinement. A symlink inside a root may still point
    /// outside of it.
    #[default]
    Lexical,
    /// Additionally canonicalize the deepest existing ancestor of every
    /// resolved path and require it to stay under the canonical root.
    Contain,
}

#[derive(Debug, Clone)]
struct Root {
    path: PathBuf,
    canonical: Option<PathBuf>,
}

/// Allow-list of browsable roots, fixed at startup.
#[derive(Debug, Clone)]
pub struct AllowedRoots {
    roots: Vec<Root>,
    policy: SymlinkPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub root: PathBuf,
    /// `.` for the root itself.
    pub relative: PathBuf,
    pub absolute: PathBuf,
}

impl ResolvedLocation {
    pub fn is_root(&self) -> bool {
        self.relative == Path::new(".")
    }

    /// Relative path as the client sees it, always `/`-separated.
    pub fn relative_display(&self) -> String {
        if self.is_root() {
            return String::new();
        }
        self.relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl AllowedRoots {
    pub fn new<I, P>(paths: I, policy: SymlinkPolicy) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut roots: Vec<Root> = Vec::new();
        for p in paths {
            let path = p.as_ref().clean();
            if !path.is_absolute() {
                anyhow::bail!("allowed root must be absolute: {}", path.display());
            }
            if roots.iter().any(|r| r.path == path) {
                continue;
            }
            let canonical = match policy {
                SymlinkPolicy::Lexical => None,
                SymlinkPolicy::Contain => Some(
                    dunce::canonicalize(&path)
                        .with_context(|| format!("canonicalizing root {}", path.display()))?,
                ),
            };
            roots.push(Root { path, canonical });
        }
        Ok(Self { roots, policy })
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.roots.iter().map(|r| r.path.as_path())
    }

    pub fn first(&self) -> Option<&Path> {
        self.roots.first().map(|r| r.path.as_path())
    }

    pub fn policy(&self) -> SymlinkPolicy {
        self.policy
    }

    pub fn resolve(&self, root_param: &str, rel_param: &str) -> FsResult<ResolvedLocation> {
        let wanted = Path::new(root_param).clean();
        let root = self
            .roots
            .iter()
            .find(|r| r.path == wanted)
            .ok_or(FsError::InvalidRoot)?;

        if rel_param.contains('\0') {
            return Err(FsError::PathEscape);
        }
        let rel = if rel_param.is_empty() || rel_param == "/" { "." } else { rel_param };
        // Anchoring at `/` makes every leading `..` collapse against it.
        let anchored = PathBuf::from(format!("/{rel}")).clean();
        let cleaned = anchored.strip_prefix("/").unwrap_or(anchored.as_path()).to_path_buf();

        let absolute = root.path.join(&cleaned).clean();
        let relative = lexical_relative(&root.path, &absolute).ok_or(FsError::PathEscape)?;

        if let Some(canonical_root) = &root.canonical {
            contain_symlinks(canonical_root, &absolute)?;
        }

        Ok(ResolvedLocation {
            root: root.path.clone(),
            relative,
            absolute,
        })
    }
}

/// Relative path from `base` to `target` without touching the filesystem.
/// `None` when `target` is not `base` or one of its descendants.
pub(crate) fn lexical_relative(base: &Path, target: &Path) -> Option<PathBuf> {
    let rel = target.strip_prefix(base).ok()?;
    if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
        return None;
    }
    if rel.as_os_str().is_empty() {
        Some(PathBuf::from("."))
    } else {
        Some(rel.to_path_buf())
    }
}

fn contain_symlinks(canonical_root: &Path, absolute: &Path) -> FsResult<()> {
    let mut existing = absolute.to_path_buf();
    loop {
        match dunce::canonicalize(&existing) {
            Ok(real) if real.starts_with(canonical_root) => return Ok(()),
            Ok(_) => return Err(FsError::PathEscape),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !existing.pop() {
                    return Err(FsError::PathEscape);
                }
            }
            Err(e) => return Err(FsError::io("canonicalize", absolute)(e)),
        }
    }
}
