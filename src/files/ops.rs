use super::resolve::lexical_relative;
use super::{FsError, FsResult};
use path_clean::PathClean;
use std::ffi::OsStr;
use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Component, Path, PathBuf};

/// Final component of a client-supplied name.
///
/// Directory prefixes are dropped (`a/b` becomes `b`). Names carrying a `..`
/// component or with no final component at all are escape attempts.
pub fn base_name(name: &str) -> FsResult<&OsStr> {
    let path = Path::new(name);
    if name.contains('\0') || path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(FsError::PathEscape);
    }
    path.file_name().ok_or(FsError::PathEscape)
}

/// `dir` joined with the base name of `name`, verified to be a strict
/// descendant of `dir`.
pub fn confined_child(dir: &Path, name: &str) -> FsResult<PathBuf> {
    let target = dir.join(base_name(name)?).clean();
    ensure_child(dir, &target)?;
    Ok(target)
}

fn ensure_child(dir: &Path, target: &Path) -> FsResult<()> {
    match lexical_relative(dir, target) {
        Some(rel) if rel != Path::new(".") => Ok(()),
        _ => Err(FsError::PathEscape),
    }
}

pub fn make_directory(dir: &Path, name: &str) -> FsResult<PathBuf> {
    let target = confined_child(dir, name)?;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(&target)
        .map_err(FsError::io("mkdir", &target))?;
    Ok(target)
}

pub fn delete(dir: &Path, name: &str) -> FsResult<()> {
    let target = confined_child(dir, name)?;
    let meta = fs::symlink_metadata(&target).map_err(FsError::io("stat", &target))?;
    if meta.is_dir() {
        fs::remove_dir_all(&target).map_err(FsError::io("remove_dir_all", &target))
    } else {
        fs::remove_file(&target).map_err(FsError::io("remove_file", &target))
    }
}

pub fn rename(dir: &Path, old: &str, new: &str) -> FsResult<()> {
    let from = dir.join(base_name(old)?);
    let to = dir.join(base_name(new)?);
    for p in [&from, &to] {
        ensure_child(dir, &p.clean())?;
    }
    fs::rename(&from, &to).map_err(FsError::io("rename", &from))
}

/// Where an uploaded file named `file_name` lands inside `dir`.
pub fn upload_target(dir: &Path, file_name: &str) -> FsResult<PathBuf> {
    confined_child(dir, file_name)
}
