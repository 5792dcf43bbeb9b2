// Dashboard file store: existence checks, creation, rename/rewrite,
// deletion, and empty-directory pruning under a fixed working root.
//
// The only component that touches the working directory. Every operation
// is single-file; there is no multi-file transaction. Paths are
// working-root-relative strings produced by
// `dashsync_common::path::dashboard_rel_path`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use dashsync_common::error::SyncError;
use dashsync_common::path::parent_rel;

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store over an existing working directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SyncError::PathNotDir);
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn abs(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Check that a dashboard file exists and, when `expected` is given,
    /// that its content matches byte-for-byte.
    pub fn check(&self, rel: &str, expected: Option<&str>) -> Result<(), SyncError> {
        let path = self.abs(rel);

        if !path.is_file() {
            return Err(SyncError::NoFileExists);
        }

        if let Some(expected) = expected {
            if !is_valid_json(expected) {
                return Err(SyncError::InvalidJson);
            }
            let on_disk = fs::read_to_string(&path)?;
            if on_disk != expected {
                return Err(SyncError::JsonMismatch);
            }
        }

        Ok(())
    }

    /// Create a dashboard file, extending the directory structure by at
    /// most one missing leaf level.
    pub fn create(&self, rel: &str, content: &str) -> Result<(), SyncError> {
        let path = self.abs(rel);

        if path.is_file() {
            return Err(SyncError::DuplicateName);
        }
        if !is_valid_json(content) {
            return Err(SyncError::InvalidJson);
        }

        self.ensure_parent(&path)?;
        fs::write(&path, content).map_err(write_error)?;
        Ok(())
    }

    /// Move and/or rewrite a dashboard file.
    ///
    /// When a path change is requested and the target already exists as a
    /// file, the old file is still deleted (and its parent pruned) before
    /// the conflict is reported, so a doomed rename never leaves an
    /// orphaned source behind.
    pub fn update(
        &self,
        old_rel: &str,
        new_rel: Option<&str>,
        new_content: Option<&str>,
    ) -> Result<(), SyncError> {
        let target = new_rel.filter(|n| *n != old_rel);

        if target.is_none() && new_content.is_none() {
            return Err(SyncError::NothingToDo);
        }

        let old_path = self.abs(old_rel);
        if !old_path.is_file() {
            return Err(SyncError::OldPathMissing);
        }

        if let Some(content) = new_content {
            if !is_valid_json(content) {
                return Err(SyncError::InvalidJson);
            }
            // Content is rewritten at the old path first; a later rename
            // carries it along.
            fs::write(&old_path, content).map_err(write_error)?;
        }

        if let Some(new_rel) = target {
            let new_path = self.abs(new_rel);

            if new_path.is_file() {
                fs::remove_file(&old_path)?;
                self.prune_parent_best_effort(old_rel);
                return Err(SyncError::DuplicateName);
            }

            self.ensure_parent(&new_path)?;
            fs::rename(&old_path, &new_path).map_err(write_error)?;
            self.prune_parent_best_effort(old_rel);
        }

        Ok(())
    }

    /// Delete a dashboard file and prune its parent directory if now empty.
    pub fn delete(&self, rel: &str) -> Result<(), SyncError> {
        let path = self.abs(rel);

        if !path.is_file() {
            return Err(SyncError::NoFileExists);
        }

        fs::remove_file(&path)?;
        self.prune_parent_best_effort(rel);
        Ok(())
    }

    /// Remove a directory only if it contains zero entries. Never
    /// cascades beyond one level.
    pub fn prune_if_empty(&self, dir_rel: &str) -> Result<(), SyncError> {
        let path = self.abs(dir_rel);

        if !path.is_dir() {
            return Err(SyncError::PathNotDir);
        }
        if fs::read_dir(&path)?.next().is_some() {
            return Err(SyncError::DirNotEmpty);
        }

        fs::remove_dir(&path)?;
        Ok(())
    }

    /// Prune the parent directory of `rel` if it is now empty.
    /// NotADirectory/NotEmpty are expected outcomes and ignored; anything
    /// else is logged and swallowed so it cannot mask the primary result.
    fn prune_parent_best_effort(&self, rel: &str) {
        let Some(parent) = parent_rel(rel) else {
            return;
        };
        match self.prune_if_empty(parent) {
            Ok(()) | Err(SyncError::PathNotDir) | Err(SyncError::DirNotEmpty) => {}
            Err(error) => {
                warn!(dir = parent, error = %error, "unexpected error pruning directory");
            }
        }
    }

    /// Create the immediate parent of `path` if missing. Exactly one
    /// level: a grandparent that is also missing fails the operation.
    fn ensure_parent(&self, path: &Path) -> Result<(), SyncError> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        if parent.is_dir() {
            return Ok(());
        }
        match fs::create_dir(parent) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SyncError::ParentDirMissing),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                Err(SyncError::IncorrectPermissions)
            }
            Err(e) => Err(SyncError::Io(e)),
        }
    }
}

fn is_valid_json(content: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(content).is_ok()
}

fn write_error(e: io::Error) -> SyncError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => SyncError::IncorrectPermissions,
        io::ErrorKind::NotFound => SyncError::ParentDirMissing,
        _ => SyncError::Io(e),
    }
}
