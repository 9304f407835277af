//! The quarantine object directory one push stages into.
//!
//! Objects received during a push land in `<repo>/objects/<quarantine_id>`
//! rather than the repository's object store. On success the directory is
//! left in place for the downstream ref-update machinery to promote; every
//! failure path removes it. Removal is guaranteed by a guard that is
//! disarmed only on the success path.

use std::ffi::OsString;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

/// A scoped quarantine directory.
#[derive(Debug)]
pub struct Quarantine {
    path: PathBuf,
    repo_objects: PathBuf,
    armed: bool,
}

impl Quarantine {
    /// Lay out the quarantine for `repo` under the caller-supplied id. No
    /// filesystem changes happen until [`create_dirs`](Self::create_dirs).
    pub fn new(repo_path: &Path, quarantine_id: &str) -> Self {
        let repo_objects = repo_path.join("objects");
        Self {
            path: repo_objects.join(quarantine_id),
            repo_objects,
            armed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.path.join("pack")
    }

    /// Create `<quarantine>/pack` (and intermediates) mode 0777, and arm the
    /// removal guard.
    pub fn create_dirs(&mut self) -> std::io::Result<()> {
        DirBuilder::new()
            .recursive(true)
            .mode(0o777)
            .create(self.pack_dir())?;
        self.armed = true;
        Ok(())
    }

    /// Environment for child processes so they read the repository through
    /// the quarantine and write only into it.
    pub fn child_env(&self) -> [(&'static str, OsString); 3] {
        [
            (
                "GIT_ALTERNATE_OBJECT_DIRECTORIES",
                self.repo_objects.clone().into_os_string(),
            ),
            ("GIT_OBJECT_DIRECTORY", self.path.clone().into_os_string()),
            ("GIT_QUARANTINE_PATH", self.path.clone().into_os_string()),
        ]
    }

    /// Keep the quarantine in place; called on the success path so the
    /// ref-update machinery can promote the received objects.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Remove the quarantine now. Removing a quarantine that was never
    /// created is a no-op.
    pub fn remove(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
        self.armed = false;
    }
}

impl Drop for Quarantine {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_lays_out_the_pack_directory() {
        let repo = tempfile::tempdir().unwrap();
        let mut quarantine = Quarantine::new(repo.path(), "incoming-123");
        quarantine.create_dirs().unwrap();
        assert!(repo.path().join("objects/incoming-123/pack").is_dir());
        quarantine.disarm();
    }

    #[test]
    fn armed_quarantine_is_removed_on_drop() {
        let repo = tempfile::tempdir().unwrap();
        let path = {
            let mut quarantine = Quarantine::new(repo.path(), "incoming-123");
            quarantine.create_dirs().unwrap();
            quarantine.path().to_owned()
        };
        assert!(!path.exists());
    }

    #[test]
    fn disarmed_quarantine_survives_drop() {
        let repo = tempfile::tempdir().unwrap();
        let path = {
            let mut quarantine = Quarantine::new(repo.path(), "incoming-123");
            quarantine.create_dirs().unwrap();
            quarantine.disarm();
            quarantine.path().to_owned()
        };
        assert!(path.exists());
    }

    #[test]
    fn removing_an_uncreated_quarantine_is_fine() {
        let repo = tempfile::tempdir().unwrap();
        let mut quarantine = Quarantine::new(repo.path(), "never-created");
        quarantine.remove();
        assert!(!quarantine.path().exists());
    }

    #[test]
    fn child_env_names_the_three_object_directories() {
        let repo = tempfile::tempdir().unwrap();
        let quarantine = Quarantine::new(repo.path(), "incoming-123");
        let env = quarantine.child_env();
        assert_eq!(env[0].0, "GIT_ALTERNATE_OBJECT_DIRECTORIES");
        assert_eq!(env[0].1, repo.path().join("objects").into_os_string());
        assert_eq!(env[1].0, "GIT_OBJECT_DIRECTORY");
        assert_eq!(env[2].0, "GIT_QUARANTINE_PATH");
        assert_eq!(env[2].1, repo.path().join("objects/incoming-123").into_os_string());
    }
}
