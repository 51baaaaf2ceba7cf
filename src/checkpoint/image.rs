use nix::unistd::Pid;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// On-disk container for the artifacts of one process snapshot.
///
/// Dump-side images are named after the checkpointed pid so the transfer
/// side can locate them deterministically; restore-side images get a short
/// random suffix so repeated migrations onto the same host never collide.
/// An image is consumed exactly once by restore and never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointImage {
    path: PathBuf,
}

impl CheckpointImage {
    pub fn for_dump(root: &Path, prefix: &str, pid: Pid) -> Self {
        Self {
            path: root.join(format!("{prefix}{pid}")),
        }
    }

    pub fn for_restore(root: &Path, prefix: &str) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(5)
            .map(char::from)
            .collect();
        Self {
            path: root.join(format!("{prefix}{suffix}")),
        }
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the image directory; an already-existing directory is an
    /// error so a stale image is never silently overwritten.
    pub fn create_dir(&self) -> io::Result<()> {
        fs::create_dir(&self.path)
    }
}
