use nix::unistd::Pid;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Parameters handed to the external checkpoint engine before a snapshot or
/// resume operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// File name the engine writes its own log into, relative to its
    /// working directory.
    pub log_file: String,
    pub log_level: u32,
    /// Whether the snapshotted process keeps running afterwards. Migration
    /// dumps always freeze the process into the image.
    pub leave_running: bool,
    /// Preserve established TCP connection state inside the image.
    pub tcp_established: bool,
    /// Upper bound on externally-referenced-but-unlinked file content the
    /// engine will carry into the image.
    pub ghost_limit: u64,
}

/// The engine call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOp {
    Configure,
    BindImages,
    Dump,
    Restore,
}

impl fmt::Display for EngineOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineOp::Configure => "configure",
            EngineOp::BindImages => "bind-images",
            EngineOp::Dump => "dump",
            EngineOp::Restore => "restore",
        };
        f.write_str(name)
    }
}

/// Engine failures carry the operation and an errno-equivalent; the engine
/// reports no partial progress.
#[derive(Debug, Clone, Error)]
#[error("checkpoint engine {op} failed (errno {errno})")]
pub struct EngineError {
    pub op: EngineOp,
    pub errno: i32,
}

impl EngineError {
    pub fn new(op: EngineOp, errno: i32) -> Self {
        Self { op, errno }
    }
}

/// External checkpoint engine capability.
///
/// The core never reimplements snapshotting; it configures the engine,
/// binds an image directory, and invokes dump or restore. A successful
/// `dump` leaves the target process frozen into the image; a successful
/// `restore` reports the pid of the resumed process.
pub trait CheckpointEngine: Send + Sync {
    fn name(&self) -> &str;

    fn configure(&self, options: &EngineOptions) -> Result<(), EngineError>;

    fn bind_images_dir(&self, dir: &Path) -> Result<(), EngineError>;

    fn dump(&self, pid: Pid) -> Result<(), EngineError>;

    fn restore(&self) -> Result<Pid, EngineError>;
}
