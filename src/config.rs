use nix::sys::signal::Signal;
use std::path::PathBuf;

/// Tunables for the relocation core: transport fragment limits on one side,
/// checkpoint engine parameters on the other.
///
/// The defaults reproduce the behavior of a stock deployment: images under
/// `/tmp/ckpt_*`, a 1 GiB ghost-file limit, established TCP state preserved
/// in the snapshot, and `SIGUSR2` as the relocation handoff signal.
#[derive(Debug, Clone)]
pub struct RelocationConfig {
    checkpoint_root: PathBuf,
    image_prefix: String,
    dump_log: String,
    restore_log: String,
    engine_log_level: u32,
    ghost_limit: u64,
    preserve_tcp: bool,
    resume_signal: Signal,
    eager_limit: usize,
    max_send_size: usize,
}

impl Default for RelocationConfig {
    fn default() -> Self {
        Self {
            checkpoint_root: PathBuf::from("/tmp"),
            image_prefix: "ckpt_".to_string(),
            dump_log: "ckpt_dump.log".to_string(),
            restore_log: "ckpt_restore.log".to_string(),
            engine_log_level: 4,
            ghost_limit: 1024 * 1024 * 1024,
            preserve_tcp: true,
            resume_signal: Signal::SIGUSR2,
            eager_limit: 64 * 1024,
            max_send_size: 128 * 1024,
        }
    }
}

impl RelocationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.checkpoint_root = root.into();
        self
    }

    pub fn with_image_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.image_prefix = prefix.into();
        self
    }

    pub fn with_dump_log(mut self, name: impl Into<String>) -> Self {
        self.dump_log = name.into();
        self
    }

    pub fn with_restore_log(mut self, name: impl Into<String>) -> Self {
        self.restore_log = name.into();
        self
    }

    pub fn with_engine_log_level(mut self, level: u32) -> Self {
        self.engine_log_level = level;
        self
    }

    pub fn with_ghost_limit(mut self, bytes: u64) -> Self {
        self.ghost_limit = bytes;
        self
    }

    pub fn with_preserve_tcp(mut self, preserve: bool) -> Self {
        self.preserve_tcp = preserve;
        self
    }

    pub fn with_resume_signal(mut self, signal: Signal) -> Self {
        self.resume_signal = signal;
        self
    }

    pub fn with_eager_limit(mut self, bytes: usize) -> Self {
        self.eager_limit = bytes;
        self
    }

    pub fn with_max_send_size(mut self, bytes: usize) -> Self {
        self.max_send_size = bytes;
        self
    }

    pub fn checkpoint_root(&self) -> &PathBuf {
        &self.checkpoint_root
    }

    pub fn image_prefix(&self) -> &str {
        &self.image_prefix
    }

    pub fn dump_log(&self) -> &str {
        &self.dump_log
    }

    pub fn restore_log(&self) -> &str {
        &self.restore_log
    }

    pub fn engine_log_level(&self) -> u32 {
        self.engine_log_level
    }

    pub fn ghost_limit(&self) -> u64 {
        self.ghost_limit
    }

    pub fn preserve_tcp(&self) -> bool {
        self.preserve_tcp
    }

    pub fn resume_signal(&self) -> Signal {
        self.resume_signal
    }

    pub fn eager_limit(&self) -> usize {
        self.eager_limit
    }

    pub fn max_send_size(&self) -> usize {
        self.max_send_size
    }
}
