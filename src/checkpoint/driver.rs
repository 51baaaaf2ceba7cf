use log::{debug, error, info};
use nix::mount::{mount, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::sys::signal::kill;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use thiserror::Error;
use tokio::task;

use crate::checkpoint::engine::{CheckpointEngine, EngineError, EngineOptions};
use crate::checkpoint::image::CheckpointImage;
use crate::checkpoint::transfer::{ImageChannel, TransferError};
use crate::config::RelocationConfig;
use crate::phase::HostSpec;

/// Where the driver stands with respect to the current migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Available,
    Moving,
    Finished,
    Error,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to create image directory {path}: {source}")]
    ImageDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("namespace isolation failed: {0}")]
    Namespace(#[source] nix::Error),

    #[error("waiting for the restore child failed: {0}")]
    Wait(#[source] nix::Error),

    #[error("restore child exited with status {0}")]
    ResumeFailed(i32),

    #[error("cannot signal resumed process {pid}: {source}")]
    Handoff {
        pid: Pid,
        #[source]
        source: nix::Error,
    },

    #[error("blocking checkpoint task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Driver around the external checkpoint engine.
///
/// `dump` freezes a process into a portable image, `restore` resumes one
/// from a retrieved image inside fresh PID and mount namespaces, and
/// `migrate` composes dump, transfer and remote restore into the moving
/// side of one migration attempt.
#[derive(Clone)]
pub struct CheckpointDriver {
    engine: Arc<dyn CheckpointEngine>,
    channel: Arc<dyn ImageChannel>,
    config: RelocationConfig,
    state: Arc<RwLock<DriverState>>,
}

impl CheckpointDriver {
    pub fn new(
        engine: Arc<dyn CheckpointEngine>,
        channel: Arc<dyn ImageChannel>,
        config: RelocationConfig,
    ) -> Self {
        info!("checkpoint driver initialized (engine: {})", engine.name());
        Self {
            engine,
            channel,
            config,
            state: Arc::new(RwLock::new(DriverState::Available)),
        }
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    pub fn state(&self) -> DriverState {
        *self.state.read().unwrap()
    }

    fn set_state(&self, state: DriverState) {
        *self.state.write().unwrap() = state;
    }

    /// Snapshots `pid` into a fresh image directory keyed by the pid.
    ///
    /// On success the process no longer runs here; it lives in the image.
    /// On failure the process is left running unmodified and the error
    /// names the engine call that broke.
    pub fn dump(&self, pid: Pid) -> Result<CheckpointImage, CheckpointError> {
        let started = Instant::now();
        let image = CheckpointImage::for_dump(
            self.config.checkpoint_root(),
            self.config.image_prefix(),
            pid,
        );
        info!("dumping process {} into {}", pid, image.path().display());

        image.create_dir().map_err(|source| CheckpointError::ImageDir {
            path: image.path().to_path_buf(),
            source,
        })?;

        match self.run_dump(&image, pid) {
            Ok(()) => {
                self.set_state(DriverState::Moving);
                info!("dumped process {} in {:?}", pid, started.elapsed());
                Ok(image)
            }
            Err(err) => {
                self.set_state(DriverState::Error);
                Err(err)
            }
        }
    }

    fn run_dump(&self, image: &CheckpointImage, pid: Pid) -> Result<(), CheckpointError> {
        self.engine.configure(&self.dump_options())?;
        self.engine.bind_images_dir(image.path())?;
        self.engine.dump(pid)?;
        Ok(())
    }

    /// Copies a dumped image to the destination host.
    pub async fn transfer(
        &self,
        image: &CheckpointImage,
        destination: &HostSpec,
    ) -> Result<(), CheckpointError> {
        info!(
            "transferring image {} to {}",
            image.path().display(),
            destination
        );
        if let Err(err) = self.channel.push(image, destination).await {
            self.set_state(DriverState::Error);
            return Err(err.into());
        }
        Ok(())
    }

    /// Asks the destination host to restore the transferred image; resolves
    /// once the remote restore completed.
    pub async fn request_remote_restore(
        &self,
        destination: &HostSpec,
    ) -> Result<(), CheckpointError> {
        if let Err(err) = self.channel.trigger_restore(destination).await {
            self.set_state(DriverState::Error);
            return Err(err.into());
        }
        self.set_state(DriverState::Finished);
        Ok(())
    }

    /// The whole moving-side pipeline: dump `pid`, push the image to
    /// `destination`, have it restored there. Succeeds only when all three
    /// legs succeed.
    pub async fn migrate(
        &self,
        destination: &HostSpec,
        pid: Pid,
    ) -> Result<CheckpointImage, CheckpointError> {
        let driver = self.clone();
        let image = task::spawn_blocking(move || driver.dump(pid)).await??;
        self.transfer(&image, destination).await?;
        self.request_remote_restore(destination).await?;
        Ok(image)
    }

    /// Destination-side restore: retrieves the incoming image into a fresh
    /// randomly-suffixed directory, then resumes the process inside new PID
    /// and mount namespaces. Returns the resumed process's identifier.
    pub async fn restore(&self) -> Result<Pid, CheckpointError> {
        let image = CheckpointImage::for_restore(
            self.config.checkpoint_root(),
            self.config.image_prefix(),
        );
        info!("retrieving image into {}", image.path().display());
        image.create_dir().map_err(|source| CheckpointError::ImageDir {
            path: image.path().to_path_buf(),
            source,
        })?;

        let pid = match self.channel.fetch(&image).await {
            Ok(pid) => pid,
            Err(err) => {
                self.set_state(DriverState::Error);
                return Err(err.into());
            }
        };

        let driver = self.clone();
        let resume_image = image.clone();
        match task::spawn_blocking(move || driver.resume_in_namespace(&resume_image, pid)).await {
            Ok(Ok(())) => {
                self.set_state(DriverState::Finished);
                Ok(pid)
            }
            Ok(Err(err)) => {
                self.set_state(DriverState::Error);
                Err(err)
            }
            Err(join) => {
                self.set_state(DriverState::Error);
                Err(join.into())
            }
        }
    }

    /// Isolates into fresh PID and mount namespaces, forks, and lets the
    /// child run the resume sequence. The child's only communicable outcome
    /// is its exit status.
    fn resume_in_namespace(
        &self,
        image: &CheckpointImage,
        pid: Pid,
    ) -> Result<(), CheckpointError> {
        debug!("pid before unshare is {}", process::id());
        unshare(CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWNS)
            .map_err(CheckpointError::Namespace)?;

        match unsafe { fork() }.map_err(CheckpointError::Namespace)? {
            ForkResult::Parent { child } => self.await_restore(child),
            ForkResult::Child => self.resume_child(image, pid),
        }
    }

    fn await_restore(&self, child: Pid) -> Result<(), CheckpointError> {
        debug!("waiting for restore child {}", child);
        // The isolation step forks once more internally, so two child
        // terminations are observed before the pipeline is done.
        for _ in 0..2 {
            let status = waitpid(None::<Pid>, None).map_err(CheckpointError::Wait)?;
            debug!("restore child event: {:?}", status);
            if let WaitStatus::Exited(exited, code) = status {
                if code != 0 {
                    error!("restore stage in child {} failed with status {}", exited, code);
                    return Err(CheckpointError::ResumeFailed(code));
                }
            }
        }
        Ok(())
    }

    /// Runs in the forked child; never returns to the caller.
    fn resume_child(&self, image: &CheckpointImage, pid: Pid) -> ! {
        debug!("pid after unshare is {}", process::id());

        if let Err(err) = self.mount_restore_filesystems() {
            error!("cannot prepare restore mounts: {}", err);
            process::exit(1);
        }
        if let Err(err) = self.run_restore(image, pid) {
            error!("restore failed: {}", err);
            process::exit(1);
        }

        // Stay alive until the resumed workload exits so its output stream
        // remains attached to the relocation pipeline.
        let _ = waitpid(None::<Pid>, None);
        process::exit(0);
    }

    /// Remounts `/proc` for the new PID namespace and a private terminal
    /// multiplexer instance so the resumed process keeps a working view of
    /// both.
    fn mount_restore_filesystems(&self) -> Result<(), nix::Error> {
        mount(
            Some("none"),
            "/proc",
            None::<&str>,
            MsFlags::MS_PRIVATE | MsFlags::MS_REC,
            None::<&str>,
        )?;
        mount(
            Some("proc"),
            "/proc",
            Some("proc"),
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
            None::<&str>,
        )?;
        mount(
            Some("devpts"),
            "/dev/pts",
            Some("devpts"),
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
            Some("newinstance"),
        )?;
        mount(
            Some("/dev/pts/ptmx"),
            "/dev/ptmx",
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )?;
        Ok(())
    }

    fn run_restore(&self, image: &CheckpointImage, pid: Pid) -> Result<(), CheckpointError> {
        self.engine.configure(&self.restore_options())?;
        self.engine.bind_images_dir(image.path())?;
        let restored = self.engine.restore()?;
        info!("engine resumed process {}", restored);

        // Dedicated, non-terminating handoff signal: "you have been
        // relocated, resume normal operation".
        kill(pid, self.config.resume_signal())
            .map_err(|source| CheckpointError::Handoff { pid, source })?;
        Ok(())
    }

    fn dump_options(&self) -> EngineOptions {
        EngineOptions {
            log_file: self.config.dump_log().to_string(),
            log_level: self.config.engine_log_level(),
            leave_running: false,
            tcp_established: self.config.preserve_tcp(),
            ghost_limit: self.config.ghost_limit(),
        }
    }

    fn restore_options(&self) -> EngineOptions {
        EngineOptions {
            log_file: self.config.restore_log().to_string(),
            log_level: self.config.engine_log_level(),
            leave_running: false,
            tcp_established: self.config.preserve_tcp(),
            ghost_limit: self.config.ghost_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::engine::EngineOp;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockEngine {
        configured: Mutex<Vec<EngineOptions>>,
        bound: Mutex<Vec<PathBuf>>,
        dumped: Mutex<Vec<Pid>>,
        restore_calls: Mutex<usize>,
        fail_dump: bool,
    }

    impl MockEngine {
        fn failing_dump() -> Self {
            Self {
                fail_dump: true,
                ..Default::default()
            }
        }
    }

    impl CheckpointEngine for MockEngine {
        fn name(&self) -> &str {
            "mock"
        }

        fn configure(&self, options: &EngineOptions) -> Result<(), EngineError> {
            self.configured.lock().unwrap().push(options.clone());
            Ok(())
        }

        fn bind_images_dir(&self, dir: &std::path::Path) -> Result<(), EngineError> {
            self.bound.lock().unwrap().push(dir.to_path_buf());
            Ok(())
        }

        fn dump(&self, pid: Pid) -> Result<(), EngineError> {
            if self.fail_dump {
                return Err(EngineError::new(EngineOp::Dump, 1));
            }
            self.dumped.lock().unwrap().push(pid);
            Ok(())
        }

        fn restore(&self) -> Result<Pid, EngineError> {
            *self.restore_calls.lock().unwrap() += 1;
            Ok(Pid::from_raw(100))
        }
    }

    #[derive(Default)]
    struct MockChannel {
        pushed: Mutex<Vec<(PathBuf, String)>>,
        triggered: Mutex<Vec<String>>,
        fail_push: bool,
        fail_fetch: bool,
    }

    impl MockChannel {
        fn failing_push() -> Self {
            Self {
                fail_push: true,
                ..Default::default()
            }
        }

        fn failing_fetch() -> Self {
            Self {
                fail_fetch: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ImageChannel for MockChannel {
        async fn push(
            &self,
            image: &CheckpointImage,
            destination: &HostSpec,
        ) -> Result<(), TransferError> {
            if self.fail_push {
                return Err(TransferError::Remote("push refused".to_string()));
            }
            self.pushed
                .lock()
                .unwrap()
                .push((image.path().to_path_buf(), destination.qualified_name()));
            Ok(())
        }

        async fn fetch(&self, _image: &CheckpointImage) -> Result<Pid, TransferError> {
            if self.fail_fetch {
                return Err(TransferError::Remote("image unavailable".to_string()));
            }
            Ok(Pid::from_raw(4242))
        }

        async fn trigger_restore(&self, destination: &HostSpec) -> Result<(), TransferError> {
            self.triggered
                .lock()
                .unwrap()
                .push(destination.qualified_name());
            Ok(())
        }
    }

    fn driver_with(
        engine: MockEngine,
        channel: MockChannel,
        root: &std::path::Path,
    ) -> (Arc<MockEngine>, Arc<MockChannel>, CheckpointDriver) {
        let engine = Arc::new(engine);
        let channel = Arc::new(channel);
        let driver = CheckpointDriver::new(
            engine.clone(),
            channel.clone(),
            RelocationConfig::default().with_checkpoint_root(root),
        );
        (engine, channel, driver)
    }

    fn destination() -> HostSpec {
        HostSpec::parse("mpi@10.0.0.9").unwrap()
    }

    #[test]
    fn test_dump_configures_engine_and_creates_image() {
        let root = tempfile::tempdir().unwrap();
        let (engine, _channel, driver) =
            driver_with(MockEngine::default(), MockChannel::default(), root.path());

        let image = driver.dump(Pid::from_raw(4242)).unwrap();

        assert!(image.path().is_dir());
        assert_eq!(image.path(), root.path().join("ckpt_4242"));
        assert_eq!(engine.dumped.lock().unwrap().as_slice(), &[Pid::from_raw(4242)]);
        assert_eq!(engine.bound.lock().unwrap().as_slice(), &[image.path().to_path_buf()]);

        let configured = engine.configured.lock().unwrap();
        assert_eq!(configured.len(), 1);
        assert!(!configured[0].leave_running);
        assert!(configured[0].tcp_established);
        assert_eq!(configured[0].ghost_limit, 1024 * 1024 * 1024);
        assert_eq!(configured[0].log_file, "ckpt_dump.log");

        assert_eq!(driver.state(), DriverState::Moving);
    }

    #[test]
    fn test_dump_failure_surfaces_engine_error() {
        let root = tempfile::tempdir().unwrap();
        let (_engine, _channel, driver) =
            driver_with(MockEngine::failing_dump(), MockChannel::default(), root.path());

        let err = driver.dump(Pid::from_raw(9)).unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::Engine(EngineError {
                op: EngineOp::Dump,
                ..
            })
        ));
        assert_eq!(driver.state(), DriverState::Error);
    }

    #[test]
    fn test_dump_refuses_existing_image_directory() {
        let root = tempfile::tempdir().unwrap();
        let (engine, _channel, driver) =
            driver_with(MockEngine::default(), MockChannel::default(), root.path());

        std::fs::create_dir(root.path().join("ckpt_7")).unwrap();
        let err = driver.dump(Pid::from_raw(7)).unwrap_err();

        assert!(matches!(err, CheckpointError::ImageDir { .. }));
        assert!(engine.dumped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_migrate_runs_all_three_legs() {
        let root = tempfile::tempdir().unwrap();
        let (engine, channel, driver) =
            driver_with(MockEngine::default(), MockChannel::default(), root.path());

        let image = driver.migrate(&destination(), Pid::from_raw(4242)).await.unwrap();

        assert_eq!(engine.dumped.lock().unwrap().len(), 1);
        assert_eq!(
            channel.pushed.lock().unwrap().as_slice(),
            &[(image.path().to_path_buf(), "mpi@10.0.0.9".to_string())]
        );
        assert_eq!(
            channel.triggered.lock().unwrap().as_slice(),
            &["mpi@10.0.0.9".to_string()]
        );
        assert_eq!(driver.state(), DriverState::Finished);
    }

    #[tokio::test]
    async fn test_migrate_aborts_after_failed_transfer() {
        let root = tempfile::tempdir().unwrap();
        let (_engine, channel, driver) =
            driver_with(MockEngine::default(), MockChannel::failing_push(), root.path());

        let err = driver
            .migrate(&destination(), Pid::from_raw(4242))
            .await
            .unwrap_err();

        assert!(matches!(err, CheckpointError::Transfer(_)));
        assert!(channel.triggered.lock().unwrap().is_empty());
        assert_eq!(driver.state(), DriverState::Error);
    }

    #[tokio::test]
    async fn test_restore_aborts_when_image_fetch_fails() {
        let root = tempfile::tempdir().unwrap();
        let (engine, _channel, driver) =
            driver_with(MockEngine::default(), MockChannel::failing_fetch(), root.path());

        let err = driver.restore().await.unwrap_err();

        assert!(matches!(err, CheckpointError::Transfer(_)));
        assert_eq!(*engine.restore_calls.lock().unwrap(), 0);
        assert_eq!(driver.state(), DriverState::Error);
    }

    #[test]
    fn test_driver_reports_engine_name() {
        let root = tempfile::tempdir().unwrap();
        let (_engine, _channel, driver) =
            driver_with(MockEngine::default(), MockChannel::default(), root.path());
        assert_eq!(driver.name(), "mock");
        assert_eq!(driver.state(), DriverState::Available);
    }
}
