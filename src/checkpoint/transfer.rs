use async_trait::async_trait;
use nix::unistd::Pid;
use std::io;
use thiserror::Error;

use crate::checkpoint::image::CheckpointImage;
use crate::phase::HostSpec;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("image transfer I/O failure: {0}")]
    Io(#[from] io::Error),

    #[error("remote host rejected the operation: {0}")]
    Remote(String),
}

/// Reliable copy primitive for checkpoint images plus the control signal
/// that starts a restore on the destination host.
///
/// The mechanics of moving image bytes between hosts are owned by the
/// embedding runtime; the driver only sequences the calls.
#[async_trait]
pub trait ImageChannel: Send + Sync {
    /// Copies a freshly dumped image to the destination host.
    async fn push(
        &self,
        image: &CheckpointImage,
        destination: &HostSpec,
    ) -> Result<(), TransferError>;

    /// Retrieves the incoming image into the given directory and reports
    /// the pid recorded for the process inside it.
    async fn fetch(&self, image: &CheckpointImage) -> Result<Pid, TransferError>;

    /// Asks the destination host to restore the pushed image. Resolves only
    /// once the remote restore has finished, keeping migration synchronous
    /// for the caller.
    async fn trigger_restore(&self, destination: &HostSpec) -> Result<(), TransferError>;
}
