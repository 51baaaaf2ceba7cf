use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::directory::PeerId;
use crate::phase::PhaseError;

/// Errors surfaced by the transport coordination core.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no fragment resources for {requested} bytes (limit {limit})")]
    ResourceExhausted { requested: usize, limit: usize },

    #[error("peer {0} is unreachable")]
    PeerUnreachable(PeerId),

    #[error("wire layer rejected fragment for {peer}: {reason}")]
    Wire { peer: PeerId, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The leg of a migration attempt that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationStage {
    Prepare,
    Execute,
    Dump,
    Transfer,
    Restore,
    Settle,
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationStage::Prepare => "prepare",
            MigrationStage::Execute => "execute",
            MigrationStage::Dump => "dump",
            MigrationStage::Transfer => "transfer",
            MigrationStage::Restore => "restore",
            MigrationStage::Settle => "settle",
        };
        f.write_str(name)
    }
}

/// Underlying fault behind a failed migration leg.
#[derive(Debug, Error)]
pub enum MigrationFault {
    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("migration task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Outcome of a failed migration attempt: which leg broke and why.
///
/// Never a bare status code; callers can branch on `stage` for recovery
/// policy and walk `fault` for the OS-level cause.
#[derive(Debug, Error)]
#[error("migration failed during {stage}: {fault}")]
pub struct MigrationError {
    pub stage: MigrationStage,
    #[source]
    pub fault: MigrationFault,
}

impl MigrationError {
    pub fn new(stage: MigrationStage, fault: impl Into<MigrationFault>) -> Self {
        Self {
            stage,
            fault: fault.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_error_reports_stage() {
        let err = MigrationError::new(MigrationStage::Prepare, PhaseError::MissingContext);
        let rendered = err.to_string();
        assert!(rendered.contains("prepare"), "got: {rendered}");
    }

    #[test]
    fn test_resource_exhaustion_mentions_limit() {
        let err = TransportError::ResourceExhausted {
            requested: 4096,
            limit: 1024,
        };
        assert!(err.to_string().contains("1024"));
    }
}
