use log::{debug, info, warn};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task;
use uuid::Uuid;

use crate::checkpoint::CheckpointDriver;
use crate::directory::NodeId;
use crate::errors::{MigrationError, MigrationStage};
use crate::phase::{
    HostSpec, MigrationContext, MigrationPhase, MigrationRole, PhaseController, PhaseStep,
};
use crate::transport::TransportModule;

/// One request to relocate a running process. Transient; lives for a single
/// migration attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRequest {
    /// OS process identifier to checkpoint (moving side) or resume.
    pub pid: i32,
    /// Node the relocating process currently runs on.
    pub source_node: NodeId,
    /// Where it is going.
    pub destination: HostSpec,
    /// Image path suggested by the caller. Ignored: the checkpoint driver
    /// names its images itself.
    pub path_hint: Option<PathBuf>,
}

/// What a finished migration attempt looked like from this process.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub attempt: Uuid,
    pub role: MigrationRole,
    pub destination: HostSpec,
}

/// Sequences one migration end-to-end: phase signals to the transport on
/// both roles, plus the dump/transfer/restore pipeline on the moving side.
///
/// The orchestrator is the sole writer of the migration phase. Every
/// attempt, successful or not, finishes with the settling fan-out so no
/// endpoint is ever left permanently frozen.
pub struct MigrationOrchestrator {
    local_node: NodeId,
    phase: Arc<PhaseController>,
    driver: CheckpointDriver,
}

impl MigrationOrchestrator {
    pub fn new(local_node: NodeId, phase: Arc<PhaseController>, driver: CheckpointDriver) -> Self {
        Self {
            local_node,
            phase,
            driver,
        }
    }

    pub fn local_node(&self) -> NodeId {
        self.local_node
    }

    pub fn driver(&self) -> &CheckpointDriver {
        &self.driver
    }

    /// Moving when the relocating process runs on this node, stationary
    /// when a peer is the one leaving.
    pub fn role_for(&self, request: &MigrationRequest) -> MigrationRole {
        if request.source_node == self.local_node {
            MigrationRole::Moving
        } else {
            MigrationRole::Stationary
        }
    }

    /// Runs one migration attempt against this process's transport.
    ///
    /// Treats migration as synchronous: the future resolves once the
    /// process has been resumed remotely (moving role) and the transport is
    /// back in steady state.
    pub async fn relocate(
        &self,
        transport: &TransportModule,
        request: MigrationRequest,
    ) -> Result<MigrationReport, MigrationError> {
        let role = self.role_for(&request);
        if let Some(hint) = &request.path_hint {
            debug!("ignoring image path hint {}", hint.display());
        }

        let context = MigrationContext::new(request.source_node, request.destination.clone());
        let attempt = context.attempt();
        info!("migration {}: starting as the {:?} side", attempt, role);
        self.phase
            .install_context(context)
            .map_err(|err| MigrationError::new(MigrationStage::Prepare, err))?;

        let outcome = self.run_legs(transport, role, &request).await;

        // Settling runs on the failure path too; endpoints must come back
        // reconnectable, never stay frozen.
        self.settle(transport, role);

        match outcome {
            Ok(()) => {
                info!("migration {}: finished", attempt);
                Ok(MigrationReport {
                    attempt,
                    role,
                    destination: request.destination,
                })
            }
            Err(err) => {
                warn!("migration {}: aborted: {}", attempt, err);
                Err(err)
            }
        }
    }

    async fn run_legs(
        &self,
        transport: &TransportModule,
        role: MigrationRole,
        request: &MigrationRequest,
    ) -> Result<(), MigrationError> {
        self.phase
            .deliver_phase(MigrationPhase::compose(role, PhaseStep::Preparing), transport)
            .map_err(|err| MigrationError::new(MigrationStage::Prepare, err))?;
        self.phase
            .deliver_phase(MigrationPhase::compose(role, PhaseStep::Executing), transport)
            .map_err(|err| MigrationError::new(MigrationStage::Execute, err))?;

        match role {
            MigrationRole::Moving => self.relocate_process(request).await,
            // Nothing to snapshot here; the moving side drives the
            // remaining legs and this call resumes at settle time.
            MigrationRole::Stationary => Ok(()),
        }
    }

    async fn relocate_process(&self, request: &MigrationRequest) -> Result<(), MigrationError> {
        let pid = Pid::from_raw(request.pid);
        let driver = self.driver.clone();
        let image = task::spawn_blocking(move || driver.dump(pid))
            .await
            .map_err(|err| MigrationError::new(MigrationStage::Dump, err))?
            .map_err(|err| MigrationError::new(MigrationStage::Dump, err))?;

        self.driver
            .transfer(&image, &request.destination)
            .await
            .map_err(|err| MigrationError::new(MigrationStage::Transfer, err))?;

        self.driver
            .request_remote_restore(&request.destination)
            .await
            .map_err(|err| MigrationError::new(MigrationStage::Restore, err))?;
        Ok(())
    }

    fn settle(&self, transport: &TransportModule, role: MigrationRole) {
        let settling = MigrationPhase::compose(role, PhaseStep::Settling);
        if let Err(err) = self.phase.deliver_phase(settling, transport) {
            warn!("settling fan-out refused: {}", err);
        }
        self.phase.clear_context();
    }
}
