use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{AddrParseError, IpAddr};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use uuid::Uuid;

use crate::directory::{NodeId, PeerDirectory};
use crate::endpoint::{Endpoint, EndpointState};
use crate::transport::TransportModule;

/// Whether the local process is the one being relocated or a peer of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationRole {
    Moving,
    Stationary,
}

/// The three steps every migration walks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseStep {
    Preparing,
    Executing,
    Settling,
}

/// Process-wide migration phase. Exactly one value is observable at any
/// instant; transitions happen only through explicit signal delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationPhase {
    Running,
    MovingPreparing,
    MovingExecuting,
    MovingSettling,
    StationaryPreparing,
    StationaryExecuting,
    StationarySettling,
}

impl MigrationPhase {
    pub fn compose(role: MigrationRole, step: PhaseStep) -> Self {
        match (role, step) {
            (MigrationRole::Moving, PhaseStep::Preparing) => MigrationPhase::MovingPreparing,
            (MigrationRole::Moving, PhaseStep::Executing) => MigrationPhase::MovingExecuting,
            (MigrationRole::Moving, PhaseStep::Settling) => MigrationPhase::MovingSettling,
            (MigrationRole::Stationary, PhaseStep::Preparing) => {
                MigrationPhase::StationaryPreparing
            }
            (MigrationRole::Stationary, PhaseStep::Executing) => {
                MigrationPhase::StationaryExecuting
            }
            (MigrationRole::Stationary, PhaseStep::Settling) => MigrationPhase::StationarySettling,
        }
    }

    /// Role and step of a migration phase; `None` for `Running`.
    pub fn parts(&self) -> Option<(MigrationRole, PhaseStep)> {
        match self {
            MigrationPhase::Running => None,
            MigrationPhase::MovingPreparing => {
                Some((MigrationRole::Moving, PhaseStep::Preparing))
            }
            MigrationPhase::MovingExecuting => {
                Some((MigrationRole::Moving, PhaseStep::Executing))
            }
            MigrationPhase::MovingSettling => Some((MigrationRole::Moving, PhaseStep::Settling)),
            MigrationPhase::StationaryPreparing => {
                Some((MigrationRole::Stationary, PhaseStep::Preparing))
            }
            MigrationPhase::StationaryExecuting => {
                Some((MigrationRole::Stationary, PhaseStep::Executing))
            }
            MigrationPhase::StationarySettling => {
                Some((MigrationRole::Stationary, PhaseStep::Settling))
            }
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationPhase::Running => "running",
            MigrationPhase::MovingPreparing => "moving-preparing",
            MigrationPhase::MovingExecuting => "moving-executing",
            MigrationPhase::MovingSettling => "moving-settling",
            MigrationPhase::StationaryPreparing => "stationary-preparing",
            MigrationPhase::StationaryExecuting => "stationary-executing",
            MigrationPhase::StationarySettling => "stationary-settling",
        };
        f.write_str(name)
    }
}

/// Destination of a migration, in `user@host` form with a numeric host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
    user: Option<String>,
    host: String,
    addr: IpAddr,
}

impl HostSpec {
    pub fn parse(spec: &str) -> Result<Self, AddrParseError> {
        let (user, host) = match spec.split_once('@') {
            Some((user, host)) => (Some(user.to_string()), host.to_string()),
            None => (None, spec.to_string()),
        };
        let addr = host.parse()?;
        Ok(Self { user, host, addr })
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The full `user@host` spelling peers record as the relocated
    /// process's hostname.
    pub fn qualified_name(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

impl FromStr for HostSpec {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// Everything the phase machinery needs to know about the one active
/// migration: which node's processes are leaving and where they go.
#[derive(Debug, Clone)]
pub struct MigrationContext {
    attempt: Uuid,
    source_node: NodeId,
    destination: HostSpec,
}

impl MigrationContext {
    pub fn new(source_node: NodeId, destination: HostSpec) -> Self {
        Self {
            attempt: Uuid::new_v4(),
            source_node,
            destination,
        }
    }

    pub fn attempt(&self) -> Uuid {
        self.attempt
    }

    pub fn source_node(&self) -> NodeId {
        self.source_node
    }

    pub fn destination(&self) -> &HostSpec {
        &self.destination
    }
}

#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("a migration is already in progress (phase {0})")]
    MigrationInProgress(MigrationPhase),

    #[error("no migration context installed")]
    MissingContext,
}

/// Dispatcher for migration phase signals.
///
/// Holds the single process-wide phase value. The orchestrator is the only
/// writer; everything else observes. A second migration cannot begin until
/// the phase has returned to `Running`.
pub struct PhaseController {
    phase: RwLock<MigrationPhase>,
    context: RwLock<Option<MigrationContext>>,
    directory: Arc<dyn PeerDirectory>,
}

impl PhaseController {
    pub fn new(directory: Arc<dyn PeerDirectory>) -> Self {
        Self {
            phase: RwLock::new(MigrationPhase::Running),
            context: RwLock::new(None),
            directory,
        }
    }

    pub fn current_phase(&self) -> MigrationPhase {
        *self.phase.read().unwrap()
    }

    pub fn is_running(&self) -> bool {
        self.current_phase() == MigrationPhase::Running
    }

    pub fn context(&self) -> Option<MigrationContext> {
        self.context.read().unwrap().clone()
    }

    /// Installs the context for the next migration. Refused while another
    /// migration is still in flight.
    pub fn install_context(&self, context: MigrationContext) -> Result<(), PhaseError> {
        let phase = self.current_phase();
        if phase != MigrationPhase::Running {
            return Err(PhaseError::MigrationInProgress(phase));
        }
        info!(
            "migration {}: node {} relocating to {}",
            context.attempt(),
            context.source_node(),
            context.destination()
        );
        *self.context.write().unwrap() = Some(context);
        Ok(())
    }

    pub fn clear_context(&self) {
        *self.context.write().unwrap() = None;
    }

    /// Whether this endpoint's peer lives on the node being relocated.
    ///
    /// A peer that cannot be resolved in the directory is treated as not
    /// migrating; absence means "no special handling", never an error.
    pub fn is_migrating(&self, endpoint: &Endpoint) -> bool {
        let source_node = match self.context.read().unwrap().as_ref() {
            Some(context) => context.source_node(),
            None => return false,
        };
        match self.directory.resolve_peer_node(endpoint.peer()) {
            Some(node) => node == source_node,
            None => {
                debug!(
                    "peer {} not found in the directory, treating as not migrating",
                    endpoint.peer()
                );
                false
            }
        }
    }

    /// Send-path predicate: fragments submitted during the disruptive
    /// window must queue instead of reaching a socket.
    pub fn should_suppress(&self, endpoint: &Endpoint) -> bool {
        match self.current_phase() {
            MigrationPhase::MovingPreparing | MigrationPhase::MovingExecuting => true,
            MigrationPhase::StationaryPreparing | MigrationPhase::StationaryExecuting => {
                self.is_migrating(endpoint)
            }
            _ => false,
        }
    }

    /// Applies one phase signal to the transport module.
    ///
    /// `Preparing` is rejected while a migration is already in flight;
    /// out-of-sequence `Executing` signals are logged and ignored.
    /// `Settling` is honored from any in-flight phase so a failed attempt
    /// can still run its cleanup.
    pub fn deliver_phase(
        &self,
        phase: MigrationPhase,
        transport: &TransportModule,
    ) -> Result<(), PhaseError> {
        let Some((role, step)) = phase.parts() else {
            warn!("ignoring phase signal {phase}");
            return Ok(());
        };

        match step {
            PhaseStep::Preparing => {
                {
                    let mut current = self.phase.write().unwrap();
                    if *current != MigrationPhase::Running {
                        warn!("refusing {phase} signal while in phase {current}");
                        return Err(PhaseError::MigrationInProgress(*current));
                    }
                    if self.context.read().unwrap().is_none() {
                        return Err(PhaseError::MissingContext);
                    }
                    *current = phase;
                }
                self.freeze_endpoints(role, transport);
            }
            PhaseStep::Executing => {
                {
                    let mut current = self.phase.write().unwrap();
                    if *current != MigrationPhase::compose(role, PhaseStep::Preparing) {
                        warn!("ignoring out-of-sequence {phase} signal in phase {current}");
                        return Ok(());
                    }
                    *current = phase;
                }
                // Flush readiness callbacks that were pending when the
                // freeze landed, before any socket disappears.
                if let Err(err) = transport.reactor().poll_once() {
                    warn!("event-loop flush before socket close failed: {err}");
                }
                self.close_endpoints(role, transport);
            }
            PhaseStep::Settling => {
                {
                    let mut current = self.phase.write().unwrap();
                    if *current == MigrationPhase::Running {
                        warn!("ignoring {phase} signal outside a migration");
                        return Ok(());
                    }
                    *current = phase;
                }
                self.restore_endpoints(transport);
                *self.phase.write().unwrap() = MigrationPhase::Running;
                self.clear_context();
                info!("migration concluded, transport back to running");
            }
        }
        Ok(())
    }

    /// Quiesces endpoints ahead of the disruptive window. The moving side
    /// freezes everything still active; a stationary peer freezes only the
    /// endpoints pointing at the relocating node.
    fn freeze_endpoints(&self, role: MigrationRole, transport: &TransportModule) {
        info!("freezing endpoints ({role:?})");
        for endpoint in transport.endpoints_snapshot() {
            let selected = match role {
                MigrationRole::Moving => true,
                MigrationRole::Stationary => self.is_migrating(&endpoint),
            };
            if selected {
                endpoint.freeze(transport.reactor().as_ref());
            }
        }
        info!("done freezing endpoints");
    }

    /// Releases the sockets of every endpoint caught in the migration and
    /// rewrites the address of those whose peer is relocating.
    fn close_endpoints(&self, role: MigrationRole, transport: &TransportModule) {
        let destination = self
            .context
            .read()
            .unwrap()
            .as_ref()
            .map(|context| context.destination().clone());
        info!("closing sockets ({role:?})");
        for endpoint in transport.endpoints_snapshot() {
            let migrating = self.is_migrating(&endpoint);
            let selected = match role {
                MigrationRole::Moving => true,
                MigrationRole::Stationary => {
                    migrating || endpoint.state() == EndpointState::Frozen
                }
            };
            if !selected {
                continue;
            }
            let new_addr = match (&destination, migrating) {
                (Some(destination), true) => Some(endpoint.addr().relocated(destination)),
                _ => None,
            };
            endpoint.close_and_relocate(transport.reactor().as_ref(), new_addr);
        }
        info!("done closing sockets");
    }

    /// Thaws every frozen endpoint; endpoints holding queued or in-flight
    /// work reconnect immediately.
    fn restore_endpoints(&self, transport: &TransportModule) {
        info!("restoring endpoints");
        for endpoint in transport.endpoints_snapshot() {
            endpoint.restore(
                transport.dialer().as_ref(),
                transport.reactor().as_ref(),
                transport.wire().as_ref(),
            );
        }
        info!("done restoring endpoints");
    }
}
