//! Live relocation of running distributed-computation processes.
//!
//! A process talking to peers over a TCP byte-transfer transport is frozen
//! into a portable checkpoint image, moved to another host, and resumed
//! there, without losing in-flight application data and with every peer
//! reconnecting to the new address transparently.
//!
//! The crate is the coordination core of that pipeline:
//!
//! - [`endpoint::Endpoint`]: per-peer connection state machine that can be
//!   frozen (write half-close plus a final blocking drain), closed and
//!   relocated, and restored with its fragment queue intact and in order.
//! - [`phase::PhaseController`]: the single process-wide migration phase,
//!   fanning freeze/close/restore actions out to a
//!   [`transport::TransportModule`]'s endpoints, split by whether this
//!   process is the one moving or a stationary peer.
//! - [`checkpoint::CheckpointDriver`]: wraps an external checkpoint engine.
//!   It dumps a process into an image and resumes one inside fresh PID and
//!   mount namespaces on the destination host.
//! - [`orchestrator::MigrationOrchestrator`]: sequences one migration end
//!   to end: prepare, execute, dump, transfer, restore, settle.
//!
//! Wire-format mechanics, event-loop internals, peer discovery, engine
//! internals and image copying are consumed as capabilities
//! ([`transport::WireSender`], [`reactor::Reactor`],
//! [`directory::PeerDirectory`], [`checkpoint::CheckpointEngine`],
//! [`checkpoint::ImageChannel`]); the embedding runtime provides them.

pub mod checkpoint;
pub mod config;
pub mod directory;
pub mod endpoint;
pub mod errors;
pub mod fragment;
pub mod orchestrator;
pub mod phase;
pub mod reactor;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use checkpoint::{
    CheckpointDriver, CheckpointEngine, CheckpointError, CheckpointImage, DriverState,
    EngineError, EngineOp, EngineOptions, ImageChannel, TransferError,
};
pub use config::RelocationConfig;
pub use directory::{NodeId, PeerDirectory, PeerId, SharedPeerDirectory};
pub use endpoint::{Endpoint, EndpointState, PeerAddr};
pub use errors::{MigrationError, MigrationFault, MigrationStage, TransportError};
pub use fragment::{Fragment, FragmentKind};
pub use orchestrator::{MigrationOrchestrator, MigrationReport, MigrationRequest};
pub use phase::{
    HostSpec, MigrationContext, MigrationPhase, MigrationRole, PhaseController, PhaseError,
    PhaseStep,
};
pub use reactor::{Interest, NullReactor, Reactor, Registration};
pub use transport::{Dialer, SendOutcome, TcpDialer, TransportModule, WireSender};
