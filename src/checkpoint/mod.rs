//! Checkpoint/restore side of a migration: the external engine contract,
//! image naming, the transfer capability, and the driver that sequences a
//! dump or a namespaced resume.

pub mod driver;
pub mod engine;
pub mod image;
pub mod transfer;

pub use driver::{CheckpointDriver, CheckpointError, DriverState};
pub use engine::{CheckpointEngine, EngineError, EngineOp, EngineOptions};
pub use image::CheckpointImage;
pub use transfer::{ImageChannel, TransferError};
