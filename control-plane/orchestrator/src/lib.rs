//! Volume lifecycle orchestration for a dual-controller storage array
//! family. Create, expand and delete of a single logical volume touch up to
//! three physical resources on two arrays; the flows here sequence those
//! mutations, compensate partial failures in reverse order, and poll
//! long-running array jobs to a terminal state.

mod base;
pub mod context;
mod errors;
mod nas;
mod qos;
mod san;
mod taskflow;
pub mod utils;
pub mod wait;

pub use context::{CloneSource, Mirror, Parameters, VolumeParams};
pub use errors::Error;
pub use nas::Nas;
pub use san::San;

/// The product family the orchestrator is talking to. The family fixes the
/// clone strategy and which QoS qualities the array model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductFamily {
    /// Newer dual-controller family: clone pairs, lower-bound QoS.
    Current,
    /// Older family: lun-copy jobs from snapshots, upper-bound QoS only.
    Legacy,
}

/// Handle to a provisioned volume. All state lives on the arrays; this is
/// only what a caller needs to address it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    /// World-wide name of the backing LUN; filesystem volumes have none.
    pub wwn: Option<String>,
}

/// Attributes of a created snapshot returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Creation time, seconds since the epoch.
    pub creation_time: i64,
    pub size_bytes: u64,
    pub parent_id: String,
}
