//! Error taxonomy of the volume orchestrator.

use array_client::ClientError;
use snafu::Snafu;
use std::time::Duration;

/// Errors surfaced by the lifecycle flows. Errors bubble unchanged; the
/// orchestrator does not retry at call sites, and compensating actions log
/// their own errors without masking the original one.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    #[snafu(display("Invalid volume parameters: {reason}"))]
    InvalidParams { reason: String },

    #[snafu(display("Remote array client for {purpose} is not configured"))]
    RemoteUnavailable { purpose: &'static str },

    #[snafu(display("Remote device of SN '{serial}' does not exist"))]
    RemoteDeviceMissing { serial: String },

    #[snafu(display("Remote device of SN '{serial}' is not healthy"))]
    RemoteDeviceNotHealthy { serial: String },

    #[snafu(display("HyperMetro domain '{name}' does not exist"))]
    MetroDomainMissing { name: String },

    #[snafu(display("HyperMetro domain '{name}' is not running normally"))]
    MetroDomainNotNormal { name: String },

    #[snafu(display("Array request failed"))]
    Array { source: ClientError },

    #[snafu(display("{kind} '{id}' is at fault status"))]
    JobFault { kind: &'static str, id: String },

    #[snafu(display("{kind} '{id}' is at abnormal running status '{status}'"))]
    JobAbnormal {
        kind: &'static str,
        id: String,
        status: String,
    },

    #[snafu(display("Timed out after {budget:?} waiting for {what}"))]
    WaitTimeout { what: String, budget: Duration },

    #[snafu(display("{object} '{name}' does not exist"))]
    NotFound { object: &'static str, name: String },

    #[snafu(display(
        "Snapshot '{snapshot}' already exists but its parent is not '{parent}'"
    ))]
    NameConflict { snapshot: String, parent: String },

    #[snafu(display(
        "New capacity {requested} of '{name}' must be greater than the current capacity {current}"
    ))]
    NotGrowing {
        name: String,
        requested: u64,
        current: u64,
    },

    #[snafu(display(
        "Capacity of clone '{name}' must be at least the capacity of its source"
    ))]
    CloneTooSmall { name: String },

    #[snafu(display("Flow context key '{key}' is not populated"))]
    FlowContext { key: &'static str },

    #[snafu(display("Task '{step}' of flow '{flow}' failed"))]
    TaskFailed {
        flow: String,
        step: String,
        source: Box<Error>,
    },
}
