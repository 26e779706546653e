//! Errors of the node-side attach and detach code.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub(crate) enum NodeError {
    #[snafu(display("Source path '{path}' does not exist"))]
    SourceMissing { path: String },

    #[snafu(display("Failed to create target path '{path}'"))]
    TargetCreate {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display(
        "The mount '{target}' already exists, but its source is '{mounted}', not '{requested}'"
    ))]
    MountConflict {
        target: String,
        mounted: String,
        requested: String,
    },

    #[snafu(display("Failed to read the mount table"))]
    MountTable { source: std::io::Error },

    #[snafu(display("Failed to execute {binary}"))]
    CommandSpawn {
        binary: String,
        source: std::io::Error,
    },

    #[snafu(display("{binary} failed: {stderr}"))]
    CommandFailed { binary: String, stderr: String },

    #[snafu(display("Unsupported filesystem '{fs}'"))]
    UnsupportedFilesystem { fs: String },

    #[snafu(display("Lock file '{path}' is held by another process"))]
    Busy { path: String },

    #[snafu(display("Failed to open lock file '{path}'"))]
    LockFile {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to lock '{path}': {errno}"))]
    LockFailed {
        path: String,
        errno: nix::errno::Errno,
    },

    #[snafu(display("No {kind} initiator exists on this host"))]
    NoInitiator { kind: &'static str },

    #[snafu(display("Failed to read '{path}'"))]
    ReadIdentity {
        path: String,
        source: std::io::Error,
    },
}
