//! Per-filesystem grow operations, used after mounting a block device that
//! was expanded on the array since it was formatted.

use crate::{
    error::NodeError,
    mount::{ack_command_output, run_command},
};
use async_trait::async_trait;
use csi_driver::filesystem::FileSystem;

/// Ext4 filesystem operations.
pub(crate) struct Ext4Fs;
/// XFS filesystem operations.
pub(crate) struct XFs;

#[async_trait]
pub(crate) trait FileSystemOps: Send + Sync {
    /// Grow the filesystem to the size of its backing device.
    async fn grow(&self, device: &str, mount_path: &str) -> Result<(), NodeError>;
}

pub(crate) trait FileSystemOpsExt {
    fn fs_ops(&self) -> &'static dyn FileSystemOps;
}

impl FileSystemOpsExt for FileSystem {
    fn fs_ops(&self) -> &'static dyn FileSystemOps {
        static EXT4FS: Ext4Fs = Ext4Fs {};
        static XFS: XFs = XFs {};
        match self {
            FileSystem::Ext4 => &EXT4FS,
            FileSystem::Xfs => &XFS,
        }
    }
}

#[async_trait]
impl FileSystemOps for Ext4Fs {
    async fn grow(&self, device: &str, _mount_path: &str) -> Result<(), NodeError> {
        let output = run_command("resize2fs", &[device]).await?;
        ack_command_output(output, "resize2fs")
    }
}

#[async_trait]
impl FileSystemOps for XFs {
    /// xfs grows online through the mount point, not the device.
    async fn grow(&self, _device: &str, mount_path: &str) -> Result<(), NodeError> {
        let output = run_command("xfs_growfs", &[mount_path]).await?;
        ack_command_output(output, "xfs_growfs")
    }
}
