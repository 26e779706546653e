//! Host-side mount reconciliation: stage a block device or a remote share
//! onto a target path, formatting an unformatted device on first use and
//! growing an existing filesystem to the (possibly expanded) device.

use crate::{
    error::{self, NodeError},
    filesystem_ops::FileSystemOpsExt,
};
use csi_driver::filesystem::FileSystem;
use snafu::{ensure, ResultExt};
use std::collections::HashMap;
use tokio::process::Command;
use tracing::{debug, warn};

const MOUNT_TABLE: &str = "/proc/mounts";

/// What the source path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceType {
    /// A local block device to be formatted and mounted.
    Block,
    /// A remote share mounted directly.
    Filesystem,
}

/// One attach request from the kubelet.
#[derive(Debug, Clone)]
pub(crate) struct AttachRequest {
    pub source_type: SourceType,
    pub source: String,
    pub target: String,
    pub fs_type: FileSystem,
    pub mount_flags: Option<String>,
}

/// Stage `request.source` onto `request.target`.
pub(crate) async fn attach(request: &AttachRequest) -> Result<(), NodeError> {
    match request.source_type {
        SourceType::Block => attach_block_device(request).await,
        SourceType::Filesystem => {
            mount(&request.source, &request.target, request.mount_flags.as_deref()).await
        }
    }
}

/// Unmount `target`. An already-unmounted target is a success.
pub(crate) async fn detach(target: &str) -> Result<(), NodeError> {
    let output = run_command("umount", &[target]).await?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if stderr.contains("not mounted") {
        debug!(target, "target is not mounted");
        return Ok(());
    }
    Err(NodeError::CommandFailed {
        binary: "umount".to_string(),
        stderr,
    })
}

async fn attach_block_device(request: &AttachRequest) -> Result<(), NodeError> {
    if !is_formatted(&request.source).await? {
        debug!(device = request.source.as_str(), fs = %request.fs_type, "formatting unformatted device");
        mkfs(&request.source, request.fs_type).await?;
        mount(&request.source, &request.target, request.mount_flags.as_deref()).await
    } else {
        mount(&request.source, &request.target, request.mount_flags.as_deref()).await?;
        // The device may have been expanded since it was formatted; grow
        // the filesystem to match.
        request
            .fs_type
            .fs_ops()
            .grow(&request.source, &request.target)
            .await
    }
}

/// Mount `source` onto `target` unless the mount table already has it.
async fn mount(source: &str, target: &str, flags: Option<&str>) -> Result<(), NodeError> {
    pre_mount(source, target).await?;

    let mounts = mount_records().await?;
    if target_already_mounted(&mounts, source, target)? {
        debug!(source, target, "mount already exists");
        return Ok(());
    }

    let output = match flags.filter(|f| !f.is_empty()) {
        Some(flags) => run_command("mount", &[source, target, "-o", flags]).await?,
        None => run_command("mount", &[source, target]).await?,
    };
    ack_command_output(output, "mount")
}

/// The source must exist; the target directory is created if missing.
async fn pre_mount(source: &str, target: &str) -> Result<(), NodeError> {
    ensure!(
        tokio::fs::metadata(source).await.is_ok(),
        error::SourceMissing {
            path: source.to_string(),
        }
    );
    if tokio::fs::metadata(target).await.is_err() {
        tokio::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o750)
            .create(target)
            .await
            .context(error::TargetCreate {
                path: target.to_string(),
            })?;
    }
    Ok(())
}

/// True when the target already mounts this source; a target mounting a
/// different source is a conflict and mount(8) is never invoked.
pub(crate) fn target_already_mounted(
    mounts: &HashMap<String, String>,
    source: &str,
    target: &str,
) -> Result<bool, NodeError> {
    match mounts.get(target) {
        Some(mounted) if mounted != source => Err(NodeError::MountConflict {
            target: target.to_string(),
            mounted: mounted.clone(),
            requested: source.to_string(),
        }),
        Some(_) => Ok(true),
        None => Ok(false),
    }
}

/// Read and parse the host mount table into `target -> source`.
async fn mount_records() -> Result<HashMap<String, String>, NodeError> {
    let content = tokio::fs::read_to_string(MOUNT_TABLE)
        .await
        .context(error::MountTable)?;
    Ok(parse_mount_records(&content))
}

/// Parse a mount table. Tolerates blank lines, comment lines and sources
/// with embedded spaces (octal-escaped by the kernel).
pub(crate) fn parse_mount_records(content: &str) -> HashMap<String, String> {
    let mut records = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(source), Some(target)) = (fields.next(), fields.next()) else {
            continue;
        };
        records.insert(unescape_octal(target), unescape_octal(source));
    }
    records
}

/// Undo the kernel's `\040`-style octal escaping of mount table fields.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(digits) = bytes.get(i + 1..i + 4) {
                if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                    let value = digits.iter().fold(0u32, |acc, d| acc * 8 + (d - b'0') as u32);
                    out.push(value as u8);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

/// Probe whether the device already carries a filesystem, by UUID presence
/// in the blkid udev output. blkid exits non-zero for a blank device, so
/// only the output is inspected.
async fn is_formatted(device: &str) -> Result<bool, NodeError> {
    let output = run_command("blkid", &["-o", "udev", device]).await?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().any(|line| line.starts_with("ID_FS_UUID=")))
}

async fn mkfs(device: &str, fs_type: FileSystem) -> Result<(), NodeError> {
    let output = run_command("mkfs", &["-t", fs_type.as_ref(), "-F", device]).await?;
    ack_command_output(output, "mkfs")
}

pub(crate) async fn run_command(
    binary: &str,
    args: &[&str],
) -> Result<std::process::Output, NodeError> {
    Command::new(binary)
        .args(args)
        .output()
        .await
        .context(error::CommandSpawn {
            binary: binary.to_string(),
        })
}

pub(crate) fn ack_command_output(
    output: std::process::Output,
    binary: &str,
) -> Result<(), NodeError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    warn!(binary, stderr = stderr.as_str(), "command failed");
    Err(NodeError::CommandFailed {
        binary: binary.to_string(),
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_mount_records, target_already_mounted, unescape_octal};
    use crate::error::NodeError;

    const TABLE: &str = "\
/dev/sda1 / ext4 rw,relatime 0 0

# a comment the parser must skip
tmpfs   /tmp    tmpfs rw,nosuid 0 0
/dev/sdb /data ext4 rw 0 0
//nas/share\\040one /mnt/share\\040one cifs rw 0 0
malformed-line
";

    #[test]
    fn parses_targets_to_sources() {
        let records = parse_mount_records(TABLE);
        assert_eq!(records.get("/").unwrap(), "/dev/sda1");
        assert_eq!(records.get("/tmp").unwrap(), "tmpfs");
        assert_eq!(records.get("/data").unwrap(), "/dev/sdb");
        assert_eq!(records.len(), 4);
    }

    #[test]
    fn unescapes_embedded_spaces() {
        assert_eq!(unescape_octal("share\\040one"), "share one");
        assert_eq!(unescape_octal("tab\\011sep"), "tab\tsep");
        assert_eq!(unescape_octal("plain"), "plain");
        let records = parse_mount_records(TABLE);
        assert_eq!(records.get("/mnt/share one").unwrap(), "//nas/share one");
    }

    #[test]
    fn conflicting_target_is_detected_without_mounting() {
        let records = parse_mount_records(TABLE);
        let error = target_already_mounted(&records, "/dev/sdc", "/data").unwrap_err();
        match error {
            NodeError::MountConflict {
                target,
                mounted,
                requested,
            } => {
                assert_eq!(target, "/data");
                assert_eq!(mounted, "/dev/sdb");
                assert_eq!(requested, "/dev/sdc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn same_source_is_idempotent_and_absent_target_mounts() {
        let records = parse_mount_records(TABLE);
        assert!(target_already_mounted(&records, "/dev/sdb", "/data").unwrap());
        assert!(!target_already_mounted(&records, "/dev/sdb", "/data2").unwrap());
    }
}
