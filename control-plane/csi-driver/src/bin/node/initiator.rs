//! Host initiator identity readers: the iSCSI IQN, FC port WWNs and NVMe
//! host NQN the node presents to the array.

use crate::error::{self, NodeError};
use snafu::ResultExt;
use std::io::ErrorKind;

const ISCSI_INITIATOR_FILE: &str = "/etc/iscsi/initiatorname.iscsi";
const FC_HOST_DIR: &str = "/sys/class/fc_host";
const NVME_HOSTNQN_FILE: &str = "/etc/nvme/hostnqn";

/// The node's iSCSI initiator name.
pub(crate) async fn iscsi_initiator() -> Result<String, NodeError> {
    let content = read_identity(ISCSI_INITIATOR_FILE, "iSCSI").await?;
    parse_initiator_name(&content).ok_or(NodeError::NoInitiator { kind: "iSCSI" })
}

/// The node's FC port names, without the `0x` prefix.
pub(crate) async fn fc_initiators() -> Result<Vec<String>, NodeError> {
    let mut ports = Vec::new();
    let mut hosts = match tokio::fs::read_dir(FC_HOST_DIR).await {
        Ok(hosts) => hosts,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(NodeError::NoInitiator { kind: "FC" });
        }
        Err(error) => {
            return Err(error).context(error::ReadIdentity {
                path: FC_HOST_DIR.to_string(),
            });
        }
    };
    while let Some(host) = hosts.next_entry().await.context(error::ReadIdentity {
        path: FC_HOST_DIR.to_string(),
    })? {
        let port_name = host.path().join("port_name");
        let Ok(content) = tokio::fs::read_to_string(&port_name).await else {
            continue;
        };
        let port = content.trim().trim_start_matches("0x").to_string();
        if !port.is_empty() {
            ports.push(port);
        }
    }
    if ports.is_empty() {
        return Err(NodeError::NoInitiator { kind: "FC" });
    }
    Ok(ports)
}

/// The node's NVMe host NQN.
pub(crate) async fn nvme_host_nqn() -> Result<String, NodeError> {
    let content = read_identity(NVME_HOSTNQN_FILE, "NVMe").await?;
    let nqn = content.trim().to_string();
    if nqn.is_empty() {
        return Err(NodeError::NoInitiator { kind: "NVMe" });
    }
    Ok(nqn)
}

async fn read_identity(path: &str, kind: &'static str) -> Result<String, NodeError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            Err(NodeError::NoInitiator { kind })
        }
        Err(error) => Err(error).context(error::ReadIdentity {
            path: path.to_string(),
        }),
    }
}

/// Pull the value of the `InitiatorName=` line out of the iSCSI initiator
/// file, skipping comments.
fn parse_initiator_name(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| line.strip_prefix("InitiatorName="))
        .map(str::to_string)
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::parse_initiator_name;

    #[test]
    fn parses_the_initiator_name_line() {
        let content = "## comment\n# InitiatorName=commented-out\nInitiatorName=iqn.1994-05.com.example:host1\n";
        assert_eq!(
            parse_initiator_name(content).unwrap(),
            "iqn.1994-05.com.example:host1"
        );
    }

    #[test]
    fn missing_or_empty_name_is_none() {
        assert!(parse_initiator_name("").is_none());
        assert!(parse_initiator_name("InitiatorName=\n").is_none());
        assert!(parse_initiator_name("# only comments\n").is_none());
    }
}
