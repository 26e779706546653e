//! Typed representations of the array-side objects the control plane works
//! with. Lookups decode the array's attribute payloads into these structs;
//! unknown wire values for a status field map to the `Unknown` catch-all so
//! a firmware addition does not break decode.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A capacity container on one array. A LUN or filesystem is created inside
/// exactly one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePool {
    pub id: String,
    pub name: String,
    /// Free capacity in bytes.
    pub free_capacity: u64,
}

/// Health status shared by the pair/copy job objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Normal,
    Fault,
    Unknown,
}

/// Running status of a clone pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClonePairState {
    Initializing,
    Syncing,
    Unsyncing,
    Normal,
    Abnormal,
    Unknown,
}

/// Running status of a LUN copy job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LunCopyState {
    Created,
    Queuing,
    Copying,
    Stopped,
    Paused,
    Complete,
    Unknown,
}

/// Running status of a HyperMetro pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetroPairState {
    ToSync,
    Syncing,
    Normal,
    Pause,
    Error,
    Invalid,
    Unknown,
}

/// Running status of a HyperMetro domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetroDomainState {
    Normal,
    Invalid,
    Unknown,
}

/// Running status of an asynchronous replication pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationPairState {
    Normal,
    Sync,
    Split,
    Interrupted,
    Invalid,
    Unknown,
}

/// Lifecycle status of a LUN snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    Creating,
    Inactive,
    Active,
    Deleting,
    Unknown,
}

/// Link status of the peering to another array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
    Unknown,
}

/// The mirror/copy relationship flags an array reports for a LUN or a
/// filesystem. Decoded from the `HASRSSOBJECT` JSON sub-document; an absent
/// document decodes to all-false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RssFlags {
    pub hyper_metro: bool,
    pub remote_replication: bool,
    pub lun_copy: bool,
    pub hyper_copy: bool,
}

impl RssFlags {
    /// Decode the flag document as the array serializes it, e.g.
    /// `{"HyperMetro":"TRUE","LunCopy":"FALSE"}`. Keys not present are false.
    pub fn parse(document: &str) -> Self {
        let raw: HashMap<String, String> =
            serde_json::from_str(document).unwrap_or_default();
        let set = |key: &str| raw.get(key).map(|v| v == "TRUE").unwrap_or(false);
        Self {
            hyper_metro: set("HyperMetro"),
            remote_replication: set("RemoteReplication"),
            lun_copy: set("LunCopy"),
            hyper_copy: set("HyperCopy"),
        }
    }

    /// True when no mirror or copy artifact references the object.
    pub fn is_clear(&self) -> bool {
        !(self.hyper_metro || self.remote_replication || self.lun_copy || self.hyper_copy)
    }
}

/// An array-side block volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lun {
    pub id: String,
    pub name: String,
    pub wwn: String,
    /// Capacity in bytes.
    pub capacity: u64,
    pub pool_id: String,
    pub pool_name: String,
    /// The QoS policy the LUN is attached to, if any.
    pub ioclass_id: Option<String>,
    /// Whether the LUN is mapped to any host initiator.
    pub exposed_to_initiator: bool,
    pub rss: RssFlags,
    /// LUN copy jobs currently referencing the LUN as destination.
    pub lun_copy_ids: Vec<String>,
    pub workload_type_id: Option<String>,
}

/// A snapshot of one LUN. `user_capacity` stays in the array's 512-byte
/// sectors; callers surface `user_capacity * 512` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LunSnapshot {
    pub id: String,
    pub name: String,
    pub parent_id: String,
    /// Capacity in 512-byte sectors.
    pub user_capacity: u64,
    /// Creation time, seconds since the epoch.
    pub timestamp: i64,
    pub state: SnapshotState,
}

/// Asymmetric full-copy link from a source LUN or snapshot to a destination
/// LUN. On the current product family the pair id equals the destination
/// LUN id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClonePair {
    pub id: String,
    pub source_id: String,
    pub dest_id: String,
    pub health: Health,
    pub state: ClonePairState,
}

/// A LUN copy job, driven from a source snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LunCopy {
    pub id: String,
    pub name: String,
    pub source_snapshot_name: String,
    pub dest_lun_id: String,
    pub health: Health,
    pub state: LunCopyState,
}

/// Synchronous active/active pair binding a local object to a remote one
/// inside a HyperMetro domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperMetroPair {
    pub id: String,
    pub domain_id: String,
    pub local_obj_id: String,
    pub remote_obj_id: String,
    pub health: Health,
    pub state: MetroPairState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperMetroDomain {
    pub id: String,
    pub name: String,
    pub state: MetroDomainState,
}

/// Asynchronous periodic-sync mirror pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationPair {
    pub id: String,
    pub local_res_id: String,
    pub remote_res_id: String,
    pub state: ReplicationPairState,
}

/// The peering object representing another array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDevice {
    pub id: String,
    pub serial: String,
    pub health: Health,
    pub link: LinkState,
}

/// Identity of the array answering the management interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArraySystem {
    pub serial: String,
    pub name: String,
}

/// An array-side NAS share backing filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filesystem {
    pub id: String,
    pub name: String,
    /// Capacity in bytes.
    pub capacity: u64,
    /// Hard quota of the share in bytes, when one is set.
    pub quota: Option<u64>,
    pub pool_id: String,
    pub pool_name: String,
    pub ioclass_id: Option<String>,
    pub rss: RssFlags,
    pub workload_type_id: Option<String>,
}

/// A per-object I/O limiter policy. Attaches to one or more LUNs or
/// filesystems and is ref-counted by the attached object lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosPolicy {
    pub id: String,
    pub name: String,
    pub lun_ids: Vec<String>,
    pub fs_ids: Vec<String>,
    pub activated: bool,
    pub spec: QosSpec,
}

impl QosPolicy {
    /// Number of objects still attached to the policy.
    pub fn ref_count(&self) -> usize {
        self.lun_ids.len() + self.fs_ids.len()
    }
}

/// A validated QoS parameter document: upper-case quality names to positive
/// integer values. Validation against the product model happens before the
/// document reaches the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosSpec(pub BTreeMap<String, u64>);

/// The object a QoS policy is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QosObject {
    Lun(String),
    Filesystem(String),
}

/// Thick/thin provisioning selector of a LUN or filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocType {
    Thick,
    Thin,
}

impl AllocType {
    /// Wire value of the allocation type.
    pub fn code(&self) -> u8 {
        match self {
            AllocType::Thick => 0,
            AllocType::Thin => 1,
        }
    }
}

impl Default for AllocType {
    fn default() -> Self {
        AllocType::Thin
    }
}

/// Resource type discriminator used by the replication pair interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResType {
    Lun,
    Filesystem,
}

impl ResType {
    /// Wire value of the resource type.
    pub fn code(&self) -> u8 {
        match self {
            ResType::Lun => super::RES_TYPE_LUN,
            ResType::Filesystem => super::RES_TYPE_FILESYSTEM,
        }
    }
}

/// Resource type discriminator used by the HyperMetro pair interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetroResourceType {
    Lun,
    Filesystem,
}

impl MetroResourceType {
    /// Wire value of the HyperMetro resource type.
    pub fn code(&self) -> u8 {
        match self {
            MetroResourceType::Lun => super::METRO_RESOURCE_TYPE_LUN,
            MetroResourceType::Filesystem => super::METRO_RESOURCE_TYPE_FILESYSTEM,
        }
    }
}

/// Payload for LUN creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateLunRequest {
    pub name: String,
    pub pool_id: String,
    /// Capacity in bytes.
    pub capacity: u64,
    pub alloc_type: AllocType,
    pub workload_type_id: Option<String>,
}

/// Payload for filesystem creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFilesystemRequest {
    pub name: String,
    pub pool_id: String,
    /// Capacity in bytes.
    pub capacity: u64,
    pub alloc_type: AllocType,
    pub workload_type_id: Option<String>,
}

/// Payload for HyperMetro pair creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateMetroPairRequest {
    pub domain_id: String,
    pub local_obj_id: String,
    pub remote_obj_id: String,
    pub resource_type: MetroResourceType,
    /// Whether an initial full synchronization is required (the local object
    /// carries cloned data the remote side does not have yet).
    pub first_sync: bool,
    /// Synchronization speed, highest is 4.
    pub speed: u8,
}

/// Payload for replication pair creation. The model/synchronize/speed
/// constants are written by the caller so the wire values stay visible at
/// the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReplicationPairRequest {
    pub local_res_id: String,
    pub local_res_type: ResType,
    pub remote_device_id: String,
    pub remote_res_id: String,
    pub replication_model: u8,
    pub synchronize_type: u8,
    pub speed: u8,
    /// Period of the timed synchronization, in seconds.
    pub timing_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::RssFlags;

    #[test]
    fn rss_flags_decode() {
        let flags = RssFlags::parse(r#"{"HyperMetro":"TRUE","RemoteReplication":"FALSE","LunCopy":"FALSE","HyperCopy":"TRUE"}"#);
        assert!(flags.hyper_metro);
        assert!(!flags.remote_replication);
        assert!(!flags.lun_copy);
        assert!(flags.hyper_copy);
        assert!(!flags.is_clear());
    }

    #[test]
    fn rss_flags_absent_document() {
        assert!(RssFlags::parse("").is_clear());
        assert!(RssFlags::parse("{}").is_clear());
        assert!(RssFlags::parse("not json").is_clear());
    }
}
