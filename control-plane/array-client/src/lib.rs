//! Capability contract between the volume orchestrator and the array
//! management interface. The orchestrator only ever talks to a
//! `dyn ArrayClient`; the REST binding lives outside this workspace and the
//! in-memory [`mock`] array stands in for it under test.
//!
//! Lookups return `Ok(None)` for absent objects — absence is a state, not an
//! error. No method is idempotent; callers read-then-act on create paths.

use async_trait::async_trait;
use snafu::Snafu;

pub mod mock;
pub mod types;

pub use types::*;

/// Wire value of the asynchronous replication model.
pub const REPLICATION_MODEL_ASYNC: u8 = 2;
/// Wire value of the timed-wait-after-sync-begins synchronize type.
pub const SYNCHRONIZE_TYPE_TIMED_WAIT: u8 = 2;
/// Highest synchronization/copy speed.
pub const SPEED_HIGHEST: u8 = 4;
/// HyperMetro pair resource type for a LUN.
pub const METRO_RESOURCE_TYPE_LUN: u8 = 1;
/// HyperMetro pair resource type for a filesystem.
pub const METRO_RESOURCE_TYPE_FILESYSTEM: u8 = 2;
/// Replication pair resource type for a LUN.
pub const RES_TYPE_LUN: u8 = 11;
/// Replication pair resource type for a filesystem.
pub const RES_TYPE_FILESYSTEM: u8 = 40;

/// Errors surfaced by the array management interface.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum ClientError {
    #[snafu(display("Array request '{request}' failed: {details}"))]
    Request { request: String, details: String },
    #[snafu(display("Array request '{request}' returned business error {code}: {description}"))]
    Business {
        request: String,
        code: i64,
        description: String,
    },
}

/// The capability set the orchestrator consumes. One instance per array;
/// safe for concurrent use across volumes.
#[async_trait]
pub trait ArrayClient: Send + Sync {
    // Pool and array identity.
    async fn pool_by_name(&self, name: &str) -> Result<Option<StoragePool>, ClientError>;
    async fn system(&self) -> Result<ArraySystem, ClientError>;
    async fn remote_device_by_sn(&self, serial: &str)
        -> Result<Option<RemoteDevice>, ClientError>;
    /// Resolve an application (workload) type name to its id.
    async fn application_type_by_name(&self, name: &str)
        -> Result<Option<String>, ClientError>;

    // LUN.
    async fn lun_by_name(&self, name: &str) -> Result<Option<Lun>, ClientError>;
    async fn lun_by_id(&self, id: &str) -> Result<Option<Lun>, ClientError>;
    async fn create_lun(&self, request: &CreateLunRequest) -> Result<Lun, ClientError>;
    async fn delete_lun(&self, id: &str) -> Result<(), ClientError>;
    async fn extend_lun(&self, id: &str, new_bytes: u64) -> Result<(), ClientError>;

    // LUN snapshot.
    async fn create_lun_snapshot(
        &self,
        name: &str,
        lun_id: &str,
    ) -> Result<LunSnapshot, ClientError>;
    async fn lun_snapshot_by_name(&self, name: &str)
        -> Result<Option<LunSnapshot>, ClientError>;
    async fn activate_lun_snapshot(&self, id: &str) -> Result<(), ClientError>;
    async fn deactivate_lun_snapshot(&self, id: &str) -> Result<(), ClientError>;
    async fn delete_lun_snapshot(&self, id: &str) -> Result<(), ClientError>;

    // Clone pair.
    async fn create_clone_pair(
        &self,
        source_id: &str,
        dest_id: &str,
        speed: u8,
    ) -> Result<ClonePair, ClientError>;
    async fn sync_clone_pair(&self, id: &str) -> Result<(), ClientError>;
    async fn clone_pair_by_id(&self, id: &str) -> Result<Option<ClonePair>, ClientError>;
    async fn delete_clone_pair(&self, id: &str) -> Result<(), ClientError>;

    // LUN copy job.
    async fn create_lun_copy(
        &self,
        name: &str,
        snapshot_id: &str,
        lun_id: &str,
        speed: u8,
    ) -> Result<LunCopy, ClientError>;
    async fn start_lun_copy(&self, id: &str) -> Result<(), ClientError>;
    async fn stop_lun_copy(&self, id: &str) -> Result<(), ClientError>;
    async fn lun_copy_by_name(&self, name: &str) -> Result<Option<LunCopy>, ClientError>;
    async fn lun_copy_by_id(&self, id: &str) -> Result<Option<LunCopy>, ClientError>;
    async fn delete_lun_copy(&self, id: &str) -> Result<(), ClientError>;

    // HyperMetro.
    async fn hyper_metro_domain_by_name(
        &self,
        name: &str,
    ) -> Result<Option<HyperMetroDomain>, ClientError>;
    async fn create_hyper_metro_pair(
        &self,
        request: &CreateMetroPairRequest,
    ) -> Result<HyperMetroPair, ClientError>;
    async fn sync_hyper_metro_pair(&self, id: &str) -> Result<(), ClientError>;
    async fn stop_hyper_metro_pair(&self, id: &str) -> Result<(), ClientError>;
    async fn delete_hyper_metro_pair(&self, id: &str, force: bool) -> Result<(), ClientError>;
    async fn hyper_metro_pair_by_id(
        &self,
        id: &str,
    ) -> Result<Option<HyperMetroPair>, ClientError>;
    async fn hyper_metro_pair_by_local_obj(
        &self,
        obj_id: &str,
    ) -> Result<Option<HyperMetroPair>, ClientError>;

    // Asynchronous replication.
    async fn create_replication_pair(
        &self,
        request: &CreateReplicationPairRequest,
    ) -> Result<ReplicationPair, ClientError>;
    async fn sync_replication_pair(&self, id: &str) -> Result<(), ClientError>;
    async fn split_replication_pair(&self, id: &str) -> Result<(), ClientError>;
    async fn delete_replication_pair(&self, id: &str) -> Result<(), ClientError>;
    async fn replication_pairs_by_res(
        &self,
        res_id: &str,
        res_type: ResType,
    ) -> Result<Vec<ReplicationPair>, ClientError>;

    // Filesystem.
    async fn filesystem_by_name(&self, name: &str)
        -> Result<Option<Filesystem>, ClientError>;
    async fn filesystem_by_id(&self, id: &str) -> Result<Option<Filesystem>, ClientError>;
    async fn create_filesystem(
        &self,
        request: &CreateFilesystemRequest,
    ) -> Result<Filesystem, ClientError>;
    async fn delete_filesystem(&self, id: &str) -> Result<(), ClientError>;
    async fn extend_filesystem(&self, id: &str, new_bytes: u64) -> Result<(), ClientError>;
    async fn set_filesystem_quota(&self, id: &str, quota_bytes: u64)
        -> Result<(), ClientError>;

    // QoS policy. Creation attaches and activates in one capability; on
    // teardown the orchestrator detaches the object, re-reads the policy
    // and deactivates-then-deletes it once it references nothing.
    async fn create_qos_policy(
        &self,
        spec: &QosSpec,
        object: &QosObject,
    ) -> Result<QosPolicy, ClientError>;
    async fn qos_policy_by_id(&self, id: &str) -> Result<Option<QosPolicy>, ClientError>;
    /// Detach one object from the policy.
    async fn remove_object_from_qos(
        &self,
        id: &str,
        object: &QosObject,
    ) -> Result<(), ClientError>;
    async fn deactivate_qos_policy(&self, id: &str) -> Result<(), ClientError>;
    async fn delete_qos_policy(&self, id: &str) -> Result<(), ClientError>;
}
