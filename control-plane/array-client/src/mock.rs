//! In-memory array implementing the client contract. Two instances linked
//! with [`MockArray::link_remote`] model the local/remote peering of a
//! mirrored setup. Every call is recorded and any method can be made to
//! fail, which is how the orchestrator tests drive partial-failure paths.

use crate::{
    ArrayClient, ArraySystem, ClientError, ClonePair, ClonePairState, CreateFilesystemRequest,
    CreateLunRequest, CreateMetroPairRequest, CreateReplicationPairRequest, Filesystem, Health,
    HyperMetroDomain, HyperMetroPair, LinkState, Lun, LunCopy, LunCopyState, LunSnapshot,
    MetroDomainState, MetroPairState, MetroResourceType, QosObject, QosPolicy, QosSpec,
    RemoteDevice, ReplicationPair, ReplicationPairState, ResType, RssFlags, SnapshotState,
    StoragePool,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

/// Everything the mock array knows. Public so tests can stage arbitrary
/// array-side conditions through [`MockArray::with_state`].
#[derive(Debug, Default)]
pub struct ArrayState {
    pub pools: Vec<StoragePool>,
    pub luns: Vec<Lun>,
    pub snapshots: Vec<LunSnapshot>,
    pub clone_pairs: Vec<ClonePair>,
    pub lun_copies: Vec<LunCopy>,
    pub metro_domains: Vec<HyperMetroDomain>,
    pub metro_pairs: Vec<HyperMetroPair>,
    pub replication_pairs: Vec<ReplicationPair>,
    pub remote_devices: Vec<RemoteDevice>,
    pub filesystems: Vec<Filesystem>,
    pub qos_policies: Vec<QosPolicy>,
    pub application_types: HashMap<String, String>,
    next_id: u64,
}

impl ArrayState {
    fn alloc_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn alloc_wwn(&mut self) -> String {
        self.next_id += 1;
        format!("6{:031x}", self.next_id)
    }
}

/// One recorded client call.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub target: String,
    pub mutating: bool,
}

/// The in-memory test array.
pub struct MockArray {
    label: String,
    serial: String,
    state: Mutex<ArrayState>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<&'static str, ClientError>>,
}

impl MockArray {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            serial: format!("SN-{label}"),
            state: Mutex::new(ArrayState::default()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        })
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Add a storage pool, returning its id.
    pub fn add_pool(&self, name: &str, free_capacity: u64) -> String {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.pools.push(StoragePool {
            id: id.clone(),
            name: name.to_string(),
            free_capacity,
        });
        id
    }

    /// Add a HyperMetro domain in normal running state, returning its id.
    pub fn add_metro_domain(&self, name: &str) -> String {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.metro_domains.push(HyperMetroDomain {
            id: id.clone(),
            name: name.to_string(),
            state: MetroDomainState::Normal,
        });
        id
    }

    pub fn add_application_type(&self, name: &str, id: &str) {
        self.state
            .lock()
            .application_types
            .insert(name.to_string(), id.to_string());
    }

    /// Register a healthy remote-device peering towards `peer`.
    pub fn link_remote(&self, peer: &MockArray) {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.remote_devices.push(RemoteDevice {
            id,
            serial: peer.serial.clone(),
            health: Health::Normal,
            link: LinkState::Up,
        });
    }

    /// Make `method` fail with `error` until the failure is cleared.
    pub fn fail_on(&self, method: &'static str, error: ClientError) {
        self.failures.lock().insert(method, error);
    }

    pub fn clear_failure(&self, method: &'static str) {
        self.failures.lock().remove(method);
    }

    /// All recorded calls, formatted `Method(target)`.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|c| format!("{}({})", c.method, c.target))
            .collect()
    }

    /// Only the mutating calls, formatted `Method(target)`.
    pub fn writes(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.mutating)
            .map(|c| format!("{}({})", c.method, c.target))
            .collect()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn lun_count(&self) -> usize {
        self.state.lock().luns.len()
    }

    pub fn snapshot_count(&self) -> usize {
        self.state.lock().snapshots.len()
    }

    /// Run `f` against the raw state, for staging or asserting conditions
    /// the contract has no capability for.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut ArrayState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// True when no provisioned object or pairing artifact remains.
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.luns.is_empty()
            && state.filesystems.is_empty()
            && state.snapshots.is_empty()
            && state.clone_pairs.is_empty()
            && state.lun_copies.is_empty()
            && state.metro_pairs.is_empty()
            && state.replication_pairs.is_empty()
            && state.qos_policies.is_empty()
    }

    fn observe(&self, method: &'static str, target: &str, mutating: bool) -> Result<(), ClientError> {
        self.calls.lock().push(Call {
            method,
            target: target.to_string(),
            mutating,
        });
        match self.failures.lock().get(method) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn business(request: &str, description: &str) -> ClientError {
        ClientError::Business {
            request: request.to_string(),
            code: 2,
            description: description.to_string(),
        }
    }
}

impl std::fmt::Debug for MockArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockArray({})", self.label)
    }
}

#[async_trait]
impl ArrayClient for MockArray {
    async fn pool_by_name(&self, name: &str) -> Result<Option<StoragePool>, ClientError> {
        self.observe("GetPoolByName", name, false)?;
        Ok(self.state.lock().pools.iter().find(|p| p.name == name).cloned())
    }

    async fn system(&self) -> Result<ArraySystem, ClientError> {
        self.observe("GetSystem", "", false)?;
        Ok(ArraySystem {
            serial: self.serial.clone(),
            name: self.label.clone(),
        })
    }

    async fn remote_device_by_sn(
        &self,
        serial: &str,
    ) -> Result<Option<RemoteDevice>, ClientError> {
        self.observe("GetRemoteDeviceBySN", serial, false)?;
        Ok(self
            .state
            .lock()
            .remote_devices
            .iter()
            .find(|d| d.serial == serial)
            .cloned())
    }

    async fn application_type_by_name(
        &self,
        name: &str,
    ) -> Result<Option<String>, ClientError> {
        self.observe("GetApplicationTypeByName", name, false)?;
        Ok(self.state.lock().application_types.get(name).cloned())
    }

    async fn lun_by_name(&self, name: &str) -> Result<Option<Lun>, ClientError> {
        self.observe("GetLunByName", name, false)?;
        Ok(self.state.lock().luns.iter().find(|l| l.name == name).cloned())
    }

    async fn lun_by_id(&self, id: &str) -> Result<Option<Lun>, ClientError> {
        self.observe("GetLunByID", id, false)?;
        Ok(self.state.lock().luns.iter().find(|l| l.id == id).cloned())
    }

    async fn create_lun(&self, request: &CreateLunRequest) -> Result<Lun, ClientError> {
        self.observe("CreateLun", &request.name, true)?;
        let mut state = self.state.lock();
        let pool = state
            .pools
            .iter()
            .find(|p| p.id == request.pool_id)
            .cloned()
            .ok_or_else(|| Self::business("CreateLun", "parent pool does not exist"))?;
        if state.luns.iter().any(|l| l.name == request.name) {
            return Err(Self::business("CreateLun", "object name already exists"));
        }
        let id = state.alloc_id();
        let wwn = state.alloc_wwn();
        let lun = Lun {
            id,
            name: request.name.clone(),
            wwn,
            capacity: request.capacity,
            pool_id: pool.id,
            pool_name: pool.name,
            ioclass_id: None,
            exposed_to_initiator: false,
            rss: RssFlags::default(),
            lun_copy_ids: Vec::new(),
            workload_type_id: request.workload_type_id.clone(),
        };
        state.luns.push(lun.clone());
        Ok(lun)
    }

    async fn delete_lun(&self, id: &str) -> Result<(), ClientError> {
        self.observe("DeleteLun", id, true)?;
        let mut state = self.state.lock();
        let before = state.luns.len();
        state.luns.retain(|l| l.id != id);
        if state.luns.len() == before {
            return Err(Self::business("DeleteLun", "object does not exist"));
        }
        Ok(())
    }

    async fn extend_lun(&self, id: &str, new_bytes: u64) -> Result<(), ClientError> {
        self.observe("ExtendLun", id, true)?;
        let mut state = self.state.lock();
        let lun = state
            .luns
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| Self::business("ExtendLun", "object does not exist"))?;
        if new_bytes < lun.capacity {
            return Err(Self::business("ExtendLun", "new capacity below current"));
        }
        lun.capacity = new_bytes;
        Ok(())
    }

    async fn create_lun_snapshot(
        &self,
        name: &str,
        lun_id: &str,
    ) -> Result<LunSnapshot, ClientError> {
        self.observe("CreateLunSnapshot", name, true)?;
        let mut state = self.state.lock();
        let parent = state
            .luns
            .iter()
            .find(|l| l.id == lun_id)
            .cloned()
            .ok_or_else(|| Self::business("CreateLunSnapshot", "parent LUN does not exist"))?;
        let id = state.alloc_id();
        let timestamp = 1_700_000_000 + id.parse::<i64>().unwrap_or_default();
        let snapshot = LunSnapshot {
            id,
            name: name.to_string(),
            parent_id: parent.id,
            user_capacity: parent.capacity / 512,
            timestamp,
            state: SnapshotState::Inactive,
        };
        state.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn lun_snapshot_by_name(
        &self,
        name: &str,
    ) -> Result<Option<LunSnapshot>, ClientError> {
        self.observe("GetLunSnapshotByName", name, false)?;
        Ok(self
            .state
            .lock()
            .snapshots
            .iter()
            .find(|s| s.name == name)
            .cloned())
    }

    async fn activate_lun_snapshot(&self, id: &str) -> Result<(), ClientError> {
        self.observe("ActivateLunSnapshot", id, true)?;
        let mut state = self.state.lock();
        let snapshot = state
            .snapshots
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Self::business("ActivateLunSnapshot", "object does not exist"))?;
        snapshot.state = SnapshotState::Active;
        Ok(())
    }

    async fn deactivate_lun_snapshot(&self, id: &str) -> Result<(), ClientError> {
        self.observe("DeactivateLunSnapshot", id, true)?;
        let mut state = self.state.lock();
        let snapshot = state
            .snapshots
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Self::business("DeactivateLunSnapshot", "object does not exist"))?;
        snapshot.state = SnapshotState::Inactive;
        Ok(())
    }

    async fn delete_lun_snapshot(&self, id: &str) -> Result<(), ClientError> {
        self.observe("DeleteLunSnapshot", id, true)?;
        let mut state = self.state.lock();
        let snapshot = state
            .snapshots
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| Self::business("DeleteLunSnapshot", "object does not exist"))?;
        if snapshot.state == SnapshotState::Active {
            return Err(Self::business(
                "DeleteLunSnapshot",
                "snapshot must be deactivated before deletion",
            ));
        }
        state.snapshots.retain(|s| s.id != id);
        Ok(())
    }

    async fn create_clone_pair(
        &self,
        source_id: &str,
        dest_id: &str,
        _speed: u8,
    ) -> Result<ClonePair, ClientError> {
        self.observe("CreateClonePair", dest_id, true)?;
        let mut state = self.state.lock();
        // The pair id equals the destination LUN id on this family.
        let pair = ClonePair {
            id: dest_id.to_string(),
            source_id: source_id.to_string(),
            dest_id: dest_id.to_string(),
            health: Health::Normal,
            state: ClonePairState::Initializing,
        };
        if let Some(dest) = state.luns.iter_mut().find(|l| l.id == dest_id) {
            dest.rss.hyper_copy = true;
        }
        state.clone_pairs.push(pair.clone());
        Ok(pair)
    }

    async fn sync_clone_pair(&self, id: &str) -> Result<(), ClientError> {
        self.observe("SyncClonePair", id, true)?;
        let mut state = self.state.lock();
        let pair = state
            .clone_pairs
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Self::business("SyncClonePair", "object does not exist"))?;
        // The mock array copies instantly.
        pair.state = ClonePairState::Normal;
        Ok(())
    }

    async fn clone_pair_by_id(&self, id: &str) -> Result<Option<ClonePair>, ClientError> {
        self.observe("GetClonePairInfo", id, false)?;
        Ok(self
            .state
            .lock()
            .clone_pairs
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn delete_clone_pair(&self, id: &str) -> Result<(), ClientError> {
        self.observe("DeleteClonePair", id, true)?;
        let mut state = self.state.lock();
        let pair = state
            .clone_pairs
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| Self::business("DeleteClonePair", "object does not exist"))?;
        state.clone_pairs.retain(|p| p.id != id);
        if let Some(dest) = state.luns.iter_mut().find(|l| l.id == pair.dest_id) {
            dest.rss.hyper_copy = false;
        }
        Ok(())
    }

    async fn create_lun_copy(
        &self,
        name: &str,
        snapshot_id: &str,
        lun_id: &str,
        _speed: u8,
    ) -> Result<LunCopy, ClientError> {
        self.observe("CreateLunCopy", name, true)?;
        let mut state = self.state.lock();
        let snapshot_name = state
            .snapshots
            .iter()
            .find(|s| s.id == snapshot_id)
            .map(|s| s.name.clone())
            .ok_or_else(|| Self::business("CreateLunCopy", "source snapshot does not exist"))?;
        let id = state.alloc_id();
        let copy = LunCopy {
            id: id.clone(),
            name: name.to_string(),
            source_snapshot_name: snapshot_name,
            dest_lun_id: lun_id.to_string(),
            health: Health::Normal,
            state: LunCopyState::Created,
        };
        if let Some(dest) = state.luns.iter_mut().find(|l| l.id == lun_id) {
            dest.lun_copy_ids.push(id);
            dest.rss.lun_copy = true;
        }
        state.lun_copies.push(copy.clone());
        Ok(copy)
    }

    async fn start_lun_copy(&self, id: &str) -> Result<(), ClientError> {
        self.observe("StartLunCopy", id, true)?;
        let mut state = self.state.lock();
        let copy = state
            .lun_copies
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Self::business("StartLunCopy", "object does not exist"))?;
        // The mock array copies instantly.
        copy.state = LunCopyState::Complete;
        Ok(())
    }

    async fn stop_lun_copy(&self, id: &str) -> Result<(), ClientError> {
        self.observe("StopLunCopy", id, true)?;
        let mut state = self.state.lock();
        let copy = state
            .lun_copies
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Self::business("StopLunCopy", "object does not exist"))?;
        copy.state = LunCopyState::Stopped;
        Ok(())
    }

    async fn lun_copy_by_name(&self, name: &str) -> Result<Option<LunCopy>, ClientError> {
        self.observe("GetLunCopyByName", name, false)?;
        Ok(self
            .state
            .lock()
            .lun_copies
            .iter()
            .find(|c| c.name == name)
            .cloned())
    }

    async fn lun_copy_by_id(&self, id: &str) -> Result<Option<LunCopy>, ClientError> {
        self.observe("GetLunCopyByID", id, false)?;
        Ok(self
            .state
            .lock()
            .lun_copies
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn delete_lun_copy(&self, id: &str) -> Result<(), ClientError> {
        self.observe("DeleteLunCopy", id, true)?;
        let mut state = self.state.lock();
        let copy = state
            .lun_copies
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| Self::business("DeleteLunCopy", "object does not exist"))?;
        state.lun_copies.retain(|c| c.id != id);
        if let Some(dest) = state.luns.iter_mut().find(|l| l.id == copy.dest_lun_id) {
            dest.lun_copy_ids.retain(|c| c != id);
            dest.rss.lun_copy = !dest.lun_copy_ids.is_empty();
        }
        Ok(())
    }

    async fn hyper_metro_domain_by_name(
        &self,
        name: &str,
    ) -> Result<Option<HyperMetroDomain>, ClientError> {
        self.observe("GetHyperMetroDomainByName", name, false)?;
        Ok(self
            .state
            .lock()
            .metro_domains
            .iter()
            .find(|d| d.name == name)
            .cloned())
    }

    async fn create_hyper_metro_pair(
        &self,
        request: &CreateMetroPairRequest,
    ) -> Result<HyperMetroPair, ClientError> {
        self.observe("CreateHyperMetroPair", &request.local_obj_id, true)?;
        let mut state = self.state.lock();
        if !state.metro_domains.iter().any(|d| d.id == request.domain_id) {
            return Err(Self::business(
                "CreateHyperMetroPair",
                "metro domain does not exist",
            ));
        }
        let id = state.alloc_id();
        let pair = HyperMetroPair {
            id,
            domain_id: request.domain_id.clone(),
            local_obj_id: request.local_obj_id.clone(),
            remote_obj_id: request.remote_obj_id.clone(),
            health: Health::Normal,
            state: if request.first_sync {
                MetroPairState::ToSync
            } else {
                MetroPairState::Normal
            },
        };
        match request.resource_type {
            MetroResourceType::Lun => {
                if let Some(lun) = state.luns.iter_mut().find(|l| l.id == request.local_obj_id) {
                    lun.rss.hyper_metro = true;
                }
            }
            MetroResourceType::Filesystem => {
                if let Some(fs) = state
                    .filesystems
                    .iter_mut()
                    .find(|f| f.id == request.local_obj_id)
                {
                    fs.rss.hyper_metro = true;
                }
            }
        }
        state.metro_pairs.push(pair.clone());
        Ok(pair)
    }

    async fn sync_hyper_metro_pair(&self, id: &str) -> Result<(), ClientError> {
        self.observe("SyncHyperMetroPair", id, true)?;
        let mut state = self.state.lock();
        let pair = state
            .metro_pairs
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Self::business("SyncHyperMetroPair", "object does not exist"))?;
        pair.state = MetroPairState::Normal;
        Ok(())
    }

    async fn stop_hyper_metro_pair(&self, id: &str) -> Result<(), ClientError> {
        self.observe("StopHyperMetroPair", id, true)?;
        let mut state = self.state.lock();
        let pair = state
            .metro_pairs
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Self::business("StopHyperMetroPair", "object does not exist"))?;
        pair.state = MetroPairState::Pause;
        Ok(())
    }

    async fn delete_hyper_metro_pair(&self, id: &str, _force: bool) -> Result<(), ClientError> {
        self.observe("DeleteHyperMetroPair", id, true)?;
        let mut state = self.state.lock();
        let pair = state
            .metro_pairs
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| Self::business("DeleteHyperMetroPair", "object does not exist"))?;
        state.metro_pairs.retain(|p| p.id != id);
        if let Some(lun) = state.luns.iter_mut().find(|l| l.id == pair.local_obj_id) {
            lun.rss.hyper_metro = false;
        }
        if let Some(fs) = state
            .filesystems
            .iter_mut()
            .find(|f| f.id == pair.local_obj_id)
        {
            fs.rss.hyper_metro = false;
        }
        Ok(())
    }

    async fn hyper_metro_pair_by_id(
        &self,
        id: &str,
    ) -> Result<Option<HyperMetroPair>, ClientError> {
        self.observe("GetHyperMetroPair", id, false)?;
        Ok(self
            .state
            .lock()
            .metro_pairs
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn hyper_metro_pair_by_local_obj(
        &self,
        obj_id: &str,
    ) -> Result<Option<HyperMetroPair>, ClientError> {
        self.observe("GetHyperMetroPairByLocalObjID", obj_id, false)?;
        Ok(self
            .state
            .lock()
            .metro_pairs
            .iter()
            .find(|p| p.local_obj_id == obj_id)
            .cloned())
    }

    async fn create_replication_pair(
        &self,
        request: &CreateReplicationPairRequest,
    ) -> Result<ReplicationPair, ClientError> {
        self.observe("CreateReplicationPair", &request.local_res_id, true)?;
        let mut state = self.state.lock();
        if !state
            .remote_devices
            .iter()
            .any(|d| d.id == request.remote_device_id)
        {
            return Err(Self::business(
                "CreateReplicationPair",
                "remote device does not exist",
            ));
        }
        let id = state.alloc_id();
        let pair = ReplicationPair {
            id,
            local_res_id: request.local_res_id.clone(),
            remote_res_id: request.remote_res_id.clone(),
            state: ReplicationPairState::Split,
        };
        match request.local_res_type {
            ResType::Lun => {
                if let Some(lun) = state.luns.iter_mut().find(|l| l.id == request.local_res_id) {
                    lun.rss.remote_replication = true;
                }
            }
            ResType::Filesystem => {
                if let Some(fs) = state
                    .filesystems
                    .iter_mut()
                    .find(|f| f.id == request.local_res_id)
                {
                    fs.rss.remote_replication = true;
                }
            }
        }
        state.replication_pairs.push(pair.clone());
        Ok(pair)
    }

    async fn sync_replication_pair(&self, id: &str) -> Result<(), ClientError> {
        self.observe("SyncReplicationPair", id, true)?;
        let mut state = self.state.lock();
        let pair = state
            .replication_pairs
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Self::business("SyncReplicationPair", "object does not exist"))?;
        pair.state = ReplicationPairState::Sync;
        Ok(())
    }

    async fn split_replication_pair(&self, id: &str) -> Result<(), ClientError> {
        self.observe("SplitReplicationPair", id, true)?;
        let mut state = self.state.lock();
        let pair = state
            .replication_pairs
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Self::business("SplitReplicationPair", "object does not exist"))?;
        pair.state = ReplicationPairState::Split;
        Ok(())
    }

    async fn delete_replication_pair(&self, id: &str) -> Result<(), ClientError> {
        self.observe("DeleteReplicationPair", id, true)?;
        let mut state = self.state.lock();
        let pair = state
            .replication_pairs
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| Self::business("DeleteReplicationPair", "object does not exist"))?;
        state.replication_pairs.retain(|p| p.id != id);
        let still_paired = state
            .replication_pairs
            .iter()
            .any(|p| p.local_res_id == pair.local_res_id);
        if !still_paired {
            if let Some(lun) = state.luns.iter_mut().find(|l| l.id == pair.local_res_id) {
                lun.rss.remote_replication = false;
            }
            if let Some(fs) = state
                .filesystems
                .iter_mut()
                .find(|f| f.id == pair.local_res_id)
            {
                fs.rss.remote_replication = false;
            }
        }
        Ok(())
    }

    async fn replication_pairs_by_res(
        &self,
        res_id: &str,
        _res_type: ResType,
    ) -> Result<Vec<ReplicationPair>, ClientError> {
        self.observe("GetReplicationPairByResID", res_id, false)?;
        Ok(self
            .state
            .lock()
            .replication_pairs
            .iter()
            .filter(|p| p.local_res_id == res_id)
            .cloned()
            .collect())
    }

    async fn filesystem_by_name(&self, name: &str) -> Result<Option<Filesystem>, ClientError> {
        self.observe("GetFileSystemByName", name, false)?;
        Ok(self
            .state
            .lock()
            .filesystems
            .iter()
            .find(|f| f.name == name)
            .cloned())
    }

    async fn filesystem_by_id(&self, id: &str) -> Result<Option<Filesystem>, ClientError> {
        self.observe("GetFileSystemByID", id, false)?;
        Ok(self
            .state
            .lock()
            .filesystems
            .iter()
            .find(|f| f.id == id)
            .cloned())
    }

    async fn create_filesystem(
        &self,
        request: &CreateFilesystemRequest,
    ) -> Result<Filesystem, ClientError> {
        self.observe("CreateFileSystem", &request.name, true)?;
        let mut state = self.state.lock();
        let pool = state
            .pools
            .iter()
            .find(|p| p.id == request.pool_id)
            .cloned()
            .ok_or_else(|| Self::business("CreateFileSystem", "parent pool does not exist"))?;
        if state.filesystems.iter().any(|f| f.name == request.name) {
            return Err(Self::business("CreateFileSystem", "object name already exists"));
        }
        let id = state.alloc_id();
        let fs = Filesystem {
            id,
            name: request.name.clone(),
            capacity: request.capacity,
            quota: None,
            pool_id: pool.id,
            pool_name: pool.name,
            ioclass_id: None,
            rss: RssFlags::default(),
            workload_type_id: request.workload_type_id.clone(),
        };
        state.filesystems.push(fs.clone());
        Ok(fs)
    }

    async fn delete_filesystem(&self, id: &str) -> Result<(), ClientError> {
        self.observe("DeleteFileSystem", id, true)?;
        let mut state = self.state.lock();
        let before = state.filesystems.len();
        state.filesystems.retain(|f| f.id != id);
        if state.filesystems.len() == before {
            return Err(Self::business("DeleteFileSystem", "object does not exist"));
        }
        Ok(())
    }

    async fn extend_filesystem(&self, id: &str, new_bytes: u64) -> Result<(), ClientError> {
        self.observe("ExtendFileSystem", id, true)?;
        let mut state = self.state.lock();
        let fs = state
            .filesystems
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| Self::business("ExtendFileSystem", "object does not exist"))?;
        if new_bytes < fs.capacity {
            return Err(Self::business("ExtendFileSystem", "new capacity below current"));
        }
        fs.capacity = new_bytes;
        Ok(())
    }

    async fn set_filesystem_quota(&self, id: &str, quota_bytes: u64) -> Result<(), ClientError> {
        self.observe("SetFileSystemQuota", id, true)?;
        let mut state = self.state.lock();
        let fs = state
            .filesystems
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| Self::business("SetFileSystemQuota", "object does not exist"))?;
        fs.quota = Some(quota_bytes);
        Ok(())
    }

    async fn create_qos_policy(
        &self,
        spec: &QosSpec,
        object: &QosObject,
    ) -> Result<QosPolicy, ClientError> {
        let target = match object {
            QosObject::Lun(id) | QosObject::Filesystem(id) => id.clone(),
        };
        self.observe("CreateQosPolicy", &target, true)?;
        let mut state = self.state.lock();
        let id = state.alloc_id();
        let mut policy = QosPolicy {
            id: id.clone(),
            name: format!("k8s_qos_{id}"),
            lun_ids: Vec::new(),
            fs_ids: Vec::new(),
            activated: true,
            spec: spec.clone(),
        };
        match object {
            QosObject::Lun(lun_id) => {
                let lun = state
                    .luns
                    .iter_mut()
                    .find(|l| l.id == *lun_id)
                    .ok_or_else(|| Self::business("CreateQosPolicy", "object does not exist"))?;
                lun.ioclass_id = Some(id.clone());
                policy.lun_ids.push(lun_id.clone());
            }
            QosObject::Filesystem(fs_id) => {
                let fs = state
                    .filesystems
                    .iter_mut()
                    .find(|f| f.id == *fs_id)
                    .ok_or_else(|| Self::business("CreateQosPolicy", "object does not exist"))?;
                fs.ioclass_id = Some(id.clone());
                policy.fs_ids.push(fs_id.clone());
            }
        }
        state.qos_policies.push(policy.clone());
        Ok(policy)
    }

    async fn qos_policy_by_id(&self, id: &str) -> Result<Option<QosPolicy>, ClientError> {
        self.observe("GetQosPolicyByID", id, false)?;
        Ok(self
            .state
            .lock()
            .qos_policies
            .iter()
            .find(|q| q.id == id)
            .cloned())
    }

    async fn remove_object_from_qos(
        &self,
        id: &str,
        object: &QosObject,
    ) -> Result<(), ClientError> {
        let target = match object {
            QosObject::Lun(id) | QosObject::Filesystem(id) => id.clone(),
        };
        self.observe("RemoveObjectFromQos", &target, true)?;
        let mut state = self.state.lock();
        let policy = state
            .qos_policies
            .iter_mut()
            .find(|q| q.id == id)
            .ok_or_else(|| Self::business("RemoveObjectFromQos", "object does not exist"))?;
        match object {
            QosObject::Lun(lun_id) => policy.lun_ids.retain(|l| l != lun_id),
            QosObject::Filesystem(fs_id) => policy.fs_ids.retain(|f| f != fs_id),
        }
        match object {
            QosObject::Lun(lun_id) => {
                if let Some(lun) = state.luns.iter_mut().find(|l| l.id == *lun_id) {
                    lun.ioclass_id = None;
                }
            }
            QosObject::Filesystem(fs_id) => {
                if let Some(fs) = state.filesystems.iter_mut().find(|f| f.id == *fs_id) {
                    fs.ioclass_id = None;
                }
            }
        }
        Ok(())
    }

    async fn deactivate_qos_policy(&self, id: &str) -> Result<(), ClientError> {
        self.observe("DeactivateQosPolicy", id, true)?;
        let mut state = self.state.lock();
        let policy = state
            .qos_policies
            .iter_mut()
            .find(|q| q.id == id)
            .ok_or_else(|| Self::business("DeactivateQosPolicy", "object does not exist"))?;
        policy.activated = false;
        Ok(())
    }

    async fn delete_qos_policy(&self, id: &str) -> Result<(), ClientError> {
        self.observe("DeleteQosPolicy", id, true)?;
        let mut state = self.state.lock();
        let policy = state
            .qos_policies
            .iter()
            .find(|q| q.id == id)
            .ok_or_else(|| Self::business("DeleteQosPolicy", "object does not exist"))?;
        if policy.ref_count() > 0 {
            return Err(Self::business(
                "DeleteQosPolicy",
                "policy still references objects",
            ));
        }
        state.qos_policies.retain(|q| q.id != id);
        Ok(())
    }
}
