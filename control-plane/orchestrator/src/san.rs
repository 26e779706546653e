//! LUN (block volume) lifecycle orchestration. Each public operation is
//! lowered into a task flow whose steps call one or two arrays; create
//! flows register compensating actions so a partial failure leaves no
//! orphan object on either array.

use crate::{
    base,
    context::{CloneSource, Mirror, VolumeParams},
    errors::{self, Error},
    taskflow::{StepResult, TaskFlow},
    utils,
    wait::{wait_until, JOB_POLL_INTERVAL, JOB_WAIT_BUDGET, SNAPSHOT_READY_BUDGET},
    ProductFamily, SnapshotInfo, Volume,
};
use array_client::{
    ArrayClient, ClonePairState, CreateLunRequest, CreateMetroPairRequest,
    CreateReplicationPairRequest, Health, Lun, LunCopyState, LunSnapshot, MetroDomainState,
    MetroPairState, MetroResourceType, QosObject, ReplicationPairState, ResType, SnapshotState,
    REPLICATION_MODEL_ASYNC, SPEED_HIGHEST, SYNCHRONIZE_TYPE_TIMED_WAIT,
};
use futures::FutureExt;
use snafu::{ensure, OptionExt, ResultExt};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, warn};

/// How full-copy provisioning is performed, fixed by the product family at
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloneBackend {
    /// Clone pair between LUNs, current family.
    ClonePair,
    /// LUN copy job driven from an intermediate snapshot, legacy family.
    LunCopy,
}

/// The LUN lifecycle orchestrator for one array, with optional remote
/// clients for HyperMetro and replication mirroring.
pub struct San {
    cli: Arc<dyn ArrayClient>,
    metro_remote_cli: Option<Arc<dyn ArrayClient>>,
    replica_remote_cli: Option<Arc<dyn ArrayClient>>,
    family: ProductFamily,
    clone_backend: CloneBackend,
}

/// Accumulator of a create flow. Steps populate it as they complete; the
/// registered reverts read back whatever was populated.
pub(crate) struct CreateContext {
    params: VolumeParams,
    local_lun_id: Option<String>,
    lun_wwn: Option<String>,
    local_qos_id: Option<String>,
    remote_lun_id: Option<String>,
    remote_qos_id: Option<String>,
    hyper_metro_pair_id: Option<String>,
    remote_cli: Option<Arc<dyn ArrayClient>>,
    remote_pool_id: Option<String>,
    remote_device_id: Option<String>,
    metro_domain_id: Option<String>,
    res_type: ResType,
}

impl CreateContext {
    fn new(params: VolumeParams) -> Self {
        Self {
            params,
            local_lun_id: None,
            lun_wwn: None,
            local_qos_id: None,
            remote_lun_id: None,
            remote_qos_id: None,
            hyper_metro_pair_id: None,
            remote_cli: None,
            remote_pool_id: None,
            remote_device_id: None,
            metro_domain_id: None,
            res_type: ResType::Lun,
        }
    }

    fn remote(&self) -> Result<Arc<dyn ArrayClient>, Error> {
        self.remote_cli
            .clone()
            .context(errors::FlowContext { key: "remoteCli" })
    }
}

/// Accumulator of a delete flow.
pub(crate) struct DeleteContext {
    lun_id: String,
    lun_name: String,
}

/// Accumulator of an expand flow.
pub(crate) struct ExpandContext {
    lun_name: String,
    lun_id: String,
    new_size: u64,
    local_parent_name: String,
    remote_lun_id: Option<String>,
    hyper_metro_pair_id: Option<String>,
    replication_pair_ids: Vec<String>,
}

/// Accumulator of the snapshot flows.
pub(crate) struct SnapshotContext {
    lun_id: String,
    snapshot_name: String,
    snapshot_id: Option<String>,
}

impl San {
    pub fn new(
        cli: Arc<dyn ArrayClient>,
        metro_remote_cli: Option<Arc<dyn ArrayClient>>,
        replica_remote_cli: Option<Arc<dyn ArrayClient>>,
        family: ProductFamily,
    ) -> Self {
        let clone_backend = match family {
            ProductFamily::Current => CloneBackend::ClonePair,
            ProductFamily::Legacy => CloneBackend::LunCopy,
        };
        Self {
            cli,
            metro_remote_cli,
            replica_remote_cli,
            family,
            clone_backend,
        }
    }

    /// Create a volume from the raw request parameters. On failure every
    /// completed step is compensated in reverse order.
    pub async fn create(
        self: &Arc<Self>,
        args: &HashMap<String, String>,
    ) -> Result<Volume, Error> {
        let params = VolumeParams::normalize(self.cli.as_ref(), self.family, args).await?;

        let mut flow = TaskFlow::new("Create-LUN-Volume", self.clone());
        match params.mirror {
            Mirror::Replication => {
                flow.add_task("Get-Replication-Params", San::get_replication_params)
            }
            Mirror::HyperMetro => {
                flow.add_task("Get-HyperMetro-Params", San::get_hyper_metro_params)
            }
            Mirror::None => {}
        }
        flow.add_task_with_revert("Create-Local-LUN", San::create_local_lun, San::revert_local_lun);
        flow.add_task_with_revert("Create-Local-QoS", San::create_local_qos, San::revert_local_qos);
        match params.mirror {
            Mirror::Replication => {
                flow.add_task_with_revert(
                    "Create-Remote-LUN",
                    San::create_remote_lun,
                    San::revert_remote_lun,
                );
                flow.add_task_with_revert(
                    "Create-Remote-QoS",
                    San::create_remote_qos,
                    San::revert_remote_qos,
                );
                flow.add_task("Create-Replication-Pair", San::create_replication_pair);
            }
            Mirror::HyperMetro => {
                flow.add_task_with_revert(
                    "Create-Remote-LUN",
                    San::create_remote_lun,
                    San::revert_remote_lun,
                );
                flow.add_task_with_revert(
                    "Create-Remote-QoS",
                    San::create_remote_qos,
                    San::revert_remote_qos,
                );
                flow.add_task_with_revert(
                    "Create-HyperMetro",
                    San::create_hyper_metro,
                    San::revert_hyper_metro,
                );
            }
            Mirror::None => {}
        }

        let mut ctx = CreateContext::new(params);
        if let Err(error) = flow.run(&mut ctx).await {
            flow.revert(&mut ctx).await;
            return Err(error);
        }

        Ok(Volume {
            name: ctx.params.name.clone(),
            wwn: ctx.lun_wwn.clone(),
        })
    }

    /// Delete a volume and whatever mirror/copy artifacts reference it,
    /// classified by the LUN's relationship flags. Absent is success, and
    /// every step begins with a lookup so retries are safe.
    pub async fn delete(self: &Arc<Self>, name: &str) -> Result<(), Error> {
        let lun_name = utils::object_name(name);
        let Some(lun) = self.cli.lun_by_name(&lun_name).await.context(errors::Array)? else {
            info!(lun = lun_name.as_str(), "LUN to delete does not exist");
            return Ok(());
        };

        let mut flow = TaskFlow::new("Delete-LUN-Volume", self.clone());
        if lun.rss.hyper_metro {
            flow.add_task("Delete-HyperMetro", San::delete_hyper_metro);
            flow.add_task("Delete-HyperMetro-Remote-LUN", San::delete_hyper_metro_remote_lun);
        }
        if lun.rss.remote_replication {
            flow.add_task("Delete-Replication-Pair", San::delete_replication_pair);
            flow.add_task("Delete-Replication-Remote-LUN", San::delete_replication_remote_lun);
        }
        if lun.rss.lun_copy {
            flow.add_task("Delete-Local-LunCopy", San::delete_local_lun_copy);
        }
        if lun.rss.hyper_copy {
            flow.add_task("Delete-Local-HyperCopy", San::delete_local_hyper_copy);
        }
        flow.add_task("Delete-Local-LUN", San::delete_local_lun);

        let mut ctx = DeleteContext {
            lun_id: lun.id,
            lun_name,
        };
        flow.run(&mut ctx).await
    }

    /// Grow a volume to `new_size` bytes, remote side first when mirrored.
    /// Returns whether the LUN was attached before the expand so the caller
    /// can decide to resize the filesystem online. Expand registers no
    /// reverts; a failure surfaces and a retry from above converges.
    pub async fn expand(self: &Arc<Self>, name: &str, new_size: u64) -> Result<bool, Error> {
        let lun_name = utils::object_name(name);
        let lun = self
            .cli
            .lun_by_name(&lun_name)
            .await
            .context(errors::Array)?
            .context(errors::NotFound {
                object: "LUN",
                name: lun_name.clone(),
            })?;

        let is_attached = lun.exposed_to_initiator;
        ensure!(
            new_size > lun.capacity,
            errors::NotGrowing {
                name: lun_name,
                requested: new_size,
                current: lun.capacity,
            }
        );

        let mut flow = TaskFlow::new("Expand-LUN-Volume", self.clone());
        flow.add_task("Expand-PreCheck-Capacity", San::pre_expand_check_capacity);
        if lun.rss.hyper_metro {
            flow.add_task(
                "Expand-HyperMetro-Remote-PreCheck-Capacity",
                San::pre_expand_metro_check_remote_capacity,
            );
            flow.add_task("Suspend-HyperMetro", San::suspend_hyper_metro);
            flow.add_task("Expand-HyperMetro-Remote-LUN", San::expand_metro_remote_lun);
        }
        if lun.rss.remote_replication {
            flow.add_task(
                "Expand-Replication-Remote-PreCheck-Capacity",
                San::pre_expand_replication_check_remote_capacity,
            );
            flow.add_task("Split-Replication", San::split_replication);
            flow.add_task("Expand-Replication-Remote-LUN", San::expand_replication_remote_lun);
        }
        flow.add_task("Expand-Local-LUN", San::expand_local_lun);
        if lun.rss.hyper_metro {
            flow.add_task("Sync-HyperMetro", San::sync_hyper_metro);
        }
        if lun.rss.remote_replication {
            flow.add_task("Sync-Replication", San::sync_replication);
        }

        let mut ctx = ExpandContext {
            lun_name: lun.name,
            lun_id: lun.id,
            new_size,
            local_parent_name: lun.pool_name,
            remote_lun_id: None,
            hyper_metro_pair_id: None,
            replication_pair_ids: Vec::new(),
        };
        flow.run(&mut ctx).await?;
        Ok(is_attached)
    }

    /// Create a snapshot of `volume_name`. Re-creating an existing snapshot
    /// of the same parent returns its attributes; the same name under a
    /// different parent is a conflict.
    pub async fn create_snapshot(
        self: &Arc<Self>,
        volume_name: &str,
        snapshot_name: &str,
    ) -> Result<SnapshotInfo, Error> {
        let lun_name = utils::object_name(volume_name);
        let snapshot_name = utils::object_name(snapshot_name);

        let lun = self
            .cli
            .lun_by_name(&lun_name)
            .await
            .context(errors::Array)?
            .context(errors::NotFound {
                object: "LUN",
                name: lun_name.clone(),
            })?;

        if let Some(snapshot) = self
            .cli
            .lun_snapshot_by_name(&snapshot_name)
            .await
            .context(errors::Array)?
        {
            ensure!(
                snapshot.parent_id == lun.id,
                errors::NameConflict {
                    snapshot: snapshot_name,
                    parent: lun_name,
                }
            );
            return Ok(Self::snapshot_info(&snapshot));
        }

        let mut flow = TaskFlow::new("Create-LUN-Snapshot", self.clone());
        flow.add_task_with_revert("Create-Snapshot", San::create_snapshot_step, San::revert_snapshot);
        flow.add_task("Activate-Snapshot", San::activate_snapshot_step);

        let mut ctx = SnapshotContext {
            lun_id: lun.id,
            snapshot_name: snapshot_name.clone(),
            snapshot_id: None,
        };
        if let Err(error) = flow.run(&mut ctx).await {
            flow.revert(&mut ctx).await;
            return Err(error);
        }

        let snapshot = self
            .cli
            .lun_snapshot_by_name(&snapshot_name)
            .await
            .context(errors::Array)?
            .context(errors::NotFound {
                object: "snapshot",
                name: snapshot_name,
            })?;
        Ok(Self::snapshot_info(&snapshot))
    }

    /// Delete a snapshot, deactivating it first. Absent is success.
    pub async fn delete_snapshot(self: &Arc<Self>, name: &str) -> Result<(), Error> {
        let snapshot_name = utils::object_name(name);
        let Some(snapshot) = self
            .cli
            .lun_snapshot_by_name(&snapshot_name)
            .await
            .context(errors::Array)?
        else {
            info!(snapshot = snapshot_name.as_str(), "snapshot to delete does not exist");
            return Ok(());
        };

        let mut flow = TaskFlow::new("Delete-LUN-Snapshot", self.clone());
        flow.add_task("Deactivate-Snapshot", San::deactivate_snapshot_step);
        flow.add_task("Delete-Snapshot", San::delete_snapshot_step);

        let mut ctx = SnapshotContext {
            lun_id: snapshot.parent_id.clone(),
            snapshot_name,
            snapshot_id: Some(snapshot.id),
        };
        flow.run(&mut ctx).await
    }

    fn snapshot_info(snapshot: &LunSnapshot) -> SnapshotInfo {
        SnapshotInfo {
            creation_time: snapshot.timestamp,
            size_bytes: snapshot.user_capacity * 512,
            parent_id: snapshot.parent_id.clone(),
        }
    }

    fn lun_request(
        params: &VolumeParams,
        pool_id: &str,
        workload_type_id: Option<String>,
        capacity: u64,
    ) -> CreateLunRequest {
        CreateLunRequest {
            name: params.name.clone(),
            pool_id: pool_id.to_string(),
            capacity,
            alloc_type: params.alloc_type,
            workload_type_id,
        }
    }

    // ---- create flow steps -------------------------------------------------

    fn get_replication_params<'a>(&'a self, ctx: &'a mut CreateContext) -> StepResult<'a> {
        async move {
            let remote = self
                .replica_remote_cli
                .clone()
                .context(errors::RemoteUnavailable {
                    purpose: "replication",
                })?;
            let remote_pool_id = base::remote_pool_id(&ctx.params, remote.as_ref()).await?;
            let system = remote.system().await.context(errors::Array)?;
            let device = base::remote_device(self.cli.as_ref(), &system.serial).await?;

            ctx.remote_pool_id = Some(remote_pool_id);
            ctx.remote_cli = Some(remote);
            ctx.remote_device_id = Some(device.id);
            ctx.res_type = ResType::Lun;
            Ok(())
        }
        .boxed()
    }

    fn get_hyper_metro_params<'a>(&'a self, ctx: &'a mut CreateContext) -> StepResult<'a> {
        async move {
            let domain_name = ctx
                .params
                .metro_domain
                .clone()
                .context(errors::FlowContext { key: "metrodomain" })?;
            let remote = self
                .metro_remote_cli
                .clone()
                .context(errors::RemoteUnavailable {
                    purpose: "hypermetro",
                })?;
            let remote_pool_id = base::remote_pool_id(&ctx.params, remote.as_ref()).await?;
            let domain = remote
                .hyper_metro_domain_by_name(&domain_name)
                .await
                .context(errors::Array)?
                .context(errors::MetroDomainMissing {
                    name: domain_name.clone(),
                })?;
            ensure!(
                domain.state == MetroDomainState::Normal,
                errors::MetroDomainNotNormal { name: domain_name }
            );

            ctx.remote_pool_id = Some(remote_pool_id);
            ctx.remote_cli = Some(remote);
            ctx.metro_domain_id = Some(domain.id);
            Ok(())
        }
        .boxed()
    }

    fn create_local_lun<'a>(&'a self, ctx: &'a mut CreateContext) -> StepResult<'a> {
        async move {
            let name = ctx.params.name.clone();
            let clone_source = ctx.params.clone_source.clone();
            let lun = match self.cli.lun_by_name(&name).await.context(errors::Array)? {
                None => match clone_source {
                    Some(CloneSource::Lun(source)) => {
                        self.clone_from_lun(&ctx.params, &source).await?
                    }
                    Some(CloneSource::Snapshot(source)) => {
                        self.clone_from_snapshot(&ctx.params, &source).await?
                    }
                    None => {
                        let request = Self::lun_request(
                            &ctx.params,
                            &ctx.params.pool_id,
                            ctx.params.workload_type_id.clone(),
                            ctx.params.capacity,
                        );
                        self.cli.create_lun(&request).await.context(errors::Array)?
                    }
                },
                Some(lun) => {
                    // The LUN already exists; a clone job may still be
                    // copying into it from an earlier attempt.
                    self.wait_clone_finish(&lun).await?;
                    lun
                }
            };
            ctx.local_lun_id = Some(lun.id);
            ctx.lun_wwn = Some(lun.wwn);
            Ok(())
        }
        .boxed()
    }

    fn revert_local_lun<'a>(&'a self, ctx: &'a mut CreateContext) -> StepResult<'a> {
        async move {
            let Some(lun_id) = ctx.local_lun_id.clone() else {
                return Ok(());
            };
            self.cli.delete_lun(&lun_id).await.context(errors::Array)
        }
        .boxed()
    }

    fn create_local_qos<'a>(&'a self, ctx: &'a mut CreateContext) -> StepResult<'a> {
        async move {
            let Some(qos) = ctx.params.qos.clone() else {
                return Ok(());
            };
            let lun_id = ctx
                .local_lun_id
                .clone()
                .context(errors::FlowContext { key: "localLunID" })?;
            let lun = self
                .cli
                .lun_by_id(&lun_id)
                .await
                .context(errors::Array)?
                .context(errors::NotFound {
                    object: "LUN",
                    name: lun_id.clone(),
                })?;
            let qos_id = match lun.ioclass_id.filter(|id| !id.is_empty()) {
                Some(existing) => existing,
                None => {
                    let policy = self
                        .cli
                        .create_qos_policy(&qos, &QosObject::Lun(lun_id))
                        .await
                        .context(errors::Array)?;
                    policy.id
                }
            };
            ctx.local_qos_id = Some(qos_id);
            Ok(())
        }
        .boxed()
    }

    fn revert_local_qos<'a>(&'a self, ctx: &'a mut CreateContext) -> StepResult<'a> {
        async move {
            let (Some(lun_id), Some(qos_id)) =
                (ctx.local_lun_id.clone(), ctx.local_qos_id.clone())
            else {
                return Ok(());
            };
            base::delete_qos_for(self.cli.as_ref(), &qos_id, QosObject::Lun(lun_id))
                .await
        }
        .boxed()
    }

    fn create_remote_lun<'a>(&'a self, ctx: &'a mut CreateContext) -> StepResult<'a> {
        async move {
            let remote = ctx.remote()?;
            let name = ctx.params.name.clone();
            let lun = match remote.lun_by_name(&name).await.context(errors::Array)? {
                Some(lun) => lun,
                None => {
                    let workload_type_id = match &ctx.params.application_type {
                        Some(workload) => {
                            Some(VolumeParams::workload_type_id(remote.as_ref(), workload).await?)
                        }
                        None => None,
                    };
                    let pool_id = ctx
                        .remote_pool_id
                        .clone()
                        .context(errors::FlowContext { key: "remotePoolID" })?;
                    let request =
                        Self::lun_request(&ctx.params, &pool_id, workload_type_id, ctx.params.capacity);
                    remote.create_lun(&request).await.context(errors::Array)?
                }
            };
            ctx.remote_lun_id = Some(lun.id);
            Ok(())
        }
        .boxed()
    }

    fn revert_remote_lun<'a>(&'a self, ctx: &'a mut CreateContext) -> StepResult<'a> {
        async move {
            let Some(lun_id) = ctx.remote_lun_id.clone() else {
                return Ok(());
            };
            let remote = ctx.remote()?;
            remote.delete_lun(&lun_id).await.context(errors::Array)
        }
        .boxed()
    }

    fn create_remote_qos<'a>(&'a self, ctx: &'a mut CreateContext) -> StepResult<'a> {
        async move {
            let Some(qos) = ctx.params.qos.clone() else {
                return Ok(());
            };
            let remote = ctx.remote()?;
            let lun_id = ctx
                .remote_lun_id
                .clone()
                .context(errors::FlowContext { key: "remoteLunID" })?;
            let lun = remote
                .lun_by_id(&lun_id)
                .await
                .context(errors::Array)?
                .context(errors::NotFound {
                    object: "remote LUN",
                    name: lun_id.clone(),
                })?;
            let qos_id = match lun.ioclass_id.filter(|id| !id.is_empty()) {
                Some(existing) => existing,
                None => {
                    let policy = remote
                        .create_qos_policy(&qos, &QosObject::Lun(lun_id))
                        .await
                        .context(errors::Array)?;
                    policy.id
                }
            };
            ctx.remote_qos_id = Some(qos_id);
            Ok(())
        }
        .boxed()
    }

    fn revert_remote_qos<'a>(&'a self, ctx: &'a mut CreateContext) -> StepResult<'a> {
        async move {
            let (Some(lun_id), Some(qos_id)) =
                (ctx.remote_lun_id.clone(), ctx.remote_qos_id.clone())
            else {
                return Ok(());
            };
            let remote = ctx.remote()?;
            base::delete_qos_for(remote.as_ref(), &qos_id, QosObject::Lun(lun_id))
                .await
        }
        .boxed()
    }

    fn create_replication_pair<'a>(&'a self, ctx: &'a mut CreateContext) -> StepResult<'a> {
        async move {
            let request = CreateReplicationPairRequest {
                local_res_id: ctx
                    .local_lun_id
                    .clone()
                    .context(errors::FlowContext { key: "localLunID" })?,
                local_res_type: ctx.res_type,
                remote_device_id: ctx
                    .remote_device_id
                    .clone()
                    .context(errors::FlowContext { key: "remoteDeviceID" })?,
                remote_res_id: ctx
                    .remote_lun_id
                    .clone()
                    .context(errors::FlowContext { key: "remoteLunID" })?,
                replication_model: REPLICATION_MODEL_ASYNC,
                synchronize_type: SYNCHRONIZE_TYPE_TIMED_WAIT,
                speed: SPEED_HIGHEST,
                timing_seconds: ctx.params.replication_sync_period,
            };
            base::create_and_sync_replication_pair(self.cli.as_ref(), &request).await
        }
        .boxed()
    }

    fn create_hyper_metro<'a>(&'a self, ctx: &'a mut CreateContext) -> StepResult<'a> {
        async move {
            let local_lun_id = ctx
                .local_lun_id
                .clone()
                .context(errors::FlowContext { key: "localLunID" })?;
            let pair_id = match self
                .cli
                .hyper_metro_pair_by_local_obj(&local_lun_id)
                .await
                .context(errors::Array)?
            {
                Some(pair) => pair.id,
                None => {
                    let first_sync = ctx.params.clone_source.is_some();
                    let request = CreateMetroPairRequest {
                        domain_id: ctx
                            .metro_domain_id
                            .clone()
                            .context(errors::FlowContext { key: "metroDomainID" })?,
                        local_obj_id: local_lun_id,
                        remote_obj_id: ctx
                            .remote_lun_id
                            .clone()
                            .context(errors::FlowContext { key: "remoteLunID" })?,
                        resource_type: MetroResourceType::Lun,
                        first_sync,
                        speed: SPEED_HIGHEST,
                    };
                    let pair = self
                        .cli
                        .create_hyper_metro_pair(&request)
                        .await
                        .context(errors::Array)?;
                    if first_sync {
                        if let Err(error) = self
                            .cli
                            .sync_hyper_metro_pair(&pair.id)
                            .await
                            .context(errors::Array)
                        {
                            if let Err(cleanup) =
                                self.cli.delete_hyper_metro_pair(&pair.id, true).await
                            {
                                warn!(pair = pair.id.as_str(), %cleanup, "failed to delete hypermetro pair after sync failure");
                            }
                            return Err(error);
                        }
                    }
                    pair.id
                }
            };

            if let Err(error) = base::wait_metro_sync_finish(self.cli.as_ref(), &pair_id).await {
                if let Err(cleanup) = self.cli.delete_hyper_metro_pair(&pair_id, true).await {
                    warn!(pair = pair_id.as_str(), %cleanup, "failed to delete hypermetro pair after wait failure");
                }
                return Err(error);
            }
            ctx.hyper_metro_pair_id = Some(pair_id);
            Ok(())
        }
        .boxed()
    }

    fn revert_hyper_metro<'a>(&'a self, ctx: &'a mut CreateContext) -> StepResult<'a> {
        async move {
            let Some(pair_id) = ctx.hyper_metro_pair_id.clone() else {
                return Ok(());
            };
            if let Err(error) = self.cli.stop_hyper_metro_pair(&pair_id).await {
                warn!(pair = pair_id.as_str(), %error, "failed to stop hypermetro pair before delete");
            }
            self.cli
                .delete_hyper_metro_pair(&pair_id, true)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    // ---- cloning -----------------------------------------------------------

    async fn clone_from_lun(&self, params: &VolumeParams, source: &str) -> Result<Lun, Error> {
        match self.clone_backend {
            CloneBackend::ClonePair => self.clone_lun_by_pair(params, source).await,
            CloneBackend::LunCopy => self.clone_lun_by_copy(params, source).await,
        }
    }

    async fn clone_from_snapshot(
        &self,
        params: &VolumeParams,
        source: &str,
    ) -> Result<Lun, Error> {
        match self.clone_backend {
            CloneBackend::ClonePair => self.clone_snapshot_by_pair(params, source).await,
            CloneBackend::LunCopy => self.clone_snapshot_by_copy(params, source).await,
        }
    }

    async fn clone_lun_by_pair(
        &self,
        params: &VolumeParams,
        source: &str,
    ) -> Result<Lun, Error> {
        let src = self
            .cli
            .lun_by_name(source)
            .await
            .context(errors::Array)?
            .context(errors::NotFound {
                object: "clone source LUN",
                name: source.to_string(),
            })?;
        ensure!(
            params.capacity >= src.capacity,
            errors::CloneTooSmall {
                name: params.name.clone(),
            }
        );

        // The destination is created at source size; a larger request is
        // served by extending after the copy reaches its terminal state.
        let request = Self::lun_request(
            params,
            &params.pool_id,
            params.workload_type_id.clone(),
            src.capacity,
        );
        let dst = self.cli.create_lun(&request).await.context(errors::Array)?;
        if let Err(error) = self
            .run_clone_pair(&src.id, src.capacity, &dst.id, params)
            .await
        {
            if let Err(cleanup) = self.cli.delete_lun(&dst.id).await {
                warn!(lun = dst.id.as_str(), %cleanup, "failed to delete clone destination after clone failure");
            }
            return Err(error);
        }
        Ok(dst)
    }

    async fn clone_snapshot_by_pair(
        &self,
        params: &VolumeParams,
        source: &str,
    ) -> Result<Lun, Error> {
        let snapshot = self
            .cli
            .lun_snapshot_by_name(source)
            .await
            .context(errors::Array)?
            .context(errors::NotFound {
                object: "clone source snapshot",
                name: source.to_string(),
            })?;
        let src_bytes = snapshot.user_capacity * 512;
        ensure!(
            params.capacity >= src_bytes,
            errors::CloneTooSmall {
                name: params.name.clone(),
            }
        );

        let request = Self::lun_request(
            params,
            &params.pool_id,
            params.workload_type_id.clone(),
            src_bytes,
        );
        let dst = self.cli.create_lun(&request).await.context(errors::Array)?;
        if let Err(error) = self
            .run_clone_pair(&snapshot.id, src_bytes, &dst.id, params)
            .await
        {
            if let Err(cleanup) = self.cli.delete_lun(&dst.id).await {
                warn!(lun = dst.id.as_str(), %cleanup, "failed to delete clone destination after clone failure");
            }
            return Err(error);
        }
        Ok(dst)
    }

    /// Drive a clone pair to completion: create, sync, wait to normal, then
    /// extend the destination when the request exceeds the source, and
    /// delete the pair.
    async fn run_clone_pair(
        &self,
        source_id: &str,
        source_capacity: u64,
        dest_id: &str,
        params: &VolumeParams,
    ) -> Result<(), Error> {
        let pair = self
            .cli
            .create_clone_pair(source_id, dest_id, params.clone_speed)
            .await
            .context(errors::Array)?;
        if let Err(error) = self.cli.sync_clone_pair(&pair.id).await.context(errors::Array) {
            if let Err(cleanup) = self.cli.delete_clone_pair(&pair.id).await {
                warn!(pair = pair.id.as_str(), %cleanup, "failed to delete clone pair after sync failure");
            }
            return Err(error);
        }
        self.wait_clone_pair_finish(&pair.id).await?;
        if params.capacity > source_capacity {
            self.cli
                .extend_lun(dest_id, params.capacity)
                .await
                .context(errors::Array)?;
        }
        self.cli
            .delete_clone_pair(&pair.id)
            .await
            .context(errors::Array)?;
        Ok(())
    }

    async fn clone_lun_by_copy(
        &self,
        params: &VolumeParams,
        source: &str,
    ) -> Result<Lun, Error> {
        let src = self
            .cli
            .lun_by_name(source)
            .await
            .context(errors::Array)?
            .context(errors::NotFound {
                object: "clone source LUN",
                name: source.to_string(),
            })?;
        ensure!(
            params.capacity >= src.capacity,
            errors::CloneTooSmall {
                name: params.name.clone(),
            }
        );

        let request = Self::lun_request(
            params,
            &params.pool_id,
            params.workload_type_id.clone(),
            params.capacity,
        );
        let dst = self.cli.create_lun(&request).await.context(errors::Array)?;

        let snapshot_name = format!("k8s_lun_{}_to_{}_snap", src.id, dst.id);
        let snapshot = match self
            .cli
            .lun_snapshot_by_name(&snapshot_name)
            .await
            .context(errors::Array)?
        {
            Some(snapshot) => snapshot,
            None => match self.synthesize_snapshot(&snapshot_name, &src.id).await {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    if let Err(cleanup) = self.cli.delete_lun(&dst.id).await {
                        warn!(lun = dst.id.as_str(), %cleanup, "failed to delete copy destination after snapshot failure");
                    }
                    return Err(error);
                }
            },
        };

        let copy_name = match self
            .start_lun_copy_job(&snapshot.id, &dst.id, params.clone_speed)
            .await
        {
            Ok(name) => name,
            Err(error) => {
                self.drop_snapshot(&snapshot.id).await;
                if let Err(cleanup) = self.cli.delete_lun(&dst.id).await {
                    warn!(lun = dst.id.as_str(), %cleanup, "failed to delete copy destination after copy failure");
                }
                return Err(error);
            }
        };
        self.wait_lun_copy_finish(&copy_name).await?;
        self.delete_lun_copy_job(&copy_name, true).await?;
        Ok(dst)
    }

    async fn clone_snapshot_by_copy(
        &self,
        params: &VolumeParams,
        source: &str,
    ) -> Result<Lun, Error> {
        let snapshot = self
            .cli
            .lun_snapshot_by_name(source)
            .await
            .context(errors::Array)?
            .context(errors::NotFound {
                object: "clone source snapshot",
                name: source.to_string(),
            })?;
        let src_bytes = snapshot.user_capacity * 512;
        ensure!(
            params.capacity >= src_bytes,
            errors::CloneTooSmall {
                name: params.name.clone(),
            }
        );

        let request = Self::lun_request(
            params,
            &params.pool_id,
            params.workload_type_id.clone(),
            params.capacity,
        );
        let dst = self.cli.create_lun(&request).await.context(errors::Array)?;

        let copy_name = match self
            .start_lun_copy_job(&snapshot.id, &dst.id, params.clone_speed)
            .await
        {
            Ok(name) => name,
            Err(error) => {
                if let Err(cleanup) = self.cli.delete_lun(&dst.id).await {
                    warn!(lun = dst.id.as_str(), %cleanup, "failed to delete copy destination after copy failure");
                }
                return Err(error);
            }
        };
        self.wait_lun_copy_finish(&copy_name).await?;
        // The snapshot is caller-owned here, only the job is cleaned up.
        self.delete_lun_copy_job(&copy_name, false).await?;
        Ok(dst)
    }

    /// Create and activate the intermediate snapshot a LUN copy is driven
    /// from.
    async fn synthesize_snapshot(
        &self,
        name: &str,
        lun_id: &str,
    ) -> Result<LunSnapshot, Error> {
        let snapshot = self
            .cli
            .create_lun_snapshot(name, lun_id)
            .await
            .context(errors::Array)?;
        if let Err(error) = self
            .cli
            .activate_lun_snapshot(&snapshot.id)
            .await
            .context(errors::Array)
        {
            if let Err(cleanup) = self.cli.delete_lun_snapshot(&snapshot.id).await {
                warn!(snapshot = snapshot.id.as_str(), %cleanup, "failed to delete snapshot after activate failure");
            }
            return Err(error);
        }
        Ok(snapshot)
    }

    /// Get-or-create the LUN copy job and start it. The job name encodes
    /// source and destination so a retry finds the same job.
    async fn start_lun_copy_job(
        &self,
        snapshot_id: &str,
        dest_lun_id: &str,
        speed: u8,
    ) -> Result<String, Error> {
        let name = format!("k8s_luncopy_{snapshot_id}_to_{dest_lun_id}");
        let copy = match self
            .cli
            .lun_copy_by_name(&name)
            .await
            .context(errors::Array)?
        {
            Some(copy) => copy,
            None => self
                .cli
                .create_lun_copy(&name, snapshot_id, dest_lun_id, speed)
                .await
                .context(errors::Array)?,
        };
        if let Err(error) = self.cli.start_lun_copy(&copy.id).await.context(errors::Array) {
            if let Err(cleanup) = self.cli.delete_lun_copy(&copy.id).await {
                warn!(copy = copy.id.as_str(), %cleanup, "failed to delete lun copy after start failure");
            }
            return Err(error);
        }
        Ok(name)
    }

    /// Stop and delete a LUN copy job; optionally also its source snapshot
    /// when the snapshot was synthesized for the copy.
    async fn delete_lun_copy_job(
        &self,
        name: &str,
        delete_snapshot: bool,
    ) -> Result<(), Error> {
        let Some(copy) = self
            .cli
            .lun_copy_by_name(name)
            .await
            .context(errors::Array)?
        else {
            return Ok(());
        };
        if matches!(
            copy.state,
            LunCopyState::Created | LunCopyState::Queuing | LunCopyState::Copying
        ) {
            if let Err(error) = self.cli.stop_lun_copy(&copy.id).await {
                warn!(copy = copy.id.as_str(), %error, "failed to stop lun copy before delete");
            }
        }
        self.cli
            .delete_lun_copy(&copy.id)
            .await
            .context(errors::Array)?;

        if delete_snapshot {
            if let Some(snapshot) = self
                .cli
                .lun_snapshot_by_name(&copy.source_snapshot_name)
                .await
                .context(errors::Array)?
            {
                self.drop_snapshot(&snapshot.id).await;
            }
        }
        Ok(())
    }

    /// Best-effort deactivate-then-delete of a snapshot.
    async fn drop_snapshot(&self, snapshot_id: &str) {
        if let Err(error) = self.cli.deactivate_lun_snapshot(snapshot_id).await {
            warn!(snapshot = snapshot_id, %error, "failed to deactivate snapshot");
        }
        if let Err(error) = self.cli.delete_lun_snapshot(snapshot_id).await {
            warn!(snapshot = snapshot_id, %error, "failed to delete snapshot");
        }
    }

    /// An existing destination LUN may still be the target of an in-flight
    /// copy from an earlier attempt; wait it out.
    async fn wait_clone_finish(&self, lun: &Lun) -> Result<(), Error> {
        match self.clone_backend {
            CloneBackend::ClonePair => {
                // The pair id equals the destination LUN id on this family;
                // the fetched pair's own id is used for the delete in case
                // that identity ever breaks.
                if let Some(pair) = self
                    .cli
                    .clone_pair_by_id(&lun.id)
                    .await
                    .context(errors::Array)?
                {
                    self.wait_clone_pair_finish(&pair.id).await?;
                    if let Err(error) = self.cli.delete_clone_pair(&pair.id).await {
                        warn!(pair = pair.id.as_str(), %error, "failed to delete finished clone pair");
                    }
                }
            }
            CloneBackend::LunCopy => {
                if let Some(name) = self.lun_copy_of(&lun.id).await? {
                    self.wait_lun_copy_finish(&name).await?;
                }
            }
        }
        Ok(())
    }

    /// Name of the first LUN copy job targeting `lun_id`, if any.
    async fn lun_copy_of(&self, lun_id: &str) -> Result<Option<String>, Error> {
        let Some(lun) = self.cli.lun_by_id(lun_id).await.context(errors::Array)? else {
            return Ok(None);
        };
        let Some(copy_id) = lun.lun_copy_ids.first() else {
            return Ok(None);
        };
        Ok(self
            .cli
            .lun_copy_by_id(copy_id)
            .await
            .context(errors::Array)?
            .map(|copy| copy.name))
    }

    // ---- array-job waits ---------------------------------------------------

    async fn wait_clone_pair_finish(&self, pair_id: &str) -> Result<(), Error> {
        let cli = &self.cli;
        wait_until(
            &format!("clone pair '{pair_id}'"),
            JOB_WAIT_BUDGET,
            JOB_POLL_INTERVAL,
            || async move {
                let Some(pair) = cli.clone_pair_by_id(pair_id).await.context(errors::Array)?
                else {
                    // Already cleaned up on the array.
                    return Ok(true);
                };
                ensure!(
                    pair.health != Health::Fault,
                    errors::JobFault {
                        kind: "clone pair",
                        id: pair_id,
                    }
                );
                match pair.state {
                    ClonePairState::Normal => Ok(true),
                    ClonePairState::Initializing
                    | ClonePairState::Syncing
                    | ClonePairState::Unsyncing => Ok(false),
                    state => errors::JobAbnormal {
                        kind: "clone pair",
                        id: pair_id,
                        status: format!("{state:?}"),
                    }
                    .fail(),
                }
            },
        )
        .await
    }

    async fn wait_lun_copy_finish(&self, name: &str) -> Result<(), Error> {
        let cli = &self.cli;
        wait_until(
            &format!("lun copy '{name}'"),
            JOB_WAIT_BUDGET,
            JOB_POLL_INTERVAL,
            || async move {
                let Some(copy) = cli.lun_copy_by_name(name).await.context(errors::Array)?
                else {
                    return Ok(true);
                };
                ensure!(
                    copy.health != Health::Fault,
                    errors::JobFault {
                        kind: "lun copy",
                        id: name,
                    }
                );
                match copy.state {
                    LunCopyState::Complete => Ok(true),
                    LunCopyState::Created | LunCopyState::Queuing | LunCopyState::Copying => {
                        Ok(false)
                    }
                    state => errors::JobAbnormal {
                        kind: "lun copy",
                        id: name,
                        status: format!("{state:?}"),
                    }
                    .fail(),
                }
            },
        )
        .await
    }

    async fn wait_snapshot_ready(&self, name: &str) -> Result<(), Error> {
        let cli = &self.cli;
        wait_until(
            &format!("snapshot '{name}'"),
            SNAPSHOT_READY_BUDGET,
            JOB_POLL_INTERVAL,
            || async move {
                let snapshot = cli
                    .lun_snapshot_by_name(name)
                    .await
                    .context(errors::Array)?
                    .context(errors::NotFound {
                        object: "snapshot",
                        name: name.to_string(),
                    })?;
                Ok(matches!(
                    snapshot.state,
                    SnapshotState::Active | SnapshotState::Inactive
                ))
            },
        )
        .await
    }

    // ---- delete flow steps -------------------------------------------------

    fn delete_hyper_metro<'a>(&'a self, ctx: &'a mut DeleteContext) -> StepResult<'a> {
        async move {
            let Some(pair) = self
                .cli
                .hyper_metro_pair_by_local_obj(&ctx.lun_id)
                .await
                .context(errors::Array)?
            else {
                return Ok(());
            };
            if matches!(
                pair.state,
                MetroPairState::Normal | MetroPairState::ToSync | MetroPairState::Syncing
            ) {
                if let Err(error) = self.cli.stop_hyper_metro_pair(&pair.id).await {
                    warn!(pair = pair.id.as_str(), %error, "failed to stop hypermetro pair before delete");
                }
            }
            self.cli
                .delete_hyper_metro_pair(&pair.id, true)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn delete_hyper_metro_remote_lun<'a>(&'a self, ctx: &'a mut DeleteContext) -> StepResult<'a> {
        async move {
            let Some(remote) = self.metro_remote_cli.clone() else {
                warn!("HyperMetro remote client is not configured, the remote LUN will be left over");
                return Ok(());
            };
            self.delete_lun_on(remote.as_ref(), &ctx.lun_name).await
        }
        .boxed()
    }

    fn delete_replication_pair<'a>(&'a self, ctx: &'a mut DeleteContext) -> StepResult<'a> {
        async move {
            let pairs = self
                .cli
                .replication_pairs_by_res(&ctx.lun_id, ResType::Lun)
                .await
                .context(errors::Array)?;
            for pair in pairs {
                if matches!(
                    pair.state,
                    ReplicationPairState::Normal | ReplicationPairState::Sync
                ) {
                    if let Err(error) = self.cli.split_replication_pair(&pair.id).await {
                        warn!(pair = pair.id.as_str(), %error, "failed to split replication pair before delete");
                    }
                }
                self.cli
                    .delete_replication_pair(&pair.id)
                    .await
                    .context(errors::Array)?;
            }
            Ok(())
        }
        .boxed()
    }

    fn delete_replication_remote_lun<'a>(&'a self, ctx: &'a mut DeleteContext) -> StepResult<'a> {
        async move {
            let Some(remote) = self.replica_remote_cli.clone() else {
                warn!("Replication remote client is not configured, the remote LUN will be left over");
                return Ok(());
            };
            self.delete_lun_on(remote.as_ref(), &ctx.lun_name).await
        }
        .boxed()
    }

    fn delete_local_lun_copy<'a>(&'a self, ctx: &'a mut DeleteContext) -> StepResult<'a> {
        async move {
            if let Some(name) = self.lun_copy_of(&ctx.lun_id).await? {
                self.delete_lun_copy_job(&name, true).await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn delete_local_hyper_copy<'a>(&'a self, ctx: &'a mut DeleteContext) -> StepResult<'a> {
        async move {
            // The clone pair of a LUN shares the LUN's id.
            let Some(pair) = self
                .cli
                .clone_pair_by_id(&ctx.lun_id)
                .await
                .context(errors::Array)?
            else {
                return Ok(());
            };
            self.cli
                .delete_clone_pair(&pair.id)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn delete_local_lun<'a>(&'a self, ctx: &'a mut DeleteContext) -> StepResult<'a> {
        async move { self.delete_lun_on(self.cli.as_ref(), &ctx.lun_name).await }.boxed()
    }

    /// Delete a LUN by name on `cli`, detaching and garbage-collecting its
    /// QoS policy first. Absent is success.
    async fn delete_lun_on(&self, cli: &dyn ArrayClient, name: &str) -> Result<(), Error> {
        let Some(lun) = cli.lun_by_name(name).await.context(errors::Array)? else {
            info!(lun = name, "LUN to delete does not exist");
            return Ok(());
        };
        if let Some(qos_id) = lun.ioclass_id.as_ref().filter(|id| !id.is_empty()) {
            base::delete_qos_for(cli, qos_id, QosObject::Lun(lun.id.clone()))
                .await?;
        }
        cli.delete_lun(&lun.id).await.context(errors::Array)
    }

    // ---- expand flow steps -------------------------------------------------

    fn pre_expand_check_capacity<'a>(&'a self, ctx: &'a mut ExpandContext) -> StepResult<'a> {
        async move {
            self.cli
                .pool_by_name(&ctx.local_parent_name)
                .await
                .context(errors::Array)?
                .context(errors::NotFound {
                    object: "storage pool",
                    name: ctx.local_parent_name.clone(),
                })?;
            Ok(())
        }
        .boxed()
    }

    /// The remote LUN must exist and must not already be larger than the
    /// requested size.
    async fn check_remote_capacity(
        &self,
        cli: &dyn ArrayClient,
        name: &str,
        new_size: u64,
    ) -> Result<String, Error> {
        let lun = cli
            .lun_by_name(name)
            .await
            .context(errors::Array)?
            .context(errors::NotFound {
                object: "remote LUN",
                name: name.to_string(),
            })?;
        ensure!(
            new_size >= lun.capacity,
            errors::NotGrowing {
                name: name.to_string(),
                requested: new_size,
                current: lun.capacity,
            }
        );
        Ok(lun.id)
    }

    fn pre_expand_metro_check_remote_capacity<'a>(
        &'a self,
        ctx: &'a mut ExpandContext,
    ) -> StepResult<'a> {
        async move {
            let remote = self
                .metro_remote_cli
                .as_ref()
                .context(errors::RemoteUnavailable {
                    purpose: "hypermetro",
                })?;
            let remote_lun_id = self
                .check_remote_capacity(remote.as_ref(), &ctx.lun_name, ctx.new_size)
                .await?;
            ctx.remote_lun_id = Some(remote_lun_id);
            Ok(())
        }
        .boxed()
    }

    fn pre_expand_replication_check_remote_capacity<'a>(
        &'a self,
        ctx: &'a mut ExpandContext,
    ) -> StepResult<'a> {
        async move {
            let remote = self
                .replica_remote_cli
                .as_ref()
                .context(errors::RemoteUnavailable {
                    purpose: "replication",
                })?;
            let remote_lun_id = self
                .check_remote_capacity(remote.as_ref(), &ctx.lun_name, ctx.new_size)
                .await?;
            ctx.remote_lun_id = Some(remote_lun_id);
            Ok(())
        }
        .boxed()
    }

    fn suspend_hyper_metro<'a>(&'a self, ctx: &'a mut ExpandContext) -> StepResult<'a> {
        async move {
            let Some(pair) = self
                .cli
                .hyper_metro_pair_by_local_obj(&ctx.lun_id)
                .await
                .context(errors::Array)?
            else {
                return Ok(());
            };
            if matches!(
                pair.state,
                MetroPairState::Normal | MetroPairState::ToSync | MetroPairState::Syncing
            ) {
                self.cli
                    .stop_hyper_metro_pair(&pair.id)
                    .await
                    .context(errors::Array)?;
            }
            ctx.hyper_metro_pair_id = Some(pair.id);
            Ok(())
        }
        .boxed()
    }

    fn expand_metro_remote_lun<'a>(&'a self, ctx: &'a mut ExpandContext) -> StepResult<'a> {
        async move {
            let remote = self
                .metro_remote_cli
                .as_ref()
                .context(errors::RemoteUnavailable {
                    purpose: "hypermetro",
                })?;
            let remote_lun_id = ctx
                .remote_lun_id
                .clone()
                .context(errors::FlowContext { key: "remoteLunID" })?;
            remote
                .extend_lun(&remote_lun_id, ctx.new_size)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn split_replication<'a>(&'a self, ctx: &'a mut ExpandContext) -> StepResult<'a> {
        async move {
            let pairs = self
                .cli
                .replication_pairs_by_res(&ctx.lun_id, ResType::Lun)
                .await
                .context(errors::Array)?;
            for pair in pairs {
                if !matches!(
                    pair.state,
                    ReplicationPairState::Normal | ReplicationPairState::Sync
                ) {
                    continue;
                }
                self.cli
                    .split_replication_pair(&pair.id)
                    .await
                    .context(errors::Array)?;
                ctx.replication_pair_ids.push(pair.id);
            }
            Ok(())
        }
        .boxed()
    }

    fn expand_replication_remote_lun<'a>(&'a self, ctx: &'a mut ExpandContext) -> StepResult<'a> {
        async move {
            let remote = self
                .replica_remote_cli
                .as_ref()
                .context(errors::RemoteUnavailable {
                    purpose: "replication",
                })?;
            let remote_lun_id = ctx
                .remote_lun_id
                .clone()
                .context(errors::FlowContext { key: "remoteLunID" })?;
            remote
                .extend_lun(&remote_lun_id, ctx.new_size)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn expand_local_lun<'a>(&'a self, ctx: &'a mut ExpandContext) -> StepResult<'a> {
        async move {
            self.cli
                .extend_lun(&ctx.lun_id, ctx.new_size)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn sync_hyper_metro<'a>(&'a self, ctx: &'a mut ExpandContext) -> StepResult<'a> {
        async move {
            let Some(pair_id) = ctx.hyper_metro_pair_id.clone() else {
                return Ok(());
            };
            self.cli
                .sync_hyper_metro_pair(&pair_id)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn sync_replication<'a>(&'a self, ctx: &'a mut ExpandContext) -> StepResult<'a> {
        async move {
            for pair_id in &ctx.replication_pair_ids {
                self.cli
                    .sync_replication_pair(pair_id)
                    .await
                    .context(errors::Array)?;
            }
            Ok(())
        }
        .boxed()
    }

    // ---- snapshot flow steps -----------------------------------------------

    fn create_snapshot_step<'a>(&'a self, ctx: &'a mut SnapshotContext) -> StepResult<'a> {
        async move {
            let snapshot = self
                .cli
                .create_lun_snapshot(&ctx.snapshot_name, &ctx.lun_id)
                .await
                .context(errors::Array)?;
            ctx.snapshot_id = Some(snapshot.id);
            self.wait_snapshot_ready(&ctx.snapshot_name).await
        }
        .boxed()
    }

    fn revert_snapshot<'a>(&'a self, ctx: &'a mut SnapshotContext) -> StepResult<'a> {
        async move {
            let Some(snapshot_id) = ctx.snapshot_id.clone() else {
                return Ok(());
            };
            self.cli
                .delete_lun_snapshot(&snapshot_id)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn activate_snapshot_step<'a>(&'a self, ctx: &'a mut SnapshotContext) -> StepResult<'a> {
        async move {
            let snapshot_id = ctx
                .snapshot_id
                .clone()
                .context(errors::FlowContext { key: "snapshotID" })?;
            self.cli
                .activate_lun_snapshot(&snapshot_id)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn deactivate_snapshot_step<'a>(&'a self, ctx: &'a mut SnapshotContext) -> StepResult<'a> {
        async move {
            let snapshot_id = ctx
                .snapshot_id
                .clone()
                .context(errors::FlowContext { key: "snapshotID" })?;
            self.cli
                .deactivate_lun_snapshot(&snapshot_id)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn delete_snapshot_step<'a>(&'a self, ctx: &'a mut SnapshotContext) -> StepResult<'a> {
        async move {
            let snapshot_id = ctx
                .snapshot_id
                .clone()
                .context(errors::FlowContext { key: "snapshotID" })?;
            self.cli
                .delete_lun_snapshot(&snapshot_id)
                .await
                .context(errors::Array)
        }
        .boxed()
    }
}
