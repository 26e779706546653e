//! Filesystem (NAS share) lifecycle orchestration. The flows mirror the LUN
//! side but target filesystem objects: replication pairs carry the
//! filesystem resource type, HyperMetro binds filesystem-level pairs under
//! the same domain semantics, and expand also grows the share's quota.

use crate::{
    base,
    context::{Mirror, VolumeParams},
    errors::{self, Error},
    taskflow::{StepResult, TaskFlow},
    utils, ProductFamily, Volume,
};
use array_client::{
    ArrayClient, CreateFilesystemRequest, CreateMetroPairRequest, CreateReplicationPairRequest,
    MetroDomainState, MetroPairState, MetroResourceType, QosObject, ReplicationPairState,
    ResType, REPLICATION_MODEL_ASYNC, SPEED_HIGHEST, SYNCHRONIZE_TYPE_TIMED_WAIT,
};
use futures::FutureExt;
use snafu::{ensure, OptionExt, ResultExt};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, warn};

/// The filesystem lifecycle orchestrator for one array, with optional
/// remote clients for HyperMetro and replication mirroring.
pub struct Nas {
    cli: Arc<dyn ArrayClient>,
    metro_remote_cli: Option<Arc<dyn ArrayClient>>,
    replica_remote_cli: Option<Arc<dyn ArrayClient>>,
    family: ProductFamily,
}

/// Accumulator of a filesystem create flow.
pub(crate) struct FsCreateContext {
    params: VolumeParams,
    local_fs_id: Option<String>,
    local_qos_id: Option<String>,
    remote_fs_id: Option<String>,
    remote_qos_id: Option<String>,
    hyper_metro_pair_id: Option<String>,
    remote_cli: Option<Arc<dyn ArrayClient>>,
    remote_pool_id: Option<String>,
    remote_device_id: Option<String>,
    metro_domain_id: Option<String>,
    res_type: ResType,
}

impl FsCreateContext {
    fn new(params: VolumeParams) -> Self {
        Self {
            params,
            local_fs_id: None,
            local_qos_id: None,
            remote_fs_id: None,
            remote_qos_id: None,
            hyper_metro_pair_id: None,
            remote_cli: None,
            remote_pool_id: None,
            remote_device_id: None,
            metro_domain_id: None,
            res_type: ResType::Filesystem,
        }
    }

    fn remote(&self) -> Result<Arc<dyn ArrayClient>, Error> {
        self.remote_cli
            .clone()
            .context(errors::FlowContext { key: "remoteCli" })
    }
}

/// Accumulator of a filesystem delete flow.
pub(crate) struct FsDeleteContext {
    fs_id: String,
    fs_name: String,
}

/// Accumulator of a filesystem expand flow.
pub(crate) struct FsExpandContext {
    fs_name: String,
    fs_id: String,
    new_size: u64,
    local_parent_name: String,
    /// Whether the share carries a hard quota that must grow with it.
    has_quota: bool,
    remote_fs_id: Option<String>,
    hyper_metro_pair_id: Option<String>,
    replication_pair_ids: Vec<String>,
}

impl Nas {
    pub fn new(
        cli: Arc<dyn ArrayClient>,
        metro_remote_cli: Option<Arc<dyn ArrayClient>>,
        replica_remote_cli: Option<Arc<dyn ArrayClient>>,
        family: ProductFamily,
    ) -> Self {
        Self {
            cli,
            metro_remote_cli,
            replica_remote_cli,
            family,
        }
    }

    /// Create a filesystem share from the raw request parameters.
    pub async fn create(
        self: &Arc<Self>,
        args: &HashMap<String, String>,
    ) -> Result<Volume, Error> {
        let params = VolumeParams::normalize(self.cli.as_ref(), self.family, args).await?;
        if params.clone_source.is_some() {
            return Err(Error::InvalidParams {
                reason: "cloning a filesystem volume is not supported".to_string(),
            });
        }

        let mut flow = TaskFlow::new("Create-FS-Volume", self.clone());
        match params.mirror {
            Mirror::Replication => {
                flow.add_task("Get-Replication-Params", Nas::get_replication_params)
            }
            Mirror::HyperMetro => {
                flow.add_task("Get-HyperMetro-Params", Nas::get_hyper_metro_params)
            }
            Mirror::None => {}
        }
        flow.add_task_with_revert("Create-Local-FS", Nas::create_local_fs, Nas::revert_local_fs);
        flow.add_task_with_revert("Create-Local-QoS", Nas::create_local_qos, Nas::revert_local_qos);
        match params.mirror {
            Mirror::Replication => {
                flow.add_task_with_revert(
                    "Create-Remote-FS",
                    Nas::create_remote_fs,
                    Nas::revert_remote_fs,
                );
                flow.add_task_with_revert(
                    "Create-Remote-QoS",
                    Nas::create_remote_qos,
                    Nas::revert_remote_qos,
                );
                flow.add_task("Create-Replication-Pair", Nas::create_replication_pair);
            }
            Mirror::HyperMetro => {
                flow.add_task_with_revert(
                    "Create-Remote-FS",
                    Nas::create_remote_fs,
                    Nas::revert_remote_fs,
                );
                flow.add_task_with_revert(
                    "Create-Remote-QoS",
                    Nas::create_remote_qos,
                    Nas::revert_remote_qos,
                );
                flow.add_task_with_revert(
                    "Create-HyperMetro",
                    Nas::create_hyper_metro,
                    Nas::revert_hyper_metro,
                );
            }
            Mirror::None => {}
        }

        let mut ctx = FsCreateContext::new(params);
        if let Err(error) = flow.run(&mut ctx).await {
            flow.revert(&mut ctx).await;
            return Err(error);
        }

        Ok(Volume {
            name: ctx.params.name.clone(),
            wwn: None,
        })
    }

    /// Delete a filesystem share and its mirror artifacts. Absent is
    /// success; every step starts with a lookup so retries are safe.
    pub async fn delete(self: &Arc<Self>, name: &str) -> Result<(), Error> {
        let fs_name = utils::object_name(name);
        let Some(fs) = self
            .cli
            .filesystem_by_name(&fs_name)
            .await
            .context(errors::Array)?
        else {
            info!(filesystem = fs_name.as_str(), "filesystem to delete does not exist");
            return Ok(());
        };

        let mut flow = TaskFlow::new("Delete-FS-Volume", self.clone());
        if fs.rss.hyper_metro {
            flow.add_task("Delete-HyperMetro", Nas::delete_hyper_metro);
            flow.add_task("Delete-HyperMetro-Remote-FS", Nas::delete_hyper_metro_remote_fs);
        }
        if fs.rss.remote_replication {
            flow.add_task("Delete-Replication-Pair", Nas::delete_replication_pair);
            flow.add_task("Delete-Replication-Remote-FS", Nas::delete_replication_remote_fs);
        }
        flow.add_task("Delete-Local-FS", Nas::delete_local_fs);

        let mut ctx = FsDeleteContext {
            fs_id: fs.id,
            fs_name,
        };
        flow.run(&mut ctx).await
    }

    /// Grow a filesystem share to `new_size` bytes, remote side first when
    /// mirrored, growing the hard quota along with the capacity.
    pub async fn expand(self: &Arc<Self>, name: &str, new_size: u64) -> Result<(), Error> {
        let fs_name = utils::object_name(name);
        let fs = self
            .cli
            .filesystem_by_name(&fs_name)
            .await
            .context(errors::Array)?
            .context(errors::NotFound {
                object: "filesystem",
                name: fs_name.clone(),
            })?;

        ensure!(
            new_size > fs.capacity,
            errors::NotGrowing {
                name: fs_name,
                requested: new_size,
                current: fs.capacity,
            }
        );

        let mut flow = TaskFlow::new("Expand-FS-Volume", self.clone());
        flow.add_task("Expand-PreCheck-Capacity", Nas::pre_expand_check_capacity);
        if fs.rss.hyper_metro {
            flow.add_task(
                "Expand-HyperMetro-Remote-PreCheck-Capacity",
                Nas::pre_expand_metro_check_remote_capacity,
            );
            flow.add_task("Suspend-HyperMetro", Nas::suspend_hyper_metro);
            flow.add_task("Expand-HyperMetro-Remote-FS", Nas::expand_metro_remote_fs);
        }
        if fs.rss.remote_replication {
            flow.add_task(
                "Expand-Replication-Remote-PreCheck-Capacity",
                Nas::pre_expand_replication_check_remote_capacity,
            );
            flow.add_task("Split-Replication", Nas::split_replication);
            flow.add_task("Expand-Replication-Remote-FS", Nas::expand_replication_remote_fs);
        }
        flow.add_task("Expand-Local-FS", Nas::expand_local_fs);
        flow.add_task("Expand-FS-Quota", Nas::expand_fs_quota);
        if fs.rss.hyper_metro {
            flow.add_task("Sync-HyperMetro", Nas::sync_hyper_metro);
        }
        if fs.rss.remote_replication {
            flow.add_task("Sync-Replication", Nas::sync_replication);
        }

        let mut ctx = FsExpandContext {
            fs_name: fs.name,
            fs_id: fs.id,
            new_size,
            local_parent_name: fs.pool_name,
            has_quota: fs.quota.is_some(),
            remote_fs_id: None,
            hyper_metro_pair_id: None,
            replication_pair_ids: Vec::new(),
        };
        flow.run(&mut ctx).await
    }

    fn fs_request(
        params: &VolumeParams,
        pool_id: &str,
        workload_type_id: Option<String>,
    ) -> CreateFilesystemRequest {
        CreateFilesystemRequest {
            name: params.name.clone(),
            pool_id: pool_id.to_string(),
            capacity: params.capacity,
            alloc_type: params.alloc_type,
            workload_type_id,
        }
    }

    // ---- create flow steps -------------------------------------------------

    fn get_replication_params<'a>(&'a self, ctx: &'a mut FsCreateContext) -> StepResult<'a> {
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
            ctx.res_type = ResType::Filesystem;
            Ok(())
        }
        .boxed()
    }

    fn get_hyper_metro_params<'a>(&'a self, ctx: &'a mut FsCreateContext) -> StepResult<'a> {
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

    fn create_local_fs<'a>(&'a self, ctx: &'a mut FsCreateContext) -> StepResult<'a> {
        async move {
            let name = ctx.params.name.clone();
            let fs = match self
                .cli
                .filesystem_by_name(&name)
                .await
                .context(errors::Array)?
            {
                Some(fs) => fs,
                None => {
                    let request = Self::fs_request(
                        &ctx.params,
                        &ctx.params.pool_id,
                        ctx.params.workload_type_id.clone(),
                    );
                    self.cli
                        .create_filesystem(&request)
                        .await
                        .context(errors::Array)?
                }
            };
            ctx.local_fs_id = Some(fs.id);
            Ok(())
        }
        .boxed()
    }

    fn revert_local_fs<'a>(&'a self, ctx: &'a mut FsCreateContext) -> StepResult<'a> {
        async move {
            let Some(fs_id) = ctx.local_fs_id.clone() else {
                return Ok(());
            };
            self.cli
                .delete_filesystem(&fs_id)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn create_local_qos<'a>(&'a self, ctx: &'a mut FsCreateContext) -> StepResult<'a> {
        async move {
            let Some(qos) = ctx.params.qos.clone() else {
                return Ok(());
            };
            let fs_id = ctx
                .local_fs_id
                .clone()
                .context(errors::FlowContext { key: "localFSID" })?;
            let fs = self
                .cli
                .filesystem_by_id(&fs_id)
                .await
                .context(errors::Array)?
                .context(errors::NotFound {
                    object: "filesystem",
                    name: fs_id.clone(),
                })?;
            let qos_id = match fs.ioclass_id.filter(|id| !id.is_empty()) {
                Some(existing) => existing,
                None => {
                    let policy = self
                        .cli
                        .create_qos_policy(&qos, &QosObject::Filesystem(fs_id))
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

    fn revert_local_qos<'a>(&'a self, ctx: &'a mut FsCreateContext) -> StepResult<'a> {
        async move {
            let (Some(fs_id), Some(qos_id)) = (ctx.local_fs_id.clone(), ctx.local_qos_id.clone())
            else {
                return Ok(());
            };
            base::delete_qos_for(self.cli.as_ref(), &qos_id, QosObject::Filesystem(fs_id)).await
        }
        .boxed()
    }

    fn create_remote_fs<'a>(&'a self, ctx: &'a mut FsCreateContext) -> StepResult<'a> {
        async move {
            let remote = ctx.remote()?;
            let name = ctx.params.name.clone();
            let fs = match remote.filesystem_by_name(&name).await.context(errors::Array)? {
                Some(fs) => fs,
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
                    let request = Self::fs_request(&ctx.params, &pool_id, workload_type_id);
                    remote
                        .create_filesystem(&request)
                        .await
                        .context(errors::Array)?
                }
            };
            ctx.remote_fs_id = Some(fs.id);
            Ok(())
        }
        .boxed()
    }

    fn revert_remote_fs<'a>(&'a self, ctx: &'a mut FsCreateContext) -> StepResult<'a> {
        async move {
            let Some(fs_id) = ctx.remote_fs_id.clone() else {
                return Ok(());
            };
            let remote = ctx.remote()?;
            remote
                .delete_filesystem(&fs_id)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn create_remote_qos<'a>(&'a self, ctx: &'a mut FsCreateContext) -> StepResult<'a> {
        async move {
            let Some(qos) = ctx.params.qos.clone() else {
                return Ok(());
            };
            let remote = ctx.remote()?;
            let fs_id = ctx
                .remote_fs_id
                .clone()
                .context(errors::FlowContext { key: "remoteFSID" })?;
            let fs = remote
                .filesystem_by_id(&fs_id)
                .await
                .context(errors::Array)?
                .context(errors::NotFound {
                    object: "remote filesystem",
                    name: fs_id.clone(),
                })?;
            let qos_id = match fs.ioclass_id.filter(|id| !id.is_empty()) {
                Some(existing) => existing,
                None => {
                    let policy = remote
                        .create_qos_policy(&qos, &QosObject::Filesystem(fs_id))
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

    fn revert_remote_qos<'a>(&'a self, ctx: &'a mut FsCreateContext) -> StepResult<'a> {
        async move {
            let (Some(fs_id), Some(qos_id)) = (ctx.remote_fs_id.clone(), ctx.remote_qos_id.clone())
            else {
                return Ok(());
            };
            let remote = ctx.remote()?;
            base::delete_qos_for(remote.as_ref(), &qos_id, QosObject::Filesystem(fs_id)).await
        }
        .boxed()
    }

    fn create_replication_pair<'a>(&'a self, ctx: &'a mut FsCreateContext) -> StepResult<'a> {
        async move {
            let request = CreateReplicationPairRequest {
                local_res_id: ctx
                    .local_fs_id
                    .clone()
                    .context(errors::FlowContext { key: "localFSID" })?,
                local_res_type: ctx.res_type,
                remote_device_id: ctx
                    .remote_device_id
                    .clone()
                    .context(errors::FlowContext { key: "remoteDeviceID" })?,
                remote_res_id: ctx
                    .remote_fs_id
                    .clone()
                    .context(errors::FlowContext { key: "remoteFSID" })?,
                replication_model: REPLICATION_MODEL_ASYNC,
                synchronize_type: SYNCHRONIZE_TYPE_TIMED_WAIT,
                speed: SPEED_HIGHEST,
                timing_seconds: ctx.params.replication_sync_period,
            };
            base::create_and_sync_replication_pair(self.cli.as_ref(), &request).await
        }
        .boxed()
    }

    fn create_hyper_metro<'a>(&'a self, ctx: &'a mut FsCreateContext) -> StepResult<'a> {
        async move {
            let local_fs_id = ctx
                .local_fs_id
                .clone()
                .context(errors::FlowContext { key: "localFSID" })?;
            let pair_id = match self
                .cli
                .hyper_metro_pair_by_local_obj(&local_fs_id)
                .await
                .context(errors::Array)?
            {
                Some(pair) => pair.id,
                None => {
                    let request = CreateMetroPairRequest {
                        domain_id: ctx
                            .metro_domain_id
                            .clone()
                            .context(errors::FlowContext { key: "metroDomainID" })?,
                        local_obj_id: local_fs_id,
                        remote_obj_id: ctx
                            .remote_fs_id
                            .clone()
                            .context(errors::FlowContext { key: "remoteFSID" })?,
                        resource_type: MetroResourceType::Filesystem,
                        first_sync: false,
                        speed: SPEED_HIGHEST,
                    };
                    let pair = self
                        .cli
                        .create_hyper_metro_pair(&request)
                        .await
                        .context(errors::Array)?;
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

    fn revert_hyper_metro<'a>(&'a self, ctx: &'a mut FsCreateContext) -> StepResult<'a> {
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

    // ---- delete flow steps -------------------------------------------------

    fn delete_hyper_metro<'a>(&'a self, ctx: &'a mut FsDeleteContext) -> StepResult<'a> {
        async move {
            let Some(pair) = self
                .cli
                .hyper_metro_pair_by_local_obj(&ctx.fs_id)
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

    fn delete_hyper_metro_remote_fs<'a>(&'a self, ctx: &'a mut FsDeleteContext) -> StepResult<'a> {
        async move {
            let Some(remote) = self.metro_remote_cli.clone() else {
                warn!("HyperMetro remote client is not configured, the remote filesystem will be left over");
                return Ok(());
            };
            self.delete_fs_on(remote.as_ref(), &ctx.fs_name).await
        }
        .boxed()
    }

    fn delete_replication_pair<'a>(&'a self, ctx: &'a mut FsDeleteContext) -> StepResult<'a> {
        async move {
            let pairs = self
                .cli
                .replication_pairs_by_res(&ctx.fs_id, ResType::Filesystem)
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

    fn delete_replication_remote_fs<'a>(&'a self, ctx: &'a mut FsDeleteContext) -> StepResult<'a> {
        async move {
            let Some(remote) = self.replica_remote_cli.clone() else {
                warn!("Replication remote client is not configured, the remote filesystem will be left over");
                return Ok(());
            };
            self.delete_fs_on(remote.as_ref(), &ctx.fs_name).await
        }
        .boxed()
    }

    fn delete_local_fs<'a>(&'a self, ctx: &'a mut FsDeleteContext) -> StepResult<'a> {
        async move { self.delete_fs_on(self.cli.as_ref(), &ctx.fs_name).await }.boxed()
    }

    /// Delete a filesystem by name on `cli`, detaching and garbage
    /// collecting its QoS policy first. Absent is success.
    async fn delete_fs_on(&self, cli: &dyn ArrayClient, name: &str) -> Result<(), Error> {
        let Some(fs) = cli.filesystem_by_name(name).await.context(errors::Array)? else {
            info!(filesystem = name, "filesystem to delete does not exist");
            return Ok(());
        };
        if let Some(qos_id) = fs.ioclass_id.as_ref().filter(|id| !id.is_empty()) {
            base::delete_qos_for(cli, qos_id, QosObject::Filesystem(fs.id.clone())).await?;
        }
        cli.delete_filesystem(&fs.id).await.context(errors::Array)
    }

    // ---- expand flow steps -------------------------------------------------

    fn pre_expand_check_capacity<'a>(&'a self, ctx: &'a mut FsExpandContext) -> StepResult<'a> {
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

    /// The remote filesystem must exist and must not already be larger than
    /// the requested size.
    async fn check_remote_capacity(
        &self,
        cli: &dyn ArrayClient,
        name: &str,
        new_size: u64,
    ) -> Result<String, Error> {
        let fs = cli
            .filesystem_by_name(name)
            .await
            .context(errors::Array)?
            .context(errors::NotFound {
                object: "remote filesystem",
                name: name.to_string(),
            })?;
        ensure!(
            new_size >= fs.capacity,
            errors::NotGrowing {
                name: name.to_string(),
                requested: new_size,
                current: fs.capacity,
            }
        );
        Ok(fs.id)
    }

    fn pre_expand_metro_check_remote_capacity<'a>(
        &'a self,
        ctx: &'a mut FsExpandContext,
    ) -> StepResult<'a> {
        async move {
            let remote = self
                .metro_remote_cli
                .as_ref()
                .context(errors::RemoteUnavailable {
                    purpose: "hypermetro",
                })?;
            let remote_fs_id = self
                .check_remote_capacity(remote.as_ref(), &ctx.fs_name, ctx.new_size)
                .await?;
            ctx.remote_fs_id = Some(remote_fs_id);
            Ok(())
        }
        .boxed()
    }

    fn pre_expand_replication_check_remote_capacity<'a>(
        &'a self,
        ctx: &'a mut FsExpandContext,
    ) -> StepResult<'a> {
        async move {
            let remote = self
                .replica_remote_cli
                .as_ref()
                .context(errors::RemoteUnavailable {
                    purpose: "replication",
                })?;
            let remote_fs_id = self
                .check_remote_capacity(remote.as_ref(), &ctx.fs_name, ctx.new_size)
                .await?;
            ctx.remote_fs_id = Some(remote_fs_id);
            Ok(())
        }
        .boxed()
    }

    fn suspend_hyper_metro<'a>(&'a self, ctx: &'a mut FsExpandContext) -> StepResult<'a> {
        async move {
            let Some(pair) = self
                .cli
                .hyper_metro_pair_by_local_obj(&ctx.fs_id)
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

    fn expand_metro_remote_fs<'a>(&'a self, ctx: &'a mut FsExpandContext) -> StepResult<'a> {
        async move {
            let remote = self
                .metro_remote_cli
                .as_ref()
                .context(errors::RemoteUnavailable {
                    purpose: "hypermetro",
                })?;
            let remote_fs_id = ctx
                .remote_fs_id
                .clone()
                .context(errors::FlowContext { key: "remoteFSID" })?;
            remote
                .extend_filesystem(&remote_fs_id, ctx.new_size)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn split_replication<'a>(&'a self, ctx: &'a mut FsExpandContext) -> StepResult<'a> {
        async move {
            let pairs = self
                .cli
                .replication_pairs_by_res(&ctx.fs_id, ResType::Filesystem)
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

    fn expand_replication_remote_fs<'a>(&'a self, ctx: &'a mut FsExpandContext) -> StepResult<'a> {
        async move {
            let remote = self
                .replica_remote_cli
                .as_ref()
                .context(errors::RemoteUnavailable {
                    purpose: "replication",
                })?;
            let remote_fs_id = ctx
                .remote_fs_id
                .clone()
                .context(errors::FlowContext { key: "remoteFSID" })?;
            remote
                .extend_filesystem(&remote_fs_id, ctx.new_size)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn expand_local_fs<'a>(&'a self, ctx: &'a mut FsExpandContext) -> StepResult<'a> {
        async move {
            self.cli
                .extend_filesystem(&ctx.fs_id, ctx.new_size)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn expand_fs_quota<'a>(&'a self, ctx: &'a mut FsExpandContext) -> StepResult<'a> {
        async move {
            if !ctx.has_quota {
                return Ok(());
            }
            self.cli
                .set_filesystem_quota(&ctx.fs_id, ctx.new_size)
                .await
                .context(errors::Array)
        }
        .boxed()
    }

    fn sync_hyper_metro<'a>(&'a self, ctx: &'a mut FsExpandContext) -> StepResult<'a> {
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

    fn sync_replication<'a>(&'a self, ctx: &'a mut FsExpandContext) -> StepResult<'a> {
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
}
