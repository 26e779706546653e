//! Helpers shared by the LUN and filesystem lifecycle orchestrators.

use crate::{
    context::VolumeParams,
    errors::{self, Error},
    wait::{wait_until, JOB_POLL_INTERVAL, JOB_WAIT_BUDGET},
};
use array_client::{
    ArrayClient, CreateReplicationPairRequest, Health, LinkState, MetroPairState, QosObject,
    RemoteDevice,
};
use snafu::{ensure, OptionExt, ResultExt};
use tracing::warn;

/// Resolve the remote pool named in the parameters against `remote`.
pub(crate) async fn remote_pool_id(
    params: &VolumeParams,
    remote: &dyn ArrayClient,
) -> Result<String, Error> {
    let pool_name = params
        .remote_pool_name
        .as_deref()
        .context(errors::FlowContext {
            key: "remotestoragepool",
        })?;
    let pool = remote
        .pool_by_name(pool_name)
        .await
        .context(errors::Array)?
        .context(errors::NotFound {
            object: "remote storage pool",
            name: pool_name.to_string(),
        })?;
    Ok(pool.id)
}

/// Look up the peering to the remote array on the local array and require
/// it healthy.
pub(crate) async fn remote_device(
    local: &dyn ArrayClient,
    serial: &str,
) -> Result<RemoteDevice, Error> {
    let device = local
        .remote_device_by_sn(serial)
        .await
        .context(errors::Array)?
        .context(errors::RemoteDeviceMissing {
            serial: serial.to_string(),
        })?;
    ensure!(
        device.health == Health::Normal && device.link == LinkState::Up,
        errors::RemoteDeviceNotHealthy {
            serial: serial.to_string(),
        }
    );
    Ok(device)
}

/// Create a replication pair and start its first synchronization; the pair
/// is deleted again when the sync call fails.
pub(crate) async fn create_and_sync_replication_pair(
    cli: &dyn ArrayClient,
    request: &CreateReplicationPairRequest,
) -> Result<(), Error> {
    let pair = cli
        .create_replication_pair(request)
        .await
        .context(errors::Array)?;
    if let Err(error) = cli.sync_replication_pair(&pair.id).await.context(errors::Array) {
        if let Err(cleanup) = cli.delete_replication_pair(&pair.id).await {
            warn!(pair = pair.id.as_str(), %cleanup, "failed to delete replication pair after sync failure");
        }
        return Err(error);
    }
    Ok(())
}

/// Wait for a metro pair to reach normal running state; on failure the pair
/// is stopped so it does not keep trying to sync.
pub(crate) async fn wait_metro_sync_finish(
    cli: &dyn ArrayClient,
    pair_id: &str,
) -> Result<(), Error> {
    let result = wait_until(
        &format!("hypermetro pair '{pair_id}'"),
        JOB_WAIT_BUDGET,
        JOB_POLL_INTERVAL,
        || async move {
            let pair = cli
                .hyper_metro_pair_by_id(pair_id)
                .await
                .context(errors::Array)?
                .context(errors::NotFound {
                    object: "hypermetro pair",
                    name: pair_id.to_string(),
                })?;
            ensure!(
                pair.health != Health::Fault,
                errors::JobFault {
                    kind: "hypermetro pair",
                    id: pair_id,
                }
            );
            match pair.state {
                MetroPairState::Normal => Ok(true),
                MetroPairState::ToSync | MetroPairState::Syncing => Ok(false),
                state => errors::JobAbnormal {
                    kind: "hypermetro pair",
                    id: pair_id,
                    status: format!("{state:?}"),
                }
                .fail(),
            }
        },
    )
    .await;

    if let Err(error) = result {
        if let Err(stop) = cli.stop_hyper_metro_pair(pair_id).await {
            warn!(pair = pair_id, %stop, "failed to stop hypermetro pair after wait failure");
        }
        return Err(error);
    }
    Ok(())
}

/// Detach `object` from its QoS policy and delete the policy once no object
/// references it. The remaining reference count is read back from the
/// array rather than inferred, so retries observe the authoritative state.
pub(crate) async fn delete_qos_for(
    cli: &dyn ArrayClient,
    qos_id: &str,
    object: QosObject,
) -> Result<(), Error> {
    cli.remove_object_from_qos(qos_id, &object)
        .await
        .context(errors::Array)?;
    let Some(policy) = cli.qos_policy_by_id(qos_id).await.context(errors::Array)? else {
        return Ok(());
    };
    if policy.ref_count() == 0 {
        cli.deactivate_qos_policy(qos_id)
            .await
            .context(errors::Array)?;
        cli.delete_qos_policy(qos_id).await.context(errors::Array)?;
    }
    Ok(())
}
