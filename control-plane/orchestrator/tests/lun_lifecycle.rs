//! End-to-end LUN lifecycle scenarios driven against in-memory arrays.

use array_client::{mock::MockArray, ClientError, ClonePairState};
use std::{collections::HashMap, sync::Arc};
use volume_orchestrator::{Error, ProductFamily, San};

const GIB: u64 = 1 << 30;

fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn plain_params(name: &str, capacity: u64) -> HashMap<String, String> {
    params(&[
        ("name", name),
        ("storagepool", "P1"),
        ("capacity", &capacity.to_string()),
    ])
}

fn local_array() -> Arc<MockArray> {
    let array = MockArray::new("local");
    array.add_pool("P1", 100 * GIB);
    array
}

/// A local array with a healthy replication peer.
fn replicated_pair() -> (Arc<MockArray>, Arc<MockArray>) {
    let local = local_array();
    let remote = MockArray::new("remote");
    remote.add_pool("RP1", 100 * GIB);
    local.link_remote(&remote);
    (local, remote)
}

/// A local array with a metro peer carrying a normal domain.
fn metro_pair() -> (Arc<MockArray>, Arc<MockArray>) {
    let local = local_array();
    let remote = MockArray::new("remote");
    remote.add_pool("RP1", 100 * GIB);
    remote.add_metro_domain("dom1");
    local.link_remote(&remote);
    (local, remote)
}

fn san(local: &Arc<MockArray>) -> Arc<San> {
    Arc::new(San::new(local.clone(), None, None, ProductFamily::Current))
}

fn replicated_san(local: &Arc<MockArray>, remote: &Arc<MockArray>) -> Arc<San> {
    let remote_cli: Arc<dyn array_client::ArrayClient> = remote.clone();
    Arc::new(San::new(
        local.clone(),
        None,
        Some(remote_cli),
        ProductFamily::Current,
    ))
}

fn metro_san(local: &Arc<MockArray>, remote: &Arc<MockArray>) -> Arc<San> {
    let remote_cli: Arc<dyn array_client::ArrayClient> = remote.clone();
    Arc::new(San::new(
        local.clone(),
        Some(remote_cli),
        None,
        ProductFamily::Current,
    ))
}

fn replication_params(name: &str, capacity: u64) -> HashMap<String, String> {
    params(&[
        ("name", name),
        ("storagepool", "P1"),
        ("capacity", &capacity.to_string()),
        ("replication", "true"),
        ("remotestoragepool", "RP1"),
    ])
}

#[tokio::test]
async fn plain_create_only_resolves_the_pool_and_creates_the_lun() {
    let local = local_array();
    let san = san(&local);

    let volume = san.create(&plain_params("v1", GIB)).await.unwrap();
    assert_eq!(volume.name, "v1");
    assert!(volume.wwn.is_some());

    assert_eq!(local.writes(), ["CreateLun(v1)"]);
    assert!(local.calls().contains(&"GetPoolByName(P1)".to_string()));
    let lun = local
        .with_state(|s| s.luns.first().cloned())
        .expect("lun created");
    assert_eq!(lun.capacity, GIB);
    assert_eq!(lun.name, "v1");
}

#[tokio::test]
async fn clone_larger_extends_after_the_pair_reaches_normal() {
    let local = local_array();
    let san = san(&local);
    san.create(&plain_params("s0", GIB)).await.unwrap();
    local.reset_calls();

    let mut request = plain_params("v2", 2 * GIB);
    request.insert("clonefrom".to_string(), "s0".to_string());
    request.insert("clonespeed".to_string(), "2".to_string());
    san.create(&request).await.unwrap();

    let dst = local
        .with_state(|s| s.luns.iter().find(|l| l.name == "v2").cloned())
        .expect("clone destination exists");
    assert_eq!(dst.capacity, 2 * GIB);
    assert_eq!(
        local.writes(),
        [
            "CreateLun(v2)".to_string(),
            format!("CreateClonePair({})", dst.id),
            format!("SyncClonePair({})", dst.id),
            format!("ExtendLun({})", dst.id),
            format!("DeleteClonePair({})", dst.id),
        ]
    );
    assert!(local.with_state(|s| s.clone_pairs.is_empty()));
}

#[tokio::test]
async fn clone_smaller_than_source_is_rejected() {
    let local = local_array();
    let san = san(&local);
    san.create(&plain_params("s0", 2 * GIB)).await.unwrap();

    let mut request = plain_params("v2", GIB);
    request.insert("clonefrom".to_string(), "s0".to_string());
    let error = san.create(&request).await.unwrap_err();
    assert!(matches!(
        error,
        Error::TaskFailed { .. } | Error::CloneTooSmall { .. }
    ));
    // The failed clone left no destination behind.
    assert_eq!(local.lun_count(), 1);
}

#[tokio::test]
async fn conflicting_mirrors_fail_before_any_array_call() {
    let local = local_array();
    let san = san(&local);

    let mut request = plain_params("v1", GIB);
    request.insert("replication".to_string(), "true".to_string());
    request.insert("hypermetro".to_string(), "true".to_string());
    let error = san.create(&request).await.unwrap_err();
    assert!(matches!(error, Error::InvalidParams { .. }));
    assert!(local.calls().is_empty());
}

#[tokio::test]
async fn remote_qos_failure_reverts_both_arrays() {
    let (local, remote) = replicated_pair();
    let san = replicated_san(&local, &remote);
    remote.fail_on(
        "CreateQosPolicy",
        ClientError::Request {
            request: "CreateQosPolicy".to_string(),
            details: "injected".to_string(),
        },
    );

    let mut request = replication_params("v1", GIB);
    request.insert("qos".to_string(), r#"{"MAXIOPS": 1000}"#.to_string());
    let error = san.create(&request).await.unwrap_err();
    match error {
        Error::TaskFailed { step, .. } => assert_eq!(step, "Create-Remote-QoS"),
        other => panic!("unexpected error: {other}"),
    }

    // Reverts ran in reverse order and neither array kept an orphan.
    assert!(local.is_empty(), "local leftovers: {:?}", local.writes());
    assert!(remote.is_empty(), "remote leftovers: {:?}", remote.writes());
    // The local LUN goes last, after its QoS policy was detached and deleted.
    let local_writes = local.writes();
    assert!(local_writes.last().unwrap().starts_with("DeleteLun"));
    let detach = local_writes
        .iter()
        .position(|w| w.starts_with("RemoveObjectFromQos"))
        .unwrap();
    let policy_delete = local_writes
        .iter()
        .position(|w| w.starts_with("DeleteQosPolicy"))
        .unwrap();
    assert!(detach < policy_delete);
    assert!(remote.writes().last().unwrap().starts_with("DeleteLun"));
}

#[tokio::test]
async fn replicated_create_pairs_the_luns() {
    let (local, remote) = replicated_pair();
    let san = replicated_san(&local, &remote);

    san.create(&replication_params("v1", GIB)).await.unwrap();

    let local_lun = local.with_state(|s| s.luns.first().cloned()).unwrap();
    let remote_lun = remote.with_state(|s| s.luns.first().cloned()).unwrap();
    assert_eq!(local_lun.name, remote_lun.name);
    assert_eq!(local_lun.capacity, remote_lun.capacity);
    assert!(local_lun.rss.remote_replication);
    let pair = local
        .with_state(|s| s.replication_pairs.first().cloned())
        .expect("replication pair created");
    assert_eq!(pair.local_res_id, local_lun.id);
    assert_eq!(pair.remote_res_id, remote_lun.id);
}

#[tokio::test]
async fn expand_replicated_grows_remote_first_and_resyncs() {
    let (local, remote) = replicated_pair();
    let san = replicated_san(&local, &remote);
    san.create(&replication_params("v1", GIB)).await.unwrap();
    local.reset_calls();
    remote.reset_calls();

    let attached = san.expand("v1", 2 * GIB).await.unwrap();
    assert!(!attached);

    let local_lun = local.with_state(|s| s.luns.first().cloned()).unwrap();
    let remote_lun = remote.with_state(|s| s.luns.first().cloned()).unwrap();
    assert_eq!(local_lun.capacity, 2 * GIB);
    assert_eq!(remote_lun.capacity, 2 * GIB);

    let writes = local.writes();
    let split = writes
        .iter()
        .position(|w| w.starts_with("SplitReplicationPair"))
        .unwrap();
    let extend = writes.iter().position(|w| w.starts_with("ExtendLun")).unwrap();
    let sync = writes
        .iter()
        .position(|w| w.starts_with("SyncReplicationPair"))
        .unwrap();
    assert!(split < extend && extend < sync, "order was {writes:?}");
    // The remote side only saw its extend.
    assert_eq!(remote.writes().len(), 1);
}

#[tokio::test]
async fn expand_failure_after_remote_extend_leaves_the_skew_documented() {
    let (local, remote) = replicated_pair();
    let san = replicated_san(&local, &remote);
    san.create(&replication_params("v1", GIB)).await.unwrap();
    local.fail_on(
        "ExtendLun",
        ClientError::Request {
            request: "ExtendLun".to_string(),
            details: "injected".to_string(),
        },
    );

    san.expand("v1", 2 * GIB).await.unwrap_err();
    let local_lun = local.with_state(|s| s.luns.first().cloned()).unwrap();
    let remote_lun = remote.with_state(|s| s.luns.first().cloned()).unwrap();
    // The remote LUN is larger until a retry converges.
    assert_eq!(remote_lun.capacity, 2 * GIB);
    assert_eq!(local_lun.capacity, GIB);
}

#[tokio::test]
async fn expand_not_growing_is_rejected_without_mutation() {
    let local = local_array();
    let san = san(&local);
    san.create(&plain_params("v1", 2 * GIB)).await.unwrap();
    local.reset_calls();

    let error = san.expand("v1", GIB).await.unwrap_err();
    assert!(matches!(error, Error::NotGrowing { .. }));
    let error = san.expand("v1", 2 * GIB).await.unwrap_err();
    assert!(matches!(error, Error::NotGrowing { .. }));
    assert!(local.writes().is_empty());
}

#[tokio::test]
async fn expand_reports_the_pre_expand_attach_state() {
    let local = local_array();
    let san = san(&local);
    san.create(&plain_params("v1", GIB)).await.unwrap();
    local.with_state(|s| s.luns[0].exposed_to_initiator = true);

    let attached = san.expand("v1", 2 * GIB).await.unwrap();
    assert!(attached);
}

#[tokio::test]
async fn delete_is_idempotent_and_restores_the_inventory() {
    let local = local_array();
    let san = san(&local);
    assert_eq!(local.lun_count(), 0);

    san.create(&plain_params("v1", GIB)).await.unwrap();
    assert_eq!(local.lun_count(), 1);

    san.delete("v1").await.unwrap();
    assert_eq!(local.lun_count(), 0);
    assert!(local.is_empty());

    // A second delete of the same volume is also a success.
    san.delete("v1").await.unwrap();
    assert!(local.is_empty());
}

#[tokio::test]
async fn delete_with_qos_detaches_and_garbage_collects_the_policy() {
    let local = local_array();
    let san = san(&local);
    let mut request = plain_params("v1", GIB);
    request.insert("qos".to_string(), r#"{"MAXBANDWIDTH": 200}"#.to_string());
    san.create(&request).await.unwrap();
    assert_eq!(local.with_state(|s| s.qos_policies.len()), 1);

    san.delete("v1").await.unwrap();
    assert!(local.is_empty());
}

#[tokio::test]
async fn metro_create_and_delete_clean_both_arrays() {
    let (local, remote) = metro_pair();
    let san = metro_san(&local, &remote);

    let request = params(&[
        ("name", "v1"),
        ("storagepool", "P1"),
        ("capacity", &GIB.to_string()),
        ("hypermetro", "true"),
        ("remotestoragepool", "RP1"),
        ("metrodomain", "dom1"),
    ]);
    san.create(&request).await.unwrap();

    let pair = local
        .with_state(|s| s.metro_pairs.first().cloned())
        .expect("metro pair created");
    assert_eq!(
        pair.state,
        array_client::MetroPairState::Normal,
        "pair must be running normally after create"
    );
    let local_lun = local.with_state(|s| s.luns.first().cloned()).unwrap();
    let remote_lun = remote.with_state(|s| s.luns.first().cloned()).unwrap();
    assert_eq!(local_lun.capacity, remote_lun.capacity);
    assert!(local_lun.rss.hyper_metro);

    san.delete("v1").await.unwrap();
    assert!(local.is_empty(), "local leftovers");
    assert!(remote.is_empty(), "remote leftovers");
}

#[tokio::test]
async fn snapshot_round_trip_leaves_no_snapshot_behind() {
    let local = local_array();
    let san = san(&local);
    san.create(&plain_params("v1", GIB)).await.unwrap();
    let lun_id = local.with_state(|s| s.luns[0].id.clone());

    let info = san.create_snapshot("v1", "s1").await.unwrap();
    assert_eq!(info.size_bytes, GIB);
    assert_eq!(info.parent_id, lun_id);
    assert_eq!(local.snapshot_count(), 1);

    // Re-creating the same snapshot of the same parent is idempotent.
    let again = san.create_snapshot("v1", "s1").await.unwrap();
    assert_eq!(again, info);
    assert_eq!(local.snapshot_count(), 1);

    san.delete_snapshot("s1").await.unwrap();
    assert_eq!(local.snapshot_count(), 0);
    san.delete_snapshot("s1").await.unwrap();
}

#[tokio::test]
async fn snapshot_name_conflict_on_a_different_parent() {
    let local = local_array();
    let san = san(&local);
    san.create(&plain_params("v1", GIB)).await.unwrap();
    san.create(&plain_params("v2", GIB)).await.unwrap();

    san.create_snapshot("v1", "s1").await.unwrap();
    let error = san.create_snapshot("v2", "s1").await.unwrap_err();
    assert!(matches!(error, Error::NameConflict { .. }));
}

#[tokio::test]
async fn clone_from_snapshot_creates_at_snapshot_size() {
    let local = local_array();
    let san = san(&local);
    san.create(&plain_params("v1", GIB)).await.unwrap();
    san.create_snapshot("v1", "s1").await.unwrap();

    let mut request = plain_params("v3", 2 * GIB);
    request.insert("sourcesnapshotname".to_string(), "s1".to_string());
    san.create(&request).await.unwrap();

    let dst = local
        .with_state(|s| s.luns.iter().find(|l| l.name == "v3").cloned())
        .unwrap();
    assert_eq!(dst.capacity, 2 * GIB);
    assert!(local.with_state(|s| s.clone_pairs.is_empty()));
}

#[tokio::test]
async fn legacy_family_clones_through_a_lun_copy_job() {
    let local = local_array();
    let san = Arc::new(San::new(local.clone(), None, None, ProductFamily::Legacy));
    san.create(&plain_params("s0", GIB)).await.unwrap();

    let mut request = plain_params("v2", 2 * GIB);
    request.insert("clonefrom".to_string(), "s0".to_string());
    san.create(&request).await.unwrap();

    let dst = local
        .with_state(|s| s.luns.iter().find(|l| l.name == "v2").cloned())
        .unwrap();
    assert_eq!(dst.capacity, 2 * GIB);
    // The job and its synthesized snapshot are gone after completion.
    assert!(local.with_state(|s| s.lun_copies.is_empty()));
    assert_eq!(local.snapshot_count(), 0);
    assert!(local
        .calls()
        .iter()
        .any(|c| c.starts_with("CreateLunCopy")));
}

#[tokio::test]
async fn create_retry_waits_out_an_inflight_clone_pair() {
    let local = local_array();
    let san = san(&local);
    san.create(&plain_params("v1", GIB)).await.unwrap();
    let lun_id = local.with_state(|s| s.luns[0].id.clone());
    // Stage a finished clone artifact from an interrupted earlier attempt.
    local.with_state(|s| {
        s.clone_pairs.push(array_client::ClonePair {
            id: lun_id.clone(),
            source_id: "999".to_string(),
            dest_id: lun_id.clone(),
            health: array_client::Health::Normal,
            state: ClonePairState::Normal,
        })
    });

    let volume = san.create(&plain_params("v1", GIB)).await.unwrap();
    assert_eq!(volume.name, "v1");
    assert!(local.with_state(|s| s.clone_pairs.is_empty()));
    assert_eq!(local.lun_count(), 1);
}

#[tokio::test]
async fn replication_without_a_remote_client_is_rejected() {
    let local = local_array();
    let san = san(&local);

    let error = san
        .create(&replication_params("v1", GIB))
        .await
        .unwrap_err();
    match error {
        Error::TaskFailed { step, source, .. } => {
            assert_eq!(step, "Get-Replication-Params");
            assert!(matches!(*source, Error::RemoteUnavailable { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(local.lun_count(), 0);
}
