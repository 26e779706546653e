//! End-to-end filesystem lifecycle scenarios driven against in-memory
//! arrays.

use array_client::mock::MockArray;
use std::{collections::HashMap, sync::Arc};
use volume_orchestrator::{Error, Nas, ProductFamily};

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

fn nas(local: &Arc<MockArray>) -> Arc<Nas> {
    Arc::new(Nas::new(local.clone(), None, None, ProductFamily::Current))
}

#[tokio::test]
async fn plain_create_and_idempotent_delete() {
    let local = local_array();
    let nas = nas(&local);

    let volume = nas.create(&plain_params("f1", GIB)).await.unwrap();
    assert_eq!(volume.name, "f1");
    assert!(volume.wwn.is_none());
    assert_eq!(local.writes(), ["CreateFileSystem(f1)"]);

    nas.delete("f1").await.unwrap();
    assert!(local.is_empty());
    nas.delete("f1").await.unwrap();
    assert!(local.is_empty());
}

#[tokio::test]
async fn filesystem_cloning_is_rejected() {
    let local = local_array();
    let nas = nas(&local);

    let mut request = plain_params("f1", GIB);
    request.insert("clonefrom".to_string(), "f0".to_string());
    let error = nas.create(&request).await.unwrap_err();
    assert!(matches!(error, Error::InvalidParams { .. }));
}

#[tokio::test]
async fn replicated_create_uses_the_filesystem_resource_type() {
    let local = local_array();
    let remote = MockArray::new("remote");
    remote.add_pool("RP1", 100 * GIB);
    local.link_remote(&remote);
    let remote_cli: Arc<dyn array_client::ArrayClient> = remote.clone();
    let nas = Arc::new(Nas::new(
        local.clone(),
        None,
        Some(remote_cli),
        ProductFamily::Current,
    ));

    let request = params(&[
        ("name", "f1"),
        ("storagepool", "P1"),
        ("capacity", &GIB.to_string()),
        ("replication", "true"),
        ("remotestoragepool", "RP1"),
    ]);
    nas.create(&request).await.unwrap();

    let local_fs = local.with_state(|s| s.filesystems.first().cloned()).unwrap();
    let remote_fs = remote.with_state(|s| s.filesystems.first().cloned()).unwrap();
    assert_eq!(local_fs.capacity, remote_fs.capacity);
    assert!(local_fs.rss.remote_replication);
    let pair = local
        .with_state(|s| s.replication_pairs.first().cloned())
        .expect("replication pair created");
    assert_eq!(pair.local_res_id, local_fs.id);

    nas.delete("f1").await.unwrap();
    assert!(local.is_empty(), "local leftovers");
    assert!(remote.is_empty(), "remote leftovers");
}

#[tokio::test]
async fn metro_create_binds_a_filesystem_pair() {
    let local = local_array();
    let remote = MockArray::new("remote");
    remote.add_pool("RP1", 100 * GIB);
    remote.add_metro_domain("dom1");
    local.link_remote(&remote);
    let remote_cli: Arc<dyn array_client::ArrayClient> = remote.clone();
    let nas = Arc::new(Nas::new(
        local.clone(),
        Some(remote_cli),
        None,
        ProductFamily::Current,
    ));

    let request = params(&[
        ("name", "f1"),
        ("storagepool", "P1"),
        ("capacity", &GIB.to_string()),
        ("hypermetro", "true"),
        ("remotestoragepool", "RP1"),
        ("metrodomain", "dom1"),
    ]);
    nas.create(&request).await.unwrap();

    let local_fs = local.with_state(|s| s.filesystems.first().cloned()).unwrap();
    assert!(local_fs.rss.hyper_metro);
    let pair = local.with_state(|s| s.metro_pairs.first().cloned()).unwrap();
    assert_eq!(pair.local_obj_id, local_fs.id);
    assert_eq!(pair.state, array_client::MetroPairState::Normal);

    nas.delete("f1").await.unwrap();
    assert!(local.is_empty());
    assert!(remote.is_empty());
}

#[tokio::test]
async fn expand_grows_the_quota_with_the_capacity() {
    let local = local_array();
    let nas = nas(&local);
    nas.create(&plain_params("f1", GIB)).await.unwrap();
    local.with_state(|s| s.filesystems[0].quota = Some(GIB));

    nas.expand("f1", 2 * GIB).await.unwrap();
    let fs = local.with_state(|s| s.filesystems.first().cloned()).unwrap();
    assert_eq!(fs.capacity, 2 * GIB);
    assert_eq!(fs.quota, Some(2 * GIB));
}

#[tokio::test]
async fn expand_without_a_quota_leaves_the_quota_unset() {
    let local = local_array();
    let nas = nas(&local);
    nas.create(&plain_params("f1", GIB)).await.unwrap();

    nas.expand("f1", 2 * GIB).await.unwrap();
    let fs = local.with_state(|s| s.filesystems.first().cloned()).unwrap();
    assert_eq!(fs.capacity, 2 * GIB);
    assert_eq!(fs.quota, None);
}

#[tokio::test]
async fn expand_not_growing_is_rejected_without_mutation() {
    let local = local_array();
    let nas = nas(&local);
    nas.create(&plain_params("f1", 2 * GIB)).await.unwrap();
    local.reset_calls();

    let error = nas.expand("f1", GIB).await.unwrap_err();
    assert!(matches!(error, Error::NotGrowing { .. }));
    assert!(local.writes().is_empty());
}

#[tokio::test]
async fn qos_policy_follows_the_filesystem_lifecycle() {
    let local = local_array();
    let nas = nas(&local);
    let mut request = plain_params("f1", GIB);
    request.insert("qos".to_string(), r#"{"MAXBANDWIDTH": 500}"#.to_string());
    nas.create(&request).await.unwrap();

    let fs = local.with_state(|s| s.filesystems.first().cloned()).unwrap();
    assert!(fs.ioclass_id.is_some());
    assert_eq!(local.with_state(|s| s.qos_policies.len()), 1);

    nas.delete("f1").await.unwrap();
    assert!(local.is_empty());
}
