//! Normalization of the caller-supplied volume parameter map into the typed
//! parameter set the lifecycle flows consume. Validation happens here,
//! before any array mutation.

use crate::{errors::Error, qos, utils, ProductFamily};
use array_client::{AllocType, ArrayClient, QosSpec};
use snafu::OptionExt;
use std::collections::HashMap;
use strum_macros::{AsRefStr, Display, EnumString};

/// Default clone synchronization speed.
const DEFAULT_CLONE_SPEED: u8 = 3;

/// The recognized volume context parameter names.
#[derive(AsRefStr, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Parameters {
    Name,
    Capacity,
    StoragePool,
    RemoteStoragePool,
    AllocType,
    CloneSpeed,
    CloneFrom,
    SourceVolumeName,
    SourceSnapshotName,
    Qos,
    ApplicationType,
    Replication,
    HyperMetro,
    MetroDomain,
    #[strum(serialize = "replicationSyncPeriod")]
    ReplicationSyncPeriod,
}

/// The volume's remote-mirror relationship. At most one per volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
    None,
    Replication,
    HyperMetro,
}

/// Where a cloned volume takes its data from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneSource {
    /// An existing volume, by its (mangled) array name.
    Lun(String),
    /// An existing snapshot, by its (mangled) array name.
    Snapshot(String),
}

/// The normalized, validated parameter set of one volume request.
#[derive(Debug, Clone)]
pub struct VolumeParams {
    /// Array-legal object name, derived from the caller-supplied name.
    pub name: String,
    /// Requested capacity in bytes.
    pub capacity: u64,
    pub pool_id: String,
    pub pool_name: String,
    pub alloc_type: AllocType,
    pub clone_source: Option<CloneSource>,
    pub clone_speed: u8,
    pub qos: Option<QosSpec>,
    /// Workload type name as supplied, re-resolved per array.
    pub application_type: Option<String>,
    /// Workload type id resolved against the local array.
    pub workload_type_id: Option<String>,
    pub mirror: Mirror,
    pub remote_pool_name: Option<String>,
    pub metro_domain: Option<String>,
    /// Period of the replication timed synchronization, in seconds.
    pub replication_sync_period: Option<u64>,
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidParams {
        reason: reason.into(),
    }
}

fn get<'a>(args: &'a HashMap<String, String>, key: Parameters) -> Option<&'a str> {
    args.get(key.as_ref()).map(|s| s.as_str()).filter(|s| !s.is_empty())
}

impl VolumeParams {
    /// Normalize the raw parameter map. Everything that can be rejected
    /// without an array round-trip is rejected first; only then is the pool
    /// resolved and the workload type looked up.
    pub async fn normalize(
        cli: &dyn ArrayClient,
        family: ProductFamily,
        args: &HashMap<String, String>,
    ) -> Result<Self, Error> {
        let name = get(args, Parameters::Name)
            .map(utils::object_name)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| invalid("a volume name must be specified"))?;

        let capacity = get(args, Parameters::Capacity)
            .ok_or_else(|| invalid("a volume capacity must be specified"))?
            .parse::<u64>()
            .ok()
            .filter(|c| *c > 0)
            .ok_or_else(|| invalid("volume capacity must be a positive byte count"))?;

        let mirror = Self::mirror(args)?;

        let alloc_type = match get(args, Parameters::AllocType) {
            Some("thick") => AllocType::Thick,
            _ => AllocType::Thin,
        };

        let clone_source = Self::clone_source(args);
        let clone_speed = Self::clone_speed(args, clone_source.is_some())?;

        let qos = match get(args, Parameters::Qos) {
            Some(document) => Some(qos::parse_and_validate(family, document)?),
            None => None,
        };

        let metro_domain = get(args, Parameters::MetroDomain).map(str::to_string);
        if mirror == Mirror::HyperMetro && metro_domain.is_none() {
            return Err(invalid("no hypermetro domain is specified for a metro volume"));
        }

        let remote_pool_name = get(args, Parameters::RemoteStoragePool).map(str::to_string);
        if mirror != Mirror::None && remote_pool_name.is_none() {
            return Err(invalid("no remote storage pool is specified for a mirrored volume"));
        }

        let replication_sync_period = match get(args, Parameters::ReplicationSyncPeriod) {
            Some(period) => Some(period.parse::<u64>().map_err(|_| {
                invalid("replicationSyncPeriod must be a number of seconds")
            })?),
            None => None,
        };

        let pool_name = get(args, Parameters::StoragePool)
            .ok_or_else(|| invalid("must specify a storage pool to create a volume"))?
            .to_string();
        let pool = cli
            .pool_by_name(&pool_name)
            .await
            .map_err(|source| Error::Array { source })?
            .context(crate::errors::NotFound {
                object: "storage pool",
                name: pool_name.clone(),
            })?;

        let application_type = get(args, Parameters::ApplicationType).map(str::to_string);
        let workload_type_id = match &application_type {
            Some(workload) => Some(Self::workload_type_id(cli, workload).await?),
            None => None,
        };

        Ok(Self {
            name,
            capacity,
            pool_id: pool.id,
            pool_name: pool.name,
            alloc_type,
            clone_source,
            clone_speed,
            qos,
            application_type,
            workload_type_id,
            mirror,
            remote_pool_name,
            metro_domain,
            replication_sync_period,
        })
    }

    /// Resolve a workload type name to its array-side id.
    pub(crate) async fn workload_type_id(
        cli: &dyn ArrayClient,
        workload: &str,
    ) -> Result<String, Error> {
        cli.application_type_by_name(workload)
            .await
            .map_err(|source| Error::Array { source })?
            .context(crate::errors::NotFound {
                object: "application type",
                name: workload.to_string(),
            })
    }

    fn mirror(args: &HashMap<String, String>) -> Result<Mirror, Error> {
        let flag = |key: Parameters| -> Result<bool, Error> {
            match get(args, key) {
                None => Ok(false),
                Some(value) => value
                    .parse::<bool>()
                    .map_err(|_| invalid(format!("'{value}' is not a boolean"))),
            }
        };
        let replication = flag(Parameters::Replication)?;
        let hyper_metro = flag(Parameters::HyperMetro)?;
        match (replication, hyper_metro) {
            (true, true) => Err(invalid(
                "cannot create replication and hypermetro for a volume at the same time",
            )),
            (true, false) => Ok(Mirror::Replication),
            (false, true) => Ok(Mirror::HyperMetro),
            (false, false) => Ok(Mirror::None),
        }
    }

    /// Source selection precedence: source volume, then source snapshot,
    /// then the plain clone reference.
    fn clone_source(args: &HashMap<String, String>) -> Option<CloneSource> {
        if let Some(volume) = get(args, Parameters::SourceVolumeName) {
            return Some(CloneSource::Lun(utils::object_name(volume)));
        }
        if let Some(snapshot) = get(args, Parameters::SourceSnapshotName) {
            return Some(CloneSource::Snapshot(utils::object_name(snapshot)));
        }
        get(args, Parameters::CloneFrom)
            .map(|volume| CloneSource::Lun(utils::object_name(volume)))
    }

    /// `clonespeed` is only meaningful when a clone source is present.
    fn clone_speed(args: &HashMap<String, String>, cloning: bool) -> Result<u8, Error> {
        if !cloning {
            return Ok(DEFAULT_CLONE_SPEED);
        }
        match get(args, Parameters::CloneSpeed) {
            None => Ok(DEFAULT_CLONE_SPEED),
            Some(value) => value
                .parse::<u8>()
                .ok()
                .filter(|speed| (1..=4).contains(speed))
                .ok_or_else(|| invalid(format!("error config {value} for clonespeed"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use array_client::mock::MockArray;

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn plain_create_params() {
        let array = MockArray::new("local");
        array.add_pool("P1", 1 << 40);
        let params = VolumeParams::normalize(
            array.as_ref(),
            ProductFamily::Current,
            &args(&[("name", "v1"), ("storagepool", "P1"), ("capacity", "1073741824")]),
        )
        .await
        .unwrap();
        assert_eq!(params.name, "v1");
        assert_eq!(params.capacity, 1073741824);
        assert_eq!(params.alloc_type, AllocType::Thin);
        assert_eq!(params.mirror, Mirror::None);
        assert!(params.clone_source.is_none());
    }

    #[tokio::test]
    async fn thick_alloc_type() {
        let array = MockArray::new("local");
        array.add_pool("P1", 1 << 40);
        let params = VolumeParams::normalize(
            array.as_ref(),
            ProductFamily::Current,
            &args(&[
                ("name", "v1"),
                ("storagepool", "P1"),
                ("capacity", "1024"),
                ("alloctype", "thick"),
            ]),
        )
        .await
        .unwrap();
        assert_eq!(params.alloc_type, AllocType::Thick);
    }

    #[tokio::test]
    async fn conflicting_mirrors_fail_without_array_calls() {
        let array = MockArray::new("local");
        array.add_pool("P1", 1 << 40);
        let error = VolumeParams::normalize(
            array.as_ref(),
            ProductFamily::Current,
            &args(&[
                ("name", "v1"),
                ("storagepool", "P1"),
                ("capacity", "1024"),
                ("replication", "true"),
                ("hypermetro", "true"),
            ]),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, Error::InvalidParams { .. }));
        assert!(array.calls().is_empty());
    }

    #[tokio::test]
    async fn clone_speed_bounds() {
        let array = MockArray::new("local");
        array.add_pool("P1", 1 << 40);
        for speed in ["0", "5", "fast"] {
            let error = VolumeParams::normalize(
                array.as_ref(),
                ProductFamily::Current,
                &args(&[
                    ("name", "v1"),
                    ("storagepool", "P1"),
                    ("capacity", "1024"),
                    ("clonefrom", "v0"),
                    ("clonespeed", speed),
                ]),
            )
            .await
            .unwrap_err();
            assert!(matches!(error, Error::InvalidParams { .. }), "speed {speed}");
        }
        let params = VolumeParams::normalize(
            array.as_ref(),
            ProductFamily::Current,
            &args(&[
                ("name", "v1"),
                ("storagepool", "P1"),
                ("capacity", "1024"),
                ("clonefrom", "v0"),
            ]),
        )
        .await
        .unwrap();
        assert_eq!(params.clone_speed, 3);
    }

    #[tokio::test]
    async fn source_precedence() {
        let array = MockArray::new("local");
        array.add_pool("P1", 1 << 40);
        let params = VolumeParams::normalize(
            array.as_ref(),
            ProductFamily::Current,
            &args(&[
                ("name", "v1"),
                ("storagepool", "P1"),
                ("capacity", "1024"),
                ("sourcevolumename", "src-vol"),
                ("sourcesnapshotname", "src-snap"),
                ("clonefrom", "other"),
            ]),
        )
        .await
        .unwrap();
        assert_eq!(params.clone_source, Some(CloneSource::Lun("src_vol".to_string())));
    }

    #[tokio::test]
    async fn missing_pool_is_rejected() {
        let array = MockArray::new("local");
        let error = VolumeParams::normalize(
            array.as_ref(),
            ProductFamily::Current,
            &args(&[("name", "v1"), ("storagepool", "absent"), ("capacity", "1024")]),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn metro_requires_a_domain() {
        let array = MockArray::new("local");
        array.add_pool("P1", 1 << 40);
        let error = VolumeParams::normalize(
            array.as_ref(),
            ProductFamily::Current,
            &args(&[
                ("name", "v1"),
                ("storagepool", "P1"),
                ("capacity", "1024"),
                ("hypermetro", "true"),
                ("remotestoragepool", "RP1"),
            ]),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, Error::InvalidParams { .. }));
    }
}
