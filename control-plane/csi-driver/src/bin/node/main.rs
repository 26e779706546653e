//! Node-side attach helper for the array CSI driver. Stages block devices
//! and NAS shares onto kubelet target paths, serializing per-device work
//! through an exclusive file lock.

use clap::Arg;
use csi_driver::filesystem::FileSystem;
use std::{path::Path, str::FromStr};
use tracing::info;

mod error;
mod filesystem_ops;
mod flock;
mod initiator;
mod mount;

use error::NodeError;
use flock::Flock;
use mount::{AttachRequest, SourceType};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = clap::Command::new("csi-node")
        .about("Node-side volume attach helper")
        .subcommand_required(true)
        .subcommand(
            clap::Command::new("attach")
                .about("Stage a block device or NAS share onto a target path")
                .arg(
                    Arg::new("type")
                        .long("type")
                        .value_parser(["block", "fs"])
                        .default_value("block")
                        .help("What the source path points at"),
                )
                .arg(
                    Arg::new("source")
                        .long("source")
                        .required(true)
                        .help("Block device path or remote share address"),
                )
                .arg(
                    Arg::new("target")
                        .long("target")
                        .required(true)
                        .help("Mount target path"),
                )
                .arg(
                    Arg::new("fs-type")
                        .long("fs-type")
                        .default_value("ext4")
                        .help("Filesystem type for block devices"),
                )
                .arg(
                    Arg::new("options")
                        .long("options")
                        .help("Extra mount options"),
                )
                .arg(
                    Arg::new("lock-dir")
                        .long("lock-dir")
                        .default_value("/var/lock/csi-node")
                        .help("Directory holding the per-device lock files"),
                ),
        )
        .subcommand(
            clap::Command::new("detach")
                .about("Unmount a target path")
                .arg(Arg::new("target").long("target").required(true)),
        )
        .subcommand(
            clap::Command::new("identity")
                .about("Print the host initiator identities"),
        )
        .get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match matches.subcommand() {
        Some(("attach", args)) => attach(args).await?,
        Some(("detach", args)) => {
            let target = args.get_one::<String>("target").expect("required arg");
            mount::detach(target).await?;
            info!(target = target.as_str(), "detached");
        }
        Some(("identity", _)) => identity().await?,
        _ => unreachable!("subcommand is required"),
    }
    Ok(())
}

async fn attach(args: &clap::ArgMatches) -> anyhow::Result<()> {
    let source = args.get_one::<String>("source").expect("required arg");
    let target = args.get_one::<String>("target").expect("required arg");
    let fs_arg = args.get_one::<String>("fs-type").expect("defaulted arg");
    let fs_type = FileSystem::from_str(fs_arg).map_err(|_| NodeError::UnsupportedFilesystem {
        fs: fs_arg.to_string(),
    })?;
    let source_type = match args.get_one::<String>("type").expect("defaulted arg").as_str() {
        "fs" => SourceType::Filesystem,
        _ => SourceType::Block,
    };

    let request = AttachRequest {
        source_type,
        source: source.clone(),
        target: target.clone(),
        fs_type,
        mount_flags: args.get_one::<String>("options").cloned(),
    };

    // One lock per source device, shared with any concurrent kubelet
    // request for the same device.
    let lock_dir = args.get_one::<String>("lock-dir").expect("defaulted arg");
    std::fs::create_dir_all(lock_dir)?;
    let device = Path::new(source)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| source.replace('/', "_"));
    let mut lock = Flock::new(Path::new(lock_dir).join(format!("{device}.lock")));
    lock.lock()?;
    let result = mount::attach(&request).await;
    lock.unlock();
    result?;
    info!(source = source.as_str(), target = target.as_str(), "attached");
    Ok(())
}

async fn identity() -> anyhow::Result<()> {
    match initiator::iscsi_initiator().await {
        Ok(iqn) => println!("iscsi: {iqn}"),
        Err(NodeError::NoInitiator { .. }) => {}
        Err(error) => return Err(error.into()),
    }
    match initiator::fc_initiators().await {
        Ok(ports) => {
            for port in ports {
                println!("fc: {port}");
            }
        }
        Err(NodeError::NoInitiator { .. }) => {}
        Err(error) => return Err(error.into()),
    }
    match initiator::nvme_host_nqn().await {
        Ok(nqn) => println!("nvme: {nqn}"),
        Err(NodeError::NoInitiator { .. }) => {}
        Err(error) => return Err(error.into()),
    }
    Ok(())
}
