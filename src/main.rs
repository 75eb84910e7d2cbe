use std::process;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use ffs::fs::fuse_adapter::FuseAdapter;
use ffs::store::mem::MemStore;
use ffs::{Filesystem, FsOptions};

/// Mounts a POSIX filesystem backed by a distributed, CAS-versioned
/// key-value store.
#[derive(Parser, Debug)]
#[command(name = "ffs", version, about)]
struct Cli {
    /// Directory to mount the filesystem at.
    mountpoint: String,

    /// etcd endpoint to use as the backing store. Without this flag, an
    /// in-process, non-persistent store is used instead.
    #[arg(long, value_name = "URL")]
    #[cfg(feature = "etcd")]
    endpoint: Option<String>,

    /// Maximum number of optimistic-transaction retries before a call
    /// gives up with a conflict error.
    #[arg(long, default_value_t = ffs::stm::DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Run in the foreground instead of daemonizing.
    #[arg(long)]
    foreground: bool,
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let options = FsOptions { max_retries: cli.max_retries, ..FsOptions::default() };

    #[cfg(feature = "etcd")]
    if let Some(endpoint) = cli.endpoint.as_deref() {
        info!("connecting to etcd at {endpoint}");
        let store = ffs::store::etcd::connect_single(endpoint)?;
        let fs = Filesystem::new(store, options);
        return mount(fs, &cli.mountpoint, cli.foreground);
    }

    let store = Arc::new(MemStore::new());
    let fs = Filesystem::new(store, options);
    mount(fs, &cli.mountpoint, cli.foreground)
}

fn mount<S: ffs::store::Store + 'static>(
    fs: Filesystem<S>,
    mountpoint: &str,
    foreground: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let adapter = FuseAdapter::new(fs);
    let mut mount_options = vec![fuser::MountOption::FSName("ffs".to_string())];
    if foreground {
        mount_options.push(fuser::MountOption::AutoUnmount);
    }
    info!("mounting at {mountpoint}");
    fuser::mount2(adapter, mountpoint, &mount_options)?;
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        error!("ffs exited with error: {err}");
        process::exit(1);
    }
}
