use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tantofs::cadapter::{ConnectionPool, KvConnector, MemoryConnector};
use tantofs::cli::{Cli, Commands};
use tantofs::config::BackendConfig;
use tantofs::fuse::TantoFuse;
use tantofs::fuse::mount::mount_unprivileged;
use tantofs::store::ObjectStore;
use tantofs::vfs::path::normalize;
use tantofs::vfs::{FileStat, TantoFs};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let backend = BackendConfig::from(&cli.backend);

    match cli.command {
        Commands::Mount { mountpoint, memory } => {
            if memory {
                info!("using in-memory backend");
                let fs = TantoFs::new(ConnectionPool::new(MemoryConnector::new())).await?;
                run_mount(fs, &mountpoint).await
            } else {
                info!(backend = %backend, "using key-value backend");
                let fs = TantoFs::new(backend.pool())
                    .await
                    .with_context(|| format!("failed to initialise filesystem on {backend}"))?;
                run_mount(fs, &mountpoint).await
            }
        }
        Commands::Keys { pattern } => {
            let pool = backend.pool();
            let mut conn = pool.get().await.with_context(|| format!("failed to reach {backend}"))?;
            let keys = ObjectStore::new(&mut *conn).list_keys(&pattern).await?;
            for key in keys {
                println!("{key}");
            }
            Ok(())
        }
        Commands::Stat { path } => {
            let pool = backend.pool();
            let mut conn = pool.get().await.with_context(|| format!("failed to reach {backend}"))?;
            let key_path = normalize(&path)?;
            let obj = ObjectStore::new(&mut *conn)
                .read_metadata(key_path)
                .await
                .with_context(|| format!("stat {path}"))?;
            print_stat(&path, &FileStat::from(&obj));
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TANTOFS_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_mount<C: KvConnector>(fs: TantoFs<C>, mountpoint: &Path) -> Result<()> {
    let mut mount_handle = mount_unprivileged(TantoFuse::new(fs), mountpoint)
        .await
        .with_context(|| format!("failed to mount at {}", mountpoint.display()))?;
    info!(mountpoint = %mountpoint.display(), "mounted");

    let handle = &mut mount_handle;
    tokio::select! {
        res = handle => {
            res?;
            Ok(())
        },
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl-C")?;
            info!("unmounting");
            mount_handle.unmount().await?;
            Ok(())
        }
    }
}

fn print_stat(path: &str, st: &FileStat) {
    println!("  path: {path}");
    println!("  kind: {:?}", st.kind);
    println!("  mode: {:o}", st.mode);
    println!(" inode: {}", st.ino);
    println!("   uid: {}  gid: {}", st.uid, st.gid);
    println!("  size: {} ({} blocks of {})", st.size, st.blocks, st.blksize);
}
