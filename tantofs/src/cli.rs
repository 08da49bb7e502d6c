use crate::cadapter::pool::DEFAULT_MAX_IDLE;
use crate::cadapter::resp::{DEFAULT_HOST, DEFAULT_PORT};
use crate::config::BackendConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tantofs", version, about = "Object filesystem on a Redis-compatible store", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct BackendArgs {
    /// Backend host
    #[arg(long, global = true, env = "TANTOFS_BACKEND_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Backend port
    #[arg(short, long, global = true, env = "TANTOFS_BACKEND_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Idle backend connections kept for reuse
    #[arg(long, global = true, env = "TANTOFS_MAX_IDLE", default_value_t = DEFAULT_MAX_IDLE)]
    pub max_idle: usize,
}

impl From<&BackendArgs> for BackendConfig {
    fn from(args: &BackendArgs) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
            max_idle: args.max_idle,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Mount the filesystem; unmounts on Ctrl-C")]
    Mount {
        #[arg(value_name = "MOUNTPOINT")]
        mountpoint: PathBuf,

        /// Keep everything in process memory instead of the backend
        #[arg(long)]
        memory: bool,
    },
    #[command(about = "List backend keys matching a glob pattern")]
    Keys {
        #[arg(value_name = "PATTERN", default_value = "*")]
        pattern: String,
    },
    #[command(about = "Print the attributes of a path")]
    Stat {
        #[arg(value_name = "PATH")]
        path: String,
    },
}
