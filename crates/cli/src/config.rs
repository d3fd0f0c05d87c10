//! Command-line configuration.
//!
//! Flags override the YAML file given with `--config`; anything set in
//! neither place takes the built-in default.

use anyhow::Context;
use clap::{Parser, Subcommand};
use corelib::config::{load_config, ClusterConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chainfs")]
#[command(about = "Replicated block store with chain replication", long_about = None)]
pub struct CliConfig {
    /// Cluster configuration file (YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the name service
    Namenode {
        /// Address to listen on
        #[arg(long)]
        listen: Option<String>,

        /// Replicas per block
        #[arg(long)]
        replication: Option<u32>,

        /// Block size in bytes
        #[arg(long)]
        block_size: Option<u64>,
    },

    /// Run a storage node
    Datanode {
        #[arg(long)]
        listen: Option<String>,

        /// Address peers and clients dial; defaults to --listen
        #[arg(long)]
        advertise: Option<String>,

        /// Node name; must be unique in the cluster
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        rack: Option<String>,

        /// Directory holding replica files
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Name service address
        #[arg(long)]
        namenode: Option<String>,
    },

    /// Upload a local file
    Put {
        /// Local file to read
        local: PathBuf,

        /// Name to store it under; defaults to the local file name
        remote: Option<String>,

        #[arg(long)]
        namenode: Option<String>,
    },

    /// Download a stored file
    Get {
        remote: String,

        /// Where to write it; defaults to the remote name
        local: Option<PathBuf>,

        #[arg(long)]
        namenode: Option<String>,
    },

    /// List stored files
    Ls {
        #[arg(long)]
        namenode: Option<String>,
    },
}

impl CliConfig {
    /// The configuration file (or defaults) with this command's flags applied.
    pub fn cluster_config(&self) -> anyhow::Result<ClusterConfig> {
        let mut cfg = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ClusterConfig::default(),
        };

        match &self.command {
            Command::Namenode {
                listen,
                replication,
                block_size,
            } => {
                override_with(&mut cfg.namenode.listen, listen);
                override_with(&mut cfg.namenode.replication, replication);
                override_with(&mut cfg.namenode.block_size, block_size);
                cfg.namenode.validate()?;
            }
            Command::Datanode {
                listen,
                advertise,
                name,
                rack,
                data_dir,
                namenode,
            } => {
                override_with(&mut cfg.datanode.listen, listen);
                override_with(&mut cfg.datanode.data_dir, data_dir);
                override_with(&mut cfg.datanode.namenode_addr, namenode);
                if advertise.is_some() {
                    cfg.datanode.advertise = advertise.clone();
                }
                if name.is_some() {
                    cfg.datanode.name = name.clone();
                }
                if rack.is_some() {
                    cfg.datanode.rack = rack.clone();
                }
            }
            Command::Put { namenode, .. }
            | Command::Get { namenode, .. }
            | Command::Ls { namenode } => {
                override_with(&mut cfg.client.namenode_addr, namenode);
            }
        }
        Ok(cfg)
    }
}

fn override_with<T: Clone>(field: &mut T, flag: &Option<T>) {
    if let Some(value) = flag {
        *field = value.clone();
    }
}
