//! Command line and environment configuration for the server.

use crate::auth::TokenIssuer;
use chrono::Duration;
use clap::Parser;
use kvs::{KvStore, MemStore, RecordStore};
use log::warn;
use rand::Rng;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

/// CLI arguments for the server
#[derive(Debug, Parser)]
#[command(name = "kvs-server")]
#[command(about = "Authenticated HTTP key-value store", author, version)]
pub struct CliArgs {
    /// Address to listen on
    #[arg(long, env = "KVS_ADDR", default_value = "127.0.0.1:8000")]
    pub addr: SocketAddr,

    /// Directory holding the record and user logs
    #[arg(long, env = "KVS_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Keep everything in memory (for testing)
    #[arg(long, env = "KVS_IN_MEMORY", default_value = "false")]
    pub in_memory: bool,

    /// Token signing key; a random one is generated when unset
    #[arg(long, env = "KVS_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Lifetime of access tokens
    #[arg(long, env = "KVS_ACCESS_TOKEN_MINUTES", default_value = "30")]
    pub access_token_minutes: i64,

    /// Lifetime of refresh tokens
    #[arg(long, env = "KVS_REFRESH_TOKEN_HOURS", default_value = "24")]
    pub refresh_token_hours: i64,
}

/// Where records and users are kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    InMemory,
    Disk { data_dir: PathBuf },
}

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub storage: StorageConfig,
    pub secret_key: Option<String>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            storage: StorageConfig::InMemory,
            secret_key: None,
            access_ttl: Duration::minutes(30),
            refresh_ttl: Duration::days(1),
        }
    }
}

impl From<&CliArgs> for ServerConfig {
    fn from(args: &CliArgs) -> Self {
        let storage = if args.in_memory {
            StorageConfig::InMemory
        } else {
            StorageConfig::Disk {
                data_dir: args.data_dir.clone(),
            }
        };

        Self {
            addr: args.addr,
            storage,
            secret_key: args.secret_key.clone(),
            access_ttl: Duration::minutes(args.access_token_minutes),
            refresh_ttl: Duration::hours(args.refresh_token_hours),
        }
    }
}

impl ServerConfig {
    /// Open the record store and the user store
    pub fn open_stores(&self) -> kvs::Result<(Arc<dyn RecordStore>, Arc<dyn RecordStore>)> {
        match &self.storage {
            StorageConfig::InMemory => Ok((Arc::new(MemStore::new()), Arc::new(MemStore::new()))),
            StorageConfig::Disk { data_dir } => Ok((
                Arc::new(KvStore::open(data_dir.join("records"))?),
                Arc::new(KvStore::open(data_dir.join("users"))?),
            )),
        }
    }

    /// Build the token issuer, generating a signing key if none is configured
    pub fn token_issuer(&self) -> TokenIssuer {
        let secret = match &self.secret_key {
            Some(key) => key.as_bytes().to_vec(),
            None => {
                warn!("No secret key configured, tokens will not survive a restart");
                rand::thread_rng().gen::<[u8; 32]>().to_vec()
            }
        };

        TokenIssuer::new(secret, self.access_ttl, self.refresh_ttl)
    }
}
