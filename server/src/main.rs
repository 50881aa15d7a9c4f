use clap::Parser;
use eyre::Result;
use kvs_server::{
    config::{CliArgs, ServerConfig, StorageConfig},
    http::{self, AppState},
};
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = CliArgs::parse();
    let config = ServerConfig::from(&args);

    match &config.storage {
        StorageConfig::InMemory => info!("Using in-memory storage"),
        StorageConfig::Disk { data_dir } => info!("Opening stores in {}", data_dir.display()),
    }
    let (records, users) = config.open_stores()?;

    let state = AppState::new(records, users, config.token_issuer());
    http::serve(config.addr, state).await?;

    Ok(())
}
