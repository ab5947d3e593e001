#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

mod cli;
mod config;
mod db;
mod identity;
mod pairing;
mod utils;
mod web;

use config::Config;
use web::WebServer;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let config = Arc::new(Config::load_from_file(&args.config)?);
    utils::logging::init_tracing(&config.logging);
    info!("mentor pairing service starting up");

    let db_manager = Arc::new(db::DatabaseManager::new(&config.database).await?);
    db_manager.migrate().await?;

    let verifier = identity::build_verifier(&config.auth);
    let core = Arc::new(pairing::PairingCore::new(db_manager.clone()));

    let web_server = WebServer::new(config, db_manager, core, verifier).await?;
    web_server.start().await?;

    info!("mentor pairing service shutting down");
    Ok(())
}
