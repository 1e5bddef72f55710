#![allow(dead_code)]

mod database;
mod encode;
mod ipalloc;
mod remote;
mod service;
mod template;
mod ui;

use clap::Parser;
use database::Database;
use service::Provisioner;
use tracing::warn;

#[derive(Debug, Parser)]
struct Config {
    #[clap(long, short, env = "DB", value_parser)]
    db: String,
    #[clap(flatten)]
    service: service::Config,

    #[clap(flatten)]
    api: ui::web::Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    pretty_env_logger::init();

    let config = Config::parse();

    let database = Database::new(&config.db).await?;

    let service = Provisioner::new(config.service, database);

    for f in ui::run(config.api, service) {
        f.await??;

        warn!("frontend stopped")
    }

    Ok(())
}
