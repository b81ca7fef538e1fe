mod config;
mod db;
mod evaluator;
mod notify;
mod types;
mod webhook;

use config::Config;
use db::SqliteStore;
use env_logger::Env;
use evaluator::{Rules, SpeedEvaluator};
use log::{error, info};
use notify::NtfyNotifier;
use std::sync::Arc;

#[macro_use]
extern crate failure;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting kamerafyr-server");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Could not load configuration: {}", e);
            return;
        }
    };

    info!("Opening database {}", config.db_path.display());
    let store = match SqliteStore::open(&config.db_path) {
        Ok(store) => store,
        Err(e) => {
            error!("Could not open database {}: {}", config.db_path.display(), e);
            return;
        }
    };

    let notifier = match NtfyNotifier::new(config.ntfy_url.clone(), config.ntfy_timeout) {
        Ok(notifier) => notifier,
        Err(e) => {
            error!("Could not build ntfy client: {}", e);
            return;
        }
    };

    let evaluator = Arc::new(SpeedEvaluator::new(
        Box::new(store),
        Box::new(notifier),
        Rules {
            store_after_expiry: config.store_after_expiry,
            ..Rules::default()
        },
    ));
    webhook::run(evaluator, config.port).await;
    info!("Exiting main");
}
