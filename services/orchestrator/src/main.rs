mod error;
mod health;
mod runtime;
mod service;
mod settings;

use lodestone_config::init_tracing;

use crate::runtime::Orchestrator;
use crate::settings::Settings;

#[tokio::main]
async fn main() {
    init_tracing("info");

    let settings = Settings::from_env().expect("failed to load settings");
    tracing::info!(service = "lodestone-orchestrator", "starting");

    let mut orchestrator = Orchestrator::new(settings);
    orchestrator
        .start()
        .await
        .expect("failed to start orchestrator");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");
    orchestrator.shutdown().await;
}
