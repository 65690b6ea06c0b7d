mod auth;
mod checkpoint;
mod error;
mod gmail;
mod pagination;
mod permissions;
mod provider;
mod rate_limit;
mod runner;
mod storage;

use std::time::Duration;

use lodestone_bus::{AmqpBus, MessageBus, SyncJob, SYNC_SUBJECTS};
use lodestone_config::{get_var_or, init_tracing, AppConfig};
use lodestone_db::connector::pg_repository::PgConnectorRepository;

use crate::runner::SyncRunner;
use crate::storage::FsStore;

const CONSUME_SUBJECT: &str = "connector.sync.gmail";
const RECEIVE_BATCH: usize = 1;

#[tokio::main]
async fn main() {
    init_tracing("info");

    let config = AppConfig::from_env().expect("failed to load config");
    tracing::info!(service = "lodestone-connector", "starting");

    let pool = lodestone_db::create_pool(&config.database_url)
        .await
        .expect("failed to connect to database");
    let bus = AmqpBus::connect(&config.amqp_url, SYNC_SUBJECTS)
        .await
        .expect("failed to connect to message bus");

    let data_dir = get_var_or("DATA_DIR", "./data");
    let bucket = get_var_or("STORAGE_BUCKET", "lodestone");
    let runner = SyncRunner::new(
        PgConnectorRepository::new(pool.clone()),
        FsStore::new(data_dir),
        bucket,
    );

    tracing::info!(subject = CONSUME_SUBJECT, "consuming sync jobs");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
            batch = bus.receive(CONSUME_SUBJECT, RECEIVE_BATCH) => {
                let batch = match batch {
                    Ok(batch) => batch,
                    Err(e) => {
                        tracing::error!(error = %e, "receive failed, backing off");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };
                for (payload, receipt) in batch {
                    handle_delivery(&runner, &bus, &payload, &receipt).await;
                }
            }
        }
    }

    let _ = bus.close().await;
    pool.close().await;
}

async fn handle_delivery<R, S>(
    runner: &SyncRunner<R, S>,
    bus: &AmqpBus,
    payload: &[u8],
    receipt: &str,
) where
    R: lodestone_db::connector::repositories::ConnectorRepository,
    S: storage::ObjectStore,
{
    let job: SyncJob = match serde_json::from_slice(payload) {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(error = %e, "malformed sync job, dropping");
            let _ = bus.nack(receipt, false).await;
            return;
        }
    };

    // Terminal status is persisted either way; retries happen on the next
    // scheduled cycle, not through redelivery.
    match runner.handle_job(&job).await {
        Ok(outcome) => {
            tracing::info!(
                connector_id = job.connector_id,
                source_type = %outcome.source_type,
                stored = outcome.stored,
                deleted = outcome.deleted,
                errors = outcome.errors,
                "sync completed"
            );
        }
        Err(e) => {
            tracing::error!(
                connector_id = job.connector_id,
                error = %e,
                "sync failed"
            );
        }
    }
    if let Err(e) = bus.ack(receipt).await {
        tracing::error!(error = %e, "failed to ack delivery");
    }
}
