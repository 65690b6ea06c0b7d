//! The orchestrator's resilience shell: it owns the health server, the
//! dependency connections, a supervised set of reconnection tasks, and the
//! periodic scheduler loop. A dependency outage degrades readiness and is
//! retried in the background; it never takes the process down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use lodestone_bus::{AmqpBus, SYNC_SUBJECTS};
use lodestone_common::error::LodestoneResult;
use lodestone_db::connector::pg_repository::PgConnectorRepository;

use crate::health::{self, HealthState};
use crate::service::OrchestratorService;
use crate::settings::Settings;

/// Connection slots shared between the scheduler loop and the reconnection
/// tasks. Each retry task owns exactly one slot and flips exactly one flag.
struct Dependencies {
    pool: RwLock<Option<PgPool>>,
    bus: RwLock<Option<AmqpBus>>,
    db_connected: AtomicBool,
    bus_connected: AtomicBool,
}

impl Dependencies {
    fn new() -> Self {
        Self {
            pool: RwLock::new(None),
            bus: RwLock::new(None),
            db_connected: AtomicBool::new(false),
            bus_connected: AtomicBool::new(false),
        }
    }
}

/// Readiness is the conjunction of all dependency connections.
fn readiness(deps: &Dependencies) -> bool {
    deps.db_connected.load(Ordering::SeqCst) && deps.bus_connected.load(Ordering::SeqCst)
}

fn refresh_readiness(deps: &Dependencies, health: &HealthState) {
    health.set_ready(readiness(deps));
}

pub struct Orchestrator {
    settings: Settings,
    health: HealthState,
    deps: Arc<Dependencies>,
    shutdown_tx: watch::Sender<bool>,
    retry_tasks: Vec<JoinHandle<()>>,
    scheduler: Option<JoinHandle<()>>,
    health_task: Option<JoinHandle<()>>,
    running: bool,
}

impl Orchestrator {
    pub fn new(settings: Settings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            settings,
            health: HealthState::new(),
            deps: Arc::new(Dependencies::new()),
            shutdown_tx,
            retry_tasks: Vec::new(),
            scheduler: None,
            health_task: None,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn db_connected(&self) -> bool {
        self.deps.db_connected.load(Ordering::SeqCst)
    }

    pub fn bus_connected(&self) -> bool {
        self.deps.bus_connected.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    pub fn retry_task_count(&self) -> usize {
        self.retry_tasks.len()
    }

    /// Bring the orchestrator up. The health probe starts first so
    /// infrastructure checks pass before dependencies are ready; each failed
    /// dependency connection spawns an independent background retry loop
    /// instead of aborting startup; the scheduler starts regardless.
    pub async fn start(&mut self) -> LodestoneResult<()> {
        if !self.settings.enabled {
            tracing::warn!("orchestrator disabled, not starting");
            return Ok(());
        }

        self.health_task = Some(health::serve(&self.settings.health_addr, self.health.clone()).await?);

        match lodestone_db::create_pool(&self.settings.database_url).await {
            Ok(pool) => {
                *self.deps.pool.write().await = Some(pool);
                self.deps.db_connected.store(true, Ordering::SeqCst);
                tracing::info!("database connected");
            }
            Err(e) => {
                tracing::error!(error = %e, "database unavailable at startup, retrying in background");
                self.spawn_db_retry();
            }
        }

        match AmqpBus::connect(&self.settings.amqp_url, SYNC_SUBJECTS).await {
            Ok(bus) => {
                *self.deps.bus.write().await = Some(bus);
                self.deps.bus_connected.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::error!(error = %e, "message bus unavailable at startup, retrying in background");
                self.spawn_bus_retry();
            }
        }

        refresh_readiness(&self.deps, &self.health);

        let deps = self.deps.clone();
        let shutdown = self.shutdown_tx.subscribe();
        let interval = Duration::from_secs(self.settings.check_interval_secs);
        self.scheduler = Some(tokio::spawn(scheduler_loop(deps, shutdown, interval)));

        self.running = true;
        tracing::info!(
            check_interval_secs = self.settings.check_interval_secs,
            ready = self.is_ready(),
            "orchestrator started"
        );
        Ok(())
    }

    fn spawn_db_retry(&mut self) {
        let deps = self.deps.clone();
        let health = self.health.clone();
        let url = self.settings.database_url.clone();
        let interval = Duration::from_secs(self.settings.retry_interval_secs);
        let mut shutdown = self.shutdown_tx.subscribe();

        self.retry_tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {
                        match lodestone_db::create_pool(&url).await {
                            Ok(pool) => {
                                *deps.pool.write().await = Some(pool);
                                deps.db_connected.store(true, Ordering::SeqCst);
                                refresh_readiness(&deps, &health);
                                tracing::info!("database connection established");
                                return;
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "database retry failed");
                            }
                        }
                    }
                }
            }
        }));
    }

    fn spawn_bus_retry(&mut self) {
        let deps = self.deps.clone();
        let health = self.health.clone();
        let url = self.settings.amqp_url.clone();
        let interval = Duration::from_secs(self.settings.retry_interval_secs);
        let mut shutdown = self.shutdown_tx.subscribe();

        self.retry_tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {
                        match AmqpBus::connect(&url, SYNC_SUBJECTS).await {
                            Ok(bus) => {
                                *deps.bus.write().await = Some(bus);
                                deps.bus_connected.store(true, Ordering::SeqCst);
                                refresh_readiness(&deps, &health);
                                tracing::info!("message bus connection established");
                                return;
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "message bus retry failed");
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Cancel the supervised tasks, mark not ready, then close the bus and
    /// the datastore, in that order, so in-flight health checks fail fast.
    pub async fn shutdown(&mut self) {
        tracing::info!("orchestrator shutting down");
        let _ = self.shutdown_tx.send(true);

        for task in self.retry_tasks.drain(..) {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                abort.abort();
            }
        }
        if let Some(task) = self.scheduler.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                abort.abort();
            }
        }

        self.health.set_ready(false);
        if let Some(task) = self.health_task.take() {
            task.abort();
        }

        if let Some(bus) = self.deps.bus.write().await.take() {
            let _ = bus.close().await;
        }
        self.deps.bus_connected.store(false, Ordering::SeqCst);

        if let Some(pool) = self.deps.pool.write().await.take() {
            pool.close().await;
        }
        self.deps.db_connected.store(false, Ordering::SeqCst);

        self.running = false;
        tracing::info!("orchestrator stopped");
    }
}

/// One periodic timer drives the check-and-trigger cycle. Cycles run
/// sequentially, so a slow cycle delays the next instead of overlapping it.
async fn scheduler_loop(
    deps: Arc<Dependencies>,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                run_cycle(&deps).await;
            }
        }
    }
}

async fn run_cycle(deps: &Dependencies) {
    let pool = deps.pool.read().await.clone();
    let bus = deps.bus.read().await.clone();
    let (Some(pool), Some(bus)) = (pool, bus) else {
        tracing::debug!("dependencies not ready, skipping sync check");
        return;
    };

    let service = OrchestratorService::new(PgConnectorRepository::new(pool), bus);
    match service.check_and_trigger_syncs().await {
        Ok(0) => {}
        Ok(triggered) => tracing::info!(triggered, "dispatched sync jobs"),
        Err(e) => tracing::error!(error = %e, "sync check failed"),
    }
}
