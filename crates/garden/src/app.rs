//! Main application logic and lifecycle management.
//!
//! This module contains the `Application` struct that wires the plant store,
//! the shard coordinator and the worker pool together, then drives the
//! phased shutdown that persists every partition before exit.

use crate::{cli::CliArgs, config::AppConfig, logging::display_banner, signals::{setup_signal_handlers, wait_for_signal}};
use garden_shard::rpc::Link;
use garden_shard::{
    DocumentStore, DurableStore, PeerId, SeedRegistry, ShardCoordinator, ShardExecutor, ShutdownState, WorkerId,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Main application struct.
///
/// Holds the merged configuration (file plus CLI overrides). Nothing is
/// started until [`Application::run`] or [`Application::start`] is called.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
}

/// The tasks behind one worker: its executor and the primary-side reader.
struct WorkerTasks {
    id: WorkerId,
    executor: JoinHandle<()>,
    reader: JoinHandle<()>,
}

/// A running garden: coordinator, worker pool and the periodic flush job.
pub struct Garden {
    coordinator: ShardCoordinator,
    shutdown: ShutdownState,
    workers: Vec<WorkerTasks>,
    flush_job: JoinHandle<()>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(workers) = args.workers {
            config.cluster.workers = workers;
        }

        if let Some(data_path) = args.data_path {
            config.storage.plants_path = data_path.to_string_lossy().to_string();
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        } else {
            info!("✅ Configuration loaded and validated successfully");
        }

        display_banner();
        info!(
            "📂 Config: {} | Store: {}",
            args.config_path.display(),
            config.storage.plants_path
        );

        Ok(Self { config })
    }

    /// Builds an application from an already merged configuration.
    pub fn from_config(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config
            .validate()
            .map_err(|e| format!("Configuration validation failed: {e}"))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Opens the store, spawns the worker pool and distributes the persisted
    /// plants over it.
    pub async fn start(&self) -> Result<Garden, Box<dyn std::error::Error>> {
        let seeds = Arc::new(self.config.seed_registry()?);
        info!("🌱 Registered {} seeds", seeds.len());

        let store = Arc::new(DocumentStore::open(&self.config.storage.plants_path));
        let loaded = store.load().await?;
        store.ensure_unique_index(&["x", "y"]).await?;
        info!("💾 Loaded {} plants from {}", loaded, self.config.storage.plants_path);

        let shutdown = ShutdownState::new();
        let coordinator = ShardCoordinator::new(store, self.config.coordinator_config(), shutdown.clone());

        let worker_count = self.config.worker_count();
        let workers = (1..=worker_count as u32)
            .map(|id| self.spawn_worker(&coordinator, &shutdown, WorkerId(id), seeds.clone()))
            .collect::<Vec<_>>();
        info!("👷 Spawned {} growth workers", workers.len());

        let accepted = coordinator.load_and_distribute().await?;
        info!("✅ {} of {} plants handed out", accepted, loaded);

        let flush_job = coordinator.spawn_flush_job();

        Ok(Garden {
            coordinator,
            shutdown,
            workers,
            flush_job,
        })
    }

    fn spawn_worker(
        &self,
        coordinator: &ShardCoordinator,
        shutdown: &ShutdownState,
        id: WorkerId,
        seeds: Arc<SeedRegistry>,
    ) -> WorkerTasks {
        let (primary_side, worker_side) = Link::pair(PeerId::Primary, PeerId::Worker(id));
        let (to_primary, inbox) = worker_side.split();

        let executor = ShardExecutor::new(id, seeds, to_primary, self.config.executor_config())
            .spawn(inbox, shutdown.clone());
        let reader = coordinator.attach_worker(id, primary_side);

        WorkerTasks { id, executor, reader }
    }

    /// Runs the garden until a termination signal arrives, then shuts it
    /// down gracefully. A second signal exits immediately.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Garden Application");
        self.log_configuration_summary();

        let garden = self.start().await?;

        info!("✅ Garden is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        setup_signal_handlers(&garden.shutdown).await?;

        // merciless shutdown
        tokio::spawn(async move {
            if let Err(e) = wait_for_signal().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }

            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        garden.stop().await;
        info!("👋 Garden shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🖥️ Workers: {}", self.config.worker_count());
        info!("  ⏱️ Min scheduler step: {}ms", self.config.cluster.min_step_ms);
        info!("  💾 Flush interval: {}s", self.config.cluster.flush_interval_secs);
        info!("  📦 Batch limit: {}", self.config.cluster.batch_limit);
        info!("  📝 Log level: {}", self.config.logging.level);
    }
}

impl Garden {
    pub fn coordinator(&self) -> &ShardCoordinator {
        &self.coordinator
    }

    pub fn shutdown_state(&self) -> &ShutdownState {
        &self.shutdown
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Posts every partition back to storage and waits for all tasks.
    pub async fn stop(self) {
        info!("🛑 Shutdown signal received, beginning graceful shutdown...");
        self.shutdown.initiate_shutdown();

        info!("📡 Phase 1: Collecting worker partitions...");
        for worker in self.workers {
            if let Err(e) = worker.executor.await {
                error!("❌ Executor for {} failed: {e}", worker.id);
            }
            if let Err(e) = worker.reader.await {
                error!("❌ Reader for {} failed: {e}", worker.id);
            }
        }

        info!("⏳ Phase 2: Stopping flush job...");
        if let Err(e) = self.flush_job.await {
            error!("❌ Flush job failed: {e}");
        }

        match self.coordinator.store().find(&garden_shard::Filter::All).await {
            Ok(docs) => info!("💾 {} plants persisted", docs.len()),
            Err(e) => warn!("⚠️ Could not count persisted plants: {e}"),
        }

        self.shutdown.complete_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garden_shard::{Filter, PlantRecord, Point};

    fn config_in(dir: &std::path::Path, workers: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.cluster.workers = workers;
        config.cluster.min_step_ms = 10;
        config.storage.plants_path = dir.join("plants.jsonl").to_string_lossy().to_string();
        config
    }

    fn wheat(x: i64, y: i64) -> PlantRecord {
        PlantRecord { x, y, seed: 0, stage: 0, dmg: false, last: 0 }
    }

    #[tokio::test]
    async fn test_new_applies_cli_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("garden.toml");
        let data_path = dir.path().join("world").join("plants.jsonl");

        let args = CliArgs {
            config_path: config_path.clone(),
            workers: Some(2),
            data_path: Some(data_path.clone()),
            log_level: Some("debug".to_string()),
            json_logs: true,
        };

        let app = Application::new(args).await.unwrap();
        assert!(config_path.exists());
        assert_eq!(app.config().worker_count(), 2);
        assert_eq!(app.config().storage.plants_path, data_path.to_string_lossy());
        assert_eq!(app.config().logging.level, "debug");
        assert!(app.config().logging.json_format);
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_override() {
        let dir = tempfile::tempdir().unwrap();
        let args = CliArgs {
            config_path: dir.path().join("garden.toml"),
            workers: None,
            data_path: None,
            log_level: Some("chatty".to_string()),
            json_logs: false,
        };

        assert!(Application::new(args).await.is_err());
    }

    #[tokio::test]
    async fn test_start_creates_store_and_spawns_workers() {
        let dir = tempfile::tempdir().unwrap();
        let app = Application::from_config(config_in(dir.path(), 3)).unwrap();

        let garden = app.start().await.unwrap();
        assert_eq!(garden.worker_count(), 3);
        assert_eq!(garden.coordinator().worker_ids().len(), 3);
        assert!(dir.path().join("plants.jsonl").exists());

        garden.stop().await;
    }

    #[tokio::test]
    async fn test_plants_survive_restart() {
        let dir = tempfile::tempdir().unwrap();

        let app = Application::from_config(config_in(dir.path(), 2)).unwrap();
        let garden = app.start().await.unwrap();
        let added = garden
            .coordinator()
            .add_plants(vec![wheat(1, 1), wheat(2, 2), wheat(3, 3)])
            .await
            .unwrap();
        assert_eq!(added.len(), 3);

        let shutdown = garden.shutdown_state().clone();
        garden.stop().await;
        assert!(shutdown.is_shutdown_complete());

        let app = Application::from_config(config_in(dir.path(), 2)).unwrap();
        let garden = app.start().await.unwrap();
        assert_eq!(garden.coordinator().plant_count().await, 3);
        assert!(garden.coordinator().has_plant(Point::new(2, 2)).await);

        let stored = garden.coordinator().store().find(&Filter::All).await.unwrap();
        assert_eq!(stored.len(), 3);
        garden.stop().await;
    }
}
