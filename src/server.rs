use crate::config::WorkerConfig;
use anyhow::{Context, Result};
use clap::crate_name;
use log::{debug, info};
use rankode_broker::{Broker, BrokerConfig, S3ObjectStore};
use rankode_catalog::LanguageCatalog;
use rankode_engine::SandboxEngine;
use rankode_sandbox::{cgroup::CgroupManager, ContainerPool};
use std::{env, sync::Arc};
use tokio::signal::unix::{signal, SignalKind};

const ROOT_CGROUP_NAME: &str = "rankode-worker";
const REQUEST_QUEUE: &str = "rankode-req";
const RESPONSE_QUEUE: &str = "rankode-resp";

/// Server is the main instance tying the catalog, sandbox, engine and
/// broker adapter together into one running process.
pub struct Server {
    config: WorkerConfig,
}

impl Server {
    pub fn new(config: WorkerConfig) -> Self {
        Server { config }
    }

    pub async fn start(self) -> Result<()> {
        self.set_logging_verbosity().context("set logging verbosity")?;

        let cgroups = CgroupManager::init(ROOT_CGROUP_NAME).context("initialize root cgroup")?;

        let catalog = Arc::new(LanguageCatalog::new(self.config.scripts_root().clone()));

        let pool_size = self.config.resolved_containers_pool_size();
        let scratch_root = std::env::temp_dir().join("rankode-worker");
        let pool = ContainerPool::build(pool_size, &scratch_root).context("build container pool")?;
        info!("container pool ready with {} containers", pool_size);

        let engine = Arc::new(SandboxEngine::new(catalog, pool, cgroups));

        let store = Arc::new(
            S3ObjectStore::new(
                self.config.object_store_endpoint(),
                self.config.object_store_access_key(),
                self.config.object_store_secret_key(),
                self.config.object_store_bucket(),
            )
            .await,
        );

        let broker = Broker::new(
            BrokerConfig {
                amqp_url: self.config.amqp_url(),
                request_queue: REQUEST_QUEUE.to_owned(),
                response_queue: RESPONSE_QUEUE.to_owned(),
                workers_count: self.config.resolved_workers_count(),
            },
            engine.clone(),
            store,
        );

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let broker_task = tokio::spawn(async move { broker.run(shutdown_rx).await });

        let mut shutdown_terminate = signal(SignalKind::terminate())?;
        let mut shutdown_interrupt = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = shutdown_interrupt.recv() => {
                info!("got interrupt signal, shutting down");
            }
            _ = shutdown_terminate.recv() => {
                info!("got termination signal, shutting down");
            }
        }

        // Stop accepting new deliveries; the broker finishes its current
        // iteration (including any in-flight `run` call) before returning.
        let _ = shutdown_tx.send(true);
        broker_task.await.context("join broker task")?.context("run broker adapter")?;

        match Arc::try_unwrap(engine) {
            Ok(engine) => engine.shutdown().context("drain container pool")?,
            Err(_) => debug!("engine still has live references at shutdown; skipping pool drain"),
        }

        self.cleanup()
    }

    fn set_logging_verbosity(&self) -> Result<()> {
        env::set_var("RUST_LOG", format!("{}={}", crate_name!(), self.config.log_level()));
        env_logger::try_init().context("init env logger")
    }

    fn cleanup(self) -> Result<()> {
        debug!("cleaning up server");
        Ok(())
    }
}
