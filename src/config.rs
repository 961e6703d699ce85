//! Configuration related structures
use clap::{AppSettings, Clap};
use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Builder, Clap, CopyGetters, Getters, Deserialize, Serialize)]
#[builder(default, pattern = "owned", setter(into))]
#[serde(rename_all = "kebab-case")]
#[clap(
    after_help("More info at: https://github.com/saschagrunert/rankode"),
    global_setting(AppSettings::ColoredHelp)
)]
/// rankode-worker - sandboxed multi-language grading worker
pub struct WorkerConfig {
    #[get_copy = "pub"]
    #[clap(
        default_value("info"),
        env("RANKODE_LOG_LEVEL"),
        long("log-level"),
        possible_values(&["trace", "debug", "info", "warn", "error", "off"]),
        short('l'),
        value_name("LEVEL")
    )]
    /// The logging level of the application
    log_level: LevelFilter,

    #[get = "pub"]
    #[clap(default_value("languages"), env("RANKODE_SCRIPTS_ROOT"), long("scripts-root"))]
    /// Root directory of the per-language build/run descriptors
    scripts_root: PathBuf,

    #[get_copy = "pub"]
    #[clap(default_value("0"), env("RANKODE_CONTAINERS_POOL_SIZE"), long("containers-pool-size"))]
    /// Number of warm containers to keep pooled; 0 means one per logical CPU
    containers_pool_size: usize,

    #[get = "pub"]
    #[clap(default_value("127.0.0.1"), env("RABBIT_HOST"), long("rabbit-host"))]
    /// RabbitMQ host
    rabbit_host: String,

    #[get_copy = "pub"]
    #[clap(default_value("5672"), env("RABBIT_PORT"), long("rabbit-port"))]
    /// RabbitMQ port
    rabbit_port: u16,

    #[get = "pub"]
    #[clap(env("RABBIT_USER"), long("rabbit-user"))]
    /// RabbitMQ username
    rabbit_user: String,

    #[get = "pub"]
    #[clap(env("RABBIT_PASSWORD"), long("rabbit-password"))]
    /// RabbitMQ password
    rabbit_password: String,

    #[get = "pub"]
    #[clap(default_value("127.0.0.1:9000"), env("OBJECT_STORE_ENDPOINT"), long("object-store-endpoint"))]
    /// Endpoint of the S3-compatible object store
    object_store_endpoint: String,

    #[get = "pub"]
    #[clap(env("OBJECT_STORE_ACCESS_KEY"), long("object-store-access-key"))]
    /// Object store access key
    object_store_access_key: String,

    #[get = "pub"]
    #[clap(env("OBJECT_STORE_SECRET_KEY"), long("object-store-secret-key"))]
    /// Object store secret key
    object_store_secret_key: String,

    #[get = "pub"]
    #[clap(default_value("tasks"), env("OBJECT_STORE_BUCKET"), long("object-store-bucket"))]
    /// Object store bucket holding test inputs and verification files
    object_store_bucket: String,

    #[get_copy = "pub"]
    #[clap(default_value("0"), env("WORKERS_COUNT"), long("workers-count"))]
    /// Number of concurrent in-flight broker deliveries; 0 means one per logical CPU
    workers_count: usize,
}

impl WorkerConfig {
    /// Resolves `containers_pool_size`, defaulting to the number of logical
    /// CPUs when the configured value is zero.
    pub fn resolved_containers_pool_size(&self) -> usize {
        resolve_cpu_default(self.containers_pool_size)
    }

    /// Resolves `workers_count`, defaulting to the number of logical CPUs
    /// when the configured value is zero.
    pub fn resolved_workers_count(&self) -> usize {
        resolve_cpu_default(self.workers_count)
    }

    pub fn amqp_url(&self) -> String {
        format!("amqp://{}:{}@{}:{}/%2f", self.rabbit_user, self.rabbit_password, self.rabbit_host, self.rabbit_port)
    }
}

fn resolve_cpu_default(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_config() -> anyhow::Result<()> {
        let c = WorkerConfigBuilder::default()
            .log_level(LevelFilter::Warn)
            .rabbit_user("guest")
            .rabbit_password("guest")
            .object_store_access_key("key")
            .object_store_secret_key("secret")
            .build()?;

        assert_eq!(c.log_level(), LevelFilter::Warn);
        assert_eq!(c.rabbit_user(), "guest");

        Ok(())
    }

    #[test]
    fn zero_pool_size_resolves_to_cpu_count() {
        let c = WorkerConfigBuilder::default()
            .rabbit_user("guest")
            .rabbit_password("guest")
            .object_store_access_key("key")
            .object_store_secret_key("secret")
            .containers_pool_size(0usize)
            .build()
            .unwrap();

        assert!(c.resolved_containers_pool_size() >= 1);
    }

    #[test]
    fn nonzero_pool_size_is_kept_verbatim() {
        let c = WorkerConfigBuilder::default()
            .rabbit_user("guest")
            .rabbit_password("guest")
            .object_store_access_key("key")
            .object_store_secret_key("secret")
            .containers_pool_size(7usize)
            .build()
            .unwrap();

        assert_eq!(c.resolved_containers_pool_size(), 7);
    }
}
