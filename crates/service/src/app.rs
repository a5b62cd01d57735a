//! The application object.
//!
//! Owns one store, one version registry and one scheduler for the life of the
//! process. Callers reach them through named accessors or the delegating
//! helpers below.

use std::time::Duration;

use common::api::ApiClient;
use common::ROLLAR_VERSION;
use configs::AppConfig;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::errors::ServiceError;
use crate::scheduler::{JobHandle, Scheduler};
use crate::storage::KvStore;
use crate::versions::VersionRegistry;

/// Endpoint asked once at startup to run the web API's startup tasks.
pub const STARTUP_PATH: &str = "/api/startup_tasks";

pub struct Rollar {
    config: AppConfig,
    store: KvStore,
    versions: VersionRegistry,
    scheduler: Scheduler,
    api: ApiClient,
    refresh_job: JobHandle,
}

impl Rollar {
    /// Resolve and open the database, seed the version registry and register
    /// background jobs. Nothing runs until [`Rollar::startup`].
    pub async fn bootstrap(config: AppConfig, runtime: Handle) -> Result<Self, ServiceError> {
        let descriptor = models::db::resolve(&config.database)?;
        info!(engine = descriptor.engine.name(), url = %descriptor, "opening key-value store");
        let store = KvStore::open(&descriptor, &config.database.pool).await?;

        let versions = VersionRegistry::bootstrap(config.web.version.clone());

        let timeout = Duration::from_secs(config.server.request_timeout_secs);
        let api = ApiClient::new(config.api_base(), timeout, runtime)
            .map_err(|e| ServiceError::Runtime(e.to_string()))?;

        let scheduler = Scheduler::new();
        let refresh_job = versions.schedule_refresh(&scheduler, api.clone());

        Ok(Self { config, store, versions, scheduler, api, refresh_job })
    }

    /// Trigger the web API's startup tasks and start the scheduler thread.
    /// An unreachable web API is logged, not fatal.
    pub async fn startup(&self) -> Result<(), ServiceError> {
        match self.api.get(STARTUP_PATH).await {
            Ok(_) => info!(path = STARTUP_PATH, "startup tasks triggered"),
            Err(e) => warn!(path = STARTUP_PATH, error = %e, "startup tasks call failed"),
        }
        self.scheduler.run().map_err(|e| ServiceError::Runtime(e.to_string()))?;
        info!(version = ROLLAR_VERSION, jobs = self.scheduler.job_count(), "rollar started");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    pub fn versions(&self) -> &VersionRegistry {
        &self.versions
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn refresh_job(&self) -> &JobHandle {
        &self.refresh_job
    }

    pub fn version(&self) -> &'static str {
        ROLLAR_VERSION
    }

    pub async fn get_value(&self, entity: &str, key: &str) -> Result<Option<Value>, ServiceError> {
        self.store.get(entity, key).await
    }

    pub async fn set_value<V: Serialize + ?Sized>(&self, entity: &str, key: &str, value: &V) -> Result<(), ServiceError> {
        self.store.set(entity, key, value).await
    }

    pub async fn delete_value(&self, entity: &str, key: &str) -> Result<bool, ServiceError> {
        self.store.delete(entity, key).await
    }

    /// Stop the scheduler and close the connection pool.
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        // Joining waits for an in-flight job; keep it off the async workers.
        let scheduler = self.scheduler.clone();
        tokio::task::spawn_blocking(move || scheduler.shutdown())
            .await
            .map_err(|e| ServiceError::Runtime(e.to_string()))?;
        self.store.close().await?;
        info!("rollar stopped");
        Ok(())
    }
}
