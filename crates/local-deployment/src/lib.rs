use std::path::Path;
use std::sync::Arc;

use chkd_deployment::Deployment;
use chkd_services::{
    heartbeat, Clock, GitWorktreeDriver, MergeArbiter, Migrator, NullSuggestionProvider,
    SuggestionProvider, SystemClock, WorkerSpawner,
};
use chkd_utils::config::ChkdConfig;
use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

struct Inner {
    pool: SqlitePool,
    config: ChkdConfig,
    clock: SystemClock,
    suggestions: NullSuggestionProvider,
    merge_arbiter: MergeArbiter,
    worker_spawner: WorkerSpawner,
    migrator: Migrator,
    merge_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    sweeper: JoinHandle<()>,
}

/// Owns every concrete resource a single local process needs: the pool, the
/// services built on top of it, the heartbeat sweeper task, and the per-repo
/// merge mutex map (§U3). Cheap to `Clone` (an `Arc` bump) so it can sit
/// directly in axum's `State`, mirroring how the transport layer expects
/// `DeploymentImpl` to be passed around.
#[derive(Clone)]
pub struct LocalDeployment {
    inner: Arc<Inner>,
}

impl LocalDeployment {
    pub async fn open(config: ChkdConfig) -> Result<Self, chkd_db::StoreError> {
        let store = chkd_db::Store::open(&config.data_dir).await?;
        Ok(Self::from_pool(store.pool, config))
    }

    pub async fn open_in_memory() -> Result<Self, chkd_db::StoreError> {
        let store = chkd_db::Store::open_in_memory().await?;
        Ok(Self::from_pool(store.pool, ChkdConfig::default()))
    }

    fn from_pool(pool: SqlitePool, config: ChkdConfig) -> Self {
        let driver = Arc::new(GitWorktreeDriver);
        let merge_arbiter = MergeArbiter::new(pool.clone(), driver.clone(), config.git_concurrency);
        let worker_spawner = WorkerSpawner::new(pool.clone(), driver, config.git_concurrency);
        let migrator = Migrator::new(pool.clone());

        let sweep_pool = pool.clone();
        let sweep_interval = config.heartbeat_sweep_ms;
        let sweep_threshold = config.heartbeat_threshold_ms as i64;
        let sweeper = tokio::spawn(heartbeat::run_heartbeat_sweeper(
            sweep_pool,
            sweep_interval,
            sweep_threshold,
        ));

        Self {
            inner: Arc::new(Inner {
                pool,
                config,
                clock: SystemClock,
                suggestions: NullSuggestionProvider,
                merge_arbiter,
                worker_spawner,
                migrator,
                merge_locks: DashMap::new(),
                sweeper,
            }),
        }
    }

    pub async fn run_migration(
        &self,
        repo_id: Uuid,
        repo_path: &Path,
        spec_file: &str,
    ) -> Result<chkd_services::MigrationReport, chkd_services::MigrationError> {
        self.inner.migrator.migrate(repo_id, repo_path, spec_file).await
    }
}

#[async_trait::async_trait]
impl Deployment for LocalDeployment {
    fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    fn config(&self) -> &ChkdConfig {
        &self.inner.config
    }

    fn clock(&self) -> &dyn Clock {
        &self.inner.clock
    }

    fn suggestion_provider(&self) -> &dyn SuggestionProvider {
        &self.inner.suggestions
    }

    fn merge_arbiter(&self) -> &MergeArbiter {
        &self.inner.merge_arbiter
    }

    fn worker_spawner(&self) -> &WorkerSpawner {
        &self.inner.worker_spawner
    }

    fn migrator(&self) -> &Migrator {
        &self.inner.migrator
    }

    async fn merge_lock(&self, repo_id: Uuid) -> Arc<Mutex<()>> {
        self.inner
            .merge_locks
            .entry(repo_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn shutdown(&self) {
        self.inner.sweeper.abort();
        self.inner.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn merge_lock_is_stable_per_repo() {
        let deployment = LocalDeployment::open_in_memory().await.unwrap();
        let repo_id = Uuid::new_v4();
        let a = deployment.merge_lock(repo_id).await;
        let b = deployment.merge_lock(repo_id).await;
        assert!(Arc::ptr_eq(&a, &b));
        deployment.shutdown().await;
    }

    #[tokio::test]
    async fn clone_shares_the_same_pool() {
        let deployment = LocalDeployment::open_in_memory().await.unwrap();
        let clone = deployment.clone();
        assert!(Arc::ptr_eq(&deployment.inner, &clone.inner));
        deployment.shutdown().await;
    }
}
