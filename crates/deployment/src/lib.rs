use std::sync::Arc;

use chkd_services::{Clock, MergeArbiter, Migrator, SuggestionProvider, WorkerSpawner};
use chkd_utils::config::ChkdConfig;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use uuid::Uuid;

/// The seam the transport and MCP layers depend on instead of reaching into
/// concrete infrastructure directly (§U2). A single process only ever needs
/// `chkd-local-deployment`'s implementation, but routes and tool handlers are
/// written against this trait so a future non-local deployment doesn't
/// require touching them.
#[async_trait::async_trait]
pub trait Deployment: Send + Sync + 'static {
    fn pool(&self) -> &SqlitePool;

    fn config(&self) -> &ChkdConfig;

    fn clock(&self) -> &dyn Clock;

    fn suggestion_provider(&self) -> &dyn SuggestionProvider;

    fn merge_arbiter(&self) -> &MergeArbiter;

    fn worker_spawner(&self) -> &WorkerSpawner;

    fn migrator(&self) -> &Migrator;

    /// Per-repo advisory lock serializing merge-affecting operations against
    /// the same checkout (§5).
    async fn merge_lock(&self, repo_id: Uuid) -> Arc<Mutex<()>>;

    /// Releases background resources (heartbeat sweeper, pool) on shutdown.
    async fn shutdown(&self);
}
