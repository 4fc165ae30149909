use chkd_db::models::signal::{EmitSignal, Signal, SignalType};
use chkd_db::models::worker::Worker;
use chkd_db::StoreError;
use sqlx::SqlitePool;

/// Default staleness threshold for the liveness sweep (§4.4): two minutes
/// without a heartbeat write.
pub const DEFAULT_STALE_THRESHOLD_MS: i64 = 2 * 60 * 1000;

/// Scans workers still `working`/`merging` whose heartbeat has gone quiet and
/// emits a `warning` signal for each, deduplicated at the producer so a
/// worker already carrying an undismissed warning is skipped.
pub async fn sweep_stale_workers(pool: &SqlitePool, threshold_ms: i64) -> Result<usize, StoreError> {
    let stale = Worker::stale(pool, threshold_ms).await?;
    let mut emitted = 0;

    for worker in stale {
        if Signal::has_active_warning_for_worker(pool, &worker.id).await? {
            continue;
        }

        Signal::emit(
            pool,
            &EmitSignal {
                repo_id: worker.repo_id,
                worker_id: Some(worker.id.clone()),
                kind: SignalType::Warning,
                message: format!("Worker {} has not sent a heartbeat recently", worker.id),
                details: None,
                action_required: true,
                action_options: Some(vec!["resume".into(), "stop".into()]),
            },
        )
        .await?;
        emitted += 1;
    }

    Ok(emitted)
}

/// Runs the sweep on a fixed interval until the process shuts down,
/// logging and continuing on a single failed tick rather than aborting.
pub async fn run_heartbeat_sweeper(pool: SqlitePool, interval_ms: u64, threshold_ms: i64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
    loop {
        ticker.tick().await;
        match sweep_stale_workers(&pool, threshold_ms).await {
            Ok(count) if count > 0 => {
                tracing::info!(count, "heartbeat sweep emitted liveness warnings");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "heartbeat sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chkd_db::models::repository::{CreateRepository, Repository};
    use chkd_db::models::worker::{CreateWorker, WorkerStatus};
    use chkd_db::store::Store;

    #[tokio::test]
    async fn dedupes_repeated_warnings() {
        let store = Store::open_in_memory().await.unwrap();
        let repo = Repository::create(
            &store.pool,
            &CreateRepository {
                absolute_path: "/tmp/repo".into(),
                display_name: "repo".into(),
                default_branch: None,
            },
        )
        .await
        .unwrap();

        let worker = Worker::create(
            &store.pool,
            &CreateWorker {
                repo_id: repo.id,
                username: "alex".into(),
                task_id: None,
                task_title: None,
            },
        )
        .await
        .unwrap();
        Worker::transition(&store.pool, &worker.id, WorkerStatus::Waiting).await.unwrap();
        Worker::transition(&store.pool, &worker.id, WorkerStatus::Working).await.unwrap();

        sqlx::query("UPDATE workers SET heartbeat_at = ? WHERE id = ?")
            .bind(chrono::Utc::now() - chrono::Duration::minutes(5))
            .bind(&worker.id)
            .execute(&store.pool)
            .await
            .unwrap();

        let first = sweep_stale_workers(&store.pool, DEFAULT_STALE_THRESHOLD_MS).await.unwrap();
        assert_eq!(first, 1);

        let second = sweep_stale_workers(&store.pool, DEFAULT_STALE_THRESHOLD_MS).await.unwrap();
        assert_eq!(second, 0);
    }
}
