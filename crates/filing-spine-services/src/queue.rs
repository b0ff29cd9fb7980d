//! Queue service over the task_queue table: SKIP LOCKED consumption,
//! exponential-backoff retries, dead-letter quarantine, stuck-lock
//! recovery and the statistics the operators watch.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use filing_spine_core::models::{QueueTask, TaskStatus, UpdateQueueTask};
use filing_spine_core::schema::task_queue;
use filing_spine_core::{AppResult, DatabasePool};

/// Queue statistics for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub queue: String,
    pub total_tasks: i64,
    pub pending_tasks: i64,
    pub processing_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    pub retrying_tasks: i64,
    pub oldest_pending: Option<DateTime<Utc>>,
}

/// Get and lock the next task of a queue for a worker
pub async fn claim_next(
    pool: &DatabasePool,
    queue: &str,
    worker_id: &str,
) -> AppResult<Option<QueueTask>> {
    QueueTask::get_next_for_processing(pool, queue, worker_id).await
}

pub async fn complete(pool: &DatabasePool, task_id: Uuid) -> AppResult<()> {
    QueueTask::mark_completed(pool, task_id).await?;
    Ok(())
}

/// Release a claimed task back to pending without consuming an attempt
/// (clean surrender on shutdown).
pub async fn release(pool: &DatabasePool, task_id: Uuid) -> AppResult<()> {
    use task_queue::dsl;

    let mut conn = pool.get().await?;
    let update = UpdateQueueTask {
        status: Some(TaskStatus::Pending.to_string()),
        locked_by: Some(None),
        locked_at: Some(None),
        updated_at: Utc::now(),
        ..Default::default()
    };
    diesel::update(dsl::task_queue.filter(dsl::id.eq(task_id)))
        .set(&update)
        .execute(&mut conn)
        .await?;
    Ok(())
}

/// Record a failure: reschedule with exponential backoff while attempts
/// remain, otherwise move the task to the dead-letter store. Returns true
/// when the task was dead-lettered.
pub async fn retry_or_dead_letter(
    pool: &DatabasePool,
    task_id: Uuid,
    error_message: &str,
    backoff_base_seconds: u64,
) -> AppResult<bool> {
    use task_queue::dsl;

    let mut conn = pool.get().await?;
    let task: QueueTask = dsl::task_queue
        .filter(dsl::id.eq(task_id))
        .first(&mut conn)
        .await?;
    drop(conn);

    let new_retry_count = task.retry_count + 1;

    if new_retry_count >= task.max_retries {
        QueueTask::dead_letter(pool, &task, error_message).await?;
        let update = UpdateQueueTask {
            status: Some(TaskStatus::Failed.to_string()),
            retry_count: Some(new_retry_count),
            error_message: Some(error_message.to_string()),
            locked_by: Some(None),
            locked_at: Some(None),
            updated_at: Utc::now(),
            ..Default::default()
        };
        QueueTask::update(pool, task_id, &update).await?;
        tracing::warn!(
            queue = %task.queue,
            task_key = %task.task_key,
            retries = new_retry_count,
            "task exhausted retries, dead-lettered"
        );
        return Ok(true);
    }

    // Exponential backoff with +/-20% jitter, capped at an hour
    let base = backoff_base_seconds
        .saturating_mul(2_u64.pow(new_retry_count as u32))
        .min(3600);
    let jitter = (base as f64 * 0.2 * (rand::thread_rng().gen::<f64>() - 0.5)) as i64;
    let backoff_seconds = (base as i64 + jitter).max(1) as u64;
    let update = UpdateQueueTask {
        status: Some(TaskStatus::Retrying.to_string()),
        retry_count: Some(new_retry_count),
        error_message: Some(error_message.to_string()),
        scheduled_for: Some(Some(Utc::now() + Duration::seconds(backoff_seconds as i64))),
        locked_by: Some(None),
        locked_at: Some(None),
        updated_at: Utc::now(),
    };
    QueueTask::update(pool, task_id, &update).await?;
    Ok(false)
}

/// Tasks locked longer than the timeout belong to crashed workers; release
/// them back to pending. Returns the number recovered.
pub async fn unlock_stuck_tasks(pool: &DatabasePool, timeout_minutes: i64) -> AppResult<i64> {
    use task_queue::dsl;

    let mut conn = pool.get().await?;
    let cutoff = Utc::now() - Duration::minutes(timeout_minutes);

    let stuck: Vec<QueueTask> = dsl::task_queue
        .filter(dsl::status.eq("processing"))
        .filter(dsl::locked_at.is_not_null())
        .filter(dsl::locked_at.lt(cutoff))
        .load(&mut conn)
        .await?;
    drop(conn);

    let mut recovered = 0;
    for task in stuck {
        release(pool, task.id).await?;
        recovered += 1;
    }
    Ok(recovered)
}

/// Per-queue statistics for monitoring
pub async fn statistics(pool: &DatabasePool, queue: &str) -> AppResult<QueueStatistics> {
    use diesel::dsl::{count, min};
    use task_queue::dsl;

    let mut conn = pool.get().await?;

    let total_tasks: i64 = dsl::task_queue
        .filter(dsl::queue.eq(queue))
        .select(count(dsl::id))
        .first(&mut conn)
        .await?;

    let pending_tasks: i64 = dsl::task_queue
        .filter(dsl::queue.eq(queue))
        .filter(dsl::status.eq("pending"))
        .select(count(dsl::id))
        .first(&mut conn)
        .await?;

    let processing_tasks: i64 = dsl::task_queue
        .filter(dsl::queue.eq(queue))
        .filter(dsl::status.eq("processing"))
        .select(count(dsl::id))
        .first(&mut conn)
        .await?;

    let completed_tasks: i64 = dsl::task_queue
        .filter(dsl::queue.eq(queue))
        .filter(dsl::status.eq("completed"))
        .select(count(dsl::id))
        .first(&mut conn)
        .await?;

    let failed_tasks: i64 = dsl::task_queue
        .filter(dsl::queue.eq(queue))
        .filter(dsl::status.eq("failed"))
        .select(count(dsl::id))
        .first(&mut conn)
        .await?;

    let retrying_tasks: i64 = dsl::task_queue
        .filter(dsl::queue.eq(queue))
        .filter(dsl::status.eq("retrying"))
        .select(count(dsl::id))
        .first(&mut conn)
        .await?;

    let oldest_pending: Option<DateTime<Utc>> = dsl::task_queue
        .filter(dsl::queue.eq(queue))
        .filter(dsl::status.eq("pending"))
        .select(min(dsl::created_at))
        .first(&mut conn)
        .await?;

    Ok(QueueStatistics {
        queue: queue.to_string(),
        total_tasks,
        pending_tasks,
        processing_tasks,
        completed_tasks,
        failed_tasks,
        retrying_tasks,
        oldest_pending,
    })
}

/// Remove completed/failed tasks older than the retention window
pub async fn cleanup_old_tasks(pool: &DatabasePool, retention_days: i64) -> AppResult<i64> {
    use task_queue::dsl;

    let mut conn = pool.get().await?;
    let cutoff = Utc::now() - Duration::days(retention_days);

    let deleted = diesel::delete(
        dsl::task_queue
            .filter(dsl::status.eq_any(vec!["completed", "failed"]))
            .filter(dsl::updated_at.lt(cutoff)),
    )
    .execute(&mut conn)
    .await?;

    Ok(deleted as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filing_spine_core::models::{queues, DeadLetterTask, NewQueueTask};
    use filing_spine_core::test_utils::TestContainer;
    use serial_test::serial;

    fn task(key: &str, max_retries: i32) -> NewQueueTask {
        NewQueueTask {
            queue: queues::FILINGS_PARSE.to_string(),
            task_key: key.to_string(),
            payload: serde_json::json!({ "accession_number": key }),
            priority: 5,
            max_retries,
            scheduled_for: None,
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_retry_schedules_backoff_then_dead_letters() {
        // REQUIREMENT: Exponential backoff with bounded attempts; exhaustion
        // writes the task to the dead-letter store with its final error
        // PURPOSE: Walk a task through both retry outcomes

        let container = TestContainer::new().await;
        let pool = container.pool();

        let created = QueueTask::enqueue(pool, &task("sec:filing:1", 2))
            .await
            .unwrap()
            .unwrap();

        // First failure: rescheduled, not dead-lettered
        let dead = retry_or_dead_letter(pool, created.id, "connection reset", 2)
            .await
            .unwrap();
        assert!(!dead);

        let stats = statistics(pool, queues::FILINGS_PARSE).await.unwrap();
        assert_eq!(stats.retrying_tasks, 1);

        // Second failure exhausts max_retries = 2
        let dead = retry_or_dead_letter(pool, created.id, "connection reset again", 2)
            .await
            .unwrap();
        assert!(dead);

        let stats = statistics(pool, queues::FILINGS_PARSE).await.unwrap();
        assert_eq!(stats.failed_tasks, 1);
        assert_eq!(stats.retrying_tasks, 0);

        let dead_letters = DeadLetterTask::list(pool, Some(queues::FILINGS_PARSE), 10)
            .await
            .unwrap();
        assert_eq!(dead_letters.len(), 1);
        assert!(dead_letters[0].error_message.contains("again"));
    }

    #[tokio::test]
    #[serial]
    async fn test_retrying_task_waits_for_schedule() {
        // A retrying task with future scheduled_for is not claimable yet
        let container = TestContainer::new().await;
        let pool = container.pool();

        let created = QueueTask::enqueue(pool, &task("sec:filing:2", 5))
            .await
            .unwrap()
            .unwrap();
        retry_or_dead_letter(pool, created.id, "timeout", 60)
            .await
            .unwrap();

        let claimed = claim_next(pool, queues::FILINGS_PARSE, "worker-1")
            .await
            .unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_release_returns_task_without_consuming_attempt() {
        // REQUIREMENT: Cancellation surrenders cleanly; abandoned work keeps
        // its remaining attempts
        let container = TestContainer::new().await;
        let pool = container.pool();

        QueueTask::enqueue(pool, &task("sec:filing:3", 3))
            .await
            .unwrap();
        let claimed = claim_next(pool, queues::FILINGS_PARSE, "worker-1")
            .await
            .unwrap()
            .unwrap();

        release(pool, claimed.id).await.unwrap();

        let reclaimed = claim_next(pool, queues::FILINGS_PARSE, "worker-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.id, claimed.id);
        assert_eq!(reclaimed.retry_count, 0);
    }

    #[tokio::test]
    #[serial]
    async fn test_unlock_stuck_tasks() {
        // REQUIREMENT: Crashed workers' locks are recovered
        let container = TestContainer::new().await;
        let pool = container.pool();

        QueueTask::enqueue(pool, &task("sec:filing:4", 3))
            .await
            .unwrap();
        let claimed = claim_next(pool, queues::FILINGS_PARSE, "worker-gone")
            .await
            .unwrap()
            .unwrap();

        // Not stuck yet under a generous timeout
        assert_eq!(unlock_stuck_tasks(pool, 60).await.unwrap(), 0);

        // With a zero-minute timeout the lock counts as stale
        assert_eq!(unlock_stuck_tasks(pool, 0).await.unwrap(), 1);

        let reclaimed = claim_next(pool, queues::FILINGS_PARSE, "worker-new")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.id, claimed.id);
    }
}
