use std::time::Duration;

use pricetrawl::{JobQueue, Marketplace, RetryOutcome, RetryPolicy, ScrapeError, ordinal_for};

fn policy(max_attempts: u32, backoff: Duration) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff_base: backoff,
        failed_job_retention: 100,
    }
}

async fn memory_queue(p: RetryPolicy) -> JobQueue {
    JobQueue::connect("sqlite::memory:", p)
        .await
        .expect("in-memory queue")
}

#[tokio::test]
async fn higher_priority_is_claimed_first() {
    let queue = memory_queue(policy(3, Duration::from_millis(10))).await;
    queue
        .enqueue("low", "https://www.amazon.com/dp/B000000001", Marketplace::Amazon, "B000000001", 0)
        .await
        .unwrap();
    queue
        .enqueue("urgent", "https://www.amazon.com/dp/B000000002", Marketplace::Amazon, "B000000002", 10)
        .await
        .unwrap();

    let first = queue.dequeue().await.unwrap().expect("a job");
    assert_eq!(first.product_id, "urgent");
    let second = queue.dequeue().await.unwrap().expect("a job");
    assert_eq!(second.product_id, "low");
}

// Priority is stored inverted; downstream consumers depend on the stored
// ordering, so the mapping is pinned here.
#[test]
fn priority_maps_to_inverted_ordinal() {
    assert_eq!(ordinal_for(10), -10);
    assert_eq!(ordinal_for(0), 0);
    assert!(ordinal_for(10) < ordinal_for(0));
    assert!(ordinal_for(0) < ordinal_for(-5));
}

#[tokio::test]
async fn claimed_job_is_invisible_to_other_workers() {
    let queue = memory_queue(policy(3, Duration::from_millis(10))).await;
    queue
        .enqueue("p1", "https://www.etsy.com/listing/1111", Marketplace::Etsy, "1111", 0)
        .await
        .unwrap();

    let job = queue.dequeue().await.unwrap().expect("a job");
    assert!(queue.dequeue().await.unwrap().is_none());
    queue.complete(&job).await.unwrap();
    assert_eq!(queue.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn retry_backs_off_before_the_job_is_due_again() {
    let queue = memory_queue(policy(5, Duration::from_secs(60))).await;
    queue
        .enqueue("p1", "https://www.otto.de/p/12345678", Marketplace::Otto, "12345678", 0)
        .await
        .unwrap();

    let job = queue.dequeue().await.unwrap().expect("a job");
    let outcome = queue
        .retry(&job, &ScrapeError::TransientNetwork("timeout".into()))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RetryOutcome::Requeued {
            attempt: 1,
            delay: Duration::from_secs(60),
        }
    );

    // Due a minute from now, so not claimable yet.
    assert!(queue.dequeue().await.unwrap().is_none());
    assert_eq!(queue.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn attempts_exhaust_into_exactly_one_terminal_failure() {
    let queue = memory_queue(policy(2, Duration::ZERO)).await;
    queue
        .enqueue("p1", "https://www.amazon.de/dp/B000000003", Marketplace::Amazon, "B000000003", 0)
        .await
        .unwrap();

    let job = queue.dequeue().await.unwrap().expect("a job");
    let outcome = queue
        .retry(&job, &ScrapeError::Blocked("captcha".into()))
        .await
        .unwrap();
    match outcome {
        RetryOutcome::Requeued { attempt: 1, delay } => assert_eq!(delay, Duration::ZERO),
        other => panic!("expected first retry to requeue, got {other:?}"),
    }

    let job = queue.dequeue().await.unwrap().expect("job due immediately");
    assert_eq!(job.attempts, 1);
    let outcome = queue
        .retry(&job, &ScrapeError::Blocked("captcha".into()))
        .await
        .unwrap();
    assert_eq!(outcome, RetryOutcome::TerminallyFailed);

    assert!(queue.dequeue().await.unwrap().is_none());
    let failed = queue.failed_jobs(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].product_id, "p1");
    assert_eq!(failed[0].error_kind.as_deref(), Some("blocked"));
}

#[tokio::test]
async fn permanent_failure_skips_the_retry_budget() {
    let queue = memory_queue(policy(5, Duration::ZERO)).await;
    queue
        .enqueue("p1", "https://www.etsy.com/listing/2222", Marketplace::Etsy, "2222", 0)
        .await
        .unwrap();

    let job = queue.dequeue().await.unwrap().expect("a job");
    queue
        .fail_permanent(&job, &ScrapeError::PermanentParse("no such listing".into()))
        .await
        .unwrap();

    assert!(queue.dequeue().await.unwrap().is_none());
    let failed = queue.failed_jobs(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_kind.as_deref(), Some("permanent_parse"));
}

#[tokio::test]
async fn running_jobs_are_recovered_after_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("queue.db").display());

    {
        let queue = JobQueue::connect(&url, policy(3, Duration::ZERO))
            .await
            .unwrap();
        queue
            .enqueue("p1", "https://www.amazon.com/dp/B000000004", Marketplace::Amazon, "B000000004", 0)
            .await
            .unwrap();
        // Claim it and "crash" without completing.
        let job = queue.dequeue().await.unwrap().expect("a job");
        assert_eq!(job.product_id, "p1");
    }

    let queue = JobQueue::connect(&url, policy(3, Duration::ZERO))
        .await
        .unwrap();
    let job = queue.dequeue().await.unwrap().expect("recovered job");
    assert_eq!(job.product_id, "p1");
}

#[tokio::test]
async fn failed_jobs_carry_the_marketplace_native_id() {
    let queue = memory_queue(policy(1, Duration::ZERO)).await;
    queue
        .enqueue("p1", "https://www.amazon.de/dp/B0EXAMPLE1", Marketplace::Amazon, "B0EXAMPLE1", 0)
        .await
        .unwrap();

    let job = queue.dequeue().await.unwrap().expect("a job");
    assert_eq!(job.marketplace_id, "B0EXAMPLE1");
    queue
        .retry(&job, &ScrapeError::TransientNetwork("timeout".into()))
        .await
        .unwrap();

    let failed = queue.failed_jobs(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].marketplace, "amazon");
    assert_eq!(failed[0].marketplace_id, "B0EXAMPLE1");
}

// A resubmitted job starts with its prior attempts already counted, so the
// remaining retry budget shrinks instead of resetting.
#[tokio::test]
async fn resubmission_keeps_the_spent_retry_budget() {
    let queue = memory_queue(policy(3, Duration::ZERO)).await;
    queue
        .enqueue_with_attempts(
            "p1",
            "https://www.otto.de/p/87654321",
            Marketplace::Otto,
            "87654321",
            0,
            2,
        )
        .await
        .unwrap();

    let job = queue.dequeue().await.unwrap().expect("a job");
    assert_eq!(job.attempts, 2);
    let outcome = queue
        .retry(&job, &ScrapeError::TransientNetwork("timeout".into()))
        .await
        .unwrap();
    assert_eq!(outcome, RetryOutcome::TerminallyFailed);
}
