//! Scheduling behaviour of the request queue under load.

use brona::cepik::FetchError;
use brona::fetch::{FetchTask, RequestQueue};
use futures::FutureExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};

fn server_error() -> FetchError {
    FetchError::Status {
        status: 500,
        url: "https://api.cepik.gov.pl/pojazdy".to_owned(),
        retry_after: None,
        reason: None,
        code: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_ceiling_holds_for_many_tasks() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let queue: RequestQueue<()> = RequestQueue::new(3);

    for i in 0..20u64 {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        queue.add(FetchTask::new(format!("task-{i}"), move || {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10 + (i % 4) * 15)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }));
    }
    queue.start();

    let summary = queue.wait_for_all().await;
    assert_eq!(summary.completed, 20);
    assert_eq!(peak.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retries_happen_inside_the_slot() {
    let attempts = Arc::new(AtomicU32::new(0));
    let queue: RequestQueue<u32> = RequestQueue::new(1);
    let start = Instant::now();

    let counter = attempts.clone();
    queue.add(FetchTask::new("flaky", move || {
        let counter = counter.clone();
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 { Err(server_error()) } else { Ok(n) }
        }
        .boxed()
    }));
    let follower_started = Arc::new(AtomicUsize::new(0));
    let flag = follower_started.clone();
    queue.add(FetchTask::new("follower", move || {
        flag.store(1, Ordering::SeqCst);
        async { Ok(0) }.boxed()
    }));
    queue.start();

    // The follower cannot start while the flaky task is backing off.
    sleep(Duration::from_millis(2500)).await;
    assert_eq!(follower_started.load(Ordering::SeqCst), 0);

    let summary = queue.wait_for_all().await;
    assert_eq!(summary.completed, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_task_reports_last_error() {
    let queue: RequestQueue<()> = RequestQueue::new(2);
    queue.add(
        FetchTask::new("down", || async { Err(server_error()) }.boxed()).max_attempts(2),
    );
    queue.start();

    let progress = queue.subscribe();
    let summary = queue.wait_for_all().await;
    assert_eq!(summary.failed, 1);
    assert!(summary.errors["down"].contains("500"));
    assert_eq!(progress.borrow().failed, 1);
    assert_eq!(progress.borrow().percent_complete, 0);
}
