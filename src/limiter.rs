//! Bounded-concurrency execution of a batch of futures.
//!
//! Every task waits for a permit from a pool of `max_concurrency` permits
//! before it is polled for the first time, and gives the permit back as soon
//! as it resolves. All tasks are driven from the caller's task, so nothing
//! here needs to be `Send` and nothing is spawned onto the runtime.

use std::future::Future;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;
use tracing::trace;

/// What to do when one task of a batch fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorMode {
    /// Stop at the first failure and return it. Tasks still waiting or
    /// running are dropped.
    #[default]
    Propagate,
    /// Run every task and keep each failure in its own slot.
    Capture,
}

#[derive(Debug, Error)]
pub enum BoundedError<E> {
    #[error("max concurrency must be at least 1, got {0}")]
    InvalidArgument(usize),

    #[error("task {index} failed: {source}")]
    Task {
        index: usize,
        #[source]
        source: E,
    },
}

/// Runs `tasks` with at most `max_concurrency` of them in flight at once.
///
/// The returned vector has one entry per task, in submission order, no
/// matter which task finished first. With [`ErrorMode::Propagate`] every
/// entry is `Ok`, because the first failure is returned as
/// [`BoundedError::Task`] instead.
pub async fn run_bounded<I, F, T, E>(
    tasks: I,
    max_concurrency: usize,
    mode: ErrorMode,
) -> Result<Vec<Result<T, E>>, BoundedError<E>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    if max_concurrency == 0 {
        return Err(BoundedError::InvalidArgument(max_concurrency));
    }

    let tasks: Vec<F> = tasks.into_iter().collect();
    if tasks.is_empty() {
        return Ok(Vec::new());
    }

    let total = tasks.len();
    debug!(total, max_concurrency, ?mode, "running batch");

    let permits = Semaphore::new(max_concurrency);
    let mut in_flight: FuturesUnordered<_> = tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| {
            let permits = &permits;
            async move {
                // The pool lives only for this call and is never closed.
                let permit = permits.acquire().await.ok();
                trace!(index, "permit acquired");
                let outcome = task.await;
                drop(permit);
                trace!(index, ok = outcome.is_ok(), "permit released");
                (index, outcome)
            }
        })
        .collect();

    let mut slots: Vec<Option<Result<T, E>>> = (0..total).map(|_| None).collect();

    while let Some((index, outcome)) = in_flight.next().await {
        match outcome {
            Err(source) if mode == ErrorMode::Propagate => {
                debug!(index, "task failed, dropping the rest of the batch");
                return Err(BoundedError::Task { index, source });
            }
            outcome => slots[index] = Some(outcome),
        }
    }

    // Each future in the set yields exactly once, so every slot is filled.
    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::convert::Infallible;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::SeqCst;
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_max_concurrency() {
        for cap in 1..=4 {
            let running = AtomicUsize::new(0);
            let peak = AtomicUsize::new(0);

            let tasks = (0..10u64).map(|i| {
                let (running, peak) = (&running, &peak);
                async move {
                    let now = running.fetch_add(1, SeqCst) + 1;
                    peak.fetch_max(now, SeqCst);
                    sleep(Duration::from_millis(5 + i % 3)).await;
                    running.fetch_sub(1, SeqCst);
                    Ok::<_, Infallible>(i)
                }
            });

            let results = run_bounded(tasks, cap, ErrorMode::Propagate).await.unwrap();
            assert_eq!(results.len(), 10);
            assert_eq!(peak.load(SeqCst), cap);
            assert_eq!(running.load(SeqCst), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_submission_order() {
        let finished = RefCell::new(Vec::new());
        let latencies = [50u64, 10, 1, 30, 5];

        let tasks = latencies.iter().enumerate().map(|(i, &ms)| {
            let finished = &finished;
            async move {
                sleep(Duration::from_millis(ms)).await;
                finished.borrow_mut().push(i + 1);
                Ok::<_, Infallible>(i + 1)
            }
        });

        let results: Vec<usize> = run_bounded(tasks, 2, ErrorMode::Propagate)
            .await
            .unwrap()
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(results, vec![1, 2, 3, 4, 5]);

        let finished = finished.into_inner();
        let pos = |n| finished.iter().position(|&x| x == n).unwrap();
        assert!(pos(3) < pos(1), "task 3 should finish before task 1: {finished:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn capture_keeps_failures_in_place() {
        let tasks = (0..6u32).map(|i| async move {
            sleep(Duration::from_millis(u64::from(6 - i))).await;
            if i % 3 == 1 {
                Err(format!("boom {i}"))
            } else {
                Ok(i * 10)
            }
        });

        let results = run_bounded(tasks, 2, ErrorMode::Capture).await.unwrap();

        assert_eq!(results.len(), 6);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 2);
        assert_eq!(results[0], Ok(0));
        assert_eq!(results[1], Err("boom 1".to_string()));
        assert_eq!(results[2], Ok(20));
        assert_eq!(results[3], Ok(30));
        assert_eq!(results[4], Err("boom 4".to_string()));
        assert_eq!(results[5], Ok(50));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_releases_its_permit() {
        let tasks = (0..4u32).map(|i| async move {
            sleep(Duration::from_millis(1)).await;
            if i == 0 {
                Err("first")
            } else {
                Ok(i)
            }
        });

        let results = run_bounded(tasks, 1, ErrorMode::Capture).await.unwrap();
        assert_eq!(results, vec![Err("first"), Ok(1), Ok(2), Ok(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn propagate_returns_first_observed_failure() {
        let slow_done = AtomicBool::new(false);

        let tasks: Vec<_> = [(30u64, Err("slow")), (10, Err("fast")), (100, Ok(()))]
            .into_iter()
            .enumerate()
            .map(|(i, (ms, outcome))| {
                let slow_done = &slow_done;
                async move {
                    sleep(Duration::from_millis(ms)).await;
                    if i == 2 {
                        slow_done.store(true, SeqCst);
                    }
                    outcome
                }
            })
            .collect();

        let err = run_bounded(tasks, 3, ErrorMode::Propagate)
            .await
            .unwrap_err();

        match err {
            BoundedError::Task { index, source } => {
                assert_eq!(index, 1);
                assert_eq!(source, "fast");
            }
            other => panic!("unexpected error: {other}"),
        }

        // Remaining tasks were dropped with the batch.
        sleep(Duration::from_millis(200)).await;
        assert!(!slow_done.load(SeqCst));
    }

    #[tokio::test]
    async fn empty_batch() {
        let tasks: Vec<std::future::Ready<Result<(), Infallible>>> = Vec::new();
        let results = run_bounded(tasks, 1, ErrorMode::Propagate).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected_before_polling() {
        let polled = AtomicBool::new(false);
        let tasks = (0..3).map(|_| {
            let polled = &polled;
            async move {
                polled.store(true, SeqCst);
                Ok::<_, Infallible>(())
            }
        });

        let err = run_bounded(tasks, 0, ErrorMode::Capture).await.unwrap_err();
        assert!(matches!(err, BoundedError::InvalidArgument(0)));
        assert!(!polled.load(SeqCst));
    }
}
