//! The bounded-parallel execution engine from spec.md §4.2.
//!
//! Grounded on the teacher's `evaluations::process_batch` (see
//! `examples/tensorzero-tensorzero/evaluations/src/lib.rs`), which spawns
//! one task per item behind a `tokio::sync::Semaphore` and collects results
//! from a `JoinSet`. We add order preservation (the teacher's `JoinSet` is
//! itself unordered and relies on a side `task_id_map`; here we thread the
//! index through the future itself and sort at the end instead), staggered
//! starts via a mutex-guarded delay, and cooperative cancellation checks at
//! every suspension point named in spec.md §5.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::error::Error;

/// Probe for cooperative cancellation (spec.md §4.1, §5). Implemented by the
/// job worker's in-memory cancelled-job set.
#[async_trait::async_trait]
pub trait CancellationProbe: Send + Sync {
    async fn is_cancelled(&self, job_id: uuid::Uuid) -> bool;
}

/// Per-item outcome: either the worker's result, or the reason it never ran
/// or failed. Order in the output vector always matches the input order
/// (spec.md §4.2 invariant 1, §8 testable property).
pub enum ItemOutcome<T> {
    Ok(T),
    Err(Error),
}

impl<T> ItemOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

pub struct ProgressUpdate<'a> {
    pub completed: usize,
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
    pub message: &'a str,
}

pub fn default_message(ok: usize, errors: usize, completed: usize, total: usize) -> String {
    format!("Item {completed}/{total} ({ok} ok, {errors} errors)")
}

pub struct RunParallelOptions {
    pub concurrency: usize,
    pub job_id: uuid::Uuid,
    pub inter_item_delay: Duration,
    pub cancellation: Arc<dyn CancellationProbe>,
}

/// Runs `worker(index, item)` for every input item under the guarantees of
/// spec.md §4.2. `on_progress` is invoked after each settled item.
///
/// # Errors
///
/// Returns `Err(Error::JobCancelled)` only if cancellation is observed
/// before any item starts; once items are in flight, cancellation instead
/// surfaces as a per-item `ItemOutcome::Err(Error::JobCancelled)` so partial
/// results remain visible (spec.md §5 "Cancellation semantics").
pub async fn run_parallel<T, I, F, Fut, P>(
    items: Vec<I>,
    worker: F,
    options: RunParallelOptions,
    mut on_progress: P,
) -> Vec<ItemOutcome<T>>
where
    T: Send + 'static,
    I: Send + 'static,
    F: Fn(usize, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
    P: FnMut(ProgressUpdate<'_>),
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let concurrency = options.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let worker = Arc::new(worker);
    let delay_lock: Arc<Mutex<()>> = Arc::new(Mutex::new(()));
    let job_id = options.job_id;
    let inter_item_delay = options.inter_item_delay;

    let mut join_set: JoinSet<(usize, Result<T, Error>)> = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        if options.cancellation.is_cancelled(job_id).await {
            join_set.abort_all();
            while join_set.join_next().await.is_some() {}
            let mut results: Vec<ItemOutcome<T>> = Vec::with_capacity(total);
            results.resize_with(total, || ItemOutcome::Err(Error::JobCancelled));
            return results;
        }

        if index > 0 && !inter_item_delay.is_zero() {
            let guard = delay_lock.lock().await;
            tokio::time::sleep(inter_item_delay).await;
            drop(guard);
        }

        let permit_semaphore = semaphore.clone();
        let worker = worker.clone();
        let cancellation = options.cancellation.clone();

        join_set.spawn(async move {
            let permit = permit_semaphore.acquire_owned().await;
            // Cancellation may have landed while this task sat queued behind
            // the semaphore (spec.md §4.2 guarantee 4) — check again now that
            // a slot is held, and once more right before running the worker.
            if cancellation.is_cancelled(job_id).await {
                return (index, Err(Error::JobCancelled));
            }
            let result = match permit {
                Ok(_permit) => {
                    if cancellation.is_cancelled(job_id).await {
                        Err(Error::JobCancelled)
                    } else {
                        worker(index, item).await
                    }
                }
                Err(_) => Err(Error::internal("semaphore closed")),
            };
            (index, result)
        });
    }

    let mut slots: Vec<Option<ItemOutcome<T>>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);
    let mut completed = 0usize;
    let mut ok_count = 0usize;
    let mut err_count = 0usize;

    while let Some(joined) = join_set.join_next().await {
        let (index, result) = match joined {
            Ok(pair) => pair,
            Err(join_err) => {
                // The task panicked or was aborted; its original index is
                // unrecoverable from `JoinError`, so route it to a sentinel
                // index and let the final fallback fill the still-empty
                // slot. We still count it in progress (spec.md §4.2
                // invariant 4: gather waits for every outstanding task to
                // settle before returning).
                (
                    usize::MAX,
                    Err(Error::internal(format!("task join error: {join_err}"))),
                )
            }
        };

        completed += 1;
        match &result {
            Ok(_) => ok_count += 1,
            Err(_) => err_count += 1,
        }
        let message = default_message(ok_count, err_count, completed, total);
        on_progress(ProgressUpdate {
            completed,
            total,
            ok: ok_count,
            errors: err_count,
            message: &message,
        });

        if index < total {
            slots[index] = Some(match result {
                Ok(value) => ItemOutcome::Ok(value),
                Err(error) => ItemOutcome::Err(error),
            });
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.unwrap_or_else(|| {
                ItemOutcome::Err(Error::internal(format!("item {i} never completed")))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NeverCancelled;

    #[async_trait::async_trait]
    impl CancellationProbe for NeverCancelled {
        async fn is_cancelled(&self, _job_id: uuid::Uuid) -> bool {
            false
        }
    }

    struct AlwaysCancelled;

    #[async_trait::async_trait]
    impl CancellationProbe for AlwaysCancelled {
        async fn is_cancelled(&self, _job_id: uuid::Uuid) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn preserves_order_with_concurrency() {
        let items: Vec<i32> = (0..20).collect();
        let probe: Arc<dyn CancellationProbe> = Arc::new(NeverCancelled);
        let results = run_parallel(
            items,
            |_index, item: i32| async move {
                tokio::time::sleep(Duration::from_millis((20 - item) as u64 % 5)).await;
                Ok::<i32, Error>(item * 2)
            },
            RunParallelOptions {
                concurrency: 4,
                job_id: uuid::Uuid::nil(),
                inter_item_delay: Duration::ZERO,
                cancellation: probe.clone(),
            },
            |_update| {},
        )
        .await;

        assert_eq!(results.len(), 20);
        for (i, outcome) in results.into_iter().enumerate() {
            match outcome {
                ItemOutcome::Ok(value) => assert_eq!(value, i as i32 * 2),
                ItemOutcome::Err(_) => panic!("unexpected error at index {i}"),
            }
        }
    }

    #[tokio::test]
    async fn concurrency_one_is_sequential() {
        let started_order = Arc::new(Mutex::new(Vec::new()));
        let probe: Arc<dyn CancellationProbe> = Arc::new(NeverCancelled);
        let items: Vec<i32> = (0..5).collect();
        let order = started_order.clone();
        let _results = run_parallel(
            items,
            move |index, _item: i32| {
                let order = order.clone();
                async move {
                    order.lock().await.push(index);
                    Ok::<(), Error>(())
                }
            },
            RunParallelOptions {
                concurrency: 1,
                job_id: uuid::Uuid::nil(),
                inter_item_delay: Duration::ZERO,
                cancellation: probe.clone(),
            },
            |_update| {},
        )
        .await;

        let order = started_order.lock().await;
        assert_eq!(*order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failed_items_do_not_abort_the_batch() {
        let probe: Arc<dyn CancellationProbe> = Arc::new(NeverCancelled);
        let items: Vec<i32> = vec![1, 2, 3];
        let results = run_parallel(
            items,
            |_index, item: i32| async move {
                if item == 2 {
                    Err(Error::upstream("boom"))
                } else {
                    Ok(item)
                }
            },
            RunParallelOptions {
                concurrency: 2,
                job_id: uuid::Uuid::nil(),
                inter_item_delay: Duration::ZERO,
                cancellation: probe.clone(),
            },
            |_update| {},
        )
        .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(!results[1].is_ok());
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn cancellation_before_dispatch_cancels_all() {
        let probe: Arc<dyn CancellationProbe> = Arc::new(AlwaysCancelled);
        let items: Vec<i32> = vec![1, 2, 3];
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let results = run_parallel(
            items,
            move |_index, item: i32| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<i32, Error>(item)
                }
            },
            RunParallelOptions {
                concurrency: 2,
                job_id: uuid::Uuid::nil(),
                inter_item_delay: Duration::ZERO,
                cancellation: probe.clone(),
            },
            |_update| {},
        )
        .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| !r.is_ok()));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let probe: Arc<dyn CancellationProbe> = Arc::new(NeverCancelled);
        let items: Vec<i32> = Vec::new();
        let results = run_parallel(
            items,
            |_index, item: i32| async move { Ok::<i32, Error>(item) },
            RunParallelOptions {
                concurrency: 4,
                job_id: uuid::Uuid::nil(),
                inter_item_delay: Duration::ZERO,
                cancellation: probe.clone(),
            },
            |_update| {},
        )
        .await;
        assert!(results.is_empty());
    }
}
