use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use super::*;
use crate::args::PositiveUsize;
use crate::rate::{RateLimiter, RateLimiterConfig};
use crate::shutdown::{request_shutdown, shutdown_channel};

fn run_async_test<F>(future: F) -> Result<(), String>
where
    F: Future<Output = Result<(), String>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("Failed to build runtime: {}", err))?;
    runtime.block_on(future)
}

fn workers(value: usize) -> Result<PositiveUsize, String> {
    PositiveUsize::try_from(value).map_err(|err| err.to_string())
}

fn executor(config: ExecutorConfig) -> Result<ConcurrentExecutor, String> {
    ConcurrentExecutor::new(config).map_err(|err| format!("Invalid executor config: {}", err))
}

fn sleeping_task(id: u64, delay: Duration) -> Task {
    Task::new(TaskId(id), move || async move {
        tokio::time::sleep(delay).await;
        Ok(json!(id))
    })
}

#[test]
#[expect(clippy::panic, reason = "Panicking tasks must be captured as results")]
fn mixed_outcomes_yield_one_result_per_task() -> Result<(), String> {
    run_async_test(async {
        let config = ExecutorConfig::new(workers(4)?).with_order(ResultOrder::Submission);
        let executor = executor(config)?;
        let tasks = (0..50_u64)
            .map(|id| {
                Task::new(TaskId(id), move || async move {
                    match id % 5 {
                        0 => Err(format!("boom {}", id)),
                        1 => panic!("task {} panicked", id),
                        _ => Ok(json!({ "id": id })),
                    }
                })
            })
            .collect();

        let results = executor.run(tasks).await;
        if results.len() != 50 {
            return Err(format!("Expected 50 results, got {}", results.len()));
        }
        let seqs: BTreeSet<u64> = results.iter().map(|result| result.seq).collect();
        if seqs.len() != 50 {
            return Err("Duplicate or missing sequence numbers".to_owned());
        }
        if results.iter().zip(0_u64..).any(|(result, seq)| result.seq != seq) {
            return Err("Submission order not preserved".to_owned());
        }
        let panicked = results
            .iter()
            .filter(|result| matches!(result.error, Some(TaskError::Panicked(_))))
            .count();
        let failed = results
            .iter()
            .filter(|result| matches!(result.error, Some(TaskError::Failed(_))))
            .count();
        let succeeded = results.iter().filter(|result| result.success).count();
        if panicked != 10 || failed != 10 || succeeded != 30 {
            return Err(format!(
                "Unexpected mix: panicked={} failed={} succeeded={}",
                panicked, failed, succeeded
            ));
        }

        let stats = executor.stats();
        if stats.failures_by_kind.get("panicked") != Some(&10) {
            return Err(format!("Unexpected stats: {:?}", stats));
        }
        Ok(())
    })
}

#[test]
fn deadline_times_out_running_and_queued_tasks() -> Result<(), String> {
    run_async_test(async {
        let config = ExecutorConfig::new(workers(2)?).with_deadline(Duration::from_millis(50));
        let executor = executor(config)?;
        let tasks = (0..6)
            .map(|id| sleeping_task(id, Duration::from_millis(500)))
            .collect();

        let started = Instant::now();
        let results = executor.run(tasks).await;
        if started.elapsed() > Duration::from_millis(400) {
            return Err(format!("Deadline not enforced: {:?}", started.elapsed()));
        }
        if results.len() != 6 {
            return Err(format!("Expected 6 results, got {}", results.len()));
        }
        if results
            .iter()
            .any(|result| result.error != Some(TaskError::Timeout))
        {
            return Err(format!("Expected all timeouts: {:?}", results));
        }
        Ok(())
    })
}

#[test]
fn shutdown_cancels_after_grace_period() -> Result<(), String> {
    run_async_test(async {
        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let config =
            ExecutorConfig::new(workers(2)?).with_grace_period(Duration::from_millis(10));
        let executor = executor(config)?.with_shutdown(shutdown_rx);
        let tasks = (0..5)
            .map(|id| sleeping_task(id, Duration::from_secs(5)))
            .collect();

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            request_shutdown(&shutdown_tx);
        });
        let results = executor.run(tasks).await;
        trigger
            .await
            .map_err(|err| format!("Trigger task failed: {}", err))?;

        if results.len() != 5 {
            return Err(format!("Expected 5 results, got {}", results.len()));
        }
        if results
            .iter()
            .any(|result| result.error != Some(TaskError::Cancelled))
        {
            return Err(format!("Expected all cancelled: {:?}", results));
        }
        Ok(())
    })
}

#[test]
fn retry_policy_reruns_failed_attempts() -> Result<(), String> {
    run_async_test(async {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let executor = executor(ExecutorConfig::new(workers(1)?).with_retry(policy))?;
        let counter = Arc::clone(&calls);
        let task = Task::new(TaskId(7), move || {
            let counter = Arc::clone(&counter);
            async move {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                if call < 2 {
                    Err("not yet".to_owned())
                } else {
                    Ok(json!("done"))
                }
            }
        });

        let results = executor.run(vec![task]).await;
        let Some(result) = results.first() else {
            return Err("Missing result".to_owned());
        };
        if !result.success || result.attempts != 3 {
            return Err(format!("Unexpected result: {:?}", result));
        }
        if executor.stats().retried != 1 {
            return Err("Expected one retried task".to_owned());
        }
        Ok(())
    })
}

#[test]
fn backoff_grows_geometrically() -> Result<(), String> {
    let policy = RetryPolicy::new(4, Duration::from_millis(10)).with_multiplier(3);
    let delays: Vec<_> = (1..=3).map(|attempt| policy.delay_for(attempt)).collect();
    let expected = [
        Duration::from_millis(10),
        Duration::from_millis(30),
        Duration::from_millis(90),
    ];
    if delays != expected {
        return Err(format!("Unexpected delays: {:?}", delays));
    }
    if RetryPolicy::new(0, Duration::ZERO).validate().is_ok() {
        return Err("Zero attempts should be rejected".to_owned());
    }
    Ok(())
}

#[test]
fn limiter_gates_task_starts() -> Result<(), String> {
    run_async_test(async {
        let limiter = RateLimiter::new(RateLimiterConfig::per_second(50).with_burst(1))
            .map_err(|err| err.to_string())?;
        let executor = executor(ExecutorConfig::new(workers(4)?))?.with_limiter(Arc::new(limiter));
        let tasks = (0..5).map(|id| sleeping_task(id, Duration::ZERO)).collect();

        let started = Instant::now();
        let results = executor.run(tasks).await;
        if started.elapsed() < Duration::from_millis(75) {
            return Err(format!("Limiter not applied: {:?}", started.elapsed()));
        }
        if results.iter().filter(|result| result.success).count() != 5 {
            return Err("Expected every task to succeed".to_owned());
        }
        Ok(())
    })
}

#[test]
fn run_for_pulls_from_factory_until_elapsed() -> Result<(), String> {
    run_async_test(async {
        let executor = executor(ExecutorConfig::new(workers(3)?))?.with_level(3);
        let factory = |ctx: TaskContext| {
            Task::new(TaskId(ctx.index), move || async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(json!(ctx.level))
            })
        };

        let started = Instant::now();
        let results = executor
            .run_for(Arc::new(factory), Duration::from_millis(100))
            .await;
        let elapsed = started.elapsed();
        if elapsed < Duration::from_millis(100) || elapsed > Duration::from_secs(2) {
            return Err(format!("Unexpected run length: {:?}", elapsed));
        }
        if results.len() < 10 {
            return Err(format!("Expected steady pulls, got {}", results.len()));
        }
        if results
            .iter()
            .any(|result| result.payload != Some(json!(3)))
        {
            return Err("Factory did not receive the run level".to_owned());
        }
        Ok(())
    })
}
