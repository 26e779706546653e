//! Bounded polling of array-side asynchronous jobs. The call sites bind a
//! predicate that classifies the fetched array object; this module only
//! owns the budget/interval mechanics.

use crate::errors::Error;
use std::{future::Future, time::Duration};

/// Default budget for clone-pair, lun-copy and metro synchronization waits.
pub const JOB_WAIT_BUDGET: Duration = Duration::from_secs(6 * 60 * 60);
/// Default budget for a snapshot to become ready.
pub const SNAPSHOT_READY_BUDGET: Duration = Duration::from_secs(60 * 60);
/// Default interval between polls.
pub const JOB_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll `predicate` every `interval` until it reports done, it fails, or
/// `budget` elapses. A predicate error propagates immediately; exceeding the
/// budget fails with [`Error::WaitTimeout`] naming `what`.
pub(crate) async fn wait_until<F, Fut>(
    what: &str,
    budget: Duration,
    interval: Duration,
    mut predicate: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let poll = async {
        loop {
            if predicate().await? {
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
    };
    match tokio::time::timeout(budget, poll).await {
        Ok(result) => result,
        Err(_elapsed) => Err(Error::WaitTimeout {
            what: what.to_string(),
            budget,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn done_predicate_returns_immediately() {
        wait_until("test", Duration::from_secs(10), Duration::from_secs(1), || async {
            Ok(true)
        })
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pending_predicate_times_out_after_the_budget() {
        let polls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let error = wait_until(
            "never-done",
            Duration::from_secs(30),
            Duration::from_secs(5),
            || {
                polls.fetch_add(1, Ordering::Relaxed);
                async { Ok(false) }
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(error, Error::WaitTimeout { .. }));
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        // One poll at t=0 plus one per elapsed interval.
        assert!(polls.load(Ordering::Relaxed) >= 6);
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_error_propagates_immediately() {
        let polls = AtomicU32::new(0);
        let error = wait_until(
            "faulty",
            Duration::from_secs(30),
            Duration::from_secs(5),
            || {
                let n = polls.fetch_add(1, Ordering::Relaxed);
                async move {
                    if n < 2 {
                        Ok(false)
                    } else {
                        Err(Error::JobFault {
                            kind: "clone pair",
                            id: "1".to_string(),
                        })
                    }
                }
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(error, Error::JobFault { .. }));
        assert_eq!(polls.load(Ordering::Relaxed), 3);
    }
}
