//! Cancellable polling with exponential backoff

use crate::config::WatcherConfig;
use crate::error::{SwapperError, WatcherError, WatcherResult};
use crate::shutdown::Shutdown;

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay schedule for wait loops: doubles from `initial` up to `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    pub fn from_config(config: &WatcherConfig) -> Self {
        Self::new(
            Duration::from_millis(config.wait_initial_backoff_ms),
            Duration::from_millis(config.wait_max_backoff_ms),
        )
    }

    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

fn cancelled() -> WatcherError {
    WatcherError::recoverable(SwapperError::Cancelled)
}

/// Poll `probe` until it yields a value.
///
/// Recoverable probe errors are logged and polled through; any other error
/// ends the wait. Returns a recoverable `Cancelled` error once `shutdown`
/// fires.
pub async fn poll_until<T, F, Fut>(
    backoff: Backoff,
    shutdown: &Shutdown,
    what: &str,
    mut probe: F,
) -> WatcherResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = WatcherResult<Option<T>>>,
{
    let mut delay = backoff.initial;
    loop {
        if shutdown.is_triggered() {
            return Err(cancelled());
        }

        match probe().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => debug!("Still waiting for {}, next poll in {:?}", what, delay),
            Err(e) if e.is_recoverable() => {
                warn!("Polling {} failed, retrying in {:?}: {}", what, delay, e)
            }
            Err(e) => return Err(e),
        }

        if !shutdown.sleep(delay).await {
            return Err(cancelled());
        }
        delay = backoff.next(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Disposition;
    use crate::shutdown;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_doubles_up_to_max() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(backoff.next(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(backoff.next(Duration::from_secs(4)), Duration::from_secs(5));
        assert_eq!(backoff.next(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn polls_through_recoverable_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let value = poll_until(Backoff::default(), &Shutdown::never(), "test", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => Err(WatcherError::recoverable(SwapperError::Timeout {
                        operation: "rpc".to_string(),
                    })),
                    1 => Ok(None),
                    _ => Ok(Some(n)),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ignorable_error_ends_the_wait() {
        let result: WatcherResult<()> =
            poll_until(Backoff::default(), &Shutdown::never(), "test", || async {
                Err(WatcherError::ignorable(SwapperError::Validation(
                    "bad secret".to_string(),
                )))
            })
            .await;
        assert_eq!(result.unwrap_err().disposition, Disposition::Ignorable);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_the_wait() {
        let (handle, shutdown) = shutdown::channel();
        let waiter = tokio::spawn(async move {
            poll_until::<(), _, _>(Backoff::default(), &shutdown, "never", || async { Ok(None) })
                .await
        });
        tokio::task::yield_now().await;
        handle.trigger();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err.source, SwapperError::Cancelled));
    }
}
