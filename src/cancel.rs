use crate::{ResolverError, Result};
use std::time::Duration;
use tokio::sync::watch;

/// Cooperative cancellation for resolver runs.
///
/// - `cancel()` flips a boolean and wakes sleepers.
/// - `reset()` clears the flag so future runs can proceed.
/// - The resolver checks the flag between queries and before launching
///   candidate fetches; in-flight fetches are left to complete.
/// - Backoff sleeps select on either the timer or cancellation.
#[derive(Clone, Debug)]
pub struct CancellationState {
    tx: watch::Sender<bool>,
}

impl Default for CancellationState {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

pub async fn sleep_with_cancel(
    mut cancel_rx: watch::Receiver<bool>,
    duration: Duration,
) -> Result<()> {
    if *cancel_rx.borrow() {
        return Err(ResolverError::Cancelled);
    }

    let sleeper = tokio::time::sleep(duration);
    tokio::pin!(sleeper);
    tokio::select! {
        _ = &mut sleeper => Ok(()),
        _ = async {
            loop {
                if cancel_rx.changed().await.is_err() {
                    // Sender dropped; nothing can cancel us any more.
                    std::future::pending::<()>().await;
                }
                if *cancel_rx.borrow() {
                    break;
                }
            }
        } => Err(ResolverError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_completes_without_cancel() {
        let state = CancellationState::new();
        let result = sleep_with_cancel(state.subscribe(), Duration::from_millis(5)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_cancel() {
        let state = CancellationState::new();
        let rx = state.subscribe();
        let canceller = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result = sleep_with_cancel(rx, Duration::from_secs(30)).await;
        assert!(matches!(result, Err(ResolverError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let state = CancellationState::new();
        state.cancel();
        assert!(state.is_cancelled());
        let result = sleep_with_cancel(state.subscribe(), Duration::from_secs(30)).await;
        assert!(matches!(result, Err(ResolverError::Cancelled)));

        state.reset();
        assert!(!state.is_cancelled());
    }
}
