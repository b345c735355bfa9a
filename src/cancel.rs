//! Cooperative cancellation for a tagging run.
//!
//! A [`CancelToken`] is checked at every suspension point of the pipeline:
//! store I/O, the rate-limit wait, each model call, and each retry backoff.
//! Cancelling aborts the run with [`AltTagError::Cancelled`] before anything
//! is published.

use crate::error::AltTagError;
use std::future::Future;
use tokio::sync::watch;

/// The owning side: call [`CancelHandle::cancel`] to stop the run.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// The observing side, cloned into every stage of the pipeline.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a connected handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Drive `fut` to completion unless cancellation wins the race.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, AltTagError> {
        if self.is_cancelled() {
            return Err(AltTagError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(AltTagError::Cancelled),
            out = fut => Ok(out),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn never_token_lets_futures_finish() {
        let token = CancelToken::never();
        let out = token.guard(async { 7 }).await.unwrap();
        assert_eq!(out, 7);
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_pending_future() {
        let (handle, token) = cancel_pair();
        let waiter = tokio::spawn(async move {
            token
                .guard(tokio::time::sleep(Duration::from_secs(3600)))
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        let res = waiter.await.unwrap();
        assert!(matches!(res, Err(AltTagError::Cancelled)));
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let (handle, token) = cancel_pair();
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(handle.token().is_cancelled());
        let res = token.guard(async { 1 }).await;
        assert!(matches!(res, Err(AltTagError::Cancelled)));
    }
}
