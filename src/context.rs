//! The operation context threaded through every long-running call (spec §5).
//!
//! Cancelling it propagates to rate-limit waits, in-flight HTTP requests,
//! worker-pool loops and BlobStore operations that support it — it is the
//! one object every suspension point in the crate accepts.

use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct OpContext {
    cancel: CancellationToken,
}

impl OpContext {
    pub fn new() -> Self {
        OpContext {
            cancel: CancellationToken::new(),
        }
    }

    pub fn child(&self) -> Self {
        OpContext {
            cancel: self.cancel.child_token(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for either `fut` to resolve or the context to be cancelled.
    /// Returns `None` if cancellation won the race.
    pub async fn race<F, T>(&self, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Wires `SIGINT`/`SIGTERM` into this context's cancellation, spawning a
    /// background task that cancels on the first signal (spec §4.E).
    pub fn spawn_signal_handler(&self) {
        let ctx = self.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                {
                    Ok(sig) => sig,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to install SIGTERM handler");
                        let _ = ctrl_c.await;
                        ctx.cancel();
                        return;
                    }
                };
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = term.recv() => {},
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            tracing::info!("shutdown signal received, cancelling in-flight work");
            ctx.cancel();
        });
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn race_returns_none_when_cancelled_first() {
        let ctx = OpContext::new();
        ctx.cancel();
        let result = ctx.race(async { 1 }).await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn race_returns_value_when_not_cancelled() {
        let ctx = OpContext::new();
        let result = ctx.race(async { 42 }).await;
        assert_eq!(result, Some(42));
    }

    #[test]
    fn child_tokens_cancel_with_parent() {
        let parent = OpContext::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
