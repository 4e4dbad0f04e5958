//! Cancellation and deadline propagation for long-running operations

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{EngineError, EngineResult};

/// Cancellable request scope handed to providers, tool handlers and the
/// streaming worker.
///
/// Clones share the same cancel signal; cancelling any clone (or its
/// [`CancelHandle`]) cancels all of them.
#[derive(Debug, Clone)]
pub struct RequestContext {
    signal: Arc<watch::Sender<bool>>,
    deadline: Option<Instant>,
}

/// Handle that cancels every [`RequestContext`] clone it was taken from.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// A context that never expires on its own.
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            signal: Arc::new(signal),
            deadline: None,
        }
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline_in(timeout)
    }

    /// Same cancel signal, with a (possibly tighter) deadline.
    pub fn deadline_in(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            signal: Arc::clone(&self.signal),
            deadline: Some(deadline),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            signal: Arc::clone(&self.signal),
        }
    }

    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        let mut rx = self.signal.subscribe();
        let manual = async move {
            // The sender lives as long as `self`, so `changed` only errors
            // after the context is gone.
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = manual => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => manual.await,
        }
    }

    /// Err if the context is already done.
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(self.cancel_error())
        } else {
            Ok(())
        }
    }

    /// Race `fut` against cancellation. The future is dropped when the
    /// context wins.
    pub async fn run<F, T>(&self, fut: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(self.cancel_error()),
            res = fut => res,
        }
    }

    fn cancel_error(&self) -> EngineError {
        if *self.signal.borrow() {
            EngineError::Cancelled("request cancelled".to_string())
        } else {
            EngineError::Cancelled("deadline exceeded".to_string())
        }
    }
}
