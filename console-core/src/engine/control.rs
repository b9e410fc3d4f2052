//! Pause / resume / cancel for a running batch.
//!
//! Signals are observed between tasks and during the inter-task sleep, never
//! in the middle of a send. A cancel sticks to the handle: every later pass
//! ends at its first checkpoint until [`ControlHandle::rearm`] is called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

#[derive(Debug)]
struct ControlState {
    running: AtomicBool,
    cancelled: AtomicBool,
    paused: watch::Sender<bool>,
    cancel: Mutex<CancellationToken>,
}

/// Cloneable handle; hand one to a signal handler or UI while the controller
/// drains its list.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    state: Arc<ControlState>,
}

impl Default for ControlHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlHandle {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            state: Arc::new(ControlState {
                running: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                paused,
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        *self.state.paused.borrow()
    }

    pub fn pause(&self) {
        self.state.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.state.paused.send_replace(false);
    }

    /// Stops the current run after the in-flight task and refuses later
    /// passes. Remaining tasks keep their status.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.token().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Lifts a previous cancel so new passes run again.
    pub fn rearm(&self) {
        self.state.cancelled.store(false, Ordering::SeqCst);
    }

    fn token(&self) -> CancellationToken {
        self.state
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Claims the run flag. Fails when another pass is already draining.
    pub(crate) fn start(&self) -> Result<RunGuard, EngineError> {
        if self
            .state
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        *self
            .state
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token.clone();
        // Checked after the swap so a concurrent cancel cannot miss both tokens.
        if self.is_cancelled() {
            token.cancel();
        }
        self.resume();

        Ok(RunGuard {
            state: Arc::clone(&self.state),
            token,
        })
    }
}

/// Held for the duration of one pass; clears the run flag on drop.
#[derive(Debug)]
pub(crate) struct RunGuard {
    state: Arc<ControlState>,
    token: CancellationToken,
}

impl RunGuard {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Blocks while paused. Returns `false` once cancelled.
    pub(crate) async fn checkpoint(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        let mut paused = self.state.paused.subscribe();
        tokio::select! {
            resumed = paused.wait_for(|p| !*p) => resumed.is_ok() && !self.token.is_cancelled(),
            _ = self.token.cancelled() => false,
        }
    }

    /// Sleeps for `delay` unless cancelled first. Returns `false` on cancel.
    pub(crate) async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.token.cancelled() => false,
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
    }
}
