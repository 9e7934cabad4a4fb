//! Cooperative cancellation.
//!
//! A [`CancelSignal`] is a cheap clonable token shared between the caller and
//! a run. Executors call [`CancelSignal::check`] at every suspension point
//! (texture readback, weight download, inference, encode); the scheduler
//! additionally checks between nodes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::error::Abort;

#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; takes effect at the next check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Err([`Abort`]) once cancellation has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Abort.into());
        }
        Ok(())
    }
}
