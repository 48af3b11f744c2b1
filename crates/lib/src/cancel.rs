//! Cooperative cancellation for long-running operations.
//!
//! Every network fetch, git subprocess, and download loop checks the token
//! at its suspension points. Observing cancellation is a graceful early
//! return; no further writes to the workspace or lockfile happen after it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cheap, cloneable cancellation flag shared between the orchestrator and
/// its workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  flag: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  /// Request cancellation. Idempotent.
  pub fn cancel(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.flag.load(Ordering::SeqCst)
  }

  /// Returns `Err(())` when cancelled, for use with `?`-style early exits
  /// at suspension points.
  pub fn check(&self) -> Result<(), Cancelled> {
    if self.is_cancelled() { Err(Cancelled) } else { Ok(()) }
  }
}

/// Marker error produced when a cancellation is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;
