//! Cooperative cancellation
//!
//! A cancel token is threaded through every suspension point; workers check
//! it before starting a new unit of work and at fetch/model boundaries.

use crate::error::{Error, Result};
use tokio::sync::watch;

/// Caller-held handle that triggers cancellation
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Cloneable token observed by workers
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a linked handle/token pair
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    /// Signal cancellation to every token clone
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelToken {
    /// A token that can never be cancelled (for one-shot synchronous calls)
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive forever so the channel never closes
        std::mem::forget(tx);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Error out if cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
