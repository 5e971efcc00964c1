use std::{fmt, sync::Arc};

use tokio::sync::watch::{channel, Sender};

/// Advisory cancellation handle owned by an in-flight load.
///
/// The token is handed to the [`Transport`](crate::Transport) when a
/// load starts, so that it may stop early.  Cancelling does not remove
/// the pending entry from the cache; whatever the load eventually
/// produces is still subject to the generation check on commit.
///
/// Clones share the same flag, and once cancelled a token stays
/// cancelled.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelTokenInner>,
}

struct CancelTokenInner {
    sender: Sender<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = channel(false);
        Self {
            inner: CancelTokenInner { sender }.into(),
        }
    }

    /// Flag the load as cancelled and wake everything waiting on
    /// [`cancelled`](Self::cancelled).  Repeated calls are no-ops.
    pub fn cancel(&self) {
        self.inner.sender.send_if_modified(|cancelled| {
            let modified = !*cancelled;
            *cancelled = true;
            modified
        });
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.sender.borrow()
    }

    /// Wait until the token is cancelled; returns immediately if that
    /// has already happened.
    pub async fn cancelled(&self) {
        let mut receiver = self.inner.sender.subscribe();
        // the sender lives as long as `self`, so the channel can't close
        // while this is waiting.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("listeners", &self.inner.sender.receiver_count())
            .finish()
    }
}
