/*!
 * Cancellation token shared between the dispatcher and its workers.
 *
 * The reference behavior had no way to stop a batch once started; this token
 * gives callers a bound on total wait time and doubles as the dispatcher's
 * batch-level abort flag.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Clonable cancellation handle.
///
/// Cancelling is idempotent and observable from every clone. Workers poll
/// [`is_cancelled`](CancelToken::is_cancelled) between units, and long sleeps
/// (the 60s rate-limit backoff) select on [`cancelled`](CancelToken::cancelled).
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a new, un-cancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token, waking every pending `cancelled()` waiter
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            // Arm the waiter before checking the flag so a concurrent
            // cancel() between check and await cannot be missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
