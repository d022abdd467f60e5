//! Cooperative cancellation for bus-touching operations.
//!
//! A [`CancelToken`] is checked at well-defined points between discrete register writes.
//! A write that has already started is never interrupted.

use portable_atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Cancellation and deadline signal passed by reference to every bus-touching call.
///
/// Clones share the same signal. A [`child`](Self::child) fires when either it or any of
/// its ancestors fires, so a controller can be shut down independently of the token it
/// was configured with.
///
/// # Example
///
/// ```
/// use pwm_envoy::{CancelToken, Error};
///
/// let token = CancelToken::new();
/// let child = token.child();
/// assert_eq!(child.check(), Ok(()));
///
/// token.cancel();
/// assert_eq!(child.check(), Err(Error::Cancelled));
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<CancelToken>,
}

impl CancelToken {
    /// A token that only fires when [`cancel`](Self::cancel) is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also fires once `deadline` has passed.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                deadline: Some(deadline),
                ..Inner::default()
            }),
        }
    }

    /// A token that also fires once `timeout` has elapsed from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A new token that fires when this one does, and can also be cancelled on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                parent: Some(self.clone()),
                ..Inner::default()
            }),
        }
    }

    /// Fire this token and every child derived from it.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// `true` once the token or an ancestor has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// `Ok(())` while the token is live, otherwise the matching cancellation error.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] after [`cancel`](Self::cancel), or [`Error::DeadlineExceeded`]
    /// once the deadline of this token or an ancestor has passed.
    pub fn check(&self) -> Result<()> {
        let mut token = self;
        loop {
            let inner = &token.inner;
            if inner.cancelled.load(Ordering::Acquire) {
                return Err(Error::Cancelled);
            }
            if inner.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(Error::DeadlineExceeded);
            }
            match &inner.parent {
                Some(parent) => token = parent,
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_token_never_fires() {
        let token = CancelToken::default();
        assert!(!token.is_cancelled());
        assert_eq!(token.check(), Ok(()));
    }

    #[test]
    fn clones_share_the_signal() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert_eq!(token.check(), Err(Error::Cancelled));
    }

    #[test]
    fn child_cancel_does_not_reach_parent() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn grandchild_sees_root_cancel() {
        let root = CancelToken::new();
        let grandchild = root.child().child();
        root.cancel();
        assert_eq!(grandchild.check(), Err(Error::Cancelled));
    }

    #[test]
    fn elapsed_deadline_fires() {
        let token = CancelToken::with_timeout(Duration::ZERO);
        assert_eq!(token.check(), Err(Error::DeadlineExceeded));
        assert_eq!(token.child().check(), Err(Error::DeadlineExceeded));
    }

    #[test]
    fn future_deadline_is_live() {
        let token = CancelToken::with_timeout(Duration::from_secs(3600));
        assert_eq!(token.check(), Ok(()));
    }
}
