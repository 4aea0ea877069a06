use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SqlStmtError;

/// Cancellation scope passed to every database operation.
///
/// A context fires when its token is cancelled or its deadline passes. Operations
/// observing a fired context return [`SqlStmtError::Cancelled`] and interrupt the
/// driver call they were waiting on. Child contexts share the parent's token tree,
/// so cancelling a parent cancels every child.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that never fires on its own.
    #[must_use]
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Wrap an existing token, e.g. one shared with a shutdown signal handler.
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Child context that also fires `timeout` from now (or at the parent's
    /// deadline, whichever comes first).
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Child context that can be cancelled on its own through the returned token.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancellationToken) {
        let token = self.token.child_token();
        let ctx = Self {
            token: token.clone(),
            deadline: self.deadline,
        };
        (ctx, token)
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context fires.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// The error reported by operations that observed this context firing.
    #[must_use]
    pub fn err(&self) -> SqlStmtError {
        if self.token.is_cancelled() {
            SqlStmtError::Cancelled("context canceled".into())
        } else {
            SqlStmtError::Cancelled("context deadline exceeded".into())
        }
    }

    /// Fail fast if the context already fired.
    ///
    /// # Errors
    /// Returns [`SqlStmtError::Cancelled`] when the context is done.
    pub fn check(&self) -> Result<(), SqlStmtError> {
        if self.is_done() {
            Err(self.err())
        } else {
            Ok(())
        }
    }

    /// Drive `fut` until it completes or the context fires, whichever is first.
    ///
    /// `on_cancel` runs when the context wins, before the future is dropped; drivers
    /// use it to interrupt work that keeps running outside the future (blocking
    /// threads, server-side queries).
    ///
    /// # Errors
    /// Returns the future's error, or [`SqlStmtError::Cancelled`] when the context
    /// fires first.
    pub async fn run<F, T, C>(&self, fut: F, on_cancel: C) -> Result<T, SqlStmtError>
    where
        F: Future<Output = Result<T, SqlStmtError>>,
        C: FnOnce(),
    {
        self.check()?;
        tokio::select! {
            biased;
            () = self.done() => {
                on_cancel();
                Err(self.err())
            }
            res = fut => res,
        }
    }
}
