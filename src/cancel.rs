//! Cooperative cancellation.
//!
//! A single [`CancelToken`] is created per invocation and threaded through
//! everything that performs I/O. Child processes observe it through
//! [`Cmd`](crate::shell_exec::Cmd), which kills the child when the token
//! trips; the workflow engine checks it between units of work and abandons
//! pairs that have not started yet.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag. Cloning is cheap; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        // Cancelling again is a no-op
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn fresh_tokens_start_untripped() {
        assert!(!CancelToken::default().is_cancelled());
        assert!(!CancelToken::new().is_cancelled());
    }
}
