use crate::error::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-call context carrying an optional cancellation signal.
///
/// Store and engine entry points check the context before expensive steps
/// (template expansion, index scans, commit). Once a transaction has
/// committed, cancelling has no effect on it.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Option<Arc<AtomicBool>>,
}

/// Handle that cancels every [`Context`] cloned from its pair.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl Context {
    /// Context that can never be cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// Creates a cancellable context and its handle.
    pub fn cancellable() -> (Self, CancelHandle) {
        let flag = Arc::new(AtomicBool::new(false));
        (
            Self {
                cancelled: Some(Arc::clone(&flag)),
            },
            CancelHandle { flag },
        )
    }

    /// Returns whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Fails with [`Error::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

impl CancelHandle {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_context_is_never_cancelled() {
        assert!(Context::background().check().is_ok());
    }

    #[test]
    fn cancel_should_reach_cloned_contexts() {
        let (ctx, handle) = Context::cancellable();
        let cloned = ctx.clone();
        assert!(cloned.check().is_ok());

        handle.cancel();

        assert!(matches!(ctx.check(), Err(Error::Cancelled)));
        assert!(cloned.is_cancelled());
    }
}
