//! Cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::BuildError;

/// Shared stop flag polled by builders.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// `Err(BuildError::Cancelled)` once a stop has been requested.
    #[inline]
    pub fn check(&self) -> Result<(), BuildError> {
        if self.stop_requested() {
            Err(BuildError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = StopToken::new();
        let worker = token.clone();
        assert!(worker.check().is_ok());
        token.request_stop();
        assert!(worker.stop_requested());
        assert_eq!(worker.check(), Err(BuildError::Cancelled));
    }
}
