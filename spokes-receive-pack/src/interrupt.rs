//! Cancellation on interrupt/terminate/hangup.
//!
//! The flag is raised by the signal handler and checked between protocol
//! phases; child processes are reaped by their scope guards when the engine
//! unwinds, and partially staged state (the quarantine) is removed by its
//! own guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};

/// A shared cancellation flag raised by signal delivery.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the flag for SIGINT, SIGTERM and SIGHUP.
    pub fn install(&self) -> std::io::Result<()> {
        for signal in [SIGINT, SIGTERM, SIGHUP] {
            signal_hook::flag::register(signal, Arc::clone(&self.0))?;
        }
        Ok(())
    }

    /// Raise the flag directly, as the signal handler would.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Error out of the current phase if cancellation was requested.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_cancelled() {
        let flag = CancellationFlag::new();
        assert!(!flag.is_cancelled());
        assert!(flag.check().is_ok());
    }

    #[test]
    fn cancel_trips_the_check() {
        let flag = CancellationFlag::new();
        flag.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(crate::Error::Cancelled)));
    }

    #[test]
    fn clones_share_the_flag() {
        let flag = CancellationFlag::new();
        let other = flag.clone();
        other.cancel();
        assert!(flag.is_cancelled());
    }
}
