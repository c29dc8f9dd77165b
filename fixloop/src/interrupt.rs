//! Cooperative user-interrupt flag.
//!
//! The flag is set from the Ctrl-C handler and polled at the top of the
//! session loop, during delays, and while waiting on the assistant process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Shared, cloneable interrupt flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a flag wired to the process Ctrl-C handler.
    pub fn install() -> Result<Self> {
        let interrupt = Self::new();
        let handle = interrupt.clone();
        ctrlc::set_handler(move || handle.trigger()).context("install ctrl-c handler")?;
        Ok(interrupt)
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on interrupt.
    ///
    /// Returns `false` if the sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return true;
            };
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let interrupt = Interrupt::new();
        let other = interrupt.clone();
        assert!(!interrupt.is_triggered());
        other.trigger();
        assert!(interrupt.is_triggered());
    }

    #[test]
    fn sleep_returns_early_when_triggered() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let start = Instant::now();
        assert!(!interrupt.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn zero_sleep_completes() {
        assert!(Interrupt::new().sleep(Duration::ZERO));
    }
}
