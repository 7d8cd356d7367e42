//! Cancellation and deadline plumbing shared by traversal and drivers.
//!
//! Long-running operations poll an [`OpGuard`] at directory boundaries
//! and every [`CHECK_INTERVAL`] entries or lines. That poll is the only
//! guaranteed cancellation observation point.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Poll cadence for traversal entries and per-line scans.
pub const CHECK_INTERVAL: usize = 100;

/// Why a guarded operation was interrupted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupt {
    /// The caller's cancellation token fired.
    Aborted,
    /// The elapsed time exceeded the configured budget.
    TimedOut(Duration),
}

/// A cancellation token plus an optional elapsed-time budget.
#[derive(Debug, Clone)]
pub struct OpGuard {
    token: Option<CancellationToken>,
    timeout: Option<Duration>,
    started: Instant,
}

impl OpGuard {
    /// Guard with neither token nor timeout; never interrupts.
    pub fn unlimited() -> Self {
        Self { token: None, timeout: None, started: Instant::now() }
    }

    /// Guard from optional caller-supplied token and timeout.
    pub fn new(token: Option<CancellationToken>, timeout: Option<Duration>) -> Self {
        Self { token, timeout, started: Instant::now() }
    }

    /// The configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Time elapsed since the guard was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Milliseconds elapsed since the guard was created.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Poll for cancellation or deadline expiry.
    pub fn check(&self) -> Result<(), Interrupt> {
        if let Some(token) = &self.token {
            if token.is_cancelled() {
                return Err(Interrupt::Aborted);
            }
        }
        if let Some(timeout) = self.timeout {
            if self.started.elapsed() >= timeout {
                return Err(Interrupt::TimedOut(timeout));
            }
        }
        Ok(())
    }
}

impl Default for OpGuard {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Counter that polls an [`OpGuard`] every [`CHECK_INTERVAL`] ticks.
#[derive(Debug, Default)]
pub struct Ticker {
    count: usize,
}

impl Ticker {
    pub fn new() -> Self {
        Self { count: 0 }
    }

    /// Advance one entry; polls the guard on every interval boundary.
    pub fn tick(&mut self, guard: &OpGuard) -> Result<(), Interrupt> {
        self.count += 1;
        if self.count % CHECK_INTERVAL == 0 {
            guard.check()
        } else {
            Ok(())
        }
    }

    /// Entries seen so far.
    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_guard_never_interrupts() {
        let guard = OpGuard::unlimited();
        assert_eq!(guard.check(), Ok(()));
    }

    #[test]
    fn cancelled_token_interrupts() {
        let token = CancellationToken::new();
        let guard = OpGuard::new(Some(token.clone()), None);
        assert_eq!(guard.check(), Ok(()));
        token.cancel();
        assert_eq!(guard.check(), Err(Interrupt::Aborted));
    }

    #[test]
    fn zero_timeout_interrupts_immediately() {
        let guard = OpGuard::new(None, Some(Duration::ZERO));
        assert_eq!(guard.check(), Err(Interrupt::TimedOut(Duration::ZERO)));
    }

    #[test]
    fn ticker_polls_on_interval_boundaries() {
        let token = CancellationToken::new();
        token.cancel();
        let guard = OpGuard::new(Some(token), None);
        let mut ticker = Ticker::new();
        for _ in 0..CHECK_INTERVAL - 1 {
            assert_eq!(ticker.tick(&guard), Ok(()));
        }
        assert_eq!(ticker.tick(&guard), Err(Interrupt::Aborted));
    }
}
