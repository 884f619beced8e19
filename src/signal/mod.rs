//! Interrupt handling for graceful shutdown (SIGINT/SIGTERM)
//!
//! A [`ShutdownToken`] is shared by the run loop, the scheduler and every
//! worker. It is triggered by the first interrupt, or by a worker that sees
//! the abort sentinel in its process output. Once triggered:
//! 1. The cancel flag polled by execution adapters is set, so in-flight
//!    processes are terminated
//! 2. Idle workers stop selecting jobs and retire
//! 3. `run` persists the final queue state and exits with code 1
//!
//! A second interrupt stops waiting for workers, but state is still persisted.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use slotq_exec::CancelFlag;

/// Exit code for interrupted runs
pub const EXIT_CODE_INTERRUPTED: i32 = 1;

/// Why shutdown started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM
    Signal,
    /// A job's output contained the abort sentinel
    AdapterAborted,
    /// The run loop hit an unrecoverable error
    Internal,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal => write!(f, "interrupt signal"),
            ShutdownReason::AdapterAborted => write!(f, "aborted by job output"),
            ShutdownReason::Internal => write!(f, "internal error"),
        }
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: begin graceful shutdown
    InitiateShutdown,
    /// Second signal: stop waiting for workers (state is still persisted)
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

#[derive(Debug, Default)]
struct ShutdownInner {
    exiting: CancelFlag,
    immediate: AtomicBool,
    signal_count: AtomicU8,
    reason: Mutex<Option<ShutdownReason>>,
}

/// Shared, cloneable shutdown state.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<ShutdownInner>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// The flag execution adapters poll.
    pub fn cancel_flag(&self) -> CancelFlag {
        Arc::clone(&self.inner.exiting)
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.exiting.load(Ordering::SeqCst)
    }

    /// Check if immediate exit has been requested (second interrupt)
    pub fn is_immediate(&self) -> bool {
        self.inner.immediate.load(Ordering::SeqCst)
    }

    /// The first reason shutdown was triggered for.
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.inner.reason.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start shutdown. Returns true if this call triggered it.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let first = !self.inner.exiting.swap(true, Ordering::SeqCst);
        if first {
            *self.inner.reason.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason);
            tracing::info!(%reason, "shutdown requested");
        }
        first
    }

    /// Handle a signal (SIGINT/SIGTERM)
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.inner.signal_count.fetch_add(1, Ordering::SeqCst);

        if count == 0 {
            self.trigger(ShutdownReason::Signal);
            SignalAction::InitiateShutdown
        } else if count == 1 {
            self.inner.immediate.store(true, Ordering::SeqCst);
            SignalAction::ImmediateExit
        } else {
            SignalAction::Ignore
        }
    }
}

/// Installs the process-wide interrupt handler for a token.
pub struct SignalHandler {
    token: ShutdownToken,
}

impl SignalHandler {
    pub fn new(token: ShutdownToken) -> Self {
        Self { token }
    }

    /// Install the signal handlers
    ///
    /// This sets up handlers for SIGINT and SIGTERM.
    /// Must be called once at program startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let token = self.token.clone();
        ctrlc::set_handler(move || match token.handle_signal() {
            SignalAction::InitiateShutdown => {
                eprintln!("\nReceived interrupt signal, stopping running jobs...");
            }
            SignalAction::ImmediateExit => {
                eprintln!("\nReceived second interrupt, exiting without waiting for workers...");
            }
            SignalAction::Ignore => {}
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_initial() {
        let token = ShutdownToken::new();
        assert!(!token.is_triggered());
        assert!(!token.is_immediate());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_first_signal_initiates_shutdown() {
        let token = ShutdownToken::new();
        let action = token.handle_signal();

        assert_eq!(action, SignalAction::InitiateShutdown);
        assert!(token.is_triggered());
        assert!(token.cancel_flag().load(Ordering::SeqCst));
        assert!(!token.is_immediate());
        assert_eq!(token.reason(), Some(ShutdownReason::Signal));
    }

    #[test]
    fn test_second_signal_requests_immediate_exit() {
        let token = ShutdownToken::new();
        token.handle_signal();
        assert_eq!(token.handle_signal(), SignalAction::ImmediateExit);
        assert!(token.is_immediate());
        assert_eq!(token.handle_signal(), SignalAction::Ignore);
    }

    #[test]
    fn test_first_reason_wins() {
        let token = ShutdownToken::new();
        assert!(token.trigger(ShutdownReason::AdapterAborted));
        assert!(!token.trigger(ShutdownReason::Internal));
        token.handle_signal();
        assert_eq!(token.reason(), Some(ShutdownReason::AdapterAborted));
    }

    #[test]
    fn test_clones_share_state() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        clone.trigger(ShutdownReason::Signal);
        assert!(token.is_triggered());
    }
}
