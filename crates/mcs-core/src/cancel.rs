//! Cooperative cancellation token and process signal wiring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::McError;

/// Snapshot of the pending requests drained by [`CancellationToken::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalPoll {
    /// Graceful termination was requested; stays latched on the token.
    pub terminate: bool,
    /// A status dump was requested since the last poll.
    pub dump_status: bool,
    /// A histogram dump was requested since the last poll.
    pub dump_histograms: bool,
}

/// Shared set of flags polled by the engines between measurement windows.
///
/// Clones observe the same flags, so one token can be handed to every worker
/// of a parallel run. The flags are plain atomics and are safe to set from a
/// signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    terminate: Arc<AtomicBool>,
    dump_status: Arc<AtomicBool>,
    dump_histograms: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token with no pending requests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latches the termination flag.
    pub fn request_termination(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    /// Requests a status dump at the next poll.
    pub fn request_status_dump(&self) {
        self.dump_status.store(true, Ordering::SeqCst);
    }

    /// Requests a histogram dump at the next poll.
    pub fn request_histogram_dump(&self) {
        self.dump_histograms.store(true, Ordering::SeqCst);
    }

    /// Returns whether termination has been requested.
    pub fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// Reads all flags, clearing the two dump requests.
    pub fn poll(&self) -> SignalPoll {
        SignalPoll {
            terminate: self.is_terminated(),
            dump_status: self.dump_status.swap(false, Ordering::SeqCst),
            dump_histograms: self.dump_histograms.swap(false, Ordering::SeqCst),
        }
    }

    /// Routes SIGTERM, SIGUSR1 and SIGUSR2 to terminate, dump-status and
    /// dump-histograms respectively.
    #[cfg(unix)]
    pub fn install_signal_handlers(&self) -> Result<(), McError> {
        use signal_hook::consts::{SIGTERM, SIGUSR1, SIGUSR2};

        let routes = [
            (SIGTERM, "SIGTERM", &self.terminate),
            (SIGUSR1, "SIGUSR1", &self.dump_status),
            (SIGUSR2, "SIGUSR2", &self.dump_histograms),
        ];
        for (signal, name, flag) in routes {
            signal_hook::flag::register(signal, Arc::clone(flag)).map_err(|err| {
                McError::Signal(
                    crate::errors::ErrorInfo::new("signal-register", err.to_string())
                        .with_context("signal", name),
                )
            })?;
        }
        log::debug!("installed SIGTERM/SIGUSR1/SIGUSR2 handlers");
        Ok(())
    }

    /// Signals are not available on this platform; the token still works
    /// through the explicit request methods.
    #[cfg(not(unix))]
    pub fn install_signal_handlers(&self) -> Result<(), McError> {
        log::warn!("signal handlers are not supported on this platform");
        Ok(())
    }
}
