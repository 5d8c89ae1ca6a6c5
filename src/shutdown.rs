//! Shutdown controller: turns SIGINT/SIGTERM into a flag the capture loop
//! polls once per iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::traits::Result;

/// Exit status used when a second termination request arrives.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Process-wide shutdown request, set at most once and never cleared.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// Create an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` only for the call that set the flag.
    pub fn request(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What to do with a termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// First request: let the loop finish its iteration and exit cleanly.
    Graceful,
    /// Handler already used: terminate right away.
    Forced,
}

/// Record a termination request on `flag`.
pub fn on_termination(flag: &ShutdownFlag) -> Disposition {
    if flag.request() {
        Disposition::Graceful
    } else {
        Disposition::Forced
    }
}

/// Route SIGINT and SIGTERM to `flag`.
///
/// The handler runs on a dedicated thread, never inside the capture loop.
/// Only the first request is graceful; any later one exits the process with
/// [`FORCED_EXIT_CODE`].
pub fn install_handler(flag: ShutdownFlag) -> Result<()> {
    ctrlc::set_handler(move || match on_termination(&flag) {
        Disposition::Graceful => {
            warn!("termination requested, stopping after the current frame");
        }
        Disposition::Forced => {
            warn!("second termination request, exiting immediately");
            std::process::exit(FORCED_EXIT_CODE);
        }
    })?;
    Ok(())
}
