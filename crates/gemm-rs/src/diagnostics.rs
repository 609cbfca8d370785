//! Rate-limited error reporting.
//!
//! Missing solutions and failures caught at the dispatch boundary tend to repeat
//! on every call of a hot loop, so they are reported once per registry unless
//! verbose errors are enabled.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::{HostConfig, ENV_VERBOSE_ERRORS};

#[derive(Debug, Default)]
pub struct Diagnostics {
    verbose: bool,
    suppressed: AtomicBool,
    reported: AtomicBool,
    emitted: AtomicUsize,
}

impl Diagnostics {
    pub fn new(config: &HostConfig) -> Self {
        Self {
            verbose: config.verbose_errors,
            suppressed: AtomicBool::new(config.suppress_errors),
            reported: AtomicBool::new(false),
            emitted: AtomicUsize::new(0),
        }
    }

    /// Silences or re-enables reporting at runtime.
    pub fn set_suppressed(&self, suppressed: bool) {
        self.suppressed.store(suppressed, Ordering::Relaxed);
    }

    /// Logs `message` at error level, at most once unless verbose.
    ///
    /// Returns whether anything was emitted.
    pub fn report_once(&self, message: &str) -> bool {
        if self.suppressed.load(Ordering::Relaxed) {
            return false;
        }
        if self.verbose {
            tracing::error!("{message}");
        } else if !self.reported.swap(true, Ordering::AcqRel) {
            tracing::error!(
                "{message}\nThis message will only be displayed once, unless the {ENV_VERBOSE_ERRORS} environment variable is set."
            );
        } else {
            return false;
        }
        self.emitted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Number of reports emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::Relaxed)
    }
}
