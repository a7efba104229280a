// SPDX-License-Identifier: AGPL-3.0

//! Diagnostics for the analysis pipeline.
//!
//! Structured events go through `tracing`. The two human-facing concerns a
//! fuzzing run has are deduplicated warnings (a missing ABI or an ambiguous
//! threshold would otherwise repeat once per variant) and counter-capped
//! simulation-failure lines.

use colored::Colorize;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

static WARNED: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Install a `tracing` fmt subscriber honoring `RUST_LOG`. Sessions call
/// this at construction; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Warn to stderr. Without `allow_duplicate` the message is emitted once
/// per process.
pub fn warn(text: &str, allow_duplicate: bool) {
    if !allow_duplicate && !WARNED.lock().unwrap().insert(text.to_string()) {
        return;
    }
    eprintln!("{}", text.yellow());
}

/// Warn once per process.
pub fn warn_unique(text: &str) {
    warn(text, false);
}

/// Forget previously emitted warnings (tests).
pub fn clear_warned() {
    WARNED.lock().unwrap().clear();
}

#[cfg(test)]
fn is_warned(text: &str) -> bool {
    WARNED.lock().unwrap().contains(text)
}

/// Per-session counter-capped logger for single-simulation failures.
///
/// A long run can fail tens of thousands of variants; the first `cap`
/// failures are worth reading, the rest are noise.
pub struct FailureLog {
    cap: u32,
    emitted: AtomicU32,
}

impl FailureLog {
    pub fn new(cap: u32) -> Self {
        Self {
            cap,
            emitted: AtomicU32::new(0),
        }
    }

    /// Record one failure; logs it if the cap has not been reached.
    pub fn record(&self, msg: &str) {
        let n = self.emitted.fetch_add(1, Ordering::Relaxed);
        if n < self.cap {
            tracing::debug!(target: "warden::sim", "{}", msg);
        } else if n == self.cap {
            tracing::debug!(target: "warden::sim", "further simulation failures suppressed");
        }
    }

    pub fn count(&self) -> u32 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl Default for FailureLog {
    fn default() -> Self {
        Self::new(100)
    }
}
