//! Degraded-mode breaker for LLM outages.
//!
//! Process-wide, not per-conversation: LLM failures say something about the
//! provider, not about any one lead. Three failures inside the trailing
//! window switch the pipeline to a canned apology instead of further LLM
//! calls; one success, or the window draining out, switches it back.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::BreakerConfig;

/// Fixed reply served while the breaker is open. Channel-agnostic.
pub const DEGRADED_REPLY: &str =
    "Estamos passando por uma instabilidade técnica no momento. Pode me chamar de novo em \
     alguns minutos? Prometo que respondo assim que normalizar. 🙏";

/// Tracks recent LLM failures and derives the Normal/Degraded state.
#[derive(Debug)]
pub struct DegradedModeBreaker {
    failures: Mutex<VecDeque<Instant>>,
    threshold: u32,
    window_secs: u64,
}

impl DegradedModeBreaker {
    /// Build from the breaker configuration section.
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            threshold: config.failure_threshold,
            window_secs: config.window_secs,
        }
    }

    /// Record one LLM call failure.
    pub fn record_failure(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(Instant::now());
            let count = u32::try_from(failures.len()).unwrap_or(u32::MAX);
            if count == self.threshold {
                warn!(
                    failures = count,
                    window_secs = self.window_secs,
                    "LLM breaker degraded, serving canned replies"
                );
            }
        }
    }

    /// Record one LLM call success, restoring Normal immediately.
    pub fn record_success(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    /// Whether new turns should skip the LLM.
    ///
    /// Derived from the trailing window rather than stored, so old failures
    /// aging out restores Normal even when no call succeeds in between.
    pub fn is_degraded(&self) -> bool {
        let Ok(mut failures) = self.failures.lock() else {
            return false;
        };
        let cutoff = Instant::now()
            .checked_sub(Duration::from_secs(self.window_secs))
            .unwrap_or_else(Instant::now);
        while failures.front().is_some_and(|t| *t < cutoff) {
            failures.pop_front();
        }
        u32::try_from(failures.len()).unwrap_or(u32::MAX) >= self.threshold
    }

    /// Failures currently inside the window.
    pub fn failure_count(&self) -> u32 {
        let Ok(failures) = self.failures.lock() else {
            return 0;
        };
        u32::try_from(failures.len()).unwrap_or(u32::MAX)
    }
}
