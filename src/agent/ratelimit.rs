//! Inbound message rate limiting.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window limiter over all inbound messages, system-wide.
///
/// Uses a sync [`Mutex`] since the critical section is very short (no awaits).
#[derive(Debug)]
pub struct RateLimiter {
    window: Mutex<VecDeque<Instant>>,
    max_count: u32,
    window_secs: u64,
}

impl RateLimiter {
    /// Create a limiter admitting `max_count` messages per `window_secs`.
    pub fn new(window_secs: u64, max_count: u32) -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            max_count,
            window_secs,
        }
    }

    /// Admit one inbound message, counting it against the window.
    ///
    /// Returns `false` when the ceiling is reached; the rejected message is
    /// not counted.
    pub fn admit(&self) -> bool {
        let Ok(mut window) = self.window.lock() else {
            // Poisoned lock: reject rather than run unlimited.
            return false;
        };

        let cutoff = Instant::now()
            .checked_sub(Duration::from_secs(self.window_secs))
            .unwrap_or_else(Instant::now);

        // Drain expired entries
        while window.front().is_some_and(|t| *t < cutoff) {
            window.pop_front();
        }

        let count = u32::try_from(window.len()).unwrap_or(u32::MAX);
        if count >= self.max_count {
            return false;
        }
        window.push_back(Instant::now());
        true
    }

    /// How many messages are currently inside the window.
    pub fn current_count(&self) -> u32 {
        let Ok(mut window) = self.window.lock() else {
            return 0;
        };
        let cutoff = Instant::now()
            .checked_sub(Duration::from_secs(self.window_secs))
            .unwrap_or_else(Instant::now);
        while window.front().is_some_and(|t| *t < cutoff) {
            window.pop_front();
        }
        u32::try_from(window.len()).unwrap_or(u32::MAX)
    }
}
