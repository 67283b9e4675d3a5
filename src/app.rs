//! Shared application state threaded through every handler.
//!
//! The former module-level singletons (pool, timeout task, error cache,
//! bot reference) all live here as explicit fields.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::convo::ConversationStore;
use crate::dispatch::Dispatcher;
use crate::engine::Engine;
use crate::notify::{ErrorReporter, Notifier};
use crate::store::Store;
use crate::transport::ChatTransport;

pub struct App {
    pub config: Config,
    pub store: Arc<Store>,
    pub transport: Arc<dyn ChatTransport>,
    pub notifier: Arc<Notifier>,
    pub reporter: Arc<ErrorReporter>,
    pub engine: Arc<Engine>,
    pub dispatcher: Arc<Dispatcher>,
    pub conversations: Arc<dyn ConversationStore>,
    /// Anti-spam: one booking confirmation per chat per window.
    pub booking_rate: RateLimit,
}

/// Per-chat minimum interval between booking confirmations.
pub struct RateLimit {
    stamps: DashMap<i64, Instant>,
    min_interval: Duration,
}

impl RateLimit {
    pub const BOOKING_INTERVAL: Duration = Duration::from_secs(10);

    pub fn new(min_interval: Duration) -> Self {
        Self {
            stamps: DashMap::new(),
            min_interval,
        }
    }

    /// Ok stamps the attempt; Err carries the seconds left to wait.
    pub fn check(&self, chat_id: i64) -> Result<(), u64> {
        let now = Instant::now();
        if let Some(last) = self.stamps.get(&chat_id) {
            let elapsed = now.duration_since(*last);
            if elapsed < self.min_interval {
                return Err((self.min_interval - elapsed).as_secs().max(1));
            }
        }
        self.stamps.insert(chat_id, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_attempt_within_window_rejected() {
        let limit = RateLimit::new(Duration::from_secs(10));
        assert!(limit.check(1).is_ok());
        let remaining = limit.check(1).unwrap_err();
        assert!(remaining >= 1 && remaining <= 10);
        // A different chat is unaffected.
        assert!(limit.check(2).is_ok());
    }

    #[test]
    fn zero_window_always_allows() {
        let limit = RateLimit::new(Duration::from_secs(0));
        assert!(limit.check(1).is_ok());
        assert!(limit.check(1).is_ok());
    }
}
