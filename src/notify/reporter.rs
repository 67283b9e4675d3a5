//! Admin error fan-out with deduplication.
//!
//! An error signature is (kind, first 100 chars of the message, site).
//! The same signature is forwarded at most once per 30-second window and
//! the cache keeps at most the last 100 signatures. Reporting never
//! panics and its own delivery failures are swallowed so a reporting bug
//! cannot take down the dispatch loop.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, warn};

use super::Notifier;
use crate::text;

const DEDUP_WINDOW: Duration = Duration::from_secs(30);
const MAX_CACHED: usize = 100;

pub struct ErrorReporter {
    notifier: Arc<Notifier>,
    admins: Vec<i64>,
    seen: Mutex<HashMap<String, Instant>>,
}

impl ErrorReporter {
    pub fn new(notifier: Arc<Notifier>, admins: Vec<i64>) -> Self {
        Self {
            notifier,
            admins,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Log the error and forward it to every admin, deduplicated.
    pub async fn report(&self, kind: &str, message: &str, site: &str) {
        error!(kind, site, message, "reported error");

        let hash = signature_hash(kind, message, site);
        if !self.should_send(&hash, Instant::now()) {
            return;
        }

        let body = text::error_report(kind, message, site);
        for admin in &self.admins {
            if let Err(e) = self.notifier.send(*admin, &body, None).await {
                warn!(admin, error = %e, "error report delivery failed");
            }
        }
    }

    fn should_send(&self, hash: &str, now: Instant) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = seen.get(hash) {
            if now.duration_since(*last) < DEDUP_WINDOW {
                return false;
            }
        }
        seen.insert(hash.to_string(), now);

        // Bound the cache: drop the oldest half once over the limit.
        if seen.len() > MAX_CACHED {
            let mut entries: Vec<(String, Instant)> =
                seen.iter().map(|(k, v)| (k.clone(), *v)).collect();
            entries.sort_by_key(|(_, at)| *at);
            for (key, _) in entries.into_iter().take(MAX_CACHED / 2) {
                seen.remove(&key);
            }
        }
        true
    }
}

/// Stable signature over (kind, message head, site).
fn signature_hash(kind: &str, message: &str, site: &str) -> String {
    let head: String = message.chars().take(100).collect();
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b":");
    hasher.update(head.as_bytes());
    hasher.update(b":");
    hasher.update(site.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}
