//! Notifier: every outgoing effect goes through here.
//!
//! Policy per send: HTML first with one plain-text retry on markup
//! rejection; rate-limit waits honor the transport's retry interval plus
//! one second; generic transport errors back off 1/2/4 s for up to three
//! retries. Permanent errors return immediately for the caller's
//! escalation path.

mod backoff;
pub mod reporter;

pub use backoff::Backoff;
pub use reporter::ErrorReporter;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::TransportError;
use crate::transport::{ChatTransport, Keyboard, ParseMode};

/// Retries after the initial attempt, for retryable error kinds.
const MAX_RETRIES: u32 = 3;

pub struct Notifier {
    transport: Arc<dyn ChatTransport>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }

    pub async fn send(
        &self,
        chat_id: i64,
        body: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError> {
        let transport = self.transport.clone();
        let body = body.to_string();
        let keyboard = keyboard.cloned();
        deliver(move |mode| {
            let transport = transport.clone();
            let body = body.clone();
            let keyboard = keyboard.clone();
            async move {
                transport
                    .send_message(chat_id, &body, mode, keyboard.as_ref())
                    .await
            }
        })
        .await
    }

    pub async fn edit(
        &self,
        chat_id: i64,
        message_id: i64,
        body: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError> {
        let transport = self.transport.clone();
        let body = body.to_string();
        let keyboard = keyboard.cloned();
        deliver(move |mode| {
            let transport = transport.clone();
            let body = body.clone();
            let keyboard = keyboard.clone();
            async move {
                transport
                    .edit_message(chat_id, message_id, &body, mode, keyboard.as_ref())
                    .await
            }
        })
        .await
    }

    pub async fn send_photo(
        &self,
        chat_id: i64,
        photo: &str,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError> {
        let transport = self.transport.clone();
        let photo = photo.to_string();
        let caption = caption.to_string();
        let keyboard = keyboard.cloned();
        deliver(move |mode| {
            let transport = transport.clone();
            let photo = photo.clone();
            let caption = caption.clone();
            let keyboard = keyboard.clone();
            async move {
                transport
                    .send_photo(chat_id, &photo, &caption, mode, keyboard.as_ref())
                    .await
            }
        })
        .await
    }

    pub async fn send_media_group(
        &self,
        chat_id: i64,
        photos: &[String],
        caption: &str,
    ) -> Result<(), TransportError> {
        let transport = self.transport.clone();
        let photos = photos.to_vec();
        let caption = caption.to_string();
        deliver(move |mode| {
            let transport = transport.clone();
            let photos = photos.clone();
            let caption = caption.clone();
            async move {
                transport
                    .send_media_group(chat_id, &photos, &caption, mode)
                    .await
            }
        })
        .await
    }

    pub async fn send_location(
        &self,
        chat_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> Result<i64, TransportError> {
        let transport = self.transport.clone();
        deliver(move |_mode| {
            let transport = transport.clone();
            async move { transport.send_location(chat_id, latitude, longitude).await }
        })
        .await
    }

    pub async fn answer_callback(&self, callback_id: &str) {
        // Best effort; a stale callback ack is not worth a retry loop.
        if let Err(e) = self.transport.answer_callback(callback_id).await {
            warn!(error = %e, "callback ack failed");
        }
    }
}

/// Run one outgoing effect under the retry policy.
async fn deliver<T, F, Fut>(mut op: F) -> Result<T, TransportError>
where
    F: FnMut(ParseMode) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut mode = ParseMode::Html;
    let mut backoff = Backoff::new();
    let mut retries = 0u32;
    loop {
        match op(mode).await {
            Ok(v) => return Ok(v),
            // One fallback to plain text with the same body; does not
            // consume a retry.
            Err(TransportError::ParseMode(reason)) if mode == ParseMode::Html => {
                warn!(reason = %reason, "markup rejected, retrying as plain text");
                mode = ParseMode::Plain;
            }
            Err(e @ TransportError::ParseMode(_)) => return Err(e),
            Err(TransportError::RetryAfter(secs)) => {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(TransportError::RetryAfter(secs));
                }
                warn!(secs, "rate limited, waiting");
                tokio::time::sleep(Duration::from_secs(secs + 1)).await;
            }
            Err(e) if e.is_permanent() => return Err(e),
            Err(e) => {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(e);
                }
                let delay = backoff.next_delay();
                warn!(error = %e, kind = e.kind(), delay_ms = delay.as_millis() as u64, "transport error, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc as StdArc;

    #[tokio::test]
    async fn parse_mode_falls_back_to_plain_once() {
        let calls = StdArc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = deliver(move |mode| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                match mode {
                    ParseMode::Html => Err(TransportError::ParseMode("entities".into())),
                    ParseMode::Plain => Ok(7i64),
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_do_not_retry() {
        let calls = StdArc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<i64, _> = deliver(move |_| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Forbidden("blocked".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(TransportError::Forbidden(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn generic_errors_retry_up_to_cap() {
        let calls = StdArc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<i64, _> = deliver(move |_| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Network("reset".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(TransportError::Network(_))));
        // Initial attempt + MAX_RETRIES.
        assert_eq!(calls.load(Ordering::SeqCst), 1 + MAX_RETRIES);
    }

    #[tokio::test(start_paused = true)]
    async fn network_error_then_success() {
        let calls = StdArc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = deliver(move |_| {
            let calls = calls2.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TransportError::Network("blip".into()))
                } else {
                    Ok(3i64)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
