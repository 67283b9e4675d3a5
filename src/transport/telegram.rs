//! Telegram Bot API client.
//!
//! Thin JSON-over-HTTP binding for the handful of methods the bot uses.
//! Errors are mapped into the closed [`TransportError`] sum here so the
//! rest of the crate never inspects Telegram-specific payloads.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    ChatTransport, Incoming, IncomingKind, Keyboard, ParseMode, TransportUpdate,
};
use crate::error::TransportError;

const API_BASE: &str = "https://api.telegram.org";

pub struct TelegramApi {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramApi {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(token, API_BASE)
    }

    /// Point at a different API host (test servers).
    pub fn with_base_url(token: &str, base: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url: format!("{base}/bot{token}"),
        }
    }

    async fn call(
        &self,
        method: &str,
        body: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError> {
        let mut req = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(&body);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let envelope: ApiResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if envelope.ok {
            return Ok(envelope.result.unwrap_or(Value::Null));
        }
        Err(map_api_error(&envelope))
    }

    async fn call_for_message_id(
        &self,
        method: &str,
        body: Value,
    ) -> Result<i64, TransportError> {
        let result = self.call(method, body, None).await?;
        Ok(result
            .get("message_id")
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }
}

fn map_api_error(resp: &ApiResponse) -> TransportError {
    let code = resp.error_code.unwrap_or(0);
    let description = resp.description.clone().unwrap_or_default();
    match code {
        429 => {
            let secs = resp
                .parameters
                .as_ref()
                .and_then(|p| p.retry_after)
                .unwrap_or(5);
            TransportError::RetryAfter(secs)
        }
        403 => TransportError::Forbidden(description),
        400 if description.to_lowercase().contains("can't parse entities") => {
            TransportError::ParseMode(description)
        }
        400 => TransportError::BadRequest(description),
        _ => TransportError::Api {
            code,
            message: description,
        },
    }
}

fn parse_mode_value(mode: ParseMode) -> Option<&'static str> {
    match mode {
        ParseMode::Html => Some("HTML"),
        ParseMode::Plain => None,
    }
}

fn keyboard_json(keyboard: &Keyboard) -> Value {
    match keyboard {
        Keyboard::Inline(rows) => json!({
            "inline_keyboard": rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| json!({ "text": b.text, "callback_data": b.token }))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        }),
        Keyboard::Reply(rows) => json!({
            "keyboard": rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| {
                            json!({
                                "text": b.text,
                                "request_contact": b.request_contact,
                                "request_location": b.request_location,
                            })
                        })
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>(),
            "resize_keyboard": true,
        }),
        Keyboard::Remove => json!({ "remove_keyboard": true }),
    }
}

fn message_body(
    chat_id: i64,
    text: &str,
    mode: ParseMode,
    keyboard: Option<&Keyboard>,
) -> Value {
    let mut body = json!({ "chat_id": chat_id, "text": text });
    if let Some(pm) = parse_mode_value(mode) {
        body["parse_mode"] = json!(pm);
    }
    if let Some(kb) = keyboard {
        body["reply_markup"] = keyboard_json(kb);
    }
    body
}

#[async_trait]
impl ChatTransport for TelegramApi {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        mode: ParseMode,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError> {
        self.call_for_message_id("sendMessage", message_body(chat_id, text, mode, keyboard))
            .await
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        mode: ParseMode,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError> {
        let mut body = message_body(chat_id, text, mode, keyboard);
        body["message_id"] = json!(message_id);
        self.call_for_message_id("editMessageText", body).await
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: &str,
        caption: &str,
        mode: ParseMode,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError> {
        let mut body = json!({ "chat_id": chat_id, "photo": photo, "caption": caption });
        if let Some(pm) = parse_mode_value(mode) {
            body["parse_mode"] = json!(pm);
        }
        if let Some(kb) = keyboard {
            body["reply_markup"] = keyboard_json(kb);
        }
        self.call_for_message_id("sendPhoto", body).await
    }

    async fn send_media_group(
        &self,
        chat_id: i64,
        photos: &[String],
        caption: &str,
        mode: ParseMode,
    ) -> Result<(), TransportError> {
        let media: Vec<Value> = photos
            .iter()
            .enumerate()
            .map(|(i, file_id)| {
                // Caption goes on the first item only.
                let mut item = json!({ "type": "photo", "media": file_id });
                if i == 0 && !caption.is_empty() {
                    item["caption"] = json!(caption);
                    if let Some(pm) = parse_mode_value(mode) {
                        item["parse_mode"] = json!(pm);
                    }
                }
                item
            })
            .collect();
        self.call(
            "sendMediaGroup",
            json!({ "chat_id": chat_id, "media": media }),
            None,
        )
        .await?;
        Ok(())
    }

    async fn send_location(
        &self,
        chat_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> Result<i64, TransportError> {
        self.call_for_message_id(
            "sendLocation",
            json!({ "chat_id": chat_id, "latitude": latitude, "longitude": longitude }),
        )
        .await
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), TransportError> {
        self.call(
            "answerCallbackQuery",
            json!({ "callback_query_id": callback_id }),
            None,
        )
        .await?;
        Ok(())
    }

    async fn poll_updates(
        &self,
        offset: i64,
        timeout_secs: u32,
    ) -> Result<Vec<TransportUpdate>, TransportError> {
        let result = self
            .call(
                "getUpdates",
                json!({
                    "offset": offset,
                    "timeout": timeout_secs,
                    "allowed_updates": ["message", "callback_query"],
                }),
                // Long poll: keep the HTTP timeout above the poll window.
                Some(Duration::from_secs(u64::from(timeout_secs) + 10)),
            )
            .await?;
        let raw: Vec<RawUpdate> =
            serde_json::from_value(result).map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(raw.into_iter().filter_map(map_update).collect())
    }

    async fn drop_pending(&self) -> Result<(), TransportError> {
        self.call(
            "deleteWebhook",
            json!({ "drop_pending_updates": true }),
            None,
        )
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    callback_query: Option<RawCallback>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    message_id: i64,
    chat: RawChat,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    contact: Option<RawContact>,
    #[serde(default)]
    location: Option<RawLocation>,
    #[serde(default)]
    photo: Option<Vec<RawPhotoSize>>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct RawContact {
    phone_number: String,
    #[serde(default)]
    user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct RawPhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct RawCallback {
    id: String,
    from: RawChat,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message: Option<RawMessage>,
}

fn map_update(raw: RawUpdate) -> Option<TransportUpdate> {
    let incoming = if let Some(cb) = raw.callback_query {
        Incoming {
            // Private-chat bot: the pressing user is the chat.
            chat_id: cb.from.id,
            kind: IncomingKind::Callback {
                token: cb.data?,
                message_id: cb.message.map(|m| m.message_id).unwrap_or(0),
                callback_id: cb.id,
            },
        }
    } else if let Some(msg) = raw.message {
        let chat_id = msg.chat.id;
        let kind = if let Some(contact) = msg.contact {
            IncomingKind::Contact {
                phone: contact.phone_number,
                contact_chat_id: contact.user_id,
            }
        } else if let Some(loc) = msg.location {
            IncomingKind::Location {
                latitude: loc.latitude,
                longitude: loc.longitude,
            }
        } else if let Some(photos) = msg.photo {
            // Sizes are ordered smallest-first; keep the largest.
            IncomingKind::Photo {
                file_id: photos.into_iter().last()?.file_id,
            }
        } else if let Some(text) = msg.text {
            IncomingKind::Text(text)
        } else {
            return None;
        };
        Incoming { chat_id, kind }
    } else {
        return None;
    };

    Some(TransportUpdate {
        update_id: raw.update_id,
        incoming,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(code: i64, description: &str, retry_after: Option<u64>) -> ApiResponse {
        ApiResponse {
            ok: false,
            result: None,
            error_code: Some(code),
            description: Some(description.to_string()),
            parameters: retry_after.map(|secs| ResponseParameters {
                retry_after: Some(secs),
            }),
        }
    }

    #[test]
    fn error_mapping() {
        assert!(matches!(
            map_api_error(&envelope(429, "Too Many Requests", Some(7))),
            TransportError::RetryAfter(7)
        ));
        assert!(matches!(
            map_api_error(&envelope(429, "Too Many Requests", None)),
            TransportError::RetryAfter(5)
        ));
        assert!(matches!(
            map_api_error(&envelope(403, "Forbidden: bot was blocked", None)),
            TransportError::Forbidden(_)
        ));
        assert!(matches!(
            map_api_error(&envelope(400, "Bad Request: can't parse entities", None)),
            TransportError::ParseMode(_)
        ));
        assert!(matches!(
            map_api_error(&envelope(400, "Bad Request: chat not found", None)),
            TransportError::BadRequest(_)
        ));
        assert!(matches!(
            map_api_error(&envelope(502, "gateway", None)),
            TransportError::Api { code: 502, .. }
        ));
    }

    #[test]
    fn update_mapping_text_and_callback() {
        let raw: RawUpdate = serde_json::from_value(serde_json::json!({
            "update_id": 10,
            "message": { "message_id": 1, "chat": { "id": 42 }, "text": "/start" }
        }))
        .unwrap();
        let mapped = map_update(raw).unwrap();
        assert_eq!(mapped.update_id, 10);
        assert_eq!(mapped.incoming.chat_id, 42);
        assert!(matches!(mapped.incoming.kind, IncomingKind::Text(ref t) if t == "/start"));

        let raw: RawUpdate = serde_json::from_value(serde_json::json!({
            "update_id": 11,
            "callback_query": {
                "id": "cbq1",
                "from": { "id": 77 },
                "data": "accept:a1b2c3d4",
                "message": { "message_id": 5, "chat": { "id": 77 } }
            }
        }))
        .unwrap();
        let mapped = map_update(raw).unwrap();
        assert_eq!(mapped.incoming.chat_id, 77);
        match mapped.incoming.kind {
            IncomingKind::Callback {
                token, message_id, ..
            } => {
                assert_eq!(token, "accept:a1b2c3d4");
                assert_eq!(message_id, 5);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn update_mapping_photo_takes_largest() {
        let raw: RawUpdate = serde_json::from_value(serde_json::json!({
            "update_id": 12,
            "message": {
                "message_id": 2,
                "chat": { "id": 9 },
                "photo": [
                    { "file_id": "small" },
                    { "file_id": "large" }
                ]
            }
        }))
        .unwrap();
        let mapped = map_update(raw).unwrap();
        assert!(matches!(mapped.incoming.kind, IncomingKind::Photo { ref file_id } if file_id == "large"));
    }
}
