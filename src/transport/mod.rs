//! Chat transport seam.
//!
//! The core only depends on this trait: anything with send/edit/callback
//! semantics satisfies it. The production implementation speaks the
//! Telegram Bot API ([`telegram::TelegramApi`]); tests plug in a scripted
//! mock.

pub mod telegram;

use async_trait::async_trait;

use crate::error::TransportError;

/// How a message body should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Html,
    Plain,
}

/// An inline button that fires a callback token.
#[derive(Debug, Clone)]
pub struct InlineButton {
    pub text: String,
    pub token: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            token: token.into(),
        }
    }
}

/// A reply-keyboard button; may request the user's contact or location.
#[derive(Debug, Clone)]
pub struct ReplyButton {
    pub text: String,
    pub request_contact: bool,
    pub request_location: bool,
}

impl ReplyButton {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            request_contact: false,
            request_location: false,
        }
    }

    pub fn contact(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            request_contact: true,
            request_location: false,
        }
    }
}

/// Keyboard attached to an outgoing message.
#[derive(Debug, Clone)]
pub enum Keyboard {
    Inline(Vec<Vec<InlineButton>>),
    Reply(Vec<Vec<ReplyButton>>),
    Remove,
}

impl Keyboard {
    /// Single-row inline keyboard.
    pub fn inline_row(buttons: Vec<InlineButton>) -> Self {
        Keyboard::Inline(vec![buttons])
    }
}

/// An update mapped into transport-agnostic form.
#[derive(Debug, Clone)]
pub struct Incoming {
    /// Chat the update belongs to; for callbacks, the pressing user.
    pub chat_id: i64,
    pub kind: IncomingKind,
}

#[derive(Debug, Clone)]
pub enum IncomingKind {
    Text(String),
    Contact {
        phone: String,
        /// Chat id of the contact's own account, when the transport knows it.
        contact_chat_id: Option<i64>,
    },
    Callback {
        token: String,
        message_id: i64,
        callback_id: String,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    Photo {
        file_id: String,
    },
}

/// Update plus the transport's monotonically increasing id for offset
/// tracking.
#[derive(Debug, Clone)]
pub struct TransportUpdate {
    pub update_id: i64,
    pub incoming: Incoming,
}

/// The transport surface the Notifier depends on.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a message; returns the transport-assigned message id.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        mode: ParseMode,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError>;

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        mode: ParseMode,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError>;

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: &str,
        caption: &str,
        mode: ParseMode,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError>;

    /// Send an album of up to ten media identifiers with one caption.
    async fn send_media_group(
        &self,
        chat_id: i64,
        photos: &[String],
        caption: &str,
        mode: ParseMode,
    ) -> Result<(), TransportError>;

    async fn send_location(
        &self,
        chat_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> Result<i64, TransportError>;

    /// Acknowledge a callback press so the client stops its spinner.
    async fn answer_callback(&self, callback_id: &str) -> Result<(), TransportError>;

    /// Long-poll for updates newer than `offset`.
    async fn poll_updates(
        &self,
        offset: i64,
        timeout_secs: u32,
    ) -> Result<Vec<TransportUpdate>, TransportError>;

    /// Drop any queued updates and webhook configuration at startup.
    async fn drop_pending(&self) -> Result<(), TransportError>;
}
