//! Shared test harness: a scripted mock transport, an env-gated Postgres
//! store, and update drivers for walking the conversational flows.
//!
//! Store-backed tests need TEST_DATABASE_URL (a scratch database; every
//! test resets the schema). Without it they skip silently.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use uuid::Uuid;

use safarbot::app::{App, RateLimit};
use safarbot::config::{Config, SslMode};
use safarbot::convo::memory::MemoryStore;
use safarbot::dispatch::Dispatcher;
use safarbot::engine::Engine;
use safarbot::error::TransportError;
use safarbot::flows;
use safarbot::notify::{ErrorReporter, Notifier};
use safarbot::store::Store;
use safarbot::transport::{
    ChatTransport, Incoming, IncomingKind, Keyboard, ParseMode, TransportUpdate,
};

// ---------------------------------------------------------------------
// Mock transport
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentKind {
    Message,
    Edit,
    Photo,
    MediaGroup,
    Location,
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub chat_id: i64,
    pub kind: SentKind,
    pub body: String,
    pub mode: ParseMode,
    pub keyboard: Option<Keyboard>,
    pub message_id: i64,
}

#[derive(Default)]
pub struct MockTransport {
    next_message_id: AtomicI64,
    sent: Mutex<Vec<Sent>>,
    fail_sends_to: Mutex<HashMap<i64, TransportError>>,
    reject_html_to: Mutex<HashSet<i64>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every send to this chat fails with the given error.
    pub fn fail_chat(&self, chat_id: i64, error: TransportError) {
        self.fail_sends_to.lock().unwrap().insert(chat_id, error);
    }

    /// HTML-mode sends to this chat are rejected; plain text succeeds.
    pub fn reject_html(&self, chat_id: i64) {
        self.reject_html_to.lock().unwrap().insert(chat_id);
    }

    pub fn sent_to(&self, chat_id: i64) -> Vec<Sent> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.chat_id == chat_id)
            .cloned()
            .collect()
    }

    pub fn count_containing(&self, chat_id: i64, needle: &str) -> usize {
        self.sent_to(chat_id)
            .iter()
            .filter(|s| s.body.contains(needle))
            .count()
    }

    /// Inline callback tokens of the last keyboard sent to a chat.
    pub fn last_keyboard_tokens(&self, chat_id: i64) -> Vec<String> {
        self.sent_to(chat_id)
            .iter()
            .rev()
            .find_map(|s| s.keyboard.as_ref().and_then(keyboard_tokens))
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    fn record(&self, sent: Sent) -> i64 {
        let id = sent.message_id;
        self.sent.lock().unwrap().push(sent);
        id
    }

    fn check(&self, chat_id: i64, mode: ParseMode) -> Result<(), TransportError> {
        if let Some(error) = self.fail_sends_to.lock().unwrap().get(&chat_id) {
            return Err(error.clone());
        }
        if mode == ParseMode::Html && self.reject_html_to.lock().unwrap().contains(&chat_id) {
            return Err(TransportError::ParseMode("can't parse entities".into()));
        }
        Ok(())
    }

    fn next_id(&self) -> i64 {
        self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1000
    }
}

fn keyboard_tokens(keyboard: &Keyboard) -> Option<Vec<String>> {
    match keyboard {
        Keyboard::Inline(rows) => Some(
            rows.iter()
                .flatten()
                .map(|b| b.token.clone())
                .collect(),
        ),
        _ => None,
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        mode: ParseMode,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError> {
        self.check(chat_id, mode)?;
        Ok(self.record(Sent {
            chat_id,
            kind: SentKind::Message,
            body: text.to_string(),
            mode,
            keyboard: keyboard.cloned(),
            message_id: self.next_id(),
        }))
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        mode: ParseMode,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError> {
        self.check(chat_id, mode)?;
        self.record(Sent {
            chat_id,
            kind: SentKind::Edit,
            body: text.to_string(),
            mode,
            keyboard: keyboard.cloned(),
            message_id,
        });
        Ok(message_id)
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        _photo: &str,
        caption: &str,
        mode: ParseMode,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError> {
        self.check(chat_id, mode)?;
        Ok(self.record(Sent {
            chat_id,
            kind: SentKind::Photo,
            body: caption.to_string(),
            mode,
            keyboard: keyboard.cloned(),
            message_id: self.next_id(),
        }))
    }

    async fn send_media_group(
        &self,
        chat_id: i64,
        photos: &[String],
        caption: &str,
        mode: ParseMode,
    ) -> Result<(), TransportError> {
        self.check(chat_id, mode)?;
        self.record(Sent {
            chat_id,
            kind: SentKind::MediaGroup,
            body: format!("[{} photos] {caption}", photos.len()),
            mode,
            keyboard: None,
            message_id: self.next_id(),
        });
        Ok(())
    }

    async fn send_location(
        &self,
        chat_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> Result<i64, TransportError> {
        self.check(chat_id, ParseMode::Plain)?;
        Ok(self.record(Sent {
            chat_id,
            kind: SentKind::Location,
            body: format!("{latitude},{longitude}"),
            mode: ParseMode::Plain,
            keyboard: None,
            message_id: self.next_id(),
        }))
    }

    async fn answer_callback(&self, _callback_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn poll_updates(
        &self,
        _offset: i64,
        _timeout_secs: u32,
    ) -> Result<Vec<TransportUpdate>, TransportError> {
        Ok(vec![])
    }

    async fn drop_pending(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Env-gated store
// ---------------------------------------------------------------------

/// Serializes store-backed tests within one test binary: they all reset
/// the same scratch database.
pub async fn db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<tokio::sync::Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| tokio::sync::Mutex::new(())).lock().await
}

pub fn test_config(admins: Vec<i64>) -> Option<Config> {
    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
    Some(Config {
        bot_token: "test-token".into(),
        admins,
        database_url,
        ssl_mode: SslMode::Disable,
        redis_url: None,
        allow_db_reset: true,
    })
}

/// Fresh store against an empty schema, or None without TEST_DATABASE_URL.
pub async fn test_store() -> Option<Arc<Store>> {
    let config = test_config(vec![])?;
    let store = Store::connect(&config).await.expect("test store connect");
    store.reset_schema(true).await.expect("schema reset");
    store.bootstrap().await.expect("schema bootstrap");
    Some(Arc::new(store))
}

/// Direct SQL access for fixtures the Store deliberately does not offer
/// (aging bookings, dropping schema objects).
pub async fn raw_client() -> tokio_postgres::Client {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL");
    let (client, connection) = tokio_postgres::connect(&url, tokio_postgres::NoTls)
        .await
        .expect("raw connect");
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// Shift a booking's clock back, as if it were created N minutes ago.
pub async fn age_booking(booking_id: Uuid, minutes: i64) {
    let client = raw_client().await;
    client
        .execute(
            &*format!(
                "UPDATE bookings
                 SET created_at = created_at - interval '{minutes} minutes',
                     dispatched_at = dispatched_at - interval '{minutes} minutes',
                     expires_at = expires_at - interval '{minutes} minutes'
                 WHERE id = $1"
            ),
            &[&booking_id],
        )
        .await
        .expect("age booking");
}

// ---------------------------------------------------------------------
// App assembly and update drivers
// ---------------------------------------------------------------------

pub fn build_app(store: Arc<Store>, transport: Arc<MockTransport>, admins: Vec<i64>) -> Arc<App> {
    let config = test_config(admins).expect("TEST_DATABASE_URL");
    let notifier = Arc::new(Notifier::new(transport.clone()));
    let reporter = Arc::new(ErrorReporter::new(notifier.clone(), config.admins.clone()));
    let engine = Arc::new(Engine::new(
        store.clone(),
        notifier.clone(),
        config.admins.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        notifier.clone(),
        config.admins.clone(),
    ));
    Arc::new(App {
        config,
        store,
        transport,
        notifier,
        reporter,
        engine,
        dispatcher,
        conversations: Arc::new(MemoryStore::new()),
        booking_rate: RateLimit::new(RateLimit::BOOKING_INTERVAL),
    })
}

pub async fn text(app: &Arc<App>, chat_id: i64, body: &str) {
    flows::handle_update(
        app.clone(),
        Incoming {
            chat_id,
            kind: IncomingKind::Text(body.to_string()),
        },
    )
    .await;
}

pub async fn contact(app: &Arc<App>, chat_id: i64, phone: &str, contact_chat_id: Option<i64>) {
    flows::handle_update(
        app.clone(),
        Incoming {
            chat_id,
            kind: IncomingKind::Contact {
                phone: phone.to_string(),
                contact_chat_id,
            },
        },
    )
    .await;
}

pub async fn callback(app: &Arc<App>, chat_id: i64, token: &str) {
    callback_msg(app, chat_id, token, 0).await;
}

/// Callback carrying the message id of the keyboard it was pressed on.
pub async fn callback_msg(app: &Arc<App>, chat_id: i64, token: &str, message_id: i64) {
    flows::handle_update(
        app.clone(),
        Incoming {
            chat_id,
            kind: IncomingKind::Callback {
                token: token.to_string(),
                message_id,
                callback_id: format!("cb-{token}"),
            },
        },
    )
    .await;
}

pub async fn location(app: &Arc<App>, chat_id: i64, latitude: f64, longitude: f64) {
    flows::handle_update(
        app.clone(),
        Incoming {
            chat_id,
            kind: IncomingKind::Location {
                latitude,
                longitude,
            },
        },
    )
    .await;
}

pub async fn photo(app: &Arc<App>, chat_id: i64, file_id: &str) {
    flows::handle_update(
        app.clone(),
        Incoming {
            chat_id,
            kind: IncomingKind::Photo {
                file_id: file_id.to_string(),
            },
        },
    )
    .await;
}

/// Walk the registration flow end to end.
pub async fn register_user(
    app: &Arc<App>,
    chat_id: i64,
    phone: &str,
    first_name: &str,
    last_name: &str,
) {
    text(app, chat_id, "/start").await;
    contact(app, chat_id, phone, Some(chat_id)).await;
    text(app, chat_id, first_name).await;
    text(app, chat_id, last_name).await;
}

/// Walk the wizard as an admin to publish a hotel listing.
pub async fn create_hotel_listing(app: &Arc<App>, admin: i64, title: &str, price: i64) {
    text(app, admin, "/add").await;
    callback(app, admin, "wizard:cat:hotel").await;
    callback(app, admin, "wizard:ht:mehmonxona").await;
    text(app, admin, title).await;
    text(app, admin, "/skip").await; // description
    callback(app, admin, "wizard:region:zomin").await;
    text(app, admin, &price.to_string()).await;
    text(app, admin, "/skip").await; // phone
    location(app, admin, 41.378889, 60.363889).await;
    photo(app, admin, "photo-1").await;
    text(app, admin, "/done").await;
    callback(app, admin, "wizard:save").await;
}

/// Walk the browse flow down to (and including) the confirm press for a
/// hotel/mehmonxona listing, booking for two guests.
pub async fn book_first_hotel(app: &Arc<App>, user: i64) {
    text(app, user, "/browse").await;
    callback(app, user, "browse:region:zomin").await;
    callback(app, user, "browse:cat:hotel").await;
    callback(app, user, "browse:sub:mehmonxona").await;
    callback(app, user, "browse:pick").await;
    callback(app, user, "browse:book").await;
    text(app, user, "2").await;
    text(app, user, "Dilshod Umarov").await;
    callback(app, user, "browse:phone:registered").await;
    text(app, user, "15-fevral").await;
    text(app, user, "/skip").await;
    callback(app, user, "browse:confirm").await;
}
