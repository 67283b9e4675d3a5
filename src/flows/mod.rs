//! Update routing: commands, callback namespaces, and the active flow.
//!
//! Order matters: partner accept/reject callbacks and global commands are
//! handled before the per-chat conversation, so a partner can answer a
//! prompt while mid-wizard and `/cancel` always works.

pub mod browse;
pub mod register;
pub mod wizard;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app::App;
use crate::convo::{apply_step, Conversation, Step};
use crate::engine::{Decision, DecisionOutcome};
use crate::text;
use crate::transport::{Incoming, IncomingKind, InlineButton, Keyboard};

pub use browse::BrowseFlow;
pub use register::RegisterFlow;
pub use wizard::WizardFlow;

/// Reply-keyboard cancel button; treated exactly like /cancel.
pub const CANCEL_LABEL: &str = "❌ Bekor qilish";

/// A conversational flow: a finite state set plus handlers.
#[async_trait]
pub trait Flow: Send + Sync {
    fn id(&self) -> &'static str;
    fn states(&self) -> &'static [&'static str];
    /// Send the opening prompt and return the initial conversation.
    async fn enter(&self, app: &App, chat_id: i64) -> Result<Conversation>;
    async fn handle(
        &self,
        app: &App,
        chat_id: i64,
        convo: &Conversation,
        incoming: &IncomingKind,
    ) -> Result<Step>;
}

static REGISTER: RegisterFlow = RegisterFlow;
static WIZARD: WizardFlow = WizardFlow;
static BROWSE: BrowseFlow = BrowseFlow;

pub fn flow_by_id(id: &str) -> Option<&'static dyn Flow> {
    match id {
        register::FLOW_ID => Some(&REGISTER),
        wizard::FLOW_ID => Some(&WIZARD),
        browse::FLOW_ID => Some(&BROWSE),
        _ => None,
    }
}

/// Top-level entry for one update. Errors become a user-facing "internal
/// error" plus an admin report; they never kill the dispatch loop.
pub async fn handle_update(app: Arc<App>, incoming: Incoming) {
    let chat_id = incoming.chat_id;
    if let Err(e) = route(&app, &incoming).await {
        warn!(chat = chat_id, error = %e, "update handling failed");
        let _ = app.notifier.send(chat_id, &text::internal_error(), None).await;
        app.reporter
            .report("unexpected", &format!("{e:#}"), "flows::handle_update")
            .await;
    }
}

async fn route(app: &App, incoming: &Incoming) -> Result<()> {
    let chat_id = incoming.chat_id;
    match &incoming.kind {
        IncomingKind::Callback {
            token,
            callback_id,
            message_id,
        } => {
            app.notifier.answer_callback(callback_id).await;
            if let Some((decision, prefix)) = parse_decision_token(token) {
                return partner_decision(app, chat_id, decision, prefix, *message_id).await;
            }
            if let Some(action) = token.strip_prefix("menu:") {
                return menu_action(app, chat_id, action).await;
            }
            if let Some(rest) = token.strip_prefix("ml:") {
                return my_listings_action(app, chat_id, rest).await;
            }
            if token == "cancel" {
                return cancel(app, chat_id).await;
            }
            continue_flow(app, chat_id, &incoming.kind).await
        }
        IncomingKind::Text(body) => {
            let trimmed = body.trim();
            if trimmed == CANCEL_LABEL {
                return cancel(app, chat_id).await;
            }
            if let Some(command) = parse_command(trimmed) {
                return dispatch_command(app, chat_id, command, &incoming.kind).await;
            }
            continue_flow(app, chat_id, &incoming.kind).await
        }
        _ => continue_flow(app, chat_id, &incoming.kind).await,
    }
}

/// Extract a bot command: "/browse", "/browse@safarbot" -> "browse".
fn parse_command(text: &str) -> Option<&str> {
    let rest = text.strip_prefix('/')?;
    let command = rest.split_whitespace().next()?;
    Some(command.split('@').next().unwrap_or(command))
}

fn parse_decision_token(token: &str) -> Option<(Decision, &str)> {
    if let Some(prefix) = token.strip_prefix("accept:") {
        return Some((Decision::Accept, prefix));
    }
    if let Some(prefix) = token.strip_prefix("reject:") {
        return Some((Decision::Reject, prefix));
    }
    None
}

async fn dispatch_command(
    app: &App,
    chat_id: i64,
    command: &str,
    incoming: &IncomingKind,
) -> Result<()> {
    match command {
        "cancel" => cancel(app, chat_id).await,
        "start" => cmd_start(app, chat_id).await,
        "help" => {
            let body = text::help(app.config.is_admin(chat_id));
            app.notifier.send(chat_id, &body, None).await?;
            Ok(())
        }
        "browse" => cmd_browse(app, chat_id).await,
        "add" => cmd_add(app, chat_id).await,
        "my_listings" => cmd_my_listings(app, chat_id).await,
        "health" => cmd_health(app, chat_id).await,
        // Flow-internal commands ride through to the active conversation.
        "skip" | "done" => continue_flow(app, chat_id, incoming).await,
        _ => {
            app.notifier
                .send(chat_id, "Noma'lum buyruq. /help ni ko'ring.", None)
                .await?;
            Ok(())
        }
    }
}

async fn cancel(app: &App, chat_id: i64) -> Result<()> {
    app.conversations.clear(chat_id).await?;
    let keyboard = main_menu(app.config.is_admin(chat_id));
    app.notifier
        .send(chat_id, &text::cancelled(), Some(&keyboard))
        .await?;
    Ok(())
}

async fn cmd_start(app: &App, chat_id: i64) -> Result<()> {
    // Registration gate: no User row forces the registration flow.
    if app.store.get_user(chat_id).await?.is_none() {
        return start_flow(app, chat_id, &REGISTER).await;
    }
    let is_admin = app.config.is_admin(chat_id);
    app.notifier
        .send(chat_id, &text::greeting(is_admin), Some(&main_menu(is_admin)))
        .await?;
    Ok(())
}

async fn cmd_browse(app: &App, chat_id: i64) -> Result<()> {
    if app.store.get_user(chat_id).await?.is_none() {
        return start_flow(app, chat_id, &REGISTER).await;
    }
    start_flow(app, chat_id, &BROWSE).await
}

async fn cmd_add(app: &App, chat_id: i64) -> Result<()> {
    if !app.config.is_admin(chat_id) {
        debug!(chat = chat_id, "non-admin /add ignored");
        return Ok(());
    }
    start_flow(app, chat_id, &WIZARD).await
}

async fn cmd_health(app: &App, chat_id: i64) -> Result<()> {
    if !app.config.is_admin(chat_id) {
        return Ok(());
    }
    let db_line = match app.store.healthcheck().await {
        Ok(msg) => format!("PostgreSQL: ✅ {msg}"),
        Err(e) => format!("PostgreSQL: ❌ {e}"),
    };
    let listings = app.store.count_active_listings().await.unwrap_or(0);
    let bookings = app.store.count_bookings().await.unwrap_or(0);
    let mut lines = vec![
        "🏥 <b>HEALTH CHECK</b>".to_string(),
        String::new(),
        db_line,
        String::new(),
        format!("📋 Listings (active): {listings}"),
        format!("📝 Bookings (total): {bookings}"),
    ];
    if let Ok(by_status) = app.store.bookings_by_status().await {
        if !by_status.is_empty() {
            let breakdown = by_status
                .iter()
                .map(|(status, count)| format!("{status}: {count}"))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("📊 By status: {breakdown}"));
        }
    }
    app.notifier.send(chat_id, &lines.join("\n"), None).await?;
    Ok(())
}

// ---------------------------------------------------------------------
// Admin listing management
// ---------------------------------------------------------------------

async fn cmd_my_listings(app: &App, chat_id: i64) -> Result<()> {
    if !app.config.is_admin(chat_id) {
        return Ok(());
    }
    let listings = app.store.listings_by_owner(chat_id).await?;
    if listings.is_empty() {
        app.notifier
            .send(chat_id, "Sizda hali listinglar yo'q. /add bilan qo'shing.", None)
            .await?;
        return Ok(());
    }
    for listing in listings {
        let status = if listing.is_active {
            "🟢 faol"
        } else {
            "⚪ o'chirilgan"
        };
        let body = format!(
            "🏷 <b>{}</b>\n{} · {}",
            text::escape(&listing.title),
            text::category_label(listing.category),
            status
        );
        let toggle = if listing.is_active {
            InlineButton::new("⏸ To'xtatish", format!("ml:off:{}", listing.id))
        } else {
            InlineButton::new("▶️ Faollashtirish", format!("ml:on:{}", listing.id))
        };
        let keyboard = Keyboard::inline_row(vec![
            toggle,
            InlineButton::new("🗑 O'chirish", format!("ml:del:{}", listing.id)),
        ]);
        app.notifier.send(chat_id, &body, Some(&keyboard)).await?;
    }
    Ok(())
}

async fn my_listings_action(app: &App, chat_id: i64, rest: &str) -> Result<()> {
    if !app.config.is_admin(chat_id) {
        return Ok(());
    }
    let Some((action, raw_id)) = rest.split_once(':') else {
        return Ok(());
    };
    let Ok(listing_id) = Uuid::parse_str(raw_id) else {
        return Ok(());
    };
    // Every mutation is guarded by owner_chat_id in the WHERE clause.
    let reply = match action {
        "on" => {
            if app.store.set_listing_active(listing_id, chat_id, true).await? {
                "▶️ Listing faollashtirildi.".to_string()
            } else {
                "Listing topilmadi.".to_string()
            }
        }
        "off" => {
            if app.store.set_listing_active(listing_id, chat_id, false).await? {
                "⏸ Listing to'xtatildi.".to_string()
            } else {
                "Listing topilmadi.".to_string()
            }
        }
        "del" => {
            // Two-step: deletion also removes the listing's bookings.
            let keyboard = Keyboard::inline_row(vec![InlineButton::new(
                "🗑 Ha, o'chirilsin",
                format!("ml:delc:{listing_id}"),
            )]);
            app.notifier
                .send(
                    chat_id,
                    "Listing va unga tegishli barcha buyurtmalar o'chiriladi. Ishonchingiz komilmi?",
                    Some(&keyboard),
                )
                .await?;
            return Ok(());
        }
        "delc" => {
            if app.store.delete_listing(listing_id, chat_id).await? {
                "🗑 Listing o'chirildi.".to_string()
            } else {
                "Listing topilmadi.".to_string()
            }
        }
        _ => return Ok(()),
    };
    app.notifier.send(chat_id, &reply, None).await?;
    Ok(())
}

// ---------------------------------------------------------------------
// Menus and partner decisions
// ---------------------------------------------------------------------

pub fn main_menu(is_admin: bool) -> Keyboard {
    let mut rows = vec![
        vec![InlineButton::new("🧭 Takliflarni ko'rish", "menu:browse")],
        vec![
            InlineButton::new("📋 Buyurtmalarim", "menu:mybookings"),
            InlineButton::new("ℹ️ Yordam", "menu:help"),
        ],
    ];
    if is_admin {
        rows.push(vec![
            InlineButton::new("➕ Listing qo'shish", "menu:add"),
            InlineButton::new("🗂 Listinglarim", "menu:mylistings"),
        ]);
    }
    Keyboard::Inline(rows)
}

async fn menu_action(app: &App, chat_id: i64, action: &str) -> Result<()> {
    match action {
        "browse" => cmd_browse(app, chat_id).await,
        "help" => {
            let body = text::help(app.config.is_admin(chat_id));
            app.notifier.send(chat_id, &body, None).await?;
            Ok(())
        }
        "mybookings" => my_bookings(app, chat_id).await,
        "add" => cmd_add(app, chat_id).await,
        "mylistings" => cmd_my_listings(app, chat_id).await,
        _ => Ok(()),
    }
}

async fn my_bookings(app: &App, chat_id: i64) -> Result<()> {
    let recent = app.store.recent_bookings_for_user(chat_id, 10).await?;
    if recent.is_empty() {
        app.notifier
            .send(chat_id, "Hali buyurtmalaringiz yo'q. /browse dan boshlang.", None)
            .await?;
        return Ok(());
    }
    let mut lines = vec!["📋 <b>Oxirgi buyurtmalaringiz</b>".to_string(), String::new()];
    for (booking, title) in recent {
        lines.push(format!(
            "• {} — {}",
            text::escape(title.as_deref().unwrap_or("Xizmat")),
            text::status_label(booking.status)
        ));
    }
    app.notifier.send(chat_id, &lines.join("\n"), None).await?;
    Ok(())
}

async fn partner_decision(
    app: &App,
    chat_id: i64,
    decision: Decision,
    prefix: &str,
    message_id: i64,
) -> Result<()> {
    let outcome = app
        .engine
        .on_partner_decision(prefix, chat_id, decision)
        .await?;
    let reply = match outcome {
        DecisionOutcome::Applied => {
            let verdict = match decision {
                Decision::Accept => "✅ Buyurtma qabul qilindi. Mijozga xabar berdik.",
                Decision::Reject => "❌ Buyurtma rad etildi. Mijozga xabar berdik.",
            };
            // Replace the prompt so the buttons disappear; fall back to a
            // plain send when the prompt message is unknown.
            if message_id > 0 {
                let body = format!("{verdict}\n🆔 <code>{prefix}</code>");
                if app.notifier.edit(chat_id, message_id, &body, None).await.is_ok() {
                    return Ok(());
                }
            }
            verdict
        }
        DecisionOutcome::AlreadyFinalized => "⌛ Bu buyurtma allaqachon yakunlangan.",
        DecisionOutcome::Unauthorized => "🚫 Bu buyurtma sizga tegishli emas.",
        DecisionOutcome::NotFound => "Buyurtma topilmadi.",
    };
    app.notifier.send(chat_id, reply, None).await?;
    Ok(())
}

// ---------------------------------------------------------------------
// Conversation plumbing
// ---------------------------------------------------------------------

async fn start_flow(app: &App, chat_id: i64, flow: &dyn Flow) -> Result<()> {
    // One conversation per chat: entering a flow replaces any other.
    app.conversations.clear(chat_id).await?;
    let convo = flow.enter(app, chat_id).await?;
    app.conversations.save(chat_id, &convo).await?;
    Ok(())
}

async fn continue_flow(app: &App, chat_id: i64, incoming: &IncomingKind) -> Result<()> {
    let Some(convo) = app.conversations.load(chat_id).await? else {
        return idle_hint(app, chat_id, incoming).await;
    };
    let Some(flow) = flow_by_id(&convo.flow) else {
        // Stale state from an older build; drop it.
        warn!(chat = chat_id, flow = %convo.flow, "unknown flow in conversation store");
        app.conversations.clear(chat_id).await?;
        return Ok(());
    };

    // Cross-flow callbacks don't leak into the active conversation.
    if let IncomingKind::Callback { token, .. } = incoming {
        if !token.starts_with(&format!("{}:", flow.id())) {
            debug!(chat = chat_id, token = %token, flow = flow.id(), "stale callback ignored");
            return Ok(());
        }
    }

    let step = flow.handle(app, chat_id, &convo, incoming).await?;
    if let Step::Replace { flow: next } = step {
        app.conversations.clear(chat_id).await?;
        if let Some(next_flow) = flow_by_id(next) {
            start_flow(app, chat_id, next_flow).await?;
        }
        return Ok(());
    }
    apply_step(
        app.conversations.as_ref(),
        chat_id,
        convo,
        step,
        flow.states(),
    )
    .await?;
    Ok(())
}

/// No active conversation: nudge toward the menu instead of staying mute.
async fn idle_hint(app: &App, chat_id: i64, incoming: &IncomingKind) -> Result<()> {
    // Ignore stray non-text updates (old buttons, photos out of context).
    if !matches!(incoming, IncomingKind::Text(_)) {
        return Ok(());
    }
    if app.store.get_user(chat_id).await?.is_none() {
        app.notifier
            .send(chat_id, "Boshlash uchun /start buyrug'ini yuboring.", None)
            .await?;
        return Ok(());
    }
    let is_admin = app.config.is_admin(chat_id);
    app.notifier
        .send(
            chat_id,
            "Quyidagi menyudan tanlang yoki /browse yuboring.",
            Some(&main_menu(is_admin)),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parsing() {
        assert_eq!(parse_command("/start"), Some("start"));
        assert_eq!(parse_command("/browse@safarbot"), Some("browse"));
        assert_eq!(parse_command("/health now"), Some("health"));
        assert_eq!(parse_command("hello"), None);
    }

    #[test]
    fn decision_token_parsing() {
        let (decision, prefix) = parse_decision_token("accept:a1b2c3d4").unwrap();
        assert_eq!(decision, Decision::Accept);
        assert_eq!(prefix, "a1b2c3d4");
        let (decision, prefix) = parse_decision_token("reject:00ffee11").unwrap();
        assert_eq!(decision, Decision::Reject);
        assert_eq!(prefix, "00ffee11");
        assert!(parse_decision_token("browse:cat:hotel").is_none());
    }

    #[test]
    fn main_menu_admin_rows() {
        let Keyboard::Inline(rows) = main_menu(false) else {
            panic!("expected inline menu");
        };
        assert_eq!(rows.len(), 2);
        let Keyboard::Inline(rows) = main_menu(true) else {
            panic!("expected inline menu");
        };
        assert_eq!(rows.len(), 3);
    }
}
