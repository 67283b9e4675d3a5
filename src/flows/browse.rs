//! Browse + book flow.
//!
//! region → category → [subtype] → card(i of n) → detail → booking
//! sub-flow (guest_count → extra names? → phone → date → note? →
//! confirm). The booking itself is only written at the confirm step;
//! everything before that lives in the conversation context.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::Flow;
use crate::app::App;
use crate::convo::{merge1, Conversation, Step};
use crate::dispatch::DispatchOutcome;
use crate::domain::{
    normalize_contact_phone, normalize_uz_phone, valid_date, valid_guest_count, valid_guest_name,
    BookingDetails, Category, HotelType, Listing,
};
use crate::text;
use crate::transport::{IncomingKind, InlineButton, Keyboard, ReplyButton};

pub const FLOW_ID: &str = "browse";

const REGION: &str = "region";
const CATEGORY: &str = "category";
const SUBTYPE: &str = "subtype";
const CARD: &str = "card";
const DETAIL: &str = "detail";
const GUEST_COUNT: &str = "guest_count";
const GUEST_NAMES: &str = "extra_guest_names";
const PHONE_CHOICE: &str = "phone_choice";
const PHONE_MANUAL: &str = "phone_manual";
const DATE: &str = "date";
const NOTE: &str = "note";
const CONFIRM: &str = "confirm";

const STATES: &[&str] = &[
    REGION, CATEGORY, SUBTYPE, CARD, DETAIL, GUEST_COUNT, GUEST_NAMES, PHONE_CHOICE, PHONE_MANUAL,
    DATE, NOTE, CONFIRM,
];

const REGIONS: &[&str] = &["zomin"];

pub struct BrowseFlow;

#[async_trait]
impl Flow for BrowseFlow {
    fn id(&self) -> &'static str {
        FLOW_ID
    }

    fn states(&self) -> &'static [&'static str] {
        STATES
    }

    async fn enter(&self, app: &App, chat_id: i64) -> Result<Conversation> {
        let rows = REGIONS
            .iter()
            .map(|r| vec![InlineButton::new(format!("📍 {r}"), format!("browse:region:{r}"))])
            .collect();
        app.notifier
            .send(chat_id, "Hududni tanlang:", Some(&Keyboard::Inline(rows)))
            .await?;
        Ok(Conversation::new(FLOW_ID, REGION))
    }

    async fn handle(
        &self,
        app: &App,
        chat_id: i64,
        convo: &Conversation,
        incoming: &IncomingKind,
    ) -> Result<Step> {
        match (convo.state.as_str(), incoming) {
            (REGION, IncomingKind::Callback { token, .. }) => {
                let Some(region) = token
                    .strip_prefix("browse:region:")
                    .filter(|r| REGIONS.contains(r))
                else {
                    return Ok(Step::Stay);
                };
                send_category_menu(app, chat_id).await?;
                Ok(Step::advance_with(CATEGORY, merge1("region", json!(region))))
            }
            (CATEGORY, IncomingKind::Callback { token, .. }) => {
                let Some(category) = token
                    .strip_prefix("browse:cat:")
                    .and_then(Category::from_str)
                else {
                    return Ok(Step::Stay);
                };
                if category == Category::Hotel {
                    let rows = HotelType::ALL
                        .iter()
                        .map(|t| {
                            vec![InlineButton::new(
                                t.label(),
                                format!("browse:sub:{}", t.as_str()),
                            )]
                        })
                        .collect();
                    app.notifier
                        .send(chat_id, "Mehmonxona turini tanlang:", Some(&Keyboard::Inline(rows)))
                        .await?;
                    return Ok(Step::advance_with(
                        SUBTYPE,
                        merge1("category", json!(category.as_str())),
                    ));
                }
                open_listings(app, chat_id, convo, category, None).await
            }
            (SUBTYPE, IncomingKind::Callback { token, .. }) => {
                let Some(subtype) = token
                    .strip_prefix("browse:sub:")
                    .and_then(HotelType::from_str)
                else {
                    return Ok(Step::Stay);
                };
                open_listings(app, chat_id, convo, Category::Hotel, Some(subtype)).await
            }
            (CARD, IncomingKind::Callback { token, .. }) => {
                let ids = convo.str_list("ids");
                let index = convo.i64_value("index").unwrap_or(0).max(0) as usize;
                match token.as_str() {
                    "browse:next" | "browse:prev" => {
                        let next = if token == "browse:next" {
                            (index + 1).min(ids.len().saturating_sub(1))
                        } else {
                            index.saturating_sub(1)
                        };
                        if next == index {
                            return Ok(Step::Stay);
                        }
                        let Some(listing) = listing_at(app, &ids, next).await? else {
                            return stale_results(app, chat_id).await;
                        };
                        send_card(app, chat_id, &listing, next, ids.len()).await?;
                        Ok(Step::advance_with(CARD, merge1("index", json!(next as i64))))
                    }
                    "browse:pick" => {
                        let Some(listing) = listing_at(app, &ids, index).await? else {
                            return stale_results(app, chat_id).await;
                        };
                        send_detail(app, chat_id, &listing).await?;
                        Ok(Step::advance_with(
                            DETAIL,
                            merge1("listing_id", json!(listing.id.to_string())),
                        ))
                    }
                    "browse:map" => {
                        if let Some(listing) = listing_at(app, &ids, index).await? {
                            send_map(app, chat_id, &listing).await?;
                        }
                        Ok(Step::Stay)
                    }
                    "browse:back" => {
                        send_category_menu(app, chat_id).await?;
                        Ok(Step::advance(CATEGORY))
                    }
                    _ => Ok(Step::Stay),
                }
            }
            (DETAIL, IncomingKind::Callback { token, .. }) => match token.as_str() {
                "browse:book" => {
                    // The gate should have created the User row; if it is
                    // gone (reset database, shared store), re-register.
                    if app.store.get_user(chat_id).await?.is_none() {
                        return Ok(Step::Replace {
                            flow: super::register::FLOW_ID,
                        });
                    }
                    app.notifier
                        .send(chat_id, "Necha kishi borasiz? (1-10)", None)
                        .await?;
                    Ok(Step::advance(GUEST_COUNT))
                }
                "browse:map" => {
                    if let Some(listing) = context_listing(app, convo).await? {
                        send_map(app, chat_id, &listing).await?;
                    }
                    Ok(Step::Stay)
                }
                "browse:back" => {
                    let ids = convo.str_list("ids");
                    let index = convo.i64_value("index").unwrap_or(0).max(0) as usize;
                    let Some(listing) = listing_at(app, &ids, index).await? else {
                        return stale_results(app, chat_id).await;
                    };
                    send_card(app, chat_id, &listing, index, ids.len()).await?;
                    Ok(Step::advance(CARD))
                }
                _ => Ok(Step::Stay),
            },
            (GUEST_COUNT, IncomingKind::Text(body)) => {
                let Ok(count) = body.trim().parse::<u32>() else {
                    app.notifier
                        .send(chat_id, "Raqam kiriting: 1 dan 10 gacha.", None)
                        .await?;
                    return Ok(Step::Stay);
                };
                if !valid_guest_count(count) {
                    app.notifier
                        .send(chat_id, "Mehmonlar soni 1-10 oralig'ida bo'lsin.", None)
                        .await?;
                    return Ok(Step::Stay);
                }
                let Some(user) = app.store.get_user(chat_id).await? else {
                    return Ok(Step::Replace {
                        flow: super::register::FLOW_ID,
                    });
                };
                let mut merge = merge1("guest_count", json!(count));
                if count == 1 {
                    merge.insert("guest_names".into(), json!([user.full_name()]));
                    send_phone_choice(app, chat_id).await?;
                    return Ok(Step::advance_with(PHONE_CHOICE, merge));
                }
                app.notifier
                    .send(
                        chat_id,
                        &format!(
                            "Yana {} mehmon ismini yuboring, har birini alohida qatorda (3-60 harf).",
                            count - 1
                        ),
                        None,
                    )
                    .await?;
                Ok(Step::advance_with(GUEST_NAMES, merge))
            }
            (GUEST_NAMES, IncomingKind::Text(body)) => {
                let expected = convo.i64_value("guest_count").unwrap_or(0).max(0) as usize;
                let extra: Vec<String> = body
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect();
                if extra.len() != expected.saturating_sub(1) {
                    app.notifier
                        .send(
                            chat_id,
                            &format!(
                                "Aynan {} ta ism kerak, har biri alohida qatorda.",
                                expected.saturating_sub(1)
                            ),
                            None,
                        )
                        .await?;
                    return Ok(Step::Stay);
                }
                if let Some(bad) = extra.iter().find(|name| !valid_guest_name(name)) {
                    app.notifier
                        .send(
                            chat_id,
                            &format!("\"{}\" ism 3-60 harf bo'lsin.", text::escape(bad)),
                            None,
                        )
                        .await?;
                    return Ok(Step::Stay);
                }
                let Some(user) = app.store.get_user(chat_id).await? else {
                    return Ok(Step::Replace {
                        flow: super::register::FLOW_ID,
                    });
                };
                let mut names = vec![user.full_name()];
                names.extend(extra);
                send_phone_choice(app, chat_id).await?;
                Ok(Step::advance_with(
                    PHONE_CHOICE,
                    merge1("guest_names", json!(names)),
                ))
            }
            (PHONE_CHOICE, IncomingKind::Callback { token, .. }) => match token.as_str() {
                "browse:phone:registered" => {
                    let Some(user) = app.store.get_user(chat_id).await? else {
                        return Ok(Step::Replace {
                            flow: super::register::FLOW_ID,
                        });
                    };
                    ask_date(app, chat_id).await?;
                    Ok(Step::advance_with(DATE, merge1("phone", json!(user.phone))))
                }
                "browse:phone:new" => {
                    let keyboard = Keyboard::Reply(vec![
                        vec![ReplyButton::contact("📞 Raqamni ulashish")],
                        vec![ReplyButton::new(super::CANCEL_LABEL)],
                    ]);
                    app.notifier
                        .send(
                            chat_id,
                            "Yangi raqamni yozing (+998 XX XXX XX XX) yoki tugma orqali ulashing.",
                            Some(&keyboard),
                        )
                        .await?;
                    Ok(Step::advance(PHONE_MANUAL))
                }
                _ => Ok(Step::Stay),
            },
            (
                PHONE_MANUAL,
                IncomingKind::Contact {
                    phone,
                    contact_chat_id,
                },
            ) => {
                if *contact_chat_id != Some(chat_id) {
                    app.notifier
                        .send(chat_id, "Iltimos, o'zingizning raqamingizni ulashing.", None)
                        .await?;
                    return Ok(Step::Stay);
                }
                let Some(normalized) = normalize_contact_phone(phone) else {
                    app.notifier
                        .send(chat_id, "Raqam formati noto'g'ri.", None)
                        .await?;
                    return Ok(Step::Stay);
                };
                ask_date(app, chat_id).await?;
                Ok(Step::advance_with(DATE, merge1("phone", json!(normalized))))
            }
            (PHONE_MANUAL, IncomingKind::Text(body)) => {
                let Some(normalized) = normalize_uz_phone(body) else {
                    app.notifier
                        .send(chat_id, "Telefon +998 XX XXX XX XX ko'rinishida bo'lsin.", None)
                        .await?;
                    return Ok(Step::Stay);
                };
                ask_date(app, chat_id).await?;
                Ok(Step::advance_with(DATE, merge1("phone", json!(normalized))))
            }
            (DATE, IncomingKind::Text(body)) => {
                if !valid_date(body) {
                    app.notifier
                        .send(chat_id, "Sanani aniqroq yozing, masalan: 15-fevral.", None)
                        .await?;
                    return Ok(Step::Stay);
                }
                app.notifier
                    .send(chat_id, "Qo'shimcha izoh (yoki /skip):", None)
                    .await?;
                Ok(Step::advance_with(NOTE, merge1("date", json!(body.trim()))))
            }
            (NOTE, IncomingKind::Text(body)) => {
                let mut merge = Map::new();
                let trimmed = body.trim();
                if trimmed != "/skip" && !trimmed.is_empty() {
                    merge.insert("note".into(), json!(trimmed));
                }
                let Some(listing) = context_listing(app, convo).await? else {
                    app.notifier.send(chat_id, &text::internal_error(), None).await?;
                    return Ok(Step::Clear);
                };
                let keyboard = Keyboard::Inline(vec![vec![
                    InlineButton::new("✅ Tasdiqlash", "browse:confirm"),
                    InlineButton::new("❌ Bekor qilish", "cancel"),
                ]]);
                app.notifier
                    .send(
                        chat_id,
                        &booking_summary(convo, &listing, merge.get("note").and_then(Value::as_str)),
                        Some(&keyboard),
                    )
                    .await?;
                Ok(Step::advance_with(CONFIRM, merge))
            }
            (CONFIRM, IncomingKind::Callback { token, .. }) if token == "browse:confirm" => {
                confirm_booking(app, chat_id, convo).await
            }
            _ => {
                app.notifier
                    .send(chat_id, "Davom etish uchun tugmalardan foydalaning.", None)
                    .await?;
                Ok(Step::Stay)
            }
        }
    }
}

// ---------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------

async fn send_category_menu(app: &App, chat_id: i64) -> Result<()> {
    let rows = Category::ALL
        .iter()
        .map(|c| {
            vec![InlineButton::new(
                text::category_label(*c),
                format!("browse:cat:{}", c.as_str()),
            )]
        })
        .collect();
    app.notifier
        .send(chat_id, "Kategoriyani tanlang:", Some(&Keyboard::Inline(rows)))
        .await?;
    Ok(())
}

async fn open_listings(
    app: &App,
    chat_id: i64,
    convo: &Conversation,
    category: Category,
    subtype: Option<HotelType>,
) -> Result<Step> {
    let region = convo.str_value("region").unwrap_or("zomin");
    let listings = app.store.browse_listings(region, category, subtype).await?;
    if listings.is_empty() {
        app.notifier
            .send(chat_id, "Bu bo'limda hozircha takliflar yo'q.", None)
            .await?;
        return Ok(Step::Stay);
    }
    let ids: Vec<String> = listings.iter().map(|l| l.id.to_string()).collect();
    send_card(app, chat_id, &listings[0], 0, ids.len()).await?;

    let mut merge = Map::new();
    merge.insert("category".into(), json!(category.as_str()));
    if let Some(subtype) = subtype {
        merge.insert("subtype".into(), json!(subtype.as_str()));
    }
    merge.insert("ids".into(), json!(ids));
    merge.insert("index".into(), json!(0));
    Ok(Step::advance_with(CARD, merge))
}

fn card_keyboard(listing: &Listing, index: usize, total: usize) -> Keyboard {
    let mut nav = Vec::new();
    if index > 0 {
        nav.push(InlineButton::new("⬅️", "browse:prev"));
    }
    if index + 1 < total {
        nav.push(InlineButton::new("➡️", "browse:next"));
    }
    let mut action_row = vec![InlineButton::new("✅ Tanlash", "browse:pick")];
    if listing.coords().is_some() {
        action_row.push(InlineButton::new("🗺 Xarita", "browse:map"));
    }
    let mut rows = vec![action_row];
    if !nav.is_empty() {
        rows.push(nav);
    }
    rows.push(vec![InlineButton::new("🔙 Orqaga", "browse:back")]);
    Keyboard::Inline(rows)
}

async fn send_card(
    app: &App,
    chat_id: i64,
    listing: &Listing,
    index: usize,
    total: usize,
) -> Result<()> {
    let mut lines = vec![format!("🏷 <b>{}</b>", text::escape(&listing.title))];
    if let Some(price) = listing.price_from {
        lines.push(format!("💰 {} dan", text::format_price(price, &listing.currency)));
    }
    let description: String = listing.description.chars().take(200).collect();
    if !description.is_empty() {
        lines.push(String::new());
        lines.push(text::escape(&description));
    }
    lines.push(String::new());
    lines.push(format!("{}/{total}", index + 1));
    let caption = lines.join("\n");
    let keyboard = card_keyboard(listing, index, total);

    match listing.photos.first() {
        Some(photo) => {
            app.notifier
                .send_photo(chat_id, photo, &caption, Some(&keyboard))
                .await?;
        }
        None => {
            app.notifier.send(chat_id, &caption, Some(&keyboard)).await?;
        }
    }
    Ok(())
}

async fn send_detail(app: &App, chat_id: i64, listing: &Listing) -> Result<()> {
    if listing.photos.len() > 1 {
        app.notifier
            .send_media_group(chat_id, &listing.photos, "")
            .await?;
    }
    let mut lines = vec![format!("🏷 <b>{}</b>", text::escape(&listing.title))];
    if let Some(price) = listing.price_from {
        lines.push(format!("💰 {} dan", text::format_price(price, &listing.currency)));
    }
    if !listing.description.is_empty() {
        lines.push(String::new());
        lines.push(text::escape(&listing.description));
    }
    if let Some(address) = &listing.address {
        lines.push(format!("🏠 {}", text::escape(address)));
    }
    if let Some(phone) = &listing.phone {
        lines.push(format!("📞 {}", text::escape(phone)));
    }
    let mut action_row = vec![InlineButton::new("📝 Bron qilish", "browse:book")];
    if listing.coords().is_some() {
        action_row.push(InlineButton::new("🗺 Xarita", "browse:map"));
    }
    let keyboard = Keyboard::Inline(vec![
        action_row,
        vec![InlineButton::new("🔙 Orqaga", "browse:back")],
    ]);
    app.notifier
        .send(chat_id, &lines.join("\n"), Some(&keyboard))
        .await?;
    Ok(())
}

async fn send_map(app: &App, chat_id: i64, listing: &Listing) -> Result<()> {
    if let Some((lat, lon)) = listing.coords() {
        app.notifier.send_location(chat_id, lat, lon).await?;
    }
    Ok(())
}

fn booking_summary(convo: &Conversation, listing: &Listing, note: Option<&str>) -> String {
    let names = convo.str_list("guest_names");
    let mut lines = vec![
        "📋 <b>Buyurtmani tasdiqlang:</b>".to_string(),
        String::new(),
        format!("🏷 {}", text::escape(&listing.title)),
        format!("👥 Mehmonlar: {}", convo.i64_value("guest_count").unwrap_or(1)),
    ];
    for name in &names {
        lines.push(format!("  • {}", text::escape(name)));
    }
    lines.push(format!("📞 {}", text::escape(convo.str_value("phone").unwrap_or("-"))));
    lines.push(format!("📅 {}", text::escape(convo.str_value("date").unwrap_or("-"))));
    if let Some(note) = note {
        lines.push(format!("📝 {}", text::escape(note)));
    }
    lines.join("\n")
}

// ---------------------------------------------------------------------
// Confirmation
// ---------------------------------------------------------------------

async fn confirm_booking(app: &App, chat_id: i64, convo: &Conversation) -> Result<Step> {
    if let Err(wait) = app.booking_rate.check(chat_id) {
        app.notifier
            .send(
                chat_id,
                &format!("⏳ Juda tez-tez. {wait} soniyadan so'ng qayta urinib ko'ring."),
                None,
            )
            .await?;
        return Ok(Step::Stay);
    }

    let Some(listing) = context_listing(app, convo).await? else {
        app.notifier.send(chat_id, &text::internal_error(), None).await?;
        return Ok(Step::Clear);
    };

    let details = BookingDetails {
        guest_count: convo.i64_value("guest_count").unwrap_or(1).max(1) as u32,
        guest_names: convo.str_list("guest_names"),
        phone: convo.str_value("phone").unwrap_or_default().to_string(),
        date: convo.str_value("date").unwrap_or_default().to_string(),
        note: convo.str_value("note").map(str::to_string),
    };

    let booking_id = app.engine.create_booking(&listing, chat_id, details).await?;
    let outcome = app.dispatcher.dispatch(booking_id).await?;
    app.dispatcher.dispatch_monitor_copy(booking_id).await?;

    let reply = match outcome {
        DispatchOutcome::Sent => text::booking_sent_user(&listing.title),
        DispatchOutcome::OwnerMissing | DispatchOutcome::OwnerUnreachable => {
            text::booking_saved_unreachable(&listing.title)
        }
        DispatchOutcome::NotFound => text::internal_error(),
    };
    app.notifier.send(chat_id, &reply, None).await?;
    Ok(Step::Clear)
}

// ---------------------------------------------------------------------
// Context helpers
// ---------------------------------------------------------------------

async fn listing_at(app: &App, ids: &[String], index: usize) -> Result<Option<Listing>> {
    let Some(raw) = ids.get(index) else {
        return Ok(None);
    };
    let Ok(id) = Uuid::parse_str(raw) else {
        return Ok(None);
    };
    Ok(app.store.get_listing(id).await?)
}

async fn context_listing(app: &App, convo: &Conversation) -> Result<Option<Listing>> {
    let Some(raw) = convo.str_value("listing_id") else {
        return Ok(None);
    };
    let Ok(id) = Uuid::parse_str(raw) else {
        return Ok(None);
    };
    Ok(app.store.get_listing(id).await?)
}

async fn stale_results(app: &App, chat_id: i64) -> Result<Step> {
    app.notifier
        .send(chat_id, "Bu taklif endi mavjud emas. Kategoriyani qayta tanlang:", None)
        .await?;
    send_category_menu(app, chat_id).await?;
    Ok(Step::advance(CATEGORY))
}

async fn send_phone_choice(app: &App, chat_id: i64) -> Result<()> {
    let keyboard = Keyboard::Inline(vec![vec![
        InlineButton::new("📱 Ro'yxatdagi raqam", "browse:phone:registered"),
        InlineButton::new("✏️ Yangi raqam", "browse:phone:new"),
    ]]);
    app.notifier
        .send(chat_id, "Qaysi raqamdan foydalanamiz?", Some(&keyboard))
        .await?;
    Ok(())
}

async fn ask_date(app: &App, chat_id: i64) -> Result<()> {
    app.notifier
        .send(
            chat_id,
            "Qaysi sanaga? Masalan: 15-fevral",
            Some(&Keyboard::Remove),
        )
        .await?;
    Ok(())
}
