//! Add-listing wizard, gated to the admin set.
//!
//! category → [hotel_type] → title → description? → region → [price?] →
//! phone? → location → photos → confirm → save. Hotels and places cannot
//! skip location and need at least one photo.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map};

use super::Flow;
use crate::app::App;
use crate::convo::{merge1, Conversation, Step};
use crate::domain::{normalize_uz_phone, valid_title, Category, HotelType, MAX_PHOTOS};
use crate::store::NewListing;
use crate::text;
use crate::transport::{IncomingKind, InlineButton, Keyboard};

pub const FLOW_ID: &str = "wizard";

const CATEGORY: &str = "category";
const HOTEL_TYPE: &str = "hotel_type";
const TITLE: &str = "title";
const DESCRIPTION: &str = "description";
const REGION: &str = "region";
const PRICE: &str = "price";
const PHONE: &str = "phone";
const LOCATION: &str = "location";
const PHOTOS: &str = "photos";
const CONFIRM: &str = "confirm";

const STATES: &[&str] = &[
    CATEGORY, HOTEL_TYPE, TITLE, DESCRIPTION, REGION, PRICE, PHONE, LOCATION, PHOTOS, CONFIRM,
];

/// The only region for now.
const REGIONS: &[&str] = &["zomin"];

pub struct WizardFlow;

#[async_trait]
impl Flow for WizardFlow {
    fn id(&self) -> &'static str {
        FLOW_ID
    }

    fn states(&self) -> &'static [&'static str] {
        STATES
    }

    async fn enter(&self, app: &App, chat_id: i64) -> Result<Conversation> {
        let rows = Category::ALL
            .iter()
            .map(|c| {
                vec![InlineButton::new(
                    text::category_label(*c),
                    format!("wizard:cat:{}", c.as_str()),
                )]
            })
            .collect();
        app.notifier
            .send(
                chat_id,
                "➕ <b>Yangi listing</b>\n\nKategoriyani tanlang:",
                Some(&Keyboard::Inline(rows)),
            )
            .await?;
        Ok(Conversation::new(FLOW_ID, CATEGORY))
    }

    async fn handle(
        &self,
        app: &App,
        chat_id: i64,
        convo: &Conversation,
        incoming: &IncomingKind,
    ) -> Result<Step> {
        match (convo.state.as_str(), incoming) {
            (CATEGORY, IncomingKind::Callback { token, .. }) => {
                let Some(category) = token
                    .strip_prefix("wizard:cat:")
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
                                format!("wizard:ht:{}", t.as_str()),
                            )]
                        })
                        .collect();
                    app.notifier
                        .send(chat_id, "Mehmonxona turini tanlang:", Some(&Keyboard::Inline(rows)))
                        .await?;
                    return Ok(Step::advance_with(
                        HOTEL_TYPE,
                        merge1("category", json!(category.as_str())),
                    ));
                }
                app.notifier
                    .send(chat_id, "Sarlavhani kiriting (kamida 3 harf):", None)
                    .await?;
                Ok(Step::advance_with(
                    TITLE,
                    merge1("category", json!(category.as_str())),
                ))
            }
            (HOTEL_TYPE, IncomingKind::Callback { token, .. }) => {
                let Some(hotel_type) = token
                    .strip_prefix("wizard:ht:")
                    .and_then(HotelType::from_str)
                else {
                    return Ok(Step::Stay);
                };
                app.notifier
                    .send(chat_id, "Sarlavhani kiriting (kamida 3 harf):", None)
                    .await?;
                Ok(Step::advance_with(
                    TITLE,
                    merge1("hotel_type", json!(hotel_type.as_str())),
                ))
            }
            (TITLE, IncomingKind::Text(title)) => {
                if !valid_title(title) {
                    app.notifier
                        .send(chat_id, "Sarlavha kamida 3 harf. Qaytadan kiriting.", None)
                        .await?;
                    return Ok(Step::Stay);
                }
                app.notifier
                    .send(chat_id, "Tavsif kiriting (yoki /skip):", None)
                    .await?;
                Ok(Step::advance_with(
                    DESCRIPTION,
                    merge1("title", json!(title.trim())),
                ))
            }
            (DESCRIPTION, IncomingKind::Text(body)) => {
                let description = if body.trim() == "/skip" {
                    String::new()
                } else {
                    body.trim().to_string()
                };
                let rows = REGIONS
                    .iter()
                    .map(|r| vec![InlineButton::new(format!("📍 {r}"), format!("wizard:region:{r}"))])
                    .collect();
                app.notifier
                    .send(chat_id, "Hududni tanlang:", Some(&Keyboard::Inline(rows)))
                    .await?;
                Ok(Step::advance_with(
                    REGION,
                    merge1("description", json!(description)),
                ))
            }
            (REGION, IncomingKind::Callback { token, .. }) => {
                let Some(region) = token
                    .strip_prefix("wizard:region:")
                    .filter(|r| REGIONS.contains(r))
                else {
                    return Ok(Step::Stay);
                };
                let merge = merge1("region", json!(region));
                if category_of(convo).is_some_and(|c| c.has_price()) {
                    app.notifier
                        .send(chat_id, "Boshlang'ich narx, UZS (yoki /skip):", None)
                        .await?;
                    return Ok(Step::advance_with(PRICE, merge));
                }
                app.notifier
                    .send(chat_id, "Aloqa telefoni (yoki /skip):", None)
                    .await?;
                Ok(Step::advance_with(PHONE, merge))
            }
            (PRICE, IncomingKind::Text(body)) => {
                let trimmed = body.trim();
                let merge = if trimmed == "/skip" {
                    Map::new()
                } else {
                    match trimmed.replace(' ', "").parse::<i64>() {
                        Ok(price) if price >= 0 => merge1("price_from", json!(price)),
                        _ => {
                            app.notifier
                                .send(chat_id, "Narx butun son bo'lsin, masalan 450000.", None)
                                .await?;
                            return Ok(Step::Stay);
                        }
                    }
                };
                app.notifier
                    .send(chat_id, "Aloqa telefoni (yoki /skip):", None)
                    .await?;
                Ok(Step::advance_with(PHONE, merge))
            }
            (PHONE, IncomingKind::Text(body)) => {
                let trimmed = body.trim();
                let merge = if trimmed == "/skip" {
                    Map::new()
                } else {
                    match normalize_uz_phone(trimmed) {
                        Some(phone) => merge1("phone", json!(phone)),
                        None => {
                            app.notifier
                                .send(chat_id, "Telefon +998 XX XXX XX XX ko'rinishida bo'lsin.", None)
                                .await?;
                            return Ok(Step::Stay);
                        }
                    }
                };
                let required = category_of(convo).is_some_and(|c| c.requires_location());
                let hint = if required {
                    "Joylashuvni yuboring (majburiy):"
                } else {
                    "Joylashuvni yuboring (yoki /skip):"
                };
                app.notifier.send(chat_id, hint, None).await?;
                Ok(Step::advance_with(LOCATION, merge))
            }
            (
                LOCATION,
                IncomingKind::Location {
                    latitude,
                    longitude,
                },
            ) => {
                let mut merge = Map::new();
                merge.insert("latitude".into(), json!(latitude));
                merge.insert("longitude".into(), json!(longitude));
                app.notifier
                    .send(
                        chat_id,
                        &format!("Rasmlar yuboring (1-{MAX_PHOTOS} ta), keyin /done:"),
                        None,
                    )
                    .await?;
                Ok(Step::advance_with(PHOTOS, merge))
            }
            (LOCATION, IncomingKind::Text(body)) if body.trim() == "/skip" => {
                if category_of(convo).is_some_and(|c| c.requires_location()) {
                    app.notifier
                        .send(chat_id, "Bu kategoriya uchun joylashuv majburiy.", None)
                        .await?;
                    return Ok(Step::Stay);
                }
                app.notifier
                    .send(
                        chat_id,
                        &format!("Rasmlar yuboring (0-{MAX_PHOTOS} ta), keyin /done:"),
                        None,
                    )
                    .await?;
                Ok(Step::advance(PHOTOS))
            }
            (PHOTOS, IncomingKind::Photo { file_id }) => {
                let mut photos = convo.str_list("photos");
                if photos.len() >= MAX_PHOTOS {
                    app.notifier
                        .send(chat_id, &format!("Ko'pi bilan {MAX_PHOTOS} ta rasm."), None)
                        .await?;
                    return Ok(Step::Stay);
                }
                photos.push(file_id.clone());
                app.notifier
                    .send(
                        chat_id,
                        &format!("Rasm qabul qilindi ({}/{MAX_PHOTOS}). Yana yuboring yoki /done.", photos.len()),
                        None,
                    )
                    .await?;
                Ok(Step::advance_with(PHOTOS, merge1("photos", json!(photos))))
            }
            (PHOTOS, IncomingKind::Text(body)) if body.trim() == "/done" => {
                let photos = convo.str_list("photos");
                let needs_photo = category_of(convo).is_some_and(|c| c.requires_photos());
                if needs_photo && photos.is_empty() {
                    app.notifier
                        .send(chat_id, "Bu kategoriya uchun kamida 1 ta rasm kerak.", None)
                        .await?;
                    return Ok(Step::Stay);
                }
                let keyboard = Keyboard::Inline(vec![vec![
                    InlineButton::new("💾 Saqlash", "wizard:save"),
                    InlineButton::new("❌ Bekor qilish", "wizard:cancel"),
                ]]);
                app.notifier
                    .send(chat_id, &summary(convo), Some(&keyboard))
                    .await?;
                Ok(Step::advance(CONFIRM))
            }
            (CONFIRM, IncomingKind::Callback { token, .. }) => match token.as_str() {
                "wizard:save" => {
                    let new = build_listing(convo, chat_id)?;
                    let listing_id = app.store.create_listing(&new).await?;
                    app.notifier
                        .send(
                            chat_id,
                            &format!(
                                "✅ Listing saqlandi: <b>{}</b>\nID: <code>{listing_id}</code>",
                                text::escape(&new.title)
                            ),
                            None,
                        )
                        .await?;
                    Ok(Step::Clear)
                }
                "wizard:cancel" => {
                    app.notifier.send(chat_id, &text::cancelled(), None).await?;
                    Ok(Step::Clear)
                }
                _ => Ok(Step::Stay),
            },
            _ => {
                app.notifier
                    .send(chat_id, "Davom etish uchun so'ralgan ma'lumotni yuboring.", None)
                    .await?;
                Ok(Step::Stay)
            }
        }
    }
}

fn category_of(convo: &Conversation) -> Option<Category> {
    convo.str_value("category").and_then(Category::from_str)
}

fn summary(convo: &Conversation) -> String {
    let category = category_of(convo)
        .map(text::category_label)
        .unwrap_or("-");
    let mut lines = vec![
        "📋 <b>Listing tayyor:</b>".to_string(),
        String::new(),
        format!("🏷 {}", text::escape(convo.str_value("title").unwrap_or("-"))),
        format!("📂 {category}"),
        format!("📍 {}", convo.str_value("region").unwrap_or("-")),
    ];
    if let Some(subtype) = convo.str_value("hotel_type").and_then(HotelType::from_str) {
        lines.push(format!("🛏 {}", subtype.label()));
    }
    if let Some(price) = convo.i64_value("price_from") {
        lines.push(format!("💰 {}", text::format_price(price, "UZS")));
    }
    if let Some(phone) = convo.str_value("phone") {
        lines.push(format!("📞 {}", text::escape(phone)));
    }
    let description = convo.str_value("description").unwrap_or("");
    if !description.is_empty() {
        lines.push(format!("📝 {}", text::escape(description)));
    }
    lines.push(format!("🖼 Rasmlar: {}", convo.str_list("photos").len()));
    lines.push(String::new());
    lines.push("Saqlaymizmi?".to_string());
    lines.join("\n")
}

fn build_listing(convo: &Conversation, owner_chat_id: i64) -> Result<NewListing> {
    let category = category_of(convo)
        .ok_or_else(|| anyhow::anyhow!("wizard context lost its category"))?;
    Ok(NewListing {
        region: convo.str_value("region").unwrap_or("zomin").to_string(),
        category,
        subtype: convo.str_value("hotel_type").and_then(HotelType::from_str),
        title: convo.str_value("title").unwrap_or_default().to_string(),
        description: convo.str_value("description").unwrap_or_default().to_string(),
        price_from: convo.i64_value("price_from"),
        phone: convo.str_value("phone").map(str::to_string),
        owner_chat_id,
        latitude: convo.f64_value("latitude"),
        longitude: convo.f64_value("longitude"),
        address: None,
        photos: convo.str_list("photos"),
    })
}
