//! Registration gate: contact → first name → last name.
//!
//! The shared contact must belong to the sender; names are bounded.
//! Completion upserts the User row, so re-registering updates the phone
//! and names without creating duplicates.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::{Flow, CANCEL_LABEL};
use crate::app::App;
use crate::convo::{merge1, Conversation, Step};
use crate::domain::{normalize_contact_phone, valid_person_name};
use crate::transport::{IncomingKind, Keyboard, ReplyButton};

pub const FLOW_ID: &str = "register";

const AWAITING_CONTACT: &str = "awaiting_contact";
const AWAITING_FIRST_NAME: &str = "awaiting_first_name";
const AWAITING_LAST_NAME: &str = "awaiting_last_name";

const STATES: &[&str] = &[AWAITING_CONTACT, AWAITING_FIRST_NAME, AWAITING_LAST_NAME];

pub struct RegisterFlow;

#[async_trait]
impl Flow for RegisterFlow {
    fn id(&self) -> &'static str {
        FLOW_ID
    }

    fn states(&self) -> &'static [&'static str] {
        STATES
    }

    async fn enter(&self, app: &App, chat_id: i64) -> Result<Conversation> {
        let keyboard = Keyboard::Reply(vec![
            vec![ReplyButton::contact("📞 Raqamni ulashish")],
            vec![ReplyButton::new(CANCEL_LABEL)],
        ]);
        app.notifier
            .send(
                chat_id,
                "Ro'yxatdan o'tish uchun telefon raqamingizni tugma orqali ulashing.",
                Some(&keyboard),
            )
            .await?;
        Ok(Conversation::new(FLOW_ID, AWAITING_CONTACT))
    }

    async fn handle(
        &self,
        app: &App,
        chat_id: i64,
        convo: &Conversation,
        incoming: &IncomingKind,
    ) -> Result<Step> {
        match (convo.state.as_str(), incoming) {
            (
                AWAITING_CONTACT,
                IncomingKind::Contact {
                    phone,
                    contact_chat_id,
                },
            ) => {
                if *contact_chat_id != Some(chat_id) {
                    app.notifier
                        .send(
                            chat_id,
                            "Iltimos, o'zingizning raqamingizni ulashing.",
                            None,
                        )
                        .await?;
                    return Ok(Step::Stay);
                }
                let Some(normalized) = normalize_contact_phone(phone) else {
                    app.notifier
                        .send(chat_id, "Raqam formati noto'g'ri. Qaytadan urinib ko'ring.", None)
                        .await?;
                    return Ok(Step::Stay);
                };
                app.notifier
                    .send(chat_id, "Ismingizni kiriting (2-60 harf).", Some(&Keyboard::Remove))
                    .await?;
                Ok(Step::advance_with(
                    AWAITING_FIRST_NAME,
                    merge1("phone", json!(normalized)),
                ))
            }
            (AWAITING_CONTACT, _) => {
                app.notifier
                    .send(chat_id, "Raqamingizni pastdagi tugma orqali ulashing.", None)
                    .await?;
                Ok(Step::Stay)
            }
            (AWAITING_FIRST_NAME, IncomingKind::Text(name)) => {
                if !valid_person_name(name) {
                    app.notifier
                        .send(chat_id, "Ism 2-60 harf bo'lishi kerak. Qaytadan kiriting.", None)
                        .await?;
                    return Ok(Step::Stay);
                }
                app.notifier
                    .send(chat_id, "Familiyangizni kiriting (2-60 harf).", None)
                    .await?;
                Ok(Step::advance_with(
                    AWAITING_LAST_NAME,
                    merge1("first_name", json!(name.trim())),
                ))
            }
            (AWAITING_LAST_NAME, IncomingKind::Text(name)) => {
                if !valid_person_name(name) {
                    app.notifier
                        .send(chat_id, "Familiya 2-60 harf bo'lishi kerak. Qaytadan kiriting.", None)
                        .await?;
                    return Ok(Step::Stay);
                }
                let phone = convo.str_value("phone").unwrap_or_default().to_string();
                let first_name = convo.str_value("first_name").unwrap_or_default().to_string();
                app.store
                    .upsert_user(chat_id, &phone, &first_name, name.trim())
                    .await?;

                let is_admin = app.config.is_admin(chat_id);
                app.notifier
                    .send(chat_id, "✅ Ro'yxatdan o'tdingiz!", Some(&Keyboard::Remove))
                    .await?;
                app.notifier
                    .send(
                        chat_id,
                        &crate::text::greeting(is_admin),
                        Some(&super::main_menu(is_admin)),
                    )
                    .await?;
                Ok(Step::Clear)
            }
            _ => {
                app.notifier
                    .send(chat_id, "Davom etish uchun so'ralgan ma'lumotni yuboring.", None)
                    .await?;
                Ok(Step::Stay)
            }
        }
    }
}
