//! Outgoing message texts (Uzbek-first, Russian where partners need it)
//! and HTML safety helpers.
//!
//! Everything user-provided passes through [`escape`] before it is
//! embedded in an HTML-mode message body.

use crate::domain::{
    Booking, BookingDetails, BookingStatus, Category, ExpiredBooking, Listing,
    BOOKING_TIMEOUT_MINUTES,
};

/// Escape text for HTML parse mode.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// "450000" → "450 000 UZS"
pub fn format_price(price: i64, currency: &str) -> String {
    let digits = price.to_string();
    let mut grouped = String::new();
    let len = digits.len();
    for (i, c) in digits.chars().enumerate() {
        grouped.push(c);
        let rest = len - i - 1;
        if rest > 0 && rest % 3 == 0 {
            grouped.push(' ');
        }
    }
    format!("{grouped} {currency}")
}

pub fn greeting(is_admin: bool) -> String {
    let mut lines = vec![
        "Assalomu alaykum! <b>SafarTrip.uz</b> botiga xush kelibsiz.".to_string(),
        String::new(),
        "📍 <b>Hudud:</b> Zomin".to_string(),
        String::new(),
        "Mehmonxonalar, gidlar, taksi va diqqatga sazovor joylarni shu yerda topasiz va band qilasiz.".to_string(),
        String::new(),
        "📋 <b>Buyruqlar:</b>".to_string(),
        "/browse - Takliflarni ko'rish".to_string(),
        "/help - Yordam".to_string(),
    ];
    if is_admin {
        lines.push("/add - Yangi listing qo'shish".to_string());
        lines.push("/my_listings - Listinglaringiz".to_string());
    }
    lines.join("\n")
}

pub fn help(is_admin: bool) -> String {
    let mut lines = vec![
        "📚 <b>Yordam</b>".to_string(),
        String::new(),
        "/browse - Mehmonxonalar, gidlar, taksini ko'rish".to_string(),
        "/cancel - Joriy amalni bekor qilish".to_string(),
        String::new(),
        "<i>SafarTrip.uz — sayohatni oson rejalashtiring.</i>".to_string(),
    ];
    if is_admin {
        lines.push(String::new());
        lines.push("<b>Admin:</b>".to_string());
        lines.push("/add - Yangi listing qo'shish".to_string());
        lines.push("/my_listings - Listinglaringizni boshqarish".to_string());
        lines.push("/health - Tizim holati".to_string());
    }
    lines.join("\n")
}

/// Bilingual prompt sent to the listing owner with accept/reject buttons.
pub fn owner_prompt(listing: &Listing, details: &BookingDetails) -> String {
    let mut lines = vec![
        "🔔 <b>Yangi buyurtma!</b> / <b>Новая заявка!</b>".to_string(),
        String::new(),
        format!("🏷 <b>{}</b>", escape(&listing.title)),
    ];
    if let Some(price) = listing.price_from {
        lines.push(format!(
            "💰 {} dan / от",
            format_price(price, &listing.currency)
        ));
    }
    lines.push(format!(
        "👥 Mehmonlar / Гости: {}",
        details.guest_count
    ));
    for name in &details.guest_names {
        lines.push(format!("  • {}", escape(name)));
    }
    lines.push(format!("📞 {}", escape(&details.phone)));
    lines.push(format!("📅 Sana / Дата: {}", escape(&details.date)));
    if let Some(note) = &details.note {
        lines.push(format!("📝 Izoh / Примечание: {}", escape(note)));
    }
    lines.push(String::new());
    lines.push(format!(
        "⏱ {BOOKING_TIMEOUT_MINUTES} daqiqa ichida javob bering / Ответьте в течение {BOOKING_TIMEOUT_MINUTES} минут"
    ));
    lines.join("\n")
}

/// Read-only copy of the owner prompt for the admin monitors.
pub fn monitor_copy(booking: &Booking, listing_title: &str) -> String {
    let details = booking.payload.details();
    let mut lines = vec![
        "👁 <b>Monitoring: yangi buyurtma</b>".to_string(),
        String::new(),
        format!("🏷 {}", escape(listing_title)),
        format!("🆔 <code>{}</code>", booking.short_id()),
        format!("👤 Mijoz: <code>{}</code>", booking.user_chat_id),
        format!("🤝 Hamkor: <code>{}</code>", booking.owner_chat_id),
        format!("👥 Mehmonlar: {}", details.guest_count),
        format!("📞 {}", escape(&details.phone)),
        format!("📅 {}", escape(&details.date)),
    ];
    if let Some(note) = &details.note {
        lines.push(format!("📝 {}", escape(note)));
    }
    lines.join("\n")
}

pub fn booking_sent_user(listing_title: &str) -> String {
    format!(
        "✅ Buyurtmangiz <b>{}</b> egasiga yuborildi.\n\n⏱ {BOOKING_TIMEOUT_MINUTES} daqiqagacha javob kuting.",
        escape(listing_title)
    )
}

pub fn booking_saved_unreachable(listing_title: &str) -> String {
    format!(
        "📝 Buyurtmangiz <b>{}</b> uchun saqlandi, lekin hamkor hozircha aloqada emas.\n\nBiz siz bilan tez orada bog'lanamiz.",
        escape(listing_title)
    )
}

pub fn booking_accepted_user(listing_title: &str) -> String {
    format!(
        "🎉 <b>Buyurtma qabul qilindi!</b>\n\n<b>{}</b> egasi buyurtmangizni tasdiqladi. Tez orada siz bilan bog'lanishadi.",
        escape(listing_title)
    )
}

pub fn booking_rejected_user(listing_title: &str) -> String {
    format!(
        "😔 Afsuski <b>{}</b> egasi buyurtmangizni rad etdi.\n\nBoshqa taklifni tanlab ko'ring: /browse",
        escape(listing_title)
    )
}

pub fn booking_timeout_user(listing_title: &str) -> String {
    format!(
        "⏰ <b>Vaqt tugadi</b>\n\nSizning <b>{}</b> bo'yicha buyurtmangizga belgilangan vaqt ichida javob bo'lmadi.\n\nIltimos, keyinroq qaytadan urinib ko'ring yoki boshqa xizmatni tanlang.",
        escape(listing_title)
    )
}

/// Admin notice when a booking expired without a partner answer.
pub fn booking_timeout_admin(row: &ExpiredBooking) -> String {
    let title = row.listing_title.as_deref().unwrap_or("Xizmat");
    let phone = row.owner_phone.as_deref().unwrap_or("-");
    format!(
        "⏰ <b>Hamkor javob bermadi</b>\n\n🏷 {}\n🆔 <code>{}</code>\n🤝 {} (<code>{}</code>)\n📞 {}\n\nIltimos, hamkorga qo'ng'iroq qiling.",
        escape(title),
        crate::domain::short_id(&row.id),
        escape(&row.owner_name()),
        row.owner_chat_id,
        escape(phone)
    )
}

/// Decision notice for admins (both outcomes).
pub fn decision_admin(listing_title: &str, short_id: &str, accepted: bool) -> String {
    let verdict = if accepted {
        "✅ qabul qilindi"
    } else {
        "❌ rad etildi"
    };
    format!(
        "📣 Buyurtma <code>{short_id}</code> ({}) {verdict}.",
        escape(listing_title)
    )
}

/// Escalation when a listing has no linked owner chat.
pub fn escalation_no_owner(listing: &Listing, booking: &Booking) -> String {
    let phone = listing.phone.as_deref().unwrap_or("-");
    format!(
        "🚨 <b>Hamkor ulanmagan</b>\n\n🏷 {}\n🆔 <code>{}</code>\nListing egasi botga ulanmagan, buyurtma yuborilmadi.\n📞 Listing telefoni: {}\n\nMijoz bilan qo'lda bog'laning.",
        escape(&listing.title),
        booking.short_id(),
        escape(phone)
    )
}

/// Escalation when the owner exists but the transport cannot reach them.
pub fn escalation_unreachable(
    listing_title: &str,
    booking: &Booking,
    owner_name: Option<&str>,
    owner_phone: Option<&str>,
) -> String {
    format!(
        "🚨 <b>Hamkor aloqada emas</b>\n\n🏷 {}\n🆔 <code>{}</code>\n🤝 {} (<code>{}</code>)\n📞 {}\n\nBuyurtma yuborilmadi; muddat tugashi bilan bekor bo'ladi.",
        escape(listing_title),
        booking.short_id(),
        escape(owner_name.unwrap_or("-")),
        booking.owner_chat_id,
        escape(owner_phone.unwrap_or("-"))
    )
}

/// Admin error report body.
pub fn error_report(kind: &str, message: &str, site: &str) -> String {
    format!(
        "⚠️ <b>BOT ERROR</b>\n\n<b>Kind:</b> {}\n<b>Site:</b> {}\n<b>Message:</b>\n<pre>{}</pre>",
        escape(kind),
        escape(site),
        escape(message)
    )
}

/// Menu/button label for a category.
pub fn category_label(category: Category) -> &'static str {
    match category {
        Category::Hotel => "🏨 Mehmonxona",
        Category::Guide => "🧑‍💼 Gid",
        Category::Taxi => "🚕 Taksi",
        Category::Place => "🎡 Diqqatga sazovor joy",
    }
}

/// Short status label for booking lists.
pub fn status_label(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::PendingPartner => "⏳ Kutilmoqda",
        BookingStatus::Sent => "📤 Yuborilgan",
        BookingStatus::Accepted => "✅ Qabul qilingan",
        BookingStatus::Rejected => "❌ Rad etilgan",
        BookingStatus::Timeout => "⌛ Muddati o'tgan",
    }
}

pub fn internal_error() -> String {
    "⚠️ Ichki xatolik yuz berdi. Birozdan so'ng qaytadan urinib ko'ring.".to_string()
}

pub fn cancelled() -> String {
    "❌ Bekor qilindi. /browse bilan davom etishingiz mumkin.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_covers_markup() {
        assert_eq!(escape("<script>&"), "&lt;script&gt;&amp;");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn price_grouping() {
        assert_eq!(format_price(450000, "UZS"), "450 000 UZS");
        assert_eq!(format_price(1500, "UZS"), "1 500 UZS");
        assert_eq!(format_price(900, "UZS"), "900 UZS");
        assert_eq!(format_price(12345678, "UZS"), "12 345 678 UZS");
    }

    #[test]
    fn greeting_admin_rows() {
        assert!(!greeting(false).contains("/add"));
        assert!(greeting(true).contains("/add"));
        assert!(help(true).contains("/health"));
        assert!(!help(false).contains("/health"));
    }
}
