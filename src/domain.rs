//! Core domain types: users, listings, bookings, and input validation.
//!
//! Enum↔string mappings match the database text columns exactly; the
//! storage layer round-trips through `as_str`/`from_str` without any
//! intermediate representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Booking deadline: a partner has this long to answer before the sweeper
/// expires the request.
pub const BOOKING_TIMEOUT_MINUTES: i64 = 5;

/// Maximum photos attached to a listing.
pub const MAX_PHOTOS: usize = 5;

/// Guests per booking.
pub const MAX_GUESTS: u32 = 10;

/// A chat identity that completed registration.
#[derive(Debug, Clone)]
pub struct User {
    pub chat_id: i64,
    /// Normalized E.164 with a single leading `+`.
    pub phone: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Listing category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Hotel,
    Guide,
    Taxi,
    Place,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Hotel,
        Category::Guide,
        Category::Taxi,
        Category::Place,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Hotel => "hotel",
            Category::Guide => "guide",
            Category::Taxi => "taxi",
            Category::Place => "place",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "hotel" => Some(Category::Hotel),
            "guide" => Some(Category::Guide),
            "taxi" => Some(Category::Taxi),
            "place" => Some(Category::Place),
            _ => None,
        }
    }

    /// Hotels and places must carry coordinates and at least one photo.
    pub fn requires_location(&self) -> bool {
        matches!(self, Category::Hotel | Category::Place)
    }

    pub fn requires_photos(&self) -> bool {
        matches!(self, Category::Hotel | Category::Place)
    }

    /// Only hotels and taxis publish a starting price.
    pub fn has_price(&self) -> bool {
        matches!(self, Category::Hotel | Category::Taxi)
    }
}

/// Hotel subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotelType {
    Shale,
    UyMehmonxona,
    Mehmonxona,
    Kapsula,
    Dacha,
}

impl HotelType {
    pub const ALL: [HotelType; 5] = [
        HotelType::Shale,
        HotelType::UyMehmonxona,
        HotelType::Mehmonxona,
        HotelType::Kapsula,
        HotelType::Dacha,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HotelType::Shale => "shale",
            HotelType::UyMehmonxona => "uy_mehmonxona",
            HotelType::Mehmonxona => "mehmonxona",
            HotelType::Kapsula => "kapsula",
            HotelType::Dacha => "dacha",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "shale" => Some(HotelType::Shale),
            "uy_mehmonxona" => Some(HotelType::UyMehmonxona),
            "mehmonxona" => Some(HotelType::Mehmonxona),
            "kapsula" => Some(HotelType::Kapsula),
            "dacha" => Some(HotelType::Dacha),
            _ => None,
        }
    }

    /// Display label (Uzbek).
    pub fn label(&self) -> &'static str {
        match self {
            HotelType::Shale => "Shale",
            HotelType::UyMehmonxona => "Uy-mehmonxona",
            HotelType::Mehmonxona => "Mehmonxona",
            HotelType::Kapsula => "Kapsula",
            HotelType::Dacha => "Dacha",
        }
    }
}

/// An offer published by an owner.
#[derive(Debug, Clone)]
pub struct Listing {
    pub id: Uuid,
    pub region: String,
    pub category: Category,
    pub subtype: Option<HotelType>,
    pub title: String,
    pub description: String,
    pub price_from: Option<i64>,
    pub currency: String,
    pub phone: Option<String>,
    /// The partner who fulfills bookings for this listing.
    pub owner_chat_id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    /// Ordered external media identifiers, at most [`MAX_PHOTOS`].
    pub photos: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    pub fn coords(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Booking status column. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStatus {
    PendingPartner,
    Sent,
    Accepted,
    Rejected,
    Timeout,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPartner => "pending_partner",
            BookingStatus::Sent => "sent",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Timeout => "timeout",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending_partner" => Some(BookingStatus::PendingPartner),
            "sent" => Some(BookingStatus::Sent),
            "accepted" => Some(BookingStatus::Accepted),
            "rejected" => Some(BookingStatus::Rejected),
            "timeout" => Some(BookingStatus::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Accepted | BookingStatus::Rejected | BookingStatus::Timeout
        )
    }
}

/// What the guest asked for, stored as tagged jsonb. The tag is derived
/// from the listing category at creation and validated on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingPayload {
    Hotel(BookingDetails),
    Taxi(BookingDetails),
    Guide(BookingDetails),
}

impl BookingPayload {
    /// Place listings book through the guide pipeline.
    pub fn for_category(category: Category, details: BookingDetails) -> Self {
        match category {
            Category::Hotel => BookingPayload::Hotel(details),
            Category::Taxi => BookingPayload::Taxi(details),
            Category::Guide | Category::Place => BookingPayload::Guide(details),
        }
    }

    pub fn details(&self) -> &BookingDetails {
        match self {
            BookingPayload::Hotel(d) | BookingPayload::Taxi(d) | BookingPayload::Guide(d) => d,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDetails {
    pub guest_count: u32,
    /// 1..=10 entries; the first is always the registered user.
    pub guest_names: Vec<String>,
    pub phone: String,
    /// Free text, e.g. "15-fevral".
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A user's request against one listing.
#[derive(Debug, Clone)]
pub struct Booking {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub user_chat_id: i64,
    /// Denormalized copy of the listing owner at creation time.
    pub owner_chat_id: i64,
    pub payload: BookingPayload,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Transport message id of the owner-facing prompt.
    pub partner_message_id: Option<i64>,
}

impl Booking {
    /// Short id used in callback tokens: first 8 hex chars.
    pub fn short_id(&self) -> String {
        short_id(&self.id)
    }
}

pub fn short_id(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// One row returned by the expiry sweep, joined with listing and owner.
#[derive(Debug, Clone)]
pub struct ExpiredBooking {
    pub id: Uuid,
    pub user_chat_id: i64,
    pub owner_chat_id: i64,
    pub listing_id: Option<Uuid>,
    pub listing_title: Option<String>,
    pub owner_phone: Option<String>,
    pub owner_first_name: Option<String>,
    pub owner_last_name: Option<String>,
}

impl ExpiredBooking {
    pub fn owner_name(&self) -> String {
        match (&self.owner_first_name, &self.owner_last_name) {
            (Some(f), Some(l)) => format!("{f} {l}"),
            (Some(f), None) => f.clone(),
            (None, Some(l)) => l.clone(),
            (None, None) => "-".to_string(),
        }
    }
}

// ---------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------

/// Normalize a shared-contact phone to `+<digits>` and validate the
/// lenient international form: 11..=16 digits after the plus.
pub fn normalize_contact_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if (11..=16).contains(&digits.len()) {
        Some(format!("+{digits}"))
    } else {
        None
    }
}

/// Normalize manually-typed Uzbek numbers. Accepts `+998XXXXXXXXX`,
/// `998XXXXXXXXX`, and the local nine-digit form starting with 3..=9;
/// all normalize to `+998XXXXXXXXX`.
pub fn normalize_uz_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        12 if digits.starts_with("998") => Some(format!("+{digits}")),
        9 if digits.as_bytes()[0] >= b'3' => Some(format!("+998{digits}")),
        _ => None,
    }
}

/// Registration names: 2..=60 chars after trimming.
pub fn valid_person_name(s: &str) -> bool {
    let len = s.trim().chars().count();
    (2..=60).contains(&len)
}

/// Extra guest names: 3..=60 chars after trimming.
pub fn valid_guest_name(s: &str) -> bool {
    let len = s.trim().chars().count();
    (3..=60).contains(&len)
}

/// Listing titles: at least 3 chars.
pub fn valid_title(s: &str) -> bool {
    s.trim().chars().count() >= 3
}

/// Guest count bounds.
pub fn valid_guest_count(n: u32) -> bool {
    (1..=MAX_GUESTS).contains(&n)
}

/// Booking dates are free text with a minimal length.
pub fn valid_date(s: &str) -> bool {
    s.trim().chars().count() >= 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uz_phone_forms_normalize_identically() {
        let want = "+998901234567";
        assert_eq!(normalize_uz_phone("+998901234567").as_deref(), Some(want));
        assert_eq!(normalize_uz_phone("998901234567").as_deref(), Some(want));
        assert_eq!(normalize_uz_phone("901234567").as_deref(), Some(want));
        assert_eq!(normalize_uz_phone("90 123 45 67").as_deref(), Some(want));
    }

    #[test]
    fn uz_phone_rejects_garbage() {
        assert_eq!(normalize_uz_phone("+123"), None);
        assert_eq!(normalize_uz_phone("123456789"), None); // local form must start 3..=9
        assert_eq!(normalize_uz_phone("997901234567"), None);
        assert_eq!(normalize_uz_phone(""), None);
    }

    #[test]
    fn contact_phone_bounds() {
        assert_eq!(
            normalize_contact_phone("+998 90 111-22-33").as_deref(),
            Some("+998901112233")
        );
        assert_eq!(normalize_contact_phone("1234567890").as_deref(), None); // 10 digits
        assert_eq!(
            normalize_contact_phone("12345678901").as_deref(),
            Some("+12345678901")
        );
        assert_eq!(normalize_contact_phone("12345678901234567"), None); // 17 digits
    }

    #[test]
    fn guest_count_bounds() {
        assert!(!valid_guest_count(0));
        assert!(valid_guest_count(1));
        assert!(valid_guest_count(10));
        assert!(!valid_guest_count(11));
    }

    #[test]
    fn name_and_title_bounds() {
        assert!(!valid_person_name("A"));
        assert!(valid_person_name("Al"));
        assert!(!valid_guest_name("Al"));
        assert!(valid_guest_name("Ali"));
        assert!(!valid_title("ab"));
        assert!(valid_title("abc"));
    }

    #[test]
    fn payload_tag_round_trip() {
        let payload = BookingPayload::for_category(
            Category::Hotel,
            BookingDetails {
                guest_count: 2,
                guest_names: vec!["Ali Valiev".into(), "Dilshod Umarov".into()],
                phone: "+998901112233".into(),
                date: "15-fevral".into(),
                note: None,
            },
        );
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "hotel");
        let back: BookingPayload = serde_json::from_value(json).unwrap();
        assert!(matches!(back, BookingPayload::Hotel(_)));
        assert_eq!(back.details().guest_names.len(), 2);
    }

    #[test]
    fn payload_rejects_unknown_tag() {
        let json = serde_json::json!({
            "type": "yacht",
            "guest_count": 1,
            "guest_names": ["A B C"],
            "phone": "+998901112233",
            "date": "ertaga"
        });
        assert!(serde_json::from_value::<BookingPayload>(json).is_err());
    }

    #[test]
    fn place_books_through_guide_payload() {
        let details = BookingDetails {
            guest_count: 1,
            guest_names: vec!["Ali Valiev".into()],
            phone: "+998901112233".into(),
            date: "ertaga".into(),
            note: None,
        };
        assert!(matches!(
            BookingPayload::for_category(Category::Place, details),
            BookingPayload::Guide(_)
        ));
    }

    #[test]
    fn status_terminality() {
        assert!(!BookingStatus::PendingPartner.is_terminal());
        assert!(!BookingStatus::Sent.is_terminal());
        assert!(BookingStatus::Accepted.is_terminal());
        assert!(BookingStatus::Rejected.is_terminal());
        assert!(BookingStatus::Timeout.is_terminal());
    }

    #[test]
    fn short_id_is_first_eight_hex() {
        let id = Uuid::parse_str("a1b2c3d4-e5f6-4711-8899-aabbccddeeff").unwrap();
        assert_eq!(short_id(&id), "a1b2c3d4");
    }
}
