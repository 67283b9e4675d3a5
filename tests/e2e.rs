//! End-to-end scenarios: full flows against a real store and a scripted
//! mock transport. Each test starts from an empty schema.
//!
//! Needs TEST_DATABASE_URL (scratch database); skips without it.

mod common;

use common::{MockTransport, SentKind};
use safarbot::domain::BookingStatus;
use safarbot::error::TransportError;
use safarbot::store::NewListing;
use safarbot::transport::ParseMode;

const USER: i64 = 100;
const ADMIN_A: i64 = 200; // also the listing owner
const ADMIN_B: i64 = 201; // pure monitor
const PARTNER_P: i64 = 555; // non-admin partner for the unreachable case

macro_rules! require_store {
    () => {
        match common::test_store().await {
            Some(store) => store,
            None => {
                eprintln!("TEST_DATABASE_URL not set; skipping");
                return;
            }
        }
    };
}

#[tokio::test]
async fn happy_path_browse_book_dispatch_accept() {
    let _guard = common::db_lock().await;
    let store = require_store!();
    let transport = MockTransport::new();
    let app = common::build_app(store.clone(), transport.clone(), vec![ADMIN_A, ADMIN_B]);

    common::register_user(&app, USER, "+998901112233", "Ali", "Valiev").await;
    assert!(store.get_user(USER).await.unwrap().is_some());

    common::create_hotel_listing(&app, ADMIN_A, "Suffa 2400", 450000).await;
    assert_eq!(store.count_active_listings().await.unwrap(), 1);
    let owned = store.listings_by_owner(ADMIN_A).await.unwrap();
    assert_eq!(owned[0].owner_chat_id, ADMIN_A);
    assert_eq!(owned[0].photos.len(), 1);
    assert_eq!(owned[0].price_from, Some(450000));

    transport.clear();
    common::book_first_hotel(&app, USER).await;

    // One booking, dispatched.
    let recent = store.recent_bookings_for_user(USER, 10).await.unwrap();
    assert_eq!(recent.len(), 1);
    let booking = &recent[0].0;
    assert_eq!(booking.status, BookingStatus::Sent);
    assert!(booking.partner_message_id.is_some());
    assert_eq!(booking.owner_chat_id, ADMIN_A);
    let names = &booking.payload.details().guest_names;
    assert_eq!(names.len(), 2);
    assert_eq!(names[0], "Ali Valiev");
    assert_eq!(names[1], "Dilshod Umarov");

    // Owner prompt with the two decision buttons.
    let owner_tokens = transport.last_keyboard_tokens(ADMIN_A);
    let bid8 = booking.short_id();
    assert!(owner_tokens.contains(&format!("accept:{bid8}")));
    assert!(owner_tokens.contains(&format!("reject:{bid8}")));

    // Monitor copy to the other admin, without buttons.
    let monitor: Vec<_> = transport
        .sent_to(ADMIN_B)
        .into_iter()
        .filter(|s| s.body.contains("Monitoring"))
        .collect();
    assert_eq!(monitor.len(), 1);
    assert!(monitor[0].keyboard.is_none());
    // The owner gets no monitor copy on top of the actionable prompt.
    assert_eq!(transport.count_containing(ADMIN_A, "Monitoring"), 0);

    // User told to wait.
    assert_eq!(transport.count_containing(USER, "yuborildi"), 1);

    // Partner accepts from the prompt message.
    transport.clear();
    let prompt_id = booking.partner_message_id.unwrap();
    common::callback_msg(&app, ADMIN_A, &format!("accept:{bid8}"), prompt_id).await;

    let booking = store.get_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Accepted);
    assert_eq!(transport.count_containing(USER, "qabul qilindi"), 1);
    assert_eq!(transport.count_containing(ADMIN_B, "qabul qilindi"), 1);
    // The prompt was edited in place, dropping its buttons.
    let edited: Vec<_> = transport
        .sent_to(ADMIN_A)
        .into_iter()
        .filter(|s| s.kind == SentKind::Edit)
        .collect();
    assert_eq!(edited.len(), 1);
    assert_eq!(edited[0].message_id, prompt_id);
    assert!(edited[0].keyboard.is_none());
}

#[tokio::test]
async fn race_two_decisions_one_winner() {
    let _guard = common::db_lock().await;
    let store = require_store!();
    let transport = MockTransport::new();
    let app = common::build_app(store.clone(), transport.clone(), vec![ADMIN_A, ADMIN_B]);

    common::register_user(&app, USER, "+998901112233", "Ali", "Valiev").await;
    common::create_hotel_listing(&app, ADMIN_A, "Suffa 2400", 450000).await;
    common::book_first_hotel(&app, USER).await;

    let booking = store.recent_bookings_for_user(USER, 1).await.unwrap()[0]
        .0
        .clone();
    let bid8 = booking.short_id();

    transport.clear();
    let accept_cmd = format!("accept:{bid8}");
    let reject_cmd = format!("reject:{bid8}");
    tokio::join!(
        common::callback(&app, ADMIN_A, &accept_cmd),
        common::callback(&app, ADMIN_A, &reject_cmd),
    );

    // Exactly one terminal status persisted.
    let status = store.get_booking(booking.id).await.unwrap().unwrap().status;
    assert!(matches!(
        status,
        BookingStatus::Accepted | BookingStatus::Rejected
    ));

    // The user heard exactly one outcome.
    let outcomes = transport.count_containing(USER, "qabul qilindi")
        + transport.count_containing(USER, "rad etdi");
    assert_eq!(outcomes, 1);

    // The losing press resolved as already-finalized.
    assert_eq!(
        transport.count_containing(ADMIN_A, "allaqachon yakunlangan"),
        1
    );
}

#[tokio::test]
async fn timeout_notifies_user_and_admins_with_partner_contact() {
    let _guard = common::db_lock().await;
    let store = require_store!();
    let transport = MockTransport::new();
    let app = common::build_app(store.clone(), transport.clone(), vec![ADMIN_A, ADMIN_B]);

    // The owner is registered so the escalation carries their phone.
    common::register_user(&app, ADMIN_A, "+998909998877", "Olim", "Karimov").await;
    common::register_user(&app, USER, "+998901112233", "Ali", "Valiev").await;
    common::create_hotel_listing(&app, ADMIN_A, "Suffa 2400", 450000).await;
    common::book_first_hotel(&app, USER).await;

    let booking = store.recent_bookings_for_user(USER, 1).await.unwrap()[0]
        .0
        .clone();
    assert_eq!(booking.status, BookingStatus::Sent);

    // No action from the owner; the deadline passes.
    common::age_booking(booking.id, 6).await;
    transport.clear();

    // One sweeper tick.
    let rows = store.sweep_expired().await.unwrap();
    assert_eq!(rows.len(), 1);
    app.engine.on_timeout_batch(&rows).await;

    let status = store.get_booking(booking.id).await.unwrap().unwrap().status;
    assert_eq!(status, BookingStatus::Timeout);

    assert_eq!(transport.count_containing(USER, "Vaqt tugadi"), 1);
    // Every admin, including the owner, hears about the silence.
    for admin in [ADMIN_A, ADMIN_B] {
        assert_eq!(transport.count_containing(admin, "javob bermadi"), 1);
        assert_eq!(transport.count_containing(admin, "+998909998877"), 1);
    }
}

#[tokio::test]
async fn unreachable_partner_escalates_then_times_out() {
    let _guard = common::db_lock().await;
    let store = require_store!();
    let transport = MockTransport::new();
    let app = common::build_app(store.clone(), transport.clone(), vec![ADMIN_A, ADMIN_B]);

    common::register_user(&app, USER, "+998901112233", "Ali", "Valiev").await;
    // Partner exists as a user but their chat rejects messages.
    store
        .upsert_user(PARTNER_P, "+998905554433", "Botir", "Rahimov")
        .await
        .unwrap();
    store
        .create_listing(&NewListing {
            region: "zomin".into(),
            category: safarbot::domain::Category::Guide,
            subtype: None,
            title: "Zomin sayri".into(),
            description: "Gid xizmati".into(),
            price_from: None,
            phone: None,
            owner_chat_id: PARTNER_P,
            latitude: None,
            longitude: None,
            address: None,
            photos: vec![],
        })
        .await
        .unwrap();
    transport.fail_chat(PARTNER_P, TransportError::Forbidden("bot was blocked".into()));

    // Browse and book the guide listing.
    common::text(&app, USER, "/browse").await;
    common::callback(&app, USER, "browse:region:zomin").await;
    common::callback(&app, USER, "browse:cat:guide").await;
    common::callback(&app, USER, "browse:pick").await;
    common::callback(&app, USER, "browse:book").await;
    common::text(&app, USER, "1").await;
    common::callback(&app, USER, "browse:phone:registered").await;
    common::text(&app, USER, "ertaga").await;
    common::text(&app, USER, "/skip").await;
    common::callback(&app, USER, "browse:confirm").await;

    let booking = store.recent_bookings_for_user(USER, 1).await.unwrap()[0]
        .0
        .clone();
    assert_eq!(booking.status, BookingStatus::PendingPartner);
    assert!(booking.dispatched_at.is_none());
    assert!(booking.partner_message_id.is_none());

    // Admins were escalated with the partner's contact.
    for admin in [ADMIN_A, ADMIN_B] {
        assert_eq!(transport.count_containing(admin, "aloqada emas"), 1);
        assert_eq!(transport.count_containing(admin, "+998905554433"), 1);
    }
    // The user got the "saved but unreachable" reply.
    assert_eq!(transport.count_containing(USER, "aloqada emas"), 1);

    // The sweeper closes the loop at the deadline, identically to a
    // dispatched-but-ignored booking.
    common::age_booking(booking.id, 6).await;
    transport.clear();
    let rows = store.sweep_expired().await.unwrap();
    assert_eq!(rows.len(), 1);
    app.engine.on_timeout_batch(&rows).await;

    let status = store.get_booking(booking.id).await.unwrap().unwrap().status;
    assert_eq!(status, BookingStatus::Timeout);
    assert_eq!(transport.count_containing(USER, "Vaqt tugadi"), 1);
    for admin in [ADMIN_A, ADMIN_B] {
        assert_eq!(transport.count_containing(admin, "javob bermadi"), 1);
    }
}

#[tokio::test]
async fn owner_prompt_falls_back_to_plain_text() {
    let _guard = common::db_lock().await;
    let store = require_store!();
    let transport = MockTransport::new();
    let app = common::build_app(store.clone(), transport.clone(), vec![ADMIN_A, ADMIN_B]);

    // A last name with literal markup in it.
    common::register_user(&app, USER, "+998901112233", "Ali", "<script>").await;
    common::create_hotel_listing(&app, ADMIN_A, "Suffa 2400", 450000).await;

    // The owner's client rejects HTML; the retry path must deliver plain.
    transport.reject_html(ADMIN_A);
    transport.clear();
    common::book_first_hotel(&app, USER).await;

    let owner_prompts = transport.sent_to(ADMIN_A);
    let prompt = owner_prompts
        .iter()
        .find(|s| s.body.contains("Yangi buyurtma"))
        .expect("owner prompt delivered");
    assert_eq!(prompt.mode, ParseMode::Plain);

    // The booking proceeded normally.
    let booking = store.recent_bookings_for_user(USER, 1).await.unwrap()[0]
        .0
        .clone();
    assert_eq!(booking.status, BookingStatus::Sent);
    assert!(booking.partner_message_id.is_some());
}

#[tokio::test]
async fn missing_owner_never_reaches_sent() {
    let _guard = common::db_lock().await;
    let store = require_store!();
    let transport = MockTransport::new();
    let app = common::build_app(store.clone(), transport.clone(), vec![ADMIN_A, ADMIN_B]);

    common::register_user(&app, USER, "+998901112233", "Ali", "Valiev").await;
    // A legacy listing with no linked owner chat.
    store
        .create_listing(&NewListing {
            region: "zomin".into(),
            category: safarbot::domain::Category::Taxi,
            subtype: None,
            title: "Taksi Zomin".into(),
            description: String::new(),
            price_from: Some(50000),
            phone: Some("+998907770011".into()),
            owner_chat_id: 0,
            latitude: None,
            longitude: None,
            address: None,
            photos: vec![],
        })
        .await
        .unwrap();

    common::text(&app, USER, "/browse").await;
    common::callback(&app, USER, "browse:region:zomin").await;
    common::callback(&app, USER, "browse:cat:taxi").await;
    common::callback(&app, USER, "browse:pick").await;
    common::callback(&app, USER, "browse:book").await;
    common::text(&app, USER, "1").await;
    common::callback(&app, USER, "browse:phone:registered").await;
    common::text(&app, USER, "ertaga").await;
    common::text(&app, USER, "/skip").await;
    common::callback(&app, USER, "browse:confirm").await;

    let booking = store.recent_bookings_for_user(USER, 1).await.unwrap()[0]
        .0
        .clone();
    // Dispatch cannot set `sent` without a valid owner.
    assert_eq!(booking.status, BookingStatus::PendingPartner);
    assert!(booking.partner_message_id.is_none());
    for admin in [ADMIN_A, ADMIN_B] {
        assert_eq!(transport.count_containing(admin, "ulanmagan"), 1);
    }
}

#[tokio::test]
async fn stranger_cannot_decide_a_booking() {
    let _guard = common::db_lock().await;
    let store = require_store!();
    let transport = MockTransport::new();
    let app = common::build_app(store.clone(), transport.clone(), vec![ADMIN_A, ADMIN_B]);

    common::register_user(&app, USER, "+998901112233", "Ali", "Valiev").await;
    common::create_hotel_listing(&app, ADMIN_A, "Suffa 2400", 450000).await;
    common::book_first_hotel(&app, USER).await;

    let booking = store.recent_bookings_for_user(USER, 1).await.unwrap()[0]
        .0
        .clone();
    let bid8 = booking.short_id();

    transport.clear();
    // ADMIN_B monitors but does not own the booking.
    common::callback(&app, ADMIN_B, &format!("accept:{bid8}")).await;

    let status = store.get_booking(booking.id).await.unwrap().unwrap().status;
    assert_eq!(status, BookingStatus::Sent);
    assert_eq!(transport.count_containing(ADMIN_B, "sizga tegishli emas"), 1);
}
