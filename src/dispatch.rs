//! Booking dispatch: push a pending booking to its owner.
//!
//! Send first, then `mark_dispatched`: the prompt may exist without the
//! DB marker but never the reverse. A failed send leaves the row in
//! `pending_partner` for the sweeper; there is no automatic retry.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::notify::Notifier;
use crate::store::{BookingWithListing, Store};
use crate::text;
use crate::transport::{InlineButton, Keyboard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Owner prompt delivered and the row marked `sent`.
    Sent,
    /// The listing has no linked owner chat; admins were escalated.
    OwnerMissing,
    /// The transport could not reach the owner; admins were escalated.
    OwnerUnreachable,
    NotFound,
}

pub struct Dispatcher {
    store: Arc<Store>,
    notifier: Arc<Notifier>,
    admins: Vec<i64>,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, notifier: Arc<Notifier>, admins: Vec<i64>) -> Self {
        Self {
            store,
            notifier,
            admins,
        }
    }

    pub async fn dispatch(&self, booking_id: Uuid) -> Result<DispatchOutcome, StoreError> {
        let Some(BookingWithListing { booking, listing }) =
            self.store.get_booking_with_listing(booking_id).await?
        else {
            return Ok(DispatchOutcome::NotFound);
        };

        if booking.owner_chat_id == 0 {
            warn!(booking = %booking.id, listing = %listing.id, "listing has no owner chat");
            self.escalate(&text::escalation_no_owner(&listing, &booking))
                .await;
            return Ok(DispatchOutcome::OwnerMissing);
        }

        let body = text::owner_prompt(&listing, booking.payload.details());
        let bid8 = booking.short_id();
        let keyboard = Keyboard::inline_row(vec![
            InlineButton::new("✅ Qabul qilish", format!("accept:{bid8}")),
            InlineButton::new("❌ Rad etish", format!("reject:{bid8}")),
        ]);

        match self
            .notifier
            .send(booking.owner_chat_id, &body, Some(&keyboard))
            .await
        {
            Ok(message_id) => {
                let marked = self.store.mark_dispatched(booking.id, message_id).await?;
                if !marked {
                    // Lost to a concurrent dispatch or an early decision;
                    // the stored prompt reference stays as it was.
                    warn!(booking = %booking.id, "mark_dispatched guard failed");
                }
                info!(booking = %booking.id, owner = booking.owner_chat_id, message_id, "booking dispatched");
                Ok(DispatchOutcome::Sent)
            }
            Err(e) => {
                warn!(booking = %booking.id, owner = booking.owner_chat_id, error = %e, "owner unreachable");
                let owner = self.store.get_user(booking.owner_chat_id).await?;
                let owner_name = owner.as_ref().map(|u| u.full_name());
                let owner_phone = owner.as_ref().map(|u| u.phone.clone());
                self.escalate(&text::escalation_unreachable(
                    &listing.title,
                    &booking,
                    owner_name.as_deref(),
                    owner_phone.as_deref(),
                ))
                .await;
                Ok(DispatchOutcome::OwnerUnreachable)
            }
        }
    }

    /// Read-only summary to every admin, minus the owner when the owner
    /// is an admin too (they already hold the actionable prompt).
    pub async fn dispatch_monitor_copy(&self, booking_id: Uuid) -> Result<(), StoreError> {
        let Some(BookingWithListing { booking, listing }) =
            self.store.get_booking_with_listing(booking_id).await?
        else {
            return Ok(());
        };

        let body = text::monitor_copy(&booking, &listing.title);
        let copies = self
            .admins
            .iter()
            .filter(|admin| **admin != booking.owner_chat_id)
            .map(|admin| {
                let admin = *admin;
                let body = &body;
                let booking_id = booking.id;
                async move {
                    if let Err(e) = self.notifier.send(admin, body, None).await {
                        warn!(admin, booking = %booking_id, error = %e, "monitor copy failed");
                    }
                }
            });
        join_all(copies).await;
        Ok(())
    }

    async fn escalate(&self, body: &str) {
        let sends = self.admins.iter().map(|admin| {
            let admin = *admin;
            async move {
                if let Err(e) = self.notifier.send(admin, body, None).await {
                    warn!(admin, error = %e, "escalation delivery failed");
                }
            }
        });
        join_all(sends).await;
    }
}
