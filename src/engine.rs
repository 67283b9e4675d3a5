//! Booking lifecycle engine.
//!
//! Pure orchestration over the Store's guarded transitions. The engine
//! never pre-reads to authorize a partner action: owner identity is part
//! of the UPDATE's WHERE clause, so there is no window between check and
//! update. Fan-out failures are logged, never escalated into the
//! decision result.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{BookingDetails, BookingPayload, ExpiredBooking, Listing};
use crate::error::StoreError;
use crate::notify::Notifier;
use crate::store::Store;
use crate::text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// What happened to a partner's accept/reject press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// The row changed; notifications went out.
    Applied,
    /// The guard failed because the booking already reached a terminal
    /// state (or a concurrent decision won the race).
    AlreadyFinalized,
    /// The caller is not the owner of this booking.
    Unauthorized,
    NotFound,
}

pub struct Engine {
    store: Arc<Store>,
    notifier: Arc<Notifier>,
    admins: Vec<i64>,
}

impl Engine {
    pub fn new(store: Arc<Store>, notifier: Arc<Notifier>, admins: Vec<i64>) -> Self {
        Self {
            store,
            notifier,
            admins,
        }
    }

    /// Create a booking in `pending_partner`, copying the owner from the
    /// listing and stamping the 5-minute deadline.
    pub async fn create_booking(
        &self,
        listing: &Listing,
        user_chat_id: i64,
        details: BookingDetails,
    ) -> Result<Uuid, StoreError> {
        let payload = BookingPayload::for_category(listing.category, details);
        let booking_id = self
            .store
            .create_booking(listing.id, user_chat_id, listing.owner_chat_id, &payload)
            .await?;
        info!(booking = %booking_id, listing = %listing.id, user = user_chat_id, "booking created");
        Ok(booking_id)
    }

    /// Apply a partner decision arriving as an `accept:<bid8>` /
    /// `reject:<bid8>` callback.
    pub async fn on_partner_decision(
        &self,
        booking_prefix: &str,
        acting_owner_chat_id: i64,
        decision: Decision,
    ) -> Result<DecisionOutcome, StoreError> {
        let Some(booking) = self.store.find_booking_by_prefix(booking_prefix).await? else {
            return Ok(DecisionOutcome::NotFound);
        };

        let updated = match decision {
            Decision::Accept => {
                self.store
                    .accept_booking(booking.id, acting_owner_chat_id)
                    .await?
            }
            Decision::Reject => {
                self.store
                    .reject_booking(booking.id, acting_owner_chat_id)
                    .await?
            }
        };

        if !updated {
            // owner_chat_id is written once at creation, so the loaded row
            // classifies the failure without a second race window.
            if booking.owner_chat_id != acting_owner_chat_id {
                return Ok(DecisionOutcome::Unauthorized);
            }
            return Ok(DecisionOutcome::AlreadyFinalized);
        }

        let accepted = decision == Decision::Accept;
        info!(booking = %booking.id, owner = acting_owner_chat_id, accepted, "partner decision applied");

        let title = self
            .store
            .get_listing(booking.listing_id)
            .await?
            .map(|l| l.title)
            .unwrap_or_else(|| "Xizmat".to_string());

        let user_notice = if accepted {
            text::booking_accepted_user(&title)
        } else {
            text::booking_rejected_user(&title)
        };
        if let Err(e) = self
            .notifier
            .send(booking.user_chat_id, &user_notice, None)
            .await
        {
            warn!(booking = %booking.id, error = %e, "decision notice to user failed");
        }

        let admin_notice = text::decision_admin(&title, &booking.short_id(), accepted);
        for admin in &self.admins {
            if let Err(e) = self.notifier.send(*admin, &admin_notice, None).await {
                warn!(admin, error = %e, "decision notice to admin failed");
            }
        }

        Ok(DecisionOutcome::Applied)
    }

    /// Fan out notifications for a batch of expired bookings. One row's
    /// failure never blocks the rest of the batch.
    pub async fn on_timeout_batch(&self, rows: &[ExpiredBooking]) {
        for row in rows {
            let title = row.listing_title.as_deref().unwrap_or("Xizmat");

            if let Err(e) = self
                .notifier
                .send(row.user_chat_id, &text::booking_timeout_user(title), None)
                .await
            {
                warn!(booking = %row.id, error = %e, "timeout notice to user failed");
            }

            let admin_notice = text::booking_timeout_admin(row);
            for admin in &self.admins {
                if let Err(e) = self.notifier.send(*admin, &admin_notice, None).await {
                    warn!(booking = %row.id, admin, error = %e, "timeout notice to admin failed");
                }
            }
        }
    }
}
