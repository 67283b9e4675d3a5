//! Booking CRUD and the atomic state transitions.
//!
//! Every status change is a single UPDATE whose WHERE clause carries the
//! full precondition (expected status set, and the owner for partner
//! actions). A transition that lost its race returns false instead of
//! raising; the caller interprets that as "already finalized".

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_postgres::Row;
use uuid::Uuid;

use super::listings::listing_from_row;
use super::Store;
use crate::domain::{
    Booking, BookingPayload, BookingStatus, ExpiredBooking, Listing, BOOKING_TIMEOUT_MINUTES,
};
use crate::error::StoreError;

/// A booking joined with its listing, as the dispatcher loads it.
#[derive(Debug, Clone)]
pub struct BookingWithListing {
    pub booking: Booking,
    pub listing: Listing,
}

/// One line of the /health status breakdown.
pub type StatusCount = (String, i64);

const BOOKING_COLUMNS: &str = "id, listing_id, user_chat_id, owner_chat_id, payload, status, \
                               created_at, dispatched_at, expires_at, partner_message_id";

impl Store {
    /// Insert a new booking in `pending_partner` with the 5-minute
    /// deadline stamped.
    pub async fn create_booking(
        &self,
        listing_id: Uuid,
        user_chat_id: i64,
        owner_chat_id: i64,
        payload: &BookingPayload,
    ) -> Result<Uuid, StoreError> {
        let client = self.client().await?;
        let payload = serde_json::to_value(payload)
            .map_err(|e| StoreError::Invalid(format!("payload: {e}")))?;
        let row = client
            .query_one(
                &*format!(
                    "INSERT INTO bookings
                       (listing_id, user_chat_id, owner_chat_id, payload, status, expires_at)
                     VALUES ($1, $2, $3, $4, 'pending_partner',
                             now() + interval '{BOOKING_TIMEOUT_MINUTES} minutes')
                     RETURNING id"
                ),
                &[&listing_id, &user_chat_id, &owner_chat_id, &payload],
            )
            .await?;
        Ok(row.get(0))
    }

    pub async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &*format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.map(|r| booking_from_row(&r)).transpose()
    }

    /// Resolve a short callback token (first 8 chars of the id).
    pub async fn find_booking_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<Booking>, StoreError> {
        // Defensive: the prefix feeds a LIKE pattern.
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(None);
        }
        let client = self.client().await?;
        let pattern = format!("{prefix}%");
        let row = client
            .query_opt(
                &*format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id::text LIKE $1 LIMIT 1"),
                &[&pattern],
            )
            .await?;
        row.map(|r| booking_from_row(&r)).transpose()
    }

    /// Booking plus its listing in one round trip, for dispatch.
    pub async fn get_booking_with_listing(
        &self,
        id: Uuid,
    ) -> Result<Option<BookingWithListing>, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT b.id AS b_id, b.listing_id AS b_listing_id,
                        b.user_chat_id AS b_user_chat_id, b.owner_chat_id AS b_owner_chat_id,
                        b.payload AS b_payload, b.status AS b_status,
                        b.created_at AS b_created_at, b.dispatched_at AS b_dispatched_at,
                        b.expires_at AS b_expires_at, b.partner_message_id AS b_partner_message_id,
                        l.id, l.region, l.category, l.subtype, l.title, l.description,
                        l.price_from, l.currency, l.phone, l.owner_chat_id,
                        l.latitude, l.longitude, l.address, l.photos, l.is_active, l.created_at
                 FROM bookings b
                 JOIN listings l ON l.id = b.listing_id
                 WHERE b.id = $1",
                &[&id],
            )
            .await?;
        let Some(row) = row else { return Ok(None) };
        let listing = listing_from_row(&row)?;
        let booking = booking_from_prefixed_row(&row)?;
        Ok(Some(BookingWithListing { booking, listing }))
    }

    /// `pending_partner` -> `sent`. The only path that sets `sent`.
    /// COALESCE keeps the first stored prompt reference if a crashed
    /// worker dispatched twice.
    pub async fn mark_dispatched(
        &self,
        id: Uuid,
        partner_message_id: i64,
    ) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let n = client
            .execute(
                "UPDATE bookings
                 SET status = 'sent',
                     dispatched_at = now(),
                     partner_message_id = COALESCE(partner_message_id, $2)
                 WHERE id = $1 AND status = 'pending_partner'",
                &[&id, &partner_message_id],
            )
            .await?;
        Ok(n > 0)
    }

    /// Partner accepts. Owner identity is part of the guard, so a check
    /// never races the update.
    pub async fn accept_booking(&self, id: Uuid, owner_chat_id: i64) -> Result<bool, StoreError> {
        self.finalize(id, owner_chat_id, BookingStatus::Accepted)
            .await
    }

    /// Partner rejects; same guard as accept.
    pub async fn reject_booking(&self, id: Uuid, owner_chat_id: i64) -> Result<bool, StoreError> {
        self.finalize(id, owner_chat_id, BookingStatus::Rejected)
            .await
    }

    async fn finalize(
        &self,
        id: Uuid,
        owner_chat_id: i64,
        status: BookingStatus,
    ) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let n = client
            .execute(
                "UPDATE bookings SET status = $3
                 WHERE id = $1
                   AND status IN ('pending_partner', 'sent')
                   AND owner_chat_id = $2",
                &[&id, &owner_chat_id, &status.as_str()],
            )
            .await?;
        Ok(n > 0)
    }

    /// Expire overdue bookings in one statement. Under READ COMMITTED the
    /// row lock inside the CTE guarantees each expired row is returned by
    /// exactly one sweep, even with N workers.
    pub async fn sweep_expired(&self) -> Result<Vec<ExpiredBooking>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query(
                &*format!(
                    "WITH expired AS (
                       UPDATE bookings SET status = 'timeout'
                       WHERE status IN ('pending_partner', 'sent')
                         AND COALESCE(dispatched_at, created_at)
                             + interval '{BOOKING_TIMEOUT_MINUTES} minutes' < now()
                       RETURNING id, user_chat_id, owner_chat_id, listing_id
                     )
                     SELECT e.id, e.user_chat_id, e.owner_chat_id, e.listing_id,
                            l.title, u.phone, u.first_name, u.last_name
                     FROM expired e
                     LEFT JOIN listings l ON e.listing_id = l.id
                     LEFT JOIN users u ON e.owner_chat_id = u.chat_id"
                ),
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| ExpiredBooking {
                id: row.get("id"),
                user_chat_id: row.get("user_chat_id"),
                owner_chat_id: row.get("owner_chat_id"),
                listing_id: row.get("listing_id"),
                listing_title: row.get("title"),
                owner_phone: row.get("phone"),
                owner_first_name: row.get("first_name"),
                owner_last_name: row.get("last_name"),
            })
            .collect())
    }

    /// A user's latest bookings with listing titles, newest first.
    pub async fn recent_bookings_for_user(
        &self,
        user_chat_id: i64,
        limit: i64,
    ) -> Result<Vec<(Booking, Option<String>)>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query(
                &*format!(
                    "SELECT {BOOKING_COLUMNS}, \
                            (SELECT title FROM listings l WHERE l.id = bookings.listing_id) AS listing_title
                     FROM bookings
                     WHERE user_chat_id = $1
                     ORDER BY created_at DESC
                     LIMIT $2"
                ),
                &[&user_chat_id, &limit],
            )
            .await?;
        rows.iter()
            .map(|row| Ok((booking_from_row(row)?, row.get("listing_title"))))
            .collect()
    }

    pub async fn count_bookings(&self) -> Result<i64, StoreError> {
        let client = self.client().await?;
        let row = client.query_one("SELECT COUNT(*) FROM bookings", &[]).await?;
        Ok(row.get(0))
    }

    pub async fn bookings_by_status(&self) -> Result<Vec<StatusCount>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT status, COUNT(*) FROM bookings GROUP BY status ORDER BY status",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, i64>(1)))
            .collect())
    }
}

fn parse_status(raw: &str) -> Result<BookingStatus, StoreError> {
    BookingStatus::from_str(raw)
        .ok_or_else(|| StoreError::Invalid(format!("unknown booking status: {raw}")))
}

fn parse_payload(raw: Value) -> Result<BookingPayload, StoreError> {
    serde_json::from_value(raw).map_err(|e| StoreError::Invalid(format!("payload column: {e}")))
}

fn booking_from_row(row: &Row) -> Result<Booking, StoreError> {
    let status: String = row.get("status");
    Ok(Booking {
        id: row.get("id"),
        listing_id: row.get("listing_id"),
        user_chat_id: row.get("user_chat_id"),
        owner_chat_id: row.get("owner_chat_id"),
        payload: parse_payload(row.get("payload"))?,
        status: parse_status(&status)?,
        created_at: row.get::<_, DateTime<Utc>>("created_at"),
        dispatched_at: row.get("dispatched_at"),
        expires_at: row.get("expires_at"),
        partner_message_id: row.get("partner_message_id"),
    })
}

/// Booking columns aliased `b_*` in the dispatch join.
fn booking_from_prefixed_row(row: &Row) -> Result<Booking, StoreError> {
    let status: String = row.get("b_status");
    Ok(Booking {
        id: row.get("b_id"),
        listing_id: row.get("b_listing_id"),
        user_chat_id: row.get("b_user_chat_id"),
        owner_chat_id: row.get("b_owner_chat_id"),
        payload: parse_payload(row.get("b_payload"))?,
        status: parse_status(&status)?,
        created_at: row.get::<_, DateTime<Utc>>("b_created_at"),
        dispatched_at: row.get("b_dispatched_at"),
        expires_at: row.get("b_expires_at"),
        partner_message_id: row.get("b_partner_message_id"),
    })
}
