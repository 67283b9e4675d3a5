//! Idempotent schema bootstrap.
//!
//! Runs at startup and is safe to repeat: every step is guarded by an
//! existence check, so no step errors on pre-existing objects. Later
//! additions (columns, indexes, the booking FK) are probed through
//! `information_schema` before the ALTER runs, which also restores
//! anything an operator dropped by hand.

use tracing::info;

use super::Store;
use crate::error::StoreError;

/// Base tables. CREATE TABLE IF NOT EXISTS only helps fresh databases;
/// existing ones get missing columns from the probe list below.
const BASE_SCHEMA: &str = "
CREATE EXTENSION IF NOT EXISTS pgcrypto;

CREATE TABLE IF NOT EXISTS users (
    chat_id      bigint PRIMARY KEY,
    phone        text NOT NULL,
    first_name   text NOT NULL,
    last_name    text NOT NULL,
    created_at   timestamptz NOT NULL DEFAULT now(),
    updated_at   timestamptz NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS listings (
    id            uuid PRIMARY KEY DEFAULT gen_random_uuid(),
    region        text NOT NULL,
    category      text NOT NULL CHECK (category IN ('hotel','guide','taxi','place')),
    subtype       text,
    title         text NOT NULL,
    description   text NOT NULL DEFAULT '',
    price_from    bigint,
    currency      text NOT NULL DEFAULT 'UZS',
    phone         text,
    owner_chat_id bigint NOT NULL DEFAULT 0,
    latitude      double precision,
    longitude     double precision,
    address       text,
    photos        jsonb NOT NULL DEFAULT '[]'::jsonb,
    is_active     boolean NOT NULL DEFAULT true,
    created_at    timestamptz NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS bookings (
    id                 uuid PRIMARY KEY DEFAULT gen_random_uuid(),
    listing_id         uuid NOT NULL,
    user_chat_id       bigint NOT NULL,
    owner_chat_id      bigint NOT NULL DEFAULT 0,
    payload            jsonb NOT NULL DEFAULT '{}'::jsonb,
    status             text NOT NULL DEFAULT 'pending_partner',
    created_at         timestamptz NOT NULL DEFAULT now(),
    dispatched_at      timestamptz,
    expires_at         timestamptz,
    partner_message_id bigint
);
";

/// Columns added after the initial release, restored when missing.
const COLUMN_PROBES: &[(&str, &str, &str)] = &[
    ("listings", "subtype", "text"),
    ("listings", "price_from", "bigint"),
    ("listings", "currency", "text NOT NULL DEFAULT 'UZS'"),
    ("listings", "phone", "text"),
    ("listings", "owner_chat_id", "bigint NOT NULL DEFAULT 0"),
    ("listings", "latitude", "double precision"),
    ("listings", "longitude", "double precision"),
    ("listings", "address", "text"),
    ("listings", "photos", "jsonb NOT NULL DEFAULT '[]'::jsonb"),
    ("bookings", "owner_chat_id", "bigint NOT NULL DEFAULT 0"),
    ("bookings", "dispatched_at", "timestamptz"),
    ("bookings", "expires_at", "timestamptz"),
    ("bookings", "partner_message_id", "bigint"),
];

const INDEXES: &str = "
CREATE INDEX IF NOT EXISTS idx_listings_region_category_active
    ON listings(region, category, is_active);
CREATE INDEX IF NOT EXISTS idx_listings_owner
    ON listings(owner_chat_id);
CREATE INDEX IF NOT EXISTS idx_bookings_listing_status
    ON bookings(listing_id, status);
CREATE INDEX IF NOT EXISTS idx_bookings_user_created
    ON bookings(user_chat_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_bookings_expires_status
    ON bookings(expires_at, status) WHERE expires_at IS NOT NULL;
";

impl Store {
    /// Bring the schema to the current shape. Safe to run N times and
    /// converges to the same schema with no data loss.
    pub async fn bootstrap(&self) -> Result<(), StoreError> {
        let client = self.client().await?;

        client.batch_execute(BASE_SCHEMA).await?;

        // Legacy rename: bookings.partner_id -> listing_id.
        if column_exists(&client, "bookings", "partner_id").await?
            && !column_exists(&client, "bookings", "listing_id").await?
        {
            client
                .batch_execute("ALTER TABLE bookings RENAME COLUMN partner_id TO listing_id")
                .await?;
            info!("renamed bookings.partner_id to listing_id");
        }

        for (table, column, ddl_type) in COLUMN_PROBES {
            if !column_exists(&client, table, column).await? {
                client
                    .batch_execute(&*format!("ALTER TABLE {table} ADD COLUMN {column} {ddl_type}"))
                    .await?;
                info!(table, column, "added missing column");
            }
        }

        if !constraint_exists(&client, "bookings", "bookings_listing_id_fkey").await? {
            client
                .batch_execute(
                    "ALTER TABLE bookings
                     ADD CONSTRAINT bookings_listing_id_fkey
                     FOREIGN KEY (listing_id) REFERENCES listings(id) ON DELETE CASCADE",
                )
                .await?;
            info!("added bookings.listing_id foreign key");
        }

        // Legacy backfill: owner came from an admin-id column once.
        if column_exists(&client, "listings", "admin_chat_id").await? {
            let updated = client
                .execute(
                    "UPDATE listings SET owner_chat_id = admin_chat_id
                     WHERE (owner_chat_id IS NULL OR owner_chat_id = 0)
                       AND admin_chat_id IS NOT NULL",
                    &[],
                )
                .await?;
            if updated > 0 {
                info!(updated, "backfilled listings.owner_chat_id");
            }
        }

        client.batch_execute(INDEXES).await?;

        info!("schema ensured (users, listings, bookings)");
        Ok(())
    }
}

async fn column_exists(
    client: &deadpool_postgres::Object,
    table: &str,
    column: &str,
) -> Result<bool, StoreError> {
    let row = client
        .query_opt(
            "SELECT 1 FROM information_schema.columns
             WHERE table_name = $1 AND column_name = $2",
            &[&table, &column],
        )
        .await?;
    Ok(row.is_some())
}

async fn constraint_exists(
    client: &deadpool_postgres::Object,
    table: &str,
    constraint: &str,
) -> Result<bool, StoreError> {
    let row = client
        .query_opt(
            "SELECT 1 FROM information_schema.table_constraints
             WHERE table_name = $1 AND constraint_name = $2",
            &[&table, &constraint],
        )
        .await?;
    Ok(row.is_some())
}
