//! Postgres-backed persistence.
//!
//! The Store exclusively owns writes to users, listings, and bookings.
//! Every status-changing write is a single guarded UPDATE; see
//! `bookings.rs`. Schema bootstrap lives in `schema.rs` and is safe to
//! repeat.

mod schema;

pub mod bookings;
pub mod listings;
pub mod users;

pub use bookings::BookingWithListing;
pub use listings::NewListing;

use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::NoTls;
use tracing::info;

use crate::config::{Config, SslMode};
use crate::error::StoreError;

/// Pool bounds and the per-call deadline.
const POOL_MAX_SIZE: usize = 10;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Store {
    pool: Pool,
}

impl Store {
    /// Build the pool and verify connectivity. Does not touch the schema;
    /// call [`Store::bootstrap`] afterwards.
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let mut pg_config: tokio_postgres::Config = config.database_url.parse()?;
        pg_config.options("-c statement_timeout=30000");

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = match config.ssl_mode {
            SslMode::Disable => Manager::from_config(pg_config, NoTls, mgr_config),
            SslMode::Require => Manager::from_config(pg_config, rustls_connect(), mgr_config),
        };

        let pool = Pool::builder(manager)
            .max_size(POOL_MAX_SIZE)
            .wait_timeout(Some(COMMAND_TIMEOUT))
            .create_timeout(Some(COMMAND_TIMEOUT))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        let store = Self { pool };
        // Fail fast at startup instead of on the first update.
        store.client().await?;
        info!(max_size = POOL_MAX_SIZE, "postgres pool initialized");
        Ok(store)
    }

    pub(crate) async fn client(&self) -> Result<Object, StoreError> {
        Ok(self.pool.get().await?)
    }

    /// Basic healthcheck: can we read the listings count?
    pub async fn healthcheck(&self) -> Result<String, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_one("SELECT COUNT(*) FROM listings", &[])
            .await?;
        let count: i64 = row.get(0);
        Ok(format!("OK ({count} listings)"))
    }

    /// Drop the three tables. Refused unless ALLOW_DB_RESET unlocked it.
    pub async fn reset_schema(&self, allow: bool) -> Result<(), StoreError> {
        if !allow {
            return Err(StoreError::ResetDisabled);
        }
        let client = self.client().await?;
        client
            .batch_execute(
                "DROP TABLE IF EXISTS bookings CASCADE;
                 DROP TABLE IF EXISTS listings CASCADE;
                 DROP TABLE IF EXISTS users CASCADE;",
            )
            .await?;
        info!("schema reset: users, listings, bookings dropped");
        Ok(())
    }
}

/// TLS connector for PGSSLMODE=require, trusting the platform web roots.
fn rustls_connect() -> tokio_postgres_rustls::MakeRustlsConnect {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    tokio_postgres_rustls::MakeRustlsConnect::new(tls_config)
}
