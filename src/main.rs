//! safarbot entry point.
//!
//! Startup order: config, pool, schema bootstrap (both fatal on
//! failure), then the sweeper task and the long-poll update loop. On
//! shutdown the sweeper finishes its current iteration and in-flight
//! handlers are allowed to complete.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use safarbot::app::{App, RateLimit};
use safarbot::config::Config;
use safarbot::convo::{memory::MemoryStore, redis::RedisStore, ConversationStore};
use safarbot::dispatch::Dispatcher;
use safarbot::engine::Engine;
use safarbot::flows;
use safarbot::notify::{ErrorReporter, Notifier};
use safarbot::store::Store;
use safarbot::sweeper;
use safarbot::transport::telegram::TelegramApi;
use safarbot::transport::ChatTransport;

/// Long-poll window for getUpdates.
const POLL_TIMEOUT_SECS: u32 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("safarbot=info".parse()?),
        )
        .init();

    let config = Config::from_env().context("configuration")?;
    info!(admins = config.admins.len(), "starting safarbot");

    // Both failures are fatal at startup: a worker without a working
    // schema can only corrupt the conversation.
    let store = Arc::new(
        Store::connect(&config)
            .await
            .context("postgres pool initialization failed")?,
    );
    if std::env::args().any(|arg| arg == "--reset-db") {
        // Refused unless ALLOW_DB_RESET=true.
        store
            .reset_schema(config.allow_db_reset)
            .await
            .context("schema reset")?;
        info!("schema reset applied");
    }
    store
        .bootstrap()
        .await
        .context("schema bootstrap failed")?;

    let transport: Arc<dyn ChatTransport> = Arc::new(TelegramApi::new(&config.bot_token));
    transport
        .drop_pending()
        .await
        .context("failed to clear webhook/pending updates")?;

    let notifier = Arc::new(Notifier::new(transport.clone()));
    let reporter = Arc::new(ErrorReporter::new(notifier.clone(), config.admins.clone()));
    let engine = Arc::new(Engine::new(
        store.clone(),
        notifier.clone(),
        config.admins.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        notifier.clone(),
        config.admins.clone(),
    ));

    let conversations: Arc<dyn ConversationStore> = match &config.redis_url {
        Some(url) => {
            info!("using redis conversation store");
            Arc::new(RedisStore::connect(url).await.context("redis")?)
        }
        None => {
            info!("using in-process conversation store");
            Arc::new(MemoryStore::new())
        }
    };

    let app = Arc::new(App {
        config,
        store: store.clone(),
        transport: transport.clone(),
        notifier,
        reporter,
        engine: engine.clone(),
        dispatcher,
        conversations,
        booking_rate: RateLimit::new(RateLimit::BOOKING_INTERVAL),
    });

    let cancel = CancellationToken::new();
    let sweeper_handle = sweeper::spawn(store, engine, cancel.clone());

    info!("bot initialized, polling for updates");
    poll_loop(app, cancel.clone()).await;

    // Graceful shutdown: stop the sweeper between iterations.
    cancel.cancel();
    if let Err(e) = sweeper_handle.await {
        warn!(error = %e, "sweeper task join failed");
    }
    info!("shutdown complete");
    Ok(())
}

async fn poll_loop(app: Arc<App>, cancel: CancellationToken) {
    let mut offset: i64 = 0;
    loop {
        let updates = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return;
            }
            _ = cancel.cancelled() => return,
            result = app.transport.poll_updates(offset, POLL_TIMEOUT_SECS) => result,
        };

        match updates {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    // Handlers run concurrently; all shared state lives in
                    // Postgres or the conversation store.
                    tokio::spawn(flows::handle_update(app.clone(), update.incoming));
                }
            }
            Err(e) => {
                warn!(error = %e, "poll failed, backing off");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
