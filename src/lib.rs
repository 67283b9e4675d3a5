//! safarbot - chat-driven travel marketplace for the Zomin region
//!
//! Users browse listings (lodging, guides, taxis, places) and issue
//! booking requests; the booking engine routes each request to the
//! listing's owner for a time-bounded accept/reject decision, with
//! admins monitoring every step. All cross-actor coordination happens
//! through guarded Postgres updates, so any number of stateless workers
//! can run against one database.

pub mod app;
pub mod config;
pub mod convo;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod error;
pub mod flows;
pub mod notify;
pub mod store;
pub mod sweeper;
pub mod text;
pub mod transport;
