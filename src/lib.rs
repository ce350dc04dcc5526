pub mod archive;
pub mod auth;
pub mod bot_api;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod replies;
pub mod routes;
pub mod schema;
pub mod state;
pub mod utils;

pub use ingest::{sync_updates, Poller, SyncReport};
