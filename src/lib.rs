// src/lib.rs
// Public library surface for the CLI, the HTTP server and integration tests.

pub mod alerts;
pub mod api;
pub mod app;
pub mod commands;
pub mod config;
pub mod digest;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod outcome;
pub mod state;
pub mod store;
pub mod trends;

pub use crate::api::router;
pub use crate::app::App;
pub use crate::config::AppConfig;
pub use crate::outcome::Outcome;
