// src/ingest/providers/mod.rs
//! Built-in source adapters.

pub mod reddit;
pub mod rss;

pub use reddit::RedditAdapter;
pub use rss::RssAdapter;
