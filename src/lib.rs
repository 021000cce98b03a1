//! tenki: polls the JMA weather advisory feed, fetches every entry's
//! detailed warning report concurrently, and aggregates the results into a
//! keyed snapshot persisted to SQLite.

pub mod advisory;
pub mod config;
pub mod document;
pub mod store;
