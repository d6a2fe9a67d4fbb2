//! SQLite-backed versioned store for cached responses.
//!
//! This module provides a persistent response cache using SQLite with async
//! access via tokio-rusqlite. It supports:
//!
//! - Request identity keys (method + URL, SHA-256 addressed)
//! - Generation tags distinguishing the live store from stale deployments
//! - Automatic schema migrations
//! - WAL mode for concurrent access

pub mod connection;
pub mod entries;
pub mod generations;
pub mod key;
pub mod migrations;

pub use crate::Error;

pub use connection::CacheStore;
pub use entries::CachedResponse;
pub use key::entry_key;
