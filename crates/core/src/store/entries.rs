//! Cached response CRUD operations.
//!
//! Provides functions for reading and writing individual cached responses
//! within a generation. Writes are whole-row UPSERTs; SQLite's per-key
//! atomicity is the only locking the request path relies on.

use super::connection::CacheStore;
use super::key::entry_key;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// A cached response.
///
/// Represents the full payload of a same-origin GET: status, headers, and
/// body, tagged with the generation it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub generation: String,
    pub key: String,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub headers_json: Option<String>,
    pub body: Vec<u8>,
    pub stored_at: String,
}

impl CachedResponse {
    /// Compute the store key for this response's request identity.
    pub fn compute_key(method: &str, url: &str) -> String {
        entry_key(method, url)
    }
}

impl CacheStore {
    /// Insert or update a cached response.
    ///
    /// Uses UPSERT semantics: inserts if the (generation, key) pair doesn't
    /// exist, replaces the whole row if it does.
    pub async fn put_entry(&self, entry: &CachedResponse) -> Result<(), Error> {
        let entry = entry.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO entries (
                        generation, key, method, url, status,
                        content_type, headers_json, body, stored_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    ON CONFLICT(generation, key) DO UPDATE SET
                        method = excluded.method,
                        url = excluded.url,
                        status = excluded.status,
                        content_type = excluded.content_type,
                        headers_json = excluded.headers_json,
                        body = excluded.body,
                        stored_at = excluded.stored_at",
                    params![
                        &entry.generation,
                        &entry.key,
                        &entry.method,
                        &entry.url,
                        entry.status as i64,
                        &entry.content_type,
                        &entry.headers_json,
                        &entry.body,
                        &entry.stored_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get a cached response by generation tag and key.
    ///
    /// Returns None if the generation holds no entry for the key.
    pub async fn get_entry(&self, generation: &str, key: &str) -> Result<Option<CachedResponse>, Error> {
        let generation = generation.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CachedResponse>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT generation, key, method, url, status,
                            content_type, headers_json, body, stored_at
                     FROM entries WHERE generation = ?1 AND key = ?2",
                )?;

                let result = stmt.query_row(params![generation, key], |row| {
                    Ok(CachedResponse {
                        generation: row.get(0)?,
                        key: row.get(1)?,
                        method: row.get(2)?,
                        url: row.get(3)?,
                        status: row.get::<_, i64>(4)? as u16,
                        content_type: row.get(5)?,
                        headers_json: row.get(6)?,
                        body: row.get(7)?,
                        stored_at: row.get(8)?,
                    })
                });

                match result {
                    Ok(e) => Ok(Some(e)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Check whether a generation holds an entry for the key.
    pub async fn has_entry(&self, generation: &str, key: &str) -> Result<bool, Error> {
        let generation = generation.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists: bool = conn
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM entries WHERE generation = ?1 AND key = ?2)",
                        params![generation, key],
                        |row| row.get(0),
                    )
                    .map_err(Error::from)?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// Count entries held by a generation.
    pub async fn count_entries(&self, generation: &str) -> Result<u64, Error> {
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM entries WHERE generation = ?1",
                    params![generation],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
