//! Generation lifecycle operations.
//!
//! A generation is one cache version: the set of entries written under a
//! single tag. Install writes a whole generation in one transaction;
//! activation deletes every generation that doesn't carry the current tag.

use super::connection::CacheStore;
use super::entries::CachedResponse;
use crate::Error;
use tokio_rusqlite::params;

impl CacheStore {
    /// Write a fully fetched manifest as one generation, atomically.
    ///
    /// All entries land in a single transaction together with the generation
    /// marker, so a generation is either completely installed or absent.
    pub async fn install_generation(&self, tag: &str, entries: &[CachedResponse]) -> Result<(), Error> {
        let tag = tag.to_string();
        let entries = entries.to_vec();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                for entry in &entries {
                    tx.execute(
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
                }
                tx.execute(
                    "INSERT INTO generations (tag, installed_at) VALUES (?1, ?2)
                     ON CONFLICT(tag) DO UPDATE SET installed_at = excluded.installed_at",
                    params![tag, chrono::Utc::now().to_rfc3339()],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Whether a generation's manifest install has completed.
    pub async fn is_installed(&self, tag: &str) -> Result<bool, Error> {
        let tag = tag.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists: bool = conn
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM generations WHERE tag = ?1)",
                        params![tag],
                        |row| row.get(0),
                    )
                    .map_err(Error::from)?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// List every generation tag present in the store.
    ///
    /// Includes generations that hold entries without a completed install
    /// marker, so activation can sweep those too.
    pub async fn list_generations(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT tag FROM generations
                     UNION
                     SELECT DISTINCT generation FROM entries
                     ORDER BY 1",
                )?;
                let tags = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(tags)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a generation and all of its entries.
    ///
    /// Returns the number of deleted entries.
    pub async fn delete_generation(&self, tag: &str) -> Result<u64, Error> {
        let tag = tag.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                let deleted = tx.execute("DELETE FROM entries WHERE generation = ?1", params![&tag])?;
                tx.execute("DELETE FROM generations WHERE tag = ?1", params![&tag])?;
                tx.commit()?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}
