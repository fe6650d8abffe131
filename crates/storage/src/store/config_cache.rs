#![forbid(unsafe_code)]

use super::queue::SqliteQueue;
use super::support::now_ms;
use super::StoreError;
use rusqlite::{OptionalExtension, params};
use sha2::Digest;
use std::fmt::Write as _;

/// Content token for a serialized configuration: lowercase hex sha256.
pub fn config_token(config_json: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(config_json.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

impl SqliteQueue {
    /// Stores a configuration once and returns the token jobs carry instead
    /// of the full document.
    pub fn config_put(&mut self, config_json: &str) -> Result<String, StoreError> {
        let token = config_token(config_json);
        self.conn.execute(
            "INSERT OR IGNORE INTO config_cache(token, config_json, created_at_ms) VALUES (?1, ?2, ?3)",
            params![token, config_json, now_ms()],
        )?;
        Ok(token)
    }

    pub fn config_get(&self, token: &str) -> Result<Option<String>, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT config_json FROM config_cache WHERE token=?1",
                params![token.trim()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found)
    }
}
