//! Tool-call dedup records (at-most-once side effects).

use sqlx::Row;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

use super::{now_str, Store};

impl Store {
    /// Whether a successful call was already registered under `key`.
    ///
    /// The lookup is exact-match on the key; when a record exists, its
    /// request hash must equal `req_hash`: the same dedup key carrying
    /// a different request is a corruption signal, not a cache hit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DedupHashMismatch`] on a hash conflict or
    /// an error on database failure.
    pub async fn check_tool_call_dedup(&self, key: &str, req_hash: &str) -> StoreResult<bool> {
        let row = sqlx::query("SELECT req_hash FROM tool_call_dedup WHERE dedup_key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => {
                let stored: String = row.try_get("req_hash")?;
                if stored == req_hash {
                    debug!(key, "Dedup hit, side effect suppressed");
                    Ok(true)
                } else {
                    Err(StoreError::DedupHashMismatch {
                        key: key.to_string(),
                    })
                }
            },
            None => Ok(false),
        }
    }

    /// Record a successful side-effecting call.
    ///
    /// Called only *after* the side effect succeeds; a repeated
    /// registration for the same key overwrites the result reference.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn register_successful_tool_call(
        &self,
        key: &str,
        req_hash: &str,
        result_ref: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tool_call_dedup (dedup_key, req_hash, result_ref, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (dedup_key) DO UPDATE
             SET req_hash = excluded.req_hash, result_ref = excluded.result_ref",
        )
        .bind(key)
        .bind(req_hash)
        .bind(result_ref)
        .bind(now_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// The stored result reference for a dedup key, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn dedup_result_ref(&self, key: &str) -> StoreResult<Option<String>> {
        let row = sqlx::query("SELECT result_ref FROM tool_call_dedup WHERE dedup_key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(row
            .map(|row| row.try_get::<Option<String>, _>("result_ref"))
            .transpose()?
            .flatten())
    }
}
