//! Skill fault accounting, quarantine, and the installed-skill registry.

use sqlx::Row;
use tracing::warn;

use crate::error::StoreResult;
use crate::models::SkillRecord;

use super::{now_str, parse_ts, Store};

impl Store {
    /// Atomically increment a module's persistent fault counter.
    ///
    /// Returns `true` if the module is quarantined after the increment
    /// (i.e. the counter reached `threshold` now or earlier).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn increment_skill_fault(&self, module: &str, threshold: i64) -> StoreResult<bool> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query(
            "INSERT INTO skill_faults (module, fault_count, quarantined, updated_at)
             VALUES (?, 1, 0, ?)
             ON CONFLICT (module) DO UPDATE
             SET fault_count = fault_count + 1, updated_at = excluded.updated_at
             RETURNING fault_count, quarantined",
        )
        .bind(module)
        .bind(now_str())
        .fetch_one(&mut *tx)
        .await?;

        let fault_count: i64 = row.try_get("fault_count")?;
        let mut quarantined = row.try_get::<i64, _>("quarantined")? != 0;

        if !quarantined && fault_count >= threshold {
            sqlx::query("UPDATE skill_faults SET quarantined = 1 WHERE module = ?")
                .bind(module)
                .execute(&mut *tx)
                .await?;
            quarantined = true;
            warn!(module, fault_count, threshold, "Skill crossed fault threshold, quarantined");
        }

        tx.commit().await?;
        Ok(quarantined)
    }

    /// Whether a module is quarantined.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn is_skill_quarantined(&self, module: &str) -> StoreResult<bool> {
        let row = sqlx::query("SELECT quarantined FROM skill_faults WHERE module = ?")
            .bind(module)
            .fetch_optional(self.pool())
            .await?;
        Ok(row
            .map(|row| row.try_get::<i64, _>("quarantined"))
            .transpose()?
            .is_some_and(|q| q != 0))
    }

    /// Current fault count for a module (zero when unseen).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn skill_fault_count(&self, module: &str) -> StoreResult<i64> {
        let row = sqlx::query("SELECT fault_count FROM skill_faults WHERE module = ?")
            .bind(module)
            .fetch_optional(self.pool())
            .await?;
        Ok(row
            .map(|row| row.try_get::<i64, _>("fault_count"))
            .transpose()?
            .unwrap_or(0))
    }

    // --- Installed-skill registry ---

    /// Register (or replace) an installed skill.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn upsert_skill(
        &self,
        name: &str,
        version: &str,
        path: &str,
        content_hash: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO skill_registry (name, version, path, content_hash, installed_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (name) DO UPDATE
             SET version = excluded.version, path = excluded.path,
                 content_hash = excluded.content_hash, installed_at = excluded.installed_at",
        )
        .bind(name)
        .bind(version)
        .bind(path)
        .bind(content_hash)
        .bind(now_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Look up an installed skill.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn get_skill(&self, name: &str) -> StoreResult<Option<SkillRecord>> {
        let row = sqlx::query(
            "SELECT name, version, path, content_hash, installed_at
             FROM skill_registry WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        row.map(|row| {
            Ok(SkillRecord {
                name: row.try_get("name")?,
                version: row.try_get("version")?,
                path: row.try_get("path")?,
                content_hash: row.try_get("content_hash")?,
                installed_at: parse_ts(
                    "skill_registry",
                    &row.try_get::<String, _>("installed_at")?,
                )?,
            })
        })
        .transpose()
    }

    /// Remove an installed skill from the registry.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn remove_skill(&self, name: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM skill_registry WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
