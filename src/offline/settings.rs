//! Persisted settings: small typed flags (kiosk mode and friends) kept in the
//! `local_settings` table as JSON.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{debug, warn};

pub const KIOSK_MODE_KEY: &str = "kiosk_mode_enabled";

/// Settings DAO (sqlx)
#[derive(Clone)]
pub struct SettingsStore {
    db: Pool<Sqlite>,
}

impl SettingsStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Value stored under `key`, or `default` when it is missing or does not
    /// decode as `T`
    pub async fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.try_get(key).await {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                warn!("[Settings] reading {} failed, using default: {:#}", key, e);
                default
            }
        }
    }

    pub async fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT value FROM local_settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.db)
                .await
                .with_context(|| format!("failed to read setting {}", key))?;
        raw.map(|raw| {
            serde_json::from_str(&raw).with_context(|| format!("setting {} has an unexpected type", key))
        })
        .transpose()
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value).context("failed to encode setting")?;
        sqlx::query(
            r#"
            INSERT INTO local_settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(&raw)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.db)
        .await
        .with_context(|| format!("failed to write setting {}", key))?;
        debug!("[Settings] {} = {}", key, raw);
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM local_settings WHERE key = ?")
            .bind(key)
            .execute(&self.db)
            .await
            .with_context(|| format!("failed to remove setting {}", key))?;
        Ok(result.rows_affected() > 0)
    }
}
