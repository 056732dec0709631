//! TTL-bounded memo cache for expensive generated artifacts (daily
//! briefings, nightly reflections). Keyed by function name plus a hash of
//! the serialized input; a force-refresh recomputes and overwrites.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::future::Future;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MemoEntry {
    pub id: Uuid,
    pub function_name: String,
    pub input_hash: String,
    pub output: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: i32,
}

impl MemoEntry {
    /// Look up a live (unexpired) entry and bump its hit counter.
    pub async fn get(
        function_name: &str,
        input_hash: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(
            "UPDATE memo_cache SET hit_count = hit_count + 1
             WHERE function_name = $1 AND input_hash = $2 AND expires_at > now()
             RETURNING *",
        )
        .bind(function_name)
        .bind(input_hash)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Upsert an entry; an overwrite resets the hit counter and TTL.
    pub async fn set(
        function_name: &str,
        input_hash: &str,
        output: &[u8],
        expires_at: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO memo_cache (function_name, input_hash, output, expires_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (function_name, input_hash)
             DO UPDATE SET output = EXCLUDED.output,
                          expires_at = EXCLUDED.expires_at,
                          hit_count = 0,
                          created_at = now()",
        )
        .bind(function_name)
        .bind(input_hash)
        .bind(output)
        .bind(expires_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Delete expired entries. Called opportunistically by the scheduler.
    pub async fn evict_expired(pool: &PgPool) -> Result<u64> {
        let result = sqlx::query("DELETE FROM memo_cache WHERE expires_at <= now()")
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Content-addressed hash of a serializable cache key.
pub fn input_hash<K: Serialize>(key: &K) -> Result<String> {
    let bytes = serde_json::to_vec(key)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Cached computation: return the live entry for `(function_name, key)` if
/// one exists, otherwise run `f`, store its output with the given TTL, and
/// return it. `force_refresh` skips the lookup and overwrites.
pub async fn memoized<K, T, F, Fut>(
    pool: &PgPool,
    function_name: &str,
    key: &K,
    ttl: Duration,
    force_refresh: bool,
    f: F,
) -> Result<T>
where
    K: Serialize,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let hash = input_hash(key)?;

    if !force_refresh {
        if let Some(entry) = MemoEntry::get(function_name, &hash, pool).await? {
            return Ok(serde_json::from_slice(&entry.output)?);
        }
    }

    let result = f().await?;
    let output = serde_json::to_vec(&result)?;
    MemoEntry::set(function_name, &hash, &output, Utc::now() + ttl, pool).await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_hash_is_stable_and_order_sensitive() {
        let a = input_hash(&("daily_briefing", "2026-08-29")).unwrap();
        let b = input_hash(&("daily_briefing", "2026-08-29")).unwrap();
        let c = input_hash(&("daily_briefing", "2026-08-30")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
