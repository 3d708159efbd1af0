//! Seed marker repository — `_seeds` rows make seed application idempotent

use super::RepoResult;
use sqlx::SqlitePool;

pub async fn is_applied(pool: &SqlitePool, seed_id: &str) -> RepoResult<bool> {
    let row: Option<(String,)> = sqlx::query_as("SELECT id FROM _seeds WHERE id = ?")
        .bind(seed_id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

pub async fn mark_applied(pool: &SqlitePool, seed_id: &str) -> RepoResult<()> {
    sqlx::query("INSERT OR IGNORE INTO _seeds (id, applied_at) VALUES (?, ?)")
        .bind(seed_id.to_string())
        .bind(shared::util::now())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn remove(pool: &SqlitePool, seed_id: &str) -> RepoResult<()> {
    sqlx::query("DELETE FROM _seeds WHERE id = ?")
        .bind(seed_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn clear(pool: &SqlitePool) -> RepoResult<()> {
    sqlx::query("DELETE FROM _seeds").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;

    #[tokio::test]
    async fn markers_gate_reapplication() {
        let pool = DbService::new(":memory:").await.unwrap().pool;
        assert!(!is_applied(&pool, "demo").await.unwrap());

        mark_applied(&pool, "demo").await.unwrap();
        assert!(is_applied(&pool, "demo").await.unwrap());

        // Re-marking is a no-op, not an error
        mark_applied(&pool, "demo").await.unwrap();

        remove(&pool, "demo").await.unwrap();
        assert!(!is_applied(&pool, "demo").await.unwrap());
    }
}
