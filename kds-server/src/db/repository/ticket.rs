//! Ticket Repository
//!
//! One row per production order item; `order_item_id` carries a UNIQUE
//! index so a duplicate insert surfaces as [`RepoError::Duplicate`].

use super::RepoResult;
use shared::{Ticket, TicketStatus};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Insert a new ticket. Fails with `Duplicate` when another ticket already
/// exists for the same order item.
pub async fn insert(pool: &SqlitePool, ticket: &Ticket) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO tickets (
            id, order_id, order_item_id, menu_item_id, station_id,
            menu_item_name, station_name, table_label, quantity, status,
            notes, created_at, updated_at, started_at, finished_at,
            delivered_at, schema_version, created_by
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(ticket.id)
    .bind(ticket.order_id)
    .bind(ticket.order_item_id)
    .bind(ticket.menu_item_id)
    .bind(&ticket.station_id)
    .bind(&ticket.menu_item_name)
    .bind(&ticket.station_name)
    .bind(&ticket.table_label)
    .bind(ticket.quantity)
    .bind(ticket.status)
    .bind(&ticket.notes)
    .bind(ticket.created_at)
    .bind(ticket.updated_at)
    .bind(ticket.started_at)
    .bind(ticket.finished_at)
    .bind(ticket.delivered_at)
    .bind(ticket.schema_version)
    .bind(&ticket.created_by)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> RepoResult<Option<Ticket>> {
    let ticket = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(ticket)
}

/// Look up the ticket of an order item (unique, hence at most one)
pub async fn find_by_order_item(
    pool: &SqlitePool,
    order_item_id: Uuid,
) -> RepoResult<Option<Ticket>> {
    let ticket = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE order_item_id = ?")
        .bind(order_item_id)
        .fetch_optional(pool)
        .await?;
    Ok(ticket)
}

/// Write back every mutable field of a ticket. Returns the number of rows
/// matched; 0 means the row vanished concurrently, which callers treat as
/// benign.
pub async fn update(pool: &SqlitePool, ticket: &Ticket) -> RepoResult<u64> {
    let result = sqlx::query(
        "UPDATE tickets SET
            quantity = ?, status = ?, notes = ?, updated_at = ?,
            started_at = ?, finished_at = ?, delivered_at = ?
         WHERE id = ?",
    )
    .bind(ticket.quantity)
    .bind(ticket.status)
    .bind(&ticket.notes)
    .bind(ticket.updated_at)
    .bind(ticket.started_at)
    .bind(ticket.finished_at)
    .bind(ticket.delivered_at)
    .bind(ticket.id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// All tickets that have not reached a terminal state, oldest first.
/// This is the cache warm query.
pub async fn list_non_terminal(pool: &SqlitePool) -> RepoResult<Vec<Ticket>> {
    let tickets = sqlx::query_as::<_, Ticket>(
        "SELECT * FROM tickets
         WHERE status NOT IN ('delivered', 'cancelled')
         ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    Ok(tickets)
}

pub async fn list_by_station(pool: &SqlitePool, station_id: &str) -> RepoResult<Vec<Ticket>> {
    let tickets = sqlx::query_as::<_, Ticket>(
        "SELECT * FROM tickets WHERE station_id = ? ORDER BY created_at",
    )
    .bind(station_id.to_string())
    .fetch_all(pool)
    .await?;
    Ok(tickets)
}

pub async fn count_by_status(pool: &SqlitePool, status: TicketStatus) -> RepoResult<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tickets WHERE status = ?")
        .bind(status)
        .fetch_one(pool)
        .await?;
    Ok(count.0)
}

/// Delete tickets carrying a provenance tag (demo-seed cleanup).
/// Returns the ids of the removed rows so cache entries can be evicted.
pub async fn delete_created_by(pool: &SqlitePool, tag: &str) -> RepoResult<Vec<Uuid>> {
    let ids: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM tickets WHERE created_by = ?")
        .bind(tag.to_string())
        .fetch_all(pool)
        .await?;
    sqlx::query("DELETE FROM tickets WHERE created_by = ?")
        .bind(tag.to_string())
        .execute(pool)
        .await?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}

/// Remove every ticket (admin reset)
pub async fn delete_all(pool: &SqlitePool) -> RepoResult<u64> {
    let result = sqlx::query("DELETE FROM tickets").execute(pool).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;
    use shared::TicketStatus;

    async fn pool() -> SqlitePool {
        DbService::new(":memory:").await.unwrap().pool
    }

    fn ticket() -> Ticket {
        Ticket::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "kitchen",
            "Gazpacho",
            "Kitchen",
            Some("T3".to_string()),
            1,
            None,
        )
    }

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let pool = pool().await;
        let t = ticket();
        insert(&pool, &t).await.unwrap();

        let found = find_by_order_item(&pool, t.order_item_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, t);
        assert_eq!(find_by_id(&pool, t.id).await.unwrap().unwrap(), t);
    }

    #[tokio::test]
    async fn duplicate_order_item_is_rejected() {
        let pool = pool().await;
        let t = ticket();
        insert(&pool, &t).await.unwrap();

        let mut dup = ticket();
        dup.order_item_id = t.order_item_id;
        let err = insert(&pool, &dup).await.unwrap_err();
        assert!(err.is_duplicate(), "expected duplicate, got {err:?}");
    }

    #[tokio::test]
    async fn non_terminal_listing_excludes_finished_tickets() {
        let pool = pool().await;
        let mut done = ticket();
        insert(&pool, &done).await.unwrap();
        done.transition(TicketStatus::Cancelled, shared::util::now())
            .unwrap();
        update(&pool, &done).await.unwrap();

        let open = ticket();
        insert(&pool, &open).await.unwrap();

        let live = list_non_terminal(&pool).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, open.id);
    }

    #[tokio::test]
    async fn delete_created_by_returns_removed_ids() {
        let pool = pool().await;
        let mut seeded = ticket();
        seeded.created_by = Some("demo-seed".to_string());
        insert(&pool, &seeded).await.unwrap();
        insert(&pool, &ticket()).await.unwrap();

        let removed = delete_created_by(&pool, "demo-seed").await.unwrap();
        assert_eq!(removed, vec![seeded.id]);
        assert_eq!(list_non_terminal(&pool).await.unwrap().len(), 1);
    }
}
