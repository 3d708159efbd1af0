//! Order-Item Repository

use super::RepoResult;
use chrono::{DateTime, Utc};
use shared::{OrderItem, OrderItemStatus};
use sqlx::SqlitePool;
use uuid::Uuid;

pub async fn insert(pool: &SqlitePool, item: &OrderItem) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO order_items (
            id, order_id, group_id, menu_item_id, name, category, notes,
            price, quantity, requires_production, station_id, table_label,
            status, created_at, updated_at, created_by
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(item.id)
    .bind(item.order_id)
    .bind(item.group_id)
    .bind(item.menu_item_id)
    .bind(&item.name)
    .bind(&item.category)
    .bind(&item.notes)
    .bind(item.price)
    .bind(item.quantity)
    .bind(item.requires_production)
    .bind(&item.station_id)
    .bind(&item.table_label)
    .bind(item.status)
    .bind(item.created_at)
    .bind(item.updated_at)
    .bind(&item.created_by)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> RepoResult<Option<OrderItem>> {
    let item = sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(item)
}

/// Last-write-wins status update: the write only lands when the stored row
/// is not newer than `updated_at`. Returns the number of rows matched;
/// 0 is the benign "a newer write got there first" case.
pub async fn set_status(
    pool: &SqlitePool,
    id: Uuid,
    status: OrderItemStatus,
    updated_at: DateTime<Utc>,
) -> RepoResult<u64> {
    let result = sqlx::query(
        "UPDATE order_items SET status = ?, updated_at = ?
         WHERE id = ? AND updated_at <= ?",
    )
    .bind(status)
    .bind(updated_at)
    .bind(id)
    .bind(updated_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Non-terminal items, optionally narrowed to one production station.
/// Snapshot source for the order-item stream server.
pub async fn list_active(
    pool: &SqlitePool,
    station_id: Option<&str>,
) -> RepoResult<Vec<OrderItem>> {
    let items = match station_id {
        Some(station) => {
            sqlx::query_as::<_, OrderItem>(
                "SELECT * FROM order_items
                 WHERE status NOT IN ('delivered', 'cancelled') AND station_id = ?
                 ORDER BY created_at",
            )
            .bind(station.to_string())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, OrderItem>(
                "SELECT * FROM order_items
                 WHERE status NOT IN ('delivered', 'cancelled')
                 ORDER BY created_at",
            )
            .fetch_all(pool)
            .await?
        }
    };
    Ok(items)
}

pub async fn list_by_order(pool: &SqlitePool, order_id: Uuid) -> RepoResult<Vec<OrderItem>> {
    let items = sqlx::query_as::<_, OrderItem>(
        "SELECT * FROM order_items WHERE order_id = ? ORDER BY created_at",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(items)
}

pub async fn delete_created_by(pool: &SqlitePool, tag: &str) -> RepoResult<u64> {
    let result = sqlx::query("DELETE FROM order_items WHERE created_by = ?")
        .bind(tag.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_all(pool: &SqlitePool) -> RepoResult<u64> {
    let result = sqlx::query("DELETE FROM order_items").execute(pool).await?;
    Ok(result.rows_affected())
}
