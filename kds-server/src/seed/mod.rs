//! Demo seed tooling - admin surface, not on the runtime hot path
//!
//! The seed derives kitchen tickets directly from the demo order items
//! (inverse status mapping) instead of running them through ingest. It is
//! gated by a `_seeds` marker row so re-applying is a no-op, and every
//! record carries `created_by = demo-seed` so `clear` can undo exactly
//! what was seeded.

use crate::bus::EventBus;
use crate::db::repository;
use crate::tickets::TicketCache;
use serde::Serialize;
use shared::ticket::station_display_name;
use shared::{AppError, AppResult, OrderItem, OrderItemStatus, Ticket, TicketStatus};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Marker row id in `_seeds`
pub const DEMO_SEED_ID: &str = "demo-restaurant-v1";
/// Provenance tag on every seeded record
pub const DEMO_TAG: &str = "demo-seed";

#[derive(Debug, Serialize)]
pub struct SeedOutcome {
    pub applied: bool,
    pub order_items: usize,
    pub tickets: usize,
}

#[derive(Debug, Serialize)]
pub struct ClearOutcome {
    pub order_items: u64,
    pub tickets: usize,
}

struct DemoLine {
    name: &'static str,
    category: &'static str,
    station: Option<&'static str>,
    table: &'static str,
    quantity: i32,
    price: f64,
    status: OrderItemStatus,
    notes: Option<&'static str>,
}

fn demo_lines() -> Vec<DemoLine> {
    vec![
        DemoLine {
            name: "Paella Valenciana",
            category: "Mains",
            station: Some("kitchen"),
            table: "T1",
            quantity: 2,
            price: 18.5,
            status: OrderItemStatus::Preparing,
            notes: None,
        },
        DemoLine {
            name: "Gazpacho",
            category: "Starters",
            station: Some("kitchen"),
            table: "T1",
            quantity: 1,
            price: 7.0,
            status: OrderItemStatus::Pending,
            notes: Some("no garlic"),
        },
        DemoLine {
            name: "Negroni",
            category: "Cocktails",
            station: Some("bar"),
            table: "T2",
            quantity: 2,
            price: 9.5,
            status: OrderItemStatus::Ready,
            notes: None,
        },
        DemoLine {
            name: "Cortado",
            category: "Coffee",
            station: Some("coffee"),
            table: "T3",
            quantity: 1,
            price: 2.2,
            status: OrderItemStatus::Pending,
            notes: None,
        },
        DemoLine {
            name: "Tarta de Santiago",
            category: "Desserts",
            station: Some("dessert"),
            table: "T2",
            quantity: 1,
            price: 6.0,
            status: OrderItemStatus::Pending,
            notes: None,
        },
        // No production: never gets a ticket
        DemoLine {
            name: "Bread basket",
            category: "Sides",
            station: None,
            table: "T1",
            quantity: 1,
            price: 2.5,
            status: OrderItemStatus::Pending,
            notes: None,
        },
        // Cancelled: the inverse mapping yields no kitchen status
        DemoLine {
            name: "Croquetas",
            category: "Starters",
            station: Some("kitchen"),
            table: "T3",
            quantity: 1,
            price: 6.5,
            status: OrderItemStatus::Cancelled,
            notes: None,
        },
    ]
}

/// Walk a fresh ticket through the state machine up to `target`
fn drive_ticket_to(ticket: &mut Ticket, target: TicketStatus) {
    let path: &[TicketStatus] = match target {
        TicketStatus::Created => &[],
        TicketStatus::Started => &[TicketStatus::Started],
        TicketStatus::Ready => &[TicketStatus::Started, TicketStatus::Ready],
        TicketStatus::Delivered => &[
            TicketStatus::Started,
            TicketStatus::Ready,
            TicketStatus::Delivered,
        ],
        TicketStatus::Cancelled => &[TicketStatus::Cancelled],
    };
    let mut at = ticket.updated_at;
    for step in path {
        at = at + chrono::Duration::seconds(30);
        // Infallible: the path above follows the state machine
        let _ = ticket.transition(*step, at);
    }
}

/// Apply the demo seed. Idempotent: a present marker row makes this a
/// no-op reporting `applied = false`.
pub async fn apply_demo_seed(
    pool: &SqlitePool,
    cache: &Arc<TicketCache>,
) -> AppResult<SeedOutcome> {
    if repository::seeds::is_applied(pool, DEMO_SEED_ID)
        .await
        .map_err(AppError::from)?
    {
        tracing::info!(seed = DEMO_SEED_ID, "Demo seed already applied");
        return Ok(SeedOutcome {
            applied: false,
            order_items: 0,
            tickets: 0,
        });
    }

    let order_id = Uuid::new_v4();
    let mut items = 0usize;
    let mut tickets = 0usize;

    for line in demo_lines() {
        let now = shared::util::now();
        let item = OrderItem {
            id: Uuid::new_v4(),
            order_id,
            group_id: None,
            menu_item_id: Uuid::new_v4(),
            name: line.name.to_string(),
            category: Some(line.category.to_string()),
            notes: line.notes.map(str::to_string),
            price: line.price,
            quantity: line.quantity,
            requires_production: line.station.is_some(),
            station_id: line.station.map(str::to_string),
            table_label: Some(line.table.to_string()),
            status: line.status,
            created_at: now,
            updated_at: now,
            created_by: Some(DEMO_TAG.to_string()),
        };
        repository::order_item::insert(pool, &item)
            .await
            .map_err(AppError::from)?;
        items += 1;

        // Derive the ticket directly, bypassing ingest. The inverse
        // mapping has no row for cancelled items.
        let (Some(station), Some(target)) = (line.station, line.status.ticket_status()) else {
            continue;
        };
        let mut ticket = Ticket::new(
            item.order_id,
            item.id,
            item.menu_item_id,
            station,
            item.name.clone(),
            station_display_name(station),
            item.table_label.clone(),
            item.quantity,
            item.notes.clone(),
        );
        ticket.created_by = Some(DEMO_TAG.to_string());
        drive_ticket_to(&mut ticket, target);

        repository::ticket::insert(pool, &ticket)
            .await
            .map_err(AppError::from)?;
        cache.apply(ticket);
        tickets += 1;
    }

    repository::seeds::mark_applied(pool, DEMO_SEED_ID)
        .await
        .map_err(AppError::from)?;
    tracing::info!(order_items = items, tickets, "Demo seed applied");
    Ok(SeedOutcome {
        applied: true,
        order_items: items,
        tickets,
    })
}

/// Remove everything tagged `demo-seed` and drop the marker
pub async fn clear_demo_data(
    pool: &SqlitePool,
    cache: &Arc<TicketCache>,
) -> AppResult<ClearOutcome> {
    let ticket_ids = repository::ticket::delete_created_by(pool, DEMO_TAG)
        .await
        .map_err(AppError::from)?;
    for id in &ticket_ids {
        cache.remove(*id);
    }
    let order_items = repository::order_item::delete_created_by(pool, DEMO_TAG)
        .await
        .map_err(AppError::from)?;
    repository::seeds::remove(pool, DEMO_SEED_ID)
        .await
        .map_err(AppError::from)?;
    tracing::info!(
        tickets = ticket_ids.len(),
        order_items,
        "Demo data cleared"
    );
    Ok(ClearOutcome {
        order_items,
        tickets: ticket_ids.len(),
    })
}

/// Full reset: wipe stores, seed markers, bus streams and the cache
pub async fn full_reset(
    pool: &SqlitePool,
    cache: &Arc<TicketCache>,
    bus: &EventBus,
) -> AppResult<()> {
    repository::ticket::delete_all(pool)
        .await
        .map_err(AppError::from)?;
    repository::order_item::delete_all(pool)
        .await
        .map_err(AppError::from)?;
    repository::seeds::clear(pool).await.map_err(AppError::from)?;
    bus.purge()
        .map_err(|e| AppError::internal(format!("bus purge failed: {e}")))?;
    cache.clear();
    tracing::warn!("Full reset performed: stores, streams and cache wiped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;
    use crate::stream::StationFilter;

    #[tokio::test]
    async fn seed_is_idempotent_via_marker() {
        let pool = DbService::new(":memory:").await.unwrap().pool;
        let cache = Arc::new(TicketCache::new());

        let first = apply_demo_seed(&pool, &cache).await.unwrap();
        assert!(first.applied);
        assert!(first.tickets > 0);
        // Cancelled and non-production lines have no ticket
        assert!(first.tickets < first.order_items);

        let second = apply_demo_seed(&pool, &cache).await.unwrap();
        assert!(!second.applied);
        assert_eq!(cache.len(), first.tickets);
    }

    #[tokio::test]
    async fn seeded_tickets_reflect_item_status() {
        let pool = DbService::new(":memory:").await.unwrap().pool;
        let cache = Arc::new(TicketCache::new());
        apply_demo_seed(&pool, &cache).await.unwrap();

        let bar = cache.list(&StationFilter::Station("bar".to_string()));
        assert_eq!(bar.len(), 1);
        // Ready order item ⇒ ready ticket with lifecycle stamps
        assert_eq!(bar[0].status, TicketStatus::Ready);
        assert!(bar[0].started_at.is_some());
        assert!(bar[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn clear_removes_only_tagged_records() {
        let pool = DbService::new(":memory:").await.unwrap().pool;
        let cache = Arc::new(TicketCache::new());

        // One organic ticket that must survive the clear
        let organic = Ticket::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "kitchen",
            "Lentejas",
            "Kitchen",
            None,
            1,
            None,
        );
        repository::ticket::insert(&pool, &organic).await.unwrap();
        cache.apply(organic.clone());

        let seeded = apply_demo_seed(&pool, &cache).await.unwrap();
        let cleared = clear_demo_data(&pool, &cache).await.unwrap();
        assert_eq!(cleared.tickets, seeded.tickets);
        assert_eq!(cleared.order_items as usize, seeded.order_items);
        assert!(cache.get(organic.id).is_some());
        assert_eq!(cache.len(), 1);

        // Marker gone: the seed can be applied again
        assert!(apply_demo_seed(&pool, &cache).await.unwrap().applied);
    }
}
