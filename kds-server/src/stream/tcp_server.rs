//! TCP streaming endpoint for dashboard subscribers
//!
//! One listener serves both stream servers. A client opens a connection,
//! sends a single subscribe frame naming the stream and an optional
//! station filter, and then receives an unbounded sequence of event
//! frames: the snapshot items first, then deltas, with periodic keepalive
//! ticks. Disconnect (or any failed write) unsubscribes and releases the
//! buffer.
//!
//! Frame layout: 1-byte kind, 4-byte little-endian payload length, JSON
//! payload.

use crate::orders::OrderItemStreamServer;
use crate::stream::{StationFilter, StreamEvent, Subscription};
use crate::tickets::TicketStreamServer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::sync::CancellationToken;

/// Largest accepted inbound frame
const MAX_FRAME_LEN: usize = 64 * 1024;
/// How long a client may take to send its subscribe frame
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Client → server: subscription request
    Subscribe = 0x00,
    /// Server → client: one snapshot item
    SnapshotItem = 0x01,
    /// Server → client: one delta event
    Event = 0x02,
    /// Server → client: liveness tick, empty payload
    Keepalive = 0x03,
}

impl TryFrom<u8> for FrameKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(FrameKind::Subscribe),
            0x01 => Ok(FrameKind::SnapshotItem),
            0x02 => Ok(FrameKind::Event),
            0x03 => Ok(FrameKind::Keepalive),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamTarget {
    Tickets,
    OrderItems,
}

/// First (and only) frame a client sends
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub stream: StreamTarget,
    #[serde(default)]
    pub station: Option<String>,
}

pub struct StreamTcpServer {
    listen_addr: String,
    tickets: Arc<TicketStreamServer>,
    order_items: Arc<OrderItemStreamServer>,
    snapshot_chunk: usize,
    keepalive: Duration,
}

impl StreamTcpServer {
    pub fn new(
        listen_addr: String,
        tickets: Arc<TicketStreamServer>,
        order_items: Arc<OrderItemStreamServer>,
        snapshot_chunk: usize,
        keepalive: Duration,
    ) -> Self {
        Self {
            listen_addr,
            tickets,
            order_items,
            snapshot_chunk,
            keepalive,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("Stream server listening on {}", self.listen_addr);
        self.serve(listener, shutdown).await
    }

    /// Accept loop on an already-bound listener (tests bind port 0)
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let server = Arc::new(self);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Stream server shutting down");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            tracing::debug!(%addr, "Stream client connected");
                            let server = server.clone();
                            let client_shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_client(socket, client_shutdown).await {
                                    tracing::debug!(%addr, error = %e, "Stream client closed");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to accept stream connection");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_client(
        &self,
        socket: TcpStream,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        socket.set_nodelay(true).ok();
        let (mut reader, writer) = socket.into_split();

        let (kind, payload) =
            tokio::time::timeout(SUBSCRIBE_TIMEOUT, read_frame(&mut reader)).await??;
        if kind != FrameKind::Subscribe {
            anyhow::bail!("expected subscribe frame, got {kind:?}");
        }
        let request: SubscribeRequest = serde_json::from_slice(&payload)?;
        let filter = StationFilter::from_station(request.station);

        match request.stream {
            StreamTarget::Tickets => {
                let sub = self.tickets.subscribe(filter);
                self.stream_to_client(writer, sub.snapshot, sub.deltas, shutdown)
                    .await
            }
            StreamTarget::OrderItems => {
                let sub = self.order_items.subscribe(filter).await?;
                self.stream_to_client(writer, sub.snapshot, sub.deltas, shutdown)
                    .await
            }
        }
    }

    /// Snapshot first (chunked, yielding between chunks), then deltas in
    /// arrival order, with keepalive ticks in between.
    async fn stream_to_client<E: StreamEvent + Serialize>(
        &self,
        mut writer: OwnedWriteHalf,
        snapshot: Vec<E>,
        mut deltas: Subscription<E>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        for batch in snapshot.chunks(self.snapshot_chunk.max(1)) {
            for event in batch {
                write_frame(
                    &mut writer,
                    FrameKind::SnapshotItem,
                    &serde_json::to_vec(event)?,
                )
                .await?;
            }
            tokio::task::yield_now().await;
        }

        let mut keepalive = tokio::time::interval(self.keepalive);
        keepalive.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = keepalive.tick() => {
                    write_frame(&mut writer, FrameKind::Keepalive, &[]).await?;
                }
                event = deltas.recv() => {
                    let Some(event) = event else { break };
                    write_frame(&mut writer, FrameKind::Event, &serde_json::to_vec(&event)?)
                        .await?;
                }
            }
        }
        Ok(())
        // Dropping `deltas` unsubscribes and discards in-flight events
    }
}

async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    kind: FrameKind,
    payload: &[u8],
) -> std::io::Result<()> {
    let mut data = Vec::with_capacity(5 + payload.len());
    data.push(kind as u8);
    data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    data.extend_from_slice(payload);
    writer.write_all(&data).await
}

async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> anyhow::Result<(FrameKind, Vec<u8>)> {
    let mut kind_buf = [0u8; 1];
    reader.read_exact(&mut kind_buf).await?;
    let kind =
        FrameKind::try_from(kind_buf[0]).map_err(|b| anyhow::anyhow!("invalid frame kind {b}"))?;

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame too large: {len}");
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok((kind, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;
    use crate::tickets::TicketCache;
    use shared::{Ticket, TicketEvent};
    use uuid::Uuid;

    async fn write_subscribe(stream: &mut TcpStream, request: &SubscribeRequest) {
        let payload = serde_json::to_vec(request).unwrap();
        write_frame(stream, FrameKind::Subscribe, &payload)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn client_receives_snapshot_then_deltas() {
        let pool = DbService::new(":memory:").await.unwrap().pool;
        let cache = Arc::new(TicketCache::new());
        let tickets = Arc::new(TicketStreamServer::new(cache.clone(), 32));
        let order_items = Arc::new(OrderItemStreamServer::new(pool, 32));
        let shutdown = CancellationToken::new();

        // Dispatcher wiring
        let dispatcher = tickets.clone();
        let changes = cache.subscribe_changes();
        let token = shutdown.clone();
        tokio::spawn(async move {
            dispatcher.run_dispatcher(changes, token).await;
        });

        let existing = Ticket::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "kitchen",
            "Callos",
            "Kitchen",
            None,
            1,
            None,
        );
        cache.apply(existing.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = StreamTcpServer::new(
            addr.to_string(),
            tickets,
            order_items,
            8,
            Duration::from_secs(30),
        );
        let server_token = shutdown.clone();
        tokio::spawn(async move {
            server.serve(listener, server_token).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        write_subscribe(
            &mut client,
            &SubscribeRequest {
                stream: StreamTarget::Tickets,
                station: None,
            },
        )
        .await;

        let (kind, payload) = read_frame(&mut client).await.unwrap();
        assert_eq!(kind, FrameKind::SnapshotItem);
        let snapshot_event: TicketEvent = serde_json::from_slice(&payload).unwrap();
        assert_eq!(snapshot_event.ticket_id, existing.id);

        // A cache write after subscribe arrives as a delta frame
        let mut changed = existing.clone();
        changed
            .transition(
                shared::TicketStatus::Started,
                changed.updated_at + chrono::Duration::seconds(1),
            )
            .unwrap();
        cache.apply(changed);

        let (kind, payload) = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut client))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kind, FrameKind::Event);
        let delta: TicketEvent = serde_json::from_slice(&payload).unwrap();
        assert_eq!(delta.status(), shared::TicketStatus::Started);

        shutdown.cancel();
    }
}
