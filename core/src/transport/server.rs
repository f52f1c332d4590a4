//! Central-side link server: accepts peripheral links and fans events
//! in and out
//!
//! Each accepted connection starts with a join handshake in which the
//! central assigns the peripheral the first free index (1-based, up to
//! [`MAX_PERIPHERALS`]). After the handshake the connection gets a read
//! task and a write task; inbound messages are normalized so a `Local`
//! source never reaches the dispatch logic, then forwarded on the link
//! event channel.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

use crate::protocol::constants::{MAX_PERIPHERALS, PROTOCOL_VERSION};
use crate::protocol::{Message, WelcomeMessage};
use crate::relay::EventSource;
use crate::transport::link::Link;
use crate::{Error, NodeIdentity, Result};

/// Event from the link server
#[derive(Debug)]
pub enum LinkEvent {
    /// A peripheral completed the join handshake
    PeripheralJoined { index: u8, name: String },
    /// A peripheral link dropped
    PeripheralLost { index: u8 },
    /// Message received from an attached peripheral
    MessageReceived { index: u8, message: Message },
}

struct PeripheralSlot {
    name: String,
    outbound: mpsc::UnboundedSender<Message>,
}

/// Sender side of the attached-peripheral registry.
///
/// Cheap to clone; the central's protocol logic uses it to broadcast
/// relayed events. Broadcasting resolves a `Local` source to `Central`
/// before anything touches the wire.
#[derive(Clone)]
pub struct LinkRegistry {
    slots: Arc<RwLock<HashMap<u8, PeripheralSlot>>>,
}

impl LinkRegistry {
    fn new() -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Send a message to every attached peripheral.
    ///
    /// Best-effort: a closed link is logged and skipped, never an error.
    pub async fn broadcast(&self, mut message: Message) {
        message.resolve_source(EventSource::Central);
        let slots = self.slots.read().await;
        for (index, slot) in slots.iter() {
            if slot.outbound.send(message.clone()).is_err() {
                tracing::warn!("link to peripheral {} already closed", index);
            }
        }
    }

    /// Number of currently attached peripherals.
    pub async fn peripheral_count(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Indices and names of currently attached peripherals.
    pub async fn peripherals(&self) -> Vec<(u8, String)> {
        self.slots
            .read()
            .await
            .iter()
            .map(|(index, slot)| (*index, slot.name.clone()))
            .collect()
    }
}

/// TCP server for peripheral links
pub struct LinkServer {
    listener: TcpListener,
    port: u16,
}

impl LinkServer {
    /// Bind to a port and create the server.
    pub async fn bind(port: u16) -> Result<Self> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Network(format!("failed to bind: {}", e)))?;

        let actual_port = listener
            .local_addr()
            .map_err(|e| Error::Network(e.to_string()))?
            .port();

        tracing::info!("link server listening on port {}", actual_port);

        Ok(Self {
            listener,
            port: actual_port,
        })
    }

    /// Get the port we're listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Start accepting peripheral links.
    pub fn start(
        self,
        identity: NodeIdentity,
    ) -> (mpsc::Receiver<LinkEvent>, LinkRegistry, LinkServerHandle) {
        let (tx, rx) = mpsc::channel(64);
        let registry = LinkRegistry::new();
        let accept_registry = registry.clone();

        let task = tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, addr)) => {
                        tracing::debug!("incoming link from {}", addr);
                        let tx = tx.clone();
                        let registry = accept_registry.clone();
                        let identity = identity.clone();

                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_link(stream, addr, tx, registry, identity).await
                            {
                                tracing::error!("link error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("accept error: {}", e);
                    }
                }
            }
        });

        (rx, registry, LinkServerHandle { task })
    }
}

async fn handle_link(
    stream: TcpStream,
    addr: SocketAddr,
    events: mpsc::Sender<LinkEvent>,
    registry: LinkRegistry,
    identity: NodeIdentity,
) -> Result<()> {
    let mut link = Link::from_stream(stream);

    let join = match link.recv().await? {
        Message::Join(join) => join,
        other => {
            return Err(Error::InvalidMessage(format!(
                "expected join, got {:?}",
                other
            )));
        }
    };

    if join.protocol_version != PROTOCOL_VERSION {
        let reason = format!(
            "protocol version mismatch: central {}, peripheral {}",
            PROTOCOL_VERSION, join.protocol_version
        );
        tracing::warn!("rejecting {} at {}: {}", join.node_name, addr, reason);
        link.send(&Message::JoinReject { reason }).await?;
        return Ok(());
    }

    // Claim the first free index while holding the write lock, so two
    // concurrent joins cannot land in the same slot.
    let (index, outbound_rx) = {
        let mut slots = registry.slots.write().await;
        let index = (1..=MAX_PERIPHERALS as u8).find(|i| !slots.contains_key(i));
        let Some(index) = index else {
            tracing::warn!("rejecting {} at {}: all slots taken", join.node_name, addr);
            drop(slots);
            link.send(&Message::JoinReject {
                reason: Error::NodeFull.to_string(),
            })
            .await?;
            return Ok(());
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        slots.insert(
            index,
            PeripheralSlot {
                name: join.node_name.clone(),
                outbound: outbound_tx,
            },
        );
        (index, outbound_rx)
    };

    link.send(&Message::Welcome(WelcomeMessage {
        index,
        node_id: identity.id,
        node_name: identity.name.clone(),
    }))
    .await?;

    tracing::info!(
        "peripheral {} ({}) attached as index {}",
        join.node_name,
        join.node_id,
        index
    );
    let _ = events
        .send(LinkEvent::PeripheralJoined {
            index,
            name: join.node_name.clone(),
        })
        .await;

    let (mut reader, mut writer) = link.into_split();

    // Write task drains the slot's outbound queue; it ends when the slot
    // is removed and the sender dropped.
    let write_task = tokio::spawn(async move {
        let mut outbound_rx = outbound_rx;
        while let Some(message) = outbound_rx.recv().await {
            if let Err(e) = writer.send(&message).await {
                tracing::debug!("write to peripheral {} failed: {}", index, e);
                break;
            }
        }
    });

    loop {
        match reader.recv().await {
            Ok(mut message) => {
                // Relay hop: anything still tagged Local is normalized to
                // the index of the link it arrived on.
                message.resolve_source(EventSource::Peripheral(index));
                if events
                    .send(LinkEvent::MessageReceived { index, message })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("link to peripheral {} closed: {}", index, e);
                break;
            }
        }
    }

    registry.slots.write().await.remove(&index);
    write_task.abort();
    let _ = events.send(LinkEvent::PeripheralLost { index }).await;
    tracing::info!("peripheral index {} detached", index);

    Ok(())
}

/// Handle to the running link server
pub struct LinkServerHandle {
    task: tokio::task::JoinHandle<()>,
}

impl LinkServerHandle {
    /// Stop accepting new links.
    pub fn abort(self) {
        self.task.abort();
    }
}
