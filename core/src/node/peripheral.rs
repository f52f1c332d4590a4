//! Peripheral role: applies relayed changes, answers settings requests,
//! bridges local changes to the central

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::node::NodeEvent;
use crate::protocol::constants::PROTOCOL_VERSION;
use crate::protocol::{JoinMessage, Message, SettingsChanged, SettingsReport};
use crate::relay::{is_foreign, EventSource};
use crate::rpc::{ControlServer, ControlServerHandle, ControlSessions, Request, Response};
use crate::settings::{ActivitySettings, SettingsStore, SettingsValidator};
use crate::transport::Link;
use crate::{Config, Error, NodeIdentity, Result};

/// A node holding the peripheral role, attached to one central.
pub struct PeripheralNode {
    identity: NodeIdentity,
    config: Config,
    pub(crate) store: Arc<SettingsStore>,
    change_rx: Option<mpsc::UnboundedReceiver<SettingsChanged>>,
    sessions: Arc<ControlSessions>,
    index: Option<u8>,
    control_handle: Option<ControlServerHandle>,
    control_port: Option<u16>,
}

impl PeripheralNode {
    /// Create a peripheral node with default configuration.
    pub fn new(node_name: String) -> Self {
        Self::with_config(node_name, Config::default())
    }

    /// Create with custom config.
    pub fn with_config(node_name: String, config: Config) -> Self {
        let (store, change_rx) =
            SettingsStore::new(config.initial_settings, Arc::new(crate::settings::AcceptAll));
        Self {
            identity: NodeIdentity::new(node_name),
            config,
            store: Arc::new(store),
            change_rx: Some(change_rx),
            sessions: Arc::new(ControlSessions::new()),
            index: None,
            control_handle: None,
            control_port: None,
        }
    }

    /// Replace the hardware acceptance rule. Only meaningful before
    /// [`PeripheralNode::connect`].
    pub fn with_validator(mut self, validator: Arc<dyn SettingsValidator>) -> Self {
        let (store, change_rx) = SettingsStore::new(self.config.initial_settings, validator);
        self.store = Arc::new(store);
        self.change_rx = Some(change_rx);
        self
    }

    pub fn node_id(&self) -> uuid::Uuid {
        self.identity.id
    }

    pub fn node_name(&self) -> &str {
        &self.identity.name
    }

    /// Index assigned by the central, once attached.
    pub fn index(&self) -> Option<u8> {
        self.index
    }

    /// Control-surface port, once attached.
    pub fn control_port(&self) -> Option<u16> {
        self.control_port
    }

    /// Attach to a central node and return this node's event channel.
    pub async fn connect(&mut self, central_addr: SocketAddr) -> Result<mpsc::Receiver<NodeEvent>> {
        let Some(mut change_rx) = self.change_rx.take() else {
            return Err(Error::InvalidMessage("node already started".to_string()));
        };

        let mut link = Link::connect(central_addr).await?;
        link.send(&Message::Join(JoinMessage {
            node_id: self.identity.id,
            node_name: self.identity.name.clone(),
            protocol_version: PROTOCOL_VERSION,
        }))
        .await?;

        let index = match link.recv().await? {
            Message::Welcome(welcome) => {
                tracing::info!(
                    "joined central {} as peripheral index {}",
                    welcome.node_name,
                    welcome.index
                );
                welcome.index
            }
            Message::JoinReject { reason } => return Err(Error::JoinRejected(reason)),
            other => {
                return Err(Error::InvalidMessage(format!(
                    "expected welcome, got {:?}",
                    other
                )));
            }
        };
        self.index = Some(index);
        let own_source = EventSource::Peripheral(index);

        let control_server = ControlServer::bind(self.config.control_port).await?;
        self.control_port = Some(control_server.port());
        let (request_tx, mut request_rx) = mpsc::channel(16);
        self.control_handle = Some(control_server.start(request_tx, self.sessions.clone()));

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (mut reader, mut writer) = link.into_split();
        let (tx, rx) = mpsc::channel(64);

        // Write task owns the relay hop: anything still tagged Local is
        // rewritten to our assigned index before it touches the wire.
        tokio::spawn(async move {
            while let Some(mut message) = outbound_rx.recv().await {
                message.resolve_source(own_source);
                if let Err(e) = writer.send(&message).await {
                    tracing::debug!("write to central failed: {}", e);
                    break;
                }
            }
        });

        // Read task: apply relayed changes, answer settings requests.
        let store = self.store.clone();
        let tx_read = tx.clone();
        let outbound_read = outbound_tx.clone();
        tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(message) => match message {
                        Message::SettingsChanged(ev) => {
                            if is_foreign(ev.source) {
                                tracing::debug!(
                                    "applying relayed settings from {}: idle={} ms, sleep={} ms",
                                    ev.source,
                                    ev.settings.idle_ms,
                                    ev.settings.sleep_ms
                                );
                                if store.apply(ev.settings).await {
                                    let _ = tx_read
                                        .send(NodeEvent::SettingsApplied {
                                            settings: ev.settings,
                                            source: ev.source,
                                        })
                                        .await;
                                }
                            }
                        }
                        Message::SettingsRequest(request) => {
                            tracing::debug!(
                                "reporting settings for request {}",
                                request.request_id
                            );
                            let report = SettingsReport {
                                settings: store.get().await,
                                source: EventSource::Local,
                                request_id: request.request_id,
                            };
                            let _ = outbound_read.send(Message::SettingsReport(report));
                        }
                        other => {
                            tracing::debug!("unexpected message from central: {:?}", other);
                        }
                    },
                    Err(e) => {
                        tracing::warn!("link to central lost: {}", e);
                        let _ = tx_read.send(NodeEvent::CentralLost).await;
                        break;
                    }
                }
            }
        });

        // Local-to-network bridge: every effective local write goes to
        // the central exactly once.
        let outbound_changes = outbound_tx;
        let tx_changes = tx;
        tokio::spawn(async move {
            while let Some(event) = change_rx.recv().await {
                tracing::debug!(
                    "relaying local settings change: idle={} ms, sleep={} ms",
                    event.settings.idle_ms,
                    event.settings.sleep_ms
                );
                let _ = outbound_changes.send(Message::SettingsChanged(event));
                let _ = tx_changes
                    .send(NodeEvent::SettingsRelayed {
                        settings: event.settings,
                    })
                    .await;
            }
        });

        // Control dispatch; peripherals only serve the local requests.
        let store = self.store.clone();
        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let store = store.clone();
                tokio::spawn(async move {
                    let response = handle_peripheral_request(&store, request.request).await;
                    let _ = request.reply.send(response);
                });
            }
        });

        tracing::info!(
            "peripheral node {} attached (control on {})",
            self.identity.name,
            self.control_port.unwrap_or_default()
        );
        Ok(rx)
    }

    /// Current local settings.
    pub async fn settings(&self) -> ActivitySettings {
        self.store.get().await
    }

    /// Write local settings; an effective write is relayed to the central.
    pub async fn set_settings(&self, settings: ActivitySettings) -> Result<()> {
        self.store.set(settings).await.map(|_| ())
    }

    /// Answer one control-surface request in-process.
    pub async fn handle_request(&self, request: Request) -> Response {
        handle_peripheral_request(&self.store, request).await
    }

    /// Stop the control surface.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.control_handle.take() {
            handle.abort();
        }
    }
}

async fn handle_peripheral_request(store: &SettingsStore, request: Request) -> Response {
    match request {
        Request::GetActivitySettings => Response::ActivitySettings {
            settings: store.get().await,
        },
        Request::SetActivitySettings { settings } => match store.set(settings).await {
            Ok(_) => Response::SetResult { success: true },
            Err(Error::Validation) => Response::SetResult { success: false },
            Err(e) => Response::Error {
                message: e.to_string(),
            },
        },
        Request::GetAllActivitySettings | Request::RefreshAllActivitySettings => {
            tracing::warn!("central-only settings request received on a peripheral");
            Response::Error {
                message: Error::UnsupportedRequest.to_string(),
            }
        }
    }
}
