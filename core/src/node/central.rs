//! Central role: settings collection, poll and fan-out protocols,
//! relay dispatch

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::node::NodeEvent;
use crate::protocol::constants::{FANOUT_REQUEST_ID, MAX_COLLECTION_ENTRIES};
use crate::protocol::{Message, SettingsChanged, SettingsReport, SettingsRequest};
use crate::relay::{is_foreign, EventSource};
use crate::rpc::{
    ControlServer, ControlServerHandle, ControlSessions, Request, Response, SettingsEntry,
};
use crate::settings::{ActivitySettings, SettingsStore, SettingsValidator};
use crate::transport::{LinkEvent, LinkRegistry, LinkServer, LinkServerHandle};
use crate::{Config, Error, NodeIdentity, Result};

/// Central-only poll state: the entries gathered during one collection
/// window and the id that ties reports to the round that asked for them.
///
/// Owned by the central node and constructed once at startup; every poll
/// resets it. Reports are accepted only while a window is open, only
/// with the current round's id, and only up to capacity; everything else
/// is dropped without error.
pub struct SettingsCollection {
    entries: Vec<SettingsEntry>,
    current_request_id: u8,
    collecting: bool,
}

impl SettingsCollection {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(MAX_COLLECTION_ENTRIES),
            current_request_id: FANOUT_REQUEST_ID,
            collecting: false,
        }
    }

    /// Open a new collection round seeded with the central's own entry.
    /// Returns the round's request id.
    pub fn begin(&mut self, central_settings: ActivitySettings) -> u8 {
        self.entries.clear();
        self.current_request_id = next_request_id(self.current_request_id);
        self.entries.push(SettingsEntry {
            settings: central_settings,
            source: EventSource::Central,
        });
        self.collecting = true;
        self.current_request_id
    }

    /// Offer a report to the open round. Returns whether it was kept.
    pub fn offer(&mut self, report: &SettingsReport) -> bool {
        if !self.collecting || report.request_id != self.current_request_id {
            return false;
        }
        if self.entries.len() >= MAX_COLLECTION_ENTRIES {
            return false;
        }
        self.entries.push(SettingsEntry {
            settings: report.settings,
            source: report.source,
        });
        true
    }

    /// Close the round and compute the verdict. Reports for this round
    /// arriving later are dropped; the round does not reopen.
    pub fn close(&mut self) -> PollResult {
        self.collecting = false;
        let in_sync = match self.entries.first() {
            Some(first) => {
                let reference = first.settings;
                self.entries.iter().all(|e| e.settings == reference)
            }
            None => true,
        };
        PollResult {
            entries: self.entries.clone(),
            in_sync,
        }
    }
}

impl Default for SettingsCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// Next poll request id, skipping the reserved fan-out id on wraparound.
fn next_request_id(id: u8) -> u8 {
    let next = id.wrapping_add(1);
    if next == FANOUT_REQUEST_ID {
        next.wrapping_add(1)
    } else {
        next
    }
}

/// Result of one blocking settings poll.
///
/// A best-effort census: peripherals that were disconnected or too slow
/// are simply absent, and a partial entry list is a valid, final answer.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub entries: Vec<SettingsEntry>,
    pub in_sync: bool,
}

/// Everything the central's spawned tasks need, behind cheap clones.
#[derive(Clone)]
struct CentralContext {
    store: Arc<SettingsStore>,
    collection: Arc<Mutex<SettingsCollection>>,
    poll_gate: Arc<Mutex<()>>,
    registry: LinkRegistry,
    sessions: Arc<ControlSessions>,
    collect_window: Duration,
}

impl CentralContext {
    /// Blocking poll: open a round, broadcast the request, wait out the
    /// collection window, close and compute the verdict.
    ///
    /// Only one round may be open at a time; a second caller gets a busy
    /// error instead of silently invalidating the first round's reports.
    async fn poll_all(&self) -> Result<PollResult> {
        let _gate = self
            .poll_gate
            .try_lock()
            .map_err(|_| Error::PollInProgress)?;

        let own = self.store.get().await;
        let request_id = self.collection.lock().await.begin(own);
        tracing::debug!("settings poll {} started", request_id);

        self.registry
            .broadcast(Message::SettingsRequest(SettingsRequest { request_id }))
            .await;

        tokio::time::sleep(self.collect_window).await;

        let result = self.collection.lock().await.close();
        tracing::debug!(
            "settings poll {} closed: {} entries, in_sync={}",
            request_id,
            result.entries.len(),
            result.in_sync
        );
        Ok(result)
    }

    /// Fan-out: push our own notification, trigger everyone else, return
    /// immediately. Peripheral entries arrive as notifications routed
    /// through the report dispatch below.
    async fn refresh_all(&self) -> Result<()> {
        let own = self.store.get().await;
        self.sessions.notify(own, EventSource::Central).await;
        self.registry
            .broadcast(Message::SettingsRequest(SettingsRequest {
                request_id: FANOUT_REQUEST_ID,
            }))
            .await;
        Ok(())
    }

    async fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::GetActivitySettings => Response::ActivitySettings {
                settings: self.store.get().await,
            },
            Request::SetActivitySettings { settings } => match self.store.set(settings).await {
                Ok(_) => Response::SetResult { success: true },
                Err(Error::Validation) => Response::SetResult { success: false },
                Err(e) => Response::Error {
                    message: e.to_string(),
                },
            },
            Request::GetAllActivitySettings => match self.poll_all().await {
                Ok(result) => Response::AllActivitySettings {
                    entries: result.entries,
                    in_sync: result.in_sync,
                },
                Err(e) => Response::Error {
                    message: e.to_string(),
                },
            },
            Request::RefreshAllActivitySettings => match self.refresh_all().await {
                Ok(()) => Response::RefreshStarted { request_sent: true },
                Err(e) => Response::Error {
                    message: e.to_string(),
                },
            },
        }
    }

    async fn dispatch_link_event(&self, event: LinkEvent, events: &mpsc::Sender<NodeEvent>) {
        match event {
            LinkEvent::PeripheralJoined { index, name } => {
                let _ = events.send(NodeEvent::PeripheralJoined { index, name }).await;
            }
            LinkEvent::PeripheralLost { index } => {
                let _ = events.send(NodeEvent::PeripheralLost { index }).await;
            }
            LinkEvent::MessageReceived { index, message } => match message {
                Message::SettingsChanged(ev) => {
                    // Foreign changes are applied through the silent path;
                    // a Local tag here would be our own echo and is ignored.
                    if is_foreign(ev.source) {
                        tracing::debug!(
                            "applying relayed settings from {}: idle={} ms, sleep={} ms",
                            ev.source,
                            ev.settings.idle_ms,
                            ev.settings.sleep_ms
                        );
                        if self.store.apply(ev.settings).await {
                            let _ = events
                                .send(NodeEvent::SettingsApplied {
                                    settings: ev.settings,
                                    source: ev.source,
                                })
                                .await;
                        }
                    }
                }
                Message::SettingsReport(report) => {
                    if report.request_id == FANOUT_REQUEST_ID {
                        self.sessions.notify(report.settings, report.source).await;
                    } else if !self.collection.lock().await.offer(&report) {
                        tracing::debug!(
                            "dropped report from {} for request {}",
                            report.source,
                            report.request_id
                        );
                    }
                }
                other => {
                    tracing::debug!("unexpected message from peripheral {}: {:?}", index, other);
                }
            },
        }
    }
}

/// The node holding the central role.
///
/// Owns the link server peripherals attach to, the control surface, and
/// the process-lifetime [`SettingsCollection`].
pub struct CentralNode {
    identity: NodeIdentity,
    config: Config,
    store: Arc<SettingsStore>,
    change_rx: Option<mpsc::UnboundedReceiver<SettingsChanged>>,
    collection: Arc<Mutex<SettingsCollection>>,
    poll_gate: Arc<Mutex<()>>,
    sessions: Arc<ControlSessions>,
    ctx: Option<CentralContext>,
    link_handle: Option<LinkServerHandle>,
    control_handle: Option<ControlServerHandle>,
    port: Option<u16>,
    control_port: Option<u16>,
}

impl CentralNode {
    /// Create a central node with default configuration.
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
            collection: Arc::new(Mutex::new(SettingsCollection::new())),
            poll_gate: Arc::new(Mutex::new(())),
            sessions: Arc::new(ControlSessions::new()),
            ctx: None,
            link_handle: None,
            control_handle: None,
            port: None,
            control_port: None,
        }
    }

    /// Replace the hardware acceptance rule. Only meaningful before
    /// [`CentralNode::start`].
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

    /// Link-server port, once started.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Control-surface port, once started.
    pub fn control_port(&self) -> Option<u16> {
        self.control_port
    }

    /// Start the node and return its event channel.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<NodeEvent>> {
        let Some(mut change_rx) = self.change_rx.take() else {
            return Err(Error::InvalidMessage("node already started".to_string()));
        };

        let link_server = LinkServer::bind(self.config.port).await?;
        self.port = Some(link_server.port());
        let control_server = ControlServer::bind(self.config.control_port).await?;
        self.control_port = Some(control_server.port());

        let (mut link_events, registry, link_handle) = link_server.start(self.identity.clone());
        let (request_tx, mut request_rx) = mpsc::channel(16);
        let control_handle = control_server.start(request_tx, self.sessions.clone());

        let ctx = CentralContext {
            store: self.store.clone(),
            collection: self.collection.clone(),
            poll_gate: self.poll_gate.clone(),
            registry: registry.clone(),
            sessions: self.sessions.clone(),
            collect_window: self.config.collect_window,
        };
        self.ctx = Some(ctx.clone());
        self.link_handle = Some(link_handle);
        self.control_handle = Some(control_handle);

        let (tx, rx) = mpsc::channel(64);

        // Inbound dispatch: relayed changes, poll reports, fan-out reports.
        let dispatch_ctx = ctx.clone();
        let tx_links = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = link_events.recv().await {
                dispatch_ctx.dispatch_link_event(event, &tx_links).await;
            }
        });

        // Local-to-network bridge: every effective local write goes out
        // to the peripherals exactly once.
        let change_registry = registry;
        let tx_changes = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = change_rx.recv().await {
                tracing::debug!(
                    "relaying local settings change: idle={} ms, sleep={} ms",
                    event.settings.idle_ms,
                    event.settings.sleep_ms
                );
                change_registry
                    .broadcast(Message::SettingsChanged(event))
                    .await;
                let _ = tx_changes
                    .send(NodeEvent::SettingsRelayed {
                        settings: event.settings,
                    })
                    .await;
            }
        });

        // Control dispatch: each request is handled on its own task so a
        // blocking poll never stalls other callers.
        let request_ctx = ctx;
        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let ctx = request_ctx.clone();
                tokio::spawn(async move {
                    let response = ctx.handle_request(request.request).await;
                    let _ = request.reply.send(response);
                });
            }
        });

        tracing::info!(
            "central node {} started (links on {}, control on {})",
            self.identity.name,
            self.port.unwrap_or_default(),
            self.control_port.unwrap_or_default()
        );
        Ok(rx)
    }

    /// Current local settings.
    pub async fn settings(&self) -> ActivitySettings {
        self.store.get().await
    }

    /// Write local settings; an effective write is relayed to every
    /// peripheral.
    pub async fn set_settings(&self, settings: ActivitySettings) -> Result<()> {
        self.store.set(settings).await.map(|_| ())
    }

    /// Run one blocking settings poll.
    pub async fn poll_all(&self) -> Result<PollResult> {
        match &self.ctx {
            Some(ctx) => ctx.poll_all().await,
            None => Err(Error::InvalidMessage("node not started".to_string())),
        }
    }

    /// Trigger a fan-out round.
    pub async fn refresh_all(&self) -> Result<()> {
        match &self.ctx {
            Some(ctx) => ctx.refresh_all().await,
            None => Err(Error::InvalidMessage("node not started".to_string())),
        }
    }

    /// Answer one control-surface request in-process.
    pub async fn handle_request(&self, request: Request) -> Response {
        match &self.ctx {
            Some(ctx) => ctx.handle_request(request).await,
            None => Response::Error {
                message: "node not started".to_string(),
            },
        }
    }

    /// Stop the link server and the control surface.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.link_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.control_handle.take() {
            handle.abort();
        }
    }
}
