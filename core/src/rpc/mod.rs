//! Control-surface request router
//!
//! External controllers (the CLI, a UI client) talk to a running node
//! over a localhost control listener using the same length-prefixed JSON
//! framing as the inter-node links. Each frame from the client is one
//! [`Request`]; each frame to the client is a [`ControlFrame`] carrying
//! either the matching [`Response`] or an out-of-band [`Notification`]
//! from a fan-out round. A request that cannot be decoded still gets a
//! well-formed error response; the connection survives.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::relay::EventSource;
use crate::settings::ActivitySettings;
use crate::transport::framing::{read_frame, write_frame};
use crate::{Error, Result};

/// Control-surface request kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Read the local node's settings
    GetActivitySettings,
    /// Write the local node's settings and relay the change
    SetActivitySettings { settings: ActivitySettings },
    /// Blocking poll: collect settings from every reachable node and
    /// compute a consistency verdict
    GetAllActivitySettings,
    /// Fan-out: trigger all nodes to report asynchronously; entries
    /// arrive as notifications after this call returns
    RefreshAllActivitySettings,
}

/// Control-surface responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    ActivitySettings {
        settings: ActivitySettings,
    },
    SetResult {
        success: bool,
    },
    AllActivitySettings {
        entries: Vec<SettingsEntry>,
        in_sync: bool,
    },
    RefreshStarted {
        request_sent: bool,
    },
    Error {
        message: String,
    },
}

/// One node's settings with its resolved origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsEntry {
    pub settings: ActivitySettings,
    pub source: EventSource,
}

/// Out-of-band settings notification from a fan-out round
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Notification {
    pub settings: ActivitySettings,
    pub source: EventSource,
}

/// One frame sent to a control client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlFrame {
    Response(Response),
    Notification(Notification),
}

/// A decoded request waiting for the node to answer it
#[derive(Debug)]
pub struct ControlRequest {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

/// Tracks the most recently attached control session.
///
/// Fan-out notifications go to whichever client attached last; a client
/// that went away is silently skipped, matching the best-effort contract
/// of the fan-out protocol.
pub struct ControlSessions {
    current: RwLock<Option<mpsc::UnboundedSender<ControlFrame>>>,
}

impl ControlSessions {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    async fn attach(&self, sender: mpsc::UnboundedSender<ControlFrame>) {
        *self.current.write().await = Some(sender);
    }

    /// Push a settings notification to the current session, if any.
    pub async fn notify(&self, settings: ActivitySettings, source: EventSource) {
        if let Some(sender) = self.current.read().await.as_ref() {
            let _ = sender.send(ControlFrame::Notification(Notification { settings, source }));
        }
    }
}

impl Default for ControlSessions {
    fn default() -> Self {
        Self::new()
    }
}

/// Localhost TCP listener for the control surface
pub struct ControlServer {
    listener: TcpListener,
    port: u16,
}

impl ControlServer {
    /// Bind the control listener on localhost.
    pub async fn bind(port: u16) -> Result<Self> {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Network(format!("failed to bind control port: {}", e)))?;

        let actual_port = listener
            .local_addr()
            .map_err(|e| Error::Network(e.to_string()))?
            .port();

        tracing::info!("control surface listening on port {}", actual_port);

        Ok(Self {
            listener,
            port: actual_port,
        })
    }

    /// Get the port we're listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Start accepting control sessions.
    ///
    /// Decoded requests are handed to the node through `requests`; the
    /// session that attached most recently also receives fan-out
    /// notifications via `sessions`.
    pub fn start(
        self,
        requests: mpsc::Sender<ControlRequest>,
        sessions: Arc<ControlSessions>,
    ) -> ControlServerHandle {
        let task = tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, addr)) => {
                        tracing::debug!("control session from {}", addr);
                        let requests = requests.clone();
                        let sessions = sessions.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_session(stream, requests, sessions).await {
                                tracing::debug!("control session {} ended: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("control accept error: {}", e);
                    }
                }
            }
        });

        ControlServerHandle { task }
    }
}

async fn handle_session(
    stream: TcpStream,
    requests: mpsc::Sender<ControlRequest>,
    sessions: Arc<ControlSessions>,
) -> Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<ControlFrame>();
    sessions.attach(frame_tx.clone()).await;

    let write_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let payload = match serde_json::to_vec(&frame) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!("failed to encode control frame: {}", e);
                    continue;
                }
            };
            if write_frame(&mut write_half, &payload).await.is_err() {
                break;
            }
        }
    });

    loop {
        let payload = match read_frame(&mut read_half).await {
            Ok(payload) => payload,
            Err(_) => break,
        };

        // Decode failure is answered, not fatal: the caller gets an error
        // payload and the session stays up.
        let frame = match serde_json::from_slice::<Request>(&payload) {
            Ok(request) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                if requests
                    .send(ControlRequest {
                        request,
                        reply: reply_tx,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
                match reply_rx.await {
                    Ok(response) => ControlFrame::Response(response),
                    Err(_) => ControlFrame::Response(Response::Error {
                        message: "Failed to process request".to_string(),
                    }),
                }
            }
            Err(e) => {
                tracing::warn!("failed to decode control request: {}", e);
                ControlFrame::Response(Response::Error {
                    message: format!("Failed to decode request: {}", e),
                })
            }
        };

        if frame_tx.send(frame).is_err() {
            break;
        }
    }

    write_task.abort();
    Ok(())
}

/// Handle to the running control server
pub struct ControlServerHandle {
    task: tokio::task::JoinHandle<()>,
}

impl ControlServerHandle {
    /// Stop accepting control sessions.
    pub fn abort(self) {
        self.task.abort();
    }
}

/// Client side of the control surface, for out-of-process callers.
pub struct ControlClient {
    stream: TcpStream,
    pending: VecDeque<Notification>,
}

impl ControlClient {
    /// Connect to a node's control listener.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self {
            stream,
            pending: VecDeque::new(),
        })
    }

    /// Send one request and wait for its response.
    ///
    /// Notifications interleaved before the response are buffered for
    /// [`ControlClient::recv_notification`].
    pub async fn call(&mut self, request: &Request) -> Result<Response> {
        let payload = serde_json::to_vec(request)?;
        write_frame(&mut self.stream, &payload).await?;

        loop {
            let payload = read_frame(&mut self.stream).await?;
            match serde_json::from_slice::<ControlFrame>(&payload)? {
                ControlFrame::Response(response) => return Ok(response),
                ControlFrame::Notification(notification) => self.pending.push_back(notification),
            }
        }
    }

    /// Wait for the next out-of-band notification.
    pub async fn recv_notification(&mut self) -> Result<Notification> {
        if let Some(notification) = self.pending.pop_front() {
            return Ok(notification);
        }
        loop {
            let payload = read_frame(&mut self.stream).await?;
            match serde_json::from_slice::<ControlFrame>(&payload)? {
                ControlFrame::Notification(notification) => return Ok(notification),
                ControlFrame::Response(_) => {
                    tracing::debug!("dropping unmatched control response");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let request = Request::SetActivitySettings {
            settings: ActivitySettings {
                idle_ms: 30_000,
                sleep_ms: 900_000,
            },
        };

        let bytes = serde_json::to_vec(&request).unwrap();
        let decoded: Request = serde_json::from_slice(&bytes).unwrap();

        match decoded {
            Request::SetActivitySettings { settings } => {
                assert_eq!(settings.idle_ms, 30_000);
                assert_eq!(settings.sleep_ms, 900_000);
            }
            _ => panic!("wrong request kind"),
        }
    }

    #[test]
    fn test_malformed_request_fails_decode() {
        assert!(serde_json::from_slice::<Request>(b"{\"NoSuchRequest\":{}}").is_err());
        assert!(serde_json::from_slice::<Request>(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_notify_without_session_is_silent() {
        let sessions = ControlSessions::new();
        sessions
            .notify(
                ActivitySettings {
                    idle_ms: 1,
                    sleep_ms: 2,
                },
                EventSource::Central,
            )
            .await;
    }

    #[tokio::test]
    async fn test_notify_reaches_latest_session() {
        let sessions = ControlSessions::new();

        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        sessions.attach(old_tx).await;
        sessions.attach(new_tx).await;

        sessions
            .notify(
                ActivitySettings {
                    idle_ms: 5,
                    sleep_ms: 6,
                },
                EventSource::Peripheral(1),
            )
            .await;

        assert!(old_rx.try_recv().is_err());
        match new_rx.try_recv().unwrap() {
            ControlFrame::Notification(n) => {
                assert_eq!(n.source, EventSource::Peripheral(1));
            }
            _ => panic!("expected notification"),
        }
    }
}
