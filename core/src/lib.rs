//! Splitsync Core - Split settings synchronization library
//!
//! This library keeps a pair of activity timeouts (idle and sleep)
//! consistent across a central node and its wirelessly attached
//! peripherals, and exposes a control surface for reading, writing,
//! and auditing them across all nodes.

pub mod node;
pub mod protocol;
pub mod relay;
pub mod rpc;
pub mod settings;
pub mod transport;

mod error;

pub use error::{Error, Result};

use std::time::Duration;

/// Node identity exchanged in the join handshake
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub id: uuid::Uuid,
    pub name: String,
}

impl NodeIdentity {
    /// Create a new node identity with a generated id.
    pub fn new(name: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name,
        }
    }
}

/// Configuration for a splitsync node
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the central listens on for peripheral links
    pub port: u16,
    /// Localhost port for the control surface
    pub control_port: u16,
    /// How long a blocking poll collects reports before closing
    pub collect_window: Duration,
    /// Settings a node starts with before any write or relay
    pub initial_settings: settings::ActivitySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: protocol::constants::DEFAULT_PORT,
            control_port: protocol::constants::DEFAULT_CONTROL_PORT,
            collect_window: Duration::from_millis(protocol::constants::COLLECT_WINDOW_MS),
            initial_settings: settings::ActivitySettings {
                idle_ms: protocol::constants::DEFAULT_IDLE_MS,
                sleep_ms: protocol::constants::DEFAULT_SLEEP_MS,
            },
        }
    }
}

// Re-export key types for convenience
pub use node::{CentralNode, NodeEvent, PeripheralNode, PollResult};
pub use relay::EventSource;
pub use rpc::{ControlClient, Notification, Request, Response, SettingsEntry};
pub use settings::{AcceptAll, ActivitySettings, SetOutcome, SettingsStore, SettingsValidator};
