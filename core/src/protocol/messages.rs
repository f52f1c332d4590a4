//! Protocol message definitions

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::relay::{resolve_source, EventSource, Sourced};
use crate::settings::ActivitySettings;

/// All inter-node messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Peripheral asks to attach to the central
    Join(JoinMessage),

    /// Central accepts a join and assigns the peripheral its index
    Welcome(WelcomeMessage),

    /// Central refuses a join
    JoinReject { reason: String },

    /// A node's activity settings changed
    SettingsChanged(SettingsChanged),

    /// Central asks the peripherals to report their settings
    SettingsRequest(SettingsRequest),

    /// A node reports its settings in answer to a request
    SettingsReport(SettingsReport),
}

impl Message {
    /// Serialize message to bytes using JSON (for cross-platform compatibility)
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from bytes (JSON)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Rewrite a `Local` source to the given node identity.
    ///
    /// The single relay instantiation point for every sourced message
    /// kind; messages without a source field pass through untouched.
    pub fn resolve_source(&mut self, local_identity: EventSource) {
        match self {
            Message::SettingsChanged(ev) => resolve_source(ev, local_identity),
            Message::SettingsReport(ev) => resolve_source(ev, local_identity),
            _ => {}
        }
    }
}

/// Join request sent by a peripheral when it connects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinMessage {
    pub node_id: Uuid,
    pub node_name: String,
    pub protocol_version: u16,
}

/// Join acceptance carrying the assigned peripheral index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeMessage {
    pub index: u8,
    pub node_id: Uuid,
    pub node_name: String,
}

/// Raised when a node's activity settings are modified.
///
/// Relayed central to peripherals and peripheral to central so every
/// node converges on the same pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettingsChanged {
    pub settings: ActivitySettings,
    pub source: EventSource,
}

impl Sourced for SettingsChanged {
    fn source(&self) -> EventSource {
        self.source
    }
    fn set_source(&mut self, source: EventSource) {
        self.source = source;
    }
}

/// Asks every peripheral for its current settings.
///
/// The id has no ordering semantics; it only matches reports to the
/// round that asked for them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettingsRequest {
    pub request_id: u8,
}

/// A node's settings, reported in answer to a request
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettingsReport {
    pub settings: ActivitySettings,
    pub source: EventSource,
    pub request_id: u8,
}

impl Sourced for SettingsReport {
    fn source(&self) -> EventSource {
        self.source
    }
    fn set_source(&mut self, source: EventSource) {
        self.source = source;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roundtrip() {
        let msg = Message::SettingsReport(SettingsReport {
            settings: ActivitySettings {
                idle_ms: 30_000,
                sleep_ms: 900_000,
            },
            source: EventSource::Peripheral(2),
            request_id: 7,
        });

        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();

        match decoded {
            Message::SettingsReport(report) => {
                assert_eq!(report.settings.idle_ms, 30_000);
                assert_eq!(report.source, EventSource::Peripheral(2));
                assert_eq!(report.request_id, 7);
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_resolve_rewrites_sourced_messages() {
        let mut msg = Message::SettingsChanged(SettingsChanged {
            settings: ActivitySettings {
                idle_ms: 1,
                sleep_ms: 2,
            },
            source: EventSource::Local,
        });
        msg.resolve_source(EventSource::Peripheral(4));

        match msg {
            Message::SettingsChanged(ev) => assert_eq!(ev.source, EventSource::Peripheral(4)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_resolve_leaves_requests_alone() {
        let mut msg = Message::SettingsRequest(SettingsRequest { request_id: 3 });
        msg.resolve_source(EventSource::Central);

        match msg {
            Message::SettingsRequest(req) => assert_eq!(req.request_id, 3),
            _ => unreachable!(),
        }
    }
}
