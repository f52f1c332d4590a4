//! Activity settings value and the per-node settings store

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use crate::protocol::SettingsChanged;
use crate::relay::EventSource;
use crate::{Error, Result};

/// The pair of activity timeouts kept in sync across nodes.
///
/// Both fields are plain millisecond counts; 0 means "disabled" and is
/// interpreted by the layer that applies these to the hardware power
/// states, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySettings {
    pub idle_ms: u32,
    pub sleep_ms: u32,
}

/// Hardware-owned acceptance rule for settings values.
///
/// The store treats the outcome as opaque: a rejected value is reported
/// as a validation failure without a parsed reason.
pub trait SettingsValidator: Send + Sync {
    fn validate(&self, settings: &ActivitySettings) -> bool;
}

/// Validator that accepts every value; stands in when no hardware policy
/// is wired up.
pub struct AcceptAll;

impl SettingsValidator for AcceptAll {
    fn validate(&self, _settings: &ActivitySettings) -> bool {
        true
    }
}

/// Outcome of a successful [`SettingsStore::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The value changed and one change event was emitted.
    Changed,
    /// The value was already current; nothing was emitted.
    Unchanged,
}

/// Holds the node's current activity settings.
///
/// Writes are atomic with respect to concurrent readers: a reader never
/// observes a half-written pair. Every effective `set` emits exactly one
/// `Local`-tagged change event on the channel handed out at construction;
/// failed and no-op writes emit nothing. `apply` is the inbound path for
/// relayed changes and never emits, which is what breaks the re-broadcast
/// loop.
pub struct SettingsStore {
    current: RwLock<ActivitySettings>,
    validator: Arc<dyn SettingsValidator>,
    change_tx: mpsc::UnboundedSender<SettingsChanged>,
}

impl SettingsStore {
    /// Create a store and the receiver for its change events.
    pub fn new(
        initial: ActivitySettings,
        validator: Arc<dyn SettingsValidator>,
    ) -> (Self, mpsc::UnboundedReceiver<SettingsChanged>) {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        (
            Self {
                current: RwLock::new(initial),
                validator,
                change_tx,
            },
            change_rx,
        )
    }

    /// Current settings.
    pub async fn get(&self) -> ActivitySettings {
        *self.current.read().await
    }

    /// Write new settings from the local control surface.
    ///
    /// Validates, then updates the pair in one atomic step and emits a
    /// single `Local`-tagged change event if the value actually changed.
    pub async fn set(&self, settings: ActivitySettings) -> Result<SetOutcome> {
        if !self.validator.validate(&settings) {
            tracing::warn!(
                "settings rejected by validator: idle={} ms, sleep={} ms",
                settings.idle_ms,
                settings.sleep_ms
            );
            return Err(Error::Validation);
        }

        let mut current = self.current.write().await;
        if *current == settings {
            return Ok(SetOutcome::Unchanged);
        }
        *current = settings;
        drop(current);

        let _ = self.change_tx.send(SettingsChanged {
            settings,
            source: EventSource::Local,
        });
        Ok(SetOutcome::Changed)
    }

    /// Apply settings received from another node.
    ///
    /// Goes through the same validator but never emits a change event.
    /// Returns false if the hardware policy rejected the value.
    pub async fn apply(&self, settings: ActivitySettings) -> bool {
        if !self.validator.validate(&settings) {
            tracing::warn!(
                "relayed settings rejected by validator: idle={} ms, sleep={} ms",
                settings.idle_ms,
                settings.sleep_ms
            );
            return false;
        }
        *self.current.write().await = settings;
        true
    }
}
