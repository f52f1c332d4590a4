//! Event relay fabric: addressing and loop prevention
//!
//! Events that cross a node boundary carry an [`EventSource`] telling the
//! receiver where the value originated. A node raises its own events with
//! the `Local` sentinel; the relay rewrites that to the node's concrete
//! identity at the hop, so `Local` never travels on the wire. A listener
//! that sees a non-`Local` source applies the value but never re-raises
//! it, which is what keeps a change from ping-ponging between the central
//! and its peripherals forever.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Origin of a relayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Originated on the node currently evaluating the event; not yet
    /// relayed. Must be rewritten before the event crosses a node boundary.
    Local,
    /// The central node (index 0).
    Central,
    /// A peripheral, identified by its assigned index (1-based).
    Peripheral(u8),
}

impl EventSource {
    pub fn is_local(&self) -> bool {
        matches!(self, EventSource::Local)
    }

    /// Concrete node index: 0 for central, the assigned index for a
    /// peripheral. `None` for the unresolved `Local` sentinel.
    pub fn index(&self) -> Option<u8> {
        match self {
            EventSource::Local => None,
            EventSource::Central => Some(0),
            EventSource::Peripheral(i) => Some(*i),
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::Local => write!(f, "local"),
            EventSource::Central => write!(f, "central"),
            EventSource::Peripheral(i) => write!(f, "peripheral {}", i),
        }
    }
}

/// An event that carries a relay source field.
///
/// Implemented by every message kind the relay forwards between nodes;
/// the rewrite helpers below are generic over this trait so the rewrite
/// rule exists in exactly one place, not once per event type.
pub trait Sourced {
    fn source(&self) -> EventSource;
    fn set_source(&mut self, source: EventSource);
}

/// Rewrite a `Local` source to the sending node's concrete identity.
///
/// Called by the relay on the sending side of a hop. Events already
/// carrying a concrete source pass through untouched, so the rewrite
/// happens at most once for any value.
pub fn resolve_source<T: Sourced>(event: &mut T, local_identity: EventSource) {
    if event.source().is_local() {
        event.set_source(local_identity);
    }
}

/// True if the event originated on another node and should be applied
/// but never re-raised.
pub fn is_foreign(source: EventSource) -> bool {
    !source.is_local()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestEvent {
        source: EventSource,
    }

    impl Sourced for TestEvent {
        fn source(&self) -> EventSource {
            self.source
        }
        fn set_source(&mut self, source: EventSource) {
            self.source = source;
        }
    }

    #[test]
    fn test_local_rewritten_to_peripheral_index() {
        for index in 1..=8u8 {
            let mut event = TestEvent {
                source: EventSource::Local,
            };
            resolve_source(&mut event, EventSource::Peripheral(index));
            assert_eq!(event.source, EventSource::Peripheral(index));
        }
    }

    #[test]
    fn test_local_rewritten_to_central() {
        let mut event = TestEvent {
            source: EventSource::Local,
        };
        resolve_source(&mut event, EventSource::Central);
        assert_eq!(event.source, EventSource::Central);
    }

    #[test]
    fn test_concrete_source_not_rewritten() {
        // A value that already crossed a hop keeps its origin.
        let mut event = TestEvent {
            source: EventSource::Peripheral(3),
        };
        resolve_source(&mut event, EventSource::Central);
        assert_eq!(event.source, EventSource::Peripheral(3));
    }

    #[test]
    fn test_foreign_predicate() {
        assert!(!is_foreign(EventSource::Local));
        assert!(is_foreign(EventSource::Central));
        assert!(is_foreign(EventSource::Peripheral(1)));
    }

    #[test]
    fn test_index_mapping() {
        assert_eq!(EventSource::Local.index(), None);
        assert_eq!(EventSource::Central.index(), Some(0));
        assert_eq!(EventSource::Peripheral(5).index(), Some(5));
    }
}
