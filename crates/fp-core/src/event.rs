//! Change notifications emitted by [`crate::GraphModel`].
//!
//! Delivery is synchronous and in subscription order. While a batch is
//! open (see [`crate::GraphModel::begin_batch`]) individual events are
//! buffered and flushed as one [`ModelEvent::Batch`] so compound
//! operations are observed atomically.

use serde::Serialize;

use crate::{Direction, Edge, Node, SubGraph};

/// A typed change notification. Update events carry before/after
/// snapshots; remove events carry the removed entity.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum ModelEvent {
    NodeAdded {
        node: Node,
    },
    NodeUpdated {
        previous: Node,
        node: Node,
    },
    NodeRemoved {
        node: Node,
    },
    EdgeAdded {
        edge: Edge,
    },
    EdgeUpdated {
        previous: Edge,
        edge: Edge,
    },
    EdgeRemoved {
        edge: Edge,
    },
    SubGraphAdded {
        subgraph: SubGraph,
    },
    SubGraphUpdated {
        previous: SubGraph,
        subgraph: SubGraph,
    },
    SubGraphRemoved {
        subgraph: SubGraph,
    },
    ClassDefined {
        name: String,
        styles: Vec<String>,
    },
    DirectionChanged {
        previous: Direction,
        direction: Direction,
    },
    /// Ordered list of events coalesced by a batch scope.
    Batch {
        events: Vec<ModelEvent>,
    },
}

impl ModelEvent {
    /// Number of underlying (non-batch) events this notification carries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Batch { events } => events.iter().map(ModelEvent::len).sum(),
            _ => 1,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Callback invoked for every flushed event.
pub type EventHandler = Box<dyn FnMut(&ModelEvent)>;

/// Handle returned by [`crate::GraphModel::subscribe`], used to
/// unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);
