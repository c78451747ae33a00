//! Event system for session and per-node notifications.
//!
//! Inbound frames never block on consumers: events are fanned out over a
//! broadcast channel and slow subscribers simply lag.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::protocol::{HardwareAddress, IoSample};
use crate::session::SessionParameters;

/// Notifications emitted by the session.
#[derive(Debug, Clone)]
pub enum Event {
    /// Bootstrap finished; the session is usable.
    Initialized(SessionParameters),
    /// Session-level failure (bootstrap error, transport loss).
    SessionError {
        /// Human-readable description.
        message: String,
    },
    /// Local device joined a network.
    JoinedNetwork,
    /// Local device came up from a hardware reset.
    HardwareReset,
    /// Local device came up from a watchdog reset.
    WatchdogReset,
    /// Local device was disassociated from its network.
    Disassociated,
    /// Local device started acting as coordinator.
    CoordinatorStarted,
    /// A previously unseen node was registered.
    NodeDiscovered(HardwareAddress),
    /// A known node reported in again; its cached attributes were refreshed.
    NodeRediscovered(HardwareAddress),
    /// A discovery window expired.
    DiscoveryEnd,
    /// Application data from a node.
    NodeData {
        /// Sending node.
        source: HardwareAddress,
        /// Application payload (already run through the payload parser
        /// strategy when one is configured).
        payload: Bytes,
    },
    /// Telemetry sample from a node.
    NodeIo {
        /// Sending node.
        source: HardwareAddress,
        /// Decoded sample.
        sample: IoSample,
    },
    /// A node's liveness timer elapsed without a refresh.
    NodeDisconnected(HardwareAddress),
}

/// Discriminant of an [`Event`], used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// [`Event::Initialized`].
    Initialized,
    /// [`Event::SessionError`].
    SessionError,
    /// [`Event::JoinedNetwork`].
    JoinedNetwork,
    /// [`Event::HardwareReset`].
    HardwareReset,
    /// [`Event::WatchdogReset`].
    WatchdogReset,
    /// [`Event::Disassociated`].
    Disassociated,
    /// [`Event::CoordinatorStarted`].
    CoordinatorStarted,
    /// [`Event::NodeDiscovered`].
    NodeDiscovered,
    /// [`Event::NodeRediscovered`].
    NodeRediscovered,
    /// [`Event::DiscoveryEnd`].
    DiscoveryEnd,
    /// [`Event::NodeData`].
    NodeData,
    /// [`Event::NodeIo`].
    NodeIo,
    /// [`Event::NodeDisconnected`].
    NodeDisconnected,
}

impl Event {
    /// Returns the event's kind discriminant.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Initialized(_) => EventKind::Initialized,
            Self::SessionError { .. } => EventKind::SessionError,
            Self::JoinedNetwork => EventKind::JoinedNetwork,
            Self::HardwareReset => EventKind::HardwareReset,
            Self::WatchdogReset => EventKind::WatchdogReset,
            Self::Disassociated => EventKind::Disassociated,
            Self::CoordinatorStarted => EventKind::CoordinatorStarted,
            Self::NodeDiscovered(_) => EventKind::NodeDiscovered,
            Self::NodeRediscovered(_) => EventKind::NodeRediscovered,
            Self::DiscoveryEnd => EventKind::DiscoveryEnd,
            Self::NodeData { .. } => EventKind::NodeData,
            Self::NodeIo { .. } => EventKind::NodeIo,
            Self::NodeDisconnected(_) => EventKind::NodeDisconnected,
        }
    }

    /// Returns the node address this event concerns, if any.
    #[must_use]
    pub const fn source(&self) -> Option<HardwareAddress> {
        match self {
            Self::NodeDiscovered(addr)
            | Self::NodeRediscovered(addr)
            | Self::NodeDisconnected(addr)
            | Self::NodeData { source: addr, .. }
            | Self::NodeIo { source: addr, .. } => Some(*addr),
            _ => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    filter: Option<EventFilter>,
}

impl Subscription {
    /// Receives the next event matching the subscription's filter.
    ///
    /// Returns `None` once the dispatcher is dropped. Lagged events are
    /// skipped silently.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.as_ref().is_none_or(|f| f.matches(&event)) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Filter selecting a subset of events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Restrict to these event kinds.
    pub kinds: Option<Vec<EventKind>>,
    /// Restrict to events concerning this node.
    pub source: Option<HardwareAddress>,
}

impl EventFilter {
    /// Creates a filter for specific event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            source: None,
        }
    }

    /// Creates a filter for every event concerning one node.
    #[must_use]
    pub const fn node(source: HardwareAddress) -> Self {
        Self {
            kinds: None,
            source: Some(source),
        }
    }

    /// Restricts this filter to one node in addition to its kinds.
    #[must_use]
    pub const fn with_source(mut self, source: HardwareAddress) -> Self {
        self.source = Some(source);
        self
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        if let Some(source) = self.source {
            if event.source() != Some(source) {
                return false;
            }
        }
        true
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher with the given buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    ///
    /// An event with no subscribers is dropped; that is not an error.
    pub fn dispatch(&self, event: Event) {
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to events, optionally filtered.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
            filter,
        }
    }

    /// Waits for an event matching the filter, up to `timeout`.
    ///
    /// Returns `None` if the timeout expires or the dispatcher shuts down.
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Option<Event> {
        let mut subscription = self.subscribe(Some(filter));
        tokio::select! {
            biased;
            event = subscription.recv() => event,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}
