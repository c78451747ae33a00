//! Remote node registry and per-node state.
//!
//! The registry is owned by the session and keyed by the immutable hardware
//! address. Nodes are created on discovery or first contact and never
//! removed; everything else about a node (network address, identifier, role,
//! liveness) is a mutable cache refreshed by inbound frames.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{RwLock, watch};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::protocol::{
    AtCommandName, CodecError, DeviceRole, Frame, HardwareAddress, IoSample, NetworkAddress,
    NodeContact,
};
use crate::session::Commander;

/// Transforms raw inbound payloads before they are published as data events.
///
/// One parser instance exists per node, so implementations may accumulate
/// state across frames (reassembly, line splitting). Returning `None`
/// consumes the payload without publishing anything.
pub trait PayloadParser: Send {
    /// Processes one inbound payload.
    fn parse(&mut self, payload: Bytes) -> Option<Bytes>;
}

/// Factory producing one [`PayloadParser`] per node.
pub type ParserFactory = Arc<dyn Fn(HardwareAddress) -> Box<dyn PayloadParser> + Send + Sync>;

/// Heartbeat settings applied to every node.
#[derive(Clone)]
pub(crate) struct NodeConfig {
    /// How long a node may stay silent before it counts as disconnected.
    /// `None` disables liveness monitoring entirely.
    pub liveness_timeout: Option<Duration>,
    /// Data payload that only refreshes liveness, never published as data.
    pub heartbeat_payload: Option<Bytes>,
    /// Optional per-node payload parser factory.
    pub parser_factory: Option<ParserFactory>,
}

struct NodeState {
    network: NetworkAddress,
    identifier: Option<String>,
    role: DeviceRole,
    connected: bool,
}

/// A remote device on the network.
///
/// Handed out as `Arc<Node>`; the same object survives re-discovery, so a
/// handle held across a network reshuffle keeps observing the node's
/// refreshed attributes.
pub struct Node {
    address: HardwareAddress,
    state: StdMutex<NodeState>,
    /// Liveness deadline; the monitor task sleeps until it.
    deadline: watch::Sender<Option<Instant>>,
    liveness_timeout: Option<Duration>,
    parser: Option<StdMutex<Box<dyn PayloadParser>>>,
    commander: Arc<Commander>,
}

impl Node {
    fn new(
        contact: NodeContact,
        connected: bool,
        commander: Arc<Commander>,
        config: &NodeConfig,
        events: EventDispatcher,
    ) -> Arc<Self> {
        let parser = config
            .parser_factory
            .as_ref()
            .map(|factory| StdMutex::new(factory(contact.address)));
        let (deadline, _) = watch::channel(None);

        let node = Arc::new(Self {
            address: contact.address,
            state: StdMutex::new(NodeState {
                network: contact.network,
                identifier: contact.identifier,
                role: contact.role,
                connected,
            }),
            deadline,
            liveness_timeout: config.liveness_timeout,
            parser,
            commander,
        });

        if connected {
            node.touch();
        }
        if config.liveness_timeout.is_some() {
            spawn_monitor(&node, events);
        }
        node
    }

    /// The node's immutable hardware address.
    #[must_use]
    pub const fn address(&self) -> HardwareAddress {
        self.address
    }

    /// The node's last known network address.
    #[must_use]
    pub fn network_address(&self) -> NetworkAddress {
        self.lock_state().network
    }

    /// The node's human-readable identifier, if it has reported one.
    #[must_use]
    pub fn identifier(&self) -> Option<String> {
        self.lock_state().identifier.clone()
    }

    /// The role the node plays in the network.
    #[must_use]
    pub fn role(&self) -> DeviceRole {
        self.lock_state().role
    }

    /// Returns true if the node coordinates the network.
    #[must_use]
    pub fn is_coordinator(&self) -> bool {
        self.role() == DeviceRole::Coordinator
    }

    /// Returns true if the node routes traffic.
    #[must_use]
    pub fn is_router(&self) -> bool {
        self.role() == DeviceRole::Router
    }

    /// Returns true if the node is a sleepy end device.
    #[must_use]
    pub fn is_end_device(&self) -> bool {
        self.role() == DeviceRole::EndDevice
    }

    /// Returns true if the node is currently considered reachable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock_state().connected
    }

    /// Sends an application payload to this node.
    ///
    /// Large payloads are split into consecutive frames and delivered as one
    /// atomic unit; either every piece is acknowledged or the call fails.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, transmission or delivery fails, or if
    /// no delivery status arrives within the response timeout.
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        let network = self.network_address();
        self.commander
            .transmit(self.address, network, payload)
            .await?;
        Ok(())
    }

    /// Queries or sets a configuration parameter on this node.
    ///
    /// Returns the raw parameter value (empty for a set).
    ///
    /// # Errors
    ///
    /// Returns an error if the node rejects the command, the command cannot
    /// be delivered, or no response arrives within the response timeout.
    pub async fn remote_at(
        &self,
        command: AtCommandName,
        parameter: Option<Bytes>,
    ) -> Result<Bytes> {
        let network = self.network_address();
        let frame = self
            .commander
            .remote_at(self.address, network, command, parameter)
            .await?;
        match frame {
            Frame::RemoteAtResponse { data, network, .. } => {
                // The response carries the node's current network address.
                self.set_network(network);
                Ok(data)
            }
            _ => Err(Error::Codec(CodecError::Malformed(
                "response kind does not match request".into(),
            ))),
        }
    }

    /// Marks the node alive and pushes its liveness deadline forward.
    ///
    /// A disconnected node reconnects silently here; only the
    /// connected-to-disconnected transition is announced.
    pub(crate) fn touch(&self) {
        self.lock_state().connected = true;
        if let Some(timeout) = self.liveness_timeout {
            // send_replace stores the value even while nothing subscribes
            // yet; the first touch happens before the monitor exists.
            self.deadline.send_replace(Some(Instant::now() + timeout));
        }
    }

    /// Flips the node to disconnected. Returns true on a transition.
    fn mark_disconnected(&self) -> bool {
        let mut state = self.lock_state();
        let was_connected = state.connected;
        state.connected = false;
        was_connected
    }

    fn set_network(&self, network: NetworkAddress) {
        self.lock_state().network = network;
    }

    /// Refreshes the mutable attributes from a discovery indication.
    fn update_contact(&self, contact: &NodeContact) {
        let mut state = self.lock_state();
        state.network = contact.network;
        if let Some(ref identifier) = contact.identifier {
            state.identifier = Some(identifier.clone());
        }
        if contact.role != DeviceRole::Unknown {
            state.role = contact.role;
        }
    }

    /// Runs a payload through the node's parser, when one is configured.
    fn parse_payload(&self, payload: Bytes) -> Option<Bytes> {
        match self.parser {
            Some(ref parser) => parser
                .lock()
                .expect("payload parser lock poisoned")
                .parse(payload),
            None => Some(payload),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, NodeState> {
        self.state.lock().expect("node state lock poisoned")
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("network", &state.network)
            .field("identifier", &state.identifier)
            .field("role", &state.role)
            .field("connected", &state.connected)
            .finish()
    }
}

/// Watches one node's liveness deadline and announces missed ones.
///
/// Holds only a weak handle so the task dies with its node: dropping the
/// node drops the deadline sender, which ends every `changed()` wait.
fn spawn_monitor(node: &Arc<Node>, events: EventDispatcher) {
    let weak = Arc::downgrade(node);
    let mut deadlines = node.deadline.subscribe();

    tokio::spawn(async move {
        loop {
            let deadline = *deadlines.borrow_and_update();
            let Some(at) = deadline else {
                if deadlines.changed().await.is_err() {
                    return;
                }
                continue;
            };

            tokio::select! {
                () = tokio::time::sleep_until(at) => {
                    if !expire(&weak, &events) {
                        return;
                    }
                    // Idle until the next refresh.
                    if deadlines.changed().await.is_err() {
                        return;
                    }
                }
                changed = deadlines.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    });
}

/// Handles one elapsed deadline. Returns false once the node is gone.
fn expire(weak: &Weak<Node>, events: &EventDispatcher) -> bool {
    let Some(node) = weak.upgrade() else {
        return false;
    };
    if node.mark_disconnected() {
        tracing::debug!("node {} missed its liveness deadline", node.address());
        events.dispatch(Event::NodeDisconnected(node.address()));
    }
    true
}

/// All nodes known to the session, keyed by hardware address.
pub(crate) struct NodeRegistry {
    nodes: RwLock<HashMap<HardwareAddress, Arc<Node>>>,
    events: EventDispatcher,
    commander: Arc<Commander>,
    config: NodeConfig,
}

impl NodeRegistry {
    pub(crate) fn new(
        events: EventDispatcher,
        commander: Arc<Commander>,
        config: NodeConfig,
    ) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            events,
            commander,
            config,
        }
    }

    /// Registers a discovery indication.
    ///
    /// Idempotent by hardware address: an unseen node is created and
    /// announced as discovered; a known node keeps its object and only has
    /// its mutable attributes refreshed, announced as re-discovered.
    pub(crate) async fn register(&self, contact: NodeContact) -> Arc<Node> {
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get(&contact.address) {
            node.update_contact(&contact);
            node.touch();
            tracing::debug!("node {} reported in again", contact.address);
            self.events.dispatch(Event::NodeRediscovered(contact.address));
            return Arc::clone(node);
        }

        let node = self.create(contact, true);
        nodes.insert(node.address(), Arc::clone(&node));
        tracing::info!("discovered node {}", node.address());
        self.events.dispatch(Event::NodeDiscovered(node.address()));
        node
    }

    /// Registers a node by address alone, without announcing it.
    ///
    /// Used for peers the caller knows about out of band. The node starts
    /// disconnected; its first frame flips it to connected.
    pub(crate) async fn add(&self, address: HardwareAddress) -> Arc<Node> {
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get(&address) {
            return Arc::clone(node);
        }
        let contact = NodeContact::from_addresses(address, NetworkAddress::UNKNOWN);
        let node = self.create(contact, false);
        nodes.insert(address, Arc::clone(&node));
        node
    }

    pub(crate) async fn get(&self, address: HardwareAddress) -> Option<Arc<Node>> {
        self.nodes.read().await.get(&address).cloned()
    }

    pub(crate) async fn all(&self) -> Vec<Arc<Node>> {
        self.nodes.read().await.values().cloned().collect()
    }

    /// Routes an application data frame to its node.
    ///
    /// Unknown senders are registered first (announced as discovered), so
    /// data is never attributed to an unknown address. A payload equal to
    /// the heartbeat sentinel only refreshes liveness.
    pub(crate) async fn handle_receive(
        &self,
        source: HardwareAddress,
        network: NetworkAddress,
        payload: Bytes,
    ) {
        let node = self.ensure(source, network).await;

        if self.config.heartbeat_payload.as_ref() == Some(&payload) {
            tracing::trace!("heartbeat from {source}");
            return;
        }

        let Some(payload) = node.parse_payload(payload) else {
            return;
        };
        self.events.dispatch(Event::NodeData { source, payload });
    }

    /// Routes a telemetry sample to its node.
    pub(crate) async fn handle_io(
        &self,
        source: HardwareAddress,
        network: NetworkAddress,
        sample: IoSample,
    ) {
        self.ensure(source, network).await;
        self.events.dispatch(Event::NodeIo { source, sample });
    }

    /// Handles a remote AT response nothing is waiting for.
    ///
    /// A known sender still proves it is alive; an unknown one is dropped.
    pub(crate) async fn handle_remote_at_response(&self, source: HardwareAddress) {
        match self.nodes.read().await.get(&source) {
            Some(node) => node.touch(),
            None => tracing::debug!("dropping remote response from unknown node {source}"),
        }
    }

    /// Looks up a node by the addresses on a data frame, creating it on
    /// first contact. Known nodes are refreshed without any announcement.
    async fn ensure(&self, address: HardwareAddress, network: NetworkAddress) -> Arc<Node> {
        {
            let nodes = self.nodes.read().await;
            if let Some(node) = nodes.get(&address) {
                node.set_network(network);
                node.touch();
                return Arc::clone(node);
            }
        }
        self.register(NodeContact::from_addresses(address, network))
            .await
    }

    fn create(&self, contact: NodeContact, connected: bool) -> Arc<Node> {
        Node::new(
            contact,
            connected,
            Arc::clone(&self.commander),
            &self.config,
            self.events.clone(),
        )
    }
}
