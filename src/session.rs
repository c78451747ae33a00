//! High-level session over a half-duplex radio device.
//!
//! The session owns the transport, the command queue and the node registry,
//! and runs the read loop that feeds every inbound byte through the decoder
//! and router. Connecting also bootstraps the local device: the five
//! identity parameters are queried up front so the session knows who it is
//! before the caller sees it as initialized.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::correlation::{CorrelationRegistry, ResponseSlot};
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
use crate::node::{Node, NodeConfig, NodeRegistry, ParserFactory};
use crate::protocol::{
    AtCommandName, CodecError, CommandSpec, CorrelationTag, Frame, FrameCodec, FrameDecoder,
    FrameKind, HardwareAddress, NetworkAddress,
};
use crate::queue::{CommandQueue, CommandTask, Fragment};
use crate::router::FrameRouter;
use crate::transport::Transport;

/// Default wait for a correlated response before a command counts as lost.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default heartbeat sentinel payload.
pub const DEFAULT_HEARTBEAT_PAYLOAD: &[u8] = b"```";

/// Default silence tolerated before a node counts as disconnected.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(8000);

/// Default discovery window when the device has not reported one.
pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_secs(6);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Session configuration.
#[derive(Clone)]
pub struct SessionConfig {
    /// How long to wait for each correlated response.
    pub response_timeout: Duration,
    /// Whether nodes are expected to prove liveness periodically.
    pub heartbeat: bool,
    /// Data payload that counts as a heartbeat, never surfaced as data.
    pub heartbeat_payload: Bytes,
    /// Silence tolerated before a node counts as disconnected.
    pub heartbeat_timeout: Duration,
    /// Discovery window used when the device reports none.
    pub discovery_window: Duration,
    /// Optional per-node payload parser factory.
    pub parser_factory: Option<ParserFactory>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            heartbeat: false,
            heartbeat_payload: Bytes::from_static(DEFAULT_HEARTBEAT_PAYLOAD),
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            discovery_window: DEFAULT_DISCOVERY_WINDOW,
            parser_factory: None,
        }
    }
}

impl SessionConfig {
    /// Sets the per-response timeout.
    #[must_use]
    pub const fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Enables heartbeat-based liveness monitoring.
    #[must_use]
    pub const fn heartbeat(mut self, enabled: bool) -> Self {
        self.heartbeat = enabled;
        self
    }

    /// Sets the heartbeat sentinel payload.
    #[must_use]
    pub fn heartbeat_payload(mut self, payload: Bytes) -> Self {
        self.heartbeat_payload = payload;
        self
    }

    /// Sets the heartbeat timeout.
    #[must_use]
    pub const fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Sets the fallback discovery window.
    #[must_use]
    pub const fn discovery_window(mut self, window: Duration) -> Self {
        self.discovery_window = window;
        self
    }

    /// Installs a payload parser factory applied per node.
    #[must_use]
    pub fn parser_factory(mut self, factory: ParserFactory) -> Self {
        self.parser_factory = Some(factory);
        self
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("response_timeout", &self.response_timeout)
            .field("heartbeat", &self.heartbeat)
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .field("discovery_window", &self.discovery_window)
            .field("parser_factory", &self.parser_factory.is_some())
            .finish()
    }
}

/// The local device's identity, queried during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParameters {
    /// Network (PAN) id, as a hex string.
    pub pan_id: String,
    /// The device's human-readable identifier.
    pub identifier: String,
    /// The device's own hardware address.
    pub address: HardwareAddress,
    /// Discovery window the device is configured for.
    pub discovery_window: Duration,
}

impl SessionParameters {
    fn from_responses(id: &Bytes, ni: &Bytes, sh: &Bytes, sl: &Bytes, nt: &Bytes) -> Self {
        // SH and SL are the two halves of the 64-bit address; NT is in
        // units of 100 ms.
        let address = HardwareAddress::new((be_value(sh) << 32) | be_value(sl));
        Self {
            pan_id: hex::encode(id),
            identifier: String::from_utf8_lossy(ni).into_owned(),
            address,
            discovery_window: Duration::from_millis(be_value(nt) * 100),
        }
    }
}

fn be_value(data: &[u8]) -> u64 {
    data.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

fn response_data(frame: Frame) -> Result<Bytes> {
    match frame {
        Frame::AtResponse { data, .. } => Ok(data),
        _ => Err(Error::Codec(CodecError::Malformed(
            "response kind does not match request".into(),
        ))),
    }
}

/// Encodes commands, reserves their tags and runs them through the queue.
///
/// Shared by the session and every node handle; the sole entry point for
/// outbound traffic.
pub(crate) struct Commander {
    codec: Arc<dyn FrameCodec>,
    correlations: Arc<CorrelationRegistry>,
    queue: CommandQueue,
}

impl Commander {
    pub(crate) fn new(
        codec: Arc<dyn FrameCodec>,
        correlations: Arc<CorrelationRegistry>,
        queue: CommandQueue,
    ) -> Self {
        Self {
            codec,
            correlations,
            queue,
        }
    }

    pub(crate) async fn at(
        &self,
        command: AtCommandName,
        parameter: Option<Bytes>,
    ) -> Result<Frame> {
        let (tag, response) = self.correlations.register(FrameKind::AtResponse);
        let spec = CommandSpec::At {
            frame_id: tag.sequence,
            command,
            parameter,
        };
        let fragment = self.encode_fragment(&spec, tag, response)?;
        self.run(vec![fragment]).await
    }

    pub(crate) async fn remote_at(
        &self,
        destination: HardwareAddress,
        network: NetworkAddress,
        command: AtCommandName,
        parameter: Option<Bytes>,
    ) -> Result<Frame> {
        let (tag, response) = self.correlations.register(FrameKind::RemoteAtResponse);
        let spec = CommandSpec::RemoteAt {
            frame_id: tag.sequence,
            destination,
            network,
            command,
            parameter,
        };
        let fragment = self.encode_fragment(&spec, tag, response)?;
        self.run(vec![fragment]).await
    }

    /// Transmits a payload, splitting it at the codec's single-frame limit.
    ///
    /// All pieces form one task: they go out back to back with consecutive
    /// tags and either all are acknowledged or the transmit fails whole.
    pub(crate) async fn transmit(
        &self,
        destination: HardwareAddress,
        network: NetworkAddress,
        payload: Bytes,
    ) -> Result<Frame> {
        let max = self.codec.max_payload_size().max(1);
        // Each fragment reserves one sequence number and there are only 255
        // per response kind; a payload needing more cannot be tagged.
        let limit = max * usize::from(u8::MAX);
        if payload.len() > limit {
            return Err(Error::Codec(CodecError::PayloadTooLarge {
                size: payload.len(),
                max: limit,
            }));
        }
        let mut rest = payload;
        let mut fragments = Vec::new();

        loop {
            let chunk = rest.split_to(rest.len().min(max));
            let (tag, response) = self.correlations.register(FrameKind::TransmitStatus);
            let spec = CommandSpec::Transmit {
                frame_id: tag.sequence,
                destination,
                network,
                payload: chunk,
            };
            match self.encode_fragment(&spec, tag, response) {
                Ok(fragment) => fragments.push(fragment),
                Err(e) => {
                    for fragment in &fragments {
                        self.correlations.abandon(fragment.tag);
                    }
                    return Err(e);
                }
            }
            if rest.is_empty() {
                break;
            }
        }

        self.run(fragments).await
    }

    fn encode_fragment(
        &self,
        spec: &CommandSpec,
        tag: CorrelationTag,
        response: ResponseSlot,
    ) -> Result<Fragment> {
        match self.codec.encode(spec) {
            Ok(bytes) => Ok(Fragment {
                bytes,
                tag,
                response,
            }),
            Err(e) => {
                self.correlations.abandon(tag);
                Err(e.into())
            }
        }
    }

    async fn run(&self, fragments: Vec<Fragment>) -> Result<Frame> {
        let (completion, done) = oneshot::channel();
        self.queue.submit(CommandTask {
            fragments,
            completion,
        })?;
        done.await.map_err(|_| Error::ChannelClosed)?
    }
}

/// A session with a local radio device.
pub struct Session<T: Transport> {
    transport: Arc<Mutex<T>>,
    commander: Arc<Commander>,
    correlations: Arc<CorrelationRegistry>,
    nodes: Arc<NodeRegistry>,
    events: EventDispatcher,
    config: SessionConfig,
    decoder: Arc<StdMutex<Box<dyn FrameDecoder>>>,
    parameters: StdMutex<Option<SessionParameters>>,
    read_task: StdMutex<Option<JoinHandle<()>>>,
}

impl<T: Transport + 'static> Session<T> {
    /// Creates a session over the given transport and codec pair.
    #[must_use]
    pub fn new(
        transport: T,
        codec: Arc<dyn FrameCodec>,
        decoder: Box<dyn FrameDecoder>,
        config: SessionConfig,
    ) -> Self {
        let transport = Arc::new(Mutex::new(transport));
        let events = EventDispatcher::new(EVENT_CHANNEL_CAPACITY);
        let correlations = Arc::new(CorrelationRegistry::new());
        let queue = CommandQueue::new(
            Arc::clone(&transport),
            Arc::clone(&correlations),
            config.response_timeout,
        );
        let commander = Arc::new(Commander::new(codec, Arc::clone(&correlations), queue));
        let nodes = Arc::new(NodeRegistry::new(
            events.clone(),
            Arc::clone(&commander),
            NodeConfig {
                liveness_timeout: config.heartbeat.then_some(config.heartbeat_timeout),
                heartbeat_payload: config.heartbeat.then(|| config.heartbeat_payload.clone()),
                parser_factory: config.parser_factory.clone(),
            },
        ));

        Self {
            transport,
            commander,
            correlations,
            nodes,
            events,
            config,
            decoder: Arc::new(StdMutex::new(decoder)),
            parameters: StdMutex::new(None),
            read_task: StdMutex::new(None),
        }
    }

    /// Connects the transport, starts the read loop and bootstraps the
    /// session by querying the device's identity parameters.
    ///
    /// Calling this again after [`Session::disconnect`] reopens the
    /// transport and bootstraps afresh; nodes already registered survive
    /// the reconnect.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot connect or any bootstrap
    /// query fails; in that case no parameters are stored and no
    /// `Initialized` event fires.
    pub async fn connect(&self) -> Result<SessionParameters> {
        let needs_read_loop = self.lock_read_task().is_none();
        if needs_read_loop {
            let chunks = {
                let mut transport = self.transport.lock().await;
                transport.connect().await?;
                transport.take_chunk_receiver().ok_or(Error::NotConnected)?
            };
            self.decoder.lock().expect("decoder lock poisoned").reset();
            let router = FrameRouter::new(
                Arc::clone(&self.correlations),
                Arc::clone(&self.nodes),
                self.events.clone(),
            );
            let task = tokio::spawn(run_read_loop(
                chunks,
                Arc::clone(&self.decoder),
                router,
                self.events.clone(),
            ));
            *self.lock_read_task() = Some(task);
        }

        self.bootstrap().await
    }

    /// Stops the read loop and closes the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to close.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(task) = self.lock_read_task().take() {
            task.abort();
        }
        self.transport.lock().await.disconnect().await
    }

    /// Returns true while the transport is connected.
    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_connected()
    }

    /// The parameters queried at bootstrap, once initialized.
    #[must_use]
    pub fn parameters(&self) -> Option<SessionParameters> {
        self.parameters
            .lock()
            .expect("parameters lock poisoned")
            .clone()
    }

    /// Issues a local AT command and returns the raw parameter value.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command or no response
    /// arrives within the response timeout.
    pub async fn at(&self, command: AtCommandName, parameter: Option<Bytes>) -> Result<Bytes> {
        response_data(self.commander.at(command, parameter).await?)
    }

    /// Sends a payload to every device on the network.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, transmission or delivery fails.
    pub async fn broadcast(&self, payload: Bytes) -> Result<()> {
        self.commander
            .transmit(HardwareAddress::BROADCAST, NetworkAddress::UNKNOWN, payload)
            .await?;
        Ok(())
    }

    /// Scans the network for nodes.
    ///
    /// Issues one discovery command and collects the nodes that answer until
    /// the window closes, then emits [`Event::DiscoveryEnd`]. The window
    /// defaults to the device's own setting from bootstrap. Each answering
    /// node is registered (or refreshed) in the registry as it arrives.
    pub async fn discover(&self, window: Option<Duration>) -> Vec<HardwareAddress> {
        let window = window
            .or_else(|| self.parameters().map(|p| p.discovery_window))
            .unwrap_or(self.config.discovery_window);
        tracing::debug!("starting discovery window of {window:?}");

        let mut sub = self.events.subscribe(Some(EventFilter::kinds(vec![
            EventKind::NodeDiscovered,
            EventKind::NodeRediscovered,
        ])));
        let deadline = Instant::now() + window;

        let scan = self.commander.at(*b"ND", None);
        let collect = async move {
            let mut found = Vec::new();
            loop {
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => break,
                    event = sub.recv() => match event {
                        Some(event) => {
                            if let Some(address) = event.source() {
                                if !found.contains(&address) {
                                    found.push(address);
                                }
                            }
                        }
                        None => break,
                    },
                }
            }
            found
        };

        let (scan_result, found) = tokio::join!(scan, collect);
        if let Err(e) = scan_result {
            // A silent network answers nothing and the scan query itself
            // times out; that is not a discovery failure.
            tracing::debug!("scan query ended with: {e}");
        }

        tracing::debug!("discovery window closed with {} node(s)", found.len());
        self.events.dispatch(Event::DiscoveryEnd);
        found
    }

    /// Registers a node known out of band, without announcing it.
    ///
    /// Idempotent: an already known address returns the existing node.
    pub async fn add_node(&self, address: HardwareAddress) -> Arc<Node> {
        self.nodes.add(address).await
    }

    /// Looks up a known node.
    pub async fn node(&self, address: HardwareAddress) -> Option<Arc<Node>> {
        self.nodes.get(address).await
    }

    /// Every node known to the session.
    pub async fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.all().await
    }

    /// Subscribes to session events, optionally filtered.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        self.events.subscribe(filter)
    }

    /// Waits for an event matching `filter`, up to `timeout`.
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Option<Event> {
        self.events.wait_for(filter, timeout).await
    }

    /// Queries the five identity parameters in one fan-out.
    ///
    /// Fail-fast: the first failed query fails the bootstrap and nothing is
    /// stored, though queries already underway still run to completion in
    /// the queue.
    async fn bootstrap(&self) -> Result<SessionParameters> {
        tracing::debug!("querying device identity");
        match self.try_bootstrap().await {
            Ok(parameters) => {
                *self
                    .parameters
                    .lock()
                    .expect("parameters lock poisoned") = Some(parameters.clone());
                tracing::info!(
                    "session initialized as '{}' ({})",
                    parameters.identifier,
                    parameters.address
                );
                self.events.dispatch(Event::Initialized(parameters.clone()));
                Ok(parameters)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!("bootstrap failed: {message}");
                self.events.dispatch(Event::SessionError {
                    message: message.clone(),
                });
                Err(Error::Bootstrap { message })
            }
        }
    }

    async fn try_bootstrap(&self) -> Result<SessionParameters> {
        let (id, ni, sh, sl, nt) = tokio::try_join!(
            self.commander.at(*b"ID", None),
            self.commander.at(*b"NI", None),
            self.commander.at(*b"SH", None),
            self.commander.at(*b"SL", None),
            self.commander.at(*b"NT", None),
        )?;
        Ok(SessionParameters::from_responses(
            &response_data(id)?,
            &response_data(ni)?,
            &response_data(sh)?,
            &response_data(sl)?,
            &response_data(nt)?,
        ))
    }

    fn lock_read_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.read_task.lock().expect("read task lock poisoned")
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if let Ok(mut task) = self.read_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

/// Feeds transport chunks through the decoder and routes every frame.
async fn run_read_loop(
    mut chunks: mpsc::Receiver<Bytes>,
    decoder: Arc<StdMutex<Box<dyn FrameDecoder>>>,
    router: FrameRouter,
    events: EventDispatcher,
) {
    while let Some(chunk) = chunks.recv().await {
        tracing::trace!("read {} bytes", chunk.len());
        // The decoder is only locked between awaits; frames are drained
        // before routing so the guard never crosses one.
        let frames = {
            let mut decoder = decoder.lock().expect("decoder lock poisoned");
            decoder.feed(&chunk);
            let mut frames = Vec::new();
            loop {
                match decoder.next_frame() {
                    Ok(Some(frame)) => frames.push(frame),
                    Ok(None) => break,
                    Err(e) => tracing::warn!("dropping undecodable frame: {e}"),
                }
            }
            frames
        };
        for frame in frames {
            router.route(frame).await;
        }
    }
    tracing::debug!("inbound byte stream ended");
    events.dispatch(Event::SessionError {
        message: "transport closed".into(),
    });
}
