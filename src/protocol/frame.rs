//! Typed frame model and the codec boundary.
//!
//! The session core works entirely on typed frames. Byte-level framing,
//! escaping and checksum handling live behind the [`FrameCodec`] /
//! [`FrameDecoder`] traits so the core never touches the wire format.

use bytes::Bytes;
use thiserror::Error;

use crate::protocol::address::{HardwareAddress, NetworkAddress};
use crate::protocol::status::{CommandStatus, DeliveryStatus, DeviceRole};

/// Frame kind discriminants, as carried in the API frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Local AT command request.
    AtCommand = 0x08,
    /// Transmit request.
    TransmitRequest = 0x10,
    /// Remote AT command request.
    RemoteAtCommand = 0x17,
    /// Local AT command response.
    AtResponse = 0x88,
    /// Asynchronous modem status.
    ModemStatus = 0x8A,
    /// Transmit delivery status.
    TransmitStatus = 0x8B,
    /// Received data frame.
    Receive = 0x90,
    /// Received telemetry (I/O) sample.
    IoSampleRx = 0x92,
    /// Node identification indication.
    NodeIdentification = 0x95,
    /// Remote AT command response.
    RemoteAtResponse = 0x97,
}

impl FrameKind {
    /// Attempts to parse a frame kind from its wire byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x08 => Some(Self::AtCommand),
            0x10 => Some(Self::TransmitRequest),
            0x17 => Some(Self::RemoteAtCommand),
            0x88 => Some(Self::AtResponse),
            0x8A => Some(Self::ModemStatus),
            0x8B => Some(Self::TransmitStatus),
            0x90 => Some(Self::Receive),
            0x92 => Some(Self::IoSampleRx),
            0x95 => Some(Self::NodeIdentification),
            0x97 => Some(Self::RemoteAtResponse),
            _ => None,
        }
    }
}

/// Identifies one outstanding request.
///
/// A tag is the pair of the response frame kind and the request's sequence
/// number (the frame id sent to the device). Uniqueness holds only among
/// currently outstanding requests; sequence numbers wrap and are reused once
/// their request completes or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationTag {
    /// Frame kind of the expected response.
    pub kind: FrameKind,
    /// Per-kind sequence number. Never 0 (the device reads frame id 0 as
    /// "no response requested").
    pub sequence: u8,
}

impl CorrelationTag {
    /// Creates a tag from a response kind and a sequence number.
    #[must_use]
    pub const fn new(kind: FrameKind, sequence: u8) -> Self {
        Self { kind, sequence }
    }
}

impl std::fmt::Display for CorrelationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}/{}", self.kind, self.sequence)
    }
}

/// A two-letter AT command name (e.g. `ND`, `NI`).
pub type AtCommandName = [u8; 2];

/// Typed outbound command handed to the codec for encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    /// Query or set a local configuration parameter.
    At {
        /// Frame id; becomes the response's sequence number.
        frame_id: u8,
        /// AT command name.
        command: AtCommandName,
        /// Optional parameter value; absent means "query".
        parameter: Option<Bytes>,
    },
    /// Query or set a configuration parameter on a remote device.
    RemoteAt {
        /// Frame id; becomes the response's sequence number.
        frame_id: u8,
        /// Remote hardware address.
        destination: HardwareAddress,
        /// Cached remote network address.
        network: NetworkAddress,
        /// AT command name.
        command: AtCommandName,
        /// Optional parameter value; absent means "query".
        parameter: Option<Bytes>,
    },
    /// Transmit an application payload to a remote device.
    Transmit {
        /// Frame id; becomes the delivery status' sequence number.
        frame_id: u8,
        /// Remote hardware address.
        destination: HardwareAddress,
        /// Cached remote network address.
        network: NetworkAddress,
        /// Payload, at most the codec's maximum single-frame size.
        payload: Bytes,
    },
}

impl CommandSpec {
    /// Returns the frame kind of the response this command elicits.
    #[must_use]
    pub const fn response_kind(&self) -> FrameKind {
        match self {
            Self::At { .. } => FrameKind::AtResponse,
            Self::RemoteAt { .. } => FrameKind::RemoteAtResponse,
            Self::Transmit { .. } => FrameKind::TransmitStatus,
        }
    }
}

/// Peer identity carried by discovery indications and data frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContact {
    /// Immutable hardware address.
    pub address: HardwareAddress,
    /// Current network address.
    pub network: NetworkAddress,
    /// Human-readable node identifier, if reported.
    pub identifier: Option<String>,
    /// Role the node plays in the network.
    pub role: DeviceRole,
}

impl NodeContact {
    /// Contact for a peer known only by the addresses on a data frame.
    #[must_use]
    pub const fn from_addresses(address: HardwareAddress, network: NetworkAddress) -> Self {
        Self {
            address,
            network,
            identifier: None,
            role: DeviceRole::Unknown,
        }
    }
}

/// One telemetry sample from a remote device's I/O pins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoSample {
    /// Digital channel readings as (channel, level) pairs.
    pub digital: Vec<(u8, bool)>,
    /// Analog channel readings as (channel, raw value) pairs.
    pub analog: Vec<(u8, u16)>,
}

/// Typed inbound frame produced by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Response to a local AT command.
    AtResponse {
        /// Sequence number echoing the request's frame id.
        frame_id: u8,
        /// AT command name being answered.
        command: AtCommandName,
        /// Command status byte.
        status: CommandStatus,
        /// Raw parameter value for queries.
        data: Bytes,
    },
    /// Response to a remote AT command.
    RemoteAtResponse {
        /// Sequence number echoing the request's frame id.
        frame_id: u8,
        /// Responding device.
        source: HardwareAddress,
        /// Responding device's network address.
        network: NetworkAddress,
        /// AT command name being answered.
        command: AtCommandName,
        /// Command status byte.
        status: CommandStatus,
        /// Raw parameter value for queries.
        data: Bytes,
    },
    /// Delivery status for a transmit request.
    TransmitStatus {
        /// Sequence number echoing the request's frame id.
        frame_id: u8,
        /// Network address the payload was delivered to.
        network: NetworkAddress,
        /// Number of transmission retries used.
        retries: u8,
        /// Delivery outcome.
        delivery: DeliveryStatus,
    },
    /// Asynchronous modem status. Raw code; unrecognized values are logged,
    /// not raised.
    ModemStatus {
        /// Modem status byte.
        status: u8,
    },
    /// Node discovery indication, either an answer to an explicit scan
    /// (carrying the scan's sequence number) or an unsolicited
    /// identification broadcast.
    NodeDiscovery {
        /// Scan sequence number, when this answers an explicit discovery.
        frame_id: Option<u8>,
        /// Discovered peer.
        contact: NodeContact,
    },
    /// Application data from a remote device.
    Receive {
        /// Sending device.
        source: HardwareAddress,
        /// Sending device's network address.
        network: NetworkAddress,
        /// Application payload.
        payload: Bytes,
    },
    /// Telemetry sample from a remote device.
    IoSampleRx {
        /// Sending device.
        source: HardwareAddress,
        /// Sending device's network address.
        network: NetworkAddress,
        /// Decoded sample.
        sample: IoSample,
    },
}

impl Frame {
    /// Returns the tag correlating this frame to an outstanding request,
    /// for response-bearing kinds.
    #[must_use]
    pub const fn correlation_tag(&self) -> Option<CorrelationTag> {
        match self {
            Self::AtResponse { frame_id, .. } => {
                Some(CorrelationTag::new(FrameKind::AtResponse, *frame_id))
            }
            Self::RemoteAtResponse { frame_id, .. } => {
                Some(CorrelationTag::new(FrameKind::RemoteAtResponse, *frame_id))
            }
            Self::TransmitStatus { frame_id, .. } => {
                Some(CorrelationTag::new(FrameKind::TransmitStatus, *frame_id))
            }
            Self::NodeDiscovery {
                frame_id: Some(id), ..
            } => Some(CorrelationTag::new(FrameKind::AtResponse, *id)),
            _ => None,
        }
    }

    /// Returns the decoded status label when the device reported a failure.
    ///
    /// Distinguishes "device rejected / could not deliver" from transport
    /// errors: a frame arrived, but it carries a non-success status.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        match self {
            Self::AtResponse { status, .. } | Self::RemoteAtResponse { status, .. } => {
                (!status.is_ok()).then(|| status.to_string())
            }
            Self::TransmitStatus { delivery, .. } => {
                (!delivery.is_success()).then(|| delivery.to_string())
            }
            _ => None,
        }
    }
}

/// Codec-boundary errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame type byte not understood by the codec.
    #[error("unsupported frame kind: 0x{0:02x}")]
    UnsupportedKind(u8),

    /// Frame failed structural validation.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Checksum verification failed.
    #[error("checksum mismatch")]
    Checksum,

    /// Payload exceeds the codec's maximum single-frame size.
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Offered payload size.
        size: usize,
        /// Codec maximum.
        max: usize,
    },
}

/// Encodes typed commands into wire frames.
///
/// Implementations own start-byte framing, escaping and checksum
/// computation. The codec also defines the maximum single-frame payload
/// size, which drives outbound fragmentation.
pub trait FrameCodec: Send + Sync {
    /// Encodes a command into a complete wire frame.
    fn encode(&self, spec: &CommandSpec) -> Result<Bytes, CodecError>;

    /// Maximum application payload carried by a single transmit frame.
    fn max_payload_size(&self) -> usize;
}

/// Decodes the inbound byte stream into typed frames.
///
/// Stateful: fed raw chunks in arrival order, it buffers partial frames
/// internally and yields complete frames as they become available.
pub trait FrameDecoder: Send {
    /// Feeds raw bytes into the decoder.
    fn feed(&mut self, bytes: &[u8]);

    /// Attempts to decode the next complete frame.
    ///
    /// Returns `Ok(None)` when more data is needed. A decode error consumes
    /// the offending frame; decoding can continue afterwards.
    fn next_frame(&mut self) -> Result<Option<Frame>, CodecError>;

    /// Discards any buffered partial input.
    ///
    /// Called when a connection is (re)opened, so bytes torn off by a
    /// previous disconnect cannot misalign the new stream.
    fn reset(&mut self) {}
}
