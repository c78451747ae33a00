//! Shared test doubles: an in-memory transport and a simple length-prefixed
//! codec pair standing in for a real wire format.
//!
//! The test wire format is `[kind][len u16 BE][body]` with the body layouts
//! mirroring the field order of the typed frames.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures::future::BoxFuture;
use tokio::sync::{Mutex, mpsc};

use crate::correlation::CorrelationRegistry;
use crate::error::{Error, Result};
use crate::protocol::{
    AtCommandName, CodecError, CommandSpec, CommandStatus, DeliveryStatus, DeviceRole, Frame,
    FrameCodec, FrameDecoder, HardwareAddress, IoSample, NetworkAddress, NodeContact,
};
use crate::queue::CommandQueue;
use crate::session::Commander;
use crate::transport::Transport;

/// In-memory transport exposing everything it is asked to write and
/// accepting injected inbound chunks.
pub(crate) struct FakeTransport {
    connected: bool,
    writes: mpsc::UnboundedSender<Bytes>,
    chunk_rx: Option<mpsc::Receiver<Bytes>>,
    /// When set, every connect mints a fresh inbound channel and hands the
    /// injector out through this channel.
    injectors: Option<mpsc::UnboundedSender<mpsc::Sender<Bytes>>>,
    accept_limit: Option<usize>,
}

impl FakeTransport {
    /// A transport that starts connected. Returns the write observer and
    /// the inbound chunk injector alongside it.
    pub(crate) fn connected() -> (Self, mpsc::UnboundedReceiver<Bytes>, mpsc::Sender<Bytes>) {
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        let (inject_tx, chunk_rx) = mpsc::channel(64);
        (
            Self {
                connected: true,
                writes: writes_tx,
                chunk_rx: Some(chunk_rx),
                injectors: None,
                accept_limit: None,
            },
            writes_rx,
            inject_tx,
        )
    }

    /// A transport surviving disconnect/reconnect cycles: each connect
    /// produces a new inbound channel, delivered through the returned
    /// injector stream.
    pub(crate) fn reconnectable() -> (
        Self,
        mpsc::UnboundedReceiver<Bytes>,
        mpsc::UnboundedReceiver<mpsc::Sender<Bytes>>,
    ) {
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        let (injectors_tx, injectors_rx) = mpsc::unbounded_channel();
        (
            Self {
                connected: false,
                writes: writes_tx,
                chunk_rx: None,
                injectors: Some(injectors_tx),
                accept_limit: None,
            },
            writes_rx,
            injectors_rx,
        )
    }

    /// Caps how many bytes a single write accepts, to provoke partial
    /// writes.
    pub(crate) fn accept_at_most(&mut self, limit: usize) {
        self.accept_limit = Some(limit);
    }
}

impl Transport for FakeTransport {
    fn connect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.chunk_rx.is_none() {
                if let Some(ref injectors) = self.injectors {
                    let (inject_tx, chunk_rx) = mpsc::channel(64);
                    let _ = injectors.send(inject_tx);
                    self.chunk_rx = Some(chunk_rx);
                }
            }
            self.connected = true;
            Ok(())
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.connected = false;
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            if !self.connected {
                return Err(Error::NotConnected);
            }
            let accepted = self
                .accept_limit
                .map_or(data.len(), |limit| limit.min(data.len()));
            self.writes
                .send(data.slice(..accepted))
                .map_err(|_| Error::ChannelClosed)?;
            Ok(accepted)
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn take_chunk_receiver(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.chunk_rx.take()
    }
}

/// A ready-made commander over a fake transport and the test codec.
pub(crate) fn test_commander() -> (
    Arc<Commander>,
    mpsc::UnboundedReceiver<Bytes>,
    Arc<CorrelationRegistry>,
) {
    let (transport, writes, _inject) = FakeTransport::connected();
    let correlations = Arc::new(CorrelationRegistry::new());
    let queue = CommandQueue::new(
        Arc::new(Mutex::new(transport)),
        Arc::clone(&correlations),
        Duration::from_secs(1),
    );
    let commander = Arc::new(Commander::new(
        Arc::new(TestCodec::default()),
        Arc::clone(&correlations),
        queue,
    ));
    (commander, writes, correlations)
}

fn wire_frame(kind: u8, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(3 + body.len());
    out.put_u8(kind);
    out.put_u16(u16::try_from(body.len()).unwrap());
    out.put_slice(body);
    out.freeze()
}

/// Test codec encoding requests in the test wire format.
pub(crate) struct TestCodec {
    max_payload: usize,
}

impl Default for TestCodec {
    fn default() -> Self {
        Self { max_payload: 74 }
    }
}

impl FrameCodec for TestCodec {
    fn encode(&self, spec: &CommandSpec) -> std::result::Result<Bytes, CodecError> {
        let mut body = BytesMut::new();
        let kind = match spec {
            CommandSpec::At {
                frame_id,
                command,
                parameter,
            } => {
                body.put_u8(*frame_id);
                body.put_slice(command);
                if let Some(parameter) = parameter {
                    body.put_slice(parameter);
                }
                0x08
            }
            CommandSpec::RemoteAt {
                frame_id,
                destination,
                network,
                command,
                parameter,
            } => {
                body.put_u8(*frame_id);
                body.put_slice(&destination.to_bytes());
                body.put_slice(&network.to_bytes());
                body.put_slice(command);
                if let Some(parameter) = parameter {
                    body.put_slice(parameter);
                }
                0x17
            }
            CommandSpec::Transmit {
                frame_id,
                destination,
                network,
                payload,
            } => {
                if payload.len() > self.max_payload {
                    return Err(CodecError::PayloadTooLarge {
                        size: payload.len(),
                        max: self.max_payload,
                    });
                }
                body.put_u8(*frame_id);
                body.put_slice(&destination.to_bytes());
                body.put_slice(&network.to_bytes());
                body.put_slice(payload);
                0x10
            }
        };
        Ok(wire_frame(kind, &body))
    }

    fn max_payload_size(&self) -> usize {
        self.max_payload
    }
}

/// Test decoder for the test wire format.
#[derive(Default)]
pub(crate) struct TestDecoder {
    buffer: BytesMut,
}

impl FrameDecoder for TestDecoder {
    fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn next_frame(&mut self) -> std::result::Result<Option<Frame>, CodecError> {
        if self.buffer.len() < 3 {
            return Ok(None);
        }
        let len = usize::from(u16::from_be_bytes([self.buffer[1], self.buffer[2]]));
        if self.buffer.len() < 3 + len {
            return Ok(None);
        }
        let head = self.buffer.split_to(3 + len);
        decode_body(head[0], &head[3..]).map(Some)
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}

fn too_short() -> CodecError {
    CodecError::Malformed("body too short".into())
}

fn decode_body(kind: u8, body: &[u8]) -> std::result::Result<Frame, CodecError> {
    match kind {
        0x88 => {
            if body.len() < 4 {
                return Err(too_short());
            }
            let frame_id = body[0];
            let command = [body[1], body[2]];
            let status = CommandStatus::from_byte(body[3]);
            let data = Bytes::copy_from_slice(&body[4..]);
            // Discovery scans answer as AT responses carrying a contact.
            if command == *b"ND" && status.is_ok() && !data.is_empty() {
                return Ok(Frame::NodeDiscovery {
                    frame_id: Some(frame_id),
                    contact: decode_contact(&data)?,
                });
            }
            Ok(Frame::AtResponse {
                frame_id,
                command,
                status,
                data,
            })
        }
        0x97 => {
            if body.len() < 14 {
                return Err(too_short());
            }
            Ok(Frame::RemoteAtResponse {
                frame_id: body[0],
                source: read_address(&body[1..9]),
                network: read_network(&body[9..11]),
                command: [body[11], body[12]],
                status: CommandStatus::from_byte(body[13]),
                data: Bytes::copy_from_slice(&body[14..]),
            })
        }
        0x8B => {
            if body.len() < 5 {
                return Err(too_short());
            }
            Ok(Frame::TransmitStatus {
                frame_id: body[0],
                network: read_network(&body[1..3]),
                retries: body[3],
                delivery: DeliveryStatus::from_byte(body[4]),
            })
        }
        0x8A => {
            if body.is_empty() {
                return Err(too_short());
            }
            Ok(Frame::ModemStatus { status: body[0] })
        }
        0x95 => Ok(Frame::NodeDiscovery {
            frame_id: None,
            contact: decode_contact(body)?,
        }),
        0x90 => {
            if body.len() < 10 {
                return Err(too_short());
            }
            Ok(Frame::Receive {
                source: read_address(&body[..8]),
                network: read_network(&body[8..10]),
                payload: Bytes::copy_from_slice(&body[10..]),
            })
        }
        0x92 => {
            if body.len() < 11 {
                return Err(too_short());
            }
            let mut sample = IoSample::default();
            let mut rest = &body[10..];
            let digital_count = usize::from(rest[0]);
            rest = &rest[1..];
            for _ in 0..digital_count {
                sample.digital.push((rest[0], rest[1] != 0));
                rest = &rest[2..];
            }
            let analog_count = usize::from(rest[0]);
            rest = &rest[1..];
            for _ in 0..analog_count {
                sample
                    .analog
                    .push((rest[0], u16::from_be_bytes([rest[1], rest[2]])));
                rest = &rest[3..];
            }
            Ok(Frame::IoSampleRx {
                source: read_address(&body[..8]),
                network: read_network(&body[8..10]),
                sample,
            })
        }
        other => Err(CodecError::UnsupportedKind(other)),
    }
}

fn read_address(bytes: &[u8]) -> HardwareAddress {
    HardwareAddress::from_bytes(bytes.try_into().unwrap())
}

fn read_network(bytes: &[u8]) -> NetworkAddress {
    NetworkAddress::new(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn role_byte(role: DeviceRole) -> u8 {
    match role {
        DeviceRole::Coordinator => 0x00,
        DeviceRole::Router => 0x01,
        DeviceRole::EndDevice => 0x02,
        DeviceRole::Unknown => 0xFF,
    }
}

fn decode_contact(data: &[u8]) -> std::result::Result<NodeContact, CodecError> {
    if data.len() < 11 {
        return Err(too_short());
    }
    let identifier = (data.len() > 11).then(|| String::from_utf8_lossy(&data[11..]).into_owned());
    Ok(NodeContact {
        address: read_address(&data[..8]),
        network: read_network(&data[8..10]),
        identifier,
        role: DeviceRole::from_byte(data[10]),
    })
}

fn put_contact(buf: &mut BytesMut, contact: &NodeContact) {
    buf.put_slice(&contact.address.to_bytes());
    buf.put_slice(&contact.network.to_bytes());
    buf.put_u8(role_byte(contact.role));
    if let Some(ref identifier) = contact.identifier {
        buf.put_slice(identifier.as_bytes());
    }
}

/// An outbound request as a device simulator sees it.
pub(crate) enum ParsedRequest {
    At {
        frame_id: u8,
        command: AtCommandName,
        parameter: Bytes,
    },
    RemoteAt {
        frame_id: u8,
        destination: HardwareAddress,
        network: NetworkAddress,
        command: AtCommandName,
        parameter: Bytes,
    },
    Transmit {
        frame_id: u8,
        destination: HardwareAddress,
        network: NetworkAddress,
        payload: Bytes,
    },
}

pub(crate) fn parse_request(bytes: &[u8]) -> ParsedRequest {
    let len = usize::from(u16::from_be_bytes([bytes[1], bytes[2]]));
    let body = &bytes[3..3 + len];
    match bytes[0] {
        0x08 => ParsedRequest::At {
            frame_id: body[0],
            command: [body[1], body[2]],
            parameter: Bytes::copy_from_slice(&body[3..]),
        },
        0x17 => ParsedRequest::RemoteAt {
            frame_id: body[0],
            destination: read_address(&body[1..9]),
            network: read_network(&body[9..11]),
            command: [body[11], body[12]],
            parameter: Bytes::copy_from_slice(&body[13..]),
        },
        0x10 => ParsedRequest::Transmit {
            frame_id: body[0],
            destination: read_address(&body[1..9]),
            network: read_network(&body[9..11]),
            payload: Bytes::copy_from_slice(&body[11..]),
        },
        other => panic!("unexpected request kind 0x{other:02x}"),
    }
}

pub(crate) fn encode_at_response(
    frame_id: u8,
    command: AtCommandName,
    status: u8,
    data: Bytes,
) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u8(frame_id);
    body.put_slice(&command);
    body.put_u8(status);
    body.put_slice(&data);
    wire_frame(0x88, &body)
}

pub(crate) fn encode_remote_at_response(
    frame_id: u8,
    source: HardwareAddress,
    network: NetworkAddress,
    command: AtCommandName,
    status: u8,
    data: Bytes,
) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u8(frame_id);
    body.put_slice(&source.to_bytes());
    body.put_slice(&network.to_bytes());
    body.put_slice(&command);
    body.put_u8(status);
    body.put_slice(&data);
    wire_frame(0x97, &body)
}

pub(crate) fn encode_transmit_status(frame_id: u8, delivery: u8) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u8(frame_id);
    body.put_slice(&NetworkAddress::UNKNOWN.to_bytes());
    body.put_u8(0);
    body.put_u8(delivery);
    wire_frame(0x8B, &body)
}

pub(crate) fn encode_scan_response(frame_id: u8, contact: &NodeContact) -> Bytes {
    let mut data = BytesMut::new();
    put_contact(&mut data, contact);
    encode_at_response(frame_id, *b"ND", 0x00, data.freeze())
}

pub(crate) fn encode_receive(
    source: HardwareAddress,
    network: NetworkAddress,
    payload: Bytes,
) -> Bytes {
    let mut body = BytesMut::new();
    body.put_slice(&source.to_bytes());
    body.put_slice(&network.to_bytes());
    body.put_slice(&payload);
    wire_frame(0x90, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_reassembles_split_chunks() {
        let mut decoder = TestDecoder::default();
        let encoded = encode_at_response(3, *b"NI", 0x00, Bytes::from_static(b"NODE"));

        decoder.feed(&encoded[..2]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.feed(&encoded[2..]);

        match decoder.next_frame().unwrap() {
            Some(Frame::AtResponse {
                frame_id,
                command,
                status,
                data,
            }) => {
                assert_eq!(frame_id, 3);
                assert_eq!(command, *b"NI");
                assert!(status.is_ok());
                assert_eq!(&data[..], b"NODE");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_decoder_recovers_after_unknown_kind() {
        let mut decoder = TestDecoder::default();
        decoder.feed(&wire_frame(0x42, b"junk"));
        decoder.feed(&encode_transmit_status(7, 0x00));

        assert!(matches!(
            decoder.next_frame(),
            Err(CodecError::UnsupportedKind(0x42))
        ));
        assert!(matches!(
            decoder.next_frame().unwrap(),
            Some(Frame::TransmitStatus { frame_id: 7, .. })
        ));
    }

    #[test]
    fn test_codec_rejects_oversized_payload() {
        let codec = TestCodec::default();
        let spec = CommandSpec::Transmit {
            frame_id: 1,
            destination: HardwareAddress::new(0x1),
            network: NetworkAddress::UNKNOWN,
            payload: Bytes::from(vec![0u8; 75]),
        };
        assert!(matches!(
            codec.encode(&spec),
            Err(CodecError::PayloadTooLarge { size: 75, max: 74 })
        ));
    }

    #[test]
    fn test_scan_response_decodes_as_discovery() {
        let contact = NodeContact {
            address: HardwareAddress::new(0xABCD),
            network: NetworkAddress::new(0x0042),
            identifier: Some("N9".into()),
            role: DeviceRole::EndDevice,
        };
        let mut decoder = TestDecoder::default();
        decoder.feed(&encode_scan_response(5, &contact));

        match decoder.next_frame().unwrap() {
            Some(Frame::NodeDiscovery {
                frame_id: Some(5),
                contact: decoded,
            }) => assert_eq!(decoded, contact),
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
