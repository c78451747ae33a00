//! Inbound frame routing.
//!
//! Every decoded frame passes through here exactly once: frames answering
//! an outstanding request resolve through the correlation registry, the
//! rest are unsolicited traffic handed to the node registry or turned into
//! session events.

use std::sync::Arc;

use crate::correlation::CorrelationRegistry;
use crate::event::{Event, EventDispatcher};
use crate::node::NodeRegistry;
use crate::protocol::{Frame, ModemStatusCode};

#[derive(Clone)]
pub(crate) struct FrameRouter {
    correlations: Arc<CorrelationRegistry>,
    nodes: Arc<NodeRegistry>,
    events: EventDispatcher,
}

impl FrameRouter {
    pub(crate) fn new(
        correlations: Arc<CorrelationRegistry>,
        nodes: Arc<NodeRegistry>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            correlations,
            nodes,
            events,
        }
    }

    pub(crate) async fn route(&self, frame: Frame) {
        // Discovery indications are special: an explicit scan answer also
        // resolves the scan's tag (unblocking the queue on the first reply),
        // but every indication registers its node exactly once regardless.
        if let Frame::NodeDiscovery { ref contact, .. } = frame {
            let contact = contact.clone();
            if let Some(tag) = frame.correlation_tag() {
                if self.correlations.resolve(tag, frame).is_some() {
                    tracing::trace!("discovery indication without a pending scan");
                }
            }
            self.nodes.register(contact).await;
            return;
        }

        if let Some(tag) = frame.correlation_tag() {
            if let Some(frame) = self.correlations.resolve(tag, frame) {
                self.route_unsolicited(frame).await;
            }
            return;
        }

        self.route_unsolicited(frame).await;
    }

    async fn route_unsolicited(&self, frame: Frame) {
        match frame {
            Frame::ModemStatus { status } => self.handle_modem_status(status),
            Frame::Receive {
                source,
                network,
                payload,
            } => self.nodes.handle_receive(source, network, payload).await,
            Frame::IoSampleRx {
                source,
                network,
                sample,
            } => self.nodes.handle_io(source, network, sample).await,
            Frame::RemoteAtResponse { source, .. } => {
                self.nodes.handle_remote_at_response(source).await;
            }
            Frame::AtResponse { frame_id, .. } | Frame::TransmitStatus { frame_id, .. } => {
                tracing::trace!("dropping stale response with frame id {frame_id}");
            }
            Frame::NodeDiscovery { contact, .. } => {
                self.nodes.register(contact).await;
            }
        }
    }

    fn handle_modem_status(&self, status: u8) {
        let Some(code) = ModemStatusCode::from_byte(status) else {
            tracing::warn!("unknown modem status code: 0x{status:02x}");
            return;
        };
        tracing::debug!("modem status: {code:?}");
        let event = match code {
            ModemStatusCode::HardwareReset => Event::HardwareReset,
            ModemStatusCode::WatchdogReset => Event::WatchdogReset,
            ModemStatusCode::JoinedNetwork => Event::JoinedNetwork,
            ModemStatusCode::Disassociated => Event::Disassociated,
            ModemStatusCode::CoordinatorStarted => Event::CoordinatorStarted,
        };
        self.events.dispatch(event);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::event::{EventFilter, EventKind};
    use crate::node::NodeConfig;
    use crate::protocol::{
        CommandStatus, DeviceRole, FrameKind, HardwareAddress, IoSample, NetworkAddress,
        NodeContact,
    };
    use crate::testing::test_commander;

    fn fixture() -> (FrameRouter, Arc<CorrelationRegistry>, EventDispatcher) {
        let events = EventDispatcher::new(64);
        let (commander, _writes, correlations) = test_commander();
        let nodes = Arc::new(NodeRegistry::new(
            events.clone(),
            commander,
            NodeConfig {
                liveness_timeout: None,
                heartbeat_payload: None,
                parser_factory: None,
            },
        ));
        let router = FrameRouter::new(Arc::clone(&correlations), nodes, events.clone());
        (router, correlations, events)
    }

    fn scan_answer(frame_id: Option<u8>, address: u64) -> Frame {
        Frame::NodeDiscovery {
            frame_id,
            contact: NodeContact {
                address: HardwareAddress::new(address),
                network: NetworkAddress::new(0x0010),
                identifier: Some("N1".into()),
                role: DeviceRole::EndDevice,
            },
        }
    }

    #[tokio::test]
    async fn test_pending_response_resolves_waiter() {
        let (router, correlations, _events) = fixture();
        let (tag, slot) = correlations.register(FrameKind::AtResponse);

        router
            .route(Frame::AtResponse {
                frame_id: tag.sequence,
                command: *b"NI",
                status: CommandStatus::Ok,
                data: Bytes::from_static(b"NODE"),
            })
            .await;

        let frame = slot.await.unwrap();
        assert!(matches!(frame, Frame::AtResponse { .. }));
    }

    #[tokio::test]
    async fn test_scan_answer_resolves_and_registers() {
        let (router, correlations, events) = fixture();
        let mut sub = events.subscribe(None);
        let (tag, slot) = correlations.register(FrameKind::AtResponse);

        router.route(scan_answer(Some(tag.sequence), 0xA1)).await;
        // Second answer to the same scan: tag already resolved, node still
        // registered.
        router.route(scan_answer(Some(tag.sequence), 0xA2)).await;
        // Unsolicited identification broadcast.
        router.route(scan_answer(None, 0xA3)).await;

        assert!(slot.await.is_ok());
        for expected in [0xA1u64, 0xA2, 0xA3] {
            assert!(matches!(
                sub.recv().await,
                Some(Event::NodeDiscovered(a)) if a.as_u64() == expected
            ));
        }
    }

    #[tokio::test]
    async fn test_stale_response_is_dropped() {
        let (router, correlations, _events) = fixture();

        // No reservation at all; must not panic or leak.
        router
            .route(Frame::AtResponse {
                frame_id: 42,
                command: *b"ID",
                status: CommandStatus::Ok,
                data: Bytes::new(),
            })
            .await;
        assert_eq!(correlations.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_modem_status_maps_to_events() {
        let (router, _correlations, events) = fixture();
        let mut sub = events.subscribe(None);

        router.route(Frame::ModemStatus { status: 0x02 }).await;
        router.route(Frame::ModemStatus { status: 0x06 }).await;
        // Unknown code: logged, no event.
        router.route(Frame::ModemStatus { status: 0x7f }).await;
        router.route(Frame::ModemStatus { status: 0x00 }).await;

        assert!(matches!(sub.recv().await, Some(Event::JoinedNetwork)));
        assert!(matches!(sub.recv().await, Some(Event::CoordinatorStarted)));
        assert!(matches!(sub.recv().await, Some(Event::HardwareReset)));
    }

    #[tokio::test]
    async fn test_receive_from_unknown_node_registers_first() {
        let (router, _correlations, events) = fixture();
        let mut sub = events.subscribe(None);
        let source = HardwareAddress::new(0xC0FFEE);

        router
            .route(Frame::Receive {
                source,
                network: NetworkAddress::new(0x0001),
                payload: Bytes::from_static(b"hello"),
            })
            .await;

        assert!(matches!(sub.recv().await, Some(Event::NodeDiscovered(a)) if a == source));
        assert!(matches!(sub.recv().await, Some(Event::NodeData { .. })));
    }

    #[tokio::test]
    async fn test_io_sample_emits_event() {
        let (router, _correlations, events) = fixture();
        let source = HardwareAddress::new(0xD0);
        let mut sub = events.subscribe(Some(EventFilter::kinds(vec![EventKind::NodeIo])));

        router
            .route(Frame::IoSampleRx {
                source,
                network: NetworkAddress::new(0x0002),
                sample: IoSample {
                    digital: vec![(3, true)],
                    analog: vec![(1, 512)],
                },
            })
            .await;

        match tokio::time::timeout(Duration::from_millis(100), sub.recv()).await {
            Ok(Some(Event::NodeIo { source: s, sample })) => {
                assert_eq!(s, source);
                assert_eq!(sample.digital, vec![(3, true)]);
            }
            other => panic!("expected IO event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsolicited_remote_response_from_unknown_is_dropped() {
        let (router, _correlations, events) = fixture();

        router
            .route(Frame::RemoteAtResponse {
                frame_id: 9,
                source: HardwareAddress::new(0xEE),
                network: NetworkAddress::new(0x0003),
                command: *b"D0",
                status: CommandStatus::Ok,
                data: Bytes::new(),
            })
            .await;

        // No node, no event.
        assert!(
            events
                .wait_for(EventFilter::default(), Duration::from_millis(50))
                .await
                .is_none()
        );
    }
}
