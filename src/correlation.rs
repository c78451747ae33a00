//! Correlation of outbound requests to inbound responses.
//!
//! Every outbound request carries a frame id (sequence number); the device
//! echoes it in the response together with the response's frame kind. The
//! registry issues (kind, sequence) tags, holds a single-use waiter per tag
//! and hands each inbound response to the one caller waiting on its tag.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::protocol::{CorrelationTag, Frame, FrameKind};

/// Receiving end of a reserved tag; resolves with the correlated response.
pub(crate) type ResponseSlot = oneshot::Receiver<Frame>;

#[derive(Default)]
struct RegistryState {
    /// Next sequence number per response kind. Sequences wrap at 255 and
    /// skip 0 (frame id 0 suppresses the device's response).
    counters: HashMap<FrameKind, u8>,
    /// One pending waiter per outstanding tag.
    pending: HashMap<CorrelationTag, oneshot::Sender<Frame>>,
}

/// Issues correlation tags and routes responses to their waiters.
///
/// Tag issuance is serialized under one lock even though tasks execute
/// one at a time: fragments of every queued multi-fragment task hold their
/// tags from submission until completion, so all of them must be unique
/// concurrently, not just the current head of the queue.
#[derive(Default)]
pub(crate) struct CorrelationRegistry {
    state: Mutex<RegistryState>,
}

impl CorrelationRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reserves a tag for a response of `kind` and returns it with the slot
    /// the response will be delivered into.
    ///
    /// Skips sequence numbers still pending, so a wrapped counter can never
    /// produce a second waiter for an outstanding tag.
    pub(crate) fn register(&self, kind: FrameKind) -> (CorrelationTag, ResponseSlot) {
        let mut state = self.state.lock().expect("correlation lock poisoned");

        let mut sequence = *state.counters.get(&kind).unwrap_or(&0);
        let mut tag = None;
        for _ in 0..u8::MAX {
            sequence = if sequence == u8::MAX { 1 } else { sequence + 1 };
            let candidate = CorrelationTag::new(kind, sequence);
            if !state.pending.contains_key(&candidate) {
                tag = Some(candidate);
                break;
            }
        }
        // 255 in-flight requests of one kind would mean the queue is wedged
        // long before the sequence space can fill up.
        let tag = tag.unwrap_or_else(|| panic!("correlation sequence space exhausted for {kind:?}"));

        state.counters.insert(kind, sequence);
        let (tx, rx) = oneshot::channel();
        state.pending.insert(tag, tx);
        (tag, rx)
    }

    /// Completes the waiter for `tag` with `frame`.
    ///
    /// Returns the frame back if no waiter exists (a stale or unsolicited
    /// response); the caller decides whether it has an unsolicited route.
    pub(crate) fn resolve(&self, tag: CorrelationTag, frame: Frame) -> Option<Frame> {
        let sender = {
            let mut state = self.state.lock().expect("correlation lock poisoned");
            state.pending.remove(&tag)
        };
        match sender {
            Some(tx) => {
                // The waiter may have been dropped after timing out; the
                // late response is inert either way.
                if tx.send(frame).is_err() {
                    tracing::trace!("response for {tag} arrived after its waiter was dropped");
                }
                None
            }
            None => Some(frame),
        }
    }

    /// Releases a reservation whose response is no longer awaited
    /// (timeout, or the fragments after a failed one).
    pub(crate) fn abandon(&self, tag: CorrelationTag) {
        let mut state = self.state.lock().expect("correlation lock poisoned");
        state.pending.remove(&tag);
    }

    /// Number of currently outstanding tags.
    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        self.state.lock().expect("correlation lock poisoned").pending.len()
    }
}
