//! Serialized command execution against the device.
//!
//! The device processes one outstanding request at a time, so the queue
//! runs a single worker task with concurrency exactly 1; it is also the
//! sole transport writer, which is what makes writes mutually exclusive
//! in time without any extra locking discipline.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::correlation::{CorrelationRegistry, ResponseSlot};
use crate::error::{Error, Result};
use crate::protocol::{CodecError, CorrelationTag, Frame};
use crate::transport::Transport;

/// One encoded wire frame awaiting its correlated response.
pub(crate) struct Fragment {
    /// Complete encoded frame, ready to write.
    pub bytes: Bytes,
    /// Tag the response will carry.
    pub tag: CorrelationTag,
    /// Slot the correlated response is delivered into.
    pub response: ResponseSlot,
}

/// An atomic unit of work: one or more fragments plus a single completion.
///
/// Fragments beyond the first exist purely to carry a payload split at the
/// codec's single-frame limit; only the last fragment's response matters to
/// the caller. Completion fires exactly once, success or failure.
pub(crate) struct CommandTask {
    pub fragments: Vec<Fragment>,
    pub completion: oneshot::Sender<Result<Frame>>,
}

/// FIFO queue executing command tasks one at a time.
pub(crate) struct CommandQueue {
    tx: mpsc::UnboundedSender<CommandTask>,
    worker: JoinHandle<()>,
}

impl CommandQueue {
    /// Spawns the worker over the given transport.
    pub(crate) fn new<T: Transport + 'static>(
        transport: Arc<Mutex<T>>,
        registry: Arc<CorrelationRegistry>,
        response_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(rx, transport, registry, response_timeout));
        Self { tx, worker }
    }

    /// Enqueues a task; tasks execute strictly in submission order.
    pub(crate) fn submit(&self, task: CommandTask) -> Result<()> {
        self.tx.send(task).map_err(|_| Error::ChannelClosed)
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker<T: Transport>(
    mut rx: mpsc::UnboundedReceiver<CommandTask>,
    transport: Arc<Mutex<T>>,
    registry: Arc<CorrelationRegistry>,
    response_timeout: Duration,
) {
    while let Some(task) = rx.recv().await {
        let result = execute_task(task.fragments, &transport, &registry, response_timeout).await;
        if let Err(ref e) = result {
            tracing::debug!("command task failed: {}", e);
        }
        // Task isolation: a failed task never stops the worker, and a
        // caller that dropped its completion handle is not an error.
        if task.completion.send(result).is_err() {
            tracing::trace!("task completion dropped by caller");
        }
    }
}

async fn execute_task<T: Transport>(
    fragments: Vec<Fragment>,
    transport: &Arc<Mutex<T>>,
    registry: &CorrelationRegistry,
    response_timeout: Duration,
) -> Result<Frame> {
    let mut remaining = std::collections::VecDeque::from(fragments);
    let mut last = None;

    while let Some(fragment) = remaining.pop_front() {
        match run_fragment(fragment, transport, registry, response_timeout).await {
            Ok(frame) => last = Some(frame),
            Err(e) => {
                // A mid-sequence failure abandons the rest of the task;
                // their tags go back to the pool untransmitted.
                for abandoned in remaining {
                    registry.abandon(abandoned.tag);
                }
                return Err(e);
            }
        }
    }

    last.ok_or_else(|| Error::Codec(CodecError::Malformed("empty command task".into())))
}

async fn run_fragment<T: Transport>(
    fragment: Fragment,
    transport: &Arc<Mutex<T>>,
    registry: &CorrelationRegistry,
    response_timeout: Duration,
) -> Result<Frame> {
    let expected = fragment.bytes.len();

    let written = {
        let mut transport = transport.lock().await;
        match transport.send(fragment.bytes).await {
            Ok(n) => n,
            Err(e) => {
                registry.abandon(fragment.tag);
                return Err(e);
            }
        }
    };
    if written != expected {
        registry.abandon(fragment.tag);
        return Err(Error::PartialWrite { written, expected });
    }

    match tokio::time::timeout(response_timeout, fragment.response).await {
        Err(_elapsed) => {
            // A response arriving after this point finds no waiter and is
            // dropped by the registry; the task is never resurrected.
            registry.abandon(fragment.tag);
            Err(Error::Timeout {
                timeout_ms: u64::try_from(response_timeout.as_millis()).unwrap_or(u64::MAX),
            })
        }
        Ok(Err(_closed)) => {
            registry.abandon(fragment.tag);
            Err(Error::ChannelClosed)
        }
        Ok(Ok(frame)) => match frame.failure() {
            Some(status) => Err(Error::DeviceRejected { status }),
            None => Ok(frame),
        },
    }
}
