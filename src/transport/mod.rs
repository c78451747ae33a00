//! Transport layer for device communication.
//!
//! A transport provides an ordered byte stream in both directions plus an
//! open/close lifecycle. Writes report the number of bytes accepted so the
//! caller can detect partial writes; inbound bytes are delivered as raw
//! chunks through a channel handed to the session's read loop.

pub mod serial;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::Result;

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Connects to the device.
    fn connect(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Disconnects from the device.
    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Writes bytes to the device, returning how many were accepted.
    ///
    /// A count shorter than `data.len()` is a partial write; the caller
    /// treats it as a transport error.
    fn send(&mut self, data: Bytes) -> BoxFuture<'_, Result<usize>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;

    /// Takes the inbound chunk receiver for use by the session read loop.
    ///
    /// Chunks are raw bytes in arrival order; frame boundaries are the
    /// decoder's concern. Can only be taken once per connection.
    fn take_chunk_receiver(&mut self) -> Option<mpsc::Receiver<Bytes>>;
}

pub use serial::SerialTransport;
