//! Serial transport implementation.
//!
//! Provides serial port communication for radio modules attached over
//! USB/serial, with a background reader pushing raw chunks to the session.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Default baud rate; the factory setting of most modules.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default delay after opening the port before the device is usable.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(300);

/// Capacity of the inbound chunk channel.
const CHUNK_CHANNEL_CAPACITY: usize = 256;

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after connection before sending commands.
    pub connection_delay: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }
}

/// Serial transport.
///
/// Splits the stream into halves: the write half stays with the transport
/// (the command queue is the sole writer), the read half is consumed by a
/// background task that forwards raw chunks to the session read loop.
pub struct SerialTransport {
    config: SerialConfig,
    writer: Option<WriteHalf<SerialStream>>,
    chunk_rx: Option<mpsc::Receiver<Bytes>>,
    read_task: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            writer: None,
            chunk_rx: None,
            read_task: None,
        }
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    async fn run_read_loop(mut reader: ReadHalf<SerialStream>, chunk_tx: mpsc::Sender<Bytes>) {
        let mut buf = [0u8; 1024];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!("serial port closed");
                    return;
                }
                Ok(n) => {
                    tracing::trace!("received {} bytes", n);
                    if chunk_tx
                        .send(Bytes::copy_from_slice(&buf[..n]))
                        .await
                        .is_err()
                    {
                        tracing::debug!("chunk receiver dropped");
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!("serial read error: {}", e);
                    return;
                }
            }
        }
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.writer.is_some() {
                return Ok(());
            }

            tracing::info!("connecting to serial port: {}", self.config.port);

            let stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .open_native_async()
                .map_err(Error::Serial)?;

            // Give the device time to settle after the port opens.
            tokio::time::sleep(self.config.connection_delay).await;

            let (reader, writer) = tokio::io::split(stream);
            let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);

            self.read_task = Some(tokio::spawn(Self::run_read_loop(reader, chunk_tx)));
            self.writer = Some(writer);
            self.chunk_rx = Some(chunk_rx);

            tracing::info!("connected to serial port");
            Ok(())
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.writer.is_some() {
                tracing::info!("disconnecting from serial port");
            }
            if let Some(task) = self.read_task.take() {
                task.abort();
            }
            self.writer = None;
            self.chunk_rx = None;
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;

            tracing::trace!("sending frame: {} bytes", data.len());
            writer.write_all(&data).await.map_err(Error::Io)?;
            writer.flush().await.map_err(Error::Io)?;

            // write_all either accepts everything or errors.
            Ok(data.len())
        })
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn take_chunk_receiver(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.chunk_rx.take()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0");
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0")
            .baud_rate(115_200)
            .connection_delay(Duration::from_secs(1));
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.connection_delay, Duration::from_secs(1));
    }

    #[test]
    #[ignore = "Requires /sys/class/tty - not available in sandboxed builds"]
    fn test_list_ports() {
        // Just verify it doesn't panic
        let _ = list_ports();
    }
}
