// Raw byte-stream connection to the motor controller
//
// No protocol knowledge and no retries: every failure goes straight back
// to the caller.

use serialport::{ClearBuffer, SerialPort};
use std::io::{self, ErrorKind, Read, Write};
use std::time::Duration;
use tracing::info;

/// Default serial configuration for the controller firmware
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUDRATE: u32 = 57_600;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Anything a channel can talk through: a serial port, or an in-memory stream in tests
pub trait Stream: Read + Write + Send {
    /// Drop bytes that arrived but have not been read yet
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stream for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// Error types for the raw channel
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to open serial port {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for a byte")]
    Timeout,

    #[error("Channel is closed")]
    Closed,
}

/// Where and how to connect. Fixed once the channel is open.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialEndpoint {
    pub path: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl SerialEndpoint {
    pub fn new(path: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            read_timeout,
        }
    }
}

impl Default for SerialEndpoint {
    fn default() -> Self {
        Self::new(
            DEFAULT_PORT,
            DEFAULT_BAUDRATE,
            Duration::from_millis(DEFAULT_TIMEOUT_MS),
        )
    }
}

/// Owns exactly one open connection
pub struct SerialChannel {
    endpoint: SerialEndpoint,
    stream: Option<Box<dyn Stream>>,
}

impl SerialChannel {
    /// Open the serial port described by `endpoint`
    pub fn open(endpoint: SerialEndpoint) -> Result<Self, ChannelError> {
        info!(
            "Connecting to port {} at {}",
            endpoint.path, endpoint.baud_rate
        );
        let port = serialport::new(&endpoint.path, endpoint.baud_rate)
            .timeout(endpoint.read_timeout)
            .open()
            .map_err(|source| ChannelError::Open {
                path: endpoint.path.clone(),
                source,
            })?;
        info!("Connected to {}", endpoint.path);

        Ok(Self::from_stream(endpoint, Box::new(port)))
    }

    /// Wrap an already-open stream. The stream is expected to honour
    /// `endpoint.read_timeout` on its own.
    pub fn from_stream(endpoint: SerialEndpoint, stream: Box<dyn Stream>) -> Self {
        Self {
            endpoint,
            stream: Some(stream),
        }
    }

    fn stream_mut(&mut self) -> Result<&mut Box<dyn Stream>, ChannelError> {
        self.stream.as_mut().ok_or(ChannelError::Closed)
    }

    /// Write the whole buffer and flush it to the device
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let stream = self.stream_mut()?;
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    /// Throw away unread input, e.g. a reply that arrived after its command timed out
    pub fn discard_input(&mut self) -> Result<(), ChannelError> {
        self.stream_mut()?.discard_input()?;
        Ok(())
    }

    /// Read a single byte, waiting at most the endpoint's read timeout
    pub fn read_byte(&mut self) -> Result<u8, ChannelError> {
        let stream = self.stream_mut()?;
        let mut buf = [0u8; 1];
        loop {
            match stream.read(&mut buf) {
                // A zero-length read means nothing arrived before the deadline
                Ok(0) => return Err(ChannelError::Timeout),
                Ok(_) => return Ok(buf[0]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Err(ChannelError::Timeout);
                }
                Err(e) => return Err(ChannelError::Io(e)),
            }
        }
    }

    /// Release the OS handle. Safe to call more than once.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Closed serial port {}", self.endpoint.path);
        }
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        self.close();
    }
}
