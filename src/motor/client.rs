// Request/response client for the motor controller
//
// Exactly one command is in flight at a time: the channel lives behind a
// mutex and the guard is held for the full write + read-until-terminator
// round trip.

use std::sync::{Mutex, PoisonError};
use tracing::{info, trace, warn};

use super::channel::{ChannelError, SerialChannel, SerialEndpoint};
use super::codec::{self, OutgoingCommand, TERMINATOR};

/// Error types for a command round trip
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serial timeout on command: {command}")]
    Timeout { command: String },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Serial channel lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Serializes every command/response exchange on one serial channel
pub struct ProtocolClient {
    channel: Mutex<SerialChannel>,
    debug: bool,
}

impl ProtocolClient {
    /// Wrap an open channel. With `debug` set, every frame is logged at info level.
    pub fn new(channel: SerialChannel, debug: bool) -> Self {
        Self {
            channel: Mutex::new(channel),
            debug,
        }
    }

    /// Open the serial port and wrap it
    pub fn open(endpoint: SerialEndpoint, debug: bool) -> std::result::Result<Self, ChannelError> {
        Ok(Self::new(SerialChannel::open(endpoint)?, debug))
    }

    fn log_frame(&self, direction: &str, text: &str) {
        if self.debug {
            info!("{}: {}", direction, text);
        } else {
            trace!("{}: {}", direction, text);
        }
    }

    /// Write one command and block until its reply line arrives.
    ///
    /// Bytes are read one at a time until the terminator. A single read
    /// that produces nothing within the channel timeout ends the exchange
    /// with [`ProtocolError::Timeout`]; the command is dropped, not retried.
    /// Unread input is discarded before writing, so a reply that shows up
    /// after its command timed out is never taken for the next one.
    pub fn send_command(&self, cmd: &OutgoingCommand) -> Result<String> {
        let mut channel = self.channel.lock().map_err(|_| ProtocolError::LockPoisoned)?;
        channel.discard_input()?;

        let line = codec::format(cmd);
        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(TERMINATOR);

        channel.write(&frame)?;
        self.log_frame("Sent", &line);

        let mut value = Vec::new();
        loop {
            match channel.read_byte() {
                Ok(TERMINATOR) => break,
                Ok(byte) => value.push(byte),
                Err(ChannelError::Timeout) => {
                    warn!("Serial timeout on command: {}", line);
                    return Err(ProtocolError::Timeout { command: line });
                }
                Err(e) => return Err(e.into()),
            }
        }

        let response = String::from_utf8_lossy(&value).into_owned();
        self.log_frame("Received", &response);
        Ok(response)
    }

    /// Set raw PWM for both motors; the acknowledgement is discarded
    pub fn set_pwm(&self, left: i32, right: i32) -> Result<()> {
        self.send_command(&OutgoingCommand::SetPwm { left, right }).map(|_| ())
    }

    /// Set closed-loop targets in encoder counts per control loop; the acknowledgement is discarded
    pub fn set_feedback_counts(&self, left: i32, right: i32) -> Result<()> {
        self.send_command(&OutgoingCommand::SetCountsPerLoop { left, right }).map(|_| ())
    }

    /// Read both encoder counters.
    ///
    /// Returns `None` when no reply arrived or the reply was malformed;
    /// the reason is logged.
    pub fn read_encoders(&self) -> Option<(i64, i64)> {
        let response = match self.send_command(&OutgoingCommand::ReadEncoders) {
            Ok(response) => response,
            // already logged by send_command
            Err(ProtocolError::Timeout { .. }) => return None,
            Err(e) => {
                warn!("Encoder read failed: {}", e);
                return None;
            }
        };

        if response.trim().is_empty() {
            warn!("Empty response to encoder read");
            return None;
        }

        match codec::parse_encoder_response(&response) {
            Ok(counts) => Some(counts),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    /// True once a thread panicked while holding the channel
    pub fn is_poisoned(&self) -> bool {
        self.channel.is_poisoned()
    }

    /// Close the channel once any in-flight command has completed
    pub fn close(&self) {
        self.channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
    }
}
