// Motor controller module for the serial line-protocol bridge
//
// Provides:
// - Raw serial channel (open/read/write/close)
// - Command formatting and encoder response parsing
// - Mutex-serialized request/response client
// - Encoder velocity tracking and unit conversions
// - High-level bridge API

pub mod channel;
pub mod client;
pub mod codec;
mod driver;
pub mod encoder;

pub use channel::{ChannelError, SerialChannel, SerialEndpoint, Stream};
pub use client::{ProtocolClient, ProtocolError};
pub use codec::{OutgoingCommand, ParseError};
pub use driver::{CommandHandler, MotorBridge, PollReading};
pub use encoder::{EncoderSample, EncoderTracker, VelocityEstimate};
