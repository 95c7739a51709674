// Line-based text protocol of the motor controller firmware
//
// Frames are space-separated ASCII tokens with a one-letter opcode:
//   o <left> <right>   raw PWM
//   m <left> <right>   target counts per control loop
//   e                  read encoder counters, answered with "<left> <right>"
// The carriage-return terminator is added by the transport, not here.

use std::fmt;

/// End-of-line byte for every frame in both directions
pub const TERMINATOR: u8 = b'\r';

/// Commands understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingCommand {
    SetPwm { left: i32, right: i32 },
    SetCountsPerLoop { left: i32, right: i32 },
    ReadEncoders,
}

impl OutgoingCommand {
    /// Single-letter opcode for this command
    pub fn opcode(&self) -> char {
        match self {
            OutgoingCommand::SetPwm { .. } => 'o',
            OutgoingCommand::SetCountsPerLoop { .. } => 'm',
            OutgoingCommand::ReadEncoders => 'e',
        }
    }
}

impl fmt::Display for OutgoingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            OutgoingCommand::SetPwm { left, right }
            | OutgoingCommand::SetCountsPerLoop { left, right } => {
                write!(f, "{} {} {}", self.opcode(), left, right)
            }
            OutgoingCommand::ReadEncoders => write!(f, "{}", self.opcode()),
        }
    }
}

/// Malformed encoder response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Expected 2 encoder values in {line:?}, found {found}")]
    TokenCount { line: String, found: usize },

    #[error("Invalid encoder value {token:?} in {line:?}")]
    InvalidInteger { line: String, token: String },
}

/// Render a command as a protocol line, without terminator
pub fn format(cmd: &OutgoingCommand) -> String {
    cmd.to_string()
}

/// Parse the `<left> <right>` reply to an encoder read
pub fn parse_encoder_response(raw: &str) -> Result<(i64, i64), ParseError> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.len() != 2 {
        return Err(ParseError::TokenCount {
            line: raw.to_string(),
            found: tokens.len(),
        });
    }

    let parse = |token: &str| {
        token.parse::<i64>().map_err(|_| ParseError::InvalidInteger {
            line: raw.to_string(),
            token: token.to_string(),
        })
    };

    Ok((parse(tokens[0])?, parse(tokens[1])?))
}
