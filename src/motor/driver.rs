// High-level bridge between bus records and the motor controller
//
// Combines the protocol client with the encoder tracker: inbound commands
// are converted to firmware units, and each encoder poll is turned into a
// velocity reading plus the raw counter values.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::client::{ProtocolClient, ProtocolError};
use super::encoder::{rad_s_to_counts, EncoderTracker};
use crate::messages::{EncoderVals, MotorCommand, MotorVels};

/// Handles inbound motor commands. Cheap to clone; every clone shares the client.
#[derive(Clone)]
pub struct CommandHandler {
    client: Arc<ProtocolClient>,
    counts_per_rev: NonZeroU32,
}

impl CommandHandler {
    /// Forward one command to the controller.
    ///
    /// PWM values pass through unchanged (truncated to integers);
    /// rates in rad/s become counts per control loop.
    pub fn on_command(&self, cmd: &MotorCommand) -> Result<(), ProtocolError> {
        if cmd.is_pwm {
            self.client
                .set_pwm(cmd.mot_1_req_rad_sec as i32, cmd.mot_2_req_rad_sec as i32)
        } else {
            let left = rad_s_to_counts(cmd.mot_1_req_rad_sec, self.counts_per_rev);
            let right = rad_s_to_counts(cmd.mot_2_req_rad_sec, self.counts_per_rev);
            debug!("Rate command -> {} {} counts per loop", left, right);
            self.client.set_feedback_counts(left, right)
        }
    }

    /// Zero PWM on both motors
    pub fn stop(&self) -> Result<(), ProtocolError> {
        info!("Stopping both motors");
        self.client.set_pwm(0, 0)
    }
}

/// Outbound records produced by one successful poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollReading {
    pub velocity: MotorVels,
    pub encoders: EncoderVals,
}

/// Owns the encoder state and drives the periodic poll
pub struct MotorBridge {
    client: Arc<ProtocolClient>,
    commands: CommandHandler,
    tracker: EncoderTracker,
}

impl MotorBridge {
    /// Take ownership of an open client; the encoder state starts at zero counts at `now`
    pub fn new(client: ProtocolClient, counts_per_rev: NonZeroU32, now: Instant) -> Self {
        let client = Arc::new(client);
        Self {
            commands: CommandHandler {
                client: Arc::clone(&client),
                counts_per_rev,
            },
            client,
            tracker: EncoderTracker::new(counts_per_rev, now),
        }
    }

    /// Handle for the inbound-command path
    pub fn commands(&self) -> CommandHandler {
        self.commands.clone()
    }

    pub fn tracker(&self) -> &EncoderTracker {
        &self.tracker
    }

    /// Read the encoders once.
    ///
    /// `None` when the read timed out, the reply was malformed, or no time
    /// passed since the previous sample; nothing is mutated in that case.
    pub fn poll(&mut self) -> Option<PollReading> {
        let counts = self.client.read_encoders()?;
        self.record(counts, Instant::now())
    }

    /// Fold a counter reading taken at `now` into the tracker
    pub fn record(&mut self, counts: (i64, i64), now: Instant) -> Option<PollReading> {
        let Some(velocity) = self.tracker.update(counts, now) else {
            debug!("No time elapsed since previous encoder sample, skipping");
            return None;
        };

        Some(PollReading {
            velocity: MotorVels::from(&velocity),
            encoders: EncoderVals {
                mot_1_enc_val: counts.0,
                mot_2_enc_val: counts.1,
            },
        })
    }

    pub fn is_poisoned(&self) -> bool {
        self.client.is_poisoned()
    }

    /// Stop the motors (best effort) and close the channel once any
    /// in-flight command has finished
    pub fn shutdown(&self) {
        if let Err(e) = self.commands.stop() {
            warn!("Failed to stop motors on shutdown: {}", e);
        }
        self.client.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::channel::tests::{scripted_channel, ScriptedStream};
    use crate::motor::ChannelError;
    use std::time::Duration;

    fn bridge_with(stream: &ScriptedStream, cpr: u32) -> MotorBridge {
        let client = ProtocolClient::new(scripted_channel(stream), false);
        MotorBridge::new(
            client,
            NonZeroU32::new(cpr).unwrap(),
            Instant::now() - Duration::from_secs(1),
        )
    }

    #[test]
    fn test_pwm_command_passes_raw_values() {
        let stream = ScriptedStream::with_reply("OK\r");
        let bridge = bridge_with(&stream, 200);

        bridge
            .commands()
            .on_command(&MotorCommand {
                is_pwm: true,
                mot_1_req_rad_sec: 120.9,
                mot_2_req_rad_sec: -75.0,
            })
            .unwrap();
        assert_eq!(stream.written(), "o 120 -75\r");
    }

    #[test]
    fn test_rate_command_converts_to_counts() {
        let stream = ScriptedStream::with_reply("OK\r");
        let bridge = bridge_with(&stream, 200);

        // 2π rad/s is one revolution: 200 counts
        bridge
            .commands()
            .on_command(&MotorCommand {
                is_pwm: false,
                mot_1_req_rad_sec: std::f64::consts::TAU,
                mot_2_req_rad_sec: -std::f64::consts::PI,
            })
            .unwrap();
        assert_eq!(stream.written(), "m 200 -100\r");
    }

    #[test]
    fn test_command_timeout_is_reported() {
        let stream = ScriptedStream::default();
        stream.push_timeout();
        let bridge = bridge_with(&stream, 200);

        let result = bridge.commands().on_command(&MotorCommand {
            is_pwm: true,
            mot_1_req_rad_sec: 1.0,
            mot_2_req_rad_sec: 1.0,
        });
        assert!(matches!(result, Err(ProtocolError::Timeout { .. })));
    }

    #[test]
    fn test_poll_publishes_velocity_and_counts() {
        let stream = ScriptedStream::with_reply("200 -100\r");
        let mut bridge = bridge_with(&stream, 200);

        let reading = bridge.poll().unwrap();
        assert_eq!(
            reading.encoders,
            EncoderVals {
                mot_1_enc_val: 200,
                mot_2_enc_val: -100
            }
        );
        // one revolution forward, half backward, over roughly a second
        assert!(reading.velocity.mot_1_rad_sec > 0.0);
        assert!(reading.velocity.mot_2_rad_sec < 0.0);
        assert_eq!(bridge.tracker().previous().left_count, 200);
    }

    #[test]
    fn test_malformed_poll_leaves_state_untouched() {
        let stream = ScriptedStream::with_reply("12 abc\r");
        let mut bridge = bridge_with(&stream, 200);
        let before = *bridge.tracker().previous();

        assert_eq!(bridge.poll(), None);
        assert_eq!(bridge.tracker().previous(), &before);
    }

    #[test]
    fn test_timed_out_poll_leaves_state_untouched() {
        let stream = ScriptedStream::default();
        stream.push_timeout();
        let mut bridge = bridge_with(&stream, 200);
        let before = *bridge.tracker().previous();

        assert_eq!(bridge.poll(), None);
        assert_eq!(bridge.tracker().previous(), &before);
    }

    #[test]
    fn test_record_matches_reference_values() {
        let stream = ScriptedStream::default();
        let mut bridge = bridge_with(&stream, 200);
        let t0 = bridge.tracker().previous().timestamp + Duration::from_secs(1);

        bridge.record((100, 100), t0).unwrap();
        let reading = bridge.record((150, 80), t0 + Duration::from_secs(1)).unwrap();
        assert!((reading.velocity.mot_1_rad_sec - 1.5708).abs() < 1e-4);
        assert!((reading.velocity.mot_2_rad_sec + 0.6283).abs() < 1e-4);
        assert_eq!(reading.encoders.mot_1_enc_val, 150);
        assert_eq!(reading.encoders.mot_2_enc_val, 80);
    }

    #[test]
    fn test_shutdown_stops_then_closes() {
        let stream = ScriptedStream::with_reply("OK\r");
        let bridge = bridge_with(&stream, 200);

        bridge.shutdown();
        assert_eq!(stream.written(), "o 0 0\r");
        assert!(matches!(
            bridge.client.set_pwm(1, 1),
            Err(ProtocolError::Channel(ChannelError::Closed))
        ));

        // second shutdown finds the channel closed and only logs
        bridge.shutdown();
        assert_eq!(stream.written(), "o 0 0\r");
    }
}
