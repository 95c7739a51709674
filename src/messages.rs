// Message types exchanged with the message bus

use serde::{Deserialize, Serialize};

use crate::motor::VelocityEstimate;

// Command from teleop/planners -> bridge
// When `is_pwm` is set the two values are raw PWM magnitudes, otherwise wheel rates in rad/s
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorCommand {
    pub is_pwm: bool,
    pub mot_1_req_rad_sec: f64,
    pub mot_2_req_rad_sec: f64,
}

// Wheel velocities derived from the encoders
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MotorVels {
    pub mot_1_rad_sec: f64,
    pub mot_2_rad_sec: f64,
}

impl From<&VelocityEstimate> for MotorVels {
    fn from(v: &VelocityEstimate) -> Self {
        Self {
            mot_1_rad_sec: v.left_rad_s,
            mot_2_rad_sec: v.right_rad_s,
        }
    }
}

// Latest raw encoder counter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EncoderVals {
    pub mot_1_enc_val: i64,
    pub mot_2_enc_val: i64,
}

/// Health status published by the bridge
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BridgeHealth {
    Ok,
    CmdStale,
}
