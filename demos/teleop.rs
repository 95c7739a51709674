// Keyboard teleop: W/S forward/back, A/D turn, R/F speed, P toggles PWM mode, Q quit
//
// Usage: cargo run --example teleop -- [key_prefix]
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use serial_motor_bridge::config::{DEFAULT_KEY_PREFIX, TOPIC_MOTOR_COMMAND};
use serial_motor_bridge::messages::MotorCommand;

const RATE_SPEEDS: [f64; 3] = [2.0, 5.0, 10.0]; // rad/s
const PWM_SPEEDS: [f64; 3] = [60.0, 120.0, 200.0]; // raw PWM
const INPUT_TIMEOUT_MS: u64 = 100; // Reset wheels after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let prefix = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());
    let topic = format!("{}/{}", prefix, TOPIC_MOTOR_COMMAND);

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(topic.clone()).await?;

    info!("Publishing to {}", topic);
    info!("Controls: W/S=drive, A/D=turn, R/F=speed, P=PWM mode, Q=quit");
    info!("Speed: LOW, mode: rate");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut is_pwm = false;

    // Persistent wheel targets, in units of the current speed
    let mut left = 0.0;
    let mut right = 0.0;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('w') if pressed => {
                        (left, right) = (1.0, 1.0);
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        (left, right) = (-1.0, -1.0);
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        (left, right) = (-1.0, 1.0);
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        (left, right) = (1.0, -1.0);
                        last_movement_input = Instant::now();
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_state(speed_idx, is_pwm);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_state(speed_idx, is_pwm);
                    }
                    KeyCode::Char('p') if pressed => {
                        is_pwm = !is_pwm;
                        print_state(speed_idx, is_pwm);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset wheels if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            left = 0.0;
            right = 0.0;
        }

        let speed = if is_pwm {
            PWM_SPEEDS[speed_idx]
        } else {
            RATE_SPEEDS[speed_idx]
        };
        let cmd = MotorCommand {
            is_pwm,
            mot_1_req_rad_sec: left * speed,
            mot_2_req_rad_sec: right * speed,
        };
        publisher.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn print_state(idx: usize, is_pwm: bool) {
    let label = ["LOW", "MED", "HIGH"][idx];
    let mode = if is_pwm { "PWM" } else { "rate" };
    info!("Speed: {}, mode: {}", label, mode);
}
