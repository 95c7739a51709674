// Encoder probe: READ-ONLY check of the controller connection
//
// Only sends encoder reads ("e"), never drive commands, so it is safe
// to run with the wheels on the ground.
//
// Usage: cargo run --example encoder_probe -- <port> <encoder_cpr> [samples]
// Example: cargo run --example encoder_probe -- /dev/ttyUSB0 3440 20

use std::num::NonZeroU32;
use std::thread::sleep;
use std::time::{Duration, Instant};

use serial_motor_bridge::motor::channel::{DEFAULT_BAUDRATE, DEFAULT_PORT, DEFAULT_TIMEOUT_MS};
use serial_motor_bridge::motor::{EncoderTracker, ProtocolClient, SerialEndpoint};

const SAMPLE_PERIOD: Duration = Duration::from_millis(100);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| DEFAULT_PORT.to_string());
    let cpr: u32 = args.next().as_deref().unwrap_or("0").parse()?;
    let samples: usize = args.next().as_deref().unwrap_or("10").parse()?;

    let Some(cpr) = NonZeroU32::new(cpr) else {
        println!("Usage: encoder_probe <port> <encoder_cpr> [samples]");
        return Err("encoder_cpr must be greater than zero".into());
    };

    println!("Serial port: {}", port);
    println!("Counts per revolution: {}", cpr);
    println!();

    println!("Step 1: Opening serial port...");
    let endpoint = SerialEndpoint::new(
        port,
        DEFAULT_BAUDRATE,
        Duration::from_millis(DEFAULT_TIMEOUT_MS),
    );
    let client = match ProtocolClient::open(endpoint, true) {
        Ok(client) => {
            println!("  ✓ Serial port opened successfully");
            client
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Verify the USB cable is connected");
            println!("  - Check the baud rate matches the firmware ({})", DEFAULT_BAUDRATE);
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Reading encoders {} times...", samples);
    let mut tracker = EncoderTracker::new(cpr, Instant::now());
    let mut answered = 0;
    for i in 0..samples {
        match client.read_encoders() {
            Some(counts) => {
                answered += 1;
                match tracker.update(counts, Instant::now()) {
                    Some(v) => println!(
                        "  [{:>3}] counts=({:>8}, {:>8})  rad/s=({:>8.3}, {:>8.3})",
                        i, counts.0, counts.1, v.left_rad_s, v.right_rad_s
                    ),
                    None => println!("  [{:>3}] counts=({:>8}, {:>8})", i, counts.0, counts.1),
                }
            }
            None => println!("  [{:>3}] ✗ NO VALID RESPONSE", i),
        }
        sleep(SAMPLE_PERIOD);
    }
    println!();

    client.close();
    if answered == samples {
        println!("✓ All {} reads answered", samples);
    } else {
        println!("⚠ WARNING: {} of {} reads answered", answered, samples);
    }

    Ok(())
}
