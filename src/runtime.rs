// Zenoh wiring: command subscriber, timer-driven encoder poll, optional watchdog
//
// Commands and polls run on separate tasks; the only thing they share is
// the serial client's lock. Blocking serial I/O always goes through
// spawn_blocking/block_in_place, so this needs the multi-threaded runtime.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::{block_in_place, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::{Publisher, Subscriber};
use zenoh::sample::Sample;

// local imports
use crate::config::{
    BridgeConfig, TOPIC_ENCODER_VALS, TOPIC_HEALTH, TOPIC_MOTOR_COMMAND, TOPIC_MOTOR_VELS,
};
use crate::messages::{BridgeHealth, MotorCommand};
use crate::motor::{CommandHandler, MotorBridge, ProtocolClient, ProtocolError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Tracks command freshness; with no timeout configured it never goes stale
pub struct Watchdog {
    timeout: Option<Duration>,
    cmd_received_at: Option<Instant>,
    health: BridgeHealth,
}

impl Watchdog {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            cmd_received_at: None,
            // Start stale until first cmd
            health: BridgeHealth::CmdStale,
        }
    }

    pub fn on_command(&mut self, now: Instant) {
        self.cmd_received_at = Some(now);
    }

    pub fn health(&self) -> BridgeHealth {
        self.health
    }

    /// Re-evaluate health at `now`. Returns true only on the transition
    /// from `Ok` to `CmdStale`, when the motors should be stopped.
    pub fn check(&mut self, now: Instant) -> bool {
        let fresh = match (self.cmd_received_at, self.timeout) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(at), Some(timeout)) => now.saturating_duration_since(at) <= timeout,
        };

        let previous = self.health;
        self.health = if fresh {
            BridgeHealth::Ok
        } else {
            BridgeHealth::CmdStale
        };
        previous == BridgeHealth::Ok && self.health == BridgeHealth::CmdStale
    }
}

/// Parse queued command payloads, oldest first, and keep only the newest valid one
fn latest_command<I, P>(payloads: I) -> Option<MotorCommand>
where
    I: IntoIterator<Item = P>,
    P: AsRef<[u8]>,
{
    let mut latest = None;
    let mut skipped = 0;
    for payload in payloads {
        match serde_json::from_slice::<MotorCommand>(payload.as_ref()) {
            Ok(cmd) => {
                if latest.replace(cmd).is_some() {
                    skipped += 1;
                }
            }
            Err(e) => warn!("Failed to parse command: {}", e),
        }
    }
    if skipped > 0 {
        debug!("Dropped {} superseded commands", skipped);
    }
    latest
}

async fn handle_commands(
    subscriber: Subscriber<FifoChannelHandler<Sample>>,
    handler: CommandHandler,
    watchdog: Arc<Mutex<Watchdog>>,
) -> Result<(), BoxError> {
    loop {
        // Wait for one command, then drain anything queued behind it, keep latest
        let first = subscriber.recv_async().await?;
        let mut payloads = vec![first.payload().to_bytes().into_owned()];
        while let Ok(Some(sample)) = subscriber.try_recv() {
            payloads.push(sample.payload().to_bytes().into_owned());
        }
        let Some(cmd) = latest_command(&payloads) else {
            continue;
        };

        debug!("Received command: {:?}", cmd);
        watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_command(Instant::now());

        let handler = handler.clone();
        match tokio::task::spawn_blocking(move || handler.on_command(&cmd)).await? {
            Ok(()) => {}
            Err(ProtocolError::LockPoisoned) => return Err(ProtocolError::LockPoisoned.into()),
            // a timed-out command is dropped, not retried
            Err(ProtocolError::Timeout { .. }) => {}
            Err(e) => warn!("Command {:?} failed: {}", cmd, e),
        }
    }
}

/// Publish a record as JSON; failures are logged and the cycle carries on
async fn publish<T: Serialize>(publisher: &Publisher<'_>, value: &T) {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize record: {}", e);
            return;
        }
    };
    if let Err(e) = publisher.put(json).await {
        warn!("Failed to publish to {}: {}", publisher.key_expr(), e);
    }
}

pub async fn run(config: BridgeConfig) -> Result<(), BoxError> {
    config.validate()?;
    let counts_per_rev = config.counts_per_rev()?;

    info!("Opening serial channel...");
    let client = ProtocolClient::open(config.endpoint(), config.serial_debug)?;
    let mut bridge = MotorBridge::new(client, counts_per_rev, Instant::now());

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let cmd_topic = config.topic(TOPIC_MOTOR_COMMAND);
    let subscriber = session.declare_subscriber(cmd_topic.clone()).await?;
    let pub_vels = session
        .declare_publisher(config.topic(TOPIC_MOTOR_VELS))
        .await?;
    let pub_encoders = session
        .declare_publisher(config.topic(TOPIC_ENCODER_VALS))
        .await?;
    let pub_health = session.declare_publisher(config.topic(TOPIC_HEALTH)).await?;

    let watchdog = Arc::new(Mutex::new(Watchdog::new(config.command_timeout())));
    let mut command_task: JoinHandle<Result<(), BoxError>> = tokio::spawn(handle_commands(
        subscriber,
        bridge.commands(),
        Arc::clone(&watchdog),
    ));

    let mut tick = interval(config.poll_period());
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Bridge started: {}Hz poll, {} counts/rev, watchdog {}",
        config.poll_rate_hz,
        counts_per_rev,
        match config.command_timeout() {
            Some(timeout) => format!("{}ms", timeout.as_millis()),
            None => "off".to_string(),
        }
    );
    info!("Subscribed to: {}", cmd_topic);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome: Result<(), BoxError> = loop {
        tokio::select! {
            _ = tick.tick() => {}
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutting down");
                break Ok(());
            }
            joined = &mut command_task => {
                break match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(e.into()),
                };
            }
        }

        // 1. Poll encoders, publish both records when a fresh reading arrived
        if let Some(reading) = block_in_place(|| bridge.poll()) {
            publish(&pub_vels, &reading.velocity).await;
            publish(&pub_encoders, &reading.encoders).await;
        }
        if bridge.is_poisoned() {
            break Err(ProtocolError::LockPoisoned.into());
        }

        // 2. Watchdog: stop once on the transition to stale
        if config.command_timeout().is_some() {
            let (went_stale, health) = {
                let mut watchdog = watchdog.lock().unwrap_or_else(PoisonError::into_inner);
                (watchdog.check(Instant::now()), watchdog.health())
            };
            if went_stale {
                warn!("Command stale, stopping motors");
                if let Err(e) = block_in_place(|| bridge.commands().stop()) {
                    warn!("Failed to stop motors: {}", e);
                }
            }
            publish(&pub_health, &health).await;
        }
    };

    command_task.abort();
    if let Err(e) = &outcome {
        error!("Bridge error: {}", e);
    }

    // waits for any in-flight command before closing
    block_in_place(|| bridge.shutdown());
    if let Err(e) = session.close().await {
        warn!("Failed to close Zenoh session: {}", e);
    }

    outcome
}
