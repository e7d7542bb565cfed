// Keyboard teleop: WASD move, Z/X rotate, R/F speed, G field-relative,
// SPACE lock, H zero heading, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use swerve_zenoh_runtime::config::TOPIC_CMD_BASE;
use swerve_zenoh_runtime::messages::DriveCommand;

const SPEEDS: [f64; 3] = [0.1, 0.3, 0.6]; // fraction of max speed
const ROT_SPEEDS: [f64; 3] = [0.1, 0.25, 0.5]; // fraction of max turn rate
const INPUT_TIMEOUT_MS: u64 = 100; // Reset inputs after this much time with no key

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_BASE).await?;

    info!("Controls: WASD=move, Z/X=rotate, R/F=speed, G=field-relative");
    info!("          SPACE=lock, H=zero heading, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn send(
    publisher: &zenoh::pubsub::Publisher<'_>,
    cmd: &DriveCommand,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(serde_json::to_string(cmd)?).await?;
    Ok(())
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut field_relative = false;
    let mut locked = false;

    // Persistent input state
    let mut x = 0.0;
    let mut y = 0.0;
    let mut rot = 0.0;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                let mut moved = true;
                match code {
                    KeyCode::Char('w') if pressed => x = SPEEDS[speed_idx],
                    KeyCode::Char('s') if pressed => x = -SPEEDS[speed_idx],
                    KeyCode::Char('a') if pressed => y = SPEEDS[speed_idx],
                    KeyCode::Char('d') if pressed => y = -SPEEDS[speed_idx],
                    KeyCode::Char('z') if pressed => rot = ROT_SPEEDS[speed_idx],
                    KeyCode::Char('x') if pressed => rot = -ROT_SPEEDS[speed_idx],
                    _ => moved = false,
                }
                if moved {
                    locked = false;
                    last_movement_input = Instant::now();
                }

                match code {
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('g') if kind == KeyEventKind::Press => {
                        field_relative = !field_relative;
                        info!("Field-relative: {}", field_relative);
                    }
                    KeyCode::Char(' ') if kind == KeyEventKind::Press => {
                        locked = !locked;
                        info!("Lock: {}", locked);
                    }
                    KeyCode::Char('h') if kind == KeyEventKind::Press => {
                        info!("Zeroing heading");
                        send(publisher, &DriveCommand::ZeroHeading).await?;
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset inputs if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            x = 0.0;
            y = 0.0;
            rot = 0.0;
        }

        // Always publish at ~50Hz so the runtime watchdog stays fed
        let cmd = if locked {
            DriveCommand::Lock
        } else {
            DriveCommand::Drive {
                x,
                y,
                rot,
                field_relative,
            }
        };
        send(publisher, &cmd).await?;
    }

    send(publisher, &DriveCommand::Stop).await
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
