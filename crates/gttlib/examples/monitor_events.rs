//! Monitor touch, key, and property events.
//!
//! Puts the display into listening mode and prints every event as it
//! arrives, while periodically asking for the firmware version to show
//! that requests keep working alongside the event feed.
//!
//! # Requirements
//!
//! - A GTT display connected over USB or serial
//! - Serial port path adjusted for your system
//!
//! # Usage
//!
//! ```sh
//! cargo run -p gttlib --example monitor_events
//! ```

use std::time::Duration;

use gttlib::{DisplayBuilder, EventKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let serial_port = "/dev/ttyACM0";

    println!("Connecting to display on {}...", serial_port);

    let display = DisplayBuilder::new()
        .serial_port(serial_port)
        .baud_rate(115_200)
        // Nobody may touch the screen for a while; that is not a fault.
        .count_idle_timeouts(false)
        .build()?;
    display.open().await?;

    let version = display.version().await?;
    println!("Firmware version: {:02X?}\n", version);

    display.listen().await?;
    let mut events = display.subscribe()?;
    println!("Listening for 60 seconds. Touch the screen to generate events.\n");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    let mut heartbeat = tokio::time::interval(Duration::from_secs(10));

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            _ = heartbeat.tick() => {
                match display.echo(b"ping").await {
                    Ok(reply) => println!("[heartbeat] echo {:?}", String::from_utf8_lossy(&reply)),
                    Err(e) => println!("[heartbeat] {}", e),
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    println!("Event stream ended (state: {})", display.state());
                    break;
                };
                match event.kind {
                    EventKind::RegionTouch => println!("touch region {}", event.object_id),
                    EventKind::ButtonClick => println!("button {} clicked", event.object_id),
                    kind => println!("{} object {} value {:02X?}", kind, event.object_id, event.value),
                }
            }
        }
    }

    display.stop_listen().await;
    display.close().await?;
    println!("\nDone.");
    Ok(())
}
