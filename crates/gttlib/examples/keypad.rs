//! Poll the keypad of a GLK display.
//!
//! GLK modules buffer key presses and report them only when polled. This
//! example polls twice a second and prints every key code received.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p gttlib --example keypad
//! ```

use std::time::Duration;

use gttlib::DisplayBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let display = DisplayBuilder::new()
        .serial_port("/dev/ttyUSB0")
        .baud_rate(19_200)
        .build()?;
    display.open().await?;

    println!("Press keys on the display (Ctrl-C to quit)...");
    loop {
        for key in display.poll_keys().await? {
            println!("key 0x{:02X} ({})", key, key as char);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
