// gtt-cli -- command line tool for exercising a Matrix Orbital display
// over a serial port, or against a mock link that echoes commands back.
//
// Usage:
//   gtt-cli --port /dev/ttyACM0 version
//   gtt-cli --port /dev/ttyACM0 echo hello
//   gtt-cli --port /dev/ttyACM0 send FE58
//   gtt-cli --port /dev/ttyACM0 request 88
//   gtt-cli --port /dev/ttyACM0 exchange "FE FA 01 06 00 04 0A 08 00 32"
//   gtt-cli --port /dev/ttyACM0 listen --duration 30
//   gtt-cli --port /dev/ttyUSB0 --baud 19200 keys
//   gtt-cli --mock echo hello
//
// Port, baud rate and read timeout may also come from GTT_PORT, GTT_BAUD
// and GTT_READ_TIMEOUT_MS.

mod logging;

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use gttlib::{Display, DisplayBuilder};
use gttlib_test_harness::{MockTransport, echo_responder};

use crate::logging::{LogLevel, init_logging};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Exercise a Matrix Orbital GTT/GLK display from the command line.
#[derive(Parser, Debug)]
#[command(name = "gtt-cli", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyACM0, COM3).
    #[arg(long, env = "GTT_PORT", required_unless_present = "mock")]
    port: Option<String>,

    /// Baud rate.
    #[arg(long, env = "GTT_BAUD", default_value_t = 115_200)]
    baud: u32,

    /// Bound on a single serial read, in milliseconds.
    #[arg(long, env = "GTT_READ_TIMEOUT_MS", default_value_t = 600)]
    read_timeout_ms: u64,

    /// Deadline for request/response commands, in milliseconds.
    #[arg(long, default_value_t = 600)]
    timeout_ms: u64,

    /// Use a mock link that echoes every command instead of a serial port.
    #[arg(long, conflicts_with = "port")]
    mock: bool,

    /// Minimum log level (stderr). `RUST_LOG` takes precedence.
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read the firmware version.
    Version,
    /// Ask the display to echo text back.
    Echo {
        /// Text to echo.
        text: String,
    },
    /// Write raw bytes (hex) without waiting for a reply.
    Send {
        /// Bytes as hex, e.g. "FE 58" or FE58.
        hex: String,
    },
    /// Send a command by id and print the response payload.
    Request {
        /// Command id as hex, e.g. 88.
        id: String,
        /// Payload bytes as hex.
        #[arg(default_value = "")]
        payload: String,
    },
    /// Write raw bytes (hex) and print the uncorrelated raw reply.
    Exchange {
        /// Bytes as hex.
        hex: String,
    },
    /// Print events as they arrive.
    Listen {
        /// Seconds to listen (0 = until the stream ends or Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
    /// Drain the keypad buffer (GLK displays).
    Keys,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse hex bytes, ignoring whitespace.
fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let digits: String = input.split_whitespace().collect();
    hex::decode(&digits).with_context(|| format!("invalid hex input {input:?}"))
}

fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn create_display(cli: &Cli) -> Result<Display> {
    let builder = DisplayBuilder::new()
        .baud_rate(cli.baud)
        .read_timeout(Duration::from_millis(cli.read_timeout_ms))
        .request_timeout(Duration::from_millis(cli.timeout_ms))
        // `listen` waits on a person; a quiet display is expected there.
        .count_idle_timeouts(!matches!(cli.command, Command::Listen { .. }));

    if cli.mock {
        let mock = MockTransport::with_responder(echo_responder);
        return builder
            .build_with_transport(Box::new(mock))
            .context("failed to build display with mock link");
    }

    let port = cli.port.as_deref().context("--port is required")?;
    builder
        .serial_port(port)
        .build()
        .with_context(|| format!("failed to configure display on {port}"))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_listen(display: &Display, duration_secs: u64) -> Result<()> {
    display.listen().await.context("failed to start listening")?;
    let mut events = display.subscribe()?;

    println!("Listening for events (Ctrl-C to stop)...");

    let deadline = (duration_secs > 0)
        .then(|| tokio::time::Instant::now() + Duration::from_secs(duration_secs));

    loop {
        let next = async {
            match deadline {
                Some(dl) => tokio::time::timeout_at(dl, events.recv()).await.ok(),
                None => Some(events.recv().await),
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = next => match event {
                Some(Some(event)) => {
                    println!(
                        "[event] {} object={} value=[{}]",
                        event.kind,
                        event.object_id,
                        format_hex(&event.value)
                    );
                }
                Some(None) => {
                    println!("Event stream ended (display {}).", display.state());
                    break;
                }
                None => {
                    println!("Listen duration elapsed.");
                    break;
                }
            },
        }
    }

    display.stop_listen().await;
    Ok(())
}

async fn run(display: &Display, cli: &Cli) -> Result<()> {
    let timeout = Duration::from_millis(cli.timeout_ms);
    match &cli.command {
        Command::Version => {
            let version = display.version().await.context("version request failed")?;
            println!("Version: [{}]", format_hex(&version));
        }
        Command::Echo { text } => {
            let reply = display.echo(text.as_bytes()).await.context("echo failed")?;
            println!("Echo: {}", String::from_utf8_lossy(&reply));
        }
        Command::Send { hex } => {
            let bytes = parse_hex(hex)?;
            display.send(&bytes).await.context("send failed")?;
            println!("Sent {} bytes.", bytes.len());
        }
        Command::Request { id, payload } => {
            let id = match parse_hex(id)?.as_slice() {
                [id] => *id,
                _ => bail!("command id must be a single byte"),
            };
            let payload = parse_hex(payload)?;
            let reply = display
                .request(id, &payload, timeout)
                .await
                .with_context(|| format!("request 0x{id:02X} failed"))?;
            println!("Response: [{}]", format_hex(&reply));
        }
        Command::Exchange { hex } => {
            let bytes = parse_hex(hex)?;
            let reply = display.exchange(&bytes, timeout).await.context("exchange failed")?;
            println!("Reply: [{}]", format_hex(&reply));
        }
        Command::Listen { duration } => cmd_listen(display, *duration).await?,
        Command::Keys => {
            let keys = display.poll_keys().await.context("keypad poll failed")?;
            if keys.is_empty() {
                println!("No keys pressed.");
            }
            for key in keys {
                println!("Key: 0x{key:02X}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let display = create_display(&cli)?;
    display.open().await.context("failed to open display")?;

    let result = run(&display, &cli).await;
    display.close().await.ok();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_accepts_spaces() {
        assert_eq!(parse_hex("FE 58").unwrap(), vec![0xFE, 0x58]);
        assert_eq!(parse_hex("fefa0106").unwrap(), vec![0xFE, 0xFA, 0x01, 0x06]);
        assert!(parse_hex("").unwrap().is_empty());
    }

    #[test]
    fn parse_hex_rejects_bad_input() {
        assert!(parse_hex("F").is_err());
        assert!(parse_hex("ZZ").is_err());
        assert!(parse_hex("FÉ").is_err());
    }

    #[test]
    fn format_hex_spaces_bytes() {
        assert_eq!(format_hex(&[0xFC, 0x00, 0x0A]), "FC 00 0A");
    }

    #[test]
    fn parses_request_subcommand() {
        let cli = Cli::try_parse_from(["gtt-cli", "--mock", "request", "88"])
            .expect("request args should parse");
        assert!(matches!(cli.command, Command::Request { .. }));
        assert!(cli.mock);
    }

    #[test]
    fn port_or_mock_is_required() {
        let err = Cli::try_parse_from(["gtt-cli", "version"]).expect_err("port should be required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn mock_conflicts_with_port() {
        let err = Cli::try_parse_from(["gtt-cli", "--mock", "--port", "/dev/ttyACM0", "version"])
            .expect_err("conflicting args should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[tokio::test]
    async fn mock_display_answers_echo_and_version() {
        let cli = Cli::try_parse_from(["gtt-cli", "--mock", "echo", "hi"]).unwrap();
        let display = create_display(&cli).unwrap();
        display.open().await.unwrap();
        assert_eq!(display.echo(b"hi").await.unwrap(), b"hi".to_vec());
        assert!(display.version().await.unwrap().is_empty());
        run(&display, &cli).await.unwrap();
        display.close().await.unwrap();
    }
}
