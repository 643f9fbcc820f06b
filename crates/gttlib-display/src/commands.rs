//! Outbound command encoding.
//!
//! Every command starts with the outbound sentinel `0xFE`:
//!
//! ```text
//! 0xFE <id> <payload...>                                       simple command
//! 0xFE 0xFA <command BE u16> <object id BE u16> <payload...>   extended (object) command
//! ```
//!
//! Only the commands the engine itself issues have named ids here;
//! higher-level helpers build their own payloads and go through
//! [`encode_command`] / [`encode_extended_command`].

use bytes::{BufMut, BytesMut};
use gttlib_core::error::{Error, Result};

use crate::frame::LEGACY_TERMINATOR;

/// Leading byte of every command sent to the display.
pub const COMMAND_SENTINEL: u8 = 0xFE;

/// Request the firmware version.
pub const CMD_VERSION: u8 = 0x00;

/// Poll the keypad buffer (GLK modules).
pub const CMD_POLL_KEYPAD: u8 = 0x26;

/// Extended object command prefix.
pub const CMD_EXTENDED: u8 = 0xFA;

/// Echo the payload back.
pub const CMD_ECHO: u8 = 0xFF;

/// Encode a simple command.
///
/// # Example
///
/// ```
/// use gttlib_display::commands::{encode_command, CMD_ECHO};
///
/// assert_eq!(encode_command(CMD_ECHO, &[0x55]), vec![0xFE, 0xFF, 0x55]);
/// ```
pub fn encode_command(command_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(2 + payload.len());
    buf.put_u8(COMMAND_SENTINEL);
    buf.put_u8(command_id);
    buf.put_slice(payload);
    buf.to_vec()
}

/// Encode an extended object command.
///
/// `command` is the two-byte object command (e.g. `0x0106` to set a U16
/// property); `object_id` addresses the on-screen object.
///
/// # Example
///
/// ```
/// use gttlib_display::commands::encode_extended_command;
///
/// let bytes = encode_extended_command(0x0106, 0x0004, &[0x0A, 0x08, 0x00, 0x32]);
/// assert_eq!(
///     bytes,
///     vec![0xFE, 0xFA, 0x01, 0x06, 0x00, 0x04, 0x0A, 0x08, 0x00, 0x32]
/// );
/// ```
pub fn encode_extended_command(command: u16, object_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(6 + payload.len());
    buf.put_u8(COMMAND_SENTINEL);
    buf.put_u8(CMD_EXTENDED);
    buf.put_u16(command);
    buf.put_u16(object_id);
    buf.put_slice(payload);
    buf.to_vec()
}

/// Check the status reply of an extended command.
///
/// A successful reply is at least three bytes long and ends with the
/// legacy terminator; otherwise the third byte holds the failure status.
pub fn check_extended_status(reply: &[u8]) -> Result<()> {
    if reply.len() < 3 {
        return Err(Error::protocol("extended reply too short", reply));
    }
    if reply.last() != Some(&LEGACY_TERMINATOR) {
        return Err(Error::protocol(
            format!("extended command failed, status 0x{:02X}", reply[2]),
            reply,
        ));
    }
    Ok(())
}
