//! Console packet framing.
//!
//! # Wire format
//!
//! ```text
//! [4 bytes LE i32: length of everything that follows]
//! [4 bytes LE i32: request id]
//! [4 bytes LE i32: packet type]
//! [payload bytes: UTF-8, no terminator]
//! [2 bytes: 0x00 0x00]
//! ```
//!
//! Authentication failure is signalled by the server echoing request id `-1`.

use std::io::{Read, Write};

use craftlink_protocol::constants::RCON_MAX_PACKET_LEN;

use crate::error::RconError;

/// Client -> server: authenticate with the password as payload.
pub const SERVERDATA_AUTH: i32 = 3;

/// Client -> server: execute the payload as a command.
pub const SERVERDATA_EXECCOMMAND: i32 = 2;

/// Server -> client: authentication result (same value as execute).
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;

/// Server -> client: command output.
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Request id echoed by the server when authentication fails.
pub const AUTH_FAILED_ID: i32 = -1;

/// Request id + packet type.
const HEADER_LEN: usize = 8;

/// The two trailing null bytes.
const TRAILER_LEN: usize = 2;

/// A single console packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub request_id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn new(request_id: i32, kind: i32, body: impl Into<String>) -> Self {
        Self {
            request_id,
            kind,
            body: body.into(),
        }
    }

    /// Encodes the packet including its length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let len = HEADER_LEN + body.len() + TRAILER_LEN;

        let mut buf = Vec::with_capacity(4 + len);
        buf.extend_from_slice(&(len as i32).to_le_bytes());
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&self.kind.to_le_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(&[0, 0]);
        buf
    }
}

/// Writes a packet to the stream and flushes it.
pub fn write_packet<W: Write>(writer: &mut W, packet: &Packet) -> Result<(), RconError> {
    if packet.body.len() > RCON_MAX_PACKET_LEN {
        return Err(RconError::Protocol(format!(
            "payload too large: {} bytes (max {RCON_MAX_PACKET_LEN})",
            packet.body.len()
        )));
    }
    writer.write_all(&packet.encode())?;
    writer.flush()?;
    Ok(())
}

/// Reads exactly one packet from the stream.
///
/// Invalid UTF-8 in the payload is replaced rather than rejected; server
/// output occasionally carries stray bytes from formatting codes.
pub fn read_packet<R: Read>(reader: &mut R) -> Result<Packet, RconError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = i32::from_le_bytes(len_buf);

    if len < (HEADER_LEN + TRAILER_LEN) as i32 {
        return Err(RconError::Protocol(format!("packet too short: {len} bytes")));
    }
    let len = len as usize;
    if len > RCON_MAX_PACKET_LEN {
        return Err(RconError::Protocol(format!(
            "packet too large: {len} bytes (max {RCON_MAX_PACKET_LEN})"
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;

    let request_id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let kind = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let body = String::from_utf8_lossy(&buf[HEADER_LEN..len - TRAILER_LEN]).into_owned();

    Ok(Packet {
        request_id,
        kind,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout() {
        let packet = Packet::new(7, SERVERDATA_AUTH, "pw");
        let bytes = packet.encode();

        assert_eq!(bytes.len(), 4 + 8 + 2 + 2);
        assert_eq!(&bytes[0..4], &12i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &7i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3i32.to_le_bytes());
        assert_eq!(&bytes[12..14], b"pw");
        assert_eq!(&bytes[14..16], &[0, 0]);
    }

    #[test]
    fn read_back_written_packet() {
        let packet = Packet::new(42, SERVERDATA_RESPONSE_VALUE, "There are 0 of a max of 20 players online:");
        let mut buf = Vec::new();
        write_packet(&mut buf, &packet).unwrap();

        let mut cursor = &buf[..];
        assert_eq!(read_packet(&mut cursor).unwrap(), packet);
        assert!(cursor.is_empty());
    }

    #[test]
    fn read_auth_failure_id() {
        let mut buf = Vec::new();
        write_packet(&mut buf, &Packet::new(AUTH_FAILED_ID, SERVERDATA_AUTH_RESPONSE, "")).unwrap();

        let mut cursor = &buf[..];
        let packet = read_packet(&mut cursor).unwrap();
        assert_eq!(packet.request_id, -1);
        assert!(packet.body.is_empty());
    }

    #[test]
    fn multibyte_payload() {
        let packet = Packet::new(1, SERVERDATA_RESPONSE_VALUE, "当前有 1 个玩家在线");
        let mut buf = Vec::new();
        write_packet(&mut buf, &packet).unwrap();

        let mut cursor = &buf[..];
        assert_eq!(read_packet(&mut cursor).unwrap().body, "当前有 1 个玩家在线");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&11i32.to_le_bytes());
        buf.extend_from_slice(&1i32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.push(0xFF);
        buf.extend_from_slice(&[0, 0]);

        let mut cursor = &buf[..];
        let packet = read_packet(&mut cursor).unwrap();
        assert_eq!(packet.body, "\u{FFFD}");
    }

    #[test]
    fn short_length_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4i32.to_le_bytes());
        buf.extend_from_slice(&[0; 4]);

        let mut cursor = &buf[..];
        assert!(matches!(read_packet(&mut cursor), Err(RconError::Protocol(_))));
    }

    #[test]
    fn negative_length_is_rejected() {
        let buf = (-5i32).to_le_bytes();
        let mut cursor = &buf[..];
        assert!(matches!(read_packet(&mut cursor), Err(RconError::Protocol(_))));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let buf = ((RCON_MAX_PACKET_LEN + 1) as i32).to_le_bytes();
        let mut cursor = &buf[..];
        assert!(matches!(read_packet(&mut cursor), Err(RconError::Protocol(_))));
    }

    #[test]
    fn truncated_stream_is_io_error() {
        let packet = Packet::new(1, SERVERDATA_RESPONSE_VALUE, "hello");
        let bytes = packet.encode();

        let mut cursor = &bytes[..bytes.len() - 3];
        assert!(matches!(read_packet(&mut cursor), Err(RconError::Io(_))));
    }
}
