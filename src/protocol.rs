//! MySQL client/server packet protocol.
//!
//! Packet framing is 3-byte little-endian length + 1-byte sequence
//! number, matching the MySQL client/server protocol. A logical payload
//! larger than `MAX_PACKET_SIZE` (2^24 - 1) is split across consecutive
//! physical packets with increasing sequence numbers and a final, often
//! empty, packet shorter than `MAX_PACKET_SIZE` marking the end —
//! `read_packet` reassembles these transparently.

use crate::error::{CdcError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

pub const MAX_PACKET_SIZE: usize = 0x00FF_FFFF;

/// Framed read/write over a MySQL client/server connection.
pub struct PacketChannel {
    stream: TcpStream,
    sequence: u8,
    read_timeout: Duration,
}

impl PacketChannel {
    pub async fn connect(hostname: &str, port: u16, read_timeout: Duration) -> Result<Self> {
        let addr = format!("{}:{}", hostname, port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| CdcError::Transport(format!("failed to connect to {addr}: {e}")))?;

        debug!(%addr, "connected to mysql");

        Ok(PacketChannel { stream, sequence: 0, read_timeout })
    }

    /// Reads one logical packet, reassembling multi-packet payloads
    /// larger than `MAX_PACKET_SIZE`. Bounded by `read_timeout`: a primary
    /// that stops sending (past its own heartbeat period) surfaces as a
    /// `CdcError::Timeout` rather than hanging forever.
    pub async fn read_packet(&mut self) -> Result<Vec<u8>> {
        tokio::time::timeout(self.read_timeout, self.read_packet_inner())
            .await
            .map_err(|_| CdcError::Timeout)?
    }

    async fn read_packet_inner(&mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        loop {
            let mut len_buf = [0u8; 3];
            self.stream
                .read_exact(&mut len_buf)
                .await
                .map_err(|e| CdcError::Transport(format!("failed to read packet length: {e}")))?;
            let length = u32::from_le_bytes([len_buf[0], len_buf[1], len_buf[2], 0]) as usize;

            let seq = self
                .stream
                .read_u8()
                .await
                .map_err(|e| CdcError::Transport(format!("failed to read sequence: {e}")))?;
            self.sequence = seq;

            let mut chunk = vec![0u8; length];
            self.stream
                .read_exact(&mut chunk)
                .await
                .map_err(|e| CdcError::Transport(format!("failed to read packet body: {e}")))?;
            let is_final = length < MAX_PACKET_SIZE;
            payload.extend_from_slice(&chunk);

            if is_final {
                break;
            }
        }
        Ok(payload)
    }

    /// Writes a logical packet, splitting it into `MAX_PACKET_SIZE`
    /// chunks (plus a zero-length terminator if the payload is an exact
    /// multiple of `MAX_PACKET_SIZE`) the way the read side expects.
    pub async fn write_packet(&mut self, data: &[u8], sequence: u8) -> Result<()> {
        let mut seq = sequence;
        let mut offset = 0;
        loop {
            let end = std::cmp::min(offset + MAX_PACKET_SIZE, data.len());
            let chunk = &data[offset..end];

            let mut header = Vec::new();
            WriteBytesExt::write_u24::<LittleEndian>(&mut header, chunk.len() as u32).map_err(CdcError::Io)?;
            WriteBytesExt::write_u8(&mut header, seq).map_err(CdcError::Io)?;

            self.stream
                .write_all(&header)
                .await
                .map_err(|e| CdcError::Transport(format!("failed to write header: {e}")))?;
            self.stream
                .write_all(chunk)
                .await
                .map_err(|e| CdcError::Transport(format!("failed to write data: {e}")))?;

            seq = seq.wrapping_add(1);
            offset = end;

            if chunk.len() < MAX_PACKET_SIZE {
                break;
            }
        }
        self.stream
            .flush()
            .await
            .map_err(|e| CdcError::Transport(format!("failed to flush: {e}")))?;

        Ok(())
    }

    /// Reads directly from the stream without packet framing, used once
    /// the connection has switched to binlog event streaming.
    pub async fn read_raw(&mut self, buffer: &mut [u8]) -> Result<usize> {
        self.stream
            .read(buffer)
            .await
            .map_err(|e| CdcError::Transport(format!("failed to read raw data: {e}")))
    }
}

/// The server's initial handshake packet (protocol version 10).
pub struct GreetingPacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub thread_id: u32,
    pub scramble: Vec<u8>,
    pub server_capabilities: u32,
    pub server_collation: u8,
    pub server_status: u16,
    pub auth_plugin_name: String,
}

impl GreetingPacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(data);

        let protocol_version = ReadBytesExt::read_u8(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read protocol version: {e}")))?;

        let server_version = read_null_terminated_string(&mut cursor)?;

        let thread_id = ReadBytesExt::read_u32::<LittleEndian>(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read thread id: {e}")))?;

        let mut scramble_part1 = vec![0u8; 8];
        Read::read_exact(&mut cursor, &mut scramble_part1)
            .map_err(|e| CdcError::Protocol(format!("failed to read scramble part 1: {e}")))?;

        ReadBytesExt::read_u8(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read filler: {e}")))?;

        let capabilities_lower = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read capabilities: {e}")))?;

        let server_collation = ReadBytesExt::read_u8(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read collation: {e}")))?;

        let server_status = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read status: {e}")))?;

        let capabilities_upper = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read capabilities upper: {e}")))?;

        let server_capabilities = (capabilities_upper as u32) << 16 | capabilities_lower as u32;

        let auth_data_len = ReadBytesExt::read_u8(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read auth data length: {e}")))?;

        let mut reserved = vec![0u8; 10];
        Read::read_exact(&mut cursor, &mut reserved)
            .map_err(|e| CdcError::Protocol(format!("failed to read reserved: {e}")))?;

        let scramble_len = std::cmp::max(13, auth_data_len.saturating_sub(8)) as usize;
        let mut scramble_part2 = vec![0u8; scramble_len];
        Read::read_exact(&mut cursor, &mut scramble_part2)
            .map_err(|e| CdcError::Protocol(format!("failed to read scramble part 2: {e}")))?;

        let mut scramble = scramble_part1;
        scramble.extend_from_slice(&scramble_part2[..scramble_part2.len() - 1]);

        let auth_plugin_name = read_null_terminated_string(&mut cursor).unwrap_or_default();

        Ok(GreetingPacket {
            protocol_version,
            server_version,
            thread_id,
            scramble,
            server_capabilities,
            server_collation,
            server_status,
            auth_plugin_name,
        })
    }
}

fn read_null_terminated_string<R: Read>(reader: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    while let Ok(byte) = ReadBytesExt::read_u8(reader) {
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    String::from_utf8(bytes).map_err(|e| CdcError::Protocol(format!("invalid utf-8 in string: {e}")))
}

pub fn is_error_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0xFF
}

pub fn is_ok_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0x00
}

pub fn is_eof_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0xFE && data.len() < 9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_kind_flags() {
        assert!(is_error_packet(&[0xFF, 0x01, 0x02]));
        assert!(!is_error_packet(&[0x00, 0x01, 0x02]));
        assert!(is_ok_packet(&[0x00, 0x01, 0x02]));
        assert!(!is_ok_packet(&[0xFF, 0x01, 0x02]));
        assert!(is_eof_packet(&[0xFE, 0x00, 0x00]));
        assert!(!is_eof_packet(&[0xFE; 20]));
    }
}
