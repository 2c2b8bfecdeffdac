//! Voice packet framing and send scheduling
//!
//! Packet layout:
//!
//! ```text
//! 0      1      2             4                   8                  12
//! ┌──────┬──────┬─────────────┬───────────────────┬──────────────────┬────────────┬─────────┐
//! │ 0x80 │ 0x78 │ sequence BE │ timestamp BE      │ SSRC BE          │ ciphertext │ tag(16) │
//! └──────┴──────┴─────────────┴───────────────────┴──────────────────┴────────────┴─────────┘
//! ```
//!
//! The nonce is the 12 header bytes followed by 12 zero bytes.

use bytes::{Buf, BufMut, BytesMut};
use std::time::Duration;

use crate::constants::{FRAME_DURATION, FRAME_SIZE, MAX_PACKET_SIZE};
use crate::error::NetworkError;
use crate::network::crypto::{SecretBox, NONCE_LEN, TAG_LEN};

pub const HEADER_LEN: usize = 12;
pub const VERSION_FLAGS: u8 = 0x80;
pub const PAYLOAD_TYPE: u8 = 0x78;

/// Time between consecutive packets
pub const TICKS_PER_FRAME: Duration = FRAME_DURATION;

/// Per-packet header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(VERSION_FLAGS);
        buf.put_u8(PAYLOAD_TYPE);
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }

    /// Parse the header at the start of a packet
    pub fn parse(mut data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN || data[0] != VERSION_FLAGS || data[1] != PAYLOAD_TYPE {
            return None;
        }
        data.advance(2);
        Some(Self {
            sequence: data.get_u16(),
            timestamp: data.get_u32(),
            ssrc: data.get_u32(),
        })
    }
}

/// Nonce for a packet: its header, zero-padded
pub fn nonce_from_header(header: &[u8]) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..HEADER_LEN].copy_from_slice(&header[..HEADER_LEN]);
    nonce
}

/// Build a complete packet into `buf`: header, encrypted payload, tag
pub fn seal_packet(
    buf: &mut BytesMut,
    header: &RtpHeader,
    payload: &[u8],
    cipher: &SecretBox,
) -> Result<(), NetworkError> {
    let len = HEADER_LEN + payload.len() + TAG_LEN;
    if len > MAX_PACKET_SIZE {
        return Err(NetworkError::PacketTooLarge(len));
    }

    buf.clear();
    buf.reserve(len);

    header.write_to(buf);
    let nonce = nonce_from_header(buf);
    buf.put_slice(payload);

    let tag = cipher.seal_in_place(&nonce, &mut buf[HEADER_LEN..])?;
    buf.put_slice(&tag);
    Ok(())
}

/// Decrypt a packet built by [`seal_packet`], returning header and payload
pub fn open_packet(packet: &[u8], cipher: &SecretBox) -> Result<(RtpHeader, Vec<u8>), NetworkError> {
    if packet.len() < HEADER_LEN + TAG_LEN {
        return Err(NetworkError::ReceiveFailed(format!("packet too short: {} bytes", packet.len())));
    }
    let header = RtpHeader::parse(packet)
        .ok_or_else(|| NetworkError::ReceiveFailed("bad packet header".to_string()))?;

    let nonce = nonce_from_header(packet);
    let tag_start = packet.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&packet[tag_start..]);

    let mut payload = packet[HEADER_LEN..tag_start].to_vec();
    cipher.open_in_place(&nonce, &mut payload, &tag)?;
    Ok((header, payload))
}

/// Sequence, timestamp and pacing schedule of an outbound stream
///
/// The schedule is an offset from a fixed origin that grows by exactly
/// [`TICKS_PER_FRAME`] per packet, independent of when packets actually left.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundPacketState {
    sequence: u16,
    timestamp: u32,
    next_send: Duration,
}

impl OutboundPacketState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from given counters (schedule at the origin)
    pub fn starting_at(sequence: u16, timestamp: u32) -> Self {
        Self {
            sequence,
            timestamp,
            next_send: Duration::ZERO,
        }
    }

    pub fn header(&self, ssrc: u32) -> RtpHeader {
        RtpHeader {
            sequence: self.sequence,
            timestamp: self.timestamp,
            ssrc,
        }
    }

    /// How long to wait before the next send, given the time since origin
    ///
    /// `None` means send now: either on time or already late. Late packets are
    /// not skipped.
    pub fn delay_until_next(&self, elapsed: Duration) -> Option<Duration> {
        self.next_send.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    /// Move to the next packet slot
    pub fn advance(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(FRAME_SIZE as u32);
        self.next_send += TICKS_PER_FRAME;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn next_send(&self) -> Duration {
        self.next_send
    }
}
