//! FlexRay message type and wire codec.
//!
//! # Wire Format
//!
//! ```text
//! offset 0-1   slot_id             u16 big-endian
//! offset 2     cycle_count         u8
//! offset 3     channel<<4 | flags  u8
//! offset 4-5   payload_length      u16 big-endian
//! offset 6..   payload             payload_length bytes
//! trailer      CRC-24              3 bytes, most significant first
//! ```
//!
//! The codec does not enforce protocol limits on slot IDs or payload length;
//! the transmitting controller does. [`decode`] reads the CRC trailer without
//! checking it, [`decode_verified`] rejects frames whose trailer disagrees with
//! the recomputed checksum.

use crate::crc;
use crate::protocol::{Channel, FrameFlags, HEADER_LENGTH, MIN_FRAME_LENGTH, TRAILER_LENGTH};
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("frame too short: {actual} bytes, need at least 8")]
    TooShort { actual: usize },

    #[error("frame truncated: header declares {declared} bytes after the header, {available} present")]
    Truncated { declared: usize, available: usize },

    #[error("unknown channel bits 0x{0:x}")]
    UnknownChannel(u8),

    #[error("CRC mismatch: computed 0x{computed:06x}, frame carries 0x{received:06x}")]
    CrcMismatch { computed: u32, received: u32 },

    #[error("payload of {0} bytes does not fit the 16-bit length field")]
    PayloadTooLong(usize),
}

impl CodecError {
    /// Every decode failure means the input must be discarded.
    pub fn is_malformed_frame(&self) -> bool {
        !matches!(self, CodecError::PayloadTooLong(_))
    }
}

/// Seconds since the Unix epoch, used as a capture-time marker.
pub fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

/// One FlexRay protocol data unit.
///
/// Fields are fixed at construction. Equality compares everything except the
/// timestamp, so a decoded frame equals the message it was encoded from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    slot_id: u16,
    cycle_count: u8,
    channel: Channel,
    flags: FrameFlags,
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
    timestamp: f64,
}

impl Message {
    pub fn new(slot_id: u16, cycle_count: u8, channel: Channel, payload: Vec<u8>) -> Self {
        Self {
            slot_id,
            cycle_count,
            channel,
            flags: FrameFlags::empty(),
            payload,
            timestamp: now_timestamp(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: impl Into<FrameFlags>) -> Self {
        self.flags = flags.into();
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn slot_id(&self) -> u16 {
        self.slot_id
    }

    pub fn cycle_count(&self) -> u8 {
        self.cycle_count
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Size of the encoded frame.
    pub fn frame_length(&self) -> usize {
        HEADER_LENGTH + self.payload.len() + TRAILER_LENGTH
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        decode(data)
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.slot_id == other.slot_id
            && self.cycle_count == other.cycle_count
            && self.channel == other.channel
            && self.flags == other.flags
            && self.payload == other.payload
    }
}

impl Eq for Message {}

/// Parsed fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub slot_id: u16,
    pub cycle_count: u8,
    pub channel_bits: u8,
    pub flags: FrameFlags,
    pub payload_length: u16,
}

impl FrameHeader {
    fn for_message(message: &Message) -> Result<Self, CodecError> {
        let payload_length = u16::try_from(message.payload.len())
            .map_err(|_| CodecError::PayloadTooLong(message.payload.len()))?;

        Ok(Self {
            slot_id: message.slot_id,
            cycle_count: message.cycle_count,
            channel_bits: message.channel.bits(),
            flags: message.flags,
            payload_length,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LENGTH] {
        let [slot_hi, slot_lo] = self.slot_id.to_be_bytes();
        let [len_hi, len_lo] = self.payload_length.to_be_bytes();
        [
            slot_hi,
            slot_lo,
            self.cycle_count,
            (self.channel_bits << 4) | self.flags.bits(),
            len_hi,
            len_lo,
        ]
    }

    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < MIN_FRAME_LENGTH {
            return Err(CodecError::TooShort { actual: data.len() });
        }

        Ok(Self {
            slot_id: u16::from_be_bytes([data[0], data[1]]),
            cycle_count: data[2],
            channel_bits: data[3] >> 4,
            flags: FrameFlags::from_bits(data[3]),
            payload_length: u16::from_be_bytes([data[4], data[5]]),
        })
    }
}

/// Encode a message as header, payload and CRC trailer.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let header = FrameHeader::for_message(message)?.to_bytes();
    let checksum = crc::compute(&header, &message.payload);

    let mut frame = Vec::with_capacity(message.frame_length());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(&message.payload);
    frame.extend_from_slice(&crc::to_trailer(checksum));
    Ok(frame)
}

/// Decode a frame, reading past the CRC trailer without checking it.
///
/// Stricter than a bare header parse in two ways: a payload shorter than the
/// header's length field is [`CodecError::Truncated`] rather than silently cut
/// short, and a channel nibble outside 1-3 is [`CodecError::UnknownChannel`]
/// rather than masked to two bits.
pub fn decode(data: &[u8]) -> Result<Message, CodecError> {
    let (header, payload) = split_frame(data)?;
    build_message(&header, payload)
}

/// Decode a frame and reject it when the trailer does not match the
/// checksum recomputed over header and payload.
pub fn decode_verified(data: &[u8]) -> Result<Message, CodecError> {
    let (header, payload) = split_frame(data)?;

    let trailer_start = HEADER_LENGTH + payload.len();
    let trailer = data
        .get(trailer_start..trailer_start + TRAILER_LENGTH)
        .ok_or(CodecError::Truncated {
            declared: payload.len() + TRAILER_LENGTH,
            available: data.len() - HEADER_LENGTH,
        })?;

    let received = crc::from_trailer([trailer[0], trailer[1], trailer[2]]);
    let computed = crc::compute(&data[..HEADER_LENGTH], payload);
    if computed != received {
        return Err(CodecError::CrcMismatch { computed, received });
    }

    build_message(&header, payload)
}

fn split_frame(data: &[u8]) -> Result<(FrameHeader, &[u8]), CodecError> {
    let header = FrameHeader::parse(data)?;
    let declared = usize::from(header.payload_length);
    let payload = data
        .get(HEADER_LENGTH..HEADER_LENGTH + declared)
        .ok_or(CodecError::Truncated {
            declared,
            available: data.len() - HEADER_LENGTH,
        })?;
    Ok((header, payload))
}

fn build_message(header: &FrameHeader, payload: &[u8]) -> Result<Message, CodecError> {
    let channel =
        Channel::from_bits(header.channel_bits).ok_or(CodecError::UnknownChannel(header.channel_bits))?;

    Ok(Message {
        slot_id: header.slot_id,
        cycle_count: header.cycle_count,
        channel,
        flags: header.flags,
        payload: payload.to_vec(),
        timestamp: now_timestamp(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let message = Message::new(10, 5, Channel::A, vec![0x01, 0x02, 0x03, 0x04]);
        let frame = encode(&message).unwrap();

        assert_eq!(&frame[..6], &[0x00, 0x0A, 0x05, 0x10, 0x00, 0x04]);
        assert_eq!(&frame[6..10], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&frame[10..], &[0x6C, 0x36, 0xBB]);
    }

    #[test]
    fn test_channel_and_flags_share_byte() {
        let message = Message::new(1, 0, Channel::AB, Vec::new()).with_flags(FrameFlags::SYNC_FRAME | 0xF0);
        let frame = encode(&message).unwrap();
        assert_eq!(frame[3], 0x32);
        assert_eq!(frame.len(), 9);
    }

    #[test]
    fn test_decode_minimum_length() {
        let err = decode(&[0u8; 7]).unwrap_err();
        assert_eq!(err, CodecError::TooShort { actual: 7 });
        assert!(err.is_malformed_frame());
    }

    #[test]
    fn test_decode_ignores_trailer_by_default() {
        let message = Message::new(100, 10, Channel::B, vec![0xAA, 0xBB]);
        let mut frame = encode(&message).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        assert_eq!(decode(&frame).unwrap(), message);
        assert!(matches!(
            decode_verified(&frame),
            Err(CodecError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_verified_accepts_intact_frame() {
        let message = Message::new(2047, 63, Channel::AB, vec![0x5A; 254]);
        let frame = encode(&message).unwrap();
        assert_eq!(decode_verified(&frame).unwrap(), message);
    }

    #[test]
    fn test_decode_truncated_payload() {
        let frame = [0x00, 0x01, 0x00, 0x10, 0x00, 0x10, 0xAA, 0xBB];
        assert_eq!(
            decode(&frame).unwrap_err(),
            CodecError::Truncated { declared: 16, available: 2 }
        );
    }

    #[test]
    fn test_decode_unknown_channel() {
        let frame = [0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(decode(&frame).unwrap_err(), CodecError::UnknownChannel(0));
    }

    #[test]
    fn test_eight_byte_frame_with_short_trailer() {
        // Empty payload leaves only two trailer bytes in a minimum-size frame
        let frame = [0x00, 0x07, 0x01, 0x10, 0x00, 0x00, 0x12, 0x34];
        let message = decode(&frame).unwrap();
        assert_eq!(message.slot_id(), 7);
        assert!(message.payload().is_empty());
        assert!(matches!(
            decode_verified(&frame),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_equality_ignores_timestamp() {
        let a = Message::new(3, 1, Channel::A, vec![1]).with_timestamp(1.0);
        let b = Message::new(3, 1, Channel::A, vec![1]).with_timestamp(2.0);
        assert_eq!(a, b);
    }
}
