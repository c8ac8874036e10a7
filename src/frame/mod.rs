//! MAC frame model and wire codec.
//!
//! Four frame variants share one header shape: a 16-bit frame control word
//! (type in the low two bits), a 16-bit duration/ID in microseconds, one or
//! two EUI-48 addresses, and a 4-byte FCS trailer written as zero (the
//! channel model decides frame fate, so the checksum is never validated).
//! All multi-byte fields are little-endian.

pub mod address;
pub mod llc;

pub use address::{Mac48Address, Mac48Allocator};
pub use llc::{LLC_SNAP_LENGTH, LlcSnapHeader};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// FCS trailer length in bytes. Serialized as zero, never checked.
pub const FCS_LENGTH: usize = 4;

/// Largest encodable duration/ID value, in microseconds.
pub const MAX_DURATION_US: u64 = 0x7fff;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FrameType {
    Data = 0,
    Ack = 1,
    Rts = 2,
    Cts = 3,
}

impl FrameType {
    fn from_bits(bits: u16) -> FrameType {
        match bits & 0x3 {
            0 => FrameType::Data,
            1 => FrameType::Ack,
            2 => FrameType::Rts,
            _ => FrameType::Cts,
        }
    }

    /// DATA and RTS carry a second (source) address; ACK and CTS do not.
    fn has_addr2(&self) -> bool {
        matches!(self, FrameType::Data | FrameType::Rts)
    }
}

/// Wire decoding failure.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DecodeError {
    Truncated,
    BadLlcSnap,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "frame truncated"),
            DecodeError::BadLlcSnap => write!(f, "malformed LLC/SNAP header"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// MAC header shared by all four frame variants.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MacHeader {
    frame_type: FrameType,
    duration_us: u16,
    addr1: Mac48Address,
    addr2: Mac48Address,
}

impl MacHeader {
    pub fn new(frame_type: FrameType) -> Self {
        MacHeader {
            frame_type,
            duration_us: 0,
            addr1: Mac48Address::default(),
            addr2: Mac48Address::default(),
        }
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn addr1(&self) -> Mac48Address {
        self.addr1
    }

    pub fn addr2(&self) -> Mac48Address {
        self.addr2
    }

    pub fn set_addr1(&mut self, address: Mac48Address) {
        self.addr1 = address;
    }

    pub fn set_addr2(&mut self, address: Mac48Address) {
        self.addr2 = address;
    }

    /// Store the duration/ID field.
    ///
    /// Panics if the value does not fit the 15-bit microsecond field; a
    /// reservation that long cannot arise from well-formed timing math.
    pub fn set_duration(&mut self, duration: Duration) {
        let us = duration.as_micros();
        assert!(us <= MAX_DURATION_US as u128, "duration/ID overflow: {us}us");
        self.duration_us = us as u16;
    }

    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.duration_us as u64)
    }

    /// Frame control word; only the type bits are populated.
    pub fn frame_control(&self) -> u16 {
        self.frame_type as u16 & 0x3
    }

    /// Serialized header size: 16 bytes with two addresses, 10 with one.
    pub fn size(&self) -> usize {
        if self.frame_type.has_addr2() { 2 + 2 + 6 + 6 } else { 2 + 2 + 6 }
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.frame_control().to_le_bytes());
        buf.extend_from_slice(&self.duration_us.to_le_bytes());
        buf.extend_from_slice(&self.addr1.octets());
        if self.frame_type.has_addr2() {
            buf.extend_from_slice(&self.addr2.octets());
        }
    }

    /// Parse a header, returning it and the number of bytes consumed.
    pub fn read(bytes: &[u8]) -> Result<(MacHeader, usize), DecodeError> {
        if bytes.len() < 10 {
            return Err(DecodeError::Truncated);
        }
        let control = u16::from_le_bytes([bytes[0], bytes[1]]);
        let frame_type = FrameType::from_bits(control);
        let duration_us = u16::from_le_bytes([bytes[2], bytes[3]]);
        let mut addr1 = [0u8; 6];
        addr1.copy_from_slice(&bytes[4..10]);
        let mut header = MacHeader {
            frame_type,
            duration_us,
            addr1: Mac48Address::new(addr1),
            addr2: Mac48Address::default(),
        };
        let mut consumed = 10;
        if frame_type.has_addr2() {
            if bytes.len() < 16 {
                return Err(DecodeError::Truncated);
            }
            let mut addr2 = [0u8; 6];
            addr2.copy_from_slice(&bytes[10..16]);
            header.addr2 = Mac48Address::new(addr2);
            consumed = 16;
        }
        Ok((header, consumed))
    }
}

/// A frame as it exists on the simulated air: header plus payload bytes.
///
/// The payload is reference-counted because the MAC keeps the enqueued
/// payload alive across retries while copies of the frame travel through
/// the scheduler to every receiver.
#[derive(Clone, Debug)]
pub struct Frame {
    pub header: MacHeader,
    pub payload: Arc<[u8]>,
}

impl Frame {
    /// A control frame (ACK/RTS/CTS) with no payload.
    pub fn control(header: MacHeader) -> Self {
        Frame {
            header,
            payload: Arc::from([] as [u8; 0]),
        }
    }

    pub fn data(header: MacHeader, payload: Arc<[u8]>) -> Self {
        Frame { header, payload }
    }

    /// On-air size in bytes: header + payload + FCS.
    pub fn size(&self) -> usize {
        self.header.size() + self.payload.len() + FCS_LENGTH
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        self.header.write(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&[0u8; FCS_LENGTH]);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
        let (header, consumed) = MacHeader::read(bytes)?;
        let rest = &bytes[consumed..];
        if rest.len() < FCS_LENGTH {
            return Err(DecodeError::Truncated);
        }
        let payload = &rest[..rest.len() - FCS_LENGTH];
        Ok(Frame {
            header,
            payload: Arc::from(payload),
        })
    }
}
