use arrayvec::ArrayString;
use core::fmt::{self, Write as _};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use thiserror::Error;

pub const FLEXRAY_VERSION: &str = "3.0.1";

// Frame layout
pub const HEADER_LENGTH: usize = 6;
pub const TRAILER_LENGTH: usize = 3;
pub const MIN_FRAME_LENGTH: usize = 8;
pub const MAX_PAYLOAD_LENGTH: usize = 254;
pub const MAX_FRAME_LENGTH: usize = HEADER_LENGTH + MAX_PAYLOAD_LENGTH + TRAILER_LENGTH;

pub const MIN_SLOT_ID: u16 = 1;
pub const MAX_SLOT_ID: u16 = 2047;
pub const CYCLE_COUNT_MODULUS: u8 = 64;
pub const MAX_CYCLE_COUNT: u8 = CYCLE_COUNT_MODULUS - 1;

const_assert_eq!(MAX_FRAME_LENGTH, 263);
const_assert_eq!(MAX_SLOT_ID, (1 << 11) - 1);

/// Cluster timing defaults in microseconds.
pub mod timing {
    /// Communication cycle (gdCycle).
    pub const GD_CYCLE_US: u32 = 5000;
    /// Static slot (gdStaticSlot).
    pub const GD_STATIC_SLOT_US: u32 = 50;
    /// Minislot (gdMinislot).
    pub const GD_MINISLOT_US: u32 = 5;
    /// Network idle time (gdNIT).
    pub const GD_NIT_US: u32 = 1000;
    /// Transmission start sequence, in bits.
    pub const GD_TSS_TRANSMITTER: u32 = 3;
    /// Collision avoidance symbol, in bits.
    pub const GD_CAS_RX: u32 = 11;
    /// Sample clock period at 80 MHz, in microseconds.
    pub const GD_SAMPLE_CLOCK_PERIOD_US: f64 = 0.0125;
}

/// Transmission channel. Encoded in the high nibble of header byte 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Channel {
    A = 0x01,
    B = 0x02,
    AB = 0x03,
}

impl Channel {
    pub const fn bits(self) -> u8 {
        self as u8
    }

    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x01 => Some(Self::A),
            0x02 => Some(Self::B),
            0x03 => Some(Self::AB),
            _ => None,
        }
    }

    pub const fn uses_a(self) -> bool {
        self.bits() & Self::A.bits() != 0
    }

    pub const fn uses_b(self) -> bool {
        self.bits() & Self::B.bits() != 0
    }

    /// True when both channels share at least one physical line.
    pub const fn overlaps(self, other: Self) -> bool {
        self.bits() & other.bits() != 0
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::AB
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::A => write!(f, "A"),
            Channel::B => write!(f, "B"),
            Channel::AB => write!(f, "AB"),
        }
    }
}

impl core::str::FromStr for Channel {
    type Err = ChannelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" | "1" => Ok(Self::A),
            "B" | "2" => Ok(Self::B),
            "AB" | "BOTH" | "3" => Ok(Self::AB),
            _ => Err(ChannelParseError(s.into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown channel '{0}' (expected A, B or AB)")]
pub struct ChannelParseError(pub String);

/// Low-nibble frame indicator bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const STARTUP_FRAME: u8 = 0x01;
    pub const SYNC_FRAME: u8 = 0x02;
    pub const NULL_FRAME: u8 = 0x04;
    pub const PAYLOAD_PREAMBLE: u8 = 0x08;
    pub const MASK: u8 = 0x0F;

    /// Bits outside the low nibble are dropped.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn with(self, bit: u8) -> Self {
        Self::from_bits(self.0 | bit)
    }

    pub const fn contains(self, bit: u8) -> bool {
        self.0 & bit == bit
    }

    pub const fn is_startup(self) -> bool {
        self.contains(Self::STARTUP_FRAME)
    }

    pub const fn is_sync(self) -> bool {
        self.contains(Self::SYNC_FRAME)
    }

    pub const fn is_null_frame(self) -> bool {
        self.contains(Self::NULL_FRAME)
    }

    pub const fn has_payload_preamble(self) -> bool {
        self.contains(Self::PAYLOAD_PREAMBLE)
    }
}

impl From<u8> for FrameFlags {
    fn from(bits: u8) -> Self {
        Self::from_bits(bits)
    }
}

/// Communication controller operating mode, with its protocol status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ControllerState {
    DefaultConfig = 0x00,
    Ready = 0x01,
    NormalActive = 0x02,
    NormalPassive = 0x03,
    Halt = 0x04,
    MonitorMode = 0x05,
    Config = 0x0F,
    Wakeup = 0x10,
    Startup = 0x11,
}

impl ControllerState {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::DefaultConfig),
            0x01 => Some(Self::Ready),
            0x02 => Some(Self::NormalActive),
            0x03 => Some(Self::NormalPassive),
            0x04 => Some(Self::Halt),
            0x05 => Some(Self::MonitorMode),
            0x0F => Some(Self::Config),
            0x10 => Some(Self::Wakeup),
            0x11 => Some(Self::Startup),
            _ => None,
        }
    }

    /// States in which the controller takes part in communication.
    pub const fn is_communicating(self) -> bool {
        matches!(self, Self::NormalActive | Self::NormalPassive)
    }
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::DefaultConfig
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DefaultConfig => "DEFAULT_CONFIG",
            Self::Ready => "READY",
            Self::NormalActive => "NORMAL_ACTIVE",
            Self::NormalPassive => "NORMAL_PASSIVE",
            Self::Halt => "HALT",
            Self::MonitorMode => "MONITOR_MODE",
            Self::Config => "CONFIG",
            Self::Wakeup => "WAKEUP",
            Self::Startup => "STARTUP",
        };
        f.write_str(name)
    }
}

/// Diagnostic frame identifier such as `FR_0010_C05`.
pub type FrameId = ArrayString<16>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameIdError {
    #[error("slot ID must be between 1 and 2047, got {0}")]
    SlotOutOfRange(u16),
}

pub fn format_frame_id(slot_id: u16, cycle_count: u8) -> Result<FrameId, FrameIdError> {
    if !(MIN_SLOT_ID..=MAX_SLOT_ID).contains(&slot_id) {
        return Err(FrameIdError::SlotOutOfRange(slot_id));
    }

    let mut id = FrameId::new();
    // "FR_dddd_Cdd" is at most 13 characters for any u8 cycle
    let _ = write!(id, "FR_{slot_id:04}_C{cycle_count:02}");
    Ok(id)
}

/// Hex dump with offset, hex column and printable-ASCII column.
pub fn format_payload_hex(data: &[u8], bytes_per_line: usize) -> String {
    let bytes_per_line = bytes_per_line.max(1);
    let hex_width = bytes_per_line * 3;
    let mut lines = alloc::vec::Vec::new();

    for (index, chunk) in data.chunks(bytes_per_line).enumerate() {
        let hex = chunk
            .iter()
            .map(|b| alloc::format!("{b:02x}"))
            .collect::<alloc::vec::Vec<_>>()
            .join(" ");
        let ascii: String = chunk
            .iter()
            .map(|&b| if (32..127).contains(&b) { b as char } else { '.' })
            .collect();
        lines.push(alloc::format!(
            "{:04x}  {hex:<hex_width$}  {ascii}",
            index * bytes_per_line
        ));
    }

    lines.join("\n")
}

/// Parse a hex byte string such as `0x0A 05:10`.
///
/// Whitespace and `:` separators and one leading `0x` are ignored; every
/// remaining character must be a hex digit.
pub fn parse_hex(text: &str) -> Result<alloc::vec::Vec<u8>, hex::FromHexError> {
    let digits: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(&digits);
    hex::decode(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_id_formatting() {
        assert_eq!(format_frame_id(10, 5).unwrap().as_str(), "FR_0010_C05");
        assert_eq!(format_frame_id(2047, 63).unwrap().as_str(), "FR_2047_C63");
        assert_eq!(format_frame_id(0, 0), Err(FrameIdError::SlotOutOfRange(0)));
        assert_eq!(format_frame_id(2048, 0), Err(FrameIdError::SlotOutOfRange(2048)));
    }

    #[test]
    fn test_channel_bits() {
        assert_eq!(Channel::from_bits(0x03), Some(Channel::AB));
        assert_eq!(Channel::from_bits(0x00), None);
        assert!(Channel::AB.uses_a() && Channel::AB.uses_b());
        assert!(!Channel::A.overlaps(Channel::B));
        assert!(Channel::B.overlaps(Channel::AB));
        assert_eq!("ab".parse::<Channel>().unwrap(), Channel::AB);
        assert!("C".parse::<Channel>().is_err());
    }

    #[test]
    fn test_flags_masked_to_nibble() {
        let flags = FrameFlags::from_bits(0xF3);
        assert_eq!(flags.bits(), 0x03);
        assert!(flags.is_startup());
        assert!(flags.is_sync());
        assert!(!flags.is_null_frame());
        assert!(FrameFlags::empty().with(FrameFlags::PAYLOAD_PREAMBLE).has_payload_preamble());
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(ControllerState::default(), ControllerState::DefaultConfig);
        assert_eq!(ControllerState::Startup.code(), 0x11);
        assert_eq!(ControllerState::from_code(0x0F), Some(ControllerState::Config));
        assert_eq!(ControllerState::from_code(0x06), None);
        assert_eq!(ControllerState::NormalActive.to_string(), "NORMAL_ACTIVE");
    }

    #[test]
    fn test_payload_hex_dump() {
        let dump = format_payload_hex(b"AB\x00\x7f", 4);
        assert_eq!(dump, "0000  41 42 00 7f   AB..");

        let dump = format_payload_hex(&[0u8; 5], 4);
        let lines: alloc::vec::Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("0004  00"));
        assert!(format_payload_hex(&[], 16).is_empty());
    }

    #[test]
    fn test_parse_hex_separators() {
        assert_eq!(parse_hex("0x0A 05:10").unwrap(), vec![0x0A, 0x05, 0x10]);
        assert_eq!(parse_hex("DEADbeef").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(parse_hex("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_hex_rejects_non_hex() {
        assert!(parse_hex("+f+f").is_err());
        assert!(parse_hex("+0").is_err());
        assert!(parse_hex("zz").is_err());
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("0x0x01").is_err());
    }
}
