//! Packing application signals into frame payloads.
//!
//! A [`SignalLayout`] places named integer signals at byte offsets in a
//! payload. All multi-byte kinds are big-endian.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
}

impl SignalKind {
    pub const fn size(self) -> usize {
        match self {
            SignalKind::U8 | SignalKind::I8 => 1,
            SignalKind::U16 | SignalKind::I16 => 2,
            SignalKind::U32 | SignalKind::I32 => 4,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, SignalKind::I8 | SignalKind::I16 | SignalKind::I32)
    }

    fn range(self) -> (i64, i64) {
        match self {
            SignalKind::U8 => (0, i64::from(u8::MAX)),
            SignalKind::I8 => (i64::from(i8::MIN), i64::from(i8::MAX)),
            SignalKind::U16 => (0, i64::from(u16::MAX)),
            SignalKind::I16 => (i64::from(i16::MIN), i64::from(i16::MAX)),
            SignalKind::U32 => (0, i64::from(u32::MAX)),
            SignalKind::I32 => (i64::from(i32::MIN), i64::from(i32::MAX)),
        }
    }

    fn read(self, bytes: &[u8]) -> i64 {
        match self {
            SignalKind::U8 => i64::from(bytes[0]),
            SignalKind::I8 => i64::from(bytes[0] as i8),
            SignalKind::U16 => i64::from(u16::from_be_bytes([bytes[0], bytes[1]])),
            SignalKind::I16 => i64::from(i16::from_be_bytes([bytes[0], bytes[1]])),
            SignalKind::U32 => i64::from(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            SignalKind::I32 => i64::from(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        }
    }

    // Caller has range-checked `value`
    fn write(self, value: i64, out: &mut [u8]) {
        let be = value.to_be_bytes();
        out.copy_from_slice(&be[8 - self.size()..]);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalDef {
    pub name: String,
    pub start_byte: usize,
    pub kind: SignalKind,
}

impl SignalDef {
    pub fn end_byte(&self) -> usize {
        self.start_byte + self.kind.size()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignalLayout {
    signals: Vec<SignalDef>,
}

impl SignalLayout {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn signal(mut self, name: &str, start_byte: usize, kind: SignalKind) -> Self {
        self.signals.push(SignalDef {
            name: name.into(),
            start_byte,
            kind,
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&SignalDef> {
        self.signals.iter().find(|s| s.name == name)
    }

    pub fn signals(&self) -> &[SignalDef] {
        &self.signals
    }

    /// Bytes needed to hold every signal.
    pub fn min_payload_length(&self) -> usize {
        self.signals.iter().map(SignalDef::end_byte).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("signal '{name}' value {value} out of range for {kind:?}")]
    ValueOutOfRange {
        name: String,
        value: i64,
        kind: SignalKind,
    },

    #[error("signal '{name}' ends at byte {end}, payload is {payload_length} bytes")]
    OutOfBounds {
        name: String,
        end: usize,
        payload_length: usize,
    },
}

/// Extract every signal in the layout. Signals that run past the end of
/// `data` decode to `None`.
pub fn bytes_to_signals(data: &[u8], layout: &SignalLayout) -> BTreeMap<String, Option<i64>> {
    layout
        .signals
        .iter()
        .map(|signal| {
            let value = data
                .get(signal.start_byte..signal.end_byte())
                .map(|bytes| signal.kind.read(bytes));
            (signal.name.clone(), value)
        })
        .collect()
}

/// Pack signal values into a zeroed payload of `payload_length` bytes.
///
/// Names that are not in the layout are ignored.
pub fn signals_to_bytes<'a, I>(
    values: I,
    layout: &SignalLayout,
    payload_length: usize,
) -> Result<Vec<u8>, SignalError>
where
    I: IntoIterator<Item = (&'a str, i64)>,
{
    let mut data = vec![0u8; payload_length];

    for (name, value) in values {
        let Some(signal) = layout.get(name) else {
            continue;
        };

        let (min, max) = signal.kind.range();
        if !(min..=max).contains(&value) {
            return Err(SignalError::ValueOutOfRange {
                name: name.into(),
                value,
                kind: signal.kind,
            });
        }

        let slot = data
            .get_mut(signal.start_byte..signal.end_byte())
            .ok_or_else(|| SignalError::OutOfBounds {
                name: name.into(),
                end: signal.end_byte(),
                payload_length,
            })?;
        signal.kind.write(value, slot);
    }

    Ok(data)
}

/// DBC-style message definition for documentation.
pub fn dbc_entry(slot_id: u16, layout: &SignalLayout) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "BO_ {slot_id} FlexRayFrame_{slot_id}: {} Vector__XXX",
        layout.min_payload_length()
    );

    for signal in &layout.signals {
        let _ = write!(
            out,
            "\n SG_ {} : {}|{}@1+ (1,0) [0|0] \"\" Vector__XXX",
            signal.name,
            signal.start_byte * 8,
            signal.kind.size() * 8
        );
    }

    out
}
