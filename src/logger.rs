//! CSV message log.
//!
//! Format, one row per message after the header row:
//!
//! ```text
//! Timestamp,Slot,Cycle,Channel,Length,Payload
//! 1700000000.123456,10,5,1,4,01020304
//! ```
//!
//! Timestamps carry six decimals, the channel is its numeric code and the
//! payload is lowercase hex.

use crate::frame::Message;
use crate::protocol::Channel;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

pub const CSV_HEADER: &str = "Timestamp,Slot,Cycle,Channel,Length,Payload";

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing or unexpected CSV header")]
    BadHeader,

    #[error("line {line}: {reason}")]
    BadRecord { line: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: f64,
    pub slot_id: u16,
    pub cycle: u8,
    pub channel: Channel,
    pub payload: String,
    pub length: usize,
}

impl LogEntry {
    fn from_message(message: &Message) -> Self {
        Self {
            timestamp: message.timestamp(),
            slot_id: message.slot_id(),
            cycle: message.cycle_count(),
            channel: message.channel(),
            payload: hex::encode(message.payload()),
            length: message.payload().len(),
        }
    }

    fn to_csv_row(&self) -> String {
        alloc::format!(
            "{:.6},{},{},{},{},{}",
            self.timestamp,
            self.slot_id,
            self.cycle,
            self.channel.bits(),
            self.length,
            self.payload
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogStatistics {
    pub total_messages: usize,
    pub unique_slots: usize,
    pub slot_distribution: BTreeMap<u16, u32>,
    /// Seconds between the first and last entry.
    pub duration: f64,
}

/// Collects messages in memory and writes them as CSV.
#[derive(Debug, Default)]
pub struct MessageLogger {
    entries: Vec<LogEntry>,
}

impl MessageLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_message(&mut self, message: &Message) {
        self.entries.push(LogEntry::from_message(message));
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_csv<W: Write>(&self, mut writer: W) -> Result<(), LoggerError> {
        writeln!(writer, "{CSV_HEADER}")?;
        for entry in &self.entries {
            writeln!(writer, "{}", entry.to_csv_row())?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LoggerError> {
        let file = File::create(path)?;
        self.write_csv(BufWriter::new(file))
    }

    pub fn read_csv<R: BufRead>(reader: R) -> Result<Self, LoggerError> {
        let mut lines = reader.lines();
        let header = lines.next().transpose()?.ok_or(LoggerError::BadHeader)?;
        if header.trim_end() != CSV_HEADER {
            return Err(LoggerError::BadHeader);
        }

        let mut entries = Vec::new();
        for (index, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // Header is line 1
            entries.push(parse_row(&line, index + 2)?);
        }

        Ok(Self { entries })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoggerError> {
        Self::read_csv(BufReader::new(File::open(path)?))
    }

    /// `None` when nothing has been logged.
    pub fn get_statistics(&self) -> Option<LogStatistics> {
        let first = self.entries.first()?;
        let last = self.entries.last()?;

        let mut slot_distribution = BTreeMap::new();
        for entry in &self.entries {
            *slot_distribution.entry(entry.slot_id).or_insert(0) += 1;
        }

        Some(LogStatistics {
            total_messages: self.entries.len(),
            unique_slots: slot_distribution.len(),
            slot_distribution,
            duration: last.timestamp - first.timestamp,
        })
    }
}

fn parse_row(line: &str, line_number: usize) -> Result<LogEntry, LoggerError> {
    let bad = |reason: &str| LoggerError::BadRecord {
        line: line_number,
        reason: reason.into(),
    };

    let fields: Vec<&str> = line.trim_end().split(',').collect();
    let [timestamp, slot, cycle, channel, length, payload] = fields.as_slice() else {
        return Err(bad("expected 6 fields"));
    };

    let channel = channel
        .parse::<u8>()
        .ok()
        .and_then(Channel::from_bits)
        .ok_or_else(|| bad("invalid channel"))?;
    let length: usize = length.parse().map_err(|_| bad("invalid length"))?;
    let bytes = hex::decode(payload).map_err(|_| bad("invalid payload hex"))?;
    if bytes.len() != length {
        return Err(bad("payload length does not match Length column"));
    }

    Ok(LogEntry {
        timestamp: timestamp.parse().map_err(|_| bad("invalid timestamp"))?,
        slot_id: slot.parse().map_err(|_| bad("invalid slot"))?,
        cycle: cycle.parse().map_err(|_| bad("invalid cycle"))?,
        channel,
        payload: (*payload).into(),
        length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_logger() -> MessageLogger {
        let mut logger = MessageLogger::new();
        logger.log_message(&Message::new(10, 5, Channel::A, vec![0x01, 0x02, 0x0A, 0xFF]).with_timestamp(100.25));
        logger.log_message(&Message::new(20, 5, Channel::AB, vec![]).with_timestamp(100.5));
        logger.log_message(&Message::new(10, 6, Channel::A, vec![0x00]).with_timestamp(101.0));
        logger
    }

    #[test]
    fn test_csv_format() {
        let mut out = Vec::new();
        sample_logger().write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Timestamp,Slot,Cycle,Channel,Length,Payload");
        assert_eq!(lines[1], "100.250000,10,5,1,4,01020aff");
        assert_eq!(lines[2], "100.500000,20,5,3,0,");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_read_back() {
        let logger = sample_logger();
        let mut out = Vec::new();
        logger.write_csv(&mut out).unwrap();

        let restored = MessageLogger::read_csv(out.as_slice()).unwrap();
        assert_eq!(restored.entries(), logger.entries());
    }

    #[test]
    fn test_read_rejects_bad_rows() {
        let missing_header = "1.0,1,0,1,0,\n";
        assert!(matches!(
            MessageLogger::read_csv(missing_header.as_bytes()),
            Err(LoggerError::BadHeader)
        ));

        let bad_channel = "Timestamp,Slot,Cycle,Channel,Length,Payload\n1.0,1,0,7,0,\n";
        assert!(matches!(
            MessageLogger::read_csv(bad_channel.as_bytes()),
            Err(LoggerError::BadRecord { line: 2, .. })
        ));

        let not_hex = "Timestamp,Slot,Cycle,Channel,Length,Payload\n1.0,10,0,1,2,zzqq\n";
        match MessageLogger::read_csv(not_hex.as_bytes()) {
            Err(LoggerError::BadRecord { line, reason }) => {
                assert_eq!(line, 2);
                assert_eq!(reason, "invalid payload hex");
            }
            other => panic!("expected bad record, got {other:?}"),
        }

        let signed = "Timestamp,Slot,Cycle,Channel,Length,Payload\n1.0,10,0,1,1,+f\n";
        assert!(matches!(
            MessageLogger::read_csv(signed.as_bytes()),
            Err(LoggerError::BadRecord { line: 2, .. })
        ));
    }

    #[test]
    fn test_statistics() {
        assert!(MessageLogger::new().get_statistics().is_none());

        let stats = sample_logger().get_statistics().unwrap();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.unique_slots, 2);
        assert_eq!(stats.slot_distribution.get(&10), Some(&2));
        assert!((stats.duration - 0.75).abs() < 1e-9);
    }
}
