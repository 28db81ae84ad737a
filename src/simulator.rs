use crate::config::BusConfig;
use crate::frame::Message;
use crate::protocol::{Channel, CYCLE_COUNT_MODULUS};
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// How the simulated medium treats two transmissions in one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Arbitration {
    /// Record every transmission, including colliding ones.
    #[default]
    Disabled,
    /// Refuse a transmission when the same slot is already used on an
    /// overlapping channel during the current cycle.
    RejectConflicts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SimulatorError {
    #[error("slot {slot_id} already carries a frame on channel {channel} in cycle {cycle_count}")]
    SlotConflict {
        slot_id: u16,
        cycle_count: u8,
        channel: Channel,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SimulatorStats {
    pub cycle_count: u8,
    pub cycles_elapsed: u64,
    pub total_messages: usize,
    pub rejected_messages: u32,
    pub running: bool,
}

/// Stand-in for the physical bus.
///
/// Keeps every transmitted message in order and a cycle counter that wraps
/// 0, 1, ..., 63, 0. The counter only moves while the simulator is running.
#[derive(Debug)]
pub struct BusSimulator {
    config: BusConfig,
    messages: Vec<Message>,
    cycle_count: u8,
    running: bool,
    arbitration: Arbitration,
    // First record index belonging to the current cycle
    cycle_start: usize,
    cycles_elapsed: u64,
    rejected_messages: u32,
}

impl BusSimulator {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            messages: Vec::new(),
            cycle_count: 0,
            running: false,
            arbitration: Arbitration::Disabled,
            cycle_start: 0,
            cycles_elapsed: 0,
            rejected_messages: 0,
        }
    }

    #[must_use]
    pub fn with_arbitration(mut self, arbitration: Arbitration) -> Self {
        self.arbitration = arbitration;
        self
    }

    pub fn start(&mut self) {
        self.running = true;
        self.cycle_count = 0;
        self.cycle_start = self.messages.len();
        info!("FlexRay simulator started");
    }

    /// Stop advancing. The counter keeps its value until the next `start`.
    pub fn stop(&mut self) {
        self.running = false;
        info!(cycle = self.cycle_count, "FlexRay simulator stopped");
    }

    /// Append a message to the record.
    ///
    /// Always succeeds unless conflict arbitration is enabled.
    pub fn send_message(&mut self, message: Message) -> Result<(), SimulatorError> {
        if self.arbitration == Arbitration::RejectConflicts {
            let conflict = self.messages[self.cycle_start..].iter().any(|sent| {
                sent.slot_id() == message.slot_id() && sent.channel().overlaps(message.channel())
            });

            if conflict {
                self.rejected_messages += 1;
                return Err(SimulatorError::SlotConflict {
                    slot_id: message.slot_id(),
                    cycle_count: self.cycle_count,
                    channel: message.channel(),
                });
            }
        }

        debug!(slot = message.slot_id(), cycle = self.cycle_count, "Bus frame recorded");
        self.messages.push(message);
        Ok(())
    }

    /// Move to the next cycle. No-op while stopped.
    pub fn advance_cycle(&mut self) {
        if !self.running {
            return;
        }

        self.cycle_count = (self.cycle_count + 1) % CYCLE_COUNT_MODULUS;
        self.cycle_start = self.messages.len();
        self.cycles_elapsed += 1;
    }

    /// Every recorded message in transmission order.
    pub fn get_messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages recorded since the current cycle began.
    pub fn current_cycle_messages(&self) -> &[Message] {
        &self.messages[self.cycle_start..]
    }

    pub fn get_cycle_count(&self) -> u8 {
        self.cycle_count
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn get_config(&self) -> &BusConfig {
        &self.config
    }

    pub fn get_stats(&self) -> SimulatorStats {
        SimulatorStats {
            cycle_count: self.cycle_count,
            cycles_elapsed: self.cycles_elapsed,
            total_messages: self.messages.len(),
            rejected_messages: self.rejected_messages,
            running: self.running,
        }
    }
}

impl Default for BusSimulator {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(slot_id: u16, channel: Channel) -> Message {
        Message::new(slot_id, 0, channel, vec![0x01, 0x02])
    }

    #[test]
    fn test_start_resets_counter() {
        let mut sim = BusSimulator::default();
        assert!(!sim.is_running());
        sim.start();
        assert!(sim.is_running());
        assert_eq!(sim.get_cycle_count(), 0);
    }

    #[test]
    fn test_records_in_order() {
        let mut sim = BusSimulator::default();
        sim.start();
        sim.send_message(message(10, Channel::A)).unwrap();
        sim.send_message(message(20, Channel::A)).unwrap();

        let slots: Vec<u16> = sim.get_messages().iter().map(Message::slot_id).collect();
        assert_eq!(slots, vec![10, 20]);
    }

    #[test]
    fn test_wraps_after_64_cycles() {
        let mut sim = BusSimulator::default();
        sim.start();
        sim.advance_cycle();
        assert_eq!(sim.get_cycle_count(), 1);

        for _ in 0..62 {
            sim.advance_cycle();
        }
        assert_eq!(sim.get_cycle_count(), 63);

        sim.advance_cycle();
        assert_eq!(sim.get_cycle_count(), 0);
        assert_eq!(sim.get_stats().cycles_elapsed, 64);
    }

    #[test]
    fn test_advance_while_stopped_is_noop() {
        let mut sim = BusSimulator::default();
        sim.advance_cycle();
        assert_eq!(sim.get_cycle_count(), 0);

        sim.start();
        sim.advance_cycle();
        sim.advance_cycle();
        sim.stop();
        sim.advance_cycle();
        assert_eq!(sim.get_cycle_count(), 2);
        assert!(!sim.is_running());

        sim.start();
        assert_eq!(sim.get_cycle_count(), 0);
    }

    #[test]
    fn test_duplicate_slot_recorded_without_arbitration() {
        let mut sim = BusSimulator::default();
        sim.start();
        sim.send_message(message(7, Channel::A)).unwrap();
        sim.send_message(message(7, Channel::A)).unwrap();
        assert_eq!(sim.get_messages().len(), 2);
    }

    #[test]
    fn test_arbitration_rejects_overlapping_channel() {
        let mut sim = BusSimulator::default().with_arbitration(Arbitration::RejectConflicts);
        sim.start();
        sim.send_message(message(7, Channel::A)).unwrap();
        sim.send_message(message(7, Channel::B)).unwrap();

        let err = sim.send_message(message(7, Channel::AB)).unwrap_err();
        assert_eq!(
            err,
            SimulatorError::SlotConflict {
                slot_id: 7,
                cycle_count: 0,
                channel: Channel::AB,
            }
        );
        assert_eq!(sim.get_stats().rejected_messages, 1);

        // A new cycle frees the slot
        sim.advance_cycle();
        sim.send_message(message(7, Channel::AB)).unwrap();
        assert_eq!(sim.current_cycle_messages().len(), 1);
        assert_eq!(sim.get_messages().len(), 3);
    }
}
