//! Several ECUs sharing one simulated bus.
//!
//! Each [`Node`] owns a controller and a set of static slots. Running a cycle
//! lets every node transmit in its slots (in slot order across the cluster),
//! records the frames on the [`BusSimulator`], then decodes each frame and
//! delivers it to every other node's controller. This is the reception path
//! that drives controller subscribers.

use crate::config::BusConfig;
use crate::controller::{Controller, ControllerError};
use crate::frame::{self, Message};
use crate::protocol::{format_frame_id, Channel, MIN_SLOT_ID};
use crate::simulator::{Arbitration, BusSimulator, SimulatorError};
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("node '{0}' already exists")]
    DuplicateNode(String),

    #[error("slot {slot_id} is outside the static segment (1-{static_slots})")]
    SlotOutsideStaticSegment { slot_id: u16, static_slots: u16 },

    #[error("slot {slot_id} is already owned by node '{owner}'")]
    SlotAlreadyOwned { slot_id: u16, owner: String },

    #[error("cluster is not running")]
    NotRunning,

    #[error("node '{node}': {source}")]
    Controller {
        node: String,
        #[source]
        source: ControllerError,
    },
}

/// One ECU on the cluster.
#[derive(Debug)]
pub struct Node {
    name: String,
    controller: Controller,
    slots: Vec<u16>,
    channel: Channel,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slots(&self) -> &[u16] {
        &self.slots
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }
}

/// A frame put on the bus during one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub node: String,
    pub frame_id: String,
    pub message: Message,
    #[serde(with = "serde_bytes")]
    pub frame: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u8,
    pub frames: Vec<FrameRecord>,
    pub delivered: u32,
    pub rejected: u32,
}

#[derive(Debug)]
pub struct Cluster {
    config: BusConfig,
    simulator: BusSimulator,
    nodes: Vec<Node>,
}

impl Cluster {
    pub fn new(config: BusConfig) -> Self {
        Self {
            simulator: BusSimulator::new(config.clone()),
            config,
            nodes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_arbitration(mut self, arbitration: Arbitration) -> Self {
        self.simulator = self.simulator.with_arbitration(arbitration);
        self
    }

    /// Register an ECU transmitting in `slots` on `channel`.
    ///
    /// Slots must lie in the static segment and belong to no other node.
    pub fn add_node(&mut self, name: &str, slots: &[u16], channel: Channel) -> Result<NodeId, ClusterError> {
        if self.nodes.iter().any(|node| node.name == name) {
            return Err(ClusterError::DuplicateNode(name.into()));
        }

        for &slot_id in slots {
            if !(MIN_SLOT_ID..=self.config.static_slots).contains(&slot_id) {
                return Err(ClusterError::SlotOutsideStaticSegment {
                    slot_id,
                    static_slots: self.config.static_slots,
                });
            }
            if let Some(owner) = self.owner_of(slot_id) {
                return Err(ClusterError::SlotAlreadyOwned {
                    slot_id,
                    owner: owner.name.clone(),
                });
            }
        }

        let mut slots = slots.to_vec();
        slots.sort_unstable();
        slots.dedup();

        self.nodes.push(Node {
            name: name.into(),
            controller: Controller::new(),
            slots,
            channel,
        });
        Ok(self.nodes.len() - 1)
    }

    pub fn owner_of(&self, slot_id: u16) -> Option<&Node> {
        self.nodes.iter().find(|node| node.slots.contains(&slot_id))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn simulator(&self) -> &BusSimulator {
        &self.simulator
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Configure and start every controller, then start the bus.
    ///
    /// Every controller must be in DEFAULT_CONFIG. When one node fails, the
    /// nodes started by this call are reset and the bus stays stopped.
    pub fn start(&mut self) -> Result<(), ClusterError> {
        for index in 0..self.nodes.len() {
            let node = &mut self.nodes[index];
            let result = node
                .controller
                .configure(self.config.clone())
                .and_then(|()| node.controller.start());

            if let Err(source) = result {
                let name = node.name.clone();
                for started in &mut self.nodes[..index] {
                    started.controller.reset();
                }
                return Err(ClusterError::Controller { node: name, source });
            }
        }
        self.simulator.start();
        Ok(())
    }

    /// Halt every active controller and stop the bus.
    ///
    /// Halted controllers only leave HALT through [`Cluster::reset`].
    pub fn stop(&mut self) {
        for node in &mut self.nodes {
            if let Err(e) = node.controller.stop() {
                debug!(node = %node.name, "Controller not stopped: {}", e);
            }
        }
        self.simulator.stop();
    }

    /// Stop the bus and return every controller to DEFAULT_CONFIG so the
    /// cluster can be started again. Subscribers and the bus record are kept.
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.controller.reset();
        }
        self.simulator.stop();
    }

    /// Run one communication cycle and advance the bus.
    ///
    /// `payload_for(node, slot_id, cycle)` supplies each node's payload for a
    /// slot; `None` leaves the slot empty this cycle. Frames rejected by a
    /// controller or by arbitration are counted and skipped.
    pub fn run_cycle<F>(&mut self, mut payload_for: F) -> Result<CycleReport, ClusterError>
    where
        F: FnMut(&str, u16, u8) -> Option<Vec<u8>>,
    {
        if !self.simulator.is_running() {
            return Err(ClusterError::NotRunning);
        }

        let cycle = self.simulator.get_cycle_count();
        let mut report = CycleReport {
            cycle,
            ..CycleReport::default()
        };

        for node in &mut self.nodes {
            node.controller.on_cycle_start(cycle);
        }

        // Static segment order: every owned slot, ascending
        let mut schedule: Vec<(u16, NodeId)> = self
            .nodes
            .iter()
            .enumerate()
            .flat_map(|(id, node)| node.slots.iter().map(move |&slot| (slot, id)))
            .collect();
        schedule.sort_unstable();

        let mut sent: Vec<(NodeId, Vec<u8>)> = Vec::new();
        for (slot_id, id) in schedule {
            let node = &mut self.nodes[id];
            let Some(payload) = payload_for(&node.name, slot_id, cycle) else {
                continue;
            };

            let message = Message::new(slot_id, cycle, node.channel, payload);
            let frame = match node.controller.send(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(node = %node.name, slot = slot_id, "Transmission refused: {}", e);
                    report.rejected += 1;
                    continue;
                }
            };

            if let Err(SimulatorError::SlotConflict { .. }) = self.simulator.send_message(message.clone()) {
                warn!(node = %node.name, slot = slot_id, cycle, "Slot conflict on bus");
                report.rejected += 1;
                continue;
            }

            report.frames.push(FrameRecord {
                node: node.name.clone(),
                frame_id: frame_id_string(slot_id, cycle),
                message,
                frame: frame.clone(),
            });
            sent.push((id, frame));
        }

        for (sender, frame) in &sent {
            match frame::decode_verified(frame) {
                Ok(message) => {
                    for (id, node) in self.nodes.iter_mut().enumerate() {
                        if id != *sender && node.controller.deliver(message.clone()) {
                            report.delivered += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!("Discarding malformed frame: {}", e);
                    for node in &mut self.nodes {
                        node.controller.record_rx_error();
                    }
                }
            }
        }

        self.simulator.advance_cycle();
        Ok(report)
    }
}

fn frame_id_string(slot_id: u16, cycle: u8) -> String {
    match format_frame_id(slot_id, cycle) {
        Ok(id) => id.to_string(),
        Err(_) => alloc::format!("FR_{slot_id}_C{cycle}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ControllerState;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn three_node_cluster() -> Cluster {
        let mut cluster = Cluster::new(BusConfig {
            static_slots: 32,
            ..BusConfig::default()
        });
        cluster.add_node("ECU1", &[10, 11, 12], Channel::AB).unwrap();
        cluster.add_node("ECU2", &[20, 21, 22], Channel::AB).unwrap();
        cluster.add_node("ECU3", &[30, 31, 32], Channel::AB).unwrap();
        cluster
    }

    #[test]
    fn test_slot_ownership_rules() {
        let mut cluster = three_node_cluster();
        assert_eq!(
            cluster.add_node("ECU4", &[11], Channel::A),
            Err(ClusterError::SlotAlreadyOwned {
                slot_id: 11,
                owner: "ECU1".into(),
            })
        );
        assert!(matches!(
            cluster.add_node("ECU4", &[33], Channel::A),
            Err(ClusterError::SlotOutsideStaticSegment { slot_id: 33, .. })
        ));
        assert!(matches!(
            cluster.add_node("ECU1", &[1], Channel::A),
            Err(ClusterError::DuplicateNode(_))
        ));
    }

    #[test]
    fn test_run_cycle_requires_start() {
        let mut cluster = three_node_cluster();
        assert_eq!(
            cluster.run_cycle(|_, _, _| Some(vec![0])),
            Err(ClusterError::NotRunning)
        );
    }

    #[test]
    fn test_cycle_transmits_in_slot_order() {
        let mut cluster = three_node_cluster();
        cluster.start().unwrap();

        let report = cluster.run_cycle(|_, slot, cycle| Some(vec![slot as u8, cycle])).unwrap();
        assert_eq!(report.cycle, 0);
        let slots: Vec<u16> = report.frames.iter().map(|f| f.message.slot_id()).collect();
        assert_eq!(slots, vec![10, 11, 12, 20, 21, 22, 30, 31, 32]);
        assert_eq!(report.frames[0].frame_id, "FR_0010_C00");
        // Each frame reaches the two other nodes
        assert_eq!(report.delivered, 18);
        assert_eq!(cluster.simulator().get_cycle_count(), 1);
        assert_eq!(cluster.simulator().get_messages().len(), 9);
    }

    #[test]
    fn test_nodes_never_receive_own_frames() {
        let mut cluster = three_node_cluster();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cluster
            .node_mut(0)
            .unwrap()
            .controller_mut()
            .register_callback(move |m| sink.lock().unwrap().push(m.slot_id()));

        cluster.start().unwrap();
        cluster.run_cycle(|_, _, _| Some(vec![0xAB])).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![20, 21, 22, 30, 31, 32]);

        let ecu1 = cluster.node_mut(0).unwrap().controller_mut();
        assert_eq!(ecu1.receive_messages(Duration::ZERO).len(), 6);
        assert_eq!(ecu1.get_statistics().tx_frames, 3);
        assert_eq!(ecu1.get_statistics().rx_frames, 6);
    }

    #[test]
    fn test_oversized_payload_rejected_not_transmitted() {
        let mut cluster = three_node_cluster();
        cluster.start().unwrap();

        let report = cluster
            .run_cycle(|node, _, _| {
                if node == "ECU2" {
                    Some(vec![0; 255])
                } else {
                    None
                }
            })
            .unwrap();

        assert_eq!(report.rejected, 3);
        assert!(report.frames.is_empty());
        assert!(cluster.simulator().get_messages().is_empty());
    }

    #[test]
    fn test_stop_halts_controllers() {
        let mut cluster = three_node_cluster();
        cluster.start().unwrap();
        cluster.stop();
        assert!(cluster
            .nodes()
            .iter()
            .all(|n| n.controller().get_state() == ControllerState::Halt));
        assert!(!cluster.simulator().is_running());
    }

    #[test]
    fn test_reset_allows_restart() {
        let mut cluster = three_node_cluster();
        cluster.start().unwrap();
        cluster.run_cycle(|_, _, _| Some(vec![1])).unwrap();
        cluster.stop();

        assert!(matches!(cluster.start(), Err(ClusterError::Controller { .. })));

        cluster.reset();
        assert!(cluster
            .nodes()
            .iter()
            .all(|n| n.controller().get_state() == ControllerState::DefaultConfig));

        cluster.start().unwrap();
        let report = cluster.run_cycle(|_, _, _| Some(vec![2])).unwrap();
        assert_eq!(report.cycle, 0);
        assert_eq!(report.frames.len(), 9);
        assert_eq!(cluster.simulator().get_messages().len(), 18);
    }

    #[test]
    fn test_failed_start_rolls_back_started_nodes() {
        let mut cluster = three_node_cluster();
        // ECU3 is already past DEFAULT_CONFIG, so configuring it fails
        cluster
            .node_mut(2)
            .unwrap()
            .controller_mut()
            .configure(BusConfig::default())
            .unwrap();

        match cluster.start() {
            Err(ClusterError::Controller { node, source }) => {
                assert_eq!(node, "ECU3");
                assert!(source.is_state_violation());
            }
            other => panic!("expected controller error, got {other:?}"),
        }

        assert_eq!(cluster.node(0).unwrap().controller().get_state(), ControllerState::DefaultConfig);
        assert_eq!(cluster.node(1).unwrap().controller().get_state(), ControllerState::DefaultConfig);
        assert_eq!(cluster.node(2).unwrap().controller().get_state(), ControllerState::Ready);
        assert!(!cluster.simulator().is_running());
    }

    #[test]
    fn test_start_twice_reports_controller_error() {
        let mut cluster = three_node_cluster();
        cluster.start().unwrap();
        assert!(matches!(
            cluster.start(),
            Err(ClusterError::Controller { .. })
        ));
    }
}
