//! # FlexRay Bus Simulator
//!
//! A FlexRay protocol model for developing ECU software without bus hardware:
//! the frame wire format and its CRC-24, the communication controller state
//! machine, and a time-triggered bus that counts cycles and records traffic.
//!
//! ## Features
//!
//! - **Frame codec**: 6-byte header, payload, 3-byte CRC-24 trailer
//! - **Controller state machine**: guarded configure/start/stop/reset and
//!   range-checked transmission
//! - **Bus simulation**: wrapping 0-63 cycle counter with an ordered record
//! - **Clusters**: several ECUs transmitting in their static slots and
//!   receiving each other's frames through subscriber callbacks
//! - **Tooling**: CSV message logs, signal packing, cycle timing advisories
//!
//! ## Quick Start
//!
//! ```rust
//! use flexbus::{BusConfig, BusSimulator, Channel, Controller, Message};
//!
//! let mut controller = Controller::new();
//! let mut bus = BusSimulator::new(BusConfig::default());
//!
//! controller.configure(BusConfig::default()).unwrap();
//! controller.start().unwrap();
//! bus.start();
//!
//! let message = Message::new(10, bus.get_cycle_count(), Channel::A, vec![0x01, 0x02]);
//! let frame = controller.send(&message).unwrap();
//! assert_eq!(frame.len(), 6 + 2 + 3);
//!
//! bus.send_message(message).unwrap();
//! bus.advance_cycle();
//! assert_eq!(bus.get_cycle_count(), 1);
//! ```
//!
//! ## Architecture
//!
//! - [`crc`] - CRC-24 over header and payload
//! - [`frame`] - [`Message`] and the wire codec
//! - [`controller`] - communication controller state machine
//! - [`simulator`] - cycle counter and traffic record
//! - [`cluster`] - multi-ECU orchestration and frame delivery
//! - [`timing`] - utilization and cycle timing advisories
//! - [`logger`] - CSV message log
//! - [`signals`] - signal packing and DBC-style output

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

extern crate alloc;

pub mod cluster;
pub mod config;
pub mod controller;
pub mod crc;
pub mod frame;
pub mod logger;
pub mod protocol;
pub mod signals;
pub mod simulator;
pub mod timing;

// Re-export main public types for convenience
pub use cluster::{Cluster, CycleReport, FrameRecord};
pub use config::BusConfig;
pub use controller::{Controller, ControllerError, ControllerStatistics};
pub use frame::{decode, decode_verified, encode, CodecError, Message};
pub use protocol::{format_frame_id, Channel, ControllerState, FrameFlags};
pub use simulator::{Arbitration, BusSimulator};
