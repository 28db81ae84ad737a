use crate::config::BusConfig;
use crate::frame::{self, CodecError, Message};
use crate::protocol::{ControllerState, MAX_PAYLOAD_LENGTH, MAX_SLOT_ID, MIN_SLOT_ID};
use crate::timing;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::time::Duration;
use heapless::Deque;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Received messages held until `receive_messages` drains them.
pub const RX_INBOX_CAPACITY: usize = 64;

/// Subscriber invoked for every message the reception path delivers.
pub type MessageCallback = Box<dyn FnMut(&Message) + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    /// The controller is not in the state the operation starts from. Nothing
    /// was changed; the caller can retry once the controller gets there.
    #[error("operation requires state {required}, controller is in {actual}")]
    InvalidState {
        required: ControllerState,
        actual: ControllerState,
    },

    #[error("invalid slot ID: {0} (valid range 1-2047)")]
    SlotOutOfRange(u16),

    #[error("payload too large: {0} bytes (maximum 254)")]
    PayloadTooLarge(usize),

    #[error("frame encoding failed: {0}")]
    Codec(#[from] CodecError),
}

impl ControllerError {
    pub fn is_state_violation(&self) -> bool {
        matches!(self, ControllerError::InvalidState { .. })
    }

    pub fn is_range_violation(&self) -> bool {
        matches!(
            self,
            ControllerError::SlotOutOfRange(_) | ControllerError::PayloadTooLarge(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStatistics {
    pub state: ControllerState,
    pub cycle_count: u8,
    pub tx_frames: u32,
    pub rx_frames: u32,
    pub errors: u32,
    pub channel_a_active: bool,
    pub channel_b_active: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    cycle_count: u8,
    tx_frames: u32,
    rx_frames: u32,
    errors: u32,
}

/// FlexRay communication controller.
///
/// Owns the protocol state and the installed [`BusConfig`]. Each legal edge of
/// the state machine is one method that either performs the transition or
/// returns [`ControllerError::InvalidState`] without touching anything.
///
/// | operation   | from           | to             |
/// |-------------|----------------|----------------|
/// | `configure` | DEFAULT_CONFIG | READY          |
/// | `start`     | READY          | NORMAL_ACTIVE  |
/// | `stop`      | NORMAL_ACTIVE  | HALT           |
/// | `reset`     | any            | DEFAULT_CONFIG |
pub struct Controller {
    state: ControllerState,
    config: Option<BusConfig>,
    callbacks: Vec<MessageCallback>,
    inbox: Deque<Message, RX_INBOX_CAPACITY>,
    counters: Counters,
}

impl Controller {
    pub fn new() -> Self {
        Self {
            state: ControllerState::DefaultConfig,
            config: None,
            callbacks: Vec::new(),
            inbox: Deque::new(),
            counters: Counters::default(),
        }
    }

    fn require(&self, required: ControllerState) -> Result<(), ControllerError> {
        if self.state == required {
            Ok(())
        } else {
            Err(ControllerError::InvalidState {
                required,
                actual: self.state,
            })
        }
    }

    /// Install a bus configuration. Timing problems are logged, not rejected.
    pub fn configure(&mut self, config: BusConfig) -> Result<(), ControllerError> {
        self.require(ControllerState::DefaultConfig)?;

        for warning in timing::validate_cycle_timing(&config) {
            warn!("Cycle timing: {}", warning);
        }

        info!(
            baudrate = config.baudrate,
            static_slots = config.static_slots,
            dynamic_slots = config.dynamic_slots,
            cycle_duration_us = config.cycle_duration,
            channel = %config.channel,
            "Configuring FlexRay controller"
        );

        self.config = Some(config);
        self.state = ControllerState::Ready;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ControllerError> {
        self.require(ControllerState::Ready)?;
        info!("Starting FlexRay communication");
        self.state = ControllerState::NormalActive;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), ControllerError> {
        self.require(ControllerState::NormalActive)?;
        info!("Stopping FlexRay communication");
        self.state = ControllerState::Halt;
        Ok(())
    }

    /// Return to DEFAULT_CONFIG from any state, releasing the configuration,
    /// pending received messages and counters. Subscribers stay registered.
    pub fn reset(&mut self) {
        info!(from = %self.state, "Resetting FlexRay controller");
        self.state = ControllerState::DefaultConfig;
        self.config = None;
        self.inbox.clear();
        self.counters = Counters::default();
    }

    /// Validate and encode a message for transmission.
    ///
    /// Returns the wire frame a transport would put on the bus. Subscribers
    /// are not notified: a controller never receives its own traffic.
    pub fn send(&mut self, message: &Message) -> Result<Vec<u8>, ControllerError> {
        if let Err(e) = self.require(ControllerState::NormalActive) {
            warn!("Cannot send message in state {}", self.state);
            return Err(e);
        }

        if !(MIN_SLOT_ID..=MAX_SLOT_ID).contains(&message.slot_id()) {
            self.counters.errors = self.counters.errors.wrapping_add(1);
            return Err(ControllerError::SlotOutOfRange(message.slot_id()));
        }

        if message.payload().len() > MAX_PAYLOAD_LENGTH {
            self.counters.errors = self.counters.errors.wrapping_add(1);
            return Err(ControllerError::PayloadTooLarge(message.payload().len()));
        }

        let frame = frame::encode(message)?;
        self.counters.tx_frames = self.counters.tx_frames.wrapping_add(1);

        debug!(
            slot = message.slot_id(),
            cycle = message.cycle_count(),
            channel = %message.channel(),
            length = message.payload().len(),
            "Sending FlexRay message"
        );

        Ok(frame)
    }

    /// Add a subscriber. Returns its position in delivery order.
    pub fn register_callback<F>(&mut self, callback: F) -> usize
    where
        F: FnMut(&Message) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self.callbacks.len() - 1
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Reception path: hand an incoming message to every subscriber, in
    /// registration order, and queue it for `receive_messages`.
    ///
    /// Returns `false` and drops the message when the controller is not
    /// taking part in communication.
    pub fn deliver(&mut self, message: Message) -> bool {
        if !self.state.is_communicating() {
            debug!(slot = message.slot_id(), state = %self.state, "Dropping received message");
            return false;
        }

        for callback in &mut self.callbacks {
            callback(&message);
        }

        if self.inbox.is_full() {
            // Oldest message is lost
            let _ = self.inbox.pop_front();
            self.counters.errors = self.counters.errors.wrapping_add(1);
        }
        let _ = self.inbox.push_back(message);
        self.counters.rx_frames = self.counters.rx_frames.wrapping_add(1);
        true
    }

    /// Count a frame that arrived but could not be decoded.
    pub fn record_rx_error(&mut self) {
        self.counters.errors = self.counters.errors.wrapping_add(1);
    }

    /// Drain messages delivered since the last call.
    ///
    /// Returns immediately; `_timeout` is accepted for transports that block.
    pub fn receive_messages(&mut self, _timeout: Duration) -> Vec<Message> {
        if self.state != ControllerState::NormalActive {
            return Vec::new();
        }

        let mut messages = Vec::with_capacity(self.inbox.len());
        while let Some(message) = self.inbox.pop_front() {
            messages.push(message);
        }
        messages
    }

    /// Record the cycle the bus has entered.
    pub fn on_cycle_start(&mut self, cycle_count: u8) {
        self.counters.cycle_count = cycle_count;
    }

    pub fn get_state(&self) -> ControllerState {
        self.state
    }

    pub fn get_config(&self) -> Option<&BusConfig> {
        self.config.as_ref()
    }

    pub fn get_statistics(&self) -> ControllerStatistics {
        let channel = self.config.as_ref().map(|config| config.channel);

        ControllerStatistics {
            state: self.state,
            cycle_count: self.counters.cycle_count,
            tx_frames: self.counters.tx_frames,
            rx_frames: self.counters.rx_frames,
            errors: self.counters.errors,
            channel_a_active: channel.is_some_and(|c| c.uses_a()),
            channel_b_active: channel.is_some_and(|c| c.uses_b()),
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("callbacks", &self.callbacks.len())
            .field("inbox", &self.inbox.len())
            .field("counters", &self.counters)
            .finish()
    }
}
