//! Advisory cycle-timing checks for a [`BusConfig`].
//!
//! Nothing here blocks configuration. The controller logs the warnings and
//! carries on.

use crate::config::BusConfig;
use crate::protocol::timing::{GD_NIT_US, GD_STATIC_SLOT_US};
use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Static-segment share of the cycle as a percentage, capped at 100.
///
/// A zero-length cycle reports full utilization.
pub fn bus_utilization(static_slots: u32, slot_duration_us: u32, cycle_duration_us: u32) -> f64 {
    if cycle_duration_us == 0 {
        return 100.0;
    }
    let static_segment_us = f64::from(static_slots) * f64::from(slot_duration_us);
    (static_segment_us / f64::from(cycle_duration_us) * 100.0).min(100.0)
}

/// Utilization of a configuration using the default static slot length.
pub fn config_utilization(config: &BusConfig) -> f64 {
    bus_utilization(
        u32::from(config.static_slots),
        GD_STATIC_SLOT_US,
        config.cycle_duration,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimingWarning {
    StaticSegmentExceedsCycle { static_us: u32, cycle_us: u32 },
    NetworkIdleTooShort { idle_us: u32 },
    TotalExceedsCycle { total_us: u32, cycle_us: u32 },
}

impl fmt::Display for TimingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingWarning::StaticSegmentExceedsCycle { static_us, cycle_us } => write!(
                f,
                "Static segment ({static_us}us) exceeds cycle duration ({cycle_us}us)"
            ),
            TimingWarning::NetworkIdleTooShort { idle_us } => write!(
                f,
                "Network idle time ({idle_us}us) is less than recommended {GD_NIT_US}us"
            ),
            TimingWarning::TotalExceedsCycle { total_us, cycle_us } => write!(
                f,
                "Total segment time ({total_us}us) exceeds cycle duration ({cycle_us}us)"
            ),
        }
    }
}

/// Check that the static segment and network idle time fit in the cycle.
///
/// Assumes every static slot lasts the default 50 us.
pub fn validate_cycle_timing(config: &BusConfig) -> Vec<TimingWarning> {
    let mut warnings = Vec::new();
    let cycle_us = config.cycle_duration;
    let static_us = config.static_segment_us();

    if static_us >= cycle_us {
        warnings.push(TimingWarning::StaticSegmentExceedsCycle { static_us, cycle_us });
    }

    if config.network_idle_time < GD_NIT_US {
        warnings.push(TimingWarning::NetworkIdleTooShort {
            idle_us: config.network_idle_time,
        });
    }

    let total_us = static_us.saturating_add(config.network_idle_time);
    if total_us > cycle_us {
        warnings.push(TimingWarning::TotalExceedsCycle { total_us, cycle_us });
    }

    warnings
}
