//! Engine configuration.
//!
//! The machine shape (lane count, warp size, register file, memory size) is
//! fixed at build time by the constants below. `EngineConfig` carries those
//! values into the engine so tests and the inspector can build smaller or
//! larger machines without touching the constants.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Number of lanes in the machine
pub const NUM_LANES: usize = 10;
/// Registers per lane
pub const NUM_REGISTERS: usize = 4;
/// Lanes per warp (the last warp may be partial)
pub const WARP_SIZE: usize = NUM_LANES;
/// Streaming multiprocessors; warps are spread across them round-robin
pub const NUM_SMS: usize = 1;
/// Global memory cells, one per lane
pub const GLOBAL_MEM_SIZE: usize = NUM_LANES;
/// Safety bound on the run loop
pub const MAX_CYCLES: u64 = 1000;
/// Inter-cycle delay used by the interactive preset
pub const DEFAULT_CYCLE_DELAY_MS: u64 = 50;
/// Trace lines retained before the oldest are evicted
pub const TRACE_CAPACITY: usize = 4096;

/// What DEF does when the declared offset falls outside its storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DefBoundsPolicy {
    /// Log the violation and skip the declaration; the lane carries on.
    #[default]
    Skip,
    /// Return the bounds error for the lane like any other instruction error.
    Report,
}

/// Which value CMP_LT compares for each named variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompareSource {
    /// The value recorded by DEF in the variable registry. Later writes to
    /// the variable's storage cell are not seen.
    #[default]
    Declared,
    /// The value currently held in the variable's storage cell.
    Live,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub num_lanes: usize,
    pub warp_size: usize,
    pub num_registers: usize,
    pub num_sms: usize,
    /// Cycles after which `run` gives up on a program that never halts
    pub max_cycles: u64,
    /// Sleep applied between cycles so observers can sample intermediate state
    pub cycle_delay: Duration,
    pub trace_capacity: usize,
    pub def_bounds: DefBoundsPolicy,
    pub compare: CompareSource,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            num_lanes: NUM_LANES,
            warp_size: WARP_SIZE,
            num_registers: NUM_REGISTERS,
            num_sms: NUM_SMS,
            max_cycles: MAX_CYCLES,
            cycle_delay: Duration::ZERO,
            trace_capacity: TRACE_CAPACITY,
            def_bounds: DefBoundsPolicy::Skip,
            compare: CompareSource::Declared,
        }
    }
}

impl EngineConfig {
    /// Defaults plus a visible inter-cycle delay, for front ends that watch
    /// a background run.
    pub fn interactive() -> Self {
        EngineConfig {
            cycle_delay: Duration::from_millis(DEFAULT_CYCLE_DELAY_MS),
            ..Self::default()
        }
    }

    pub fn with_lanes(mut self, num_lanes: usize) -> Self {
        self.num_lanes = num_lanes;
        self
    }

    pub fn with_warp_size(mut self, warp_size: usize) -> Self {
        self.warp_size = warp_size;
        self
    }

    pub fn with_sms(mut self, num_sms: usize) -> Self {
        self.num_sms = num_sms;
        self
    }

    pub fn with_registers(mut self, num_registers: usize) -> Self {
        self.num_registers = num_registers;
        self
    }

    pub fn with_max_cycles(mut self, max_cycles: u64) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    pub fn with_cycle_delay(mut self, delay: Duration) -> Self {
        self.cycle_delay = delay;
        self
    }

    pub fn with_def_bounds(mut self, policy: DefBoundsPolicy) -> Self {
        self.def_bounds = policy;
        self
    }

    pub fn with_compare(mut self, source: CompareSource) -> Self {
        self.compare = source;
        self
    }

    /// Global (and per-warp shared) memory capacity: one cell per lane.
    pub fn memory_size(&self) -> usize {
        self.num_lanes
    }

    /// Number of warps the lane pool is split into.
    pub fn num_warps(&self) -> usize {
        self.num_lanes.div_ceil(self.warp_size.max(1))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let reason = if self.num_lanes == 0 {
            "lane count must be non-zero"
        } else if self.warp_size == 0 {
            "warp size must be non-zero"
        } else if self.num_registers == 0 {
            "register count must be non-zero"
        } else if self.num_sms == 0 {
            "SM count must be non-zero"
        } else if self.max_cycles == 0 {
            "cycle bound must be non-zero"
        } else {
            return Ok(());
        };
        Err(EngineError::InvalidConfig(reason.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let c = EngineConfig::default();
        assert_eq!(c.num_lanes, NUM_LANES);
        assert_eq!(c.memory_size(), GLOBAL_MEM_SIZE);
        assert_eq!(c.num_warps(), 1);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_last_warp_is_counted() {
        let c = EngineConfig::default().with_lanes(10).with_warp_size(4);
        assert_eq!(c.num_warps(), 3);
    }

    #[test]
    fn zero_sized_shapes_are_rejected() {
        assert!(EngineConfig::default().with_lanes(0).validate().is_err());
        assert!(EngineConfig::default().with_warp_size(0).validate().is_err());
        assert!(EngineConfig::default().with_sms(0).validate().is_err());
        assert!(EngineConfig::default().with_registers(0).validate().is_err());
    }
}
