//! Inspection snapshots.
//!
//! A snapshot is taken under the engine lock, so it always reflects a
//! whole number of cycles. Everything here is serde-serialisable; the demo
//! binary prints it as JSON and the inspector renders it.

use serde::{Deserialize, Serialize};

use crate::gpu::Gpu;
use crate::instruction::MemorySpace;
use crate::registry::Registries;

/// Lifecycle state of the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Finished,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::Finished => write!(f, "finished"),
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct LaneSnapshot {
    pub id: usize,
    pub warp: usize,
    pub pc: usize,
    pub registers: Vec<f32>,
    pub active: bool,
    pub predicate: bool,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct WarpSnapshot {
    pub id: usize,
    pub sm: usize,
    pub lanes: Vec<usize>,
    pub finished: bool,
    pub shared_memory: Vec<f32>,
}

/// A declared variable and the value currently held in its storage cell.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VariableView {
    pub lane: usize,
    pub name: String,
    pub location: MemorySpace,
    pub offset: usize,
    pub declared: f32,
    /// `None` if the cell no longer exists in this machine shape
    pub current: Option<f32>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct EngineSnapshot {
    pub state: RunState,
    pub cycle_count: u64,
    pub global_memory: Vec<f32>,
    pub warps: Vec<WarpSnapshot>,
    pub lanes: Vec<LaneSnapshot>,
    pub variables: Vec<VariableView>,
    /// Trace lines recorded so far in this run
    pub trace_lines: u64,
}

impl EngineSnapshot {
    pub fn capture(gpu: &Gpu, registries: &Registries, state: RunState) -> Self {
        let mut warps = Vec::new();
        for sm in &gpu.sms {
            for warp in &sm.warps {
                warps.push(WarpSnapshot {
                    id: warp.id,
                    sm: sm.id,
                    lanes: warp.lanes.clone(),
                    finished: warp.is_finished(&gpu.lanes),
                    shared_memory: warp.shared_memory.clone(),
                });
            }
        }
        warps.sort_by_key(|w| w.id);

        let lanes = gpu
            .lanes
            .iter()
            .map(|lane| LaneSnapshot {
                id: lane.id,
                warp: gpu.warp_of(lane.id).map(|w| w.id).unwrap_or_default(),
                pc: lane.pc,
                registers: lane.registers.clone(),
                active: lane.active,
                predicate: lane.predicate,
            })
            .collect();

        EngineSnapshot {
            state,
            cycle_count: gpu.cycle_count,
            global_memory: gpu.global_memory.clone(),
            warps,
            lanes,
            variables: variable_views(gpu, registries),
            trace_lines: gpu.trace.total(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Read each declared variable's live value out of its storage tier.
pub fn variable_views(gpu: &Gpu, registries: &Registries) -> Vec<VariableView> {
    registries
        .variables
        .entries()
        .into_iter()
        .map(|(lane, var)| {
            let current = match var.location {
                MemorySpace::Global => gpu.global_memory.get(var.offset).copied(),
                MemorySpace::Shared => gpu
                    .warp_of(lane)
                    .and_then(|w| w.shared_memory.get(var.offset).copied()),
                MemorySpace::Local => gpu
                    .lanes
                    .get(lane)
                    .and_then(|l| l.registers.get(var.offset).copied()),
            };
            VariableView {
                lane,
                name: var.name,
                location: var.location,
                offset: var.offset,
                declared: var.value,
                current,
            }
        })
        .collect()
}
