//! Lanes and warps.
//! A lane is one sequential execution context. A warp is a fixed group of
//! lanes that advance through the program together and own a private
//! shared-memory segment.
//!
//! Lanes live in the GPU's lane pool; warps refer to them by pool index.

/// One SIMT thread: program counter, register file, liveness and predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Lane {
    /// Stable id, equal to the lane's index in the pool
    pub id: usize,
    pub pc: usize,
    pub registers: Vec<f32>,
    /// Cleared only by HALT (or by running off the end of the program)
    pub active: bool,
    /// Set by CMP_LT, consumed by JNZ
    pub predicate: bool,
}

impl Lane {
    pub fn new(id: usize, num_registers: usize) -> Self {
        Lane {
            id,
            pc: 0,
            registers: vec![0.0; num_registers],
            active: true,
            predicate: false,
        }
    }

    pub fn reset(&mut self) {
        self.pc = 0;
        self.registers.iter_mut().for_each(|r| *r = 0.0);
        self.active = true;
        self.predicate = false;
    }
}

/// A group of lanes executing in lockstep.
#[derive(Debug, Clone)]
pub struct Warp {
    pub id: usize,
    /// Indices into the GPU lane pool; fixed after construction
    pub lanes: Vec<usize>,
    /// Warp-private memory, sized to global memory capacity
    pub shared_memory: Vec<f32>,
}

impl Warp {
    pub fn new(id: usize, lanes: Vec<usize>, memory_size: usize) -> Self {
        Warp {
            id,
            lanes,
            shared_memory: vec![0.0; memory_size],
        }
    }

    /// A warp is finished once every member lane is inactive.
    pub fn is_finished(&self, pool: &[Lane]) -> bool {
        self.lanes.iter().all(|&i| !pool[i].active)
    }

    /// Program counter of the first active lane, in lane order.
    pub fn shared_pc(&self, pool: &[Lane]) -> Option<usize> {
        self.lanes
            .iter()
            .map(|&i| &pool[i])
            .find(|lane| lane.active)
            .map(|lane| lane.pc)
    }

    /// Whether active lanes disagree on their program counter.
    pub fn is_diverged(&self, pool: &[Lane]) -> bool {
        let mut pcs = self
            .lanes
            .iter()
            .map(|&i| &pool[i])
            .filter(|lane| lane.active)
            .map(|lane| lane.pc);
        match pcs.next() {
            Some(first) => pcs.any(|pc| pc != first),
            None => false,
        }
    }

    pub fn clear_memory(&mut self) {
        self.shared_memory.iter_mut().for_each(|c| *c = 0.0);
    }
}
