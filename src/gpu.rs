//! Top-level machine state.
//! Models the GPU as a pool of lanes grouped into warps, the warps spread
//! across Streaming Multiprocessors (SMs), and one global memory array shared
//! by every lane.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::handlers::HandlerTable;
use crate::instruction::Instruction;
use crate::registry::Registries;
use crate::sm::{CycleEnv, StreamingMultiprocessor};
use crate::trace::TraceBuffer;
use crate::warp::{Lane, Warp};

pub struct Gpu {
    /// One cell per lane
    pub global_memory: Vec<f32>,
    pub sms: Vec<StreamingMultiprocessor>,
    /// The lane pool. Warps hold indices into it; each lane belongs to
    /// exactly one warp.
    pub lanes: Vec<Lane>,
    pub program: Vec<Instruction>,
    pub cycle_count: u64,
    pub trace: TraceBuffer,
    config: EngineConfig,
}

impl Gpu {
    /// Build the lane pool and partition it into warps of `warp_size` lanes
    /// (the last warp may be partial). Warps are assigned to SMs round-robin.
    /// `config` must already be validated.
    pub fn new(program: Vec<Instruction>, config: EngineConfig) -> Self {
        let memory_size = config.memory_size();
        let lanes: Vec<Lane> = (0..config.num_lanes)
            .map(|id| Lane::new(id, config.num_registers))
            .collect();

        let mut sms: Vec<StreamingMultiprocessor> =
            (0..config.num_sms).map(StreamingMultiprocessor::new).collect();

        let ids: Vec<usize> = (0..config.num_lanes).collect();
        for (warp_id, members) in ids.chunks(config.warp_size).enumerate() {
            let warp = Warp::new(warp_id, members.to_vec(), memory_size);
            sms[warp_id % config.num_sms].add_warp(warp);
        }

        Gpu {
            global_memory: vec![0.0; memory_size],
            sms,
            lanes,
            program,
            cycle_count: 0,
            trace: TraceBuffer::new(config.trace_capacity),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// One machine cycle: every SM advances each of its unfinished warps by
    /// one instruction.
    pub fn tick(
        &mut self,
        handlers: &HandlerTable,
        registries: &Registries,
    ) -> Result<(), EngineError> {
        let mut env = CycleEnv {
            lanes: &mut self.lanes,
            global_memory: &mut self.global_memory,
            program: &self.program,
            handlers,
            registries,
            trace: &mut self.trace,
            cycle: self.cycle_count,
            def_bounds: self.config.def_bounds,
            compare: self.config.compare,
        };
        for sm in self.sms.iter_mut() {
            sm.cycle(&mut env)?;
        }
        self.cycle_count += 1;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.sms.iter().all(|sm| sm.is_finished(&self.lanes))
    }

    /// All warps, ordered by warp id.
    pub fn warps(&self) -> Vec<&Warp> {
        let mut warps: Vec<&Warp> = self.sms.iter().flat_map(|sm| sm.warps.iter()).collect();
        warps.sort_by_key(|w| w.id);
        warps
    }

    pub fn warp(&self, id: usize) -> Option<&Warp> {
        self.sms
            .iter()
            .flat_map(|sm| sm.warps.iter())
            .find(|w| w.id == id)
    }

    /// The warp a lane belongs to.
    pub fn warp_of(&self, lane: usize) -> Option<&Warp> {
        self.sms
            .iter()
            .flat_map(|sm| sm.warps.iter())
            .find(|w| w.lanes.contains(&lane))
    }

    /// Zero every register and memory cell, rewind and reactivate every lane.
    pub fn reset(&mut self) {
        self.lanes.iter_mut().for_each(Lane::reset);
        self.global_memory.iter_mut().for_each(|c| *c = 0.0);
        for sm in self.sms.iter_mut() {
            sm.warps.iter_mut().for_each(Warp::clear_memory);
        }
        self.cycle_count = 0;
        self.trace.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warps_round_robin_across_sms() {
        let config = EngineConfig::default()
            .with_lanes(10)
            .with_warp_size(4)
            .with_sms(2);
        let gpu = Gpu::new(vec![], config);
        assert_eq!(gpu.sms[0].warps.len(), 2);
        assert_eq!(gpu.sms[1].warps.len(), 1);
        assert_eq!(gpu.warp(2).map(|w| w.lanes.clone()), Some(vec![8, 9]));
        assert_eq!(gpu.warp_of(5).map(|w| w.id), Some(1));
        assert_eq!(gpu.warps().len(), 3);
    }

    #[test]
    fn shared_memory_sized_to_global() {
        let gpu = Gpu::new(vec![], EngineConfig::default().with_lanes(6).with_warp_size(3));
        assert!(gpu.warps().iter().all(|w| w.shared_memory.len() == 6));
        assert_eq!(gpu.global_memory.len(), 6);
    }

    #[test]
    fn empty_program_finishes_after_one_tick() {
        let mut gpu = Gpu::new(vec![], EngineConfig::default());
        let handlers = HandlerTable::standard();
        let regs = Registries::new();
        gpu.tick(&handlers, &regs).unwrap();
        assert!(gpu.is_finished());
        assert_eq!(gpu.cycle_count, 1);
    }
}
