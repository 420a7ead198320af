//! Streaming Multiprocessor (SM): the scheduling unit that owns a set of warps.
//! Each cycle every unfinished warp issues one instruction, dispatched to the
//! matching handler for each of its participating lanes.

use tracing::{debug, warn};

use crate::config::{CompareSource, DefBoundsPolicy};
use crate::error::{EngineError, ExecError};
use crate::execution::ExecContext;
use crate::handlers::{Handler, HandlerTable};
use crate::instruction::Instruction;
use crate::registry::Registries;
use crate::trace::{TraceBuffer, TraceLine};
use crate::warp::{Lane, Warp};

/// Everything outside the SM that one cycle reads or mutates.
pub struct CycleEnv<'a> {
    pub lanes: &'a mut [Lane],
    pub global_memory: &'a mut [f32],
    pub program: &'a [Instruction],
    pub handlers: &'a HandlerTable,
    pub registries: &'a Registries,
    pub trace: &'a mut TraceBuffer,
    pub cycle: u64,
    pub def_bounds: DefBoundsPolicy,
    pub compare: CompareSource,
}

pub struct StreamingMultiprocessor {
    pub id: usize,
    /// Fixed after construction
    pub warps: Vec<Warp>,
}

impl StreamingMultiprocessor {
    pub fn new(id: usize) -> Self {
        StreamingMultiprocessor {
            id,
            warps: Vec::new(),
        }
    }

    pub fn add_warp(&mut self, warp: Warp) {
        self.warps.push(warp);
    }

    pub fn is_finished(&self, lanes: &[Lane]) -> bool {
        self.warps.iter().all(|w| w.is_finished(lanes))
    }

    /// Advance every unfinished warp by one instruction.
    ///
    /// The warp's program counter is taken from its first active lane. Only
    /// active lanes sitting at that counter execute; lanes that branched
    /// elsewhere wait until the warp's counter reaches them.
    pub fn cycle(&mut self, env: &mut CycleEnv<'_>) -> Result<(), EngineError> {
        let sm_id = self.id;
        for warp in self.warps.iter_mut() {
            if warp.is_finished(env.lanes) {
                continue;
            }
            let Some(pc) = warp.shared_pc(env.lanes) else {
                continue;
            };
            if warp.is_diverged(env.lanes) {
                debug!(sm = sm_id, warp = warp.id, pc, "warp diverged; masking lanes off pc");
            }

            let Some(instr) = env.program.get(pc) else {
                retire_past_end(warp, pc, env.lanes);
                continue;
            };

            let handler = env.handlers.get(instr.opcode).map_err(|source| {
                let lane = warp
                    .lanes
                    .iter()
                    .map(|&idx| &env.lanes[idx])
                    .find(|l| l.active && l.pc == pc)
                    .map(|l| l.id)
                    .unwrap_or_default();
                EngineError::Fault {
                    sm: sm_id,
                    warp: warp.id,
                    lane,
                    pc,
                    source,
                }
            })?;

            execute(sm_id, warp, instr, pc, handler, env)?;
        }
        Ok(())
    }
}

/// Run `instr` for every participating lane of `warp`.
fn execute(
    sm_id: usize,
    warp: &mut Warp,
    instr: &Instruction,
    pc: usize,
    handler: Handler,
    env: &mut CycleEnv<'_>,
) -> Result<(), EngineError> {
    for &idx in &warp.lanes {
        let lane = &mut env.lanes[idx];
        if !lane.active || lane.pc != pc {
            continue;
        }
        let lane_id = lane.id;

        let mut ctx = ExecContext::new(
            lane,
            &mut warp.shared_memory,
            &mut *env.global_memory,
            env.registries,
            env.def_bounds,
        )
        .with_compare(env.compare);
        let result = handler(&mut ctx, instr);
        let emitted = ctx.take_trace();

        let mut line = TraceLine {
            cycle: env.cycle,
            sm: sm_id,
            warp: warp.id,
            lane: lane_id,
            pc,
            opcode: instr.opcode,
            text: emitted.unwrap_or_else(|| format!("[L{}] {}", lane_id, instr)),
            error: None,
        };

        match result {
            Ok(()) => {}
            Err(ExecError::Lane(code)) => {
                warn!(lane = lane_id, pc, opcode = %instr.opcode, error = %code, "instruction failed");
                line.error = Some(code.to_string());
            }
            Err(ExecError::Fault(source)) => {
                line.error = Some(source.to_string());
                env.trace.push(line);
                return Err(EngineError::Fault {
                    sm: sm_id,
                    warp: warp.id,
                    lane: lane_id,
                    pc,
                    source,
                });
            }
        }

        debug!(target: "warpsim::trace", "{}", line);
        env.trace.push(line);

        let lane = &mut env.lanes[idx];
        if lane.active {
            // JNZ leaves the counter one short of its label, possibly at usize::MAX.
            lane.pc = lane.pc.wrapping_add(1);
        }
    }
    Ok(())
}

/// Lanes whose counter runs past the last instruction stop as if halted.
fn retire_past_end(warp: &Warp, pc: usize, lanes: &mut [Lane]) {
    for &idx in &warp.lanes {
        let lane = &mut lanes[idx];
        if lane.active && lane.pc == pc {
            warn!(lane = lane.id, pc, "ran past end of program; halting lane");
            lane.active = false;
        }
    }
}
