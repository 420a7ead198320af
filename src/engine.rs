//! Simulation engine.
//! Owns the GPU state behind one lock, the session's symbol registries and
//! the dispatch table, and drives the cycle loop either on the caller's
//! thread (`run`) or on a background thread (`start` / `stop` / `wait`).

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::gpu::Gpu;
use crate::handlers::HandlerTable;
use crate::instruction::Instruction;
use crate::registry::Registries;
use crate::snapshot::{EngineSnapshot, RunState, VariableView, variable_views};
use crate::trace::TraceLine;
use crate::warp::Lane;

/// How a run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every warp finished
    Completed,
    /// The cycle bound was hit first
    TimedOut,
    /// `stop` was requested; the run can be resumed
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub cycles: u64,
    pub outcome: RunOutcome,
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag checked at every cycle boundary. The
/// inter-cycle delay waits on it so a stop request cuts the delay short.
#[derive(Debug, Default)]
struct CancelToken {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancelToken {
    fn cancel(&self) {
        *self.cancelled.lock() = true;
        self.signal.notify_all();
    }

    fn clear(&self) {
        *self.cancelled.lock() = false;
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Sleep for `delay` unless cancelled first. Returns whether cancelled.
    fn sleep(&self, delay: Duration) -> bool {
        let mut cancelled = self.cancelled.lock();
        if !*cancelled {
            let _ = self.signal.wait_for(&mut cancelled, delay);
        }
        *cancelled
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared {
    gpu: Mutex<Gpu>,
    /// Locked independently of `gpu`; only ever taken while `gpu` is held or
    /// on its own, never the other way round.
    registries: Registries,
    handlers: HandlerTable,
    state: Mutex<RunState>,
    cancel: CancelToken,
}

impl Shared {
    fn set_state(&self, state: RunState) {
        *self.state.lock() = state;
    }

    /// Transition Idle → Running.
    fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            RunState::Running => Err(EngineError::AlreadyRunning),
            RunState::Finished => Err(EngineError::AlreadyFinished),
            RunState::Idle => {
                *state = RunState::Running;
                self.cancel.clear();
                Ok(())
            }
        }
    }
}

/// The cycle loop shared by both execution modes.
fn drive(shared: &Shared) -> Result<RunReport> {
    let (max_cycles, delay) = {
        let gpu = shared.gpu.lock();
        info!(
            lanes = gpu.lanes.len(),
            warps = gpu.warps().len(),
            instructions = gpu.program.len(),
            resume_at = gpu.cycle_count,
            "simulation starting"
        );
        (gpu.config().max_cycles, gpu.config().cycle_delay)
    };

    // Run state only changes while the gpu lock is held.
    let (result, cycles) = loop {
        if shared.cancel.is_cancelled() {
            let gpu = shared.gpu.lock();
            shared.set_state(RunState::Idle);
            break (Ok(RunOutcome::Cancelled), gpu.cycle_count);
        }
        {
            let mut gpu = shared.gpu.lock();
            let step = match gpu.tick(&shared.handlers, &shared.registries) {
                Err(e) => Some(Err(e)),
                Ok(()) if gpu.is_finished() => Some(Ok(RunOutcome::Completed)),
                Ok(()) if gpu.cycle_count >= max_cycles => {
                    warn!(cycles = gpu.cycle_count, "simulation timed out");
                    Some(Ok(RunOutcome::TimedOut))
                }
                Ok(()) => None,
            };
            if let Some(result) = step {
                shared.set_state(RunState::Finished);
                break (result, gpu.cycle_count);
            }
        }
        if !delay.is_zero() && shared.cancel.sleep(delay) {
            let gpu = shared.gpu.lock();
            shared.set_state(RunState::Idle);
            break (Ok(RunOutcome::Cancelled), gpu.cycle_count);
        }
    };

    match result {
        Ok(outcome) => {
            info!(cycles, ?outcome, "simulation finished");
            Ok(RunReport { cycles, outcome })
        }
        Err(e) => {
            warn!(cycles, error = %e, "simulation aborted");
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<Result<RunReport>>>,
}

impl Engine {
    /// Build an engine with the compiled-in machine shape.
    pub fn new(program: Vec<Instruction>) -> Self {
        Self::build(program, EngineConfig::default(), HandlerTable::standard())
    }

    pub fn with_config(program: Vec<Instruction>, config: EngineConfig) -> Result<Self> {
        Self::with_handlers(program, config, HandlerTable::standard())
    }

    /// Build with a custom dispatch table.
    pub fn with_handlers(
        program: Vec<Instruction>,
        config: EngineConfig,
        handlers: HandlerTable,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(program, config, handlers))
    }

    fn build(program: Vec<Instruction>, config: EngineConfig, handlers: HandlerTable) -> Self {
        let shared = Shared {
            gpu: Mutex::new(Gpu::new(program, config)),
            registries: Registries::new(),
            handlers,
            state: Mutex::new(RunState::Idle),
            cancel: CancelToken::default(),
        };
        Engine {
            shared: Arc::new(shared),
            worker: None,
        }
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    /// Run the cycle loop on this thread until every warp finishes, the
    /// cycle bound is hit, or a fault aborts the run.
    pub fn run(&mut self) -> Result<RunReport> {
        self.shared.begin()?;
        drive(&self.shared)
    }

    /// Launch the cycle loop on a background thread and return immediately.
    pub fn start(&mut self) -> Result<()> {
        self.shared.begin()?;
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("warpsim-run".to_string())
            .spawn(move || drive(&shared));
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(RunState::Idle);
                Err(EngineError::Spawn(e))
            }
        }
    }

    /// Request cancellation and block until the background loop has exited.
    /// Returns the loop's report, or `None` if nothing was running.
    pub fn stop(&mut self) -> Result<Option<RunReport>> {
        if self.worker.is_none() {
            return Ok(None);
        }
        self.shared.cancel.cancel();
        self.join()
    }

    /// Block until the background loop ends on its own.
    pub fn wait(&mut self) -> Result<Option<RunReport>> {
        self.join()
    }

    fn join(&mut self) -> Result<Option<RunReport>> {
        let Some(handle) = self.worker.take() else {
            return Ok(None);
        };
        match handle.join() {
            Ok(result) => result.map(Some),
            Err(_) => {
                self.shared.set_state(RunState::Finished);
                Err(EngineError::WorkerPanicked)
            }
        }
    }

    /// Zero every register and memory tier and reactivate every lane.
    /// Variable and label registries are left untouched; see
    /// `clear_registries`.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_stopped()?;
        if let Some(handle) = self.worker.take() {
            // Already past its last cycle; collect it.
            if let Ok(Err(e)) = handle.join() {
                warn!(error = %e, "discarding result of finished background run");
            }
        }
        self.shared.gpu.lock().reset();
        self.shared.cancel.clear();
        self.shared.set_state(RunState::Idle);
        Ok(())
    }

    /// Forget every declared variable and label of this session.
    pub fn clear_registries(&self) -> Result<()> {
        self.ensure_stopped()?;
        self.shared.registries.clear();
        Ok(())
    }

    fn ensure_stopped(&self) -> Result<()> {
        if self.state() == RunState::Running {
            Err(EngineError::Busy)
        } else {
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Pre-run mutation
    // -----------------------------------------------------------------------

    /// Direct write access to global memory, e.g. to seed inputs.
    pub fn global_memory_mut(&self) -> Result<MappedMutexGuard<'_, [f32]>> {
        self.ensure_stopped()?;
        Ok(MutexGuard::map(self.shared.gpu.lock(), |gpu| {
            gpu.global_memory.as_mut_slice()
        }))
    }

    /// Direct access to one lane's state, e.g. to seed registers.
    pub fn lane_mut(&self, lane: usize) -> Result<MappedMutexGuard<'_, Lane>> {
        self.ensure_stopped()?;
        let gpu = self.shared.gpu.lock();
        if lane >= gpu.lanes.len() {
            return Err(EngineError::LaneOutOfRange(lane));
        }
        Ok(MutexGuard::map(gpu, |gpu| &mut gpu.lanes[lane]))
    }

    // -----------------------------------------------------------------------
    // Inspection (all under the engine lock)
    // -----------------------------------------------------------------------

    pub fn state(&self) -> RunState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    pub fn config(&self) -> EngineConfig {
        self.shared.gpu.lock().config().clone()
    }

    pub fn cycle_count(&self) -> u64 {
        self.shared.gpu.lock().cycle_count
    }

    pub fn global_memory_snapshot(&self) -> Vec<f32> {
        self.shared.gpu.lock().global_memory.clone()
    }

    /// Shared memory of the warp with id `warp`.
    pub fn shared_memory_snapshot(&self, warp: usize) -> Option<Vec<f32>> {
        self.shared
            .gpu
            .lock()
            .warp(warp)
            .map(|w| w.shared_memory.clone())
    }

    pub fn num_warps(&self) -> usize {
        self.shared.gpu.lock().warps().len()
    }

    /// Lane ids of each warp, ordered by warp id.
    pub fn warp_lanes(&self) -> Vec<Vec<usize>> {
        self.shared
            .gpu
            .lock()
            .warps()
            .into_iter()
            .map(|w| w.lanes.clone())
            .collect()
    }

    pub fn lane(&self, lane: usize) -> Option<Lane> {
        self.shared.gpu.lock().lanes.get(lane).cloned()
    }

    pub fn lanes(&self) -> Vec<Lane> {
        self.shared.gpu.lock().lanes.clone()
    }

    pub fn program(&self) -> Vec<Instruction> {
        self.shared.gpu.lock().program.clone()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let gpu = self.shared.gpu.lock();
        let state = self.state();
        EngineSnapshot::capture(&gpu, &self.shared.registries, state)
    }

    pub fn variables(&self) -> Vec<VariableView> {
        let gpu = self.shared.gpu.lock();
        variable_views(&gpu, &self.shared.registries)
    }

    pub fn label(&self, name: &str) -> Option<usize> {
        self.shared.registries.labels.lookup(name)
    }

    /// Retained trace lines, oldest first.
    pub fn trace(&self) -> Vec<TraceLine> {
        self.shared.gpu.lock().trace.lines().cloned().collect()
    }

    /// Take the retained trace lines, leaving the buffer empty.
    pub fn drain_trace(&self) -> Vec<TraceLine> {
        self.shared.gpu.lock().trace.drain()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.shared.cancel.cancel();
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Opcode, imm, sym};

    #[test]
    fn cancel_token_cuts_sleep_short() {
        let token = CancelToken::default();
        assert!(!token.sleep(Duration::from_millis(1)));
        token.cancel();
        assert!(token.sleep(Duration::from_secs(60)));
        token.clear();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn run_twice_needs_reset() {
        let mut engine = Engine::new(vec![Instruction::halt()]);
        let report = engine.run().unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert!(matches!(engine.run(), Err(EngineError::AlreadyFinished)));
        engine.reset().unwrap();
        assert!(engine.run().is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig::default().with_warp_size(0);
        assert!(matches!(
            Engine::with_config(vec![], config),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn lane_mut_checks_range() {
        let engine = Engine::new(vec![]);
        assert!(matches!(engine.lane_mut(99), Err(EngineError::LaneOutOfRange(99))));
        engine.lane_mut(0).unwrap().registers[1] = 4.0;
        assert_eq!(engine.lane(0).map(|l| l.registers[1]), Some(4.0));
    }

    #[test]
    fn stop_without_worker_is_none() {
        let mut engine = Engine::new(vec![Instruction::new(Opcode::Mov, [sym("r0"), imm(1.0)])]);
        assert!(engine.stop().unwrap().is_none());
        assert!(engine.wait().unwrap().is_none());
    }
}
