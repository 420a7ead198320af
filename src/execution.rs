//! Per-lane execution context and the evaluator.
//!
//! A handler sees exactly one lane, the shared memory of that lane's warp and
//! the GPU's global memory, bundled in an `ExecContext`. All reads and
//! writes go through `fetch` / `store_in_location`, which bounds-check the
//! resolved index against the tier it lands in.
use crate::config::{CompareSource, DefBoundsPolicy};
use crate::error::{ErrorCode, ExecResult, Fault};
use crate::instruction::{MemorySpace, Operand};
use crate::operand::{self, OperandInfo, OperandKind};
use crate::registry::Registries;
use crate::warp::Lane;

/// Arithmetic/move semantics applied by `eval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    /// `rhs` passthrough
    Mov,
    /// `-rhs`
    Neg,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mov => "=",
            ArithOp::Neg => "-",
        }
    }

    fn is_binary(self) -> bool {
        !matches!(self, ArithOp::Mov | ArithOp::Neg)
    }
}

pub struct ExecContext<'a> {
    pub lane: &'a mut Lane,
    pub shared_memory: &'a mut [f32],
    pub global_memory: &'a mut [f32],
    pub registries: &'a Registries,
    pub def_bounds: DefBoundsPolicy,
    pub compare: CompareSource,
    trace: Option<String>,
}

impl<'a> ExecContext<'a> {
    pub fn new(
        lane: &'a mut Lane,
        shared_memory: &'a mut [f32],
        global_memory: &'a mut [f32],
        registries: &'a Registries,
        def_bounds: DefBoundsPolicy,
    ) -> Self {
        ExecContext {
            lane,
            shared_memory,
            global_memory,
            registries,
            def_bounds,
            compare: CompareSource::default(),
            trace: None,
        }
    }

    pub fn with_compare(mut self, source: CompareSource) -> Self {
        self.compare = source;
        self
    }

    pub fn lane_id(&self) -> usize {
        self.lane.id
    }

    pub fn resolve(&self, op: &Operand) -> OperandInfo {
        operand::resolve(op, self.lane.id, &self.registries.variables)
    }

    /// Record the trace text for the instruction being executed.
    pub fn emit(&mut self, text: impl Into<String>) {
        self.trace = Some(text.into());
    }

    pub fn take_trace(&mut self) -> Option<String> {
        self.trace.take()
    }

    fn read_tier(&self, space: MemorySpace, index: usize) -> ExecResult<f32> {
        let value = match space {
            MemorySpace::Local => self
                .lane
                .registers
                .get(index)
                .ok_or(ErrorCode::InvalidMemorySpace)?,
            MemorySpace::Global => self
                .global_memory
                .get(index)
                .ok_or(ErrorCode::GlobalOutOfBounds { index })?,
            MemorySpace::Shared => self
                .shared_memory
                .get(index)
                .ok_or(ErrorCode::SharedOutOfBounds { index })?,
        };
        Ok(*value)
    }

    fn write_tier(&mut self, space: MemorySpace, index: usize, value: f32) -> ExecResult {
        let cell = match space {
            MemorySpace::Local => self
                .lane
                .registers
                .get_mut(index)
                .ok_or(ErrorCode::InvalidMemorySpace)?,
            MemorySpace::Global => self
                .global_memory
                .get_mut(index)
                .ok_or(ErrorCode::GlobalOutOfBounds { index })?,
            MemorySpace::Shared => self
                .shared_memory
                .get_mut(index)
                .ok_or(ErrorCode::SharedOutOfBounds { index })?,
        };
        *cell = value;
        Ok(())
    }

    /// Read the value an operand designates.
    ///
    /// Fetching an `Invalid` operand means a handler skipped its resolution
    /// check; that is reported as a `Fault`, not a lane error.
    pub fn fetch(&self, info: &OperandInfo) -> ExecResult<f32> {
        match info.kind {
            OperandKind::Constant => Ok(info.constant),
            OperandKind::Register => self.read_tier(MemorySpace::Local, info.index),
            OperandKind::Global => self.read_tier(MemorySpace::Global, info.index),
            OperandKind::Shared => self.read_tier(MemorySpace::Shared, info.index),
            OperandKind::Variable => match &info.variable {
                Some(var) => self.read_tier(var.location, var.offset),
                None => Err(Fault::InvalidOperandFetch.into()),
            },
            OperandKind::Invalid => Err(Fault::InvalidOperandFetch.into()),
        }
    }

    /// Fetch both sides and apply `op`. Unary ops only read `rhs`.
    pub fn eval(&self, lhs: &OperandInfo, rhs: &OperandInfo, op: ArithOp) -> ExecResult<f32> {
        let b = self.fetch(rhs)?;
        let a = if op.is_binary() { self.fetch(lhs)? } else { 0.0 };
        let result = match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => {
                if b == 0.0 {
                    return Err(ErrorCode::DivByZero.into());
                }
                a / b
            }
            ArithOp::Mov => b,
            ArithOp::Neg => -b,
        };
        Ok(result)
    }

    /// Write `value` to the tier `dst` designates.
    pub fn store_in_location(&mut self, dst: &OperandInfo, value: f32) -> ExecResult {
        match dst.kind {
            OperandKind::Register => self.write_tier(MemorySpace::Local, dst.index, value),
            OperandKind::Global => self.write_tier(MemorySpace::Global, dst.index, value),
            OperandKind::Shared => self.write_tier(MemorySpace::Shared, dst.index, value),
            OperandKind::Variable => match &dst.variable {
                Some(var) if !var.is_constant => self.write_tier(var.location, var.offset, value),
                _ => Err(ErrorCode::InvalidMemorySpace.into()),
            },
            OperandKind::Constant | OperandKind::Invalid => {
                Err(ErrorCode::InvalidMemorySpace.into())
            }
        }
    }

    /// Write into a storage tier directly (used by DEF).
    pub fn store_in_space(&mut self, space: MemorySpace, index: usize, value: f32) -> ExecResult {
        self.write_tier(space, index, value)
    }

    /// Capacity of a storage tier as seen by this lane.
    pub fn capacity(&self, space: MemorySpace) -> usize {
        match space {
            MemorySpace::Local => self.lane.registers.len(),
            MemorySpace::Global => self.global_memory.len(),
            MemorySpace::Shared => self.shared_memory.len(),
        }
    }
}
