//! Opcode handlers and the dispatch table.
//!
//! Every handler executes one instruction for one lane. Operands are resolved
//! and checked before any state is touched, so a handler that returns an
//! `ErrorCode` leaves registers and memory exactly as they were.
use tracing::warn;

use crate::config::{CompareSource, DefBoundsPolicy};
use crate::error::{ErrorCode, ExecResult, Fault};
use crate::execution::{ArithOp, ExecContext};
use crate::instruction::{Instruction, MemorySpace, Opcode, Operand};
use crate::operand::{OperandInfo, OperandKind};

pub type Handler = fn(&mut ExecContext<'_>, &Instruction) -> ExecResult;

/// Opcode → handler table. A slot left empty is a fatal fault when the
/// program reaches it.
#[derive(Clone)]
pub struct HandlerTable {
    slots: [Option<Handler>; Opcode::COUNT],
}

impl HandlerTable {
    pub fn empty() -> Self {
        HandlerTable {
            slots: [None; Opcode::COUNT],
        }
    }

    /// The full instruction set.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(Opcode::Add, add);
        table.register(Opcode::Sub, sub);
        table.register(Opcode::Mul, mul);
        table.register(Opcode::Div, div);
        table.register(Opcode::Neg, neg);
        table.register(Opcode::Mov, mov);
        table.register(Opcode::Ld, ld);
        table.register(Opcode::St, st);
        table.register(Opcode::Halt, halt);
        table.register(Opcode::Def, def);
        table.register(Opcode::Label, label);
        table.register(Opcode::CmpLt, cmp_lt);
        table.register(Opcode::Jnz, jnz);
        table
    }

    /// Install (or replace) the handler for `opcode`.
    pub fn register(&mut self, opcode: Opcode, handler: Handler) -> &mut Self {
        self.slots[opcode.index()] = Some(handler);
        self
    }

    pub fn unregister(&mut self, opcode: Opcode) -> &mut Self {
        self.slots[opcode.index()] = None;
        self
    }

    pub fn get(&self, opcode: Opcode) -> Result<Handler, Fault> {
        self.slots[opcode.index()].ok_or(Fault::MissingHandler { opcode })
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let installed: Vec<Opcode> = Opcode::ALL
            .iter()
            .copied()
            .filter(|op| self.slots[op.index()].is_some())
            .collect();
        f.debug_struct("HandlerTable").field("installed", &installed).finish()
    }
}

// ---------------------------------------------------------------------------
// Operand helpers
// ---------------------------------------------------------------------------

fn operand(instr: &Instruction, i: usize) -> Result<&Operand, ErrorCode> {
    instr.operand(i).ok_or(ErrorCode::InvalidMemorySpace)
}

fn name_operand(instr: &Instruction, i: usize) -> Result<&str, ErrorCode> {
    operand(instr, i)?.as_name().ok_or(ErrorCode::StringReq)
}

fn require_valid(infos: &[&OperandInfo]) -> Result<(), ErrorCode> {
    if infos.iter().all(|info| info.is_valid()) {
        Ok(())
    } else {
        Err(ErrorCode::InvalidMemorySpace)
    }
}

fn require_destination(dst: &OperandInfo) -> Result<(), ErrorCode> {
    match dst.kind {
        OperandKind::Constant | OperandKind::Invalid => Err(ErrorCode::InvalidMemorySpace),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

fn arith(ctx: &mut ExecContext<'_>, instr: &Instruction, op: ArithOp) -> ExecResult {
    let dst = ctx.resolve(operand(instr, 0)?);
    let lhs = ctx.resolve(operand(instr, 1)?);
    let rhs = ctx.resolve(operand(instr, 2)?);
    require_destination(&dst)?;
    require_valid(&[&lhs, &rhs])?;

    let result = ctx.eval(&lhs, &rhs, op)?;
    ctx.store_in_location(&dst, result)?;

    let text = format!(
        "[L{}] {} {} {} {} -> {} = {}",
        ctx.lane_id(),
        instr.opcode,
        lhs.describe(),
        op.symbol(),
        rhs.describe(),
        dst.describe(),
        result,
    );
    ctx.emit(text);
    Ok(())
}

pub fn add(ctx: &mut ExecContext<'_>, instr: &Instruction) -> ExecResult {
    arith(ctx, instr, ArithOp::Add)
}

pub fn sub(ctx: &mut ExecContext<'_>, instr: &Instruction) -> ExecResult {
    arith(ctx, instr, ArithOp::Sub)
}

pub fn mul(ctx: &mut ExecContext<'_>, instr: &Instruction) -> ExecResult {
    arith(ctx, instr, ArithOp::Mul)
}

pub fn div(ctx: &mut ExecContext<'_>, instr: &Instruction) -> ExecResult {
    arith(ctx, instr, ArithOp::Div)
}

/// `NEG dst, src`: dst = -src
pub fn neg(ctx: &mut ExecContext<'_>, instr: &Instruction) -> ExecResult {
    let dst = ctx.resolve(&Operand::Name(name_operand(instr, 0)?.to_string()));
    let src = ctx.resolve(&Operand::Name(name_operand(instr, 1)?.to_string()));
    require_destination(&dst)?;
    require_valid(&[&src])?;

    let result = ctx.eval(&dst, &src, ArithOp::Neg)?;
    ctx.store_in_location(&dst, result)?;

    let text = format!(
        "[L{}] NEG -{} -> {} = {}",
        ctx.lane_id(),
        src.describe(),
        dst.describe(),
        result
    );
    ctx.emit(text);
    Ok(())
}

/// `MOV dst, src` where src is a constant or any readable location
pub fn mov(ctx: &mut ExecContext<'_>, instr: &Instruction) -> ExecResult {
    let dst = ctx.resolve(operand(instr, 0)?);
    let src = ctx.resolve(operand(instr, 1)?);
    require_destination(&dst)?;
    require_valid(&[&src])?;

    let result = ctx.eval(&dst, &src, ArithOp::Mov)?;
    ctx.store_in_location(&dst, result)?;

    let text = format!(
        "[L{}] MOV {} -> {} = {}",
        ctx.lane_id(),
        src.describe(),
        dst.describe(),
        result
    );
    ctx.emit(text);
    Ok(())
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// `LD rD, gmN|smN` (N may be TIDX)
pub fn ld(ctx: &mut ExecContext<'_>, instr: &Instruction) -> ExecResult {
    let dst_name = name_operand(instr, 0)?;
    let src_name = name_operand(instr, 1)?;
    let dst = ctx.resolve(&Operand::Name(dst_name.to_string()));
    let src = ctx.resolve(&Operand::Name(src_name.to_string()));

    if dst.kind != OperandKind::Register {
        return Err(ErrorCode::InvalidMemorySpace.into());
    }
    if !matches!(src.kind, OperandKind::Global | OperandKind::Shared) {
        return Err(ErrorCode::InvalidMemorySpace.into());
    }

    let value = ctx.fetch(&src)?;
    ctx.store_in_location(&dst, value)?;

    let text = format!(
        "[L{}] LD {} <- {} = {}",
        ctx.lane_id(),
        dst.describe(),
        src.describe(),
        value
    );
    ctx.emit(text);
    Ok(())
}

/// `ST gm|sm, rS`: the cell at the lane's own index in the named tier
pub fn st(ctx: &mut ExecContext<'_>, instr: &Instruction) -> ExecResult {
    let dst_name = name_operand(instr, 0)?;
    let src_name = name_operand(instr, 1)?;
    let dst = ctx.resolve(&Operand::Name(dst_name.to_string()));
    let src = ctx.resolve(&Operand::Name(src_name.to_string()));

    if !matches!(dst.kind, OperandKind::Global | OperandKind::Shared) {
        return Err(ErrorCode::InvalidMemorySpace.into());
    }
    if src.kind != OperandKind::Register {
        return Err(ErrorCode::InvalidMemorySpace.into());
    }

    let cell = OperandInfo::location(dst.kind, ctx.lane_id());
    let value = ctx.fetch(&src)?;
    ctx.store_in_location(&cell, value)?;

    let text = format!(
        "[L{}] ST {} -> {} = {}",
        ctx.lane_id(),
        src.describe(),
        cell.describe(),
        value
    );
    ctx.emit(text);
    Ok(())
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

pub fn halt(ctx: &mut ExecContext<'_>, _instr: &Instruction) -> ExecResult {
    ctx.lane.active = false;
    let text = format!("[L{}] HALT", ctx.lane_id());
    ctx.emit(text);
    Ok(())
}

/// `DEF var`: declare a variable for this lane and write its initial value.
///
/// An offset outside the declared tier is either skipped with a warning or
/// reported, depending on `DefBoundsPolicy`.
pub fn def(ctx: &mut ExecContext<'_>, instr: &Instruction) -> ExecResult {
    let mut var = match operand(instr, 0)? {
        Operand::Var(v) => v.clone(),
        _ => return Err(ErrorCode::InvalidMemorySpace.into()),
    };
    let lane = ctx.lane_id();
    if var.is_lane_relative {
        var.offset = lane;
    }

    if var.offset >= ctx.capacity(var.location) {
        let err = match var.location {
            MemorySpace::Global => ErrorCode::GlobalOutOfBounds { index: var.offset },
            MemorySpace::Shared => ErrorCode::SharedOutOfBounds { index: var.offset },
            MemorySpace::Local => ErrorCode::InvalidMemorySpace,
        };
        return match ctx.def_bounds {
            DefBoundsPolicy::Report => Err(err.into()),
            DefBoundsPolicy::Skip => {
                warn!(lane, variable = %var.name, error = %err, "DEF skipped");
                let text = format!("[L{}] DEF {} skipped: {}", lane, var.name, err);
                ctx.emit(text);
                Ok(())
            }
        };
    }

    ctx.store_in_space(var.location, var.offset, var.value)?;
    let text = format!(
        "[L{}] DEF {} = {} @ {}[{}]",
        lane, var.name, var.value, var.location, var.offset
    );
    ctx.registries.variables.define(var, lane);
    ctx.emit(text);
    Ok(())
}

/// `LABEL name, offset`
pub fn label(ctx: &mut ExecContext<'_>, instr: &Instruction) -> ExecResult {
    let name = name_operand(instr, 0)?;
    let offset = match operand(instr, 1)? {
        Operand::Const(v) if *v >= 0.0 && v.fract() == 0.0 => *v as usize,
        _ => return Err(ErrorCode::InvalidMemorySpace.into()),
    };
    ctx.registries.labels.define(name, offset);
    let text = format!("[L{}] LABEL {} = {}", ctx.lane_id(), name, offset);
    ctx.emit(text);
    Ok(())
}

/// `CMP_LT a, b`: predicate = a < b.
///
/// Under `CompareSource::Declared` the values are the ones DEF recorded;
/// under `CompareSource::Live` they are read from each variable's cell.
pub fn cmp_lt(ctx: &mut ExecContext<'_>, instr: &Instruction) -> ExecResult {
    let lane = ctx.lane_id();
    let mut values = [0.0f32; 2];
    for (i, slot) in values.iter_mut().enumerate() {
        let name = name_operand(instr, i)?;
        let var = ctx
            .registries
            .variables
            .lookup(name, lane)
            .ok_or_else(|| ErrorCode::VarNotFound { name: name.to_string() })?;
        *slot = match ctx.compare {
            CompareSource::Declared => var.value,
            CompareSource::Live => ctx.fetch(&OperandInfo::variable(var))?,
        };
    }

    ctx.lane.predicate = values[0] < values[1];
    let text = format!(
        "[L{}] CMP_LT {} < {} -> {}",
        lane, values[0], values[1], ctx.lane.predicate
    );
    ctx.emit(text);
    Ok(())
}

/// `JNZ label`: when the predicate is set, move this lane to the label.
///
/// The counter is set one short of the target; the per-cycle advance
/// lands it on the label itself. The label is only resolved when the jump
/// is taken.
pub fn jnz(ctx: &mut ExecContext<'_>, instr: &Instruction) -> ExecResult {
    let name = name_operand(instr, 0)?;

    let text = if ctx.lane.predicate {
        let target = ctx
            .registries
            .labels
            .lookup(name)
            .ok_or_else(|| Fault::UndefinedLabel { name: name.to_string() })?;
        ctx.lane.pc = target.wrapping_sub(1);
        format!("[L{}] JNZ {} taken -> {}", ctx.lane_id(), name, target)
    } else {
        format!("[L{}] JNZ {} not taken", ctx.lane_id(), name)
    };
    ctx.emit(text);
    Ok(())
}
