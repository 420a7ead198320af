//! Built-in demo programs shared by the binaries and tests.
use crate::config::CompareSource;
use crate::instruction::{Instruction, MemorySpace, Opcode, Variable, imm, sym};

/// Each lane loads its global cell, adds `addend` and stores the sum back.
///
/// Seed global memory before running; afterwards `gm[i] == seed[i] + addend`.
pub fn vector_add(addend: f32) -> Vec<Instruction> {
    vec![
        Instruction::new(Opcode::Ld, [sym("r0"), sym("gmTIDX")]),
        Instruction::new(Opcode::Mov, [sym("r1"), imm(addend)]),
        Instruction::new(Opcode::Add, [sym("r2"), sym("r0"), sym("r1")]),
        Instruction::new(Opcode::St, [sym("gmTIDX"), sym("r2")]),
        Instruction::halt(),
    ]
}

/// Counts a register-backed variable `i` from 0 up to `limit` with a
/// CMP_LT / JNZ back-edge. Leaves `limit` in `r0` of every lane.
///
/// The loop only terminates under `CompareSource::Live`; with declared
/// values CMP_LT keeps seeing `i == 0` and the run hits the cycle bound.
pub fn counted_loop(limit: f32) -> Vec<Instruction> {
    vec![
        Instruction::def(Variable::new("i", 0.0, MemorySpace::Local).at(0)),
        Instruction::def(Variable::new("n", limit, MemorySpace::Local).at(1).constant()),
        Instruction::label("loop", 3),
        Instruction::new(Opcode::Add, [sym("i"), sym("i"), imm(1.0)]),
        Instruction::new(Opcode::CmpLt, [sym("i"), sym("n")]),
        Instruction::new(Opcode::Jnz, [sym("loop")]),
        Instruction::halt(),
    ]
}

/// Each lane accumulates `scale` into its own shared-memory slot through a
/// lane-relative variable, reads the slot back and stores twice its value
/// to global memory. Afterwards `sm[i] == scale` and `gm[i] == 2 * scale`.
pub fn shared_scratch(scale: f32) -> Vec<Instruction> {
    vec![
        Instruction::def(Variable::new("slot", 0.0, MemorySpace::Shared).lane_relative()),
        Instruction::new(Opcode::Mov, [sym("r0"), imm(scale)]),
        Instruction::new(Opcode::Add, [sym("slot"), sym("slot"), sym("r0")]),
        Instruction::new(Opcode::Ld, [sym("r2"), sym("smTIDX")]),
        Instruction::new(Opcode::Mul, [sym("r3"), sym("r2"), imm(2.0)]),
        Instruction::new(Opcode::St, [sym("gmTIDX"), sym("r3")]),
        Instruction::halt(),
    ]
}

/// Never halts; used to exercise the cycle bound.
pub fn spin() -> Vec<Instruction> {
    vec![
        Instruction::label("top", 1),
        Instruction::new(Opcode::Mov, [sym("r0"), imm(1.0)]),
        Instruction::def(Variable::new("a", 0.0, MemorySpace::Local).at(2)),
        Instruction::def(Variable::new("b", 1.0, MemorySpace::Local).at(3)),
        Instruction::new(Opcode::CmpLt, [sym("a"), sym("b")]),
        Instruction::new(Opcode::Jnz, [sym("top")]),
    ]
}

/// Program names understood by the binaries.
pub const NAMES: [&str; 3] = ["vector-add", "counted-loop", "shared-scratch"];

pub fn by_name(name: &str) -> Option<Vec<Instruction>> {
    match name {
        "vector-add" => Some(vector_add(3.0)),
        "counted-loop" => Some(counted_loop(5.0)),
        "shared-scratch" => Some(shared_scratch(1.5)),
        _ => None,
    }
}

/// Comparison source a named program needs to behave as documented.
pub fn compare_source(name: &str) -> CompareSource {
    match name {
        "counted-loop" => CompareSource::Live,
        _ => CompareSource::Declared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_name_resolves() {
        for name in NAMES {
            assert!(by_name(name).is_some(), "{name}");
        }
        assert!(by_name("nope").is_none());
        assert_eq!(compare_source("counted-loop"), CompareSource::Live);
        assert_eq!(compare_source("vector-add"), CompareSource::Declared);
    }

    #[test]
    fn loop_label_points_at_the_body() {
        let program = counted_loop(4.0);
        assert_eq!(program[3].opcode, Opcode::Add);
        assert_eq!(program[2].operand(1), Some(&imm(3.0)));
    }
}
