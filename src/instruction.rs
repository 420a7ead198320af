//! Instruction model.
//!
//! A program is a literal `Vec<Instruction>` built in-process. Operands are
//! immutable once the program is loaded into an engine.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Mov,
    Ld,
    St,
    Halt,
    Def,
    Label,
    CmpLt,
    Jnz,
}

impl Opcode {
    pub const COUNT: usize = 13;

    pub const ALL: [Opcode; Opcode::COUNT] = [
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Neg,
        Opcode::Mov,
        Opcode::Ld,
        Opcode::St,
        Opcode::Halt,
        Opcode::Def,
        Opcode::Label,
        Opcode::CmpLt,
        Opcode::Jnz,
    ];

    /// Slot in the dispatch table.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Neg => "NEG",
            Opcode::Mov => "MOV",
            Opcode::Ld => "LD",
            Opcode::St => "ST",
            Opcode::Halt => "HALT",
            Opcode::Def => "DEF",
            Opcode::Label => "LABEL",
            Opcode::CmpLt => "CMP_LT",
            Opcode::Jnz => "JNZ",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Storage tier of a declared variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemorySpace {
    Global,
    Shared,
    /// The lane's own register file
    Local,
}

impl std::fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemorySpace::Global => write!(f, "global"),
            MemorySpace::Shared => write!(f, "shared"),
            MemorySpace::Local => write!(f, "local"),
        }
    }
}

/// A named, lane-scoped symbolic value declared by DEF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    /// Initial value written into the storage tier at declaration
    pub value: f32,
    /// Cell (or register) index inside `location`
    pub offset: usize,
    pub is_constant: bool,
    /// When set, `offset` is replaced by the declaring lane's id
    pub is_lane_relative: bool,
    pub location: MemorySpace,
}

impl Variable {
    pub fn new(name: &str, value: f32, location: MemorySpace) -> Self {
        Variable {
            name: name.to_string(),
            value,
            offset: 0,
            is_constant: false,
            is_lane_relative: false,
            location,
        }
    }

    pub fn at(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn lane_relative(mut self) -> Self {
        self.is_lane_relative = true;
        self
    }

    pub fn constant(mut self) -> Self {
        self.is_constant = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Const(f32),
    /// `rN`, `gmN`, `smN` (N may be `TIDX`) or a variable/label name
    Name(String),
    Var(Variable),
    Space(MemorySpace),
}

impl Operand {
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Operand::Name(s) => Some(s),
            _ => None,
        }
    }
}

/// Immediate constant operand.
pub fn imm(v: f32) -> Operand {
    Operand::Const(v)
}

/// Symbolic operand: a register, memory cell, variable or label name.
pub fn sym(s: &str) -> Operand {
    Operand::Name(s.to_string())
}

impl From<f32> for Operand {
    fn from(v: f32) -> Self {
        Operand::Const(v)
    }
}

impl From<&str> for Operand {
    fn from(s: &str) -> Self {
        Operand::Name(s.to_string())
    }
}

impl From<String> for Operand {
    fn from(s: String) -> Self {
        Operand::Name(s)
    }
}

impl From<Variable> for Operand {
    fn from(v: Variable) -> Self {
        Operand::Var(v)
    }
}

impl From<MemorySpace> for Operand {
    fn from(m: MemorySpace) -> Self {
        Operand::Space(m)
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Const(v) => write!(f, "{}", v),
            Operand::Name(s) => f.write_str(s),
            Operand::Var(v) => write!(f, "{}@{}[{}]", v.name, v.location, v.offset),
            Operand::Space(m) => write!(f, "{}", m),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new<I>(opcode: Opcode, operands: I) -> Self
    where
        I: IntoIterator<Item = Operand>,
    {
        Instruction {
            opcode,
            operands: operands.into_iter().collect(),
        }
    }

    pub fn halt() -> Self {
        Instruction::new(Opcode::Halt, [])
    }

    pub fn def(var: Variable) -> Self {
        Instruction::new(Opcode::Def, [Operand::Var(var)])
    }

    pub fn label(name: &str, offset: usize) -> Self {
        Instruction::new(Opcode::Label, [sym(name), imm(offset as f32)])
    }

    pub fn operand(&self, i: usize) -> Option<&Operand> {
        self.operands.get(i)
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, op) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{}", sep, op)?;
        }
        Ok(())
    }
}
