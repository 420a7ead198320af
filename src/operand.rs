//! Operand resolution.
//!
//! Maps a raw operand to a location descriptor for the requesting lane.
//! Resolution never fails loudly: anything it cannot place comes back as
//! `OperandKind::Invalid` and the handler turns that into an `ErrorCode`
//! before touching any state.
use crate::instruction::{Operand, Variable};
use crate::registry::VariableRegistry;

pub const REGISTER_PREFIX: &str = "r";
pub const GLOBAL_PREFIX: &str = "gm";
pub const SHARED_PREFIX: &str = "sm";
/// Index suffix meaning "the requesting lane's own id"
pub const TIDX: &str = "TIDX";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Constant,
    Register,
    Global,
    Shared,
    Variable,
    Invalid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperandInfo {
    pub kind: OperandKind,
    pub constant: f32,
    pub index: usize,
    /// Present only for `OperandKind::Variable`
    pub variable: Option<Variable>,
}

impl OperandInfo {
    pub fn constant(value: f32) -> Self {
        OperandInfo {
            kind: OperandKind::Constant,
            constant: value,
            index: 0,
            variable: None,
        }
    }

    pub fn location(kind: OperandKind, index: usize) -> Self {
        OperandInfo {
            kind,
            constant: 0.0,
            index,
            variable: None,
        }
    }

    pub fn variable(var: Variable) -> Self {
        OperandInfo {
            kind: OperandKind::Variable,
            constant: var.value,
            index: var.offset,
            variable: Some(var),
        }
    }

    pub fn invalid() -> Self {
        OperandInfo {
            kind: OperandKind::Invalid,
            constant: 0.0,
            index: 0,
            variable: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.kind != OperandKind::Invalid
    }

    /// Short human-readable form for trace lines.
    pub fn describe(&self) -> String {
        match self.kind {
            OperandKind::Constant => format!("{}", self.constant),
            OperandKind::Register => format!("r{}", self.index),
            OperandKind::Global => format!("gm[{}]", self.index),
            OperandKind::Shared => format!("sm[{}]", self.index),
            OperandKind::Variable => self
                .variable
                .as_ref()
                .map(|v| v.name.clone())
                .unwrap_or_default(),
            OperandKind::Invalid => "<invalid>".to_string(),
        }
    }
}

/// Parse the index after a prefix: decimal digits, or `TIDX` for the lane id.
fn parse_index(suffix: &str, lane: usize) -> Option<usize> {
    if suffix == TIDX {
        return Some(lane);
    }
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Resolve a symbolic location name (`rN`, `gmN`, `smN`) without consulting
/// the variable registry.
pub fn resolve_location(name: &str, lane: usize) -> Option<OperandInfo> {
    // Two-letter prefixes first so `sm0` is never read as a register.
    let prefixes = [
        (GLOBAL_PREFIX, OperandKind::Global),
        (SHARED_PREFIX, OperandKind::Shared),
        (REGISTER_PREFIX, OperandKind::Register),
    ];
    prefixes.iter().find_map(|(prefix, kind)| {
        let suffix = name.strip_prefix(prefix)?;
        parse_index(suffix, lane).map(|index| OperandInfo::location(*kind, index))
    })
}

/// Resolve `operand` on behalf of lane `lane`.
pub fn resolve(operand: &Operand, lane: usize, vars: &VariableRegistry) -> OperandInfo {
    match operand {
        Operand::Const(v) => OperandInfo::constant(*v),
        Operand::Name(name) => resolve_location(name, lane)
            .or_else(|| vars.lookup(name, lane).map(OperandInfo::variable))
            .unwrap_or_else(OperandInfo::invalid),
        Operand::Var(_) | Operand::Space(_) => OperandInfo::invalid(),
    }
}
