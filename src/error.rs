//! Error taxonomy.
//!
//! Two levels: `ErrorCode` is scoped to one lane executing one instruction and
//! is recovered locally by the SM (logged, effect abandoned, lane advances).
//! `Fault` is an engine defect that stops the run. `EngineError` is what the
//! public `Engine` API returns.
use thiserror::Error;

use crate::instruction::Opcode;

/// Lane-level failure of a single instruction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ErrorCode {
    #[error("global memory index {index} out of bounds")]
    GlobalOutOfBounds { index: usize },

    #[error("shared memory index {index} out of bounds")]
    SharedOutOfBounds { index: usize },

    #[error("invalid memory space")]
    InvalidMemorySpace,

    #[error("division by zero")]
    DivByZero,

    #[error("operand must be a symbolic name")]
    StringReq,

    #[error("variable '{name}' not declared for this lane")]
    VarNotFound { name: String },
}

/// Internal invariant violations. These are not user errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Fault {
    #[error("fetch of an unresolved operand")]
    InvalidOperandFetch,

    #[error("jump to undefined label '{name}'")]
    UndefinedLabel { name: String },

    #[error("no handler registered for {opcode}")]
    MissingHandler { opcode: Opcode },
}

/// Result of executing one instruction for one lane.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    #[error(transparent)]
    Lane(#[from] ErrorCode),

    #[error(transparent)]
    Fault(#[from] Fault),
}

pub type ExecResult<T = ()> = std::result::Result<T, ExecError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("run already finished; reset the engine first")]
    AlreadyFinished,

    #[error("engine state cannot be modified while running")]
    Busy,

    #[error("lane {0} does not exist")]
    LaneOutOfRange(usize),

    #[error("fault in sm{sm}/warp{warp} lane {lane} at pc {pc}: {source}")]
    Fault {
        sm: usize,
        warp: usize,
        lane: usize,
        pc: usize,
        #[source]
        source: Fault,
    },

    #[error("background run thread panicked")]
    WorkerPanicked,

    #[error("failed to spawn background run thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
