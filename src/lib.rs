pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod gpu;
pub mod handlers;
pub mod instruction;
pub mod operand;
pub mod programs;
pub mod registry;
pub mod sm;
pub mod snapshot;
pub mod trace;
pub mod warp;

pub use config::{CompareSource, DefBoundsPolicy, EngineConfig};
pub use engine::{Engine, RunOutcome, RunReport};
pub use error::{EngineError, ErrorCode, ExecError, Fault};
pub use instruction::{Instruction, MemorySpace, Opcode, Operand, Variable, imm, sym};
pub use snapshot::{EngineSnapshot, RunState};
