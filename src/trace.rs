//! Execution trace.
//!
//! One line per executed instruction per lane. The text is for humans; only
//! the occurrence of a line per execution is relied upon.
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::instruction::Opcode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceLine {
    pub cycle: u64,
    pub sm: usize,
    pub warp: usize,
    pub lane: usize,
    pub pc: usize,
    pub opcode: Opcode,
    pub text: String,
    /// Error message when the instruction failed for this lane
    pub error: Option<String>,
}

impl std::fmt::Display for TraceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:<4} pc={:<3} {}", self.cycle, self.pc, self.text)?;
        if let Some(err) = &self.error {
            write!(f, "  !! {}", err)?;
        }
        Ok(())
    }
}

/// Bounded scrollback; the oldest lines are dropped first.
#[derive(Debug, Clone)]
pub struct TraceBuffer {
    lines: VecDeque<TraceLine>,
    capacity: usize,
    /// Lines recorded since creation (or the last clear), including evicted ones
    total: u64,
}

impl TraceBuffer {
    pub fn new(capacity: usize) -> Self {
        TraceBuffer {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            total: 0,
        }
    }

    pub fn push(&mut self, line: TraceLine) {
        self.total += 1;
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn lines(&self) -> impl Iterator<Item = &TraceLine> {
        self.lines.iter()
    }

    pub fn drain(&mut self) -> Vec<TraceLine> {
        self.lines.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.total = 0;
    }
}
