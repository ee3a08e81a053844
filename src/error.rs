//! Runtime error taxonomy (spec §7 "Runtime").
//!
//! Unlike [`sachin_compiler::error::ErrorReporter`](../sachin_compiler/error/index.html),
//! which accumulates compile-time diagnostics, a runtime error is fatal: the
//! node that raises it stops immediately and the whole program is cancelled
//! (spec §4.7 "Cancellation").

use std::fmt;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum RuntimeError {
    DivisionByZero,
    NegativeExponent,
    IndexOutOfBounds { index: i32, upper_bound: i32 },
    InvalidAddress,
    MalformedInput,
    ChannelNotOpen,
    Deadlock,
    Cancelled,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RuntimeError::DivisionByZero => write!(f, "division or modulo by zero"),
            RuntimeError::NegativeExponent => write!(f, "negative exponent"),
            RuntimeError::IndexOutOfBounds { index, upper_bound } => write!(
                f,
                "array index {} out of bounds (upper bound {})",
                index, upper_bound
            ),
            RuntimeError::InvalidAddress => write!(f, "invalid store address"),
            RuntimeError::MalformedInput => write!(f, "malformed input"),
            RuntimeError::ChannelNotOpen => write!(f, "send/receive on an unopened channel"),
            RuntimeError::Deadlock => write!(f, "deadlock: all nodes blocked"),
            RuntimeError::Cancelled => write!(f, "node cancelled by a sibling's runtime error"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// A [`RuntimeError`] tagged with the node that raised it, for the
/// process-exit message (spec §7 "Runtime errors terminate the program with
/// a message identifying the opcode and node.").
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NodeError {
    pub node: usize,
    pub error: RuntimeError,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "node {}: {}", self.node, self.error)
    }
}

impl std::error::Error for NodeError {}
