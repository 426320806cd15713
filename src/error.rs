//! Error model for the contraction core.
//!
//! Every fallible entry point into the core returns [`Result<T>`]. Kinds
//! follow the error-handling design: shape mismatches and invalid input are
//! reported to the caller with no state change, while resource exhaustion
//! and collective failures are fatal and poison the tensors involved.

use thiserror::Error;

/// Errors produced by the contraction core.
#[derive(Error, Debug)]
pub enum CtfError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("symmetry groups inconsistent between operands: {0}")]
    SymmetryMismatch(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    #[error("collective failure on rank {rank}: {message}")]
    CollectiveFailure { rank: usize, message: String },

    #[error("operation attempted on poisoned tensor {name:?}")]
    Poisoned { name: Option<String> },

    #[error("reduction operator registration failed: {0}")]
    RegistrationFailure(String),

    #[error("planner error: {0}")]
    Planning(String),
}

pub type Result<T> = std::result::Result<T, CtfError>;
