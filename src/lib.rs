//! Distributed, symmetry-aware tensor-contraction engine.
//!
//! `world` + `ops` are the entry points most callers need; the rest of the
//! modules implement the pipeline `ops::contract` drives: `planner` builds a
//! plan, `redistribute` lays operands out to match it, `reducer` (wrapping
//! `kernel`, `symmetry`) executes it.

pub mod algebraic;
pub mod arena;
pub mod communicator;
pub mod error;
pub mod kernel;
pub mod ops;
pub mod planner;
pub mod redistribute;
pub mod reducer;
pub mod runtime;
pub mod symmetry;
pub mod tensor;
pub mod world;

pub use algebraic::{AlgebraicStructure, Ring, TropicalTiebreak};
pub use error::{CtfError, Result};
pub use ops::{contract, permute, read, reduce, scale, slice, sum, write, ReduceOp};
pub use planner::{CostModel, LinearCostModel, Planner};
pub use tensor::{DimMapping, DistTensor, Mapping, SymTag};
pub use world::{World, WorldConfig};
