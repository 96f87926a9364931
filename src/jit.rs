//! Native code generation for resolved filters.
//!
//! A `ResolvedFilter` is lowered with Cranelift into a single routine
//!
//! ```text
//! extern "C" fn(cols: *const *const u8, row_count: i64, out: *mut i64, row_base: i64) -> i64
//! ```
//!
//! made of a 128-bit SIMD loop over full groups of rows followed by a scalar
//! tail loop for the remainder. The routine writes the absolute ids of
//! matching rows to `out` in ascending order and returns how many it wrote.

pub mod cache;
pub mod codegen;
pub mod compiled;
pub mod features;
mod scalar;
mod vector;

use crate::access::FrameError;
use thiserror::Error;

pub use cache::CompiledFilterCache;
pub use codegen::{compile_filter, lane_bytes, CodegenMode};
pub use compiled::CompiledFilter;
pub use features::{jit_supported, simd_supported};

/// Errors raised while building or running a compiled routine
#[derive(Error, Debug)]
pub enum JitError {
    /// Tree shape the generator does not handle
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Cranelift rejected or failed to lower the function
    #[error("codegen: {0}")]
    Codegen(String),

    /// Host ISA or module setup failed
    #[error("setup: {0}")]
    Setup(String),

    /// Executable or output memory could not be allocated
    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("frame mismatch: {0}")]
    Frame(#[from] FrameError),
}

impl JitError {
    /// Whether the failure must be surfaced instead of falling back to the interpreter
    pub fn is_resource_error(&self) -> bool {
        matches!(self, JitError::Allocation(_))
    }
}

pub type JitResult<T> = Result<T, JitError>;
