//! Executor layer for filter execution.
//!
//! A `FilterCursorFactory` resolves a planner expression once, picks the
//! execution path (vectorized routine, scalar-only routine or interpreter)
//! and hands out `FilterCursor`s that apply it frame by frame over a
//! `FrameSource`, yielding matching row ids one at a time.

use crate::access::{FrameError, RowId};
use crate::config::EngineConfig;
use crate::expression::ExpressionError;
use crate::jit::{CodegenMode, CompiledFilterCache, JitError};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod factory;
pub mod filter;

pub use crate::config::JitMode;
pub use factory::FilterCursorFactory;
pub use filter::FilterCursor;

/// Forward cursor over row ids
pub trait RowCursor: Send {
    /// Initialize the cursor. This must be called before `next()`.
    fn init(&mut self) -> Result<()>;

    /// Get the next row id.
    /// Returns None when there are no more rows.
    fn next(&mut self) -> Result<Option<RowId>>;

    /// Rewind so that the next call to `next()` starts from the first row again
    fn to_top(&mut self) -> Result<()>;

    /// Release the cursor's resources. Safe to call more than once.
    fn close(&mut self);
}

/// Errors surfaced to the caller while filtering frames
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("frame does not match the filter's columns: {0}")]
    FrameMismatch(#[from] FrameError),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("cursor is closed")]
    Closed,

    #[error("cursor not initialized, call init() first")]
    NotInitialized,

    #[error("filter evaluation failed: {0}")]
    Expression(#[from] ExpressionError),

    #[error("compiled filter failed: {0}")]
    Jit(JitError),
}

impl From<JitError> for FilterError {
    fn from(err: JitError) -> Self {
        match err {
            JitError::Frame(frame) => FilterError::FrameMismatch(frame),
            JitError::Allocation(message) => FilterError::ResourceExhausted(message),
            other => FilterError::Jit(other),
        }
    }
}

/// Which implementation evaluates the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPath {
    /// Compiled SIMD loop plus scalar tail
    Vectorized,
    /// Compiled scalar loop only
    CompiledScalar,
    /// Row-at-a-time interpreter
    Interpreter,
}

impl ExecutionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPath::Vectorized => "vectorized",
            ExecutionPath::CompiledScalar => "compiled-scalar",
            ExecutionPath::Interpreter => "interpreter",
        }
    }

    pub fn codegen_mode(&self) -> Option<CodegenMode> {
        match self {
            ExecutionPath::Vectorized => Some(CodegenMode::Vectorized),
            ExecutionPath::CompiledScalar => Some(CodegenMode::ScalarOnly),
            ExecutionPath::Interpreter => None,
        }
    }

    pub fn from_codegen_mode(mode: CodegenMode) -> Self {
        match mode {
            CodegenMode::Vectorized => ExecutionPath::Vectorized,
            CodegenMode::ScalarOnly => ExecutionPath::CompiledScalar,
        }
    }
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution context containing shared resources
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub config: Arc<EngineConfig>,
    /// Path selector for this execution; defaults to the configured one
    pub jit_mode: JitMode,
    pub cache: Arc<CompiledFilterCache>,
}

impl ExecutionContext {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            jit_mode: config.jit_mode,
            config,
            cache: Arc::new(CompiledFilterCache::new()),
        }
    }

    /// Override the path selector for this execution only
    pub fn with_jit_mode(mut self, jit_mode: JitMode) -> Self {
        self.jit_mode = jit_mode;
        self
    }

    /// Share a compiled routine cache with other contexts
    pub fn with_cache(mut self, cache: Arc<CompiledFilterCache>) -> Self {
        self.cache = cache;
        self
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(Arc::new(EngineConfig::default()))
    }
}
