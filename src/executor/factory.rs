//! Builds filter cursors: resolves the expression once, chooses the
//! execution path and owns the compiled routine shared by its cursors.

use crate::access::{ColumnMeta, FrameSource};
use crate::executor::filter::FilterCursor;
use crate::executor::{ExecutionContext, ExecutionPath, FilterError, JitMode};
use crate::expression::{Expression, FilterResolver, ResolvedFilter};
use crate::jit::{self, CodegenMode, CompiledFilter, JitError};
use anyhow::Result;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct FactoryState {
    compiled: Option<Arc<CompiledFilter>>,
    closed: bool,
}

/// Factory of cursors applying one filter expression
#[derive(Debug)]
pub struct FilterCursorFactory {
    filter: Arc<ResolvedFilter>,
    metadata: Arc<[ColumnMeta]>,
    plan: ExecutionPath,
    max_frame_rows: usize,
    state: Mutex<FactoryState>,
}

impl FilterCursorFactory {
    /// Resolve and, where possible, compile `expr` against `metadata`.
    ///
    /// Returns `Ok(None)` when the expression cannot be handled here at all,
    /// in which case the planner keeps its generic row filter. Code
    /// generation failures are not errors: the factory falls back to the
    /// interpreter. Only resource exhaustion and contract violations (such as
    /// a column index out of range) are surfaced.
    pub fn try_new(
        ctx: &ExecutionContext,
        expr: &Expression,
        metadata: &[ColumnMeta],
    ) -> Result<Option<Self>> {
        ctx.config.validate()?;

        let filter = match FilterResolver::new(metadata).resolve(expr) {
            Ok(filter) => filter,
            Err(e) if e.is_unsupported() => {
                debug!("filter {} left to the planner: {}", expr, e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut compiled = None;
        let mut plan = ExecutionPath::Interpreter;
        if filter.constant_result().is_none() {
            if let Some(mode) = select_codegen_mode(ctx.jit_mode, ctx.config.jit_enabled) {
                match compile(ctx, &filter, mode) {
                    Ok(routine) => {
                        info!(
                            "compiled filter {} ({}, {} rows per group)",
                            expr,
                            mode.as_str(),
                            routine.lanes()
                        );
                        compiled = Some(routine);
                        plan = ExecutionPath::from_codegen_mode(mode);
                    }
                    Err(e) if e.is_resource_error() => {
                        return Err(FilterError::from(e).into());
                    }
                    Err(e) => {
                        warn!("filter {} falls back to the interpreter: {}", expr, e);
                    }
                }
            }
        }
        debug!(
            "filter {} runs on the {} path (mode {})",
            expr, plan, ctx.jit_mode
        );

        Ok(Some(Self {
            filter: Arc::new(filter),
            metadata: metadata.to_vec().into(),
            plan,
            max_frame_rows: ctx.config.max_frame_rows,
            state: Mutex::new(FactoryState {
                compiled,
                closed: false,
            }),
        }))
    }

    /// Create a cursor over `source` sharing this factory's routine
    pub fn cursor(&self, source: Box<dyn FrameSource>) -> Result<FilterCursor> {
        let state = self.state.lock();
        if state.closed {
            return Err(FilterError::Closed.into());
        }
        Ok(FilterCursor::new(
            source,
            Arc::clone(&self.filter),
            Arc::clone(&self.metadata),
            state.compiled.clone(),
            self.plan,
            self.max_frame_rows,
        ))
    }

    /// Release this factory's handle on the compiled routine. Idempotent.
    /// Cursors already created keep working until they are closed.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            debug!("closing filter factory ({})", self.plan);
        }
        state.compiled = None;
        state.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Whether cursors run a compiled routine
    pub fn is_compiled(&self) -> bool {
        self.state.lock().compiled.is_some()
    }

    /// The path chosen when the factory was built
    pub fn plan(&self) -> ExecutionPath {
        self.plan
    }

    pub fn filter(&self) -> &ResolvedFilter {
        &self.filter
    }
}

/// Routine to build for `mode`, or `None` to interpret
fn select_codegen_mode(mode: JitMode, jit_enabled: bool) -> Option<CodegenMode> {
    if mode == JitMode::ForceScalar || !jit_enabled {
        return None;
    }
    if !jit::jit_supported() {
        debug!("no native code generation on this host");
        return None;
    }
    let simd = jit::simd_supported();
    match mode {
        JitMode::ForceVectorized if simd => Some(CodegenMode::Vectorized),
        JitMode::ForceVectorized => {
            warn!("vectorized filters requested but SIMD is not available");
            None
        }
        JitMode::Auto if simd => Some(CodegenMode::Vectorized),
        JitMode::Auto => Some(CodegenMode::ScalarOnly),
        JitMode::CompiledScalar => Some(CodegenMode::ScalarOnly),
        JitMode::ForceScalar => None,
    }
}

fn compile(
    ctx: &ExecutionContext,
    filter: &ResolvedFilter,
    mode: CodegenMode,
) -> std::result::Result<Arc<CompiledFilter>, JitError> {
    if ctx.config.cache_compiled_filters {
        ctx.cache.get_or_compile(filter, mode)
    } else {
        jit::compile_filter(filter, mode).map(Arc::new)
    }
}
