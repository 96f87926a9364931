//! Compiled filter execution over columnar data frames.
//!
//! A filter expression produced by the planner is resolved into a typed tree,
//! compiled into a native routine (a SIMD loop plus a scalar tail) when the
//! host supports it, and driven frame by frame by a [`executor::FilterCursor`].
//! The scalar interpreter in [`expression::eval`] is the reference semantics
//! for every compiled routine.

pub mod access;
pub mod config;
pub mod executor;
pub mod expression;
pub mod jit;

pub use config::EngineConfig;
pub use executor::{ExecutionContext, FilterCursor, FilterCursorFactory, JitMode, RowCursor};
