//! Filter expressions: from the planner's tree to a resolved, typed filter.
//!
//! This module provides:
//! - The expression AST handed over by the planner
//! - Type and null promotion resolution into a `ResolvedFilter`
//! - The scalar interpreter, which defines the semantics every compiled
//!   routine must reproduce

pub mod error;
pub mod eval;
pub mod expr;
pub mod operator;
pub mod resolved;
pub mod resolver;

pub use error::{ExpressionError, ExpressionResult};
pub use eval::{select_rows, ExpressionEvaluator, FrameEvaluator};
pub use expr::{ColumnRef, Expression, Literal};
pub use operator::{ArithmeticOp, BinaryOperator, CompareOp, UnaryOperator};
pub use resolved::{ResolvedExpr, ResolvedFilter, ResolvedNode};
pub use resolver::{resolve_filter, FilterResolver};
