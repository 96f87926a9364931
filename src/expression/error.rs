//! Error types for expression resolution and evaluation.

use crate::access::DataType;
use std::fmt;

/// Errors that can occur while resolving or evaluating a filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionError {
    /// Expression shape or column kind that no execution path handles
    Unsupported { reason: String },

    /// Type mismatch in operation
    TypeMismatch {
        expected: DataType,
        actual: DataType,
        context: String,
    },

    /// Invalid operand types for operator
    InvalidOperandTypes {
        operator: String,
        left_type: Option<DataType>,
        right_type: Option<DataType>,
    },

    /// Column index out of bounds
    ColumnIndexOutOfBounds { index: usize, column_count: usize },

    /// Generic evaluation error
    EvaluationError { message: String },
}

impl ExpressionError {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        ExpressionError::Unsupported {
            reason: reason.into(),
        }
    }

    /// Whether the expression was rejected by the resolver rather than being malformed.
    ///
    /// Rejected expressions are left to the planner's generic filter.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            ExpressionError::Unsupported { .. }
                | ExpressionError::TypeMismatch { .. }
                | ExpressionError::InvalidOperandTypes { .. }
        )
    }
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionError::Unsupported { reason } => {
                write!(f, "Unsupported filter expression: {}", reason)
            }

            ExpressionError::TypeMismatch {
                expected,
                actual,
                context,
            } => {
                write!(
                    f,
                    "Type mismatch in {}: expected {:?}, got {:?}",
                    context, expected, actual
                )
            }

            ExpressionError::InvalidOperandTypes {
                operator,
                left_type,
                right_type,
            } => {
                write!(
                    f,
                    "Invalid operand types for operator {}: left={:?}, right={:?}",
                    operator, left_type, right_type
                )
            }

            ExpressionError::ColumnIndexOutOfBounds {
                index,
                column_count,
            } => {
                write!(
                    f,
                    "Column index {} out of bounds for frame with {} columns",
                    index, column_count
                )
            }

            ExpressionError::EvaluationError { message } => {
                write!(f, "Expression evaluation error: {}", message)
            }
        }
    }
}

impl std::error::Error for ExpressionError {}

/// Result type for expression operations
pub type ExpressionResult<T> = Result<T, ExpressionError>;
