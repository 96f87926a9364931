//! Operator definitions for expressions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operators supported in filter expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Logical
    And,
    Or,
}

impl BinaryOperator {
    pub fn is_arithmetic(&self) -> bool {
        self.arithmetic().is_some()
    }

    pub fn is_comparison(&self) -> bool {
        self.comparison().is_some()
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }

    /// The arithmetic operation this operator denotes, if any
    pub fn arithmetic(&self) -> Option<ArithmeticOp> {
        match self {
            BinaryOperator::Add => Some(ArithmeticOp::Add),
            BinaryOperator::Sub => Some(ArithmeticOp::Sub),
            BinaryOperator::Mul => Some(ArithmeticOp::Mul),
            BinaryOperator::Div => Some(ArithmeticOp::Div),
            _ => None,
        }
    }

    /// The comparison this operator denotes, if any
    pub fn comparison(&self) -> Option<CompareOp> {
        match self {
            BinaryOperator::Eq => Some(CompareOp::Eq),
            BinaryOperator::Ne => Some(CompareOp::Ne),
            BinaryOperator::Lt => Some(CompareOp::Lt),
            BinaryOperator::Le => Some(CompareOp::Le),
            BinaryOperator::Gt => Some(CompareOp::Gt),
            BinaryOperator::Ge => Some(CompareOp::Ge),
            _ => None,
        }
    }

    /// Get the display string for this operator
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Eq => "=",
            BinaryOperator::Ne => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
        }
    }
}

/// Unary operators supported in filter expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    // Logical
    Not,

    // NULL checks, aliases of `= null` and `<> null`
    IsNull,
    IsNotNull,

    // Arithmetic
    Minus,
}

impl UnaryOperator {
    /// Get the display string for this operator
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOperator::Not => "NOT",
            UnaryOperator::IsNull => "IS NULL",
            UnaryOperator::IsNotNull => "IS NOT NULL",
            UnaryOperator::Minus => "-",
        }
    }
}

/// Arithmetic performed at the operands' common kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Comparison performed at the operands' common kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Ordering comparisons exclude rows where either side is null
    pub fn is_ordering(&self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::Ne)
    }

    /// The comparison that holds after swapping the operands
    pub fn flip(&self) -> CompareOp {
        match self {
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Ne => CompareOp::Ne,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
