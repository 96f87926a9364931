//! The resolved filter tree shared by the interpreter and the code generator.
//!
//! Every node carries the kind it produces (`data_type`), the kind its parent
//! consumes it as (`promoted`) and whether it can ever yield null. Both
//! execution paths read promotion and nullability from here and nowhere else.

use crate::access::{DataType, Datum};
use crate::expression::operator::{ArithmeticOp, CompareOp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedExpr {
    pub node: ResolvedNode,
    pub data_type: DataType,
    pub promoted: DataType,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResolvedNode {
    Column {
        index: usize,
    },
    /// Constant stored as `data_type`; a null constant holds the kind's sentinel
    Constant(Datum),
    Neg(Box<ResolvedExpr>),
    Arithmetic {
        op: ArithmeticOp,
        left: Box<ResolvedExpr>,
        right: Box<ResolvedExpr>,
    },
    /// Comparison at the operands' common kind, which both carry as `promoted`
    Compare {
        op: CompareOp,
        left: Box<ResolvedExpr>,
        right: Box<ResolvedExpr>,
    },
    /// Sentinel test on the operand's own kind
    IsNull {
        operand: Box<ResolvedExpr>,
        negated: bool,
    },
    And(Box<ResolvedExpr>, Box<ResolvedExpr>),
    Or(Box<ResolvedExpr>, Box<ResolvedExpr>),
    Not(Box<ResolvedExpr>),
}

impl ResolvedExpr {
    /// Create a node consumed at its own kind
    pub fn new(node: ResolvedNode, data_type: DataType, nullable: bool) -> Self {
        Self {
            node,
            data_type,
            promoted: data_type,
            nullable,
        }
    }

    pub fn constant(datum: Datum, data_type: DataType, nullable: bool) -> Self {
        Self::new(ResolvedNode::Constant(datum), data_type, nullable)
    }

    pub fn boolean(value: bool) -> Self {
        Self::constant(Datum::Boolean(value), DataType::Boolean, false)
    }

    /// Boolean-valued node combining two predicates
    pub fn predicate(node: ResolvedNode) -> Self {
        Self::new(node, DataType::Boolean, false)
    }

    /// Consume this node as `kind`
    pub fn promote_to(mut self, kind: DataType) -> Self {
        self.promoted = kind;
        self
    }

    pub fn is_boolean(&self) -> bool {
        self.data_type == DataType::Boolean
    }

    pub fn as_constant(&self) -> Option<Datum> {
        match &self.node {
            ResolvedNode::Constant(datum) => Some(*datum),
            _ => None,
        }
    }

    /// Visit this node and all of its descendants, parents first
    pub fn walk<F: FnMut(&ResolvedExpr)>(&self, f: &mut F) {
        f(self);
        match &self.node {
            ResolvedNode::Column { .. } | ResolvedNode::Constant(_) => {}
            ResolvedNode::Neg(operand)
            | ResolvedNode::Not(operand)
            | ResolvedNode::IsNull { operand, .. } => operand.walk(f),
            ResolvedNode::Arithmetic { left, right, .. }
            | ResolvedNode::Compare { left, right, .. }
            | ResolvedNode::And(left, right)
            | ResolvedNode::Or(left, right) => {
                left.walk(f);
                right.walk(f);
            }
        }
    }
}

/// A resolved filter ready for either execution path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFilter {
    /// Boolean-valued root
    pub root: ResolvedExpr,
    /// Columns read by the filter, ascending
    pub columns: Vec<usize>,
    /// Number of columns in the metadata the filter was resolved against
    pub column_count: usize,
}

impl ResolvedFilter {
    pub fn new(root: ResolvedExpr, column_count: usize) -> Self {
        let mut columns = Vec::new();
        root.walk(&mut |e| {
            if let ResolvedNode::Column { index } = e.node {
                columns.push(index);
            }
        });
        columns.sort_unstable();
        columns.dedup();
        Self {
            root,
            columns,
            column_count,
        }
    }

    /// The filter folded to a constant, if it did
    pub fn constant_result(&self) -> Option<bool> {
        self.root.as_constant().and_then(|d| d.as_bool())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(index: usize, data_type: DataType) -> ResolvedExpr {
        ResolvedExpr::new(ResolvedNode::Column { index }, data_type, true)
    }

    #[test]
    fn test_promote_to() {
        let expr = column(0, DataType::Int8).promote_to(DataType::Int64);
        assert_eq!(expr.data_type, DataType::Int8);
        assert_eq!(expr.promoted, DataType::Int64);
        assert!(!expr.is_boolean());
    }

    #[test]
    fn test_filter_collects_columns() {
        let root = ResolvedExpr::predicate(ResolvedNode::Or(
            Box::new(ResolvedExpr::predicate(ResolvedNode::IsNull {
                operand: Box::new(column(4, DataType::Int32)),
                negated: false,
            })),
            Box::new(ResolvedExpr::predicate(ResolvedNode::Compare {
                op: CompareOp::Gt,
                left: Box::new(column(1, DataType::Int32)),
                right: Box::new(column(4, DataType::Int32)),
            })),
        ));
        let filter = ResolvedFilter::new(root, 5);
        assert_eq!(filter.columns, vec![1, 4]);
        assert_eq!(filter.constant_result(), None);
    }

    #[test]
    fn test_constant_filter() {
        let filter = ResolvedFilter::new(ResolvedExpr::boolean(false), 2);
        assert!(filter.columns.is_empty());
        assert_eq!(filter.constant_result(), Some(false));
    }
}
