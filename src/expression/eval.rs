//! Scalar interpretation of resolved filters.
//!
//! This is the reference semantics for every compiled routine. The value
//! helpers (`convert`, `arithmetic`, `compare`, `negate`) are also used by the
//! code generator to pre-compute constants, so both paths share one
//! definition of promotion and null handling.

use crate::access::{DataFrame, DataType, Datum, RowId};
use crate::expression::operator::{ArithmeticOp, CompareOp};
use crate::expression::resolved::{ResolvedExpr, ResolvedFilter, ResolvedNode};
use crate::expression::{ExpressionError, ExpressionResult};

/// Convert a value produced as `from` into the kind `to`.
///
/// Integers widen by sign extension and turn into floats by round-to-nearest;
/// when the source is nullable its sentinel becomes the target's null.
pub fn convert(datum: Datum, from: DataType, to: DataType, nullable: bool) -> Datum {
    if from == to {
        return datum;
    }
    let is_null = nullable && datum.is_null_of(from);
    match to {
        DataType::Float32 => match datum {
            _ if is_null => Datum::Float32(f32::NAN),
            Datum::Float32(v) => Datum::Float32(v),
            Datum::Float64(v) => Datum::Float32(v as f32),
            other => Datum::Float32(other.as_i64().unwrap_or_default() as f32),
        },
        DataType::Float64 => match datum {
            _ if is_null => Datum::Float64(f64::NAN),
            Datum::Float32(v) => Datum::Float64(v as f64),
            Datum::Float64(v) => Datum::Float64(v),
            other => Datum::Float64(other.as_i64().unwrap_or_default() as f64),
        },
        _ => match (to.storage(), datum.as_i64()) {
            (Some(storage), Some(value)) if storage.is_integer() => {
                let value = match to.null_sentinel() {
                    Some(sentinel) if is_null => sentinel,
                    _ => value,
                };
                Datum::from_i64(storage, value)
            }
            _ => datum,
        },
    }
}

/// Arithmetic negation at `kind`; integers wrap, so a sentinel stays a sentinel
pub fn negate(datum: Datum, kind: DataType) -> Datum {
    match datum {
        Datum::Float32(v) => Datum::Float32(-v),
        Datum::Float64(v) => Datum::Float64(-v),
        other => match (kind.storage(), other.as_i64()) {
            (Some(storage), Some(v)) => Datum::from_i64(storage, v.wrapping_neg()),
            _ => other,
        },
    }
}

/// Binary arithmetic on two values already converted to `kind`.
///
/// Integer results wrap at the kind's width. A null operand, a zero divisor
/// or a null result of the operation yields the kind's null.
pub fn arithmetic(
    op: ArithmeticOp,
    kind: DataType,
    left: Datum,
    left_nullable: bool,
    right: Datum,
    right_nullable: bool,
) -> Datum {
    match (left, right) {
        (Datum::Float32(a), Datum::Float32(b)) => Datum::Float32(match op {
            ArithmeticOp::Add => a + b,
            ArithmeticOp::Sub => a - b,
            ArithmeticOp::Mul => a * b,
            ArithmeticOp::Div => a / b,
        }),
        (Datum::Float64(a), Datum::Float64(b)) => Datum::Float64(match op {
            ArithmeticOp::Add => a + b,
            ArithmeticOp::Sub => a - b,
            ArithmeticOp::Mul => a * b,
            ArithmeticOp::Div => a / b,
        }),
        _ => {
            let (Some(storage), Some(sentinel)) = (kind.storage(), kind.null_sentinel()) else {
                return left;
            };
            let (a, b) = (
                left.as_i64().unwrap_or(sentinel),
                right.as_i64().unwrap_or(sentinel),
            );
            if (left_nullable && a == sentinel) || (right_nullable && b == sentinel) {
                return Datum::from_i64(storage, sentinel);
            }
            let value = match op {
                ArithmeticOp::Add => a.wrapping_add(b),
                ArithmeticOp::Sub => a.wrapping_sub(b),
                ArithmeticOp::Mul => a.wrapping_mul(b),
                ArithmeticOp::Div => match b {
                    0 => sentinel,
                    -1 => a.wrapping_neg(),
                    _ => a / b,
                },
            };
            Datum::from_i64(storage, value)
        }
    }
}

/// Comparison of two values already converted to `kind`.
///
/// Equality treats two nulls as equal (NaN equals NaN). Ordering comparisons
/// are false whenever either side is null.
pub fn compare(
    op: CompareOp,
    kind: DataType,
    left: Datum,
    left_nullable: bool,
    right: Datum,
    right_nullable: bool,
) -> bool {
    if let (Some(a), Some(b)) = (left.as_bool(), right.as_bool()) {
        return match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            _ => false,
        };
    }

    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        let both_nan = a.is_nan() && b.is_nan();
        return match op {
            CompareOp::Eq => a == b || both_nan,
            CompareOp::Ne => !(a == b || both_nan),
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
        };
    }

    let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) else {
        return false;
    };
    if op.is_ordering() {
        if let Some(sentinel) = kind.null_sentinel() {
            if (left_nullable && a == sentinel) || (right_nullable && b == sentinel) {
                return false;
            }
        }
    }
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
    }
}

/// Row-at-a-time evaluator over one frame
pub struct ExpressionEvaluator<'f, 'a> {
    frame: &'f DataFrame<'a>,
}

impl<'f, 'a> ExpressionEvaluator<'f, 'a> {
    pub fn new(frame: &'f DataFrame<'a>) -> Self {
        Self { frame }
    }

    /// Evaluate a node at one row; the result is stored as the node's `data_type`
    pub fn evaluate(&self, expr: &ResolvedExpr, row: usize) -> ExpressionResult<Datum> {
        match &expr.node {
            ResolvedNode::Column { index } => self.column(*index, row),

            ResolvedNode::Constant(datum) => Ok(*datum),

            ResolvedNode::Neg(operand) => {
                let value = self.operand(operand, row)?;
                Ok(negate(value, expr.data_type))
            }

            ResolvedNode::Arithmetic { op, left, right } => {
                let a = self.operand(left, row)?;
                let b = self.operand(right, row)?;
                Ok(arithmetic(
                    *op,
                    expr.data_type,
                    a,
                    left.nullable,
                    b,
                    right.nullable,
                ))
            }

            ResolvedNode::Compare { op, left, right } => {
                let a = self.operand(left, row)?;
                let b = self.operand(right, row)?;
                Ok(Datum::Boolean(compare(
                    *op,
                    left.promoted,
                    a,
                    left.nullable,
                    b,
                    right.nullable,
                )))
            }

            ResolvedNode::IsNull { operand, negated } => {
                let value = self.evaluate(operand, row)?;
                Ok(Datum::Boolean(
                    value.is_null_of(operand.data_type) != *negated,
                ))
            }

            // Both sides are always evaluated, as in the vectorized loop
            ResolvedNode::And(left, right) => {
                let a = self.predicate(left, row)?;
                let b = self.predicate(right, row)?;
                Ok(Datum::Boolean(a & b))
            }

            ResolvedNode::Or(left, right) => {
                let a = self.predicate(left, row)?;
                let b = self.predicate(right, row)?;
                Ok(Datum::Boolean(a | b))
            }

            ResolvedNode::Not(operand) => Ok(Datum::Boolean(!self.predicate(operand, row)?)),
        }
    }

    /// Evaluate a boolean node at one row
    pub fn predicate(&self, expr: &ResolvedExpr, row: usize) -> ExpressionResult<bool> {
        self.evaluate(expr, row)?
            .as_bool()
            .ok_or_else(|| ExpressionError::TypeMismatch {
                expected: DataType::Boolean,
                actual: expr.data_type,
                context: "predicate evaluation".to_string(),
            })
    }

    /// Evaluate a node and convert it to the kind its parent consumes
    fn operand(&self, expr: &ResolvedExpr, row: usize) -> ExpressionResult<Datum> {
        let value = self.evaluate(expr, row)?;
        Ok(convert(value, expr.data_type, expr.promoted, expr.nullable))
    }

    fn column(&self, index: usize, row: usize) -> ExpressionResult<Datum> {
        let column =
            self.frame
                .column(index)
                .ok_or(ExpressionError::ColumnIndexOutOfBounds {
                    index,
                    column_count: self.frame.columns.len(),
                })?;
        column
            .datum(row)
            .ok_or_else(|| ExpressionError::EvaluationError {
                message: format!(
                    "row {} out of bounds for column {} with {} rows",
                    row,
                    index,
                    column.len()
                ),
            })
    }
}

/// Frame-at-a-time driver producing the same output as a compiled routine
pub struct FrameEvaluator<'r> {
    filter: &'r ResolvedFilter,
}

impl<'r> FrameEvaluator<'r> {
    pub fn new(filter: &'r ResolvedFilter) -> Self {
        Self { filter }
    }

    /// Append the absolute ids of matching rows, ascending, and return how many matched
    pub fn select_rows(&self, frame: &DataFrame<'_>, out: &mut Vec<RowId>) -> ExpressionResult<usize> {
        let before = out.len();
        match self.filter.constant_result() {
            Some(true) => out.extend((0..frame.row_count).map(|row| frame.row_base + row as RowId)),
            Some(false) => {}
            None => {
                let evaluator = ExpressionEvaluator::new(frame);
                for row in 0..frame.row_count {
                    if evaluator.predicate(&self.filter.root, row)? {
                        out.push(frame.row_base + row as RowId);
                    }
                }
            }
        }
        Ok(out.len() - before)
    }
}

/// Helper function to select matching rows of a frame with the interpreter
pub fn select_rows(
    filter: &ResolvedFilter,
    frame: &DataFrame<'_>,
    out: &mut Vec<RowId>,
) -> ExpressionResult<usize> {
    FrameEvaluator::new(filter).select_rows(frame, out)
}
