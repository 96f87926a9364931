//! Type and null promotion resolution.
//!
//! Turns the planner's `Expression` into a `ResolvedFilter`: every node gets
//! the kind it produces, the kind its parent consumes it as and a nullable
//! flag. Null literals never survive resolution; they are folded into
//! sentinel tests, null constants or boolean constants.

use crate::access::{ColumnMeta, DataType, Datum, Value, ABSENT_SYMBOL_KEY};
use crate::expression::operator::{ArithmeticOp, BinaryOperator, CompareOp, UnaryOperator};
use crate::expression::resolved::{ResolvedExpr, ResolvedFilter, ResolvedNode};
use crate::expression::{Expression, ExpressionError, ExpressionResult};

/// Intermediate result: literals that only make sense next to a typed operand
/// are kept aside until their context is known.
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Null,
    Text(String),
    Expr(ResolvedExpr),
}

impl Operand {
    fn data_type(&self) -> Option<DataType> {
        match self {
            Operand::Null => None,
            Operand::Text(_) => Some(DataType::Varchar),
            Operand::Expr(e) => Some(e.data_type),
        }
    }
}

fn invalid_operands(operator: &str, left: &Operand, right: Option<&Operand>) -> ExpressionError {
    ExpressionError::InvalidOperandTypes {
        operator: operator.to_string(),
        left_type: left.data_type(),
        right_type: right.and_then(Operand::data_type),
    }
}

/// Resolver for filter expressions over one table's column metadata
pub struct FilterResolver<'a> {
    metadata: &'a [ColumnMeta],
}

impl<'a> FilterResolver<'a> {
    pub fn new(metadata: &'a [ColumnMeta]) -> Self {
        Self { metadata }
    }

    /// Resolve a filter predicate. The root must be boolean.
    pub fn resolve(&self, expr: &Expression) -> ExpressionResult<ResolvedFilter> {
        let root = match self.operand(expr)? {
            // A null predicate selects nothing
            Operand::Null => ResolvedExpr::boolean(false),
            Operand::Text(_) => {
                return Err(ExpressionError::TypeMismatch {
                    expected: DataType::Boolean,
                    actual: DataType::Varchar,
                    context: "filter predicate".to_string(),
                })
            }
            Operand::Expr(e) if e.is_boolean() => e,
            Operand::Expr(e) => {
                return Err(ExpressionError::TypeMismatch {
                    expected: DataType::Boolean,
                    actual: e.data_type,
                    context: "filter predicate".to_string(),
                })
            }
        };
        Ok(ResolvedFilter::new(root, self.metadata.len()))
    }

    fn operand(&self, expr: &Expression) -> ExpressionResult<Operand> {
        match expr {
            Expression::Literal(lit) => self.literal(&lit.value),

            Expression::ColumnRef(col) => self.column(col.index),

            Expression::UnaryOp { op, operand } => {
                let operand = self.operand(operand)?;
                match op {
                    UnaryOperator::Minus => self.negate(operand),
                    UnaryOperator::Not => match operand {
                        Operand::Expr(e) if e.is_boolean() => {
                            Ok(Operand::Expr(ResolvedExpr::predicate(ResolvedNode::Not(
                                Box::new(e),
                            ))))
                        }
                        other => Err(invalid_operands(op.as_str(), &other, None)),
                    },
                    UnaryOperator::IsNull => self.null_test(operand, false),
                    UnaryOperator::IsNotNull => self.null_test(operand, true),
                }
            }

            Expression::BinaryOp { op, left, right } => {
                let left = self.operand(left)?;
                let right = self.operand(right)?;
                if let Some(arith) = op.arithmetic() {
                    self.arithmetic(*op, arith, left, right)
                } else if let Some(cmp) = op.comparison() {
                    self.comparison(op.as_str(), cmp, left, right)
                } else {
                    self.logical(*op, left, right)
                }
            }

            Expression::FunctionCall { name, .. } => Err(ExpressionError::unsupported(format!(
                "function call {}()",
                name
            ))),
        }
    }

    fn literal(&self, value: &Value) -> ExpressionResult<Operand> {
        match value {
            Value::Null => Ok(Operand::Null),
            Value::String(s) => Ok(Operand::Text(s.clone())),
            other => {
                let data_type = other
                    .data_type()
                    .ok_or_else(|| ExpressionError::unsupported("untyped literal"))?;
                let datum = other.to_datum().ok_or_else(|| {
                    ExpressionError::unsupported(format!("literal of kind {}", data_type))
                })?;
                Ok(Operand::Expr(ResolvedExpr::constant(datum, data_type, false)))
            }
        }
    }

    fn column(&self, index: usize) -> ExpressionResult<Operand> {
        let meta = self
            .metadata
            .get(index)
            .ok_or(ExpressionError::ColumnIndexOutOfBounds {
                index,
                column_count: self.metadata.len(),
            })?;
        if meta.data_type.storage().is_none() {
            return Err(ExpressionError::unsupported(format!(
                "column {} of kind {}",
                meta.name, meta.data_type
            )));
        }
        let nullable = meta.nullable && meta.data_type != DataType::Boolean;
        Ok(Operand::Expr(ResolvedExpr::new(
            ResolvedNode::Column { index },
            meta.data_type,
            nullable,
        )))
    }

    fn negate(&self, operand: Operand) -> ExpressionResult<Operand> {
        match operand {
            Operand::Null => Ok(Operand::Null),
            Operand::Expr(e) if e.data_type.is_numeric() => {
                let (data_type, nullable) = (e.data_type, e.nullable);
                Ok(Operand::Expr(ResolvedExpr::new(
                    ResolvedNode::Neg(Box::new(e)),
                    data_type,
                    nullable,
                )))
            }
            other => Err(invalid_operands(UnaryOperator::Minus.as_str(), &other, None)),
        }
    }

    fn null_test(&self, operand: Operand, negated: bool) -> ExpressionResult<Operand> {
        let folded = match operand {
            Operand::Null => !negated,
            Operand::Text(_) => {
                return Err(invalid_operands(
                    UnaryOperator::IsNull.as_str(),
                    &operand,
                    None,
                ))
            }
            Operand::Expr(e) => {
                if !e.nullable {
                    negated
                } else if let Some(datum) = e.as_constant() {
                    datum.is_null_of(e.data_type) != negated
                } else {
                    return Ok(Operand::Expr(ResolvedExpr::predicate(
                        ResolvedNode::IsNull {
                            operand: Box::new(e),
                            negated,
                        },
                    )));
                }
            }
        };
        Ok(Operand::Expr(ResolvedExpr::boolean(folded)))
    }

    fn arithmetic(
        &self,
        op: BinaryOperator,
        arith: ArithmeticOp,
        left: Operand,
        right: Operand,
    ) -> ExpressionResult<Operand> {
        match (left, right) {
            (Operand::Null, Operand::Null) => Err(ExpressionError::unsupported(format!(
                "null {} null has no kind",
                op
            ))),
            (Operand::Null, Operand::Expr(e)) | (Operand::Expr(e), Operand::Null)
                if e.data_type.is_numeric() =>
            {
                let datum = Datum::null_of(e.data_type).ok_or_else(|| {
                    ExpressionError::unsupported(format!("null of kind {}", e.data_type))
                })?;
                Ok(Operand::Expr(ResolvedExpr::constant(
                    datum,
                    e.data_type,
                    true,
                )))
            }
            (Operand::Expr(l), Operand::Expr(r)) => {
                let common = DataType::promote(l.data_type, r.data_type).ok_or_else(|| {
                    ExpressionError::InvalidOperandTypes {
                        operator: op.as_str().to_string(),
                        left_type: Some(l.data_type),
                        right_type: Some(r.data_type),
                    }
                })?;
                // Integer division yields null on a zero divisor
                let nullable = l.nullable
                    || r.nullable
                    || (arith == ArithmeticOp::Div && !common.is_float());
                Ok(Operand::Expr(ResolvedExpr::new(
                    ResolvedNode::Arithmetic {
                        op: arith,
                        left: Box::new(l.promote_to(common)),
                        right: Box::new(r.promote_to(common)),
                    },
                    common,
                    nullable,
                )))
            }
            (l, r) => Err(invalid_operands(op.as_str(), &l, Some(&r))),
        }
    }

    fn comparison(
        &self,
        operator: &str,
        op: CompareOp,
        left: Operand,
        right: Operand,
    ) -> ExpressionResult<Operand> {
        match (left, right) {
            (Operand::Null, Operand::Null) => {
                Ok(Operand::Expr(ResolvedExpr::boolean(op == CompareOp::Eq)))
            }
            (Operand::Null, other) => self.comparison(operator, op.flip(), other, Operand::Null),
            (other, Operand::Null) => match op {
                CompareOp::Eq => self.null_test(other, false),
                CompareOp::Ne => self.null_test(other, true),
                _ => {
                    if let Operand::Text(_) = other {
                        return Err(invalid_operands(operator, &other, None));
                    }
                    Ok(Operand::Expr(ResolvedExpr::boolean(false)))
                }
            },
            (Operand::Text(_), Operand::Text(_)) => Err(ExpressionError::unsupported(
                "comparison between two string literals",
            )),
            (Operand::Text(s), Operand::Expr(e)) => {
                self.comparison(operator, op.flip(), Operand::Expr(e), Operand::Text(s))
            }
            (Operand::Expr(e), Operand::Text(s)) => self.symbol_comparison(operator, op, e, &s),
            (Operand::Expr(l), Operand::Expr(r)) => self.typed_comparison(operator, op, l, r),
        }
    }

    /// Symbol column against a string literal, compared by dictionary key
    fn symbol_comparison(
        &self,
        operator: &str,
        op: CompareOp,
        column: ResolvedExpr,
        text: &str,
    ) -> ExpressionResult<Operand> {
        let index = match column.node {
            ResolvedNode::Column { index } if column.data_type == DataType::Symbol => index,
            _ => {
                return Err(ExpressionError::InvalidOperandTypes {
                    operator: operator.to_string(),
                    left_type: Some(column.data_type),
                    right_type: Some(DataType::Varchar),
                })
            }
        };
        if op.is_ordering() {
            return Err(ExpressionError::InvalidOperandTypes {
                operator: operator.to_string(),
                left_type: Some(DataType::Symbol),
                right_type: Some(DataType::Varchar),
            });
        }
        let table = self
            .metadata
            .get(index)
            .and_then(|m| m.symbols.as_ref())
            .ok_or_else(|| {
                ExpressionError::unsupported(format!("symbol column {} has no dictionary", index))
            })?;
        let key = table.key_of(text).unwrap_or(ABSENT_SYMBOL_KEY);
        let constant = ResolvedExpr::constant(Datum::Int32(key), DataType::Symbol, false);
        Ok(Operand::Expr(ResolvedExpr::predicate(ResolvedNode::Compare {
            op,
            left: Box::new(column),
            right: Box::new(constant),
        })))
    }

    fn typed_comparison(
        &self,
        operator: &str,
        op: CompareOp,
        left: ResolvedExpr,
        right: ResolvedExpr,
    ) -> ExpressionResult<Operand> {
        let invalid = || ExpressionError::InvalidOperandTypes {
            operator: operator.to_string(),
            left_type: Some(left.data_type),
            right_type: Some(right.data_type),
        };

        let common = match (left.data_type, right.data_type) {
            (DataType::Symbol, _) | (_, DataType::Symbol) => {
                return Err(ExpressionError::unsupported(
                    "symbols compare only against string literals or null",
                ))
            }
            (DataType::Boolean, DataType::Boolean) if !op.is_ordering() => DataType::Boolean,
            (DataType::GeoHash { bits: l }, DataType::GeoHash { bits: r }) => {
                if op.is_ordering() {
                    return Err(invalid());
                }
                if l != r {
                    return Err(ExpressionError::TypeMismatch {
                        expected: left.data_type,
                        actual: right.data_type,
                        context: "geohash comparison".to_string(),
                    });
                }
                left.data_type
            }
            (l, r) => DataType::promote(l, r).ok_or_else(invalid)?,
        };

        Ok(Operand::Expr(ResolvedExpr::predicate(ResolvedNode::Compare {
            op,
            left: Box::new(left.promote_to(common)),
            right: Box::new(right.promote_to(common)),
        })))
    }

    fn logical(
        &self,
        op: BinaryOperator,
        left: Operand,
        right: Operand,
    ) -> ExpressionResult<Operand> {
        match (left, right) {
            (Operand::Expr(l), Operand::Expr(r)) if l.is_boolean() && r.is_boolean() => {
                let node = match op {
                    BinaryOperator::And => ResolvedNode::And(Box::new(l), Box::new(r)),
                    _ => ResolvedNode::Or(Box::new(l), Box::new(r)),
                };
                Ok(Operand::Expr(ResolvedExpr::predicate(node)))
            }
            (l, r) => Err(invalid_operands(op.as_str(), &l, Some(&r))),
        }
    }
}

/// Helper function to resolve a filter predicate against column metadata
pub fn resolve_filter(
    expr: &Expression,
    metadata: &[ColumnMeta],
) -> ExpressionResult<ResolvedFilter> {
    FilterResolver::new(metadata).resolve(expr)
}
