//! Row-at-a-time lowering used by the tail loop and by scalar-only routines.
//!
//! Values live in their natural IR type (`I8` for byte columns, `F32` for
//! floats, ...); predicates are `I8` values holding 0 or 1.

use crate::access::{DataType, Datum};
use crate::expression::eval::convert;
use crate::expression::{ArithmeticOp, CompareOp, ResolvedExpr, ResolvedNode};
use crate::jit::codegen::{
    checked_div, clif_type, int_const, narrow, sentinel_of, storage_of, widen_signed,
};
use crate::jit::{JitError, JitResult};
use cranelift_codegen::ir::{
    condcodes::{FloatCC, IntCC},
    types, InstBuilder, MemFlags, Value,
};
use cranelift_frontend::FunctionBuilder;

pub(crate) struct ScalarEmitter<'a, 'f> {
    builder: &'a mut FunctionBuilder<'f>,
    columns: &'a [Option<Value>],
    row: Value,
}

impl<'a, 'f> ScalarEmitter<'a, 'f> {
    pub fn new(builder: &'a mut FunctionBuilder<'f>, columns: &'a [Option<Value>], row: Value) -> Self {
        Self {
            builder,
            columns,
            row,
        }
    }

    /// Lower a boolean node to an `I8` 0/1 value
    pub fn predicate(&mut self, expr: &ResolvedExpr) -> JitResult<Value> {
        if expr.data_type != DataType::Boolean {
            return Err(JitError::Unsupported(format!(
                "predicate of kind {}",
                expr.data_type
            )));
        }
        self.value(expr)
    }

    /// Lower a node to a value of its own kind
    fn value(&mut self, expr: &ResolvedExpr) -> JitResult<Value> {
        match &expr.node {
            ResolvedNode::Column { index } => self.column(*index, expr.data_type),

            ResolvedNode::Constant(datum) => Ok(self.constant(*datum)),

            ResolvedNode::Neg(operand) => {
                let v = self.operand(operand)?;
                Ok(if expr.data_type.is_float() {
                    self.builder.ins().fneg(v)
                } else {
                    self.builder.ins().ineg(v)
                })
            }

            ResolvedNode::Arithmetic { op, left, right } => {
                self.arithmetic(*op, expr.data_type, left, right)
            }

            ResolvedNode::Compare { op, left, right } => self.compare(*op, left, right),

            ResolvedNode::IsNull { operand, negated } => {
                let v = self.value(operand)?;
                let null = self.is_null(v, operand.data_type)?;
                Ok(if *negated {
                    self.builder.ins().bxor_imm(null, 1)
                } else {
                    null
                })
            }

            ResolvedNode::And(left, right) => {
                let a = self.predicate(left)?;
                let b = self.predicate(right)?;
                Ok(self.builder.ins().band(a, b))
            }

            ResolvedNode::Or(left, right) => {
                let a = self.predicate(left)?;
                let b = self.predicate(right)?;
                Ok(self.builder.ins().bor(a, b))
            }

            ResolvedNode::Not(operand) => {
                let v = self.predicate(operand)?;
                Ok(self.builder.ins().bxor_imm(v, 1))
            }
        }
    }

    /// Lower a node and convert it to the kind its parent consumes.
    /// Constants are converted at compile time.
    fn operand(&mut self, expr: &ResolvedExpr) -> JitResult<Value> {
        if let Some(datum) = expr.as_constant() {
            let converted = convert(datum, expr.data_type, expr.promoted, expr.nullable);
            return Ok(self.constant(converted));
        }
        let v = self.value(expr)?;
        self.convert(v, expr.data_type, expr.promoted, expr.nullable)
    }

    fn column(&mut self, index: usize, kind: DataType) -> JitResult<Value> {
        let base = self
            .columns
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| JitError::Codegen(format!("column {index} has no base address")))?;
        let storage = storage_of(kind)?;
        let offset = self.builder.ins().imul_imm(self.row, storage.byte_size() as i64);
        let addr = self.builder.ins().iadd(base, offset);
        let v = self
            .builder
            .ins()
            .load(clif_type(storage), MemFlags::trusted(), addr, 0);
        if kind == DataType::Boolean {
            let zero = self.builder.ins().iconst(types::I8, 0);
            return Ok(self.builder.ins().icmp(IntCC::NotEqual, v, zero));
        }
        Ok(v)
    }

    fn constant(&mut self, datum: Datum) -> Value {
        match datum {
            Datum::Boolean(b) => self.builder.ins().iconst(types::I8, b as i64),
            Datum::Float32(v) => self.builder.ins().f32const(v),
            Datum::Float64(v) => self.builder.ins().f64const(v),
            other => {
                let ty = clif_type(other.storage_type());
                int_const(self.builder, ty, other.as_i64().unwrap_or_default())
            }
        }
    }

    fn convert(&mut self, v: Value, from: DataType, to: DataType, nullable: bool) -> JitResult<Value> {
        if from == to {
            return Ok(v);
        }
        let to_ty = clif_type(storage_of(to)?);
        match (from.is_float(), to.is_float()) {
            (true, true) => {
                if to == DataType::Float64 {
                    Ok(self.builder.ins().fpromote(types::F64, v))
                } else {
                    Ok(self.builder.ins().fdemote(types::F32, v))
                }
            }
            (false, true) => {
                let wide = widen_signed(self.builder, v);
                let f = self.builder.ins().fcvt_from_sint(to_ty, wide);
                if !nullable {
                    return Ok(f);
                }
                let null = self.is_null(v, from)?;
                let nan = if to == DataType::Float64 {
                    self.builder.ins().f64const(f64::NAN)
                } else {
                    self.builder.ins().f32const(f32::NAN)
                };
                Ok(self.builder.ins().select(null, nan, f))
            }
            (false, false) => {
                let from_ty = clif_type(storage_of(from)?);
                let widened = if to_ty.bits() > from_ty.bits() {
                    self.builder.ins().sextend(to_ty, v)
                } else if to_ty == from_ty {
                    v
                } else {
                    return Err(JitError::Unsupported(format!("narrowing {from} to {to}")));
                };
                if !nullable {
                    return Ok(widened);
                }
                let null = self.is_null(v, from)?;
                let sentinel = int_const(self.builder, to_ty, sentinel_of(to)?);
                Ok(self.builder.ins().select(null, sentinel, widened))
            }
            (true, false) => Err(JitError::Unsupported(format!("conversion {from} to {to}"))),
        }
    }

    /// `I8` 0/1 telling whether `v`, produced as `kind`, is null
    fn is_null(&mut self, v: Value, kind: DataType) -> JitResult<Value> {
        if kind.is_float() {
            return Ok(self.builder.ins().fcmp(FloatCC::Unordered, v, v));
        }
        if kind == DataType::Boolean {
            return Ok(self.builder.ins().iconst(types::I8, 0));
        }
        let ty = clif_type(storage_of(kind)?);
        let sentinel = int_const(self.builder, ty, sentinel_of(kind)?);
        Ok(self.builder.ins().icmp(IntCC::Equal, v, sentinel))
    }

    fn arithmetic(
        &mut self,
        op: ArithmeticOp,
        kind: DataType,
        left: &ResolvedExpr,
        right: &ResolvedExpr,
    ) -> JitResult<Value> {
        let a = self.operand(left)?;
        let b = self.operand(right)?;

        if kind.is_float() {
            let ins = self.builder.ins();
            return Ok(match op {
                ArithmeticOp::Add => ins.fadd(a, b),
                ArithmeticOp::Sub => ins.fsub(a, b),
                ArithmeticOp::Mul => ins.fmul(a, b),
                ArithmeticOp::Div => ins.fdiv(a, b),
            });
        }

        let ty = clif_type(storage_of(kind)?);
        let sentinel = sentinel_of(kind)?;
        let raw = match op {
            ArithmeticOp::Add => self.builder.ins().iadd(a, b),
            ArithmeticOp::Sub => self.builder.ins().isub(a, b),
            ArithmeticOp::Mul => self.builder.ins().imul(a, b),
            ArithmeticOp::Div => {
                let wide_a = widen_signed(self.builder, a);
                let wide_b = widen_signed(self.builder, b);
                let q = checked_div(self.builder, wide_a, wide_b, sentinel);
                narrow(self.builder, q, ty)
            }
        };

        let null = match (left.nullable, right.nullable) {
            (false, false) => return Ok(raw),
            (true, false) => self.is_null(a, kind)?,
            (false, true) => self.is_null(b, kind)?,
            (true, true) => {
                let l = self.is_null(a, kind)?;
                let r = self.is_null(b, kind)?;
                self.builder.ins().bor(l, r)
            }
        };
        let sentinel = int_const(self.builder, ty, sentinel);
        Ok(self.builder.ins().select(null, sentinel, raw))
    }

    fn compare(&mut self, op: CompareOp, left: &ResolvedExpr, right: &ResolvedExpr) -> JitResult<Value> {
        let kind = left.promoted;
        let a = self.operand(left)?;
        let b = self.operand(right)?;

        if kind == DataType::Boolean {
            return match op {
                CompareOp::Eq => Ok(self.builder.ins().icmp(IntCC::Equal, a, b)),
                CompareOp::Ne => Ok(self.builder.ins().icmp(IntCC::NotEqual, a, b)),
                _ => Err(JitError::Unsupported(format!("{op:?} on booleans"))),
            };
        }

        if kind.is_float() {
            let cc = match op {
                CompareOp::Eq | CompareOp::Ne => {
                    let eq = self.builder.ins().fcmp(FloatCC::Equal, a, b);
                    let nan_a = self.builder.ins().fcmp(FloatCC::Unordered, a, a);
                    let nan_b = self.builder.ins().fcmp(FloatCC::Unordered, b, b);
                    let both_nan = self.builder.ins().band(nan_a, nan_b);
                    let eq = self.builder.ins().bor(eq, both_nan);
                    return Ok(if op == CompareOp::Ne {
                        self.builder.ins().bxor_imm(eq, 1)
                    } else {
                        eq
                    });
                }
                CompareOp::Lt => FloatCC::LessThan,
                CompareOp::Le => FloatCC::LessThanOrEqual,
                CompareOp::Gt => FloatCC::GreaterThan,
                CompareOp::Ge => FloatCC::GreaterThanOrEqual,
            };
            return Ok(self.builder.ins().fcmp(cc, a, b));
        }

        let result = self.builder.ins().icmp(int_cc(op), a, b);
        if !op.is_ordering() {
            return Ok(result);
        }
        let mut result = result;
        for (v, nullable) in [(a, left.nullable), (b, right.nullable)] {
            if nullable {
                let null = self.is_null(v, kind)?;
                let present = self.builder.ins().bxor_imm(null, 1);
                result = self.builder.ins().band(result, present);
            }
        }
        Ok(result)
    }
}

pub(crate) fn int_cc(op: CompareOp) -> IntCC {
    match op {
        CompareOp::Eq => IntCC::Equal,
        CompareOp::Ne => IntCC::NotEqual,
        CompareOp::Lt => IntCC::SignedLessThan,
        CompareOp::Le => IntCC::SignedLessThanOrEqual,
        CompareOp::Gt => IntCC::SignedGreaterThan,
        CompareOp::Ge => IntCC::SignedGreaterThanOrEqual,
    }
}
