//! Lowering of one group of rows into 128-bit SIMD values.
//!
//! Every lane has the same width, picked per filter from the widest kind in
//! the tree. Integers are held sign-extended to the lane width and wrapped
//! back to their kind after each operation; `f32` values are held as `f64`
//! lanes (rounded back to single precision after each operation) when the
//! lanes are 64 bits wide. Booleans are lane masks, all ones for true.

use crate::access::{DataType, Datum, StorageType};
use crate::expression::eval::convert;
use crate::expression::{ArithmeticOp, CompareOp, ResolvedExpr, ResolvedNode};
use crate::jit::codegen::{
    checked_div, clif_type, int_const, narrow, sentinel_of, storage_of, widen_signed,
};
use crate::jit::scalar::int_cc;
use crate::jit::{JitError, JitResult};
use cranelift_codegen::ir::{
    condcodes::{FloatCC, IntCC},
    types, InstBuilder, MemFlags, Type, Value,
};
use cranelift_frontend::FunctionBuilder;

/// Lane layout of a 128-bit vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VectorShape {
    lane_bytes: usize,
}

impl VectorShape {
    pub fn new(lane_bytes: usize) -> JitResult<Self> {
        match lane_bytes {
            2 | 4 | 8 => Ok(Self { lane_bytes }),
            other => Err(JitError::Unsupported(format!("{other}-byte lanes"))),
        }
    }

    pub fn lane_bytes(&self) -> usize {
        self.lane_bytes
    }

    /// Rows per group
    pub fn lanes(&self) -> usize {
        16 / self.lane_bytes
    }

    /// Integer type of one lane
    fn lane_type(&self) -> Type {
        match self.lane_bytes {
            2 => types::I16,
            4 => types::I32,
            _ => types::I64,
        }
    }

    /// Integer vector type, also used for masks
    fn int_vector(&self) -> Type {
        match self.lane_bytes {
            2 => types::I16X8,
            4 => types::I32X4,
            _ => types::I64X2,
        }
    }

    /// Float lane type holding values of `kind`
    fn float_lane(&self, kind: DataType) -> Type {
        if kind == DataType::Float32 && self.lane_bytes == 4 {
            types::F32
        } else {
            types::F64
        }
    }

    fn float_vector(&self, kind: DataType) -> Type {
        if self.float_lane(kind) == types::F32 {
            types::F32X4
        } else {
            types::F64X2
        }
    }

    /// Whether `f32` values are widened into `f64` lanes
    fn widens_f32(&self) -> bool {
        self.lane_bytes == 8
    }
}

pub(crate) struct VectorEmitter<'a, 'f> {
    builder: &'a mut FunctionBuilder<'f>,
    columns: &'a [Option<Value>],
    row: Value,
    shape: VectorShape,
}

impl<'a, 'f> VectorEmitter<'a, 'f> {
    pub fn new(
        builder: &'a mut FunctionBuilder<'f>,
        columns: &'a [Option<Value>],
        row: Value,
        shape: VectorShape,
    ) -> Self {
        Self {
            builder,
            columns,
            row,
            shape,
        }
    }

    /// Lower a boolean node to a lane mask for the group starting at `row`
    pub fn predicate(&mut self, expr: &ResolvedExpr) -> JitResult<Value> {
        if expr.data_type != DataType::Boolean {
            return Err(JitError::Unsupported(format!(
                "predicate of kind {}",
                expr.data_type
            )));
        }
        self.value(expr)
    }

    fn value(&mut self, expr: &ResolvedExpr) -> JitResult<Value> {
        match &expr.node {
            ResolvedNode::Column { index } => self.column(*index, expr.data_type),

            ResolvedNode::Constant(datum) => self.constant(*datum, expr.data_type),

            ResolvedNode::Neg(operand) => {
                let v = self.operand(operand)?;
                if expr.data_type.is_float() {
                    Ok(self.builder.ins().fneg(v))
                } else {
                    let negated = self.builder.ins().ineg(v);
                    self.wrap(negated, expr.data_type)
                }
            }

            ResolvedNode::Arithmetic { op, left, right } => {
                self.arithmetic(*op, expr.data_type, left, right)
            }

            ResolvedNode::Compare { op, left, right } => self.compare(*op, left, right),

            ResolvedNode::IsNull { operand, negated } => {
                let v = self.value(operand)?;
                let null = self.is_null(v, operand.data_type)?;
                Ok(if *negated {
                    self.builder.ins().bnot(null)
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
                Ok(self.builder.ins().bnot(v))
            }
        }
    }

    fn operand(&mut self, expr: &ResolvedExpr) -> JitResult<Value> {
        if let Some(datum) = expr.as_constant() {
            let converted = convert(datum, expr.data_type, expr.promoted, expr.nullable);
            return self.constant(converted, expr.promoted);
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
        let size = storage.byte_size();
        let offset = self.builder.ins().imul_imm(self.row, size as i64);
        let addr = self.builder.ins().iadd(base, offset);
        let mut flags = MemFlags::new();
        flags.set_notrap();

        match storage {
            StorageType::Boolean => {
                let bytes = self.gather(addr, storage, self.shape.int_vector())?;
                let zero = self.splat_int(0);
                Ok(self.builder.ins().icmp(IntCC::NotEqual, bytes, zero))
            }
            StorageType::Float32 if !self.shape.widens_f32() => {
                Ok(self.builder.ins().load(types::F32X4, flags, addr, 0))
            }
            StorageType::Float32 => self.gather(addr, storage, types::F64X2),
            StorageType::Float64 => Ok(self.builder.ins().load(types::F64X2, flags, addr, 0)),
            _ if size == self.shape.lane_bytes => {
                Ok(self.builder.ins().load(self.shape.int_vector(), flags, addr, 0))
            }
            _ if size * 2 == self.shape.lane_bytes => Ok(match storage {
                StorageType::Int8 => self.builder.ins().sload8x8(flags, addr, 0),
                StorageType::Int16 => self.builder.ins().sload16x4(flags, addr, 0),
                _ => self.builder.ins().sload32x2(flags, addr, 0),
            }),
            _ => self.gather(addr, storage, self.shape.int_vector()),
        }
    }

    /// Load the group lane by lane, widening each cell into `vector`
    fn gather(&mut self, addr: Value, storage: StorageType, vector: Type) -> JitResult<Value> {
        let size = storage.byte_size();
        let lane_ty = vector.lane_type();
        let zero = if lane_ty.is_float() {
            self.builder.ins().f64const(0.0)
        } else {
            int_const(self.builder, lane_ty, 0)
        };
        let mut acc = self.builder.ins().splat(vector, zero);
        for lane in 0..self.shape.lanes() {
            let offset = i32::try_from(lane * size)
                .map_err(|_| JitError::Codegen(format!("lane offset {lane}")))?;
            let cell = self
                .builder
                .ins()
                .load(clif_type(storage), MemFlags::trusted(), addr, offset);
            let cell = match storage {
                StorageType::Float32 => self.builder.ins().fpromote(types::F64, cell),
                StorageType::Boolean => self.builder.ins().uextend(lane_ty, cell),
                _ if lane_ty.bits() > cell_bits(storage) => self.builder.ins().sextend(lane_ty, cell),
                _ => cell,
            };
            acc = self.builder.ins().insertlane(acc, cell, lane as u8);
        }
        Ok(acc)
    }

    fn splat_int(&mut self, value: i64) -> Value {
        let lane_ty = self.shape.lane_type();
        let scalar = int_const(self.builder, lane_ty, value);
        self.builder.ins().splat(self.shape.int_vector(), scalar)
    }

    fn constant(&mut self, datum: Datum, kind: DataType) -> JitResult<Value> {
        match datum {
            Datum::Boolean(b) => Ok(self.splat_int(if b { -1 } else { 0 })),
            Datum::Float32(v) if !self.shape.widens_f32() => {
                let scalar = self.builder.ins().f32const(v);
                Ok(self.builder.ins().splat(types::F32X4, scalar))
            }
            Datum::Float32(v) => {
                let scalar = self.builder.ins().f64const(v as f64);
                Ok(self.builder.ins().splat(types::F64X2, scalar))
            }
            Datum::Float64(v) => {
                if !self.shape.widens_f32() {
                    return Err(JitError::Codegen(format!(
                        "{kind} constant in {}-byte lanes",
                        self.shape.lane_bytes
                    )));
                }
                let scalar = self.builder.ins().f64const(v);
                Ok(self.builder.ins().splat(types::F64X2, scalar))
            }
            other => Ok(self.splat_int(other.as_i64().unwrap_or_default())),
        }
    }

    fn convert(&mut self, v: Value, from: DataType, to: DataType, nullable: bool) -> JitResult<Value> {
        if from == to {
            return Ok(v);
        }
        match (from.is_float(), to.is_float()) {
            // f32 already sits in f64 lanes whenever f64 is in the tree
            (true, true) if from == DataType::Float32 && self.shape.widens_f32() => Ok(v),
            (true, true) | (true, false) => {
                Err(JitError::Unsupported(format!("conversion {from} to {to}")))
            }
            (false, true) => {
                let vector = self.shape.float_vector(to);
                let float_lane = self.shape.float_lane(to);
                let sentinel = if nullable {
                    Some(sentinel_of(from)?)
                } else {
                    None
                };
                let zero = if float_lane == types::F32 {
                    self.builder.ins().f32const(0.0)
                } else {
                    self.builder.ins().f64const(0.0)
                };
                let mut acc = self.builder.ins().splat(vector, zero);
                for lane in 0..self.shape.lanes() {
                    let x = self.builder.ins().extractlane(v, lane as u8);
                    let wide = widen_signed(self.builder, x);
                    let f = if to == DataType::Float32 {
                        let single = self.builder.ins().fcvt_from_sint(types::F32, wide);
                        if float_lane == types::F64 {
                            self.builder.ins().fpromote(types::F64, single)
                        } else {
                            single
                        }
                    } else {
                        self.builder.ins().fcvt_from_sint(types::F64, wide)
                    };
                    let f = match sentinel {
                        Some(sentinel) => {
                            let lane_ty = self.shape.lane_type();
                            let marker = int_const(self.builder, lane_ty, sentinel);
                            let null = self.builder.ins().icmp(IntCC::Equal, x, marker);
                            let nan = if float_lane == types::F32 {
                                self.builder.ins().f32const(f32::NAN)
                            } else {
                                self.builder.ins().f64const(f64::NAN)
                            };
                            self.builder.ins().select(null, nan, f)
                        }
                        None => f,
                    };
                    acc = self.builder.ins().insertlane(acc, f, lane as u8);
                }
                Ok(acc)
            }
            (false, false) => {
                if !nullable {
                    return Ok(v);
                }
                let null = self.is_null(v, from)?;
                let target = self.splat_int(sentinel_of(to)?);
                Ok(self.builder.ins().bitselect(null, target, v))
            }
        }
    }

    /// Lane mask of nulls in `v`, produced as `kind`
    fn is_null(&mut self, v: Value, kind: DataType) -> JitResult<Value> {
        if kind.is_float() {
            let ordered = self.builder.ins().fcmp(FloatCC::Equal, v, v);
            return Ok(self.builder.ins().bnot(ordered));
        }
        if kind == DataType::Boolean {
            return Ok(self.splat_int(0));
        }
        let sentinel = self.splat_int(sentinel_of(kind)?);
        Ok(self.builder.ins().icmp(IntCC::Equal, v, sentinel))
    }

    /// Wrap sign-extended integer lanes back into the range of `kind`
    fn wrap(&mut self, v: Value, kind: DataType) -> JitResult<Value> {
        let kind_bits = storage_of(kind)?.bits();
        let lane_bits = self.shape.lane_type().bits();
        if kind_bits >= lane_bits {
            return Ok(v);
        }
        let shift = self
            .builder
            .ins()
            .iconst(types::I32, (lane_bits - kind_bits) as i64);
        let shifted = self.builder.ins().ishl(v, shift);
        Ok(self.builder.ins().sshr(shifted, shift))
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
            let result = match op {
                ArithmeticOp::Add => self.builder.ins().fadd(a, b),
                ArithmeticOp::Sub => self.builder.ins().fsub(a, b),
                ArithmeticOp::Mul => self.builder.ins().fmul(a, b),
                ArithmeticOp::Div => self.builder.ins().fdiv(a, b),
            };
            if kind == DataType::Float32 && self.shape.widens_f32() {
                let single = self.builder.ins().fvdemote(result);
                return Ok(self.builder.ins().fvpromote_low(single));
            }
            return Ok(result);
        }

        let raw = match op {
            ArithmeticOp::Add => self.builder.ins().iadd(a, b),
            ArithmeticOp::Sub => self.builder.ins().isub(a, b),
            ArithmeticOp::Mul => self.builder.ins().imul(a, b),
            ArithmeticOp::Div => self.divide(a, b, kind)?,
        };
        let raw = self.wrap(raw, kind)?;

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
        let sentinel = self.splat_int(sentinel_of(kind)?);
        Ok(self.builder.ins().bitselect(null, sentinel, raw))
    }

    /// Lane-wise division; there is no SIMD integer divide
    fn divide(&mut self, a: Value, b: Value, kind: DataType) -> JitResult<Value> {
        let kind_ty = clif_type(storage_of(kind)?);
        let lane_ty = self.shape.lane_type();
        let sentinel = sentinel_of(kind)?;
        let mut acc = self.splat_int(0);
        for lane in 0..self.shape.lanes() {
            let x = self.builder.ins().extractlane(a, lane as u8);
            let y = self.builder.ins().extractlane(b, lane as u8);
            let x = widen_signed(self.builder, x);
            let y = widen_signed(self.builder, y);
            let q = checked_div(self.builder, x, y, sentinel);
            let q = narrow(self.builder, q, kind_ty);
            let q = if lane_ty.bits() > kind_ty.bits() {
                self.builder.ins().sextend(lane_ty, q)
            } else {
                q
            };
            acc = self.builder.ins().insertlane(acc, q, lane as u8);
        }
        Ok(acc)
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
                    let nan_a = self.is_null(a, kind)?;
                    let nan_b = self.is_null(b, kind)?;
                    let both_nan = self.builder.ins().band(nan_a, nan_b);
                    let eq = self.builder.ins().bor(eq, both_nan);
                    return Ok(if op == CompareOp::Ne {
                        self.builder.ins().bnot(eq)
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

        let mut result = self.builder.ins().icmp(int_cc(op), a, b);
        if op.is_ordering() {
            for (v, nullable) in [(a, left.nullable), (b, right.nullable)] {
                if nullable {
                    let null = self.is_null(v, kind)?;
                    result = self.builder.ins().band_not(result, null);
                }
            }
        }
        Ok(result)
    }
}

fn cell_bits(storage: StorageType) -> u32 {
    clif_type(storage).bits()
}
