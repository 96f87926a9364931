//! Function layout, lane-width selection and the helpers shared by the
//! scalar and vector emitters.

use crate::access::{DataType, StorageType};
use crate::expression::ResolvedFilter;
use crate::jit::compiled::{CompiledFilter, FilterFn};
use crate::jit::scalar::ScalarEmitter;
use crate::jit::vector::{VectorEmitter, VectorShape};
use crate::jit::{JitError, JitResult};
use cranelift_codegen::ir::{condcodes::IntCC, types, AbiParam, InstBuilder, MemFlags, Type, Value};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, Linkage, Module, ModuleError};
use log::debug;
use serde::{Deserialize, Serialize};

const FUNCTION_NAME: &str = "vibejit_filter";

/// Which loops the generated routine contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodegenMode {
    /// SIMD loop over full groups of rows, scalar loop for the remainder
    Vectorized,
    /// Scalar loop over every row
    ScalarOnly,
}

impl CodegenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodegenMode::Vectorized => "vectorized",
            CodegenMode::ScalarOnly => "scalar",
        }
    }
}

/// Bytes per SIMD lane for a filter: the widest storage among every node's
/// produced and consumed kinds, never narrower than 16 bits.
pub fn lane_bytes(filter: &ResolvedFilter) -> usize {
    let mut widest = 2;
    filter.root.walk(&mut |e| {
        for kind in [e.data_type, e.promoted] {
            if let Some(storage) = kind.storage() {
                widest = widest.max(storage.byte_size());
            }
        }
    });
    widest
}

/// Compile `filter` into native code for the host.
///
/// Fails with `JitError::Allocation` when executable memory cannot be
/// obtained; every other error means the filter should run interpreted.
pub fn compile_filter(filter: &ResolvedFilter, mode: CodegenMode) -> JitResult<CompiledFilter> {
    let layout = column_layout(filter)?;
    let shape = VectorShape::new(lane_bytes(filter))?;

    let mut module = host_module()?;
    let ptr_type = module.target_config().pointer_type();
    if ptr_type != types::I64 {
        return Err(JitError::Unsupported(format!(
            "pointer type {ptr_type} on host"
        )));
    }

    let mut ctx = module.make_context();
    let mut func_ctx = FunctionBuilderContext::new();

    // (cols, row_count, out, row_base) -> matched
    ctx.func.signature.params.push(AbiParam::new(ptr_type));
    ctx.func.signature.params.push(AbiParam::new(types::I64));
    ctx.func.signature.params.push(AbiParam::new(ptr_type));
    ctx.func.signature.params.push(AbiParam::new(types::I64));
    ctx.func.signature.returns.push(AbiParam::new(types::I64));

    let func_id = module
        .declare_function(FUNCTION_NAME, Linkage::Local, &ctx.func.signature)
        .map_err(module_error)?;

    {
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut func_ctx);
        build_body(&mut builder, filter, mode, shape)?;
        builder.seal_all_blocks();
        builder.finalize();
    }

    module
        .define_function(func_id, &mut ctx)
        .map_err(module_error)?;
    module.clear_context(&mut ctx);
    module.finalize_definitions().map_err(module_error)?;

    let code = module.get_finalized_function(func_id);
    // SAFETY: the function was declared above with exactly this signature
    // and its module stays alive inside the returned `CompiledFilter`.
    let function = unsafe { std::mem::transmute::<*const u8, FilterFn>(code) };

    debug!(
        "compiled {} filter over columns {:?} with {}-byte lanes",
        mode.as_str(),
        filter.columns,
        shape.lane_bytes()
    );

    Ok(CompiledFilter::new(
        module,
        function,
        mode,
        shape.lanes(),
        layout,
        filter.column_count,
    ))
}

fn host_module() -> JitResult<JITModule> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", "speed")
        .map_err(|e| JitError::Setup(format!("failed to set opt_level: {e}")))?;
    flag_builder
        .set("is_pic", "false")
        .map_err(|e| JitError::Setup(format!("failed to set is_pic: {e}")))?;

    let isa_builder = cranelift_native::builder()
        .map_err(|e| JitError::Setup(format!("host ISA not supported: {e}")))?;
    let isa = isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| JitError::Setup(format!("failed to create ISA: {e}")))?;

    let jit_builder = JITBuilder::with_isa(isa, default_libcall_names());
    Ok(JITModule::new(jit_builder))
}

fn module_error(err: ModuleError) -> JitError {
    match err {
        ModuleError::Allocation { .. } => JitError::Allocation(err.to_string()),
        other => JitError::Codegen(other.to_string()),
    }
}

/// Storage of every referenced column, checked against each frame before the
/// routine touches its memory
fn column_layout(filter: &ResolvedFilter) -> JitResult<Vec<(usize, StorageType)>> {
    let mut layout = Vec::with_capacity(filter.columns.len());
    let mut missing = None;
    filter.root.walk(&mut |e| {
        if let crate::expression::ResolvedNode::Column { index } = e.node {
            match e.data_type.storage() {
                Some(storage) => layout.push((index, storage)),
                None => missing = Some(e.data_type),
            }
        }
    });
    if let Some(kind) = missing {
        return Err(JitError::Unsupported(format!("column of kind {kind}")));
    }
    layout.sort_unstable_by_key(|(index, _)| *index);
    layout.dedup_by_key(|(index, _)| *index);
    Ok(layout)
}

fn build_body(
    builder: &mut FunctionBuilder<'_>,
    filter: &ResolvedFilter,
    mode: CodegenMode,
    shape: VectorShape,
) -> JitResult<()> {
    let entry = builder.create_block();
    let tail_header = builder.create_block();
    let tail_body = builder.create_block();
    let exit = builder.create_block();

    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);
    let params = builder.block_params(entry).to_vec();
    let (cols, row_count, out, row_base) = (params[0], params[1], params[2], params[3]);

    // Column base addresses, indexed by column position
    let mut columns: Vec<Option<Value>> = vec![None; filter.column_count];
    for &index in &filter.columns {
        if index >= columns.len() {
            columns.resize(index + 1, None);
        }
        let offset = i32::try_from(index * 8)
            .map_err(|_| JitError::Unsupported(format!("column index {index}")))?;
        let ptr = builder
            .ins()
            .load(types::I64, MemFlags::trusted(), cols, offset);
        columns[index] = Some(ptr);
    }

    let row = builder.declare_var(types::I64);
    let count = builder.declare_var(types::I64);
    let zero = builder.ins().iconst(types::I64, 0);
    builder.def_var(row, zero);
    builder.def_var(count, zero);

    if mode == CodegenMode::Vectorized {
        // Vector loop over full groups: while row < row_count rounded down
        let vec_header = builder.create_block();
        let vec_body = builder.create_block();
        let lanes = shape.lanes() as i64;
        let vec_end = builder.ins().band_imm(row_count, !(lanes - 1));
        builder.ins().jump(vec_header, &[]);

        builder.switch_to_block(vec_header);
        let i = builder.use_var(row);
        let more = builder.ins().icmp(IntCC::SignedLessThan, i, vec_end);
        builder.ins().brif(more, vec_body, &[], tail_header, &[]);

        builder.switch_to_block(vec_body);
        let i = builder.use_var(row);
        let mask = VectorEmitter::new(builder, &columns, i, shape).predicate(&filter.root)?;
        let first = builder.ins().iadd(row_base, i);
        for lane in 0..shape.lanes() {
            let bit = builder.ins().extractlane(mask, lane as u8);
            let bit = widen_unsigned(builder, bit);
            let bit = builder.ins().band_imm(bit, 1);
            let id = builder.ins().iadd_imm(first, lane as i64);
            emit_append(builder, count, out, id, bit);
        }
        let next = builder.ins().iadd_imm(i, lanes);
        builder.def_var(row, next);
        builder.ins().jump(vec_header, &[]);
    } else {
        builder.ins().jump(tail_header, &[]);
    }

    // Scalar tail: while row < row_count
    builder.switch_to_block(tail_header);
    let i = builder.use_var(row);
    let more = builder.ins().icmp(IntCC::SignedLessThan, i, row_count);
    builder.ins().brif(more, tail_body, &[], exit, &[]);

    builder.switch_to_block(tail_body);
    let i = builder.use_var(row);
    let hit = ScalarEmitter::new(builder, &columns, i).predicate(&filter.root)?;
    let bit = builder.ins().uextend(types::I64, hit);
    let id = builder.ins().iadd(row_base, i);
    emit_append(builder, count, out, id, bit);
    let next = builder.ins().iadd_imm(i, 1);
    builder.def_var(row, next);
    builder.ins().jump(tail_header, &[]);

    builder.switch_to_block(exit);
    let matched = builder.use_var(count);
    builder.ins().return_(&[matched]);
    Ok(())
}

/// Branch-free compaction: always store `id` at `out[count]`, then advance
/// `count` by the 0/1 `bit`. A rejected row is overwritten by the next one.
fn emit_append(
    builder: &mut FunctionBuilder<'_>,
    count: cranelift_frontend::Variable,
    out: Value,
    id: Value,
    bit: Value,
) {
    let n = builder.use_var(count);
    let offset = builder.ins().ishl_imm(n, 3);
    let slot = builder.ins().iadd(out, offset);
    builder.ins().store(MemFlags::trusted(), id, slot, 0);
    let n = builder.ins().iadd(n, bit);
    builder.def_var(count, n);
}

fn widen_unsigned(builder: &mut FunctionBuilder<'_>, value: Value) -> Value {
    if builder.func.dfg.value_type(value) == types::I64 {
        value
    } else {
        builder.ins().uextend(types::I64, value)
    }
}

/// Scalar IR type holding a value of `storage`; booleans are 0/1 bytes
pub(crate) fn clif_type(storage: StorageType) -> Type {
    match storage {
        StorageType::Boolean | StorageType::Int8 => types::I8,
        StorageType::Int16 => types::I16,
        StorageType::Int32 => types::I32,
        StorageType::Int64 => types::I64,
        StorageType::Float32 => types::F32,
        StorageType::Float64 => types::F64,
    }
}

pub(crate) fn storage_of(kind: DataType) -> JitResult<StorageType> {
    kind.storage()
        .ok_or_else(|| JitError::Unsupported(format!("values of kind {kind}")))
}

pub(crate) fn sentinel_of(kind: DataType) -> JitResult<i64> {
    kind.null_sentinel()
        .ok_or_else(|| JitError::Unsupported(format!("no null sentinel for {kind}")))
}

/// Integer constant of `ty`, truncated to the type's width
pub(crate) fn int_const(builder: &mut FunctionBuilder<'_>, ty: Type, value: i64) -> Value {
    let bits = ty.bits();
    let value = if bits < 64 {
        value & ((1i64 << bits) - 1)
    } else {
        value
    };
    builder.ins().iconst(ty, value)
}

/// Sign-extend an integer to 64 bits
pub(crate) fn widen_signed(builder: &mut FunctionBuilder<'_>, value: Value) -> Value {
    if builder.func.dfg.value_type(value) == types::I64 {
        value
    } else {
        builder.ins().sextend(types::I64, value)
    }
}

/// Truncate a 64-bit result to `ty`
pub(crate) fn narrow(builder: &mut FunctionBuilder<'_>, value: Value, ty: Type) -> Value {
    if ty == types::I64 {
        value
    } else {
        builder.ins().ireduce(ty, value)
    }
}

/// 64-bit integer division that never traps: a zero divisor yields
/// `sentinel` and a divisor of -1 yields the wrapping negation.
pub(crate) fn checked_div(
    builder: &mut FunctionBuilder<'_>,
    a: Value,
    b: Value,
    sentinel: i64,
) -> Value {
    let zero = builder.ins().iconst(types::I64, 0);
    let one = builder.ins().iconst(types::I64, 1);
    let minus_one = builder.ins().iconst(types::I64, -1);
    let by_zero = builder.ins().icmp(IntCC::Equal, b, zero);
    let by_minus_one = builder.ins().icmp(IntCC::Equal, b, minus_one);
    let special = builder.ins().bor(by_zero, by_minus_one);
    let divisor = builder.ins().select(special, one, b);
    let quotient = builder.ins().sdiv(a, divisor);
    let negated = builder.ins().ineg(a);
    let result = builder.ins().select(by_minus_one, negated, quotient);
    let null = builder.ins().iconst(types::I64, sentinel);
    builder.ins().select(by_zero, null, result)
}
