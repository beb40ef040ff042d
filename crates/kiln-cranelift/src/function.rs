//! Function-level code generation.
//!
//! Translates the blocks and instructions of one kiln function into
//! Cranelift IR using `FunctionBuilder`.

use std::collections::HashMap;

use cranelift_codegen::ir::types as cl_types;
use cranelift_codegen::ir::{self as cl_ir, InstBuilder, SourceLoc};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::FunctionBuilder;
use kiln_ir::{
    BinaryOp, Block, CastOp, DominatorTree, Function, Inst, InstKind, IntCC, Module, Type, Value,
    ValueDef,
};

use crate::errors::{CompilationError, CompilationResult};

/// Translate a kiln type to a Cranelift IR type. `void` has none.
pub(crate) fn translate_type(ty: Type) -> Option<cl_types::Type> {
    match ty {
        Type::I8 => Some(cl_types::I8),
        Type::I16 => Some(cl_types::I16),
        Type::I32 => Some(cl_types::I32),
        Type::I64 => Some(cl_types::I64),
        Type::Void => None,
    }
}

/// Translate a kiln signature to a Cranelift `Signature`.
pub(crate) fn translate_signature(
    sig: &kiln_ir::Signature,
    call_conv: CallConv,
) -> cl_ir::Signature {
    let mut cl_sig = cl_ir::Signature::new(call_conv);
    for &param in &sig.params {
        if let Some(ty) = translate_type(param) {
            cl_sig.params.push(cl_ir::AbiParam::new(ty));
        }
    }
    if let Some(ty) = translate_type(sig.ret) {
        cl_sig.returns.push(cl_ir::AbiParam::new(ty));
    }
    cl_sig
}

fn translate_cc(cc: IntCC) -> cl_ir::condcodes::IntCC {
    use cl_ir::condcodes::IntCC as Cl;
    match cc {
        IntCC::Eq => Cl::Equal,
        IntCC::Ne => Cl::NotEqual,
        IntCC::Ult => Cl::UnsignedLessThan,
        IntCC::Ule => Cl::UnsignedLessThanOrEqual,
        IntCC::Ugt => Cl::UnsignedGreaterThan,
        IntCC::Uge => Cl::UnsignedGreaterThanOrEqual,
        IntCC::Slt => Cl::SignedLessThan,
        IntCC::Sle => Cl::SignedLessThanOrEqual,
        IntCC::Sgt => Cl::SignedGreaterThan,
        IntCC::Sge => Cl::SignedGreaterThanOrEqual,
    }
}

/// Functions called from `func`, in first-use order.
pub(crate) fn callees(module: &Module, func: Function) -> Vec<Function> {
    let mut seen = Vec::new();
    for &block in &module.function(func).blocks {
        for &inst in &module.block(block).insts {
            if let InstKind::Call(callee) = module.inst(inst).kind
                && !seen.contains(&callee)
            {
                seen.push(callee);
            }
        }
    }
    seen
}

/// Translates one function body to Cranelift IR.
pub(crate) struct FunctionTranslator<'a> {
    module: &'a Module,
    func: Function,
    builder: FunctionBuilder<'a>,
    /// Maps kiln values to Cranelift values. Constants are not recorded;
    /// they are materialized at each use.
    values: HashMap<Value, cl_ir::Value>,
    blocks: HashMap<Block, cl_ir::Block>,
    func_refs: &'a HashMap<Function, cl_ir::FuncRef>,
    /// Attach source locations; only set when debug metadata is sealed.
    track_locations: bool,
}

impl<'a> FunctionTranslator<'a> {
    pub(crate) fn new(
        module: &'a Module,
        func: Function,
        builder: FunctionBuilder<'a>,
        func_refs: &'a HashMap<Function, cl_ir::FuncRef>,
    ) -> Self {
        Self {
            module,
            func,
            builder,
            values: HashMap::new(),
            blocks: HashMap::new(),
            func_refs,
            track_locations: module.debug_info().is_sealed(),
        }
    }

    /// Translate the whole body and finalize the builder.
    pub(crate) fn translate(mut self) -> CompilationResult<()> {
        let module = self.module;
        let data = module.function(self.func);
        let Some(entry) = data.entry_block() else {
            return Err(CompilationError::codegen(format!(
                "@{} has no body to translate",
                data.name
            )));
        };

        // Unreachable blocks are never branched to from translated code,
        // so they are left out instead of lowered.
        let domtree = DominatorTree::compute(module, self.func);
        let order = domtree.reverse_postorder();
        let skipped = data.blocks.len().saturating_sub(order.len());
        if skipped > 0 {
            tracing::debug!(function = %data.name, skipped, "skipping unreachable blocks");
        }

        for &block in order {
            self.check_block(block)?;
            let cl_block = self.builder.create_block();
            self.blocks.insert(block, cl_block);
        }

        let cl_entry = self.lookup_block(entry)?;
        self.builder.append_block_params_for_function_params(cl_entry);
        let params = self.builder.block_params(cl_entry).to_vec();
        for (&param, cl_param) in data.params.iter().zip(params) {
            self.values.insert(param, cl_param);
        }

        for &block in order {
            let cl_block = self.lookup_block(block)?;
            self.builder.switch_to_block(cl_block);
            for &inst in &module.block(block).insts {
                let loc = module
                    .inst(inst)
                    .debug_loc
                    .filter(|_| self.track_locations)
                    .map(|loc| SourceLoc::new(loc.line))
                    .unwrap_or_default();
                self.builder.set_srcloc(loc);
                self.translate_inst(inst)?;
            }
        }

        self.builder.seal_all_blocks();
        self.builder.finalize();
        Ok(())
    }

    /// A block must end in exactly one terminator before Cranelift sees it.
    fn check_block(&self, block: Block) -> CompilationResult<()> {
        let insts = &self.module.block(block).insts;
        let terminators = insts
            .iter()
            .filter(|&&inst| self.module.inst(inst).kind.is_terminator())
            .count();
        if terminators != 1 || self.module.terminator(block).is_none() {
            return Err(CompilationError::codegen(format!(
                "block %{} of @{} must end with exactly one terminator",
                self.module.block(block).label,
                self.module.function(self.func).name
            )));
        }
        Ok(())
    }

    fn lookup(&mut self, value: Value) -> CompilationResult<cl_ir::Value> {
        if let Some(&cl_value) = self.values.get(&value) {
            return Ok(cl_value);
        }
        let module = self.module;
        if !module.contains_value(value) {
            return Err(CompilationError::codegen(format!("unknown value {value}")));
        }
        let data = module.value(value);
        match (data.def, translate_type(data.ty)) {
            // Bits are stored zero-extended, which is what `iconst` expects
            // for narrow types.
            (ValueDef::Const(bits), Some(ty)) => Ok(self.builder.ins().iconst(ty, bits as i64)),
            _ => Err(CompilationError::codegen(format!(
                "{value} is not available in @{}",
                module.function(self.func).name
            ))),
        }
    }

    fn lookup_block(&self, block: Block) -> CompilationResult<cl_ir::Block> {
        self.blocks.get(&block).copied().ok_or_else(|| {
            CompilationError::codegen(format!(
                "branch to {block}, which is not in @{}",
                self.module.function(self.func).name
            ))
        })
    }

    fn operand(&mut self, inst: Inst, index: usize) -> CompilationResult<cl_ir::Value> {
        let module = self.module;
        let value = module
            .inst(inst)
            .operands
            .get(index)
            .copied()
            .ok_or_else(|| {
                CompilationError::codegen(format!("{inst} is missing operand {index}"))
            })?;
        self.lookup(value)
    }

    fn result_type(&self, inst: Inst) -> CompilationResult<cl_types::Type> {
        self.module
            .inst(inst)
            .result
            .and_then(|v| translate_type(self.module.value_type(v)))
            .ok_or_else(|| CompilationError::codegen(format!("{inst} has no integer result")))
    }

    fn define(&mut self, inst: Inst, cl_value: cl_ir::Value) {
        if let Some(result) = self.module.inst(inst).result {
            self.values.insert(result, cl_value);
        }
    }

    fn translate_inst(&mut self, inst: Inst) -> CompilationResult<()> {
        let module = self.module;
        match &module.inst(inst).kind {
            InstKind::Binary(op) => {
                let lhs = self.operand(inst, 0)?;
                let rhs = self.operand(inst, 1)?;
                let ins = self.builder.ins();
                let result = match op {
                    BinaryOp::Add => ins.iadd(lhs, rhs),
                    BinaryOp::Sub => ins.isub(lhs, rhs),
                    BinaryOp::Mul => ins.imul(lhs, rhs),
                    BinaryOp::UDiv => ins.udiv(lhs, rhs),
                    BinaryOp::SDiv => ins.sdiv(lhs, rhs),
                    BinaryOp::URem => ins.urem(lhs, rhs),
                    BinaryOp::SRem => ins.srem(lhs, rhs),
                    BinaryOp::And => ins.band(lhs, rhs),
                    BinaryOp::Or => ins.bor(lhs, rhs),
                    BinaryOp::Xor => ins.bxor(lhs, rhs),
                    BinaryOp::Shl => ins.ishl(lhs, rhs),
                    BinaryOp::LShr => ins.ushr(lhs, rhs),
                    BinaryOp::AShr => ins.sshr(lhs, rhs),
                };
                self.define(inst, result);
            }
            InstKind::Icmp(cc) => {
                let lhs = self.operand(inst, 0)?;
                let rhs = self.operand(inst, 1)?;
                let result = self.builder.ins().icmp(translate_cc(*cc), lhs, rhs);
                self.define(inst, result);
            }
            InstKind::Cast(op) => {
                let value = self.operand(inst, 0)?;
                let to = self.result_type(inst)?;
                let ins = self.builder.ins();
                let result = match op {
                    CastOp::ZExt => ins.uextend(to, value),
                    CastOp::SExt => ins.sextend(to, value),
                    CastOp::Trunc => ins.ireduce(to, value),
                };
                self.define(inst, result);
            }
            InstKind::Call(callee) => {
                let func_ref = self.func_refs.get(callee).copied().ok_or_else(|| {
                    let name = if module.contains_function(*callee) {
                        module.function(*callee).name.as_str()
                    } else {
                        "<unknown>"
                    };
                    CompilationError::function_not_found(name)
                })?;
                let args = (0..module.inst(inst).operands.len())
                    .map(|index| self.operand(inst, index))
                    .collect::<CompilationResult<Vec<_>>>()?;
                let call = self.builder.ins().call(func_ref, &args);
                if let Some(&result) = self.builder.inst_results(call).first() {
                    self.define(inst, result);
                }
            }
            InstKind::Return => {
                let values = (0..module.inst(inst).operands.len())
                    .map(|index| self.operand(inst, index))
                    .collect::<CompilationResult<Vec<_>>>()?;
                self.builder.ins().return_(&values);
            }
            InstKind::Jump(dest) => {
                let dest = self.lookup_block(*dest)?;
                self.builder.ins().jump(dest, &[]);
            }
            InstKind::Brif {
                then_dest,
                else_dest,
            } => {
                let cond = self.operand(inst, 0)?;
                let then_block = self.lookup_block(*then_dest)?;
                let else_block = self.lookup_block(*else_dest)?;
                self.builder
                    .ins()
                    .brif(cond, then_block, &[], else_block, &[]);
            }
            // Markers carry metadata only.
            InstKind::DebugLabel(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_type_integers() {
        assert_eq!(translate_type(Type::I8), Some(cl_types::I8));
        assert_eq!(translate_type(Type::I16), Some(cl_types::I16));
        assert_eq!(translate_type(Type::I32), Some(cl_types::I32));
        assert_eq!(translate_type(Type::I64), Some(cl_types::I64));
        assert_eq!(translate_type(Type::Void), None);
    }

    #[test]
    fn translate_signature_void_return() {
        let sig = kiln_ir::Signature::new([Type::I32, Type::I8], Type::Void);
        let cl_sig = translate_signature(&sig, CallConv::SystemV);
        assert_eq!(cl_sig.params.len(), 2);
        assert_eq!(cl_sig.params[1].value_type, cl_types::I8);
        assert!(cl_sig.returns.is_empty());
    }

    #[test]
    fn callees_are_listed_once() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let g = b
            .create_function("g", &[], Type::I32, kiln_ir::Linkage::External)
            .unwrap();
        let f = b
            .create_function("f", &[], Type::I32, kiln_ir::Linkage::External)
            .unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        b.set_insertion_point(entry).unwrap();
        let a = b.call(g, &[]).unwrap();
        let c = b.call(g, &[]).unwrap();
        let sum = b.add(a, c).unwrap();
        b.ret(Some(sum)).unwrap();
        assert_eq!(callees(&module, f), vec![g]);
    }
}
