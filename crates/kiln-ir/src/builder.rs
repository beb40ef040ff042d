//! The IR builder.
//!
//! A `Builder` borrows a [`Module`] mutably and keeps an insertion cursor.
//! Instruction-creating calls append to the block the cursor points at;
//! terminators close that block for further emission.
//!
//! ```
//! use kiln_ir::{Linkage, Module, Type};
//!
//! let mut module = Module::new("mymod");
//! let mut b = module.builder();
//! let f = b.create_function("add_665", &[Type::I32], Type::I32, Linkage::External)?;
//! let x = b.param(f, 0).unwrap();
//! b.set_value_name(x, "x")?;
//! let entry = b.append_block(f, "entry")?;
//! b.set_insertion_point(entry)?;
//! let k = b.iconst(Type::I32, 665)?;
//! let res = b.add(x, k)?;
//! b.ret(Some(res))?;
//! # Ok::<(), kiln_ir::IrError>(())
//! ```

use smallvec::{SmallVec, smallvec};

use crate::debug_info::{DebugBuilder, DebugLoc, LabelId, SubprogramId};
use crate::entities::{Block, Function, Inst, Value};
use crate::errors::{IrError, IrResult};
use crate::instruction::{BinaryOp, CastOp, InstData, InstKind, IntCC};
use crate::module::{BlockData, FunctionData, Module, ValueData, ValueDef};
use crate::types::{Linkage, Signature, Type};

pub struct Builder<'m> {
    module: &'m mut Module,
    position: Option<Block>,
    debug_loc: Option<DebugLoc>,
}

impl<'m> Builder<'m> {
    pub(crate) fn new(module: &'m mut Module) -> Self {
        Self {
            module,
            position: None,
            debug_loc: None,
        }
    }

    pub fn module(&self) -> &Module {
        &*self.module
    }

    /// Metadata builder over the same module, for interleaving label and
    /// subprogram creation with instruction emission.
    pub fn debug(&mut self) -> DebugBuilder<'_> {
        self.module.debug_builder()
    }

    // ========================================================================
    // Functions and blocks
    // ========================================================================

    /// Add a function to the module. It stays a declaration until a block
    /// is appended.
    pub fn create_function(
        &mut self,
        name: &str,
        params: &[Type],
        ret: Type,
        linkage: Linkage,
    ) -> IrResult<Function> {
        if self.module.function_names.contains_key(name) {
            return Err(IrError::DuplicateName {
                name: name.to_owned(),
            });
        }
        if let Some(index) = params.iter().position(|ty| !ty.is_int()) {
            return Err(IrError::VoidParameter {
                function: name.to_owned(),
                index,
            });
        }

        let func = self.module.functions.push(FunctionData {
            name: name.to_owned(),
            signature: Signature::new(params, ret),
            linkage,
            params: SmallVec::new(),
            blocks: Vec::new(),
            subprogram: None,
        });
        for (index, &ty) in params.iter().enumerate() {
            let value = self.module.values.push(ValueData {
                def: ValueDef::Param(func, index as u32),
                ty,
                name: None,
            });
            self.module.functions[func].params.push(value);
        }
        self.module.function_names.insert(name.to_owned(), func);
        tracing::trace!(%func, name, "created function");
        Ok(func)
    }

    /// Append an empty block to `func`. The first block is the entry.
    pub fn append_block(&mut self, func: Function, label: &str) -> IrResult<Block> {
        self.ensure_function(func)?;
        let block = self.module.blocks.push(BlockData {
            label: label.to_owned(),
            function: func,
            insts: Vec::new(),
        });
        self.module.functions[func].blocks.push(block);
        Ok(block)
    }

    /// Direct subsequent emission to the end of `block`.
    pub fn set_insertion_point(&mut self, block: Block) -> IrResult<()> {
        if !self.module.contains_block(block) {
            return Err(unknown("block", block));
        }
        self.position = Some(block);
        Ok(())
    }

    pub fn current_block(&self) -> Option<Block> {
        self.position
    }

    /// Argument `index` of `func`.
    pub fn param(&self, func: Function, index: usize) -> Option<Value> {
        self.module
            .functions
            .get(func)
            .and_then(|data| data.params.get(index).copied())
    }

    /// Give a value a printable name.
    pub fn set_value_name(&mut self, value: Value, name: &str) -> IrResult<()> {
        self.ensure_value(value)?;
        self.module.values[value].name = Some(name.to_owned());
        Ok(())
    }

    /// Attach debug metadata to a function.
    pub fn set_subprogram(&mut self, func: Function, sp: SubprogramId) -> IrResult<()> {
        self.ensure_function(func)?;
        if self.module.debug_info.subprogram(sp).is_none() {
            return Err(unknown("subprogram", sp));
        }
        self.module.functions[func].subprogram = Some(sp);
        Ok(())
    }

    /// Location recorded on every instruction emitted from now on.
    pub fn set_debug_location(&mut self, loc: Option<DebugLoc>) {
        self.debug_loc = loc;
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Intern an integer constant. The value wraps to the type's width.
    pub fn iconst(&mut self, ty: Type, value: i64) -> IrResult<Value> {
        if !ty.is_int() {
            return Err(IrError::TypeMismatch {
                op: "iconst",
                lhs: ty,
                rhs: Type::I64,
            });
        }
        let bits = ty.wrap(value as u64);
        if let Some(&existing) = self.module.constants.get(&(ty, bits)) {
            return Ok(existing);
        }
        let value = self.module.values.push(ValueData {
            def: ValueDef::Const(bits),
            ty,
            name: None,
        });
        self.module.constants.insert((ty, bits), value);
        Ok(value)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> IrResult<Value> {
        let ty = self.same_int_type(op.mnemonic(), lhs, rhs)?;
        let (_, result) =
            self.push_inst(InstKind::Binary(op), smallvec![lhs, rhs], Some(ty))?;
        result.ok_or(IrError::NoInsertionPoint)
    }

    pub fn add(&mut self, lhs: Value, rhs: Value) -> IrResult<Value> {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: Value, rhs: Value) -> IrResult<Value> {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: Value, rhs: Value) -> IrResult<Value> {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    /// Compare two integers; the result is an `i8` holding 0 or 1.
    pub fn icmp(&mut self, cc: IntCC, lhs: Value, rhs: Value) -> IrResult<Value> {
        self.same_int_type("icmp", lhs, rhs)?;
        let (_, result) = self.push_inst(InstKind::Icmp(cc), smallvec![lhs, rhs], Some(Type::I8))?;
        result.ok_or(IrError::NoInsertionPoint)
    }

    pub fn cast(&mut self, op: CastOp, value: Value, to: Type) -> IrResult<Value> {
        self.ensure_value(value)?;
        let from = self.module.value_type(value);
        if !op.accepts(from, to) {
            return Err(IrError::TypeMismatch {
                op: op.mnemonic(),
                lhs: from,
                rhs: to,
            });
        }
        let (_, result) = self.push_inst(InstKind::Cast(op), smallvec![value], Some(to))?;
        result.ok_or(IrError::NoInsertionPoint)
    }

    /// Call `callee` and return its result.
    ///
    /// Fails with [`IrError::ArityMismatch`] if the argument count differs
    /// from the callee's parameter count, and with
    /// [`IrError::VoidCallResult`] if the callee returns `void`.
    pub fn call(&mut self, callee: Function, args: &[Value]) -> IrResult<Value> {
        let (_, result) = self.emit_call(callee, args)?;
        result.ok_or_else(|| IrError::VoidCallResult {
            callee: self.module.functions[callee].name.clone(),
        })
    }

    /// Call `callee`, discarding any result.
    pub fn call_void(&mut self, callee: Function, args: &[Value]) -> IrResult<Inst> {
        self.emit_call(callee, args).map(|(inst, _)| inst)
    }

    fn emit_call(&mut self, callee: Function, args: &[Value]) -> IrResult<(Inst, Option<Value>)> {
        self.ensure_function(callee)?;
        let callee_data = &self.module.functions[callee];
        if callee_data.signature.params.len() != args.len() {
            return Err(IrError::ArityMismatch {
                callee: callee_data.name.clone(),
                expected: callee_data.signature.params.len(),
                found: args.len(),
            });
        }
        let ret = callee_data.signature.ret;
        for &arg in args {
            self.ensure_value(arg)?;
        }
        let result_ty = ret.is_int().then_some(ret);
        self.push_inst(InstKind::Call(callee), SmallVec::from_slice(args), result_ty)
    }

    // ========================================================================
    // Terminators and markers
    // ========================================================================

    /// Return from the function, with a value unless it returns `void`.
    pub fn ret(&mut self, value: Option<Value>) -> IrResult<Inst> {
        if let Some(value) = value {
            self.ensure_value(value)?;
        }
        let operands = value.into_iter().collect();
        self.push_inst(InstKind::Return, operands, None)
            .map(|(inst, _)| inst)
    }

    pub fn jump(&mut self, dest: Block) -> IrResult<Inst> {
        if !self.module.contains_block(dest) {
            return Err(unknown("block", dest));
        }
        self.push_inst(InstKind::Jump(dest), SmallVec::new(), None)
            .map(|(inst, _)| inst)
    }

    /// Branch to `then_dest` if `cond` is non-zero, else to `else_dest`.
    pub fn brif(&mut self, cond: Value, then_dest: Block, else_dest: Block) -> IrResult<Inst> {
        self.ensure_value(cond)?;
        for dest in [then_dest, else_dest] {
            if !self.module.contains_block(dest) {
                return Err(unknown("block", dest));
            }
        }
        self.push_inst(
            InstKind::Brif {
                then_dest,
                else_dest,
            },
            smallvec![cond],
            None,
        )
        .map(|(inst, _)| inst)
    }

    /// Place a debug label marker at the insertion point. The marker has no
    /// operands, produces no value and emits no code.
    pub fn debug_label(&mut self, label: LabelId) -> IrResult<Inst> {
        if self.module.debug_info.label(label).is_none() {
            return Err(unknown("label", label));
        }
        self.push_inst(InstKind::DebugLabel(label), SmallVec::new(), None)
            .map(|(inst, _)| inst)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn open_block(&self) -> IrResult<Block> {
        let block = self.position.ok_or(IrError::NoInsertionPoint)?;
        if self.module.terminator(block).is_some() {
            return Err(IrError::BlockTerminated {
                block: self.module.blocks[block].label.clone(),
            });
        }
        Ok(block)
    }

    fn push_inst(
        &mut self,
        kind: InstKind,
        operands: SmallVec<[Value; 2]>,
        result_ty: Option<Type>,
    ) -> IrResult<(Inst, Option<Value>)> {
        let block = self.open_block()?;
        let inst = self.module.insts.push(InstData {
            kind,
            operands,
            result: None,
            block,
            debug_loc: self.debug_loc,
        });
        let result = result_ty.map(|ty| {
            self.module.values.push(ValueData {
                def: ValueDef::Result(inst),
                ty,
                name: None,
            })
        });
        self.module.insts[inst].result = result;
        self.module.blocks[block].insts.push(inst);
        Ok((inst, result))
    }

    fn same_int_type(&self, op: &'static str, lhs: Value, rhs: Value) -> IrResult<Type> {
        self.ensure_value(lhs)?;
        self.ensure_value(rhs)?;
        let lhs_ty = self.module.value_type(lhs);
        let rhs_ty = self.module.value_type(rhs);
        if lhs_ty != rhs_ty || !lhs_ty.is_int() {
            return Err(IrError::TypeMismatch {
                op,
                lhs: lhs_ty,
                rhs: rhs_ty,
            });
        }
        Ok(lhs_ty)
    }

    fn ensure_function(&self, func: Function) -> IrResult<()> {
        if self.module.contains_function(func) {
            Ok(())
        } else {
            Err(unknown("function", func))
        }
    }

    fn ensure_value(&self, value: Value) -> IrResult<()> {
        if self.module.contains_value(value) {
            Ok(())
        } else {
            Err(unknown("value", value))
        }
    }
}

fn unknown(kind: &'static str, entity: impl std::fmt::Display) -> IrError {
    IrError::UnknownEntity {
        kind,
        entity: entity.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug_info::SourceLanguage;

    fn add_k(module: &mut Module, name: &str, k: i64) -> Function {
        let mut b = module.builder();
        let f = b
            .create_function(name, &[Type::I32], Type::I32, Linkage::External)
            .unwrap();
        let x = b.param(f, 0).unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        b.set_insertion_point(entry).unwrap();
        let k = b.iconst(Type::I32, k).unwrap();
        let res = b.add(x, k).unwrap();
        b.ret(Some(res)).unwrap();
        f
    }

    #[test]
    fn duplicate_function_name_is_rejected() {
        let mut module = Module::new("m");
        add_k(&mut module, "add_k", 1);
        let err = module
            .builder()
            .create_function("add_k", &[], Type::I32, Linkage::External)
            .unwrap_err();
        assert_eq!(
            err,
            IrError::DuplicateName {
                name: "add_k".into()
            }
        );
        assert_eq!(module.functions().count(), 1);
    }

    #[test]
    fn call_arity_is_checked() {
        let mut module = Module::new("m");
        let callee = add_k(&mut module, "add_3", 3);
        let mut b = module.builder();
        let main = b
            .create_function("main", &[], Type::I32, Linkage::External)
            .unwrap();
        let entry = b.append_block(main, "entry").unwrap();
        b.set_insertion_point(entry).unwrap();
        let one = b.iconst(Type::I32, 1).unwrap();

        let err = b.call(callee, &[one, one]).unwrap_err();
        assert_eq!(
            err,
            IrError::ArityMismatch {
                callee: "add_3".into(),
                expected: 1,
                found: 2
            }
        );
        // The failed call left the block untouched.
        assert!(module.block(entry).insts.is_empty());
    }

    #[test]
    fn emission_after_terminator_is_rejected() {
        let mut module = Module::new("m");
        let f = add_k(&mut module, "f", 1);
        let entry = module.function(f).entry_block().unwrap();
        let mut b = module.builder();
        b.set_insertion_point(entry).unwrap();
        let x = b.param(f, 0).unwrap();

        assert!(matches!(b.add(x, x), Err(IrError::BlockTerminated { .. })));
        assert!(matches!(b.ret(Some(x)), Err(IrError::BlockTerminated { .. })));
    }

    #[test]
    fn emission_without_insertion_point_fails() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let c = b.iconst(Type::I32, 1).unwrap();
        assert_eq!(b.current_block(), None);
        assert_eq!(b.add(c, c), Err(IrError::NoInsertionPoint));
    }

    #[test]
    fn insertion_point_tracks_the_current_block() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let f = b
            .create_function("f", &[], Type::I32, Linkage::External)
            .unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        let exit = b.append_block(f, "exit").unwrap();
        b.set_insertion_point(entry).unwrap();
        assert_eq!(b.current_block(), Some(entry));
        b.jump(exit).unwrap();
        b.set_insertion_point(exit).unwrap();
        assert_eq!(b.current_block(), Some(exit));

        // Emitted instructions are visible through the builder.
        let zero = b.iconst(Type::I32, 0).unwrap();
        b.ret(Some(zero)).unwrap();
        assert_eq!(b.module().function(f).blocks, vec![entry, exit]);
        assert!(b.module().terminator(exit).is_some());
    }

    #[test]
    fn constants_wrap_and_are_interned() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let a = b.iconst(Type::I8, 256 + 7).unwrap();
        let c = b.iconst(Type::I8, 7).unwrap();
        let d = b.iconst(Type::I8, -1).unwrap();
        assert_eq!(a, c);
        assert_eq!(module.value(a).def, ValueDef::Const(7));
        assert_eq!(module.value(d).def, ValueDef::Const(0xff));
    }

    #[test]
    fn binary_operands_must_agree() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let f = b
            .create_function("f", &[], Type::Void, Linkage::External)
            .unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        b.set_insertion_point(entry).unwrap();
        let small = b.iconst(Type::I8, 1).unwrap();
        let wide = b.iconst(Type::I32, 1).unwrap();
        assert!(matches!(
            b.add(small, wide),
            Err(IrError::TypeMismatch { op: "add", .. })
        ));
        assert!(matches!(
            b.cast(CastOp::Trunc, small, Type::I32),
            Err(IrError::TypeMismatch { op: "trunc", .. })
        ));
        let widened = b.cast(CastOp::ZExt, small, Type::I32).unwrap();
        assert_eq!(module.value_type(widened), Type::I32);
    }

    #[test]
    fn void_call_has_no_result() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let sink = b
            .create_function("sink", &[Type::I32], Type::Void, Linkage::External)
            .unwrap();
        let f = b
            .create_function("f", &[], Type::Void, Linkage::External)
            .unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        b.set_insertion_point(entry).unwrap();
        let one = b.iconst(Type::I32, 1).unwrap();
        assert!(matches!(
            b.call(sink, &[one]),
            Err(IrError::VoidCallResult { .. })
        ));
        let inst = b.call_void(sink, &[one]).unwrap();
        assert_eq!(module.inst(inst).result, None);
        assert!(module.function(sink).is_declaration());
    }

    #[test]
    fn label_marker_has_no_operands_or_result() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let f = b
            .create_function("f", &[], Type::Void, Linkage::External)
            .unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        b.set_insertion_point(entry).unwrap();

        let mut dib = b.debug();
        let file = dib.create_file("main.xxx", ".").unwrap();
        dib.create_compile_unit(SourceLanguage::C, file, "test")
            .unwrap();
        let label = dib.create_label(file, "here", file, 4, true).unwrap();

        let marker = b.debug_label(label).unwrap();
        b.ret(None).unwrap();
        assert!(matches!(b.debug_label(label), Err(IrError::BlockTerminated { .. })));

        let data = module.inst(marker);
        assert!(data.operands.is_empty());
        assert_eq!(data.result, None);
        assert_eq!(data.kind, InstKind::DebugLabel(label));
    }
}
