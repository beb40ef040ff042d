//! The module: owning container for functions, blocks, instructions,
//! values, the constant pool and the debug metadata table.

use std::collections::HashMap;
use std::fmt;

use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

use crate::builder::Builder;
use crate::debug_info::{DebugBuilder, DebugInfo, SubprogramId};
use crate::entities::{Block, Function, Inst, Value};
use crate::instruction::InstData;
use crate::types::{Linkage, Signature, Type};

/// Where a value comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueDef {
    /// A typed integer literal; the bits are already wrapped to the type.
    Const(u64),
    /// Parameter `index` of a function.
    Param(Function, u32),
    /// Result of an instruction.
    Result(Inst),
}

#[derive(Clone, Debug)]
pub struct ValueData {
    pub def: ValueDef,
    pub ty: Type,
    pub name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct FunctionData {
    pub name: String,
    pub signature: Signature,
    pub linkage: Linkage,
    pub params: SmallVec<[Value; 4]>,
    pub blocks: Vec<Block>,
    /// Key into the module's debug table, not an owning link.
    pub subprogram: Option<SubprogramId>,
}

impl FunctionData {
    /// A function without blocks is a declaration of an external symbol.
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn entry_block(&self) -> Option<Block> {
        self.blocks.first().copied()
    }
}

#[derive(Clone, Debug)]
pub struct BlockData {
    pub label: String,
    pub function: Function,
    pub insts: Vec<Inst>,
}

/// The target a module has been configured for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetSpec {
    pub triple: String,
    pub data_layout: DataLayout,
}

/// Byte order of the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endianness {
    Little,
    Big,
}

/// Symbol mangling scheme of the object format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mangling {
    Elf,
    MachO,
    Coff,
    /// 32-bit COFF with leading underscores.
    WindowsX86,
}

impl Mangling {
    fn code(self) -> char {
        match self {
            Mangling::Elf => 'e',
            Mangling::MachO => 'o',
            Mangling::Coff => 'w',
            Mangling::WindowsX86 => 'x',
        }
    }
}

/// Target rules for type sizes, alignment and byte order.
///
/// Displays in LLVM's data-layout string syntax, e.g.
/// `e-m:e-p:64:64-i64:64-n8:16:32:64-S128`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataLayout {
    pub endianness: Endianness,
    pub mangling: Mangling,
    pub pointer_bits: u32,
    pub native_int_bits: Vec<u32>,
    pub stack_align_bits: u32,
}

impl DataLayout {
    pub fn size_of(&self, ty: Type) -> u32 {
        ty.bits() / 8
    }

    /// ABI alignment in bytes. `i64` is only naturally aligned on targets
    /// with 64-bit native integers.
    pub fn abi_align(&self, ty: Type) -> u32 {
        match ty {
            Type::I64 if self.pointer_bits < 64 => 4,
            ty => self.size_of(ty).max(1),
        }
    }
}

impl fmt::Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = match self.endianness {
            Endianness::Little => 'e',
            Endianness::Big => 'E',
        };
        write!(
            f,
            "{e}-m:{}-p:{ptr}:{ptr}-i64:{i64_align}",
            self.mangling.code(),
            ptr = self.pointer_bits,
            i64_align = self.abi_align(Type::I64) * 8,
        )?;
        let natives: Vec<String> = self.native_int_bits.iter().map(u32::to_string).collect();
        write!(f, "-n{}-S{}", natives.join(":"), self.stack_align_bits)
    }
}

/// Owns every IR entity of one compilation.
#[derive(Debug)]
pub struct Module {
    name: String,
    pub(crate) functions: PrimaryMap<Function, FunctionData>,
    pub(crate) blocks: PrimaryMap<Block, BlockData>,
    pub(crate) insts: PrimaryMap<Inst, InstData>,
    pub(crate) values: PrimaryMap<Value, ValueData>,
    pub(crate) function_names: HashMap<String, Function>,
    pub(crate) constants: HashMap<(Type, u64), Value>,
    pub(crate) debug_info: DebugInfo,
    target: Option<TargetSpec>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            insts: PrimaryMap::new(),
            values: PrimaryMap::new(),
            function_names: HashMap::new(),
            constants: HashMap::new(),
            debug_info: DebugInfo::new(),
            target: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// An IR builder with no insertion point.
    pub fn builder(&mut self) -> Builder<'_> {
        Builder::new(self)
    }

    /// A builder for this module's debug metadata table.
    pub fn debug_builder(&mut self) -> DebugBuilder<'_> {
        DebugBuilder::new(&mut self.debug_info)
    }

    pub fn debug_info(&self) -> &DebugInfo {
        &self.debug_info
    }

    /// Functions in insertion order.
    pub fn functions(&self) -> impl Iterator<Item = (Function, &FunctionData)> {
        self.functions.iter()
    }

    pub fn function(&self, func: Function) -> &FunctionData {
        &self.functions[func]
    }

    pub fn function_by_name(&self, name: &str) -> Option<Function> {
        self.function_names.get(name).copied()
    }

    pub fn block(&self, block: Block) -> &BlockData {
        &self.blocks[block]
    }

    pub fn inst(&self, inst: Inst) -> &InstData {
        &self.insts[inst]
    }

    pub fn value(&self, value: Value) -> &ValueData {
        &self.values[value]
    }

    pub fn value_type(&self, value: Value) -> Type {
        self.values[value].ty
    }

    /// Terminator of `block`, if its last instruction is one.
    pub fn terminator(&self, block: Block) -> Option<Inst> {
        let last = *self.blocks[block].insts.last()?;
        self.insts[last].kind.is_terminator().then_some(last)
    }

    /// Successor blocks of `block`, read from its terminator.
    pub fn successors(&self, block: Block) -> SmallVec<[Block; 2]> {
        self.terminator(block)
            .map(|inst| self.insts[inst].kind.successors())
            .unwrap_or_default()
    }

    pub fn contains_function(&self, func: Function) -> bool {
        self.functions.is_valid(func)
    }

    pub fn contains_block(&self, block: Block) -> bool {
        self.blocks.is_valid(block)
    }

    pub fn contains_value(&self, value: Value) -> bool {
        self.values.is_valid(value)
    }

    pub fn target(&self) -> Option<&TargetSpec> {
        self.target.as_ref()
    }

    /// Record the resolved triple and data layout. Written by the backend
    /// before lowering.
    pub fn set_target(&mut self, triple: impl Into<String>, data_layout: DataLayout) {
        let triple = triple.into();
        if let Some(previous) = &self.target
            && previous.triple != triple
        {
            tracing::debug!(from = %previous.triple, to = %triple, "retargeting module");
        }
        self.target = Some(TargetSpec {
            triple,
            data_layout,
        });
    }
}
