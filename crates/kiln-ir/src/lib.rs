//! kiln-ir: a small typed SSA IR.
//!
//! A [`Module`] owns functions, blocks, instructions and values in
//! arena storage addressed by the entity references in [`entities`]. IR is
//! constructed through a [`Builder`], annotated with source-level metadata
//! through a [`DebugBuilder`], checked by [`verify`], and printed in an
//! LLVM-like text form via `Display`.

pub mod builder;
pub mod debug_info;
pub mod dominance;
pub mod entities;
pub mod errors;
pub mod instruction;
pub mod interp;
pub mod module;
pub mod printer;
pub mod types;
pub mod verifier;

pub use builder::Builder;
pub use debug_info::{
    CompileUnitId, DebugBuilder, DebugInfo, DebugLoc, DiTypeId, FileId, LabelId, MetadataError,
    MetadataResult, Scope, SourceLanguage, SubprogramId, TypeEncoding,
};
pub use dominance::DominatorTree;
pub use entities::{Block, Function, Inst, Value};
pub use errors::{IrError, IrResult};
pub use instruction::{BinaryOp, CastOp, InstData, InstKind, IntCC};
pub use interp::{InterpError, Interpreter};
pub use module::{
    BlockData, DataLayout, Endianness, FunctionData, Mangling, Module, TargetSpec, ValueData,
    ValueDef,
};
pub use printer::print_module;
pub use types::{Linkage, Signature, Type};
pub use verifier::{Diagnostic, Verification, verify};
