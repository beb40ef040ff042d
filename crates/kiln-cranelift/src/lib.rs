//! Cranelift-based native object emission for kiln IR modules
//!
//! This crate resolves target triples against the code generators compiled
//! into Cranelift, configures a target machine, and lowers a [`kiln_ir::Module`]
//! to a relocatable object file (or a disassembly listing).

pub mod emit;
pub mod errors;
mod function;
pub mod registry;
pub mod target;

pub use emit::{EmitOptions, LoweringPipeline, OutputKind, emit, emit_object, lower_to_clif};
pub use errors::{CompilationError, CompilationErrorKind, CompilationResult};
pub use registry::{ResolvedTarget, TargetEntry, default_triple, lookup_target, registry};
pub use target::{MachineConfig, OptLevel, RelocModel, TargetMachine};
