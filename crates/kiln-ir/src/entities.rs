//! Entity references for the module arena.
//!
//! Each ref type is a thin `u32` wrapper providing type-safe indexing
//! into the `PrimaryMap` storage owned by `Module`.

use cranelift_entity::entity_impl;

/// Reference to a function in a module.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Function(u32);
entity_impl!(Function, "fn");

/// Reference to a basic block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// Reference to an instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// Reference to an SSA value: a constant, a function argument or an
/// instruction result.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");
