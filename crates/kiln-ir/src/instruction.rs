//! Instruction kinds and per-instruction data.

use std::fmt;

use smallvec::SmallVec;

use crate::debug_info::{DebugLoc, LabelId};
use crate::entities::{Block, Function, Value};
use crate::types::Type;

/// Two-operand integer arithmetic and logic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl BinaryOp {
    pub const fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::UDiv => "udiv",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::URem => "urem",
            BinaryOp::SRem => "srem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::LShr => "lshr",
            BinaryOp::AShr => "ashr",
        }
    }
}

/// Integer comparison condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntCC {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl IntCC {
    pub const fn mnemonic(self) -> &'static str {
        match self {
            IntCC::Eq => "eq",
            IntCC::Ne => "ne",
            IntCC::Ult => "ult",
            IntCC::Ule => "ule",
            IntCC::Ugt => "ugt",
            IntCC::Uge => "uge",
            IntCC::Slt => "slt",
            IntCC::Sle => "sle",
            IntCC::Sgt => "sgt",
            IntCC::Sge => "sge",
        }
    }
}

/// Integer width conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CastOp {
    ZExt,
    SExt,
    Trunc,
}

impl CastOp {
    pub const fn mnemonic(self) -> &'static str {
        match self {
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::Trunc => "trunc",
        }
    }

    /// Whether a cast from `from` to `to` changes the width in the
    /// direction this operation requires.
    pub fn accepts(self, from: Type, to: Type) -> bool {
        if !from.is_int() || !to.is_int() {
            return false;
        }
        match self {
            CastOp::ZExt | CastOp::SExt => to.bits() > from.bits(),
            CastOp::Trunc => to.bits() < from.bits(),
        }
    }
}

/// What an instruction does. Operands live in [`InstData::operands`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstKind {
    Binary(BinaryOp),
    Icmp(IntCC),
    Cast(CastOp),
    Call(Function),
    Return,
    Jump(Block),
    Brif { then_dest: Block, else_dest: Block },
    /// Non-executable source point marker.
    DebugLabel(LabelId),
}

impl InstKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Return | InstKind::Jump(_) | InstKind::Brif { .. }
        )
    }

    /// Blocks control may transfer to after this instruction.
    pub fn successors(&self) -> SmallVec<[Block; 2]> {
        match self {
            InstKind::Jump(dest) => SmallVec::from_slice(&[*dest]),
            InstKind::Brif {
                then_dest,
                else_dest,
            } => SmallVec::from_slice(&[*then_dest, *else_dest]),
            _ => SmallVec::new(),
        }
    }
}

impl fmt::Display for InstKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstKind::Binary(op) => f.write_str(op.mnemonic()),
            InstKind::Icmp(cc) => write!(f, "icmp {}", cc.mnemonic()),
            InstKind::Cast(op) => f.write_str(op.mnemonic()),
            InstKind::Call(_) => f.write_str("call"),
            InstKind::Return => f.write_str("ret"),
            InstKind::Jump(_) | InstKind::Brif { .. } => f.write_str("br"),
            InstKind::DebugLabel(_) => f.write_str("dbg.label"),
        }
    }
}

/// Storage for a single instruction.
#[derive(Clone, Debug)]
pub struct InstData {
    pub kind: InstKind,
    pub operands: SmallVec<[Value; 2]>,
    pub result: Option<Value>,
    pub block: Block,
    pub debug_loc: Option<DebugLoc>,
}
