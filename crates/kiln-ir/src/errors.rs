//! Builder-time errors.
//!
//! These are local construction errors: the offending call has no effect
//! on the module and the caller may retry with corrected inputs.

use derive_more::{Display, Error};

use crate::debug_info::MetadataError;
use crate::types::Type;

pub type IrResult<T> = Result<T, IrError>;

#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum IrError {
    #[display("function @{name} is already defined in this module")]
    DuplicateName { name: String },

    #[display("call to @{callee} passes {found} argument(s), expected {expected}")]
    ArityMismatch {
        callee: String,
        expected: usize,
        found: usize,
    },

    #[display("no insertion point set")]
    NoInsertionPoint,

    #[display("block %{block} already ends with a terminator")]
    BlockTerminated { block: String },

    #[display("type mismatch in {op}: {lhs} vs {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: Type,
        rhs: Type,
    },

    #[display("call to @{callee} produces no value")]
    VoidCallResult { callee: String },

    #[display("parameter {index} of @{function} has type void")]
    VoidParameter { function: String, index: usize },

    #[display("unknown {kind} {entity}")]
    UnknownEntity { kind: &'static str, entity: String },

    #[display("{_0}")]
    Metadata(MetadataError),
}

impl From<MetadataError> for IrError {
    fn from(error: MetadataError) -> Self {
        IrError::Metadata(error)
    }
}
