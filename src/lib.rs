//! Build SSA IR modules in memory, verify them and emit native objects.
//!
//! The IR itself lives in [`kiln_ir`]; lowering to machine code lives in
//! [`kiln_cranelift`]. This crate ties the two together into a pipeline
//! and ships the sample programs the `kiln` binary builds.

pub mod pipeline;
pub mod programs;

pub use pipeline::{PipelineError, PipelineOptions, PipelineOutput, VerifyPolicy, run};
pub use programs::{AddKOptions, Program};
