//! The build pipeline.
//!
//! ```text
//! Module (from the builder)
//!     │
//!     ▼
//! print ─► textual IR on stderr (when requested)
//!     │
//!     ▼
//! verify ─► diagnostics (fatal only under VerifyPolicy::Strict)
//!     │
//!     ▼
//! emit ─► resolve target ─► configure machine ─► lower ─► object file
//! ```

use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};
use kiln_cranelift::{CompilationError, EmitOptions};
use kiln_ir::{IrError, Module, Verification, print_module, verify};

/// What to do with a module that fails verification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VerifyPolicy {
    /// Report diagnostics and carry on to emission.
    #[default]
    Permissive,
    /// Stop before emission.
    Strict,
}

#[derive(Clone, Debug, Default)]
pub struct PipelineOptions {
    /// Print the textual IR to stderr before verification.
    pub print_ir: bool,
    pub policy: VerifyPolicy,
    pub emit: EmitOptions,
}

#[derive(Debug, Display, Error, From)]
pub enum PipelineError {
    #[display("verification failed with {} diagnostic(s)", report.diagnostics.len())]
    #[from(ignore)]
    Verification { report: Verification },

    #[display("could not build module: {_0}")]
    Build(IrError),

    #[display("emission failed: {_0}")]
    Backend(CompilationError),
}

/// Result of a successful [`run`].
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub path: PathBuf,
    /// Verifier findings, possibly non-empty under the permissive policy.
    pub verification: Verification,
}

/// Print, verify and emit `module` to `path`.
pub fn run(
    module: &mut Module,
    path: impl AsRef<Path>,
    options: &PipelineOptions,
) -> Result<PipelineOutput, PipelineError> {
    let path = path.as_ref();

    if options.print_ir {
        eprint!("{}", print_module(module));
    }

    let verification = verify(module);
    if verification.is_ok() {
        tracing::debug!(module = module.name(), "module verified");
    } else {
        for diagnostic in &verification.diagnostics {
            tracing::warn!(module = module.name(), "{diagnostic}");
        }
        if options.policy == VerifyPolicy::Strict {
            return Err(PipelineError::Verification {
                report: verification,
            });
        }
    }

    kiln_cranelift::emit(module, path, &options.emit)?;

    Ok(PipelineOutput {
        path: path.to_owned(),
        verification,
    })
}
