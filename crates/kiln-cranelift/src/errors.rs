//! Error types for target resolution and native emission

use std::path::Path;

use derive_more::{Display, From};

use crate::emit::OutputKind;

pub type CompilationResult<T> = Result<T, CompilationError>;

#[derive(Display, Debug, From)]
#[display("{kind}")]
pub struct CompilationError {
    #[from]
    kind: Box<CompilationErrorKind>,
}

impl<E> From<E> for CompilationError
where
    CompilationErrorKind: From<E>,
{
    fn from(error: E) -> Self {
        CompilationError {
            kind: Box::new(CompilationErrorKind::from(error)),
        }
    }
}

impl CompilationError {
    pub fn kind(&self) -> &CompilationErrorKind {
        &self.kind
    }

    pub fn unknown_target(msg: impl std::fmt::Display) -> Self {
        CompilationErrorKind::UnknownTarget(msg.to_string()).into()
    }

    pub fn file_open(path: &Path, error: std::io::Error) -> Self {
        CompilationErrorKind::FileOpen {
            path: path.display().to_string(),
            message: error.to_string(),
        }
        .into()
    }

    pub fn write(path: &Path, error: std::io::Error) -> Self {
        CompilationErrorKind::Write {
            path: path.display().to_string(),
            message: error.to_string(),
        }
        .into()
    }

    pub fn unsupported_output_kind(kind: OutputKind, format: impl std::fmt::Display) -> Self {
        CompilationErrorKind::UnsupportedOutputKind {
            kind,
            format: format.to_string(),
        }
        .into()
    }

    pub fn machine_config(msg: impl std::fmt::Display) -> Self {
        CompilationErrorKind::MachineConfig(msg.to_string()).into()
    }

    pub fn codegen(msg: impl std::fmt::Display) -> Self {
        CompilationErrorKind::CodegenError(msg.to_string()).into()
    }

    pub fn object(msg: impl std::fmt::Display) -> Self {
        CompilationErrorKind::ObjectError(msg.to_string()).into()
    }

    pub fn function_not_found(name: &str) -> Self {
        CompilationErrorKind::FunctionNotFound(name.to_string()).into()
    }
}

#[derive(Display, Debug)]
pub enum CompilationErrorKind {
    #[display("{_0}")]
    UnknownTarget(String),

    #[display("could not open {path}: {message}")]
    FileOpen { path: String, message: String },

    #[display("could not write {path}: {message}")]
    Write { path: String, message: String },

    #[display("target machine can't emit a file of this type ({kind} output for {format})")]
    UnsupportedOutputKind { kind: OutputKind, format: String },

    #[display("Invalid machine configuration: {_0}")]
    MachineConfig(String),

    #[display("Code generation error: {_0}")]
    CodegenError(String),

    #[display("Module error: {_0}")]
    ModuleError(cranelift_module::ModuleError),

    #[display("Object generation failed: {_0}")]
    ObjectError(String),

    #[display("Function not found: {_0}")]
    FunctionNotFound(String),
}

impl From<cranelift_module::ModuleError> for CompilationErrorKind {
    fn from(error: cranelift_module::ModuleError) -> Self {
        CompilationErrorKind::ModuleError(error)
    }
}

impl From<Box<cranelift_module::ModuleError>> for CompilationErrorKind {
    fn from(error: Box<cranelift_module::ModuleError>) -> Self {
        CompilationErrorKind::ModuleError(*error)
    }
}

impl From<cranelift_codegen::settings::SetError> for CompilationErrorKind {
    fn from(error: cranelift_codegen::settings::SetError) -> Self {
        CompilationErrorKind::MachineConfig(error.to_string())
    }
}

impl From<cranelift_codegen::isa::LookupError> for CompilationErrorKind {
    fn from(error: cranelift_codegen::isa::LookupError) -> Self {
        CompilationErrorKind::UnknownTarget(error.to_string())
    }
}

impl From<cranelift_codegen::CodegenError> for CompilationErrorKind {
    fn from(error: cranelift_codegen::CodegenError) -> Self {
        CompilationErrorKind::CodegenError(error.to_string())
    }
}

impl std::error::Error for CompilationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &*self.kind {
            CompilationErrorKind::ModuleError(e) => Some(e),
            _ => None,
        }
    }
}
