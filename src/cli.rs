//! Command-line interface for the kiln driver.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use kiln::Program;
use kiln_cranelift::{OptLevel, OutputKind, RelocModel};
use kiln_ir::Type;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(
    about = "Build a sample IR module and emit it as a native object file",
    long_about = None
)]
pub struct Cli {
    /// Sample program to build
    #[arg(value_enum)]
    pub program: Program,

    /// Output file path
    #[arg(short, long, default_value = "out.o")]
    pub output: PathBuf,

    /// Target triple (defaults to the host)
    #[arg(long)]
    pub target: Option<String>,

    /// Target CPU
    #[arg(long, default_value = "generic")]
    pub cpu: String,

    /// Target features, e.g. `+sse4.1,-avx`
    #[arg(long, default_value = "")]
    pub features: String,

    /// Kind of output file
    #[arg(long, value_enum, default_value_t = EmitKind::Obj)]
    pub emit: EmitKind,

    /// Optimization level: none, speed or speed_and_size
    #[arg(long, default_value_t = OptLevel::None)]
    pub opt_level: OptLevel,

    /// Relocation model: pic or static
    #[arg(long, default_value_t = RelocModel::Pic)]
    pub reloc: RelocModel,

    /// Abort before emission if the verifier reports anything
    #[arg(long)]
    pub strict: bool,

    /// Don't print the IR to stderr
    #[arg(short, long)]
    pub quiet: bool,

    /// Constant added by the `add-k` program
    #[arg(short, default_value_t = 665, allow_negative_numbers = true)]
    pub k: i64,

    /// Integer width of the `add-k` program: 8, 16, 32 or 64
    #[arg(long, default_value = "32", value_parser = parse_width)]
    pub width: Type,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum EmitKind {
    Obj,
    Asm,
}

impl From<EmitKind> for OutputKind {
    fn from(kind: EmitKind) -> Self {
        match kind {
            EmitKind::Obj => OutputKind::Object,
            EmitKind::Asm => OutputKind::Assembly,
        }
    }
}

fn parse_width(s: &str) -> Result<Type, String> {
    s.parse::<u32>()
        .ok()
        .and_then(Type::int)
        .ok_or_else(|| format!("unsupported integer width \"{s}\" (expected 8, 16, 32 or 64)"))
}
