//! Backend registry.
//!
//! The registry lists the code generators compiled into this build. It is
//! built on first use and shared by the whole process; registering the
//! same backends twice is impossible by construction.

use std::str::FromStr;
use std::sync::OnceLock;

use target_lexicon::{Architecture, Triple};

/// Architecture families with a Cranelift backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchFamily {
    X86_64,
    Aarch64,
    Riscv64,
    S390x,
}

impl ArchFamily {
    pub fn of(arch: Architecture) -> Option<Self> {
        match arch {
            Architecture::X86_64 | Architecture::X86_64h => Some(ArchFamily::X86_64),
            Architecture::Aarch64(_) => Some(ArchFamily::Aarch64),
            Architecture::Riscv64(_) => Some(ArchFamily::Riscv64),
            Architecture::S390x => Some(ArchFamily::S390x),
            _ => None,
        }
    }
}

/// One registered code generator.
#[derive(Debug)]
pub struct TargetEntry {
    /// Short name, as accepted by `cranelift_codegen::isa::lookup_by_name`.
    pub name: &'static str,
    pub description: &'static str,
    pub arch: ArchFamily,
}

const KNOWN_TARGETS: &[TargetEntry] = &[
    TargetEntry {
        name: "x86_64",
        description: "64-bit X86: EM64T and AMD64",
        arch: ArchFamily::X86_64,
    },
    TargetEntry {
        name: "aarch64",
        description: "AArch64 (little endian)",
        arch: ArchFamily::Aarch64,
    },
    TargetEntry {
        name: "riscv64",
        description: "64-bit RISC-V",
        arch: ArchFamily::Riscv64,
    },
    TargetEntry {
        name: "s390x",
        description: "SystemZ",
        arch: ArchFamily::S390x,
    },
];

#[derive(Debug)]
pub struct TargetRegistry {
    entries: Vec<&'static TargetEntry>,
}

impl TargetRegistry {
    fn initialize() -> Self {
        let entries: Vec<&'static TargetEntry> = KNOWN_TARGETS
            .iter()
            .filter(|entry| cranelift_codegen::isa::lookup_by_name(entry.name).is_ok())
            .collect();
        tracing::debug!(
            targets = ?entries.iter().map(|e| e.name).collect::<Vec<_>>(),
            "initialized backend registry"
        );
        Self { entries }
    }

    pub fn targets(&self) -> impl Iterator<Item = &'static TargetEntry> + '_ {
        self.entries.iter().copied()
    }

    /// The backend able to generate code for `triple`, if one is registered.
    pub fn lookup(&self, triple: &Triple) -> Option<&'static TargetEntry> {
        let arch = ArchFamily::of(triple.architecture)?;
        self.targets().find(|entry| entry.arch == arch)
    }
}

/// The process-wide registry, initialised on first call.
pub fn registry() -> &'static TargetRegistry {
    static REGISTRY: OnceLock<TargetRegistry> = OnceLock::new();
    REGISTRY.get_or_init(TargetRegistry::initialize)
}

/// A triple matched to the backend that will generate code for it.
#[derive(Clone, Debug)]
pub struct ResolvedTarget {
    pub triple: Triple,
    pub entry: &'static TargetEntry,
}

impl ResolvedTarget {
    pub fn description(&self) -> &'static str {
        self.entry.description
    }
}

/// Triple of the machine running this process.
pub fn default_triple() -> String {
    Triple::host().to_string()
}

/// Resolve a target triple string against the registry.
///
/// The error is the registry's diagnostic text, suitable for showing to a
/// user as-is.
pub fn lookup_target(triple: &str) -> Result<ResolvedTarget, String> {
    let parsed = Triple::from_str(triple)
        .map_err(|e| format!("unable to parse target triple \"{triple}\": {e}"))?;
    let entry = registry()
        .lookup(&parsed)
        .ok_or_else(|| format!("No available targets are compatible with triple \"{triple}\""))?;
    tracing::debug!(triple, backend = entry.name, "resolved target");
    Ok(ResolvedTarget {
        triple: parsed,
        entry,
    })
}
