//! Target machine configuration
//!
//! A [`TargetMachine`] couples a resolved triple with a configured
//! Cranelift ISA and the data layout derived from the triple.

use std::fmt;
use std::str::FromStr;

use cranelift_codegen::isa::{self, OwnedTargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use kiln_ir::{DataLayout, Endianness, Mangling};
use target_lexicon::{Architecture, BinaryFormat, PointerWidth, Triple};

use crate::errors::{CompilationError, CompilationResult};
use crate::registry::{ArchFamily, ResolvedTarget};

/// Optimization level handed to Cranelift.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OptLevel {
    #[default]
    None,
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    pub const fn as_setting(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_setting())
    }
}

impl FromStr for OptLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "0" => Ok(OptLevel::None),
            "speed" | "2" => Ok(OptLevel::Speed),
            "speed_and_size" | "s" => Ok(OptLevel::SpeedAndSize),
            other => Err(format!(
                "unknown optimization level \"{other}\" (expected none, speed or speed_and_size)"
            )),
        }
    }
}

/// Relocation model for generated code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RelocModel {
    #[default]
    Pic,
    Static,
}

impl fmt::Display for RelocModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelocModel::Pic => "pic",
            RelocModel::Static => "static",
        })
    }
}

impl FromStr for RelocModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pic" => Ok(RelocModel::Pic),
            "static" => Ok(RelocModel::Static),
            other => Err(format!("unknown relocation model \"{other}\"")),
        }
    }
}

/// CPU, features, optimization level and relocation model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachineConfig {
    /// `generic`, or a Cranelift CPU preset such as `skylake`.
    pub cpu: String,
    /// LLVM-style feature string, e.g. `+sse4.1,-avx`.
    pub features: String,
    pub opt_level: OptLevel,
    pub reloc_model: RelocModel,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            cpu: "generic".to_owned(),
            features: String::new(),
            opt_level: OptLevel::default(),
            reloc_model: RelocModel::default(),
        }
    }
}

/// Parse an LLVM-style feature string into Cranelift ISA flags.
///
/// `+sse4.1,-avx` becomes `[("has_sse41", true), ("has_avx", false)]`.
pub fn parse_features(features: &str) -> CompilationResult<Vec<(String, bool)>> {
    features
        .split(',')
        .map(str::trim)
        .filter(|feature| !feature.is_empty())
        .map(|feature| {
            let (enabled, name) = if let Some(name) = feature.strip_prefix('+') {
                (true, name)
            } else if let Some(name) = feature.strip_prefix('-') {
                (false, name)
            } else {
                return Err(CompilationError::machine_config(format!(
                    "feature \"{feature}\" must start with '+' or '-'"
                )));
            };
            let flag: String = name
                .chars()
                .filter(|c| *c != '.')
                .map(|c| if c == '-' { '_' } else { c })
                .collect();
            Ok((format!("has_{flag}"), enabled))
        })
        .collect()
}

/// Derive the data layout of a target from its triple.
pub fn data_layout(triple: &Triple) -> DataLayout {
    let endianness = match triple.endianness() {
        Ok(target_lexicon::Endianness::Big) => Endianness::Big,
        _ => Endianness::Little,
    };

    let pointer_bits = match triple.pointer_width() {
        Ok(PointerWidth::U16) => 16,
        Ok(PointerWidth::U32) => 32,
        _ => 64,
    };

    let mangling = match triple.binary_format {
        BinaryFormat::Macho => Mangling::MachO,
        BinaryFormat::Coff if matches!(triple.architecture, Architecture::X86_32(_)) => {
            Mangling::WindowsX86
        }
        BinaryFormat::Coff => Mangling::Coff,
        _ => Mangling::Elf,
    };

    let (native_int_bits, stack_align_bits) = match ArchFamily::of(triple.architecture) {
        Some(ArchFamily::X86_64) => (vec![8, 16, 32, 64], 128),
        Some(ArchFamily::S390x) => (vec![32, 64], 64),
        Some(ArchFamily::Aarch64 | ArchFamily::Riscv64) => (vec![32, 64], 128),
        None if pointer_bits == 64 => (vec![32, 64], 128),
        None => (vec![pointer_bits], 64),
    };

    DataLayout {
        endianness,
        mangling,
        pointer_bits,
        native_int_bits,
        stack_align_bits,
    }
}

/// A configured code generator for one target.
pub struct TargetMachine {
    pub(crate) isa: OwnedTargetIsa,
    triple: Triple,
    config: MachineConfig,
    data_layout: DataLayout,
}

impl TargetMachine {
    /// Configure a code generator for `target`.
    pub fn new(target: &ResolvedTarget, config: &MachineConfig) -> CompilationResult<Self> {
        let mut flag_builder = settings::builder();
        flag_builder.set("opt_level", config.opt_level.as_setting())?;
        flag_builder.set(
            "is_pic",
            match config.reloc_model {
                RelocModel::Pic => "true",
                RelocModel::Static => "false",
            },
        )?;
        flag_builder.set("use_colocated_libcalls", "false")?;

        let mut isa_builder = isa::lookup(target.triple.clone())?;
        if !config.cpu.is_empty() && config.cpu != "generic" {
            isa_builder.enable(&config.cpu).map_err(|e| {
                CompilationError::machine_config(format!(
                    "unknown CPU \"{}\" for {}: {e}",
                    config.cpu, target.triple
                ))
            })?;
        }
        for (flag, enabled) in parse_features(&config.features)? {
            isa_builder
                .set(&flag, if enabled { "true" } else { "false" })
                .map_err(|e| {
                    CompilationError::machine_config(format!(
                        "unsupported feature {flag} for {}: {e}",
                        target.triple
                    ))
                })?;
        }

        let isa = isa_builder.finish(settings::Flags::new(flag_builder))?;
        let data_layout = data_layout(&target.triple);
        tracing::debug!(
            triple = %target.triple,
            cpu = %config.cpu,
            opt_level = %config.opt_level,
            reloc = %config.reloc_model,
            layout = %data_layout,
            "configured target machine"
        );

        Ok(Self {
            isa,
            triple: target.triple.clone(),
            config: config.clone(),
            data_layout,
        })
    }

    pub fn triple(&self) -> &Triple {
        &self.triple
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn data_layout(&self) -> &DataLayout {
        &self.data_layout
    }

    pub fn isa_name(&self) -> &'static str {
        self.isa.name()
    }

    /// Record this machine's triple and data layout on `module`.
    pub fn configure_module(&self, module: &mut kiln_ir::Module) {
        module.set_target(self.triple.to_string(), self.data_layout.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::lookup_target;

    #[test]
    fn feature_string_maps_to_isa_flags() {
        assert_eq!(
            parse_features("+sse4.1, -avx,,").unwrap(),
            vec![("has_sse41".to_owned(), true), ("has_avx".to_owned(), false)]
        );
        assert!(parse_features("sse4.1").is_err());
        assert!(parse_features("").unwrap().is_empty());
    }

    #[test]
    fn layouts_follow_the_triple() {
        let layout = |t: &str| data_layout(&Triple::from_str(t).unwrap()).to_string();
        assert_eq!(
            layout("x86_64-unknown-linux-gnu"),
            "e-m:e-p:64:64-i64:64-n8:16:32:64-S128"
        );
        assert_eq!(
            layout("aarch64-apple-darwin"),
            "e-m:o-p:64:64-i64:64-n32:64-S128"
        );
        assert_eq!(
            layout("x86_64-pc-windows-msvc"),
            "e-m:w-p:64:64-i64:64-n8:16:32:64-S128"
        );
        assert_eq!(
            layout("s390x-unknown-linux-gnu"),
            "E-m:e-p:64:64-i64:64-n32:64-S64"
        );
    }

    #[test]
    fn machine_for_host_configures_module() {
        let target = lookup_target(&crate::registry::default_triple()).unwrap();
        let machine = TargetMachine::new(&target, &MachineConfig::default()).unwrap();
        let mut module = kiln_ir::Module::new("m");
        machine.configure_module(&mut module);
        let spec = module.target().unwrap();
        assert_eq!(spec.triple, Triple::host().to_string());
        assert_eq!(&spec.data_layout, machine.data_layout());
    }

    #[test]
    fn unknown_cpu_is_rejected() {
        let target = lookup_target("x86_64-unknown-linux-gnu").unwrap();
        let config = MachineConfig {
            cpu: "no-such-cpu".to_owned(),
            ..MachineConfig::default()
        };
        let err = TargetMachine::new(&target, &config).err().unwrap();
        assert!(err.to_string().contains("no-such-cpu"), "{err}");
    }

    #[test]
    fn known_features_are_accepted() {
        let target = lookup_target("x86_64-unknown-linux-gnu").unwrap();
        let config = MachineConfig {
            features: "+sse4.1,-avx".to_owned(),
            opt_level: OptLevel::Speed,
            ..MachineConfig::default()
        };
        assert!(TargetMachine::new(&target, &config).is_ok());
    }
}
