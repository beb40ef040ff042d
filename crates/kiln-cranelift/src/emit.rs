//! Module lowering and file emission.
//!
//! [`emit`] drives the whole backend stage:
//!
//! 1. resolve the target triple against the registry,
//! 2. configure a [`TargetMachine`] and record triple and data layout on
//!    the module,
//! 3. open the destination file,
//! 4. build a [`LoweringPipeline`] for the requested output kind,
//! 5. run it and write the bytes out.
//!
//! A target that cannot be resolved fails before the file is touched.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use cranelift_codegen::control::ControlPlane;
use cranelift_codegen::ir::UserFuncName;
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{FuncId, Linkage as ClLinkage, Module as _};
use cranelift_object::{ObjectBuilder, ObjectModule};
use derive_more::Display;
use kiln_ir::{Function, FunctionData, Linkage, Module};
use target_lexicon::BinaryFormat;

use crate::errors::{CompilationError, CompilationResult};
use crate::function::{FunctionTranslator, callees, translate_signature};
use crate::registry::{default_triple, lookup_target};
use crate::target::{MachineConfig, TargetMachine};

/// What the lowering pipeline writes.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq)]
pub enum OutputKind {
    /// A relocatable object file.
    #[default]
    #[display("object")]
    Object,
    /// Disassembly of the generated machine code, one listing per function.
    #[display("assembly")]
    Assembly,
}

/// Options for [`emit`].
#[derive(Clone, Debug, Default)]
pub struct EmitOptions {
    /// Target triple; the host when `None`.
    pub target: Option<String>,
    pub machine: MachineConfig,
    pub output: OutputKind,
}

/// Emit an object file for the host with default machine settings.
pub fn emit_object(module: &mut Module, path: impl AsRef<Path>) -> CompilationResult<()> {
    emit(module, path, &EmitOptions::default())
}

/// Lower `module` and write the result to `path`.
pub fn emit(
    module: &mut Module,
    path: impl AsRef<Path>,
    options: &EmitOptions,
) -> CompilationResult<()> {
    let path = path.as_ref();
    let triple = options.target.clone().unwrap_or_else(default_triple);

    let target = lookup_target(&triple).map_err(CompilationError::unknown_target)?;
    let machine = TargetMachine::new(&target, &options.machine)?;
    machine.configure_module(module);

    let file = File::create(path).map_err(|e| CompilationError::file_open(path, e))?;
    let mut out = BufWriter::new(file);

    let pipeline = LoweringPipeline::new(&machine, options.output)?;
    let bytes = pipeline.run(module)?;

    out.write_all(&bytes)
        .and_then(|()| out.flush())
        .map_err(|e| CompilationError::write(path, e))?;

    tracing::info!(
        module = module.name(),
        path = %path.display(),
        triple = %machine.triple(),
        output = %options.output,
        bytes = bytes.len(),
        "emitted module"
    );
    Ok(())
}

/// Translate every defined function of `module` to Cranelift IR for the
/// host and return the textual form. Intended for debugging and tests.
pub fn lower_to_clif(module: &Module) -> CompilationResult<String> {
    let target = lookup_target(&default_triple()).map_err(CompilationError::unknown_target)?;
    let machine = TargetMachine::new(&target, &MachineConfig::default())?;
    let mut lowering = ModuleLowering::new(&machine, module)?;
    let mut text = String::new();
    lowering.for_each_definition(|_, _, _, ctx| {
        text.push_str(&ctx.func.display().to_string());
        Ok(())
    })?;
    Ok(text)
}

/// Pass pipeline producing one kind of output for one target machine.
pub struct LoweringPipeline<'t> {
    machine: &'t TargetMachine,
    kind: OutputKind,
}

impl<'t> LoweringPipeline<'t> {
    /// Fails if the machine cannot produce `kind` output.
    pub fn new(machine: &'t TargetMachine, kind: OutputKind) -> CompilationResult<Self> {
        let format = machine.triple().binary_format;
        if kind == OutputKind::Object
            && !matches!(
                format,
                BinaryFormat::Elf | BinaryFormat::Macho | BinaryFormat::Coff
            )
        {
            return Err(CompilationError::unsupported_output_kind(kind, format));
        }
        Ok(Self { machine, kind })
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    /// Lower `module` to bytes of the pipeline's output kind.
    pub fn run(&self, module: &Module) -> CompilationResult<Vec<u8>> {
        let mut lowering = ModuleLowering::new(self.machine, module)?;
        match self.kind {
            OutputKind::Object => {
                lowering.for_each_definition(|object, id, _, ctx| {
                    object.define_function(id, ctx)?;
                    Ok(())
                })?;
                lowering.finish()
            }
            OutputKind::Assembly => {
                let mut listing = format!(
                    "; module '{}' for {}\n",
                    module.name(),
                    self.machine.triple()
                );
                lowering.for_each_definition(|object, _, data, ctx| {
                    ctx.set_disasm(true);
                    let compiled = ctx
                        .compile(object.isa(), &mut ControlPlane::default())
                        .map_err(|e| CompilationError::from(e.inner))?;
                    listing.push_str(&format!("\n{}:\n", data.name));
                    if let Some(vcode) = &compiled.vcode {
                        listing.push_str(vcode);
                    }
                    Ok(())
                })?;
                Ok(listing.into_bytes())
            }
        }
    }
}

/// Cranelift object module with every kiln function declared.
struct ModuleLowering<'m> {
    module: &'m Module,
    object: ObjectModule,
    ids: HashMap<Function, FuncId>,
}

impl<'m> ModuleLowering<'m> {
    fn new(machine: &TargetMachine, module: &'m Module) -> CompilationResult<Self> {
        let builder = ObjectBuilder::new(
            machine.isa.clone(),
            module.name(),
            cranelift_module::default_libcall_names(),
        )?;
        let mut object = ObjectModule::new(builder);
        let call_conv = object.isa().default_call_conv();

        let mut ids = HashMap::new();
        for (func, data) in module.functions() {
            let linkage = if data.is_declaration() {
                ClLinkage::Import
            } else {
                match data.linkage {
                    Linkage::External => ClLinkage::Export,
                    Linkage::Internal => ClLinkage::Local,
                }
            };
            let sig = translate_signature(&data.signature, call_conv);
            let id = object.declare_function(&data.name, linkage, &sig)?;
            ids.insert(func, id);
        }

        Ok(Self {
            module,
            object,
            ids,
        })
    }

    /// Translate each function with a body into a fresh context and hand
    /// it to `f` before the context is cleared.
    fn for_each_definition(
        &mut self,
        mut f: impl FnMut(
            &mut ObjectModule,
            FuncId,
            &FunctionData,
            &mut Context,
        ) -> CompilationResult<()>,
    ) -> CompilationResult<()> {
        let module = self.module;
        let call_conv = self.object.isa().default_call_conv();
        let mut ctx = self.object.make_context();
        let mut builder_ctx = FunctionBuilderContext::new();

        for (func, data) in module.functions().filter(|(_, data)| !data.is_declaration()) {
            let id = self.ids[&func];
            ctx.func.signature = translate_signature(&data.signature, call_conv);
            ctx.func.name = UserFuncName::user(0, id.as_u32());

            let mut func_refs = HashMap::new();
            for callee in callees(module, func) {
                let callee_id = *self.ids.get(&callee).ok_or_else(|| {
                    CompilationError::function_not_found(&format!("{callee}"))
                })?;
                let func_ref = self.object.declare_func_in_func(callee_id, &mut ctx.func);
                func_refs.insert(callee, func_ref);
            }

            let builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
            FunctionTranslator::new(module, func, builder, &func_refs).translate()?;
            tracing::debug!(function = %data.name, "translated function");

            f(&mut self.object, id, data, &mut ctx)?;
            self.object.clear_context(&mut ctx);
        }
        Ok(())
    }

    fn finish(self) -> CompilationResult<Vec<u8>> {
        self.object
            .finish()
            .emit()
            .map_err(CompilationError::object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_ir::Type;

    fn add_3(module: &mut Module) {
        let mut b = module.builder();
        let f = b
            .create_function("add_3", &[Type::I32], Type::I32, Linkage::External)
            .unwrap();
        let x = b.param(f, 0).unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        b.set_insertion_point(entry).unwrap();
        let three = b.iconst(Type::I32, 3).unwrap();
        let res = b.add(x, three).unwrap();
        b.ret(Some(res)).unwrap();
    }

    #[test]
    fn clif_contains_translated_body() {
        let mut module = Module::new("m");
        add_3(&mut module);
        let clif = lower_to_clif(&module).unwrap();
        assert!(clif.contains("iconst.i32 3"), "{clif}");
        assert!(clif.contains("iadd"), "{clif}");
        assert!(clif.contains("return"), "{clif}");
    }

    #[test]
    fn object_pipeline_produces_bytes() {
        let mut module = Module::new("m");
        add_3(&mut module);
        let target = lookup_target(&default_triple()).unwrap();
        let machine = TargetMachine::new(&target, &MachineConfig::default()).unwrap();
        let pipeline = LoweringPipeline::new(&machine, OutputKind::Object).unwrap();
        let bytes = pipeline.run(&module).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn assembly_pipeline_lists_functions() {
        let mut module = Module::new("m");
        add_3(&mut module);
        let target = lookup_target(&default_triple()).unwrap();
        let machine = TargetMachine::new(&target, &MachineConfig::default()).unwrap();
        let pipeline = LoweringPipeline::new(&machine, OutputKind::Assembly).unwrap();
        let text = String::from_utf8(pipeline.run(&module).unwrap()).unwrap();
        assert!(text.contains("add_3:"), "{text}");
    }

    #[test]
    fn malformed_block_is_an_error_not_a_panic() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let f = b
            .create_function("f", &[], Type::I32, Linkage::External)
            .unwrap();
        b.append_block(f, "entry").unwrap();
        assert!(lower_to_clif(&module).is_err());
    }
}
