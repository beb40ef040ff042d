//! Sample programs built through the IR builder.
//!
//! Each builder returns a complete [`Module`] named `mymod`; the driver
//! prints, verifies and emits whichever one is selected on the command
//! line.

use clap::ValueEnum;
use kiln_ir::{
    DebugLoc, IrResult, Linkage, Module, SourceLanguage, SubprogramId, Type, TypeEncoding,
};

pub const MODULE_NAME: &str = "mymod";

/// Which sample program to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Program {
    /// `add_k(x) = x + k`
    AddK,
    /// `add_3(x) = x + 3` called from `main() = add_3(1)`
    CallChain,
    /// The call chain with debug metadata and a label before the return
    DebugLabels,
}

/// Parameters of the `add-k` program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddKOptions {
    pub ty: Type,
    pub k: i64,
}

impl Default for AddKOptions {
    fn default() -> Self {
        Self {
            ty: Type::I32,
            k: 665,
        }
    }
}

pub fn build(program: Program, add_k_options: AddKOptions) -> IrResult<Module> {
    match program {
        Program::AddK => add_k(add_k_options.ty, add_k_options.k),
        Program::CallChain => call_chain(),
        Program::DebugLabels => debug_labels(),
    }
}

/// `add_k(x) = x + k` over integers of type `ty`.
pub fn add_k(ty: Type, k: i64) -> IrResult<Module> {
    let mut module = Module::new(MODULE_NAME);
    let mut b = module.builder();

    let f = b.create_function("add_k", &[ty], ty, Linkage::External)?;
    let x = first_param(&b, f)?;
    b.set_value_name(x, "x")?;

    let entry = b.append_block(f, "entry")?;
    b.set_insertion_point(entry)?;
    let k = b.iconst(ty, k)?;
    let res = b.add(x, k)?;
    b.set_value_name(res, "res")?;
    b.ret(Some(res))?;

    Ok(module)
}

/// `add_3(x) = x + 3` and `main() = add_3(1)`.
pub fn call_chain() -> IrResult<Module> {
    let mut module = Module::new(MODULE_NAME);
    gen_call_chain(&mut module, None)?;
    Ok(module)
}

/// The call chain with a compile unit for `main.xxx`, a subprogram for
/// `add_3` and an always-preserved label `my_label` right before its
/// return.
pub fn debug_labels() -> IrResult<Module> {
    let mut module = Module::new(MODULE_NAME);

    let (sp, label) = {
        let mut dib = module.debug_builder();
        let file = dib.create_file("main.xxx", ".")?;
        dib.create_compile_unit(SourceLanguage::C, file, "API Example")?;
        let u32_ty = dib.create_basic_type("u32", 32, TypeEncoding::Unsigned)?;
        let fn_ty = dib.create_subroutine_type(Some(u32_ty), &[u32_ty])?;
        let sp = dib.create_function(file, "add_3", file, 0, fn_ty, true)?;
        let label = dib.create_label(sp, "my_label", file, 0, true)?;
        dib.finalize()?;
        (sp, label)
    };

    gen_call_chain(&mut module, Some(DebugSetup { sp, label }))?;
    Ok(module)
}

struct DebugSetup {
    sp: SubprogramId,
    label: kiln_ir::LabelId,
}

fn gen_call_chain(module: &mut Module, debug: Option<DebugSetup>) -> IrResult<()> {
    let mut b = module.builder();

    let add_3 = b.create_function("add_3", &[Type::I32], Type::I32, Linkage::External)?;
    let x = first_param(&b, add_3)?;
    b.set_value_name(x, "x")?;
    if let Some(debug) = &debug {
        b.set_subprogram(add_3, debug.sp)?;
        b.set_debug_location(Some(DebugLoc::new(0, 0, debug.sp)));
    }

    let entry = b.append_block(add_3, "entry")?;
    b.set_insertion_point(entry)?;
    let three = b.iconst(Type::I32, 3)?;
    let res = b.add(x, three)?;
    b.set_value_name(res, "res")?;
    if let Some(debug) = &debug {
        b.debug_label(debug.label)?;
    }
    b.ret(Some(res))?;
    b.set_debug_location(None);

    let main = b.create_function("main", &[], Type::I32, Linkage::External)?;
    let entry = b.append_block(main, "entry")?;
    b.set_insertion_point(entry)?;
    let one = b.iconst(Type::I32, 1)?;
    let res = b.call(add_3, &[one])?;
    b.ret(Some(res))?;

    Ok(())
}

fn first_param(b: &kiln_ir::Builder<'_>, func: kiln_ir::Function) -> IrResult<kiln_ir::Value> {
    b.param(func, 0).ok_or_else(|| kiln_ir::IrError::UnknownEntity {
        kind: "parameter",
        entity: format!("{func}#0"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_ir::{Interpreter, verify};

    #[test]
    fn every_program_verifies() {
        for program in Program::value_variants() {
            let module = build(*program, AddKOptions::default()).unwrap();
            let report = verify(&module);
            assert!(report.is_ok(), "{program:?}: {:?}", report.messages());
        }
    }

    #[test]
    fn add_k_wraps_at_its_width() {
        let module = add_k(Type::I8, 665).unwrap();
        let result = Interpreter::new(&module).call_by_name("add_k", &[200]).unwrap();
        // 665 mod 256 = 153; 200 + 153 = 353 mod 256 = 97
        assert_eq!(result, Some(97));
    }

    #[test]
    fn call_chain_main_returns_four() {
        for module in [call_chain().unwrap(), debug_labels().unwrap()] {
            let result = Interpreter::new(&module).call_by_name("main", &[]).unwrap();
            assert_eq!(result, Some(4));
        }
    }

    #[test]
    fn debug_labels_print_with_metadata() {
        let text = debug_labels().unwrap().to_string();
        assert!(text.contains("call void @llvm.dbg.label(metadata"), "{text}");
        assert!(text.contains("!DILabel(scope: "), "{text}");
        assert!(text.contains("name: \"my_label\""), "{text}");
        assert!(text.contains("producer: \"API Example\""), "{text}");
    }
}
