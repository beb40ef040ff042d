//! Textual form of a module.
//!
//! The format follows LLVM's assembly syntax closely enough to be read by
//! anyone familiar with it:
//!
//! ```text
//! ; ModuleID = 'mymod'
//! define i32 @add_665(i32 %x) {
//! entry:
//!   %0 = add i32 %x, 665
//!   ret i32 %0
//! }
//! ```
//!
//! Metadata (`!N` references and the trailing node list) is printed only
//! once the debug table is sealed. Unsealed label markers print as
//! comments.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write};

use crate::debug_info::{
    CompileUnitId, DebugLoc, DiTypeData, DiTypeId, FileId, LabelId, Scope, SubprogramId,
};
use crate::entities::{Block, Function, Inst, Value};
use crate::instruction::{InstData, InstKind};
use crate::module::{FunctionData, Module, ValueDef};
use crate::types::{Linkage, Type};

/// Print a module as IR text.
pub fn print_module(module: &Module) -> String {
    module.to_string()
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metadata = MetadataNumbering::new(self);

        writeln!(f, "; ModuleID = '{}'", self.name())?;
        writeln!(f, "source_filename = \"{}\"", self.name())?;
        if let Some(target) = self.target() {
            writeln!(f, "target datalayout = \"{}\"", target.data_layout)?;
            writeln!(f, "target triple = \"{}\"", target.triple)?;
        }

        for (func, data) in self.functions() {
            writeln!(f)?;
            FunctionPrinter::new(self, &metadata, func, data).print(f)?;
        }

        if let Some(metadata) = &metadata {
            writeln!(f)?;
            metadata.print_nodes(self, f)?;
        }
        Ok(())
    }
}

// ============================================================================
// Metadata numbering
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum MetaKey {
    Unit(CompileUnitId),
    File(FileId),
    Type(DiTypeId),
    Subprogram(SubprogramId),
    Label(LabelId),
    Loc(DebugLoc),
}

/// `!N` slots for every metadata node, assigned in a stable order.
struct MetadataNumbering {
    slots: HashMap<MetaKey, usize>,
    order: Vec<MetaKey>,
}

impl MetadataNumbering {
    /// `None` while the debug table is still open.
    fn new(module: &Module) -> Option<Self> {
        let info = module.debug_info();
        if !info.is_sealed() {
            return None;
        }
        let mut numbering = Self {
            slots: HashMap::new(),
            order: Vec::new(),
        };
        for (id, _) in info.compile_units() {
            numbering.assign(MetaKey::Unit(id));
        }
        for (id, _) in info.files() {
            numbering.assign(MetaKey::File(id));
        }
        for (id, _) in info.types() {
            numbering.assign(MetaKey::Type(id));
        }
        for (id, _) in info.subprograms() {
            numbering.assign(MetaKey::Subprogram(id));
        }
        for (id, _) in info.labels() {
            numbering.assign(MetaKey::Label(id));
        }
        for (_, func) in module.functions() {
            for &block in &func.blocks {
                for &inst in &module.block(block).insts {
                    if let Some(loc) = module.inst(inst).debug_loc {
                        numbering.assign(MetaKey::Loc(loc));
                    }
                }
            }
        }
        Some(numbering)
    }

    fn assign(&mut self, key: MetaKey) {
        if !self.slots.contains_key(&key) {
            self.slots.insert(key, self.order.len());
            self.order.push(key);
        }
    }

    fn slot(&self, key: MetaKey) -> Option<usize> {
        self.slots.get(&key).copied()
    }

    fn write_ref(&self, f: &mut impl Write, key: MetaKey) -> fmt::Result {
        match self.slot(key) {
            Some(n) => write!(f, "!{n}"),
            None => f.write_str("null"),
        }
    }

    fn scope_key(scope: Scope) -> MetaKey {
        match scope {
            Scope::CompileUnit(id) => MetaKey::Unit(id),
            Scope::File(id) => MetaKey::File(id),
            Scope::Subprogram(id) => MetaKey::Subprogram(id),
        }
    }

    fn print_nodes(&self, module: &Module, f: &mut impl Write) -> fmt::Result {
        let info = module.debug_info();

        let units: Vec<String> = info
            .compile_units()
            .filter_map(|(id, _)| self.slot(MetaKey::Unit(id)))
            .map(|n| format!("!{n}"))
            .collect();
        if !units.is_empty() {
            writeln!(f, "!llvm.dbg.cu = !{{{}}}", units.join(", "))?;
        }

        for (n, key) in self.order.iter().enumerate() {
            write!(f, "!{n} = ")?;
            match *key {
                MetaKey::Unit(id) => {
                    let Some(unit) = info.compile_unit(id) else {
                        continue;
                    };
                    write!(
                        f,
                        "distinct !DICompileUnit(language: {}, file: ",
                        unit.language.dwarf_name()
                    )?;
                    self.write_ref(f, MetaKey::File(unit.file))?;
                    write!(f, ", producer: \"{}\")", unit.producer)?;
                }
                MetaKey::File(id) => {
                    let Some(file) = info.file(id) else { continue };
                    write!(
                        f,
                        "!DIFile(filename: \"{}\", directory: \"{}\")",
                        file.name, file.directory
                    )?;
                }
                MetaKey::Type(id) => match info.ty(id) {
                    Some(DiTypeData::Basic {
                        name,
                        size_bits,
                        encoding,
                    }) => write!(
                        f,
                        "!DIBasicType(name: \"{name}\", size: {size_bits}, encoding: {})",
                        encoding.dwarf_name()
                    )?,
                    Some(DiTypeData::Subroutine { ret, params }) => {
                        f.write_str("!DISubroutineType(types: !{")?;
                        match ret {
                            Some(ret) => self.write_ref(f, MetaKey::Type(*ret))?,
                            None => f.write_str("null")?,
                        }
                        for param in params {
                            f.write_str(", ")?;
                            self.write_ref(f, MetaKey::Type(*param))?;
                        }
                        f.write_str("})")?;
                    }
                    None => continue,
                },
                MetaKey::Subprogram(id) => {
                    let Some(sp) = info.subprogram(id) else {
                        continue;
                    };
                    if sp.is_definition {
                        f.write_str("distinct ")?;
                    }
                    write!(f, "!DISubprogram(name: \"{}\", scope: ", sp.name)?;
                    self.write_ref(f, Self::scope_key(sp.scope))?;
                    f.write_str(", file: ")?;
                    self.write_ref(f, MetaKey::File(sp.file))?;
                    write!(f, ", line: {}, type: ", sp.line)?;
                    self.write_ref(f, MetaKey::Type(sp.ty))?;
                    if sp.is_definition {
                        f.write_str(", spFlags: DISPFlagDefinition")?;
                    }
                    if let Some(unit) = sp.unit {
                        f.write_str(", unit: ")?;
                        self.write_ref(f, MetaKey::Unit(unit))?;
                    }
                    if !sp.retained_labels.is_empty() {
                        f.write_str(", retainedNodes: !{")?;
                        for (i, label) in sp.retained_labels.iter().enumerate() {
                            if i > 0 {
                                f.write_str(", ")?;
                            }
                            self.write_ref(f, MetaKey::Label(*label))?;
                        }
                        f.write_str("}")?;
                    }
                    f.write_str(")")?;
                }
                MetaKey::Label(id) => {
                    let Some(label) = info.label(id) else {
                        continue;
                    };
                    f.write_str("!DILabel(scope: ")?;
                    self.write_ref(f, Self::scope_key(label.scope))?;
                    write!(f, ", name: \"{}\", file: ", label.name)?;
                    self.write_ref(f, MetaKey::File(label.file))?;
                    write!(f, ", line: {})", label.line)?;
                }
                MetaKey::Loc(loc) => {
                    write!(f, "!DILocation(line: {}, column: {}, scope: ", loc.line, loc.column)?;
                    self.write_ref(f, MetaKey::Subprogram(loc.scope))?;
                    f.write_str(")")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Per-function print state: value and block names, uniquified.
struct FunctionPrinter<'a> {
    module: &'a Module,
    metadata: &'a Option<MetadataNumbering>,
    func: Function,
    data: &'a FunctionData,
    value_names: HashMap<Value, String>,
    block_names: HashMap<Block, String>,
}

impl<'a> FunctionPrinter<'a> {
    fn new(
        module: &'a Module,
        metadata: &'a Option<MetadataNumbering>,
        func: Function,
        data: &'a FunctionData,
    ) -> Self {
        let mut printer = Self {
            module,
            metadata,
            func,
            data,
            value_names: HashMap::new(),
            block_names: HashMap::new(),
        };
        printer.assign_names();
        printer
    }

    fn assign_names(&mut self) {
        let mut used = HashSet::new();
        let mut next_unnamed = 0usize;
        let mut name_for = |hint: Option<&str>| -> String {
            match hint {
                Some(hint) => {
                    let mut candidate = hint.to_owned();
                    let mut suffix = 1;
                    while !used.insert(candidate.clone()) {
                        candidate = format!("{hint}{suffix}");
                        suffix += 1;
                    }
                    candidate
                }
                None => loop {
                    let candidate = next_unnamed.to_string();
                    next_unnamed += 1;
                    if used.insert(candidate.clone()) {
                        break candidate;
                    }
                },
            }
        };

        let module = self.module;
        let data = self.data;
        for &param in &data.params {
            let name = name_for(module.value(param).name.as_deref());
            self.value_names.insert(param, name);
        }
        for &block in &data.blocks {
            let label = &module.block(block).label;
            let hint = (!label.is_empty()).then_some(label.as_str());
            let name = name_for(hint);
            self.block_names.insert(block, name);
            for &inst in &module.block(block).insts {
                if let Some(result) = module.inst(inst).result {
                    let name = name_for(module.value(result).name.as_deref());
                    self.value_names.insert(result, name);
                }
            }
        }
    }

    fn print(&self, f: &mut impl Write) -> fmt::Result {
        let sig = &self.data.signature;
        if self.data.is_declaration() {
            write!(f, "declare {} @{}(", sig.ret, self.data.name)?;
            for (i, ty) in sig.params.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{ty}")?;
            }
            return writeln!(f, ")");
        }

        f.write_str("define ")?;
        if self.data.linkage == Linkage::Internal {
            f.write_str("internal ")?;
        }
        write!(f, "{} @{}(", sig.ret, self.data.name)?;
        for (i, &param) in self.data.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} ", self.module.value_type(param))?;
            self.write_operand(f, param)?;
        }
        f.write_str(")")?;
        if let (Some(sp), Some(metadata)) = (self.data.subprogram, self.metadata) {
            f.write_str(" !dbg ")?;
            metadata.write_ref(f, MetaKey::Subprogram(sp))?;
        }
        writeln!(f, " {{")?;

        for (i, &block) in self.data.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}:", self.block_name(block))?;
            for &inst in &self.module.block(block).insts {
                self.print_inst(f, inst)?;
            }
        }
        writeln!(f, "}}")
    }

    fn print_inst(&self, f: &mut impl Write, inst: Inst) -> fmt::Result {
        let data = self.module.inst(inst);
        f.write_str("  ")?;
        if let Some(result) = data.result {
            self.write_operand(f, result)?;
            f.write_str(" = ")?;
        }

        match &data.kind {
            InstKind::Binary(_) | InstKind::Icmp(_) => {
                let ty = self.operand_type(data, 0);
                write!(f, "{} {ty} ", data.kind)?;
                self.write_operand_list(f, &data.operands)?;
            }
            InstKind::Cast(_) => {
                let to = data
                    .result
                    .map(|v| self.module.value_type(v))
                    .unwrap_or(Type::Void);
                write!(f, "{} {} ", data.kind, self.operand_type(data, 0))?;
                self.write_operand_list(f, &data.operands)?;
                write!(f, " to {to}")?;
            }
            InstKind::Call(callee) => {
                let callee = self.module.function(*callee);
                write!(f, "call {} @{}(", callee.signature.ret, callee.name)?;
                for (i, &arg) in data.operands.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} ", self.value_type(arg))?;
                    self.write_operand(f, arg)?;
                }
                f.write_str(")")?;
            }
            InstKind::Return => match data.operands.first() {
                Some(&value) => {
                    write!(f, "ret {} ", self.value_type(value))?;
                    self.write_operand(f, value)?;
                }
                None => f.write_str("ret void")?,
            },
            InstKind::Jump(dest) => write!(f, "br label %{}", self.block_name(*dest))?,
            InstKind::Brif {
                then_dest,
                else_dest,
            } => {
                write!(f, "br {} ", self.operand_type(data, 0))?;
                self.write_operand_list(f, &data.operands)?;
                write!(
                    f,
                    ", label %{}, label %{}",
                    self.block_name(*then_dest),
                    self.block_name(*else_dest)
                )?;
            }
            InstKind::DebugLabel(label) => match self.metadata {
                Some(metadata) => {
                    f.write_str("call void @llvm.dbg.label(metadata ")?;
                    metadata.write_ref(f, MetaKey::Label(*label))?;
                    f.write_str(")")?;
                }
                None => {
                    let name = self
                        .module
                        .debug_info()
                        .label(*label)
                        .map(|l| l.name.as_str())
                        .unwrap_or("?");
                    write!(f, "; dbg.label \"{name}\"")?;
                }
            },
        }

        if let (Some(loc), Some(metadata)) = (data.debug_loc, self.metadata)
            && !matches!(data.kind, InstKind::DebugLabel(_))
        {
            f.write_str(", !dbg ")?;
            metadata.write_ref(f, MetaKey::Loc(loc))?;
        }
        writeln!(f)
    }

    fn write_operand_list(&self, f: &mut impl Write, operands: &[Value]) -> fmt::Result {
        for (i, &value) in operands.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            self.write_operand(f, value)?;
        }
        Ok(())
    }

    /// Constants print inline as their signed value.
    fn write_operand(&self, f: &mut impl Write, value: Value) -> fmt::Result {
        if !self.module.contains_value(value) {
            return f.write_str("<badref>");
        }
        let data = self.module.value(value);
        match data.def {
            ValueDef::Const(bits) => write!(f, "{}", data.ty.sign_extend(bits)),
            ValueDef::Param(owner, _) if owner != self.func => f.write_str("<badref>"),
            _ => match self.value_names.get(&value) {
                Some(name) => write!(f, "%{name}"),
                None => f.write_str("<badref>"),
            },
        }
    }

    fn value_type(&self, value: Value) -> Type {
        if self.module.contains_value(value) {
            self.module.value_type(value)
        } else {
            Type::Void
        }
    }

    fn operand_type(&self, data: &InstData, index: usize) -> Type {
        data.operands
            .get(index)
            .map(|&v| self.value_type(v))
            .unwrap_or(Type::Void)
    }

    fn block_name(&self, block: Block) -> &str {
        self.block_names
            .get(&block)
            .map(String::as_str)
            .unwrap_or("<badref>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug_info::{SourceLanguage, TypeEncoding};
    use crate::instruction::IntCC;

    #[test]
    fn prints_add_function() {
        let mut module = Module::new("mymod");
        let mut b = module.builder();
        let f = b
            .create_function("add_665", &[Type::I32], Type::I32, Linkage::External)
            .unwrap();
        let x = b.param(f, 0).unwrap();
        b.set_value_name(x, "x").unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        b.set_insertion_point(entry).unwrap();
        let k = b.iconst(Type::I32, 665).unwrap();
        let res = b.add(x, k).unwrap();
        b.set_value_name(res, "res").unwrap();
        b.ret(Some(res)).unwrap();

        insta::assert_snapshot!(print_module(&module), @r#"
        ; ModuleID = 'mymod'
        source_filename = "mymod"

        define i32 @add_665(i32 %x) {
        entry:
          %res = add i32 %x, 665
          ret i32 %res
        }
        "#);
    }

    #[test]
    fn unnamed_values_are_numbered_and_names_uniquified() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let ext = b
            .create_function("ext", &[Type::I8], Type::Void, Linkage::External)
            .unwrap();
        let f = b
            .create_function("f", &[Type::I8, Type::I8], Type::I8, Linkage::Internal)
            .unwrap();
        let a = b.param(f, 0).unwrap();
        let c = b.param(f, 1).unwrap();
        b.set_value_name(a, "v").unwrap();
        b.set_value_name(c, "v").unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        let done = b.append_block(f, "done").unwrap();
        b.set_insertion_point(entry).unwrap();
        let cmp = b.icmp(IntCC::Ult, a, c).unwrap();
        b.call_void(ext, &[a]).unwrap();
        b.brif(cmp, done, done).unwrap();
        b.set_insertion_point(done).unwrap();
        let minus_one = b.iconst(Type::I8, -1).unwrap();
        let sum = b.add(a, minus_one).unwrap();
        b.ret(Some(sum)).unwrap();

        insta::assert_snapshot!(print_module(&module), @r#"
        ; ModuleID = 'm'
        source_filename = "m"

        declare void @ext(i8)

        define internal i8 @f(i8 %v, i8 %v1) {
        entry:
          %0 = icmp ult i8 %v, %v1
          call void @ext(i8 %v)
          br i8 %0, label %done, label %done

        done:
          %1 = add i8 %v, -1
          ret i8 %1
        }
        "#);
    }

    fn labelled_module(seal: bool) -> Module {
        let mut module = Module::new("mymod");
        let mut dib = module.debug_builder();
        let file = dib.create_file("main.xxx", ".").unwrap();
        dib.create_compile_unit(SourceLanguage::C, file, "API Example")
            .unwrap();
        let u32_ty = dib
            .create_basic_type("u32", 32, TypeEncoding::Unsigned)
            .unwrap();
        let fn_ty = dib.create_subroutine_type(Some(u32_ty), &[u32_ty]).unwrap();
        let sp = dib.create_function(file, "add_3", file, 0, fn_ty, true).unwrap();
        let label = dib.create_label(sp, "my_label", file, 2, true).unwrap();

        let mut b = module.builder();
        let f = b
            .create_function("add_3", &[Type::I32], Type::I32, Linkage::External)
            .unwrap();
        b.set_subprogram(f, sp).unwrap();
        let x = b.param(f, 0).unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        b.set_insertion_point(entry).unwrap();
        let three = b.iconst(Type::I32, 3).unwrap();
        let res = b.add(x, three).unwrap();
        b.debug_label(label).unwrap();
        b.ret(Some(res)).unwrap();

        if seal {
            module.debug_builder().finalize().unwrap();
        }
        module
    }

    #[test]
    fn sealed_metadata_is_printed() {
        let text = print_module(&labelled_module(true));
        assert!(text.contains("define i32 @add_3(i32 %0) !dbg !4 {"), "{text}");
        assert!(text.contains("call void @llvm.dbg.label(metadata !5)"), "{text}");
        assert!(text.contains("!llvm.dbg.cu = !{!0}"), "{text}");
        assert!(text.contains(
            "!0 = distinct !DICompileUnit(language: DW_LANG_C, file: !1, producer: \"API Example\")"
        ));
        assert!(text.contains("!3 = !DISubroutineType(types: !{!2, !2})"), "{text}");
        assert!(text.contains("unit: !0, retainedNodes: !{!5})"), "{text}");
        assert!(text.contains(
            "!5 = !DILabel(scope: !4, name: \"my_label\", file: !1, line: 2)"
        ));
    }

    #[test]
    fn unsealed_metadata_is_omitted() {
        let text = print_module(&labelled_module(false));
        assert!(text.contains("define i32 @add_3(i32 %0) {"), "{text}");
        assert!(text.contains("; dbg.label \"my_label\""), "{text}");
        assert!(!text.contains("!DI"), "{text}");
    }
}
