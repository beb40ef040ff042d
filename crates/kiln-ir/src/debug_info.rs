//! Source-level debug metadata.
//!
//! Metadata lives in a table owned by the module but separate from the
//! executable IR. Functions and instructions hold plain keys into this
//! table, never owning links, so the IR can change without touching the
//! metadata graph. The table is sealed by [`DebugBuilder::finalize`]; after
//! that every mutation request fails with [`MetadataError::Sealed`].

use std::collections::HashMap;
use std::fmt;

use cranelift_entity::{PrimaryMap, entity_impl};
use derive_more::{Display, Error};

/// Reference to a compile unit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompileUnitId(u32);
entity_impl!(CompileUnitId, "cu");

/// Reference to a source file node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u32);
entity_impl!(FileId, "file");

/// Reference to a debug type (basic or subroutine).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiTypeId(u32);
entity_impl!(DiTypeId, "ditype");

/// Reference to a subprogram (function metadata).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubprogramId(u32);
entity_impl!(SubprogramId, "sp");

/// Reference to a named source label.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(u32);
entity_impl!(LabelId, "label");

pub type MetadataResult<T> = Result<T, MetadataError>;

#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[display("debug metadata is sealed; finalize() has already been called")]
    Sealed,

    #[display("unknown debug metadata node: {node}")]
    UnknownNode { node: String },

    #[display("subprogram {subprogram} references file {file}, which no compile unit anchors")]
    UnanchoredFile { subprogram: String, file: String },
}

/// Source language recorded on a compile unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceLanguage {
    C,
    C99,
    C11,
    CPlusPlus,
    Rust,
}

impl SourceLanguage {
    pub const fn dwarf_name(self) -> &'static str {
        match self {
            SourceLanguage::C => "DW_LANG_C",
            SourceLanguage::C99 => "DW_LANG_C99",
            SourceLanguage::C11 => "DW_LANG_C11",
            SourceLanguage::CPlusPlus => "DW_LANG_C_plus_plus",
            SourceLanguage::Rust => "DW_LANG_Rust",
        }
    }
}

/// Encoding of a basic debug type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeEncoding {
    Signed,
    Unsigned,
    Boolean,
}

impl TypeEncoding {
    pub const fn dwarf_name(self) -> &'static str {
        match self {
            TypeEncoding::Signed => "DW_ATE_signed",
            TypeEncoding::Unsigned => "DW_ATE_unsigned",
            TypeEncoding::Boolean => "DW_ATE_boolean",
        }
    }
}

/// The lexical scope a subprogram or label is nested in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    CompileUnit(CompileUnitId),
    File(FileId),
    Subprogram(SubprogramId),
}

impl From<CompileUnitId> for Scope {
    fn from(id: CompileUnitId) -> Self {
        Scope::CompileUnit(id)
    }
}

impl From<FileId> for Scope {
    fn from(id: FileId) -> Self {
        Scope::File(id)
    }
}

impl From<SubprogramId> for Scope {
    fn from(id: SubprogramId) -> Self {
        Scope::Subprogram(id)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::CompileUnit(id) => write!(f, "{id}"),
            Scope::File(id) => write!(f, "{id}"),
            Scope::Subprogram(id) => write!(f, "{id}"),
        }
    }
}

/// A source location attached to an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DebugLoc {
    pub line: u32,
    pub column: u32,
    pub scope: SubprogramId,
}

impl DebugLoc {
    pub const fn new(line: u32, column: u32, scope: SubprogramId) -> Self {
        Self {
            line,
            column,
            scope,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileData {
    pub name: String,
    pub directory: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileUnitData {
    pub language: SourceLanguage,
    pub file: FileId,
    pub producer: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiTypeData {
    Basic {
        name: String,
        size_bits: u32,
        encoding: TypeEncoding,
    },
    /// `ret` is `None` for functions returning nothing.
    Subroutine {
        ret: Option<DiTypeId>,
        params: Vec<DiTypeId>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubprogramData {
    pub scope: Scope,
    pub name: String,
    pub file: FileId,
    pub line: u32,
    pub ty: DiTypeId,
    pub is_definition: bool,
    /// Bound by `finalize`.
    pub unit: Option<CompileUnitId>,
    /// Always-preserved labels collected by `finalize`.
    pub retained_labels: Vec<LabelId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelData {
    pub scope: Scope,
    pub name: String,
    pub file: FileId,
    pub line: u32,
    pub always_preserve: bool,
}

/// The metadata table of one module.
#[derive(Debug, Default)]
pub struct DebugInfo {
    units: PrimaryMap<CompileUnitId, CompileUnitData>,
    files: PrimaryMap<FileId, FileData>,
    types: PrimaryMap<DiTypeId, DiTypeData>,
    subprograms: PrimaryMap<SubprogramId, SubprogramData>,
    labels: PrimaryMap<LabelId, LabelData>,
    file_index: HashMap<(String, String), FileId>,
    sealed: bool,
}

impl DebugInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// True if no node has been created.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
            && self.files.is_empty()
            && self.types.is_empty()
            && self.subprograms.is_empty()
            && self.labels.is_empty()
    }

    pub fn compile_units(&self) -> impl Iterator<Item = (CompileUnitId, &CompileUnitData)> {
        self.units.iter()
    }

    pub fn files(&self) -> impl Iterator<Item = (FileId, &FileData)> {
        self.files.iter()
    }

    pub fn types(&self) -> impl Iterator<Item = (DiTypeId, &DiTypeData)> {
        self.types.iter()
    }

    pub fn subprograms(&self) -> impl Iterator<Item = (SubprogramId, &SubprogramData)> {
        self.subprograms.iter()
    }

    pub fn labels(&self) -> impl Iterator<Item = (LabelId, &LabelData)> {
        self.labels.iter()
    }

    pub fn compile_unit(&self, id: CompileUnitId) -> Option<&CompileUnitData> {
        self.units.get(id)
    }

    pub fn file(&self, id: FileId) -> Option<&FileData> {
        self.files.get(id)
    }

    pub fn ty(&self, id: DiTypeId) -> Option<&DiTypeData> {
        self.types.get(id)
    }

    pub fn subprogram(&self, id: SubprogramId) -> Option<&SubprogramData> {
        self.subprograms.get(id)
    }

    pub fn label(&self, id: LabelId) -> Option<&LabelData> {
        self.labels.get(id)
    }

    pub fn contains_scope(&self, scope: Scope) -> bool {
        match scope {
            Scope::CompileUnit(id) => self.units.is_valid(id),
            Scope::File(id) => self.files.is_valid(id),
            Scope::Subprogram(id) => self.subprograms.is_valid(id),
        }
    }

    /// The subprogram a scope belongs to, walking through nested scopes.
    pub fn enclosing_subprogram(&self, scope: Scope) -> Option<SubprogramId> {
        match scope {
            Scope::Subprogram(id) => Some(id),
            Scope::CompileUnit(_) | Scope::File(_) => None,
        }
    }
}

/// Creates metadata nodes in a module's [`DebugInfo`] table.
pub struct DebugBuilder<'a> {
    info: &'a mut DebugInfo,
}

impl<'a> DebugBuilder<'a> {
    pub fn new(info: &'a mut DebugInfo) -> Self {
        Self { info }
    }

    fn ensure_open(&self) -> MetadataResult<()> {
        if self.info.sealed {
            Err(MetadataError::Sealed)
        } else {
            Ok(())
        }
    }

    fn ensure_file(&self, file: FileId) -> MetadataResult<()> {
        if self.info.files.is_valid(file) {
            Ok(())
        } else {
            Err(MetadataError::UnknownNode {
                node: file.to_string(),
            })
        }
    }

    fn ensure_scope(&self, scope: Scope) -> MetadataResult<()> {
        if self.info.contains_scope(scope) {
            Ok(())
        } else {
            Err(MetadataError::UnknownNode {
                node: scope.to_string(),
            })
        }
    }

    fn ensure_type(&self, ty: DiTypeId) -> MetadataResult<()> {
        if self.info.types.is_valid(ty) {
            Ok(())
        } else {
            Err(MetadataError::UnknownNode {
                node: ty.to_string(),
            })
        }
    }

    /// Create (or reuse) the file node for `name` in `directory`.
    pub fn create_file(
        &mut self,
        name: impl Into<String>,
        directory: impl Into<String>,
    ) -> MetadataResult<FileId> {
        self.ensure_open()?;
        let key = (name.into(), directory.into());
        if let Some(&id) = self.info.file_index.get(&key) {
            return Ok(id);
        }
        let id = self.info.files.push(FileData {
            name: key.0.clone(),
            directory: key.1.clone(),
        });
        self.info.file_index.insert(key, id);
        Ok(id)
    }

    /// Register a compile unit whose primary file is `file`.
    pub fn create_compile_unit(
        &mut self,
        language: SourceLanguage,
        file: FileId,
        producer: impl Into<String>,
    ) -> MetadataResult<CompileUnitId> {
        self.ensure_open()?;
        self.ensure_file(file)?;
        let producer = producer.into();
        tracing::debug!(%file, %producer, "created compile unit");
        Ok(self.info.units.push(CompileUnitData {
            language,
            file,
            producer,
        }))
    }

    pub fn create_basic_type(
        &mut self,
        name: impl Into<String>,
        size_bits: u32,
        encoding: TypeEncoding,
    ) -> MetadataResult<DiTypeId> {
        self.ensure_open()?;
        let data = DiTypeData::Basic {
            name: name.into(),
            size_bits,
            encoding,
        };
        if let Some((id, _)) = self.info.types.iter().find(|(_, existing)| **existing == data) {
            return Ok(id);
        }
        Ok(self.info.types.push(data))
    }

    pub fn create_subroutine_type(
        &mut self,
        ret: Option<DiTypeId>,
        params: &[DiTypeId],
    ) -> MetadataResult<DiTypeId> {
        self.ensure_open()?;
        for &ty in ret.iter().chain(params) {
            self.ensure_type(ty)?;
        }
        Ok(self.info.types.push(DiTypeData::Subroutine {
            ret,
            params: params.to_vec(),
        }))
    }

    /// Create the metadata describing a function. Attaching it to an IR
    /// function is a separate step (`Builder::set_subprogram`).
    pub fn create_function(
        &mut self,
        scope: impl Into<Scope>,
        name: impl Into<String>,
        file: FileId,
        line: u32,
        ty: DiTypeId,
        is_definition: bool,
    ) -> MetadataResult<SubprogramId> {
        self.ensure_open()?;
        let scope = scope.into();
        self.ensure_scope(scope)?;
        self.ensure_file(file)?;
        self.ensure_type(ty)?;
        Ok(self.info.subprograms.push(SubprogramData {
            scope,
            name: name.into(),
            file,
            line,
            ty,
            is_definition,
            unit: None,
            retained_labels: Vec::new(),
        }))
    }

    /// Create a named source point. Placing it in a block is done with
    /// `Builder::debug_label`.
    pub fn create_label(
        &mut self,
        scope: impl Into<Scope>,
        name: impl Into<String>,
        file: FileId,
        line: u32,
        always_preserve: bool,
    ) -> MetadataResult<LabelId> {
        self.ensure_open()?;
        let scope = scope.into();
        self.ensure_scope(scope)?;
        self.ensure_file(file)?;
        Ok(self.info.labels.push(LabelData {
            scope,
            name: name.into(),
            file,
            line,
            always_preserve,
        }))
    }

    /// Resolve cross references and seal the table.
    ///
    /// Must be called exactly once, after every node has been created and
    /// before the module is printed, verified or lowered.
    pub fn finalize(&mut self) -> MetadataResult<()> {
        self.ensure_open()?;

        let mut bindings = Vec::with_capacity(self.info.subprograms.len());
        for (sp, data) in self.info.subprograms.iter() {
            let unit = self
                .info
                .units
                .iter()
                .find(|(_, unit)| unit.file == data.file)
                .map(|(id, _)| id)
                .ok_or_else(|| MetadataError::UnanchoredFile {
                    subprogram: data.name.clone(),
                    file: self.info.files[data.file].name.clone(),
                })?;
            bindings.push((sp, unit));
        }

        for (sp, unit) in bindings {
            self.info.subprograms[sp].unit = Some(unit);
        }

        let retained: Vec<(SubprogramId, LabelId)> = self
            .info
            .labels
            .iter()
            .filter(|(_, label)| label.always_preserve)
            .filter_map(|(id, label)| {
                self.info
                    .enclosing_subprogram(label.scope)
                    .map(|sp| (sp, id))
            })
            .collect();
        for (sp, label) in retained {
            self.info.subprograms[sp].retained_labels.push(label);
        }

        self.info.sealed = true;
        tracing::debug!(
            units = self.info.units.len(),
            subprograms = self.info.subprograms.len(),
            labels = self.info.labels.len(),
            "debug metadata finalized"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_with_file(info: &mut DebugInfo) -> (FileId, CompileUnitId) {
        let mut dib = DebugBuilder::new(info);
        let file = dib.create_file("main.xxx", ".").unwrap();
        let cu = dib
            .create_compile_unit(SourceLanguage::C, file, "API Example")
            .unwrap();
        (file, cu)
    }

    #[test]
    fn files_are_uniqued() {
        let mut info = DebugInfo::new();
        let mut dib = DebugBuilder::new(&mut info);
        let a = dib.create_file("main.xxx", ".").unwrap();
        let b = dib.create_file("main.xxx", ".").unwrap();
        let c = dib.create_file("other.xxx", ".").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn finalize_twice_fails() {
        let mut info = DebugInfo::new();
        unit_with_file(&mut info);
        let mut dib = DebugBuilder::new(&mut info);
        assert_eq!(dib.finalize(), Ok(()));
        assert_eq!(dib.finalize(), Err(MetadataError::Sealed));
    }

    #[test]
    fn mutation_after_seal_fails() {
        let mut info = DebugInfo::new();
        let (file, _) = unit_with_file(&mut info);
        DebugBuilder::new(&mut info).finalize().unwrap();

        let mut dib = DebugBuilder::new(&mut info);
        assert_eq!(dib.create_file("late.xxx", "."), Err(MetadataError::Sealed));
        assert_eq!(
            dib.create_label(file, "late", file, 1, false),
            Err(MetadataError::Sealed)
        );
    }

    #[test]
    fn finalize_binds_unit_and_retains_labels() {
        let mut info = DebugInfo::new();
        let (file, cu) = unit_with_file(&mut info);
        let mut dib = DebugBuilder::new(&mut info);
        let u32_ty = dib
            .create_basic_type("u32", 32, TypeEncoding::Unsigned)
            .unwrap();
        let fn_ty = dib.create_subroutine_type(Some(u32_ty), &[u32_ty]).unwrap();
        let sp = dib.create_function(file, "add_3", file, 0, fn_ty, true).unwrap();
        let kept = dib.create_label(sp, "kept", file, 2, true).unwrap();
        let _dropped = dib.create_label(sp, "dropped", file, 3, false).unwrap();
        dib.finalize().unwrap();

        let data = info.subprogram(sp).unwrap();
        assert_eq!(data.unit, Some(cu));
        assert_eq!(data.retained_labels, vec![kept]);
        assert!(info.is_sealed());
    }

    #[test]
    fn finalize_rejects_unanchored_file() {
        let mut info = DebugInfo::new();
        unit_with_file(&mut info);
        let mut dib = DebugBuilder::new(&mut info);
        let stray = dib.create_file("stray.xxx", "/tmp").unwrap();
        let ty = dib.create_subroutine_type(None, &[]).unwrap();
        dib.create_function(stray, "f", stray, 1, ty, true).unwrap();

        let err = dib.finalize().unwrap_err();
        assert!(matches!(err, MetadataError::UnanchoredFile { .. }));
        assert!(!info.is_sealed());
    }

    #[test]
    fn basic_types_are_uniqued() {
        let mut info = DebugInfo::new();
        let mut dib = DebugBuilder::new(&mut info);
        let a = dib.create_basic_type("u32", 32, TypeEncoding::Unsigned).unwrap();
        let b = dib.create_basic_type("u32", 32, TypeEncoding::Unsigned).unwrap();
        assert_eq!(a, b);
    }
}
