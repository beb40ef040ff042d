//! Structural verification of a completed module.
//!
//! The verifier never mutates the module and never stops at the first
//! problem: every violation becomes a [`Diagnostic`] in the returned
//! [`Verification`]. Whether a failed verification is fatal is up to the
//! caller.

use std::fmt;

use crate::debug_info::{DebugLoc, LabelId, Scope};
use crate::dominance::DominatorTree;
use crate::entities::{Block, Function, Inst};
use crate::instruction::InstKind;
use crate::module::{FunctionData, Module, ValueDef};
use crate::types::{Linkage, Type};

/// One verifier finding, located by function and block where possible.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub function: Option<String>,
    pub block: Option<String>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.function, &self.block) {
            (Some(func), Some(block)) => write!(f, "@{func}, block %{block}: {}", self.message),
            (Some(func), None) => write!(f, "@{func}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Outcome of [`verify`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Verification {
    pub diagnostics: Vec<Diagnostic>,
}

impl Verification {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Diagnostics rendered as plain strings.
    pub fn messages(&self) -> Vec<String> {
        self.diagnostics.iter().map(ToString::to_string).collect()
    }
}

/// Check the structural invariants of `module`.
pub fn verify(module: &Module) -> Verification {
    let mut report = Verification::default();

    let info = module.debug_info();
    if !info.is_empty() && !info.is_sealed() {
        report.diagnostics.push(Diagnostic {
            function: None,
            block: None,
            message: "debug metadata has not been finalized".to_owned(),
        });
    }

    for (func, data) in module.functions() {
        FunctionVerifier {
            module,
            func,
            data,
            report: &mut report,
        }
        .run();
    }

    tracing::debug!(
        module = module.name(),
        diagnostics = report.diagnostics.len(),
        "verified module"
    );
    report
}

struct FunctionVerifier<'a> {
    module: &'a Module,
    func: Function,
    data: &'a FunctionData,
    report: &'a mut Verification,
}

impl FunctionVerifier<'_> {
    fn run(&mut self) {
        let module = self.module;
        let func_data = self.data;
        if let Some(sp) = func_data.subprogram
            && module.debug_info().subprogram(sp).is_none()
        {
            self.error(None, format!("attached subprogram {sp} does not exist"));
        }

        if func_data.is_declaration() {
            if func_data.linkage != Linkage::External {
                self.error(None, "declaration must have external linkage".to_owned());
            }
            return;
        }

        let mut structurally_sound = true;
        for &block in &func_data.blocks {
            structurally_sound &= self.check_block_shape(block);
        }
        if !structurally_sound {
            // Dominance over a malformed CFG says nothing useful.
            return;
        }

        self.check_entry_predecessors();

        let domtree = DominatorTree::compute(module, self.func);
        for &block in &func_data.blocks {
            let reachable = domtree.is_reachable(block);
            for (position, &inst) in module.block(block).insts.iter().enumerate() {
                self.check_operands(&domtree, reachable, block, position, inst);
                self.check_inst(block, inst);
            }
        }
    }

    /// Ownership and terminator placement. Returns false if the block is
    /// malformed enough that later checks would be meaningless.
    fn check_block_shape(&mut self, block: Block) -> bool {
        let module = self.module;
        let data = module.block(block);
        if data.function != self.func {
            self.error(Some(block), "block belongs to another function".to_owned());
            return false;
        }
        let Some((&last, body)) = data.insts.split_last() else {
            self.error(Some(block), "block is empty".to_owned());
            return false;
        };
        let mut sound = true;
        for &inst in body {
            if module.inst(inst).kind.is_terminator() {
                self.error(Some(block), format!("terminator {inst} in the middle of the block"));
                sound = false;
            }
        }
        if !module.inst(last).kind.is_terminator() {
            self.error(Some(block), "block does not end with a terminator".to_owned());
            sound = false;
        }
        for &inst in &data.insts {
            if module.inst(inst).block != block {
                self.error(Some(block), format!("{inst} is recorded in another block"));
                sound = false;
            }
        }
        sound
    }

    fn check_entry_predecessors(&mut self) {
        let module = self.module;
        let func_data = self.data;
        let Some(entry) = func_data.entry_block() else {
            return;
        };
        let has_predecessor = func_data
            .blocks
            .iter()
            .any(|&block| module.successors(block).contains(&entry));
        if has_predecessor {
            self.error(Some(entry), "entry block has predecessors".to_owned());
        }
    }

    fn check_operands(
        &mut self,
        domtree: &DominatorTree,
        reachable: bool,
        block: Block,
        position: usize,
        inst: Inst,
    ) {
        let module = self.module;
        for &operand in &module.inst(inst).operands {
            if !module.contains_value(operand) {
                self.error(Some(block), format!("{inst} uses unknown value {operand}"));
                continue;
            }
            match module.value(operand).def {
                ValueDef::Const(_) => {}
                ValueDef::Param(owner, _) => {
                    if owner != self.func {
                        self.error(
                            Some(block),
                            format!("{inst} uses an argument of @{}", module.function(owner).name),
                        );
                    }
                }
                ValueDef::Result(def) => {
                    let def_block = module.inst(def).block;
                    if module.block(def_block).function != self.func {
                        self.error(
                            Some(block),
                            format!("{inst} uses {operand}, defined in another function"),
                        );
                    } else if !reachable {
                        // Unreachable code is exempt from dominance.
                    } else if def_block == block {
                        let insts = &module.block(block).insts;
                        let def_position = insts.iter().position(|&i| i == def);
                        if def_position.is_none_or(|p| p >= position) {
                            self.error(
                                Some(block),
                                format!("{inst} uses {operand} before its definition"),
                            );
                        }
                    } else if !domtree.dominates(def_block, block) {
                        self.error(
                            Some(block),
                            format!("definition of {operand} does not dominate its use in {inst}"),
                        );
                    }
                }
            }
        }
    }

    fn check_inst(&mut self, block: Block, inst: Inst) {
        let module = self.module;
        let func_data = self.data;
        let data = module.inst(inst);
        let operand_types: Vec<Type> = data
            .operands
            .iter()
            .filter(|&&v| module.contains_value(v))
            .map(|&v| module.value_type(v))
            .collect();
        if operand_types.len() != data.operands.len() {
            return;
        }
        let result_type = data.result.map(|v| module.value_type(v));

        match &data.kind {
            InstKind::Binary(op) => match operand_types.as_slice() {
                [lhs, rhs] if lhs == rhs && lhs.is_int() => {
                    if result_type != Some(*lhs) {
                        self.error(
                            Some(block),
                            format!("{} result must have type {lhs}", op.mnemonic()),
                        );
                    }
                }
                _ => self.error(
                    Some(block),
                    format!("{} needs two operands of one integer type", op.mnemonic()),
                ),
            },
            InstKind::Icmp(_) => match operand_types.as_slice() {
                [lhs, rhs] if lhs == rhs && lhs.is_int() => {
                    if result_type != Some(Type::I8) {
                        self.error(Some(block), "icmp result must have type i8".to_owned());
                    }
                }
                _ => self.error(
                    Some(block),
                    "icmp needs two operands of one integer type".to_owned(),
                ),
            },
            InstKind::Cast(op) => match (operand_types.as_slice(), result_type) {
                ([from], Some(to)) if op.accepts(*from, to) => {}
                _ => self.error(Some(block), format!("invalid {} in {inst}", op.mnemonic())),
            },
            InstKind::Call(callee) => {
                self.check_call(block, inst, *callee, &operand_types, result_type)
            }
            InstKind::Return => {
                let ret = func_data.signature.ret;
                let ok = match operand_types.as_slice() {
                    [] => ret == Type::Void,
                    [ty] => *ty == ret,
                    _ => false,
                };
                if !ok {
                    let found: Vec<String> = operand_types.iter().map(Type::to_string).collect();
                    self.error(
                        Some(block),
                        format!(
                            "return of ({}) does not match return type {ret}",
                            found.join(", ")
                        ),
                    );
                }
            }
            InstKind::Jump(dest) => self.check_target(block, *dest),
            InstKind::Brif {
                then_dest,
                else_dest,
            } => {
                if !matches!(operand_types.as_slice(), [ty] if ty.is_int()) {
                    self.error(Some(block), "branch condition must be an integer".to_owned());
                }
                self.check_target(block, *then_dest);
                self.check_target(block, *else_dest);
            }
            InstKind::DebugLabel(label) => self.check_label(block, *label),
        }

        if let Some(loc) = data.debug_loc {
            self.check_location(block, inst, loc);
        }
    }

    fn check_location(&mut self, block: Block, inst: Inst, loc: DebugLoc) {
        let func_data = self.data;
        let message = if self.module.debug_info().subprogram(loc.scope).is_none() {
            format!("debug location of {inst} names unknown subprogram {}", loc.scope)
        } else {
            match func_data.subprogram {
                None => format!(
                    "{inst} has a debug location but @{} has no subprogram",
                    func_data.name
                ),
                Some(sp) if sp != loc.scope => {
                    format!("debug location of {inst} is scoped to another subprogram")
                }
                Some(_) => return,
            }
        };
        self.error(Some(block), message);
    }

    fn check_call(
        &mut self,
        block: Block,
        inst: Inst,
        callee: Function,
        args: &[Type],
        result: Option<Type>,
    ) {
        let module = self.module;
        if !module.contains_function(callee) {
            self.error(Some(block), format!("{inst} calls unknown function {callee}"));
            return;
        }
        let callee = module.function(callee);
        let sig = &callee.signature;
        if sig.params.len() != args.len() {
            self.error(
                Some(block),
                format!(
                    "call to @{} passes {} argument(s), expected {}",
                    callee.name,
                    args.len(),
                    sig.params.len()
                ),
            );
        } else if let Some(index) = sig.params.iter().zip(args).position(|(p, a)| p != a) {
            self.error(
                Some(block),
                format!(
                    "argument {index} of call to @{} has type {}, expected {}",
                    callee.name, args[index], sig.params[index]
                ),
            );
        }
        let expected = sig.ret.is_int().then_some(sig.ret);
        if result != expected {
            self.error(
                Some(block),
                format!("result of call to @{} does not match its return type", callee.name),
            );
        }
    }

    fn check_target(&mut self, block: Block, dest: Block) {
        let module = self.module;
        if !module.contains_block(dest) || module.block(dest).function != self.func {
            self.error(Some(block), format!("branch target {dest} is not in this function"));
        }
    }

    fn check_label(&mut self, block: Block, label: LabelId) {
        let module = self.module;
        let func_data = self.data;
        let info = module.debug_info();
        let Some(data) = info.label(label) else {
            self.error(Some(block), format!("unknown debug label {label}"));
            return;
        };
        if let Scope::Subprogram(scope) = data.scope
            && func_data.subprogram != Some(scope)
        {
            self.error(
                Some(block),
                format!("label \"{}\" is scoped to another subprogram", data.name),
            );
        }
    }

    fn error(&mut self, block: Option<Block>, message: String) {
        self.report.diagnostics.push(Diagnostic {
            function: Some(self.data.name.clone()),
            block: block.map(|b| self.module.block(b).label.clone()),
            message,
        });
    }
}
