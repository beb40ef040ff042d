//! Reference interpreter.
//!
//! Evaluates functions of a module directly, over `u64` bit patterns that
//! are truncated to each value's type after every operation. The results
//! match what native code produced by the backend computes, which makes
//! the interpreter a cross-check for lowering.

use std::collections::HashMap;

use derive_more::{Display, Error};

use crate::entities::{Block, Function, Value};
use crate::instruction::{BinaryOp, CastOp, InstKind, IntCC};
use crate::module::{Module, ValueDef};
use crate::types::Type;

pub const DEFAULT_MAX_DEPTH: usize = 256;
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum InterpError {
    #[display("@{function}: integer division by zero")]
    DivisionByZero { function: String },

    #[display("@{function}: signed division overflow")]
    DivisionOverflow { function: String },

    #[display("@{function} has no body")]
    Declaration { function: String },

    #[display("no function named @{name}")]
    UnknownFunction { name: String },

    #[display("@{function} takes {expected} argument(s), got {found}")]
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },

    #[display("call depth exceeded {limit}")]
    StackOverflow { limit: usize },

    #[display("step limit of {limit} exhausted")]
    StepLimit { limit: u64 },

    #[display("@{function}: {value} has no value in this frame")]
    UndefinedValue { function: String, value: String },

    #[display("@{function}: block %{block} has no terminator")]
    MissingTerminator { function: String, block: String },
}

pub struct Interpreter<'m> {
    module: &'m Module,
    max_depth: usize,
    step_limit: u64,
    steps: u64,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            max_depth: DEFAULT_MAX_DEPTH,
            step_limit: DEFAULT_STEP_LIMIT,
            steps: 0,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_step_limit(mut self, step_limit: u64) -> Self {
        self.step_limit = step_limit;
        self
    }

    /// Call `func` with the given argument bit patterns. Arguments are
    /// truncated to the parameter types. Returns `None` for `void`.
    pub fn call(&mut self, func: Function, args: &[u64]) -> Result<Option<u64>, InterpError> {
        self.steps = 0;
        self.call_at_depth(func, args, 0)
    }

    /// Like [`Interpreter::call`], looking the function up by name.
    pub fn call_by_name(&mut self, name: &str, args: &[u64]) -> Result<Option<u64>, InterpError> {
        let func = self
            .module
            .function_by_name(name)
            .ok_or_else(|| InterpError::UnknownFunction {
                name: name.to_owned(),
            })?;
        self.call(func, args)
    }

    fn call_at_depth(
        &mut self,
        func: Function,
        args: &[u64],
        depth: usize,
    ) -> Result<Option<u64>, InterpError> {
        if depth >= self.max_depth {
            return Err(InterpError::StackOverflow {
                limit: self.max_depth,
            });
        }
        let module = self.module;
        let data = module.function(func);
        if args.len() != data.params.len() {
            return Err(InterpError::ArgumentCount {
                function: data.name.clone(),
                expected: data.params.len(),
                found: args.len(),
            });
        }
        let Some(mut block) = data.entry_block() else {
            return Err(InterpError::Declaration {
                function: data.name.clone(),
            });
        };

        let mut frame = Frame {
            module,
            function: &data.name,
            values: data
                .params
                .iter()
                .zip(args)
                .map(|(&param, &arg)| (param, module.value_type(param).wrap(arg)))
                .collect(),
        };

        loop {
            block = match self.run_block(&mut frame, block, depth)? {
                Flow::Jump(next) => next,
                Flow::Return(value) => return Ok(value),
            };
        }
    }

    fn run_block(
        &mut self,
        frame: &mut Frame<'_>,
        block: Block,
        depth: usize,
    ) -> Result<Flow, InterpError> {
        let module = self.module;
        for &inst in &module.block(block).insts {
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(InterpError::StepLimit {
                    limit: self.step_limit,
                });
            }

            let data = module.inst(inst);
            let operands = data
                .operands
                .iter()
                .map(|&v| frame.get(v))
                .collect::<Result<Vec<u64>, _>>()?;
            let result_ty = data.result.map(|v| module.value_type(v));

            let result = match &data.kind {
                InstKind::Binary(op) => {
                    let ty = result_ty.unwrap_or(Type::I64);
                    Some(frame.binary(*op, ty, operands[0], operands[1])?)
                }
                InstKind::Icmp(cc) => {
                    let ty = module.value_type(data.operands[0]);
                    Some(u64::from(compare(*cc, ty, operands[0], operands[1])))
                }
                InstKind::Cast(op) => {
                    let from = module.value_type(data.operands[0]);
                    let to = result_ty.unwrap_or(from);
                    Some(match op {
                        CastOp::ZExt | CastOp::Trunc => to.wrap(operands[0]),
                        CastOp::SExt => to.wrap(from.sign_extend(operands[0]) as u64),
                    })
                }
                InstKind::Call(callee) => self.call_at_depth(*callee, &operands, depth + 1)?,
                InstKind::Return => return Ok(Flow::Return(operands.first().copied())),
                InstKind::Jump(dest) => return Ok(Flow::Jump(*dest)),
                InstKind::Brif {
                    then_dest,
                    else_dest,
                } => {
                    let dest = if operands[0] != 0 { then_dest } else { else_dest };
                    return Ok(Flow::Jump(*dest));
                }
                InstKind::DebugLabel(_) => None,
            };

            if let (Some(value), Some(bits)) = (data.result, result) {
                frame.values.insert(value, module.value_type(value).wrap(bits));
            }
        }

        Err(InterpError::MissingTerminator {
            function: frame.function.to_owned(),
            block: module.block(block).label.clone(),
        })
    }
}

enum Flow {
    Jump(Block),
    Return(Option<u64>),
}

struct Frame<'a> {
    module: &'a Module,
    function: &'a str,
    values: HashMap<Value, u64>,
}

impl Frame<'_> {
    fn get(&self, value: Value) -> Result<u64, InterpError> {
        if let Some(&bits) = self.values.get(&value) {
            return Ok(bits);
        }
        match self.module.value(value).def {
            ValueDef::Const(bits) => Ok(bits),
            _ => Err(InterpError::UndefinedValue {
                function: self.function.to_owned(),
                value: value.to_string(),
            }),
        }
    }

    fn binary(&self, op: BinaryOp, ty: Type, lhs: u64, rhs: u64) -> Result<u64, InterpError> {
        let shift = |amount: u64| (amount % u64::from(ty.bits())) as u32;
        let signed = |bits: u64| ty.sign_extend(bits);
        let bits = match op {
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::UDiv | BinaryOp::URem | BinaryOp::SDiv | BinaryOp::SRem if rhs == 0 => {
                return Err(InterpError::DivisionByZero {
                    function: self.function.to_owned(),
                });
            }
            BinaryOp::UDiv => lhs / rhs,
            BinaryOp::URem => lhs % rhs,
            BinaryOp::SDiv => {
                let (lhs, rhs) = (signed(lhs), signed(rhs));
                if rhs == -1 && lhs == ty.sign_extend(1 << (ty.bits() - 1)) {
                    return Err(InterpError::DivisionOverflow {
                        function: self.function.to_owned(),
                    });
                }
                lhs.wrapping_div(rhs) as u64
            }
            BinaryOp::SRem => signed(lhs).wrapping_rem(signed(rhs)) as u64,
            BinaryOp::And => lhs & rhs,
            BinaryOp::Or => lhs | rhs,
            BinaryOp::Xor => lhs ^ rhs,
            BinaryOp::Shl => lhs << shift(rhs),
            BinaryOp::LShr => lhs >> shift(rhs),
            BinaryOp::AShr => (signed(lhs) >> shift(rhs)) as u64,
        };
        Ok(ty.wrap(bits))
    }
}

fn compare(cc: IntCC, ty: Type, lhs: u64, rhs: u64) -> bool {
    let (slhs, srhs) = (ty.sign_extend(lhs), ty.sign_extend(rhs));
    match cc {
        IntCC::Eq => lhs == rhs,
        IntCC::Ne => lhs != rhs,
        IntCC::Ult => lhs < rhs,
        IntCC::Ule => lhs <= rhs,
        IntCC::Ugt => lhs > rhs,
        IntCC::Uge => lhs >= rhs,
        IntCC::Slt => slhs < srhs,
        IntCC::Sle => slhs <= srhs,
        IntCC::Sgt => slhs > srhs,
        IntCC::Sge => slhs >= srhs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Linkage;

    fn unary(
        module: &mut Module,
        name: &str,
        ty: Type,
        body: impl FnOnce(&mut crate::Builder<'_>, Value) -> Value,
    ) -> Function {
        let mut b = module.builder();
        let f = b.create_function(name, &[ty], ty, Linkage::External).unwrap();
        let x = b.param(f, 0).unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        b.set_insertion_point(entry).unwrap();
        let res = body(&mut b, x);
        b.ret(Some(res)).unwrap();
        f
    }

    #[test]
    fn addition_wraps_at_width() {
        for ty in [Type::I8, Type::I16, Type::I32, Type::I64] {
            let mut module = Module::new("m");
            let f = unary(&mut module, "add_k", ty, |b, x| {
                let k = b.iconst(ty, 665).unwrap();
                b.add(x, k).unwrap()
            });
            let mut interp = Interpreter::new(&module);
            let max = ty.mask();
            assert_eq!(interp.call(f, &[max]).unwrap(), Some(ty.wrap(664)), "{ty}");
            assert_eq!(interp.call(f, &[1]).unwrap(), Some(ty.wrap(666)), "{ty}");
        }
    }

    #[test]
    fn call_chain_returns_four() {
        let mut module = Module::new("m");
        let add_3 = unary(&mut module, "add_3", Type::I32, |b, x| {
            let three = b.iconst(Type::I32, 3).unwrap();
            b.add(x, three).unwrap()
        });
        let mut b = module.builder();
        let main = b.create_function("main", &[], Type::I32, Linkage::External).unwrap();
        let entry = b.append_block(main, "entry").unwrap();
        b.set_insertion_point(entry).unwrap();
        let one = b.iconst(Type::I32, 1).unwrap();
        let res = b.call(add_3, &[one]).unwrap();
        b.ret(Some(res)).unwrap();

        assert_eq!(Interpreter::new(&module).call_by_name("main", &[]), Ok(Some(4)));
    }

    #[test]
    fn division_by_zero_traps() {
        let mut module = Module::new("m");
        let f = unary(&mut module, "f", Type::I32, |b, x| {
            let zero = b.iconst(Type::I32, 0).unwrap();
            b.binary(BinaryOp::UDiv, x, zero).unwrap()
        });
        assert!(matches!(
            Interpreter::new(&module).call(f, &[7]),
            Err(InterpError::DivisionByZero { .. })
        ));
    }

    #[test]
    fn signed_ops_and_casts() {
        let mut module = Module::new("m");
        let f = unary(&mut module, "f", Type::I8, |b, x| {
            let wide = b.cast(CastOp::SExt, x, Type::I32).unwrap();
            let two = b.iconst(Type::I32, 2).unwrap();
            let halved = b.binary(BinaryOp::SDiv, wide, two).unwrap();
            b.cast(CastOp::Trunc, halved, Type::I8).unwrap()
        });
        let mut interp = Interpreter::new(&module);
        // -8 / 2 == -4
        assert_eq!(interp.call(f, &[0xf8]).unwrap(), Some(0xfc));
        assert_eq!(interp.call(f, &[10]).unwrap(), Some(5));
    }

    #[test]
    fn branches_follow_comparison() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let f = b.create_function("max0", &[Type::I16], Type::I16, Linkage::External).unwrap();
        let x = b.param(f, 0).unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        let neg = b.append_block(f, "neg").unwrap();
        let pos = b.append_block(f, "pos").unwrap();
        b.set_insertion_point(entry).unwrap();
        let zero = b.iconst(Type::I16, 0).unwrap();
        let is_neg = b.icmp(IntCC::Slt, x, zero).unwrap();
        b.brif(is_neg, neg, pos).unwrap();
        b.set_insertion_point(neg).unwrap();
        b.ret(Some(zero)).unwrap();
        b.set_insertion_point(pos).unwrap();
        b.ret(Some(x)).unwrap();

        let mut interp = Interpreter::new(&module);
        assert_eq!(interp.call(f, &[0xffff]).unwrap(), Some(0));
        assert_eq!(interp.call(f, &[42]).unwrap(), Some(42));
    }

    #[test]
    fn unbounded_recursion_is_stopped() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let f = b.create_function("f", &[], Type::I32, Linkage::External).unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        b.set_insertion_point(entry).unwrap();
        let res = b.call(f, &[]).unwrap();
        b.ret(Some(res)).unwrap();

        let err = Interpreter::new(&module).with_max_depth(8).call(f, &[]).unwrap_err();
        assert_eq!(err, InterpError::StackOverflow { limit: 8 });
    }

    #[test]
    fn declarations_cannot_run() {
        let mut module = Module::new("m");
        let ext = module
            .builder()
            .create_function("ext", &[], Type::Void, Linkage::External)
            .unwrap();
        assert!(matches!(
            Interpreter::new(&module).call(ext, &[]),
            Err(InterpError::Declaration { .. })
        ));
    }

    #[test]
    fn unknown_names_are_not_declarations() {
        let module = Module::new("m");
        assert_eq!(
            Interpreter::new(&module).call_by_name("missing", &[]),
            Err(InterpError::UnknownFunction {
                name: "missing".to_owned()
            })
        );
    }

    #[test]
    fn endless_loop_hits_the_step_limit() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let f = b.create_function("spin", &[], Type::Void, Linkage::External).unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        let body = b.append_block(f, "body").unwrap();
        b.set_insertion_point(entry).unwrap();
        b.jump(body).unwrap();
        b.set_insertion_point(body).unwrap();
        b.jump(body).unwrap();

        let err = Interpreter::new(&module).with_step_limit(100).call(f, &[]).unwrap_err();
        assert_eq!(err, InterpError::StepLimit { limit: 100 });
    }
}
