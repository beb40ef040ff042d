//! Dominator tree over the blocks of one function.
//!
//! Iterative algorithm over reverse postorder (Cooper, Harvey, Kennedy).
//! Only blocks reachable from the entry get a dominator; unreachable
//! blocks are reported as such and carry no dominance facts.

use cranelift_entity::{EntitySet, SecondaryMap};
use smallvec::SmallVec;

use crate::entities::{Block, Function};
use crate::module::Module;

#[derive(Debug, Default)]
pub struct DominatorTree {
    idom: SecondaryMap<Block, Option<Block>>,
    rpo_index: SecondaryMap<Block, Option<usize>>,
    rpo: Vec<Block>,
}

impl DominatorTree {
    pub fn compute(module: &Module, func: Function) -> Self {
        let Some(entry) = module.function(func).entry_block() else {
            return Self::default();
        };

        let successors = |block: Block| {
            module
                .successors(block)
                .into_iter()
                .filter(move |succ| module.block(*succ).function == func)
        };

        // Postorder via an explicit stack.
        let mut postorder = Vec::new();
        let mut visited = EntitySet::<Block>::new();
        let mut stack = vec![(entry, false)];
        while let Some((block, expanded)) = stack.pop() {
            if expanded {
                postorder.push(block);
                continue;
            }
            if visited.contains(block) {
                continue;
            }
            visited.insert(block);
            stack.push((block, true));
            for succ in successors(block).collect::<Vec<_>>().into_iter().rev() {
                if !visited.contains(succ) {
                    stack.push((succ, false));
                }
            }
        }
        let rpo: Vec<Block> = postorder.into_iter().rev().collect();
        let mut rpo_index = SecondaryMap::new();
        for (index, &block) in rpo.iter().enumerate() {
            rpo_index[block] = Some(index);
        }

        let mut preds: SecondaryMap<Block, SmallVec<[Block; 2]>> = SecondaryMap::new();
        for &block in &rpo {
            for succ in successors(block) {
                preds[succ].push(block);
            }
        }

        let mut idom: SecondaryMap<Block, Option<Block>> = SecondaryMap::new();
        idom[entry] = Some(entry);
        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<Block> = None;
                for &pred in &preds[block] {
                    if idom[pred].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &rpo_index, pred, current),
                    });
                }
                if new_idom.is_some() && idom[block] != new_idom {
                    idom[block] = new_idom;
                    changed = true;
                }
            }
        }

        Self {
            idom,
            rpo_index,
            rpo,
        }
    }

    /// Blocks reachable from the entry, in reverse postorder. Every block
    /// comes after its dominators, so definitions are seen before uses.
    pub fn reverse_postorder(&self) -> &[Block] {
        &self.rpo
    }

    pub fn is_reachable(&self, block: Block) -> bool {
        self.rpo_index[block].is_some()
    }

    /// Immediate dominator; `None` for the entry and unreachable blocks.
    pub fn idom(&self, block: Block) -> Option<Block> {
        self.idom[block].filter(|idom| *idom != block)
    }

    /// Whether every path from the entry to `block` passes through `dom`.
    /// A block dominates itself.
    pub fn dominates(&self, dom: Block, block: Block) -> bool {
        if !self.is_reachable(block) {
            return false;
        }
        let mut current = block;
        loop {
            if current == dom {
                return true;
            }
            match self.idom(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }
}

fn intersect(
    idom: &SecondaryMap<Block, Option<Block>>,
    rpo_index: &SecondaryMap<Block, Option<usize>>,
    mut a: Block,
    mut b: Block,
) -> Block {
    // Both blocks are processed, so every lookup below is populated.
    while a != b {
        while rpo_index[a] > rpo_index[b] {
            a = idom[a].unwrap_or(a);
        }
        while rpo_index[b] > rpo_index[a] {
            b = idom[b].unwrap_or(b);
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Linkage, Type};

    /// entry -> (left | right) -> join, plus an unreachable block.
    #[test]
    fn diamond_dominance() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let f = b
            .create_function("f", &[Type::I32], Type::I32, Linkage::External)
            .unwrap();
        let x = b.param(f, 0).unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        let left = b.append_block(f, "left").unwrap();
        let right = b.append_block(f, "right").unwrap();
        let join = b.append_block(f, "join").unwrap();
        let dead = b.append_block(f, "dead").unwrap();

        b.set_insertion_point(entry).unwrap();
        b.brif(x, left, right).unwrap();
        for block in [left, right] {
            b.set_insertion_point(block).unwrap();
            b.jump(join).unwrap();
        }
        b.set_insertion_point(join).unwrap();
        b.ret(Some(x)).unwrap();
        b.set_insertion_point(dead).unwrap();
        b.jump(join).unwrap();

        let tree = DominatorTree::compute(&module, f);
        assert!(tree.dominates(entry, join));
        assert!(!tree.dominates(left, join));
        assert!(!tree.dominates(right, join));
        assert_eq!(tree.idom(join), Some(entry));
        assert_eq!(tree.idom(left), Some(entry));
        assert_eq!(tree.idom(entry), None);
        assert!(!tree.is_reachable(dead));
        assert!(!tree.dominates(entry, dead));
        assert!(!tree.reverse_postorder().contains(&dead));
    }

    /// Blocks created as entry, tail, mid but laid out entry -> mid -> tail.
    #[test]
    fn reverse_postorder_follows_control_flow() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let f = b
            .create_function("f", &[Type::I32], Type::I32, Linkage::External)
            .unwrap();
        let x = b.param(f, 0).unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        let tail = b.append_block(f, "tail").unwrap();
        let mid = b.append_block(f, "mid").unwrap();

        b.set_insertion_point(entry).unwrap();
        b.jump(mid).unwrap();
        b.set_insertion_point(mid).unwrap();
        let y = b.add(x, x).unwrap();
        b.jump(tail).unwrap();
        b.set_insertion_point(tail).unwrap();
        b.ret(Some(y)).unwrap();

        let tree = DominatorTree::compute(&module, f);
        assert_eq!(tree.reverse_postorder(), &[entry, mid, tail]);
        assert_eq!(tree.idom(tail), Some(mid));
    }

    #[test]
    fn loop_header_dominates_body() {
        let mut module = Module::new("m");
        let mut b = module.builder();
        let f = b
            .create_function("f", &[Type::I32], Type::Void, Linkage::External)
            .unwrap();
        let x = b.param(f, 0).unwrap();
        let entry = b.append_block(f, "entry").unwrap();
        let header = b.append_block(f, "header").unwrap();
        let body = b.append_block(f, "body").unwrap();
        let exit = b.append_block(f, "exit").unwrap();

        b.set_insertion_point(entry).unwrap();
        b.jump(header).unwrap();
        b.set_insertion_point(header).unwrap();
        b.brif(x, body, exit).unwrap();
        b.set_insertion_point(body).unwrap();
        b.jump(header).unwrap();
        b.set_insertion_point(exit).unwrap();
        b.ret(None).unwrap();

        let tree = DominatorTree::compute(&module, f);
        assert!(tree.dominates(header, body));
        assert!(tree.dominates(header, exit));
        assert!(!tree.dominates(body, exit));
        assert_eq!(tree.idom(header), Some(entry));
    }
}
