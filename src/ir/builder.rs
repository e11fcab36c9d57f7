// src/ir/builder.rs

use smallvec::SmallVec;

use crate::bytecode::{jump_target, Insn, Op};
use crate::ir::{IrBlock, IrBlockKind, IrCmd, IrConst, IrFunction, IrInst, IrOp, IrOpKind};
use crate::vm::{Proto, Tag};

const NO_BLOCK: u32 = u32::MAX;

pub struct IrBuilder<'p> {
    pub proto: &'p Proto,
    pub function: IrFunction,
    current_block: Option<u32>,
    /// Bytecode block index per pc, for pcs that are jump targets.
    inst_index_to_block: Vec<u32>,
    jump_targets: Vec<bool>,
    current_origin: u32,
}

impl<'p> IrBuilder<'p> {
    pub fn new(proto: &'p Proto) -> Self {
        let mut builder = Self {
            proto,
            function: IrFunction::default(),
            current_block: None,
            inst_index_to_block: vec![NO_BLOCK; proto.code.len()],
            jump_targets: vec![false; proto.code.len()],
            current_origin: 0,
        };
        builder.mark_jump_targets();
        builder
    }

    /// Pre-pass: every control-transfer target gets a stable bytecode
    /// block; pc 0 is the entry block.
    fn mark_jump_targets(&mut self) {
        if !self.jump_targets.is_empty() {
            self.jump_targets[0] = true;
        }

        let proto = self.proto;
        let mut pc = 0;
        while pc < proto.code.len() {
            let insn = proto.code[pc];
            let Some(op) = insn.op() else {
                break;
            };

            match op {
                Op::Jump
                | Op::JumpBack
                | Op::JumpIf
                | Op::JumpIfNot
                | Op::JumpIfEq
                | Op::JumpIfLe
                | Op::JumpIfLt
                | Op::JumpIfNotEq
                | Op::JumpIfNotLe
                | Op::JumpIfNotLt
                | Op::JumpXEqKNil
                | Op::JumpXEqKB
                | Op::JumpXEqKN
                | Op::JumpXEqKS
                | Op::ForNPrep
                | Op::ForNLoop
                | Op::ForGPrepNext
                | Op::ForGPrepINext
                | Op::ForGLoop => {
                    self.mark_target(jump_target(insn, pc));
                }
                Op::JumpX => {
                    self.mark_target((pc as i64 + 1 + insn.e() as i64) as usize);
                }
                Op::LoadB if insn.c() != 0 => {
                    self.mark_target(pc + 1 + insn.c());
                }
                _ => {}
            }

            pc += op.length();
        }
    }

    fn mark_target(&mut self, pc: usize) {
        if pc < self.jump_targets.len() {
            self.jump_targets[pc] = true;
        }
    }

    pub fn is_jump_target(&self, pc: usize) -> bool {
        self.jump_targets.get(pc).copied().unwrap_or(false)
    }

    /// Allocate a fresh block of the given kind.
    pub fn block(&mut self, kind: IrBlockKind) -> IrOp {
        let index = self.function.blocks.len() as u32;
        self.function.blocks.push(IrBlock {
            kind,
            insts: Vec::new(),
        });
        IrOp::block(index)
    }

    /// The block control lands on at bytecode position `pc`: the stable
    /// bytecode block when `pc` is a jump target, otherwise a fresh
    /// internal block for intra-instruction fallthrough.
    pub fn block_at_inst(&mut self, pc: usize) -> IrOp {
        if self.is_jump_target(pc) {
            let existing = self.inst_index_to_block[pc];
            if existing != NO_BLOCK {
                return IrOp::block(existing);
            }
            let op = self.block(IrBlockKind::Bytecode);
            self.inst_index_to_block[pc] = op.index;
            return op;
        }

        self.block(IrBlockKind::Internal)
    }

    pub fn is_internal_block(&self, op: IrOp) -> bool {
        debug_assert_eq!(op.kind, IrOpKind::Block);
        self.function.blocks[op.index as usize].kind == IrBlockKind::Internal
    }

    pub fn begin_block(&mut self, op: IrOp) {
        debug_assert_eq!(op.kind, IrOpKind::Block);
        self.current_block = Some(op.index);
    }

    pub fn has_open_block(&self) -> bool {
        self.current_block.is_some()
    }

    /// True when the most recently emitted instruction transfers
    /// control; used by the function driver to decide whether a
    /// bytecode block boundary needs an explicit fallthrough jump.
    pub fn is_block_terminated(&self) -> bool {
        self.function
            .insts
            .last()
            .is_some_and(|inst| inst.cmd.is_terminator())
    }

    /// Record the bytecode origin for instructions emitted next.
    pub fn set_origin(&mut self, pc: usize) {
        self.current_origin = pc as u32;
    }

    /// Append an instruction to the open block.
    pub fn inst(&mut self, cmd: IrCmd, ops: &[IrOp]) -> IrOp {
        let block = self
            .current_block
            .expect("instruction emitted outside a block");

        let index = self.function.insts.len() as u32;
        self.function.insts.push(IrInst {
            cmd,
            ops: SmallVec::from_slice(ops),
        });
        self.function.inst_origins.push(self.current_origin);
        self.function.blocks[block as usize].insts.push(index);

        IrOp::inst(index)
    }

    pub fn const_int(&mut self, value: i32) -> IrOp {
        self.push_const(IrConst::Int(value))
    }

    pub fn const_uint(&mut self, value: u32) -> IrOp {
        self.push_const(IrConst::Uint(value))
    }

    pub fn const_double(&mut self, value: f64) -> IrOp {
        self.push_const(IrConst::Double(value))
    }

    pub fn const_bool(&mut self, value: bool) -> IrOp {
        self.push_const(IrConst::Bool(value))
    }

    pub fn const_tag(&mut self, tag: Tag) -> IrOp {
        self.push_const(IrConst::Tag(tag))
    }

    fn push_const(&mut self, value: IrConst) -> IrOp {
        let index = self.function.constants.len() as u32;
        self.function.constants.push(value);
        IrOp {
            kind: IrOpKind::Constant,
            index,
        }
    }

    /// The auxiliary word of the instruction at `pc`.
    pub fn aux(&self, pc: usize) -> u32 {
        self.proto.code.get(pc + 1).map_or(0, |insn| insn.0)
    }

    pub fn insn(&self, pc: usize) -> Insn {
        self.proto.code[pc]
    }
}

/// Scoped discipline for fast-path/fallback emission: constructing the
/// scope seals the fast path with `JUMP next` and begins the fallback
/// block; the caller streams the fallback body through the scope; drop
/// begins `next`. The fast path can never fall through into the
/// fallback body, and `next` is always begun exactly once.
pub struct FallbackStreamScope<'a, 'p> {
    build: &'a mut IrBuilder<'p>,
    next: IrOp,
}

impl<'a, 'p> FallbackStreamScope<'a, 'p> {
    pub fn new(build: &'a mut IrBuilder<'p>, fallback: IrOp, next: IrOp) -> Self {
        debug_assert_eq!(fallback.kind, IrOpKind::Block);
        debug_assert_eq!(next.kind, IrOpKind::Block);

        build.inst(IrCmd::Jump, &[next]);
        build.begin_block(fallback);

        Self { build, next }
    }
}

impl<'p> std::ops::Deref for FallbackStreamScope<'_, 'p> {
    type Target = IrBuilder<'p>;

    fn deref(&self) -> &Self::Target {
        self.build
    }
}

impl std::ops::DerefMut for FallbackStreamScope<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.build
    }
}

impl Drop for FallbackStreamScope<'_, '_> {
    fn drop(&mut self) {
        self.build.begin_block(self.next);
    }
}
