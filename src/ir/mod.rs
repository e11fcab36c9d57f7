// src/ir/mod.rs
//! Typed intermediate representation for the native code pipeline.
//!
//! The translator expands each bytecode instruction into a type-checked
//! fast path plus a cold fallback block that calls a runtime helper. A
//! later pass (the machine-code emitter, outside this crate) lays out
//! fast blocks contiguously and moves fallback blocks out of line.

pub mod builder;
pub mod dump;
pub mod translate;

pub use builder::{FallbackStreamScope, IrBuilder};
pub use dump::dump_function;
pub use translate::translate_function;

use smallvec::SmallVec;

use crate::vm::Tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrCmd {
    // loads from VM state
    LoadTag,
    LoadPointer,
    LoadDouble,
    LoadInt,
    LoadTvalue,
    LoadNodeValueTv,
    LoadEnv,

    // address computation over table storage
    GetArrAddr,
    GetSlotNodeAddr,

    // stores into VM state
    StoreTag,
    StorePointer,
    StoreDouble,
    StoreInt,
    StoreTvalue,
    StoreNodeValueTv,

    // integer arithmetic
    AddInt,
    SubInt,

    // double arithmetic
    AddNum,
    SubNum,
    MulNum,
    DivNum,
    ModNum,
    PowNum,
    UnmNum,

    // value ops
    NotAny,
    IntToNum,
    /// Double to array index; branches to the fallback operand on
    /// fractional or out-of-range values.
    NumToIndex,
    TableLen,
    NewTable,
    DupTable,

    // terminators
    Jump,
    JumpIfTruthy,
    JumpIfFalsy,
    JumpEqTag,
    JumpEqInt,
    JumpEqPointer,
    JumpCmpNum,
    JumpCmpAny,

    // guards: branch to the fallback operand when the check fails
    CheckTag,
    CheckReadonly,
    CheckNoMetatable,
    CheckSafeEnv,
    CheckArraySize,
    CheckSlotMatch,
    CheckGc,

    // runtime state maintenance
    Interrupt,
    SetSavedpc,
    BarrierTableForward,

    // upvalues
    GetUpvalue,
    SetUpvalue,
    CloseUpvals,
    Capture,

    // runtime helper calls (cold paths)
    DoArith,
    DoLen,
    GetTable,
    SetTable,
    GetImport,
    Concat,
    PrepareForn,
    FallbackGetGlobal,
    FallbackSetGlobal,
    FallbackGetTableKs,
    FallbackSetTableKs,
    FallbackForgloop,
    FallbackForgprepXnext,
    FallbackCall,
    FallbackReturn,
    FallbackNewClosure,
    FallbackDupClosure,
    FallbackSetList,
    FallbackGetVarargs,
}

impl IrCmd {
    /// Commands that transfer control out of the current block.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            IrCmd::Jump
                | IrCmd::JumpIfTruthy
                | IrCmd::JumpIfFalsy
                | IrCmd::JumpEqTag
                | IrCmd::JumpEqInt
                | IrCmd::JumpEqPointer
                | IrCmd::JumpCmpNum
                | IrCmd::JumpCmpAny
                | IrCmd::FallbackForgloop
                | IrCmd::FallbackForgprepXnext
                | IrCmd::FallbackReturn
        )
    }
}

/// Comparison conditions. Ordered comparisons pass NaN through as false
/// on both sides, matching the source runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IrCondition {
    Equal = 0,
    NotEqual,
    Less,
    NotLess,
    LessEqual,
    NotLessEqual,
    Greater,
    NotGreater,
    GreaterEqual,
    NotGreaterEqual,
}

impl IrCondition {
    pub fn from_index(index: u32) -> Option<IrCondition> {
        (index <= IrCondition::NotGreaterEqual as u32)
            .then(|| unsafe { std::mem::transmute::<u8, IrCondition>(index as u8) })
    }

    /// Evaluate against two doubles with NaN-as-false semantics for the
    /// ordered variants.
    pub fn holds(self, a: f64, b: f64) -> bool {
        match self {
            IrCondition::Equal => a == b,
            IrCondition::NotEqual => a != b,
            IrCondition::Less => a < b,
            IrCondition::NotLess => !(a < b),
            IrCondition::LessEqual => a <= b,
            IrCondition::NotLessEqual => !(a <= b),
            IrCondition::Greater => a > b,
            IrCondition::NotGreater => !(a > b),
            IrCondition::GreaterEqual => a >= b,
            IrCondition::NotGreaterEqual => !(a >= b),
        }
    }
}

/// Operand kinds of IR instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrOpKind {
    None,
    /// Index into the function's constant pool.
    Constant,
    Condition,
    /// Result of another IR instruction.
    Inst,
    /// Block label.
    Block,
    /// Virtual register of the VM frame.
    VmReg,
    /// Constant slot of the prototype.
    VmConst,
    VmUpvalue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrOp {
    pub kind: IrOpKind,
    pub index: u32,
}

impl IrOp {
    pub const NONE: IrOp = IrOp {
        kind: IrOpKind::None,
        index: 0,
    };

    pub fn vm_reg(reg: usize) -> IrOp {
        IrOp {
            kind: IrOpKind::VmReg,
            index: reg as u32,
        }
    }

    pub fn vm_const(slot: u32) -> IrOp {
        IrOp {
            kind: IrOpKind::VmConst,
            index: slot,
        }
    }

    pub fn vm_upvalue(slot: usize) -> IrOp {
        IrOp {
            kind: IrOpKind::VmUpvalue,
            index: slot as u32,
        }
    }

    pub fn cond(condition: IrCondition) -> IrOp {
        IrOp {
            kind: IrOpKind::Condition,
            index: condition as u32,
        }
    }

    pub fn inst(index: u32) -> IrOp {
        IrOp {
            kind: IrOpKind::Inst,
            index,
        }
    }

    pub fn block(index: u32) -> IrOp {
        IrOp {
            kind: IrOpKind::Block,
            index,
        }
    }
}

/// Pool entries for `IrOpKind::Constant` operands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IrConst {
    Int(i32),
    Uint(u32),
    Double(f64),
    Bool(bool),
    Tag(Tag),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrBlockKind {
    /// Lands control transfers from other bytecode instructions;
    /// one-to-one with basic blocks of the source bytecode.
    Bytecode,
    /// Introduced by the translator to split a fast path across checks.
    Internal,
    /// Cold path invoking a runtime helper.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct IrInst {
    pub cmd: IrCmd,
    pub ops: SmallVec<[IrOp; 4]>,
}

#[derive(Debug, Clone)]
pub struct IrBlock {
    pub kind: IrBlockKind,
    /// Indices into the function's instruction list, in emission order.
    pub insts: Vec<u32>,
}

/// One translated function: blocks over a shared instruction list, a
/// constant pool, and the bytecode origin of every instruction.
#[derive(Debug, Default)]
pub struct IrFunction {
    pub blocks: Vec<IrBlock>,
    pub insts: Vec<IrInst>,
    pub constants: Vec<IrConst>,
    /// Bytecode pc each instruction was translated from.
    pub inst_origins: Vec<u32>,
}

impl IrFunction {
    pub fn inst(&self, op: IrOp) -> &IrInst {
        debug_assert_eq!(op.kind, IrOpKind::Inst);
        &self.insts[op.index as usize]
    }

    pub fn constant(&self, op: IrOp) -> IrConst {
        debug_assert_eq!(op.kind, IrOpKind::Constant);
        self.constants[op.index as usize]
    }

    /// Structural well-formedness: every non-empty block ends with
    /// exactly one terminator, terminators appear only at block ends,
    /// and every operand index is in range.
    pub fn validate(&self) -> Result<(), String> {
        for (block_index, block) in self.blocks.iter().enumerate() {
            if block.insts.is_empty() {
                return Err(format!("block {block_index} is empty"));
            }

            for (position, &inst_index) in block.insts.iter().enumerate() {
                let inst = self
                    .insts
                    .get(inst_index as usize)
                    .ok_or_else(|| format!("block {block_index} references a missing inst"))?;

                let last = position + 1 == block.insts.len();
                if inst.cmd.is_terminator() != last {
                    return Err(format!(
                        "block {block_index}: {:?} at position {position} breaks the \
                         one-terminator-per-block rule",
                        inst.cmd
                    ));
                }

                for op in &inst.ops {
                    let in_range = match op.kind {
                        IrOpKind::Block => (op.index as usize) < self.blocks.len(),
                        IrOpKind::Inst => (op.index as usize) < self.insts.len(),
                        IrOpKind::Constant => (op.index as usize) < self.constants.len(),
                        IrOpKind::Condition => IrCondition::from_index(op.index).is_some(),
                        _ => true,
                    };
                    if !in_range {
                        return Err(format!(
                            "block {block_index}: {:?} operand {:?} out of range",
                            inst.cmd, op
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}
