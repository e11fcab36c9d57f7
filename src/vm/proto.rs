// src/vm/proto.rs

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::Insn;
use crate::vm::value::{LStr, TableRef, Value};

/// Debug record for one local variable.
#[derive(Debug, Clone)]
pub struct LocVar {
    pub name: Option<LStr>,
    pub start_pc: u32,
    pub end_pc: u32,
    pub reg: u8,
}

/// A loaded function prototype: code, constants, nested prototypes, and
/// debug info.
#[derive(Debug, Default)]
pub struct Proto {
    pub max_stack_size: u8,
    pub num_params: u8,
    pub num_upvals: u8,
    pub is_vararg: bool,

    pub code: Vec<Insn>,
    pub constants: Vec<Value>,
    pub children: Vec<Rc<Proto>>,

    pub source: Option<LStr>,
    pub debug_name: Option<LStr>,

    /// Two-level line info: a per-instruction byte offset against a
    /// sparse table of absolute bases, one base per `1 << line_gap_log2`
    /// instructions. Empty when the blob carried no line info.
    pub line_gap_log2: u8,
    pub line_info: Vec<u8>,
    pub abs_line_info: Vec<i32>,

    pub locvars: Vec<LocVar>,
    pub upvalue_names: Vec<Option<LStr>>,
}

impl Proto {
    /// Source line of the instruction at `pc`, when line info is present.
    pub fn lookup_line(&self, pc: usize) -> Option<u32> {
        if self.line_info.is_empty() || pc >= self.line_info.len() {
            return None;
        }
        let base = self.abs_line_info[pc >> self.line_gap_log2];
        Some((base + self.line_info[pc] as i32) as u32)
    }
}

/// A callable closure over a prototype and an environment.
#[derive(Debug)]
pub struct Closure {
    pub proto: Rc<Proto>,
    pub env: TableRef,
    pub upvalues: RefCell<Vec<Value>>,
    /// Set on closure constants that still need their upvalues filled by
    /// CAPTURE instructions before the first call.
    pub preload: bool,
}

impl Closure {
    pub fn new(proto: Rc<Proto>, env: TableRef) -> Self {
        let nups = proto.num_upvals as usize;
        Self {
            proto,
            env,
            upvalues: RefCell::new(vec![Value::Nil; nups]),
            preload: false,
        }
    }
}
