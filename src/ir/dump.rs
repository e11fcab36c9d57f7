// src/ir/dump.rs
//! Human-readable dump of a translated function, used by `tarn inspect ir`.

use std::fmt::Write;

use crate::ir::{IrBlockKind, IrCondition, IrConst, IrFunction, IrOp, IrOpKind};

pub fn dump_function(function: &IrFunction) -> String {
    let mut out = String::new();

    for (index, block) in function.blocks.iter().enumerate() {
        let kind = match block.kind {
            IrBlockKind::Bytecode => "bytecode",
            IrBlockKind::Internal => "internal",
            IrBlockKind::Fallback => "fallback",
        };
        let _ = writeln!(out, "bb_{index}: ; {kind}");

        for &inst_index in &block.insts {
            let inst = &function.insts[inst_index as usize];
            let origin = function
                .inst_origins
                .get(inst_index as usize)
                .copied()
                .unwrap_or(0);

            let _ = write!(out, "  %{inst_index} = {}", cmd_name(inst.cmd));
            for op in &inst.ops {
                let _ = write!(out, " {}", dump_op(function, *op));
            }
            let _ = writeln!(out, " ; pc={origin}");
        }

        out.push('\n');
    }

    out
}

fn dump_op(function: &IrFunction, op: IrOp) -> String {
    match op.kind {
        IrOpKind::None => "-".to_string(),
        IrOpKind::Constant => match function.constants[op.index as usize] {
            IrConst::Int(value) => format!("{value}i"),
            IrConst::Uint(value) => format!("{value}u"),
            IrConst::Double(value) => format!("{value}"),
            IrConst::Bool(value) => format!("{value}"),
            IrConst::Tag(tag) => format!("t{}", tag.name()),
        },
        IrOpKind::Condition => match IrCondition::from_index(op.index) {
            Some(cond) => format!("{cond:?}"),
            None => format!("cond#{}", op.index),
        },
        IrOpKind::Inst => format!("%{}", op.index),
        IrOpKind::Block => format!("bb_{}", op.index),
        IrOpKind::VmReg => format!("R{}", op.index),
        IrOpKind::VmConst => format!("K{}", op.index),
        IrOpKind::VmUpvalue => format!("U{}", op.index),
    }
}

/// CamelCase command name rendered as the conventional upper-snake
/// mnemonic (StoreTag -> STORE_TAG).
fn cmd_name(cmd: crate::ir::IrCmd) -> String {
    let camel = format!("{cmd:?}");
    let mut out = String::with_capacity(camel.len() + 4);
    for (i, c) in camel.chars().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            out.push('_');
        }
        out.push(c.to_ascii_uppercase());
    }
    out
}
