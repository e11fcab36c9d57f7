// src/commands/inspect.rs

use std::path::Path;
use std::process::ExitCode;
use std::rc::Rc;

use crate::cli::InspectType;
use crate::ir::{dump_function, translate_function};
use crate::vm::{Proto, Value, Vm};

/// Load a bytecode blob and dump its prototype tree or translated IR.
pub fn inspect_file(inspect_type: InspectType, file: &Path) -> ExitCode {
    let data = match std::fs::read(file) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("error: could not read '{}': {}", file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let chunkname = file.display().to_string();
    let mut vm = Vm::new();

    let closure = match crate::vm::load(&mut vm, &chunkname, &data, None) {
        Ok(closure) => closure,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match inspect_type {
        InspectType::Proto => {
            let mut out = String::new();
            dump_proto(&mut out, &closure.proto, 0);
            print!("{out}");
        }
        InspectType::Ir => {
            let function = translate_function(&closure.proto);
            print!("{}", dump_function(&function));
        }
    }

    ExitCode::SUCCESS
}

fn dump_proto(out: &mut String, proto: &Rc<Proto>, depth: usize) {
    use std::fmt::Write;

    let indent = "  ".repeat(depth);
    let name = proto
        .debug_name
        .as_deref()
        .unwrap_or(if depth == 0 { "main" } else { "anonymous" });

    let _ = writeln!(
        out,
        "{indent}function {name} (stack {}, params {}, upvals {}{})",
        proto.max_stack_size,
        proto.num_params,
        proto.num_upvals,
        if proto.is_vararg { ", vararg" } else { "" },
    );

    let mut pc = 0;
    while pc < proto.code.len() {
        let insn = proto.code[pc];
        let line = proto
            .lookup_line(pc)
            .map(|l| format!(" ; line {l}"))
            .unwrap_or_default();
        match insn.op() {
            Some(op) => {
                let _ = writeln!(
                    out,
                    "{indent}  [{pc:3}] {:?} A={} B={} C={} D={}{line}",
                    op,
                    insn.a(),
                    insn.b(),
                    insn.c(),
                    insn.d(),
                );
                if op.length() == 2 {
                    if let Some(aux) = proto.code.get(pc + 1) {
                        let _ = writeln!(out, "{indent}  [{:3}] aux {:#010x}", pc + 1, aux.0);
                    }
                }
                pc += op.length();
            }
            None => {
                let _ = writeln!(out, "{indent}  [{pc:3}] ?? {:#010x}{line}", insn.0);
                pc += 1;
            }
        }
    }

    for (index, constant) in proto.constants.iter().enumerate() {
        let rendered = match constant {
            Value::Str(s) => format!("{s:?}"),
            other => other.to_string(),
        };
        let _ = writeln!(out, "{indent}  K{index} = {rendered}");
    }

    for child in &proto.children {
        dump_proto(out, child, depth + 1);
    }
}
