// src/vm/interp.rs
//! Register-machine interpreter and the runtime helpers shared with the
//! IR fallback paths.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::{jump_target, Insn, Op};
use crate::errors::RuntimeError;
use crate::vm::proto::Closure;
use crate::vm::table::{Table, TableKey};
use crate::vm::value::{ClosureRef, Value};
use crate::vm::Vm;

/// Arithmetic operation selector, mirroring the metamethod indices the
/// DO_ARITH fallback is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Mod => "mod",
            ArithOp::Pow => "pow",
            ArithOp::Unm => "unm",
        }
    }
}

/// Numeric coercion: numbers pass through, strings parse.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::Str(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Generic arithmetic helper: the slow path behind every arithmetic
/// fast path. `b` is ignored for `Unm`.
pub fn do_arith(op: ArithOp, a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    let (Some(x), Some(y)) = (to_number(a), if op == ArithOp::Unm { Some(0.0) } else { to_number(b) })
    else {
        let offender = if to_number(a).is_none() { a } else { b };
        return Err(RuntimeError::new(format!(
            "attempt to perform arithmetic ({}) on a {} value",
            op.name(),
            offender.type_name()
        )));
    };

    let result = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Mod => x - (x / y).floor() * y,
        ArithOp::Pow => x.powf(y),
        ArithOp::Unm => -x,
    };

    Ok(Value::Number(result))
}

/// Length helper: tables report their array border, strings their byte
/// length.
pub fn do_len(value: &Value) -> Result<Value, RuntimeError> {
    match value {
        Value::Table(t) => Ok(Value::Number(t.borrow().length() as f64)),
        Value::Str(s) => Ok(Value::Number(s.len() as f64)),
        other => Err(RuntimeError::new(format!(
            "attempt to get length of a {} value",
            other.type_name()
        ))),
    }
}

/// Generic table read with `__index` table chains.
pub fn get_table(base: &Value, key: &Value) -> Result<Value, RuntimeError> {
    let mut current = base.clone();

    // bounded like the runtime's metatable chain loop
    for _ in 0..100 {
        let Value::Table(table) = &current else {
            return Err(RuntimeError::new(format!(
                "attempt to index a {} value",
                current.type_name()
            )));
        };

        let table = table.borrow();
        let value = table.get(key);
        if !value.is_nil() {
            return Ok(value);
        }

        let Some(meta) = &table.metatable else {
            return Ok(Value::Nil);
        };
        let index = meta.borrow().get_str("__index");
        if index.is_nil() {
            return Ok(Value::Nil);
        }
        drop(table);
        current = index;
    }

    Err(RuntimeError::new("'__index' chain too long; possible loop"))
}

/// Generic table write. Readonly tables reject writes; `__newindex` is
/// not consulted (raw assignment semantics).
pub fn set_table(base: &Value, key: &Value, value: Value) -> Result<(), RuntimeError> {
    let Value::Table(table) = base else {
        return Err(RuntimeError::new(format!(
            "attempt to index a {} value",
            base.type_name()
        )));
    };

    let mut table = table.borrow_mut();
    if table.readonly {
        return Err(RuntimeError::new("attempt to modify a readonly table"));
    }
    if TableKey::from_value(key).is_none() {
        return Err(RuntimeError::new(format!(
            "invalid table key of type {}",
            key.type_name()
        )));
    }
    table.set(key, value);
    Ok(())
}

/// Variadic concatenation with number coercion.
pub fn concat(values: &[Value]) -> Result<Value, RuntimeError> {
    let mut out = String::new();
    for value in values {
        match value {
            Value::Str(s) => out.push_str(s),
            Value::Number(n) => out.push_str(&n.to_string()),
            other => {
                return Err(RuntimeError::new(format!(
                    "attempt to concatenate a {} value",
                    other.type_name()
                )))
            }
        }
    }
    Ok(Value::Str(out.into()))
}

/// Ordered comparison: numbers with numbers, strings with strings.
/// NaN compares false on both sides.
pub fn less_than(a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x < y),
        (Value::Str(x), Value::Str(y)) => Ok(x < y),
        _ => Err(RuntimeError::new(format!(
            "attempt to compare {} with {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

pub fn less_equal(a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x <= y),
        (Value::Str(x), Value::Str(y)) => Ok(x <= y),
        _ => Err(RuntimeError::new(format!(
            "attempt to compare {} with {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Run a closure to completion and return its results.
pub fn run(vm: &Vm, closure: &ClosureRef, args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
    let proto = closure.proto.clone();
    let code = &proto.code;
    let k = &proto.constants;

    let mut regs = vec![Value::Nil; proto.max_stack_size as usize];
    let num_params = proto.num_params as usize;
    for (i, arg) in args.iter().take(num_params).enumerate() {
        regs[i] = arg.clone();
    }
    let varargs: Vec<Value> = if proto.is_vararg && args.len() > num_params {
        args[num_params..].to_vec()
    } else {
        Vec::new()
    };

    let env = closure.env.clone();
    let mut pc: usize = 0;

    while pc < code.len() {
        let insn = code[pc];
        let op = insn
            .op()
            .ok_or_else(|| RuntimeError::new("malformed instruction"))?;
        let aux = code.get(pc + 1).map_or(0, |i| i.0);

        match op {
            Op::Nop => {}

            Op::LoadNil => regs[insn.a()] = Value::Nil,
            Op::LoadB => {
                regs[insn.a()] = Value::Boolean(insn.b() != 0);
                if insn.c() != 0 {
                    pc += insn.c();
                }
            }
            Op::LoadN => regs[insn.a()] = Value::Number(insn.d() as f64),
            Op::LoadK => regs[insn.a()] = k[insn.d() as usize].clone(),
            Op::LoadKX => regs[insn.a()] = k[aux as usize].clone(),
            Op::Move => regs[insn.a()] = regs[insn.b()].clone(),

            Op::GetGlobal => {
                let key = k[aux as usize].clone();
                regs[insn.a()] = get_table(&Value::Table(env.clone()), &key)?;
            }
            Op::SetGlobal => {
                let key = k[aux as usize].clone();
                set_table(&Value::Table(env.clone()), &key, regs[insn.a()].clone())?;
                env.borrow_mut().safe_env = false;
            }

            Op::GetUpval => regs[insn.a()] = closure.upvalues.borrow()[insn.b()].clone(),
            Op::SetUpval => closure.upvalues.borrow_mut()[insn.b()] = regs[insn.a()].clone(),
            Op::CloseUpvals => {}

            Op::GetImport => {
                let preresolved = &k[insn.d() as usize];
                if env.borrow().safe_env && !preresolved.is_nil() {
                    regs[insn.a()] = preresolved.clone();
                } else {
                    regs[insn.a()] = crate::vm::load::get_import(&env, k, aux, false)?;
                }
            }

            Op::GetTable => {
                regs[insn.a()] = get_table(&regs[insn.b()], &regs[insn.c()])?;
            }
            Op::SetTable => {
                set_table(&regs[insn.b()], &regs[insn.c()], regs[insn.a()].clone())?;
            }
            Op::GetTableKS => {
                regs[insn.a()] = get_table(&regs[insn.b()], &k[aux as usize])?;
            }
            Op::SetTableKS => {
                set_table(&regs[insn.b()], &k[aux as usize], regs[insn.a()].clone())?;
            }
            Op::GetTableN => {
                let key = Value::Number(insn.c() as f64 + 1.0);
                regs[insn.a()] = get_table(&regs[insn.b()], &key)?;
            }
            Op::SetTableN => {
                let key = Value::Number(insn.c() as f64 + 1.0);
                set_table(&regs[insn.b()], &key, regs[insn.a()].clone())?;
            }

            Op::NewClosure => {
                let child = proto
                    .children
                    .get(insn.d() as usize)
                    .cloned()
                    .ok_or_else(|| RuntimeError::new("malformed closure instruction"))?;
                let fresh = Closure::new(child, env.clone());
                pc = capture_upvalues(&fresh, closure, &regs, code, pc)?;
                regs[insn.a()] = Value::Closure(Rc::new(fresh));
            }
            Op::DupClosure => {
                let Value::Closure(template) = &k[insn.d() as usize] else {
                    return Err(RuntimeError::new("malformed closure constant"));
                };
                if template.preload {
                    let fresh = Closure::new(template.proto.clone(), template.env.clone());
                    pc = capture_upvalues(&fresh, closure, &regs, code, pc)?;
                    regs[insn.a()] = Value::Closure(Rc::new(fresh));
                } else {
                    regs[insn.a()] = Value::Closure(template.clone());
                }
            }
            Op::Capture => {
                return Err(RuntimeError::new("orphaned capture instruction"));
            }

            Op::Call => {
                let a = insn.a();
                let nargs = insn
                    .b()
                    .checked_sub(1)
                    .ok_or_else(|| RuntimeError::new("variadic calls are not supported here"))?;
                let nresults = insn
                    .c()
                    .checked_sub(1)
                    .ok_or_else(|| RuntimeError::new("variadic results are not supported here"))?;

                let Value::Closure(callee) = regs[a].clone() else {
                    return Err(RuntimeError::new(format!(
                        "attempt to call a {} value",
                        regs[a].type_name()
                    )));
                };

                let call_args: Vec<Value> = regs[a + 1..a + 1 + nargs].to_vec();
                let results = run(vm, &callee, call_args)?;

                for i in 0..nresults {
                    regs[a + i] = results.get(i).cloned().unwrap_or(Value::Nil);
                }
            }
            Op::Return => {
                let a = insn.a();
                let count = insn
                    .b()
                    .checked_sub(1)
                    .ok_or_else(|| RuntimeError::new("variadic returns are not supported here"))?;
                return Ok(regs[a..a + count].to_vec());
            }

            Op::Jump => {
                pc = jump_target(insn, pc);
                continue;
            }
            Op::JumpBack => {
                vm.poll_interrupt()?;
                pc = jump_target(insn, pc);
                continue;
            }
            Op::JumpX => {
                vm.poll_interrupt()?;
                pc = (pc as i64 + 1 + insn.e() as i64) as usize;
                continue;
            }
            Op::JumpIf => {
                if regs[insn.a()].is_truthy() {
                    pc = jump_target(insn, pc);
                    continue;
                }
            }
            Op::JumpIfNot => {
                if !regs[insn.a()].is_truthy() {
                    pc = jump_target(insn, pc);
                    continue;
                }
            }

            Op::JumpIfEq | Op::JumpIfNotEq => {
                let eq = regs[insn.a()] == regs[aux as usize];
                if eq == (op == Op::JumpIfEq) {
                    pc = jump_target(insn, pc);
                    continue;
                }
            }
            Op::JumpIfLt | Op::JumpIfNotLt => {
                let lt = less_than(&regs[insn.a()], &regs[aux as usize])?;
                if lt == (op == Op::JumpIfLt) {
                    pc = jump_target(insn, pc);
                    continue;
                }
            }
            Op::JumpIfLe | Op::JumpIfNotLe => {
                let le = less_equal(&regs[insn.a()], &regs[aux as usize])?;
                if le == (op == Op::JumpIfLe) {
                    pc = jump_target(insn, pc);
                    continue;
                }
            }

            Op::JumpXEqKNil => {
                let not = aux & 0x8000_0000 != 0;
                if regs[insn.a()].is_nil() != not {
                    pc = jump_target(insn, pc);
                    continue;
                }
            }
            Op::JumpXEqKB => {
                let not = aux & 0x8000_0000 != 0;
                let eq = regs[insn.a()] == Value::Boolean(aux & 1 != 0);
                if eq != not {
                    pc = jump_target(insn, pc);
                    continue;
                }
            }
            Op::JumpXEqKN | Op::JumpXEqKS => {
                let not = aux & 0x8000_0000 != 0;
                let eq = regs[insn.a()] == k[(aux & 0x00ff_ffff) as usize];
                if eq != not {
                    pc = jump_target(insn, pc);
                    continue;
                }
            }

            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::Pow => {
                let arith = arith_op(op);
                regs[insn.a()] = do_arith(arith, &regs[insn.b()], &regs[insn.c()])?;
            }
            Op::AddK | Op::SubK | Op::MulK | Op::DivK | Op::ModK | Op::PowK => {
                let arith = arith_op(op);
                regs[insn.a()] = do_arith(arith, &regs[insn.b()], &k[insn.c()])?;
            }

            Op::Concat => {
                let slice: Vec<Value> = regs[insn.b()..=insn.c()].to_vec();
                regs[insn.a()] = concat(&slice)?;
            }
            Op::Not => regs[insn.a()] = Value::Boolean(!regs[insn.b()].is_truthy()),
            Op::Minus => {
                regs[insn.a()] = do_arith(ArithOp::Unm, &regs[insn.b()], &Value::Nil)?;
            }
            Op::Length => regs[insn.a()] = do_len(&regs[insn.b()])?,

            Op::NewTable => {
                let nhash = if insn.b() == 0 { 0 } else { 1 << (insn.b() - 1) };
                regs[insn.a()] =
                    Value::Table(Rc::new(RefCell::new(Table::new(aux as usize, nhash))));
            }
            Op::DupTable => {
                let Value::Table(template) = &k[insn.d() as usize] else {
                    return Err(RuntimeError::new("malformed table constant"));
                };
                let template = template.borrow();
                let mut fresh = Table::new(template.array.len(), template.hash.len());
                for (key, value) in &template.hash {
                    fresh.hash.insert(key.clone(), value.clone());
                }
                regs[insn.a()] = Value::Table(Rc::new(RefCell::new(fresh)));
            }
            Op::SetList => {
                let a = insn.a();
                let b = insn.b();
                let count = insn
                    .c()
                    .checked_sub(1)
                    .ok_or_else(|| RuntimeError::new("variadic setlist is not supported here"))?;
                let start = aux as usize;
                let Value::Table(table) = regs[a].clone() else {
                    return Err(RuntimeError::new("setlist target is not a table"));
                };
                let mut table = table.borrow_mut();
                for i in 0..count {
                    let index = Value::Number((start + i) as f64);
                    table.set(&index, regs[b + i].clone());
                }
            }

            Op::ForNPrep => {
                let a = insn.a();
                for slot in [a, a + 1, a + 2] {
                    let Some(n) = to_number(&regs[slot]) else {
                        return Err(RuntimeError::new("'for' loop bound must be a number"));
                    };
                    regs[slot] = Value::Number(n);
                }
                if !forn_condition(&regs, a)? {
                    pc = jump_target(insn, pc);
                    continue;
                }
            }
            Op::ForNLoop => {
                vm.poll_interrupt()?;
                let a = insn.a();
                let step = number(&regs[a + 1])?;
                let idx = number(&regs[a + 2])? + step;
                regs[a + 2] = Value::Number(idx);
                if forn_condition(&regs, a)? {
                    pc = jump_target(insn, pc);
                    continue;
                }
            }

            Op::ForGPrepNext | Op::ForGPrepINext => {
                let a = insn.a();
                if !matches!(regs[a + 1], Value::Table(_)) {
                    return Err(RuntimeError::new(format!(
                        "attempt to iterate over a {} value",
                        regs[a + 1].type_name()
                    )));
                }
                regs[a] = Value::Nil;
                regs[a + 2] = Value::LightUserdata(0);
                pc = jump_target(insn, pc);
                continue;
            }
            Op::ForGLoop => {
                vm.poll_interrupt()?;
                if let Some(target) = forg_step(&mut regs, insn, aux, pc)? {
                    pc = target;
                    continue;
                }
            }

            Op::GetVarargs => {
                let a = insn.a();
                let count = insn
                    .b()
                    .checked_sub(1)
                    .ok_or_else(|| RuntimeError::new("variadic spill is not supported here"))?;
                for i in 0..count {
                    regs[a + i] = varargs.get(i).cloned().unwrap_or(Value::Nil);
                }
            }
        }

        pc += op.length();
    }

    Ok(Vec::new())
}

fn arith_op(op: Op) -> ArithOp {
    match op {
        Op::Add | Op::AddK => ArithOp::Add,
        Op::Sub | Op::SubK => ArithOp::Sub,
        Op::Mul | Op::MulK => ArithOp::Mul,
        Op::Div | Op::DivK => ArithOp::Div,
        Op::Mod | Op::ModK => ArithOp::Mod,
        Op::Pow | Op::PowK => ArithOp::Pow,
        _ => unreachable!("not an arithmetic opcode"),
    }
}

fn number(value: &Value) -> Result<f64, RuntimeError> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(RuntimeError::new(format!(
            "expected a number, got {}",
            other.type_name()
        ))),
    }
}

/// Two-arm numeric loop condition: `step <= 0` picks which bound check
/// keeps the loop running. NaN bounds terminate the loop on both arms.
fn forn_condition(regs: &[Value], a: usize) -> Result<bool, RuntimeError> {
    let limit = number(&regs[a])?;
    let step = number(&regs[a + 1])?;
    let idx = number(&regs[a + 2])?;
    Ok(if step <= 0.0 { limit <= idx } else { idx <= limit })
}

/// One step of generic iteration. Returns the repeat target while the
/// loop continues, `None` when it exits. The iteration index lives in
/// the low 32 bits of the light-userdata control slot; the upper bits
/// stay zero.
fn forg_step(
    regs: &mut [Value],
    insn: Insn,
    aux: u32,
    pc: usize,
) -> Result<Option<usize>, RuntimeError> {
    let a = insn.a();

    if !regs[a].is_nil() {
        return Err(RuntimeError::new(format!(
            "attempt to iterate over a {} value",
            regs[a].type_name()
        )));
    }

    let Value::Table(table) = regs[a + 1].clone() else {
        return Err(RuntimeError::new(format!(
            "attempt to iterate over a {} value",
            regs[a + 1].type_name()
        )));
    };
    let Value::LightUserdata(control) = regs[a + 2] else {
        return Err(RuntimeError::new("malformed iteration state"));
    };
    let mut index = (control & 0xffff_ffff) as usize;

    let table = table.borrow();
    let array_len = table.array.len();

    // array part first; iteration stops at the first hole
    if index < array_len {
        let element = table.array[index].clone();
        if element.is_nil() {
            return Ok(None);
        }
        index += 1;
        regs[a + 2] = Value::LightUserdata(index as u64);
        regs[a + 3] = Value::Number(index as f64);
        regs[a + 4] = element;
        return Ok(Some(jump_target(insn, pc)));
    }

    // the ipairs specialization never reaches the hash part
    if (aux as i32) < 0 {
        return Ok(None);
    }

    let hash_index = index - array_len;
    if let Some((key, value)) = table.hash.iter().nth(hash_index) {
        regs[a + 2] = Value::LightUserdata((index + 1) as u64);
        regs[a + 3] = key_to_value(key);
        regs[a + 4] = value.clone();
        return Ok(Some(jump_target(insn, pc)));
    }

    Ok(None)
}

fn key_to_value(key: &TableKey) -> Value {
    match key {
        TableKey::Boolean(b) => Value::Boolean(*b),
        TableKey::Int(i) => Value::Number(*i as f64),
        TableKey::NumberBits(bits) => Value::Number(f64::from_bits(*bits)),
        TableKey::Str(s) => Value::Str(s.clone()),
    }
}

/// Consume the CAPTURE pseudo-instructions following a closure
/// construction, filling the fresh closure's upvalues. Returns the pc of
/// the last consumed instruction.
fn capture_upvalues(
    fresh: &Closure,
    parent: &ClosureRef,
    regs: &[Value],
    code: &[Insn],
    mut pc: usize,
) -> Result<usize, RuntimeError> {
    let nups = fresh.proto.num_upvals as usize;
    let mut upvalues = fresh.upvalues.borrow_mut();

    for slot in 0..nups {
        pc += 1;
        let insn = code
            .get(pc)
            .copied()
            .ok_or_else(|| RuntimeError::new("missing capture instruction"))?;
        if insn.op() != Some(Op::Capture) {
            return Err(RuntimeError::new("missing capture instruction"));
        }

        upvalues[slot] = match insn.a() {
            // VAL and REF both copy here; no open-upvalue aliasing
            0 | 1 => regs[insn.b()].clone(),
            2 => parent.upvalues.borrow()[insn.b()].clone(),
            _ => return Err(RuntimeError::new("unknown upvalue capture type")),
        };
    }

    Ok(pc)
}

/// Load a blob and immediately run the resulting closure.
pub fn load_and_run(
    vm: &mut Vm,
    chunkname: &str,
    data: &[u8],
) -> Result<Vec<Value>, RuntimeError> {
    let closure = crate::vm::load::load(vm, chunkname, data, None)
        .map_err(|e| RuntimeError::new(e.to_string()))?;
    vm.stack.pop();
    run(vm, &closure, Vec::new())
}
