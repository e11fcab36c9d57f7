// tests/common/ir_eval.rs
//! A reference evaluator for translated IR, precise enough to compare
//! fast paths against the runtime helpers they specialize.
//!
//! Registers are modeled as split tag/payload slots so partial stores
//! (STORE_DOUBLE before STORE_TAG) behave like they do over real VM
//! frames. Fallback helper calls are counted and executed through
//! `tarn::vm::interp`, so fast/slow equivalence is observable.

use rustc_hash::FxHashMap;

use tarn::ir::{IrCmd, IrCondition, IrConst, IrFunction, IrOp, IrOpKind};
use tarn::vm::interp;
use tarn::vm::{load, Proto, TableRef, Tag, Value};

/// A VM stack slot with independently writable parts.
#[derive(Debug, Clone)]
pub struct Slot {
    tag: Tag,
    number: f64,
    int: i32,
    object: Value,
}

impl Slot {
    fn from_value(value: &Value) -> Slot {
        let mut slot = Slot {
            tag: value.tag(),
            number: 0.0,
            int: 0,
            object: Value::Nil,
        };
        match value {
            Value::Nil => {}
            Value::Boolean(b) => slot.int = *b as i32,
            Value::LightUserdata(p) => slot.int = *p as i32,
            Value::Number(n) => slot.number = *n,
            Value::Str(_) | Value::Table(_) | Value::Closure(_) => slot.object = value.clone(),
        }
        slot
    }

    fn to_value(&self) -> Value {
        match self.tag {
            Tag::Nil => Value::Nil,
            Tag::Boolean => Value::Boolean(self.int != 0),
            Tag::LightUserdata => Value::LightUserdata(self.int as u32 as u64),
            Tag::Number => Value::Number(self.number),
            Tag::Str | Tag::Table | Tag::Function => self.object.clone(),
        }
    }

    fn is_truthy(&self) -> bool {
        !(self.tag == Tag::Nil || (self.tag == Tag::Boolean && self.int == 0))
    }
}

/// Intermediate value produced by one IR instruction.
#[derive(Debug, Clone)]
enum EvalValue {
    Tag(Tag),
    Num(f64),
    Int(i32),
    Ptr(Value),
    Tval(Value),
    /// Address of an array element.
    Elem(TableRef, usize),
    /// Cached hash-slot address; the matched key is filled in by
    /// CHECK_SLOT_MATCH.
    NodeAddr(TableRef, Option<Value>),
}

pub struct EvalOutcome {
    pub registers: Vec<Value>,
    /// Number of runtime helper invocations (fallback executions).
    pub helper_calls: usize,
}

pub struct IrEval<'f> {
    function: &'f IrFunction,
    proto: &'f Proto,
    env: TableRef,
    regs: Vec<Slot>,
    results: FxHashMap<u32, EvalValue>,
    helper_calls: usize,
    saved_pc: u32,
}

impl<'f> IrEval<'f> {
    pub fn new(
        function: &'f IrFunction,
        proto: &'f Proto,
        env: TableRef,
        registers: Vec<Value>,
    ) -> Self {
        let mut regs: Vec<Slot> = registers.iter().map(Slot::from_value).collect();
        regs.resize(
            (proto.max_stack_size as usize).max(regs.len()),
            Slot::from_value(&Value::Nil),
        );

        Self {
            function,
            proto,
            env,
            regs,
            results: FxHashMap::default(),
            helper_calls: 0,
            saved_pc: 0,
        }
    }

    /// Run from the entry block until the function returns.
    pub fn run(mut self) -> Result<EvalOutcome, String> {
        let mut block_index = 0u32;
        let mut steps = 0;

        'blocks: loop {
            let insts = self
                .function
                .blocks
                .get(block_index as usize)
                .ok_or_else(|| format!("jump to missing block {block_index}"))?
                .insts
                .clone();

            for inst_index in insts {
                steps += 1;
                if steps > 100_000 {
                    return Err("evaluation step limit exceeded".to_string());
                }

                match self.step(inst_index)? {
                    Flow::Continue => {}
                    Flow::Jump(target) => {
                        block_index = target;
                        continue 'blocks;
                    }
                    Flow::Return => {
                        return Ok(EvalOutcome {
                            registers: self.regs.iter().map(Slot::to_value).collect(),
                            helper_calls: self.helper_calls,
                        });
                    }
                }
            }

            return Err(format!("block {block_index} fell off its end"));
        }
    }

    fn step(&mut self, inst_index: u32) -> Result<Flow, String> {
        let inst = self.function.insts[inst_index as usize].clone();
        let ops = &inst.ops;

        macro_rules! record {
            ($value:expr) => {{
                self.results.insert(inst_index, $value);
                Ok(Flow::Continue)
            }};
        }

        match inst.cmd {
            IrCmd::LoadTag => record!(EvalValue::Tag(self.tag_of(ops[0])?)),
            IrCmd::LoadDouble => record!(EvalValue::Num(self.double_of(ops[0])?)),
            IrCmd::LoadInt => record!(EvalValue::Int(self.int_of(ops[0])?)),
            IrCmd::LoadPointer => record!(EvalValue::Ptr(self.value_of(ops[0])?)),
            IrCmd::LoadTvalue => record!(EvalValue::Tval(self.value_of(ops[0])?)),
            IrCmd::LoadNodeValueTv => {
                let EvalValue::NodeAddr(table, Some(key)) = self.result(ops[0])? else {
                    return Err("LOAD_NODE_VALUE_TV before a slot match".to_string());
                };
                let value = table.borrow().get(&key);
                record!(EvalValue::Tval(value))
            }
            IrCmd::LoadEnv => record!(EvalValue::Ptr(Value::Table(self.env.clone()))),

            IrCmd::GetArrAddr => {
                let table = self.table_of(ops[0])?;
                let index = self.index_of(ops[1])?;
                record!(EvalValue::Elem(table, index))
            }
            IrCmd::GetSlotNodeAddr => {
                let table = self.table_of(ops[0])?;
                record!(EvalValue::NodeAddr(table, None))
            }

            IrCmd::StoreTag => {
                let IrConst::Tag(tag) = self.function.constant(ops[1]) else {
                    return Err("STORE_TAG expects a tag constant".to_string());
                };
                self.reg_mut(ops[0])?.tag = tag;
                Ok(Flow::Continue)
            }
            IrCmd::StoreInt => {
                let value = self.int_of(ops[1])?;
                self.reg_mut(ops[0])?.int = value;
                Ok(Flow::Continue)
            }
            IrCmd::StoreDouble => {
                let value = self.double_of(ops[1])?;
                self.reg_mut(ops[0])?.number = value;
                Ok(Flow::Continue)
            }
            IrCmd::StorePointer => {
                let value = self.value_of(ops[1])?;
                self.reg_mut(ops[0])?.object = value;
                Ok(Flow::Continue)
            }
            IrCmd::StoreTvalue => {
                let value = self.value_of(ops[1])?;
                match ops[0].kind {
                    IrOpKind::VmReg => {
                        self.regs[ops[0].index as usize] = Slot::from_value(&value);
                    }
                    IrOpKind::Inst => {
                        let EvalValue::Elem(table, index) = self.result(ops[0])? else {
                            return Err("STORE_TVALUE into a non-address".to_string());
                        };
                        table.borrow_mut().array[index] = value;
                    }
                    _ => return Err("STORE_TVALUE target unsupported".to_string()),
                }
                Ok(Flow::Continue)
            }
            IrCmd::StoreNodeValueTv => {
                let value = self.value_of(ops[1])?;
                let EvalValue::NodeAddr(table, Some(key)) = self.result(ops[0])? else {
                    return Err("STORE_NODE_VALUE_TV before a slot match".to_string());
                };
                table.borrow_mut().set(&key, value);
                Ok(Flow::Continue)
            }

            IrCmd::AddInt => {
                let result = self.int_of(ops[0])? + self.int_of(ops[1])?;
                record!(EvalValue::Int(result))
            }
            IrCmd::SubInt => {
                let result = self.int_of(ops[0])? - self.int_of(ops[1])?;
                record!(EvalValue::Int(result))
            }

            IrCmd::AddNum
            | IrCmd::SubNum
            | IrCmd::MulNum
            | IrCmd::DivNum
            | IrCmd::ModNum
            | IrCmd::PowNum => {
                let a = self.double_of(ops[0])?;
                let b = self.double_of(ops[1])?;
                let result = match inst.cmd {
                    IrCmd::AddNum => a + b,
                    IrCmd::SubNum => a - b,
                    IrCmd::MulNum => a * b,
                    IrCmd::DivNum => a / b,
                    IrCmd::ModNum => a - (a / b).floor() * b,
                    _ => a.powf(b),
                };
                record!(EvalValue::Num(result))
            }
            IrCmd::UnmNum => record!(EvalValue::Num(-self.double_of(ops[0])?)),

            IrCmd::NotAny => {
                let tag = self.tag_of(ops[0])?;
                let int = self.int_of(ops[1])?;
                let falsy = tag == Tag::Nil || (tag == Tag::Boolean && int == 0);
                record!(EvalValue::Int(falsy as i32))
            }
            IrCmd::IntToNum => record!(EvalValue::Num(self.int_of(ops[0])? as f64)),
            IrCmd::NumToIndex => {
                let value = self.double_of(ops[0])?;
                if value.fract() != 0.0 || !(i32::MIN as f64..=i32::MAX as f64).contains(&value) {
                    return Ok(Flow::Jump(self.block_of(ops[1])?));
                }
                record!(EvalValue::Int(value as i32))
            }
            IrCmd::TableLen => {
                let table = self.table_of(ops[0])?;
                let len = table.borrow().length() as f64;
                record!(EvalValue::Num(len))
            }

            IrCmd::Jump => Ok(Flow::Jump(self.block_of(ops[0])?)),
            IrCmd::JumpIfTruthy | IrCmd::JumpIfFalsy => {
                let truthy = self.reg(ops[0])?.is_truthy();
                let jump = truthy == (inst.cmd == IrCmd::JumpIfTruthy);
                let target = if jump { ops[1] } else { ops[2] };
                Ok(Flow::Jump(self.block_of(target)?))
            }
            IrCmd::JumpEqTag => {
                let a = self.tag_of(ops[0])?;
                let b = self.tag_of(ops[1])?;
                let target = if a == b { ops[2] } else { ops[3] };
                Ok(Flow::Jump(self.block_of(target)?))
            }
            IrCmd::JumpEqInt => {
                let a = self.int_of(ops[0])?;
                let b = self.int_of(ops[1])?;
                let target = if a == b { ops[2] } else { ops[3] };
                Ok(Flow::Jump(self.block_of(target)?))
            }
            IrCmd::JumpEqPointer => {
                let a = self.value_of(ops[0])?;
                let b = self.value_of(ops[1])?;
                let target = if a == b { ops[2] } else { ops[3] };
                Ok(Flow::Jump(self.block_of(target)?))
            }
            IrCmd::JumpCmpNum => {
                let a = self.double_of(ops[0])?;
                let b = self.double_of(ops[1])?;
                let cond = self.cond_of(ops[2])?;
                let target = if cond.holds(a, b) { ops[3] } else { ops[4] };
                Ok(Flow::Jump(self.block_of(target)?))
            }
            IrCmd::JumpCmpAny => {
                self.helper_calls += 1;
                let a = self.reg(ops[0])?.to_value();
                let b = self.reg(ops[1])?.to_value();
                let cond = self.cond_of(ops[2])?;
                let holds = match cond {
                    IrCondition::Equal => a == b,
                    IrCondition::NotEqual => a != b,
                    IrCondition::Less => interp::less_than(&a, &b).map_err(|e| e.to_string())?,
                    IrCondition::LessEqual => {
                        interp::less_equal(&a, &b).map_err(|e| e.to_string())?
                    }
                    IrCondition::NotLess => {
                        !interp::less_than(&a, &b).map_err(|e| e.to_string())?
                    }
                    IrCondition::NotLessEqual => {
                        !interp::less_equal(&a, &b).map_err(|e| e.to_string())?
                    }
                    other => return Err(format!("JUMP_CMP_ANY with {other:?}")),
                };
                let target = if holds { ops[3] } else { ops[4] };
                Ok(Flow::Jump(self.block_of(target)?))
            }

            IrCmd::CheckTag => {
                let tag = self.tag_of(ops[0])?;
                let IrConst::Tag(expected) = self.function.constant(ops[1]) else {
                    return Err("CHECK_TAG expects a tag constant".to_string());
                };
                if tag != expected {
                    return Ok(Flow::Jump(self.block_of(ops[2])?));
                }
                Ok(Flow::Continue)
            }
            IrCmd::CheckReadonly => {
                let table = self.table_of(ops[0])?;
                if table.borrow().readonly {
                    return Ok(Flow::Jump(self.block_of(ops[1])?));
                }
                Ok(Flow::Continue)
            }
            IrCmd::CheckNoMetatable => {
                let table = self.table_of(ops[0])?;
                if table.borrow().metatable.is_some() {
                    return Ok(Flow::Jump(self.block_of(ops[1])?));
                }
                Ok(Flow::Continue)
            }
            IrCmd::CheckSafeEnv => {
                if !self.env.borrow().safe_env {
                    return Ok(Flow::Jump(self.block_of(ops[0])?));
                }
                Ok(Flow::Continue)
            }
            IrCmd::CheckArraySize => {
                let table = self.table_of(ops[0])?;
                let index = self.index_of(ops[1])?;
                if index >= table.borrow().array.len() {
                    return Ok(Flow::Jump(self.block_of(ops[2])?));
                }
                Ok(Flow::Continue)
            }
            IrCmd::CheckSlotMatch => {
                let EvalValue::NodeAddr(table, _) = self.result(ops[0])? else {
                    return Err("CHECK_SLOT_MATCH on a non-slot".to_string());
                };
                let key = self.value_of(ops[1])?;
                let hit = !table.borrow().get(&key).is_nil();
                if !hit {
                    return Ok(Flow::Jump(self.block_of(ops[2])?));
                }
                self.results
                    .insert(ops[0].index, EvalValue::NodeAddr(table, Some(key)));
                Ok(Flow::Continue)
            }
            IrCmd::CheckGc | IrCmd::Interrupt | IrCmd::BarrierTableForward => Ok(Flow::Continue),

            IrCmd::SetSavedpc => {
                let IrConst::Uint(pc) = self.function.constant(ops[0]) else {
                    return Err("SET_SAVEDPC expects a uint".to_string());
                };
                self.saved_pc = pc;
                Ok(Flow::Continue)
            }

            IrCmd::DoArith => {
                self.helper_calls += 1;
                let IrConst::Int(tm) = self.function.constant(ops[3]) else {
                    return Err("DO_ARITH expects a metamethod index".to_string());
                };
                let op = arith_from_index(tm)?;
                let b = self.reg(ops[1])?.to_value();
                let c = self.value_of(ops[2])?;
                let result = interp::do_arith(op, &b, &c).map_err(|e| e.to_string())?;
                *self.reg_mut(ops[0])? = Slot::from_value(&result);
                Ok(Flow::Continue)
            }
            IrCmd::DoLen => {
                self.helper_calls += 1;
                let value = self.reg(ops[1])?.to_value();
                let result = interp::do_len(&value).map_err(|e| e.to_string())?;
                *self.reg_mut(ops[0])? = Slot::from_value(&result);
                Ok(Flow::Continue)
            }
            IrCmd::GetTable => {
                self.helper_calls += 1;
                let base = self.reg(ops[1])?.to_value();
                let key = self.value_of(ops[2])?;
                let result = interp::get_table(&base, &key).map_err(|e| e.to_string())?;
                *self.reg_mut(ops[0])? = Slot::from_value(&result);
                Ok(Flow::Continue)
            }
            IrCmd::SetTable => {
                self.helper_calls += 1;
                let base = self.reg(ops[1])?.to_value();
                let key = self.value_of(ops[2])?;
                let value = self.reg(ops[0])?.to_value();
                interp::set_table(&base, &key, value).map_err(|e| e.to_string())?;
                Ok(Flow::Continue)
            }
            IrCmd::GetImport => {
                self.helper_calls += 1;
                let IrConst::Uint(id) = self.function.constant(ops[1]) else {
                    return Err("GET_IMPORT expects an import id".to_string());
                };
                let result = load::get_import(&self.env, &self.proto.constants, id, false)
                    .map_err(|e| e.to_string())?;
                *self.reg_mut(ops[0])? = Slot::from_value(&result);
                Ok(Flow::Continue)
            }
            IrCmd::FallbackGetGlobal => {
                self.helper_calls += 1;
                let key = self.value_of(ops[2])?;
                let result = interp::get_table(&Value::Table(self.env.clone()), &key)
                    .map_err(|e| e.to_string())?;
                *self.reg_mut(ops[1])? = Slot::from_value(&result);
                Ok(Flow::Continue)
            }
            IrCmd::FallbackSetGlobal => {
                self.helper_calls += 1;
                let key = self.value_of(ops[2])?;
                let value = self.reg(ops[1])?.to_value();
                interp::set_table(&Value::Table(self.env.clone()), &key, value)
                    .map_err(|e| e.to_string())?;
                Ok(Flow::Continue)
            }
            IrCmd::FallbackGetTableKs => {
                self.helper_calls += 1;
                let base = self.reg(ops[2])?.to_value();
                let key = self.value_of(ops[3])?;
                let result = interp::get_table(&base, &key).map_err(|e| e.to_string())?;
                *self.reg_mut(ops[1])? = Slot::from_value(&result);
                Ok(Flow::Continue)
            }
            IrCmd::FallbackSetTableKs => {
                self.helper_calls += 1;
                let base = self.reg(ops[2])?.to_value();
                let key = self.value_of(ops[3])?;
                let value = self.reg(ops[1])?.to_value();
                interp::set_table(&base, &key, value).map_err(|e| e.to_string())?;
                Ok(Flow::Continue)
            }

            IrCmd::FallbackReturn => Ok(Flow::Return),

            other => Err(format!("evaluator does not model {other:?}")),
        }
    }

    fn reg(&self, op: IrOp) -> Result<&Slot, String> {
        if op.kind != IrOpKind::VmReg {
            return Err(format!("expected a register operand, got {op:?}"));
        }
        self.regs
            .get(op.index as usize)
            .ok_or_else(|| "register out of range".to_string())
    }

    fn reg_mut(&mut self, op: IrOp) -> Result<&mut Slot, String> {
        if op.kind != IrOpKind::VmReg {
            return Err(format!("expected a register operand, got {op:?}"));
        }
        self.regs
            .get_mut(op.index as usize)
            .ok_or_else(|| "register out of range".to_string())
    }

    fn result(&self, op: IrOp) -> Result<EvalValue, String> {
        if op.kind != IrOpKind::Inst {
            return Err(format!("expected an instruction operand, got {op:?}"));
        }
        self.results
            .get(&op.index)
            .cloned()
            .ok_or_else(|| format!("use of unevaluated %{}", op.index))
    }

    fn block_of(&self, op: IrOp) -> Result<u32, String> {
        if op.kind != IrOpKind::Block {
            return Err(format!("expected a block operand, got {op:?}"));
        }
        Ok(op.index)
    }

    fn cond_of(&self, op: IrOp) -> Result<IrCondition, String> {
        IrCondition::from_index(op.index).ok_or_else(|| "bad condition".to_string())
    }

    fn tag_of(&self, op: IrOp) -> Result<Tag, String> {
        match op.kind {
            IrOpKind::VmReg => Ok(self.reg(op)?.tag),
            IrOpKind::VmConst => Ok(self.proto.constants[op.index as usize].tag()),
            IrOpKind::Constant => match self.function.constant(op) {
                IrConst::Tag(tag) => Ok(tag),
                other => Err(format!("not a tag: {other:?}")),
            },
            IrOpKind::Inst => match self.result(op)? {
                EvalValue::Tag(tag) => Ok(tag),
                EvalValue::Elem(table, index) => {
                    Ok(table.borrow().array[index].tag())
                }
                other => Err(format!("not a tag: {other:?}")),
            },
            _ => Err(format!("cannot read a tag from {op:?}")),
        }
    }

    fn double_of(&self, op: IrOp) -> Result<f64, String> {
        match op.kind {
            IrOpKind::VmReg => Ok(self.reg(op)?.number),
            IrOpKind::Constant => match self.function.constant(op) {
                IrConst::Double(value) => Ok(value),
                other => Err(format!("not a double: {other:?}")),
            },
            IrOpKind::Inst => match self.result(op)? {
                EvalValue::Num(value) => Ok(value),
                other => Err(format!("not a double: {other:?}")),
            },
            _ => Err(format!("cannot read a double from {op:?}")),
        }
    }

    fn int_of(&self, op: IrOp) -> Result<i32, String> {
        match op.kind {
            IrOpKind::VmReg => Ok(self.reg(op)?.int),
            IrOpKind::Constant => match self.function.constant(op) {
                IrConst::Int(value) => Ok(value),
                IrConst::Uint(value) => Ok(value as i32),
                other => Err(format!("not an int: {other:?}")),
            },
            IrOpKind::Inst => match self.result(op)? {
                EvalValue::Int(value) => Ok(value),
                other => Err(format!("not an int: {other:?}")),
            },
            _ => Err(format!("cannot read an int from {op:?}")),
        }
    }

    /// An array index operand: either a computed int or a uint constant.
    fn index_of(&self, op: IrOp) -> Result<usize, String> {
        match op.kind {
            IrOpKind::Constant => match self.function.constant(op) {
                IrConst::Uint(value) => Ok(value as usize),
                IrConst::Int(value) => Ok(value as usize),
                other => Err(format!("not an index: {other:?}")),
            },
            IrOpKind::Inst => match self.result(op)? {
                EvalValue::Int(value) if value >= 0 => Ok(value as usize),
                EvalValue::Int(_) => Err("negative array index".to_string()),
                other => Err(format!("not an index: {other:?}")),
            },
            _ => Err(format!("cannot read an index from {op:?}")),
        }
    }

    /// Generic value read: registers, proto constants, computed values.
    fn value_of(&self, op: IrOp) -> Result<Value, String> {
        match op.kind {
            IrOpKind::VmReg => Ok(self.reg(op)?.to_value()),
            IrOpKind::VmConst => Ok(self.proto.constants[op.index as usize].clone()),
            IrOpKind::Constant => match self.function.constant(op) {
                IrConst::Uint(value) => Ok(Value::Number(value as f64)),
                IrConst::Int(value) => Ok(Value::Number(value as f64)),
                IrConst::Double(value) => Ok(Value::Number(value)),
                IrConst::Bool(value) => Ok(Value::Boolean(value)),
                IrConst::Tag(_) => Err("tag constant is not a value".to_string()),
            },
            IrOpKind::Inst => match self.result(op)? {
                EvalValue::Ptr(value) | EvalValue::Tval(value) => Ok(value),
                EvalValue::Num(value) => Ok(Value::Number(value)),
                EvalValue::Int(value) => Ok(Value::Number(value as f64)),
                EvalValue::Elem(table, index) => {
                    Ok(table.borrow().array[index].clone())
                }
                other => Err(format!("not a value: {other:?}")),
            },
            _ => Err(format!("cannot read a value from {op:?}")),
        }
    }

    fn table_of(&self, op: IrOp) -> Result<TableRef, String> {
        match self.value_of(op)? {
            Value::Table(table) => Ok(table),
            other => Err(format!("expected a table, got {}", other.type_name())),
        }
    }
}

enum Flow {
    Continue,
    Jump(u32),
    Return,
}

fn arith_from_index(index: i32) -> Result<interp::ArithOp, String> {
    Ok(match index {
        0 => interp::ArithOp::Add,
        1 => interp::ArithOp::Sub,
        2 => interp::ArithOp::Mul,
        3 => interp::ArithOp::Div,
        4 => interp::ArithOp::Mod,
        5 => interp::ArithOp::Pow,
        6 => interp::ArithOp::Unm,
        _ => return Err(format!("unknown arithmetic metamethod index {index}")),
    })
}
