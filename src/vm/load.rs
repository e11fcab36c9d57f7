// src/vm/load.rs
//! Bytecode deserialization.
//!
//! Reads a versioned blob, reconstructs the prototype tree, interns
//! string constants, resolves IMPORT constants against the environment,
//! and produces the main closure. Collection is paused for the whole
//! load; the string and prototype tables built here are temporaries
//! dropped when the load returns.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::{ConstantKind, Insn, Op, BYTECODE_VERSION};
use crate::errors::runtime::chunk_id;
use crate::errors::LoadError;
use crate::vm::proto::{Closure, LocVar, Proto};
use crate::vm::table::{Table, TableKey};
use crate::vm::value::{ClosureRef, LStr, TableRef, Value};
use crate::vm::{interp, Vm};

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
    chunk: String,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], chunkname: &str) -> Self {
        Self {
            data,
            offset: 0,
            chunk: chunk_id(chunkname),
        }
    }

    fn malformed(&self, what: &'static str) -> LoadError {
        LoadError::Malformed {
            chunk: self.chunk.clone(),
            what,
            offset: self.offset,
        }
    }

    fn read_u8(&mut self) -> Result<u8, LoadError> {
        let byte = *self
            .data
            .get(self.offset)
            .ok_or_else(|| self.malformed("unexpected end of data"))?;
        self.offset += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], LoadError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| self.malformed("unexpected end of data"))?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn read_u32(&mut self) -> Result<u32, LoadError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32, LoadError> {
        Ok(self.read_u32()? as i32)
    }

    fn read_f64(&mut self) -> Result<f64, LoadError> {
        let bytes = self.read_bytes(8)?;
        Ok(f64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_varint(&mut self) -> Result<u32, LoadError> {
        let mut result: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            if shift >= 32 {
                return Err(self.malformed("varint too long"));
            }
            result |= ((byte & 127) as u32) << shift;
            shift += 7;
            if byte & 128 == 0 {
                return Ok(result);
            }
        }
    }

    /// A varint string-table reference; 0 means absent.
    fn read_string(&mut self, strings: &[LStr]) -> Result<Option<LStr>, LoadError> {
        let id = self.read_varint()? as usize;
        if id == 0 {
            return Ok(None);
        }
        strings
            .get(id - 1)
            .cloned()
            .map(Some)
            .ok_or_else(|| self.malformed("string ref out of range"))
    }
}

/// Load a bytecode blob and push the resulting closure onto the VM
/// stack. `env` overrides the VM globals as the closure environment.
pub fn load(
    vm: &mut Vm,
    chunkname: &str,
    data: &[u8],
    env: Option<TableRef>,
) -> Result<ClosureRef, LoadError> {
    let _span = tracing::debug_span!("load", chunk = chunkname, bytes = data.len()).entered();

    let mut reader = Reader::new(data, chunkname);

    let version = reader.read_u8()?;

    // 0 means the rest of the blob is a compiler error message
    if version == 0 {
        return Err(LoadError::CompilerError {
            chunk: reader.chunk.clone(),
            message: String::from_utf8_lossy(&data[reader.offset..]).into_owned(),
        });
    }
    if version != BYTECODE_VERSION {
        return Err(LoadError::VersionMismatch {
            chunk: reader.chunk.clone(),
            found: version,
        });
    }

    // Objects created below are not rooted until the closure is pushed.
    let _gc_pause = vm.heap.pause_gc();

    let envt = env.unwrap_or_else(|| vm.globals.clone());
    let source = vm.heap.intern(chunkname);

    // string table
    let string_count = reader.read_varint()? as usize;
    let mut strings: Vec<LStr> = Vec::with_capacity(string_count);
    for _ in 0..string_count {
        let length = reader.read_varint()? as usize;
        let bytes = reader.read_bytes(length)?;
        let text =
            std::str::from_utf8(bytes).map_err(|_| reader.malformed("invalid string encoding"))?;
        strings.push(vm.heap.intern(text));
    }

    // proto table
    let proto_count = reader.read_varint()? as usize;
    let mut protos: Vec<Rc<Proto>> = Vec::with_capacity(proto_count);

    for _ in 0..proto_count {
        let proto = read_proto(&mut reader, &strings, &protos, &envt, &source)?;
        protos.push(Rc::new(proto));
    }

    // the main proto closes over the load environment
    let main_id = reader.read_varint()? as usize;
    let main = protos
        .get(main_id)
        .cloned()
        .ok_or_else(|| reader.malformed("main function id out of range"))?;

    let closure: ClosureRef = Rc::new(Closure::new(main, envt));
    vm.stack.push(Value::Closure(closure.clone()));

    tracing::debug!(protos = proto_count, strings = string_count, "load complete");
    Ok(closure)
}

fn read_proto(
    reader: &mut Reader<'_>,
    strings: &[LStr],
    protos: &[Rc<Proto>],
    envt: &TableRef,
    source: &LStr,
) -> Result<Proto, LoadError> {
    let mut proto = Proto {
        source: Some(source.clone()),
        ..Proto::default()
    };

    proto.max_stack_size = reader.read_u8()?;
    proto.num_params = reader.read_u8()?;
    proto.num_upvals = reader.read_u8()?;
    proto.is_vararg = reader.read_u8()? != 0;

    let size_code = reader.read_varint()? as usize;
    proto.code = Vec::with_capacity(size_code);
    for _ in 0..size_code {
        proto.code.push(Insn(reader.read_u32()?));
    }

    let size_k = reader.read_varint()? as usize;
    proto.constants = Vec::with_capacity(size_k);

    for _ in 0..size_k {
        let kind = ConstantKind::from_u8(reader.read_u8()?)
            .ok_or_else(|| reader.malformed("unexpected constant kind"))?;

        let value = match kind {
            ConstantKind::Nil => Value::Nil,
            ConstantKind::Boolean => Value::Boolean(reader.read_u8()? != 0),
            ConstantKind::Number => Value::Number(reader.read_f64()?),
            ConstantKind::String => {
                let s = reader
                    .read_string(strings)?
                    .ok_or_else(|| reader.malformed("null string constant"))?;
                Value::Str(s)
            }
            ConstantKind::Import => {
                let id = reader.read_u32()?;
                for const_id in crate::bytecode::decode_import_id(id) {
                    if const_id as usize >= proto.constants.len() {
                        return Err(reader.malformed("import id out of range"));
                    }
                }
                resolve_import_safe(envt, &proto.constants, id)
            }
            ConstantKind::Table => {
                let keys = reader.read_varint()? as usize;
                let mut table = Table::new(0, keys);
                for _ in 0..keys {
                    let key_id = reader.read_varint()? as usize;
                    let key = proto
                        .constants
                        .get(key_id)
                        .ok_or_else(|| reader.malformed("table key out of range"))?;
                    let key = TableKey::from_value(key)
                        .ok_or_else(|| reader.malformed("invalid table key constant"))?;
                    // shape constant: every key maps to number 0
                    table.hash.insert(key, Value::Number(0.0));
                }
                Value::Table(Rc::new(RefCell::new(table)))
            }
            ConstantKind::Closure => {
                let fid = reader.read_varint()? as usize;
                let child = protos
                    .get(fid)
                    .cloned()
                    .ok_or_else(|| reader.malformed("closure function id out of range"))?;
                let mut closure = Closure::new(child, envt.clone());
                closure.preload = closure.proto.num_upvals > 0;
                Value::Closure(Rc::new(closure))
            }
        };

        proto.constants.push(value);
    }

    let size_children = reader.read_varint()? as usize;
    proto.children = Vec::with_capacity(size_children);
    for _ in 0..size_children {
        let fid = reader.read_varint()? as usize;
        let child = protos
            .get(fid)
            .cloned()
            .ok_or_else(|| reader.malformed("child function id out of range"))?;
        proto.children.push(child);
    }

    proto.debug_name = reader.read_string(strings)?;

    let has_line_info = reader.read_u8()? != 0;
    if has_line_info {
        proto.line_gap_log2 = reader.read_u8()?;
        if proto.line_gap_log2 > 24 {
            return Err(reader.malformed("line gap out of range"));
        }

        let intervals = if size_code == 0 {
            0
        } else {
            ((size_code - 1) >> proto.line_gap_log2) + 1
        };

        let mut last_offset: u8 = 0;
        proto.line_info = Vec::with_capacity(size_code);
        for _ in 0..size_code {
            last_offset = last_offset.wrapping_add(reader.read_u8()?);
            proto.line_info.push(last_offset);
        }

        let mut last_line: i32 = 0;
        proto.abs_line_info = Vec::with_capacity(intervals);
        for _ in 0..intervals {
            last_line = last_line.wrapping_add(reader.read_i32()?);
            proto.abs_line_info.push(last_line);
        }
    }

    let has_debug_info = reader.read_u8()? != 0;
    if has_debug_info {
        let size_locvars = reader.read_varint()? as usize;
        proto.locvars = Vec::with_capacity(size_locvars);
        for _ in 0..size_locvars {
            proto.locvars.push(LocVar {
                name: reader.read_string(strings)?,
                start_pc: reader.read_varint()?,
                end_pc: reader.read_varint()?,
                reg: reader.read_u8()?,
            });
        }

        let size_upvalues = reader.read_varint()? as usize;
        proto.upvalue_names = Vec::with_capacity(size_upvalues);
        for _ in 0..size_upvalues {
            proto.upvalue_names.push(reader.read_string(strings)?);
        }
    }

    validate_proto(reader, &proto)?;

    Ok(proto)
}

/// Check that every constant and child reference encoded in the code
/// stream lies within the tables just loaded.
fn validate_proto(reader: &Reader<'_>, proto: &Proto) -> Result<(), LoadError> {
    let size_k = proto.constants.len();
    let size_children = proto.children.len();

    let mut pc = 0;
    while pc < proto.code.len() {
        let insn = proto.code[pc];
        let op = insn
            .op()
            .ok_or_else(|| reader.malformed("unknown opcode"))?;

        if op.length() == 2 && pc + 1 >= proto.code.len() {
            return Err(reader.malformed("missing aux word"));
        }
        let aux = proto.code.get(pc + 1).map_or(0, |i| i.0);

        let const_ok = |index: usize| index < size_k;

        let valid = match op {
            Op::LoadK | Op::DupTable | Op::DupClosure => const_ok(insn.d() as usize),
            Op::LoadKX | Op::GetGlobal | Op::SetGlobal | Op::GetTableKS | Op::SetTableKS => {
                const_ok(aux as usize)
            }
            Op::GetImport => {
                const_ok(insn.d() as usize)
                    && crate::bytecode::decode_import_id(aux)
                        .iter()
                        .all(|&id| const_ok(id as usize))
            }
            Op::AddK | Op::SubK | Op::MulK | Op::DivK | Op::ModK | Op::PowK => {
                const_ok(insn.c())
            }
            Op::JumpXEqKN | Op::JumpXEqKS => const_ok((aux & 0x00ff_ffff) as usize),
            Op::NewClosure => (insn.d() as usize) < size_children,
            _ => true,
        };

        if !valid {
            return Err(reader.malformed("operand index out of range"));
        }

        let target_ok = match op {
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
            | Op::ForGLoop => in_code(pc as i64 + 1 + insn.d() as i64, proto),
            Op::JumpX => in_code(pc as i64 + 1 + insn.e() as i64, proto),
            Op::LoadB => insn.c() == 0 || in_code(pc as i64 + 1 + insn.c() as i64, proto),
            _ => true,
        };

        if !target_ok {
            return Err(reader.malformed("jump target out of range"));
        }

        pc += op.length();
    }

    Ok(())
}

fn in_code(target: i64, proto: &Proto) -> bool {
    (0..proto.code.len() as i64).contains(&target)
}

/// Resolve an import chain against the environment.
///
/// Lookups only run when the environment is safe (not user-mutated
/// since startup), and run "protected": a runtime error during lookup
/// becomes a benign nil instead of failing the load. Nil propagates
/// through the chain, short-circuiting the remaining lookups.
fn resolve_import_safe(envt: &TableRef, k: &[Value], id: u32) -> Value {
    if !envt.borrow().safe_env {
        return Value::Nil;
    }

    match get_import(envt, k, id, true) {
        Ok(value) => value,
        Err(error) => {
            tracing::trace!(%error, "import resolution failed, using nil");
            Value::Nil
        }
    }
}

/// Walk an import chain: a global lookup followed by up to two field
/// lookups. With `propagate_nil`, a nil link short-circuits the rest.
pub fn get_import(
    envt: &TableRef,
    k: &[Value],
    id: u32,
    propagate_nil: bool,
) -> Result<Value, crate::errors::RuntimeError> {
    let ids = crate::bytecode::decode_import_id(id);

    let mut value = Value::Table(envt.clone());
    for &const_id in &ids {
        if propagate_nil && value.is_nil() {
            break;
        }
        let key = k.get(const_id as usize).cloned().unwrap_or(Value::Nil);
        value = interp::get_table(&value, &key)?;
    }

    Ok(value)
}
