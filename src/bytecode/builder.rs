// src/bytecode/builder.rs
//! Compiler-side bytecode writer.
//!
//! Produces blobs in the wire format the loader consumes: a version
//! byte, a varint-prefixed string table, a varint-prefixed prototype
//! table, and a final varint main-prototype index.

use rustc_hash::FxHashMap;

use crate::bytecode::{ConstantKind, BYTECODE_VERSION};

/// A constant entry of one prototype.
#[derive(Debug, Clone)]
pub enum ConstantSpec {
    Nil,
    Boolean(bool),
    Number(f64),
    /// 1-based reference into the builder's string table.
    String(u32),
    /// Chain of up to three constant indices naming string constants in
    /// the same prototype; resolved against the environment at load time.
    Import(Vec<u32>),
    /// Table shape: constant indices used as keys, each mapped to 0.
    Table(Vec<u32>),
    /// Child prototype index in the builder's prototype table.
    Closure(u32),
}

/// Everything the writer needs to emit one prototype.
#[derive(Debug, Clone, Default)]
pub struct ProtoSpec {
    pub max_stack_size: u8,
    pub num_params: u8,
    pub num_upvals: u8,
    pub is_vararg: bool,
    pub code: Vec<u32>,
    pub constants: Vec<ConstantSpec>,
    /// Indices into the builder's prototype table.
    pub children: Vec<u32>,
    /// 1-based string-table reference; 0 means no debug name.
    pub debug_name: u32,
    /// Absolute line per instruction; enables the two-level line table.
    pub lines: Option<Vec<u32>>,
    /// (name string ref, start pc, end pc, register)
    pub locvars: Vec<(u32, u32, u32, u8)>,
    /// Upvalue name string refs.
    pub upvalue_names: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct BytecodeBuilder {
    strings: Vec<String>,
    string_map: FxHashMap<String, u32>,
    protos: Vec<ProtoSpec>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string and return its 1-based table reference.
    pub fn add_string(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.string_map.get(s) {
            return id;
        }
        self.strings.push(s.to_string());
        let id = self.strings.len() as u32;
        self.string_map.insert(s.to_string(), id);
        id
    }

    pub fn add_proto(&mut self, proto: ProtoSpec) -> u32 {
        self.protos.push(proto);
        (self.protos.len() - 1) as u32
    }

    /// Serialize the blob with `main_id` as the entry prototype.
    pub fn finish(self, main_id: u32) -> Vec<u8> {
        let mut out = vec![BYTECODE_VERSION];

        write_varint(&mut out, self.strings.len() as u32);
        for s in &self.strings {
            write_varint(&mut out, s.len() as u32);
            out.extend_from_slice(s.as_bytes());
        }

        write_varint(&mut out, self.protos.len() as u32);
        for proto in &self.protos {
            write_proto(&mut out, proto);
        }

        write_varint(&mut out, main_id);
        out
    }

    /// The version-0 payload a compiler emits when it cannot produce
    /// bytecode: the rest of the blob is the error message.
    pub fn encode_error(message: &str) -> Vec<u8> {
        let mut out = vec![0u8];
        out.extend_from_slice(message.as_bytes());
        out
    }
}

fn write_proto(out: &mut Vec<u8>, proto: &ProtoSpec) {
    out.push(proto.max_stack_size);
    out.push(proto.num_params);
    out.push(proto.num_upvals);
    out.push(proto.is_vararg as u8);

    write_varint(out, proto.code.len() as u32);
    for insn in &proto.code {
        out.extend_from_slice(&insn.to_le_bytes());
    }

    write_varint(out, proto.constants.len() as u32);
    for constant in &proto.constants {
        match constant {
            ConstantSpec::Nil => out.push(ConstantKind::Nil as u8),
            ConstantSpec::Boolean(value) => {
                out.push(ConstantKind::Boolean as u8);
                out.push(*value as u8);
            }
            ConstantSpec::Number(value) => {
                out.push(ConstantKind::Number as u8);
                out.extend_from_slice(&value.to_le_bytes());
            }
            ConstantSpec::String(string_ref) => {
                out.push(ConstantKind::String as u8);
                write_varint(out, *string_ref);
            }
            ConstantSpec::Import(const_ids) => {
                out.push(ConstantKind::Import as u8);
                let id = crate::bytecode::encode_import_id(const_ids);
                out.extend_from_slice(&id.to_le_bytes());
            }
            ConstantSpec::Table(keys) => {
                out.push(ConstantKind::Table as u8);
                write_varint(out, keys.len() as u32);
                for key in keys {
                    write_varint(out, *key);
                }
            }
            ConstantSpec::Closure(proto_id) => {
                out.push(ConstantKind::Closure as u8);
                write_varint(out, *proto_id);
            }
        }
    }

    write_varint(out, proto.children.len() as u32);
    for child in &proto.children {
        write_varint(out, *child);
    }

    write_varint(out, proto.debug_name);

    match &proto.lines {
        None => out.push(0),
        Some(lines) => {
            assert_eq!(lines.len(), proto.code.len());
            out.push(1);
            write_line_info(out, lines);
        }
    }

    let has_debug_info = !proto.locvars.is_empty() || !proto.upvalue_names.is_empty();
    out.push(has_debug_info as u8);
    if has_debug_info {
        write_varint(out, proto.locvars.len() as u32);
        for (name, start_pc, end_pc, reg) in &proto.locvars {
            write_varint(out, *name);
            write_varint(out, *start_pc);
            write_varint(out, *end_pc);
            out.push(*reg);
        }

        write_varint(out, proto.upvalue_names.len() as u32);
        for name in &proto.upvalue_names {
            write_varint(out, *name);
        }
    }
}

/// Two-level line encoding: one delta byte per instruction against a
/// sparse table of absolute bases, one base every `1 << gap_log2`
/// instructions. The gap is chosen to minimize total size among gaps
/// whose per-instruction offsets all fit in a byte.
fn write_line_info(out: &mut Vec<u8>, lines: &[u32]) {
    if lines.is_empty() {
        out.push(0);
        return;
    }

    let gap_log2 = pick_line_gap(lines);

    let intervals = ((lines.len() - 1) >> gap_log2) + 1;
    let mut baselines = vec![0u32; intervals];
    for (i, chunk) in lines.chunks(1 << gap_log2).enumerate() {
        baselines[i] = chunk.iter().copied().min().unwrap_or(0);
    }

    out.push(gap_log2);

    let mut last_offset: u8 = 0;
    for (pc, &line) in lines.iter().enumerate() {
        let offset = (line - baselines[pc >> gap_log2]) as u8;
        out.push(offset.wrapping_sub(last_offset));
        last_offset = offset;
    }

    let mut last_line: i32 = 0;
    for &baseline in &baselines {
        out.extend_from_slice(&(baseline as i32 - last_line).to_le_bytes());
        last_line = baseline as i32;
    }
}

fn pick_line_gap(lines: &[u32]) -> u8 {
    let mut best: Option<(usize, u8)> = None;

    'gaps: for gap_log2 in 0u8..=24 {
        for chunk in lines.chunks(1usize << gap_log2) {
            let min = chunk.iter().copied().min().unwrap_or(0);
            let max = chunk.iter().copied().max().unwrap_or(0);
            if max - min > u8::MAX as u32 {
                continue 'gaps;
            }
        }
        let intervals = ((lines.len() - 1) >> gap_log2) + 1;
        let size = lines.len() + intervals * 4;
        if best.is_none_or(|(best_size, _)| size < best_size) {
            best = Some((size, gap_log2));
        }
    }

    // gap 0 always fits: every window holds a single instruction
    best.map(|(_, gap)| gap).unwrap_or(0)
}

pub(crate) fn write_varint(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 127) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 128;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}
