// src/ir/translate.rs
//! Bytecode-to-IR translation.
//!
//! Each bytecode instruction expands into a tag-checked fast path and a
//! fallback block calling the matching runtime helper; the fallback
//! rejoins the bytecode block after the instruction. Cold operations
//! (calls, closure construction, variadics) translate to helper calls
//! directly.

use crate::bytecode::{jump_target, Insn, Op};
use crate::ir::builder::{FallbackStreamScope, IrBuilder};
use crate::ir::{IrBlockKind, IrCmd, IrCondition, IrFunction, IrOp};
use crate::vm::interp::ArithOp;
use crate::vm::{Proto, Tag, Value};

/// Translate a whole prototype.
pub fn translate_function(proto: &Proto) -> IrFunction {
    let _span = tracing::trace_span!("translate", code = proto.code.len()).entered();

    let mut build = IrBuilder::new(proto);

    let mut pc = 0;
    while pc < proto.code.len() {
        let insn = proto.code[pc];
        let op = insn.op().expect("loader-validated bytecode");

        build.set_origin(pc);

        // jump targets begin a fresh bytecode block; implicit bytecode
        // fallthrough becomes an explicit jump
        if build.is_jump_target(pc) {
            let block = build.block_at_inst(pc);
            if build.has_open_block() && !build.is_block_terminated() {
                build.inst(IrCmd::Jump, &[block]);
            }
            build.begin_block(block);
        }

        translate_inst(&mut build, insn, pc);

        pc += op.length();
    }

    build.function
}

fn translate_inst(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    match insn.op().expect("loader-validated bytecode") {
        Op::Nop => {}

        Op::LoadNil => translate_inst_load_nil(build, insn),
        Op::LoadB => translate_inst_load_b(build, insn, pc),
        Op::LoadN => translate_inst_load_n(build, insn),
        Op::LoadK => translate_inst_load_k(build, insn),
        Op::LoadKX => translate_inst_load_kx(build, insn, pc),
        Op::Move => translate_inst_move(build, insn),

        Op::GetGlobal => translate_inst_get_global(build, insn, pc),
        Op::SetGlobal => translate_inst_set_global(build, insn, pc),
        Op::GetUpval => translate_inst_get_upval(build, insn),
        Op::SetUpval => translate_inst_set_upval(build, insn),
        Op::CloseUpvals => translate_inst_close_upvals(build, insn),
        Op::GetImport => translate_inst_get_import(build, insn, pc),

        Op::GetTable => translate_inst_get_table(build, insn, pc),
        Op::SetTable => translate_inst_set_table(build, insn, pc),
        Op::GetTableKS => translate_inst_get_table_ks(build, insn, pc),
        Op::SetTableKS => translate_inst_set_table_ks(build, insn, pc),
        Op::GetTableN => translate_inst_get_table_n(build, insn, pc),
        Op::SetTableN => translate_inst_set_table_n(build, insn, pc),

        Op::NewClosure => translate_inst_new_closure(build, insn, pc),
        Op::DupClosure => translate_inst_dup_closure(build, insn, pc),
        Op::Capture => translate_inst_capture(build, insn),

        Op::Call => translate_inst_call(build, insn, pc),
        Op::Return => translate_inst_return(build, insn, pc),

        Op::Jump => translate_inst_jump(build, insn, pc),
        Op::JumpBack => translate_inst_jump_back(build, insn, pc),
        Op::JumpIf => translate_inst_jump_if(build, insn, pc, false),
        Op::JumpIfNot => translate_inst_jump_if(build, insn, pc, true),
        Op::JumpIfEq => translate_inst_jump_if_eq(build, insn, pc, false),
        Op::JumpIfNotEq => translate_inst_jump_if_eq(build, insn, pc, true),
        Op::JumpIfLe => translate_inst_jump_if_cond(build, insn, pc, IrCondition::LessEqual),
        Op::JumpIfLt => translate_inst_jump_if_cond(build, insn, pc, IrCondition::Less),
        Op::JumpIfNotLe => {
            translate_inst_jump_if_cond(build, insn, pc, IrCondition::NotLessEqual)
        }
        Op::JumpIfNotLt => translate_inst_jump_if_cond(build, insn, pc, IrCondition::NotLess),
        Op::JumpX => translate_inst_jump_x(build, insn, pc),
        Op::JumpXEqKNil => translate_inst_jump_x_eq_nil(build, insn, pc),
        Op::JumpXEqKB => translate_inst_jump_x_eq_b(build, insn, pc),
        Op::JumpXEqKN => translate_inst_jump_x_eq_n(build, insn, pc),
        Op::JumpXEqKS => translate_inst_jump_x_eq_s(build, insn, pc),

        Op::Add => translate_inst_binary(build, insn, pc, ArithOp::Add),
        Op::Sub => translate_inst_binary(build, insn, pc, ArithOp::Sub),
        Op::Mul => translate_inst_binary(build, insn, pc, ArithOp::Mul),
        Op::Div => translate_inst_binary(build, insn, pc, ArithOp::Div),
        Op::Mod => translate_inst_binary(build, insn, pc, ArithOp::Mod),
        Op::Pow => translate_inst_binary(build, insn, pc, ArithOp::Pow),
        Op::AddK => translate_inst_binary_k(build, insn, pc, ArithOp::Add),
        Op::SubK => translate_inst_binary_k(build, insn, pc, ArithOp::Sub),
        Op::MulK => translate_inst_binary_k(build, insn, pc, ArithOp::Mul),
        Op::DivK => translate_inst_binary_k(build, insn, pc, ArithOp::Div),
        Op::ModK => translate_inst_binary_k(build, insn, pc, ArithOp::Mod),
        Op::PowK => translate_inst_binary_k(build, insn, pc, ArithOp::Pow),

        Op::Concat => translate_inst_concat(build, insn, pc),
        Op::Not => translate_inst_not(build, insn),
        Op::Minus => translate_inst_minus(build, insn, pc),
        Op::Length => translate_inst_length(build, insn, pc),

        Op::NewTable => translate_inst_new_table(build, insn, pc),
        Op::DupTable => translate_inst_dup_table(build, insn, pc),
        Op::SetList => translate_inst_set_list(build, insn, pc),

        Op::ForNPrep => translate_inst_forn_prep(build, insn, pc),
        Op::ForNLoop => translate_inst_forn_loop(build, insn, pc),
        Op::ForGPrepNext => translate_inst_forg_prep_next(build, insn, pc),
        Op::ForGPrepINext => translate_inst_forg_prep_inext(build, insn, pc),
        Op::ForGLoop => translate_inst_forg_loop(build, insn, pc),

        Op::GetVarargs => translate_inst_get_varargs(build, insn, pc),
    }
}

pub fn translate_inst_load_nil(build: &mut IrBuilder<'_>, insn: Insn) {
    let ra = IrOp::vm_reg(insn.a());
    let tag = build.const_tag(Tag::Nil);
    build.inst(IrCmd::StoreTag, &[ra, tag]);
}

pub fn translate_inst_load_b(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let value = build.const_int(insn.b() as i32);
    build.inst(IrCmd::StoreInt, &[ra, value]);
    let tag = build.const_tag(Tag::Boolean);
    build.inst(IrCmd::StoreTag, &[ra, tag]);

    if insn.c() != 0 {
        let target = build.block_at_inst(pc + 1 + insn.c());
        build.inst(IrCmd::Jump, &[target]);
    }
}

pub fn translate_inst_load_n(build: &mut IrBuilder<'_>, insn: Insn) {
    let ra = IrOp::vm_reg(insn.a());
    let value = build.const_double(insn.d() as f64);
    build.inst(IrCmd::StoreDouble, &[ra, value]);
    let tag = build.const_tag(Tag::Number);
    build.inst(IrCmd::StoreTag, &[ra, tag]);
}

pub fn translate_inst_load_k(build: &mut IrBuilder<'_>, insn: Insn) {
    let load = build.inst(IrCmd::LoadTvalue, &[IrOp::vm_const(insn.d() as u32)]);
    build.inst(IrCmd::StoreTvalue, &[IrOp::vm_reg(insn.a()), load]);
}

pub fn translate_inst_load_kx(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let aux = build.aux(pc);
    let load = build.inst(IrCmd::LoadTvalue, &[IrOp::vm_const(aux)]);
    build.inst(IrCmd::StoreTvalue, &[IrOp::vm_reg(insn.a()), load]);
}

pub fn translate_inst_move(build: &mut IrBuilder<'_>, insn: Insn) {
    let load = build.inst(IrCmd::LoadTvalue, &[IrOp::vm_reg(insn.b())]);
    build.inst(IrCmd::StoreTvalue, &[IrOp::vm_reg(insn.a()), load]);
}

pub fn translate_inst_jump(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let target = build.block_at_inst(jump_target(insn, pc));
    build.inst(IrCmd::Jump, &[target]);
}

pub fn translate_inst_jump_back(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    // back-edges poll for cooperative cancellation
    let origin = build.const_uint(pc as u32);
    build.inst(IrCmd::Interrupt, &[origin]);
    let target = build.block_at_inst(jump_target(insn, pc));
    build.inst(IrCmd::Jump, &[target]);
}

pub fn translate_inst_jump_x(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let origin = build.const_uint(pc as u32);
    build.inst(IrCmd::Interrupt, &[origin]);
    let target = build.block_at_inst((pc as i64 + 1 + insn.e() as i64) as usize);
    build.inst(IrCmd::Jump, &[target]);
}

pub fn translate_inst_jump_if(build: &mut IrBuilder<'_>, insn: Insn, pc: usize, not: bool) {
    let ra = IrOp::vm_reg(insn.a());
    let target = build.block_at_inst(jump_target(insn, pc));
    let next = build.block_at_inst(pc + 1);

    if not {
        build.inst(IrCmd::JumpIfFalsy, &[ra, target, next]);
    } else {
        build.inst(IrCmd::JumpIfTruthy, &[ra, target, next]);
    }

    // Fallthrough in the original bytecode is implicit, so the next
    // internal block begins here
    if build.is_internal_block(next) {
        build.begin_block(next);
    }
}

pub fn translate_inst_jump_if_eq(build: &mut IrBuilder<'_>, insn: Insn, pc: usize, not: bool) {
    let ra = IrOp::vm_reg(insn.a());
    let rb = IrOp::vm_reg(build.aux(pc) as usize);

    let target = build.block_at_inst(jump_target(insn, pc));
    let next = build.block_at_inst(pc + 2);
    let number_check = build.block(IrBlockKind::Internal);
    let fallback = build.block(IrBlockKind::Fallback);

    let ta = build.inst(IrCmd::LoadTag, &[ra]);
    let tb = build.inst(IrCmd::LoadTag, &[rb]);
    build.inst(
        IrCmd::JumpEqTag,
        &[ta, tb, number_check, if not { target } else { next }],
    );

    build.begin_block(number_check);

    // fast-path: number
    let tag = build.const_tag(Tag::Number);
    build.inst(IrCmd::CheckTag, &[ta, tag, fallback]);

    let va = build.inst(IrCmd::LoadDouble, &[ra]);
    let vb = build.inst(IrCmd::LoadDouble, &[rb]);

    build.inst(
        IrCmd::JumpCmpNum,
        &[
            va,
            vb,
            IrOp::cond(IrCondition::NotEqual),
            if not { target } else { next },
            if not { next } else { target },
        ],
    );

    let mut scope = FallbackStreamScope::new(build, fallback, next);

    let saved = scope.const_uint(pc as u32 + 1);
    scope.inst(IrCmd::SetSavedpc, &[saved]);
    scope.inst(
        IrCmd::JumpCmpAny,
        &[
            ra,
            rb,
            IrOp::cond(if not {
                IrCondition::NotEqual
            } else {
                IrCondition::Equal
            }),
            target,
            next,
        ],
    );
}

pub fn translate_inst_jump_if_cond(
    build: &mut IrBuilder<'_>,
    insn: Insn,
    pc: usize,
    cond: IrCondition,
) {
    let ra = IrOp::vm_reg(insn.a());
    let rb = IrOp::vm_reg(build.aux(pc) as usize);

    let target = build.block_at_inst(jump_target(insn, pc));
    let next = build.block_at_inst(pc + 2);
    let fallback = build.block(IrBlockKind::Fallback);

    // fast-path: number
    let number = build.const_tag(Tag::Number);
    let ta = build.inst(IrCmd::LoadTag, &[ra]);
    build.inst(IrCmd::CheckTag, &[ta, number, fallback]);

    let tb = build.inst(IrCmd::LoadTag, &[rb]);
    build.inst(IrCmd::CheckTag, &[tb, number, fallback]);

    let va = build.inst(IrCmd::LoadDouble, &[ra]);
    let vb = build.inst(IrCmd::LoadDouble, &[rb]);

    build.inst(IrCmd::JumpCmpNum, &[va, vb, IrOp::cond(cond), target, next]);

    let mut scope = FallbackStreamScope::new(build, fallback, next);

    let saved = scope.const_uint(pc as u32 + 1);
    scope.inst(IrCmd::SetSavedpc, &[saved]);
    scope.inst(IrCmd::JumpCmpAny, &[ra, rb, IrOp::cond(cond), target, next]);
}

pub fn translate_inst_jump_x_eq_nil(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let not = build.aux(pc) & 0x8000_0000 != 0;

    let target = build.block_at_inst(jump_target(insn, pc));
    let next = build.block_at_inst(pc + 2);

    let ta = build.inst(IrCmd::LoadTag, &[ra]);
    let nil = build.const_tag(Tag::Nil);
    build.inst(
        IrCmd::JumpEqTag,
        &[ta, nil, if not { next } else { target }, if not { target } else { next }],
    );

    if build.is_internal_block(next) {
        build.begin_block(next);
    }
}

pub fn translate_inst_jump_x_eq_b(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let aux = build.aux(pc);
    let not = aux & 0x8000_0000 != 0;

    let target = build.block_at_inst(jump_target(insn, pc));
    let next = build.block_at_inst(pc + 2);
    let check_value = build.block(IrBlockKind::Internal);

    let ta = build.inst(IrCmd::LoadTag, &[ra]);
    let boolean = build.const_tag(Tag::Boolean);
    build.inst(
        IrCmd::JumpEqTag,
        &[ta, boolean, check_value, if not { target } else { next }],
    );

    build.begin_block(check_value);
    let va = build.inst(IrCmd::LoadInt, &[ra]);
    let expected = build.const_int((aux & 1) as i32);
    build.inst(
        IrCmd::JumpEqInt,
        &[va, expected, if not { next } else { target }, if not { target } else { next }],
    );

    if build.is_internal_block(next) {
        build.begin_block(next);
    }
}

pub fn translate_inst_jump_x_eq_n(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let aux = build.aux(pc);
    let not = aux & 0x8000_0000 != 0;

    let target = build.block_at_inst(jump_target(insn, pc));
    let next = build.block_at_inst(pc + 2);
    let check_value = build.block(IrBlockKind::Internal);

    let ta = build.inst(IrCmd::LoadTag, &[ra]);
    let number = build.const_tag(Tag::Number);
    build.inst(
        IrCmd::JumpEqTag,
        &[ta, number, check_value, if not { target } else { next }],
    );

    build.begin_block(check_value);
    let va = build.inst(IrCmd::LoadDouble, &[ra]);
    let vb = proto_number_constant(build, (aux & 0x00ff_ffff) as usize);
    build.inst(
        IrCmd::JumpCmpNum,
        &[
            va,
            vb,
            IrOp::cond(IrCondition::NotEqual),
            if not { target } else { next },
            if not { next } else { target },
        ],
    );

    if build.is_internal_block(next) {
        build.begin_block(next);
    }
}

pub fn translate_inst_jump_x_eq_s(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let aux = build.aux(pc);
    let not = aux & 0x8000_0000 != 0;

    let target = build.block_at_inst(jump_target(insn, pc));
    let next = build.block_at_inst(pc + 2);
    let check_value = build.block(IrBlockKind::Internal);

    let ta = build.inst(IrCmd::LoadTag, &[ra]);
    let string = build.const_tag(Tag::Str);
    build.inst(
        IrCmd::JumpEqTag,
        &[ta, string, check_value, if not { target } else { next }],
    );

    build.begin_block(check_value);
    let va = build.inst(IrCmd::LoadPointer, &[ra]);
    let vb = build.inst(IrCmd::LoadPointer, &[IrOp::vm_const(aux & 0x00ff_ffff)]);
    build.inst(
        IrCmd::JumpEqPointer,
        &[va, vb, if not { next } else { target }, if not { target } else { next }],
    );

    if build.is_internal_block(next) {
        build.begin_block(next);
    }
}

fn arith_cmd(op: ArithOp) -> IrCmd {
    match op {
        ArithOp::Add => IrCmd::AddNum,
        ArithOp::Sub => IrCmd::SubNum,
        ArithOp::Mul => IrCmd::MulNum,
        ArithOp::Div => IrCmd::DivNum,
        ArithOp::Mod => IrCmd::ModNum,
        ArithOp::Pow => IrCmd::PowNum,
        ArithOp::Unm => IrCmd::UnmNum,
    }
}

fn arith_index(op: ArithOp) -> i32 {
    // metamethod index the DO_ARITH helper dispatches on
    op as i32
}

/// A proto number constant as an immediate double operand.
fn proto_number_constant(build: &mut IrBuilder<'_>, index: usize) -> IrOp {
    let value = match &build.proto.constants[index] {
        Value::Number(value) => *value,
        _ => panic!("arithmetic constant is not a number"),
    };
    build.const_double(value)
}

fn translate_inst_binary_numeric(
    build: &mut IrBuilder<'_>,
    ra: usize,
    rb: usize,
    rc: Option<usize>,
    opc: IrOp,
    pc: usize,
    op: ArithOp,
) {
    let fallback = build.block(IrBlockKind::Fallback);

    // fast-path: number
    let number = build.const_tag(Tag::Number);
    let tb = build.inst(IrCmd::LoadTag, &[IrOp::vm_reg(rb)]);
    build.inst(IrCmd::CheckTag, &[tb, number, fallback]);

    if let Some(rc) = rc {
        if rc != rb {
            let tc = build.inst(IrCmd::LoadTag, &[IrOp::vm_reg(rc)]);
            build.inst(IrCmd::CheckTag, &[tc, number, fallback]);
        }
    }

    let vb = build.inst(IrCmd::LoadDouble, &[IrOp::vm_reg(rb)]);
    let vc = match opc.kind {
        crate::ir::IrOpKind::VmConst => proto_number_constant(build, opc.index as usize),
        _ => build.inst(IrCmd::LoadDouble, &[opc]),
    };

    let va = build.inst(arith_cmd(op), &[vb, vc]);
    build.inst(IrCmd::StoreDouble, &[IrOp::vm_reg(ra), va]);

    if ra != rb && rc != Some(ra) {
        let tag = build.const_tag(Tag::Number);
        build.inst(IrCmd::StoreTag, &[IrOp::vm_reg(ra), tag]);
    }

    let next = build.block_at_inst(pc + 1);
    let mut scope = FallbackStreamScope::new(build, fallback, next);

    let saved = scope.const_uint(pc as u32 + 1);
    scope.inst(IrCmd::SetSavedpc, &[saved]);
    let tm = scope.const_int(arith_index(op));
    scope.inst(IrCmd::DoArith, &[IrOp::vm_reg(ra), IrOp::vm_reg(rb), opc, tm]);
    scope.inst(IrCmd::Jump, &[next]);
}

pub fn translate_inst_binary(build: &mut IrBuilder<'_>, insn: Insn, pc: usize, op: ArithOp) {
    translate_inst_binary_numeric(
        build,
        insn.a(),
        insn.b(),
        Some(insn.c()),
        IrOp::vm_reg(insn.c()),
        pc,
        op,
    );
}

pub fn translate_inst_binary_k(build: &mut IrBuilder<'_>, insn: Insn, pc: usize, op: ArithOp) {
    translate_inst_binary_numeric(
        build,
        insn.a(),
        insn.b(),
        None,
        IrOp::vm_const(insn.c() as u32),
        pc,
        op,
    );
}

pub fn translate_inst_not(build: &mut IrBuilder<'_>, insn: Insn) {
    let ra = IrOp::vm_reg(insn.a());
    let rb = IrOp::vm_reg(insn.b());

    // booleans and nil are fully represented by tag + int payload
    let tb = build.inst(IrCmd::LoadTag, &[rb]);
    let vb = build.inst(IrCmd::LoadInt, &[rb]);

    let va = build.inst(IrCmd::NotAny, &[tb, vb]);

    build.inst(IrCmd::StoreInt, &[ra, va]);
    let tag = build.const_tag(Tag::Boolean);
    build.inst(IrCmd::StoreTag, &[ra, tag]);
}

pub fn translate_inst_minus(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = insn.a();
    let rb = insn.b();

    let fallback = build.block(IrBlockKind::Fallback);

    let number = build.const_tag(Tag::Number);
    let tb = build.inst(IrCmd::LoadTag, &[IrOp::vm_reg(rb)]);
    build.inst(IrCmd::CheckTag, &[tb, number, fallback]);

    // fast-path: number
    let vb = build.inst(IrCmd::LoadDouble, &[IrOp::vm_reg(rb)]);
    let va = build.inst(IrCmd::UnmNum, &[vb]);

    build.inst(IrCmd::StoreDouble, &[IrOp::vm_reg(ra), va]);

    if ra != rb {
        let tag = build.const_tag(Tag::Number);
        build.inst(IrCmd::StoreTag, &[IrOp::vm_reg(ra), tag]);
    }

    let next = build.block_at_inst(pc + 1);
    let mut scope = FallbackStreamScope::new(build, fallback, next);

    let saved = scope.const_uint(pc as u32 + 1);
    scope.inst(IrCmd::SetSavedpc, &[saved]);
    let tm = scope.const_int(arith_index(ArithOp::Unm));
    scope.inst(
        IrCmd::DoArith,
        &[IrOp::vm_reg(ra), IrOp::vm_reg(rb), IrOp::vm_reg(rb), tm],
    );
    scope.inst(IrCmd::Jump, &[next]);
}

pub fn translate_inst_length(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let rb = IrOp::vm_reg(insn.b());

    let fallback = build.block(IrBlockKind::Fallback);

    let table = build.const_tag(Tag::Table);
    let tb = build.inst(IrCmd::LoadTag, &[rb]);
    build.inst(IrCmd::CheckTag, &[tb, table, fallback]);

    // fast-path: table without __len
    let vb = build.inst(IrCmd::LoadPointer, &[rb]);
    build.inst(IrCmd::CheckNoMetatable, &[vb, fallback]);

    let va = build.inst(IrCmd::TableLen, &[vb]);

    build.inst(IrCmd::StoreDouble, &[ra, va]);
    let tag = build.const_tag(Tag::Number);
    build.inst(IrCmd::StoreTag, &[ra, tag]);

    let next = build.block_at_inst(pc + 1);
    let mut scope = FallbackStreamScope::new(build, fallback, next);

    let saved = scope.const_uint(pc as u32 + 1);
    scope.inst(IrCmd::SetSavedpc, &[saved]);
    scope.inst(IrCmd::DoLen, &[ra, rb]);
    scope.inst(IrCmd::Jump, &[next]);
}

pub fn translate_inst_new_table(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let b = insn.b();
    let aux = build.aux(pc);

    let saved = build.const_uint(pc as u32 + 1);
    build.inst(IrCmd::SetSavedpc, &[saved]);

    let array_size = build.const_uint(aux);
    let hash_size = build.const_uint(if b == 0 { 0 } else { 1 << (b - 1) });
    let va = build.inst(IrCmd::NewTable, &[array_size, hash_size]);
    build.inst(IrCmd::StorePointer, &[ra, va]);
    let tag = build.const_tag(Tag::Table);
    build.inst(IrCmd::StoreTag, &[ra, tag]);

    build.inst(IrCmd::CheckGc, &[]);
}

pub fn translate_inst_dup_table(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());

    let saved = build.const_uint(pc as u32 + 1);
    build.inst(IrCmd::SetSavedpc, &[saved]);

    let table = build.inst(IrCmd::LoadPointer, &[IrOp::vm_const(insn.d() as u32)]);
    let va = build.inst(IrCmd::DupTable, &[table]);
    build.inst(IrCmd::StorePointer, &[ra, va]);
    let tag = build.const_tag(Tag::Table);
    build.inst(IrCmd::StoreTag, &[ra, tag]);

    build.inst(IrCmd::CheckGc, &[]);
}

pub fn translate_inst_get_upval(build: &mut IrBuilder<'_>, insn: Insn) {
    build.inst(
        IrCmd::GetUpvalue,
        &[IrOp::vm_reg(insn.a()), IrOp::vm_upvalue(insn.b())],
    );
}

pub fn translate_inst_set_upval(build: &mut IrBuilder<'_>, insn: Insn) {
    build.inst(
        IrCmd::SetUpvalue,
        &[IrOp::vm_upvalue(insn.b()), IrOp::vm_reg(insn.a())],
    );
}

pub fn translate_inst_close_upvals(build: &mut IrBuilder<'_>, insn: Insn) {
    build.inst(IrCmd::CloseUpvals, &[IrOp::vm_reg(insn.a())]);
}

pub fn translate_inst_forn_prep(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = insn.a();

    let op_length = insn.op().map_or(1, Op::length);
    let loop_start = build.block_at_inst(pc + op_length);
    let loop_exit = build.block_at_inst(jump_target(insn, pc));
    let fallback = build.block(IrBlockKind::Fallback);

    let next_step = build.block(IrBlockKind::Internal);
    let direct = build.block(IrBlockKind::Internal);
    let reverse = build.block(IrBlockKind::Internal);

    let number = build.const_tag(Tag::Number);
    let tag_limit = build.inst(IrCmd::LoadTag, &[IrOp::vm_reg(ra)]);
    build.inst(IrCmd::CheckTag, &[tag_limit, number, fallback]);
    let tag_step = build.inst(IrCmd::LoadTag, &[IrOp::vm_reg(ra + 1)]);
    build.inst(IrCmd::CheckTag, &[tag_step, number, fallback]);
    let tag_idx = build.inst(IrCmd::LoadTag, &[IrOp::vm_reg(ra + 2)]);
    build.inst(IrCmd::CheckTag, &[tag_idx, number, fallback]);
    build.inst(IrCmd::Jump, &[next_step]);

    // after the fallback coerces the loop registers, it rejoins here
    build.begin_block(next_step);

    let zero = build.const_double(0.0);
    let limit = build.inst(IrCmd::LoadDouble, &[IrOp::vm_reg(ra)]);
    let step = build.inst(IrCmd::LoadDouble, &[IrOp::vm_reg(ra + 1)]);
    let idx = build.inst(IrCmd::LoadDouble, &[IrOp::vm_reg(ra + 2)]);

    // step <= 0 picks the comparison arm; NaN bounds exit on both arms
    build.inst(
        IrCmd::JumpCmpNum,
        &[step, zero, IrOp::cond(IrCondition::LessEqual), reverse, direct],
    );

    build.begin_block(direct);
    build.inst(
        IrCmd::JumpCmpNum,
        &[idx, limit, IrOp::cond(IrCondition::LessEqual), loop_start, loop_exit],
    );

    build.begin_block(reverse);
    build.inst(
        IrCmd::JumpCmpNum,
        &[limit, idx, IrOp::cond(IrCondition::LessEqual), loop_start, loop_exit],
    );

    // fallback converts the loop registers to numbers or throws
    build.begin_block(fallback);
    let saved = build.const_uint(pc as u32 + 1);
    build.inst(IrCmd::SetSavedpc, &[saved]);
    build.inst(
        IrCmd::PrepareForn,
        &[IrOp::vm_reg(ra), IrOp::vm_reg(ra + 1), IrOp::vm_reg(ra + 2)],
    );
    build.inst(IrCmd::Jump, &[next_step]);

    if build.is_internal_block(loop_start) {
        build.begin_block(loop_start);
    }
}

pub fn translate_inst_forn_loop(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = insn.a();

    let op_length = insn.op().map_or(1, Op::length);
    let loop_repeat = build.block_at_inst(jump_target(insn, pc));
    let loop_exit = build.block_at_inst(pc + op_length);

    let origin = build.const_uint(pc as u32);
    build.inst(IrCmd::Interrupt, &[origin]);

    let zero = build.const_double(0.0);
    let limit = build.inst(IrCmd::LoadDouble, &[IrOp::vm_reg(ra)]);
    let step = build.inst(IrCmd::LoadDouble, &[IrOp::vm_reg(ra + 1)]);

    let idx = build.inst(IrCmd::LoadDouble, &[IrOp::vm_reg(ra + 2)]);
    let idx = build.inst(IrCmd::AddNum, &[idx, step]);
    build.inst(IrCmd::StoreDouble, &[IrOp::vm_reg(ra + 2), idx]);

    let direct = build.block(IrBlockKind::Internal);
    let reverse = build.block(IrBlockKind::Internal);

    build.inst(
        IrCmd::JumpCmpNum,
        &[step, zero, IrOp::cond(IrCondition::LessEqual), reverse, direct],
    );

    build.begin_block(direct);
    build.inst(
        IrCmd::JumpCmpNum,
        &[idx, limit, IrOp::cond(IrCondition::LessEqual), loop_repeat, loop_exit],
    );

    build.begin_block(reverse);
    build.inst(
        IrCmd::JumpCmpNum,
        &[limit, idx, IrOp::cond(IrCondition::LessEqual), loop_repeat, loop_exit],
    );

    if build.is_internal_block(loop_exit) {
        build.begin_block(loop_exit);
    }
}

pub fn translate_inst_forg_prep_next(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = insn.a();

    let target = build.block_at_inst(jump_target(insn, pc));
    let fallback = build.block(IrBlockKind::Fallback);

    // fast-path: pairs/next
    build.inst(IrCmd::CheckSafeEnv, &[fallback]);
    let table = build.const_tag(Tag::Table);
    let tag_b = build.inst(IrCmd::LoadTag, &[IrOp::vm_reg(ra + 1)]);
    build.inst(IrCmd::CheckTag, &[tag_b, table, fallback]);
    let nil = build.const_tag(Tag::Nil);
    let tag_c = build.inst(IrCmd::LoadTag, &[IrOp::vm_reg(ra + 2)]);
    build.inst(IrCmd::CheckTag, &[tag_c, nil, fallback]);

    build.inst(IrCmd::StoreTag, &[IrOp::vm_reg(ra), nil]);

    // the iteration index lives inline in the light-userdata payload
    let zero = build.const_int(0);
    build.inst(IrCmd::StoreInt, &[IrOp::vm_reg(ra + 2), zero]);
    let lightuserdata = build.const_tag(Tag::LightUserdata);
    build.inst(IrCmd::StoreTag, &[IrOp::vm_reg(ra + 2), lightuserdata]);

    build.inst(IrCmd::Jump, &[target]);

    // FallbackStreamScope is not used because this instruction does not
    // fall through to the next one
    build.begin_block(fallback);
    let origin = build.const_uint(pc as u32);
    build.inst(IrCmd::FallbackForgprepXnext, &[origin, target]);
}

pub fn translate_inst_forg_prep_inext(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = insn.a();

    let target = build.block_at_inst(jump_target(insn, pc));
    let fallback = build.block(IrBlockKind::Fallback);
    let finish = build.block(IrBlockKind::Internal);

    // fast-path: ipairs/inext
    build.inst(IrCmd::CheckSafeEnv, &[fallback]);
    let table = build.const_tag(Tag::Table);
    let tag_b = build.inst(IrCmd::LoadTag, &[IrOp::vm_reg(ra + 1)]);
    build.inst(IrCmd::CheckTag, &[tag_b, table, fallback]);
    let number = build.const_tag(Tag::Number);
    let tag_c = build.inst(IrCmd::LoadTag, &[IrOp::vm_reg(ra + 2)]);
    build.inst(IrCmd::CheckTag, &[tag_c, number, fallback]);

    let num_c = build.inst(IrCmd::LoadDouble, &[IrOp::vm_reg(ra + 2)]);
    let zero_num = build.const_double(0.0);
    build.inst(
        IrCmd::JumpCmpNum,
        &[num_c, zero_num, IrOp::cond(IrCondition::NotEqual), fallback, finish],
    );

    build.begin_block(finish);

    let nil = build.const_tag(Tag::Nil);
    build.inst(IrCmd::StoreTag, &[IrOp::vm_reg(ra), nil]);

    // the iteration index lives inline in the light-userdata payload
    let zero = build.const_int(0);
    build.inst(IrCmd::StoreInt, &[IrOp::vm_reg(ra + 2), zero]);
    let lightuserdata = build.const_tag(Tag::LightUserdata);
    build.inst(IrCmd::StoreTag, &[IrOp::vm_reg(ra + 2), lightuserdata]);

    build.inst(IrCmd::Jump, &[target]);

    // FallbackStreamScope is not used because this instruction does not
    // fall through to the next one
    build.begin_block(fallback);
    let origin = build.const_uint(pc as u32);
    build.inst(IrCmd::FallbackForgprepXnext, &[origin, target]);
}

pub fn translate_inst_forg_loop(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let aux = build.aux(pc);

    let op_length = insn.op().map_or(2, Op::length);
    let loop_repeat = build.block_at_inst(jump_target(insn, pc));
    let loop_exit = build.block_at_inst(pc + op_length);

    // only the ipairs specialization gets an inline fast path
    if (aux as i32) >= 0 {
        let origin = build.const_uint(pc as u32);
        build.inst(IrCmd::FallbackForgloop, &[origin, loop_repeat, loop_exit]);

        if build.is_internal_block(loop_exit) {
            build.begin_block(loop_exit);
        }
        return;
    }

    let ra = insn.a();
    let fallback = build.block(IrBlockKind::Fallback);
    let has_elem = build.block(IrBlockKind::Internal);

    let origin = build.const_uint(pc as u32);
    build.inst(IrCmd::Interrupt, &[origin]);

    // fast-path: builtin array iteration
    let nil = build.const_tag(Tag::Nil);
    let tag_a = build.inst(IrCmd::LoadTag, &[IrOp::vm_reg(ra)]);
    build.inst(IrCmd::CheckTag, &[tag_a, nil, fallback]);

    let table = build.inst(IrCmd::LoadPointer, &[IrOp::vm_reg(ra + 1)]);
    let index = build.inst(IrCmd::LoadInt, &[IrOp::vm_reg(ra + 2)]);

    let elem_ptr = build.inst(IrCmd::GetArrAddr, &[table, index]);

    // terminate if the array part has ended
    build.inst(IrCmd::CheckArraySize, &[table, index, loop_exit]);

    // terminate if the element is nil
    let elem_tag = build.inst(IrCmd::LoadTag, &[elem_ptr]);
    build.inst(IrCmd::JumpEqTag, &[elem_tag, nil, loop_exit, has_elem]);
    build.begin_block(has_elem);

    let one = build.const_int(1);
    let next_index = build.inst(IrCmd::AddInt, &[index, one]);

    // only the low dword of the userdata payload is updated; the upper
    // bits start and remain zero
    build.inst(IrCmd::StoreInt, &[IrOp::vm_reg(ra + 2), next_index]);

    let next_num = build.inst(IrCmd::IntToNum, &[next_index]);
    build.inst(IrCmd::StoreDouble, &[IrOp::vm_reg(ra + 3), next_num]);
    let number = build.const_tag(Tag::Number);
    build.inst(IrCmd::StoreTag, &[IrOp::vm_reg(ra + 3), number]);

    let elem = build.inst(IrCmd::LoadTvalue, &[elem_ptr]);
    build.inst(IrCmd::StoreTvalue, &[IrOp::vm_reg(ra + 4), elem]);

    build.inst(IrCmd::Jump, &[loop_repeat]);

    build.begin_block(fallback);
    let origin = build.const_uint(pc as u32);
    build.inst(IrCmd::FallbackForgloop, &[origin, loop_repeat, loop_exit]);

    if build.is_internal_block(loop_exit) {
        build.begin_block(loop_exit);
    }
}

pub fn translate_inst_get_table_n(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let rb = IrOp::vm_reg(insn.b());
    let c = insn.c();

    let fallback = build.block(IrBlockKind::Fallback);

    let table = build.const_tag(Tag::Table);
    let tb = build.inst(IrCmd::LoadTag, &[rb]);
    build.inst(IrCmd::CheckTag, &[tb, table, fallback]);

    let vb = build.inst(IrCmd::LoadPointer, &[rb]);

    let index = build.const_uint(c as u32);
    build.inst(IrCmd::CheckArraySize, &[vb, index, fallback]);
    build.inst(IrCmd::CheckNoMetatable, &[vb, fallback]);

    let arr_el = build.inst(IrCmd::GetArrAddr, &[vb, index]);

    let elem = build.inst(IrCmd::LoadTvalue, &[arr_el]);
    build.inst(IrCmd::StoreTvalue, &[ra, elem]);

    let next = build.block_at_inst(pc + 1);
    let mut scope = FallbackStreamScope::new(build, fallback, next);

    let saved = scope.const_uint(pc as u32 + 1);
    scope.inst(IrCmd::SetSavedpc, &[saved]);
    let key = scope.const_uint(c as u32 + 1);
    scope.inst(IrCmd::GetTable, &[ra, rb, key]);
    scope.inst(IrCmd::Jump, &[next]);
}

pub fn translate_inst_set_table_n(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let rb = IrOp::vm_reg(insn.b());
    let c = insn.c();

    let fallback = build.block(IrBlockKind::Fallback);

    let table = build.const_tag(Tag::Table);
    let tb = build.inst(IrCmd::LoadTag, &[rb]);
    build.inst(IrCmd::CheckTag, &[tb, table, fallback]);

    let vb = build.inst(IrCmd::LoadPointer, &[rb]);

    let index = build.const_uint(c as u32);
    build.inst(IrCmd::CheckArraySize, &[vb, index, fallback]);
    build.inst(IrCmd::CheckNoMetatable, &[vb, fallback]);
    build.inst(IrCmd::CheckReadonly, &[vb, fallback]);

    let arr_el = build.inst(IrCmd::GetArrAddr, &[vb, index]);

    let tva = build.inst(IrCmd::LoadTvalue, &[ra]);
    build.inst(IrCmd::StoreTvalue, &[arr_el, tva]);

    // generational write barrier
    build.inst(IrCmd::BarrierTableForward, &[vb, ra]);

    let next = build.block_at_inst(pc + 1);
    let mut scope = FallbackStreamScope::new(build, fallback, next);

    let saved = scope.const_uint(pc as u32 + 1);
    scope.inst(IrCmd::SetSavedpc, &[saved]);
    let key = scope.const_uint(c as u32 + 1);
    scope.inst(IrCmd::SetTable, &[ra, rb, key]);
    scope.inst(IrCmd::Jump, &[next]);
}

pub fn translate_inst_get_table(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let rb = IrOp::vm_reg(insn.b());
    let rc = IrOp::vm_reg(insn.c());

    let fallback = build.block(IrBlockKind::Fallback);

    let table = build.const_tag(Tag::Table);
    let tb = build.inst(IrCmd::LoadTag, &[rb]);
    build.inst(IrCmd::CheckTag, &[tb, table, fallback]);
    let number = build.const_tag(Tag::Number);
    let tc = build.inst(IrCmd::LoadTag, &[rc]);
    build.inst(IrCmd::CheckTag, &[tc, number, fallback]);

    // fast-path: table with a number index
    let vb = build.inst(IrCmd::LoadPointer, &[rb]);
    let vc = build.inst(IrCmd::LoadDouble, &[rc]);

    let index = build.inst(IrCmd::NumToIndex, &[vc, fallback]);

    let one = build.const_int(1);
    let index = build.inst(IrCmd::SubInt, &[index, one]);

    build.inst(IrCmd::CheckArraySize, &[vb, index, fallback]);
    build.inst(IrCmd::CheckNoMetatable, &[vb, fallback]);

    let arr_el = build.inst(IrCmd::GetArrAddr, &[vb, index]);

    let elem = build.inst(IrCmd::LoadTvalue, &[arr_el]);
    build.inst(IrCmd::StoreTvalue, &[ra, elem]);

    let next = build.block_at_inst(pc + 1);
    let mut scope = FallbackStreamScope::new(build, fallback, next);

    let saved = scope.const_uint(pc as u32 + 1);
    scope.inst(IrCmd::SetSavedpc, &[saved]);
    scope.inst(IrCmd::GetTable, &[ra, rb, rc]);
    scope.inst(IrCmd::Jump, &[next]);
}

pub fn translate_inst_set_table(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let rb = IrOp::vm_reg(insn.b());
    let rc = IrOp::vm_reg(insn.c());

    let fallback = build.block(IrBlockKind::Fallback);

    let table = build.const_tag(Tag::Table);
    let tb = build.inst(IrCmd::LoadTag, &[rb]);
    build.inst(IrCmd::CheckTag, &[tb, table, fallback]);
    let number = build.const_tag(Tag::Number);
    let tc = build.inst(IrCmd::LoadTag, &[rc]);
    build.inst(IrCmd::CheckTag, &[tc, number, fallback]);

    // fast-path: table with a number index
    let vb = build.inst(IrCmd::LoadPointer, &[rb]);
    let vc = build.inst(IrCmd::LoadDouble, &[rc]);

    let index = build.inst(IrCmd::NumToIndex, &[vc, fallback]);

    let one = build.const_int(1);
    let index = build.inst(IrCmd::SubInt, &[index, one]);

    build.inst(IrCmd::CheckArraySize, &[vb, index, fallback]);
    build.inst(IrCmd::CheckNoMetatable, &[vb, fallback]);
    build.inst(IrCmd::CheckReadonly, &[vb, fallback]);

    let arr_el = build.inst(IrCmd::GetArrAddr, &[vb, index]);

    let tva = build.inst(IrCmd::LoadTvalue, &[ra]);
    build.inst(IrCmd::StoreTvalue, &[arr_el, tva]);

    build.inst(IrCmd::BarrierTableForward, &[vb, ra]);

    let next = build.block_at_inst(pc + 1);
    let mut scope = FallbackStreamScope::new(build, fallback, next);

    let saved = scope.const_uint(pc as u32 + 1);
    scope.inst(IrCmd::SetSavedpc, &[saved]);
    scope.inst(IrCmd::SetTable, &[ra, rb, rc]);
    scope.inst(IrCmd::Jump, &[next]);
}

pub fn translate_inst_get_import(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let k = IrOp::vm_const(insn.d() as u32);
    let aux = build.aux(pc);

    let fast_path = build.block(IrBlockKind::Internal);
    let fallback = build.block(IrBlockKind::Fallback);

    build.inst(IrCmd::CheckSafeEnv, &[fallback]);

    // if the import failed to resolve at load time the constant is nil;
    // the runtime fallback re-resolves so ahead-of-time code keeps
    // working when an import only materializes later
    let nil = build.const_tag(Tag::Nil);
    let tk = build.inst(IrCmd::LoadTag, &[k]);
    build.inst(IrCmd::JumpEqTag, &[tk, nil, fallback, fast_path]);

    build.begin_block(fast_path);

    let tvk = build.inst(IrCmd::LoadTvalue, &[k]);
    build.inst(IrCmd::StoreTvalue, &[ra, tvk]);

    let next = build.block_at_inst(pc + 2);
    let mut scope = FallbackStreamScope::new(build, fallback, next);

    let saved = scope.const_uint(pc as u32 + 1);
    scope.inst(IrCmd::SetSavedpc, &[saved]);
    let id = scope.const_uint(aux);
    scope.inst(IrCmd::GetImport, &[ra, id]);
    scope.inst(IrCmd::Jump, &[next]);
}

pub fn translate_inst_get_table_ks(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let rb = IrOp::vm_reg(insn.b());
    let aux = build.aux(pc);

    let fallback = build.block(IrBlockKind::Fallback);

    let table = build.const_tag(Tag::Table);
    let tb = build.inst(IrCmd::LoadTag, &[rb]);
    build.inst(IrCmd::CheckTag, &[tb, table, fallback]);

    let vb = build.inst(IrCmd::LoadPointer, &[rb]);

    // node slot is cached by bytecode offset
    let offset = build.const_uint(pc as u32);
    let addr_slot = build.inst(IrCmd::GetSlotNodeAddr, &[vb, offset]);

    build.inst(IrCmd::CheckSlotMatch, &[addr_slot, IrOp::vm_const(aux), fallback]);

    let tvn = build.inst(IrCmd::LoadNodeValueTv, &[addr_slot]);
    build.inst(IrCmd::StoreTvalue, &[ra, tvn]);

    let next = build.block_at_inst(pc + 2);
    let mut scope = FallbackStreamScope::new(build, fallback, next);

    let origin = scope.const_uint(pc as u32);
    scope.inst(
        IrCmd::FallbackGetTableKs,
        &[origin, ra, rb, IrOp::vm_const(aux)],
    );
    scope.inst(IrCmd::Jump, &[next]);
}

pub fn translate_inst_set_table_ks(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let rb = IrOp::vm_reg(insn.b());
    let aux = build.aux(pc);

    let fallback = build.block(IrBlockKind::Fallback);

    let table = build.const_tag(Tag::Table);
    let tb = build.inst(IrCmd::LoadTag, &[rb]);
    build.inst(IrCmd::CheckTag, &[tb, table, fallback]);

    let vb = build.inst(IrCmd::LoadPointer, &[rb]);

    let offset = build.const_uint(pc as u32);
    let addr_slot = build.inst(IrCmd::GetSlotNodeAddr, &[vb, offset]);

    build.inst(IrCmd::CheckSlotMatch, &[addr_slot, IrOp::vm_const(aux), fallback]);
    build.inst(IrCmd::CheckReadonly, &[vb, fallback]);

    let tva = build.inst(IrCmd::LoadTvalue, &[ra]);
    build.inst(IrCmd::StoreNodeValueTv, &[addr_slot, tva]);

    build.inst(IrCmd::BarrierTableForward, &[vb, ra]);

    let next = build.block_at_inst(pc + 2);
    let mut scope = FallbackStreamScope::new(build, fallback, next);

    let origin = scope.const_uint(pc as u32);
    scope.inst(
        IrCmd::FallbackSetTableKs,
        &[origin, ra, rb, IrOp::vm_const(aux)],
    );
    scope.inst(IrCmd::Jump, &[next]);
}

pub fn translate_inst_get_global(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let aux = build.aux(pc);

    let fallback = build.block(IrBlockKind::Fallback);

    let env = build.inst(IrCmd::LoadEnv, &[]);
    let offset = build.const_uint(pc as u32);
    let addr_slot = build.inst(IrCmd::GetSlotNodeAddr, &[env, offset]);

    build.inst(IrCmd::CheckSlotMatch, &[addr_slot, IrOp::vm_const(aux), fallback]);

    let tvn = build.inst(IrCmd::LoadNodeValueTv, &[addr_slot]);
    build.inst(IrCmd::StoreTvalue, &[ra, tvn]);

    let next = build.block_at_inst(pc + 2);
    let mut scope = FallbackStreamScope::new(build, fallback, next);

    let origin = scope.const_uint(pc as u32);
    scope.inst(IrCmd::FallbackGetGlobal, &[origin, ra, IrOp::vm_const(aux)]);
    scope.inst(IrCmd::Jump, &[next]);
}

pub fn translate_inst_set_global(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let aux = build.aux(pc);

    let fallback = build.block(IrBlockKind::Fallback);

    let env = build.inst(IrCmd::LoadEnv, &[]);
    let offset = build.const_uint(pc as u32);
    let addr_slot = build.inst(IrCmd::GetSlotNodeAddr, &[env, offset]);

    build.inst(IrCmd::CheckSlotMatch, &[addr_slot, IrOp::vm_const(aux), fallback]);
    build.inst(IrCmd::CheckReadonly, &[env, fallback]);

    let tva = build.inst(IrCmd::LoadTvalue, &[ra]);
    build.inst(IrCmd::StoreNodeValueTv, &[addr_slot, tva]);

    build.inst(IrCmd::BarrierTableForward, &[env, ra]);

    let next = build.block_at_inst(pc + 2);
    let mut scope = FallbackStreamScope::new(build, fallback, next);

    let origin = scope.const_uint(pc as u32);
    scope.inst(IrCmd::FallbackSetGlobal, &[origin, ra, IrOp::vm_const(aux)]);
    scope.inst(IrCmd::Jump, &[next]);
}

pub fn translate_inst_concat(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let ra = IrOp::vm_reg(insn.a());
    let rb = insn.b();
    let rc = insn.c();

    // variadic concat and metamethod dispatch are not worth inlining
    let saved = build.const_uint(pc as u32 + 1);
    build.inst(IrCmd::SetSavedpc, &[saved]);
    let count = build.const_uint((rc - rb + 1) as u32);
    let last = build.const_uint(rc as u32);
    build.inst(IrCmd::Concat, &[count, last]);

    let tvb = build.inst(IrCmd::LoadTvalue, &[IrOp::vm_reg(rb)]);
    build.inst(IrCmd::StoreTvalue, &[ra, tvb]);

    build.inst(IrCmd::CheckGc, &[]);
}

pub fn translate_inst_capture(build: &mut IrBuilder<'_>, insn: Insn) {
    match insn.a() {
        // value capture
        0 => {
            let by_ref = build.const_bool(false);
            build.inst(IrCmd::Capture, &[IrOp::vm_reg(insn.b()), by_ref]);
        }
        // reference capture
        1 => {
            let by_ref = build.const_bool(true);
            build.inst(IrCmd::Capture, &[IrOp::vm_reg(insn.b()), by_ref]);
        }
        // upvalue capture
        2 => {
            let by_ref = build.const_bool(false);
            build.inst(IrCmd::Capture, &[IrOp::vm_upvalue(insn.b()), by_ref]);
        }
        _ => panic!("unknown upvalue capture type"),
    }
}

pub fn translate_inst_call(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let origin = build.const_uint(pc as u32);
    let nargs = build.const_int(insn.b() as i32 - 1);
    let nresults = build.const_int(insn.c() as i32 - 1);
    build.inst(
        IrCmd::FallbackCall,
        &[origin, IrOp::vm_reg(insn.a()), nargs, nresults],
    );
}

pub fn translate_inst_return(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let origin = build.const_uint(pc as u32);
    let count = build.const_int(insn.b() as i32 - 1);
    build.inst(
        IrCmd::FallbackReturn,
        &[origin, IrOp::vm_reg(insn.a()), count],
    );
}

pub fn translate_inst_new_closure(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let origin = build.const_uint(pc as u32);
    let child = build.const_uint(insn.d() as u32);
    build.inst(
        IrCmd::FallbackNewClosure,
        &[origin, IrOp::vm_reg(insn.a()), child],
    );
}

pub fn translate_inst_dup_closure(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let origin = build.const_uint(pc as u32);
    build.inst(
        IrCmd::FallbackDupClosure,
        &[origin, IrOp::vm_reg(insn.a()), IrOp::vm_const(insn.d() as u32)],
    );
}

pub fn translate_inst_set_list(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let origin = build.const_uint(pc as u32);
    let count = build.const_int(insn.c() as i32 - 1);
    let start = build.const_uint(build.aux(pc));
    build.inst(
        IrCmd::FallbackSetList,
        &[
            origin,
            IrOp::vm_reg(insn.a()),
            IrOp::vm_reg(insn.b()),
            count,
            start,
        ],
    );
}

pub fn translate_inst_get_varargs(build: &mut IrBuilder<'_>, insn: Insn, pc: usize) {
    let origin = build.const_uint(pc as u32);
    let count = build.const_int(insn.b() as i32 - 1);
    build.inst(
        IrCmd::FallbackGetVarargs,
        &[origin, IrOp::vm_reg(insn.a()), count],
    );
}
