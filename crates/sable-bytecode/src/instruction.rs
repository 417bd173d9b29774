//! SB instruction model.
//!
//! The code stream is a flat sequence of instructions: one opcode byte
//! followed by 0, 1 or 2 operand bytes (`SWITCH` additionally carries its
//! branch table inline). Operands are big-endian, unlike the rest of the
//! container. Each opcode declares an operand width and a stack-depth delta;
//! both are fixed per opcode and exposed through exhaustive matches here.

use serde::{Deserialize, Serialize};

use crate::codec::{Reader, Writer};
use crate::error::{BytecodeError, Result};

/// Opcode byte values.
///
/// Several opcodes are reserved by the VM and never produced by the code
/// generator (`ST_ARG_OMIT`, `LD_PLUGIN`, `LD_FUNC_FAR`, `CALL_FAR`, `BP`,
/// ...); the decoder still understands them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // ==================== Constants ====================
    Nop = 0,
    Const0 = 1,
    Const1 = 2,
    Const2 = 3,
    Const3 = 4,
    Const4 = 5,
    ConstI = 6,
    ConstIW = 7,
    PoolInt = 8,
    PoolIntW = 9,
    PoolFloat = 10,
    PoolFloatW = 11,
    PoolStr = 12,
    PoolStrW = 13,
    // ==================== Locals and arguments ====================
    Ld = 14,
    St = 15,
    LdArg = 16,
    StArg = 17,
    StArgOmit = 18,
    Ld0 = 19,
    Ld1 = 20,
    Ld2 = 21,
    Ld3 = 22,
    St0 = 23,
    St1 = 24,
    St2 = 25,
    St3 = 26,
    LdArg0 = 27,
    LdArg1 = 28,
    LdArg2 = 29,
    LdArg3 = 30,
    StArg0 = 31,
    StArg1 = 32,
    StArg2 = 33,
    StArg3 = 34,
    // ==================== Statics, arrays, globals ====================
    LdStatic = 35,
    LdStaticW = 36,
    StStatic = 37,
    StStaticW = 38,
    LdAr = 39,
    StAr = 40,
    LdNil = 41,
    LdTrue = 42,
    LdFalse = 43,
    LdFunc = 44,
    LdFuncW = 45,
    LdPlugin = 46,
    LdPluginW = 47,
    LdFuncFar = 48,
    LdFuncFarW = 49,
    // ==================== Arithmetic and logic ====================
    Minus = 50,
    Not = 51,
    LNot = 52,
    Add = 53,
    Sub = 54,
    Mul = 55,
    Div = 56,
    Mod = 57,
    Or = 58,
    And = 59,
    RShift = 60,
    LShift = 61,
    Eq = 62,
    Ne = 63,
    Gt = 64,
    Lt = 65,
    Ge = 66,
    Le = 67,
    LOr = 68,
    LAnd = 69,
    // ==================== Control flow and calls ====================
    Jmp = 70,
    Jpf = 71,
    Call = 72,
    CallW = 73,
    CallInd = 74,
    Ret = 75,
    Next = 76,
    Plugin = 77,
    PluginW = 78,
    CallFar = 79,
    CallFarW = 80,
    GetOc = 81,
    GetOcW = 82,
    Getter = 83,
    GetterW = 84,
    Setter = 85,
    SetterW = 86,
    Send = 87,
    SendW = 88,
    TypeOf = 89,
    SizeOf = 90,
    Switch = 91,
    Inc = 92,
    Dec = 93,
    Exit = 94,
    Bp = 95,
}

impl Opcode {
    pub const COUNT: usize = 96;

    /// Dense byte-to-opcode table; index equals discriminant.
    const TABLE: [Opcode; Opcode::COUNT] = {
        use Opcode::*;
        [
            Nop, Const0, Const1, Const2, Const3, Const4, ConstI, ConstIW, PoolInt, PoolIntW,
            PoolFloat, PoolFloatW, PoolStr, PoolStrW, Ld, St, LdArg, StArg, StArgOmit, Ld0, Ld1,
            Ld2, Ld3, St0, St1, St2, St3, LdArg0, LdArg1, LdArg2, LdArg3, StArg0, StArg1, StArg2,
            StArg3, LdStatic, LdStaticW, StStatic, StStaticW, LdAr, StAr, LdNil, LdTrue, LdFalse,
            LdFunc, LdFuncW, LdPlugin, LdPluginW, LdFuncFar, LdFuncFarW, Minus, Not, LNot, Add,
            Sub, Mul, Div, Mod, Or, And, RShift, LShift, Eq, Ne, Gt, Lt, Ge, Le, LOr, LAnd, Jmp,
            Jpf, Call, CallW, CallInd, Ret, Next, Plugin, PluginW, CallFar, CallFarW, GetOc,
            GetOcW, Getter, GetterW, Setter, SetterW, Send, SendW, TypeOf, SizeOf, Switch, Inc,
            Dec, Exit, Bp,
        ]
    };

    /// Fixed operand width in bytes.
    ///
    /// `Switch` reports the width of its count byte only; the branch table
    /// that follows is sized by that count (see
    /// [`Instruction::operand_size`]).
    pub const fn operand_width(self) -> usize {
        use Opcode::*;
        match self {
            Nop | Const0 | Const1 | Const2 | Const3 | Const4 => 0,
            ConstI => 1,
            ConstIW => 2,
            PoolInt | PoolFloat | PoolStr => 1,
            PoolIntW | PoolFloatW | PoolStrW => 2,
            Ld | St | LdArg | StArg | StArgOmit => 1,
            Ld0 | Ld1 | Ld2 | Ld3 | St0 | St1 | St2 | St3 => 0,
            LdArg0 | LdArg1 | LdArg2 | LdArg3 => 0,
            StArg0 | StArg1 | StArg2 | StArg3 => 0,
            LdStatic | StStatic => 1,
            LdStaticW | StStaticW => 2,
            LdAr | StAr | LdNil | LdTrue | LdFalse => 0,
            LdFunc | LdPlugin | LdFuncFar => 1,
            LdFuncW | LdPluginW | LdFuncFarW => 2,
            Minus | Not | LNot => 0,
            Add | Sub | Mul | Div | Mod | Or | And | RShift | LShift => 0,
            Eq | Ne | Gt | Lt | Ge | Le | LOr | LAnd => 0,
            Jmp | Jpf => 2,
            Call | Plugin | CallFar | GetOc | Getter | Setter | Send => 1,
            CallW | PluginW | CallFarW | GetOcW | GetterW | SetterW | SendW => 2,
            CallInd | Ret | Next | TypeOf | SizeOf => 0,
            Switch => 1,
            Inc | Dec | Exit | Bp => 0,
        }
    }

    /// Net effect on the VM value stack.
    pub const fn stack_delta(self) -> i8 {
        use Opcode::*;
        match self {
            Const0 | Const1 | Const2 | Const3 | Const4 | ConstI | ConstIW => 1,
            PoolInt | PoolIntW | PoolFloat | PoolFloatW | PoolStr | PoolStrW => 1,
            Ld | LdArg | Ld0 | Ld1 | Ld2 | Ld3 => 1,
            LdArg0 | LdArg1 | LdArg2 | LdArg3 => 1,
            LdStatic | LdStaticW | LdNil | LdTrue | LdFalse => 1,
            LdFunc | LdFuncW | LdPlugin | LdPluginW | LdFuncFar | LdFuncFarW => 1,
            St | StArg | StArgOmit | St0 | St1 | St2 | St3 => -1,
            StArg0 | StArg1 | StArg2 | StArg3 => -1,
            StStatic | StStaticW => -1,
            LdAr => -1,
            StAr => -3,
            Not | LNot => -1,
            Add | Sub | Mul | Div | Mod | Or | And | RShift | LShift => -1,
            Eq | Ne | Gt | Lt | Ge | Le | LOr | LAnd => -1,
            Jpf => -1,
            Setter | SetterW => -1,
            Nop | Minus | Jmp | Call | CallW | CallInd | Ret | Next => 0,
            Plugin | PluginW | CallFar | CallFarW => 0,
            GetOc | GetOcW | Getter | GetterW | Send | SendW => 0,
            TypeOf | SizeOf | Switch | Inc | Dec | Exit | Bp => 0,
        }
    }

    /// Upper-case mnemonic used in disassembly listings.
    pub const fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "NOP",
            Const0 => "CONST_0",
            Const1 => "CONST_1",
            Const2 => "CONST_2",
            Const3 => "CONST_3",
            Const4 => "CONST_4",
            ConstI => "CONST_I",
            ConstIW => "CONST_I_W",
            PoolInt => "POOL_INT",
            PoolIntW => "POOL_INT_W",
            PoolFloat => "POOL_FLOAT",
            PoolFloatW => "POOL_FLOAT_W",
            PoolStr => "POOL_STR",
            PoolStrW => "POOL_STR_W",
            Ld => "LD",
            St => "ST",
            LdArg => "LD_ARG",
            StArg => "ST_ARG",
            StArgOmit => "ST_ARG_OMIT",
            Ld0 => "LD_0",
            Ld1 => "LD_1",
            Ld2 => "LD_2",
            Ld3 => "LD_3",
            St0 => "ST_0",
            St1 => "ST_1",
            St2 => "ST_2",
            St3 => "ST_3",
            LdArg0 => "LD_ARG_0",
            LdArg1 => "LD_ARG_1",
            LdArg2 => "LD_ARG_2",
            LdArg3 => "LD_ARG_3",
            StArg0 => "ST_ARG_0",
            StArg1 => "ST_ARG_1",
            StArg2 => "ST_ARG_2",
            StArg3 => "ST_ARG_3",
            LdStatic => "LD_STATIC",
            LdStaticW => "LD_STATIC_W",
            StStatic => "ST_STATIC",
            StStaticW => "ST_STATIC_W",
            LdAr => "LD_AR",
            StAr => "ST_AR",
            LdNil => "LD_NIL",
            LdTrue => "LD_TRUE",
            LdFalse => "LD_FALSE",
            LdFunc => "LD_FUNC",
            LdFuncW => "LD_FUNC_W",
            LdPlugin => "LD_PLUGIN",
            LdPluginW => "LD_PLUGIN_W",
            LdFuncFar => "LD_FUNC_FAR",
            LdFuncFarW => "LD_FUNC_FAR_W",
            Minus => "MINUS",
            Not => "NOT",
            LNot => "L_NOT",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Or => "OR",
            And => "AND",
            RShift => "R_SHIFT",
            LShift => "L_SHIFT",
            Eq => "EQ",
            Ne => "NE",
            Gt => "GT",
            Lt => "LT",
            Ge => "GE",
            Le => "LE",
            LOr => "L_OR",
            LAnd => "L_AND",
            Jmp => "JMP",
            Jpf => "JPF",
            Call => "CALL",
            CallW => "CALL_W",
            CallInd => "CALL_IND",
            Ret => "RET",
            Next => "NEXT",
            Plugin => "PLUGIN",
            PluginW => "PLUGIN_W",
            CallFar => "CALL_FAR",
            CallFarW => "CALL_FAR_W",
            GetOc => "GET_OC",
            GetOcW => "GET_OC_W",
            Getter => "GETTER",
            GetterW => "GETTER_W",
            Setter => "SETTER",
            SetterW => "SETTER_W",
            Send => "SEND",
            SendW => "SEND_W",
            TypeOf => "TYPEOF",
            SizeOf => "SIZEOF",
            Switch => "SWITCH",
            Inc => "INC",
            Dec => "DEC",
            Exit => "EXIT",
            Bp => "BP",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = BytecodeError;

    fn try_from(value: u8) -> Result<Self> {
        Self::TABLE
            .get(value as usize)
            .copied()
            .ok_or(BytecodeError::InvalidOpcode(value))
    }
}

/// One `SWITCH` branch: case value and jump offset relative to the `SWITCH`
/// instruction's own position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchBranch {
    pub case_value: i32,
    pub offset: i32,
}

/// The `SWITCH` trailing payload. Branches are sorted ascending by case
/// value so the VM can binary-search them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SwitchTable {
    /// Offset of the default target, relative to the `SWITCH` instruction.
    pub default_offset: i32,
    pub branches: Vec<SwitchBranch>,
}

/// A decoded instruction with its operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    Nop,
    Const0,
    Const1,
    Const2,
    Const3,
    Const4,
    /// Immediate integer, also used for call argument counts (bit 0x100 of
    /// the count marks a kept return value, which forces the wide form).
    ConstI(u8),
    ConstIW(u16),
    PoolInt(u8),
    PoolIntW(u16),
    PoolFloat(u8),
    PoolFloatW(u16),
    PoolStr(u8),
    PoolStrW(u16),
    Ld(u8),
    St(u8),
    LdArg(u8),
    StArg(u8),
    StArgOmit(u8),
    Ld0,
    Ld1,
    Ld2,
    Ld3,
    St0,
    St1,
    St2,
    St3,
    LdArg0,
    LdArg1,
    LdArg2,
    LdArg3,
    StArg0,
    StArg1,
    StArg2,
    StArg3,
    LdStatic(u8),
    LdStaticW(u16),
    StStatic(u8),
    StStaticW(u16),
    LdAr,
    StAr,
    LdNil,
    LdTrue,
    LdFalse,
    LdFunc(u8),
    LdFuncW(u16),
    LdPlugin(u8),
    LdPluginW(u16),
    LdFuncFar(u8),
    LdFuncFarW(u16),
    Minus,
    Not,
    LNot,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Or,
    And,
    RShift,
    LShift,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    LOr,
    LAnd,
    /// Unconditional jump, offset relative to this instruction.
    Jmp(i16),
    /// Jump when the popped value is false, offset relative to this
    /// instruction.
    Jpf(i16),
    Call(u8),
    CallW(u16),
    CallInd,
    Ret,
    Next,
    Plugin(u8),
    PluginW(u16),
    CallFar(u8),
    CallFarW(u16),
    GetOc(u8),
    GetOcW(u16),
    Getter(u8),
    GetterW(u16),
    Setter(u8),
    SetterW(u16),
    Send(u8),
    SendW(u16),
    TypeOf,
    SizeOf,
    Switch(SwitchTable),
    Inc,
    Dec,
    Exit,
    Bp,
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        use Instruction::*;
        match self {
            Nop => Opcode::Nop,
            Const0 => Opcode::Const0,
            Const1 => Opcode::Const1,
            Const2 => Opcode::Const2,
            Const3 => Opcode::Const3,
            Const4 => Opcode::Const4,
            ConstI(_) => Opcode::ConstI,
            ConstIW(_) => Opcode::ConstIW,
            PoolInt(_) => Opcode::PoolInt,
            PoolIntW(_) => Opcode::PoolIntW,
            PoolFloat(_) => Opcode::PoolFloat,
            PoolFloatW(_) => Opcode::PoolFloatW,
            PoolStr(_) => Opcode::PoolStr,
            PoolStrW(_) => Opcode::PoolStrW,
            Ld(_) => Opcode::Ld,
            St(_) => Opcode::St,
            LdArg(_) => Opcode::LdArg,
            StArg(_) => Opcode::StArg,
            StArgOmit(_) => Opcode::StArgOmit,
            Ld0 => Opcode::Ld0,
            Ld1 => Opcode::Ld1,
            Ld2 => Opcode::Ld2,
            Ld3 => Opcode::Ld3,
            St0 => Opcode::St0,
            St1 => Opcode::St1,
            St2 => Opcode::St2,
            St3 => Opcode::St3,
            LdArg0 => Opcode::LdArg0,
            LdArg1 => Opcode::LdArg1,
            LdArg2 => Opcode::LdArg2,
            LdArg3 => Opcode::LdArg3,
            StArg0 => Opcode::StArg0,
            StArg1 => Opcode::StArg1,
            StArg2 => Opcode::StArg2,
            StArg3 => Opcode::StArg3,
            LdStatic(_) => Opcode::LdStatic,
            LdStaticW(_) => Opcode::LdStaticW,
            StStatic(_) => Opcode::StStatic,
            StStaticW(_) => Opcode::StStaticW,
            LdAr => Opcode::LdAr,
            StAr => Opcode::StAr,
            LdNil => Opcode::LdNil,
            LdTrue => Opcode::LdTrue,
            LdFalse => Opcode::LdFalse,
            LdFunc(_) => Opcode::LdFunc,
            LdFuncW(_) => Opcode::LdFuncW,
            LdPlugin(_) => Opcode::LdPlugin,
            LdPluginW(_) => Opcode::LdPluginW,
            LdFuncFar(_) => Opcode::LdFuncFar,
            LdFuncFarW(_) => Opcode::LdFuncFarW,
            Minus => Opcode::Minus,
            Not => Opcode::Not,
            LNot => Opcode::LNot,
            Add => Opcode::Add,
            Sub => Opcode::Sub,
            Mul => Opcode::Mul,
            Div => Opcode::Div,
            Mod => Opcode::Mod,
            Or => Opcode::Or,
            And => Opcode::And,
            RShift => Opcode::RShift,
            LShift => Opcode::LShift,
            Eq => Opcode::Eq,
            Ne => Opcode::Ne,
            Gt => Opcode::Gt,
            Lt => Opcode::Lt,
            Ge => Opcode::Ge,
            Le => Opcode::Le,
            LOr => Opcode::LOr,
            LAnd => Opcode::LAnd,
            Jmp(_) => Opcode::Jmp,
            Jpf(_) => Opcode::Jpf,
            Call(_) => Opcode::Call,
            CallW(_) => Opcode::CallW,
            CallInd => Opcode::CallInd,
            Ret => Opcode::Ret,
            Next => Opcode::Next,
            Plugin(_) => Opcode::Plugin,
            PluginW(_) => Opcode::PluginW,
            CallFar(_) => Opcode::CallFar,
            CallFarW(_) => Opcode::CallFarW,
            GetOc(_) => Opcode::GetOc,
            GetOcW(_) => Opcode::GetOcW,
            Getter(_) => Opcode::Getter,
            GetterW(_) => Opcode::GetterW,
            Setter(_) => Opcode::Setter,
            SetterW(_) => Opcode::SetterW,
            Send(_) => Opcode::Send,
            SendW(_) => Opcode::SendW,
            TypeOf => Opcode::TypeOf,
            SizeOf => Opcode::SizeOf,
            Switch(_) => Opcode::Switch,
            Inc => Opcode::Inc,
            Dec => Opcode::Dec,
            Exit => Opcode::Exit,
            Bp => Opcode::Bp,
        }
    }

    /// Operand byte count, branch table included for `Switch`.
    pub fn operand_size(&self) -> usize {
        match self {
            Instruction::Switch(table) => 1 + 4 + table.branches.len() * 8,
            other => other.opcode().operand_width(),
        }
    }

    /// Total encoded byte count including the opcode byte.
    pub fn encoded_size(&self) -> usize {
        1 + self.operand_size()
    }

    pub fn stack_delta(&self) -> i8 {
        self.opcode().stack_delta()
    }

    /// Appends the big-endian encoding to `w`.
    pub fn encode(&self, w: &mut Writer) {
        use Instruction::*;
        w.write_u8(self.opcode() as u8);
        match self {
            ConstI(v) | PoolInt(v) | PoolFloat(v) | PoolStr(v) | Ld(v) | St(v) | LdArg(v)
            | StArg(v) | StArgOmit(v) | LdStatic(v) | StStatic(v) | LdFunc(v) | LdPlugin(v)
            | LdFuncFar(v) | Call(v) | Plugin(v) | CallFar(v) | GetOc(v) | Getter(v)
            | Setter(v) | Send(v) => w.write_u8(*v),
            ConstIW(v) | PoolIntW(v) | PoolFloatW(v) | PoolStrW(v) | LdStaticW(v)
            | StStaticW(v) | LdFuncW(v) | LdPluginW(v) | LdFuncFarW(v) | CallW(v)
            | PluginW(v) | CallFarW(v) | GetOcW(v) | GetterW(v) | SetterW(v) | SendW(v) => {
                w.write_u16_be(*v)
            }
            Jmp(ofs) | Jpf(ofs) => w.write_i16_be(*ofs),
            Switch(table) => {
                w.write_u8(table.branches.len() as u8);
                w.write_i32_be(table.default_offset);
                for branch in &table.branches {
                    w.write_i32_be(branch.case_value);
                    w.write_i32_be(branch.offset);
                }
            }
            _ => {}
        }
    }

    /// Decodes one instruction at the reader's current position.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        use Instruction::*;
        let opcode = Opcode::try_from(r.read_u8()?)?;
        let inst = match opcode {
            Opcode::Nop => Nop,
            Opcode::Const0 => Const0,
            Opcode::Const1 => Const1,
            Opcode::Const2 => Const2,
            Opcode::Const3 => Const3,
            Opcode::Const4 => Const4,
            Opcode::ConstI => ConstI(r.read_u8()?),
            Opcode::ConstIW => ConstIW(r.read_u16_be()?),
            Opcode::PoolInt => PoolInt(r.read_u8()?),
            Opcode::PoolIntW => PoolIntW(r.read_u16_be()?),
            Opcode::PoolFloat => PoolFloat(r.read_u8()?),
            Opcode::PoolFloatW => PoolFloatW(r.read_u16_be()?),
            Opcode::PoolStr => PoolStr(r.read_u8()?),
            Opcode::PoolStrW => PoolStrW(r.read_u16_be()?),
            Opcode::Ld => Ld(r.read_u8()?),
            Opcode::St => St(r.read_u8()?),
            Opcode::LdArg => LdArg(r.read_u8()?),
            Opcode::StArg => StArg(r.read_u8()?),
            Opcode::StArgOmit => StArgOmit(r.read_u8()?),
            Opcode::Ld0 => Ld0,
            Opcode::Ld1 => Ld1,
            Opcode::Ld2 => Ld2,
            Opcode::Ld3 => Ld3,
            Opcode::St0 => St0,
            Opcode::St1 => St1,
            Opcode::St2 => St2,
            Opcode::St3 => St3,
            Opcode::LdArg0 => LdArg0,
            Opcode::LdArg1 => LdArg1,
            Opcode::LdArg2 => LdArg2,
            Opcode::LdArg3 => LdArg3,
            Opcode::StArg0 => StArg0,
            Opcode::StArg1 => StArg1,
            Opcode::StArg2 => StArg2,
            Opcode::StArg3 => StArg3,
            Opcode::LdStatic => LdStatic(r.read_u8()?),
            Opcode::LdStaticW => LdStaticW(r.read_u16_be()?),
            Opcode::StStatic => StStatic(r.read_u8()?),
            Opcode::StStaticW => StStaticW(r.read_u16_be()?),
            Opcode::LdAr => LdAr,
            Opcode::StAr => StAr,
            Opcode::LdNil => LdNil,
            Opcode::LdTrue => LdTrue,
            Opcode::LdFalse => LdFalse,
            Opcode::LdFunc => LdFunc(r.read_u8()?),
            Opcode::LdFuncW => LdFuncW(r.read_u16_be()?),
            Opcode::LdPlugin => LdPlugin(r.read_u8()?),
            Opcode::LdPluginW => LdPluginW(r.read_u16_be()?),
            Opcode::LdFuncFar => LdFuncFar(r.read_u8()?),
            Opcode::LdFuncFarW => LdFuncFarW(r.read_u16_be()?),
            Opcode::Minus => Minus,
            Opcode::Not => Not,
            Opcode::LNot => LNot,
            Opcode::Add => Add,
            Opcode::Sub => Sub,
            Opcode::Mul => Mul,
            Opcode::Div => Div,
            Opcode::Mod => Mod,
            Opcode::Or => Or,
            Opcode::And => And,
            Opcode::RShift => RShift,
            Opcode::LShift => LShift,
            Opcode::Eq => Eq,
            Opcode::Ne => Ne,
            Opcode::Gt => Gt,
            Opcode::Lt => Lt,
            Opcode::Ge => Ge,
            Opcode::Le => Le,
            Opcode::LOr => LOr,
            Opcode::LAnd => LAnd,
            Opcode::Jmp => Jmp(r.read_i16_be()?),
            Opcode::Jpf => Jpf(r.read_i16_be()?),
            Opcode::Call => Call(r.read_u8()?),
            Opcode::CallW => CallW(r.read_u16_be()?),
            Opcode::CallInd => CallInd,
            Opcode::Ret => Ret,
            Opcode::Next => Next,
            Opcode::Plugin => Plugin(r.read_u8()?),
            Opcode::PluginW => PluginW(r.read_u16_be()?),
            Opcode::CallFar => CallFar(r.read_u8()?),
            Opcode::CallFarW => CallFarW(r.read_u16_be()?),
            Opcode::GetOc => GetOc(r.read_u8()?),
            Opcode::GetOcW => GetOcW(r.read_u16_be()?),
            Opcode::Getter => Getter(r.read_u8()?),
            Opcode::GetterW => GetterW(r.read_u16_be()?),
            Opcode::Setter => Setter(r.read_u8()?),
            Opcode::SetterW => SetterW(r.read_u16_be()?),
            Opcode::Send => Send(r.read_u8()?),
            Opcode::SendW => SendW(r.read_u16_be()?),
            Opcode::TypeOf => TypeOf,
            Opcode::SizeOf => SizeOf,
            Opcode::Switch => {
                let count = r.read_u8()? as usize;
                let default_offset = r.read_i32_be()?;
                let mut branches = Vec::with_capacity(count);
                for _ in 0..count {
                    let case_value = r.read_i32_be()?;
                    let offset = r.read_i32_be()?;
                    branches.push(SwitchBranch { case_value, offset });
                }
                Switch(SwitchTable {
                    default_offset,
                    branches,
                })
            }
            Opcode::Inc => Inc,
            Opcode::Dec => Dec,
            Opcode::Exit => Exit,
            Opcode::Bp => Bp,
        };
        Ok(inst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_try_from_roundtrip() {
        for byte in 0u8..=95 {
            let op = Opcode::try_from(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
        assert!(Opcode::try_from(96).is_err());
        assert!(Opcode::try_from(0xFF).is_err());
    }

    #[test]
    fn test_operand_widths() {
        assert_eq!(Opcode::Const0.operand_width(), 0);
        assert_eq!(Opcode::ConstI.operand_width(), 1);
        assert_eq!(Opcode::ConstIW.operand_width(), 2);
        assert_eq!(Opcode::Jmp.operand_width(), 2);
        assert_eq!(Opcode::Call.operand_width(), 1);
        assert_eq!(Opcode::Exit.operand_width(), 0);
    }

    #[test]
    fn test_stack_deltas() {
        assert_eq!(Opcode::Const1.stack_delta(), 1);
        assert_eq!(Opcode::Add.stack_delta(), -1);
        assert_eq!(Opcode::StAr.stack_delta(), -3);
        assert_eq!(Opcode::LdAr.stack_delta(), -1);
        assert_eq!(Opcode::Jpf.stack_delta(), -1);
        assert_eq!(Opcode::Jmp.stack_delta(), 0);
        assert_eq!(Opcode::Setter.stack_delta(), -1);
        assert_eq!(Opcode::Send.stack_delta(), 0);
    }

    #[test]
    fn test_jump_encoding_is_big_endian() {
        let mut w = Writer::new();
        Instruction::Jmp(-2).encode(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes, vec![70, 0xFF, 0xFE]);
        let mut r = Reader::new(&bytes);
        assert_eq!(Instruction::decode(&mut r).unwrap(), Instruction::Jmp(-2));
    }

    #[test]
    fn test_switch_payload_roundtrip() {
        let table = SwitchTable {
            default_offset: 40,
            branches: vec![
                SwitchBranch { case_value: 1, offset: 9 },
                SwitchBranch { case_value: 3, offset: 17 },
                SwitchBranch { case_value: 5, offset: 25 },
            ],
        };
        let inst = Instruction::Switch(table);
        assert_eq!(inst.operand_size(), 1 + 4 + 3 * 8);
        assert_eq!(inst.encoded_size(), 30);

        let mut w = Writer::new();
        inst.encode(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 30);
        assert_eq!(bytes[1], 3);

        let mut r = Reader::new(&bytes);
        assert_eq!(Instruction::decode(&mut r).unwrap(), inst);
    }

    #[test]
    fn test_wide_pool_reference_roundtrip() {
        let mut w = Writer::new();
        Instruction::PoolIntW(0x1234).encode(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes, vec![9, 0x12, 0x34]);
    }
}
