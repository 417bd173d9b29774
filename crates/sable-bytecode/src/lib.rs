//! SB container bytecode format.
//!
//! This crate owns the binary side of the Sable toolchain: the instruction
//! model for the stack VM's 96 opcodes, the de-duplicated literal pools, the
//! function/variable/import entities, the SB container serializer and
//! deserializer, the optional debug-symbol block, and a text disassembler.
//!
//! The container is little-endian with a big-endian code stream; see
//! [`script`] for the section layout and [`instruction`] for the opcode
//! table.

#![deny(unsafe_code)]

pub mod codec;
pub mod debug;
pub mod disasm;
pub mod error;
pub mod function;
pub mod instruction;
pub mod pool;
pub mod reader;
pub mod script;
pub mod variable;

pub use debug::{DebugInfo, DebugSymbol, LineEntry};
pub use disasm::Disassembler;
pub use error::{BytecodeError, Result};
pub use function::{FunctionInfo, ObjectConstructor, PluginImport, SystemAttribute};
pub use instruction::{Instruction, Opcode, SwitchBranch, SwitchTable};
pub use pool::{FixedPool, Pool};
pub use reader::{CodeEntry, SbHeader, ScriptFile};
pub use script::{CompiledScript, SB_HEADER_SIZE, SB_MAGIC, SB_VERSION};
pub use variable::{LocalFrame, VarType, VarValue, Variable};
