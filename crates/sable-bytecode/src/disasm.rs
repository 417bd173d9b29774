//! Text disassembly of decoded containers.
//!
//! Output is one block per function: a `name:` banner, a summary line, the
//! instruction listing (`OFFS|MNEMONIC: operand`), and an `.endfunc`
//! trailer. With debug info present, `; file:line` annotations precede the
//! first instruction of each statement. Compare mode drops offsets and
//! renders jump targets as raw relative values, so listings from different
//! layouts can be diffed.

use std::fmt::Write;

use crate::error::{BytecodeError, Result};
use crate::function::FunctionInfo;
use crate::instruction::Instruction;
use crate::reader::{CodeEntry, ScriptFile};

pub struct Disassembler<'a> {
    script: &'a ScriptFile,
    compare_mode: bool,
}

impl<'a> Disassembler<'a> {
    pub fn new(script: &'a ScriptFile) -> Self {
        Self {
            script,
            compare_mode: false,
        }
    }

    /// Compare mode suppresses offsets, debug annotations and resolved jump
    /// targets.
    pub fn compare_mode(mut self, enabled: bool) -> Self {
        self.compare_mode = enabled;
        self
    }

    pub fn disassemble(&self) -> Result<String> {
        let mut out = String::new();
        for func in &self.script.functions {
            let name = self.identifier(func.name_id as usize)?;
            writeln!(out, "{name}:").unwrap();
            writeln!(
                out,
                "- Num Locals: {}, Num Arguments: {}, Returns Value: {}:",
                func.local_count, func.arg_count, func.has_return_value
            )
            .unwrap();
            self.disassemble_function(&mut out, func)?;
            writeln!(out, ".endfunc").unwrap();
            writeln!(out).unwrap();
        }
        Ok(out)
    }

    fn disassemble_function(&self, out: &mut String, func: &FunctionInfo) -> Result<()> {
        for entry in self.script.function_code(func) {
            if !self.compare_mode {
                if let Some(line) = self
                    .script
                    .debug_info
                    .as_ref()
                    .and_then(|info| info.line_for_offset(entry.offset))
                {
                    if let Some(file) = self
                        .script
                        .debug_info
                        .as_ref()
                        .and_then(|info| info.file_names.get(line.file_id as usize))
                    {
                        writeln!(out, "; {file}:{}", line.line).unwrap();
                    }
                }
            }

            if self.compare_mode {
                write!(out, "    {}", entry.instruction.opcode().mnemonic()).unwrap();
            } else {
                write!(
                    out,
                    "    {:04X}|{}",
                    entry.offset,
                    entry.instruction.opcode().mnemonic()
                )
                .unwrap();
            }
            self.render_operand(out, func, entry)?;
            writeln!(out).unwrap();
        }
        Ok(())
    }

    fn render_operand(&self, out: &mut String, func: &FunctionInfo, entry: &CodeEntry) -> Result<()> {
        use Instruction::*;
        match &entry.instruction {
            ConstI(v) => write!(out, ": {v}").unwrap(),
            ConstIW(v) => write!(out, ": {v}").unwrap(),
            PoolInt(i) => write!(out, ": {}", self.int_entry(*i as usize)?).unwrap(),
            PoolIntW(i) => write!(out, ": {}", self.int_entry(*i as usize)?).unwrap(),
            PoolFloat(i) => write!(out, ": {}", self.fixed_entry(*i as usize)?).unwrap(),
            PoolFloatW(i) => write!(out, ": {}", self.fixed_entry(*i as usize)?).unwrap(),
            PoolStr(i) => write!(out, ": \"{}\"", self.string_entry(*i as usize)?).unwrap(),
            PoolStrW(i) => write!(out, ": \"{}\"", self.string_entry(*i as usize)?).unwrap(),
            Ld(slot) | St(slot) => self.render_local(out, func, *slot as u16)?,
            LdArg(i) | StArg(i) => write!(out, ": {i}").unwrap(),
            LdStatic(i) | StStatic(i) => self.render_static(out, *i as u16)?,
            LdStaticW(i) | StStaticW(i) => self.render_static(out, *i)?,
            Jmp(rel) | Jpf(rel) => {
                if self.compare_mode {
                    write!(out, ": {rel}").unwrap();
                } else {
                    let target = entry.offset as i64 + *rel as i64;
                    write!(out, ": {target:04X}").unwrap();
                }
            }
            Plugin(i) => self.render_plugin(out, *i as usize)?,
            PluginW(i) => self.render_plugin(out, *i as usize)?,
            GetOc(i) => self.render_oc(out, *i as usize)?,
            GetOcW(i) => self.render_oc(out, *i as usize)?,
            Getter(i) | Setter(i) | Send(i) => {
                write!(out, ": {}", self.identifier(*i as usize)?).unwrap()
            }
            GetterW(i) | SetterW(i) | SendW(i) => {
                write!(out, ": {}", self.identifier(*i as usize)?).unwrap()
            }
            Switch(table) => {
                let cases: Vec<String> = table
                    .branches
                    .iter()
                    .map(|b| b.case_value.to_string())
                    .collect();
                write!(out, ": {}", cases.join(", ")).unwrap();
            }
            _ => {}
        }
        Ok(())
    }

    fn render_local(&self, out: &mut String, func: &FunctionInfo, slot: u16) -> Result<()> {
        let symbol = self
            .script
            .debug_info
            .as_ref()
            .and_then(|info| info.local_symbol(func.id, slot));
        match symbol {
            Some(sym) => {
                write!(out, ": {}", self.identifier(sym.name_id as usize)?).unwrap()
            }
            None => write!(out, ": (index: {slot})").unwrap(),
        }
        Ok(())
    }

    fn render_static(&self, out: &mut String, slot: u16) -> Result<()> {
        let symbol = self
            .script
            .debug_info
            .as_ref()
            .and_then(|info| info.static_symbol(slot));
        match symbol {
            Some(sym) => {
                write!(out, ": {}", self.identifier(sym.name_id as usize)?).unwrap()
            }
            None => write!(out, ": (index: {slot})").unwrap(),
        }
        Ok(())
    }

    fn render_plugin(&self, out: &mut String, index: usize) -> Result<()> {
        let import = self
            .script
            .plugin_imports
            .get(index)
            .ok_or(BytecodeError::IndexOutOfRange {
                table: "plugin import",
                index,
            })?;
        let plugin = self.identifier(import.plugin_name_id as usize)?;
        let function = self.identifier(import.function_name_id as usize)?;
        write!(out, ": {plugin}::{function}").unwrap();
        Ok(())
    }

    fn render_oc(&self, out: &mut String, index: usize) -> Result<()> {
        let oc = self
            .script
            .oc_imports
            .get(index)
            .ok_or(BytecodeError::IndexOutOfRange {
                table: "OC import",
                index,
            })?;
        write!(out, ": {}", self.identifier(oc.name_id as usize)?).unwrap();
        Ok(())
    }

    fn identifier(&self, index: usize) -> Result<&str> {
        self.script
            .identifiers
            .get(index)
            .map(String::as_str)
            .ok_or(BytecodeError::IndexOutOfRange {
                table: "identifier",
                index,
            })
    }

    fn int_entry(&self, index: usize) -> Result<i32> {
        self.script
            .int_pool
            .get(index)
            .copied()
            .ok_or(BytecodeError::IndexOutOfRange {
                table: "int pool",
                index,
            })
    }

    fn fixed_entry(&self, index: usize) -> Result<f32> {
        self.script
            .fixed_pool
            .get(index)
            .copied()
            .ok_or(BytecodeError::IndexOutOfRange {
                table: "fixed pool",
                index,
            })
    }

    fn string_entry(&self, index: usize) -> Result<&str> {
        self.script
            .string_pool
            .get(index)
            .map(String::as_str)
            .ok_or(BytecodeError::IndexOutOfRange {
                table: "string pool",
                index,
            })
    }
}
