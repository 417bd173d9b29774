//! Compiled script state and the SB container serializer.
//!
//! The container is little-endian with a big-endian code stream. A 0x40-byte
//! header holds the magic, version, flags and fourteen absolute section
//! offsets; each section starts with a small header (relative data offset,
//! entry count, and for some tables an entry width) and is 4-byte aligned.
//! Section offsets are backpatched once each section has been laid out.

use serde::{Deserialize, Serialize};

use crate::codec::Writer;
use crate::debug::DebugInfo;
use crate::error::{BytecodeError, Result};
use crate::function::{FunctionInfo, ObjectConstructor, PluginImport, SystemAttribute};
use crate::instruction::Instruction;
use crate::pool::{FixedPool, Pool};
use crate::variable::{LocalFrame, Variable};

/// Container magic: `SB` plus two spaces.
pub const SB_MAGIC: [u8; 4] = *b"SB  ";
/// Only container version ever produced.
pub const SB_VERSION: u8 = 2;
/// Flags byte written by the compiler.
pub const SB_FLAGS: u8 = 4;
/// Flag bit marking scrambled string tables.
pub const SB_FLAG_SCRAMBLED: u8 = 0x02;
/// Fixed header size; sections start here.
pub const SB_HEADER_SIZE: usize = 0x40;

// Header slots for the fourteen section offsets.
pub(crate) const OFS_CODE: usize = 0x08;
pub(crate) const OFS_IDENTIFIERS: usize = 0x0C;
pub(crate) const OFS_INT_POOL: usize = 0x10;
pub(crate) const OFS_FIXED_POOL: usize = 0x14;
pub(crate) const OFS_STRINGS: usize = 0x18;
pub(crate) const OFS_FUNCTIONS: usize = 0x1C;
pub(crate) const OFS_PLUGIN_IMPORTS: usize = 0x20;
pub(crate) const OFS_OC_IMPORTS: usize = 0x24;
pub(crate) const OFS_FUNC_IMPORTS: usize = 0x28;
pub(crate) const OFS_STATICS: usize = 0x2C;
pub(crate) const OFS_LOCAL_POOL: usize = 0x30;
pub(crate) const OFS_SYSTEM_ATTRS: usize = 0x34;
pub(crate) const OFS_ATTRIBUTES: usize = 0x38;
pub(crate) const OFS_DEBUG_SYMS: usize = 0x3C;

/// Everything the code generator produced, ready for container layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompiledScript {
    /// Function table id of the synthetic entry point.
    pub entry_point: u32,
    pub code: Vec<Instruction>,
    pub identifier_pool: Pool<String>,
    pub int_pool: Pool<i32>,
    pub fixed_pool: FixedPool,
    pub string_pool: Pool<String>,
    /// Ordered by function id.
    pub functions: Vec<FunctionInfo>,
    pub plugin_imports: Vec<PluginImport>,
    pub oc_imports: Vec<ObjectConstructor>,
    pub statics: Vec<Variable>,
    pub local_pool: Vec<LocalFrame>,
    pub system_attributes: Vec<SystemAttribute>,
    pub debug_info: Option<DebugInfo>,
}

impl CompiledScript {
    /// Serializes the container.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;

        let mut w = Writer::new();
        w.write_bytes(&SB_MAGIC);
        w.write_u8(SB_VERSION);
        w.write_u8(0);
        w.write_u8(SB_FLAGS);
        w.write_u8(0);
        for _ in 0..14 {
            w.write_u32_le(0);
        }
        debug_assert_eq!(w.position(), SB_HEADER_SIZE);

        self.write_code(&mut w);
        write_string_table(&mut w, OFS_IDENTIFIERS, self.identifier_pool.as_slice());
        self.write_int_pool(&mut w);
        self.write_fixed_pool(&mut w);
        write_string_table(&mut w, OFS_STRINGS, self.string_pool.as_slice());
        self.write_functions(&mut w);
        self.write_plugin_imports(&mut w);
        self.write_oc_imports(&mut w);
        self.write_func_imports(&mut w);
        self.write_statics(&mut w);
        self.write_local_pool(&mut w);
        self.write_system_attributes(&mut w);
        self.write_debug_info(&mut w);

        Ok(w.into_bytes())
    }

    pub fn write_to<W: std::io::Write>(&self, mut out: W) -> Result<()> {
        let bytes = self.to_bytes()?;
        out.write_all(&bytes)?;
        Ok(())
    }

    /// Checks that every pool or table index referenced by an emitted
    /// instruction exists, before layout bakes them into operands.
    pub fn validate(&self) -> Result<()> {
        use Instruction::*;

        let check = |table: &'static str, index: usize, len: usize| -> Result<()> {
            if index < len {
                Ok(())
            } else {
                Err(BytecodeError::IndexOutOfRange { table, index })
            }
        };

        for inst in &self.code {
            match inst {
                PoolInt(i) => check("int pool", *i as usize, self.int_pool.len())?,
                PoolIntW(i) => check("int pool", *i as usize, self.int_pool.len())?,
                PoolFloat(i) => check("fixed pool", *i as usize, self.fixed_pool.len())?,
                PoolFloatW(i) => check("fixed pool", *i as usize, self.fixed_pool.len())?,
                PoolStr(i) => check("string pool", *i as usize, self.string_pool.len())?,
                PoolStrW(i) => check("string pool", *i as usize, self.string_pool.len())?,
                LdStatic(i) | StStatic(i) => check("static", *i as usize, self.statics.len())?,
                LdStaticW(i) | StStaticW(i) => {
                    check("static", *i as usize, self.statics.len())?
                }
                LdFunc(i) | Call(i) => check("function", *i as usize, self.functions.len())?,
                LdFuncW(i) | CallW(i) => {
                    check("function", *i as usize, self.functions.len())?
                }
                Plugin(i) => check("plugin import", *i as usize, self.plugin_imports.len())?,
                PluginW(i) => check("plugin import", *i as usize, self.plugin_imports.len())?,
                GetOc(i) => check("OC import", *i as usize, self.oc_imports.len())?,
                GetOcW(i) => check("OC import", *i as usize, self.oc_imports.len())?,
                Getter(i) | Setter(i) | Send(i) => {
                    check("identifier", *i as usize, self.identifier_pool.len())?
                }
                GetterW(i) | SetterW(i) | SendW(i) => {
                    check("identifier", *i as usize, self.identifier_pool.len())?
                }
                _ => {}
            }
        }

        for func in &self.functions {
            check(
                "identifier",
                func.name_id as usize,
                self.identifier_pool.len(),
            )?;
            if let Some(idx) = func.local_pool_index {
                check("local pool", idx as usize, self.local_pool.len())?;
            }
        }
        for import in &self.plugin_imports {
            check(
                "identifier",
                import.plugin_name_id as usize,
                self.identifier_pool.len(),
            )?;
            check(
                "identifier",
                import.function_name_id as usize,
                self.identifier_pool.len(),
            )?;
        }
        for oc in &self.oc_imports {
            check("identifier", oc.name_id as usize, self.identifier_pool.len())?;
        }
        Ok(())
    }

    /// Total byte length of the encoded code stream.
    pub fn code_size(&self) -> usize {
        self.code.iter().map(Instruction::encoded_size).sum()
    }

    fn write_code(&self, w: &mut Writer) {
        let section = w.position();
        w.write_u32_le(0x0C);
        w.write_u32_le(self.entry_point);
        w.write_u32_le(0); // size, patched below

        let code_start = w.position();
        for inst in &self.code {
            inst.encode(w);
        }
        let size = w.position() - code_start;
        w.patch_u32_le(section + 0x08, size as u32);
        w.patch_u32_le(OFS_CODE, section as u32);
        w.align(4);
    }

    fn write_int_pool(&self, w: &mut Writer) {
        let section = w.position();
        w.write_u32_le(0x08);
        w.write_u32_le(self.int_pool.len() as u32);
        for &value in self.int_pool.iter() {
            w.write_i32_le(value);
        }
        w.patch_u32_le(OFS_INT_POOL, section as u32);
        w.align(4);
    }

    fn write_fixed_pool(&self, w: &mut Writer) {
        let section = w.position();
        w.write_u32_le(0x08);
        w.write_u32_le(self.fixed_pool.len() as u32);
        for &value in self.fixed_pool.iter() {
            w.write_f32_le(value);
        }
        w.patch_u32_le(OFS_FIXED_POOL, section as u32);
        w.align(4);
    }

    fn write_functions(&self, w: &mut Writer) {
        let section = w.position();
        w.write_u32_le(0x0C);
        w.write_u32_le(self.functions.len() as u32);
        w.write_u32_le(FunctionInfo::WIRE_SIZE as u32);
        for func in &self.functions {
            func.write(w);
        }
        w.patch_u32_le(OFS_FUNCTIONS, section as u32);
        w.align(4);
    }

    fn write_plugin_imports(&self, w: &mut Writer) {
        let section = w.position();
        w.write_u32_le(0x0C);
        w.write_u32_le(self.plugin_imports.len() as u32);
        w.write_u32_le(PluginImport::WIRE_SIZE as u32);
        for import in &self.plugin_imports {
            w.write_u16_le(import.plugin_name_id);
            w.write_u16_le(import.function_name_id);
        }
        w.patch_u32_le(OFS_PLUGIN_IMPORTS, section as u32);
        w.align(4);
    }

    fn write_oc_imports(&self, w: &mut Writer) {
        let section = w.position();
        w.write_u32_le(0x0C);
        w.write_u32_le(self.oc_imports.len() as u32);
        w.write_u32_le(2);
        for oc in &self.oc_imports {
            w.write_u16_le(oc.name_id);
        }
        w.patch_u32_le(OFS_OC_IMPORTS, section as u32);
        w.align(4);
    }

    // Reserved by the format; always written empty.
    fn write_func_imports(&self, w: &mut Writer) {
        let section = w.position();
        w.write_u32_le(0x0C);
        w.write_u32_le(0);
        w.write_u32_le(4);
        w.patch_u32_le(OFS_FUNC_IMPORTS, section as u32);
        w.align(4);
    }

    fn write_statics(&self, w: &mut Writer) {
        let section = w.position();
        w.write_u32_le(0x08);
        w.write_u32_le(self.statics.len() as u32);
        for var in &self.statics {
            var.write(w);
        }
        w.patch_u32_le(OFS_STATICS, section as u32);
        w.align(4);
    }

    fn write_local_pool(&self, w: &mut Writer) {
        let section = w.position();
        w.write_u32_le(0x0C);
        w.write_u32_le(self.local_pool.len() as u32);
        w.write_u32_le(2);

        let table_start = w.position();
        for _ in &self.local_pool {
            w.write_u16_le(0);
        }
        w.align(4);

        for (i, frame) in self.local_pool.iter().enumerate() {
            let rel = (w.position() - table_start) as u16;
            w.patch_u16_le(table_start + i * 2, rel);
            w.write_u32_le(0x08);
            w.write_u32_le(frame.len() as u32);
            for var in frame.slots() {
                var.write(w);
            }
        }
        w.patch_u32_le(OFS_LOCAL_POOL, section as u32);
        w.align(4);
    }

    fn write_system_attributes(&self, w: &mut Writer) {
        let section = w.position();
        w.write_u32_le(0x0C);
        w.write_u32_le(self.system_attributes.len() as u32);
        w.write_u32_le(2);
        for attr in &self.system_attributes {
            w.write_i16_le(attr.name_id);
        }
        w.patch_u32_le(OFS_SYSTEM_ATTRS, section as u32);
        w.align(4);
    }

    fn write_debug_info(&self, w: &mut Writer) {
        let Some(info) = &self.debug_info else {
            return;
        };
        let section = w.position();
        info.write(w);
        w.patch_u32_le(OFS_DEBUG_SYMS, section as u32);
        w.align(4);
    }
}

/// Writes a string-like table (identifiers, strings).
///
/// Layout: `{rel_ofs u32, count u32, width u32}` then the offset table, then
/// the concatenated zero-terminated strings. Each stored offset is
/// `table_size + string_offset`, relative to the offset table's start. The
/// entry width is 16-bit unless any stored offset would overflow it; the
/// decision scans the offsets from the last entry backward, and the whole
/// table is redone as 32-bit when it trips.
fn write_string_table(w: &mut Writer, header_slot: usize, entries: &[String]) {
    let section = w.position();
    w.write_u32_le(0x0C);
    w.write_u32_le(entries.len() as u32);
    w.write_u32_le(0); // width, patched below

    let mut string_offsets = Vec::with_capacity(entries.len());
    let mut blob_len = 0usize;
    for entry in entries {
        string_offsets.push(blob_len);
        blob_len += entry.len() + 1;
    }

    // Width selection scans from the last entry backward; offsets grow
    // monotonically, so the scan settles on its first probe either way.
    let mut table_size = entries.len() * 2;
    let mut as_ints = false;
    if let Some(&last) = string_offsets.last() {
        if table_size + last > u16::MAX as usize {
            as_ints = true;
            table_size = entries.len() * 4;
        }
    }

    for &str_offset in &string_offsets {
        if as_ints {
            w.write_u32_le((table_size + str_offset) as u32);
        } else {
            w.write_u16_le((table_size + str_offset) as u16);
        }
    }
    for entry in entries {
        w.write_cstr(entry);
    }

    w.patch_u32_le(section + 0x08, if as_ints { 4 } else { 2 });
    w.patch_u32_le(header_slot, section as u32);
    w.align(4);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::{VarType, VarValue};

    #[test]
    fn test_header_layout() {
        let script = CompiledScript::default();
        let bytes = script.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"SB  ");
        assert_eq!(bytes[4], SB_VERSION);
        assert_eq!(bytes[6], SB_FLAGS);

        // Code is the first section, directly after the header.
        let code_ofs = u32::from_le_bytes(bytes[OFS_CODE..OFS_CODE + 4].try_into().unwrap());
        assert_eq!(code_ofs, SB_HEADER_SIZE as u32);
        // Reserved attribute slot stays zero; no debug block was attached.
        let attr_ofs =
            u32::from_le_bytes(bytes[OFS_ATTRIBUTES..OFS_ATTRIBUTES + 4].try_into().unwrap());
        assert_eq!(attr_ofs, 0);
        let debug_ofs =
            u32::from_le_bytes(bytes[OFS_DEBUG_SYMS..OFS_DEBUG_SYMS + 4].try_into().unwrap());
        assert_eq!(debug_ofs, 0);
    }

    #[test]
    fn test_code_stream_is_big_endian() {
        let mut script = CompiledScript::default();
        script.code = vec![Instruction::Jmp(0x0102), Instruction::Exit];
        let bytes = script.to_bytes().unwrap();
        let code = &bytes[SB_HEADER_SIZE..];
        // 12-byte section header, then opcode 70 with BE offset.
        assert_eq!(u32::from_le_bytes(code[8..12].try_into().unwrap()), 4);
        assert_eq!(&code[12..16], &[70, 0x01, 0x02, 94]);
    }

    #[test]
    fn test_string_table_width_switches_to_ints() {
        let mut w = Writer::new();
        let big = "x".repeat(70_000);
        let entries = vec![big, "y".to_owned()];
        write_string_table(&mut w, OFS_STRINGS, &entries);
        let bytes = w.into_bytes();
        let width = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        assert_eq!(width, 4);
        // First stored offset = table size (two u32 entries).
        let first = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        assert_eq!(first, 8);
    }

    #[test]
    fn test_string_table_keeps_shorts_when_small() {
        let mut w = Writer::new();
        let entries = vec!["_main_".to_owned(), "x".to_owned()];
        write_string_table(&mut w, OFS_IDENTIFIERS, &entries);
        let bytes = w.into_bytes();
        let width = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        assert_eq!(width, 2);
        let first = u16::from_le_bytes(bytes[12..14].try_into().unwrap());
        assert_eq!(first, 4);
        let second = u16::from_le_bytes(bytes[14..16].try_into().unwrap());
        assert_eq!(second, 4 + 7);
    }

    #[test]
    fn test_validate_rejects_dangling_reference() {
        let mut script = CompiledScript::default();
        script.code = vec![Instruction::PoolInt(0)];
        let err = script.to_bytes().unwrap_err();
        assert!(matches!(
            err,
            BytecodeError::IndexOutOfRange {
                table: "int pool",
                index: 0
            }
        ));
    }

    #[test]
    fn test_static_section_records() {
        let mut script = CompiledScript::default();
        script.statics = vec![Variable::new(0, VarType::Int, VarValue::Int(42))];
        let bytes = script.to_bytes().unwrap();
        let statics_ofs =
            u32::from_le_bytes(bytes[OFS_STATICS..OFS_STATICS + 4].try_into().unwrap()) as usize;
        let rel =
            u32::from_le_bytes(bytes[statics_ofs..statics_ofs + 4].try_into().unwrap()) as usize;
        assert_eq!(rel, 8);
        let count =
            u32::from_le_bytes(bytes[statics_ofs + 4..statics_ofs + 8].try_into().unwrap());
        assert_eq!(count, 1);
        let value_pos = statics_ofs + rel + 4;
        let value =
            i32::from_le_bytes(bytes[value_pos..value_pos + 4].try_into().unwrap());
        assert_eq!(value, 42);
    }
}
