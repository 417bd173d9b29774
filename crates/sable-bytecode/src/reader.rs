//! SB container deserializer.

use serde::{Deserialize, Serialize};

use crate::codec::Reader;
use crate::debug::DebugInfo;
use crate::error::{BytecodeError, Result};
use crate::function::{FunctionInfo, ObjectConstructor, PluginImport, SystemAttribute};
use crate::instruction::Instruction;
use crate::script::{
    OFS_ATTRIBUTES, OFS_CODE, OFS_DEBUG_SYMS, OFS_FIXED_POOL, OFS_FUNCTIONS, OFS_FUNC_IMPORTS,
    OFS_IDENTIFIERS, OFS_INT_POOL, OFS_LOCAL_POOL, OFS_OC_IMPORTS, OFS_PLUGIN_IMPORTS,
    OFS_STATICS, OFS_STRINGS, OFS_SYSTEM_ATTRS, SB_FLAG_SCRAMBLED, SB_HEADER_SIZE, SB_MAGIC,
    SB_VERSION,
};
use crate::variable::Variable;

/// Decoded fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SbHeader {
    pub version: u8,
    pub flags: u8,
    pub code_ofs: u32,
    pub identifiers_ofs: u32,
    pub int_pool_ofs: u32,
    pub fixed_pool_ofs: u32,
    pub strings_ofs: u32,
    pub functions_ofs: u32,
    pub plugin_imports_ofs: u32,
    pub oc_imports_ofs: u32,
    pub func_imports_ofs: u32,
    pub statics_ofs: u32,
    pub local_pool_ofs: u32,
    pub system_attrs_ofs: u32,
    pub attributes_ofs: u32,
    pub debug_syms_ofs: u32,
}

impl SbHeader {
    pub fn read(data: &[u8]) -> Result<Self> {
        if data.len() < SB_HEADER_SIZE {
            return Err(BytecodeError::UnexpectedEnd(data.len()));
        }
        if data[0..4] != SB_MAGIC {
            return Err(BytecodeError::InvalidMagic);
        }
        let version = data[4];
        if version != SB_VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }
        let flags = data[6];
        if flags & SB_FLAG_SCRAMBLED != 0 {
            return Err(BytecodeError::ScrambledContainer);
        }

        let mut r = Reader::new(data);
        let read_ofs = |r: &mut Reader<'_>, slot: usize| -> Result<u32> {
            r.seek(slot);
            r.read_u32_le()
        };
        Ok(Self {
            version,
            flags,
            code_ofs: read_ofs(&mut r, OFS_CODE)?,
            identifiers_ofs: read_ofs(&mut r, OFS_IDENTIFIERS)?,
            int_pool_ofs: read_ofs(&mut r, OFS_INT_POOL)?,
            fixed_pool_ofs: read_ofs(&mut r, OFS_FIXED_POOL)?,
            strings_ofs: read_ofs(&mut r, OFS_STRINGS)?,
            functions_ofs: read_ofs(&mut r, OFS_FUNCTIONS)?,
            plugin_imports_ofs: read_ofs(&mut r, OFS_PLUGIN_IMPORTS)?,
            oc_imports_ofs: read_ofs(&mut r, OFS_OC_IMPORTS)?,
            func_imports_ofs: read_ofs(&mut r, OFS_FUNC_IMPORTS)?,
            statics_ofs: read_ofs(&mut r, OFS_STATICS)?,
            local_pool_ofs: read_ofs(&mut r, OFS_LOCAL_POOL)?,
            system_attrs_ofs: read_ofs(&mut r, OFS_SYSTEM_ATTRS)?,
            attributes_ofs: read_ofs(&mut r, OFS_ATTRIBUTES)?,
            debug_syms_ofs: read_ofs(&mut r, OFS_DEBUG_SYMS)?,
        })
    }
}

/// One decoded instruction with its byte offset within the code section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEntry {
    pub offset: u32,
    pub instruction: Instruction,
}

/// A fully decoded SB container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptFile {
    pub header: SbHeader,
    pub entry_point: u32,
    pub code: Vec<CodeEntry>,
    pub identifiers: Vec<String>,
    pub int_pool: Vec<i32>,
    pub fixed_pool: Vec<f32>,
    pub string_pool: Vec<String>,
    pub functions: Vec<FunctionInfo>,
    pub plugin_imports: Vec<PluginImport>,
    pub oc_imports: Vec<ObjectConstructor>,
    pub statics: Vec<Variable>,
    pub local_frames: Vec<Vec<Variable>>,
    pub system_attributes: Vec<SystemAttribute>,
    pub debug_info: Option<DebugInfo>,
}

impl ScriptFile {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = SbHeader::read(data)?;
        let mut r = Reader::new(data);

        let (entry_point, code) = read_code(&mut r, header.code_ofs as usize)?;
        let identifiers = read_string_table(&mut r, header.identifiers_ofs as usize, "identifier")?;
        let int_pool = read_int_pool(&mut r, header.int_pool_ofs as usize)?;
        let fixed_pool = read_fixed_pool(&mut r, header.fixed_pool_ofs as usize)?;
        let string_pool = read_string_table(&mut r, header.strings_ofs as usize, "string")?;
        let functions = read_functions(&mut r, header.functions_ofs as usize)?;
        let plugin_imports = read_plugin_imports(&mut r, header.plugin_imports_ofs as usize)?;
        let oc_imports = read_oc_imports(&mut r, header.oc_imports_ofs as usize)?;
        let statics = read_statics(&mut r, header.statics_ofs as usize)?;
        let local_frames = read_local_pool(&mut r, header.local_pool_ofs as usize)?;
        let system_attributes = read_system_attributes(&mut r, header.system_attrs_ofs as usize)?;
        let debug_info = if header.debug_syms_ofs != 0 {
            Some(DebugInfo::read(&mut r, header.debug_syms_ofs as usize)?)
        } else {
            None
        };

        Ok(Self {
            header,
            entry_point,
            code,
            identifiers,
            int_pool,
            fixed_pool,
            string_pool,
            functions,
            plugin_imports,
            oc_imports,
            statics,
            local_frames,
            system_attributes,
            debug_info,
        })
    }

    /// Instructions belonging to `func`: from the first instruction at or
    /// past `code_start` through the one at `code_end` (the terminal
    /// `RET`/`EXIT`), inclusive.
    pub fn function_code(&self, func: &FunctionInfo) -> &[CodeEntry] {
        let start = self
            .code
            .iter()
            .position(|e| e.offset >= func.code_start)
            .unwrap_or(self.code.len());
        let end = self.code[start..]
            .iter()
            .position(|e| e.offset >= func.code_end)
            .map(|i| start + i + 1)
            .unwrap_or(self.code.len());
        &self.code[start..end]
    }
}

fn read_code(r: &mut Reader<'_>, section: usize) -> Result<(u32, Vec<CodeEntry>)> {
    r.seek(section);
    let rel = r.read_u32_le()? as usize;
    let entry_point = r.read_u32_le()?;
    let size = r.read_u32_le()? as usize;

    let code_start = section + rel;
    r.seek(code_start);
    let mut code = Vec::new();
    while r.position() < code_start + size {
        let offset = (r.position() - code_start) as u32;
        let instruction = Instruction::decode(r)?;
        code.push(CodeEntry {
            offset,
            instruction,
        });
    }
    Ok((entry_point, code))
}

fn read_string_table(
    r: &mut Reader<'_>,
    section: usize,
    table: &'static str,
) -> Result<Vec<String>> {
    r.seek(section);
    let rel = r.read_u32_le()? as usize;
    let count = r.read_u32_le()? as usize;
    let width = r.read_u32_le()?;

    r.seek(section + rel);
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        let offset = match width {
            2 => r.read_u16_le()? as usize,
            4 => r.read_u32_le()? as usize,
            other => return Err(BytecodeError::InvalidOffsetWidth(other)),
        };
        offsets.push(offset);
    }

    let mut entries = Vec::with_capacity(count);
    for offset in offsets {
        r.seek(section + rel + offset);
        entries.push(r.read_cstr(table)?);
    }
    Ok(entries)
}

fn read_int_pool(r: &mut Reader<'_>, section: usize) -> Result<Vec<i32>> {
    r.seek(section);
    let rel = r.read_u32_le()? as usize;
    let count = r.read_u32_le()? as usize;
    r.seek(section + rel);
    let mut pool = Vec::with_capacity(count);
    for _ in 0..count {
        pool.push(r.read_i32_le()?);
    }
    Ok(pool)
}

fn read_fixed_pool(r: &mut Reader<'_>, section: usize) -> Result<Vec<f32>> {
    r.seek(section);
    let rel = r.read_u32_le()? as usize;
    let count = r.read_u32_le()? as usize;
    r.seek(section + rel);
    let mut pool = Vec::with_capacity(count);
    for _ in 0..count {
        pool.push(r.read_f32_le()?);
    }
    Ok(pool)
}

fn read_functions(r: &mut Reader<'_>, section: usize) -> Result<Vec<FunctionInfo>> {
    r.seek(section);
    let rel = r.read_u32_le()? as usize;
    let count = r.read_u32_le()? as usize;
    let _entry_size = r.read_u32_le()?;
    r.seek(section + rel);
    let mut functions = Vec::with_capacity(count);
    for id in 0..count {
        functions.push(FunctionInfo::read(r, id as u32)?);
    }
    Ok(functions)
}

fn read_plugin_imports(r: &mut Reader<'_>, section: usize) -> Result<Vec<PluginImport>> {
    r.seek(section);
    let rel = r.read_u32_le()? as usize;
    let count = r.read_u32_le()? as usize;
    let _entry_size = r.read_u32_le()?;
    r.seek(section + rel);
    let mut imports = Vec::with_capacity(count);
    for id in 0..count {
        let plugin_name_id = r.read_u16_le()?;
        let function_name_id = r.read_u16_le()?;
        imports.push(PluginImport {
            id: id as u32,
            plugin_name_id,
            function_name_id,
        });
    }
    Ok(imports)
}

fn read_oc_imports(r: &mut Reader<'_>, section: usize) -> Result<Vec<ObjectConstructor>> {
    r.seek(section);
    let rel = r.read_u32_le()? as usize;
    let count = r.read_u32_le()? as usize;
    let _entry_size = r.read_u32_le()?;
    r.seek(section + rel);
    let mut imports = Vec::with_capacity(count);
    for id in 0..count {
        let name_id = r.read_u16_le()?;
        imports.push(ObjectConstructor {
            id: id as u32,
            name_id,
        });
    }
    Ok(imports)
}

fn read_statics(r: &mut Reader<'_>, section: usize) -> Result<Vec<Variable>> {
    r.seek(section);
    let rel = r.read_u32_le()? as usize;
    let count = r.read_u32_le()? as usize;
    r.seek(section + rel);
    let mut statics = Vec::with_capacity(count);
    for id in 0..count {
        statics.push(Variable::read(r, id as u32)?);
    }
    Ok(statics)
}

fn read_local_pool(r: &mut Reader<'_>, section: usize) -> Result<Vec<Vec<Variable>>> {
    r.seek(section);
    let rel = r.read_u32_le()? as usize;
    let count = r.read_u32_le()? as usize;
    let _entry_size = r.read_u32_le()?;

    let table_start = section + rel;
    r.seek(table_start);
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        offsets.push(r.read_u16_le()? as usize);
    }

    let mut frames = Vec::with_capacity(count);
    for offset in offsets {
        r.seek(table_start + offset);
        let frame_rel = r.read_u32_le()? as usize;
        let slot_count = r.read_u32_le()? as usize;
        r.seek(table_start + offset + frame_rel);
        let mut slots = Vec::with_capacity(slot_count);
        for id in 0..slot_count {
            slots.push(Variable::read(r, id as u32)?);
        }
        frames.push(slots);
    }
    Ok(frames)
}

fn read_system_attributes(r: &mut Reader<'_>, section: usize) -> Result<Vec<SystemAttribute>> {
    r.seek(section);
    let rel = r.read_u32_le()? as usize;
    let count = r.read_u32_le()? as usize;
    let _entry_size = r.read_u32_le()?;
    r.seek(section + rel);
    let mut attrs = Vec::with_capacity(count);
    for _ in 0..count {
        attrs.push(SystemAttribute {
            name_id: r.read_i16_le()?,
        });
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::CompiledScript;

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = CompiledScript::default().to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            ScriptFile::from_bytes(&bytes),
            Err(BytecodeError::InvalidMagic)
        ));
    }

    #[test]
    fn test_rejects_unsupported_version() {
        let mut bytes = CompiledScript::default().to_bytes().unwrap();
        bytes[4] = 3;
        assert!(matches!(
            ScriptFile::from_bytes(&bytes),
            Err(BytecodeError::UnsupportedVersion(3))
        ));
    }

    #[test]
    fn test_rejects_scrambled_flag() {
        let mut bytes = CompiledScript::default().to_bytes().unwrap();
        bytes[6] |= SB_FLAG_SCRAMBLED;
        assert!(matches!(
            ScriptFile::from_bytes(&bytes),
            Err(BytecodeError::ScrambledContainer)
        ));
    }

    #[test]
    fn test_rejects_truncated_container() {
        let bytes = CompiledScript::default().to_bytes().unwrap();
        assert!(matches!(
            ScriptFile::from_bytes(&bytes[..0x20]),
            Err(BytecodeError::UnexpectedEnd(_))
        ));
    }

    #[test]
    fn test_empty_container_roundtrip() {
        let bytes = CompiledScript::default().to_bytes().unwrap();
        let file = ScriptFile::from_bytes(&bytes).unwrap();
        assert!(file.code.is_empty());
        assert!(file.identifiers.is_empty());
        assert!(file.functions.is_empty());
        assert!(file.debug_info.is_none());
    }
}
