//! Function table records and import entities.

use serde::{Deserialize, Serialize};

use crate::codec::{Reader, Writer};
use crate::error::Result;

/// One function table record.
///
/// `code_end` is recorded before the terminal `RET`/`EXIT` is emitted, so
/// the terminal instruction sits exactly at the recorded end offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Position in the function table; `CALL` operands use this.
    pub id: u32,
    /// Identifier pool index of the function's name.
    pub name_id: u16,
    pub arg_count: u16,
    pub has_return_value: bool,
    /// Named locals only; anonymous array-element slots are not counted.
    pub local_count: u16,
    /// Index into the local-pool table, when the function has locals.
    pub local_pool_index: Option<u16>,
    /// Byte offset of the first instruction within the code section.
    pub code_start: u32,
    /// Byte offset of the terminal instruction within the code section.
    pub code_end: u32,
    /// Argument names in declaration order. Compiler-side resolution state,
    /// not part of the wire record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
}

impl FunctionInfo {
    pub const WIRE_SIZE: usize = 0x14;

    pub fn new(id: u32, name_id: u16) -> Self {
        Self {
            id,
            name_id,
            arg_count: 0,
            has_return_value: false,
            local_count: 0,
            local_pool_index: None,
            code_start: 0,
            code_end: 0,
            arguments: Vec::new(),
        }
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_u16_le(self.name_id);
        w.write_u16_le(self.arg_count);
        w.write_u16_le(self.has_return_value as u16);
        w.write_u16_le(self.local_count);
        w.write_i16_le(match self.local_pool_index {
            Some(idx) => idx as i16,
            None => -1,
        });
        w.write_i16_le(0);
        w.write_u32_le(self.code_start);
        w.write_u32_le(self.code_end);
    }

    pub fn read(r: &mut Reader<'_>, id: u32) -> Result<Self> {
        let name_id = r.read_u16_le()?;
        let arg_count = r.read_u16_le()?;
        let has_return_value = r.read_u16_le()? != 0;
        let local_count = r.read_u16_le()?;
        let local_pool_index = match r.read_i16_le()? {
            -1 => None,
            idx => Some(idx as u16),
        };
        let _pad = r.read_i16_le()?;
        let code_start = r.read_u32_le()?;
        let code_end = r.read_u32_le()?;
        Ok(Self {
            id,
            name_id,
            arg_count,
            has_return_value,
            local_count,
            local_pool_index,
            code_start,
            code_end,
            arguments: Vec::new(),
        })
    }
}

/// One plugin-import record: a `Namespace::function` pair, both names in the
/// identifier pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginImport {
    pub id: u32,
    pub plugin_name_id: u16,
    pub function_name_id: u16,
}

impl PluginImport {
    pub const WIRE_SIZE: usize = 4;
}

/// One object-constructor import: an engine-known receiver such as
/// `builtin` or `thread`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectConstructor {
    pub id: u32,
    pub name_id: u16,
}

/// One system-attribute entry; `-1` is the list terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemAttribute {
    pub name_id: i16,
}
