//! Debug-symbol block codec.
//!
//! The block starts with a 0x14-byte header of five relative offsets:
//! static symbols, per-function local symbols, argument symbols (reserved,
//! always zero), file names, and line info. A zero offset means the section
//! is absent. Everything here is little-endian.

use serde::{Deserialize, Serialize};

use crate::codec::{Reader, Writer};
use crate::error::Result;

/// One debug symbol: an identifier-pool name index bound to a slot id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugSymbol {
    /// Identifier pool index of the symbol's name.
    pub name_id: u16,
    /// Static table or local frame slot.
    pub slot_id: u16,
}

impl DebugSymbol {
    const WIRE_SIZE: usize = 10;

    fn write(&self, w: &mut Writer) {
        w.write_u16_le(self.name_id);
        w.write_u16_le(1);
        w.write_u16_le(self.slot_id);
        w.write_u16_le(0);
        w.write_u16_le(0);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let name_id = r.read_u16_le()?;
        let _one = r.read_u16_le()?;
        let slot_id = r.read_u16_le()?;
        let _pad = r.read_u16_le()?;
        let _pad = r.read_u16_le()?;
        Ok(Self { name_id, slot_id })
    }
}

/// One statement-level line map entry, keyed by code-section byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEntry {
    /// Index into the file-name table.
    pub file_id: u16,
    pub line: u16,
    /// Byte offset of the statement's first instruction.
    pub code_offset: u32,
}

/// Decoded or compiler-built debug information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugInfo {
    pub static_symbols: Vec<DebugSymbol>,
    /// Indexed by function id; empty inner lists are valid.
    pub function_locals: Vec<Vec<DebugSymbol>>,
    pub file_names: Vec<String>,
    /// Sorted ascending by `code_offset`.
    pub lines: Vec<LineEntry>,
}

impl DebugInfo {
    const HEADER_SIZE: usize = 0x14;

    pub fn is_empty(&self) -> bool {
        self.static_symbols.is_empty()
            && self.function_locals.iter().all(Vec::is_empty)
            && self.file_names.is_empty()
            && self.lines.is_empty()
    }

    /// Exact-offset line lookup for disassembly annotations.
    pub fn line_for_offset(&self, code_offset: u32) -> Option<&LineEntry> {
        self.lines
            .binary_search_by_key(&code_offset, |e| e.code_offset)
            .ok()
            .map(|idx| &self.lines[idx])
    }

    /// Static symbol bound to `slot_id`, if recorded.
    pub fn static_symbol(&self, slot_id: u16) -> Option<&DebugSymbol> {
        self.static_symbols.iter().find(|s| s.slot_id == slot_id)
    }

    /// Local symbol of `function_id` bound to `slot_id`, if recorded.
    pub fn local_symbol(&self, function_id: u32, slot_id: u16) -> Option<&DebugSymbol> {
        self.function_locals
            .get(function_id as usize)?
            .iter()
            .find(|s| s.slot_id == slot_id)
    }

    pub fn write(&self, w: &mut Writer) {
        let base = w.position();
        for _ in 0..Self::HEADER_SIZE / 4 {
            w.write_u32_le(0);
        }

        if !self.static_symbols.is_empty() {
            let section = w.position();
            w.patch_u32_le(base, (section - base) as u32);
            w.write_u32_le(0x08);
            w.write_u32_le(self.static_symbols.len() as u32);
            for sym in &self.static_symbols {
                sym.write(w);
            }
            w.align(4);
        }

        if self.function_locals.iter().any(|l| !l.is_empty()) {
            let section = w.position();
            w.patch_u32_le(base + 0x04, (section - base) as u32);
            w.write_u32_le(0x08);
            w.write_u32_le(self.function_locals.len() as u32);

            let table_start = w.position();
            for _ in &self.function_locals {
                w.write_u32_le(0);
            }
            for (i, locals) in self.function_locals.iter().enumerate() {
                if locals.is_empty() {
                    continue;
                }
                let entry = table_start + i * 4;
                let rel = (w.position() - table_start) as u16;
                w.patch_u16_le(entry, rel);
                w.patch_u16_le(entry + 2, locals.len() as u16);
                for sym in locals {
                    sym.write(w);
                }
            }
            w.align(4);
        }

        // Slot 0x08 (argument symbols) stays zero.

        if !self.file_names.is_empty() {
            let section = w.position();
            w.patch_u32_le(base + 0x0C, (section - base) as u32);
            w.write_u32_le(0x08);
            w.write_u32_le(self.file_names.len() as u32);

            let mut str_offset = self.file_names.len() * 2;
            for name in &self.file_names {
                w.write_u16_le(str_offset as u16);
                str_offset += name.len() + 1;
            }
            for name in &self.file_names {
                w.write_cstr(name);
            }
            w.align(4);
        }

        if !self.lines.is_empty() {
            let section = w.position();
            w.patch_u32_le(base + 0x10, (section - base) as u32);
            w.write_u32_le(0x08);
            w.write_u32_le(self.lines.len() as u32);
            for entry in &self.lines {
                w.write_u16_le(entry.file_id);
                w.write_u16_le(entry.line);
                w.write_u32_le(entry.code_offset);
            }
            w.align(4);
        }
    }

    pub fn read(r: &mut Reader<'_>, base: usize) -> Result<Self> {
        r.seek(base);
        let statics_ofs = r.read_u32_le()? as usize;
        let locals_ofs = r.read_u32_le()? as usize;
        let _args_ofs = r.read_u32_le()?;
        let file_names_ofs = r.read_u32_le()? as usize;
        let lines_ofs = r.read_u32_le()? as usize;

        let mut info = Self::default();

        if statics_ofs != 0 {
            r.seek(base + statics_ofs);
            let _rel = r.read_u32_le()?;
            let count = r.read_u32_le()? as usize;
            for _ in 0..count {
                info.static_symbols.push(DebugSymbol::read(r)?);
            }
        }

        if locals_ofs != 0 {
            r.seek(base + locals_ofs);
            let rel = r.read_u32_le()? as usize;
            let count = r.read_u32_le()? as usize;
            let section = base + locals_ofs;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let offset = r.read_u16_le()?;
                let num = r.read_u16_le()?;
                entries.push((offset, num));
            }
            for (offset, num) in entries {
                let mut locals = Vec::with_capacity(num as usize);
                if num != 0 {
                    r.seek(section + rel + offset as usize);
                    for _ in 0..num {
                        locals.push(DebugSymbol::read(r)?);
                    }
                }
                info.function_locals.push(locals);
            }
        }

        if file_names_ofs != 0 {
            r.seek(base + file_names_ofs);
            let rel = r.read_u32_le()? as usize;
            let count = r.read_u32_le()? as usize;
            let section = base + file_names_ofs;
            let mut offsets = Vec::with_capacity(count);
            for _ in 0..count {
                offsets.push(r.read_u16_le()? as usize);
            }
            for offset in offsets {
                r.seek(section + rel + offset);
                info.file_names.push(r.read_cstr("file name")?);
            }
        }

        if lines_ofs != 0 {
            r.seek(base + lines_ofs);
            let _rel = r.read_u32_le()?;
            let count = r.read_u32_le()? as usize;
            for _ in 0..count {
                let file_id = r.read_u16_le()?;
                let line = r.read_u16_le()?;
                let code_offset = r.read_u32_le()?;
                info.lines.push(LineEntry {
                    file_id,
                    line,
                    code_offset,
                });
            }
        }

        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DebugInfo {
        DebugInfo {
            static_symbols: vec![DebugSymbol {
                name_id: 4,
                slot_id: 0,
            }],
            function_locals: vec![
                vec![DebugSymbol {
                    name_id: 2,
                    slot_id: 0,
                }],
                vec![],
                vec![
                    DebugSymbol {
                        name_id: 5,
                        slot_id: 0,
                    },
                    DebugSymbol {
                        name_id: 6,
                        slot_id: 1,
                    },
                ],
            ],
            file_names: vec!["main.sc".to_owned()],
            lines: vec![
                LineEntry {
                    file_id: 0,
                    line: 1,
                    code_offset: 0,
                },
                LineEntry {
                    file_id: 0,
                    line: 2,
                    code_offset: 3,
                },
            ],
        }
    }

    #[test]
    fn test_block_roundtrip() {
        let info = sample();
        let mut w = Writer::new();
        info.write(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = DebugInfo::read(&mut r, 0).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_empty_sections_stay_zero() {
        let info = DebugInfo::default();
        let mut w = Writer::new();
        info.write(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 0x14);
        assert!(bytes.iter().all(|&b| b == 0));
        let mut r = Reader::new(&bytes);
        let decoded = DebugInfo::read(&mut r, 0).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_line_lookup_is_exact() {
        let info = sample();
        assert_eq!(info.line_for_offset(3).map(|e| e.line), Some(2));
        assert_eq!(info.line_for_offset(2), None);
    }
}
