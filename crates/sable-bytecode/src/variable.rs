//! Static and local variable records.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::codec::{Reader, Writer};
use crate::error::{BytecodeError, Result};

/// Runtime type tag of a variable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum VarType {
    Nil = 0,
    True = 1,
    False = 2,
    Int = 3,
    Fixed = 4,
    String = 5,
    Array = 6,
    Function = 7,
    Plugin = 8,
    Oc = 9,
    Sys = 10,
}

impl TryFrom<u8> for VarType {
    type Error = BytecodeError;

    fn try_from(value: u8) -> Result<Self> {
        use VarType::*;
        Ok(match value {
            0 => Nil,
            1 => True,
            2 => False,
            3 => Int,
            4 => Fixed,
            5 => String,
            6 => Array,
            7 => Function,
            8 => Plugin,
            9 => Oc,
            10 => Sys,
            other => return Err(BytecodeError::InvalidVarType(other)),
        })
    }
}

/// Initial value payload of a variable slot.
///
/// Strings live in the string pool and arrays are flattened into sibling
/// slots, so both are stored as indices here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VarValue {
    Int(i32),
    Fixed(f32),
    /// Index into the string pool.
    StringIndex(u32),
    /// Slot index of the array's first element.
    ArrayStart(u32),
}

/// One 12-byte static/local record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Slot index within its storage class (static table or local frame).
    pub id: u32,
    pub ty: VarType,
    /// Element count when `ty` is `Array`, zero otherwise.
    pub array_size: u16,
    pub value: VarValue,
}

impl Variable {
    pub const WIRE_SIZE: usize = 12;

    pub fn new(id: u32, ty: VarType, value: VarValue) -> Self {
        Self {
            id,
            ty,
            array_size: 0,
            value,
        }
    }

    /// Writes the record: type u8, pad u8, array size i16, value u32/f32,
    /// pad u32 (the trailing pad is stack image padding).
    pub fn write(&self, w: &mut Writer) {
        w.write_u8(self.ty as u8);
        w.write_u8(0);
        w.write_u16_le(self.array_size);
        match self.value {
            VarValue::Int(v) => w.write_i32_le(v),
            VarValue::Fixed(v) => w.write_f32_le(v),
            VarValue::StringIndex(v) => w.write_u32_le(v),
            VarValue::ArrayStart(v) => w.write_u32_le(v),
        }
        w.write_u32_le(0);
    }

    pub fn read(r: &mut Reader<'_>, id: u32) -> Result<Self> {
        let ty = VarType::try_from(r.read_u8()?)?;
        let _pad = r.read_u8()?;
        let array_size = r.read_u16_le()?;
        let value = match ty {
            VarType::Fixed => VarValue::Fixed(r.read_f32_le()?),
            VarType::String => VarValue::StringIndex(r.read_u32_le()?),
            VarType::Array => VarValue::ArrayStart(r.read_u32_le()?),
            _ => VarValue::Int(r.read_i32_le()?),
        };
        let _pad = r.read_u32_le()?;
        Ok(Self {
            id,
            ty,
            array_size,
            value,
        })
    }
}

/// One function's flattened local slots.
///
/// Named declarations get a slot plus a name binding; array elements get
/// anonymous slots in the same space.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalFrame {
    slots: Vec<Variable>,
    /// Named slots in declaration order, for symbol output.
    names: Vec<(String, u32)>,
    #[serde(skip)]
    by_name: FxHashMap<String, u32>,
}

impl LocalFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a slot, returning its index.
    pub fn push(&mut self, mut var: Variable) -> u32 {
        let id = self.slots.len() as u32;
        var.id = id;
        self.slots.push(var);
        id
    }

    /// Binds `name` to an already-pushed slot.
    pub fn bind(&mut self, name: &str, id: u32) {
        self.names.push((name.to_owned(), id));
        self.by_name.insert(name.to_owned(), id);
    }

    pub fn slot_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn slots(&self) -> &[Variable] {
        &self.slots
    }

    /// Named slots in declaration order.
    pub fn names(&self) -> &[(String, u32)] {
        &self.names
    }

    /// Count of named locals (anonymous array-element slots excluded).
    pub fn named_count(&self) -> usize {
        self.names.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_record_layout() {
        let var = Variable {
            id: 0,
            ty: VarType::Array,
            array_size: 4,
            value: VarValue::ArrayStart(1),
        };
        let mut w = Writer::new();
        var.write(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), Variable::WIRE_SIZE);
        assert_eq!(bytes[0], 6);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 4);
        assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 1);

        let mut r = Reader::new(&bytes);
        assert_eq!(Variable::read(&mut r, 0).unwrap(), var);
    }

    #[test]
    fn test_fixed_value_roundtrip() {
        let var = Variable::new(2, VarType::Fixed, VarValue::Fixed(1.5));
        let mut w = Writer::new();
        var.write(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(Variable::read(&mut r, 2).unwrap(), var);
    }

    #[test]
    fn test_frame_binding() {
        let mut frame = LocalFrame::new();
        let id = frame.push(Variable::new(0, VarType::Int, VarValue::Int(7)));
        frame.bind("x", id);
        frame.push(Variable::new(0, VarType::Int, VarValue::Int(0)));
        assert_eq!(frame.slot_of("x"), Some(0));
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.named_count(), 1);
    }
}
