//! De-duplicated literal pools.
//!
//! Pools are ordered sequences where an entry's index is its reference.
//! Indices are assigned on first use and reused for repeated values, so
//! instruction operands stay stable while the pool keeps growing.

use serde::{Deserialize, Serialize};

/// Ordered de-duplicating pool for integers, strings and identifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pool<T> {
    entries: Vec<T>,
}

impl<T: PartialEq> Pool<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Returns the index of `value`, inserting it at the end when absent.
    pub fn add(&mut self, value: T) -> usize {
        match self.entries.iter().position(|e| *e == value) {
            Some(idx) => idx,
            None => {
                self.entries.push(value);
                self.entries.len() - 1
            }
        }
    }

    /// Index of an existing entry, if any.
    pub fn index_of(&self, value: &T) -> Option<usize> {
        self.entries.iter().position(|e| e == value)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.entries
    }
}

impl<T> From<Vec<T>> for Pool<T> {
    fn from(entries: Vec<T>) -> Self {
        Self { entries }
    }
}

impl Pool<String> {
    /// Convenience for interning borrowed strings without a caller-side clone
    /// on the hit path.
    pub fn add_str(&mut self, value: &str) -> usize {
        match self.entries.iter().position(|e| e == value) {
            Some(idx) => idx,
            None => {
                self.entries.push(value.to_owned());
                self.entries.len() - 1
            }
        }
    }
}

/// Pool of 32-bit floats ("fixed" pool), de-duplicated on bit pattern so
/// that -0.0 and NaN payloads keep distinct slots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixedPool {
    entries: Vec<f32>,
}

impl FixedPool {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn add(&mut self, value: f32) -> usize {
        let bits = value.to_bits();
        match self.entries.iter().position(|e| e.to_bits() == bits) {
            Some(idx) => idx,
            None => {
                self.entries.push(value);
                self.entries.len() - 1
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.entries.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f32> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.entries
    }
}

impl From<Vec<f32>> for FixedPool {
    fn from(entries: Vec<f32>) -> Self {
        Self { entries }
    }
}
