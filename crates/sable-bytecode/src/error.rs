//! Bytecode and container errors

use thiserror::Error;

/// Errors that can occur while decoding or encoding an SB container
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Invalid magic bytes in container file
    #[error("Invalid magic bytes")]
    InvalidMagic,

    /// Unsupported container version
    #[error("Unsupported container version: {0}")]
    UnsupportedVersion(u8),

    /// The container's string tables are scrambled (flag 0x02), which is not supported
    #[error("Scrambled string tables are not supported")]
    ScrambledContainer,

    /// Unknown opcode byte in the code stream
    #[error("Invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),

    /// Unknown variable type tag in a static/local record
    #[error("Invalid variable type tag: {0:#04x}")]
    InvalidVarType(u8),

    /// Unexpected end of input while reading a section
    #[error("Unexpected end of container data at offset {0:#x}")]
    UnexpectedEnd(usize),

    /// A section header declares an offset width other than 2 or 4
    #[error("Invalid string offset width: {0}")]
    InvalidOffsetWidth(u32),

    /// A decoded instruction or table references an entry that does not exist
    #[error("Out-of-range {table} index {index}")]
    IndexOutOfRange {
        /// Which pool or table the reference points into
        table: &'static str,
        /// The offending index
        index: usize,
    },

    /// A string table entry is not valid UTF-8
    #[error("Invalid string data in {0} table")]
    InvalidString(&'static str),

    /// IO error during serialization
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
