//! Binary Waveform Trace Files
//!
//! A trace file records how a set of named signals change value
//! over discrete time. The format is built for streaming: a
//! fixed-size header is written provisionally when the session
//! opens, value changes are appended in block-compressed chunks as
//! emulation runs, and finalizing the session writes the variable
//! directory and block index after the body and patches the header
//! in place with the final counts.
//!
//! File layout:
//!
//! * Header (160 bytes, little endian): magic `PTRC`, format
//!   version, compression mode, timescale exponent, a sealed
//!   marker, final timestamp, block count, directory offset, and a
//!   128-byte NUL-padded comment. The sealed marker is only set by
//!   [`writer::Session::finalize`], so a file abandoned mid-write
//!   is detectably incomplete.
//! * Body: a sequence of blocks. Each block is `start_time u64 |
//!   step_count u32 | raw_len u32 | stored_len u32 | payload`; the
//!   payload holds, per time step, a varint timestamp delta, a
//!   varint change count, and (varint handle, varint value) pairs,
//!   zlib-compressed in [`Compression::Block`] mode.
//! * Directory: per variable, handle, name, bit width, direction.
//! * Block index: per block, start time, file offset and stored
//!   length, enabling seeks without decompressing the whole body.
//!
//! The writer lives in [`writer`], a minimal reader (used for
//! verification and by the `tracedump` tool) in [`reader`].

use std::io::{self, Read, Write};
use thiserror::Error;

pub mod reader;
pub mod writer;

pub const MAGIC: [u8; 4] = *b"PTRC";
pub const FORMAT_VERSION: u16 = 1;

/// Total size of the fixed header
pub const HEADER_LENGTH: u64 = 160;

/// Size of the NUL-padded comment field in the header
pub const COMMENT_LENGTH: usize = 128;

/// Timescale of one emulated clock cycle, as a power-of-ten
/// exponent of seconds (-9 = nanoseconds)
pub const TIMESCALE_EXPONENT: i8 = -9;

/// A block is flushed when it holds this many time steps...
pub const BLOCK_MAX_STEPS: u32 = 256;

/// ...or this many bytes of encoded change data, whichever comes
/// first
pub const BLOCK_MAX_BYTES: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceFileError {
    #[error("variable {0:?} is already registered")]
    DuplicateVariable(String),
    #[error("bit width {0} is outside 1-32")]
    InvalidWidth(u32),
    #[error("timestamp {requested} is before the last time step {last}")]
    NonMonotonicTime { last: u64, requested: u64 },
    #[error("emit_value called before any emit_time in this session")]
    NoActiveTimeStep,
    #[error("value 0x{value:x} does not fit in {bit_width} bits")]
    ValueOverflow { value: u32, bit_width: u32 },
    #[error("session is already finalized")]
    SessionAlreadySealed,
    #[error("no variable with handle {0} is registered")]
    UnknownHandle(u32),
    #[error("file does not start with the trace magic")]
    BadMagic,
    #[error("format version {0} is not supported")]
    UnsupportedVersion(u16),
    #[error("file was never finalized and is incomplete")]
    NotSealed,
    #[error("trace file is corrupt: {0}")]
    Corrupt(String),
    #[error("trace file I/O error: {0}")]
    IoError(String),
}

impl From<io::Error> for TraceFileError {
    fn from(e: io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

/// How block payloads are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Raw payload bytes
    None,
    /// Zlib-compressed payload
    #[default]
    Block,
}

impl Compression {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Block => 1,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Result<Self, TraceFileError> {
        match byte {
            0 => Ok(Self::None),
            1 => Ok(Self::Block),
            _ => Err(TraceFileError::Corrupt(format!(
                "unknown compression mode {byte}"
            ))),
        }
    }
}

/// Whether a signal is an input to or an output of the traced
/// peripheral. Informational only; carried through to the
/// directory for the viewer's benefit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::Input => 0,
            Self::Output => 1,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Result<Self, TraceFileError> {
        match byte {
            0 => Ok(Self::Input),
            1 => Ok(Self::Output),
            _ => Err(TraceFileError::Corrupt(format!("unknown direction {byte}"))),
        }
    }
}

/// Opaque identifier for a registered variable, assigned by the
/// session at declaration and recognised by subsequent emit calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarHandle(pub(crate) u32);

impl VarHandle {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// One entry of the variable directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRecord {
    pub handle: VarHandle,
    pub name: String,
    pub bit_width: u32,
    pub direction: Direction,
}

/// One entry of the block index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRecord {
    pub start_time: u64,
    pub offset: u64,
    pub stored_length: u32,
}

/// LEB128-encode value into the writer
pub(crate) fn write_varuint<W: Write>(writer: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            return writer.write_all(&[byte]);
        }
        writer.write_all(&[byte | 0x80])?;
    }
}

/// Decode one LEB128 value from the reader
pub(crate) fn read_varuint<R: Read>(reader: &mut R) -> Result<u64, TraceFileError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        if shift >= 64 {
            return Err(TraceFileError::Corrupt("varint is too long".to_string()));
        }
        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use std::io::Cursor;

    #[test]
    fn check_varuint_round_trip() {
        for value in [0u64, 1, 0x7f, 0x80, 0x3fff, 0x4000, u32::MAX as u64, u64::MAX] {
            let mut buffer = Vec::new();
            write_varuint(&mut buffer, value).unwrap();
            let decoded = read_varuint(&mut Cursor::new(&buffer)).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn check_varuint_single_byte_small_values() {
        let mut buffer = Vec::new();
        write_varuint(&mut buffer, 0x25).unwrap();
        assert_eq!(buffer, vec![0x25]);
    }
}
