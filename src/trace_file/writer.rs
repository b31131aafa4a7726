//! Trace File Writing
//!
//! [`Session`] is the stateful writer for one trace file, open
//! from creation to [`Session::finalize`]. It buffers the time
//! step being emitted, packs finished steps into blocks, and
//! flushes each block (optionally zlib-compressed) once it holds
//! [`BLOCK_MAX_STEPS`] steps or [`BLOCK_MAX_BYTES`] bytes. Values
//! are change-compressed per variable: an emit that repeats the
//! last recorded value for its handle is dropped.
//!
//! The session must be used single-threaded; the file format is
//! ordered by timestamp and the writer owns the file handle for
//! its whole lifetime.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::mem;
use std::path::Path;

use flate2::write::ZlibEncoder;

use super::{
    write_varuint, BlockRecord, Compression, Direction, TraceFileError, VarHandle,
    VariableRecord, BLOCK_MAX_BYTES, BLOCK_MAX_STEPS, COMMENT_LENGTH, FORMAT_VERSION, MAGIC,
    TIMESCALE_EXPONENT,
};
use crate::utils::mask;

/// The time step currently being accumulated
struct TimeStep {
    time: u64,
    changes: Vec<(VarHandle, u32)>,
}

/// An open trace-file writing session
pub struct Session<W: Write + Seek> {
    writer: W,
    compression: Compression,
    comment: String,
    directory: Vec<VariableRecord>,
    /// Last value recorded per handle, for change detection
    last_values: Vec<Option<u32>>,
    current_step: Option<TimeStep>,
    last_time: Option<u64>,
    /// Encoded steps of the block being assembled
    block: Vec<u8>,
    block_start_time: u64,
    block_last_time: u64,
    block_steps: u32,
    index: Vec<BlockRecord>,
    sealed: bool,
}

impl Session<BufWriter<File>> {
    /// Create the trace file at path and write the provisional
    /// header
    pub fn create<P: AsRef<Path>>(
        path: P,
        compression: Compression,
    ) -> Result<Self, TraceFileError> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), compression)
    }
}

impl<W: Write + Seek> Session<W> {
    /// Start a session on any seekable writer. The provisional
    /// header is written immediately; it is patched with the final
    /// counts at finalize.
    pub fn new(writer: W, compression: Compression) -> Result<Self, TraceFileError> {
        let mut session = Self {
            writer,
            compression,
            comment: String::new(),
            directory: Vec::new(),
            last_values: Vec::new(),
            current_step: None,
            last_time: None,
            block: Vec::new(),
            block_start_time: 0,
            block_last_time: 0,
            block_steps: 0,
            index: Vec::new(),
            sealed: false,
        };
        session.write_header(false, 0, 0, 0)?;
        Ok(session)
    }

    fn check_open(&self) -> Result<(), TraceFileError> {
        if self.sealed {
            Err(TraceFileError::SessionAlreadySealed)
        } else {
            Ok(())
        }
    }

    /// Append a directory entry and return the handle the emit
    /// calls will use for this variable
    pub fn declare_variable(
        &mut self,
        name: &str,
        bit_width: u32,
        direction: Direction,
    ) -> Result<VarHandle, TraceFileError> {
        self.check_open()?;
        if !(1..=32).contains(&bit_width) {
            return Err(TraceFileError::InvalidWidth(bit_width));
        }
        if self.directory.iter().any(|variable| variable.name == name) {
            return Err(TraceFileError::DuplicateVariable(name.to_string()));
        }
        let handle = VarHandle(self.directory.len() as u32);
        self.directory.push(VariableRecord {
            handle,
            name: name.to_string(),
            bit_width,
            direction,
        });
        self.last_values.push(None);
        Ok(handle)
    }

    /// Attach free-text metadata to the header. May be called more
    /// than once; the last write wins. Longer comments are cut at
    /// the header field size.
    pub fn set_comment(&mut self, text: &str) -> Result<(), TraceFileError> {
        self.check_open()?;
        self.comment = text.to_string();
        Ok(())
    }

    /// Open a new time step. Timestamps must be non-decreasing
    /// across the session.
    pub fn emit_time(&mut self, timestamp: u64) -> Result<(), TraceFileError> {
        self.check_open()?;
        if let Some(last) = self.last_time {
            if timestamp < last {
                return Err(TraceFileError::NonMonotonicTime {
                    last,
                    requested: timestamp,
                });
            }
        }
        self.close_current_step()?;
        self.current_step = Some(TimeStep {
            time: timestamp,
            changes: Vec::new(),
        });
        self.last_time = Some(timestamp);
        Ok(())
    }

    /// Record a value change for handle at the current time step
    ///
    /// The value must fit in bit_width bits; an oversized value is
    /// rejected without writing anything. A repeat of the last
    /// recorded value for this handle is silently dropped (change
    /// compression). The first emit for a handle is always
    /// recorded.
    pub fn emit_value(
        &mut self,
        handle: VarHandle,
        bit_width: u32,
        value: u32,
    ) -> Result<(), TraceFileError> {
        self.check_open()?;
        if self.current_step.is_none() {
            return Err(TraceFileError::NoActiveTimeStep);
        }
        let index = handle.0 as usize;
        if index >= self.directory.len() {
            return Err(TraceFileError::UnknownHandle(handle.0));
        }
        if !(1..=32).contains(&bit_width) {
            return Err(TraceFileError::InvalidWidth(bit_width));
        }
        if bit_width < 32 && value > mask(bit_width) {
            return Err(TraceFileError::ValueOverflow { value, bit_width });
        }
        if self.last_values[index] == Some(value) {
            return Ok(());
        }
        self.last_values[index] = Some(value);
        let step = self
            .current_step
            .as_mut()
            .expect("checked above that a time step is active");
        step.changes.push((handle, value));
        Ok(())
    }

    /// Flush pending data, write the directory and block index,
    /// patch the header and seal the session. Calling again after
    /// the first success is a no-op.
    pub fn finalize(&mut self) -> Result<(), TraceFileError> {
        if self.sealed {
            return Ok(());
        }
        self.close_current_step()?;
        self.flush_block()?;

        let directory_offset = self.writer.stream_position()?;
        write_varuint(&mut self.writer, self.directory.len() as u64)?;
        for variable in &self.directory {
            write_varuint(&mut self.writer, variable.handle.0.into())?;
            write_varuint(&mut self.writer, variable.name.len() as u64)?;
            self.writer.write_all(variable.name.as_bytes())?;
            write_varuint(&mut self.writer, variable.bit_width.into())?;
            self.writer.write_all(&[variable.direction.to_byte()])?;
        }
        write_varuint(&mut self.writer, self.index.len() as u64)?;
        for block in &self.index {
            write_varuint(&mut self.writer, block.start_time)?;
            write_varuint(&mut self.writer, block.offset)?;
            write_varuint(&mut self.writer, block.stored_length.into())?;
        }

        let end_time = self.last_time.unwrap_or(0);
        let block_count = self.index.len() as u32;
        self.write_header(true, end_time, block_count, directory_offset)?;
        self.writer.flush()?;
        self.sealed = true;
        Ok(())
    }

    /// Give back the underlying writer (for inspection in tests)
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Encode the pending time step into the block buffer,
    /// flushing the block if it crossed a size threshold
    fn close_current_step(&mut self) -> Result<(), TraceFileError> {
        if let Some(step) = self.current_step.take() {
            if self.block_steps == 0 {
                self.block_start_time = step.time;
                self.block_last_time = step.time;
            }
            write_varuint(&mut self.block, step.time - self.block_last_time)?;
            write_varuint(&mut self.block, step.changes.len() as u64)?;
            for (handle, value) in &step.changes {
                write_varuint(&mut self.block, handle.0.into())?;
                write_varuint(&mut self.block, (*value).into())?;
            }
            self.block_last_time = step.time;
            self.block_steps += 1;
            if self.block_steps >= BLOCK_MAX_STEPS || self.block.len() >= BLOCK_MAX_BYTES {
                self.flush_block()?;
            }
        }
        Ok(())
    }

    /// Write out the assembled block and record it in the index
    fn flush_block(&mut self) -> Result<(), TraceFileError> {
        if self.block_steps == 0 {
            return Ok(());
        }
        let offset = self.writer.stream_position()?;
        let raw_length = self.block.len() as u32;
        let payload = match self.compression {
            Compression::None => mem::take(&mut self.block),
            Compression::Block => {
                let mut encoder =
                    ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&self.block)?;
                let compressed = encoder.finish()?;
                self.block.clear();
                compressed
            }
        };
        self.writer.write_all(&self.block_start_time.to_le_bytes())?;
        self.writer.write_all(&self.block_steps.to_le_bytes())?;
        self.writer.write_all(&raw_length.to_le_bytes())?;
        self.writer
            .write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.index.push(BlockRecord {
            start_time: self.block_start_time,
            offset,
            stored_length: payload.len() as u32,
        });
        self.block_steps = 0;
        Ok(())
    }

    /// Write the fixed 160-byte header at the start of the file
    fn write_header(
        &mut self,
        sealed: bool,
        end_time: u64,
        block_count: u32,
        directory_offset: u64,
    ) -> Result<(), TraceFileError> {
        self.writer.seek(SeekFrom::Start(0))?;
        self.writer.write_all(&MAGIC)?;
        self.writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        self.writer.write_all(&[self.compression.to_byte()])?;
        self.writer.write_all(&TIMESCALE_EXPONENT.to_le_bytes())?;
        self.writer.write_all(&[u8::from(sealed)])?;
        self.writer.write_all(&[0u8; 3])?;
        self.writer.write_all(&end_time.to_le_bytes())?;
        self.writer.write_all(&block_count.to_le_bytes())?;
        self.writer.write_all(&directory_offset.to_le_bytes())?;
        let mut comment = [0u8; COMMENT_LENGTH];
        let length = self.comment.len().min(COMMENT_LENGTH - 1);
        comment[..length].copy_from_slice(&self.comment.as_bytes()[..length]);
        self.writer.write_all(&comment)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use std::io::Cursor;

    fn session() -> Session<Cursor<Vec<u8>>> {
        Session::new(Cursor::new(Vec::new()), Compression::Block).unwrap()
    }

    #[test]
    fn check_emit_value_without_time_step() {
        let mut session = session();
        let handle = session
            .declare_variable("CLK", 32, Direction::Output)
            .unwrap();
        let result = session.emit_value(handle, 32, 1);
        assert_eq!(result, Err(TraceFileError::NoActiveTimeStep));
    }

    #[test]
    fn check_duplicate_variable_rejected() {
        let mut session = session();
        session.declare_variable("X", 32, Direction::Output).unwrap();
        let result = session.declare_variable("X", 16, Direction::Output);
        assert_eq!(
            result,
            Err(TraceFileError::DuplicateVariable("X".to_string()))
        );
    }

    #[test]
    fn check_invalid_width_rejected() {
        let mut session = session();
        assert_eq!(
            session.declare_variable("A", 0, Direction::Output),
            Err(TraceFileError::InvalidWidth(0))
        );
        assert_eq!(
            session.declare_variable("B", 33, Direction::Output),
            Err(TraceFileError::InvalidWidth(33))
        );
    }

    #[test]
    fn check_value_overflow_rejected() {
        let mut session = session();
        let handle = session.declare_variable("PC", 5, Direction::Output).unwrap();
        session.emit_time(0).unwrap();
        let result = session.emit_value(handle, 5, 32);
        assert_eq!(
            result,
            Err(TraceFileError::ValueOverflow {
                value: 32,
                bit_width: 5
            })
        );
        // The rejected value was not recorded, so emitting it
        // in-range afterwards still works
        session.emit_value(handle, 5, 31).unwrap();
    }

    #[test]
    fn check_non_monotonic_time_rejected() {
        let mut session = session();
        session.emit_time(5).unwrap();
        assert_eq!(
            session.emit_time(4),
            Err(TraceFileError::NonMonotonicTime {
                last: 5,
                requested: 4
            })
        );
        // Equal timestamps are allowed
        session.emit_time(5).unwrap();
    }

    #[test]
    fn check_sealed_session_rejects_writes() {
        let mut session = session();
        let handle = session
            .declare_variable("CLK", 32, Direction::Output)
            .unwrap();
        session.emit_time(0).unwrap();
        session.emit_value(handle, 32, 0).unwrap();
        session.finalize().unwrap();

        assert_eq!(
            session.emit_time(1),
            Err(TraceFileError::SessionAlreadySealed)
        );
        assert_eq!(
            session.emit_value(handle, 32, 1),
            Err(TraceFileError::SessionAlreadySealed)
        );
        assert_eq!(
            session.declare_variable("PC", 5, Direction::Output),
            Err(TraceFileError::SessionAlreadySealed)
        );
        assert_eq!(
            session.set_comment("late"),
            Err(TraceFileError::SessionAlreadySealed)
        );
    }

    #[test]
    fn check_unknown_handle_rejected() {
        let mut session = session();
        session.emit_time(0).unwrap();
        let result = session.emit_value(VarHandle(3), 32, 0);
        assert_eq!(result, Err(TraceFileError::UnknownHandle(3)));
    }

    fn write_example(finalize_calls: usize) -> Vec<u8> {
        let mut session = session();
        session.set_comment("example").unwrap();
        let clk = session
            .declare_variable("CLK", 32, Direction::Output)
            .unwrap();
        let pc = session.declare_variable("PC", 5, Direction::Output).unwrap();
        session.emit_time(0).unwrap();
        session.emit_value(clk, 32, 0).unwrap();
        session.emit_value(pc, 5, 0).unwrap();
        session.emit_time(1).unwrap();
        session.emit_value(clk, 32, 1).unwrap();
        for _ in 0..finalize_calls {
            session.finalize().unwrap();
        }
        session.into_inner().into_inner()
    }

    #[test]
    fn check_finalize_is_idempotent() {
        let once = write_example(1);
        let twice = write_example(2);
        assert_eq!(once, twice);
    }

    #[test]
    fn check_header_marks_unsealed_file() {
        let bytes = write_example(0);
        // Sealed marker at offset 8 stays zero without finalize
        assert_eq!(bytes[8], 0);
        let bytes = write_example(1);
        assert_eq!(bytes[8], 1);
    }
}
