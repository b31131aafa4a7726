//! Trace File Reading
//!
//! A minimal reader for the trace format: enough to recover the
//! header, directory, block index and the ordered change events,
//! for verifying written files and for the `tracedump` tool. It is
//! not a viewer. Files whose header was never patched by finalize
//! are rejected as incomplete.

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::ZlibDecoder;

use super::{
    read_varuint, BlockRecord, Compression, Direction, TraceFileError, VarHandle,
    VariableRecord, HEADER_LENGTH, MAGIC,
};

/// One recovered value change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub time: u64,
    pub handle: VarHandle,
    pub value: u32,
}

/// Parsed trace file, with the body left on disk until
/// [`TraceReader::read_events`] is called
pub struct TraceReader<R: Read + Seek> {
    reader: R,
    compression: Compression,
    timescale_exponent: i8,
    end_time: u64,
    comment: String,
    directory: Vec<VariableRecord>,
    index: Vec<BlockRecord>,
}

impl TraceReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TraceFileError> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> TraceReader<R> {
    /// Parse the header, directory and block index
    pub fn new(mut reader: R) -> Result<Self, TraceFileError> {
        reader.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; HEADER_LENGTH as usize];
        reader.read_exact(&mut header)?;

        if header[0..4] != MAGIC {
            return Err(TraceFileError::BadMagic);
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != super::FORMAT_VERSION {
            return Err(TraceFileError::UnsupportedVersion(version));
        }
        let compression = Compression::from_byte(header[6])?;
        let timescale_exponent = header[7] as i8;
        if header[8] == 0 {
            return Err(TraceFileError::NotSealed);
        }
        let end_time = u64::from_le_bytes(header[12..20].try_into().expect("8 bytes"));
        let block_count = u32::from_le_bytes(header[20..24].try_into().expect("4 bytes"));
        let directory_offset =
            u64::from_le_bytes(header[24..32].try_into().expect("8 bytes"));
        let comment_end = header[32..]
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(header.len() - 32);
        let comment = String::from_utf8(header[32..32 + comment_end].to_vec())
            .map_err(|_| TraceFileError::Corrupt("comment is not UTF-8".to_string()))?;

        reader.seek(SeekFrom::Start(directory_offset))?;
        let variable_count = read_varuint(&mut reader)?;
        let mut directory = Vec::new();
        for _ in 0..variable_count {
            let handle = VarHandle(read_varuint(&mut reader)? as u32);
            let name_length = read_varuint(&mut reader)? as usize;
            let mut name = vec![0u8; name_length];
            reader.read_exact(&mut name)?;
            let name = String::from_utf8(name)
                .map_err(|_| TraceFileError::Corrupt("name is not UTF-8".to_string()))?;
            let bit_width = read_varuint(&mut reader)? as u32;
            let mut direction = [0u8; 1];
            reader.read_exact(&mut direction)?;
            directory.push(VariableRecord {
                handle,
                name,
                bit_width,
                direction: Direction::from_byte(direction[0])?,
            });
        }

        let index_count = read_varuint(&mut reader)?;
        if index_count != u64::from(block_count) {
            return Err(TraceFileError::Corrupt(format!(
                "header promises {block_count} blocks but the index holds {index_count}"
            )));
        }
        let mut index = Vec::new();
        for _ in 0..index_count {
            index.push(BlockRecord {
                start_time: read_varuint(&mut reader)?,
                offset: read_varuint(&mut reader)?,
                stored_length: read_varuint(&mut reader)? as u32,
            });
        }

        Ok(Self {
            reader,
            compression,
            timescale_exponent,
            end_time,
            comment,
            directory,
            index,
        })
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn directory(&self) -> &[VariableRecord] {
        &self.directory
    }

    pub fn blocks(&self) -> &[BlockRecord] {
        &self.index
    }

    pub fn end_time(&self) -> u64 {
        self.end_time
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn timescale_exponent(&self) -> i8 {
        self.timescale_exponent
    }

    /// Decode every block into the ordered list of change events.
    /// Time steps that recorded no changes contribute nothing.
    pub fn read_events(&mut self) -> Result<Vec<ChangeEvent>, TraceFileError> {
        let mut events = Vec::new();
        let blocks = self.index.clone();
        for block in blocks {
            self.reader.seek(SeekFrom::Start(block.offset))?;
            let mut block_header = [0u8; 20];
            self.reader.read_exact(&mut block_header)?;
            let start_time =
                u64::from_le_bytes(block_header[0..8].try_into().expect("8 bytes"));
            let step_count =
                u32::from_le_bytes(block_header[8..12].try_into().expect("4 bytes"));
            let raw_length =
                u32::from_le_bytes(block_header[12..16].try_into().expect("4 bytes"));
            let stored_length =
                u32::from_le_bytes(block_header[16..20].try_into().expect("4 bytes"));
            if stored_length != block.stored_length || start_time != block.start_time {
                return Err(TraceFileError::Corrupt(
                    "block header disagrees with the index".to_string(),
                ));
            }

            let mut stored = vec![0u8; stored_length as usize];
            self.reader.read_exact(&mut stored)?;
            let payload = match self.compression {
                Compression::None => stored,
                Compression::Block => {
                    let mut raw = Vec::with_capacity(raw_length as usize);
                    ZlibDecoder::new(&stored[..]).read_to_end(&mut raw)?;
                    raw
                }
            };
            if payload.len() != raw_length as usize {
                return Err(TraceFileError::Corrupt(
                    "block payload length disagrees with its header".to_string(),
                ));
            }

            let mut cursor = Cursor::new(&payload[..]);
            let mut time = start_time;
            for _ in 0..step_count {
                time += read_varuint(&mut cursor)?;
                let change_count = read_varuint(&mut cursor)?;
                for _ in 0..change_count {
                    let handle = read_varuint(&mut cursor)? as u32;
                    if handle as usize >= self.directory.len() {
                        return Err(TraceFileError::UnknownHandle(handle));
                    }
                    let value = read_varuint(&mut cursor)?;
                    let value = u32::try_from(value).map_err(|_| {
                        TraceFileError::Corrupt(format!("value 0x{value:x} exceeds 32 bits"))
                    })?;
                    events.push(ChangeEvent {
                        time,
                        handle: VarHandle(handle),
                        value,
                    });
                }
            }
            if cursor.position() != payload.len() as u64 {
                return Err(TraceFileError::Corrupt(
                    "trailing bytes after the last time step".to_string(),
                ));
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::trace_file::writer::Session;

    fn events_of(compression: Compression) -> (Vec<ChangeEvent>, Vec<VarHandle>) {
        let mut session = Session::new(Cursor::new(Vec::new()), compression).unwrap();
        session.set_comment("round trip").unwrap();
        let clk = session
            .declare_variable("CLK", 32, Direction::Output)
            .unwrap();
        let gpio = session
            .declare_variable("GPIO", 32, Direction::Output)
            .unwrap();

        session.emit_time(0).unwrap();
        session.emit_value(clk, 32, 0).unwrap();
        session.emit_value(gpio, 32, 0).unwrap();

        session.emit_time(1).unwrap();
        session.emit_value(clk, 32, 1).unwrap();
        session.emit_value(gpio, 32, 1).unwrap();

        session.emit_time(2).unwrap();
        session.emit_value(clk, 32, 2).unwrap();
        // GPIO unchanged: dropped by change compression
        session.emit_value(gpio, 32, 1).unwrap();

        session.finalize().unwrap();
        let mut reader = TraceReader::new(session.into_inner()).unwrap();
        assert_eq!(reader.comment(), "round trip");
        (reader.read_events().unwrap(), vec![clk, gpio])
    }

    fn expected_events(clk: VarHandle, gpio: VarHandle) -> Vec<ChangeEvent> {
        vec![
            ChangeEvent {
                time: 0,
                handle: clk,
                value: 0,
            },
            ChangeEvent {
                time: 0,
                handle: gpio,
                value: 0,
            },
            ChangeEvent {
                time: 1,
                handle: clk,
                value: 1,
            },
            ChangeEvent {
                time: 1,
                handle: gpio,
                value: 1,
            },
            ChangeEvent {
                time: 2,
                handle: clk,
                value: 2,
            },
        ]
    }

    #[test]
    fn check_round_trip_with_block_compression() {
        let (events, handles) = events_of(Compression::Block);
        assert_eq!(events, expected_events(handles[0], handles[1]));
    }

    #[test]
    fn check_round_trip_without_compression() {
        let (events, handles) = events_of(Compression::None);
        assert_eq!(events, expected_events(handles[0], handles[1]));
    }

    #[test]
    fn check_unsealed_file_rejected() {
        let mut session = Session::new(Cursor::new(Vec::new()), Compression::Block).unwrap();
        session
            .declare_variable("CLK", 32, Direction::Output)
            .unwrap();
        session.emit_time(0).unwrap();
        // No finalize
        let result = TraceReader::new(session.into_inner()).err();
        assert_eq!(result, Some(TraceFileError::NotSealed));
    }

    #[test]
    fn check_bad_magic_rejected() {
        let bytes = vec![0u8; HEADER_LENGTH as usize];
        let result = TraceReader::new(Cursor::new(bytes)).err();
        assert_eq!(result, Some(TraceFileError::BadMagic));
    }

    #[test]
    fn check_block_flush_at_step_threshold() {
        let mut session = Session::new(Cursor::new(Vec::new()), Compression::Block).unwrap();
        let clk = session
            .declare_variable("CLK", 32, Direction::Output)
            .unwrap();
        let steps = super::super::BLOCK_MAX_STEPS + 10;
        for time in 0..u64::from(steps) {
            session.emit_time(time).unwrap();
            session.emit_value(clk, 32, time as u32).unwrap();
        }
        session.finalize().unwrap();

        let mut reader = TraceReader::new(session.into_inner()).unwrap();
        assert_eq!(reader.blocks().len(), 2);
        assert_eq!(reader.end_time(), u64::from(steps) - 1);
        let events = reader.read_events().unwrap();
        assert_eq!(events.len(), steps as usize);
        for (time, event) in events.iter().enumerate() {
            assert_eq!(event.time, time as u64);
            assert_eq!(event.value, time as u32);
        }
    }

    #[test]
    fn check_directory_round_trip() {
        let mut session = Session::new(Cursor::new(Vec::new()), Compression::Block).unwrap();
        session.declare_variable("PC", 5, Direction::Output).unwrap();
        session
            .declare_variable("DIN", 1, Direction::Input)
            .unwrap();
        session.finalize().unwrap();

        let reader = TraceReader::new(session.into_inner()).unwrap();
        let directory = reader.directory();
        assert_eq!(directory.len(), 2);
        assert_eq!(directory[0].name, "PC");
        assert_eq!(directory[0].bit_width, 5);
        assert_eq!(directory[0].direction, Direction::Output);
        assert_eq!(directory[1].name, "DIN");
        assert_eq!(directory[1].bit_width, 1);
        assert_eq!(directory[1].direction, Direction::Input);
    }
}
