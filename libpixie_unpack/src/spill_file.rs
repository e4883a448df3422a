//! Reading of the length-prefixed binary spill stream: each spill is a
//! little-endian `u32` word count followed by that many 16-bit words.

use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};

use super::constants::{MAX_MODULE_WORDS, MAX_VSN, RAW_WORDS_PER_LIST_WORD};
use super::error::SpillFileError;

/// No spill can exceed a full crate of maximum-size module records.
const MAX_SPILL_WORDS: u32 = MAX_MODULE_WORDS * MAX_VSN * RAW_WORDS_PER_LIST_WORD as u32;

#[derive(Debug)]
pub struct SpillFile {
    reader: BufReader<File>,
    size_bytes: u64,
    bytes_read: u64,
}

impl SpillFile {
    pub fn new(path: &Path) -> Result<Self, SpillFileError> {
        if !path.exists() {
            return Err(SpillFileError::BadFilePath(PathBuf::from(path)));
        }
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        Ok(SpillFile {
            reader: BufReader::new(file),
            size_bytes,
            bytes_read: 0,
        })
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Fraction of the file consumed so far, for progress reporting.
    pub fn progress(&self) -> f32 {
        if self.size_bytes == 0 {
            return 1.0;
        }
        self.bytes_read as f32 / self.size_bytes as f32
    }

    /// Read the next spill. A clean end of file is its own error variant so
    /// the caller can tell it apart from a torn read.
    pub fn get_next_spill(&mut self) -> Result<Vec<u16>, SpillFileError> {
        let word_count = match self.reader.read_u32::<LittleEndian>() {
            Ok(count) => count,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(SpillFileError::EndOfFile)
            }
            Err(e) => return Err(SpillFileError::IOError(e)),
        };
        if word_count > MAX_SPILL_WORDS {
            return Err(SpillFileError::OversizedSpill(word_count));
        }

        let mut words = vec![0u16; word_count as usize];
        self.reader.read_u16_into::<LittleEndian>(&mut words)?;
        self.bytes_read += 4 + 2 * word_count as u64;
        Ok(words)
    }
}
