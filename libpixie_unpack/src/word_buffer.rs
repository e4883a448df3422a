use super::constants::RAW_WORDS_PER_LIST_WORD;
use super::error::WordBufferError;

/// A read cursor over the raw 16-bit words of a spill.
///
/// The digitizer readout delivers 16-bit words, but the list-mode headers are
/// defined in 32-bit words. Consecutive raw words pair little-endian (low
/// half first) into one list-mode word, while trace samples are read as raw
/// 16-bit values, two per list-mode word. Every read is bounds checked; an
/// underrun is an error, never a silent truncation.
#[derive(Debug, Clone)]
pub struct WordBuffer<'a> {
    raw: &'a [u16],
    position: usize,
}

impl<'a> WordBuffer<'a> {
    pub fn new(raw: &'a [u16]) -> Self {
        WordBuffer { raw, position: 0 }
    }

    /// Position of the cursor in raw (16-bit) words.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Position of the cursor in list-mode (32-bit) words.
    pub fn list_position(&self) -> usize {
        self.position / RAW_WORDS_PER_LIST_WORD
    }

    /// Number of raw words left in the buffer.
    pub fn remaining(&self) -> usize {
        self.raw.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read the next list-mode word, pairing two raw words low half first.
    pub fn read_word(&mut self) -> Result<u32, WordBufferError> {
        let word = self.peek_word()?;
        self.position += RAW_WORDS_PER_LIST_WORD;
        Ok(word)
    }

    /// Read the next list-mode word without advancing the cursor.
    pub fn peek_word(&self) -> Result<u32, WordBufferError> {
        if self.remaining() < RAW_WORDS_PER_LIST_WORD {
            return Err(WordBufferError::Underrun(
                self.list_position(),
                self.remaining(),
            ));
        }
        let low = self.raw[self.position] as u32;
        let high = self.raw[self.position + 1] as u32;
        Ok(low | (high << 16))
    }

    /// Read `count` list-mode words.
    pub fn read_words(&mut self, count: usize) -> Result<Vec<u32>, WordBufferError> {
        let mut words = Vec::with_capacity(count);
        for _ in 0..count {
            words.push(self.read_word()?);
        }
        Ok(words)
    }

    /// Read `count` raw 16-bit trace samples. Trace data is padded to a whole
    /// number of list-mode words, so an odd sample count still consumes an
    /// even number of raw words.
    pub fn read_samples(&mut self, count: usize) -> Result<Vec<u16>, WordBufferError> {
        let consumed = count.div_ceil(RAW_WORDS_PER_LIST_WORD) * RAW_WORDS_PER_LIST_WORD;
        if self.remaining() < consumed {
            return Err(WordBufferError::TraceUnderrun(
                count,
                self.list_position(),
                self.remaining(),
            ));
        }
        let samples = self.raw[self.position..self.position + count].to_vec();
        self.position += consumed;
        Ok(samples)
    }

}

/// Split 32-bit list-mode words into the raw 16-bit stream, low half first,
/// the way the scanor boundary delivers them. Test helper shared across the
/// crate.
#[cfg(test)]
pub fn to_raw(words: &[u32]) -> Vec<u16> {
    let mut raw = Vec::with_capacity(words.len() * 2);
    for w in words {
        raw.push((w & 0xFFFF) as u16);
        raw.push((w >> 16) as u16);
    }
    raw
}
