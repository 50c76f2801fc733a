use std::io::Read;

use thiserror::Error;

use crate::entry::ENTRY_MAX_DATA_LEN;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("invalid size: expected {expected} bytes but the data ended after {read}")]
    Short { expected: u64, read: u64 },
    #[error("invalid size: data is longer than the expected {expected} bytes")]
    Long { expected: u64 },
}

/// Number of Data Blocks needed to hold `size` bytes.
pub fn block_count(size: u64) -> usize {
    size.div_ceil(ENTRY_MAX_DATA_LEN as u64) as usize
}

// Fill as much of buf as the reader allows, returning (eof, bytes read)
fn fill_buf<R: Read>(data: &mut R, buf: &mut [u8]) -> std::io::Result<(bool, usize)> {
    let mut buf_read = 0;

    while buf_read < buf.len() {
        match data.read(&mut buf[buf_read..]) {
            Ok(0) => return Ok((true, buf_read)),
            Ok(x) => buf_read += x,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
    }
    Ok((false, buf_read))
}

/// Splits a stream of exactly `size` bytes into Data Block contents.
///
/// Every block is [`ENTRY_MAX_DATA_LEN`] bytes except the last which holds the
/// remainder. The stream must hold exactly `size` bytes, a short or long stream
/// is reported as an error rather than truncated or padded.
pub struct Chunk<R: Read> {
    inner: R,
    size: u64,
    read: u64,
    done: bool,
}

impl<R: Read> Chunk<R> {
    pub fn new(reader: R, size: u64) -> Self {
        Chunk {
            inner: reader,
            size,
            read: 0,
            done: false,
        }
    }

    pub fn block_count(&self) -> usize {
        block_count(self.size)
    }

    fn next_block(&mut self) -> Result<Option<Vec<u8>>, ChunkError> {
        let remaining = self.size - self.read;
        if remaining == 0 {
            // Probe for trailing data
            self.done = true;
            let mut probe = [0u8; 1];
            return match fill_buf(&mut self.inner, &mut probe)? {
                (true, 0) => Ok(None),
                _ => Err(ChunkError::Long { expected: self.size }),
            };
        }

        let len = remaining.min(ENTRY_MAX_DATA_LEN as u64) as usize;
        let mut block = vec![0u8; len];

        let (_, read) = fill_buf(&mut self.inner, &mut block)?;
        self.read += read as u64;

        if read < len {
            self.done = true;
            return Err(ChunkError::Short {
                expected: self.size,
                read: self.read,
            });
        }
        Ok(Some(block))
    }
}

impl<R: Read> Iterator for Chunk<R> {
    type Item = Result<Vec<u8>, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_block() {
            Ok(None) => None,
            Ok(Some(block)) => Some(Ok(block)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
