use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use flate2::{Decompress, FlushDecompress, Status};

use crate::consts;
use crate::error::{ExtractError, Result};

const CHUNK_LENGTH_SIZE: usize = 2;

/// How each chunk is handed to the inflate engine.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum InflateMode {
    /// Inflate the whole chunk in one call and expect it to end the stream.
    #[default]
    SingleCall,
    /// Inflate block by block until at most one input byte is left.  Needed
    /// for cabinets written by the legacy encoder, whose chunks never set
    /// the final-block bit.
    StepWise,
}

/// Inflates the length-prefixed raw-deflate chunks that make up a
/// compressed file.
pub struct ChunkDecompressor {
    decompressor: Decompress,
    mode: InflateMode,
    input: Vec<u8>,
    output: Vec<u8>,
    tolerated_errors: usize,
}

impl ChunkDecompressor {
    /// Creates a decompressor that inflates chunks the given way.
    pub fn new(mode: InflateMode) -> ChunkDecompressor {
        ChunkDecompressor {
            decompressor: Decompress::new(false),
            mode,
            input: Vec::with_capacity(u16::MAX as usize + 1),
            output: vec![0u8; consts::BUFFER_SIZE],
            tolerated_errors: 0,
        }
    }

    /// Returns how many chunks produced a data error that was ignored.
    pub fn tolerated_errors(&self) -> usize {
        self.tolerated_errors
    }

    /// Inflates one chunk (without its length prefix) and returns the
    /// plaintext.
    pub fn decompress_chunk(&mut self, chunk: &[u8]) -> Result<&[u8]> {
        self.decompressor.reset(false);
        self.input.clear();
        self.input.extend_from_slice(chunk);
        // Trailing zero lets inflate stop cleanly on truncated streams.
        self.input.push(0);
        let produced = match self.mode {
            InflateMode::SingleCall => self.inflate_single_call()?,
            InflateMode::StepWise => self.inflate_step_wise()?,
        };
        Ok(&self.output[..produced])
    }

    fn inflate_single_call(&mut self) -> Result<usize> {
        let result = self.decompressor.decompress(
            &self.input,
            &mut self.output,
            FlushDecompress::Finish,
        );
        match result {
            Ok(Status::Ok) | Ok(Status::StreamEnd) => {}
            Ok(Status::BufError) => {
                return Err(ExtractError::DecompressionError(format!(
                    "inflate could not finish the chunk \
                     ({} of {} input bytes consumed)",
                    self.decompressor.total_in(),
                    self.input.len()
                )));
            }
            Err(error) => self.tolerate(error)?,
        }
        Ok(self.decompressor.total_out() as usize)
    }

    fn inflate_step_wise(&mut self) -> Result<usize> {
        while self.input.len() - self.decompressor.total_in() as usize > 1 {
            let consumed = self.decompressor.total_in() as usize;
            let produced = self.decompressor.total_out() as usize;
            let result = self.decompressor.decompress(
                &self.input[consumed..],
                &mut self.output[produced..],
                FlushDecompress::None,
            );
            match result {
                Ok(Status::Ok) => {}
                Ok(Status::StreamEnd) => break,
                Ok(Status::BufError) => {
                    return Err(ExtractError::DecompressionError(
                        "inflate step returned a buffer error".to_string(),
                    ));
                }
                Err(error) => {
                    self.tolerate(error)?;
                    break;
                }
            }
            if self.decompressor.total_in() as usize == consumed
                && self.decompressor.total_out() as usize == produced
            {
                return Err(ExtractError::DecompressionError(format!(
                    "inflate made no progress at input byte {}",
                    consumed
                )));
            }
        }
        Ok(self.decompressor.total_out() as usize)
    }

    /// Data errors still leave the bytes inflated so far usable: the check
    /// that trips is one the format never relied on.  Anything else fails.
    fn tolerate(&mut self, error: flate2::DecompressError) -> Result<()> {
        if error.needs_dictionary().is_some() {
            return Err(ExtractError::DecompressionError(error.to_string()));
        }
        tracing::debug!(
            "Ignoring inflate data error after {} bytes: {}",
            self.decompressor.total_out(),
            error
        );
        self.tolerated_errors += 1;
        Ok(())
    }
}

/// Reads one chunk from `reader` into `buf`: a little-endian u16 length
/// followed by that many bytes.  Returns the number of bytes the chunk
/// occupied, including its length prefix.
pub fn read_chunk<R: Read>(reader: &mut R, buf: &mut Vec<u8>) -> Result<u64> {
    let mut prefix = Vec::with_capacity(CHUNK_LENGTH_SIZE);
    let got = reader
        .by_ref()
        .take(CHUNK_LENGTH_SIZE as u64)
        .read_to_end(&mut prefix)?;
    if got < CHUNK_LENGTH_SIZE {
        return Err(ExtractError::truncated(CHUNK_LENGTH_SIZE as u64, got as u64));
    }
    let length = LittleEndian::read_u16(&prefix) as u64;
    buf.clear();
    let got = reader.by_ref().take(length).read_to_end(buf)? as u64;
    if got < length {
        return Err(ExtractError::truncated(length, got));
    }
    Ok(CHUNK_LENGTH_SIZE as u64 + length)
}
