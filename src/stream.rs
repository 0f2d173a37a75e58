use rand_core::{impls, Error as RandError, RngCore};

use crate::array::DynArray;
use crate::error::{Error, Result};
use crate::key::KeyArray;

/// Words drawn per fold-in.
pub const STREAM_BLOCK: usize = 256;

/// Sequential generator over a single key.
///
/// Block `i` of the stream is `random_bits(fold_in(key, i), 32, [STREAM_BLOCK])`, so the stream
/// is a pure function of the key and any block can be reached directly with `set_block`.
/// The block index is 32 bits: the stream repeats after `2**32` blocks.
#[derive(Clone)]
pub struct KeyStream {
    key: KeyArray,
    /// Index of the next block to draw.
    block: u32,
    buffer: Vec<u32>,
    /// Next unread word of `buffer`.
    index: usize,
}

// Key material stays private.
impl core::fmt::Debug for KeyStream {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "KeyStream[{}] {{}}", self.key.prng_impl().tag)
    }
}

impl KeyStream {
    /// Creates a stream positioned at block 0. The key must be a single `uint32` key.
    pub fn new(key: KeyArray) -> Result<Self> {
        if !key.is_scalar() {
            return Err(Error::shape(format!("a key stream needs a single key; got key array of shape {:?}", key.shape())));
        }
        let mut stream = KeyStream { key, block: 0, buffer: Vec::new(), index: 0 };
        stream.refill()?;
        Ok(stream)
    }

    fn refill(&mut self) -> Result<()> {
        let bits = self.key.fold_in(self.block)?.random_bits(32, &[STREAM_BLOCK])?;
        self.buffer = match bits {
            DynArray::U32(words) => words.into_vec(),
            other => return Err(Error::shape(format!("expected uint32 words; got {}", other.dtype()))),
        };
        self.block = self.block.wrapping_add(1);
        self.index = 0;
        Ok(())
    }

    /// Moves to the start of block `block`.
    pub fn set_block(&mut self, block: u32) {
        self.block = block;
        self.index = self.buffer.len();
    }

    /// Generates the next 32-bit word, or the error of the block that could not be drawn.
    pub fn try_next(&mut self) -> Result<u32> {
        if self.index == self.buffer.len() {
            self.refill()?;
        }
        let x = self.buffer[self.index];
        self.index += 1;
        Ok(x)
    }

    /// Generates the next 32-bit word.
    ///
    /// # Panics
    ///
    /// Panics if the implementation fails to draw a block. The built-in implementations never do;
    /// use `try_next` or `try_fill_bytes` for others.
    pub fn next(&mut self) -> u32 {
        match self.try_next() {
            Ok(x) => x,
            Err(e) => panic!("key stream block {} failed: {}", self.block, e),
        }
    }
}

impl RngCore for KeyStream {
    fn next_u32(&mut self) -> u32 {
        self.next()
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> core::result::Result<(), RandError> {
        for chunk in dest.chunks_mut(4) {
            let x = self.try_next().map_err(RandError::new)?;
            chunk.copy_from_slice(&x.to_le_bytes()[.. chunk.len()]);
        }
        Ok(())
    }
}
