use wrapping_arithmetic::wrappit;
#[cfg(feature = "serde")] use serde::{Deserialize, Serialize};
use rand_core::{impls, Error as RandError, RngCore, SeedableRng};
use tracing::trace;

use crate::array::{shape_size, Array, DynArray};
use crate::bits::{check_bit_width, word_count, words_to_bits};
use crate::error::{Error, Result};
use crate::prng::{key_words, PrngImpl};
use crate::threefry::{fold_in_words, seed_words, split_words, threefry_seed};

// Keys of the bulk-generator implementations are four words: two Threefry keys side by side.
// Seeding, splitting and folding either work on both halves with Threefry (rbg), or draw
// from the bulk generator itself (unsafe_rbg). Bits always come from the bulk generator,
// counter-mode Philox-4x32-10 (Salmon, Moraes, Dror and Shaw, 2011).
// The rbg variants carry no proof that sibling keys give independent streams.

pub const PHILOX_M0: u32 = 0xD2511F53;
pub const PHILOX_M1: u32 = 0xCD9E8D57;
/// Key schedule increments (golden ratio and sqrt(3) - 1).
pub const PHILOX_W0: u32 = 0x9E3779B9;
pub const PHILOX_W1: u32 = 0xBB67AE85;

/// Rows of bulk output drawn per child key by `unsafe_rbg` split.
const UNSAFE_SPLIT_STRIDE: usize = 10;

#[wrappit] #[inline]
fn philox_round(ctr: [u32; 4], key: [u32; 2]) -> [u32; 4] {
    let p0 = (PHILOX_M0 as u64) * (ctr[0] as u64);
    let p1 = (PHILOX_M1 as u64) * (ctr[2] as u64);
    [((p1 >> 32) as u32) ^ ctr[1] ^ key[0], p1 as u32, ((p0 >> 32) as u32) ^ ctr[3] ^ key[1], p0 as u32]
}

/// Philox-4x32 with 10 rounds: one 128-bit counter block under a 64-bit key.
#[wrappit]
pub fn philox4x32_10(key: [u32; 2], ctr: [u32; 4]) -> [u32; 4] {
    let mut key = key;
    let mut ctr = philox_round(ctr, key);
    for _ in 1 .. 10 {
        key = [key[0] + PHILOX_W0, key[1] + PHILOX_W1];
        ctr = philox_round(ctr, key);
    }
    ctr
}

/// Counter-mode Philox-4x32-10 generator over a 128-bit state.
///
/// State words 0 and 1 are the Philox key, words 2 and 3 select the stream.
/// Block `i` of the stream is the hash of the counter `(lo32(i), hi32(i), state[2], state[3])`,
/// and the generator yields the words of blocks `0, 1, 2, ...` in order.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Eq, PartialEq)]
pub struct Philox4x32 {
    state: [u32; 4],
    /// Index of the next block to hash.
    block: u64,
    buffer: [u32; 4],
    /// Next unread word of `buffer`; 4 when the buffer is exhausted.
    index: usize,
}

// Internal state stays private.
impl core::fmt::Debug for Philox4x32 {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "Philox4x32 {{}}")
    }
}

impl Philox4x32 {
    /// Creates a generator at position 0 of the stream given by `state`.
    pub fn new(state: [u32; 4]) -> Self {
        Philox4x32 { state, block: 0, buffer: [0; 4], index: 4 }
    }

    pub fn state(&self) -> [u32; 4] {
        self.state
    }

    /// Words of block `i`. Any block can be computed directly.
    #[inline] pub fn block(&self, i: u64) -> [u32; 4] {
        philox4x32_10([self.state[0], self.state[1]], [i as u32, (i >> 32) as u32, self.state[2], self.state[3]])
    }

    /// Generates the next 32-bit word.
    #[wrappit] #[inline]
    pub fn next(&mut self) -> u32 {
        if self.index == 4 {
            self.buffer = self.block(self.block);
            self.block += 1;
            self.index = 0;
        }
        let x = self.buffer[self.index];
        self.index += 1;
        x
    }

    /// Number of words generated so far.
    pub fn position(&self) -> u128 {
        ((self.block as u128) << 2) - (4 - self.index) as u128
    }

    /// Moves to word `position` of the stream.
    pub fn set_position(&mut self, position: u128) {
        self.block = (position >> 2) as u64;
        self.index = 4;
        for _ in 0 .. position & 3 {
            self.next();
        }
    }

    /// State of the stream that follows this one: words 2 and 3 taken as a little-endian
    /// 64-bit integer and incremented.
    pub fn next_state(&self) -> [u32; 4] {
        let stream = ((self.state[3] as u64) << 32 | self.state[2] as u64).wrapping_add(1);
        [self.state[0], self.state[1], stream as u32, (stream >> 32) as u32]
    }
}

impl RngCore for Philox4x32 {
    fn next_u32(&mut self) -> u32 {
        self.next()
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let bytes = dest.len();
        let mut i = 0;
        while i < bytes {
            let x = self.next();
            let j = bytes.min(i + 4);
            // Always use Little-Endian.
            dest[i .. j].copy_from_slice(&x.to_le_bytes()[0 .. (j - i)]);
            i = j;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> core::result::Result<(), RandError> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for Philox4x32 {
    type Seed = [u8; 16];

    /// Creates a generator from 16 little-endian bytes of state.
    fn from_seed(seed: Self::Seed) -> Self {
        let mut state = [0u32; 4];
        for (word, chunk) in state.iter_mut().zip(seed.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Philox4x32::new(state)
    }
}

/// Draws `bit_width`-bit values of the given shape from the stream of `state`.
/// Returns the state of the next stream along with the bits.
pub fn rng_bit_generator(state: [u32; 4], bit_width: u32, shape: &[usize]) -> Result<([u32; 4], DynArray)> {
    check_bit_width(bit_width)?;
    let count = word_count(bit_width, shape_size(shape))?;
    trace!(count, bit_width, "drawing from bulk generator");
    let mut philox = Philox4x32::new(state);
    let words: Vec<u32> = (0 .. count).map(|_| philox.next()).collect();
    Ok((philox.next_state(), words_to_bits(words, bit_width, shape)?))
}

fn halves(key: [u32; 4]) -> ([u32; 2], [u32; 2]) {
    ([key[0], key[1]], [key[2], key[3]])
}

/// Raw key `[hi, lo, hi, lo]` from a scalar seed.
pub fn rbg_seed(seed: &Array<i64>) -> Result<Array<u32>> {
    let half = threefry_seed(seed)?.into_vec();
    Ok(Array::from_vec([half.as_slice(), half.as_slice()].concat()))
}

/// Splits both halves with Threefry. Child `j` is `[split(half0)[j], split(half1)[j]]`.
pub fn rbg_split(key: &Array<u32>, num: usize) -> Result<Array<u32>> {
    let (h0, h1) = halves(key_words::<4>(key, "rbg_split")?);
    let (s0, s1) = (split_words(h0, num)?, split_words(h1, num)?);
    let data = s0.chunks_exact(2).zip(s1.chunks_exact(2)).flat_map(|(a, b)| [a[0], a[1], b[0], b[1]]).collect();
    Array::new(vec![num, 4], data)
}

/// Folds scalar `data` into both halves with Threefry.
pub fn rbg_fold_in(key: &Array<u32>, data: &Array<u32>) -> Result<Array<u32>> {
    if data.ndim() != 0 {
        return Err(Error::FoldInDataNotScalar(data.shape().to_vec()));
    }
    let (h0, h1) = halves(key_words::<4>(key, "rbg_fold_in")?);
    let d = data.item()?;
    let (f0, f1) = (fold_in_words(h0, d)?, fold_in_words(h1, d)?);
    Ok(Array::from_vec(vec![f0[0], f0[1], f1[0], f1[1]]))
}

/// Samples `bit_width`-bit unsigned integers of the given shape from the bulk generator.
pub fn rbg_random_bits(key: &Array<u32>, bit_width: u32, shape: &[usize]) -> Result<DynArray> {
    if key.shape() != [4] {
        return Err(Error::InvalidKey("rbg_random_bits"));
    }
    check_bit_width(bit_width)?;
    let (_, bits) = rng_bit_generator(key_words::<4>(key, "rbg_random_bits")?, bit_width, shape)?;
    Ok(bits)
}

/// Child `j` is row `10 j` of the bulk generator output with state `key`.
pub fn unsafe_rbg_split(key: &Array<u32>, num: usize) -> Result<Array<u32>> {
    let state = key_words::<4>(key, "unsafe_rbg_split")?;
    let rows = num
        .checked_mul(UNSAFE_SPLIT_STRIDE)
        .ok_or_else(|| Error::shape(format!("cannot split a key into {} keys", num)))?;
    let (_, bits) = rng_bit_generator(state, 32, &[rows, 4])?;
    let words = bits.as_u32().ok_or_else(|| Error::shape("bulk generator returned non-uint32 words"))?;
    let children: Vec<usize> = (0 .. num).map(|j| j * UNSAFE_SPLIT_STRIDE).collect();
    words.take(&children)
}

/// XORs the key with the last of ten rows drawn from a bulk generator seeded by `data`.
/// The mask ignores the key, so two fold-ins give the same key in either order.
pub fn unsafe_rbg_fold_in(key: &Array<u32>, data: &Array<u32>) -> Result<Array<u32>> {
    if data.ndim() != 0 {
        return Err(Error::FoldInDataNotScalar(data.shape().to_vec()));
    }
    let state = key_words::<4>(key, "unsafe_rbg_fold_in")?;
    let half = seed_words(data.item()? as u64);
    let (_, bits) = rng_bit_generator([half[0], half[1], half[0], half[1]], 32, &[UNSAFE_SPLIT_STRIDE, 4])?;
    let words = bits.as_u32().ok_or_else(|| Error::shape("bulk generator returned non-uint32 words"))?;
    let last = &words.data()[4 * (UNSAFE_SPLIT_STRIDE - 1) ..];
    Ok(Array::from_vec(state.iter().zip(last.iter()).map(|(k, x)| k ^ x).collect()))
}

/// Threefry-derived 4-word keys with bits from the bulk generator.
pub static RBG_PRNG_IMPL: PrngImpl = PrngImpl::new(
    &[4],
    rbg_seed,
    rbg_split,
    rbg_random_bits,
    rbg_fold_in,
    "rbg",
);

/// Like `RBG_PRNG_IMPL`, but split and fold-in also draw from the bulk generator.
pub static UNSAFE_RBG_PRNG_IMPL: PrngImpl = PrngImpl::new(
    &[4],
    rbg_seed,
    unsafe_rbg_split,
    rbg_random_bits,
    unsafe_rbg_fold_in,
    "urbg",
);

#[cfg(test)] mod tests {
    use super::*;
    use crate::threefry::{threefry_fold_in, threefry_split};

    #[test] pub fn philox_known_answers() {
        // Reference vectors for Philox-4x32-10.
        assert_eq!(philox4x32_10([0, 0], [0, 0, 0, 0]), [0x6627e8d5, 0xe169c58d, 0xbc57ac4c, 0x9b00dbd8]);
        assert_eq!(
            philox4x32_10([0xffffffff, 0xffffffff], [0xffffffff, 0xffffffff, 0xffffffff, 0xffffffff]),
            [0x408f276d, 0x41c83b0e, 0xa20bc7c6, 0x6d5451fd]
        );
        assert_eq!(
            philox4x32_10([0xa4093822, 0x299f31d0], [0x243f6a88, 0x85a308d3, 0x13198a2e, 0x03707344]),
            [0xd16cfe09, 0x94fdcceb, 0x5001e420, 0x24126ea1]
        );
    }

    #[test] pub fn stream_layout() {
        let state = [1, 2, 3, 4];
        let mut philox = Philox4x32::new(state);
        for i in 0 .. 3u64 {
            let block = philox4x32_10([1, 2], [i as u32, 0, 3, 4]);
            for word in block {
                assert_eq!(philox.next_u32(), word);
            }
        }
        assert_eq!(philox.position(), 12);
        assert_eq!(Philox4x32::new(state).block(1 << 32), philox4x32_10([1, 2], [0, 1, 3, 4]));
    }

    #[test] pub fn run_tests() {
        let mut r: u64 = 0;
        let mut rnd = || -> u64 { r = r.wrapping_mul(0xd1342543de82ef95).wrapping_add(0xffff); r };

        for _ in 0 .. 1<<8 {
            let seed = rnd();
            let state = [seed as u32, (seed >> 32) as u32, rnd() as u32, 0];
            let mut philox1 = Philox4x32::new(state);
            let mut philox2 = Philox4x32::new(state);
            assert_eq!(0, philox1.position());

            let pos = (rnd() & 0xff) as u128;
            philox1.set_position(pos);
            assert_eq!(pos, philox1.position());
            for _ in 0 .. pos { philox2.next_u32(); }
            assert_eq!(philox1.next_u32(), philox2.next_u32());
            assert_eq!(philox1.next_u64(), philox2.next_u64());

            let bytes = 1 + (rnd() & 0x3f) as usize;
            let mut buffer1 = [0u8; 0x40];
            let mut buffer2 = [0u8; 0x40];
            philox1.set_position(0);
            philox1.fill_bytes(&mut buffer1[0 .. bytes]);
            philox2.set_position(0);
            for i in 0 .. 0x10 {
                let x = philox2.next_u32();
                buffer2[(i << 2) .. ((i + 1) << 2)].copy_from_slice(&x.to_le_bytes());
            }
            assert_eq!(buffer1[0 .. bytes], buffer2[0 .. bytes]);
        }

        let seeded = Philox4x32::from_seed([1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0]);
        assert_eq!(seeded.state(), [1, 2, 3, 4]);
        assert_eq!(format!("{:?}", seeded), "Philox4x32 {}");
    }

    #[test] pub fn bit_generator_advances_stream() {
        let (next, bits) = rng_bit_generator([5, 6, 7, 8], 32, &[2, 3]).unwrap();
        assert_eq!(next, [5, 6, 8, 8]);
        let mut philox = Philox4x32::new([5, 6, 7, 8]);
        let expected: Vec<u32> = (0 .. 6).map(|_| philox.next_u32()).collect();
        assert_eq!(bits.as_u32().unwrap().data(), expected.as_slice());
        assert_eq!(bits.shape(), &[2, 3]);

        let (carry, _) = rng_bit_generator([0, 0, 0xffffffff, 1], 8, &[3]).unwrap();
        assert_eq!(carry, [0, 0, 0, 2]);

        let (_, wide) = rng_bit_generator([5, 6, 7, 8], 64, &[3]).unwrap();
        let w = &expected;
        assert_eq!(wide.as_u64().unwrap().data()[0], ((w[0] as u64) << 32) | w[3] as u64);
        assert_eq!(rng_bit_generator([0; 4], 7, &[1]), Err(Error::BitWidth(7)));
    }

    #[test] pub fn rbg_seed_split_fold_in() {
        let key = rbg_seed(&Array::scalar(42)).unwrap();
        assert_eq!(key.data(), &[0, 42, 0, 42]);

        let key = Array::from_vec(vec![1, 2, 3, 4]);
        let children = rbg_split(&key, 3).unwrap();
        assert_eq!(children.shape(), &[3, 4]);
        let left = threefry_split(&Array::from_vec(vec![1, 2]), 3).unwrap();
        let right = threefry_split(&Array::from_vec(vec![3, 4]), 3).unwrap();
        for j in 0 .. 3 {
            let child = children.index(j).unwrap().into_vec();
            assert_eq!(child[.. 2], *left.index(j).unwrap().data());
            assert_eq!(child[2 ..], *right.index(j).unwrap().data());
        }

        let folded = rbg_fold_in(&key, &Array::scalar(9)).unwrap().into_vec();
        assert_eq!(folded[.. 2], *threefry_fold_in(&Array::from_vec(vec![1, 2]), &Array::scalar(9)).unwrap().data());
        assert_eq!(folded[2 ..], *threefry_fold_in(&Array::from_vec(vec![3, 4]), &Array::scalar(9)).unwrap().data());
        assert!(rbg_split(&Array::from_vec(vec![1, 2]), 2).unwrap_err().is_type_error());
    }

    #[test] pub fn unsafe_rbg_draws_from_bulk_generator() {
        let state = [1, 2, 3, 4];
        let key = Array::from_vec(state.to_vec());
        let children = unsafe_rbg_split(&key, 2).unwrap();
        assert_eq!(children.shape(), &[2, 4]);
        let philox = Philox4x32::new(state);
        assert_eq!(children.index(0).unwrap().data(), &philox.block(0));
        assert_eq!(children.index(1).unwrap().data(), &philox.block(10));

        let folded = unsafe_rbg_fold_in(&key, &Array::scalar(9)).unwrap();
        let last = Philox4x32::new([0, 9, 0, 9]).block(9);
        let expected: Vec<u32> = state.iter().zip(last.iter()).map(|(k, x)| k ^ x).collect();
        assert_eq!(folded.data(), expected.as_slice());
        assert_ne!(folded, unsafe_rbg_fold_in(&key, &Array::scalar(10)).unwrap());
    }

    #[test] pub fn random_bits_checks_key_and_width() {
        let key = Array::from_vec(vec![1, 2, 3, 4]);
        let bits = rbg_random_bits(&key, 16, &[5]).unwrap();
        assert_eq!(bits.as_u16().unwrap().shape(), &[5]);
        assert_eq!(rbg_random_bits(&Array::from_vec(vec![1, 2]), 32, &[1]), Err(Error::InvalidKey("rbg_random_bits")));
        assert_eq!(rbg_random_bits(&key, 12, &[1]), Err(Error::BitWidth(12)));
    }
}
