use wrapping_arithmetic::wrappit;
#[cfg(feature = "serde")] use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::array::{broadcast_shapes, shape_size, Array, DynArray};
use crate::bits::{check_bit_width, word_count, words_to_bits};
use crate::error::{Error, Result};
use crate::prng::{key_words, PrngImpl};

// Threefry-2x32 with 20 rounds (Salmon, Moraes, Dror and Shaw,
// Parallel Random Numbers: As Easy as 1, 2, 3, 2011).
// Keys are (u32, u32) pairs. Output for a counter is a pure function of (key, counter),
// so any word of a stream can be computed without replaying the words before it.

/// Parity constant of the Threefish key schedule.
pub const KS_PARITY: u32 = 0x1BD11BDA;

/// Rotation constants, alternating between rounds.
pub const ROTATIONS: [[u32; 4]; 2] = [[13, 15, 26, 6], [17, 29, 16, 24]];

/// Number of 32-bit words a single counter range can address in one call.
pub const BLOCK_WORDS: usize = u32::MAX as usize;

/// Evaluation strategy of the hash. Both produce identical output.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Lowering {
    /// Iterates one round structure five times, rotating the key schedule.
    #[default]
    Rolled,
    /// All five rounds written out.
    Unrolled,
}

impl core::str::FromStr for Lowering {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rolled" => Ok(Lowering::Rolled),
            "unrolled" => Ok(Lowering::Unrolled),
            _ => Err(Error::Config(format!("unknown threefry lowering {:?}; expected \"rolled\" or \"unrolled\"", s))),
        }
    }
}

/// One mix step: add, rotate, xor.
#[wrappit] #[inline]
fn apply_round(x: [u32; 2], rot: u32) -> [u32; 2] {
    let x0 = x[0] + x[1];
    [x0, x0 ^ x[1].rotate_left(rot)]
}

#[inline]
fn key_schedule(key: [u32; 2]) -> [u32; 3] {
    [key[0], key[1], key[0] ^ key[1] ^ KS_PARITY]
}

/// Threefry-2x32 evaluated as a loop over the round structure.
#[wrappit]
pub fn threefry2x32_rolled(key: [u32; 2], block: [u32; 2]) -> [u32; 2] {
    let mut ks = key_schedule(key);
    let mut x = [block[0] + ks[0], block[1] + ks[1]];
    let mut rotations = ROTATIONS;
    ks.rotate_left(1);
    for round in 1 ..= 5u32 {
        for &rot in rotations[0].iter() {
            x = apply_round(x, rot);
        }
        x[0] += ks[0];
        x[1] += ks[1] + round;
        ks.rotate_left(1);
        rotations.swap(0, 1);
    }
    x
}

macro_rules! mix {
    ($x:ident, $rotations:expr) => {
        $x = apply_round($x, $rotations[0]);
        $x = apply_round($x, $rotations[1]);
        $x = apply_round($x, $rotations[2]);
        $x = apply_round($x, $rotations[3]);
    };
}

/// Threefry-2x32 with every round written out.
#[wrappit]
pub fn threefry2x32_unrolled(key: [u32; 2], block: [u32; 2]) -> [u32; 2] {
    let ks = key_schedule(key);
    let mut x = [block[0] + ks[0], block[1] + ks[1]];
    mix!(x, ROTATIONS[0]);
    x[0] += ks[1];
    x[1] += ks[2] + 1;
    mix!(x, ROTATIONS[1]);
    x[0] += ks[2];
    x[1] += ks[0] + 2;
    mix!(x, ROTATIONS[0]);
    x[0] += ks[0];
    x[1] += ks[1] + 3;
    mix!(x, ROTATIONS[1]);
    x[0] += ks[1];
    x[1] += ks[2] + 4;
    mix!(x, ROTATIONS[0]);
    x[0] += ks[2];
    x[1] += ks[0] + 5;
    x
}

/// Threefry-2x32 with the given strategy.
#[inline]
pub fn threefry2x32_words(key: [u32; 2], block: [u32; 2], lowering: Lowering) -> [u32; 2] {
    match lowering {
        Lowering::Rolled => threefry2x32_rolled(key, block),
        Lowering::Unrolled => threefry2x32_unrolled(key, block),
    }
}

/// Elementwise Threefry-2x32 over arrays broadcast to a common shape.
/// Every input must be a `uint32` array.
pub fn threefry2x32(key1: &DynArray, key2: &DynArray, x1: &DynArray, x2: &DynArray) -> Result<(Array<u32>, Array<u32>)> {
    let inputs = [key1, key2, x1, x2];
    let words: Vec<&Array<u32>> = inputs.iter().filter_map(|a| a.as_u32()).collect();
    if words.len() != inputs.len() {
        return Err(Error::HashDtype(inputs.iter().map(|a| a.dtype()).collect()));
    }
    let mut shape = Vec::new();
    for a in &words {
        shape = broadcast_shapes(&shape, a.shape())?;
    }
    let [k1, k2, b1, b2] = [words[0], words[1], words[2], words[3]].map(|a| a.broadcast_to(&shape));
    let (k1, k2, b1, b2) = (k1?, k2?, b1?, b2?);
    let lowering = crate::config::get()?.threefry_lowering;
    let (y1, y2): (Vec<u32>, Vec<u32>) = (0 .. shape_size(&shape))
        .map(|i| {
            let y = threefry2x32_words([k1.data()[i], k2.data()[i]], [b1.data()[i], b2.data()[i]], lowering);
            (y[0], y[1])
        })
        .unzip();
    Ok((Array::new(shape.clone(), y1)?, Array::new(shape, y2)?))
}

/// Counter-mode hash of a flat counter sequence.
/// The first half of the (zero-padded to even length) sequence is hashed against the second half;
/// the output holds all first output words followed by all second output words.
pub fn hash_counts(keypair: [u32; 2], counts: &[u32], lowering: Lowering) -> Vec<u32> {
    let odd = counts.len() % 2;
    let half = (counts.len() + odd) / 2;
    let count = |i: usize| counts.get(i).copied().unwrap_or(0);
    let mut out = vec![0; 2 * half];
    for i in 0 .. half {
        let y = threefry2x32_words(keypair, [count(i), count(half + i)], lowering);
        out[i] = y[0];
        out[half + i] = y[1];
    }
    out.truncate(counts.len());
    out
}

/// Counter-mode hash over the counters `0 .. n`.
fn hash_iota(keypair: [u32; 2], n: usize, lowering: Lowering) -> Vec<u32> {
    let counts: Vec<u32> = (0 .. n).map(|i| i as u32).collect();
    hash_counts(keypair, &counts, lowering)
}

/// Applies the Threefry-2x32 hash to an array of counters, keyed by `keypair`.
/// The output has the shape of `count`.
pub fn threefry_2x32(keypair: [u32; 2], count: &Array<u32>) -> Result<Array<u32>> {
    let lowering = crate::config::get()?.threefry_lowering;
    Array::new(count.shape().to_vec(), hash_counts(keypair, count.data(), lowering))
}

/// Splits a 64-bit integer into the key `(high word, low word)`.
#[inline]
pub fn seed_words(seed: u64) -> [u32; 2] {
    [(seed >> 32) as u32, (seed & 0xFFFF_FFFF) as u32]
}

/// Creates a raw Threefry key from a scalar integer seed.
pub fn threefry_seed(seed: &Array<i64>) -> Result<Array<u32>> {
    if seed.ndim() != 0 {
        return Err(Error::SeedNotScalar(seed.shape().to_vec()));
    }
    Ok(Array::from_vec(seed_words(seed.item()? as u64).to_vec()))
}

pub(crate) fn split_words(key: [u32; 2], num: usize) -> Result<Vec<u32>> {
    let lowering = crate::config::get()?.threefry_lowering;
    Ok(hash_iota(key, 2 * num, lowering))
}

/// Splits a raw key into `num` raw keys of shape `(num, 2)`.
pub fn threefry_split(key: &Array<u32>, num: usize) -> Result<Array<u32>> {
    let key = key_words::<2>(key, "threefry_split")?;
    Array::new(vec![num, 2], split_words(key, num)?)
}

pub(crate) fn fold_in_words(key: [u32; 2], data: u32) -> Result<[u32; 2]> {
    let lowering = crate::config::get()?.threefry_lowering;
    let folded = hash_counts(key, &seed_words(data as u64), lowering);
    Ok([folded[0], folded[1]])
}

/// Folds scalar `data` into a raw key.
pub fn threefry_fold_in(key: &Array<u32>, data: &Array<u32>) -> Result<Array<u32>> {
    if data.ndim() != 0 {
        return Err(Error::FoldInDataNotScalar(data.shape().to_vec()));
    }
    let key = key_words::<2>(key, "threefry_fold_in")?;
    Ok(Array::from_vec(fold_in_words(key, data.item()?)?.to_vec()))
}

/// Generates `count` words from `key`, fanning out over split keys once a single
/// counter range of `block` words is exhausted.
pub(crate) fn random_words(key: [u32; 2], count: usize, block: usize) -> Result<Vec<u32>> {
    let lowering = crate::config::get()?.threefry_lowering;
    let (nblocks, rem) = (count / block, count % block);
    if nblocks == 0 {
        return Ok(hash_iota(key, rem, lowering));
    }
    debug!(nblocks, rem, "random bits exceed one counter range; generating from split keys");
    let keys = split_words(key, nblocks + 1)?;
    let mut words = Vec::with_capacity(count);
    for sub in keys.chunks_exact(2).take(nblocks) {
        words.extend(hash_iota([sub[0], sub[1]], block, lowering));
    }
    words.extend(hash_iota([keys[2 * nblocks], keys[2 * nblocks + 1]], rem, lowering));
    Ok(words)
}

pub(crate) fn random_bits_blocked(key: &Array<u32>, bit_width: u32, shape: &[usize], block: usize) -> Result<DynArray> {
    if key.shape() != [2] {
        return Err(Error::InvalidKey("threefry_random_bits"));
    }
    check_bit_width(bit_width)?;
    let key = key_words::<2>(key, "threefry_random_bits")?;
    let max_count = word_count(bit_width, shape_size(shape))?;
    words_to_bits(random_words(key, max_count, block)?, bit_width, shape)
}

/// Samples `bit_width`-bit unsigned integers of the given shape from a raw key.
pub fn threefry_random_bits(key: &Array<u32>, bit_width: u32, shape: &[usize]) -> Result<DynArray> {
    random_bits_blocked(key, bit_width, shape, BLOCK_WORDS)
}

/// The default implementation: Threefry-2x32 keys of shape `(2,)`.
pub static THREEFRY_PRNG_IMPL: PrngImpl = PrngImpl::new(
    &[2],
    threefry_seed,
    threefry_split,
    threefry_random_bits,
    threefry_fold_in,
    "fry",
);

#[cfg(test)] mod tests {
    use super::*;
    use crate::array::DType;
    use proptest::prelude::*;

    fn key(words: [u32; 2]) -> Array<u32> {
        Array::from_vec(words.to_vec())
    }

    #[test] pub fn known_answers() {
        // Reference vectors for Threefry-2x32-20.
        let vectors = [
            ([0x00000000, 0x00000000], [0x00000000, 0x00000000], [0x6b200159, 0x99ba4efe]),
            ([0xffffffff, 0xffffffff], [0xffffffff, 0xffffffff], [0x1cb996fc, 0xbb002be7]),
            ([0x13198a2e, 0x03707344], [0x243f6a88, 0x85a308d3], [0xc4923a9c, 0x483df7a0]),
        ];
        for (k, x, y) in vectors {
            assert_eq!(threefry2x32_rolled(k, x), y);
            assert_eq!(threefry2x32_unrolled(k, x), y);
        }
        let out = threefry_2x32([0, 0], &Array::from_vec(vec![0, 0])).unwrap();
        assert_eq!(out.data(), &[0x6b200159, 0x99ba4efe]);
    }

    #[test] pub fn rolled_matches_unrolled() {
        let mut r: u64 = 0;
        let mut rnd = || -> u32 { r = r.wrapping_mul(0xd1342543de82ef95).wrapping_add(0xffff); (r >> 32) as u32 };
        for _ in 0 .. 1<<12 {
            let k = [rnd(), rnd()];
            let x = [rnd(), rnd()];
            assert_eq!(threefry2x32_rolled(k, x), threefry2x32_unrolled(k, x));
        }
    }

    proptest! {
        #[test]
        fn rolled_matches_unrolled_everywhere(k0: u32, k1: u32, x0: u32, x1: u32) {
            prop_assert_eq!(threefry2x32_rolled([k0, k1], [x0, x1]), threefry2x32_unrolled([k0, k1], [x0, x1]));
        }
    }

    #[test] pub fn array_hash_broadcasts_and_checks_dtype() {
        let k1: DynArray = Array::scalar(0x13198a2eu32).into();
        let k2: DynArray = Array::scalar(0x03707344u32).into();
        let x1: DynArray = Array::from_vec(vec![0x243f6a88u32, 0]).into();
        let x2: DynArray = Array::scalar(0x85a308d3u32).into();
        let (y1, y2) = threefry2x32(&k1, &k2, &x1, &x2).unwrap();
        assert_eq!(y1.shape(), &[2]);
        assert_eq!((y1.data()[0], y2.data()[0]), (0xc4923a9c, 0x483df7a0));
        let expected = threefry2x32_rolled([0x13198a2e, 0x03707344], [0, 0x85a308d3]);
        assert_eq!((y1.data()[1], y2.data()[1]), (expected[0], expected[1]));

        let bad: DynArray = Array::scalar(1u64).into();
        let err = threefry2x32(&k1, &k2, &x1, &bad).unwrap_err();
        assert_eq!(err, Error::HashDtype(vec![DType::U32, DType::U32, DType::U32, DType::U64]));
        assert!(err.is_type_error());
    }

    #[test] pub fn counter_mode_pads_odd_lengths() {
        let even = threefry_2x32([7, 9], &Array::from_vec(vec![1, 2, 3, 0])).unwrap();
        let odd = threefry_2x32([7, 9], &Array::from_vec(vec![1, 2, 3])).unwrap();
        let y = threefry2x32_rolled([7, 9], [1, 3]);
        let z = threefry2x32_rolled([7, 9], [2, 0]);
        assert_eq!(even.data(), &[y[0], z[0], y[1], z[1]]);
        assert_eq!(odd.data(), &[y[0], z[0], y[1]]);
        assert_eq!(threefry_2x32([7, 9], &Array::from_vec(vec![])).unwrap().size(), 0);
    }

    #[test] pub fn seeding() {
        assert_eq!(threefry_seed(&Array::scalar(42)).unwrap().data(), &[0, 42]);
        assert_eq!(threefry_seed(&Array::scalar(0x1234_5678_9abc_def0)).unwrap().data(), &[0x12345678, 0x9abcdef0]);
        assert_eq!(threefry_seed(&Array::scalar(-1)).unwrap().data(), &[0xffffffff, 0xffffffff]);
        assert_eq!(threefry_seed(&Array::from_vec(vec![1, 2])), Err(Error::SeedNotScalar(vec![2])));
    }

    #[test] pub fn split_known_answer() {
        let keys = threefry_split(&key([0, 0]), 2).unwrap();
        assert_eq!(keys.shape(), &[2, 2]);
        assert_eq!(keys.data(), &[4146024105, 967050713, 2718843009, 1272950319]);
    }

    #[test] pub fn fold_in_mixes_data() {
        let k = key([0, 0]);
        let a = threefry_fold_in(&k, &Array::scalar(7)).unwrap();
        let b = threefry_fold_in(&k, &Array::scalar(8)).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, k);
        assert_eq!(a.data(), &threefry2x32_rolled([0, 0], [0, 7]));
        assert!(threefry_fold_in(&k, &Array::from_vec(vec![7])).is_err());
    }

    #[test] pub fn random_bits_layout() {
        let k = key([0, 42]);
        let words = threefry_random_bits(&k, 32, &[6]).unwrap();
        let words = words.as_u32().unwrap().data().to_vec();
        assert_eq!(words, threefry_2x32([0, 42], &Array::from_vec((0 .. 6).collect())).unwrap().into_vec());

        let wide = threefry_random_bits(&k, 64, &[3]).unwrap();
        let expected: Vec<u64> = (0 .. 3).map(|i| ((words[i] as u64) << 32) | words[3 + i] as u64).collect();
        assert_eq!(wide.as_u64().unwrap().data(), expected.as_slice());

        let bytes = threefry_random_bits(&k, 8, &[2, 3]).unwrap();
        let bytes = bytes.as_u8().unwrap();
        assert_eq!(bytes.shape(), &[2, 3]);
        let first = threefry_random_bits(&k, 32, &[2]).unwrap();
        let first = first.as_u32().unwrap().data().to_vec();
        let expected: Vec<u8> = first.iter().flat_map(|w| w.to_le_bytes()).take(6).collect();
        assert_eq!(bytes.data(), expected.as_slice());

        let one = threefry_random_bits(&k, 16, &[]).unwrap();
        assert_eq!(one.shape(), &[] as &[usize]);
        assert_eq!(one.size(), 1);

        assert_eq!(threefry_random_bits(&k, 24, &[2]), Err(Error::BitWidth(24)));
        assert_eq!(threefry_random_bits(&Array::from_vec(vec![1, 2, 3]), 32, &[2]), Err(Error::InvalidKey("threefry_random_bits")));
    }

    #[test] pub fn random_bits_fan_out_over_blocks() {
        let k = [3, 5];
        let blocked = random_bits_blocked(&key(k), 32, &[11], 4).unwrap();
        let keys = split_words(k, 3).unwrap();
        let mut expected = Vec::new();
        expected.extend(hash_iota([keys[0], keys[1]], 4, Lowering::Rolled));
        expected.extend(hash_iota([keys[2], keys[3]], 4, Lowering::Unrolled));
        expected.extend(hash_iota([keys[4], keys[5]], 3, Lowering::Rolled));
        assert_eq!(blocked.as_u32().unwrap().data(), expected.as_slice());

        // An exact multiple of the block still draws an (empty) remainder key.
        let exact = random_words(k, 8, 4).unwrap();
        assert_eq!(exact, expected[.. 8].to_vec());
    }

    #[test] pub fn lowering_from_str() {
        assert_eq!("Rolled".parse::<Lowering>().unwrap(), Lowering::Rolled);
        assert_eq!("unrolled".parse::<Lowering>().unwrap(), Lowering::Unrolled);
        assert!("loop".parse::<Lowering>().is_err());
    }
}
