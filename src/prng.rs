use core::hash::{Hash, Hasher};

use tracing::debug;

use crate::array::{format_shape, Array, DType, DynArray};
use crate::error::{Error, Result};
use crate::key::KeyArray;
use crate::rbg::{RBG_PRNG_IMPL, UNSAFE_RBG_PRNG_IMPL};
use crate::threefry::THREEFRY_PRNG_IMPL;
use crate::vmap::{iterated_vmap_binary_bcast, iterated_vmap_unary};

/// Creates one raw key from a scalar seed.
pub type SeedFn = fn(&Array<i64>) -> Result<Array<u32>>;
/// Splits one raw key into `n` raw keys, stacked along a new leading axis.
pub type SplitFn = fn(&Array<u32>, usize) -> Result<Array<u32>>;
/// Generates unsigned integers of a bit width and shape from one raw key.
pub type RandomBitsFn = fn(&Array<u32>, u32, &[usize]) -> Result<DynArray>;
/// Folds one scalar datum into one raw key.
pub type FoldInFn = fn(&Array<u32>, &Array<u32>) -> Result<Array<u32>>;

/// A PRNG implementation: the physical shape of its raw keys and the operations on a single key.
///
/// Raw keys are `uint32` arrays of shape `key_shape`. The operations have the signatures
///
/// ```text
/// seed        :: int[]  -> K
/// split[n]    :: K      -> K[n]
/// fold_in     :: K      -> uint32[] -> K
/// random_bits :: K      -> uint<bit_width>[shape]
/// ```
///
/// Implementations are compared and hashed by tag, never by their functions.
/// New implementations are new values of this type.
#[derive(Clone, Copy)]
pub struct PrngImpl {
    pub key_shape: &'static [usize],
    pub seed: SeedFn,
    pub split: SplitFn,
    pub random_bits: RandomBitsFn,
    pub fold_in: FoldInFn,
    pub tag: &'static str,
}

impl PrngImpl {
    pub const fn new(
        key_shape: &'static [usize],
        seed: SeedFn,
        split: SplitFn,
        random_bits: RandomBitsFn,
        fold_in: FoldInFn,
        tag: &'static str,
    ) -> Self {
        PrngImpl { key_shape, seed, split, random_bits, fold_in, tag }
    }

    /// Rank of a single raw key.
    #[inline] pub fn key_ndim(&self) -> usize {
        self.key_shape.len()
    }

    /// Multi-line rendering of the tag and every field.
    pub fn pprint(&self) -> String {
        format!(
            "PrngImpl [{}]:\n  key_shape = {:?}\n  seed = fn@{:p}\n  split = fn@{:p}\n  random_bits = fn@{:p}\n  fold_in = fn@{:p}\n  tag = {}",
            self.tag,
            self.key_shape,
            self.seed as *const (),
            self.split as *const (),
            self.random_bits as *const (),
            self.fold_in as *const (),
            self.tag,
        )
    }
}

impl PartialEq for PrngImpl {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
    }
}

impl Eq for PrngImpl {}

impl Hash for PrngImpl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag.hash(state);
    }
}

impl core::fmt::Display for PrngImpl {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{}", self.tag)
    }
}

impl core::fmt::Debug for PrngImpl {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "PrngImpl [{}] {{ key_shape: {:?} }}", self.tag, self.key_shape)
    }
}

// -- registry

/// Named implementations available to every caller.
static REGISTRY: [(&str, &PrngImpl); 3] = [
    ("threefry2x32", &THREEFRY_PRNG_IMPL),
    ("rbg", &RBG_PRNG_IMPL),
    ("unsafe_rbg", &UNSAFE_RBG_PRNG_IMPL),
];

/// Finds a registered implementation by name or tag.
pub fn lookup(name: &str) -> Result<&'static PrngImpl> {
    let found = REGISTRY.iter().find(|(n, prng)| *n == name || prng.tag == name).map(|(_, prng)| *prng);
    debug!(name, found = found.map(|prng| prng.tag), "implementation lookup");
    found.ok_or_else(|| Error::UnknownImpl(name.to_string()))
}

/// Every registered implementation with its name.
pub fn registered() -> impl Iterator<Item = (&'static str, &'static PrngImpl)> {
    REGISTRY.iter().copied()
}

/// The implementation named by the process configuration.
pub fn default_impl() -> Result<&'static PrngImpl> {
    lookup(&crate::config::get()?.default_impl)
}

/// Reads a raw key of shape `(N,)` into words.
pub(crate) fn key_words<const N: usize>(key: &Array<u32>, op: &'static str) -> Result<[u32; N]> {
    <[u32; N]>::try_from(key.data()).ok().filter(|_| key.ndim() == 1).ok_or(Error::InvalidKey(op))
}

// -- key data validation

/// Checks that data of `shape` ends in the key shape of `prng`.
/// Dimensions only need to compare against the concrete key shape, so symbolic ones are accepted.
pub fn check_key_shape<D>(prng: &PrngImpl, shape: &[D]) -> Result<()>
where
    D: core::fmt::Display + PartialEq<usize>,
{
    let ndim = prng.key_ndim();
    if shape.len() < ndim.max(1) {
        return Err(Error::KeyDataRank { expected_rank: ndim.max(1), shape: format_shape(shape) });
    }
    let trailing = &shape[shape.len() - ndim ..];
    if !trailing.iter().zip(prng.key_shape).all(|(d, k)| d == k) {
        return Err(Error::KeyDataShape { key_shape: prng.key_shape.to_vec(), shape: format_shape(shape), tag: prng.tag });
    }
    Ok(())
}

/// Checks that `key_data` can back a key array of `prng`.
pub fn check_key_data(prng: &PrngImpl, key_data: &DynArray) -> Result<()> {
    check_key_shape(prng, key_data.shape())?;
    match key_data.dtype() {
        DType::U32 | DType::Float0 => Ok(()),
        dtype => Err(Error::KeyDataDtype(dtype)),
    }
}

// -- operations on key arrays

/// Creates a key from an integer seed.
pub fn seed(raw_seed: i64, prng: &'static PrngImpl) -> Result<KeyArray> {
    seed_array(&Array::scalar(raw_seed), prng)
}

/// Creates one key per element of `seeds`. The key array has the shape of `seeds`.
pub fn seed_array(seeds: &Array<i64>, prng: &'static PrngImpl) -> Result<KeyArray> {
    let seed = iterated_vmap_unary(seeds.ndim(), prng.seed);
    KeyArray::from_words(prng, seed(seeds)?)
}

/// Splits every key into `count` keys along a new trailing batch axis.
pub fn split(keys: &KeyArray, count: usize) -> Result<KeyArray> {
    let prng = keys.prng_impl();
    let split = iterated_vmap_unary(keys.ndim(), |k: &Array<u32>| (prng.split)(k, count));
    KeyArray::from_words(prng, split(keys.words("split")?)?)
}

/// Folds `data` into every key.
pub fn fold_in(keys: &KeyArray, data: u32) -> Result<KeyArray> {
    fold_in_array(keys, &Array::scalar(data))
}

/// Folds data into keys, broadcasting the key batch shape against the shape of `msgs`.
pub fn fold_in_array(keys: &KeyArray, msgs: &Array<u32>) -> Result<KeyArray> {
    let prng = keys.prng_impl();
    let fold_in = iterated_vmap_binary_bcast(keys.shape(), msgs.shape(), prng.fold_in)?;
    KeyArray::from_words(prng, fold_in(keys.words("fold_in")?, msgs)?)
}

/// Generates unsigned integers of `bit_width` bits with shape `(*keys.shape, *shape)`.
pub fn random_bits(keys: &KeyArray, bit_width: u32, shape: &[usize]) -> Result<DynArray> {
    let prng = keys.prng_impl();
    let words = keys.words("random_bits")?;
    let ndim = keys.ndim();

    macro_rules! batched {
        ($variant:ident) => {{
            let bits = iterated_vmap_unary(ndim, |k: &Array<u32>| -> Result<Array<_>> { match (prng.random_bits)(k, bit_width, shape)? {
                DynArray::$variant(a) => Ok(a),
                other => Err(Error::shape(format!("{} random_bits produced {} for a {}-bit request", prng.tag, other.dtype(), bit_width))),
            }});
            DynArray::$variant(bits(words)?)
        }};
    }

    Ok(match bit_width {
        8 => batched!(U8),
        16 => batched!(U16),
        32 => batched!(U32),
        64 => batched!(U64),
        _ => return Err(Error::BitWidth(bit_width)),
    })
}

/// Wraps raw key data as a key array of `prng`.
pub fn wrap(raw: DynArray, prng: &'static PrngImpl) -> Result<KeyArray> {
    KeyArray::new(prng, raw)
}

/// Returns the raw key data of a key array.
pub fn unwrap(keys: KeyArray) -> DynArray {
    keys.into_raw()
}
