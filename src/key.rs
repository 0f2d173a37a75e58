use crate::array::{canonicalize_axis, shape_size, Array, DType, DynArray};
use crate::aval::{known_dims, ShapedArray};
use crate::error::{Error, Result};
use crate::prng::{self, check_key_data, PrngImpl};

/// An array of PRNG keys.
///
/// Keys are opaque: the batch shape is the shape of the key array, and each element is one
/// key of the implementation the array was created with. The backing raw array has shape
/// `(*shape, *prng_impl().key_shape)`. Structural operations act on batch axes only and
/// never touch the trailing key dimensions.
///
/// The backing data is `uint32`, or the zero-width `float0` type for degenerate keys that
/// carry a shape but no key material. `float0` keys support structural operations only.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KeyArray {
    prng: &'static PrngImpl,
    base: DynArray,
}

/// Applies a structural array operation to the backing array, whatever its element type.
macro_rules! restructure {
    ($key:expr, $a:ident => $body:expr) => {{
        let base = match &$key.base {
            DynArray::U32($a) => DynArray::U32($body?),
            DynArray::Float0($a) => DynArray::Float0($body?),
            other => return Err(Error::KeyDataDtype(other.dtype())),
        };
        Ok(KeyArray { prng: $key.prng, base })
    }};
}

impl KeyArray {
    /// Wraps raw key data. Fails unless the data can back keys of `prng`.
    pub fn new(prng: &'static PrngImpl, base: DynArray) -> Result<Self> {
        check_key_data(prng, &base)?;
        Ok(KeyArray { prng, base })
    }

    /// Wraps key words produced by an operation of `prng`, checking them like `new`.
    pub(crate) fn from_words(prng: &'static PrngImpl, words: Array<u32>) -> Result<Self> {
        KeyArray::new(prng, DynArray::U32(words))
    }

    #[inline] pub fn prng_impl(&self) -> &'static PrngImpl {
        self.prng
    }

    /// The key words, for operations that need key material.
    pub(crate) fn words(&self, op: &'static str) -> Result<&Array<u32>> {
        match &self.base {
            DynArray::U32(a) => Ok(a),
            DynArray::Float0(_) => Err(Error::Float0Key(op)),
            other => Err(Error::KeyDataDtype(other.dtype())),
        }
    }

    /// Read-only view of the backing raw array.
    #[inline] pub fn unsafe_raw_array(&self) -> &DynArray {
        &self.base
    }

    pub fn into_raw(self) -> DynArray {
        self.base
    }

    /// Batch shape.
    pub fn shape(&self) -> &[usize] {
        &self.base.shape()[.. self.ndim()]
    }

    /// Abstract value: the batch shape with the key element type.
    pub fn aval(&self) -> ShapedArray {
        ShapedArray::keys(self.prng, known_dims(self.shape()))
    }

    /// Number of batch axes.
    pub fn ndim(&self) -> usize {
        self.base.ndim() - self.prng.key_ndim()
    }

    /// Number of keys.
    pub fn size(&self) -> usize {
        shape_size(self.shape())
    }

    /// True for a single key with no batch axes.
    pub fn is_scalar(&self) -> bool {
        self.ndim() == 0
    }

    /// Length of the leading batch axis.
    pub fn len(&self) -> Result<usize> {
        self.shape().first().copied().ok_or(Error::NotSized("len() of unsized object"))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Iterates over the leading batch axis.
    pub fn iter(&self) -> Result<std::vec::IntoIter<KeyArray>> {
        let n = self.shape().first().copied().ok_or(Error::NotSized("iteration over a 0-d key array"))?;
        let keys = (0 .. n).map(|i| self.index(i)).collect::<Result<Vec<_>>>()?;
        Ok(keys.into_iter())
    }

    fn check_indexable(&self) -> Result<()> {
        if self.is_scalar() {
            return Err(Error::shape("too many indices for a 0-d key array"));
        }
        Ok(())
    }

    /// Key or subarray `i` along the leading batch axis.
    pub fn index(&self, i: usize) -> Result<KeyArray> {
        self.check_indexable()?;
        restructure!(self, a => a.index(i))
    }

    /// Strided slice along the leading batch axis.
    pub fn slice(&self, start: usize, stop: usize, step: usize) -> Result<KeyArray> {
        self.check_indexable()?;
        restructure!(self, a => a.slice(start, stop, step))
    }

    /// Gathers along the leading batch axis.
    pub fn take(&self, indices: &[usize]) -> Result<KeyArray> {
        self.check_indexable()?;
        restructure!(self, a => a.take(indices))
    }

    /// Full backing shape for a batch shape.
    fn backing_shape(&self, batch: &[usize]) -> Vec<usize> {
        batch.iter().chain(self.prng.key_shape.iter()).copied().collect()
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<KeyArray> {
        let shape = self.backing_shape(shape);
        restructure!(self, a => a.reshape(&shape))
    }

    pub fn ravel(&self) -> Result<KeyArray> {
        self.reshape(&[self.size()])
    }

    pub fn flatten(&self) -> Result<KeyArray> {
        self.ravel()
    }

    pub fn broadcast_to(&self, shape: &[usize]) -> Result<KeyArray> {
        let shape = self.backing_shape(shape);
        restructure!(self, a => a.broadcast_to(&shape))
    }

    /// Inserts size-1 batch axes. Negative positions count from the end of the output batch shape.
    pub fn expand_dims(&self, dimensions: &[isize]) -> Result<KeyArray> {
        let ndim_out = self.ndim() + dimensions.len();
        let dims = dimensions.iter().map(|&d| canonicalize_axis(d, ndim_out)).collect::<Result<Vec<_>>>()?;
        restructure!(self, a => a.expand_dims(&dims))
    }

    /// Removes size-1 batch axes; all of them when `axes` is empty.
    pub fn squeeze(&self, axes: &[isize]) -> Result<KeyArray> {
        let shape = self.shape();
        let axes: Vec<usize> = if axes.is_empty() {
            (0 .. shape.len()).filter(|&i| shape[i] == 1).collect()
        } else {
            axes.iter().map(|&a| canonicalize_axis(a, shape.len())).collect::<Result<Vec<_>>>()?
        };
        restructure!(self, a => a.squeeze(&axes))
    }

    /// Permutes batch axes; reverses them when `permutation` is `None`.
    pub fn transpose(&self, permutation: Option<&[usize]>) -> Result<KeyArray> {
        let ndim = self.ndim();
        let mut perm: Vec<usize> = match permutation {
            Some(p) if p.len() == ndim => p.to_vec(),
            Some(p) => return Err(Error::shape(format!("axes {:?} don't match key array of dimension {}", p, ndim))),
            None => (0 .. ndim).rev().collect(),
        };
        perm.extend(ndim .. ndim + self.prng.key_ndim());
        restructure!(self, a => a.transpose(&perm))
    }

    #[allow(non_snake_case)]
    pub fn T(&self) -> Result<KeyArray> {
        self.transpose(None)
    }

    pub fn swapaxes(&self, axis1: isize, axis2: isize) -> Result<KeyArray> {
        let ndim = self.ndim();
        let (a1, a2) = (canonicalize_axis(axis1, ndim)?, canonicalize_axis(axis2, ndim)?);
        let mut perm: Vec<usize> = (0 .. ndim).collect();
        perm.swap(a1, a2);
        self.transpose(Some(&perm))
    }

    /// Joins key arrays of the same implementation along an existing batch axis.
    /// Key arrays have no dtype to convert to, so passing one is an error.
    pub fn concatenate(&self, others: &[&KeyArray], axis: isize, dtype: Option<DType>) -> Result<KeyArray> {
        if dtype.is_some() {
            return Err(Error::ConcatenateDtype);
        }
        if let Some(other) = others.iter().find(|k| k.prng != self.prng) {
            return Err(Error::shape(format!("cannot concatenate keys of impl {} with keys of impl {}", self.prng, other.prng)));
        }
        self.check_indexable()?;
        let axis = canonicalize_axis(axis, self.ndim())?;

        macro_rules! join {
            ($first:ident, $variant:ident, $view:ident) => {{
                let mut parts = vec![$first];
                for k in others {
                    parts.push(k.base.$view().ok_or_else(|| Error::shape("cannot concatenate uint32 keys with float0 keys"))?);
                }
                DynArray::$variant(Array::concatenate(&parts, axis)?)
            }};
        }

        let base = match &self.base {
            DynArray::U32(a) => join!(a, U32, as_u32),
            DynArray::Float0(a) => join!(a, Float0, as_float0),
            other => return Err(Error::KeyDataDtype(other.dtype())),
        };
        Ok(KeyArray { prng: self.prng, base })
    }

    pub fn split(&self, count: usize) -> Result<KeyArray> {
        prng::split(self, count)
    }

    pub fn fold_in(&self, data: u32) -> Result<KeyArray> {
        prng::fold_in(self, data)
    }

    pub fn fold_in_array(&self, data: &Array<u32>) -> Result<KeyArray> {
        prng::fold_in_array(self, data)
    }

    pub fn random_bits(&self, bit_width: u32, shape: &[usize]) -> Result<DynArray> {
        prng::random_bits(self, bit_width, shape)
    }

    /// Multi-line rendering with the batch shape and the implementation.
    pub fn pprint(&self) -> String {
        format!("KeyArray[{}]:\n  shape = {:?}\n  impl = {}", self.prng.tag, self.shape(), self.prng.pprint().replace('\n', "\n  "))
    }
}

impl core::fmt::Display for KeyArray {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match &self.base {
            DynArray::U32(a) => write!(f, "KeyArray[{}] {{ {:?} }}", self.prng.tag, a),
            DynArray::Float0(a) => write!(f, "KeyArray[{}] {{ float0{:?} }}", self.prng.tag, a.shape()),
            other => write!(f, "KeyArray[{}] {{ {:?} }}", self.prng.tag, other),
        }
    }
}

impl core::fmt::Debug for KeyArray {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Display::fmt(self, f)
    }
}
