#[cfg(feature = "serde")] use serde::Serialize;

use crate::array::{format_shape, DType};
use crate::bits::check_bit_width;
use crate::error::{Error, Result};
use crate::prng::{check_key_shape, PrngImpl};
use crate::threefry::THREEFRY_PRNG_IMPL;

// Abstract evaluation: the shape and element type each operation produces, computed
// without key material. Dimensions may be symbolic, in which case only what can be
// proven for every value of the symbol is accepted.

/// One dimension of an abstract shape.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dim {
    Known(usize),
    /// A dimension only known by name. Distinct names may take any positive values.
    Symbolic(String),
}

impl Dim {
    pub fn symbolic(name: &str) -> Self {
        Dim::Symbolic(name.to_string())
    }

    pub fn known(&self) -> Option<usize> {
        match self {
            Dim::Known(n) => Some(*n),
            Dim::Symbolic(_) => None,
        }
    }
}

impl From<usize> for Dim {
    fn from(n: usize) -> Self {
        Dim::Known(n)
    }
}

impl PartialEq<usize> for Dim {
    fn eq(&self, other: &usize) -> bool {
        self.known() == Some(*other)
    }
}

impl core::fmt::Display for Dim {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Dim::Known(n) => write!(f, "{}", n),
            Dim::Symbolic(name) => write!(f, "{}", name),
        }
    }
}

/// Concrete dimensions as abstract ones.
pub fn known_dims(shape: &[usize]) -> Vec<Dim> {
    shape.iter().map(|&n| Dim::Known(n)).collect()
}

/// Element type of key arrays of one implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyTy {
    pub prng: &'static PrngImpl,
}

impl KeyTy {
    pub fn name(&self) -> String {
        format!("key<{}>", self.prng.tag)
    }

    /// Abstract value of the raw array backing keys of abstract value `aval`.
    pub fn physical_aval(&self, aval: &ShapedArray) -> ShapedArray {
        let mut shape = aval.shape.clone();
        shape.extend(known_dims(self.prng.key_shape));
        ShapedArray::new(shape, ElementType::Array(DType::U32))
    }
}

/// Element type of an abstract value: a raw array type or a key type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    Array(DType),
    Key(KeyTy),
}

impl core::fmt::Display for ElementType {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            ElementType::Array(dtype) => write!(f, "{}", dtype),
            ElementType::Key(key) => write!(f, "{}", key.name()),
        }
    }
}

pub fn is_key_type(dtype: &ElementType) -> bool {
    matches!(dtype, ElementType::Key(_))
}

/// Shape and element type of a value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShapedArray {
    pub shape: Vec<Dim>,
    pub dtype: ElementType,
}

impl ShapedArray {
    pub fn new(shape: Vec<Dim>, dtype: ElementType) -> Self {
        ShapedArray { shape, dtype }
    }

    pub fn keys(prng: &'static PrngImpl, shape: Vec<Dim>) -> Self {
        ShapedArray::new(shape, ElementType::Key(KeyTy { prng }))
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    fn key_ty(&self, op: &'static str) -> Result<KeyTy> {
        match self.dtype {
            ElementType::Key(key) => Ok(key),
            ElementType::Array(_) => Err(Error::InvalidKey(op)),
        }
    }
}

impl core::fmt::Display for ShapedArray {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        write!(f, "{}[{}]", self.dtype, dims.join(","))
    }
}

/// Trailing-aligned broadcast of abstract shapes. A symbolic dimension matches itself or 1.
pub fn broadcast_dims(lhs: &[Dim], rhs: &[Dim]) -> Result<Vec<Dim>> {
    let ndim = lhs.len().max(rhs.len());
    let one = Dim::Known(1);
    let pad = |shape: &[Dim], i: usize| -> Dim {
        let offset = ndim - shape.len();
        if i < offset { one.clone() } else { shape[i - offset].clone() }
    };
    (0 .. ndim)
        .map(|i| match (pad(lhs, i), pad(rhs, i)) {
            (a, b) if a == b => Ok(a),
            (Dim::Known(1), b) => Ok(b),
            (a, Dim::Known(1)) => Ok(a),
            _ => Err(Error::shape(format!(
                "incompatible shapes for broadcasting: {} and {}",
                format_shape(lhs),
                format_shape(rhs)
            ))),
        })
        .collect()
}

/// Fails unless the number of counter words Threefry hashes for `shape` is provably even.
///
/// With symbolic dimensions the size is `c * s` for the known product `c` and unknown `s`.
/// The word count `bit_width * c * s / 32` is even for every `s` only when `bit_width * c`
/// is a multiple of 64.
pub fn check_threefry_shape(bit_width: u32, shape: &[Dim]) -> Result<()> {
    if shape.iter().all(|d| d.known().is_some()) {
        return Ok(());
    }
    let known: usize = shape.iter().filter_map(Dim::known).product();
    if known == 0 || (bit_width as usize * known) % 64 == 0 {
        return Ok(());
    }
    Err(Error::ShapePolymorphism(format_shape(shape)))
}

pub fn random_seed_abstract_eval(seeds: &ShapedArray, prng: &'static PrngImpl) -> Result<ShapedArray> {
    match seeds.dtype {
        ElementType::Array(DType::I64) => Ok(ShapedArray::keys(prng, seeds.shape.clone())),
        other => Err(Error::SeedDtype(other.to_string())),
    }
}

pub fn random_split_abstract_eval(keys: &ShapedArray, count: usize) -> Result<ShapedArray> {
    let key = keys.key_ty("split")?;
    let mut shape = keys.shape.clone();
    shape.push(Dim::Known(count));
    Ok(ShapedArray::keys(key.prng, shape))
}

pub fn random_fold_in_abstract_eval(keys: &ShapedArray, msgs: &ShapedArray) -> Result<ShapedArray> {
    let key = keys.key_ty("fold_in")?;
    if msgs.dtype != ElementType::Array(DType::U32) {
        return Err(Error::shape(format!("fold-in data must be uint32; got {}", msgs.dtype)));
    }
    Ok(ShapedArray::keys(key.prng, broadcast_dims(&keys.shape, &msgs.shape)?))
}

pub fn random_bits_abstract_eval(keys: &ShapedArray, bit_width: u32, shape: &[Dim]) -> Result<ShapedArray> {
    let key = keys.key_ty("random_bits")?;
    check_bit_width(bit_width)?;
    if *key.prng == THREEFRY_PRNG_IMPL {
        check_threefry_shape(bit_width, shape)?;
    }
    let dtype = DType::uint(bit_width).ok_or(Error::BitWidth(bit_width))?;
    let mut out = keys.shape.clone();
    out.extend_from_slice(shape);
    Ok(ShapedArray::new(out, ElementType::Array(dtype)))
}

pub fn random_wrap_abstract_eval(base: &ShapedArray, prng: &'static PrngImpl) -> Result<ShapedArray> {
    match base.dtype {
        ElementType::Array(DType::U32) | ElementType::Array(DType::Float0) => {}
        ElementType::Array(dtype) => return Err(Error::KeyDataDtype(dtype)),
        ElementType::Key(_) => return Err(Error::InvalidKey("wrap")),
    }
    check_key_shape(prng, base.shape.as_slice())?;
    let ndim = prng.key_ndim();
    Ok(ShapedArray::keys(prng, base.shape[.. base.ndim() - ndim].to_vec()))
}

pub fn random_unwrap_abstract_eval(keys: &ShapedArray) -> Result<ShapedArray> {
    Ok(keys.key_ty("unwrap")?.physical_aval(keys))
}

#[cfg(test)] mod tests {
    use super::*;
    use crate::array::{Array, DynArray};
    use crate::key::KeyArray;
    use crate::prng::{check_key_data, seed};
    use crate::rbg::RBG_PRNG_IMPL;

    fn sym(name: &str) -> Dim {
        Dim::symbolic(name)
    }

    fn fry_keys(shape: Vec<Dim>) -> ShapedArray {
        ShapedArray::keys(&THREEFRY_PRNG_IMPL, shape)
    }

    #[test] pub fn key_types() {
        let keys = fry_keys(vec![Dim::Known(3), sym("b")]);
        assert_eq!(keys.to_string(), "key<fry>[3,b]");
        assert!(is_key_type(&keys.dtype));
        assert!(!is_key_type(&ElementType::Array(DType::U32)));
        assert_ne!(ShapedArray::keys(&RBG_PRNG_IMPL, vec![]).dtype, fry_keys(vec![]).dtype);

        let physical = random_unwrap_abstract_eval(&keys).unwrap();
        assert_eq!(physical.to_string(), "uint32[3,b,2]");
        assert_eq!(random_wrap_abstract_eval(&physical, &THREEFRY_PRNG_IMPL).unwrap(), keys);
        assert!(random_wrap_abstract_eval(&physical, &RBG_PRNG_IMPL).is_err());
    }

    #[test] pub fn abstract_errors_match_concrete_ones() {
        let raw = ShapedArray::new(vec![Dim::Known(3), Dim::Known(2)], ElementType::Array(DType::U32));
        let err = random_wrap_abstract_eval(&raw, &RBG_PRNG_IMPL).unwrap_err();
        assert_eq!(err, Error::KeyDataShape { key_shape: vec![4], shape: "(3, 2)".to_string(), tag: "rbg" });
        assert!(err.is_type_error());
        let concrete: DynArray = Array::new(vec![3, 2], vec![0u32; 6]).unwrap().into();
        assert_eq!(check_key_data(&RBG_PRNG_IMPL, &concrete).unwrap_err(), err);

        let symbolic = ShapedArray::new(vec![sym("b"), sym("k")], ElementType::Array(DType::U32));
        let err = random_wrap_abstract_eval(&symbolic, &THREEFRY_PRNG_IMPL).unwrap_err();
        assert!(matches!(&err, Error::KeyDataShape { shape, .. } if shape == "(b, k)"));
        let scalar = ShapedArray::new(vec![], ElementType::Array(DType::U32));
        assert!(matches!(random_wrap_abstract_eval(&scalar, &THREEFRY_PRNG_IMPL), Err(Error::KeyDataRank { expected_rank: 1, .. })));

        let seeds = ShapedArray::new(vec![Dim::Known(2)], ElementType::Array(DType::U32));
        let err = random_seed_abstract_eval(&seeds, &THREEFRY_PRNG_IMPL).unwrap_err();
        assert_eq!(err, Error::SeedDtype("uint32".to_string()));
        assert!(err.is_type_error());
    }

    #[test] pub fn operation_shapes() {
        let keys = fry_keys(vec![sym("b")]);
        let seeds = ShapedArray::new(vec![sym("b")], ElementType::Array(DType::I64));
        assert_eq!(random_seed_abstract_eval(&seeds, &THREEFRY_PRNG_IMPL).unwrap(), keys);

        let split = random_split_abstract_eval(&keys, 4).unwrap();
        assert_eq!(split.shape, vec![sym("b"), Dim::Known(4)]);

        let msgs = ShapedArray::new(vec![Dim::Known(5), Dim::Known(1)], ElementType::Array(DType::U32));
        let folded = random_fold_in_abstract_eval(&keys, &msgs).unwrap();
        assert_eq!(folded.shape, vec![Dim::Known(5), sym("b")]);
        let clash = ShapedArray::new(vec![sym("c")], ElementType::Array(DType::U32));
        assert!(random_fold_in_abstract_eval(&keys, &clash).is_err());

        let bits = random_bits_abstract_eval(&keys, 16, &[Dim::Known(8)]).unwrap();
        assert_eq!(bits.to_string(), "uint16[b,8]");
        assert_eq!(random_bits_abstract_eval(&keys, 12, &[]), Err(Error::BitWidth(12)));
        assert!(random_bits_abstract_eval(&seeds, 32, &[]).unwrap_err().is_type_error());
    }

    #[test] pub fn shape_polymorphic_parity() {
        let keys = fry_keys(vec![]);
        assert!(random_bits_abstract_eval(&keys, 32, &[Dim::Known(2), sym("n")]).is_ok());
        assert!(random_bits_abstract_eval(&keys, 64, &[sym("n")]).is_ok());
        assert!(random_bits_abstract_eval(&keys, 8, &[Dim::Known(8), sym("n")]).is_ok());
        let err = random_bits_abstract_eval(&keys, 32, &[Dim::Known(3), sym("n")]).unwrap_err();
        assert_eq!(err, Error::ShapePolymorphism("(3, n)".to_string()));
        assert!(err.to_string().contains("must be even"));
        assert!(random_bits_abstract_eval(&keys, 8, &[Dim::Known(4), sym("n")]).is_err());
        // Concrete shapes and other implementations are never rejected.
        assert!(random_bits_abstract_eval(&keys, 32, &[Dim::Known(3)]).is_ok());
        let rbg = ShapedArray::keys(&RBG_PRNG_IMPL, vec![]);
        assert!(random_bits_abstract_eval(&rbg, 32, &[sym("n")]).is_ok());
    }

    #[test] pub fn concrete_keys_agree() {
        let key: KeyArray = seed(3, &THREEFRY_PRNG_IMPL).unwrap().split(4).unwrap();
        let aval = key.aval();
        assert_eq!(aval, fry_keys(known_dims(&[4])));
        let bits = key.random_bits(8, &[3]).unwrap();
        let predicted = random_bits_abstract_eval(&aval, 8, &known_dims(&[3])).unwrap();
        assert_eq!(predicted.shape, known_dims(bits.shape()));
        assert_eq!(predicted.dtype, ElementType::Array(bits.dtype()));
    }
}
