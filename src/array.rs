#[cfg(feature = "serde")] use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// Row-major n-dimensional arrays. This is the raw representation keys are stored in
// and the output type of bit generation. Only the structural operations
// key arrays need are provided; there is no arithmetic.

/// Element type tag of a raw array.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    U8,
    U16,
    U32,
    U64,
    I64,
    /// Zero-width sentinel element type. Arrays of it carry a shape but no data.
    Float0,
}

impl DType {
    /// Unsigned integer type of the given bit width.
    pub fn uint(bit_width: u32) -> Option<DType> {
        match bit_width {
            8 => Some(DType::U8),
            16 => Some(DType::U16),
            32 => Some(DType::U32),
            64 => Some(DType::U64),
            _ => None,
        }
    }
}

impl core::fmt::Display for DType {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let name = match self {
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
            DType::I64 => "int64",
            DType::Float0 => "float0",
        };
        write!(f, "{}", name)
    }
}

/// Number of elements in an array of the given shape.
#[inline]
pub fn shape_size(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Renders a shape as `(d0, d1, ...)`.
pub fn format_shape<D: core::fmt::Display>(shape: &[D]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("({})", dims.join(", "))
}

/// Row-major strides, in elements.
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0 .. shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Resolves a possibly negative axis against rank `ndim`.
pub fn canonicalize_axis(axis: isize, ndim: usize) -> Result<usize> {
    let n = ndim as isize;
    if axis < -n || axis >= n {
        return Err(Error::shape(format!("axis {} is out of bounds for array of dimension {}", axis, ndim)));
    }
    Ok(if axis < 0 { (axis + n) as usize } else { axis as usize })
}

/// Trailing-aligned broadcast of two shapes.
pub fn broadcast_shapes(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let ndim = lhs.len().max(rhs.len());
    let mut out = vec![0; ndim];
    for i in 0 .. ndim {
        let a = if i < ndim - lhs.len() { 1 } else { lhs[i - (ndim - lhs.len())] };
        let b = if i < ndim - rhs.len() { 1 } else { rhs[i - (ndim - rhs.len())] };
        out[i] = match (a, b) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => return Err(Error::Broadcast { lhs: lhs.to_vec(), rhs: rhs.to_vec() }),
        };
    }
    Ok(out)
}

/// Row-major n-dimensional array.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Array<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: core::fmt::Debug> core::fmt::Debug for Array<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "Array{:?} {:?}", self.shape, self.data)
    }
}

impl<T: Copy> Array<T> {
    /// Creates an array from a shape and row-major data.
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        if shape_size(&shape) != data.len() {
            return Err(Error::shape(format!("cannot build array of shape {:?} from {} elements", shape, data.len())));
        }
        Ok(Array { shape, data })
    }

    /// Creates a one-dimensional array.
    pub fn from_vec(data: Vec<T>) -> Self {
        Array { shape: vec![data.len()], data }
    }

    /// Creates a zero-dimensional array.
    pub fn scalar(x: T) -> Self {
        Array { shape: Vec::new(), data: vec![x] }
    }

    /// Creates an array with every element equal to `x`.
    pub fn full(shape: &[usize], x: T) -> Self {
        Array { shape: shape.to_vec(), data: vec![x; shape_size(shape)] }
    }

    #[inline] pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline] pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    #[inline] pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline] pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Returns the single element of an array of size 1.
    pub fn item(&self) -> Result<T> {
        match self.data.as_slice() {
            [x] => Ok(*x),
            _ => Err(Error::shape(format!("expected a single element; got shape {:?}", self.shape))),
        }
    }

    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> Array<U> {
        Array { shape: self.shape.clone(), data: self.data.iter().map(|&x| f(x)).collect() }
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        if shape_size(shape) != self.size() {
            return Err(Error::shape(format!("cannot reshape array of shape {:?} into shape {:?}", self.shape, shape)));
        }
        Ok(Array { shape: shape.to_vec(), data: self.data.clone() })
    }

    /// Flattens to one dimension.
    pub fn ravel(&self) -> Self {
        Array::from_vec(self.data.clone())
    }

    /// Number of elements in one subarray along the leading axis.
    fn row_size(&self) -> usize {
        shape_size(&self.shape[1 ..])
    }

    fn check_leading_axis(&self) -> Result<usize> {
        match self.shape.first() {
            Some(&n) => Ok(n),
            None => Err(Error::shape("cannot index a zero-dimensional array")),
        }
    }

    /// Selects subarray `i` along the leading axis.
    pub fn index(&self, i: usize) -> Result<Self> {
        let n = self.check_leading_axis()?;
        if i >= n {
            return Err(Error::shape(format!("index {} is out of bounds for axis 0 with size {}", i, n)));
        }
        let row = self.row_size();
        Ok(Array { shape: self.shape[1 ..].to_vec(), data: self.data[i * row .. (i + 1) * row].to_vec() })
    }

    /// Iterates over subarrays along the leading axis.
    pub fn rows(&self) -> Result<impl Iterator<Item = Array<T>> + '_> {
        let n = self.check_leading_axis()?;
        let row = self.row_size();
        let shape = self.shape[1 ..].to_vec();
        Ok((0 .. n).map(move |i| Array { shape: shape.clone(), data: self.data[i * row .. (i + 1) * row].to_vec() }))
    }

    /// Strided slice `start .. stop` with positive `step` along the leading axis.
    pub fn slice(&self, start: usize, stop: usize, step: usize) -> Result<Self> {
        let n = self.check_leading_axis()?;
        if step == 0 {
            return Err(Error::shape("slice step cannot be zero"));
        }
        let stop = stop.min(n);
        let indices: Vec<usize> = (start.min(stop) .. stop).step_by(step).collect();
        self.take(&indices)
    }

    /// Gathers subarrays along the leading axis.
    pub fn take(&self, indices: &[usize]) -> Result<Self> {
        let n = self.check_leading_axis()?;
        let row = self.row_size();
        let mut data = Vec::with_capacity(indices.len() * row);
        for &i in indices {
            if i >= n {
                return Err(Error::shape(format!("index {} is out of bounds for axis 0 with size {}", i, n)));
            }
            data.extend_from_slice(&self.data[i * row .. (i + 1) * row]);
        }
        let mut shape = self.shape.clone();
        shape[0] = indices.len();
        Ok(Array { shape, data })
    }

    /// Joins arrays along an existing axis. All other dimensions must agree.
    pub fn concatenate(arrays: &[&Array<T>], axis: usize) -> Result<Self> {
        let first = match arrays.first() {
            Some(first) => *first,
            None => return Err(Error::shape("need at least one array to concatenate")),
        };
        if axis >= first.ndim() {
            return Err(Error::shape(format!("axis {} is out of bounds for array of dimension {}", axis, first.ndim())));
        }
        for a in arrays {
            let compatible = a.ndim() == first.ndim()
                && a.shape.iter().zip(first.shape.iter()).enumerate().all(|(i, (x, y))| i == axis || x == y);
            if !compatible {
                return Err(Error::shape(format!("cannot concatenate arrays of shapes {:?} and {:?} along axis {}", first.shape, a.shape, axis)));
            }
        }
        let outer = shape_size(&first.shape[.. axis]);
        let inner = shape_size(&first.shape[axis + 1 ..]);
        let mut shape = first.shape.clone();
        shape[axis] = arrays.iter().map(|a| a.shape[axis]).sum();
        let mut data = Vec::with_capacity(shape_size(&shape));
        for o in 0 .. outer {
            for a in arrays {
                let chunk = a.shape[axis] * inner;
                data.extend_from_slice(&a.data[o * chunk .. (o + 1) * chunk]);
            }
        }
        Ok(Array { shape, data })
    }

    /// Stacks equally shaped arrays along a new leading axis.
    /// `element_shape` gives the result shape when `parts` is empty.
    pub fn stack(parts: Vec<Array<T>>, element_shape: &[usize]) -> Result<Self> {
        let mut shape = Vec::with_capacity(element_shape.len() + 1);
        shape.push(parts.len());
        shape.extend_from_slice(element_shape);
        let mut data = Vec::with_capacity(shape_size(&shape));
        for part in parts {
            if part.shape != element_shape {
                return Err(Error::shape(format!("cannot stack array of shape {:?} with arrays of shape {:?}", part.shape, element_shape)));
            }
            data.extend(part.data);
        }
        Ok(Array { shape, data })
    }

    /// Builds an array of `shape` whose element at each multi-index is read from
    /// flat position `source(index)` of this array.
    fn gather(&self, shape: Vec<usize>, source: impl Fn(&[usize]) -> usize) -> Self {
        let size = shape_size(&shape);
        let mut data = Vec::with_capacity(size);
        let mut index = vec![0; shape.len()];
        for _ in 0 .. size {
            data.push(self.data[source(&index)]);
            // Advance the row-major multi-index.
            for d in (0 .. shape.len()).rev() {
                index[d] += 1;
                if index[d] < shape[d] { break; }
                index[d] = 0;
            }
        }
        Array { shape, data }
    }

    /// Broadcasts to `shape` with trailing-aligned semantics.
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<Self> {
        let incompatible = || Error::shape(format!("cannot broadcast array of shape {:?} to shape {:?}", self.shape, shape));
        if shape.len() < self.ndim() {
            return Err(incompatible());
        }
        let offset = shape.len() - self.ndim();
        for (i, &n) in self.shape.iter().enumerate() {
            if n != shape[offset + i] && n != 1 {
                return Err(incompatible());
            }
        }
        let src_strides = strides(&self.shape);
        let src_shape = self.shape.clone();
        Ok(self.gather(shape.to_vec(), |index| {
            src_shape.iter().zip(src_strides.iter()).enumerate()
                .map(|(i, (&n, &stride))| if n == 1 { 0 } else { index[offset + i] * stride })
                .sum()
        }))
    }

    /// Inserts size-1 axes at the given positions of the output shape.
    pub fn expand_dims(&self, dimensions: &[usize]) -> Result<Self> {
        let mut dims = dimensions.to_vec();
        dims.sort_unstable();
        dims.dedup();
        let ndim_out = self.ndim() + dims.len();
        if dims.iter().any(|&d| d >= ndim_out) {
            return Err(Error::shape(format!("expand_dims dimensions {:?} out of bounds for output rank {}", dimensions, ndim_out)));
        }
        let mut source = self.shape.iter();
        let shape: Vec<usize> = (0 .. ndim_out)
            .map(|d| if dims.binary_search(&d).is_ok() { 1 } else { source.next().copied().unwrap_or(1) })
            .collect();
        self.reshape(&shape)
    }

    /// Removes the given size-1 axes.
    pub fn squeeze(&self, axes: &[usize]) -> Result<Self> {
        for &a in axes {
            if a >= self.ndim() || self.shape[a] != 1 {
                return Err(Error::shape(format!("cannot squeeze axis {} of array with shape {:?}", a, self.shape)));
            }
        }
        let shape: Vec<usize> = self.shape.iter().enumerate().filter(|(i, _)| !axes.contains(i)).map(|(_, &n)| n).collect();
        self.reshape(&shape)
    }

    /// Permutes axes: output axis `i` is input axis `permutation[i]`.
    pub fn transpose(&self, permutation: &[usize]) -> Result<Self> {
        let mut seen = vec![false; self.ndim()];
        let valid = permutation.len() == self.ndim()
            && permutation.iter().all(|&p| p < seen.len() && !core::mem::replace(&mut seen[p], true));
        if !valid {
            return Err(Error::shape(format!("invalid permutation {:?} for array of dimension {}", permutation, self.ndim())));
        }
        let src_strides = strides(&self.shape);
        let shape: Vec<usize> = permutation.iter().map(|&p| self.shape[p]).collect();
        let perm = permutation.to_vec();
        Ok(self.gather(shape, |index| index.iter().zip(perm.iter()).map(|(&i, &p)| i * src_strides[p]).sum()))
    }
}

impl<T: Copy> From<Vec<T>> for Array<T> {
    fn from(data: Vec<T>) -> Self {
        Array::from_vec(data)
    }
}

/// A raw array of any supported element type.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DynArray {
    U8(Array<u8>),
    U16(Array<u16>),
    U32(Array<u32>),
    U64(Array<u64>),
    I64(Array<i64>),
    Float0(Array<()>),
}

macro_rules! dyn_dispatch {
    ($value:expr, $a:ident => $body:expr) => {
        match $value {
            DynArray::U8($a) => $body,
            DynArray::U16($a) => $body,
            DynArray::U32($a) => $body,
            DynArray::U64($a) => $body,
            DynArray::I64($a) => $body,
            DynArray::Float0($a) => $body,
        }
    };
}

impl DynArray {
    pub fn dtype(&self) -> DType {
        match self {
            DynArray::U8(_) => DType::U8,
            DynArray::U16(_) => DType::U16,
            DynArray::U32(_) => DType::U32,
            DynArray::U64(_) => DType::U64,
            DynArray::I64(_) => DType::I64,
            DynArray::Float0(_) => DType::Float0,
        }
    }

    pub fn shape(&self) -> &[usize] {
        dyn_dispatch!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn size(&self) -> usize {
        dyn_dispatch!(self, a => a.size())
    }

    pub fn as_u8(&self) -> Option<&Array<u8>> {
        if let DynArray::U8(a) = self { Some(a) } else { None }
    }

    pub fn as_u16(&self) -> Option<&Array<u16>> {
        if let DynArray::U16(a) = self { Some(a) } else { None }
    }

    pub fn as_u32(&self) -> Option<&Array<u32>> {
        if let DynArray::U32(a) = self { Some(a) } else { None }
    }

    pub fn as_u64(&self) -> Option<&Array<u64>> {
        if let DynArray::U64(a) = self { Some(a) } else { None }
    }

    pub fn as_float0(&self) -> Option<&Array<()>> {
        if let DynArray::Float0(a) = self { Some(a) } else { None }
    }
}

macro_rules! dyn_from {
    ($t:ty, $variant:ident) => {
        impl From<Array<$t>> for DynArray {
            fn from(a: Array<$t>) -> Self {
                DynArray::$variant(a)
            }
        }
    };
}

dyn_from!(u8, U8);
dyn_from!(u16, U16);
dyn_from!(u32, U32);
dyn_from!(u64, U64);
dyn_from!(i64, I64);
dyn_from!((), Float0);
