use thiserror::Error;

use crate::array::DType;

/// Errors raised by key and bit generation operations.
/// All of them indicate misuse at the call site; none are transient.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid PRNG key data: expected key data rank >= {expected_rank}; got shape {shape}")]
    KeyDataRank { expected_rank: usize, shape: String },

    #[error("invalid PRNG key data: expected key data shape to end with {key_shape:?}; got shape {shape} for impl {tag}")]
    KeyDataShape { key_shape: Vec<usize>, shape: String, tag: &'static str },

    #[error("invalid PRNG key data: expected dtype uint32; got dtype {0}")]
    KeyDataDtype(DType),

    #[error("PRNG key seed must be a scalar; got shape {0:?}")]
    SeedNotScalar(Vec<usize>),

    #[error("PRNG key seed must be an integer; got {0}")]
    SeedDtype(String),

    #[error("fold-in data must be a scalar; got shape {0:?}")]
    FoldInDataNotScalar(Vec<usize>),

    #[error("arguments to threefry2x32 must have uint32 type, got {0:?}")]
    HashDtype(Vec<DType>),

    #[error("{0} got invalid prng key")]
    InvalidKey(&'static str),

    #[error("requires 8-, 16-, 32- or 64-bit field width; got {0}")]
    BitWidth(u32),

    #[error("{0} is not defined for float0 keys")]
    Float0Key(&'static str),

    #[error("{0}")]
    NotSized(&'static str),

    #[error("dtype argument not supported for concatenating key arrays")]
    ConcatenateDtype,

    #[error("random functions have limited support for shape polymorphism: the product of the known dimensions must be even; got shape {0}")]
    ShapePolymorphism(String),

    #[error("incompatible shapes for broadcasting: {lhs:?} and {rhs:?}")]
    Broadcast { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("{0}")]
    Shape(String),

    #[error("unknown PRNG implementation {0:?}")]
    UnknownImpl(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for errors that signal malformed key data, seeds, hash inputs or bit widths.
    pub fn is_type_error(&self) -> bool {
        matches!(
            self,
            Error::KeyDataRank { .. }
                | Error::KeyDataShape { .. }
                | Error::KeyDataDtype(_)
                | Error::SeedNotScalar(_)
                | Error::SeedDtype(_)
                | Error::FoldInDataNotScalar(_)
                | Error::HashDtype(_)
                | Error::InvalidKey(_)
                | Error::BitWidth(_)
                | Error::Float0Key(_)
        )
    }

    /// True for errors caused by calling an operation the value does not support.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Error::NotSized(_) | Error::ConcatenateDtype)
    }

    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Error::Shape(msg.into())
    }
}

pub type Result<T> = core::result::Result<T, Error>;
