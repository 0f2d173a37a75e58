//! Splittable counter-based random number generation.
//!
//! Keys are values. `seed` makes one, `split` and `fold_in` derive new ones, and
//! `random_bits` turns a key into unsigned integers. Every operation works over arrays of
//! keys of any batch shape and gives the same bits however the batch is arranged.
//!
//! The default implementation hashes counters with Threefry-2x32. The `rbg` variants
//! draw bits from a counter-mode Philox-4x32-10 generator.

pub mod array;
pub mod aval;
pub mod bits;
pub mod config;
pub mod error;
pub mod key;
pub mod prng;
pub mod rbg;
pub mod stream;
pub mod threefry;
pub mod vmap;

pub use array::{Array, DType, DynArray};
pub use error::{Error, Result};
pub use key::KeyArray;
pub use prng::{default_impl, fold_in, fold_in_array, lookup, random_bits, seed, seed_array, split, unwrap, wrap, PrngImpl};
pub use rbg::{Philox4x32, RBG_PRNG_IMPL, UNSAFE_RBG_PRNG_IMPL};
pub use stream::KeyStream;
pub use threefry::{threefry2x32, threefry_2x32, Lowering, THREEFRY_PRNG_IMPL};
pub use rand_core::{RngCore, SeedableRng};
