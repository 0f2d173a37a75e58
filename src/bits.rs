use crate::array::{shape_size, Array, DynArray};
use crate::error::{Error, Result};

// Packing of a flat 32-bit word sequence into unsigned integers of a requested bit width.

/// Fails unless `bit_width` is 8, 16, 32 or 64.
pub fn check_bit_width(bit_width: u32) -> Result<()> {
    match bit_width {
        8 | 16 | 32 | 64 => Ok(()),
        _ => Err(Error::BitWidth(bit_width)),
    }
}

/// Number of 32-bit words needed for `size` values of `bit_width` bits, rounded up.
pub fn word_count(bit_width: u32, size: usize) -> Result<usize> {
    let bits = (bit_width as usize)
        .checked_mul(size)
        .ok_or_else(|| Error::shape(format!("{} values of {} bits overflow the addressable range", size, bit_width)))?;
    Ok(bits / 32 + usize::from(bits % 32 > 0))
}

/// Reassembles `words` into `shape` values of `bit_width` bits.
///
/// - 32: words are used directly.
/// - 64: the sequence is split into halves, value `i` is `(first[i] << 32) | second[i]`.
/// - 8 and 16: word `j` yields `32 / bit_width` values at indices `j * (32 / bit_width) + k`,
///   value `k` being `(word >> (bit_width * k))` masked to `bit_width` bits;
///   the first `size` values are kept.
pub fn words_to_bits(words: Vec<u32>, bit_width: u32, shape: &[usize]) -> Result<DynArray> {
    check_bit_width(bit_width)?;
    let size = shape_size(shape);
    let expected = word_count(bit_width, size)?;
    if words.len() != expected {
        return Err(Error::shape(format!("expected {} words for {} {}-bit values; got {}", expected, size, bit_width, words.len())));
    }
    Ok(match bit_width {
        32 => Array::new(shape.to_vec(), words)?.into(),
        64 => {
            let (high, low) = words.split_at(size);
            let data = high.iter().zip(low.iter()).map(|(&h, &l)| ((h as u64) << 32) | l as u64).collect();
            Array::new(shape.to_vec(), data)?.into()
        }
        16 => Array::new(shape.to_vec(), slice_words(&words, 16, size).map(|x| x as u16).collect())?.into(),
        _ => Array::new(shape.to_vec(), slice_words(&words, 8, size).map(|x| x as u8).collect())?.into(),
    })
}

/// Bit-slices each word into `32 / bit_width` sub-values, lowest bits first.
fn slice_words(words: &[u32], bit_width: u32, size: usize) -> impl Iterator<Item = u32> + '_ {
    let mask = (1u32 << bit_width) - 1;
    words
        .iter()
        .flat_map(move |&w| (0 .. 32 / bit_width).map(move |k| (w >> (bit_width * k)) & mask))
        .take(size)
}
