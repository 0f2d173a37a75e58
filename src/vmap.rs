use tracing::trace;

use crate::array::{broadcast_shapes, Array};
use crate::error::{Error, Result};

// Batched evaluation of per-key operations. An operation written for a single
// key (or a single key and a single datum) is lifted over leading batch axes by
// evaluating it once per batch element and stacking the results in order.
// The result is the same whichever way the caller groups its batches.

/// Applies `f` to every subarray of `x` obtained by fixing the leading `n` indices.
/// The result has shape `(*x.shape[..n], *f_out_shape)`.
pub fn apply_unary<A, B>(n: usize, x: &Array<A>, f: &dyn Fn(&Array<A>) -> Result<Array<B>>) -> Result<Array<B>>
where
    A: Copy + Default,
    B: Copy,
{
    if n == 0 {
        return f(x);
    }
    if x.ndim() < n {
        return Err(Error::shape(format!("cannot vectorize over {} axes of an array of shape {:?}", n, x.shape())));
    }
    if x.shape()[0] == 0 {
        // Nothing to evaluate; the output shape still comes from one evaluation.
        let sample = apply_unary(n - 1, &Array::full(&x.shape()[1 ..], A::default()), f)?;
        return Array::stack(Vec::new(), sample.shape());
    }
    let parts = x.rows()?.map(|row| apply_unary(n - 1, &row, f)).collect::<Result<Vec<_>>>()?;
    let element_shape = parts[0].shape().to_vec();
    Array::stack(parts, &element_shape)
}

/// Lifts a single-element function over `n` leading batch axes.
pub fn iterated_vmap_unary<A, B>(n: usize, f: impl Fn(&Array<A>) -> Result<Array<B>>) -> impl Fn(&Array<A>) -> Result<Array<B>>
where
    A: Copy + Default,
    B: Copy,
{
    move |x: &Array<A>| {
        trace!(batch_rank = n, shape = ?x.shape(), "vectorizing unary operation");
        apply_unary(n, x, &f)
    }
}

/// Evaluates `f` over batch shapes `s1` of `x` and `s2` of `y` with trailing-aligned broadcasting.
/// Leading axes are resolved outermost first, which is the same as wrapping `f` from the trailing axis inward.
pub fn apply_binary<A, B, C>(
    s1: &[usize],
    s2: &[usize],
    x: &Array<A>,
    y: &Array<B>,
    f: &dyn Fn(&Array<A>, &Array<B>) -> Result<Array<C>>,
) -> Result<Array<C>>
where
    A: Copy + Default,
    B: Copy + Default,
    C: Copy,
{
    match (s1.len(), s2.len()) {
        (0, 0) => f(x, y),
        (0, n2) => apply_unary(n2, y, &|y: &Array<B>| f(x, y)),
        (n1, 0) => apply_unary(n1, x, &|x: &Array<A>| f(x, y)),
        (n1, n2) if n1 > n2 => apply_unary(n1 - n2, x, &|x: &Array<A>| apply_binary(&s1[n1 - n2 ..], s2, x, y, f)),
        (n1, n2) if n1 < n2 => apply_unary(n2 - n1, y, &|y: &Array<B>| apply_binary(s1, &s2[n2 - n1 ..], x, y, f)),
        _ => {
            let (a, b) = (s1[0], s2[0]);
            if a != b && a != 1 && b != 1 {
                return Err(Error::Broadcast { lhs: s1.to_vec(), rhs: s2.to_vec() });
            }
            // A size-1 axis is squeezed and reused for every element of the other operand's axis.
            let count = if a == 1 { b } else { a };
            let row_x = |i: usize| if a == 1 { x.index(0) } else { x.index(i) };
            let row_y = |i: usize| if b == 1 { y.index(0) } else { y.index(i) };
            let (t1, t2) = (&s1[1 ..], &s2[1 ..]);
            if count == 0 {
                let px = if a == 0 { Array::full(&x.shape()[1 ..], A::default()) } else { row_x(0)? };
                let py = if b == 0 { Array::full(&y.shape()[1 ..], B::default()) } else { row_y(0)? };
                let sample = apply_binary(t1, t2, &px, &py, f)?;
                return Array::stack(Vec::new(), sample.shape());
            }
            let parts = (0 .. count)
                .map(|i| apply_binary(t1, t2, &row_x(i)?, &row_y(i)?, f))
                .collect::<Result<Vec<_>>>()?;
            let element_shape = parts[0].shape().to_vec();
            Array::stack(parts, &element_shape)
        }
    }
}

/// Lifts a two-argument single-element function over batch shapes `shape1` and `shape2`
/// with broadcasting. Fails immediately if the shapes cannot be broadcast.
pub fn iterated_vmap_binary_bcast<A, B, C>(
    shape1: &[usize],
    shape2: &[usize],
    f: impl Fn(&Array<A>, &Array<B>) -> Result<Array<C>>,
) -> Result<impl Fn(&Array<A>, &Array<B>) -> Result<Array<C>>>
where
    A: Copy + Default,
    B: Copy + Default,
    C: Copy,
{
    broadcast_shapes(shape1, shape2)?;
    let (s1, s2) = (shape1.to_vec(), shape2.to_vec());
    Ok(move |x: &Array<A>, y: &Array<B>| {
        trace!(lhs = ?s1, rhs = ?s2, "vectorizing broadcast binary operation");
        apply_binary(&s1, &s2, x, y, &f)
    })
}
