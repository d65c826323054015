use ndarray::prelude::*;
use ndarray::Data;
use num_traits::Float;

/// Returns True if every array element is finite (neither infinite nor NaN)
///
/// Example:
///
/// ```rust
///
/// use ot_solvers::ndarray_logical::all_finite;
/// use ndarray::array;
///
/// assert!(all_finite(&array![[1f32, 42.], [2., 11.]]));
/// assert!(!all_finite(&array![f64::NAN, 0.]));
/// ```
///
pub fn all_finite<S, D, A>(arr: &ArrayBase<S, D>) -> bool
where
    A: Float,
    S: Data<Elem = A>,
    D: Dimension,
{
    arr.iter().all(|ele| ele.is_finite())
}

/// Returns True if any array element is exactly zero
pub fn any_zero<S, D, A>(arr: &ArrayBase<S, D>) -> bool
where
    A: Float,
    S: Data<Elem = A>,
    D: Dimension,
{
    arr.iter().any(|ele| ele.is_zero())
}
