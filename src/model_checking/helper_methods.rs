use ndarray::{arr1, Array1};
use ndarray_stats::QuantileExt;

use super::bit_vector::BitVector;
use super::value_type::ValueType;

pub fn to_f64_vect<V: ValueType>(v: &[V]) -> Vec<f64> {
    v.iter().map(|x| x.to_f64()).collect()
}

pub fn absolute_diff_vect(a: &[f64], b: &[f64]) -> Array1<f64> {
    let c: Array1<f64> = arr1(b) - &arr1(a);
    c.mapv(f64::abs)
}

/// Largest pointwise change between two iterates. With `relative` each change
/// is divided by the new value (changes at zero stay absolute).
pub fn max_difference<V: ValueType>(old: &[V], new: &[V], relative: bool) -> f64 {
    let a = to_f64_vect(old);
    let b = to_f64_vect(new);
    let mut diff = absolute_diff_vect(&a, &b);
    if relative {
        diff.iter_mut().zip(b.iter()).for_each(|(d, n)| {
            if *n != 0.0 {
                *d /= n.abs();
            }
        });
    }
    match diff.max() {
        Ok(m) => *m,
        Err(_) if diff.is_empty() => 0.0,
        Err(_) => f64::INFINITY,
    }
}

/// Maximum of `values` over the set positions; zero if none is set.
pub fn max_if<V: ValueType>(values: &[V], filter: &BitVector) -> V {
    filter
        .iter()
        .map(|i| values[i])
        .fold(None, |acc: Option<V>, v| match acc {
            None => Some(v),
            Some(m) => Some(m.max_value(v)),
        })
        .unwrap_or_else(V::zero)
}

/// Keeps the entries of `values` whose index is set in `filter`.
pub fn filter_vector<V: Copy>(values: &[V], filter: &BitVector) -> Vec<V> {
    filter.iter().map(|i| values[i]).collect()
}

/// Writes `values` back into the positions set in `filter`.
pub fn set_vector_values<V: Copy>(target: &mut [V], filter: &BitVector, values: &[V]) {
    for (i, state) in filter.iter().enumerate() {
        target[state] = values[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn differences() {
        assert_eq!(max_difference(&[1.0, 2.0], &[1.5, 1.0], false), 1.0);
        assert_eq!(max_difference(&[1.0, 0.0], &[2.0, 0.0], true), 0.5);
        assert_eq!(max_difference::<f64>(&[], &[], false), 0.0);
        assert_eq!(max_difference(&[0.0], &[f64::NAN], false), f64::INFINITY);
    }

    #[test]
    fn filtered_access() {
        let filter = BitVector::from_indices(4, vec![1, 3]);
        let values = vec![5.0, 2.0, 9.0, 3.0];
        assert_eq!(max_if(&values, &filter), 3.0);
        assert_eq!(max_if(&values, &BitVector::new(4, false)), 0.0);
        assert_eq!(filter_vector(&values, &filter), vec![2.0, 3.0]);
        let mut target = vec![0.0; 4];
        set_vector_values(&mut target, &filter, &[7.0, 8.0]);
        assert_eq!(target, vec![0.0, 7.0, 0.0, 8.0]);
    }
}
