//! Owned parameter vector

use serde::{Deserialize, Serialize};

use crate::error::{ContractViolation, OptResult};

use super::partition::SliceRange;

/// A fixed-length real vector
///
/// Holds a network's weights, one sample, one gradient accumulator or one
/// per-parameter statistic. Views are always taken through an explicit
/// [`SliceRange`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector {
    values: Vec<f64>,
}

impl ParameterVector {
    /// A zero vector of length `dimension`
    pub fn zeros(dimension: usize) -> Self {
        Self {
            values: vec![0.0; dimension],
        }
    }

    /// A constant vector
    pub fn filled(dimension: usize, value: f64) -> Self {
        Self {
            values: vec![value; dimension],
        }
    }

    /// Wrap existing values
    pub fn from_vec(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Vector length
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the vector is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All values
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// All values, mutable
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Values inside `range`
    pub fn slice(&self, range: SliceRange) -> &[f64] {
        &self.values[range.range()]
    }

    /// Values inside `range`, mutable
    pub fn slice_mut(&mut self, range: SliceRange) -> &mut [f64] {
        &mut self.values[range.range()]
    }

    /// Disjoint mutable views, one per chunk
    ///
    /// `chunks` must be ascending and contiguous, as produced by
    /// [`SliceRange::split`].
    pub fn chunks_mut(&mut self, chunks: &[SliceRange]) -> Vec<&mut [f64]> {
        let start = chunks.first().map_or(0, |c| c.start);
        let mut rest: &mut [f64] = &mut self.values[start..];
        let mut views = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(chunk.count);
            views.push(head);
            rest = tail;
        }
        views
    }

    /// Consume into the raw values
    pub fn into_vec(self) -> Vec<f64> {
        self.values
    }

    /// Set every element to zero
    pub fn clear(&mut self) {
        self.fill(0.0);
    }

    /// Set every element to `value`
    pub fn fill(&mut self, value: f64) {
        self.values.iter_mut().for_each(|v| *v = value);
    }

    /// Overwrite with `other`'s values
    pub fn copy_from(&mut self, other: &ParameterVector) -> OptResult<()> {
        self.check_len(other.len())?;
        self.values.copy_from_slice(&other.values);
        Ok(())
    }

    /// Overwrite every value from a buffer of the same length
    pub fn replace(&mut self, values: Vec<f64>) -> OptResult<()> {
        self.check_len(values.len())?;
        self.values = values;
        Ok(())
    }

    /// Overwrite with the element-wise sum of `partials`
    ///
    /// Partials are added in slice order, so the result is independent of
    /// which threads produced them.
    pub fn sum_partials(&mut self, partials: &[ParameterVector]) -> OptResult<()> {
        for partial in partials {
            self.check_len(partial.len())?;
        }
        self.clear();
        for partial in partials {
            for (acc, &v) in self.values.iter_mut().zip(&partial.values) {
                *acc += v;
            }
        }
        Ok(())
    }

    /// Sum of squares over `range`
    pub fn squared_norm_over(&self, range: SliceRange) -> f64 {
        self.slice(range).iter().map(|v| v * v).sum()
    }

    /// Euclidean norm of the whole vector
    pub fn norm(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    fn check_len(&self, actual: usize) -> OptResult<()> {
        if actual != self.values.len() {
            return Err(ContractViolation::DimensionMismatch {
                expected: self.values.len(),
                actual,
            }
            .into());
        }
        Ok(())
    }
}

impl From<Vec<f64>> for ParameterVector {
    fn from(values: Vec<f64>) -> Self {
        Self::from_vec(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OptimizerError;
    use approx::assert_relative_eq;

    #[test]
    fn test_sum_partials() {
        let partials = vec![
            ParameterVector::from_vec(vec![1.0, 2.0, 3.0]),
            ParameterVector::from_vec(vec![0.5, 0.5, 0.5]),
            ParameterVector::from_vec(vec![-1.0, 0.0, 1.0]),
        ];
        let mut sum = ParameterVector::filled(3, 99.0);
        sum.sum_partials(&partials).unwrap();
        assert_eq!(sum.as_slice(), &[0.5, 2.5, 4.5]);
    }

    #[test]
    fn test_sum_partials_length_check() {
        let partials = vec![ParameterVector::zeros(2)];
        let mut sum = ParameterVector::zeros(3);
        let err = sum.sum_partials(&partials).unwrap_err();
        assert!(matches!(
            err,
            OptimizerError::Contract(ContractViolation::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_slice_views() {
        let mut v = ParameterVector::from_vec(vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        let range = SliceRange::new(1, 3);
        assert_eq!(v.slice(range), &[1.0, 2.0, 3.0]);

        v.slice_mut(range).iter_mut().for_each(|x| *x *= 10.0);
        assert_eq!(v.as_slice(), &[0.0, 10.0, 20.0, 30.0, 4.0]);
        assert_relative_eq!(v.squared_norm_over(SliceRange::new(3, 2)), 916.0);
    }

    #[test]
    fn test_chunks_mut_are_disjoint() {
        let mut v = ParameterVector::zeros(7);
        let chunks = SliceRange::new(2, 5).split(2);
        for (k, view) in v.chunks_mut(&chunks).into_iter().enumerate() {
            view.iter_mut().for_each(|x| *x = k as f64 + 1.0);
        }
        assert_eq!(v.as_slice(), &[0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_copy_and_clear() {
        let src = ParameterVector::from_vec(vec![1.0, -1.0]);
        let mut dst = ParameterVector::zeros(2);
        dst.copy_from(&src).unwrap();
        assert_eq!(dst, src);
        dst.clear();
        assert_eq!(dst.as_slice(), &[0.0, 0.0]);
    }
}
