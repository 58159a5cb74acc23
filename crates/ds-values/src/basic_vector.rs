use core::ops::{Index, IndexMut};

use ds_core::Scalar;
use nalgebra::DVector;

use crate::error::{ValueError, ValueResult};

/// Fixed-size numeric vector over any scalar type.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicVector<T: Scalar> {
    values: DVector<T>,
}

impl<T: Scalar> BasicVector<T> {
    pub fn new(values: DVector<T>) -> Self {
        Self { values }
    }

    pub fn zeros(size: usize) -> Self {
        Self::new(DVector::from_element(size, T::zero()))
    }

    pub fn from_vec(values: Vec<T>) -> Self {
        Self::new(DVector::from_vec(values))
    }

    /// Element-wise embedding of plain numbers.
    pub fn from_f64_slice(values: &[f64]) -> Self {
        Self::new(DVector::from_iterator(
            values.len(),
            values.iter().map(|&v| T::from_f64(v)),
        ))
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.values.get(index)
    }

    pub fn set(&mut self, index: usize, value: T) -> ValueResult<()> {
        let len = self.size();
        let slot = self.values.get_mut(index).ok_or(ValueError::IndexOob {
            what: "BasicVector::set",
            index,
            len,
        })?;
        *slot = value;
        Ok(())
    }

    pub fn values(&self) -> &DVector<T> {
        &self.values
    }

    /// Raw access; replacing the vector changes its size.
    pub fn values_mut(&mut self) -> &mut DVector<T> {
        &mut self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.values.iter()
    }

    /// Copy values from a vector of the same size.
    pub fn set_from(&mut self, other: &BasicVector<T>) -> ValueResult<()> {
        if other.size() != self.size() {
            return Err(ValueError::SizeMismatch {
                what: "BasicVector::set_from",
                expected: self.size(),
                actual: other.size(),
            });
        }
        self.values.clone_from(&other.values);
        Ok(())
    }

    /// Numeric values, when every element has one.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        self.values.iter().map(Scalar::to_f64).collect()
    }

    /// Element-wise conversion into another scalar type.
    pub fn map<U: Scalar>(&self, f: impl Fn(&T) -> U) -> BasicVector<U> {
        BasicVector::new(DVector::from_iterator(self.size(), self.values.iter().map(f)))
    }
}

impl<T: Scalar> From<DVector<T>> for BasicVector<T> {
    fn from(values: DVector<T>) -> Self {
        Self::new(values)
    }
}

impl<T: Scalar> From<Vec<T>> for BasicVector<T> {
    fn from(values: Vec<T>) -> Self {
        Self::from_vec(values)
    }
}

impl<T: Scalar> Index<usize> for BasicVector<T> {
    type Output = T;
    fn index(&self, index: usize) -> &T {
        &self.values[index]
    }
}

impl<T: Scalar> IndexMut<usize> for BasicVector<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.values[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_core::AutoDiff;

    #[test]
    fn set_from_checks_size() {
        let mut a = BasicVector::<f64>::zeros(2);
        let b = BasicVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            a.set_from(&b),
            Err(ValueError::SizeMismatch { expected: 2, actual: 3, .. })
        ));
        a.set_from(&BasicVector::from_vec(vec![4.0, 5.0])).unwrap();
        assert_eq!(a[1], 5.0);
    }

    #[test]
    fn set_out_of_range_is_an_error() {
        let mut a = BasicVector::<f64>::zeros(1);
        assert!(a.set(3, 1.0).is_err());
        a.set(0, 2.0).unwrap();
        assert_eq!(a.get(0), Some(&2.0));
    }

    #[test]
    fn map_converts_scalar_type() {
        let a = BasicVector::<f64>::from_f64_slice(&[1.0, -2.0]);
        let b: BasicVector<AutoDiff> = a.map(|&v| AutoDiff::constant(v));
        assert_eq!(b.to_f64_vec(), Some(vec![1.0, -2.0]));
    }
}
