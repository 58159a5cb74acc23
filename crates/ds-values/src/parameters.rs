use ds_core::{HasSystemId, Scalar, SystemId};

use crate::abstract_value::AbstractValue;
use crate::basic_vector::BasicVector;
use crate::error::{ValueError, ValueResult};

/// Numeric and abstract parameters owned by one system.
#[derive(Clone, Debug)]
pub struct Parameters<T: Scalar> {
    system_id: Option<SystemId>,
    numeric: Vec<BasicVector<T>>,
    abstract_params: Vec<Box<dyn AbstractValue>>,
}

impl<T: Scalar> Parameters<T> {
    pub fn new(numeric: Vec<BasicVector<T>>, abstract_params: Vec<Box<dyn AbstractValue>>) -> Self {
        Self {
            system_id: None,
            numeric,
            abstract_params,
        }
    }

    pub fn with_system_id(mut self, id: SystemId) -> Self {
        self.system_id = Some(id);
        self
    }

    pub fn num_numeric_groups(&self) -> usize {
        self.numeric.len()
    }

    pub fn num_abstract(&self) -> usize {
        self.abstract_params.len()
    }

    pub fn numeric(&self, index: usize) -> ValueResult<&BasicVector<T>> {
        let len = self.numeric.len();
        self.numeric.get(index).ok_or(ValueError::IndexOob {
            what: "numeric parameter group",
            index,
            len,
        })
    }

    pub fn numeric_mut(&mut self, index: usize) -> ValueResult<&mut BasicVector<T>> {
        let len = self.numeric.len();
        self.numeric.get_mut(index).ok_or(ValueError::IndexOob {
            what: "numeric parameter group",
            index,
            len,
        })
    }

    pub fn abstract_value(&self, index: usize) -> ValueResult<&dyn AbstractValue> {
        let len = self.abstract_params.len();
        self.abstract_params
            .get(index)
            .map(|v| v.as_ref())
            .ok_or(ValueError::IndexOob {
                what: "abstract parameter",
                index,
                len,
            })
    }

    pub fn abstract_value_mut(&mut self, index: usize) -> ValueResult<&mut dyn AbstractValue> {
        let len = self.abstract_params.len();
        match self.abstract_params.get_mut(index) {
            Some(v) => Ok(v.as_mut()),
            None => Err(ValueError::IndexOob {
                what: "abstract parameter",
                index,
                len,
            }),
        }
    }

    /// Group sizes of the numeric parameters.
    pub fn numeric_sizes(&self) -> Vec<usize> {
        self.numeric.iter().map(BasicVector::size).collect()
    }

    pub fn set_from(&mut self, other: &Parameters<T>) -> ValueResult<()> {
        if self.numeric.len() != other.numeric.len() {
            return Err(ValueError::SizeMismatch {
                what: "numeric parameter group count",
                expected: self.numeric.len(),
                actual: other.numeric.len(),
            });
        }
        if self.abstract_params.len() != other.abstract_params.len() {
            return Err(ValueError::SizeMismatch {
                what: "abstract parameter count",
                expected: self.abstract_params.len(),
                actual: other.abstract_params.len(),
            });
        }
        for (mine, theirs) in self.numeric.iter_mut().zip(&other.numeric) {
            mine.set_from(theirs)?;
        }
        for (mine, theirs) in self.abstract_params.iter_mut().zip(&other.abstract_params) {
            mine.set_from(theirs.as_ref())?;
        }
        Ok(())
    }
}

impl<T: Scalar> Default for Parameters<T> {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl<T: Scalar> HasSystemId for Parameters<T> {
    fn system_id(&self) -> Option<SystemId> {
        self.system_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_value::Value;

    #[test]
    fn typed_access() {
        let mut p = Parameters::<f64>::new(
            vec![BasicVector::from_f64_slice(&[0.5, 2.0])],
            vec![Value::boxed("label".to_string())],
        );
        assert_eq!(p.numeric(0).unwrap()[1], 2.0);
        p.numeric_mut(0).unwrap()[1] = 3.0;
        assert_eq!(p.numeric_sizes(), vec![2]);
        assert_eq!(p.abstract_value(0).unwrap().get::<String>().unwrap(), "label");
        assert!(p.numeric(1).is_err());
    }

    #[test]
    fn set_from_checks_counts() {
        let mut a = Parameters::<f64>::new(vec![BasicVector::zeros(1)], vec![]);
        let b = Parameters::<f64>::new(vec![], vec![]);
        assert!(a.set_from(&b).is_err());
        let c = Parameters::<f64>::new(vec![BasicVector::from_f64_slice(&[4.0])], vec![]);
        a.set_from(&c).unwrap();
        assert_eq!(a.numeric(0).unwrap()[0], 4.0);
    }
}
