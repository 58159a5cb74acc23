use ds_core::Scalar;

use crate::abstract_value::AbstractValue;
use crate::basic_vector::BasicVector;

/// Value carried by a port: numeric vector or type-erased value.
#[derive(Clone, Debug)]
pub enum PortValue<T: Scalar> {
    Vector(BasicVector<T>),
    Abstract(Box<dyn AbstractValue>),
}

impl<T: Scalar> PortValue<T> {
    pub fn as_vector(&self) -> Option<&BasicVector<T>> {
        match self {
            PortValue::Vector(v) => Some(v),
            PortValue::Abstract(_) => None,
        }
    }

    pub fn as_vector_mut(&mut self) -> Option<&mut BasicVector<T>> {
        match self {
            PortValue::Vector(v) => Some(v),
            PortValue::Abstract(_) => None,
        }
    }

    pub fn as_abstract(&self) -> Option<&dyn AbstractValue> {
        match self {
            PortValue::Vector(_) => None,
            PortValue::Abstract(v) => Some(v.as_ref()),
        }
    }

    pub fn as_abstract_mut(&mut self) -> Option<&mut dyn AbstractValue> {
        match self {
            PortValue::Vector(_) => None,
            PortValue::Abstract(v) => Some(v.as_mut()),
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, PortValue::Vector(_))
    }
}

impl<T: Scalar> From<BasicVector<T>> for PortValue<T> {
    fn from(v: BasicVector<T>) -> Self {
        PortValue::Vector(v)
    }
}
