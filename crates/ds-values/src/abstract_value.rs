//! Type-erased values for abstract state, abstract parameters and abstract ports.

use core::any::{Any, type_name};
use core::fmt::Debug;

use dyn_clone::DynClone;

use crate::error::{ValueError, ValueResult};

/// A clonable, type-erased value.
pub trait AbstractValue: DynClone + Debug + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Name of the wrapped type, for error messages.
    fn value_type_name(&self) -> &'static str;
    /// Replace the contents with a copy of `other`; both must hold the same type.
    fn set_from(&mut self, other: &dyn AbstractValue) -> ValueResult<()>;
}

dyn_clone::clone_trait_object!(AbstractValue);

/// Concrete carrier for a value of type `V`.
#[derive(Clone, Debug, PartialEq)]
pub struct Value<V>(pub V);

impl<V> Value<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    pub fn boxed(value: V) -> Box<dyn AbstractValue> {
        Box::new(Value(value))
    }
}

impl<V> AbstractValue for Value<V>
where
    V: Clone + Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn value_type_name(&self) -> &'static str {
        type_name::<V>()
    }

    fn set_from(&mut self, other: &dyn AbstractValue) -> ValueResult<()> {
        let source = other
            .as_any()
            .downcast_ref::<Value<V>>()
            .ok_or(ValueError::TypeMismatch {
                expected: type_name::<V>(),
                actual: other.value_type_name(),
            })?;
        self.0.clone_from(&source.0);
        Ok(())
    }
}

impl dyn AbstractValue {
    pub fn maybe_get<V: 'static>(&self) -> Option<&V> {
        self.as_any().downcast_ref::<Value<V>>().map(|v| &v.0)
    }

    pub fn get<V: 'static>(&self) -> ValueResult<&V> {
        let actual = self.value_type_name();
        self.maybe_get::<V>().ok_or(ValueError::TypeMismatch {
            expected: type_name::<V>(),
            actual,
        })
    }

    pub fn get_mut<V: 'static>(&mut self) -> ValueResult<&mut V> {
        let actual = self.value_type_name();
        self.as_any_mut()
            .downcast_mut::<Value<V>>()
            .map(|v| &mut v.0)
            .ok_or(ValueError::TypeMismatch {
                expected: type_name::<V>(),
                actual,
            })
    }

    pub fn same_type_as(&self, other: &dyn AbstractValue) -> bool {
        self.as_any().type_id() == other.as_any().type_id()
    }
}
