//! State containers.
//!
//! Each container holds the values owned by one system plus one
//! sub-container per child, so a composite system's state is the disjoint
//! union of its descendants' state.

use core::fmt;
use core::mem;

use ds_core::{HasSystemId, Scalar, SystemId};

use crate::abstract_value::AbstractValue;
use crate::basic_vector::BasicVector;
use crate::error::{ValueError, ValueResult};

fn check_children(what: &'static str, expected: usize, actual: usize) -> ValueResult<()> {
    if expected != actual {
        return Err(ValueError::StructureMismatch {
            what,
            detail: format!("expected {expected} subsystem entries, got {actual}"),
        });
    }
    Ok(())
}

fn missing_child(what: &'static str, index: usize, len: usize) -> ValueError {
    ValueError::IndexOob { what, index, len }
}

/// Continuous state `x = [q; v; z]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ContinuousState<T: Scalar> {
    system_id: Option<SystemId>,
    value: BasicVector<T>,
    num_q: usize,
    num_v: usize,
    num_z: usize,
    subsystems: Vec<ContinuousState<T>>,
}

impl<T: Scalar> ContinuousState<T> {
    pub fn new(value: BasicVector<T>, num_q: usize, num_v: usize, num_z: usize) -> ValueResult<Self> {
        let partition = num_q + num_v + num_z;
        if partition != value.size() {
            return Err(ValueError::SizeMismatch {
                what: "ContinuousState q+v+z partition",
                expected: value.size(),
                actual: partition,
            });
        }
        Ok(Self {
            system_id: None,
            value,
            num_q,
            num_v,
            num_z,
            subsystems: Vec::new(),
        })
    }

    /// All entries treated as miscellaneous (`z`) states.
    pub fn from_vector(value: BasicVector<T>) -> Self {
        let num_z = value.size();
        Self {
            system_id: None,
            value,
            num_q: 0,
            num_v: 0,
            num_z,
            subsystems: Vec::new(),
        }
    }

    pub fn with_system_id(mut self, id: SystemId) -> Self {
        self.system_id = Some(id);
        self
    }

    pub fn set_system_id(&mut self, id: SystemId) {
        self.system_id = Some(id);
    }

    /// Total size including every subsystem.
    pub fn size(&self) -> usize {
        self.value.size() + self.subsystems.iter().map(Self::size).sum::<usize>()
    }

    pub fn own_size(&self) -> usize {
        self.value.size()
    }

    pub fn num_q(&self) -> usize {
        self.num_q + self.subsystems.iter().map(Self::num_q).sum::<usize>()
    }

    pub fn num_v(&self) -> usize {
        self.num_v + self.subsystems.iter().map(Self::num_v).sum::<usize>()
    }

    pub fn num_z(&self) -> usize {
        self.num_z + self.subsystems.iter().map(Self::num_z).sum::<usize>()
    }

    /// This system's own entries.
    pub fn vector(&self) -> &BasicVector<T> {
        &self.value
    }

    pub fn vector_mut(&mut self) -> &mut BasicVector<T> {
        &mut self.value
    }

    pub fn num_subsystems(&self) -> usize {
        self.subsystems.len()
    }

    pub fn subsystem(&self, index: usize) -> Option<&ContinuousState<T>> {
        self.subsystems.get(index)
    }

    pub fn subsystem_mut(&mut self, index: usize) -> Option<&mut ContinuousState<T>> {
        self.subsystems.get_mut(index)
    }

    pub fn push_subsystem(&mut self, sub: ContinuousState<T>) {
        self.subsystems.push(sub);
    }

    pub fn take_subsystem(&mut self, index: usize) -> ValueResult<ContinuousState<T>> {
        let len = self.subsystems.len();
        self.subsystems
            .get_mut(index)
            .map(mem::take)
            .ok_or_else(|| missing_child("ContinuousState subsystem", index, len))
    }

    pub fn restore_subsystem(&mut self, index: usize, sub: ContinuousState<T>) -> ValueResult<()> {
        let len = self.subsystems.len();
        let slot = self
            .subsystems
            .get_mut(index)
            .ok_or_else(|| missing_child("ContinuousState subsystem", index, len))?;
        *slot = sub;
        Ok(())
    }

    /// Copy every value from a container of identical structure.
    pub fn set_from(&mut self, other: &ContinuousState<T>) -> ValueResult<()> {
        check_children("ContinuousState", self.subsystems.len(), other.subsystems.len())?;
        self.value.set_from(&other.value)?;
        for (mine, theirs) in self.subsystems.iter_mut().zip(&other.subsystems) {
            mine.set_from(theirs)?;
        }
        Ok(())
    }

    /// Flatten in depth-first order (own entries first).
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.size());
        self.append_to(&mut out);
        out
    }

    fn append_to(&self, out: &mut Vec<T>) {
        out.extend(self.value.iter().cloned());
        for sub in &self.subsystems {
            sub.append_to(out);
        }
    }

    /// Inverse of [`ContinuousState::to_vec`].
    pub fn set_from_slice(&mut self, values: &[T]) -> ValueResult<()> {
        if values.len() != self.size() {
            return Err(ValueError::SizeMismatch {
                what: "ContinuousState::set_from_slice",
                expected: self.size(),
                actual: values.len(),
            });
        }
        self.fill_from(values);
        Ok(())
    }

    fn fill_from<'a>(&mut self, mut values: &'a [T]) -> &'a [T] {
        let own = self.value.size();
        for (i, v) in values[..own].iter().enumerate() {
            self.value[i] = v.clone();
        }
        values = &values[own..];
        for sub in &mut self.subsystems {
            values = sub.fill_from(values);
        }
        values
    }
}

impl<T: Scalar> Default for ContinuousState<T> {
    fn default() -> Self {
        Self::from_vector(BasicVector::zeros(0))
    }
}

impl<T: Scalar> HasSystemId for ContinuousState<T> {
    fn system_id(&self) -> Option<SystemId> {
        self.system_id
    }
}

/// Discrete state: an ordered list of numeric groups.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscreteValues<T: Scalar> {
    system_id: Option<SystemId>,
    groups: Vec<BasicVector<T>>,
    subsystems: Vec<DiscreteValues<T>>,
}

impl<T: Scalar> DiscreteValues<T> {
    pub fn new(groups: Vec<BasicVector<T>>) -> Self {
        Self {
            system_id: None,
            groups,
            subsystems: Vec::new(),
        }
    }

    pub fn with_system_id(mut self, id: SystemId) -> Self {
        self.system_id = Some(id);
        self
    }

    pub fn set_system_id(&mut self, id: SystemId) {
        self.system_id = Some(id);
    }

    /// Number of groups including every subsystem's.
    pub fn num_groups(&self) -> usize {
        self.groups.len() + self.subsystems.iter().map(Self::num_groups).sum::<usize>()
    }

    pub fn own_groups(&self) -> &[BasicVector<T>] {
        &self.groups
    }

    pub fn group(&self, index: usize) -> ValueResult<&BasicVector<T>> {
        let len = self.groups.len();
        self.groups.get(index).ok_or(ValueError::IndexOob {
            what: "discrete state group",
            index,
            len,
        })
    }

    pub fn group_mut(&mut self, index: usize) -> ValueResult<&mut BasicVector<T>> {
        let len = self.groups.len();
        self.groups.get_mut(index).ok_or(ValueError::IndexOob {
            what: "discrete state group",
            index,
            len,
        })
    }

    pub fn push_group(&mut self, group: BasicVector<T>) {
        self.groups.push(group);
    }

    pub fn num_subsystems(&self) -> usize {
        self.subsystems.len()
    }

    pub fn subsystem(&self, index: usize) -> Option<&DiscreteValues<T>> {
        self.subsystems.get(index)
    }

    pub fn subsystem_mut(&mut self, index: usize) -> Option<&mut DiscreteValues<T>> {
        self.subsystems.get_mut(index)
    }

    pub fn push_subsystem(&mut self, sub: DiscreteValues<T>) {
        self.subsystems.push(sub);
    }

    pub fn take_subsystem(&mut self, index: usize) -> ValueResult<DiscreteValues<T>> {
        let len = self.subsystems.len();
        self.subsystems
            .get_mut(index)
            .map(mem::take)
            .ok_or_else(|| missing_child("DiscreteValues subsystem", index, len))
    }

    pub fn restore_subsystem(&mut self, index: usize, sub: DiscreteValues<T>) -> ValueResult<()> {
        let len = self.subsystems.len();
        let slot = self
            .subsystems
            .get_mut(index)
            .ok_or_else(|| missing_child("DiscreteValues subsystem", index, len))?;
        *slot = sub;
        Ok(())
    }

    pub fn set_from(&mut self, other: &DiscreteValues<T>) -> ValueResult<()> {
        if self.groups.len() != other.groups.len() {
            return Err(ValueError::SizeMismatch {
                what: "DiscreteValues group count",
                expected: self.groups.len(),
                actual: other.groups.len(),
            });
        }
        check_children("DiscreteValues", self.subsystems.len(), other.subsystems.len())?;
        for (mine, theirs) in self.groups.iter_mut().zip(&other.groups) {
            mine.set_from(theirs)?;
        }
        for (mine, theirs) in self.subsystems.iter_mut().zip(&other.subsystems) {
            mine.set_from(theirs)?;
        }
        Ok(())
    }

    /// Sizes of every group, depth-first.
    pub fn group_sizes(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_sizes(&mut out);
        out
    }

    fn collect_sizes(&self, out: &mut Vec<usize>) {
        out.extend(self.groups.iter().map(BasicVector::size));
        for sub in &self.subsystems {
            sub.collect_sizes(out);
        }
    }
}

impl<T: Scalar> Default for DiscreteValues<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: Scalar> HasSystemId for DiscreteValues<T> {
    fn system_id(&self) -> Option<SystemId> {
        self.system_id
    }
}

/// Abstract state: an ordered list of type-erased slots.
#[derive(Clone, Debug, Default)]
pub struct AbstractValues {
    system_id: Option<SystemId>,
    values: Vec<Box<dyn AbstractValue>>,
    subsystems: Vec<AbstractValues>,
}

impl AbstractValues {
    pub fn new(values: Vec<Box<dyn AbstractValue>>) -> Self {
        Self {
            system_id: None,
            values,
            subsystems: Vec::new(),
        }
    }

    pub fn with_system_id(mut self, id: SystemId) -> Self {
        self.system_id = Some(id);
        self
    }

    pub fn set_system_id(&mut self, id: SystemId) {
        self.system_id = Some(id);
    }

    /// Number of slots including every subsystem's.
    pub fn size(&self) -> usize {
        self.values.len() + self.subsystems.iter().map(Self::size).sum::<usize>()
    }

    pub fn own_size(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, index: usize) -> ValueResult<&dyn AbstractValue> {
        let len = self.values.len();
        self.values
            .get(index)
            .map(|v| v.as_ref())
            .ok_or(ValueError::IndexOob {
                what: "abstract state slot",
                index,
                len,
            })
    }

    pub fn value_mut(&mut self, index: usize) -> ValueResult<&mut dyn AbstractValue> {
        let len = self.values.len();
        match self.values.get_mut(index) {
            Some(v) => Ok(v.as_mut()),
            None => Err(ValueError::IndexOob {
                what: "abstract state slot",
                index,
                len,
            }),
        }
    }

    pub fn get<V: 'static>(&self, index: usize) -> ValueResult<&V> {
        self.value(index)?.get::<V>()
    }

    pub fn get_mut<V: 'static>(&mut self, index: usize) -> ValueResult<&mut V> {
        self.value_mut(index)?.get_mut::<V>()
    }

    pub fn push(&mut self, value: Box<dyn AbstractValue>) {
        self.values.push(value);
    }

    pub fn num_subsystems(&self) -> usize {
        self.subsystems.len()
    }

    pub fn subsystem(&self, index: usize) -> Option<&AbstractValues> {
        self.subsystems.get(index)
    }

    pub fn subsystem_mut(&mut self, index: usize) -> Option<&mut AbstractValues> {
        self.subsystems.get_mut(index)
    }

    pub fn push_subsystem(&mut self, sub: AbstractValues) {
        self.subsystems.push(sub);
    }

    pub fn take_subsystem(&mut self, index: usize) -> ValueResult<AbstractValues> {
        let len = self.subsystems.len();
        self.subsystems
            .get_mut(index)
            .map(mem::take)
            .ok_or_else(|| missing_child("AbstractValues subsystem", index, len))
    }

    pub fn restore_subsystem(&mut self, index: usize, sub: AbstractValues) -> ValueResult<()> {
        let len = self.subsystems.len();
        let slot = self
            .subsystems
            .get_mut(index)
            .ok_or_else(|| missing_child("AbstractValues subsystem", index, len))?;
        *slot = sub;
        Ok(())
    }

    pub fn set_from(&mut self, other: &AbstractValues) -> ValueResult<()> {
        if self.values.len() != other.values.len() {
            return Err(ValueError::SizeMismatch {
                what: "AbstractValues slot count",
                expected: self.values.len(),
                actual: other.values.len(),
            });
        }
        check_children("AbstractValues", self.subsystems.len(), other.subsystems.len())?;
        for (mine, theirs) in self.values.iter_mut().zip(&other.values) {
            mine.set_from(theirs.as_ref())?;
        }
        for (mine, theirs) in self.subsystems.iter_mut().zip(&other.subsystems) {
            mine.set_from(theirs)?;
        }
        Ok(())
    }
}

impl HasSystemId for AbstractValues {
    fn system_id(&self) -> Option<SystemId> {
        self.system_id
    }
}

/// Dimensions of a [`State`], compared before and after updates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateShape {
    pub continuous: usize,
    pub discrete_groups: Vec<usize>,
    pub abstract_slots: usize,
}

impl fmt::Display for StateShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "continuous={}, discrete={:?}, abstract={}",
            self.continuous, self.discrete_groups, self.abstract_slots
        )
    }
}

/// Complete state of a system.
#[derive(Clone, Debug)]
pub struct State<T: Scalar> {
    system_id: Option<SystemId>,
    continuous: ContinuousState<T>,
    discrete: DiscreteValues<T>,
    abstract_state: AbstractValues,
}

impl<T: Scalar> State<T> {
    pub fn new(
        continuous: ContinuousState<T>,
        discrete: DiscreteValues<T>,
        abstract_state: AbstractValues,
    ) -> Self {
        Self {
            system_id: None,
            continuous,
            discrete,
            abstract_state,
        }
    }

    /// Stamp the state and all three parts.
    pub fn with_system_id(mut self, id: SystemId) -> Self {
        self.system_id = Some(id);
        self.continuous.set_system_id(id);
        self.discrete.set_system_id(id);
        self.abstract_state.set_system_id(id);
        self
    }

    pub fn continuous(&self) -> &ContinuousState<T> {
        &self.continuous
    }

    pub fn continuous_mut(&mut self) -> &mut ContinuousState<T> {
        &mut self.continuous
    }

    pub fn discrete(&self) -> &DiscreteValues<T> {
        &self.discrete
    }

    pub fn discrete_mut(&mut self) -> &mut DiscreteValues<T> {
        &mut self.discrete
    }

    pub fn abstract_state(&self) -> &AbstractValues {
        &self.abstract_state
    }

    pub fn abstract_state_mut(&mut self) -> &mut AbstractValues {
        &mut self.abstract_state
    }

    pub fn shape(&self) -> StateShape {
        StateShape {
            continuous: self.continuous.size(),
            discrete_groups: self.discrete.group_sizes(),
            abstract_slots: self.abstract_state.size(),
        }
    }

    pub fn set_from(&mut self, other: &State<T>) -> ValueResult<()> {
        self.continuous.set_from(&other.continuous)?;
        self.discrete.set_from(&other.discrete)?;
        self.abstract_state.set_from(&other.abstract_state)
    }

    pub fn num_substates(&self) -> usize {
        self.continuous.num_subsystems()
    }

    pub fn push_substate(&mut self, sub: State<T>) {
        self.continuous.push_subsystem(sub.continuous);
        self.discrete.push_subsystem(sub.discrete);
        self.abstract_state.push_subsystem(sub.abstract_state);
    }

    /// Move out the `index`-th child's state; put it back with
    /// [`State::restore_substate`].
    pub fn take_substate(&mut self, index: usize) -> ValueResult<State<T>> {
        let continuous = self.continuous.take_subsystem(index)?;
        let discrete = self.discrete.take_subsystem(index)?;
        let abstract_state = self.abstract_state.take_subsystem(index)?;
        Ok(State {
            system_id: continuous.system_id(),
            continuous,
            discrete,
            abstract_state,
        })
    }

    pub fn restore_substate(&mut self, index: usize, sub: State<T>) -> ValueResult<()> {
        self.continuous.restore_subsystem(index, sub.continuous)?;
        self.discrete.restore_subsystem(index, sub.discrete)?;
        self.abstract_state.restore_subsystem(index, sub.abstract_state)
    }
}

impl<T: Scalar> HasSystemId for State<T> {
    fn system_id(&self) -> Option<SystemId> {
        self.system_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_value::Value;

    fn leaf_state(xc: &[f64], groups: &[&[f64]]) -> State<f64> {
        State::new(
            ContinuousState::from_vector(BasicVector::from_f64_slice(xc)),
            DiscreteValues::new(groups.iter().map(|g| BasicVector::from_f64_slice(g)).collect()),
            AbstractValues::new(vec![Value::boxed(0_u32)]),
        )
    }

    #[test]
    fn partition_must_match_size() {
        let v = BasicVector::<f64>::zeros(3);
        assert!(ContinuousState::new(v.clone(), 1, 1, 1).is_ok());
        assert!(ContinuousState::new(v, 1, 1, 0).is_err());
    }

    #[test]
    fn composite_sizes_sum_over_children() {
        let mut root = State::new(
            ContinuousState::default(),
            DiscreteValues::default(),
            AbstractValues::default(),
        );
        root.push_substate(leaf_state(&[1.0, 2.0], &[&[3.0]]));
        root.push_substate(leaf_state(&[4.0], &[&[5.0, 6.0], &[7.0]]));
        let shape = root.shape();
        assert_eq!(shape.continuous, 3);
        assert_eq!(shape.discrete_groups, vec![1, 2, 1]);
        assert_eq!(shape.abstract_slots, 2);
        assert_eq!(root.continuous().to_vec(), vec![1.0, 2.0, 4.0]);
    }

    #[test]
    fn take_and_restore_substate() {
        let mut root = State::new(
            ContinuousState::default(),
            DiscreteValues::default(),
            AbstractValues::default(),
        );
        let id = SystemId::next();
        root.push_substate(leaf_state(&[1.0], &[]).with_system_id(id));
        let mut child = root.take_substate(0).unwrap();
        assert_eq!(child.system_id(), Some(id));
        child.continuous_mut().vector_mut()[0] = 9.0;
        root.restore_substate(0, child).unwrap();
        assert_eq!(root.continuous().to_vec(), vec![9.0]);
        assert!(root.take_substate(1).is_err());
    }

    #[test]
    fn set_from_rejects_group_count_change() {
        let mut a = leaf_state(&[0.0], &[&[0.0]]);
        let b = leaf_state(&[1.0], &[&[2.0], &[3.0]]);
        assert!(matches!(
            a.set_from(&b),
            Err(ValueError::SizeMismatch { what: "DiscreteValues group count", .. })
        ));
    }

    #[test]
    fn set_from_slice_round_trips_depth_first() {
        let mut root = ContinuousState::<f64>::default();
        root.push_subsystem(ContinuousState::from_vector(BasicVector::zeros(2)));
        root.push_subsystem(ContinuousState::from_vector(BasicVector::zeros(1)));
        root.set_from_slice(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(root.subsystem(1).unwrap().vector()[0], 3.0);
        assert!(root.set_from_slice(&[1.0]).is_err());
    }
}
