//! Tree-shaped event collections mirroring the context tree.

use core::mem;

use ds_core::{HasSystemId, Scalar, SystemId};

use crate::event::{AnyEvent, DiscreteUpdateEvent, PublishEvent, UnrestrictedUpdateEvent};

/// Events of one kind: a system's own events plus one sub-collection per child.
#[derive(Clone, Debug)]
pub struct EventCollection<E> {
    system_id: SystemId,
    events: Vec<E>,
    subcollections: Vec<EventCollection<E>>,
}

impl<E: Clone> EventCollection<E> {
    pub fn new(system_id: SystemId) -> Self {
        Self {
            system_id,
            events: Vec::new(),
            subcollections: Vec::new(),
        }
    }

    pub fn add_event(&mut self, event: E) {
        self.events.push(event);
    }

    /// This system's own events.
    pub fn events(&self) -> &[E] {
        &self.events
    }

    pub fn has_own_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Any event here or in any sub-collection.
    pub fn has_events(&self) -> bool {
        self.has_own_events() || self.subcollections.iter().any(Self::has_events)
    }

    /// Total number of events in the tree.
    pub fn len(&self) -> usize {
        self.events.len() + self.subcollections.iter().map(Self::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_events()
    }

    /// Remove every event, keeping the tree structure.
    pub fn clear(&mut self) {
        self.events.clear();
        for sub in &mut self.subcollections {
            sub.clear();
        }
    }

    pub fn num_subcollections(&self) -> usize {
        self.subcollections.len()
    }

    pub fn subcollection(&self, index: usize) -> Option<&EventCollection<E>> {
        self.subcollections.get(index)
    }

    pub fn subcollection_mut(&mut self, index: usize) -> Option<&mut EventCollection<E>> {
        self.subcollections.get_mut(index)
    }

    pub fn push_subcollection(&mut self, sub: EventCollection<E>) {
        self.subcollections.push(sub);
    }

    fn take_subcollection(&mut self, index: usize) -> Option<EventCollection<E>> {
        let slot = self.subcollections.get_mut(index)?;
        let placeholder = EventCollection::new(slot.system_id);
        Some(mem::replace(slot, placeholder))
    }

    fn restore_subcollection(&mut self, index: usize, sub: EventCollection<E>) -> bool {
        match self.subcollections.get_mut(index) {
            Some(slot) => {
                *slot = sub;
                true
            }
            None => false,
        }
    }

    /// Append `other`'s events, matching sub-collections by position.
    pub fn add_to_end(&mut self, other: &EventCollection<E>) {
        self.events.extend(other.events.iter().cloned());
        for (mine, theirs) in self.subcollections.iter_mut().zip(&other.subcollections) {
            mine.add_to_end(theirs);
        }
    }

    pub fn set_from(&mut self, other: &EventCollection<E>) {
        self.clear();
        self.add_to_end(other);
    }
}

impl<E> HasSystemId for EventCollection<E> {
    fn system_id(&self) -> Option<SystemId> {
        Some(self.system_id)
    }
}

/// One event collection per kind, shaped like the context tree.
#[derive(Clone, Debug)]
pub struct CompositeEventCollection<T: Scalar> {
    system_id: SystemId,
    publish: EventCollection<PublishEvent<T>>,
    discrete: EventCollection<DiscreteUpdateEvent<T>>,
    unrestricted: EventCollection<UnrestrictedUpdateEvent<T>>,
}

impl<T: Scalar> CompositeEventCollection<T> {
    pub fn new(system_id: SystemId) -> Self {
        Self {
            system_id,
            publish: EventCollection::new(system_id),
            discrete: EventCollection::new(system_id),
            unrestricted: EventCollection::new(system_id),
        }
    }

    pub fn publish_events(&self) -> &EventCollection<PublishEvent<T>> {
        &self.publish
    }

    pub fn publish_events_mut(&mut self) -> &mut EventCollection<PublishEvent<T>> {
        &mut self.publish
    }

    pub fn discrete_update_events(&self) -> &EventCollection<DiscreteUpdateEvent<T>> {
        &self.discrete
    }

    pub fn discrete_update_events_mut(&mut self) -> &mut EventCollection<DiscreteUpdateEvent<T>> {
        &mut self.discrete
    }

    pub fn unrestricted_update_events(&self) -> &EventCollection<UnrestrictedUpdateEvent<T>> {
        &self.unrestricted
    }

    pub fn unrestricted_update_events_mut(
        &mut self,
    ) -> &mut EventCollection<UnrestrictedUpdateEvent<T>> {
        &mut self.unrestricted
    }

    /// Route an event to the collection of its kind at this level.
    pub fn add_event(&mut self, event: AnyEvent<T>) {
        match event {
            AnyEvent::Publish(e) => self.publish.add_event(e),
            AnyEvent::DiscreteUpdate(e) => self.discrete.add_event(e),
            AnyEvent::UnrestrictedUpdate(e) => self.unrestricted.add_event(e),
        }
    }

    pub fn has_events(&self) -> bool {
        self.publish.has_events() || self.discrete.has_events() || self.unrestricted.has_events()
    }

    pub fn has_publish_events(&self) -> bool {
        self.publish.has_events()
    }

    pub fn has_discrete_update_events(&self) -> bool {
        self.discrete.has_events()
    }

    pub fn has_unrestricted_update_events(&self) -> bool {
        self.unrestricted.has_events()
    }

    pub fn clear(&mut self) {
        self.publish.clear();
        self.discrete.clear();
        self.unrestricted.clear();
    }

    pub fn num_children(&self) -> usize {
        self.publish.num_subcollections()
    }

    pub fn push_child(&mut self, child: CompositeEventCollection<T>) {
        self.publish.push_subcollection(child.publish);
        self.discrete.push_subcollection(child.discrete);
        self.unrestricted.push_subcollection(child.unrestricted);
    }

    /// Move out the `index`-th child's collections; put them back with
    /// [`CompositeEventCollection::restore_child`].
    pub fn take_child(&mut self, index: usize) -> Option<CompositeEventCollection<T>> {
        let publish = self.publish.take_subcollection(index)?;
        let discrete = self.discrete.take_subcollection(index)?;
        let unrestricted = self.unrestricted.take_subcollection(index)?;
        Some(CompositeEventCollection {
            system_id: publish.system_id,
            publish,
            discrete,
            unrestricted,
        })
    }

    pub fn restore_child(&mut self, index: usize, child: CompositeEventCollection<T>) -> bool {
        self.publish.restore_subcollection(index, child.publish)
            && self.discrete.restore_subcollection(index, child.discrete)
            && self.unrestricted.restore_subcollection(index, child.unrestricted)
    }

    pub fn add_to_end(&mut self, other: &CompositeEventCollection<T>) {
        self.publish.add_to_end(&other.publish);
        self.discrete.add_to_end(&other.discrete);
        self.unrestricted.add_to_end(&other.unrestricted);
    }

    pub fn set_from(&mut self, other: &CompositeEventCollection<T>) {
        self.clear();
        self.add_to_end(other);
    }
}

impl<T: Scalar> HasSystemId for CompositeEventCollection<T> {
    fn system_id(&self) -> Option<SystemId> {
        Some(self.system_id)
    }
}
