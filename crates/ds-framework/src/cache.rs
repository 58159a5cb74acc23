//! Dependency-tracked memoization.
//!
//! Provides:
//! - `CacheEntry` (a declared derived quantity: ticket, prerequisites, rule)
//! - `DependencyCache` (per-context storage with per-ticket change counters)
//!
//! A slot is valid while the counter of its entry's ticket has not moved past
//! the serial at which the value was computed. Changing a ticket stamps the
//! current serial on every ticket downstream of it.

use core::any::{Any, type_name};
use core::cell::RefCell;
use core::fmt;
use std::sync::Arc;

use ds_core::{CacheIndex, Scalar, SystemId};
use tracing::trace;

use crate::context::Context;
use crate::error::{FrameworkError, FrameworkResult};
use crate::system::System;
use crate::ticket::{DependencyTicket, TicketGraph};

/// Type-erased memoized value.
pub type CacheValue = Arc<dyn Any + Send + Sync>;

/// Rule computing a cache entry's value.
pub type CacheRule<T> =
    dyn Fn(&dyn System<T>, &Context<T>) -> FrameworkResult<CacheValue> + Send + Sync;

pub(crate) fn cache_rule<T, F>(rule: F) -> Arc<CacheRule<T>>
where
    T: Scalar,
    F: Fn(&dyn System<T>, &Context<T>) -> FrameworkResult<CacheValue> + Send + Sync + 'static,
{
    Arc::new(rule)
}

/// A declared derived quantity of one system.
pub struct CacheEntry<T: Scalar> {
    system_id: SystemId,
    index: CacheIndex,
    ticket: DependencyTicket,
    description: String,
    prerequisites: Vec<DependencyTicket>,
    rule: Arc<CacheRule<T>>,
}

impl<T: Scalar> CacheEntry<T> {
    pub(crate) fn new(
        system_id: SystemId,
        index: CacheIndex,
        ticket: DependencyTicket,
        description: String,
        prerequisites: Vec<DependencyTicket>,
        rule: Arc<CacheRule<T>>,
    ) -> Self {
        Self {
            system_id,
            index,
            ticket,
            description,
            prerequisites,
            rule,
        }
    }

    pub fn index(&self) -> CacheIndex {
        self.index
    }

    pub fn ticket(&self) -> DependencyTicket {
        self.ticket
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn prerequisites(&self) -> &[DependencyTicket] {
        &self.prerequisites
    }

    pub fn system_id(&self) -> SystemId {
        self.system_id
    }

    /// Memoized value, recomputed only when a prerequisite changed.
    pub fn eval<V: Any + Send + Sync>(
        &self,
        system: &dyn System<T>,
        context: &Context<T>,
    ) -> FrameworkResult<Arc<V>> {
        self.eval_abstract(system, context)?
            .downcast::<V>()
            .map_err(|_| FrameworkError::CacheValueType {
                description: self.description.clone(),
                expected: type_name::<V>(),
            })
    }

    pub fn eval_abstract(
        &self,
        system: &dyn System<T>,
        context: &Context<T>,
    ) -> FrameworkResult<CacheValue> {
        system.base().validate_context(context)?;
        let cache = context.cache();
        if let Some(value) = cache.lookup(self.index, self.ticket) {
            return Ok(value);
        }
        trace!(
            entry = %self.description,
            system = %system.base().pathname(),
            "recomputing cache entry"
        );
        let value = (self.rule)(system, context)?;
        cache.store(self.index, value.clone());
        Ok(value)
    }

    /// Run the rule without consulting or updating the cache.
    pub fn calc(&self, system: &dyn System<T>, context: &Context<T>) -> FrameworkResult<CacheValue> {
        system.base().validate_context(context)?;
        (self.rule)(system, context)
    }

    pub fn is_out_of_date(&self, context: &Context<T>) -> bool {
        !context.cache().is_up_to_date(self.index, self.ticket)
    }
}

impl<T: Scalar> fmt::Debug for CacheEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("index", &self.index)
            .field("ticket", &self.ticket)
            .field("description", &self.description)
            .field("prerequisites", &self.prerequisites)
            .finish()
    }
}

#[derive(Clone)]
struct CacheSlot {
    value: CacheValue,
    computed_at: u64,
}

/// Memo storage owned by one context node.
#[derive(Clone)]
pub struct DependencyCache {
    counters: Vec<u64>,
    serial: u64,
    downstream: Arc<Vec<Vec<DependencyTicket>>>,
    slots: RefCell<Vec<Option<CacheSlot>>>,
    enabled: bool,
}

impl DependencyCache {
    pub(crate) fn new(graph: &TicketGraph, num_entries: usize) -> Self {
        Self {
            counters: vec![0; graph.num_tickets()],
            serial: 0,
            downstream: Arc::new(graph.downstream_closure()),
            slots: RefCell::new(vec![None; num_entries]),
            enabled: true,
        }
    }

    /// Record that the value behind `ticket` changed.
    pub fn note_changed(&mut self, ticket: DependencyTicket) {
        let Some(affected) = self.downstream.get(ticket.index()) else {
            return;
        };
        self.serial += 1;
        for t in affected {
            if let Some(c) = self.counters.get_mut(t.index()) {
                *c = self.serial;
            }
        }
    }

    /// Serial of the last change that reached `ticket`.
    pub fn counter(&self, ticket: DependencyTicket) -> u64 {
        self.counters.get(ticket.index()).copied().unwrap_or(0)
    }

    pub fn is_up_to_date(&self, index: CacheIndex, ticket: DependencyTicket) -> bool {
        let slots = self.slots.borrow();
        match slots.get(index.index()) {
            Some(Some(slot)) => self.counter(ticket) <= slot.computed_at,
            _ => false,
        }
    }

    pub(crate) fn lookup(&self, index: CacheIndex, ticket: DependencyTicket) -> Option<CacheValue> {
        if !self.enabled {
            return None;
        }
        let slots = self.slots.borrow();
        let slot = slots.get(index.index())?.as_ref()?;
        (self.counter(ticket) <= slot.computed_at).then(|| slot.value.clone())
    }

    pub(crate) fn store(&self, index: CacheIndex, value: CacheValue) {
        let mut slots = self.slots.borrow_mut();
        if slots.len() <= index.index() {
            slots.resize(index.index() + 1, None);
        }
        slots[index.index()] = Some(CacheSlot {
            value,
            computed_at: self.serial,
        });
    }

    /// Mark every slot out of date.
    pub fn invalidate_all(&mut self) {
        for slot in self.slots.get_mut().iter_mut() {
            *slot = None;
        }
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Values stored while disabled are never trusted.
    pub fn enable(&mut self) {
        if !self.enabled {
            self.invalidate_all();
        }
        self.enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn num_slots(&self) -> usize {
        self.slots.borrow().len()
    }
}

impl fmt::Debug for DependencyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filled = self.slots.borrow().iter().filter(|s| s.is_some()).count();
        f.debug_struct("DependencyCache")
            .field("serial", &self.serial)
            .field("tickets", &self.counters.len())
            .field("filled_slots", &filled)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DependencyTicket as D;

    fn cache_with_entry() -> (DependencyCache, DependencyTicket) {
        let mut graph = TicketGraph::new();
        let entry = graph.mint([D::TIME]);
        (DependencyCache::new(&graph, 1), entry)
    }

    #[test]
    fn stored_value_survives_unrelated_change() {
        let (mut cache, entry) = cache_with_entry();
        let idx = CacheIndex::new(0);
        assert!(cache.lookup(idx, entry).is_none());
        cache.store(idx, Arc::new(1.5_f64));
        assert!(cache.is_up_to_date(idx, entry));

        cache.note_changed(D::XC);
        let v = cache.lookup(idx, entry).unwrap();
        assert_eq!(*v.downcast::<f64>().unwrap(), 1.5);

        cache.note_changed(D::TIME);
        assert!(cache.lookup(idx, entry).is_none());
    }

    #[test]
    fn disabled_cache_never_hits() {
        let (mut cache, entry) = cache_with_entry();
        let idx = CacheIndex::new(0);
        cache.store(idx, Arc::new(2_u32));
        cache.disable();
        assert!(cache.lookup(idx, entry).is_none());
        cache.enable();
        assert!(cache.lookup(idx, entry).is_none());
        cache.store(idx, Arc::new(3_u32));
        assert!(cache.lookup(idx, entry).is_some());
        cache.invalidate_all();
        assert!(cache.lookup(idx, entry).is_none());
    }
}
