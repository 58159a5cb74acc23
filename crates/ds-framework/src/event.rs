//! Events: trigger types, periodic timing and the three event kinds.

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use std::sync::Arc;

use ds_core::{CoreError, CoreResult, Scalar, ensure_finite};
use ds_values::{DiscreteValues, State};

use crate::context::Context;
use crate::status::EventStatus;

/// Why an event was scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TriggerType {
    Unknown,
    Forced,
    Timed,
    Periodic,
    PerStep,
    Initialization,
    Witness,
}

/// Period and offset of a periodic event.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeriodicEventData {
    period: f64,
    offset: f64,
}

impl PeriodicEventData {
    pub fn new(period: f64, offset: f64) -> CoreResult<Self> {
        let period = ensure_finite(period, "period")?;
        let offset = ensure_finite(offset, "offset")?;
        if period <= 0.0 {
            return Err(CoreError::InvalidArg {
                what: "period must be > 0",
            });
        }
        if offset < 0.0 {
            return Err(CoreError::InvalidArg {
                what: "offset must be >= 0",
            });
        }
        Ok(Self { period, offset })
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// First sample time strictly after `t`.
    pub fn next_sample_time(&self, t: f64) -> f64 {
        if t < self.offset {
            return self.offset;
        }
        let k = ((t - self.offset) / self.period).ceil();
        let next = self.offset + k * self.period;
        if next > t {
            next
        } else {
            self.offset + (k + 1.0) * self.period
        }
    }
}

impl PartialEq for PeriodicEventData {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PeriodicEventData {}

impl PartialOrd for PeriodicEventData {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeriodicEventData {
    fn cmp(&self, other: &Self) -> Ordering {
        self.period
            .total_cmp(&other.period)
            .then(self.offset.total_cmp(&other.offset))
    }
}

impl Hash for PeriodicEventData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.period.to_bits().hash(state);
        self.offset.to_bits().hash(state);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Publish,
    DiscreteUpdate,
    UnrestrictedUpdate,
}

pub type PublishFn<T> = dyn Fn(&Context<T>) -> EventStatus + Send + Sync;
pub type DiscreteUpdateFn<T> = dyn Fn(&Context<T>, &mut DiscreteValues<T>) -> EventStatus + Send + Sync;
pub type UnrestrictedUpdateFn<T> = dyn Fn(&Context<T>, &mut State<T>) -> EventStatus + Send + Sync;

/// An event: trigger metadata plus a shared handler of type `F`.
pub struct Event<F: ?Sized> {
    trigger_type: TriggerType,
    timing: Option<PeriodicEventData>,
    handler: Arc<F>,
}

pub type PublishEvent<T> = Event<PublishFn<T>>;
pub type DiscreteUpdateEvent<T> = Event<DiscreteUpdateFn<T>>;
pub type UnrestrictedUpdateEvent<T> = Event<UnrestrictedUpdateFn<T>>;

impl<F: ?Sized> Event<F> {
    fn from_handler(handler: Arc<F>) -> Self {
        Self {
            trigger_type: TriggerType::Unknown,
            timing: None,
            handler,
        }
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.trigger_type
    }

    pub fn periodic_timing(&self) -> Option<PeriodicEventData> {
        self.timing
    }

    pub fn with_trigger(mut self, trigger_type: TriggerType) -> Self {
        self.trigger_type = trigger_type;
        self
    }

    pub fn with_periodic_timing(mut self, timing: PeriodicEventData) -> Self {
        self.trigger_type = TriggerType::Periodic;
        self.timing = Some(timing);
        self
    }
}

impl<F: ?Sized> Clone for Event<F> {
    fn clone(&self) -> Self {
        Self {
            trigger_type: self.trigger_type,
            timing: self.timing,
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<F: ?Sized> fmt::Debug for Event<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("trigger_type", &self.trigger_type)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

impl<T: Scalar> Event<PublishFn<T>> {
    pub fn new(handler: impl Fn(&Context<T>) -> EventStatus + Send + Sync + 'static) -> Self {
        Self::from_handler(Arc::new(handler))
    }

    pub fn handle(&self, context: &Context<T>) -> EventStatus {
        (self.handler)(context)
    }
}

impl<T: Scalar> Event<DiscreteUpdateFn<T>> {
    pub fn new(
        handler: impl Fn(&Context<T>, &mut DiscreteValues<T>) -> EventStatus + Send + Sync + 'static,
    ) -> Self {
        Self::from_handler(Arc::new(handler))
    }

    pub fn handle(&self, context: &Context<T>, discrete: &mut DiscreteValues<T>) -> EventStatus {
        (self.handler)(context, discrete)
    }
}

impl<T: Scalar> Event<UnrestrictedUpdateFn<T>> {
    pub fn new(
        handler: impl Fn(&Context<T>, &mut State<T>) -> EventStatus + Send + Sync + 'static,
    ) -> Self {
        Self::from_handler(Arc::new(handler))
    }

    pub fn handle(&self, context: &Context<T>, state: &mut State<T>) -> EventStatus {
        (self.handler)(context, state)
    }
}

/// An event of any kind.
#[derive(Clone, Debug)]
pub enum AnyEvent<T: Scalar> {
    Publish(PublishEvent<T>),
    DiscreteUpdate(DiscreteUpdateEvent<T>),
    UnrestrictedUpdate(UnrestrictedUpdateEvent<T>),
}

impl<T: Scalar> AnyEvent<T> {
    pub fn kind(&self) -> EventKind {
        match self {
            AnyEvent::Publish(_) => EventKind::Publish,
            AnyEvent::DiscreteUpdate(_) => EventKind::DiscreteUpdate,
            AnyEvent::UnrestrictedUpdate(_) => EventKind::UnrestrictedUpdate,
        }
    }

    pub fn is_discrete_update(&self) -> bool {
        self.kind() == EventKind::DiscreteUpdate
    }

    pub fn trigger_type(&self) -> TriggerType {
        match self {
            AnyEvent::Publish(e) => e.trigger_type(),
            AnyEvent::DiscreteUpdate(e) => e.trigger_type(),
            AnyEvent::UnrestrictedUpdate(e) => e.trigger_type(),
        }
    }

    pub fn periodic_timing(&self) -> Option<PeriodicEventData> {
        match self {
            AnyEvent::Publish(e) => e.periodic_timing(),
            AnyEvent::DiscreteUpdate(e) => e.periodic_timing(),
            AnyEvent::UnrestrictedUpdate(e) => e.periodic_timing(),
        }
    }

    pub fn with_trigger(self, trigger_type: TriggerType) -> Self {
        match self {
            AnyEvent::Publish(e) => AnyEvent::Publish(e.with_trigger(trigger_type)),
            AnyEvent::DiscreteUpdate(e) => AnyEvent::DiscreteUpdate(e.with_trigger(trigger_type)),
            AnyEvent::UnrestrictedUpdate(e) => {
                AnyEvent::UnrestrictedUpdate(e.with_trigger(trigger_type))
            }
        }
    }

    pub fn with_periodic_timing(self, timing: PeriodicEventData) -> Self {
        match self {
            AnyEvent::Publish(e) => AnyEvent::Publish(e.with_periodic_timing(timing)),
            AnyEvent::DiscreteUpdate(e) => AnyEvent::DiscreteUpdate(e.with_periodic_timing(timing)),
            AnyEvent::UnrestrictedUpdate(e) => {
                AnyEvent::UnrestrictedUpdate(e.with_periodic_timing(timing))
            }
        }
    }
}

impl<T: Scalar> From<PublishEvent<T>> for AnyEvent<T> {
    fn from(e: PublishEvent<T>) -> Self {
        AnyEvent::Publish(e)
    }
}

impl<T: Scalar> From<DiscreteUpdateEvent<T>> for AnyEvent<T> {
    fn from(e: DiscreteUpdateEvent<T>) -> Self {
        AnyEvent::DiscreteUpdate(e)
    }
}

impl<T: Scalar> From<UnrestrictedUpdateEvent<T>> for AnyEvent<T> {
    fn from(e: UnrestrictedUpdateEvent<T>) -> Self {
        AnyEvent::UnrestrictedUpdate(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_timing() {
        assert!(PeriodicEventData::new(0.0, 0.0).is_err());
        assert!(PeriodicEventData::new(-1.0, 0.0).is_err());
        assert!(PeriodicEventData::new(1.0, -0.5).is_err());
        assert!(PeriodicEventData::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn next_sample_time_is_strictly_later() {
        let timing = PeriodicEventData::new(0.25, 0.1).unwrap();
        assert_eq!(timing.next_sample_time(0.0), 0.1);
        assert!((timing.next_sample_time(0.1) - 0.35).abs() < 1e-15);
        assert!((timing.next_sample_time(0.2) - 0.35).abs() < 1e-15);
        assert!((timing.next_sample_time(0.35) - 0.6).abs() < 1e-15);
    }

    #[test]
    fn timing_orders_by_period_then_offset() {
        let a = PeriodicEventData::new(0.1, 0.0).unwrap();
        let b = PeriodicEventData::new(0.1, 0.05).unwrap();
        let c = PeriodicEventData::new(0.2, 0.0).unwrap();
        assert!(a < b && b < c);
        assert_eq!(a, PeriodicEventData::new(0.1, 0.0).unwrap());
    }

    #[test]
    fn any_event_carries_metadata() {
        let timing = PeriodicEventData::new(0.5, 0.0).unwrap();
        let e: AnyEvent<f64> = DiscreteUpdateEvent::<f64>::new(|_, _| EventStatus::succeeded()).into();
        let e = e.with_periodic_timing(timing);
        assert!(e.is_discrete_update());
        assert_eq!(e.trigger_type(), TriggerType::Periodic);
        assert_eq!(e.periodic_timing(), Some(timing));
        let p: AnyEvent<f64> = PublishEvent::<f64>::new(|_| EventStatus::did_nothing()).into();
        assert_eq!(p.with_trigger(TriggerType::Forced).trigger_type(), TriggerType::Forced);
    }
}
