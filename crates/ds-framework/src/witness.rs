//! Witness functions: scalar guards whose zero crossings trigger events.
//!
//! Locating the crossing is left to the outer driver; this module only
//! describes and evaluates the guards.

use core::fmt;
use std::sync::Arc;

use ds_core::{Scalar, SystemId};

use crate::context::Context;
use crate::error::{FrameworkError, FrameworkResult};
use crate::event::{AnyEvent, TriggerType};

/// Which sign change of the guard counts as a trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WitnessTriggerDirection {
    None,
    PositiveThenNonPositive,
    NegativeThenNonNegative,
    CrossesZero,
}

impl WitnessTriggerDirection {
    /// Whether going from `w0` to `wf` over an interval is a trigger.
    pub fn should_trigger(self, w0: f64, wf: f64) -> bool {
        match self {
            WitnessTriggerDirection::None => false,
            WitnessTriggerDirection::PositiveThenNonPositive => w0 > 0.0 && wf <= 0.0,
            WitnessTriggerDirection::NegativeThenNonNegative => w0 < 0.0 && wf >= 0.0,
            WitnessTriggerDirection::CrossesZero => {
                (w0 > 0.0 && wf <= 0.0) || (w0 < 0.0 && wf >= 0.0)
            }
        }
    }
}

pub type WitnessCalc<T> = dyn Fn(&Context<T>) -> T + Send + Sync;

#[derive(Clone)]
pub struct WitnessFunction<T: Scalar> {
    system_id: SystemId,
    description: String,
    direction: WitnessTriggerDirection,
    calc: Arc<WitnessCalc<T>>,
    event: Option<AnyEvent<T>>,
}

impl<T: Scalar> WitnessFunction<T> {
    pub(crate) fn new(
        system_id: SystemId,
        description: String,
        direction: WitnessTriggerDirection,
        calc: Arc<WitnessCalc<T>>,
        event: Option<AnyEvent<T>>,
    ) -> Self {
        Self {
            system_id,
            description,
            direction,
            calc,
            event: event.map(|e| e.with_trigger(TriggerType::Witness)),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn direction(&self) -> WitnessTriggerDirection {
        self.direction
    }

    /// System that declared the guard.
    pub fn system_id(&self) -> SystemId {
        self.system_id
    }

    /// Event dispatched when the guard triggers.
    pub fn event(&self) -> Option<&AnyEvent<T>> {
        self.event.as_ref()
    }

    /// Evaluate against the declaring system's context.
    pub fn calc(&self, context: &Context<T>) -> FrameworkResult<T> {
        if context.system_id() != self.system_id {
            return Err(FrameworkError::ContextMismatch {
                system: format!("witness function '{}'", self.description),
                what: "Context",
                expected: self.system_id,
                found: context.system_id().to_string(),
            });
        }
        Ok((self.calc)(context))
    }
}

impl<T: Scalar> fmt::Debug for WitnessFunction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WitnessFunction")
            .field("description", &self.description)
            .field("direction", &self.direction)
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_directions() {
        use WitnessTriggerDirection as W;
        assert!(W::PositiveThenNonPositive.should_trigger(1.0, 0.0));
        assert!(!W::PositiveThenNonPositive.should_trigger(-1.0, 1.0));
        assert!(W::NegativeThenNonNegative.should_trigger(-1.0, 0.0));
        assert!(W::CrossesZero.should_trigger(-1.0, 2.0));
        assert!(W::CrossesZero.should_trigger(1.0, -2.0));
        assert!(!W::CrossesZero.should_trigger(1.0, 2.0));
        assert!(!W::None.should_trigger(1.0, -1.0));
    }
}
