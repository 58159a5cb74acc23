//! Scalar-type conversion registry.
//!
//! A `SystemScalarConverter` holds, per (source, target) scalar pair, a
//! function that re-instantiates a system over the target scalar. Systems
//! register their whole family through [`SystemFamily`].

use core::any::Any;
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use ds_core::{AutoDiff, Expression, Scalar, ScalarKind};

use crate::system::System;

type ConvertFn<S, U> = Arc<dyn Fn(&dyn System<S>) -> Option<Box<dyn System<U>>> + Send + Sync>;

/// A system type generic over its scalar.
///
/// `Of<T>` names the instantiation over `T`; `convert` rebuilds an `Of<S>`
/// over `U`, returning `None` when that particular instance cannot be
/// converted.
pub trait SystemFamily: 'static {
    type Of<T: Scalar>: System<T>;

    fn convert<S: Scalar, U: Scalar>(source: &Self::Of<S>) -> Option<Self::Of<U>>;
}

#[derive(Clone, Default)]
pub struct SystemScalarConverter {
    // (target, source) -> ConvertFn<source, target>
    funcs: HashMap<(ScalarKind, ScalarKind), Arc<dyn Any + Send + Sync>>,
}

impl SystemScalarConverter {
    /// A converter that supports nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every off-diagonal pair among f64, AutoDiff and Expression.
    pub fn for_family<F: SystemFamily>() -> Self {
        let mut c = Self::non_symbolic_for_family::<F>();
        c.add_family_pair::<F, f64, Expression>();
        c.add_family_pair::<F, AutoDiff, Expression>();
        c.add_family_pair::<F, Expression, f64>();
        c.add_family_pair::<F, Expression, AutoDiff>();
        c
    }

    /// Only f64 <-> AutoDiff.
    pub fn non_symbolic_for_family<F: SystemFamily>() -> Self {
        let mut c = Self::new();
        c.add_family_pair::<F, f64, AutoDiff>();
        c.add_family_pair::<F, AutoDiff, f64>();
        c
    }

    pub fn add_family_pair<F: SystemFamily, S: Scalar, U: Scalar>(&mut self) {
        self.add::<S, U>(|system: &dyn System<S>| {
            let source = system.as_any().downcast_ref::<F::Of<S>>()?;
            let converted = F::convert::<S, U>(source)?;
            Some(Box::new(converted) as Box<dyn System<U>>)
        });
    }

    /// Register an arbitrary conversion function from `S` to `U`.
    pub fn add<S: Scalar, U: Scalar>(
        &mut self,
        f: impl Fn(&dyn System<S>) -> Option<Box<dyn System<U>>> + Send + Sync + 'static,
    ) {
        let f: ConvertFn<S, U> = Arc::new(f);
        self.funcs.insert((U::KIND, S::KIND), Arc::new(f));
    }

    pub fn remove<S: Scalar, U: Scalar>(&mut self) {
        self.funcs.remove(&(U::KIND, S::KIND));
    }

    pub fn is_convertible<S: Scalar, U: Scalar>(&self) -> bool {
        self.funcs.contains_key(&(U::KIND, S::KIND))
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    /// Convert `system` to `U`, or `None` when unsupported.
    pub fn convert<S: Scalar, U: Scalar>(&self, system: &dyn System<S>) -> Option<Box<dyn System<U>>> {
        let f = self
            .funcs
            .get(&(U::KIND, S::KIND))?
            .downcast_ref::<ConvertFn<S, U>>()?;
        f(system)
    }
}

impl fmt::Debug for SystemScalarConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pairs: Vec<String> = self
            .funcs
            .keys()
            .map(|(target, source)| format!("{source}->{target}"))
            .collect();
        pairs.sort();
        f.debug_struct("SystemScalarConverter")
            .field("pairs", &pairs)
            .finish()
    }
}
