//! Generalized coordinates, implicit residuals, random contexts and fixed
//! inputs.

mod common;

use std::any::Any;
use std::f64::consts::PI;
use std::sync::Arc;

use common::{Decay, init_tracing};
use ds_core::NumericParameterIndex;
use ds_framework::{Context, DiagramBuilder, FrameworkError, FrameworkResult, System, SystemBase, share};
use ds_values::{BasicVector, ContinuousState, Parameters, State, ValueError};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// A point on the unit circle: `q = (cos theta, sin theta)`, `v = omega`.
/// Two positions, one velocity, and a radius parameter drawn at random.
struct Circle {
    base: SystemBase<f64>,
    radius: NumericParameterIndex,
}

impl Circle {
    fn new(name: &str) -> Self {
        let mut base = SystemBase::of::<Self>();
        base.set_name(name);
        base.declare_continuous_state_with(BasicVector::from_f64_slice(&[1.0, 0.0, 0.0]), 2, 1, 0)
            .unwrap();
        let radius = base.declare_numeric_parameter(BasicVector::from_f64_slice(&[1.0]));
        Self { base, radius }
    }
}

fn entry(vector: &BasicVector<f64>, i: usize) -> f64 {
    vector.get(i).copied().unwrap_or(f64::NAN)
}

impl System<f64> for Circle {
    fn base(&self) -> &SystemBase<f64> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase<f64> {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_random_state(
        &self,
        _context: &Context<f64>,
        state: &mut State<f64>,
        rng: &mut dyn RngCore,
    ) -> FrameworkResult<()> {
        let theta = rng.gen_range(-PI..PI);
        let omega = rng.gen_range(-1.0..1.0);
        let x = state.continuous_mut().vector_mut();
        x.set(0, theta.cos())?;
        x.set(1, theta.sin())?;
        x.set(2, omega)?;
        Ok(())
    }

    fn set_random_parameters(
        &self,
        _context: &Context<f64>,
        parameters: &mut Parameters<f64>,
        rng: &mut dyn RngCore,
    ) -> FrameworkResult<()> {
        parameters
            .numeric_mut(self.radius.index())?
            .set(0, rng.gen_range(0.5..2.0))?;
        Ok(())
    }

    fn do_calc_time_derivatives(
        &self,
        context: &Context<f64>,
        derivatives: &mut ContinuousState<f64>,
    ) -> FrameworkResult<()> {
        let x = context.continuous_state_vector();
        let omega = BasicVector::from_f64_slice(&[entry(x, 2)]);
        let mut qdot = BasicVector::zeros(2);
        self.do_map_velocity_to_qdot(context, &omega, &mut qdot)?;
        let xdot = derivatives.vector_mut();
        xdot.set(0, entry(&qdot, 0))?;
        xdot.set(1, entry(&qdot, 1))?;
        xdot.set(2, 0.0)?;
        Ok(())
    }

    fn do_map_velocity_to_qdot(
        &self,
        context: &Context<f64>,
        generalized_velocity: &BasicVector<f64>,
        qdot: &mut BasicVector<f64>,
    ) -> FrameworkResult<()> {
        let x = context.continuous_state_vector();
        let (c, s, omega) = (entry(x, 0), entry(x, 1), entry(generalized_velocity, 0));
        qdot.set(0, -s * omega)?;
        qdot.set(1, c * omega)?;
        Ok(())
    }

    fn do_map_qdot_to_velocity(
        &self,
        context: &Context<f64>,
        qdot: &BasicVector<f64>,
        generalized_velocity: &mut BasicVector<f64>,
    ) -> FrameworkResult<()> {
        let x = context.continuous_state_vector();
        let (c, s) = (entry(x, 0), entry(x, 1));
        generalized_velocity.set(0, -s * entry(qdot, 0) + c * entry(qdot, 1))?;
        Ok(())
    }
}

/// Two positions and one velocity with no mapping of its own.
struct Unmapped {
    base: SystemBase<f64>,
}

impl System<f64> for Unmapped {
    fn base(&self) -> &SystemBase<f64> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase<f64> {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Assembly {
    diagram: Arc<dyn System<f64>>,
    first: Arc<dyn System<f64>>,
    decay: Arc<dyn System<f64>>,
    second: Arc<dyn System<f64>>,
}

/// circle, decay, circle: `nq = 4`, `nv = 2`, one extra `z`.
fn assembly() -> Assembly {
    let mut builder = DiagramBuilder::new().with_name("assembly");
    let first = builder.add_system(share(Circle::new("first"))).unwrap();
    let decay = builder.add_system(share(Decay::new("decay"))).unwrap();
    let second = builder.add_system(share(Circle::new("second"))).unwrap();
    Assembly {
        diagram: builder.build().unwrap(),
        first,
        decay,
        second,
    }
}

fn values(vector: &BasicVector<f64>) -> Vec<f64> {
    vector.iter().copied().collect()
}

#[test]
fn circle_maps_speed_onto_the_tangent() {
    let circle = share(Circle::new("circle"));
    let context = circle.create_default_context().unwrap();
    assert_eq!(context.num_generalized_positions(), 2);
    assert_eq!(context.num_generalized_velocities(), 1);

    let mut qdot = BasicVector::zeros(2);
    circle
        .map_velocity_to_qdot(&context, &BasicVector::from_f64_slice(&[2.0]), &mut qdot)
        .unwrap();
    assert_eq!(values(&qdot), vec![0.0, 2.0]);

    let mut omega = BasicVector::zeros(1);
    circle.map_qdot_to_velocity(&context, &qdot, &mut omega).unwrap();
    assert_eq!(values(&omega), vec![2.0]);
}

#[test]
fn diagram_splits_coordinates_by_child() {
    init_tracing();
    let plant = assembly();
    let mut context = plant.diagram.create_default_context().unwrap();
    assert_eq!(context.num_generalized_positions(), 4);
    assert_eq!(context.num_generalized_velocities(), 2);
    plant
        .diagram
        .get_mutable_subsystem_context(plant.second.as_ref(), &mut context)
        .unwrap()
        .continuous_state_mut()
        .vector_mut()
        .set_from(&BasicVector::from_f64_slice(&[0.0, 1.0, 0.0]))
        .unwrap();

    let v = BasicVector::from_f64_slice(&[1.0, 3.0]);
    let mut qdot = BasicVector::zeros(4);
    plant.diagram.map_velocity_to_qdot(&context, &v, &mut qdot).unwrap();
    assert_eq!(values(&qdot), vec![0.0, 1.0, -3.0, 0.0]);

    let mut back = BasicVector::zeros(2);
    plant.diagram.map_qdot_to_velocity(&context, &qdot, &mut back).unwrap();
    assert_eq!(values(&back), vec![1.0, 3.0]);
}

#[test]
fn mapping_sizes_are_checked() {
    let plant = assembly();
    let context = plant.diagram.create_default_context().unwrap();
    let mut qdot = BasicVector::zeros(4);
    let err = plant
        .diagram
        .map_velocity_to_qdot(&context, &BasicVector::zeros(3), &mut qdot)
        .unwrap_err();
    assert!(matches!(
        err,
        FrameworkError::Value(ValueError::SizeMismatch {
            what: "generalized velocity",
            expected: 2,
            actual: 3,
        })
    ));
    let mut v = BasicVector::zeros(2);
    assert!(matches!(
        plant.diagram.map_qdot_to_velocity(&context, &BasicVector::zeros(2), &mut v),
        Err(FrameworkError::Value(ValueError::SizeMismatch { what: "qdot", .. }))
    ));
}

#[test]
fn unequal_coordinates_need_an_override() {
    let mut base = SystemBase::of::<Unmapped>();
    base.set_name("unmapped");
    base.declare_continuous_state(2, 1, 0).unwrap();
    let system = share(Unmapped { base });
    let context = system.create_default_context().unwrap();

    let mut qdot = BasicVector::zeros(2);
    assert!(matches!(
        system.map_velocity_to_qdot(&context, &BasicVector::zeros(1), &mut qdot),
        Err(FrameworkError::MissingOverride { hook: "do_map_velocity_to_qdot", .. })
    ));
    let mut v = BasicVector::zeros(1);
    assert!(matches!(
        system.map_qdot_to_velocity(&context, &qdot, &mut v),
        Err(FrameworkError::MissingOverride { hook: "do_map_qdot_to_velocity", .. })
    ));
}

#[test]
fn residual_compares_proposed_with_explicit_derivatives() {
    let decay = share(Decay::new("p"));
    let context = decay.create_default_context().unwrap();
    assert_eq!(decay.implicit_time_derivatives_residual_size(), 1);

    let mut proposed = decay.allocate_time_derivatives();
    proposed.set_from_slice(&[0.5]).unwrap();
    let mut residual = decay.allocate_implicit_time_derivatives_residual();
    decay
        .calc_implicit_time_derivatives_residual(&context, &proposed, &mut residual)
        .unwrap();
    // 0.5 - (-1)
    assert_eq!(values(&residual), vec![1.5]);
}

#[test]
fn diagram_residual_stacks_children() {
    let plant = assembly();
    let mut context = plant.diagram.create_default_context().unwrap();
    plant
        .diagram
        .get_mutable_subsystem_context(plant.decay.as_ref(), &mut context)
        .unwrap()
        .continuous_state_mut()
        .vector_mut()
        .set(0, 2.0)
        .unwrap();
    plant
        .diagram
        .get_mutable_subsystem_context(plant.first.as_ref(), &mut context)
        .unwrap()
        .continuous_state_mut()
        .vector_mut()
        .set(2, 0.5)
        .unwrap();

    // At the explicit derivatives the residual vanishes.
    let xdot = plant.diagram.eval_time_derivatives(&context).unwrap();
    let mut residual = plant.diagram.allocate_implicit_time_derivatives_residual();
    assert_eq!(residual.size(), 7);
    plant
        .diagram
        .calc_implicit_time_derivatives_residual(&context, &xdot, &mut residual)
        .unwrap();
    assert!(residual.iter().all(|r| r.abs() < 1e-12));

    let mut proposed = plant.diagram.allocate_time_derivatives();
    proposed
        .set_from_slice(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
        .unwrap();
    plant
        .diagram
        .calc_implicit_time_derivatives_residual(&context, &proposed, &mut residual)
        .unwrap();
    // first: qdot = (0, 0.5); decay: xdot = -2; second at rest.
    assert_eq!(values(&residual), vec![0.0, -0.5, 0.0, 2.0, 0.0, 0.0, 0.0]);
}

#[test]
fn residual_inputs_are_validated() {
    let plant = assembly();
    let context = plant.diagram.create_default_context().unwrap();
    let proposed = plant.diagram.allocate_time_derivatives();

    let mut short = BasicVector::zeros(3);
    assert!(matches!(
        plant
            .diagram
            .calc_implicit_time_derivatives_residual(&context, &proposed, &mut short),
        Err(FrameworkError::Value(ValueError::SizeMismatch {
            what: "implicit residual",
            expected: 7,
            actual: 3,
        }))
    ));

    let stranger = share(Decay::new("stranger"));
    let foreign = stranger.allocate_time_derivatives();
    let mut residual = plant.diagram.allocate_implicit_time_derivatives_residual();
    assert!(matches!(
        plant
            .diagram
            .calc_implicit_time_derivatives_residual(&context, &foreign, &mut residual),
        Err(FrameworkError::ContextMismatch { .. })
    ));
}

#[test]
fn seeded_random_contexts_repeat() {
    let plant = assembly();
    let draw = |seed: u64| {
        let mut context = plant.diagram.create_default_context().unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        plant.diagram.set_random_context(&mut context, &mut rng).unwrap();
        context
    };
    let a = draw(7);
    let b = draw(7);
    let c = draw(8);
    assert_eq!(a.clone_continuous_state().to_vec(), b.clone_continuous_state().to_vec());
    assert_ne!(a.clone_continuous_state().to_vec(), c.clone_continuous_state().to_vec());

    for circle in [&plant.first, &plant.second] {
        let sub = circle.get_my_context_from_root(&a).unwrap();
        let x = sub.continuous_state_vector();
        assert!((entry(x, 0).powi(2) + entry(x, 1).powi(2) - 1.0).abs() < 1e-12);
        assert!(entry(x, 2).abs() <= 1.0);
        let radius = entry(sub.numeric_parameter(NumericParameterIndex::new(0)).unwrap(), 0);
        assert!((0.5..2.0).contains(&radius));
    }
}

#[test]
fn systems_without_a_distribution_keep_defaults() {
    let plant = assembly();
    let mut context = plant.diagram.create_default_context().unwrap();
    let decay = plant.decay.as_any().downcast_ref::<Decay>().unwrap();
    let sub = plant
        .diagram
        .get_mutable_subsystem_context(plant.decay.as_ref(), &mut context)
        .unwrap();
    sub.continuous_state_mut().vector_mut().set(0, 5.0).unwrap();
    sub.numeric_parameter_mut(decay.gain).unwrap().set(0, 9.0).unwrap();

    let mut rng = StdRng::seed_from_u64(1);
    plant.diagram.set_random_context(&mut context, &mut rng).unwrap();
    let sub = plant.decay.get_my_context_from_root(&context).unwrap();
    assert_eq!(entry(sub.continuous_state_vector(), 0), 1.0);
    assert_eq!(entry(sub.numeric_parameter(decay.gain).unwrap(), 0), 2.0);
}

#[test]
fn fixed_inputs_are_allocated_through_the_tree() {
    let mut builder = DiagramBuilder::new().with_name("pair");
    let a = builder.add_system(share(Decay::new("a"))).unwrap();
    let mut labelled = Decay::new("b");
    let label = labelled
        .base_mut()
        .declare_abstract_input_port("label", String::from("unnamed"))
        .unwrap();
    let b = builder.add_system(share(labelled)).unwrap();
    let diagram = builder.build().unwrap();

    let mut context = diagram.create_default_context().unwrap();
    let u = a.get_input_port_by_name("u").unwrap();
    assert!(!u.has_value(a.get_my_context_from_root(&context).unwrap()).unwrap());
    u.fix_vector(a.get_my_mutable_context_from_root(&mut context).unwrap(), vec![3.0])
        .unwrap();

    // Already fixed values are replaced too.
    diagram.allocate_fixed_inputs(&mut context).unwrap();
    let a_context = a.get_my_context_from_root(&context).unwrap();
    let fixed = u.eval_vector(a_context).unwrap();
    assert_eq!(fixed.map(values), Some(vec![0.0]));

    let b_context = b.get_my_context_from_root(&context).unwrap();
    let port = b.get_input_port(label).unwrap();
    assert_eq!(
        port.eval_abstract::<String>(b_context).unwrap().map(String::as_str),
        Some("unnamed")
    );
    assert!(b.get_input_port_by_name("u").unwrap().has_value(b_context).unwrap());
}
