//! Constant vector source.

use core::any::Any;

use ds_core::{NumericParameterIndex, OutputPortIndex, Scalar};
use ds_framework::{
    DependencyTicket, System, SystemBase, SystemFamily, SystemScalarConverter,
};
use ds_values::BasicVector;

use crate::error::{PrimitiveError, PrimitiveResult};

/// Outputs a constant vector held as a numeric parameter, so the value can
/// be changed per context without rebuilding the system.
pub struct ConstantVectorSource<T: Scalar> {
    base: SystemBase<T>,
    value: Vec<f64>,
    parameter: NumericParameterIndex,
    output: OutputPortIndex,
}

impl<T: Scalar> ConstantVectorSource<T> {
    pub fn new(value: &[f64]) -> PrimitiveResult<Self> {
        if value.is_empty() {
            return Err(PrimitiveError::InvalidArg {
                what: "constant source needs at least one element",
            });
        }
        let mut base = SystemBase::of::<Self>();
        let parameter = base.declare_numeric_parameter(BasicVector::from_f64_slice(value));
        let ticket = base
            .numeric_parameter_ticket(parameter)
            .unwrap_or(DependencyTicket::PN);
        let output = base.declare_vector_output_port(
            "y0",
            value.len(),
            [ticket],
            move |_system: &dyn System<T>, context, out: &mut BasicVector<T>| {
                out.set_from(context.numeric_parameter(parameter)?)?;
                Ok(())
            },
        )?;
        base.set_converter(SystemScalarConverter::for_family::<ConstantSourceFamily>());
        Ok(Self {
            base,
            value: value.to_vec(),
            parameter,
            output,
        })
    }

    /// Index of the parameter group holding the output value.
    pub fn parameter(&self) -> NumericParameterIndex {
        self.parameter
    }

    pub fn output(&self) -> OutputPortIndex {
        self.output
    }
}

pub struct ConstantSourceFamily;

impl SystemFamily for ConstantSourceFamily {
    type Of<T: Scalar> = ConstantVectorSource<T>;

    fn convert<S: Scalar, U: Scalar>(source: &ConstantVectorSource<S>) -> Option<ConstantVectorSource<U>> {
        ConstantVectorSource::new(&source.value).ok()
    }
}

impl<T: Scalar> System<T> for ConstantVectorSource<T> {
    fn base(&self) -> &SystemBase<T> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase<T> {
        &mut self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_core::AutoDiff;
    use ds_framework::share;

    #[test]
    fn outputs_its_parameter() {
        let source = ConstantVectorSource::<f64>::new(&[1.0, -2.0]).unwrap();
        let parameter = source.parameter();
        let output = source.output();
        let system = share(source);
        let mut context = system.create_default_context().unwrap();
        assert_eq!(
            system.eval_vector_output(&context, output).unwrap().to_f64_vec(),
            Some(vec![1.0, -2.0])
        );

        context
            .numeric_parameter_mut(parameter)
            .unwrap()
            .set(1, 5.0)
            .unwrap();
        assert_eq!(
            system.eval_vector_output(&context, output).unwrap().to_f64_vec(),
            Some(vec![1.0, 5.0])
        );
    }

    #[test]
    fn converts_to_autodiff() {
        let system = share(ConstantVectorSource::<f64>::new(&[3.0]).unwrap());
        let converted = system.to_autodiff().unwrap();
        let context = converted.create_default_context().unwrap();
        let value = converted
            .eval_vector_output(&context, OutputPortIndex::new(0))
            .unwrap();
        assert_eq!(value.get(0), Some(&AutoDiff::constant(3.0)));
        assert!(!system.has_any_direct_feedthrough());
    }

    #[test]
    fn rejects_empty_value() {
        assert!(ConstantVectorSource::<f64>::new(&[]).is_err());
    }
}
