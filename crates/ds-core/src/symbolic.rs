//! Minimal symbolic scalar: an expression tree with constant folding.

use core::fmt;
use core::ops::{Add, Div, Mul, Neg, Sub};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::scalar::{Scalar, ScalarKind};

#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Constant(f64),
    Variable(Arc<str>),
    Add(Box<Expression>, Box<Expression>),
    Sub(Box<Expression>, Box<Expression>),
    Mul(Box<Expression>, Box<Expression>),
    Div(Box<Expression>, Box<Expression>),
    Neg(Box<Expression>),
}

impl Expression {
    pub fn constant(value: f64) -> Self {
        Expression::Constant(value)
    }

    pub fn variable(name: &str) -> Self {
        Expression::Variable(Arc::from(name))
    }

    pub fn as_constant(&self) -> Option<f64> {
        match self {
            Expression::Constant(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.as_constant().is_some()
    }

    /// Names of every variable appearing in the expression.
    pub fn free_variables(&self) -> BTreeSet<Arc<str>> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<Arc<str>>) {
        match self {
            Expression::Constant(_) => {}
            Expression::Variable(name) => {
                out.insert(name.clone());
            }
            Expression::Add(a, b)
            | Expression::Sub(a, b)
            | Expression::Mul(a, b)
            | Expression::Div(a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            Expression::Neg(a) => a.collect_variables(out),
        }
    }

    /// Evaluate with every free variable bound in `env`.
    pub fn evaluate(&self, env: &HashMap<String, f64>) -> CoreResult<f64> {
        Ok(match self {
            Expression::Constant(v) => *v,
            Expression::Variable(name) => {
                *env.get(name.as_ref())
                    .ok_or_else(|| CoreError::UnboundVariable {
                        name: name.to_string(),
                    })?
            }
            Expression::Add(a, b) => a.evaluate(env)? + b.evaluate(env)?,
            Expression::Sub(a, b) => a.evaluate(env)? - b.evaluate(env)?,
            Expression::Mul(a, b) => a.evaluate(env)? * b.evaluate(env)?,
            Expression::Div(a, b) => a.evaluate(env)? / b.evaluate(env)?,
            Expression::Neg(a) => -a.evaluate(env)?,
        })
    }
}

impl From<f64> for Expression {
    fn from(value: f64) -> Self {
        Expression::Constant(value)
    }
}

impl Add for Expression {
    type Output = Expression;
    fn add(self, rhs: Expression) -> Expression {
        match (self.as_constant(), rhs.as_constant()) {
            (Some(a), Some(b)) => Expression::Constant(a + b),
            (Some(a), None) if a == 0.0 => rhs,
            (None, Some(b)) if b == 0.0 => self,
            _ => Expression::Add(Box::new(self), Box::new(rhs)),
        }
    }
}

impl Sub for Expression {
    type Output = Expression;
    fn sub(self, rhs: Expression) -> Expression {
        match (self.as_constant(), rhs.as_constant()) {
            (Some(a), Some(b)) => Expression::Constant(a - b),
            (None, Some(b)) if b == 0.0 => self,
            _ => Expression::Sub(Box::new(self), Box::new(rhs)),
        }
    }
}

impl Mul for Expression {
    type Output = Expression;
    fn mul(self, rhs: Expression) -> Expression {
        match (self.as_constant(), rhs.as_constant()) {
            (Some(a), Some(b)) => Expression::Constant(a * b),
            (Some(a), None) if a == 1.0 => rhs,
            (None, Some(b)) if b == 1.0 => self,
            _ => Expression::Mul(Box::new(self), Box::new(rhs)),
        }
    }
}

impl Div for Expression {
    type Output = Expression;
    fn div(self, rhs: Expression) -> Expression {
        match (self.as_constant(), rhs.as_constant()) {
            (Some(a), Some(b)) => Expression::Constant(a / b),
            (None, Some(b)) if b == 1.0 => self,
            _ => Expression::Div(Box::new(self), Box::new(rhs)),
        }
    }
}

impl Neg for Expression {
    type Output = Expression;
    fn neg(self) -> Expression {
        match self {
            Expression::Constant(v) => Expression::Constant(-v),
            Expression::Neg(inner) => *inner,
            other => Expression::Neg(Box::new(other)),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Constant(v) => write!(f, "{v}"),
            Expression::Variable(name) => f.write_str(name),
            Expression::Add(a, b) => write!(f, "({a} + {b})"),
            Expression::Sub(a, b) => write!(f, "({a} - {b})"),
            Expression::Mul(a, b) => write!(f, "({a} * {b})"),
            Expression::Div(a, b) => write!(f, "({a} / {b})"),
            Expression::Neg(a) => write!(f, "-{a}"),
        }
    }
}

impl Scalar for Expression {
    const KIND: ScalarKind = ScalarKind::Symbolic;

    fn from_f64(value: f64) -> Self {
        Expression::Constant(value)
    }

    fn to_f64(&self) -> Option<f64> {
        self.as_constant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_fold() {
        let e = Expression::constant(2.0) * Expression::constant(3.0) + Expression::constant(1.0);
        assert_eq!(e, Expression::Constant(7.0));
        assert_eq!(e.to_f64(), Some(7.0));
    }

    #[test]
    fn identities_simplify() {
        let x = Expression::variable("x");
        assert_eq!(x.clone() * Expression::one(), x);
        assert_eq!(Expression::zero() + x.clone(), x);
        assert_eq!(-(-x.clone()), x);
    }

    #[test]
    fn evaluate_binds_variables() {
        let x = Expression::variable("x");
        let y = Expression::variable("y");
        let e = (x.clone() + y) / x;
        assert_eq!(e.to_string(), "((x + y) / x)");
        let vars: Vec<String> = e.free_variables().iter().map(|v| v.to_string()).collect();
        assert_eq!(vars, vec!["x".to_string(), "y".to_string()]);

        let mut env = HashMap::new();
        env.insert("x".to_string(), 2.0);
        assert!(matches!(
            e.evaluate(&env),
            Err(CoreError::UnboundVariable { .. })
        ));
        env.insert("y".to_string(), 6.0);
        assert_eq!(e.evaluate(&env).unwrap(), 4.0);
    }

    #[test]
    fn comparisons_need_constants() {
        let x = Expression::variable("x");
        assert_eq!(x.partial_lt(&Expression::constant(1.0)), None);
        assert_eq!(
            Expression::constant(0.0).partial_lt(&Expression::constant(1.0)),
            Some(true)
        );
    }
}
