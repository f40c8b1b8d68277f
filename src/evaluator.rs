use crate::syntax::{BinaryOperator, Expr, UnaryOperator};
use crate::ExtremaError;

/// Magnitudes below this count as zero for division, `tan` poles and
/// negative powers of zero.
pub const ZERO_THRESHOLD: f64 = 1e-12;

/// Values for each declared variable, looked up by name.
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'a> {
  names: &'a [String],
  values: &'a [f64],
}

impl<'a> Bindings<'a> {
  pub fn new(
    names: &'a [String],
    values: &'a [f64],
  ) -> Result<Self, ExtremaError> {
    if names.len() != values.len() {
      return Err(ExtremaError::DimensionError(format!(
        "{} variables bound to {} values",
        names.len(),
        values.len()
      )));
    }
    Ok(Bindings { names, values })
  }

  pub fn get(&self, name: &str) -> Option<f64> {
    self
      .names
      .iter()
      .position(|known| known == name)
      .map(|index| self.values[index])
  }
}

fn domain_error(message: impl Into<String>) -> ExtremaError {
  ExtremaError::DomainError(message.into())
}

fn finite(value: f64, what: &str) -> Result<f64, ExtremaError> {
  if value.is_finite() {
    Ok(value)
  } else {
    Err(domain_error(format!("{what} is not finite")))
  }
}

/// Evaluate `expr` at the point given by `bindings`.
///
/// Fails with `DomainError` when an operation is undefined at that point and
/// with `DimensionError` when the expression mentions an unbound variable.
pub fn evaluate(
  expr: &Expr,
  bindings: &Bindings<'_>,
) -> Result<f64, ExtremaError> {
  match expr {
    Expr::Constant(value) => Ok(*value),
    Expr::Variable(name) => bindings.get(name).ok_or_else(|| {
      ExtremaError::DimensionError(format!("variable {name} is not bound"))
    }),
    Expr::BinaryOp { op, left, right } => {
      let a = evaluate(left, bindings)?;
      let b = evaluate(right, bindings)?;
      apply_binary(*op, a, b)
    }
    Expr::UnaryOp { op, operand } => {
      let x = evaluate(operand, bindings)?;
      apply_unary(*op, x)
    }
  }
}

/// Evaluate several expressions at the same point.
pub fn evaluate_all(
  exprs: &[Expr],
  bindings: &Bindings<'_>,
) -> Result<Vec<f64>, ExtremaError> {
  exprs.iter().map(|expr| evaluate(expr, bindings)).collect()
}

pub fn apply_binary(
  op: BinaryOperator,
  a: f64,
  b: f64,
) -> Result<f64, ExtremaError> {
  match op {
    BinaryOperator::Plus => finite(a + b, "sum"),
    BinaryOperator::Minus => finite(a - b, "difference"),
    BinaryOperator::Times => finite(a * b, "product"),
    BinaryOperator::Divide => {
      if b.abs() < ZERO_THRESHOLD {
        return Err(domain_error("division by zero"));
      }
      finite(a / b, "quotient")
    }
    BinaryOperator::Power => power(a, b),
  }
}

fn power(base: f64, exponent: f64) -> Result<f64, ExtremaError> {
  let integral = exponent.fract() == 0.0;
  if base < 0.0 && !integral {
    return Err(domain_error(format!(
      "negative base {base} raised to non-integer power {exponent}"
    )));
  }
  if base.abs() < ZERO_THRESHOLD && exponent < 0.0 {
    return Err(domain_error("zero raised to a negative power"));
  }
  let value = if integral && exponent.abs() <= i32::MAX as f64 {
    base.powi(exponent as i32)
  } else {
    base.powf(exponent)
  };
  finite(value, "power")
}

pub fn apply_unary(op: UnaryOperator, x: f64) -> Result<f64, ExtremaError> {
  match op {
    UnaryOperator::Minus => Ok(-x),
    UnaryOperator::Sin => Ok(x.sin()),
    UnaryOperator::Cos => Ok(x.cos()),
    UnaryOperator::Tan => {
      if x.cos().abs() < ZERO_THRESHOLD {
        return Err(domain_error(format!("tan has a pole at {x}")));
      }
      finite(x.tan(), "tan")
    }
    UnaryOperator::Exp => finite(x.exp(), "exp"),
    UnaryOperator::Ln => {
      if x <= 0.0 {
        return Err(domain_error(format!("log of non-positive value {x}")));
      }
      Ok(x.ln())
    }
    UnaryOperator::Sqrt => {
      if x < 0.0 {
        return Err(domain_error(format!("sqrt of negative value {x}")));
      }
      Ok(x.sqrt())
    }
  }
}
