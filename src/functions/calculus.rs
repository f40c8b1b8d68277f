use std::fmt;

use crate::evaluator::{apply_binary, apply_unary, evaluate, Bindings};
use crate::functions::linear_algebra::Matrix;
use crate::syntax::{BinaryOperator, Expr, Function, UnaryOperator};
use crate::ExtremaError;

/// Check if an expression does not depend on `var`.
pub fn is_constant_wrt(expr: &Expr, var: &str) -> bool {
  match expr {
    Expr::Constant(_) => true,
    Expr::Variable(name) => name != var,
    Expr::BinaryOp { left, right, .. } => {
      is_constant_wrt(left, var) && is_constant_wrt(right, var)
    }
    Expr::UnaryOp { operand, .. } => is_constant_wrt(operand, var),
  }
}

/// Partial derivative of `expr` with respect to `var`.
pub fn differentiate(expr: &Expr, var: &str) -> Expr {
  use BinaryOperator::*;

  match expr {
    Expr::Constant(_) => Expr::Constant(0.0),

    Expr::Variable(name) => {
      if name == var {
        Expr::Constant(1.0)
      } else {
        Expr::Constant(0.0)
      }
    }

    Expr::BinaryOp { op, left, right } => match op {
      Plus | Minus => {
        // d/dx[a ± b] = d/dx[a] ± d/dx[b]
        fold(*op, differentiate(left, var), differentiate(right, var))
      }
      Times => {
        // Product rule: d/dx[a * b] = a' * b + a * b'
        if is_constant_wrt(left, var) {
          fold(Times, *left.clone(), differentiate(right, var))
        } else if is_constant_wrt(right, var) {
          fold(Times, differentiate(left, var), *right.clone())
        } else {
          fold(
            Plus,
            fold(Times, differentiate(left, var), *right.clone()),
            fold(Times, *left.clone(), differentiate(right, var)),
          )
        }
      }
      Divide => {
        if is_constant_wrt(right, var) {
          fold(Divide, differentiate(left, var), *right.clone())
        } else {
          // Quotient rule: d/dx[a / b] = (a' * b - a * b') / b^2
          let numerator = fold(
            Minus,
            fold(Times, differentiate(left, var), *right.clone()),
            fold(Times, *left.clone(), differentiate(right, var)),
          );
          fold(
            Divide,
            numerator,
            fold(Power, *right.clone(), Expr::Constant(2.0)),
          )
        }
      }
      Power => {
        if is_constant_wrt(right, var) {
          // Power rule: d/dx[u^n] = n * u^(n-1) * u'
          let lowered = fold(Minus, *right.clone(), Expr::Constant(1.0));
          fold(
            Times,
            fold(Times, *right.clone(), fold(Power, *left.clone(), lowered)),
            differentiate(left, var),
          )
        } else if is_constant_wrt(left, var) {
          // d/dx[a^g] = a^g * ln(a) * g'
          fold(
            Times,
            fold(
              Times,
              expr.clone(),
              fold_unary(UnaryOperator::Ln, *left.clone()),
            ),
            differentiate(right, var),
          )
        } else {
          // d/dx[u^v] = u^v * (v' * ln(u) + v * u' / u)
          let log_term = fold(
            Times,
            differentiate(right, var),
            fold_unary(UnaryOperator::Ln, *left.clone()),
          );
          let ratio_term = fold(
            Divide,
            fold(Times, *right.clone(), differentiate(left, var)),
            *left.clone(),
          );
          fold(Times, expr.clone(), fold(Plus, log_term, ratio_term))
        }
      }
    },

    Expr::UnaryOp { op, operand } => {
      let inner = differentiate(operand, var);
      let u = || *operand.clone();
      let outer = match op {
        UnaryOperator::Minus => return fold_unary(UnaryOperator::Minus, inner),
        // d/dx[sin(u)] = cos(u) * u'
        UnaryOperator::Sin => Expr::unary(UnaryOperator::Cos, u()),
        // d/dx[cos(u)] = -sin(u) * u'
        UnaryOperator::Cos => Expr::unary(
          UnaryOperator::Minus,
          Expr::unary(UnaryOperator::Sin, u()),
        ),
        // d/dx[tan(u)] = u' / cos(u)^2
        UnaryOperator::Tan => {
          return fold(
            Divide,
            inner,
            fold(
              Power,
              Expr::unary(UnaryOperator::Cos, u()),
              Expr::Constant(2.0),
            ),
          );
        }
        UnaryOperator::Exp => expr.clone(),
        // d/dx[ln(u)] = u' / u
        UnaryOperator::Ln => return fold(Divide, inner, u()),
        // d/dx[sqrt(u)] = u' / (2 * sqrt(u))
        UnaryOperator::Sqrt => {
          return fold(
            Divide,
            inner,
            fold(Times, Expr::Constant(2.0), expr.clone()),
          );
        }
      };
      fold(Times, inner, outer)
    }
  }
}

/// Build `left op right`, folding constants and the identities
/// `x+0`, `x-0`, `x*1`, `x*0`, `x/1`, `x^0`, `x^1`, `1^x`.
pub fn fold(op: BinaryOperator, left: Expr, right: Expr) -> Expr {
  use BinaryOperator::*;

  let (a, b) = (left.as_constant(), right.as_constant());
  if let (Some(a), Some(b)) = (a, b) {
    if let Ok(value) = apply_binary(op, a, b) {
      return Expr::Constant(value);
    }
  }

  match (op, a, b) {
    (Plus, Some(z), _) if z == 0.0 => right,
    (Plus, _, Some(z)) | (Minus, _, Some(z)) if z == 0.0 => left,
    (Minus, Some(z), _) if z == 0.0 => fold_unary(UnaryOperator::Minus, right),
    (Times, Some(z), _) | (Times, _, Some(z)) if z == 0.0 => {
      Expr::Constant(0.0)
    }
    (Times, Some(one), _) if one == 1.0 => right,
    (Times, _, Some(one)) | (Divide, _, Some(one)) if one == 1.0 => left,
    (Times, Some(m), _) if m == -1.0 => fold_unary(UnaryOperator::Minus, right),
    (Times, _, Some(m)) if m == -1.0 => fold_unary(UnaryOperator::Minus, left),
    // coefficient first
    (Times, None, Some(_)) => fold(Times, right, left),
    (Divide, Some(z), _) if z == 0.0 => Expr::Constant(0.0),
    (Power, _, Some(z)) if z == 0.0 => Expr::Constant(1.0),
    (Power, _, Some(one)) if one == 1.0 => left,
    (Power, Some(one), _) if one == 1.0 => Expr::Constant(1.0),
    _ => fold_signs(op, left, right),
  }
}

/// Pull negations out of products and quotients and merge them into sums.
fn fold_signs(op: BinaryOperator, left: Expr, right: Expr) -> Expr {
  use BinaryOperator::*;

  match (op, left, right) {
    (
      Plus,
      left,
      Expr::UnaryOp {
        op: UnaryOperator::Minus,
        operand,
      },
    ) => Expr::binary(Minus, left, *operand),
    (
      Minus,
      left,
      Expr::UnaryOp {
        op: UnaryOperator::Minus,
        operand,
      },
    ) => Expr::binary(Plus, left, *operand),
    (Plus, left, Expr::Constant(c)) if c < 0.0 => {
      Expr::binary(Minus, left, Expr::Constant(-c))
    }
    (Minus, left, Expr::Constant(c)) if c < 0.0 => {
      Expr::binary(Plus, left, Expr::Constant(-c))
    }
    (
      Times | Divide,
      Expr::UnaryOp {
        op: UnaryOperator::Minus,
        operand,
      },
      right,
    ) => fold_unary(UnaryOperator::Minus, fold(op, *operand, right)),
    (
      Times | Divide,
      left,
      Expr::UnaryOp {
        op: UnaryOperator::Minus,
        operand,
      },
    ) => fold_unary(UnaryOperator::Minus, fold(op, left, *operand)),
    // c1 * (c2 * x) = (c1 * c2) * x
    (Times, Expr::Constant(c1), Expr::BinaryOp { op: Times, left, right }) => {
      match *left {
        Expr::Constant(c2) => fold(Times, Expr::Constant(c1 * c2), *right),
        left => Expr::binary(
          Times,
          Expr::Constant(c1),
          Expr::binary(Times, left, *right),
        ),
      }
    }
    (op, left, right) => Expr::binary(op, left, right),
  }
}

/// Build `op(operand)`, evaluating it when the operand is a constant.
pub fn fold_unary(op: UnaryOperator, operand: Expr) -> Expr {
  match (op, operand) {
    (_, Expr::Constant(value)) => match apply_unary(op, value) {
      Ok(folded) => Expr::Constant(folded),
      Err(_) => Expr::unary(op, Expr::Constant(value)),
    },
    (
      UnaryOperator::Minus,
      Expr::UnaryOp {
        op: UnaryOperator::Minus,
        operand,
      },
    ) => *operand,
    // -(c * x) = (-c) * x
    (
      UnaryOperator::Minus,
      Expr::BinaryOp {
        op: BinaryOperator::Times,
        left,
        right,
      },
    ) => match *left {
      Expr::Constant(c) => {
        fold(BinaryOperator::Times, Expr::Constant(-c), *right)
      }
      left => Expr::unary(
        UnaryOperator::Minus,
        Expr::binary(BinaryOperator::Times, left, *right),
      ),
    },
    (op, operand) => Expr::unary(op, operand),
  }
}

/// Rebuild `expr` bottom up with all folding rules applied.
pub fn simplify(expr: Expr) -> Expr {
  match expr {
    Expr::BinaryOp { op, left, right } => {
      fold(op, simplify(*left), simplify(*right))
    }
    Expr::UnaryOp { op, operand } => fold_unary(op, simplify(*operand)),
    leaf => leaf,
  }
}

/// First partial derivatives, one per declared variable, in order.
pub fn gradient(function: &Function) -> Vec<Expr> {
  function
    .variables()
    .iter()
    .map(|var| simplify(differentiate(function.expr(), var)))
    .collect()
}

/// Square matrix of expressions stored row-major in one flat vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolicMatrix {
  dimension: usize,
  entries: Vec<Expr>,
}

impl SymbolicMatrix {
  pub fn dimension(&self) -> usize {
    self.dimension
  }

  pub fn get(&self, row: usize, column: usize) -> &Expr {
    &self.entries[row * self.dimension + column]
  }

  pub fn rows(&self) -> impl Iterator<Item = &[Expr]> {
    self.entries.chunks(self.dimension.max(1))
  }

  pub fn is_symmetric(&self) -> bool {
    (0..self.dimension).all(|i| {
      (0..i).all(|j| self.get(i, j) == self.get(j, i))
    })
  }

  /// Evaluate every entry at `point`. Only the upper triangle is evaluated;
  /// the lower one is mirrored from it.
  pub fn evaluate(
    &self,
    variables: &[String],
    point: &[f64],
  ) -> Result<Matrix, ExtremaError> {
    if variables.len() != self.dimension {
      return Err(ExtremaError::DimensionError(format!(
        "{}x{} matrix evaluated over {} variables",
        self.dimension,
        self.dimension,
        variables.len()
      )));
    }
    let bindings = Bindings::new(variables, point)?;
    let mut matrix = Matrix::zeros(self.dimension);
    for i in 0..self.dimension {
      for j in i..self.dimension {
        let value = evaluate(self.get(i, j), &bindings)?;
        matrix.set(i, j, value);
        matrix.set(j, i, value);
      }
    }
    Ok(matrix)
  }
}

impl fmt::Display for SymbolicMatrix {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, row) in self.rows().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      let cells: Vec<String> = row.iter().map(|e| e.to_string()).collect();
      write!(f, "[{}]", cells.join(", "))?;
    }
    write!(f, "]")
  }
}

/// Symbolic Hessian H[i][j] = d²f/dxᵢdxⱼ, built by differentiating each
/// gradient component again. Mixed partials commute, so the lower triangle
/// is a copy of the upper one.
pub fn hessian(
  function: &Function,
  gradient: &[Expr],
) -> Result<SymbolicMatrix, ExtremaError> {
  let n = function.arity();
  if gradient.len() != n {
    return Err(ExtremaError::DimensionError(format!(
      "gradient has {} components for {n} variables",
      gradient.len()
    )));
  }

  let variables = function.variables();
  let mut entries = vec![Expr::Constant(0.0); n * n];
  for i in 0..n {
    for j in i..n {
      let second = simplify(differentiate(&gradient[i], &variables[j]));
      entries[j * n + i] = second.clone();
      entries[i * n + j] = second;
    }
  }

  Ok(SymbolicMatrix {
    dimension: n,
    entries,
  })
}
