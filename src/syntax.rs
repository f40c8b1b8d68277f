use std::fmt;

use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};

use crate::{ExtremaError, Rule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
  Plus,
  Minus,
  Times,
  Divide,
  Power,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
  Minus,
  Sin,
  Cos,
  Tan,
  Exp,
  Ln,
  Sqrt,
}

/// Expression tree of a function of several real variables.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  Constant(f64),
  Variable(String),
  BinaryOp {
    op: BinaryOperator,
    left: Box<Expr>,
    right: Box<Expr>,
  },
  UnaryOp {
    op: UnaryOperator,
    operand: Box<Expr>,
  },
}

const SUM_PRECEDENCE: u8 = 1;
const PRODUCT_PRECEDENCE: u8 = 2;
const NEGATE_PRECEDENCE: u8 = 3;
const POWER_PRECEDENCE: u8 = 4;
const ATOM_PRECEDENCE: u8 = 5;

impl BinaryOperator {
  fn precedence(self) -> u8 {
    match self {
      Self::Plus | Self::Minus => SUM_PRECEDENCE,
      Self::Times | Self::Divide => PRODUCT_PRECEDENCE,
      Self::Power => POWER_PRECEDENCE,
    }
  }

  fn symbol(self) -> &'static str {
    match self {
      Self::Plus => " + ",
      Self::Minus => " - ",
      Self::Times => "*",
      Self::Divide => "/",
      Self::Power => "^",
    }
  }
}

impl UnaryOperator {
  /// Look up a named function. `log` and `ln` are both the natural logarithm.
  pub fn from_function_name(name: &str) -> Option<Self> {
    match name {
      "sin" => Some(Self::Sin),
      "cos" => Some(Self::Cos),
      "tan" => Some(Self::Tan),
      "exp" => Some(Self::Exp),
      "log" | "ln" => Some(Self::Ln),
      "sqrt" => Some(Self::Sqrt),
      _ => None,
    }
  }

  pub fn function_name(self) -> Option<&'static str> {
    match self {
      Self::Minus => None,
      Self::Sin => Some("sin"),
      Self::Cos => Some("cos"),
      Self::Tan => Some("tan"),
      Self::Exp => Some("exp"),
      Self::Ln => Some("log"),
      Self::Sqrt => Some("sqrt"),
    }
  }
}

impl Expr {
  pub fn constant(value: f64) -> Self {
    Expr::Constant(value)
  }

  pub fn variable(name: impl Into<String>) -> Self {
    Expr::Variable(name.into())
  }

  pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
    Expr::BinaryOp {
      op,
      left: Box::new(left),
      right: Box::new(right),
    }
  }

  pub fn unary(op: UnaryOperator, operand: Expr) -> Self {
    Expr::UnaryOp {
      op,
      operand: Box::new(operand),
    }
  }

  pub fn as_constant(&self) -> Option<f64> {
    match self {
      Expr::Constant(value) => Some(*value),
      _ => None,
    }
  }

  /// Distinct variable names in left-to-right textual order.
  pub fn variables(&self) -> Vec<String> {
    let mut names = Vec::new();
    self.collect_variables(&mut names);
    names
  }

  fn collect_variables(&self, names: &mut Vec<String>) {
    match self {
      Expr::Constant(_) => {}
      Expr::Variable(name) => {
        if !names.iter().any(|known| known == name) {
          names.push(name.clone());
        }
      }
      Expr::BinaryOp { left, right, .. } => {
        left.collect_variables(names);
        right.collect_variables(names);
      }
      Expr::UnaryOp { operand, .. } => operand.collect_variables(names),
    }
  }

  /// Number of nodes in the tree.
  pub fn size(&self) -> usize {
    match self {
      Expr::Constant(_) | Expr::Variable(_) => 1,
      Expr::BinaryOp { left, right, .. } => 1 + left.size() + right.size(),
      Expr::UnaryOp { operand, .. } => 1 + operand.size(),
    }
  }

  fn precedence(&self) -> u8 {
    match self {
      Expr::Constant(value) if value.is_sign_negative() && *value != 0.0 => {
        NEGATE_PRECEDENCE
      }
      Expr::Constant(_) | Expr::Variable(_) => ATOM_PRECEDENCE,
      Expr::BinaryOp { op, .. } => op.precedence(),
      Expr::UnaryOp {
        op: UnaryOperator::Minus,
        ..
      } => NEGATE_PRECEDENCE,
      Expr::UnaryOp { .. } => ATOM_PRECEDENCE,
    }
  }
}

/// Format a real so that it reads back as the same number.
pub fn format_number(value: f64) -> String {
  if value == 0.0 {
    "0".to_string()
  } else if value.fract() == 0.0 && value.abs() < 1e15 {
    format!("{}", value as i64)
  } else {
    format!("{value}")
  }
}

fn write_operand(
  f: &mut fmt::Formatter<'_>,
  expr: &Expr,
  parenthesize: bool,
) -> fmt::Result {
  if parenthesize {
    write!(f, "({expr})")
  } else {
    write!(f, "{expr}")
  }
}

impl fmt::Display for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Expr::Constant(value) => write!(f, "{}", format_number(*value)),
      Expr::Variable(name) => write!(f, "{name}"),
      Expr::UnaryOp {
        op: UnaryOperator::Minus,
        operand,
      } => {
        write!(f, "-")?;
        write_operand(f, operand, operand.precedence() < NEGATE_PRECEDENCE)
      }
      Expr::UnaryOp { op, operand } => {
        let name = op.function_name().unwrap_or_default();
        write!(f, "{name}({operand})")
      }
      Expr::BinaryOp { op, left, right } => {
        let precedence = op.precedence();
        // `^` groups to the right, everything else to the left
        let (left_parens, right_parens) = match op {
          BinaryOperator::Power => (
            left.precedence() <= precedence,
            right.precedence() < precedence,
          ),
          _ => (
            left.precedence() < precedence,
            right.precedence() <= precedence,
          ),
        };
        write_operand(f, left, left_parens)?;
        write!(f, "{}", op.symbol())?;
        write_operand(f, right, right_parens)
      }
    }
  }
}

/// A parsed scalar function: its variables in declaration order and the
/// expression over them.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
  variables: Vec<String>,
  expr: Expr,
}

impl Function {
  /// Declare the variables of `expr` in order of first occurrence.
  pub fn from_expr(expr: Expr) -> Result<Self, ExtremaError> {
    let variables = expr.variables();
    Self::new(variables, expr)
  }

  /// Build a function over an explicit variable list. The list must be free
  /// of duplicates and cover every variable the expression mentions.
  pub fn new(variables: Vec<String>, expr: Expr) -> Result<Self, ExtremaError> {
    for (i, name) in variables.iter().enumerate() {
      if variables[..i].contains(name) {
        return Err(ExtremaError::DimensionError(format!(
          "variable {name} declared twice"
        )));
      }
    }
    if let Some(undeclared) = expr
      .variables()
      .into_iter()
      .find(|name| !variables.contains(name))
    {
      return Err(ExtremaError::DimensionError(format!(
        "variable {undeclared} is not declared"
      )));
    }
    Ok(Function { variables, expr })
  }

  pub fn variables(&self) -> &[String] {
    &self.variables
  }

  pub fn arity(&self) -> usize {
    self.variables.len()
  }

  pub fn expr(&self) -> &Expr {
    &self.expr
  }
}

impl fmt::Display for Function {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.expr)
  }
}

fn pratt_parser() -> PrattParser<Rule> {
  PrattParser::new()
    .op(
      Op::infix(Rule::Add, Assoc::Left)
        | Op::infix(Rule::Subtract, Assoc::Left),
    )
    .op(
      Op::infix(Rule::Multiply, Assoc::Left)
        | Op::infix(Rule::Divide, Assoc::Left)
        | Op::infix(Rule::ImplicitMultiply, Assoc::Left),
    )
    .op(Op::prefix(Rule::Negate) | Op::prefix(Rule::Positive))
    .op(Op::infix(Rule::Power, Assoc::Right))
}

/// Convert an `Expression` pair into an expression tree.
pub fn build_expression(pair: Pair<'_, Rule>) -> Result<Expr, ExtremaError> {
  let pratt = pratt_parser();
  build_with(&pratt, pair)
}

fn build_with(
  pratt: &PrattParser<Rule>,
  pair: Pair<'_, Rule>,
) -> Result<Expr, ExtremaError> {
  pratt
    .map_primary(|primary| build_primary(pratt, primary))
    .map_prefix(|op, operand| {
      let operand = operand?;
      match op.as_rule() {
        Rule::Negate => Ok(Expr::unary(UnaryOperator::Minus, operand)),
        _ => Ok(operand),
      }
    })
    .map_infix(|left, op, right| {
      let (left, right) = (left?, right?);
      let op = match op.as_rule() {
        Rule::Add => BinaryOperator::Plus,
        Rule::Subtract => BinaryOperator::Minus,
        Rule::Multiply | Rule::ImplicitMultiply => BinaryOperator::Times,
        Rule::Divide => BinaryOperator::Divide,
        Rule::Power => BinaryOperator::Power,
        rule => {
          return Err(ExtremaError::DimensionError(format!(
            "unexpected operator {rule:?}"
          )))
        }
      };
      Ok(Expr::binary(op, left, right))
    })
    .parse(pair.into_inner())
}

fn build_primary(
  pratt: &PrattParser<Rule>,
  pair: Pair<'_, Rule>,
) -> Result<Expr, ExtremaError> {
  match pair.as_rule() {
    Rule::Number => {
      let text = pair.as_str();
      match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Expr::Constant(value)),
        _ => Err(ExtremaError::InvalidNumber(text.to_string())),
      }
    }
    Rule::Identifier => {
      let name = pair.as_str();
      match name {
        "pi" => Ok(Expr::Constant(std::f64::consts::PI)),
        "E" => Ok(Expr::Constant(std::f64::consts::E)),
        _ if UnaryOperator::from_function_name(name).is_some() => {
          Err(ExtremaError::BareFunction(name.to_string()))
        }
        _ => Ok(Expr::variable(name)),
      }
    }
    Rule::Call => {
      let mut inner = pair.into_inner();
      let (name, argument) = match (inner.next(), inner.next()) {
        (Some(name), Some(argument)) => (name.as_str(), argument),
        _ => {
          return Err(ExtremaError::DimensionError(
            "function call without argument".into(),
          ))
        }
      };
      let op = UnaryOperator::from_function_name(name)
        .ok_or_else(|| ExtremaError::UnknownFunction(name.to_string()))?;
      Ok(Expr::unary(op, build_with(pratt, argument)?))
    }
    Rule::Expression => build_with(pratt, pair),
    rule => Err(ExtremaError::DimensionError(format!(
      "unexpected syntax node {rule:?}"
    ))),
  }
}
