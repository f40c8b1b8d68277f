use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;
use tracing::info;

pub mod evaluator;
pub mod functions;
pub mod response;
pub mod server;
pub mod syntax;

use functions::calculus::{gradient, hessian, SymbolicMatrix};
use functions::classify::{classify, Classification};
use functions::solve::{find_critical_points, SearchDomain, SolverConfig};
use response::{Analysis, ClassifiedPoint, Request, Response};
use syntax::Function;

#[derive(Parser)]
#[grammar = "extrema.pest"]
pub struct ExtremaParser;

#[derive(Error, Debug)]
pub enum ExtremaError {
  #[error("Parse error: {0}")]
  ParseError(#[from] Box<pest::error::Error<Rule>>),
  #[error("Empty input")]
  EmptyInput,
  #[error("Invalid number: {0}")]
  InvalidNumber(String),
  #[error("Unknown function: {0}")]
  UnknownFunction(String),
  #[error("Function {0} must be applied to a parenthesized argument")]
  BareFunction(String),
  #[error("Invalid request: {0}")]
  InvalidRequest(String),
  #[error("Dimension error: {0}")]
  DimensionError(String),
  #[error("Domain error: {0}")]
  DomainError(String),
}

impl ExtremaError {
  /// True for errors caused by malformed function text.
  pub fn is_parse_error(&self) -> bool {
    matches!(
      self,
      Self::ParseError(_)
        | Self::EmptyInput
        | Self::InvalidNumber(_)
        | Self::UnknownFunction(_)
        | Self::BareFunction(_)
    )
  }

  /// True for errors that fail the whole request. Domain errors are
  /// absorbed by the solver and classifier and never reach the caller.
  pub fn is_request_fatal(&self) -> bool {
    !matches!(self, Self::DomainError(_))
  }
}

impl ExtremaParser {
  pub fn parse_program(
    input: &str,
  ) -> Result<pest::iterators::Pairs<'_, Rule>, Box<pest::error::Error<Rule>>>
  {
    Self::parse(Rule::Program, input).map_err(Box::new)
  }
}

pub fn parse(
  input: &str,
) -> Result<pest::iterators::Pairs<'_, Rule>, Box<pest::error::Error<Rule>>> {
  ExtremaParser::parse_program(input)
}

/// Parse a function string into its expression tree and the variables it
/// mentions, ordered by first occurrence.
pub fn parse_function(input: &str) -> Result<Function, ExtremaError> {
  let trimmed = input.trim();
  if trimmed.is_empty() {
    return Err(ExtremaError::EmptyInput);
  }

  let mut pairs = parse(trimmed)?;
  let program = pairs.next().ok_or(ExtremaError::EmptyInput)?;
  let expression = program
    .into_inner()
    .find(|pair| pair.as_rule() == Rule::Expression)
    .ok_or(ExtremaError::EmptyInput)?;

  let expr = syntax::build_expression(expression)?;
  Function::from_expr(expr)
}

/// Run the whole pipeline for one request: parse, differentiate, solve,
/// build the Hessian at each critical point and classify it.
pub fn analyze(
  request: &Request,
  config: &SolverConfig,
) -> Result<Analysis, ExtremaError> {
  let function = parse_function(&request.function)?;
  let domain = match &request.domain {
    Some(bounds) => SearchDomain::from_bounds(bounds, function.arity())?,
    None => SearchDomain::uniform(function.arity(), config.default_bounds)?,
  };

  let gradient = gradient(&function);
  let hessian = hessian(&function, &gradient)?;
  let points =
    find_critical_points(&function, &gradient, &hessian, &domain, config)?;

  let critical_points = points
    .into_iter()
    .map(|coordinates| {
      classify_point(&function, &hessian, coordinates, config.tolerance)
    })
    .collect::<Result<Vec<_>, _>>()?;

  info!(
    function = %function,
    variables = function.arity(),
    critical_points = critical_points.len(),
    "analysis finished"
  );

  Ok(Analysis {
    function,
    gradient,
    hessian,
    critical_points,
  })
}

/// Evaluate the Hessian at `coordinates` and classify the point there. A
/// Hessian that is undefined at the point leaves it unevaluated and
/// `Indeterminate`.
pub fn classify_point(
  function: &Function,
  hessian: &SymbolicMatrix,
  coordinates: Vec<f64>,
  tolerance: f64,
) -> Result<ClassifiedPoint, ExtremaError> {
  let numeric = match hessian.evaluate(function.variables(), &coordinates) {
    Ok(matrix) => Some(matrix),
    Err(ExtremaError::DomainError(_)) => None,
    Err(err) => return Err(err),
  };
  let classification = match &numeric {
    Some(matrix) => classify(matrix, tolerance)?,
    None => Classification::Indeterminate,
  };
  Ok(ClassifiedPoint {
    coordinates,
    hessian: numeric,
    classification,
  })
}

/// Like [`analyze`], but never fails: errors become `{"error": ...}`.
pub fn respond(request: &Request, config: &SolverConfig) -> Response {
  match analyze(request, config) {
    Ok(analysis) => Response::from(&analysis),
    Err(err) => Response::failure(&err),
  }
}
