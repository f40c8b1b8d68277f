use serde::{Deserialize, Serialize};

use crate::functions::calculus::SymbolicMatrix;
use crate::functions::classify::Classification;
use crate::functions::linear_algebra::Matrix;
use crate::syntax::{Expr, Function};
use crate::ExtremaError;

/// What the caller asks for: a function string and optional per-variable
/// search intervals.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
  pub function: String,
  #[serde(default)]
  pub domain: Option<Vec<[f64; 2]>>,
}

impl Request {
  pub fn new(function: impl Into<String>) -> Self {
    Request {
      function: function.into(),
      domain: None,
    }
  }

  pub fn with_domain(mut self, domain: Vec<[f64; 2]>) -> Self {
    self.domain = Some(domain);
    self
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedPoint {
  pub coordinates: Vec<f64>,
  /// `None` when the Hessian could not be evaluated at this point.
  pub hessian: Option<Matrix>,
  pub classification: Classification,
}

/// Full result of one request, before it is flattened for the wire.
#[derive(Debug, Clone)]
pub struct Analysis {
  pub function: Function,
  pub gradient: Vec<Expr>,
  pub hessian: SymbolicMatrix,
  pub critical_points: Vec<ClassifiedPoint>,
}

/// Successful reply. The per-point arrays are aligned by index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
  pub variables: Vec<String>,
  pub gradients: Vec<String>,
  pub critical_points: Vec<Vec<f64>>,
  pub hessian: String,
  pub hessian_at_points: Vec<Option<Vec<Vec<f64>>>>,
  pub classifications: Vec<Classification>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
  Success(Report),
  Failure { error: String },
}

impl Response {
  pub fn failure(err: &ExtremaError) -> Self {
    Response::Failure {
      error: err.to_string(),
    }
  }

  pub fn is_failure(&self) -> bool {
    matches!(self, Response::Failure { .. })
  }

  pub fn to_json(&self) -> String {
    // Serializing plain strings and finite numbers cannot fail
    serde_json::to_string(self)
      .unwrap_or_else(|err| format!("{{\"error\":\"{err}\"}}"))
  }

  pub fn to_json_pretty(&self) -> String {
    serde_json::to_string_pretty(self)
      .unwrap_or_else(|err| format!("{{\"error\":\"{err}\"}}"))
  }
}

impl From<&Analysis> for Response {
  fn from(analysis: &Analysis) -> Self {
    let points = &analysis.critical_points;
    Response::Success(Report {
      variables: analysis.function.variables().to_vec(),
      gradients: analysis.gradient.iter().map(|g| g.to_string()).collect(),
      critical_points: points.iter().map(|p| p.coordinates.clone()).collect(),
      hessian: analysis.hessian.to_string(),
      hessian_at_points: points
        .iter()
        .map(|p| p.hessian.as_ref().map(Matrix::to_rows))
        .collect(),
      classifications: points.iter().map(|p| p.classification).collect(),
    })
  }
}
