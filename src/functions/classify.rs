use std::fmt;

use serde::Serialize;

use crate::functions::linear_algebra::Matrix;
use crate::ExtremaError;

/// Outcome of the second-derivative test at a critical point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Classification {
  LocalMin,
  LocalMax,
  Saddle,
  Indeterminate,
}

impl fmt::Display for Classification {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Classification::LocalMin => "LocalMin",
      Classification::LocalMax => "LocalMax",
      Classification::Saddle => "Saddle",
      Classification::Indeterminate => "Indeterminate",
    };
    write!(f, "{name}")
  }
}

/// Classify a critical point from its numeric Hessian.
///
/// One variable uses the sign of the second derivative, two variables the
/// determinant test, and three or more the signs of the eigenvalues. Values
/// within `tolerance` of zero make the test inconclusive, except that
/// eigenvalues of both signs always mean a saddle.
pub fn classify(
  hessian: &Matrix,
  tolerance: f64,
) -> Result<Classification, ExtremaError> {
  let asymmetry = tolerance.max(f64::EPSILON) * (1.0 + hessian.max_abs());
  if !hessian.is_symmetric(asymmetry) {
    return Err(ExtremaError::DimensionError(
      "Hessian is not symmetric".into(),
    ));
  }

  let classification = match hessian.dimension() {
    0 => Classification::Indeterminate,
    1 => by_sign(hessian.get(0, 0), tolerance),
    2 => {
      let det = hessian.determinant();
      let a = hessian.get(0, 0);
      if det.abs() <= tolerance {
        Classification::Indeterminate
      } else if det < 0.0 {
        Classification::Saddle
      } else if a > 0.0 {
        Classification::LocalMin
      } else {
        Classification::LocalMax
      }
    }
    _ => by_eigenvalues(&hessian.symmetric_eigenvalues(), tolerance),
  };
  Ok(classification)
}

fn by_sign(value: f64, tolerance: f64) -> Classification {
  if value.abs() <= tolerance {
    Classification::Indeterminate
  } else if value > 0.0 {
    Classification::LocalMin
  } else {
    Classification::LocalMax
  }
}

fn by_eigenvalues(eigenvalues: &[f64], tolerance: f64) -> Classification {
  let rising = eigenvalues.iter().any(|&ev| ev > tolerance);
  let falling = eigenvalues.iter().any(|&ev| ev < -tolerance);
  let flat = eigenvalues.iter().any(|ev| ev.abs() <= tolerance);
  match (rising, falling, flat) {
    (true, true, _) => Classification::Saddle,
    (_, _, true) => Classification::Indeterminate,
    (true, false, false) => Classification::LocalMin,
    _ => Classification::LocalMax,
  }
}
