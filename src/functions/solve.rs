use std::fmt;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::evaluator::{evaluate_all, Bindings};
use crate::functions::calculus::SymbolicMatrix;
use crate::syntax::{Expr, Function};
use crate::ExtremaError;

/// Step halvings tried before an attempt counts as stalled.
const MAX_STEP_HALVINGS: usize = 30;
/// Diagonal shift, relative to the largest entry, used when the Jacobian is
/// singular.
const REGULARIZATION: f64 = 1e-6;
/// Interior points, as fractions of the segment, where two converged points
/// must share a vanishing gradient to be merged.
const SEGMENT_SAMPLES: [f64; 3] = [0.25, 0.5, 0.75];

/// Tuning knobs of the multi-start Newton search.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
  /// Search interval used for every variable when a request gives none.
  pub default_bounds: (f64, f64),
  /// Grid resolution when `grid_points_per_axis^n <= max_seeds`.
  pub grid_points_per_axis: usize,
  /// Upper bound on the number of start points.
  pub max_seeds: usize,
  /// Newton steps per start point.
  pub max_iterations: usize,
  /// Gradient norm that counts as zero. Also the classifier's zero test.
  pub tolerance: f64,
  /// Points closer than this (per coordinate) are the same critical point.
  pub merge_tolerance: f64,
  /// Wall-clock budget for the whole search.
  pub time_budget: Duration,
  pub rng_seed: u64,
  /// Iterates farther than this many domain widths from the domain have
  /// diverged.
  pub divergence_factor: f64,
}

impl Default for SolverConfig {
  fn default() -> Self {
    SolverConfig {
      default_bounds: (-10.0, 10.0),
      grid_points_per_axis: 5,
      max_seeds: 128,
      max_iterations: 100,
      tolerance: 1e-9,
      merge_tolerance: 1e-6,
      time_budget: Duration::from_secs(2),
      rng_seed: 42,
      divergence_factor: 100.0,
    }
  }
}

/// Axis-aligned box the critical points are searched in.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchDomain {
  bounds: Vec<(f64, f64)>,
}

fn check_interval(min: f64, max: f64) -> Result<(f64, f64), ExtremaError> {
  if !min.is_finite() || !max.is_finite() || min >= max {
    return Err(ExtremaError::InvalidRequest(format!(
      "search interval [{min}, {max}] is empty or not finite"
    )));
  }
  Ok((min, max))
}

impl SearchDomain {
  /// The same interval on each of `dimension` axes.
  pub fn uniform(
    dimension: usize,
    (min, max): (f64, f64),
  ) -> Result<Self, ExtremaError> {
    let interval = check_interval(min, max)?;
    Ok(SearchDomain {
      bounds: vec![interval; dimension],
    })
  }

  /// Per-axis `[min, max]` pairs. A single pair applies to every axis.
  pub fn from_bounds(
    bounds: &[[f64; 2]],
    dimension: usize,
  ) -> Result<Self, ExtremaError> {
    match bounds {
      [[min, max]] => Self::uniform(dimension, (*min, *max)),
      _ if bounds.len() == dimension => {
        let bounds = bounds
          .iter()
          .map(|[min, max]| check_interval(*min, *max))
          .collect::<Result<Vec<_>, _>>()?;
        Ok(SearchDomain { bounds })
      }
      _ => Err(ExtremaError::InvalidRequest(format!(
        "{} search intervals given for {dimension} variables",
        bounds.len()
      ))),
    }
  }

  pub fn dimension(&self) -> usize {
    self.bounds.len()
  }

  pub fn bounds(&self) -> &[(f64, f64)] {
    &self.bounds
  }

  pub fn centre(&self) -> Vec<f64> {
    self.bounds.iter().map(|(min, max)| 0.5 * (min + max)).collect()
  }

  /// True when every coordinate lies within its interval widened by `slack`.
  pub fn contains(&self, point: &[f64], slack: f64) -> bool {
    point
      .iter()
      .zip(&self.bounds)
      .all(|(x, (min, max))| *x >= min - slack && *x <= max + slack)
  }

  fn is_far(&self, point: &[f64], factor: f64) -> bool {
    point.iter().zip(&self.bounds).any(|(x, (min, max))| {
      let reach = factor * (max - min);
      !x.is_finite() || *x < min - reach || *x > max + reach
    })
  }
}

/// Start points: a regular grid of cell centres when it fits in
/// `max_seeds`, otherwise the domain centre plus pseudo-random points.
pub fn seed_points(
  domain: &SearchDomain,
  config: &SolverConfig,
) -> Vec<Vec<f64>> {
  let n = domain.dimension();
  if n == 0 || config.max_seeds == 0 {
    return Vec::new();
  }

  let per_axis = config.grid_points_per_axis.max(1);
  let grid_size = u32::try_from(n)
    .ok()
    .and_then(|exponent| per_axis.checked_pow(exponent))
    .filter(|&size| size <= config.max_seeds);

  if let Some(size) = grid_size {
    return (0..size)
      .map(|index| {
        let mut rest = index;
        domain
          .bounds()
          .iter()
          .map(|(min, max)| {
            let digit = rest % per_axis;
            rest /= per_axis;
            min + (digit as f64 + 0.5) * (max - min) / per_axis as f64
          })
          .collect()
      })
      .collect();
  }

  let mut rng = ChaCha8Rng::seed_from_u64(config.rng_seed);
  let mut seeds = vec![domain.centre()];
  while seeds.len() < config.max_seeds {
    let point = domain
      .bounds()
      .iter()
      .map(|(min, max)| rng.gen_range(*min..*max))
      .collect();
    seeds.push(point);
  }
  seeds
}

/// Why a single Newton attempt was thrown away.
#[derive(Debug)]
enum AttemptFailure {
  Domain(String),
  Diverged,
  Stalled,
  NotConverged,
  OutOfTime,
  Fatal(ExtremaError),
}

impl From<ExtremaError> for AttemptFailure {
  fn from(err: ExtremaError) -> Self {
    match err {
      ExtremaError::DomainError(message) => AttemptFailure::Domain(message),
      other => AttemptFailure::Fatal(other),
    }
  }
}

impl fmt::Display for AttemptFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AttemptFailure::Domain(message) => write!(f, "{message}"),
      AttemptFailure::Diverged => write!(f, "iterate left the search region"),
      AttemptFailure::Stalled => write!(f, "no step reduced the gradient"),
      AttemptFailure::NotConverged => write!(f, "iteration budget exhausted"),
      AttemptFailure::OutOfTime => write!(f, "time budget exhausted"),
      AttemptFailure::Fatal(err) => write!(f, "{err}"),
    }
  }
}

fn norm(values: &[f64]) -> f64 {
  values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Where a successful attempt stopped.
#[derive(Debug, Clone)]
struct Converged {
  point: Vec<f64>,
  residual: f64,
}

/// Everything one attempt reads. Shared immutably across worker threads.
struct Problem<'a> {
  variables: &'a [String],
  gradient: &'a [Expr],
  jacobian: &'a SymbolicMatrix,
  domain: &'a SearchDomain,
  config: &'a SolverConfig,
  deadline: Instant,
}

impl Problem<'_> {
  fn gradient_at(&self, point: &[f64]) -> Result<Vec<f64>, ExtremaError> {
    let bindings = Bindings::new(self.variables, point)?;
    evaluate_all(self.gradient, &bindings)
  }

  /// Damped Newton iteration on the gradient from `start`.
  fn newton(&self, start: &[f64]) -> Result<Converged, AttemptFailure> {
    let mut x = start.to_vec();
    let mut g = self.gradient_at(&x)?;
    let mut residual = norm(&g);

    for _ in 0..self.config.max_iterations {
      if residual < self.config.tolerance {
        return Ok(Converged { point: x, residual });
      }
      if Instant::now() >= self.deadline {
        return Err(AttemptFailure::OutOfTime);
      }

      let jacobian = self.jacobian.evaluate(self.variables, &x)?;
      let rhs: Vec<f64> = g.iter().map(|v| -v).collect();
      let step = jacobian
        .solve(&rhs)
        .or_else(|| {
          let shift = REGULARIZATION * (1.0 + jacobian.max_abs());
          jacobian.shifted(shift).solve(&rhs)
        })
        .ok_or(AttemptFailure::Stalled)?;

      let (next, next_g) = self.line_search(&x, &step, residual)?;
      if self.domain.is_far(&next, self.config.divergence_factor) {
        return Err(AttemptFailure::Diverged);
      }
      x = next;
      residual = norm(&next_g);
      g = next_g;
    }

    if residual < self.config.tolerance {
      Ok(Converged { point: x, residual })
    } else {
      Err(AttemptFailure::NotConverged)
    }
  }

  /// Halve the step until the gradient norm drops below `residual`.
  fn line_search(
    &self,
    x: &[f64],
    step: &[f64],
    residual: f64,
  ) -> Result<(Vec<f64>, Vec<f64>), AttemptFailure> {
    let mut t = 1.0;
    for _ in 0..MAX_STEP_HALVINGS {
      let candidate: Vec<f64> =
        x.iter().zip(step).map(|(xi, di)| xi + t * di).collect();
      if candidate.iter().all(|c| c.is_finite()) {
        match self.gradient_at(&candidate) {
          Ok(g) if norm(&g) < residual => return Ok((candidate, g)),
          Ok(_) | Err(ExtremaError::DomainError(_)) => {}
          Err(err) => return Err(AttemptFailure::Fatal(err)),
        }
      }
      t *= 0.5;
    }
    Err(AttemptFailure::Stalled)
  }

  /// Whether two converged points stand for one critical point: they are
  /// within `merge_tolerance`, or the gradient also vanishes along the
  /// segment between them. Slow convergence near a degenerate critical point
  /// stops each attempt at a different spot, all of them inside one such
  /// flat patch.
  fn same_critical_point(&self, a: &[f64], b: &[f64]) -> bool {
    if distance(a, b) < self.config.merge_tolerance {
      return true;
    }
    SEGMENT_SAMPLES.iter().all(|t| {
      let sample: Vec<f64> =
        a.iter().zip(b).map(|(x, y)| x + t * (y - x)).collect();
      self
        .gradient_at(&sample)
        .is_ok_and(|g| norm(&g) < self.config.tolerance)
    })
  }
}

/// Chebyshev distance between two points.
fn distance(a: &[f64], b: &[f64]) -> f64 {
  a.iter()
    .zip(b)
    .fold(0.0, |acc, (x, y)| acc.max((x - y).abs()))
}

/// Find the points of `domain` where every gradient component vanishes.
///
/// Runs one damped Newton attempt per seed point in parallel, using the
/// Hessian as the Jacobian of the gradient. Attempts that diverge, leave the
/// function's domain, or run out of iterations or time are dropped. The
/// survivors inside the domain are grouped when they lie within
/// `merge_tolerance` of each other or the gradient vanishes along the segment
/// joining them. Each group is reported once, at the member with the smallest
/// gradient norm, and the points come back in lexicographic order. An empty
/// result is not an error.
pub fn find_critical_points(
  function: &Function,
  gradient: &[Expr],
  hessian: &SymbolicMatrix,
  domain: &SearchDomain,
  config: &SolverConfig,
) -> Result<Vec<Vec<f64>>, ExtremaError> {
  let n = function.arity();
  if gradient.len() != n || hessian.dimension() != n || domain.dimension() != n
  {
    return Err(ExtremaError::DimensionError(format!(
      "{n} variables, {} gradient components, {}x{} Hessian, \
       {}-dimensional domain",
      gradient.len(),
      hessian.dimension(),
      hessian.dimension(),
      domain.dimension()
    )));
  }

  let problem = Problem {
    variables: function.variables(),
    gradient,
    jacobian: hessian,
    domain,
    config,
    deadline: Instant::now() + config.time_budget,
  };

  let seeds = seed_points(domain, config);
  let outcomes: Vec<Result<Converged, AttemptFailure>> = seeds
    .par_iter()
    .map(|seed| {
      if Instant::now() >= problem.deadline {
        Err(AttemptFailure::OutOfTime)
      } else {
        problem.newton(seed)
      }
    })
    .collect();

  let mut converged = Vec::new();
  for (seed, outcome) in seeds.iter().zip(outcomes) {
    match outcome {
      Ok(found) => converged.push(found),
      Err(AttemptFailure::Fatal(err)) => return Err(err),
      Err(reason) => debug!(?seed, %reason, "discarded solver attempt"),
    }
  }
  let attempts_converged = converged.len();

  let mut groups: Vec<Vec<Converged>> = Vec::new();
  for mut found in converged {
    if !domain.contains(&found.point, config.merge_tolerance) {
      continue;
    }
    for coordinate in found.point.iter_mut() {
      if coordinate.abs() < config.tolerance {
        *coordinate = 0.0;
      }
    }
    let mut group = Vec::new();
    let mut index = 0;
    while index < groups.len() {
      let touches = groups[index]
        .iter()
        .any(|member| problem.same_critical_point(&member.point, &found.point));
      if touches {
        group.extend(groups.swap_remove(index));
      } else {
        index += 1;
      }
    }
    group.push(found);
    groups.push(group);
  }

  let mut unique: Vec<Vec<f64>> = groups
    .into_iter()
    .filter_map(|group| {
      group
        .into_iter()
        .min_by(|a, b| a.residual.total_cmp(&b.residual))
        .map(|best| best.point)
    })
    .collect();
  unique.sort_by(|a, b| {
    a.iter()
      .zip(b)
      .map(|(x, y)| x.total_cmp(y))
      .find(|ordering| ordering.is_ne())
      .unwrap_or(std::cmp::Ordering::Equal)
  });

  info!(
    seeds = seeds.len(),
    converged = attempts_converged,
    critical_points = unique.len(),
    "critical point search finished"
  );
  Ok(unique)
}
