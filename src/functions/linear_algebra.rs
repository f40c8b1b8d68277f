use crate::ExtremaError;

/// Pivots smaller than this fraction of the largest entry make the matrix
/// numerically singular.
const SINGULAR_PIVOT: f64 = 1e-13;
const JACOBI_MAX_SWEEPS: usize = 64;

/// Dense square matrix of reals stored row-major in one flat vector, so
/// entries are addressed by index and never alias each other.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
  dimension: usize,
  data: Vec<f64>,
}

impl Matrix {
  pub fn zeros(dimension: usize) -> Self {
    Matrix {
      dimension,
      data: vec![0.0; dimension * dimension],
    }
  }

  pub fn identity(dimension: usize) -> Self {
    let mut matrix = Self::zeros(dimension);
    for i in 0..dimension {
      matrix.set(i, i, 1.0);
    }
    matrix
  }

  pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, ExtremaError> {
    let dimension = rows.len();
    if let Some(row) = rows.iter().find(|row| row.len() != dimension) {
      return Err(ExtremaError::DimensionError(format!(
        "row of length {} in a {dimension}x{dimension} matrix",
        row.len()
      )));
    }
    Ok(Matrix {
      dimension,
      data: rows.concat(),
    })
  }

  pub fn dimension(&self) -> usize {
    self.dimension
  }

  pub fn get(&self, row: usize, column: usize) -> f64 {
    self.data[row * self.dimension + column]
  }

  pub fn set(&mut self, row: usize, column: usize, value: f64) {
    self.data[row * self.dimension + column] = value;
  }

  pub fn to_rows(&self) -> Vec<Vec<f64>> {
    self
      .data
      .chunks(self.dimension.max(1))
      .map(|row| row.to_vec())
      .collect()
  }

  pub fn max_abs(&self) -> f64 {
    self.data.iter().fold(0.0, |acc, v| acc.max(v.abs()))
  }

  pub fn is_symmetric(&self, tolerance: f64) -> bool {
    (0..self.dimension).all(|i| {
      (0..i).all(|j| (self.get(i, j) - self.get(j, i)).abs() <= tolerance)
    })
  }

  /// Copy of the matrix with `shift` added to every diagonal entry.
  pub fn shifted(&self, shift: f64) -> Self {
    let mut shifted = self.clone();
    for i in 0..self.dimension {
      shifted.set(i, i, self.get(i, i) + shift);
    }
    shifted
  }

  /// Solve `self * x = rhs` by Gaussian elimination with partial pivoting.
  /// Returns `None` when the matrix is numerically singular.
  pub fn solve(&self, rhs: &[f64]) -> Option<Vec<f64>> {
    let n = self.dimension;
    if rhs.len() != n {
      return None;
    }
    let scale = self.max_abs();
    if n > 0 && scale == 0.0 {
      return None;
    }

    let mut a = self.data.clone();
    let mut b = rhs.to_vec();
    for col in 0..n {
      let pivot_row = (col..n).max_by(|&r, &s| {
        a[r * n + col].abs().total_cmp(&a[s * n + col].abs())
      })?;
      if a[pivot_row * n + col].abs() <= SINGULAR_PIVOT * scale {
        return None;
      }
      if pivot_row != col {
        for k in 0..n {
          a.swap(col * n + k, pivot_row * n + k);
        }
        b.swap(col, pivot_row);
      }
      let pivot = a[col * n + col];
      for row in col + 1..n {
        let factor = a[row * n + col] / pivot;
        if factor == 0.0 {
          continue;
        }
        for k in col..n {
          a[row * n + k] -= factor * a[col * n + k];
        }
        b[row] -= factor * b[col];
      }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
      let tail: f64 = (row + 1..n).map(|k| a[row * n + k] * x[k]).sum();
      x[row] = (b[row] - tail) / a[row * n + row];
    }
    if x.iter().all(|v| v.is_finite()) {
      Some(x)
    } else {
      None
    }
  }

  /// Determinant by elimination with partial pivoting.
  pub fn determinant(&self) -> f64 {
    let n = self.dimension;
    let mut a = self.data.clone();
    let mut det = 1.0;
    for col in 0..n {
      let pivot_row = (col..n)
        .max_by(|&r, &s| a[r * n + col].abs().total_cmp(&a[s * n + col].abs()))
        .unwrap_or(col);
      let pivot = a[pivot_row * n + col];
      if pivot == 0.0 {
        return 0.0;
      }
      if pivot_row != col {
        for k in 0..n {
          a.swap(col * n + k, pivot_row * n + k);
        }
        det = -det;
      }
      det *= pivot;
      for row in col + 1..n {
        let factor = a[row * n + col] / pivot;
        for k in col..n {
          a[row * n + k] -= factor * a[col * n + k];
        }
      }
    }
    det
  }

  /// Eigenvalues of a symmetric matrix by cyclic Jacobi rotations, in
  /// ascending order. Only meaningful when the matrix is symmetric.
  pub fn symmetric_eigenvalues(&self) -> Vec<f64> {
    let n = self.dimension;
    let mut a = self.data.clone();
    let frobenius = a.iter().map(|v| v * v).sum::<f64>().sqrt();

    for _ in 0..JACOBI_MAX_SWEEPS {
      let off_diagonal: f64 = (0..n)
        .flat_map(|p| (p + 1..n).map(move |q| (p, q)))
        .map(|(p, q)| a[p * n + q] * a[p * n + q])
        .sum();
      if off_diagonal.sqrt() <= f64::EPSILON * frobenius {
        break;
      }

      for p in 0..n {
        for q in p + 1..n {
          let apq = a[p * n + q];
          if apq == 0.0 {
            continue;
          }
          let theta = (a[q * n + q] - a[p * n + p]) / (2.0 * apq);
          let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
          let c = 1.0 / (t * t + 1.0).sqrt();
          let s = t * c;

          for k in 0..n {
            let akp = a[k * n + p];
            let akq = a[k * n + q];
            a[k * n + p] = c * akp - s * akq;
            a[k * n + q] = s * akp + c * akq;
          }
          for k in 0..n {
            let apk = a[p * n + k];
            let aqk = a[q * n + k];
            a[p * n + k] = c * apk - s * aqk;
            a[q * n + k] = s * apk + c * aqk;
          }
        }
      }
    }

    let mut eigenvalues: Vec<f64> = (0..n).map(|i| a[i * n + i]).collect();
    eigenvalues.sort_by(|x, y| x.total_cmp(y));
    eigenvalues
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-10
  }

  #[test]
  fn solve_two_by_two() {
    let m = Matrix::from_rows(&[vec![2.0, 1.0], vec![1.0, 3.0]]).unwrap();
    let x = m.solve(&[3.0, 5.0]).unwrap();
    assert!(close(x[0], 0.8) && close(x[1], 1.4), "got {x:?}");
  }

  #[test]
  fn solve_needs_pivoting() {
    let m = Matrix::from_rows(&[vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap();
    let x = m.solve(&[2.0, 7.0]).unwrap();
    assert!(close(x[0], 7.0) && close(x[1], 2.0));
  }

  #[test]
  fn singular_matrix_has_no_solution() {
    let m = Matrix::from_rows(&[vec![1.0, 2.0], vec![2.0, 4.0]]).unwrap();
    assert!(m.solve(&[1.0, 1.0]).is_none());
    assert!(Matrix::zeros(2).solve(&[0.0, 0.0]).is_none());
  }

  #[test]
  fn shifted_singular_matrix_is_solvable() {
    let m = Matrix::zeros(2).shifted(1e-3);
    let x = m.solve(&[1e-3, 2e-3]).unwrap();
    assert!(close(x[0], 1.0) && close(x[1], 2.0));
  }

  #[test]
  fn determinant_with_row_swap() {
    let m = Matrix::from_rows(&[
      vec![0.0, 2.0, 1.0],
      vec![1.0, 0.0, 0.0],
      vec![0.0, 1.0, 3.0],
    ])
    .unwrap();
    assert!(close(m.determinant(), -5.0));
    assert!(close(Matrix::identity(4).determinant(), 1.0));
  }

  #[test]
  fn jacobi_eigenvalues() {
    let m = Matrix::from_rows(&[vec![2.0, 1.0], vec![1.0, 2.0]]).unwrap();
    let eig = m.symmetric_eigenvalues();
    assert!(close(eig[0], 1.0) && close(eig[1], 3.0), "got {eig:?}");

    let m = Matrix::from_rows(&[
      vec![2.0, -1.0, 0.0],
      vec![-1.0, 2.0, -1.0],
      vec![0.0, -1.0, 2.0],
    ])
    .unwrap();
    let eig = m.symmetric_eigenvalues();
    let sqrt2 = std::f64::consts::SQRT_2;
    assert!(close(eig[0], 2.0 - sqrt2), "got {eig:?}");
    assert!(close(eig[1], 2.0));
    assert!(close(eig[2], 2.0 + sqrt2));
  }

  #[test]
  fn ragged_rows_are_rejected() {
    let err = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
    assert!(matches!(err, ExtremaError::DimensionError(_)));
  }
}
