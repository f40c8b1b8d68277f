use extrema::evaluator::{evaluate, Bindings};
use extrema::functions::calculus::{differentiate, gradient, hessian, simplify};
use extrema::parse_function;
use extrema::syntax::Expr;

fn gradient_of(input: &str) -> Vec<String> {
  let function = parse_function(input).unwrap();
  gradient(&function).iter().map(Expr::to_string).collect()
}

fn hessian_of(input: &str) -> String {
  let function = parse_function(input).unwrap();
  let gradient = gradient(&function);
  hessian(&function, &gradient).unwrap().to_string()
}

fn value_at(expr: &Expr, names: &[&str], values: &[f64]) -> f64 {
  let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
  let bindings = Bindings::new(&names, values).unwrap();
  evaluate(expr, &bindings).unwrap()
}

mod gradients {
  use super::*;

  #[test]
  fn sum_of_squares() {
    assert_eq!(gradient_of("x^2 + y^2"), ["2*x", "2*y"]);
  }

  #[test]
  fn polynomial_with_mixed_term() {
    assert_eq!(gradient_of("x^2 - 3x*y + y^3"), ["2*x - 3*y", "-3*x + 3*y^2"]);
  }

  #[test]
  fn linear_function_has_constant_gradient() {
    assert_eq!(gradient_of("x + y"), ["1", "1"]);
    assert_eq!(gradient_of("4x - 2y + 7"), ["4", "-2"]);
  }

  #[test]
  fn missing_variable_differentiates_to_zero() {
    let function = parse_function("x^2").unwrap();
    let dy = simplify(differentiate(function.expr(), "y"));
    assert_eq!(dy, Expr::constant(0.0));
  }

  #[test]
  fn chain_rule() {
    assert_eq!(gradient_of("sin(x)"), ["cos(x)"]);
    assert_eq!(gradient_of("cos(2x)"), ["-2*sin(2*x)"]);
    assert_eq!(gradient_of("exp(x^2)"), ["2*x*exp(x^2)"]);
    assert_eq!(gradient_of("log(x)"), ["1/x"]);
  }

  #[test]
  fn quotient_rule_matches_numeric_derivative() {
    let function = parse_function("x / (1 + y^2)").unwrap();
    let grad = gradient(&function);
    let (x, y) = (0.8, -1.7);
    let h = 1e-6;
    let f = |x: f64, y: f64| x / (1.0 + y * y);
    let dx = (f(x + h, y) - f(x - h, y)) / (2.0 * h);
    let dy = (f(x, y + h) - f(x, y - h)) / (2.0 * h);
    assert!((value_at(&grad[0], &["x", "y"], &[x, y]) - dx).abs() < 1e-6);
    assert!((value_at(&grad[1], &["x", "y"], &[x, y]) - dy).abs() < 1e-6);
  }

  #[test]
  fn variable_exponent() {
    let function = parse_function("x^x").unwrap();
    let grad = gradient(&function);
    let x: f64 = 1.5;
    let expected = x.powf(x) * (x.ln() + 1.0);
    assert!((value_at(&grad[0], &["x"], &[x]) - expected).abs() < 1e-9);
  }

  #[test]
  fn constant_base_exponent() {
    let function = parse_function("2^x").unwrap();
    let grad = gradient(&function);
    let x: f64 = 0.5;
    let expected = 2f64.powf(x) * 2f64.ln();
    assert!((value_at(&grad[0], &["x"], &[x]) - expected).abs() < 1e-9);
  }

  #[test]
  fn constant_function_has_empty_gradient() {
    assert!(gradient_of("3 + 4").is_empty());
  }
}

mod hessians {
  use super::*;

  #[test]
  fn sum_of_squares() {
    assert_eq!(hessian_of("x^2 + y^2"), "[[2, 0], [0, 2]]");
  }

  #[test]
  fn saddle() {
    assert_eq!(hessian_of("x^2 - y^2"), "[[2, 0], [0, -2]]");
    assert_eq!(hessian_of("x*y"), "[[0, 1], [1, 0]]");
  }

  #[test]
  fn symbolic_matrix_is_symmetric() {
    for input in ["x^2*y + sin(x*y*z)", "exp(x - y)/(1 + z^2)", "x^y"] {
      let function = parse_function(input).unwrap();
      let gradient = gradient(&function);
      let matrix = hessian(&function, &gradient).unwrap();
      assert_eq!(matrix.dimension(), function.arity());
      assert!(matrix.is_symmetric(), "{input}");
    }
  }

  #[test]
  fn numeric_hessian_is_exactly_symmetric() {
    let function = parse_function("x^3*y^2 + cos(x*z) - y*z^4").unwrap();
    let gradient = gradient(&function);
    let matrix = hessian(&function, &gradient).unwrap();
    let numeric = matrix
      .evaluate(function.variables(), &[0.3, -1.2, 2.5])
      .unwrap();
    assert!(numeric.is_symmetric(0.0));
  }

  #[test]
  fn mismatched_gradient_is_rejected() {
    let function = parse_function("x*y").unwrap();
    let gradient = gradient(&function);
    assert!(hessian(&function, &gradient[..1]).is_err());
  }

  #[test]
  fn evaluation_outside_the_domain_fails() {
    let function = parse_function("log(x)").unwrap();
    let gradient = gradient(&function);
    let matrix = hessian(&function, &gradient).unwrap();
    let err = matrix.evaluate(function.variables(), &[0.0]).unwrap_err();
    assert!(!err.is_request_fatal());
  }
}

mod evaluation {
  use super::*;
  use extrema::ExtremaError;

  #[test]
  fn evaluates_at_a_point() {
    let function = parse_function("x^2 + 2x*y - sqrt(y)").unwrap();
    let value = value_at(function.expr(), &["x", "y"], &[3.0, 4.0]);
    assert_eq!(value, 9.0 + 24.0 - 2.0);
  }

  #[test]
  fn undefined_operations_are_domain_errors() {
    for (input, x) in
      [("1/x", 0.0), ("sqrt(x)", -1.0), ("log(x)", -2.0), ("x^0.5", -4.0)]
    {
      let function = parse_function(input).unwrap();
      let names = function.variables().to_vec();
      let point = [x];
      let bindings = Bindings::new(&names, &point).unwrap();
      let err = evaluate(function.expr(), &bindings).unwrap_err();
      assert!(matches!(err, ExtremaError::DomainError(_)), "{input}");
    }
  }

  #[test]
  fn integer_power_of_negative_base() {
    let function = parse_function("x^3").unwrap();
    assert_eq!(value_at(function.expr(), &["x"], &[-2.0]), -8.0);
  }

  #[test]
  fn bindings_must_match_variables() {
    let names = vec!["x".to_string(), "y".to_string()];
    assert!(Bindings::new(&names, &[1.0]).is_err());
  }
}
