use extrema::syntax::{BinaryOperator, Expr, UnaryOperator};
use extrema::{parse, parse_function, ExtremaError};

#[cfg(test)]
mod tests {
  use extrema::Rule;

  use super::*;

  fn parsed(input: &str) -> Expr {
    parse_function(input).unwrap().expr().clone()
  }

  fn var(name: &str) -> Expr {
    Expr::variable(name)
  }

  fn num(value: f64) -> Expr {
    Expr::constant(value)
  }

  fn bin(op: BinaryOperator, left: Expr, right: Expr) -> Expr {
    Expr::binary(op, left, right)
  }

  #[test]
  fn test_parse_program() {
    let pair = parse("x^2 + y^2").unwrap().next().unwrap();
    assert_eq!(pair.as_rule(), Rule::Program);
  }

  #[test]
  fn variables_in_first_occurrence_order() {
    let function = parse_function("y*x + z - y").unwrap();
    assert_eq!(function.variables(), ["y", "x", "z"]);
  }

  #[test]
  fn multiplication_binds_tighter_than_addition() {
    use BinaryOperator::*;
    assert_eq!(
      parsed("1 + 2*x"),
      bin(Plus, num(1.0), bin(Times, num(2.0), var("x")))
    );
  }

  #[test]
  fn power_is_right_associative() {
    use BinaryOperator::*;
    assert_eq!(
      parsed("x^y^2"),
      bin(Power, var("x"), bin(Power, var("y"), num(2.0)))
    );
  }

  #[test]
  fn subtraction_and_division_are_left_associative() {
    use BinaryOperator::*;
    assert_eq!(
      parsed("x - y - 1"),
      bin(Minus, bin(Minus, var("x"), var("y")), num(1.0))
    );
    assert_eq!(
      parsed("x / y / 2"),
      bin(Divide, bin(Divide, var("x"), var("y")), num(2.0))
    );
  }

  #[test]
  fn unary_minus_binds_below_power() {
    assert_eq!(
      parsed("-x^2"),
      Expr::unary(
        UnaryOperator::Minus,
        bin(BinaryOperator::Power, var("x"), num(2.0))
      )
    );
  }

  #[test]
  fn unary_minus_binds_above_multiplication() {
    assert_eq!(
      parsed("-x*y"),
      bin(
        BinaryOperator::Times,
        Expr::unary(UnaryOperator::Minus, var("x")),
        var("y")
      )
    );
  }

  #[test]
  fn negative_exponent() {
    assert_eq!(
      parsed("x^-2"),
      bin(
        BinaryOperator::Power,
        var("x"),
        Expr::unary(UnaryOperator::Minus, num(2.0))
      )
    );
  }

  #[test]
  fn implicit_multiplication() {
    use BinaryOperator::*;
    assert_eq!(parsed("2x"), bin(Times, num(2.0), var("x")));
    assert_eq!(parsed("x y"), bin(Times, var("x"), var("y")));
    assert_eq!(
      parsed("2(x+1)"),
      bin(Times, num(2.0), bin(Plus, var("x"), num(1.0)))
    );
    assert_eq!(
      parsed("3x^2"),
      bin(Times, num(3.0), bin(Power, var("x"), num(2.0)))
    );
  }

  #[test]
  fn spaced_parenthesis_after_variable_is_a_product() {
    assert_eq!(
      parsed("x (y)"),
      bin(BinaryOperator::Times, var("x"), var("y"))
    );
  }

  #[test]
  fn function_calls() {
    assert_eq!(
      parsed("sin(x)"),
      Expr::unary(UnaryOperator::Sin, var("x"))
    );
    assert_eq!(parsed("log(x)"), parsed("ln(x)"));
    assert_eq!(
      parsed("2sqrt(x)"),
      bin(
        BinaryOperator::Times,
        num(2.0),
        Expr::unary(UnaryOperator::Sqrt, var("x"))
      )
    );
  }

  #[test]
  fn double_star_is_power() {
    assert_eq!(parsed("x**2"), parsed("x^2"));
  }

  #[test]
  fn named_constants() {
    assert_eq!(parsed("pi"), num(std::f64::consts::PI));
    let function = parse_function("E^x").unwrap();
    assert_eq!(function.variables(), ["x"]);
  }

  #[test]
  fn scientific_notation() {
    assert_eq!(parsed("1.5e3"), num(1500.0));
    assert_eq!(parsed(".5"), num(0.5));
  }

  #[test]
  fn surrounding_whitespace_is_ignored() {
    assert_eq!(parsed("  x + 1\n"), parsed("x+1"));
  }

  #[test]
  fn empty_input() {
    assert!(matches!(parse_function(""), Err(ExtremaError::EmptyInput)));
    assert!(matches!(parse_function("   "), Err(ExtremaError::EmptyInput)));
  }

  #[test]
  fn missing_operand() {
    let err = parse_function("x+*y").unwrap_err();
    assert!(matches!(err, ExtremaError::ParseError(_)), "got {err:?}");
    assert!(parse_function("x^").unwrap_err().is_parse_error());
    assert!(parse_function("*x").unwrap_err().is_parse_error());
  }

  #[test]
  fn unbalanced_parentheses() {
    assert!(parse_function("(x + 1").unwrap_err().is_parse_error());
    assert!(parse_function("x + 1)").unwrap_err().is_parse_error());
    assert!(parse_function("sin(x").unwrap_err().is_parse_error());
  }

  #[test]
  fn unknown_function() {
    let err = parse_function("foo(x) + 1").unwrap_err();
    assert!(
      matches!(&err, ExtremaError::UnknownFunction(name) if name == "foo"),
      "got {err:?}"
    );
  }

  #[test]
  fn function_name_without_argument() {
    let err = parse_function("sin + x").unwrap_err();
    assert!(matches!(err, ExtremaError::BareFunction(_)));
  }

  #[test]
  fn display_uses_minimal_parentheses() {
    assert_eq!(parsed("(x + y)*z").to_string(), "(x + y)*z");
    assert_eq!(parsed("x - (y - z)").to_string(), "x - (y - z)");
    assert_eq!(parsed("(x^2)^3").to_string(), "(x^2)^3");
    assert_eq!(parsed("x^2^3").to_string(), "x^2^3");
    assert_eq!(parsed("(-x)^2").to_string(), "(-x)^2");
    assert_eq!(parsed("-x^2").to_string(), "-x^2");
    assert_eq!(parsed("2x + sin(y)").to_string(), "2*x + sin(y)");
  }
}
