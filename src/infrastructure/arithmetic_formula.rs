// Arithmetic formula engine for synthetic series
//
// Grammar:
//   expr    := term (('+' | '-') term)*
//   term    := unary (('*' | '/') unary)*
//   unary   := '-' unary | primary
//   primary := number | '[' series name ']' | '(' expr ')'
//            | ident '(' expr (',' ident)? ')'
use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{anychar, char, multispace0},
    combinator::{map, map_res, opt, recognize, value},
    multi::{fold_many0, many0},
    sequence::{delimited, preceded, terminated},
    IResult, Parser,
};

use crate::application::formula::{FormulaEngine, FormulaError};
use crate::domain::calendar::Period;
use crate::domain::datapoint::Datapoint;
use crate::domain::series::{ArithmeticOp, Series};

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Series(String),
    Negate(Box<Expr>),
    Binary(ArithmeticOp, Box<Expr>, Box<Expr>),
    Call {
        function: String,
        argument: Box<Expr>,
        period: Option<String>,
    },
}

#[derive(Debug, Clone)]
enum Operand {
    Scalar(f64),
    Series(Series),
}

/// Formula engine over `[Series Name]` references, numbers, `+ - * /`,
/// parentheses and the functions `previous_value`, `previous_timestamp`,
/// `in_period` and `as_period`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArithmeticFormula;

impl FormulaEngine for ArithmeticFormula {
    fn dependency_names(&self, formula: &str) -> Vec<String> {
        let scanned: IResult<&str, Vec<Option<&str>>> =
            many0(alt((map(parse_series_ref, Some), value(None, anychar)))).parse(formula);

        let mut names: Vec<String> = Vec::new();
        for name in scanned.map(|(_, found)| found).unwrap_or_default().into_iter().flatten() {
            let name = name.trim().to_string();
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    fn apply(&self, formula: &str, dependents: &[&Series]) -> Result<Vec<Datapoint>, FormulaError> {
        let expr = parse_formula(formula)?;
        match evaluate(&expr, dependents)? {
            Operand::Series(series) => Ok(series.into_datapoints()),
            Operand::Scalar(_) => Err(FormulaError::ConstantResult),
        }
    }
}

/// Parse a whole formula, rejecting trailing input
fn parse_formula(formula: &str) -> Result<Expr, FormulaError> {
    if formula.trim().is_empty() {
        return Err(FormulaError::Empty);
    }

    match terminated(parse_expr, multispace0).parse(formula) {
        Ok(("", expr)) => Ok(expr),
        Ok((rest, _)) => Err(unexpected(formula, rest)),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(unexpected(formula, e.input)),
        Err(nom::Err::Incomplete(_)) => Err(unexpected(formula, "")),
    }
}

fn unexpected(formula: &str, rest: &str) -> FormulaError {
    let found = if rest.is_empty() {
        "end of formula".to_string()
    } else {
        rest.chars().take(12).collect()
    };
    FormulaError::Unexpected {
        found,
        position: formula.len() - rest.len(),
    }
}

fn parse_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_term(input)?;
    fold_many0(
        (
            preceded(
                multispace0,
                alt((
                    value(ArithmeticOp::Add, char('+')),
                    value(ArithmeticOp::Subtract, char('-')),
                )),
            ),
            parse_term,
        ),
        move || first.clone(),
        |lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
    )
    .parse(input)
}

fn parse_term(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_unary(input)?;
    fold_many0(
        (
            preceded(
                multispace0,
                alt((
                    value(ArithmeticOp::Multiply, char('*')),
                    value(ArithmeticOp::Divide, char('/')),
                )),
            ),
            parse_unary,
        ),
        move || first.clone(),
        |lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
    )
    .parse(input)
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded((multispace0, char('-')), parse_unary), |inner| {
            Expr::Negate(Box::new(inner))
        }),
        parse_primary,
    ))
    .parse(input)
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    preceded(
        multispace0,
        alt((
            map(parse_number, Expr::Number),
            map(parse_series_ref, |name: &str| Expr::Series(name.trim().to_string())),
            delimited(char('('), parse_expr, (multispace0, char(')'))),
            parse_call,
        )),
    )
    .parse(input)
}

/// Parse an unsigned decimal: `12`, `1.5`, `.25`
fn parse_number(input: &str) -> IResult<&str, f64> {
    map_res(take_while1(|c: char| c.is_ascii_digit() || c == '.'), str::parse::<f64>).parse(input)
}

/// Parse a series reference: `[Series Name]`
fn parse_series_ref(input: &str) -> IResult<&str, &str> {
    delimited(char('['), take_while1(|c: char| c != ']'), char(']')).parse(input)
}

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize((
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

/// Parse a function call: `previous_value([A])`, `in_period([A], day)`
fn parse_call(input: &str) -> IResult<&str, Expr> {
    let (input, function) = parse_identifier(input)?;
    let (input, _) = (multispace0, char('(')).parse(input)?;
    let (input, argument) = parse_expr(input)?;
    let (input, period) =
        opt(preceded((multispace0, char(','), multispace0), parse_identifier)).parse(input)?;
    let (input, _) = (multispace0, char(')')).parse(input)?;

    Ok((
        input,
        Expr::Call {
            function: function.to_string(),
            argument: Box::new(argument),
            period: period.map(String::from),
        },
    ))
}

fn evaluate(expr: &Expr, dependents: &[&Series]) -> Result<Operand, FormulaError> {
    match expr {
        Expr::Number(value) => Ok(Operand::Scalar(*value)),
        Expr::Series(name) => dependents
            .iter()
            .find(|s| s.name() == name)
            .map(|s| Operand::Series((*s).clone()))
            .ok_or_else(|| FormulaError::UnknownSeries(name.clone())),
        Expr::Negate(inner) => Ok(match evaluate(inner, dependents)? {
            Operand::Scalar(v) => Operand::Scalar(-v),
            Operand::Series(mut series) => {
                series.negate();
                Operand::Series(series)
            }
        }),
        Expr::Binary(op, lhs, rhs) => Ok(combine(
            *op,
            evaluate(lhs, dependents)?,
            evaluate(rhs, dependents)?,
        )),
        Expr::Call {
            function,
            argument,
            period,
        } => call(function, evaluate(argument, dependents)?, period.as_deref()),
    }
}

fn call(function: &str, argument: Operand, period: Option<&str>) -> Result<Operand, FormulaError> {
    match (function, period) {
        ("previous_value", None) => Ok(map_series(argument, Series::previous_value)),
        ("previous_timestamp", None) => Ok(map_series(argument, Series::previous_timestamp)),
        ("in_period" | "as_period", Some(name)) => {
            let period = Period::from_name(name).ok_or_else(|| FormulaError::UnknownPeriod(name.to_string()))?;
            let seconds = period.seconds() as f64;
            Ok(match (function, argument) {
                ("in_period", Operand::Series(mut series)) => {
                    series.in_period(period);
                    Operand::Series(series)
                }
                ("in_period", Operand::Scalar(v)) if seconds > 0.0 => Operand::Scalar(v / seconds),
                (_, Operand::Series(mut series)) => {
                    series.as_period(period);
                    Operand::Series(series)
                }
                ("as_period", Operand::Scalar(v)) if seconds > 0.0 => Operand::Scalar(v * seconds),
                (_, scalar) => scalar,
            })
        }
        ("previous_value" | "previous_timestamp" | "in_period" | "as_period", _) => {
            Err(FormulaError::Arity(function.to_string()))
        }
        (other, _) => Err(FormulaError::UnknownFunction(other.to_string())),
    }
}

fn map_series(operand: Operand, f: impl FnOnce(&mut Series)) -> Operand {
    match operand {
        Operand::Series(mut series) => {
            f(&mut series);
            Operand::Series(series)
        }
        scalar => scalar,
    }
}

fn combine(op: ArithmeticOp, lhs: Operand, rhs: Operand) -> Operand {
    match (lhs, rhs) {
        (Operand::Scalar(a), Operand::Scalar(b)) => Operand::Scalar(op.apply(a, b).unwrap_or(f64::NAN)),
        (Operand::Series(mut series), Operand::Scalar(b)) => {
            series.apply_scalar(op, b);
            Operand::Series(series)
        }
        (Operand::Scalar(a), Operand::Series(mut series)) => {
            match op {
                ArithmeticOp::Add | ArithmeticOp::Multiply => series.apply_scalar(op, a),
                ArithmeticOp::Subtract => {
                    series.negate();
                    series.apply_scalar(ArithmeticOp::Add, a);
                }
                ArithmeticOp::Divide => {
                    series.reciprocal();
                    series.apply_scalar(ArithmeticOp::Multiply, a);
                }
            }
            Operand::Series(series)
        }
        (Operand::Series(mut lhs), Operand::Series(rhs)) => {
            lhs.apply_series(op, &rhs);
            Operand::Series(lhs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calendar::DAY_SECS;
    use crate::domain::datapoint::SeriesConfig;

    fn series(id: i64, name: &str, values: &[(i64, f64)]) -> Series {
        let mut series = Series::new(SeriesConfig::new(id, name), true);
        series.set_datapoints(
            Vec::new(),
            values.iter().map(|&(t, v)| Datapoint::new(id, t, v)).collect(),
            Vec::new(),
        );
        series
    }

    fn values(datapoints: &[Datapoint]) -> Vec<f64> {
        datapoints.iter().map(|d| d.value).collect()
    }

    #[test]
    fn test_dependency_names() {
        let names = ArithmeticFormula.dependency_names("([Run] + [Swim]) / [Run] * 2 + [ Bike ]");
        assert_eq!(names, vec!["Run", "Swim", "Bike"]);
        assert!(ArithmeticFormula.dependency_names("1 + 2").is_empty());
        assert_eq!(ArithmeticFormula.dependency_names("[A] + [B"), vec!["A"]);
    }

    #[test]
    fn test_precedence_and_scalars() {
        let a = series(1, "A", &[(1, 1.0), (2, 2.0), (3, 4.0)]);
        let b = series(2, "B", &[(1, 2.0), (2, 4.0), (3, 8.0)]);
        let deps = [&a, &b];

        let result = ArithmeticFormula.apply("[A] + [B] * 2", &deps).unwrap();
        assert_eq!(values(&result), vec![5.0, 10.0, 20.0]);

        let result = ArithmeticFormula.apply("([A] + [B]) * 2", &deps).unwrap();
        assert_eq!(values(&result), vec![6.0, 12.0, 24.0]);

        let result = ArithmeticFormula.apply("10 - [A]", &deps).unwrap();
        assert_eq!(values(&result), vec![9.0, 8.0, 6.0]);

        let result = ArithmeticFormula.apply("8 / [A]", &deps).unwrap();
        assert_eq!(values(&result), vec![8.0, 4.0, 2.0]);

        let result = ArithmeticFormula.apply("-[A] + 1.5", &deps).unwrap();
        assert_eq!(values(&result), vec![0.5, -0.5, -2.5]);
    }

    #[test]
    fn test_functions() {
        let a = series(1, "A", &[(DAY_SECS, 1.0), (3 * DAY_SECS, 2.0)]);
        let deps = [&a];

        // The first point has no predecessor and reports its own start time.
        let result = ArithmeticFormula.apply("in_period(previous_timestamp([A]), day)", &deps).unwrap();
        assert_eq!(values(&result), vec![1.0, 1.0]);

        let result = ArithmeticFormula.apply("previous_value([A])", &deps).unwrap();
        assert_eq!(values(&result), vec![1.0, 1.0]);

        let result = ArithmeticFormula.apply("as_period([A], hour)", &deps).unwrap();
        assert_eq!(values(&result), vec![3_600.0, 7_200.0]);
    }

    #[test]
    fn test_errors() {
        let a = series(1, "A", &[(1, 1.0)]);
        let deps = [&a];

        assert_eq!(ArithmeticFormula.apply("", &deps), Err(FormulaError::Empty));
        assert_eq!(ArithmeticFormula.apply("1 + 2", &deps), Err(FormulaError::ConstantResult));
        assert_eq!(
            ArithmeticFormula.apply("[Nope] + 1", &deps),
            Err(FormulaError::UnknownSeries("Nope".to_string()))
        );
        assert_eq!(
            ArithmeticFormula.apply("sqrt([A])", &deps),
            Err(FormulaError::UnknownFunction("sqrt".to_string()))
        );
        assert_eq!(
            ArithmeticFormula.apply("in_period([A], fortnight)", &deps),
            Err(FormulaError::UnknownPeriod("fortnight".to_string()))
        );
        assert!(matches!(
            ArithmeticFormula.apply("[A] +", &deps),
            Err(FormulaError::Unexpected { .. })
        ));
        assert!(matches!(
            ArithmeticFormula.apply("[A] 2", &deps),
            Err(FormulaError::Unexpected { position: 4, .. })
        ));
        assert_eq!(
            ArithmeticFormula.apply("in_period([A])", &deps),
            Err(FormulaError::Arity("in_period".to_string()))
        );
        assert_eq!(
            ArithmeticFormula.apply("previous_value([A], day)", &deps),
            Err(FormulaError::Arity("previous_value".to_string()))
        );
        assert!(matches!(
            ArithmeticFormula.apply("([A] + 1", &deps),
            Err(FormulaError::Unexpected { .. })
        ));
    }

    #[test]
    fn test_parse_tree() {
        assert_eq!(
            parse_formula(" - [Run Total] * 2 "),
            Ok(Expr::Binary(
                ArithmeticOp::Multiply,
                Box::new(Expr::Negate(Box::new(Expr::Series("Run Total".to_string())))),
                Box::new(Expr::Number(2.0)),
            ))
        );
        assert_eq!(
            parse_formula("as_period( [A] , week )"),
            Ok(Expr::Call {
                function: "as_period".to_string(),
                argument: Box::new(Expr::Series("A".to_string())),
                period: Some("week".to_string()),
            })
        );
        assert_eq!(parse_formula("   "), Err(FormulaError::Empty));
    }
}
