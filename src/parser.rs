use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map_res, opt, recognize},
    multi::separated_list1,
    sequence::{delimited, separated_pair, tuple},
    IResult,
};

use crate::error::{LinkageError, Result};
use crate::sweep::{FieldCountRange, ThresholdRange};

// --- BASIC PARSERS ---

fn parse_float(input: &str) -> IResult<&str, f64> {
    let (input, num_str) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(tuple((char('.'), digit1))),
    )))(input)?;
    match num_str.parse::<f64>() {
        Ok(n) => Ok((input, n)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float))),
    }
}

fn parse_usize(input: &str) -> IResult<&str, usize> {
    map_res(digit1, |s: &str| s.parse::<usize>())(input)
}

// --- HELPERS ---
fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where F: FnMut(&'a str) -> IResult<&'a str, O, E> {
    delimited(multispace0, inner, multispace0)
}

fn run<'a, O>(
    what: &str,
    input: &'a str,
    parser: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> Result<O> {
    match all_consuming(parser)(input.trim()) {
        Ok((_, out)) => Ok(out),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context: String = e.input.chars().take(20).collect();
            Err(LinkageError::Parse(format!("invalid {} near: '{}'", what, context)))
        }
        Err(nom::Err::Incomplete(_)) => Err(LinkageError::Parse(format!("incomplete {}", what))),
    }
}

// --- RANGE PARSERS ---

fn threshold_range(input: &str) -> IResult<&str, (f64, f64, f64)> {
    tuple((
        parse_float,
        delimited(ws(char(':')), parse_float, ws(char(':'))),
        parse_float,
    ))(input)
}

fn field_range(input: &str) -> IResult<&str, (usize, usize)> {
    separated_pair(parse_usize, ws(tag("..")), parse_usize)(input)
}

fn float_list(input: &str) -> IResult<&str, Vec<f64>> {
    alt((
        delimited(ws(char('[')), separated_list1(ws(char(',')), parse_float), ws(char(']'))),
        separated_list1(ws(char(',')), parse_float),
    ))(input)
}

/// Parses `MIN:MAX:STEP`, e.g. `0.00:2.00:0.01`.
pub fn parse_threshold_range(input: &str) -> Result<ThresholdRange> {
    let (min, max, step) = run("threshold range", input, threshold_range)?;
    ThresholdRange::new(min, max, step)
}

/// Parses `MIN..MAX`, inclusive at both ends.
pub fn parse_field_range(input: &str) -> Result<FieldCountRange> {
    let (min, max) = run("field-count range", input, field_range)?;
    FieldCountRange::new(min, max)
}

/// Comma separated numbers, optionally bracketed: `0.5,0.25,0.25` or `[0.5, 0.5]`.
pub fn parse_float_list(input: &str) -> Result<Vec<f64>> {
    run("number list", input, float_list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_ranges() {
        let r = parse_threshold_range("0.00:2.00:0.01").unwrap();
        assert_eq!((r.min(), r.max(), r.step()), (0.0, 2.0, 0.01));
        let r = parse_threshold_range(" 0.1 : 0.5 : 0.2 ").unwrap();
        assert_eq!(r.values(), vec![0.1, 0.3, 0.5]);
    }

    #[test]
    fn bad_threshold_ranges() {
        assert!(matches!(parse_threshold_range("0.0:1.0"), Err(LinkageError::Parse(_))));
        assert!(matches!(parse_threshold_range("a:b:c"), Err(LinkageError::Parse(_))));
        assert!(matches!(parse_threshold_range("0:1:0.1x"), Err(LinkageError::Parse(_))));
        // well formed but meaningless
        assert!(matches!(parse_threshold_range("0:1:0"), Err(LinkageError::Config(_))));
        assert!(matches!(parse_threshold_range("1:0:0.1"), Err(LinkageError::Config(_))));
    }

    #[test]
    fn field_ranges() {
        let r = parse_field_range("3..8").unwrap();
        assert_eq!((r.min(), r.max()), (3, 8));
        assert_eq!(parse_field_range("0 .. 0").unwrap().values(), vec![0]);
        assert!(parse_field_range("3..").is_err());
        assert!(parse_field_range("-1..3").is_err());
        assert!(parse_field_range("8..3").is_err());
    }

    #[test]
    fn float_lists() {
        assert_eq!(parse_float_list("0.5,0.25,0.25").unwrap(), vec![0.5, 0.25, 0.25]);
        assert_eq!(parse_float_list("[0.5, -1]").unwrap(), vec![0.5, -1.0]);
        assert!(parse_float_list("[0.5, 0.5").is_err());
        assert!(parse_float_list("").is_err());
    }
}
