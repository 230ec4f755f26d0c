//! Byte size grammar: digits with an optional binary unit suffix.

use nom::{
    IResult, Parser,
    bytes::complete::take_while,
    character::complete::{digit1, multispace0},
    combinator::all_consuming,
    sequence::{delimited, pair},
};

use super::GrammarError;

const KIND: &str = "size";

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

fn number_and_unit(input: &str) -> IResult<&str, (&str, &str)> {
    all_consuming(delimited(
        multispace0,
        pair(digit1, take_while(|c: char| c.is_ascii_alphabetic())),
        multispace0,
    ))
    .parse(input)
}

/// Parses a size such as `512m` or `1GB` into bytes.
///
/// Units are 1024-based and case-insensitive: `k`/`kb`, `m`/`mb`,
/// `g`/`gb`. A bare number is taken as bytes.
///
/// # Errors
///
/// Returns a [`GrammarError`] for non-numeric input, an unknown unit, or
/// a value that overflows `u64`.
pub fn parse_size(input: &str) -> Result<u64, GrammarError> {
    let (_, (digits, unit)) = number_and_unit(input)
        .map_err(|_| GrammarError::new(KIND, input, "expected digits with an optional unit"))?;

    let multiplier = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => KIB,
        "m" | "mb" => MIB,
        "g" | "gb" => GIB,
        other => {
            return Err(GrammarError::new(
                KIND,
                input,
                format!("unknown unit {other:?}"),
            ));
        }
    };

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| GrammarError::new(KIND, input, "value out of range"))
}
