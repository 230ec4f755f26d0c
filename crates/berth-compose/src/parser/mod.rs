//! Mini-grammars embedded in manifest values, built on `nom`.
//!
//! Every parser returns `Result<T, GrammarError>`: either the parsed value
//! or the offending input together with the reason it was rejected.

pub mod interpolate;
pub mod link;
pub mod port;
pub mod size;
pub mod volume;

use berth_common::error::BerthError;
use nom::{
    IResult, Parser, bytes::complete::take_while, character::complete::char,
    combinator::all_consuming, multi::separated_list1,
};
use thiserror::Error;

pub use self::interpolate::interpolate;
pub use self::link::parse_link;
pub use self::port::parse_port;
pub use self::size::parse_size;
pub use self::volume::{VolumeSpec, join_relative, parse_volume};

/// A manifest value rejected by one of the grammars.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} {input:?}: {reason}")]
pub struct GrammarError {
    /// Which grammar rejected the value.
    pub kind: &'static str,
    /// The rejected input.
    pub input: String,
    /// Why it was rejected.
    pub reason: String,
}

impl GrammarError {
    pub(crate) fn new(kind: &'static str, input: &str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<GrammarError> for BerthError {
    fn from(err: GrammarError) -> Self {
        Self::Parse {
            value: err.input,
            reason: format!("invalid {}: {}", err.kind, err.reason),
        }
    }
}

/// Splits a value into its `:`-separated fields. Fields may be empty.
pub(crate) fn colon_fields(input: &str) -> IResult<&str, Vec<&str>> {
    all_consuming(separated_list1(char(':'), take_while(|c| c != ':'))).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colon_fields_keeps_empty_fields() {
        let (_, fields) = colon_fields("127.0.0.1::80").expect("fields");
        assert_eq!(fields, vec!["127.0.0.1", "", "80"]);
    }

    #[test]
    fn grammar_error_converts_to_parse_error() {
        let err: BerthError = GrammarError::new("port", "a:b:c:d", "too many fields").into();
        match err {
            BerthError::Parse { value, reason } => {
                assert_eq!(value, "a:b:c:d");
                assert!(reason.contains("too many fields"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
