//! Variable interpolation for raw manifest text.
//!
//! Supported forms:
//! - `$NAME` and `${NAME}`: the variable's value, or `""` when unset.
//! - `${NAME:-default}`: `default` when unset or empty.
//! - `${NAME-default}`: `default` when unset.
//! - `$$`: a literal `$`.
//!
//! Anything else, including a lone `$`, is copied through unchanged.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_till1, take_while, take_while1},
    character::complete::char,
    combinator::{map, recognize, value},
    sequence::{delimited, pair, preceded},
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Dollar,
    Variable(&'a str),
    Braced(&'a str),
}

const fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

const fn is_name_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn variable_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_name_start), take_while(is_name_continue))).parse(input)
}

fn segment(input: &str) -> IResult<&str, Segment<'_>> {
    alt((
        value(Segment::Dollar, tag("$$")),
        map(
            delimited(tag("${"), take_till1(|c| c == '}'), char('}')),
            Segment::Braced,
        ),
        map(preceded(char('$'), variable_name), Segment::Variable),
        map(take_till1(|c| c == '$'), Segment::Literal),
        map(tag("$"), Segment::Literal),
    ))
    .parse(input)
}

fn expand_braced(body: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    if let Some((name, default)) = body.split_once(":-") {
        return lookup(name)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string());
    }
    if let Some((name, default)) = body.split_once('-') {
        return lookup(name).unwrap_or_else(|| default.to_string());
    }
    lookup(body).unwrap_or_default()
}

/// Substitutes variables in `input` using `lookup`.
///
/// Unset variables expand to the empty string; this is not an error.
pub fn interpolate(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while !rest.is_empty() {
        let Ok((next, seg)) = segment(rest) else {
            out.push_str(rest);
            break;
        };
        match seg {
            Segment::Literal(text) => out.push_str(text),
            Segment::Dollar => out.push('$'),
            Segment::Variable(name) => out.push_str(&lookup(name).unwrap_or_default()),
            Segment::Braced(body) => out.push_str(&expand_braced(body, &lookup)),
        }
        rest = next;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(name: &str) -> Option<String> {
        match name {
            "HOME_DIR" => Some("/home/app".into()),
            "TAG" => Some("1.2".into()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn bare_and_braced_forms() {
        assert_eq!(interpolate("$HOME_DIR/data", vars), "/home/app/data");
        assert_eq!(interpolate("nginx:${TAG}", vars), "nginx:1.2");
    }

    #[test]
    fn unset_variables_expand_to_empty() {
        assert_eq!(interpolate("a${MISSING}b$MISSING", vars), "ab");
    }

    #[test]
    fn braced_ends_at_first_brace() {
        assert_eq!(interpolate("${TAG} and ${TAG}", vars), "1.2 and 1.2");
    }

    #[test]
    fn defaults() {
        assert_eq!(interpolate("${MISSING:-x}", vars), "x");
        assert_eq!(interpolate("${EMPTY:-x}", vars), "x");
        assert_eq!(interpolate("${EMPTY-x}", vars), "");
        assert_eq!(interpolate("${MISSING-x}", vars), "x");
    }

    #[test]
    fn escapes_and_lone_dollars() {
        assert_eq!(interpolate("cost: $$5", vars), "cost: $5");
        assert_eq!(interpolate("a $ b", vars), "a $ b");
        assert_eq!(interpolate("trailing $", vars), "trailing $");
        assert_eq!(interpolate("${unterminated", vars), "${unterminated");
    }

    #[test]
    fn text_without_variables_is_unchanged() {
        let text = "services:\n  web:\n    image: nginx\n";
        assert_eq!(interpolate(text, vars), text);
    }
}
