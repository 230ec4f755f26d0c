//! Port mapping grammar.
//!
//! ```text
//! port       = [ [ host_ip ":" ] host_port ":" ] container
//! container  = digits [ "/" ( "tcp" | "udp" | "sctp" ) ]
//! host_port  = digits | ""
//! ```
//!
//! Fields are read right to left, so the last one is always the container
//! port. An empty host port is allowed only when no host IP is given.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1},
    combinator::{all_consuming, opt, recognize},
    sequence::pair,
};

use super::{GrammarError, colon_fields};
use crate::spec::Port;

const KIND: &str = "port";

fn container_port(input: &str) -> IResult<&str, &str> {
    all_consuming(recognize(pair(
        digit1,
        opt(pair(char('/'), alt((tag("tcp"), tag("udp"), tag("sctp"))))),
    )))
    .parse(input)
}

fn host_port(input: &str) -> IResult<&str, &str> {
    all_consuming(digit1).parse(input)
}

/// Parses a port declaration into a [`Port`].
///
/// # Errors
///
/// Returns a [`GrammarError`] if the value has more than three fields, a
/// port is not numeric, or a host IP is given without a host port.
pub fn parse_port(input: &str) -> Result<Port, GrammarError> {
    let trimmed = input.trim();
    let fields = colon_fields(trimmed)
        .map(|(_, fields)| fields)
        .map_err(|_| GrammarError::new(KIND, input, "unreadable port mapping"))?;

    let mut rev = fields.into_iter().rev();
    let container = rev.next().unwrap_or_default();
    let host = rev.next().filter(|h| !h.is_empty());
    let ip = rev.next().filter(|ip| !ip.is_empty());
    if rev.next().is_some() {
        return Err(GrammarError::new(KIND, input, "too many ':' separated fields"));
    }

    if container_port(container).is_err() {
        return Err(GrammarError::new(
            KIND,
            input,
            format!("container port {container:?} is not a port number"),
        ));
    }
    if let Some(host) = host {
        if host_port(host).is_err() {
            return Err(GrammarError::new(
                KIND,
                input,
                format!("host port {host:?} is not a port number"),
            ));
        }
    }
    if ip.is_some() && host.is_none() {
        return Err(GrammarError::new(
            KIND,
            input,
            "cannot specify a host IP address without a host port",
        ));
    }

    Ok(Port {
        container_port: container.to_string(),
        host_port: host.map(str::to_string),
        host_ip: ip.map(str::to_string),
    })
}
