//! Link grammar: `service` or `service:alias`.

use super::{GrammarError, colon_fields};
use crate::spec::Link;

const KIND: &str = "link";

/// Parses a link declaration. The alias defaults to the service name.
///
/// # Errors
///
/// Returns a [`GrammarError`] if either part is empty or more than one
/// `:` is present.
pub fn parse_link(input: &str) -> Result<Link, GrammarError> {
    let trimmed = input.trim();
    let fields = colon_fields(trimmed)
        .map(|(_, fields)| fields)
        .map_err(|_| GrammarError::new(KIND, input, "unreadable link"))?;

    match fields.as_slice() {
        [service] if !service.is_empty() => Ok(Link {
            service: (*service).to_string(),
            alias: (*service).to_string(),
        }),
        [service, alias] if !service.is_empty() && !alias.is_empty() => Ok(Link {
            service: (*service).to_string(),
            alias: (*alias).to_string(),
        }),
        [_] | [_, _] => Err(GrammarError::new(
            KIND,
            input,
            "service and alias must not be empty",
        )),
        _ => Err(GrammarError::new(KIND, input, "expected service[:alias]")),
    }
}
