//! Placeholder substitution for bundle templates.
//!
//! Templates are plain strings with `{{.name}}` actions. Rendering is a pure
//! text pass with no knowledge of the tuple or attribute grammar; the result is
//! parsed separately.

use crate::error::{Error, Result};
use std::collections::HashMap;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Returns the placeholder names referenced by `template`, in order.
pub fn placeholders(template: &str) -> Result<Vec<&str>> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find(OPEN) {
        let (name, tail) = next_action(template, &rest[start + OPEN.len()..])?;
        names.push(name);
        rest = tail;
    }
    Ok(names)
}

/// Replaces every `{{.name}}` in `template` with its bound value.
///
/// `name` must be one of `declared`; a declared name without a binding is
/// reported as [`Error::MissingArgument`].
pub fn render(
    template: &str,
    declared: &[String],
    values: &HashMap<String, String>,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let (name, tail) = next_action(template, &rest[start + OPEN.len()..])?;
        if !declared.iter().any(|declared| declared == name) {
            return Err(Error::UndeclaredPlaceholder(name.to_string()));
        }
        let value = values
            .get(name)
            .ok_or_else(|| Error::MissingArgument(name.to_string()))?;
        out.push_str(value);
        rest = tail;
    }
    out.push_str(rest);
    Ok(out)
}

/// Reads one action body up to `}}` and returns its name and the remaining text.
fn next_action<'a>(template: &str, body: &'a str) -> Result<(&'a str, &'a str)> {
    let end = body
        .find(CLOSE)
        .ok_or_else(|| Error::InvalidTemplate(format!("unclosed action in {template:?}")))?;
    let action = body[..end].trim();
    let name = action
        .strip_prefix('.')
        .filter(|name| is_identifier(name))
        .ok_or_else(|| {
            Error::InvalidTemplate(format!("unsupported action {{{{{action}}}}} in {template:?}"))
        })?;
    Ok((name, &body[end + CLOSE.len()..]))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
