//! Instance-Identifier Parser (C4, §4.4).
//!
//! Parses the RFC 7951 §6.11 textual path grammar used throughout the YAML
//! boundary (`/ietf-interfaces:interfaces/interface[name='1']/enabled`) into
//! an ordered list of segments. Resolution to SIDs is the Path→SID
//! Resolver's job (C5, `resolve.rs`); this module only tokenizes.

use crate::error::{CoreconfError, Result};

/// One `(prefix:)?name([key=value])*` segment of a parsed instance-identifier.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Segment {
    pub prefix: Option<String>,
    pub name: String,
    /// list-key predicates, in the order they appeared in the path text
    pub predicates: Vec<(String, String)>,
}

fn parse_error(path: &str, reason: impl Into<String>) -> CoreconfError {
    CoreconfError::InstanceIdParse {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// Strip a single matching pair of `'` or `"` quotes from a predicate value.
fn unquote(raw: &str, path: &str) -> Result<String> {
    let bytes = raw.as_bytes();
    let quoted = bytes.len() >= 2
        && ((raw.starts_with('\'') && raw.ends_with('\'')) || (raw.starts_with('"') && raw.ends_with('"')));
    if !quoted {
        return Err(parse_error(path, format!("predicate value '{}' must be quoted", raw)));
    }
    Ok(raw[1..raw.len() - 1].to_string())
}

/// Split `name[k1=v1][k2=v2]` into the bare name and its ordered predicates.
fn parse_segment_text(text: &str, path: &str) -> Result<Segment> {
    let bracket_pos = text.find('[');
    let name_part = match bracket_pos {
        Some(p) => &text[..p],
        None => text,
    };
    if name_part.is_empty() {
        return Err(parse_error(path, "empty segment name"));
    }
    let (prefix, name) = match name_part.split_once(':') {
        Some((p, n)) if !n.is_empty() => (Some(p.to_string()), n.to_string()),
        _ => (None, name_part.to_string()),
    };

    let mut predicates = Vec::new();
    if let Some(start) = bracket_pos {
        let mut rest = &text[start..];
        while !rest.is_empty() {
            if !rest.starts_with('[') {
                return Err(parse_error(path, "expected '[' to start a predicate"));
            }
            let end = rest
                .find(']')
                .ok_or_else(|| parse_error(path, "unmatched '[' in segment predicate"))?;
            let inner = &rest[1..end];
            let eq = inner
                .find('=')
                .ok_or_else(|| parse_error(path, format!("missing '=' in predicate '{}'", inner)))?;
            let key = inner[..eq].trim().to_string();
            if key.is_empty() {
                return Err(parse_error(path, "predicate key must not be empty"));
            }
            let value = unquote(inner[eq + 1..].trim(), path)?;
            predicates.push((key, value));
            rest = &rest[end + 1..];
        }
    }

    Ok(Segment { prefix, name, predicates })
}

/// Parse a full instance-identifier path into its ordered segments.
///
/// Errors with [`CoreconfError::InstanceIdParse`] on an unmatched bracket, a
/// predicate missing `=`, or an empty segment name.
pub fn parse_instance_id(path: &str) -> Result<Vec<Segment>> {
    if !path.starts_with('/') {
        return Err(parse_error(path, "instance-identifier must start with '/'"));
    }
    let chars: Vec<char> = path.chars().collect();
    let mut i = 1;
    let mut segments = Vec::new();

    while i < chars.len() {
        let seg_start = i;
        let mut depth = 0i32;
        while i < chars.len() && !(chars[i] == '/' && depth == 0) {
            match chars[i] {
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(parse_error(path, "unmatched ']' in path"));
                    }
                }
                _ => {}
            }
            i += 1;
        }
        if depth != 0 {
            return Err(parse_error(path, "unmatched '[' in path"));
        }
        let seg_text: String = chars[seg_start..i].iter().collect();
        segments.push(parse_segment_text(&seg_text, path)?);
        if i < chars.len() && chars[i] == '/' {
            i += 1;
        }
    }

    if segments.is_empty() {
        return Err(parse_error(path, "instance-identifier has no segments"));
    }
    Ok(segments)
}

/// Parse a single `(prefix:)?name` hierarchical YAML key (no path, no
/// surrounding slashes) into a [`Segment`]. Used by the encoder's
/// hierarchical-document path (§6 "accepts instance-identifier or
/// hierarchical YAML"), where nesting is expressed through YAML structure
/// rather than through a `/`-separated instance-identifier string.
pub fn parse_single_segment(text: &str) -> Result<Segment> {
    parse_segment_text(text, text)
}

/// Render a segment's `prefix:name` form, omitting the prefix when absent.
pub fn segment_prefixed_name(segment: &Segment) -> String {
    match &segment.prefix {
        Some(p) => format!("{}:{}", p, segment.name),
        None => segment.name.clone(),
    }
}
