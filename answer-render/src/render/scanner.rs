//! Directive scanner
//!
//! Splits a template into literal text and `{...}` directive regions. The
//! capture tracks quote pairs and nested braces, so
//! `{'\n'.join([f"- {c}" for c in xs])}` is one directive. Inside a quoted
//! string, braces and colons are plain characters.

use crate::error::{EvalError, RenderError};

/// A piece of a scanned template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSegment {
    /// Literal text, brace escapes already resolved
    Literal(String),
    /// A directive and its optional trailing format specifier
    Directive {
        /// Expression text between the braces, specifier removed
        body: String,
        /// Raw specifier text after the top-level `:`
        spec: Option<String>,
        /// Byte offset of the opening brace in the template
        position: usize,
    },
}

/// Scan a whole template
///
/// A leading `f"`/`f'` wrapper with a matching closing quote is stripped
/// once first; positions still refer to the template as given.
pub fn scan_template(template: &str) -> Result<Vec<TemplateSegment>, RenderError> {
    match strip_fstring_wrapper(template) {
        Some(inner) => {
            log::trace!("Stripped f-string wrapper from template");
            scan_segments(inner, 2)
        }
        None => scan_segments(template, 0),
    }
}

/// Remove a surrounding `f"..."` (or `f'...'`) once
pub fn strip_fstring_wrapper(template: &str) -> Option<&str> {
    let rest = template
        .strip_prefix('f')
        .or_else(|| template.strip_prefix('F'))?;
    let quote = rest.chars().next().filter(|q| *q == '"' || *q == '\'')?;
    let inner = rest.strip_prefix(quote)?.strip_suffix(quote)?;
    Some(inner)
}

/// Scan text into segments, adding `offset` to reported positions
pub fn scan_segments(text: &str, offset: usize) -> Result<Vec<TemplateSegment>, RenderError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = text.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '{' => {
                if let Some(&(_, '{')) = chars.peek() {
                    chars.next();
                    literal.push('{');
                    continue;
                }

                if !literal.is_empty() {
                    segments.push(TemplateSegment::Literal(std::mem::take(&mut literal)));
                }

                let body_start = pos + 1;
                let body_end = find_closing_brace(&mut chars).ok_or_else(|| {
                    let rest: String = text[pos..].chars().take(40).collect();
                    RenderError::new(
                        pos + offset,
                        rest,
                        EvalError::malformed("unterminated directive, expected '}'"),
                    )
                })?;

                let (body, spec) = split_format_spec(&text[body_start..body_end]);
                segments.push(TemplateSegment::Directive {
                    body: body.to_string(),
                    spec: spec.map(str::to_string),
                    position: pos + offset,
                });
            }
            '}' => {
                // `}}` is an escape; a lone `}` is kept as-is
                if let Some(&(_, '}')) = chars.peek() {
                    chars.next();
                }
                literal.push('}');
            }
            _ => literal.push(ch),
        }
    }

    if !literal.is_empty() {
        segments.push(TemplateSegment::Literal(literal));
    }

    Ok(segments)
}

/// Advance past the brace that closes the current directive
///
/// Returns its byte offset, or `None` when input ends first.
fn find_closing_brace<I>(chars: &mut I) -> Option<usize>
where
    I: Iterator<Item = (usize, char)>,
{
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in chars {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Split `expr:spec` at the first `:` outside quotes and brackets
pub fn split_format_spec(directive: &str) -> (&str, Option<&str>) {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in directive.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ':' if depth == 0 => return (&directive[..i], Some(&directive[i + 1..])),
            _ => {}
        }
    }

    (directive, None)
}
