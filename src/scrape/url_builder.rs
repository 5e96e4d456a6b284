//! URL construction from configured patterns.
//!
//! String parameters are percent-encoded, then run through the site's
//! literal substitution rules (some sites want spaces as `+` or `-`
//! rather than `%20`). The formatted path is resolved against the site
//! base URL with standard relative-URL semantics, so absolute patterns
//! win over the base.

use indexmap::IndexMap;
use url::Url;

use crate::error::{Error, Result};

fn encode_value(value: &str, encoding_rules: &IndexMap<String, String>) -> String {
    let mut encoded = urlencoding::encode(value).into_owned();
    for (original, replacement) in encoding_rules {
        encoded = encoded.replace(original.as_str(), replacement.as_str());
    }
    encoded
}

/// Substitute `{name}` placeholders in `pattern` from `params`.
/// A placeholder with no matching param is an error; unused params are
/// fine.
pub fn format_pattern(pattern: &str, params: &[(&str, String)]) -> Result<String> {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        for inner in chars.by_ref() {
            if inner == '}' {
                break;
            }
            name.push(inner);
        }
        match params.iter().find(|(k, _)| *k == name) {
            Some((_, value)) => out.push_str(value),
            None => {
                return Err(Error::Template {
                    template: pattern.to_string(),
                    placeholder: name,
                })
            }
        }
    }
    Ok(out)
}

/// Build an absolute URL from a pattern and per-field values. Every
/// value is escaped and run through the encoding rules; values that must
/// stay verbatim (page numbers, pre-rendered patterns) go through
/// [`format_pattern`] directly instead.
pub fn build_url(
    base_url: &str,
    pattern: &str,
    encoding_rules: &IndexMap<String, String>,
    params: &[(&str, &str)],
) -> Result<String> {
    let rendered: Vec<(&str, String)> = params
        .iter()
        .map(|(name, value)| (*name, encode_value(value, encoding_rules)))
        .collect();
    let path = format_pattern(pattern, &rendered)?;
    absolutize(base_url, &path)
}

/// Fix a possibly relative or scheme-relative href up to an absolute URL.
/// Scheme-relative (`//host/path`) links get `http:` prepended, matching
/// how sites that omit the scheme are served.
pub fn absolutize(base_url: &str, href: &str) -> Result<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Ok(href.to_string());
    }
    if href.starts_with("//") {
        return Ok(format!("http:{href}"));
    }
    let base = Url::parse(base_url)?;
    Ok(base.join(href)?.to_string())
}
