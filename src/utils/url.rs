//! URL and query-string helpers for resolving format URLs

use crate::error::DecipherError;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use url::{form_urlencoded, Url};

/// Percent-decode a URI component. `+` is kept as-is.
pub fn decode_component(value: &str) -> Result<String, DecipherError> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| DecipherError::DecodeError(e.to_string()))
}

/// Parse a `key=value&...` bundle; the first occurrence of a key wins
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}

/// First value of a query parameter
pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Set a query parameter, replacing the first occurrence and dropping the rest
pub fn set_query_param(url: &mut Url, name: &str, value: &str) {
    let mut replaced = false;
    let mut pairs: Vec<(String, String)> = Vec::new();

    for (key, current) in url.query_pairs() {
        if key != name {
            pairs.push((key.into_owned(), current.into_owned()));
        } else if !replaced {
            pairs.push((key.into_owned(), value.to_string()));
            replaced = true;
        }
    }
    if !replaced {
        pairs.push((name.to_string(), value.to_string()));
    }

    url.query_pairs_mut().clear().extend_pairs(pairs);
}

/// Resolve a script identifier against a site base URL.
///
/// Absolute URLs are returned unchanged, `//host/...` gets the base scheme and
/// `/path` gets the base origin.
pub fn resolve_script_url(base_url: &str, identifier: &str) -> Result<String, DecipherError> {
    if identifier.starts_with("http://") || identifier.starts_with("https://") {
        return Ok(identifier.to_string());
    }
    Ok(Url::parse(base_url)?.join(identifier)?.to_string())
}
