//! Small shared helpers: URL quoting, path cleanup, size formatting, and
//! raw-request parsing.

use std::collections::HashSet;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_encode};
use url::Url;

use crate::errors::ScanError;

/// Everything outside this set is percent-encoded. `%` stays untouched so
/// sequences already encoded in the wordlist reach the server verbatim, and
/// `/` stays untouched so duplicate slashes are preserved.
const QUOTE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'%')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b'/')
    .remove(b':')
    .remove(b';')
    .remove(b'=')
    .remove(b'?')
    .remove(b'@')
    .remove(b'[')
    .remove(b']')
    .remove(b'~')
    .remove(b'_')
    .remove(b'.')
    .remove(b'-');

/// Quotes characters that would otherwise be mangled in transit while
/// leaving reserved characters and existing escapes alone.
pub fn safequote(value: &str) -> String {
    percent_encode(value.as_bytes(), QUOTE_SET).to_string()
}

/// Strips at most one occurrence of `prefix` from the start of `value`.
pub fn lstrip_once<'a>(value: &'a str, prefix: &str) -> &'a str {
    value.strip_prefix(prefix).unwrap_or(value)
}

/// Cuts a path at the first query or fragment marker.
pub fn clean_path(path: &str) -> &str {
    let end = path
        .find(['?', '#'])
        .unwrap_or(path.len());
    &path[..end]
}

/// Extracts the host-root-relative path (no leading slash) from an absolute
/// URL or a bare path.
pub fn parse_path(value: &str) -> String {
    match Url::parse(value) {
        Ok(url) => lstrip_once(url.path(), "/").to_string(),
        Err(_) => lstrip_once(clean_path(value), "/").to_string(),
    }
}

/// Formats a byte count the way the size filters expect it: `123B`, `4KB`,
/// `2MB`, rounding at each step.
pub fn human_size(num: u64) -> String {
    let mut num = num as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if num < 1024.0 {
            return format!("{}{}", num.round() as u64, unit);
        }
        num /= 1024.0;
    }
    format!("{}TB", num.round() as u64)
}

/// Reduces a string to something usable as a file name.
pub fn get_valid_filename(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Parses a status-code list with ranges: `"200,301,500-599"`.
pub fn parse_status_codes(value: &str) -> Result<HashSet<u16>, ScanError> {
    let mut codes = HashSet::new();
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((low, high)) = part.split_once('-') {
            let low: u16 = low
                .trim()
                .parse()
                .map_err(|_| ScanError::Config(format!("Invalid status code: {part}")))?;
            let high: u16 = high
                .trim()
                .parse()
                .map_err(|_| ScanError::Config(format!("Invalid status code: {part}")))?;
            codes.extend(low..=high);
        } else {
            let code: u16 = part
                .parse()
                .map_err(|_| ScanError::Config(format!("Invalid status code: {part}")))?;
            codes.insert(code);
        }
    }
    Ok(codes)
}

/// The pieces of an HTTP request read from a `--raw` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub data: Option<String>,
}

/// Parses a raw HTTP request file: request line, header block, optional body.
/// The target URL is rebuilt from the `Host` header and the request path.
pub fn parse_raw_request(content: &str) -> Result<RawRequest, ScanError> {
    let content = content.trim_start_matches('\u{feff}');
    let mut lines = content.lines();

    let request_line = lines
        .next()
        .ok_or_else(|| ScanError::InvalidRawRequest("empty file".into()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ScanError::InvalidRawRequest("missing method".into()))?
        .to_string();
    let path = parts
        .next()
        .ok_or_else(|| ScanError::InvalidRawRequest("missing request path".into()))?
        .to_string();

    let mut headers = Vec::new();
    let mut host = None;
    let mut body = Vec::new();
    let mut in_body = false;
    for line in lines {
        if in_body {
            body.push(line);
            continue;
        }
        if line.trim().is_empty() {
            in_body = true;
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ScanError::InvalidRawRequest(format!("malformed header: {line}")))?;
        let key = key.trim().to_string();
        let value = value.trim().to_string();
        if key.eq_ignore_ascii_case("host") {
            host = Some(value.clone());
        }
        headers.push((key, value));
    }

    let url = if path.contains("://") {
        path
    } else {
        let host = host
            .ok_or_else(|| ScanError::InvalidRawRequest("missing Host header".into()))?;
        format!("{host}{path}")
    };

    let data = if body.is_empty() {
        None
    } else {
        Some(body.join("\n"))
    };

    Ok(RawRequest {
        url,
        method,
        headers,
        data,
    })
}
