use http::header::{HeaderName, HeaderValue};

use crate::Error;

/// Validates an absolute http(s) URL. Returns the request URI and the `Host` header value.
pub(super) fn parse_target(url: &str) -> Result<(hyper::Uri, String), Error> {
    let invalid = || Error::InvalidUrl(url.to_string());

    let parsed = url::Url::parse(url).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }
    let host = parsed.host_str().ok_or_else(invalid)?;
    let host = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let uri = url.parse().map_err(|_| invalid())?;
    Ok((uri, host))
}

pub(super) fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), Error> {
    let invalid = |source: http::Error| Error::InvalidHeader {
        name: name.to_string(),
        source,
    };
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.into()))?;
    let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.into()))?;
    Ok((header_name, header_value))
}

/// Lowercases header names and joins repeated values with `", "`.
pub(super) fn merge_headers(headers: &http::HeaderMap) -> Vec<(String, String)> {
    let mut merged: std::collections::BTreeMap<String, String> = Default::default();
    for (name, value) in headers.iter() {
        let v = String::from_utf8_lossy(value.as_bytes()).to_string();
        merged
            .entry(name.as_str().to_ascii_lowercase())
            .and_modify(|cur| {
                if !cur.is_empty() {
                    cur.push_str(", ");
                }
                cur.push_str(&v);
            })
            .or_insert(v);
    }
    merged.into_iter().collect()
}
