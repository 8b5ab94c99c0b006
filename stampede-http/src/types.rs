use std::time::Duration;

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
    /// Response headers (lowercased header names). Multiple values are joined with ", ".
    pub headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: Bytes) -> Self {
        Self::new(http::Method::POST, url).with_body(body)
    }

    /// POST with a serialized JSON body and `Content-Type: application/json`.
    pub fn post_json<T: serde::Serialize + ?Sized>(
        url: impl Into<String>,
        body: &T,
    ) -> serde_json::Result<Self> {
        let body = serde_json::to_vec(body)?;
        Ok(Self::post(url, Bytes::from(body)).with_header("Content-Type", "application/json"))
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_json_sets_content_type() {
        let req = HttpRequest::post_json("http://h/x", &serde_json::json!({"a": 1}))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(req.method, http::Method::POST);
        assert_eq!(&req.body[..], br#"{"a":1}"#);
        assert!(
            req.headers
                .iter()
                .any(|(k, v)| k == "Content-Type" && v == "application/json")
        );
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let res = HttpResponse {
            status: 200,
            body: Bytes::new(),
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
        };
        assert_eq!(res.header("Content-Type"), Some("text/plain"));
        assert_eq!(res.header("x-missing"), None);
    }
}
