use bytes::Bytes;
use http::HeaderValue;
use http::header::{CONTENT_LENGTH, HOST};
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

use super::util::{header_pair, merge_headers, parse_target};
use super::{Error, HttpRequest, HttpResponse, Result};

/// Pooled HTTP/1.1 client. Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        // Unreachable hosts would otherwise wait for the OS-level connect timeout.
        Self::new(Some(Duration::from_secs(3)))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(connect_timeout);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self { inner }
    }

    /// Sends the request. When `req.timeout` is set it bounds the whole exchange, body included.
    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        match req.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.send(req)).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout(timeout)),
            },
            None => self.send(req).await,
        }
    }

    async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            ..
        } = req;
        let (uri, host) = parse_target(&url)?;

        let body_len = body.len();
        let mut request = Request::new(Full::new(body));
        *request.method_mut() = method;
        *request.uri_mut() = uri;

        let map = request.headers_mut();
        for (name, value) in &headers {
            let (name, value) = header_pair(name, value)?;
            map.append(name, value);
        }
        if !map.contains_key(HOST) {
            let (name, value) = header_pair(HOST.as_str(), &host)?;
            map.insert(name, value);
        }
        if body_len > 0 && !map.contains_key(CONTENT_LENGTH) {
            map.insert(CONTENT_LENGTH, HeaderValue::from(body_len));
        }

        let res: hyper::Response<Incoming> = self.inner.request(request).await?;
        let (parts, body) = res.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            headers: merge_headers(&parts.headers),
            body,
        })
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.request(HttpRequest::get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpTransportErrorKind;
    use std::time::Instant;

    #[tokio::test]
    async fn unreachable_host_fails_fast_with_connect_timeout() {
        let client = HttpClient::new(Some(Duration::from_millis(200)));
        let req = HttpRequest::get("http://192.0.2.1:81/");

        let started = Instant::now();
        let res = client.request(req).await;
        let elapsed = started.elapsed();

        assert_eq!(
            res.err().map(|e| e.transport_error_kind()),
            Some(HttpTransportErrorKind::Connect)
        );
        assert!(
            elapsed < Duration::from_secs(2),
            "expected fast failure, elapsed={elapsed:?}"
        );
    }

    #[tokio::test]
    async fn rejects_unsupported_scheme() {
        let client = HttpClient::default();
        let err = match client.get("ftp://example.com/file").await {
            Ok(res) => panic!("unexpected response: {res:?}"),
            Err(e) => e,
        };
        assert_eq!(err.transport_error_kind(), HttpTransportErrorKind::InvalidUrl);
    }

    #[tokio::test]
    async fn invalid_url_is_reported() {
        let client = HttpClient::default();
        let err = match client.get("not a url").await {
            Ok(res) => panic!("unexpected response: {res:?}"),
            Err(e) => e,
        };
        assert_eq!(err.transport_error_kind(), HttpTransportErrorKind::InvalidUrl);
    }
}
