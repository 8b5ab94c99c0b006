//! Request Runner: one HTTP exchange through a [`Transport`], timed and recorded, plus named
//! checks over the response.
//!
//! Transport failures are values. [`RequestRunner::execute`] always returns a [`Response`];
//! on failure its `status` is `0` and `error` carries the classified cause.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use stampede_http::{HttpClient, HttpRequest, HttpResponse, HttpTransportErrorKind};
use stampede_metrics::{MetricSink, Observation};
use tokio::time::Instant;

use crate::scope::{MetricScope, names};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: HttpTransportErrorKind,
    pub message: String,
}

impl From<stampede_http::Error> for TransportError {
    fn from(err: stampede_http::Error) -> Self {
        Self {
            kind: err.transport_error_kind(),
            message: err.to_string(),
        }
    }
}

/// Sends one request. Implemented by the real HTTP client and by test fakes.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;
}

impl Transport for HttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.request(request).await.map_err(TransportError::from)
    }
}

impl<T: Transport> Transport for Arc<T> {
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send {
        (**self).send(request)
    }
}

/// An HTTP request plus the metric bookkeeping that goes with it.
#[derive(Debug, Clone)]
pub struct Request {
    pub http: HttpRequest,
    /// Trend metric the duration is recorded under. Defaults to `http_req_duration`.
    pub metric: Option<String>,
    /// Value of the `name` tag, for grouping URLs that differ per call.
    pub name: Option<String>,
}

impl Request {
    pub fn new(http: HttpRequest) -> Self {
        Self {
            http,
            metric: None,
            name: None,
        }
    }

    #[must_use]
    pub fn metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = Some(metric.into());
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl From<HttpRequest> for Request {
    fn from(http: HttpRequest) -> Self {
        Self::new(http)
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    /// `0` when the transport failed.
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub duration: Duration,
    pub error: Option<TransportError>,
}

impl Response {
    fn from_transport_error(error: TransportError, duration: Duration) -> Self {
        Self {
            status: 0,
            headers: Vec::new(),
            body: Bytes::new(),
            duration,
            error: Some(error),
        }
    }

    pub fn is_transport_error(&self) -> bool {
        self.error.is_some()
    }

    /// Failed from the load test's point of view: no response, or a status outside 200..=399.
    pub fn is_failed(&self) -> bool {
        self.error.is_some() || !(200..=399).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.body)
    }

    /// Top-level field of a JSON object body, if the body is one and has it.
    pub fn json_field(&self, name: &str) -> Option<serde_json::Value> {
        match self.json().ok()? {
            serde_json::Value::Object(mut map) => map.remove(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
}

pub type Predicate<'a> = &'a (dyn Fn(&Response) -> bool + 'a);

/// Executes requests and checks, recording every outcome into a [`MetricSink`].
pub struct RequestRunner<T> {
    transport: T,
    sink: Arc<dyn MetricSink>,
    default_timeout: Duration,
}

impl<T> std::fmt::Debug for RequestRunner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRunner")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> RequestRunner<T> {
    pub fn new(transport: T, sink: Arc<dyn MetricSink>) -> Self {
        Self {
            transport,
            sink,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn sink(&self) -> &Arc<dyn MetricSink> {
        &self.sink
    }

    pub async fn execute(&self, scope: &MetricScope, request: impl Into<Request>) -> Response {
        let Request {
            mut http,
            metric,
            name,
        } = request.into();

        let timeout = *http.timeout.get_or_insert(self.default_timeout);
        let method = http.method.to_string();

        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, self.transport.send(http)).await {
            Ok(res) => res,
            Err(_) => Err(TransportError {
                kind: HttpTransportErrorKind::Timeout,
                message: format!("request timed out after {timeout:?}"),
            }),
        };
        let duration = started.elapsed();

        let response = match outcome {
            Ok(res) => Response {
                status: res.status,
                headers: res.headers,
                body: res.body,
                duration,
                error: None,
            },
            Err(err) => {
                tracing::debug!(
                    scenario = scope.scenario(),
                    kind = %err.kind,
                    error = %err.message,
                    "transport error"
                );
                Response::from_transport_error(err, duration)
            }
        };

        let status = response.status.to_string();
        let mut tags: Vec<(String, String)> = scope.tags().to_vec();
        tags.push(("method".to_string(), method));
        tags.push(("status".to_string(), status));
        if let Some(name) = name {
            tags.push(("name".to_string(), name));
        }

        let metric = metric.unwrap_or_else(|| names::HTTP_REQ_DURATION.to_string());
        let ms = duration.as_secs_f64() * 1000.0;
        self.sink
            .record(Observation::trend(metric, ms).with_tags(&tags));
        self.sink
            .record(Observation::counter(names::HTTP_REQS, 1).with_tags(&tags));
        self.sink.record(
            Observation::rate(names::HTTP_REQ_FAILED, response.is_failed()).with_tags(&tags),
        );

        response
    }

    /// Runs each named predicate against `response`. A predicate that panics counts as failed.
    pub fn check(
        &self,
        scope: &MetricScope,
        response: &Response,
        predicates: &[(&str, Predicate<'_>)],
    ) -> Vec<CheckResult> {
        check(self.sink.as_ref(), scope, response, predicates)
    }
}

/// Evaluates checks and records them: a `checks` rate tagged `check=<name>` and a rate named
/// after the check itself.
pub fn check(
    sink: &dyn MetricSink,
    scope: &MetricScope,
    response: &Response,
    predicates: &[(&str, Predicate<'_>)],
) -> Vec<CheckResult> {
    predicates
        .iter()
        .map(|(name, predicate)| {
            let passed = match std::panic::catch_unwind(AssertUnwindSafe(|| predicate(response))) {
                Ok(passed) => passed,
                Err(_) => {
                    tracing::debug!(
                        scenario = scope.scenario(),
                        check = name,
                        "check predicate panicked"
                    );
                    false
                }
            };

            sink.record(
                Observation::rate(names::CHECKS, passed)
                    .with_tag("check", *name)
                    .with_tags(scope.tags()),
            );
            sink.record(Observation::rate(*name, passed).with_tags(scope.tags()));

            CheckResult {
                name: name.to_string(),
                passed,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;
    use stampede_metrics::ObservedValue;

    struct FixedTransport(Result<HttpResponse, TransportError>);

    impl Transport for FixedTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.0.clone()
        }
    }

    struct HangingTransport;

    impl Transport for HangingTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            std::future::pending().await
        }
    }

    fn ok(status: u16, body: &str) -> FixedTransport {
        FixedTransport(Ok(HttpResponse {
            status,
            body: Bytes::from(body.to_string()),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
        }))
    }

    fn tag<'a>(o: &'a Observation, key: &str) -> Option<&'a str> {
        o.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn scope() -> MetricScope {
        MetricScope::new("s1", &[("team".to_string(), "core".to_string())])
    }

    #[tokio::test]
    async fn execute_records_trend_counter_and_failure_rate() {
        let sink = Arc::new(RecordingSink::default());
        let runner = RequestRunner::new(ok(201, r#"{"message":"ok"}"#), sink.clone());

        let res = runner
            .execute(
                &scope(),
                Request::new(HttpRequest::get("http://x/y")).name("create"),
            )
            .await;
        assert_eq!(res.status, 201);
        assert!(!res.is_failed());
        assert_eq!(
            res.json_field("message"),
            Some(serde_json::Value::from("ok"))
        );

        let seen = sink.take();
        assert_eq!(seen.len(), 3);
        let trend = &seen[0];
        assert_eq!(trend.metric, names::HTTP_REQ_DURATION);
        assert!(matches!(trend.value, ObservedValue::Trend(_)));
        assert_eq!(tag(trend, "scenario"), Some("s1"));
        assert_eq!(tag(trend, "team"), Some("core"));
        assert_eq!(tag(trend, "method"), Some("GET"));
        assert_eq!(tag(trend, "status"), Some("201"));
        assert_eq!(tag(trend, "name"), Some("create"));

        assert_eq!(seen[1].metric, names::HTTP_REQS);
        assert_eq!(seen[1].value, ObservedValue::Counter(1));
        assert_eq!(seen[2].metric, names::HTTP_REQ_FAILED);
        assert_eq!(seen[2].value, ObservedValue::Rate(false));
    }

    #[tokio::test]
    async fn custom_metric_name_and_error_status() {
        let sink = Arc::new(RecordingSink::default());
        let runner = RequestRunner::new(ok(500, "oops"), sink.clone());

        let res = runner
            .execute(
                &scope(),
                Request::new(HttpRequest::get("http://x/")).metric("login_duration"),
            )
            .await;
        assert_eq!(res.status, 500);
        assert!(res.is_failed());
        assert_eq!(res.json_field("error"), None);

        let seen = sink.take();
        assert_eq!(seen[0].metric, "login_duration");
        assert_eq!(seen[2].value, ObservedValue::Rate(true));
    }

    #[tokio::test]
    async fn transport_failure_is_a_value() {
        let sink = Arc::new(RecordingSink::default());
        let runner = RequestRunner::new(
            FixedTransport(Err(TransportError {
                kind: HttpTransportErrorKind::Connect,
                message: "connection refused".to_string(),
            })),
            sink.clone(),
        );

        let res = runner.execute(&scope(), HttpRequest::get("http://x/")).await;
        assert_eq!(res.status, 0);
        assert!(res.is_transport_error());
        assert_eq!(
            res.error.as_ref().map(|e| e.kind),
            Some(HttpTransportErrorKind::Connect)
        );

        let seen = sink.take();
        assert_eq!(tag(&seen[0], "status"), Some("0"));
        assert_eq!(seen[2].value, ObservedValue::Rate(true));
    }

    #[tokio::test(start_paused = true)]
    async fn runner_bounds_every_request() {
        let sink = Arc::new(RecordingSink::default());
        let runner = RequestRunner::new(HangingTransport, sink.clone())
            .with_default_timeout(Duration::from_secs(2));

        let res = runner.execute(&scope(), HttpRequest::get("http://x/")).await;
        assert_eq!(
            res.error.as_ref().map(|e| e.kind),
            Some(HttpTransportErrorKind::Timeout)
        );
        assert_eq!(res.duration, Duration::from_secs(2));

        let res = runner
            .execute(
                &scope(),
                HttpRequest::get("http://x/").with_timeout(Duration::from_millis(300)),
            )
            .await;
        assert_eq!(res.duration, Duration::from_millis(300));
    }

    #[tokio::test]
    async fn checks_catch_panics_and_record_two_rates_each() {
        let sink = Arc::new(RecordingSink::default());
        let runner = RequestRunner::new(ok(400, r#"{"error":"insufficient limit"}"#), sink.clone());
        let res = runner.execute(&scope(), HttpRequest::get("http://x/")).await;
        sink.take();

        let results = runner.check(
            &scope(),
            &res,
            &[
                ("status is 201 or 400", &|r: &Response| {
                    r.status == 201 || r.status == 400
                }),
                ("has token", &|r: &Response| {
                    r.json_field("access_token")
                        .map(|v| v.is_string())
                        .unwrap_or_else(|| panic!("no token"))
                }),
            ],
        );

        assert_eq!(
            results,
            vec![
                CheckResult {
                    name: "status is 201 or 400".to_string(),
                    passed: true
                },
                CheckResult {
                    name: "has token".to_string(),
                    passed: false
                },
            ]
        );

        let seen = sink.take();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].metric, names::CHECKS);
        assert_eq!(tag(&seen[0], "check"), Some("status is 201 or 400"));
        assert_eq!(seen[0].value, ObservedValue::Rate(true));
        assert_eq!(seen[1].metric, "status is 201 or 400");
        assert_eq!(seen[2].metric, names::CHECKS);
        assert_eq!(seen[2].value, ObservedValue::Rate(false));
        assert_eq!(seen[3].metric, "has token");
        assert_eq!(tag(&seen[3], "scenario"), Some("s1"));
    }
}
