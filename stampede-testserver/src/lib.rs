//! In-process stand-in for the credit-limit transaction API: a login endpoint issuing a bearer
//! token and a transaction endpoint that admits requests only while a shared limit allows.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::time::{Duration, sleep};

pub const PATH_LOGIN: &str = "/api/auth/login";
pub const PATH_TRANSACTION: &str = "/api/transaction/";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_STATUS: &str = "/status/{code}";

pub const DEFAULT_EMAIL: &str = "budi@mail.com";
pub const DEFAULT_PASSWORD: &str = "pAsswj@1873";
pub const DEFAULT_API_KEY: &str = "biytf7rciyubyt6r7g89py";

/// Tenors (in months) the account has a limit for.
pub const SUPPORTED_TENORS: [i32; 4] = [1, 2, 3, 6];

/// How the transaction endpoint serializes its limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Admission {
    /// Check and deduct under one lock.
    #[default]
    Atomic,
    /// Read the used amount, wait, then write it back. Concurrent requests all see the same
    /// starting balance, so more than one can be admitted.
    Racy { window: Duration },
}

#[derive(Debug, Clone)]
pub struct TestServerConfig {
    pub email: String,
    pub password: String,
    pub api_key: String,
    pub token: String,
    /// Total OTR amount the account may use.
    pub limit: f64,
    pub admission: Admission,
}

impl Default for TestServerConfig {
    fn default() -> Self {
        Self {
            email: DEFAULT_EMAIL.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
            token: "test-access-token".to_string(),
            limit: 1_000_000.0,
            admission: Admission::Atomic,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    logins: Arc<AtomicU64>,
    transactions_created: Arc<AtomicU64>,
    transactions_rejected: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn logins(&self) -> u64 {
        self.logins.load(Ordering::Relaxed)
    }

    pub fn transactions_created(&self) -> u64 {
        self.transactions_created.load(Ordering::Relaxed)
    }

    pub fn transactions_rejected(&self) -> u64 {
        self.transactions_rejected.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
struct AppState {
    config: Arc<TestServerConfig>,
    stats: TestServerStats,
    used: Arc<Mutex<f64>>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct CreateTransactionRequest {
    contract_number: String,
    otr: f64,
    admin_fee: f64,
    installment_amount: f64,
    interest_amount: f64,
    asset_name: String,
    tenor: i32,
}

impl CreateTransactionRequest {
    /// Every field is required: strings non-empty, amounts positive.
    fn invalid_field(&self) -> Option<&'static str> {
        let amounts = [
            ("otr", self.otr),
            ("admin_fee", self.admin_fee),
            ("installment_amount", self.installment_amount),
            ("interest_amount", self.interest_amount),
        ];
        if self.contract_number.trim().is_empty() {
            return Some("contract_number");
        }
        if self.asset_name.trim().is_empty() {
            return Some("asset_name");
        }
        amounts
            .into_iter()
            .find(|(_, v)| !v.is_finite() || *v <= 0.0)
            .map(|(name, _)| name)
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> (StatusCode, Bytes) {
    (status, Bytes::from(body.to_string()))
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Bytes) {
    json_response(status, json!({ "error": message }))
}

async fn handle_login(State(state): State<AppState>, body: Bytes) -> (StatusCode, Bytes) {
    TestServerStats::inc(&state.stats.requests_total);

    let req: LoginRequest = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    if req.email != state.config.email || req.password != state.config.password {
        return error_response(StatusCode::UNAUTHORIZED, "invalid email or password");
    }

    TestServerStats::inc(&state.stats.logins);
    json_response(
        StatusCode::OK,
        json!({
            "access_token": state.config.token,
            "refresh_token": format!("refresh-{}", state.config.token),
        }),
    )
}

async fn handle_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Bytes) {
    TestServerStats::inc(&state.stats.requests_total);

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    if header("x-api-key") != Some(state.config.api_key.as_str()) {
        return error_response(StatusCode::UNAUTHORIZED, "invalid api key");
    }
    let expected = format!("Bearer {}", state.config.token);
    if header("authorization") != Some(expected.as_str()) {
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let req: CreateTransactionRequest = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    if let Some(field) = req.invalid_field() {
        return error_response(StatusCode::BAD_REQUEST, &format!("`{field}` is required"));
    }
    if !SUPPORTED_TENORS.contains(&req.tenor) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "limit not found for the requested tenor",
        );
    }

    let admitted = match state.config.admission {
        Admission::Atomic => {
            let mut used = state.used.lock().await;
            if *used + req.otr > state.config.limit {
                false
            } else {
                *used += req.otr;
                true
            }
        }
        Admission::Racy { window } => {
            let seen = *state.used.lock().await;
            if seen + req.otr > state.config.limit {
                false
            } else {
                sleep(window).await;
                *state.used.lock().await = seen + req.otr;
                true
            }
        }
    };

    if admitted {
        TestServerStats::inc(&state.stats.transactions_created);
        json_response(
            StatusCode::CREATED,
            json!({ "message": "Transaction created successfully" }),
        )
    } else {
        TestServerStats::inc(&state.stats.transactions_rejected);
        error_response(StatusCode::BAD_REQUEST, "insufficient limit")
    }
}

async fn handle_slow(State(state): State<AppState>) -> &'static str {
    TestServerStats::inc(&state.stats.requests_total);
    sleep(Duration::from_millis(50)).await;
    "slow"
}

async fn handle_status(State(state): State<AppState>, Path(code): Path<u16>) -> StatusCode {
    TestServerStats::inc(&state.stats.requests_total);
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

pub fn router(config: TestServerConfig, stats: TestServerStats) -> Router {
    let state = AppState {
        config: Arc::new(config),
        stats,
        used: Arc::new(Mutex::new(0.0)),
    };

    Router::new()
        .route(PATH_LOGIN, post(handle_login))
        .route(PATH_TRANSACTION, post(handle_transaction))
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_STATUS, get(handle_status))
        .with_state(state)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(TestServerConfig::default()).await
    }

    pub async fn start_with(config: TestServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(config, stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Base URL of the transaction API (`<base>/api`).
    pub fn api_url(&self) -> String {
        format!("{}/api", self.base_url)
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
