//! The transaction workload every plan drives: log in once, then create transactions
//! back-to-back and tally how many the target admitted.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context as _;
use rand::rngs::StdRng;
use rand::seq::SliceRandom as _;
use rand::{Rng as _, SeedableRng as _};
use serde::Serialize;
use stampede_core::{
    HookContext, IterationContext, Predicate, Request, RequestRunner, Response, Transport,
};
use stampede_http::HttpRequest;
use stampede_metrics::{Observation, Snapshot};

pub(crate) const TENORS: [u32; 4] = [1, 2, 3, 6];
pub(crate) const OTR_MIN: u64 = 1000;
pub(crate) const OTR_MAX: u64 = 6999;
const ADMIN_FEE: u64 = 10_000;
const INSTALLMENT_AMOUNT: u64 = 105_000;
const INTEREST_AMOUNT: u64 = 10_000;
const ASSET_NAME: &str = "Stampede Test Asset";

pub(crate) const TRANSACTIONS_CREATED: &str = "transactions_created";
pub(crate) const TRANSACTIONS_REJECTED: &str = "transactions_rejected";
pub(crate) const CHECK_LOGIN: &str = "login successful";
pub(crate) const CHECK_CREATED_OR_REJECTED: &str = "status is 201 or 400";

/// Where the API lives and how to authenticate against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    /// Without a trailing `/`.
    pub base_url: String,
    pub api_key: String,
    pub email: String,
    pub password: String,
    pub timeout: Option<Duration>,
}

impl Target {
    fn login_url(&self) -> String {
        format!("{}/auth/login", self.base_url)
    }

    fn transaction_url(&self) -> String {
        format!("{}/transaction/", self.base_url)
    }
}

/// Randomized request parameters.
pub(crate) trait ParamSource: Send + Sync {
    fn next_tenor(&self) -> u32;
    fn next_otr(&self) -> u64;
}

pub(crate) struct SeededParams {
    rng: Mutex<StdRng>,
}

impl SeededParams {
    /// Without a seed the generator is seeded from OS entropy.
    pub(crate) fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    fn with_rng<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut rng)
    }
}

impl ParamSource for SeededParams {
    fn next_tenor(&self) -> u32 {
        self.with_rng(|rng| TENORS.choose(rng).copied().unwrap_or(TENORS[0]))
    }

    fn next_otr(&self) -> u64 {
        self.with_rng(|rng| rng.gen_range(OTR_MIN..=OTR_MAX))
    }
}

/// Run context produced by the login setup and shared read-only by every VU.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct TransactionBody {
    contract_number: String,
    otr: u64,
    admin_fee: u64,
    installment_amount: u64,
    interest_amount: u64,
    asset_name: &'static str,
    tenor: u32,
}

pub(crate) struct TransactionWorkload<T> {
    target: Target,
    runner: RequestRunner<T>,
    params: Arc<dyn ParamSource>,
}

impl<T: Transport> TransactionWorkload<T> {
    pub(crate) fn new(
        target: Target,
        runner: RequestRunner<T>,
        params: Arc<dyn ParamSource>,
    ) -> Self {
        Self {
            target,
            runner,
            params,
        }
    }

    /// Setup hook: exchanges the configured credentials for a bearer token.
    pub(crate) async fn login(&self, ctx: &HookContext) -> anyhow::Result<Session> {
        let http = HttpRequest::post_json(
            self.target.login_url(),
            &LoginBody {
                email: &self.target.email,
                password: &self.target.password,
            },
        )
        .context("failed to encode login request")?;

        let res = self
            .runner
            .execute(ctx.scope(), Request::new(http).name("login"))
            .await;

        let ok: Predicate<'_> = &|r: &Response| r.status == 200;
        let passed = self
            .runner
            .check(ctx.scope(), &res, &[(CHECK_LOGIN, ok)])
            .iter()
            .all(|c| c.passed);
        if !passed {
            anyhow::bail!(
                "login failed with status {}: {}",
                res.status,
                error_detail(&res)
            );
        }

        let access_token = res
            .json_field("access_token")
            .and_then(|v| v.as_str().map(str::to_string))
            .context("login response has no `access_token`")?;
        tracing::info!("logged in");
        Ok(Session { access_token })
    }

    /// One iteration: submits a transaction and tallies whether it was admitted.
    pub(crate) async fn create_transaction(
        &self,
        ctx: &IterationContext<Session>,
    ) -> anyhow::Result<()> {
        let body = TransactionBody {
            contract_number: format!("CTR-{}-{}", ctx.vu_id(), ctx.iteration()),
            otr: self.params.next_otr(),
            admin_fee: ADMIN_FEE,
            installment_amount: INSTALLMENT_AMOUNT,
            interest_amount: INTEREST_AMOUNT,
            asset_name: ASSET_NAME,
            tenor: self.params.next_tenor(),
        };
        let http = HttpRequest::post_json(self.target.transaction_url(), &body)
            .context("failed to encode transaction request")?
            .with_header("X-API-KEY", self.target.api_key.as_str())
            .with_header("Authorization", format!("Bearer {}", ctx.run().access_token));

        let res = self
            .runner
            .execute(ctx.scope(), Request::new(http).name("create_transaction"))
            .await;

        let created_or_rejected: Predicate<'_> =
            &|r: &Response| r.status == 201 || r.status == 400;
        self.runner.check(
            ctx.scope(),
            &res,
            &[(CHECK_CREATED_OR_REJECTED, created_or_rejected)],
        );

        let tally = match res.status {
            201 => TRANSACTIONS_CREATED,
            400 => TRANSACTIONS_REJECTED,
            status => {
                tracing::warn!(
                    vu = ctx.vu_id(),
                    contract = %body.contract_number,
                    status,
                    error = %error_detail(&res),
                    "unexpected transaction status"
                );
                anyhow::bail!("unexpected status {status}");
            }
        };
        ctx.sink()
            .record(Observation::counter(tally, 1).with_tags(ctx.scope().tags()));
        Ok(())
    }
}

/// The `error` field of a JSON body, else the transport error, else the raw body.
fn error_detail(res: &Response) -> String {
    if let Some(msg) = res
        .json_field("error")
        .and_then(|v| v.as_str().map(str::to_string))
    {
        return msg;
    }
    if let Some(err) = &res.error {
        return err.to_string();
    }
    let text = res.text();
    if text.is_empty() {
        "<empty body>".to_string()
    } else {
        text.into_owned()
    }
}

/// How many transactions the target admitted against how many it should have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct RaceReport {
    pub created: u64,
    pub rejected: u64,
    pub admissible: u64,
    pub detected: bool,
}

impl RaceReport {
    pub(crate) fn from_snapshot(snapshot: &Snapshot, admissible: u64) -> Self {
        let created = snapshot.counter_total(TRANSACTIONS_CREATED);
        Self {
            created,
            rejected: snapshot.counter_total(TRANSACTIONS_REJECTED),
            admissible,
            detected: created > admissible,
        }
    }
}
