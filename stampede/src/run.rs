use std::sync::Arc;

use stampede_core::config::RunOverrides;
use stampede_core::{DEFAULT_REQUEST_TIMEOUT, RequestRunner, Scheduler};
use stampede_http::HttpClient;
use stampede_metrics::{MetricSink, Registry};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output::{self, RunReport};
use crate::plan::{self, Plan};
use crate::run_error::{RunError, classify_core_error};
use crate::workload::{RaceReport, SeededParams, TransactionWorkload};

pub(crate) async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let mut plan = plan::load_plan(&args.plan)
        .await
        .map_err(RunError::InvalidInput)?;
    apply_overrides(&mut plan, &args);

    let overrides = RunOverrides {
        vus: args.vus,
        duration: args.duration,
    };
    let run_plan = plan
        .run_plan(&overrides)
        .map_err(|e| classify_core_error(e.into()))?;

    out.print_header(&args.plan, &plan.target, &run_plan.scenarios);

    let registry = Arc::new(Registry::default());
    let sink: Arc<dyn MetricSink> = registry.clone();
    let runner = RequestRunner::new(HttpClient::default(), sink)
        .with_default_timeout(plan.target.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT));
    let workload = Arc::new(TransactionWorkload::new(
        plan.target.clone(),
        runner,
        Arc::new(SeededParams::new(args.seed)),
    ));

    let mut scheduler = Scheduler::new(run_plan, registry).with_setup({
        let workload = workload.clone();
        move |ctx| async move { workload.login(&ctx).await.map_err(|e| format!("{e:#}")) }
    });
    if let Some(on_progress) = out.progress() {
        scheduler = scheduler.with_progress(move |u| on_progress(u));
    }

    let result = scheduler
        .run(move |ctx| {
            let workload = workload.clone();
            async move {
                workload
                    .create_transaction(&ctx)
                    .await
                    .map_err(|e| format!("{e:#}"))
            }
        })
        .await
        .map_err(classify_core_error)?;

    let race = RaceReport::from_snapshot(&result.snapshot, plan.admissible_successes);
    if race.detected {
        tracing::warn!(
            created = race.created,
            admissible = race.admissible,
            "more transactions admitted than allowed"
        );
    }

    let exit_code = ExitCode::from_outcome(&result, race.detected);
    out.print_summary(&RunReport {
        result: &result,
        race,
        exit_code,
    })
    .map_err(RunError::RuntimeError)?;

    Ok(exit_code)
}

fn apply_overrides(plan: &mut Plan, args: &RunArgs) {
    if let Some(url) = &args.base_url {
        plan.target.base_url = url.trim_end_matches('/').to_string();
    }
}
