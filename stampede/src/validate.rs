use stampede_core::config::RunOverrides;

use crate::cli::ValidateArgs;
use crate::plan;
use crate::run_error::{RunError, classify_core_error};

/// Parses and validates a plan without contacting the target.
pub(crate) async fn validate(args: ValidateArgs) -> Result<(), RunError> {
    let plan = plan::load_plan(&args.plan)
        .await
        .map_err(RunError::InvalidInput)?;
    let run_plan = plan
        .run_plan(&RunOverrides::default())
        .map_err(|e| classify_core_error(e.into()))?;

    tracing::debug!(plan = %args.plan.display(), "plan is valid");
    println!(
        "{}: ok ({} scenario(s), {} threshold(s), target {})",
        args.plan.display(),
        run_plan.scenarios.len(),
        run_plan.thresholds.len(),
        plan.target.base_url
    );
    for s in &run_plan.scenarios {
        println!("  {} ({})", s.name, s.executor.kind());
    }
    Ok(())
}
