use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
pub const DEFAULT_SHARED_ITERATIONS_MAX_DURATION: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

/// How a ramping executor moves between stage targets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::EnumString, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum RampPolicy {
    /// Interpolate from the previous target over the stage duration.
    #[default]
    Linear,
    /// Jump to the stage target at stage entry.
    Immediate,
}

/// Scenario executor kind (the string form used by run declarations and the CLI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
pub enum ScenarioExecutorKind {
    #[strum(to_string = "constant-vus", serialize = "constant")]
    ConstantVus,

    #[strum(to_string = "ramping-vus", serialize = "ramping")]
    RampingVus,

    #[strum(to_string = "shared-iterations")]
    SharedIterations,
}

impl ScenarioExecutorKind {
    #[must_use]
    pub fn is_ramping(self) -> bool {
        matches!(self, Self::RampingVus)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioExecutor {
    ConstantVus {
        vus: u64,
        duration: Duration,
    },

    /// Ramp the number of active VUs up/down over time.
    RampingVus {
        start_vus: u64,
        stages: Vec<Stage>,
        ramp: RampPolicy,
    },

    /// A fixed number of iterations claimed by a fixed pool of VUs.
    SharedIterations {
        vus: u64,
        iterations: u64,
        max_duration: Duration,
    },
}

impl ScenarioExecutor {
    pub fn kind(&self) -> ScenarioExecutorKind {
        match self {
            Self::ConstantVus { .. } => ScenarioExecutorKind::ConstantVus,
            Self::RampingVus { .. } => ScenarioExecutorKind::RampingVus,
            Self::SharedIterations { .. } => ScenarioExecutorKind::SharedIterations,
        }
    }

    /// Upper bound on concurrently live VUs.
    pub fn max_vus(&self) -> u64 {
        match self {
            Self::ConstantVus { vus, .. } | Self::SharedIterations { vus, .. } => *vus,
            Self::RampingVus {
                start_vus, stages, ..
            } => stages
                .iter()
                .map(|s| s.target)
                .max()
                .unwrap_or(0)
                .max(*start_vus),
        }
    }
}

/// A validated scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
    pub name: String,
    /// Attached to every metric the scenario emits.
    pub tags: Vec<(String, String)>,
    /// Delay relative to the run start.
    pub start_offset: Duration,
    /// How long in-flight iterations may run once the scenario starts draining.
    pub graceful_stop: Duration,
    pub executor: ScenarioExecutor,
}

/// Unvalidated scenario fields as declared by the user.
#[derive(Debug, Clone, Default)]
pub struct ScenarioOptions {
    pub name: String,
    pub tags: Vec<(String, String)>,

    /// Scenario executor. If missing, defaults to constant VUs.
    pub executor: Option<String>,

    pub vus: Option<u64>,
    pub duration: Option<Duration>,

    // Ramping VUs
    pub start_vus: Option<u64>,
    pub stages: Vec<Stage>,
    pub ramp: Option<String>,

    // Shared iterations
    pub iterations: Option<u64>,
    pub max_duration: Option<Duration>,

    pub start_offset: Option<Duration>,
    pub graceful_stop: Option<Duration>,
}

/// Command-line overrides. When set they win over the declared values.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub vus: Option<u64>,
    pub duration: Option<Duration>,
}

impl RunOverrides {
    fn is_set(&self) -> bool {
        self.vus.is_some() || self.duration.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one scenario is required")]
    NoScenarios,

    #[error("scenario name must not be empty")]
    EmptyName,

    #[error("duplicate scenario name `{0}`")]
    DuplicateScenario(String),

    #[error(
        "scenario `{scenario}`: invalid `executor` `{value}` (expected `constant-vus`, `ramping-vus`, or `shared-iterations`)"
    )]
    InvalidExecutor { scenario: String, value: String },

    #[error("scenario `{scenario}`: invalid `ramp` `{value}` (expected `linear` or `immediate`)")]
    InvalidRamp { scenario: String, value: String },

    #[error("scenario `{0}`: `vus` must be a positive integer")]
    InvalidVus(String),

    #[error("scenario `{0}`: `duration` must be a positive duration")]
    InvalidDuration(String),

    #[error("scenario `{0}`: `stages` must be a non-empty array of {{ duration, target }} with a positive total duration")]
    InvalidStages(String),

    #[error("scenario `{0}`: ramping stages never reach a positive VU count")]
    RampNeverActive(String),

    #[error("scenario `{0}`: `iterations` must be a positive integer, at least `vus`")]
    InvalidIterations(String),

    #[error("scenario `{0}`: `maxDuration` must be a positive duration")]
    InvalidMaxDuration(String),

    #[error("scenario `{scenario}`: `{field}` does not apply to executor `{executor}`")]
    UnexpectedField {
        scenario: String,
        field: &'static str,
        executor: ScenarioExecutorKind,
    },

    #[error("run `maxDuration` must be a positive duration")]
    InvalidRunMaxDuration,

    #[error("progress interval must be a positive duration")]
    InvalidProgressInterval,
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Validates declared scenarios. CLI overrides take precedence; when one is set on a ramping
/// scenario, the scenario is run as constant VUs and its ramping fields are ignored.
pub fn scenarios_from_options(
    options: Vec<ScenarioOptions>,
    overrides: &RunOverrides,
) -> ConfigResult<Vec<ScenarioConfig>> {
    if options.is_empty() {
        return Err(ConfigError::NoScenarios);
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(options.len());
    for s in options {
        if s.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if !seen.insert(s.name.clone()) {
            return Err(ConfigError::DuplicateScenario(s.name));
        }
        out.push(scenario_from_options(s, overrides)?);
    }
    Ok(out)
}

fn scenario_from_options(
    s: ScenarioOptions,
    overrides: &RunOverrides,
) -> ConfigResult<ScenarioConfig> {
    let executor_name = s.executor.as_deref().unwrap_or("constant-vus");
    let mut kind: ScenarioExecutorKind =
        executor_name
            .parse()
            .map_err(|_| ConfigError::InvalidExecutor {
                scenario: s.name.clone(),
                value: executor_name.to_string(),
            })?;

    if overrides.is_set() && kind.is_ramping() {
        tracing::debug!(
            scenario = %s.name,
            "CLI overrides set; running ramping scenario as constant VUs"
        );
        kind = ScenarioExecutorKind::ConstantVus;
    }

    let unexpected = |field: &'static str| ConfigError::UnexpectedField {
        scenario: s.name.clone(),
        field,
        executor: kind,
    };

    let executor = match kind {
        ScenarioExecutorKind::ConstantVus => {
            if s.iterations.is_some() {
                return Err(unexpected("iterations"));
            }
            let vus = overrides.vus.or(s.vus).unwrap_or(1);
            if vus == 0 {
                return Err(ConfigError::InvalidVus(s.name));
            }
            let stages_total = s
                .stages
                .iter()
                .fold(Duration::ZERO, |acc, st| acc.saturating_add(st.duration));
            let duration = overrides
                .duration
                .or(s.duration)
                .or((!stages_total.is_zero()).then_some(stages_total))
                .filter(|d| !d.is_zero())
                .ok_or_else(|| ConfigError::InvalidDuration(s.name.clone()))?;
            ScenarioExecutor::ConstantVus { vus, duration }
        }
        ScenarioExecutorKind::RampingVus => {
            if s.iterations.is_some() {
                return Err(unexpected("iterations"));
            }
            if s.duration.is_some() {
                return Err(unexpected("duration"));
            }
            let total = s
                .stages
                .iter()
                .fold(Duration::ZERO, |acc, st| acc.saturating_add(st.duration));
            if s.stages.is_empty() || total.is_zero() {
                return Err(ConfigError::InvalidStages(s.name));
            }
            let ramp = match s.ramp.as_deref() {
                None => RampPolicy::default(),
                Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidRamp {
                    scenario: s.name.clone(),
                    value: raw.to_string(),
                })?,
            };
            let start_vus = s.start_vus.unwrap_or(0);
            let executor = ScenarioExecutor::RampingVus {
                start_vus,
                stages: s.stages.clone(),
                ramp,
            };
            if executor.max_vus() == 0 {
                return Err(ConfigError::RampNeverActive(s.name));
            }
            executor
        }
        ScenarioExecutorKind::SharedIterations => {
            if s.duration.is_some() {
                return Err(unexpected("duration"));
            }
            let vus = overrides.vus.or(s.vus).unwrap_or(1);
            if vus == 0 {
                return Err(ConfigError::InvalidVus(s.name));
            }
            let iterations = s.iterations.unwrap_or(1);
            if iterations < vus {
                return Err(ConfigError::InvalidIterations(s.name));
            }
            let max_duration = overrides
                .duration
                .or(s.max_duration)
                .unwrap_or(DEFAULT_SHARED_ITERATIONS_MAX_DURATION);
            if max_duration.is_zero() {
                return Err(ConfigError::InvalidMaxDuration(s.name));
            }
            ScenarioExecutor::SharedIterations {
                vus,
                iterations,
                max_duration,
            }
        }
    };

    Ok(ScenarioConfig {
        tags: s.tags,
        start_offset: s.start_offset.unwrap_or(Duration::ZERO),
        graceful_stop: s.graceful_stop.unwrap_or(DEFAULT_GRACEFUL_STOP),
        executor,
        name: s.name,
    })
}
