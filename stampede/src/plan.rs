//! YAML run plan: target, scenarios, thresholds and run-level settings.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use stampede_core::config::{
    ConfigError, RunOverrides, ScenarioConfig, ScenarioOptions, Stage, scenarios_from_options,
};
use stampede_core::{RunPlan, Threshold};

use crate::workload::Target;

/// Default number of transactions the target is allowed to admit before a race is reported.
pub(crate) const DEFAULT_ADMISSIBLE_SUCCESSES: u64 = 1;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PlanYaml {
    target: TargetYaml,

    #[serde(default)]
    scenarios: Vec<ScenarioYaml>,

    #[serde(default)]
    thresholds: BTreeMap<String, ThresholdYaml>,

    /// Run-level safety timeout.
    #[serde(default)]
    max_duration: Option<YamlDuration>,

    #[serde(default)]
    fail_on_inconclusive: bool,

    #[serde(default)]
    admissible_successes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TargetYaml {
    base_url: String,
    api_key: String,
    email: String,
    password: String,

    /// Per-request timeout.
    #[serde(default)]
    timeout: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ScenarioYaml {
    /// Scenario name (metrics scenario tag).
    name: Option<String>,

    /// Scenario-level tags.
    #[serde(default, deserialize_with = "deserialize_tags")]
    tags: BTreeMap<String, String>,

    /// Executor kind: constant-vus | ramping-vus | shared-iterations
    executor: Option<String>,

    vus: Option<u64>,

    #[serde(default)]
    duration: Option<YamlDuration>,

    // ramping-vus
    #[serde(rename = "startVUs")]
    start_vus: Option<u64>,

    #[serde(default)]
    stages: Vec<StageYaml>,

    /// linear | immediate
    ramp: Option<String>,

    // shared-iterations
    iterations: Option<u64>,

    #[serde(default)]
    max_duration: Option<YamlDuration>,

    #[serde(default)]
    start_offset: Option<YamlDuration>,

    #[serde(default)]
    graceful_stop: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct StageYaml {
    target: u64,
    duration: YamlDuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ExpressionsYaml {
    One(String),
    Many(Vec<String>),
}

impl ExpressionsYaml {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ThresholdYaml {
    Expressions(ExpressionsYaml),
    Detailed {
        #[serde(alias = "expression")]
        expressions: ExpressionsYaml,
        #[serde(default = "required_by_default")]
        required: bool,
    },
}

fn required_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(|e| E::custom(format!("invalid duration {v}: {e}")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

fn deserialize_tags<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();

    for (k, v) in raw {
        let s = match v {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => continue,
        };
        out.insert(k, s);
    }

    Ok(out)
}

/// A parsed plan. Scenarios stay unvalidated until CLI overrides are known.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub target: Target,
    pub scenarios: Vec<ScenarioOptions>,
    pub thresholds: Vec<Threshold>,
    pub max_duration: Option<Duration>,
    pub fail_on_inconclusive: bool,
    pub admissible_successes: u64,
}

impl Plan {
    /// Applies CLI overrides and validates every scenario.
    pub fn scenarios(&self, overrides: &RunOverrides) -> Result<Vec<ScenarioConfig>, ConfigError> {
        scenarios_from_options(self.scenarios.clone(), overrides)
    }

    pub fn run_plan(&self, overrides: &RunOverrides) -> Result<RunPlan, ConfigError> {
        if self.max_duration.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidRunMaxDuration);
        }
        let mut plan =
            RunPlan::new(self.scenarios(overrides)?).with_thresholds(self.thresholds.clone());
        plan.max_duration = self.max_duration;
        plan.fail_on_inconclusive = self.fail_on_inconclusive;
        Ok(plan)
    }
}

pub(crate) async fn load_plan(path: &Path) -> anyhow::Result<Plan> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read run plan: {}", path.display()))?;
    let default_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("main");
    parse_plan(&text, default_name)
        .with_context(|| format!("invalid run plan: {}", path.display()))
}

/// `default_name` names a lone unnamed scenario; with several, unnamed ones become
/// `scenario_<n>`.
pub(crate) fn parse_plan(text: &str, default_name: &str) -> anyhow::Result<Plan> {
    let doc: PlanYaml = serde_yaml::from_str(text).context("failed to parse YAML")?;

    let total = doc.scenarios.len();
    let scenarios = doc
        .scenarios
        .into_iter()
        .enumerate()
        .map(|(idx, scenario)| {
            let fallback = if total <= 1 {
                default_name.to_string()
            } else {
                format!("scenario_{}", idx + 1)
            };
            scenario_yaml_into_options(scenario, fallback)
        })
        .collect();

    let thresholds = parse_thresholds_map(doc.thresholds)?;

    let target = Target {
        base_url: doc.target.base_url.trim_end_matches('/').to_string(),
        api_key: doc.target.api_key,
        email: doc.target.email,
        password: doc.target.password,
        timeout: doc.target.timeout.map(YamlDuration::into_inner),
    };

    Ok(Plan {
        target,
        scenarios,
        thresholds,
        max_duration: doc.max_duration.map(YamlDuration::into_inner),
        fail_on_inconclusive: doc.fail_on_inconclusive,
        admissible_successes: doc
            .admissible_successes
            .unwrap_or(DEFAULT_ADMISSIBLE_SUCCESSES),
    })
}

fn scenario_yaml_into_options(scenario: ScenarioYaml, default_name: String) -> ScenarioOptions {
    let ScenarioYaml {
        name,
        tags,
        executor,
        vus,
        duration,
        start_vus,
        stages,
        ramp,
        iterations,
        max_duration,
        start_offset,
        graceful_stop,
    } = scenario;

    ScenarioOptions {
        name: name.unwrap_or(default_name),
        tags: tags.into_iter().collect(),
        executor,
        vus,
        duration: duration.map(YamlDuration::into_inner),
        start_vus,
        stages: stages
            .into_iter()
            .map(|s| Stage {
                duration: s.duration.into_inner(),
                target: s.target,
            })
            .collect(),
        ramp,
        iterations,
        max_duration: max_duration.map(YamlDuration::into_inner),
        start_offset: start_offset.map(YamlDuration::into_inner),
        graceful_stop: graceful_stop.map(YamlDuration::into_inner),
    }
}

fn parse_thresholds_map(map: BTreeMap<String, ThresholdYaml>) -> anyhow::Result<Vec<Threshold>> {
    let mut out = Vec::new();
    for (key, entry) in map {
        let (expressions, required) = match entry {
            ThresholdYaml::Expressions(e) => (e.into_vec(), true),
            ThresholdYaml::Detailed {
                expressions,
                required,
            } => (expressions.into_vec(), required),
        };
        if expressions.is_empty() {
            anyhow::bail!("threshold `{key}` has no expressions");
        }
        for expr in expressions {
            let t = Threshold::parse(&key, &expr, required)
                .with_context(|| format!("invalid threshold `{key}`: `{expr}`"))?;
            out.push(t);
        }
    }
    Ok(out)
}
