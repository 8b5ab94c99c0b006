use std::sync::Arc;

/// Built-in metric names.
pub mod names {
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQS: &str = "http_reqs";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const CHECKS: &str = "checks";
    pub const ITERATIONS: &str = "iterations";
    pub const ITERATION_DURATION: &str = "iteration_duration";
    pub const VUS: &str = "vus";
    pub const VUS_MAX: &str = "vus_max";
}

/// Scenario name used for observations made by the setup and teardown hooks.
pub const SETUP_SCENARIO: &str = "setup";
pub const TEARDOWN_SCENARIO: &str = "teardown";

/// Tags every observation from one scenario carries: the scenario's declared tags plus
/// `scenario=<name>`.
#[derive(Debug, Clone)]
pub struct MetricScope {
    scenario: Arc<str>,
    tags: Arc<[(String, String)]>,
}

impl MetricScope {
    pub fn new(scenario: &str, declared: &[(String, String)]) -> Self {
        let mut tags: Vec<(String, String)> = declared
            .iter()
            .filter(|(k, _)| k != "scenario")
            .cloned()
            .collect();
        tags.push(("scenario".to_string(), scenario.to_string()));
        Self {
            scenario: Arc::from(scenario),
            tags: Arc::from(tags),
        }
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_tag_cannot_be_shadowed() {
        let scope = MetricScope::new(
            "login",
            &[
                ("env".to_string(), "staging".to_string()),
                ("scenario".to_string(), "other".to_string()),
            ],
        );
        assert_eq!(scope.scenario(), "login");
        assert_eq!(
            scope.tags(),
            &[
                ("env".to_string(), "staging".to_string()),
                ("scenario".to_string(), "login".to_string()),
            ]
        );
    }
}
