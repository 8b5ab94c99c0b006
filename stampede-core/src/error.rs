use crate::config::ConfigError;
use crate::thresholds::ThresholdParseError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Threshold(#[from] ThresholdParseError),

    #[error("metric registration failed: {0}")]
    Metrics(#[from] stampede_metrics::Error),
}
