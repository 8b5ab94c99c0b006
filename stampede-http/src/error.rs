use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse cause of a failed exchange, stable enough to tag metrics with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum HttpTransportErrorKind {
    InvalidUrl,
    InvalidHeader,
    Connect,
    Request,
    Timeout,
    Body,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`{0}` is not an http:// or https:// URL")]
    InvalidUrl(String),

    #[error("invalid header `{name}`: {source}")]
    InvalidHeader {
        name: String,
        #[source]
        source: http::Error,
    },

    #[error("could not connect: {0}")]
    Connect(#[source] hyper_util::client::legacy::Error),

    #[error("request failed: {0}")]
    Request(#[source] hyper_util::client::legacy::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read response body: {0}")]
    Body(#[from] hyper::Error),
}

impl From<hyper_util::client::legacy::Error> for Error {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        if err.is_connect() {
            Self::Connect(err)
        } else {
            Self::Request(err)
        }
    }
}

impl Error {
    #[must_use]
    pub fn transport_error_kind(&self) -> HttpTransportErrorKind {
        match self {
            Self::InvalidUrl(_) => HttpTransportErrorKind::InvalidUrl,
            Self::InvalidHeader { .. } => HttpTransportErrorKind::InvalidHeader,
            Self::Connect(_) => HttpTransportErrorKind::Connect,
            Self::Request(_) => HttpTransportErrorKind::Request,
            Self::Timeout(_) => HttpTransportErrorKind::Timeout,
            Self::Body(_) => HttpTransportErrorKind::Body,
        }
    }
}
