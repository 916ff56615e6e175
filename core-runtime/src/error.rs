use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Host refused subscription for '{target}': {message}")]
    BridgeUnavailable { target: String, message: String },

    #[error("Host rejected query '{key}': {message}")]
    InvalidQuery { key: String, message: String },

    #[error("Query '{key}' cancelled by host ({code}): {message}")]
    QueryCancelled {
        key: String,
        code: String,
        message: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Maps a host refusal for `target` onto the runtime taxonomy.
    pub fn from_bridge(target: &str, err: BridgeError) -> Self {
        match err {
            BridgeError::InvalidQuery(message) => Self::InvalidQuery {
                key: target.to_string(),
                message,
            },
            other => Self::BridgeUnavailable {
                target: target.to_string(),
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bridge_keeps_query_rejections_distinct() {
        let err = Error::from_bridge("k", BridgeError::InvalidQuery("bad filter".into()));
        assert_eq!(
            err,
            Error::InvalidQuery {
                key: "k".into(),
                message: "bad filter".into()
            }
        );

        let err = Error::from_bridge("app_state", BridgeError::NotAvailable("web".into()));
        assert!(matches!(err, Error::BridgeUnavailable { ref target, .. } if target == "app_state"));
    }
}
