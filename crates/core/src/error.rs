use thiserror::Error;

#[derive(Debug, Error)]
pub enum OtelMapError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("ingest error: {0}")]
    Ingest(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OtelMapError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True when the caller supplied a bad token, time or argument.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::Parse(_))
    }
}

pub type Result<T> = std::result::Result<T, OtelMapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_context_and_source() {
        let err = OtelMapError::io(
            "create db dir",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "create db dir: denied");
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_client_error());
        assert!(OtelMapError::Parse("bad time".into()).is_client_error());
    }
}
