use thiserror::Error;

/// Typed failures raised by the controller and its collaborators.
///
/// Only [`ControllerError::Config`] is fatal; everything else is logged and the
/// current cycle continues with whatever facts are available.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Provider error ({provider}): {message}")]
    Provider { provider: &'static str, message: String },
}

impl ControllerError {
    pub fn provider(provider: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Provider {
            provider,
            message: err.to_string(),
        }
    }
}

/// Result of a soft-failing fetch.
///
/// A fetch never aborts a cycle: it either produced a fresh value or fell back
/// to a usable default, and the caller can tell which one it got.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Fresh(T),
    Fallback { value: T, cause: String },
}

impl<T> Fetched<T> {
    pub fn fallback(value: T, cause: impl std::fmt::Display) -> Self {
        Self::Fallback {
            value,
            cause: cause.to_string(),
        }
    }

    /// Collapse a fallible fetch into a soft-failing one.
    pub fn from_result<E: std::fmt::Display>(result: Result<T, E>, default: impl FnOnce() -> T) -> Self {
        match result {
            Ok(value) => Self::Fresh(value),
            Err(err) => Self::fallback(default(), err),
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Fresh(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::Fresh(_) => None,
            Self::Fallback { cause, .. } => Some(cause.as_str()),
        }
    }
}
