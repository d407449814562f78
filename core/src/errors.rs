//! Error types for breaker, channel and configuration operations

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Errors returned by [`FaultBreaker::execute`](crate::FaultBreaker::execute)
/// and [`FaultBreaker::call`](crate::FaultBreaker::call)
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Breaker is open, the operation was not invoked
    Open { dependency: String, retry_in: Duration },
    /// Breaker is half-open and another recovery probe is still running
    ProbeInFlight { dependency: String },
    /// The wrapped operation failed; the original error is carried untouched
    Dependency(E),
}

impl<E> BreakerError<E> {
    /// True when the breaker rejected the call without invoking the operation
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BreakerError::Dependency(_))
    }

    /// Name of the protected dependency, for rejections
    pub fn dependency(&self) -> Option<&str> {
        match self {
            BreakerError::Open { dependency, .. } | BreakerError::ProbeInFlight { dependency } => {
                Some(dependency)
            }
            BreakerError::Dependency(_) => None,
        }
    }

    /// Recover the original dependency failure, if that is what this is
    pub fn into_dependency(self) -> Option<E> {
        match self {
            BreakerError::Dependency(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open {
                dependency,
                retry_in,
            } => write!(
                f,
                "Breaker is OPEN for '{}' (retry in {:.3}s)",
                dependency,
                retry_in.as_secs_f64()
            ),
            BreakerError::ProbeInFlight { dependency } => {
                write!(f, "Breaker for '{}' is probing recovery", dependency)
            }
            // Dependency failures surface exactly as the dependency reported them
            BreakerError::Dependency(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl<E: Error + 'static> Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BreakerError::Dependency(e) => e.source(),
            _ => None,
        }
    }
}

/// Error raised by an event handler
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// A single handler failure collected during a publish
#[derive(Debug)]
pub struct HandlerFailure {
    /// Position of the handler in the topic's registration order
    pub index: usize,
    pub error: HandlerError,
}

/// One or more handlers failed while an event was being dispatched
///
/// Every registered handler was still invoked; this reports the failures
/// in registration order.
#[derive(Debug, thiserror::Error)]
#[error("{} of {delivered} handler(s) failed for event '{event}'", .failures.len())]
pub struct PublishError {
    pub event: String,
    pub delivered: usize,
    pub failures: Vec<HandlerFailure>,
}

/// Errors from registering a handler
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("topic '{topic}' already has the maximum of {limit} subscribers")]
    Capacity { topic: String, limit: usize },
}

/// Errors from loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field} must be greater than 0")]
    InvalidThreshold { field: &'static str },
    #[error("recovery_timeout_secs must be a positive, finite number of seconds, got {0}")]
    InvalidTimeout(f64),
    #[error("jitter_factor must be within 0.0..=1.0, got {0}")]
    InvalidJitter(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct GatewayDown;

    impl fmt::Display for GatewayDown {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("gateway down")
        }
    }

    impl Error for GatewayDown {}

    #[test]
    fn test_dependency_error_displays_unchanged() {
        let err: BreakerError<GatewayDown> = BreakerError::Dependency(GatewayDown);
        assert_eq!(err.to_string(), "gateway down");
        assert!(!err.is_rejection());
        assert!(err.dependency().is_none());
        assert!(matches!(err.into_dependency(), Some(GatewayDown)));
    }

    #[test]
    fn test_open_error_names_dependency() {
        let err: BreakerError<GatewayDown> = BreakerError::Open {
            dependency: "payments".to_string(),
            retry_in: Duration::from_millis(1500),
        };
        assert!(err.is_rejection());
        assert_eq!(err.dependency(), Some("payments"));
        assert_eq!(
            err.to_string(),
            "Breaker is OPEN for 'payments' (retry in 1.500s)"
        );
    }

    #[test]
    fn test_capacity_error_message() {
        let err = SubscribeError::Capacity {
            topic: "order.created".to_string(),
            limit: 2,
        };
        assert_eq!(
            err.to_string(),
            "topic 'order.created' already has the maximum of 2 subscribers"
        );
    }
}
