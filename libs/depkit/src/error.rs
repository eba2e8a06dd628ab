use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Component kinds known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Singleton,
    Action,
    Plugin,
    Service,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Kind::Singleton => "singleton",
            Kind::Action => "action",
            Kind::Plugin => "plugin",
            Kind::Service => "service",
        })
    }
}

/// Structured errors for the broker and its registry.
#[derive(Debug, Error)]
pub enum BrokerError {
    // Configuration errors, raised before the graph is touched
    #[error("invalid broker configuration:\n{errors:#?}")]
    InvalidConfiguration { errors: Vec<String> },
    #[error("{kind} '{component}' depends on unknown {depends_on_kind} '{depends_on}'")]
    UnknownDependency {
        kind: Kind,
        component: String,
        depends_on_kind: Kind,
        depends_on: String,
    },
    #[error("invalid {kind} name '{name}': {reason}")]
    InvalidName {
        kind: Kind,
        name: String,
        reason: &'static str,
    },

    // Resolution errors
    #[error("cyclic {kind} dependency detected: {}", path.join(" -> "))]
    Cycle { kind: Kind, path: Vec<String> },
    #[error("action '{action}' requires singleton '{singleton}' which service '{service}' does not resolve; add it to the service's singletons")]
    UnresolvedDependency {
        service: String,
        action: String,
        singleton: String,
    },
    #[error("compose routine of action '{action}' did not return a callable")]
    ContractViolation { action: String },
    #[error("unknown {kind} '{name}'")]
    NotFound { kind: Kind, name: String },
    #[error("action '{action}' does not declare {kind} '{name}'; it cannot be overridden")]
    UnknownOverride {
        action: String,
        kind: Kind,
        name: String,
    },

    // Routine failures
    #[error("start failed for singleton '{singleton}'")]
    Start {
        singleton: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("compose failed for action '{action}'")]
    Compose {
        action: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("plugin '{plugin}' failed")]
    Plugin {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("start handler failed for service '{service}'")]
    ServiceStart {
        service: String,
        #[source]
        source: anyhow::Error,
    },

    // Runner
    #[error("service '{service}' did not start within {timeout:?}")]
    StartTimeout { service: String, timeout: Duration },
}

impl BrokerError {
    pub(crate) fn not_found(kind: Kind, name: impl Into<String>) -> Self {
        BrokerError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// True for errors raised by registry validation or resolution, i.e. before
    /// any routine ran for the failing call.
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            BrokerError::InvalidConfiguration { .. }
                | BrokerError::UnknownDependency { .. }
                | BrokerError::InvalidName { .. }
                | BrokerError::Cycle { .. }
                | BrokerError::UnresolvedDependency { .. }
                | BrokerError::NotFound { .. }
                | BrokerError::UnknownOverride { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_the_chain() {
        let err = BrokerError::Cycle {
            kind: Kind::Singleton,
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "cyclic singleton dependency detected: a -> b -> a"
        );
        assert!(err.is_resolution_error());
    }

    #[test]
    fn routine_failures_keep_their_source() {
        let err = BrokerError::Start {
            singleton: "db".into(),
            source: anyhow::anyhow!("connection refused"),
        };
        assert!(!err.is_resolution_error());
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("connection refused"));
    }
}
