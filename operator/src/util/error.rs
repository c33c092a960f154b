#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid user input: {0}")]
    UserInput(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Investigation service error: {0}")]
    Investigation(String),

    #[error("Policy evaluation error: {0}")]
    Policy(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP transport error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("Parse duration: {source}")]
    ParseDuration {
        #[from]
        source: parse_duration::parse::Error,
    },
}

/// Classification of a failed reconcile, used to pick between no-op,
/// requeue, and terminal failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureCategory {
    /// The reconciled resource is gone; normal cascade.
    NotFound,
    /// API hiccup; requeue with backoff.
    Transient,
    /// Auth failure; never self-heals.
    PermanentAuth,
    /// Optimistic-concurrency conflict on a status write; re-fetch.
    Conflict,
    /// An external dependency is misconfigured.
    Configuration,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::NotFound => "NotFound",
            FailureCategory::Transient => "Transient",
            FailureCategory::PermanentAuth => "PermanentAuth",
            FailureCategory::Conflict => "Conflict",
            FailureCategory::Configuration => "Configuration",
        }
    }
}

pub fn categorize(err: &Error) -> FailureCategory {
    match err {
        Error::Kube {
            source: kube::Error::Api(ae),
        } => match ae.code {
            404 => FailureCategory::NotFound,
            401 | 403 => FailureCategory::PermanentAuth,
            409 => FailureCategory::Conflict,
            _ => FailureCategory::Transient,
        },
        Error::Configuration(_) => FailureCategory::Configuration,
        Error::UserInput(_) => FailureCategory::Configuration,
        _ => FailureCategory::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::Kube {
            source: kube::Error::Api(Box::new(kube::core::Status {
                status: Some(kube::core::response::StatusSummary::Failure),
                message: String::new(),
                reason: String::new(),
                code,
                metadata: None,
                details: None,
            })),
        }
    }

    #[test]
    fn not_found_is_a_silent_noop_category() {
        assert_eq!(categorize(&api_error(404)), FailureCategory::NotFound);
    }

    #[test]
    fn auth_errors_never_requeue() {
        assert_eq!(categorize(&api_error(401)), FailureCategory::PermanentAuth);
        assert_eq!(categorize(&api_error(403)), FailureCategory::PermanentAuth);
    }

    #[test]
    fn conflicts_refetch() {
        assert_eq!(categorize(&api_error(409)), FailureCategory::Conflict);
    }

    #[test]
    fn server_errors_are_transient() {
        assert_eq!(categorize(&api_error(500)), FailureCategory::Transient);
        assert_eq!(categorize(&api_error(503)), FailureCategory::Transient);
    }
}
