pub mod audit;
pub mod holmes;
pub mod policy;

use crate::util::backoff::ErrorClass;

/// A failed call to an external dependency, classified for the retry
/// engine.
#[derive(Clone, Debug)]
pub struct CallFailure {
    pub class: ErrorClass,
    pub message: String,
}

impl CallFailure {
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        CallFailure {
            class: crate::util::backoff::classify_reqwest(err),
            message: err.to_string(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        CallFailure {
            class: ErrorClass::Permanent,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.class.as_str())
    }
}
