//! Error types for probe resolution and invocation

use thiserror::Error;

/// Errors raised while resolving or evaluating a load probe.
///
/// Only `Configuration` and `Storage` ever leave the crate through the
/// active-probe lookup. The remaining variants are produced while
/// evaluating a probe and are folded into the caller's default value by
/// [`ProbeInvoker::call`](crate::probe::ProbeInvoker::call).
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Invalid call arguments {expression:?}: {message}")]
    Configuration { expression: String, message: String },

    #[error("Load probe query \"{query}\" raised error \"{source}\"")]
    Execution {
        query: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("No result from load probe \"{probe}\"")]
    EmptyResult { probe: String },

    #[error("Cannot convert \"{value}\" to a number")]
    Type { value: String },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Errors surfaced to an operator who triggers a probe by hand.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Operation not allowed")]
    Unauthorized,

    #[error("Function raised an error: {0}")]
    Raised(sqlx::Error),

    #[error("Function did not return a result")]
    NoResult,

    #[error(transparent)]
    Configuration(ProbeError),
}

impl ProbeError {
    pub fn configuration(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            expression: expression.into(),
            message: message.into(),
        }
    }

    pub fn type_error(value: impl Into<String>) -> Self {
        Self::Type { value: value.into() }
    }
}
