use std::fmt;

/// Errors that abort the current migration stage.
///
/// Per-resource problems that should not stop a run are collected as
/// [`ResourceFailure`] values instead.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Malformed user input. Never retried.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A name or URL is already claimed by something else.
    #[error("{message} (conflicting entries: {count})")]
    Conflict { message: String, count: usize },

    /// Mapping validation found entries that failed syntax or existence checks.
    #[error("invalid entries in '{file}': {count}")]
    InvalidMapping { file: String, count: usize },

    /// The IaC runner or a cloud API call failed.
    #[error("{context}: {message}")]
    ExternalTool { context: String, message: String },

    /// The git provider needs an OAuth authorization before it can be used.
    #[error("authorization required, open {authorize_url}")]
    AuthRequired { authorize_url: String },

    /// The operator interrupted the run.
    #[error("operation cancelled by user")]
    Cancelled,

    #[error("failed to parse '{file}': {message}")]
    Codec { file: String, message: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl MigrationError {
    pub fn external(context: impl Into<String>, message: impl fmt::Display) -> Self {
        MigrationError::ExternalTool { context: context.into(), message: message.to_string() }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        MigrationError::Io { context: context.into(), source }
    }
}

/// A candidate identifier, name, tag or URL broke a format rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field} '{value}': {rule}")]
pub struct ValidationError {
    pub field: &'static str,
    pub value: String,
    pub rule: String,
}

impl ValidationError {
    pub fn new(field: &'static str, value: &str, rule: impl Into<String>) -> Self {
        Self { field, value: value.to_string(), rule: rule.into() }
    }
}

/// One resource in the graph could not be rewritten or validated.
/// The run continues; these are reported in the final warning table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFailure {
    pub resource: String,
    pub reason: String,
}

impl ResourceFailure {
    pub fn new(resource: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self { resource: resource.into(), reason: reason.to_string() }
    }
}

impl fmt::Display for ResourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource, self.reason)
    }
}
