use serde::Serialize;

/// A single field-level validation problem, reported back to the client
/// as part of a 400 response.
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub field: String,
    pub message: String,
}

impl Issue {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Issue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("invalid input")]
    Validation(Vec<Issue>),

    #[error("unauthorized: no valid credential provided")]
    Unauthorized,

    #[error("forbidden: insufficient permissions")]
    Forbidden,

    #[error("reqwest error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(issues: Vec<Issue>) -> Self {
        ApiError::Validation(issues)
    }
}
