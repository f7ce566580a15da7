// src/error.rs
//! Error taxonomy shared across the pipeline.
//!
//! Plumbing code uses `anyhow`; the types here exist where a caller has to
//! branch on what went wrong (budget scope, command failures, machine codes).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which ceiling a request would have crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetScope {
    Source,
    Global,
}

impl fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetScope::Source => f.write_str("source"),
            BudgetScope::Global => f.write_str("global"),
        }
    }
}

/// Raised before a response body is charged against a byte ceiling.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{scope} byte budget exceeded for source `{source_id}`: {detail}")]
pub struct BudgetExceeded {
    pub scope: BudgetScope,
    pub source_id: String,
    pub detail: String,
}

impl BudgetExceeded {
    pub fn source(source_id: &str, detail: impl Into<String>) -> Self {
        Self {
            scope: BudgetScope::Source,
            source_id: source_id.to_string(),
            detail: detail.into(),
        }
    }

    pub fn global(source_id: &str, detail: impl Into<String>) -> Self {
        Self {
            scope: BudgetScope::Global,
            source_id: source_id.to_string(),
            detail: detail.into(),
        }
    }
}

/// Machine-readable failure code attached to command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DeliveryFailed,
    UnknownCommand,
    InvalidArgument,
    NotFound,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DeliveryFailed => "DELIVERY_FAILED",
            ErrorCode::UnknownCommand => "UNKNOWN_COMMAND",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration format: {0}")]
    InvalidFormat(#[from] serde_json::Error),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("duplicate source id: {id}")]
    DuplicateSource { id: String },
}

/// Failures of the on-demand command surface. Each maps onto an [`ErrorCode`].
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command `{input}`{}", suggestion_suffix(.suggestion))]
    Unknown {
        input: String,
        suggestion: Option<String>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),
}

fn suggestion_suffix(s: &Option<String>) -> String {
    match s {
        Some(s) => format!(" (did you mean `{s}`?)"),
        None => String::new(),
    }
}

impl CommandError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CommandError::Unknown { .. } => ErrorCode::UnknownCommand,
            CommandError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            CommandError::NotFound(_) => ErrorCode::NotFound,
        }
    }
}
