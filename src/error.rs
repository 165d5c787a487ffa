//! Error types for pz-client operations.
//!
//! Defines error types for the major subsystems:
//! - Remote API communication (transport and application failures)
//! - Process orchestration (pipelines, submissions, polling)
//! - Product upload workflow (files, columns, finalization)
//! - Post-registration product operations

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while talking to the remote API.
///
/// Transport failures (timeout, connection refused) and application-level
/// rejections (4xx/5xx with a message body) are reported uniformly; the
/// client never retries on its own.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Failed to parse API response: {0}")]
    Parse(String),

    #[error("Lookup of {entity} '{name}' returned {count} records, expected exactly one")]
    NotUnique {
        entity: String,
        name: String,
        count: u64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while orchestrating a remote process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Pipeline '{0}' not found")]
    PipelineNotFound(String),

    #[error("Release '{0}' not found")]
    ReleaseNotFound(String),

    #[error("Product lookup '{query}' matched {matches} records, expected exactly one")]
    ProductLookup { query: String, matches: u64 },

    #[error("Product '{product}' has type id {type_id}, which pipeline '{pipeline}' does not accept")]
    TypeMismatch {
        product: String,
        type_id: i64,
        pipeline: String,
    },

    #[error("No input catalog bound; set one before running")]
    MissingInput,

    #[error("No release selected; set one before running")]
    MissingRelease,

    #[error("Malformed {entity} record: {reason}")]
    MalformedRecord { entity: String, reason: String },

    #[error("API error: {0}")]
    Api(#[from] ClientError),
}

/// Errors that can occur during the upload workflow.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Product type not found: {0}")]
    ProductTypeNotFound(String),

    #[error("Release not found: {0}")]
    ReleaseNotFound(String),

    #[error("Column '{0}' is not among the columns discovered for this product")]
    UnknownColumn(String),

    #[error("Required columns not filled: {}", .0.join(", "))]
    RequiredColumnsMissing(Vec<String>),

    #[error("Malformed server response: {0}")]
    Malformed(String),

    #[error("API error: {0}")]
    Api(#[from] ClientError),
}

/// Errors raised by operations on an already-registered product.
#[derive(Debug, Error)]
pub enum ProductError {
    #[error("Product '{0}' not found")]
    NotFound(String),

    #[error("Not the owner of product {0}; mutation refused")]
    NotOwner(i64),

    #[error("Product {0} has no registered main file")]
    MissingMainFile(i64),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("API error: {0}")]
    Api(#[from] ClientError),
}
