//! Error taxonomy for the scanner.
//!
//! `RequestError` classifies transport failures after the retry budget is
//! exhausted; its display strings are the user-facing diagnostics.
//! `ScanError` is the control-flow layer: skip a target, quit, or abort
//! on a configuration problem.

use thiserror::Error;

/// A classified request failure, raised after all retries were consumed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Couldn't resolve DNS")]
    Dns,
    #[error("Unexpected SSL error")]
    Ssl,
    #[error("Too many redirects: {0}")]
    TooManyRedirects(String),
    #[error("Error with the proxy: {0}")]
    Proxy(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid proxy URL: {0}")]
    InvalidProxy(String),
    #[error("Cannot connect to: {0}")]
    Connect(String),
    #[error("Failed to read response body: {0}")]
    BodyRead(String),
    #[error("Request timeout: {0}")]
    Timeout(String),
    #[error("There was a problem in the request to: {0}")]
    Other(String),
}

/// Scan-level failures. `SkipTarget` drops the remaining directories of the
/// current target, `Quit` terminates the whole run.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{0}")]
    InvalidUrl(String),
    #[error("invalid raw request: {0}")]
    InvalidRawRequest(String),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("{0}")]
    SkipTarget(String),
    #[error("{0}")]
    Quit(String),
    #[error("{0}")]
    Session(String),
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
