use thiserror::Error;

/// Error kinds surfaced by the estimation pipeline and its collaborators.
///
/// Transport and subscription errors reach the root supervisor, which
/// restarts the pipeline after a backoff. Parse and arithmetic errors are
/// local: the offending entry or emission is skipped and processing
/// continues.
#[derive(Error, Debug)]
pub enum FeewatchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("block subscription error: {0}")]
    Subscription(String),

    #[error("malformed mempool entry: {0}")]
    Parse(String),

    #[error("arithmetic degeneracy: {0}")]
    Arithmetic(String),
}
