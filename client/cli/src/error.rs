//! Client-side error types. Grounded on the teacher's `anyhow`-at-the-boundary style, with
//! one dedicated type for the buffered writer's terminal commit failure: the retry loop is
//! bounded and raises a terminal error on exhaustion.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("server returned {status} {code}: {message}")]
    Server {
        status: u16,
        code: String,
        message: String,
    },
    #[error("commit referenced {0}, which was never staged in this buffer")]
    UnstagedMissingNode(String),
    #[error("commit did not succeed after {attempts} attempts, last missing: {last_missing:?}")]
    CommitExhausted {
        attempts: u32,
        last_missing: Vec<String>,
    },
    #[error("uploaded bytes for {key} did not match the expected digest (server reported {actual})")]
    HashMismatch { key: String, actual: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
