//! Wire error taxonomy shared by the server (producing these bodies) and the client
//! (parsing them to decide retry behavior, e.g. `missing_nodes` on commit).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Gone,
    Conflict,
    /// A commit referenced nodes the server doesn't have; distinct from a generic
    /// `conflict` even though both map to HTTP 409.
    MissingNodes,
    HashMismatch,
    InvalidNode,
    QuotaExceeded,
    InvalidRequest,
    Internal,
}

impl ErrorCode {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::Gone => 410,
            ErrorCode::Conflict => 409,
            ErrorCode::MissingNodes => 409,
            ErrorCode::HashMismatch => 400,
            ErrorCode::InvalidNode => 400,
            ErrorCode::QuotaExceeded => 400,
            ErrorCode::InvalidRequest => 400,
            ErrorCode::Internal => 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorCode,
    pub message: String,
    /// Present only on `invalid_node` responses from a commit: the keys the admitter
    /// could not resolve, so the client's buffered writer knows what to retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_nodes: Option<Vec<String>>,
}

impl ErrorBody {
    pub fn new(error: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
            missing_nodes: None,
        }
    }

    pub fn with_missing_nodes(mut self, keys: Vec<String>) -> Self {
        self.missing_nodes = Some(keys);
        self
    }
}
