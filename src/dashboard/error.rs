//! Error types shared by the dashboard collaborators.
//!
//! None of these reach the rendering tree: the store turns them into a
//! banner message and the refresh engine stores them in its snapshot.

/// Failure reported by a remote collaborator (layout persistence or a
/// widget data endpoint).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request to {url} failed with status {status}")]
    Status { status: u16, url: String },

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("request cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ApiError::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            let url = err.url().map(|u| u.to_string()).unwrap_or_default();
            if status == reqwest::StatusCode::NOT_FOUND {
                return ApiError::NotFound(url);
            }
            return ApiError::Status {
                status: status.as_u16(),
                url,
            };
        }
        ApiError::Network(err.to_string())
    }
}

/// Reasons a persisted layout blob is rejected. The store treats every one
/// of these as "no stored layouts".
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("malformed layout data: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("layout version {found} is older than {current}")]
    Outdated { found: u32, current: u32 },

    #[error("layout set is empty")]
    Empty,
}
