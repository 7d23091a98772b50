//! Error types shared by the engine and its collaborators.

/// Rejections from the ticker command surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickerError {
    /// A ticker for this chat is already scheduling, scheduled or polling.
    #[error("a ticker is already active for chat {chat_id}")]
    AlreadyActive {
        /// Chat id.
        chat_id: String,
    },
    /// The request was malformed; nothing was created.
    #[error("invalid ticker request: {0}")]
    Validation(String),
    /// The engine is shutting down.
    #[error("engine is stopping")]
    EngineStopped,
}

/// Failure to obtain a usable snapshot from the feed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The request exceeded the fetch timeout.
    #[error("feed request timed out")]
    Timeout,
    /// Connection or protocol failure.
    #[error("feed transport error: {0}")]
    Transport(String),
    /// Non-success HTTP status.
    #[error("feed returned http {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },
    /// The payload was not JSON or lacked required fields.
    #[error("malformed feed payload: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// Failure to deliver a chat message. Always local to that one message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Connection or protocol failure.
    #[error("send transport error: {0}")]
    Transport(String),
    /// The chat platform refused the message.
    #[error("message rejected with http {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        SendError::Transport(err.to_string())
    }
}

/// Why a job did not run to completion.
#[derive(Debug, thiserror::Error)]
pub(crate) enum JobError {
    /// The ticker was removed or changed phase after the job was queued.
    #[error("job no longer matches its ticker")]
    Stale,
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Keep error bodies short enough for a log line.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 300;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
