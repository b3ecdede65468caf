use thiserror::Error;

/// Failures a content session can run into.
///
/// Only the variants for which [`AccessError::aborts_session`] is true stop a
/// session; the rest are logged and the session carries on degraded.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AccessError {
    #[error("please sign in again to open this title")]
    AuthRequired,

    #[error("content identifier is missing or invalid: {0:?}")]
    InvalidContentId(String),

    #[error("unknown content type: {0:?}")]
    UnknownContentKind(String),

    #[error("content could not be loaded: {0}")]
    StreamUnavailable(String),

    #[error("progress sync failed: {0}")]
    SyncFailed(String),

    #[error("content protection unavailable: {0}")]
    GuardUnavailable(String),

    #[error("no content session is open")]
    NoActiveSession,

    #[error("not allowed while the session is {0}")]
    InvalidState(&'static str),
}

impl AccessError {
    pub fn aborts_session(&self) -> bool {
        matches!(
            self,
            AccessError::AuthRequired
                | AccessError::InvalidContentId(_)
                | AccessError::UnknownContentKind(_)
                | AccessError::StreamUnavailable(_)
        )
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_start_failures_abort() {
        assert!(AccessError::AuthRequired.aborts_session());
        assert!(AccessError::StreamUnavailable("403".into()).aborts_session());
        assert!(AccessError::InvalidContentId(String::new()).aborts_session());
        assert!(!AccessError::SyncFailed("timeout".into()).aborts_session());
        assert!(!AccessError::GuardUnavailable("detached".into()).aborts_session());
    }
}
