//! Errors - エラー型と分類
//!
//! 呼び出し側に見えるのは TaskNotFound / BackendUnavailable /
//! Configuration / IllegalState の 4 種類。残りは callback や serde 由来。

use thiserror::Error;

use super::TaskId;

/// ErrorKind はエラーの運用分類
///
/// - Recoverable: 呼び出し側で扱える（cache miss として再計算など）
/// - Transient: 一時的なエラー（backoff 付きでリトライ）
/// - Fatal: その構築・起動の試みは失敗（自動リトライしない）
/// - CallerBug: 呼び出し順序の誤り（リトライ無意味）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Recoverable,
    Transient,
    Fatal,
    CallerBug,
}

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("backend unavailable ({backend}): {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("illegal state: cannot {operation} while {state}")]
    IllegalState {
        operation: &'static str,
        state: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("{0}")]
    Other(String),
}

impl CourierError {
    pub fn unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub fn handler(reason: impl Into<String>) -> Self {
        Self::Handler(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TaskNotFound(_) => ErrorKind::Recoverable,
            Self::BackendUnavailable { .. } | Self::Handler(_) | Self::Other(_) => {
                ErrorKind::Transient
            }
            Self::Configuration(_) | Self::Serialization(_) => ErrorKind::Fatal,
            Self::IllegalState { .. } => ErrorKind::CallerBug,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TaskNotFound(_))
    }
}

pub type Result<T, E = CourierError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn messages_carry_context() {
        let err = CourierError::TaskNotFound(TaskId::new("t-1"));
        assert_eq!(err.to_string(), "task not found: t-1");

        let err = CourierError::unavailable("memory", "backend closed");
        assert_eq!(err.to_string(), "backend unavailable (memory): backend closed");

        let err = CourierError::IllegalState {
            operation: "stop",
            state: "NotStarted".into(),
        };
        assert_eq!(err.to_string(), "illegal state: cannot stop while NotStarted");
    }

    #[rstest]
    #[case::not_found(CourierError::TaskNotFound(TaskId::new("x")), ErrorKind::Recoverable)]
    #[case::unavailable(CourierError::unavailable("redis", "refused"), ErrorKind::Transient)]
    #[case::config(CourierError::config("missing address"), ErrorKind::Fatal)]
    #[case::handler(CourierError::handler("boom"), ErrorKind::Transient)]
    fn errors_are_classified(#[case] err: CourierError, #[case] expected: ErrorKind) {
        assert_eq!(err.kind(), expected);
    }
}
