use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::authenticator::AuthError;

/// 应用层错误。
///
/// 发送流程中返回的任何错误都发生在持久化之前：消息没有写入历史，也没有投递给任何人。
/// 持久化之后的投递失败只会记录日志，不会以错误形式返回。
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("validation failed: {0}")]
    Validation(DomainError),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl ApplicationError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::StorageUnavailable(message.into())
    }

    /// 稳定的错误码，供 HTTP 与 WebSocket 响应使用
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Unauthorized(_) => "UNAUTHORIZED",
            ApplicationError::NotFound(_) => "NOT_FOUND",
            ApplicationError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            ApplicationError::Validation(_) => "INVALID_ARGUMENT",
            ApplicationError::Conflict(_) => "CONFLICT",
        }
    }

    /// 客户端可以原样重试（配合 client_message_id 不会产生重复消息）
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApplicationError::StorageUnavailable(_))
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => ApplicationError::not_found("resource not found"),
            RepositoryError::Conflict => {
                ApplicationError::Conflict("resource already exists".to_string())
            }
            RepositoryError::Storage { message } => ApplicationError::StorageUnavailable(message),
        }
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Unauthenticated => ApplicationError::unauthorized(value.to_string()),
            other => ApplicationError::Validation(other),
        }
    }
}

impl From<AuthError> for ApplicationError {
    fn from(value: AuthError) -> Self {
        ApplicationError::Unauthorized(value.to_string())
    }
}
