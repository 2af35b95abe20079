use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::auth::AuthError;
use crate::broadcaster::BroadcastError;

/// 对外暴露的错误分类，调用方据此决定响应方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    Conflict,
    NotFound,
    Forbidden,
    Transient,
    Unauthenticated,
    Internal,
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApplicationError {
    pub fn internal(message: impl Into<String>) -> Self {
        ApplicationError::Internal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApplicationError::Domain(err) => match err {
                DomainError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
                DomainError::AccountNotFound(_)
                | DomainError::FriendRequestNotFound(_)
                | DomainError::ConversationNotFound(_)
                | DomainError::MessageNotFound(_) => ErrorKind::NotFound,
                DomainError::HandleTaken(_)
                | DomainError::EmailTaken(_)
                | DomainError::FriendRequestAlreadyPending
                | DomainError::AlreadyFriends
                | DomainError::FriendRequestAlreadyResolved(_)
                | DomainError::AlreadyBlocked => ErrorKind::Conflict,
                DomainError::NotRequestReceiver | DomainError::NotMessageSender => {
                    ErrorKind::Forbidden
                }
            },
            ApplicationError::Repository(err) => match err {
                RepositoryError::NotFound => ErrorKind::NotFound,
                RepositoryError::Conflict { .. } => ErrorKind::Conflict,
                RepositoryError::Storage { .. } => ErrorKind::Transient,
                RepositoryError::Corrupted { .. } => ErrorKind::Internal,
            },
            ApplicationError::Broadcast(_) | ApplicationError::Internal(_) => ErrorKind::Internal,
            ApplicationError::Authentication(_) => ErrorKind::Unauthenticated,
        }
    }

    /// 返回给客户端的错误信息。内部错误会记录日志，客户端只看到通用描述。
    pub fn client_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => {
                tracing::error!(error = %self, "内部错误");
                "internal server error".to_string()
            }
            ErrorKind::Transient => "service temporarily unavailable, please retry".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}
