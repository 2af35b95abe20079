//! 领域模型错误定义
//!
//! `DomainError` 描述输入校验与业务规则违反，`RepositoryError` 描述持久化端口的失败。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 输入不合法（缺失、格式错误、自引用）
    #[error("参数无效: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 账号不存在
    #[error("账号不存在: {0}")]
    AccountNotFound(String),

    /// 好友请求不存在
    #[error("好友请求不存在: {0}")]
    FriendRequestNotFound(String),

    /// 会话不存在（或调用者不是参与者）
    #[error("会话不存在: {0}")]
    ConversationNotFound(String),

    /// 消息不存在
    #[error("消息不存在: {0}")]
    MessageNotFound(String),

    /// 用户名已被占用
    #[error("用户名已存在: {0}")]
    HandleTaken(String),

    /// 邮箱已被占用
    #[error("邮箱已存在: {0}")]
    EmailTaken(String),

    /// 双方之间已有待处理的好友请求（不区分方向）
    #[error("好友请求已存在")]
    FriendRequestAlreadyPending,

    /// 已经是好友
    #[error("已经是好友")]
    AlreadyFriends,

    /// 好友请求已处理，不能再次响应
    #[error("好友请求已处理: {0}")]
    FriendRequestAlreadyResolved(String),

    /// 已经屏蔽该用户
    #[error("用户已被屏蔽")]
    AlreadyBlocked,

    /// 只有接收者可以响应好友请求
    #[error("只能响应发给自己的好友请求")]
    NotRequestReceiver,

    /// 只有发送者可以删除消息
    #[error("只能删除自己发送的消息")]
    NotMessageSender,
}

impl DomainError {
    /// 创建参数无效错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 持久化端口错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// 引用的记录不存在
    #[error("record not found")]
    NotFound,

    /// 违反唯一约束，`constraint` 为约束名
    #[error("unique constraint violated: {constraint}")]
    Conflict { constraint: String },

    /// 存储层故障，可原样重试
    #[error("storage failure: {message}")]
    Storage { message: String },

    /// 存储中的数据无法还原为领域对象
    #[error("corrupted record: {message}")]
    Corrupted { message: String },
}

impl RepositoryError {
    pub fn conflict(constraint: impl Into<String>) -> Self {
        Self::Conflict {
            constraint: constraint.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// 是否为指定约束上的冲突
    pub fn is_conflict_on(&self, name: &str) -> bool {
        matches!(self, Self::Conflict { constraint } if constraint == name)
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
