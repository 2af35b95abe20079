//! 社交关系与私信系统核心领域模型
//!
//! 包含账号、好友请求、好友关系、屏蔽、会话、消息等核心实体，
//! 以及这些实体自身能够保证的不变量。

pub mod account;
pub mod conversation;
pub mod errors;
pub mod message;
pub mod relationship;
pub mod value_objects;

// 重新导出常用类型
pub use account::{Account, AccountSummary, Presence};
pub use conversation::{Conversation, ConversationKind, ConversationParticipant};
pub use errors::{DomainError, DomainResult, RepositoryError, RepositoryResult};
pub use message::{Attachment, Message, MessageKind};
pub use relationship::{
    BlockedUser, FriendRequest, FriendRequestDecision, FriendRequestStatus, Friendship,
};
pub use value_objects::{
    AccountId, ConversationId, Email, FriendRequestId, Handle, MessageBody, MessageId,
    ParticipantPair, Timestamp,
};
