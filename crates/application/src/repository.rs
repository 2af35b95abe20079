//! 持久化端口
//!
//! 内存与 PostgreSQL 两个适配器都实现这里的 trait，业务规则只在服务层写一次。
//! 需要原子性的多行操作（同意好友请求、追加消息并更新会话活跃时间）
//! 作为单个端口方法暴露，由适配器负责在一个事务或临界区内完成。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    Account, AccountId, BlockedUser, Conversation, ConversationId, Email, FriendRequest,
    FriendRequestId, Message, MessageId, ParticipantPair, Presence, RepositoryError, Timestamp,
};

/// 唯一约束名称，两个适配器报告冲突时使用同一套名字
pub mod constraints {
    pub const ACCOUNTS_HANDLE: &str = "accounts_handle_key";
    pub const ACCOUNTS_EMAIL: &str = "accounts_email_key";
    pub const FRIEND_REQUESTS_PENDING_PAIR: &str = "friend_requests_pending_pair_key";
    /// 好友请求只能从 pending 状态处理一次
    pub const FRIEND_REQUESTS_PENDING_GUARD: &str = "friend_requests_pending_guard";
    pub const CONVERSATIONS_DIRECT: &str = "conversations_direct_key";
    pub const FRIENDSHIPS: &str = "friendships_pkey";
    pub const BLOCKED_USERS: &str = "blocked_users_pkey";
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn create(&self, account: Account) -> Result<Account, RepositoryError>;
    /// 只改写资料字段（邮箱、头像、更新时间），在线状态保持存储中的当前值。
    /// `None` 表示保留原值。
    async fn update_profile(
        &self,
        id: AccountId,
        email: Option<Email>,
        avatar: Option<String>,
        at: Timestamp,
    ) -> Result<Account, RepositoryError>;
    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, RepositoryError>;
    /// 按标识批量查询，缺失的标识直接跳过
    async fn find_many(&self, ids: &[AccountId]) -> Result<Vec<Account>, RepositoryError>;
    /// 用户名子串匹配（不区分大小写），按用户名排序
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<Account>, RepositoryError>;
    async fn list_except(&self, excluded: AccountId) -> Result<Vec<Account>, RepositoryError>;
    /// 账号不存在时返回 `RepositoryError::NotFound`
    async fn set_presence(
        &self,
        id: AccountId,
        presence: Presence,
        at: Timestamp,
    ) -> Result<Account, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FriendRequestRepository: Send + Sync {
    /// 双方之间已有待处理请求时返回 `FRIEND_REQUESTS_PENDING_PAIR` 冲突
    async fn create(&self, request: FriendRequest) -> Result<FriendRequest, RepositoryError>;
    async fn find_by_id(&self, id: FriendRequestId)
        -> Result<Option<FriendRequest>, RepositoryError>;
    /// 保存已处理的请求，仅当存储中的状态仍为 pending 时生效。
    ///
    /// 状态为 accepted 时在同一事务内写入两条镜像好友边。
    /// 请求已被处理过时返回 `FRIEND_REQUESTS_PENDING_GUARD` 冲突。
    async fn resolve(&self, request: FriendRequest) -> Result<FriendRequest, RepositoryError>;
    /// 收到的待处理请求，最新的在前
    async fn list_pending_for(
        &self,
        receiver_id: AccountId,
    ) -> Result<Vec<FriendRequest>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FriendshipRepository: Send + Sync {
    async fn are_friends(&self, a: AccountId, b: AccountId) -> Result<bool, RepositoryError>;
    /// owner 拥有的好友边指向的账号，按用户名排序
    async fn list_friends(&self, owner_id: AccountId) -> Result<Vec<Account>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlockRepository: Send + Sync {
    async fn create(&self, block: BlockedUser) -> Result<BlockedUser, RepositoryError>;
    /// 边不存在时不报错
    async fn delete(&self, blocker_id: AccountId, blocked_id: AccountId)
        -> Result<(), RepositoryError>;
    async fn exists(&self, blocker_id: AccountId, blocked_id: AccountId)
        -> Result<bool, RepositoryError>;
    async fn list_blocked(&self, blocker_id: AccountId) -> Result<Vec<Account>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// 会话与参与者一起写入；同一对账号的私聊已存在时返回 `CONVERSATIONS_DIRECT` 冲突
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError>;
    async fn find_by_id(&self, id: ConversationId)
        -> Result<Option<Conversation>, RepositoryError>;
    async fn find_direct(&self, pair: ParticipantPair)
        -> Result<Option<Conversation>, RepositoryError>;
    /// 参与的会话，最近活跃的在前
    async fn list_for(&self, account_id: AccountId) -> Result<Vec<Conversation>, RepositoryError>;
}

/// `mark_read` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadTransition {
    /// 本次调用将消息从未读变为已读
    Marked(Message),
    /// 消息此前已读，未做任何修改
    AlreadyRead(Message),
}

impl ReadTransition {
    pub fn into_message(self) -> Message {
        match self {
            ReadTransition::Marked(message) | ReadTransition::AlreadyRead(message) => message,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 写入消息并把会话的活跃时间推进到消息创建时间，两者原子完成
    async fn append(
        &self,
        message: Message,
        conversation_id: ConversationId,
    ) -> Result<Message, RepositoryError>;
    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;
    /// 两个账号之间的消息，最新的在前；创建时间相同时按写入顺序
    async fn list_between(
        &self,
        pair: ParticipantPair,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, RepositoryError>;
    /// 消息不存在时返回 `RepositoryError::NotFound`
    async fn mark_read(&self, id: MessageId, at: Timestamp)
        -> Result<ReadTransition, RepositoryError>;
    /// 消息不存在时返回 `RepositoryError::NotFound`
    async fn delete(&self, id: MessageId) -> Result<(), RepositoryError>;
    async fn unread_count(&self, receiver_id: AccountId) -> Result<u64, RepositoryError>;
}

/// 一个存储后端提供的全部端口
#[derive(Clone)]
pub struct Repositories {
    pub accounts: Arc<dyn AccountRepository>,
    pub friend_requests: Arc<dyn FriendRequestRepository>,
    pub friendships: Arc<dyn FriendshipRepository>,
    pub blocks: Arc<dyn BlockRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
}
