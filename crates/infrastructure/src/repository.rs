//! PostgreSQL 存储适配器
//!
//! 唯一约束冲突按约束名报告，外键违反视为引用的记录不存在。
//! 多行写入（同意好友请求、创建会话、追加消息）在单个事务内完成。

use std::collections::HashMap;
use std::sync::Arc;

use application::repository::{
    constraints, AccountRepository, BlockRepository, ConversationRepository,
    FriendRequestRepository, FriendshipRepository, MessageRepository, ReadTransition,
    Repositories,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Account, AccountId, Attachment, BlockedUser, Conversation, ConversationId, ConversationKind,
    Email, FriendRequest, FriendRequestId, FriendRequestStatus, Friendship, Handle, Message,
    MessageBody, MessageId, MessageKind, ParticipantPair, Presence, RepositoryError, Timestamp,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::conflict(db.constraint().unwrap_or("unknown"))
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepositoryError::NotFound,
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_) => RepositoryError::corrupted(err.to_string()),
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::corrupted(message)
}

fn to_i64(value: u32) -> i64 {
    i64::from(value)
}

const ACCOUNT_COLUMNS: &str = "id, handle, email, presence, avatar, created_at, updated_at";
const FRIEND_REQUEST_COLUMNS: &str = "id, sender_id, receiver_id, status, created_at, responded_at";
const MESSAGE_COLUMNS: &str =
    "id, sender_id, receiver_id, body, kind, attachment, is_read, read_at, created_at";

#[derive(Debug, FromRow)]
struct AccountRecord {
    id: Uuid,
    handle: String,
    email: String,
    presence: String,
    avatar: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRecord> for Account {
    type Error = RepositoryError;

    fn try_from(value: AccountRecord) -> Result<Self, Self::Error> {
        Ok(Account {
            id: AccountId::from(value.id),
            handle: Handle::parse(value.handle).map_err(|err| invalid_data(err.to_string()))?,
            email: Email::parse(value.email).map_err(|err| invalid_data(err.to_string()))?,
            presence: value
                .presence
                .parse::<Presence>()
                .map_err(|err| invalid_data(err.to_string()))?,
            avatar: value.avatar,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

fn accounts_from(records: Vec<AccountRecord>) -> Result<Vec<Account>, RepositoryError> {
    records.into_iter().map(Account::try_from).collect()
}

#[derive(Debug, FromRow)]
struct FriendRequestRecord {
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
}

impl TryFrom<FriendRequestRecord> for FriendRequest {
    type Error = RepositoryError;

    fn try_from(value: FriendRequestRecord) -> Result<Self, Self::Error> {
        Ok(FriendRequest {
            id: FriendRequestId::from(value.id),
            sender_id: AccountId::from(value.sender_id),
            receiver_id: AccountId::from(value.receiver_id),
            status: value
                .status
                .parse::<FriendRequestStatus>()
                .map_err(|err| invalid_data(err.to_string()))?,
            created_at: value.created_at,
            responded_at: value.responded_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    creator_id: Uuid,
    kind: String,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ParticipantRecord {
    conversation_id: Uuid,
    account_id: Uuid,
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    body: String,
    kind: String,
    attachment: Option<String>,
    is_read: bool,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let body = MessageBody::new(value.body).map_err(|err| invalid_data(err.to_string()))?;
        let kind = value
            .kind
            .parse::<MessageKind>()
            .map_err(|err| invalid_data(err.to_string()))?;
        let attachment = value
            .attachment
            .map(Attachment::new)
            .transpose()
            .map_err(|err| invalid_data(err.to_string()))?;
        if value.is_read != value.read_at.is_some() {
            return Err(invalid_data(format!(
                "message {} has inconsistent read state",
                value.id
            )));
        }

        Ok(Message {
            id: MessageId::from(value.id),
            sender_id: AccountId::from(value.sender_id),
            receiver_id: AccountId::from(value.receiver_id),
            body,
            kind,
            attachment,
            is_read: value.is_read,
            read_at: value.read_at,
            created_at: value.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn create(&self, account: Account) -> Result<Account, RepositoryError> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            r#"
            INSERT INTO accounts (id, handle, email, presence, avatar, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(Uuid::from(account.id))
        .bind(account.handle.as_str())
        .bind(account.email.as_str())
        .bind(account.presence.as_str())
        .bind(account.avatar.as_deref())
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Account::try_from(record)
    }

    async fn update_profile(
        &self,
        id: AccountId,
        email: Option<Email>,
        avatar: Option<String>,
        at: Timestamp,
    ) -> Result<Account, RepositoryError> {
        // 只写资料列，并发的上线/下线不会被旧快照覆盖
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            r#"
            UPDATE accounts
            SET email = COALESCE($2, email), avatar = COALESCE($3, avatar), updated_at = $4
            WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(Uuid::from(id))
        .bind(email.as_ref().map(Email::as_str))
        .bind(avatar)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        Account::try_from(record)
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, RepositoryError> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Account::try_from).transpose()
    }

    async fn find_many(&self, ids: &[AccountId]) -> Result<Vec<Account>, RepositoryError> {
        let ids: Vec<Uuid> = ids.iter().copied().map(Uuid::from).collect();
        let records = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        accounts_from(records)
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<Account>, RepositoryError> {
        // strpos 做字面子串匹配，不需要转义 LIKE 通配符
        let records = sqlx::query_as::<_, AccountRecord>(&format!(
            r#"
            SELECT {ACCOUNT_COLUMNS} FROM accounts
            WHERE strpos(handle, $1) > 0
            ORDER BY handle
            LIMIT $2
            "#
        ))
        .bind(query.to_lowercase())
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        accounts_from(records)
    }

    async fn list_except(&self, excluded: AccountId) -> Result<Vec<Account>, RepositoryError> {
        let records = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id <> $1 ORDER BY handle"
        ))
        .bind(Uuid::from(excluded))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        accounts_from(records)
    }

    async fn set_presence(
        &self,
        id: AccountId,
        presence: Presence,
        at: Timestamp,
    ) -> Result<Account, RepositoryError> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            r#"
            UPDATE accounts SET presence = $2, updated_at = $3
            WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(Uuid::from(id))
        .bind(presence.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        Account::try_from(record)
    }
}

#[derive(Clone)]
pub struct PgFriendRequestRepository {
    pool: PgPool,
}

impl PgFriendRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FriendRequestRepository for PgFriendRequestRepository {
    async fn create(&self, request: FriendRequest) -> Result<FriendRequest, RepositoryError> {
        let record = sqlx::query_as::<_, FriendRequestRecord>(&format!(
            r#"
            INSERT INTO friend_requests (id, sender_id, receiver_id, status, created_at, responded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {FRIEND_REQUEST_COLUMNS}
            "#
        ))
        .bind(Uuid::from(request.id))
        .bind(Uuid::from(request.sender_id))
        .bind(Uuid::from(request.receiver_id))
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.responded_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        FriendRequest::try_from(record)
    }

    async fn find_by_id(
        &self,
        id: FriendRequestId,
    ) -> Result<Option<FriendRequest>, RepositoryError> {
        let record = sqlx::query_as::<_, FriendRequestRecord>(&format!(
            "SELECT {FRIEND_REQUEST_COLUMNS} FROM friend_requests WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(FriendRequest::try_from).transpose()
    }

    async fn resolve(&self, request: FriendRequest) -> Result<FriendRequest, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 只有仍处于 pending 的行会被更新，并发响应中后到的一方读不到行
        let updated = sqlx::query_as::<_, FriendRequestRecord>(&format!(
            r#"
            UPDATE friend_requests SET status = $2, responded_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING {FRIEND_REQUEST_COLUMNS}
            "#
        ))
        .bind(Uuid::from(request.id))
        .bind(request.status.as_str())
        .bind(request.responded_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let Some(record) = updated else {
            let exists: Option<Uuid> =
                sqlx::query_scalar("SELECT id FROM friend_requests WHERE id = $1")
                    .bind(Uuid::from(request.id))
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(map_sqlx_err)?;
            return Err(match exists {
                Some(_) => RepositoryError::conflict(constraints::FRIEND_REQUESTS_PENDING_GUARD),
                None => RepositoryError::NotFound,
            });
        };
        let resolved = FriendRequest::try_from(record)?;

        if resolved.status == FriendRequestStatus::Accepted {
            let at = resolved.responded_at.unwrap_or(resolved.created_at);
            for edge in Friendship::mirrored(&resolved, at) {
                sqlx::query(
                    r#"
                    INSERT INTO friendships (owner_id, friend_id, created_at)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (owner_id, friend_id) DO NOTHING
                    "#,
                )
                .bind(Uuid::from(edge.owner_id))
                .bind(Uuid::from(edge.friend_id))
                .bind(edge.created_at)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            }
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(resolved)
    }

    async fn list_pending_for(
        &self,
        receiver_id: AccountId,
    ) -> Result<Vec<FriendRequest>, RepositoryError> {
        let records = sqlx::query_as::<_, FriendRequestRecord>(&format!(
            r#"
            SELECT {FRIEND_REQUEST_COLUMNS} FROM friend_requests
            WHERE receiver_id = $1 AND status = 'pending'
            ORDER BY created_at DESC
            "#
        ))
        .bind(Uuid::from(receiver_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(FriendRequest::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgFriendshipRepository {
    pool: PgPool,
}

impl PgFriendshipRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FriendshipRepository for PgFriendshipRepository {
    async fn are_friends(&self, a: AccountId, b: AccountId) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM friendships WHERE owner_id = $1 AND friend_id = $2)",
        )
        .bind(Uuid::from(a))
        .bind(Uuid::from(b))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn list_friends(&self, owner_id: AccountId) -> Result<Vec<Account>, RepositoryError> {
        let records = sqlx::query_as::<_, AccountRecord>(
            r#"
            SELECT a.id, a.handle, a.email, a.presence, a.avatar, a.created_at, a.updated_at
            FROM friendships f
            JOIN accounts a ON a.id = f.friend_id
            WHERE f.owner_id = $1
            ORDER BY a.handle
            "#,
        )
        .bind(Uuid::from(owner_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        accounts_from(records)
    }
}

#[derive(Clone)]
pub struct PgBlockRepository {
    pool: PgPool,
}

impl PgBlockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlockRepository for PgBlockRepository {
    async fn create(&self, block: BlockedUser) -> Result<BlockedUser, RepositoryError> {
        sqlx::query(
            "INSERT INTO blocked_users (blocker_id, blocked_id, created_at) VALUES ($1, $2, $3)",
        )
        .bind(Uuid::from(block.blocker_id))
        .bind(Uuid::from(block.blocked_id))
        .bind(block.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(block)
    }

    async fn delete(
        &self,
        blocker_id: AccountId,
        blocked_id: AccountId,
    ) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM blocked_users WHERE blocker_id = $1 AND blocked_id = $2")
            .bind(Uuid::from(blocker_id))
            .bind(Uuid::from(blocked_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn exists(
        &self,
        blocker_id: AccountId,
        blocked_id: AccountId,
    ) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM blocked_users WHERE blocker_id = $1 AND blocked_id = $2)",
        )
        .bind(Uuid::from(blocker_id))
        .bind(Uuid::from(blocked_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn list_blocked(&self, blocker_id: AccountId) -> Result<Vec<Account>, RepositoryError> {
        let records = sqlx::query_as::<_, AccountRecord>(
            r#"
            SELECT a.id, a.handle, a.email, a.presence, a.avatar, a.created_at, a.updated_at
            FROM blocked_users b
            JOIN accounts a ON a.id = b.blocked_id
            WHERE b.blocker_id = $1
            ORDER BY a.handle
            "#,
        )
        .bind(Uuid::from(blocker_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        accounts_from(records)
    }
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 为会话记录加载参与者（按写入顺序）
    async fn hydrate(
        &self,
        records: Vec<ConversationRecord>,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = records.iter().map(|record| record.id).collect();
        let rows = sqlx::query_as::<_, ParticipantRecord>(
            r#"
            SELECT conversation_id, account_id FROM conversation_participants
            WHERE conversation_id = ANY($1)
            ORDER BY conversation_id, position
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut participants: HashMap<Uuid, Vec<AccountId>> = HashMap::new();
        for row in rows {
            participants
                .entry(row.conversation_id)
                .or_default()
                .push(AccountId::from(row.account_id));
        }

        records
            .into_iter()
            .map(|record| {
                let members = participants.remove(&record.id).unwrap_or_default();
                conversation_from(record, members)
            })
            .collect()
    }
}

fn conversation_from(
    record: ConversationRecord,
    participants: Vec<AccountId>,
) -> Result<Conversation, RepositoryError> {
    let kind = record
        .kind
        .parse::<ConversationKind>()
        .map_err(|err| invalid_data(err.to_string()))?;
    if kind == ConversationKind::Direct && participants.len() != 2 {
        return Err(invalid_data(format!(
            "direct conversation {} has {} participants",
            record.id,
            participants.len()
        )));
    }
    Ok(Conversation {
        id: ConversationId::from(record.id),
        creator_id: AccountId::from(record.creator_id),
        kind,
        participants,
        created_at: record.created_at,
        last_activity_at: record.last_activity_at,
    })
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let direct_key = conversation.direct_pair().map(|pair| pair.key());
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, creator_id, kind, direct_key, created_at, last_activity_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(Uuid::from(conversation.creator_id))
        .bind(conversation.kind.as_str())
        .bind(direct_key)
        .bind(conversation.created_at)
        .bind(conversation.last_activity_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for (position, row) in conversation.participant_rows().into_iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|_| RepositoryError::storage("too many participants"))?;
            sqlx::query(
                r#"
                INSERT INTO conversation_participants (conversation_id, account_id, position)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(Uuid::from(row.conversation_id))
            .bind(Uuid::from(row.account_id))
            .bind(position)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(conversation)
    }

    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, creator_id, kind, created_at, last_activity_at
            FROM conversations WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let Some(record) = record else {
            return Ok(None);
        };
        Ok(self.hydrate(vec![record]).await?.pop())
    }

    async fn find_direct(
        &self,
        pair: ParticipantPair,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, creator_id, kind, created_at, last_activity_at
            FROM conversations WHERE direct_key = $1
            "#,
        )
        .bind(pair.key())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let Some(record) = record else {
            return Ok(None);
        };
        Ok(self.hydrate(vec![record]).await?.pop())
    }

    async fn list_for(&self, account_id: AccountId) -> Result<Vec<Conversation>, RepositoryError> {
        let records = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT c.id, c.creator_id, c.kind, c.created_at, c.last_activity_at
            FROM conversations c
            JOIN conversation_participants p ON p.conversation_id = c.id
            WHERE p.account_id = $1
            ORDER BY c.last_activity_at DESC, c.created_at DESC
            "#,
        )
        .bind(Uuid::from(account_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        self.hydrate(records).await
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn append(
        &self,
        message: Message,
        conversation_id: ConversationId,
    ) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            INSERT INTO messages
                (id, conversation_id, sender_id, receiver_id, body, kind, attachment, is_read, read_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(message.sender_id))
        .bind(Uuid::from(message.receiver_id))
        .bind(message.body.as_str())
        .bind(message.kind.as_str())
        .bind(message.attachment.as_ref().map(Attachment::as_str))
        .bind(message.is_read)
        .bind(message.read_at)
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let touched = sqlx::query(
            r#"
            UPDATE conversations
            SET last_activity_at = GREATEST(last_activity_at, $2)
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        if touched.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Message::try_from(record)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn list_between(
        &self,
        pair: ParticipantPair,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE LEAST(sender_id, receiver_id) = $1 AND GREATEST(sender_id, receiver_id) = $2
            ORDER BY created_at DESC, seq DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(Uuid::from(pair.low()))
        .bind(Uuid::from(pair.high()))
        .bind(to_i64(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn mark_read(
        &self,
        id: MessageId,
        at: Timestamp,
    ) -> Result<ReadTransition, RepositoryError> {
        let marked = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            UPDATE messages SET is_read = TRUE, read_at = $2
            WHERE id = $1 AND NOT is_read
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(id))
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if let Some(record) = marked {
            return Ok(ReadTransition::Marked(Message::try_from(record)?));
        }

        match self.find_by_id(id).await? {
            Some(message) => Ok(ReadTransition::AlreadyRead(message)),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn delete(&self, id: MessageId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn unread_count(&self, receiver_id: AccountId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = $1 AND NOT is_read",
        )
        .bind(Uuid::from(receiver_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        u64::try_from(count).map_err(|_| invalid_data(format!("negative unread count {count}")))
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub account_repository: Arc<PgAccountRepository>,
    pub friend_request_repository: Arc<PgFriendRequestRepository>,
    pub friendship_repository: Arc<PgFriendshipRepository>,
    pub block_repository: Arc<PgBlockRepository>,
    pub conversation_repository: Arc<PgConversationRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            account_repository: Arc::new(PgAccountRepository::new(pool.clone())),
            friend_request_repository: Arc::new(PgFriendRequestRepository::new(pool.clone())),
            friendship_repository: Arc::new(PgFriendshipRepository::new(pool.clone())),
            block_repository: Arc::new(PgBlockRepository::new(pool.clone())),
            conversation_repository: Arc::new(PgConversationRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        }
    }

    pub fn repositories(&self) -> Repositories {
        Repositories {
            accounts: self.account_repository.clone(),
            friend_requests: self.friend_request_repository.clone(),
            friendships: self.friendship_repository.clone(),
            blocks: self.block_repository.clone(),
            conversations: self.conversation_repository.clone(),
            messages: self.message_repository.clone(),
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
