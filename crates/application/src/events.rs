//! 领域事件
//!
//! 序列化时带 `type` 标签，客户端按标签分发。每个事件自己知道应当投递给哪些账号。

use domain::{
    AccountId, AccountSummary, ConversationId, FriendRequest, Message, MessageId, Presence,
    Timestamp,
};
use serde::{Deserialize, Serialize};

/// 带上收发双方展示信息的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub message: Message,
    pub sender: AccountSummary,
    pub receiver: AccountSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    #[serde(rename = "friend_request.created")]
    FriendRequestCreated {
        request: FriendRequest,
        sender: AccountSummary,
    },
    #[serde(rename = "friend_request.accepted")]
    FriendRequestAccepted { request: FriendRequest },
    #[serde(rename = "friend_request.declined")]
    FriendRequestDeclined { request: FriendRequest },
    #[serde(rename = "message.created")]
    MessageCreated { message: MessageView },
    #[serde(rename = "message.read")]
    MessageRead {
        message_id: MessageId,
        sender_id: AccountId,
        receiver_id: AccountId,
        read_at: Timestamp,
    },
    #[serde(rename = "presence.changed")]
    PresenceChanged {
        account_id: AccountId,
        presence: Presence,
        /// 账号本人及其好友，不对外序列化
        #[serde(skip)]
        audience: Vec<AccountId>,
    },
    #[serde(rename = "conversations.changed")]
    ConversationsChanged {
        conversation_id: ConversationId,
        participants: Vec<AccountId>,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::FriendRequestCreated { .. } => "friend_request.created",
            DomainEvent::FriendRequestAccepted { .. } => "friend_request.accepted",
            DomainEvent::FriendRequestDeclined { .. } => "friend_request.declined",
            DomainEvent::MessageCreated { .. } => "message.created",
            DomainEvent::MessageRead { .. } => "message.read",
            DomainEvent::PresenceChanged { .. } => "presence.changed",
            DomainEvent::ConversationsChanged { .. } => "conversations.changed",
        }
    }

    /// 应当收到该事件的账号，已去重
    pub fn recipients(&self) -> Vec<AccountId> {
        let mut recipients = match self {
            DomainEvent::FriendRequestCreated { request, .. }
            | DomainEvent::FriendRequestAccepted { request }
            | DomainEvent::FriendRequestDeclined { request } => {
                vec![request.sender_id, request.receiver_id]
            }
            DomainEvent::MessageCreated { message } => {
                vec![message.message.sender_id, message.message.receiver_id]
            }
            DomainEvent::MessageRead {
                sender_id,
                receiver_id,
                ..
            } => vec![*sender_id, *receiver_id],
            DomainEvent::PresenceChanged {
                account_id,
                audience,
                ..
            } => {
                let mut ids = Vec::with_capacity(audience.len() + 1);
                ids.push(*account_id);
                ids.extend(audience.iter().copied());
                ids
            }
            DomainEvent::ConversationsChanged { participants, .. } => participants.clone(),
        };
        recipients.sort();
        recipients.dedup();
        recipients
    }
}
