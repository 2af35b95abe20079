use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{AccountId, MessageBody, MessageId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    Link,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
            MessageKind::Link => "link",
        }
    }
}

impl FromStr for MessageKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            "link" => Ok(Self::Link),
            other => Err(DomainError::invalid_argument(
                "kind",
                format!("unknown message kind '{other}'"),
            )),
        }
    }
}

/// 附件引用（例如对象存储地址），内容本身不在本系统内
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attachment(String);

impl Attachment {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::invalid_argument(
                "attachment",
                "cannot be empty",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub body: MessageBody,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Message {
    pub fn new(
        id: MessageId,
        sender_id: AccountId,
        receiver_id: AccountId,
        body: MessageBody,
        kind: MessageKind,
        attachment: Option<Attachment>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            sender_id,
            receiver_id,
            body,
            kind,
            attachment,
            is_read: false,
            read_at: None,
            created_at,
        }
    }

    /// 标记已读。只允许 false -> true，重复调用不改变已读时间。
    ///
    /// 返回本次调用是否真正发生了状态变化。
    pub fn mark_read(&mut self, now: Timestamp) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(now);
        true
    }

    pub fn involves(&self, account_id: AccountId) -> bool {
        self.sender_id == account_id || self.receiver_id == account_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn mark_read_is_monotonic() {
        let now = Utc::now();
        let mut message = Message::new(
            MessageId::generate(),
            AccountId::generate(),
            AccountId::generate(),
            MessageBody::new("hi").unwrap(),
            MessageKind::Text,
            None,
            now,
        );
        assert!(!message.is_read && message.read_at.is_none());

        assert!(message.mark_read(now + Duration::seconds(1)));
        assert!(!message.mark_read(now + Duration::seconds(2)));
        assert!(message.is_read);
        assert_eq!(message.read_at, Some(now + Duration::seconds(1)));
    }

    #[test]
    fn kind_parsing_is_case_insensitive() {
        assert_eq!("LINK".parse::<MessageKind>().unwrap(), MessageKind::Link);
        assert!("video".parse::<MessageKind>().is_err());
        assert!(Attachment::new("  ").is_err());
    }
}
