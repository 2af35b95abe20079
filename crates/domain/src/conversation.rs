use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{AccountId, ConversationId, ParticipantPair, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }
}

impl FromStr for ConversationKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "direct" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            other => Err(DomainError::invalid_argument(
                "kind",
                format!("unknown conversation kind '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub creator_id: AccountId,
    pub kind: ConversationKind,
    pub participants: Vec<AccountId>,
    pub created_at: Timestamp,
    pub last_activity_at: Timestamp,
}

impl Conversation {
    /// 两人私聊会话，发起方记为创建者
    pub fn new_direct(
        id: ConversationId,
        creator_id: AccountId,
        pair: ParticipantPair,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            creator_id,
            kind: ConversationKind::Direct,
            participants: vec![pair.low(), pair.high()],
            created_at: now,
            last_activity_at: now,
        }
    }

    /// 群聊会话。参与者去重，创建者不在列表中时自动加入。
    pub fn new_group(
        id: ConversationId,
        creator_id: AccountId,
        participant_ids: &[AccountId],
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if participant_ids.is_empty() {
            return Err(DomainError::invalid_argument(
                "participant_ids",
                "at least one participant is required",
            ));
        }

        let mut participants = Vec::with_capacity(participant_ids.len() + 1);
        participants.push(creator_id);
        for id in participant_ids {
            if !participants.contains(id) {
                participants.push(*id);
            }
        }

        Ok(Self {
            id,
            creator_id,
            kind: ConversationKind::Group,
            participants,
            created_at: now,
            last_activity_at: now,
        })
    }

    /// 私聊会话的参与者对；群聊返回 None
    pub fn direct_pair(&self) -> Option<ParticipantPair> {
        match (self.kind, self.participants.as_slice()) {
            (ConversationKind::Direct, [a, b]) => ParticipantPair::new(*a, *b).ok(),
            _ => None,
        }
    }

    pub fn has_participant(&self, id: AccountId) -> bool {
        self.participants.contains(&id)
    }

    /// 按参与者顺序展开的成员行
    pub fn participant_rows(&self) -> Vec<ConversationParticipant> {
        self.participants
            .iter()
            .map(|account_id| ConversationParticipant {
                conversation_id: self.id,
                account_id: *account_id,
            })
            .collect()
    }

    pub fn touch(&mut self, at: Timestamp) {
        if at > self.last_activity_at {
            self.last_activity_at = at;
        }
    }
}

/// 会话成员行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationParticipant {
    pub conversation_id: ConversationId,
    pub account_id: AccountId,
}
