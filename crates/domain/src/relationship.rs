use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{AccountId, FriendRequestId, ParticipantPair, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Declined,
}

impl FriendRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendRequestStatus::Pending => "pending",
            FriendRequestStatus::Accepted => "accepted",
            FriendRequestStatus::Declined => "declined",
        }
    }
}

impl FromStr for FriendRequestStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            other => Err(DomainError::invalid_argument(
                "status",
                format!("unknown friend request status '{other}'"),
            )),
        }
    }
}

/// 接收者对好友请求的答复
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestDecision {
    Accept,
    Decline,
}

impl FriendRequestDecision {
    pub fn resulting_status(&self) -> FriendRequestStatus {
        match self {
            FriendRequestDecision::Accept => FriendRequestStatus::Accepted,
            FriendRequestDecision::Decline => FriendRequestStatus::Declined,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: FriendRequestId,
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub status: FriendRequestStatus,
    pub created_at: Timestamp,
    pub responded_at: Option<Timestamp>,
}

impl FriendRequest {
    pub fn new(
        id: FriendRequestId,
        sender_id: AccountId,
        receiver_id: AccountId,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if sender_id == receiver_id {
            return Err(DomainError::invalid_argument(
                "receiver_id",
                "cannot send a friend request to yourself",
            ));
        }
        Ok(Self {
            id,
            sender_id,
            receiver_id,
            status: FriendRequestStatus::Pending,
            created_at: now,
            responded_at: None,
        })
    }

    pub fn pair(&self) -> Result<ParticipantPair, DomainError> {
        ParticipantPair::new(self.sender_id, self.receiver_id)
    }

    pub fn is_pending(&self) -> bool {
        self.status == FriendRequestStatus::Pending
    }

    /// 处理请求。已处理的请求不可变。
    pub fn resolve(
        &mut self,
        decision: FriendRequestDecision,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        if !self.is_pending() {
            return Err(DomainError::FriendRequestAlreadyResolved(self.id.to_string()));
        }
        self.status = decision.resulting_status();
        self.responded_at = Some(now);
        Ok(())
    }
}

/// 有向好友边，总是成对创建
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friendship {
    pub owner_id: AccountId,
    pub friend_id: AccountId,
    pub created_at: Timestamp,
}

impl Friendship {
    /// 同意好友请求时生成的互为镜像的两条边
    pub fn mirrored(request: &FriendRequest, now: Timestamp) -> [Friendship; 2] {
        [
            Friendship {
                owner_id: request.sender_id,
                friend_id: request.receiver_id,
                created_at: now,
            },
            Friendship {
                owner_id: request.receiver_id,
                friend_id: request.sender_id,
                created_at: now,
            },
        ]
    }
}

/// 有向屏蔽边，与好友关系相互独立
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedUser {
    pub blocker_id: AccountId,
    pub blocked_id: AccountId,
    pub created_at: Timestamp,
}

impl BlockedUser {
    pub fn new(
        blocker_id: AccountId,
        blocked_id: AccountId,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if blocker_id == blocked_id {
            return Err(DomainError::invalid_argument(
                "blocked_id",
                "cannot block yourself",
            ));
        }
        Ok(Self {
            blocker_id,
            blocked_id,
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn request() -> FriendRequest {
        FriendRequest::new(
            FriendRequestId::generate(),
            AccountId::generate(),
            AccountId::generate(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn self_request_is_rejected() {
        let id = AccountId::generate();
        let result = FriendRequest::new(FriendRequestId::generate(), id, id, Utc::now());
        assert!(matches!(result, Err(DomainError::InvalidArgument { .. })));
    }

    #[test]
    fn resolved_request_is_immutable() {
        let mut request = request();
        let at = request.created_at + Duration::seconds(5);
        request.resolve(FriendRequestDecision::Decline, at).unwrap();
        assert_eq!(request.status, FriendRequestStatus::Declined);
        assert_eq!(request.responded_at, Some(at));

        let err = request
            .resolve(FriendRequestDecision::Accept, at + Duration::seconds(1))
            .unwrap_err();
        assert!(matches!(err, DomainError::FriendRequestAlreadyResolved(_)));
        assert_eq!(request.status, FriendRequestStatus::Declined);
        assert_eq!(request.responded_at, Some(at));
    }

    #[test]
    fn accepted_request_yields_mirrored_edges() {
        let request = request();
        let [forward, backward] = Friendship::mirrored(&request, Utc::now());
        assert_eq!(forward.owner_id, request.sender_id);
        assert_eq!(forward.friend_id, request.receiver_id);
        assert_eq!(backward.owner_id, request.receiver_id);
        assert_eq!(backward.friend_id, request.sender_id);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            FriendRequestStatus::Pending,
            FriendRequestStatus::Accepted,
            FriendRequestStatus::Declined,
        ] {
            assert_eq!(status.as_str().parse::<FriendRequestStatus>().unwrap(), status);
        }
    }
}
