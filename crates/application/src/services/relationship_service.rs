use std::collections::HashMap;
use std::sync::Arc;

use domain::{
    Account, AccountId, AccountSummary, BlockedUser, DomainError, FriendRequest,
    FriendRequestDecision, FriendRequestId, RepositoryError,
};

use crate::{
    broadcaster::{publish_logged, EventPublisher},
    clock::Clock,
    error::ApplicationError,
    events::DomainEvent,
    repository::{
        constraints, AccountRepository, BlockRepository, FriendRequestRepository,
        FriendshipRepository,
    },
};

/// 待处理请求及发送者的展示信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFriendRequest {
    pub request: FriendRequest,
    pub sender: AccountSummary,
}

pub struct RelationshipServiceDependencies {
    pub account_repository: Arc<dyn AccountRepository>,
    pub friend_request_repository: Arc<dyn FriendRequestRepository>,
    pub friendship_repository: Arc<dyn FriendshipRepository>,
    pub block_repository: Arc<dyn BlockRepository>,
    pub clock: Arc<dyn Clock>,
    pub publisher: Arc<dyn EventPublisher>,
}

pub struct RelationshipService {
    deps: RelationshipServiceDependencies,
}

impl RelationshipService {
    pub fn new(deps: RelationshipServiceDependencies) -> Self {
        Self { deps }
    }

    async fn require_account(&self, id: AccountId) -> Result<Account, ApplicationError> {
        self.deps
            .account_repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(id.to_string()).into())
    }

    pub async fn send_friend_request(
        &self,
        caller: AccountId,
        target: AccountId,
    ) -> Result<FriendRequest, ApplicationError> {
        let request =
            FriendRequest::new(FriendRequestId::generate(), caller, target, self.deps.clock.now())?;

        let sender = self.require_account(caller).await?;
        self.require_account(target).await?;

        if self
            .deps
            .friendship_repository
            .are_friends(caller, target)
            .await?
        {
            return Err(DomainError::AlreadyFriends.into());
        }

        // 两个方向的待处理请求共用一个唯一键，并发请求只有一个能写入
        let stored = self
            .deps
            .friend_request_repository
            .create(request)
            .await
            .map_err(|err| {
                if err.is_conflict_on(constraints::FRIEND_REQUESTS_PENDING_PAIR) {
                    ApplicationError::from(DomainError::FriendRequestAlreadyPending)
                } else {
                    err.into()
                }
            })?;

        tracing::info!(
            request_id = %stored.id,
            sender_id = %caller,
            receiver_id = %target,
            "好友请求已发送"
        );

        publish_logged(
            self.deps.publisher.as_ref(),
            DomainEvent::FriendRequestCreated {
                request: stored.clone(),
                sender: sender.summary(),
            },
        )
        .await;

        Ok(stored)
    }

    pub async fn respond_to_friend_request(
        &self,
        caller: AccountId,
        request_id: FriendRequestId,
        decision: FriendRequestDecision,
    ) -> Result<FriendRequest, ApplicationError> {
        let not_found = || DomainError::FriendRequestNotFound(request_id.to_string());

        let mut request = self
            .deps
            .friend_request_repository
            .find_by_id(request_id)
            .await?
            .ok_or_else(not_found)?;

        if request.receiver_id != caller {
            return Err(DomainError::NotRequestReceiver.into());
        }

        request.resolve(decision, self.deps.clock.now())?;

        // 存储层只在状态仍为 pending 时更新，并发响应只有一个生效
        let resolved = self
            .deps
            .friend_request_repository
            .resolve(request)
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => ApplicationError::from(not_found()),
                err if err.is_conflict_on(constraints::FRIEND_REQUESTS_PENDING_GUARD) => {
                    DomainError::FriendRequestAlreadyResolved(request_id.to_string()).into()
                }
                err => err.into(),
            })?;

        tracing::info!(
            request_id = %resolved.id,
            status = resolved.status.as_str(),
            "好友请求已处理"
        );

        let event = match decision {
            FriendRequestDecision::Accept => DomainEvent::FriendRequestAccepted {
                request: resolved.clone(),
            },
            FriendRequestDecision::Decline => DomainEvent::FriendRequestDeclined {
                request: resolved.clone(),
            },
        };
        publish_logged(self.deps.publisher.as_ref(), event).await;

        Ok(resolved)
    }

    /// 屏蔽与好友关系相互独立，屏蔽好友不会删除好友边
    pub async fn block_user(
        &self,
        caller: AccountId,
        target: AccountId,
    ) -> Result<BlockedUser, ApplicationError> {
        let block = BlockedUser::new(caller, target, self.deps.clock.now())?;
        self.require_account(target).await?;

        let stored = self
            .deps
            .block_repository
            .create(block)
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => {
                    ApplicationError::from(DomainError::AccountNotFound(target.to_string()))
                }
                err if err.is_conflict_on(constraints::BLOCKED_USERS) => {
                    DomainError::AlreadyBlocked.into()
                }
                err => err.into(),
            })?;

        tracing::info!(blocker_id = %caller, blocked_id = %target, "用户已屏蔽");
        Ok(stored)
    }

    pub async fn unblock_user(
        &self,
        caller: AccountId,
        target: AccountId,
    ) -> Result<(), ApplicationError> {
        self.deps.block_repository.delete(caller, target).await?;
        tracing::info!(blocker_id = %caller, blocked_id = %target, "已取消屏蔽");
        Ok(())
    }

    pub async fn list_friends(&self, account: AccountId) -> Result<Vec<Account>, ApplicationError> {
        Ok(self.deps.friendship_repository.list_friends(account).await?)
    }

    pub async fn list_pending_requests(
        &self,
        account: AccountId,
    ) -> Result<Vec<PendingFriendRequest>, ApplicationError> {
        let requests = self
            .deps
            .friend_request_repository
            .list_pending_for(account)
            .await?;
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let sender_ids: Vec<AccountId> = requests.iter().map(|r| r.sender_id).collect();
        let senders: HashMap<AccountId, AccountSummary> = self
            .deps
            .account_repository
            .find_many(&sender_ids)
            .await?
            .iter()
            .map(|account| (account.id, account.summary()))
            .collect();

        let mut pending = Vec::with_capacity(requests.len());
        for request in requests {
            // 账号不会被删除，缺失说明数据不一致
            let sender = senders.get(&request.sender_id).cloned().ok_or_else(|| {
                ApplicationError::internal(format!(
                    "sender {} of friend request {} is missing",
                    request.sender_id, request.id
                ))
            })?;
            pending.push(PendingFriendRequest { request, sender });
        }
        Ok(pending)
    }

    pub async fn list_blocked(&self, account: AccountId) -> Result<Vec<Account>, ApplicationError> {
        Ok(self.deps.block_repository.list_blocked(account).await?)
    }

    pub async fn is_blocked(
        &self,
        blocker: AccountId,
        blocked: AccountId,
    ) -> Result<bool, ApplicationError> {
        Ok(self.deps.block_repository.exists(blocker, blocked).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::ErrorKind;
    use crate::repository::{
        MockAccountRepository, MockBlockRepository, MockFriendRequestRepository,
        MockFriendshipRepository,
    };
    use crate::services::test_support::RecordingPublisher;
    use chrono::Utc;
    use domain::{Email, FriendRequestStatus, Handle};

    fn account(handle: &str) -> Account {
        Account::register(
            AccountId::generate(),
            Handle::parse(handle).unwrap(),
            Email::parse(format!("{handle}@example.com")).unwrap(),
            None,
            Utc::now(),
        )
    }

    struct Mocks {
        accounts: MockAccountRepository,
        requests: MockFriendRequestRepository,
        friendships: MockFriendshipRepository,
        blocks: MockBlockRepository,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                accounts: MockAccountRepository::new(),
                requests: MockFriendRequestRepository::new(),
                friendships: MockFriendshipRepository::new(),
                blocks: MockBlockRepository::new(),
            }
        }

        fn build(self, publisher: Arc<RecordingPublisher>) -> RelationshipService {
            RelationshipService::new(RelationshipServiceDependencies {
                account_repository: Arc::new(self.accounts),
                friend_request_repository: Arc::new(self.requests),
                friendship_repository: Arc::new(self.friendships),
                block_repository: Arc::new(self.blocks),
                clock: Arc::new(SystemClock),
                publisher,
            })
        }
    }

    #[tokio::test]
    async fn pending_pair_conflict_maps_to_already_pending() {
        let alice = account("alice");
        let bob = account("bob");
        let (alice_id, bob_id) = (alice.id, bob.id);

        let mut mocks = Mocks::new();
        mocks.accounts.expect_find_by_id().returning(move |id| {
            Ok([alice.clone(), bob.clone()].into_iter().find(|a| a.id == id))
        });
        mocks.friendships.expect_are_friends().returning(|_, _| Ok(false));
        mocks.requests.expect_create().returning(|_| {
            Err(RepositoryError::conflict(
                constraints::FRIEND_REQUESTS_PENDING_PAIR,
            ))
        });

        let publisher = Arc::new(RecordingPublisher::default());
        let service = mocks.build(publisher.clone());
        let err = service
            .send_friend_request(bob_id, alice_id)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::FriendRequestAlreadyPending)
        ));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn only_receiver_may_respond() {
        let request = FriendRequest::new(
            FriendRequestId::generate(),
            AccountId::generate(),
            AccountId::generate(),
            Utc::now(),
        )
        .unwrap();
        let sender = request.sender_id;
        let id = request.id;

        let mut mocks = Mocks::new();
        mocks
            .requests
            .expect_find_by_id()
            .returning(move |_| Ok(Some(request.clone())));
        mocks.requests.expect_resolve().never();

        let service = mocks.build(Arc::new(RecordingPublisher::default()));
        let err = service
            .respond_to_friend_request(sender, id, FriendRequestDecision::Accept)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn losing_a_concurrent_response_is_a_conflict() {
        let request = FriendRequest::new(
            FriendRequestId::generate(),
            AccountId::generate(),
            AccountId::generate(),
            Utc::now(),
        )
        .unwrap();
        let receiver = request.receiver_id;
        let id = request.id;

        let mut mocks = Mocks::new();
        mocks
            .requests
            .expect_find_by_id()
            .returning(move |_| Ok(Some(request.clone())));
        mocks.requests.expect_resolve().returning(|_| {
            Err(RepositoryError::conflict(
                constraints::FRIEND_REQUESTS_PENDING_GUARD,
            ))
        });

        let publisher = Arc::new(RecordingPublisher::default());
        let service = mocks.build(publisher.clone());
        let err = service
            .respond_to_friend_request(receiver, id, FriendRequestDecision::Decline)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::FriendRequestAlreadyResolved(_))
        ));
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn decline_emits_declined_event() {
        let request = FriendRequest::new(
            FriendRequestId::generate(),
            AccountId::generate(),
            AccountId::generate(),
            Utc::now(),
        )
        .unwrap();
        let receiver = request.receiver_id;
        let id = request.id;

        let mut mocks = Mocks::new();
        mocks
            .requests
            .expect_find_by_id()
            .returning(move |_| Ok(Some(request.clone())));
        mocks.requests.expect_resolve().returning(Ok);

        let publisher = Arc::new(RecordingPublisher::default());
        let service = mocks.build(publisher.clone());
        let resolved = service
            .respond_to_friend_request(receiver, id, FriendRequestDecision::Decline)
            .await
            .unwrap();

        assert_eq!(resolved.status, FriendRequestStatus::Declined);
        assert!(resolved.responded_at.is_some());
        assert_eq!(publisher.event_types(), vec!["friend_request.declined"]);
    }

    #[tokio::test]
    async fn blocking_twice_is_a_conflict() {
        let target = account("carol");
        let caller = AccountId::generate();
        let target_id = target.id;

        let mut mocks = Mocks::new();
        mocks
            .accounts
            .expect_find_by_id()
            .returning(move |_| Ok(Some(target.clone())));
        mocks
            .blocks
            .expect_create()
            .returning(|_| Err(RepositoryError::conflict(constraints::BLOCKED_USERS)));

        let service = mocks.build(Arc::new(RecordingPublisher::default()));
        let err = service.block_user(caller, target_id).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::AlreadyBlocked)));

        let err = service.block_user(caller, caller).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
