use std::sync::Arc;

use domain::{Account, AccountId, DomainError, Presence, RepositoryError};

use crate::{
    broadcaster::{publish_logged, EventPublisher},
    clock::Clock,
    error::ApplicationError,
    events::DomainEvent,
    repository::{AccountRepository, FriendshipRepository},
};

pub struct PresenceServiceDependencies {
    pub account_repository: Arc<dyn AccountRepository>,
    pub friendship_repository: Arc<dyn FriendshipRepository>,
    pub clock: Arc<dyn Clock>,
    pub publisher: Arc<dyn EventPublisher>,
}

/// 在线状态跟踪。每次状态变化都写回账号并通知本人及其好友。
pub struct PresenceService {
    deps: PresenceServiceDependencies,
}

impl PresenceService {
    pub fn new(deps: PresenceServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn login(&self, account: AccountId) -> Result<Account, ApplicationError> {
        self.update_presence(account, Presence::Online).await
    }

    pub async fn logout(&self, account: AccountId) -> Result<Account, ApplicationError> {
        self.update_presence(account, Presence::Offline).await
    }

    /// 按名称设置状态，未知名称返回参数错误
    pub async fn set_presence(
        &self,
        account: AccountId,
        state: &str,
    ) -> Result<Account, ApplicationError> {
        let presence: Presence = state.parse()?;
        self.update_presence(account, presence).await
    }

    pub async fn update_presence(
        &self,
        account: AccountId,
        presence: Presence,
    ) -> Result<Account, ApplicationError> {
        let updated = self
            .deps
            .account_repository
            .set_presence(account, presence, self.deps.clock.now())
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => {
                    ApplicationError::from(DomainError::AccountNotFound(account.to_string()))
                }
                err => err.into(),
            })?;

        tracing::info!(account_id = %account, presence = %presence, "在线状态已更新");

        let audience = match self.deps.friendship_repository.list_friends(account).await {
            Ok(friends) => friends.into_iter().map(|friend| friend.id).collect(),
            Err(err) => {
                // 状态已落库，好友列表读取失败时只通知本人
                tracing::warn!(account_id = %account, error = %err, "读取好友列表失败");
                Vec::new()
            }
        };
        publish_logged(
            self.deps.publisher.as_ref(),
            DomainEvent::PresenceChanged {
                account_id: account,
                presence,
                audience,
            },
        )
        .await;

        Ok(updated)
    }

    pub async fn get_presence(&self, account: AccountId) -> Result<Presence, ApplicationError> {
        self.deps
            .account_repository
            .find_by_id(account)
            .await?
            .map(|found| found.presence)
            .ok_or_else(|| DomainError::AccountNotFound(account.to_string()).into())
    }
}
