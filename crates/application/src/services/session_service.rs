use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use domain::AccountId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    auth::{AuthError, AuthenticatedAccount, Authenticator},
    error::ApplicationError,
    local_broadcast::{EventSubscription, LocalEventBroadcaster},
    repository::AccountRepository,
    services::PresenceService,
};

/// 一条已绑定账号的在线连接
pub struct Session {
    identity: AuthenticatedAccount,
    events: EventSubscription,
}

impl Session {
    pub fn account_id(&self) -> AccountId {
        self.identity.account_id()
    }

    pub fn events(&mut self) -> &mut EventSubscription {
        &mut self.events
    }
}

pub struct SessionServiceDependencies {
    pub account_repository: Arc<dyn AccountRepository>,
    pub authenticator: Arc<dyn Authenticator>,
    pub broadcaster: Arc<LocalEventBroadcaster>,
    pub presence: Arc<PresenceService>,
}

pub struct SessionService {
    deps: SessionServiceDependencies,
    /// 每个账号一把锁：统计会话数与写在线状态必须一起完成
    presence_locks: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
}

impl SessionService {
    pub fn new(deps: SessionServiceDependencies) -> Self {
        Self {
            deps,
            presence_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_presence(&self, account_id: AccountId) -> OwnedMutexGuard<()> {
        let lock = self
            .presence_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(account_id)
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// 校验凭证后订阅事件并把账号置为在线。
    ///
    /// 先订阅再更新状态，连接本身也能收到自己的 `presence.changed`。
    pub async fn connect(&self, credential: &str) -> Result<Session, ApplicationError> {
        let account_id = self.deps.authenticator.verify(credential)?;
        let identity = AuthenticatedAccount::new(account_id);

        if self
            .deps
            .account_repository
            .find_by_id(account_id)
            .await?
            .is_none()
        {
            return Err(AuthError::UnknownAccount.into());
        }

        let _guard = self.lock_presence(account_id).await;
        let events = self.deps.broadcaster.subscribe(&identity);
        self.deps.presence.login(account_id).await?;
        tracing::info!(account_id = %account_id, session = ?events.session_id(), "会话已建立");

        Ok(Session { identity, events })
    }

    /// 关闭会话；账号的最后一个会话断开时置为离线
    pub async fn disconnect(&self, session: Session) -> Result<(), ApplicationError> {
        let account_id = session.account_id();
        let _guard = self.lock_presence(account_id).await;
        drop(session);

        if self.deps.broadcaster.session_count(account_id) == 0 {
            self.deps.presence.logout(account_id).await?;
        }
        tracing::info!(account_id = %account_id, "会话已断开");
        Ok(())
    }
}
