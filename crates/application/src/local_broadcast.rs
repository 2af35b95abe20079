// 进程内事件广播：按账号分主题，只投递给事件接收者的会话
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use async_trait::async_trait;
use domain::AccountId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::Stream;

use crate::auth::AuthenticatedAccount;
use crate::broadcaster::{BroadcastError, EventPublisher};
use crate::events::DomainEvent;

/// 一条在线连接的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

type SessionSenders = HashMap<SessionId, mpsc::Sender<Arc<DomainEvent>>>;

struct Registry {
    capacity: usize,
    next_session: AtomicU64,
    topics: RwLock<HashMap<AccountId, SessionSenders>>,
}

impl Registry {
    fn remove(&self, account_id: AccountId, session_id: SessionId) {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(sessions) = topics.get_mut(&account_id) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                topics.remove(&account_id);
            }
        }
    }
}

#[derive(Clone)]
pub struct LocalEventBroadcaster {
    registry: Arc<Registry>,
}

impl LocalEventBroadcaster {
    /// `capacity` 为每个会话的缓冲区大小
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                capacity: capacity.max(1),
                next_session: AtomicU64::new(1),
                topics: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// 为已认证账号注册一个会话。返回值被丢弃时自动注销。
    pub fn subscribe(&self, account: &AuthenticatedAccount) -> EventSubscription {
        let account_id = account.account_id();
        let session_id = SessionId(self.registry.next_session.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.registry.capacity);

        self.registry
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(account_id)
            .or_default()
            .insert(session_id, sender);

        tracing::debug!(account_id = %account_id, session = session_id.0, "会话已订阅");

        EventSubscription {
            account_id,
            session_id,
            receiver,
            registry: Arc::clone(&self.registry),
        }
    }

    /// 账号当前的在线会话数
    pub fn session_count(&self, account_id: AccountId) -> usize {
        self.registry
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&account_id)
            .map_or(0, HashMap::len)
    }

    fn deliver(&self, event: DomainEvent) -> usize {
        let event_type = event.event_type();
        let recipients = event.recipients();
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let topics = self
                .registry
                .topics
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for account_id in &recipients {
                let Some(sessions) = topics.get(account_id) else {
                    continue;
                };
                for (session_id, sender) in sessions {
                    match sender.try_send(Arc::clone(&event)) {
                        Ok(()) => delivered += 1,
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!(
                                account_id = %account_id,
                                session = session_id.0,
                                event = event_type,
                                "会话缓冲区已满，丢弃事件"
                            );
                        }
                        Err(TrySendError::Closed(_)) => closed.push((*account_id, *session_id)),
                    }
                }
            }
        }

        for (account_id, session_id) in closed {
            tracing::debug!(account_id = %account_id, session = session_id.0, "清理已关闭的会话");
            self.registry.remove(account_id, session_id);
        }

        delivered
    }
}

#[async_trait]
impl EventPublisher for LocalEventBroadcaster {
    async fn publish(&self, event: DomainEvent) -> Result<(), BroadcastError> {
        let event_type = event.event_type();
        let delivered = self.deliver(event);
        tracing::trace!(event = event_type, delivered, "事件已广播");
        Ok(())
    }
}

/// 单个会话的事件流
pub struct EventSubscription {
    account_id: AccountId,
    session_id: SessionId,
    receiver: mpsc::Receiver<Arc<DomainEvent>>,
    registry: Arc<Registry>,
}

impl EventSubscription {
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub async fn recv(&mut self) -> Option<Arc<DomainEvent>> {
        self.receiver.recv().await
    }

    /// 非阻塞读取，没有待处理事件时返回 None
    pub fn try_recv(&mut self) -> Option<Arc<DomainEvent>> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for EventSubscription {
    type Item = Arc<DomainEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.registry.remove(self.account_id, self.session_id);
        tracing::debug!(account_id = %self.account_id, session = self.session_id.0, "会话已注销");
    }
}
