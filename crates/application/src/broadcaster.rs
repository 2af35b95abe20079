use async_trait::async_trait;
use thiserror::Error;

use crate::events::DomainEvent;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<(), BroadcastError>;
}

/// 发布事件。数据已经落库，广播失败只记录日志，不回滚也不向调用者报错。
pub(crate) async fn publish_logged(publisher: &dyn EventPublisher, event: DomainEvent) {
    let event_type = event.event_type();
    if let Err(err) = publisher.publish(event).await {
        tracing::warn!(event = event_type, error = %err, "事件广播失败");
    }
}
