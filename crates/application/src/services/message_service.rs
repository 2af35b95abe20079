use std::sync::Arc;

use config::MessagingConfig;
use domain::{
    Account, AccountId, Attachment, DomainError, Message, MessageBody, MessageId, MessageKind,
    ParticipantPair, RepositoryError,
};

use crate::{
    broadcaster::{publish_logged, EventPublisher},
    clock::Clock,
    error::ApplicationError,
    events::{DomainEvent, MessageView},
    pagination::PageRequest,
    repository::{AccountRepository, MessageRepository, ReadTransition},
    services::ConversationService,
};

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub body: String,
    pub kind: MessageKind,
    pub attachment: Option<String>,
}

pub struct MessageServiceDependencies {
    pub account_repository: Arc<dyn AccountRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub conversations: Arc<ConversationService>,
    pub clock: Arc<dyn Clock>,
    pub publisher: Arc<dyn EventPublisher>,
    pub config: MessagingConfig,
}

pub struct MessageService {
    deps: MessageServiceDependencies,
}

impl MessageService {
    pub fn new(deps: MessageServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn send(&self, request: SendMessageRequest) -> Result<Message, ApplicationError> {
        let body = MessageBody::new(request.body)?;
        if body.char_len() > self.deps.config.max_body_chars {
            return Err(DomainError::invalid_argument(
                "body",
                format!(
                    "must be at most {} characters",
                    self.deps.config.max_body_chars
                ),
            )
            .into());
        }
        if request.sender_id == request.receiver_id {
            return Err(
                DomainError::invalid_argument("receiver_id", "cannot message yourself").into(),
            );
        }
        let attachment = request.attachment.map(Attachment::new).transpose()?;

        let sender = self.require_account(request.sender_id).await?;
        let receiver = self.require_account(request.receiver_id).await?;

        let (conversation, _) = self
            .deps
            .conversations
            .resolve_direct(sender.id, receiver.id)
            .await?;

        let message = Message::new(
            MessageId::generate(),
            sender.id,
            receiver.id,
            body,
            request.kind,
            attachment,
            self.deps.clock.now(),
        );
        let stored = self
            .deps
            .message_repository
            .append(message, conversation.id)
            .await?;

        tracing::info!(
            message_id = %stored.id,
            sender_id = %stored.sender_id,
            receiver_id = %stored.receiver_id,
            conversation_id = %conversation.id,
            "消息已发送"
        );

        publish_logged(
            self.deps.publisher.as_ref(),
            DomainEvent::MessageCreated {
                message: MessageView {
                    message: stored.clone(),
                    sender: sender.summary(),
                    receiver: receiver.summary(),
                },
            },
        )
        .await;
        self.deps.conversations.announce(&conversation).await;

        Ok(stored)
    }

    /// 两人之间的消息，按时间正序返回
    pub async fn list_between(
        &self,
        caller: AccountId,
        other: AccountId,
        page: PageRequest,
    ) -> Result<Vec<Message>, ApplicationError> {
        let Ok(pair) = ParticipantPair::new(caller, other) else {
            return Ok(Vec::new());
        };
        let limit = page.effective_limit(
            self.deps.config.default_page_size,
            self.deps.config.max_page_size,
        );

        let mut messages = self
            .deps
            .message_repository
            .list_between(pair, limit, page.offset())
            .await?;
        // 存储返回最新的在前
        messages.reverse();
        Ok(messages)
    }

    /// 只有接收者可以标记已读；对其他人表现为消息不存在。
    pub async fn mark_read(
        &self,
        caller: AccountId,
        message_id: MessageId,
    ) -> Result<Message, ApplicationError> {
        let not_found = || DomainError::MessageNotFound(message_id.to_string());

        let message = self
            .deps
            .message_repository
            .find_by_id(message_id)
            .await?
            .ok_or_else(not_found)?;
        if message.receiver_id != caller {
            return Err(not_found().into());
        }
        if message.is_read {
            return Ok(message);
        }

        let transition = self
            .deps
            .message_repository
            .mark_read(message_id, self.deps.clock.now())
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => ApplicationError::from(not_found()),
                err => err.into(),
            })?;

        match transition {
            ReadTransition::Marked(message) => {
                tracing::debug!(message_id = %message.id, reader_id = %caller, "消息已读");
                if let Some(read_at) = message.read_at {
                    publish_logged(
                        self.deps.publisher.as_ref(),
                        DomainEvent::MessageRead {
                            message_id: message.id,
                            sender_id: message.sender_id,
                            receiver_id: message.receiver_id,
                            read_at,
                        },
                    )
                    .await;
                }
                Ok(message)
            }
            ReadTransition::AlreadyRead(message) => Ok(message),
        }
    }

    /// 只有发送者可以删除消息
    pub async fn delete(
        &self,
        caller: AccountId,
        message_id: MessageId,
    ) -> Result<(), ApplicationError> {
        let not_found = || DomainError::MessageNotFound(message_id.to_string());

        let message = self
            .deps
            .message_repository
            .find_by_id(message_id)
            .await?
            .ok_or_else(not_found)?;
        if message.sender_id != caller {
            return Err(DomainError::NotMessageSender.into());
        }

        self.deps
            .message_repository
            .delete(message_id)
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => ApplicationError::from(not_found()),
                err => err.into(),
            })?;

        tracing::info!(message_id = %message_id, sender_id = %caller, "消息已删除");
        Ok(())
    }

    pub async fn unread_count(&self, account: AccountId) -> Result<u64, ApplicationError> {
        Ok(self.deps.message_repository.unread_count(account).await?)
    }

    async fn require_account(&self, id: AccountId) -> Result<Account, ApplicationError> {
        self.deps
            .account_repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(id.to_string()).into())
    }
}
