use std::sync::Arc;

use domain::{AccountId, Conversation, ConversationId, DomainError, ParticipantPair};

use crate::{
    broadcaster::{publish_logged, EventPublisher},
    clock::Clock,
    error::ApplicationError,
    events::DomainEvent,
    repository::{constraints, AccountRepository, ConversationRepository},
};

pub struct ConversationServiceDependencies {
    pub account_repository: Arc<dyn AccountRepository>,
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub clock: Arc<dyn Clock>,
    pub publisher: Arc<dyn EventPublisher>,
}

pub struct ConversationService {
    deps: ConversationServiceDependencies,
}

impl ConversationService {
    pub fn new(deps: ConversationServiceDependencies) -> Self {
        Self { deps }
    }

    /// 返回两人之间已有的私聊会话，不存在时创建。
    pub async fn find_or_create_direct(
        &self,
        a: AccountId,
        b: AccountId,
    ) -> Result<Conversation, ApplicationError> {
        let (conversation, created) = self.resolve_direct(a, b).await?;
        if created {
            self.announce(&conversation).await;
        }
        Ok(conversation)
    }

    /// 查找或创建私聊会话，不发布事件。第二个返回值表示本次是否新建。
    pub(crate) async fn resolve_direct(
        &self,
        a: AccountId,
        b: AccountId,
    ) -> Result<(Conversation, bool), ApplicationError> {
        let pair = ParticipantPair::new(a, b)?;

        if let Some(existing) = self.deps.conversation_repository.find_direct(pair).await? {
            return Ok((existing, false));
        }

        self.require_accounts(&[pair.low(), pair.high()]).await?;

        let conversation =
            Conversation::new_direct(ConversationId::generate(), a, pair, self.deps.clock.now());
        match self.deps.conversation_repository.create(conversation).await {
            Ok(created) => {
                tracing::info!(
                    conversation_id = %created.id,
                    low = %pair.low(),
                    high = %pair.high(),
                    "私聊会话已创建"
                );
                Ok((created, true))
            }
            // 并发创建时输掉竞争的一方读取胜者写入的会话
            Err(err) if err.is_conflict_on(constraints::CONVERSATIONS_DIRECT) => {
                tracing::debug!(pair = %pair.key(), "私聊会话已被并发创建，改为读取");
                let winner = self
                    .deps
                    .conversation_repository
                    .find_direct(pair)
                    .await?
                    .ok_or_else(|| {
                        ApplicationError::internal(format!(
                            "direct conversation {} conflicted but cannot be read back",
                            pair.key()
                        ))
                    })?;
                Ok((winner, false))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn create_group(
        &self,
        caller: AccountId,
        participant_ids: &[AccountId],
    ) -> Result<Conversation, ApplicationError> {
        let conversation = Conversation::new_group(
            ConversationId::generate(),
            caller,
            participant_ids,
            self.deps.clock.now(),
        )?;
        self.require_accounts(&conversation.participants).await?;

        let created = self
            .deps
            .conversation_repository
            .create(conversation)
            .await?;
        tracing::info!(
            conversation_id = %created.id,
            participants = created.participants.len(),
            "群聊会话已创建"
        );

        self.announce(&created).await;
        Ok(created)
    }

    /// 参与的会话，最近活跃的在前
    pub async fn list_conversations(
        &self,
        account: AccountId,
    ) -> Result<Vec<Conversation>, ApplicationError> {
        Ok(self.deps.conversation_repository.list_for(account).await?)
    }

    /// 非参与者与不存在的会话返回同样的错误
    pub async fn get_conversation(
        &self,
        caller: AccountId,
        id: ConversationId,
    ) -> Result<Conversation, ApplicationError> {
        self.deps
            .conversation_repository
            .find_by_id(id)
            .await?
            .filter(|conversation| conversation.has_participant(caller))
            .ok_or_else(|| DomainError::ConversationNotFound(id.to_string()).into())
    }

    async fn require_accounts(&self, ids: &[AccountId]) -> Result<(), ApplicationError> {
        let found = self.deps.account_repository.find_many(ids).await?;
        if let Some(missing) = ids
            .iter()
            .find(|id| !found.iter().any(|account| account.id == **id))
        {
            return Err(DomainError::AccountNotFound(missing.to_string()).into());
        }
        Ok(())
    }

    pub(crate) async fn announce(&self, conversation: &Conversation) {
        publish_logged(
            self.deps.publisher.as_ref(),
            DomainEvent::ConversationsChanged {
                conversation_id: conversation.id,
                participants: conversation.participants.clone(),
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::ErrorKind;
    use crate::repository::{MockAccountRepository, MockConversationRepository};
    use crate::services::test_support::RecordingPublisher;
    use chrono::Utc;
    use domain::{Account, Email, Handle, RepositoryError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn account(id: AccountId) -> Account {
        let handle = format!("user{}", &id.to_string()[..8]);
        Account::register(
            id,
            Handle::parse(handle.clone()).unwrap(),
            Email::parse(format!("{handle}@example.com")).unwrap(),
            None,
            Utc::now(),
        )
    }

    fn service(
        accounts: MockAccountRepository,
        conversations: MockConversationRepository,
        publisher: Arc<RecordingPublisher>,
    ) -> ConversationService {
        ConversationService::new(ConversationServiceDependencies {
            account_repository: Arc::new(accounts),
            conversation_repository: Arc::new(conversations),
            clock: Arc::new(SystemClock),
            publisher,
        })
    }

    fn all_accounts_exist() -> MockAccountRepository {
        let mut accounts = MockAccountRepository::new();
        accounts
            .expect_find_many()
            .returning(|ids| Ok(ids.iter().copied().map(account).collect()));
        accounts
    }

    #[tokio::test]
    async fn same_account_twice_is_invalid() {
        let id = AccountId::generate();
        let service = service(
            MockAccountRepository::new(),
            MockConversationRepository::new(),
            Arc::new(RecordingPublisher::default()),
        );
        let err = service.find_or_create_direct(id, id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn race_loser_reads_the_winner() {
        let a = AccountId::generate();
        let b = AccountId::generate();
        let pair = ParticipantPair::new(a, b).unwrap();
        let winner = Conversation::new_direct(ConversationId::generate(), b, pair, Utc::now());
        let winner_id = winner.id;

        let lookups = Arc::new(AtomicUsize::new(0));
        let mut conversations = MockConversationRepository::new();
        let counter = lookups.clone();
        conversations.expect_find_direct().returning(move |_| {
            // 第一次查询时尚未创建，第二次读到胜者
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(None)
            } else {
                Ok(Some(winner.clone()))
            }
        });
        conversations
            .expect_create()
            .returning(|_| Err(RepositoryError::conflict(constraints::CONVERSATIONS_DIRECT)));

        let publisher = Arc::new(RecordingPublisher::default());
        let service = service(all_accounts_exist(), conversations, publisher.clone());
        let conversation = service.find_or_create_direct(a, b).await.unwrap();

        assert_eq!(conversation.id, winner_id);
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn unknown_participant_is_not_found() {
        let caller = AccountId::generate();
        let ghost = AccountId::generate();
        let mut accounts = MockAccountRepository::new();
        accounts
            .expect_find_many()
            .returning(move |_| Ok(vec![account(caller)]));
        let mut conversations = MockConversationRepository::new();
        conversations.expect_create().never();

        let service = service(
            accounts,
            conversations,
            Arc::new(RecordingPublisher::default()),
        );
        let err = service.create_group(caller, &[ghost]).await.unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::AccountNotFound(ref id)) if *id == ghost.to_string()
        ));
    }

    #[tokio::test]
    async fn non_participant_cannot_see_conversation() {
        let a = AccountId::generate();
        let b = AccountId::generate();
        let pair = ParticipantPair::new(a, b).unwrap();
        let conversation = Conversation::new_direct(ConversationId::generate(), a, pair, Utc::now());
        let id = conversation.id;

        let mut conversations = MockConversationRepository::new();
        conversations
            .expect_find_by_id()
            .returning(move |_| Ok(Some(conversation.clone())));

        let service = service(
            MockAccountRepository::new(),
            conversations,
            Arc::new(RecordingPublisher::default()),
        );
        assert!(service.get_conversation(a, id).await.is_ok());
        let err = service
            .get_conversation(AccountId::generate(), id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
