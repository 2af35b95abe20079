//! 依赖注入容器
//!
//! 从一组持久化端口、广播器和身份校验器装配全部应用服务。

use std::sync::Arc;

use config::MessagingConfig;

use crate::{
    auth::Authenticator,
    broadcaster::EventPublisher,
    clock::Clock,
    local_broadcast::LocalEventBroadcaster,
    repository::Repositories,
    services::{
        AccountService, AccountServiceDependencies, ConversationService,
        ConversationServiceDependencies, MessageService, MessageServiceDependencies,
        PresenceService, PresenceServiceDependencies, RelationshipService,
        RelationshipServiceDependencies, SessionService, SessionServiceDependencies,
    },
};

pub struct ServiceContainerDependencies {
    pub repositories: Repositories,
    pub broadcaster: Arc<LocalEventBroadcaster>,
    pub authenticator: Arc<dyn Authenticator>,
    pub clock: Arc<dyn Clock>,
    pub messaging: MessagingConfig,
}

#[derive(Clone)]
pub struct ServiceContainer {
    pub accounts: Arc<AccountService>,
    pub relationships: Arc<RelationshipService>,
    pub conversations: Arc<ConversationService>,
    pub messages: Arc<MessageService>,
    pub presence: Arc<PresenceService>,
    pub sessions: Arc<SessionService>,
}

impl ServiceContainer {
    pub fn new(deps: ServiceContainerDependencies) -> Self {
        let repositories = deps.repositories;
        let publisher: Arc<dyn EventPublisher> = deps.broadcaster.clone();

        let accounts = Arc::new(AccountService::new(AccountServiceDependencies {
            account_repository: repositories.accounts.clone(),
            clock: deps.clock.clone(),
            search_limit: deps.messaging.search_limit,
        }));

        let relationships = Arc::new(RelationshipService::new(RelationshipServiceDependencies {
            account_repository: repositories.accounts.clone(),
            friend_request_repository: repositories.friend_requests.clone(),
            friendship_repository: repositories.friendships.clone(),
            block_repository: repositories.blocks.clone(),
            clock: deps.clock.clone(),
            publisher: publisher.clone(),
        }));

        let conversations = Arc::new(ConversationService::new(ConversationServiceDependencies {
            account_repository: repositories.accounts.clone(),
            conversation_repository: repositories.conversations.clone(),
            clock: deps.clock.clone(),
            publisher: publisher.clone(),
        }));

        let messages = Arc::new(MessageService::new(MessageServiceDependencies {
            account_repository: repositories.accounts.clone(),
            message_repository: repositories.messages.clone(),
            conversations: conversations.clone(),
            clock: deps.clock.clone(),
            publisher: publisher.clone(),
            config: deps.messaging,
        }));

        let presence = Arc::new(PresenceService::new(PresenceServiceDependencies {
            account_repository: repositories.accounts.clone(),
            friendship_repository: repositories.friendships.clone(),
            clock: deps.clock,
            publisher,
        }));

        let sessions = Arc::new(SessionService::new(SessionServiceDependencies {
            account_repository: repositories.accounts,
            authenticator: deps.authenticator,
            broadcaster: deps.broadcaster,
            presence: presence.clone(),
        }));

        Self {
            accounts,
            relationships,
            conversations,
            messages,
            presence,
            sessions,
        }
    }
}
