//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：好友关系、会话目录、消息存储、在线状态，
//! 以及对外部适配器（持久化、身份校验、事件广播）的抽象。

pub mod auth;
pub mod broadcaster;
pub mod clock;
pub mod container;
pub mod error;
pub mod events;
pub mod local_broadcast;
pub mod pagination;
pub mod repository;
pub mod services;

pub use auth::{AuthError, AuthenticatedAccount, Authenticator};
pub use broadcaster::{BroadcastError, EventPublisher};
pub use clock::{Clock, SystemClock};
pub use container::{ServiceContainer, ServiceContainerDependencies};
pub use error::{ApplicationError, ErrorKind};
pub use events::{DomainEvent, MessageView};
pub use local_broadcast::{EventSubscription, LocalEventBroadcaster, SessionId};
pub use pagination::PageRequest;
pub use repository::{
    AccountRepository, BlockRepository, ConversationRepository, FriendRequestRepository,
    FriendshipRepository, MessageRepository, ReadTransition, Repositories,
};
pub use services::{
    AccountService, AccountServiceDependencies, ConversationService,
    ConversationServiceDependencies, MessageService, MessageServiceDependencies,
    PendingFriendRequest, PresenceService, PresenceServiceDependencies, RegisterAccountRequest,
    RelationshipService, RelationshipServiceDependencies, SendMessageRequest, Session,
    SessionService, SessionServiceDependencies, UpdateProfileRequest,
};
