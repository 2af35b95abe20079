mod account_service;
mod conversation_service;
mod message_service;
mod presence_service;
mod relationship_service;
mod session_service;

#[cfg(test)]
pub(crate) mod test_support;

pub use account_service::{
    AccountService, AccountServiceDependencies, RegisterAccountRequest, UpdateProfileRequest,
};
pub use conversation_service::{ConversationService, ConversationServiceDependencies};
pub use message_service::{MessageService, MessageServiceDependencies, SendMessageRequest};
pub use presence_service::{PresenceService, PresenceServiceDependencies};
pub use relationship_service::{
    PendingFriendRequest, RelationshipService, RelationshipServiceDependencies,
};
pub use session_service::{Session, SessionService, SessionServiceDependencies};
