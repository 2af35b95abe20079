//! 内存存储适配器
//!
//! 所有实体保存在一把 `RwLock` 之后，每个端口方法是一个临界区，
//! 唯一约束与多行写入因此和数据库事务一样是原子的。适用于开发与测试。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use application::repository::{
    constraints, AccountRepository, BlockRepository, ConversationRepository,
    FriendRequestRepository, FriendshipRepository, MessageRepository, ReadTransition,
    Repositories,
};
use async_trait::async_trait;
use domain::{
    Account, AccountId, BlockedUser, Conversation, ConversationId, ConversationKind, Email,
    FriendRequest, FriendRequestId, FriendRequestStatus, Friendship, Message, MessageId,
    ParticipantPair, Presence, RepositoryError, Timestamp,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    friend_requests: HashMap<FriendRequestId, FriendRequest>,
    pending_pairs: HashMap<ParticipantPair, FriendRequestId>,
    friendships: HashMap<(AccountId, AccountId), Friendship>,
    blocks: HashMap<(AccountId, AccountId), BlockedUser>,
    conversations: HashMap<ConversationId, Conversation>,
    direct_conversations: HashMap<ParticipantPair, ConversationId>,
    messages: HashMap<MessageId, StoredMessage>,
    next_seq: u64,
}

struct StoredMessage {
    seq: u64,
    message: Message,
}

impl State {
    fn require_account(&self, id: AccountId) -> Result<(), RepositoryError> {
        if self.accounts.contains_key(&id) {
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn check_account_unique(&self, account: &Account) -> Result<(), RepositoryError> {
        for other in self.accounts.values().filter(|other| other.id != account.id) {
            if other.handle == account.handle {
                return Err(RepositoryError::conflict(constraints::ACCOUNTS_HANDLE));
            }
            if other.email == account.email {
                return Err(RepositoryError::conflict(constraints::ACCOUNTS_EMAIL));
            }
        }
        Ok(())
    }

    fn accounts_sorted_by_handle<I>(&self, ids: I) -> Vec<Account>
    where
        I: IntoIterator<Item = AccountId>,
    {
        let mut accounts: Vec<Account> = ids
            .into_iter()
            .filter_map(|id| self.accounts.get(&id).cloned())
            .collect();
        accounts.sort_by(|a, b| a.handle.cmp(&b.handle));
        accounts
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以同一个存储实例提供全部端口
    pub fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories {
            accounts: self.clone(),
            friend_requests: self.clone(),
            friendships: self.clone(),
            blocks: self.clone(),
            conversations: self.clone(),
            messages: self.clone(),
        }
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn create(&self, account: Account) -> Result<Account, RepositoryError> {
        let mut state = self.state.write().await;
        if state.accounts.contains_key(&account.id) {
            return Err(RepositoryError::conflict("accounts_pkey"));
        }
        state.check_account_unique(&account)?;
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn update_profile(
        &self,
        id: AccountId,
        email: Option<Email>,
        avatar: Option<String>,
        at: Timestamp,
    ) -> Result<Account, RepositoryError> {
        let mut state = self.state.write().await;
        let mut updated = state
            .accounts
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)?;
        updated.update_profile(email, avatar, at);
        state.check_account_unique(&updated)?;
        state.accounts.insert(id, updated.clone());
        Ok(updated)
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, RepositoryError> {
        Ok(self.state.read().await.accounts.get(&id).cloned())
    }

    async fn find_many(&self, ids: &[AccountId]) -> Result<Vec<Account>, RepositoryError> {
        let state = self.state.read().await;
        let unique: HashSet<AccountId> = ids.iter().copied().collect();
        Ok(unique
            .into_iter()
            .filter_map(|id| state.accounts.get(&id).cloned())
            .collect())
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<Account>, RepositoryError> {
        let state = self.state.read().await;
        let query = query.to_lowercase();
        let mut matches = state.accounts_sorted_by_handle(
            state
                .accounts
                .values()
                .filter(|account| account.handle.as_str().contains(&query))
                .map(|account| account.id),
        );
        matches.truncate(limit as usize);
        Ok(matches)
    }

    async fn list_except(&self, excluded: AccountId) -> Result<Vec<Account>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.accounts_sorted_by_handle(
            state.accounts.keys().copied().filter(|id| *id != excluded),
        ))
    }

    async fn set_presence(
        &self,
        id: AccountId,
        presence: Presence,
        at: Timestamp,
    ) -> Result<Account, RepositoryError> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        account.set_presence(presence, at);
        Ok(account.clone())
    }
}

#[async_trait]
impl FriendRequestRepository for MemoryStore {
    async fn create(&self, request: FriendRequest) -> Result<FriendRequest, RepositoryError> {
        let pair = request
            .pair()
            .map_err(|err| RepositoryError::corrupted(err.to_string()))?;
        let mut state = self.state.write().await;
        state.require_account(request.sender_id)?;
        state.require_account(request.receiver_id)?;
        if request.is_pending() && state.pending_pairs.contains_key(&pair) {
            return Err(RepositoryError::conflict(
                constraints::FRIEND_REQUESTS_PENDING_PAIR,
            ));
        }
        if request.is_pending() {
            state.pending_pairs.insert(pair, request.id);
        }
        state.friend_requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn find_by_id(
        &self,
        id: FriendRequestId,
    ) -> Result<Option<FriendRequest>, RepositoryError> {
        Ok(self.state.read().await.friend_requests.get(&id).cloned())
    }

    async fn resolve(&self, request: FriendRequest) -> Result<FriendRequest, RepositoryError> {
        let pair = request
            .pair()
            .map_err(|err| RepositoryError::corrupted(err.to_string()))?;
        let mut state = self.state.write().await;
        let stored = state
            .friend_requests
            .get_mut(&request.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.status != FriendRequestStatus::Pending {
            return Err(RepositoryError::conflict(
                constraints::FRIEND_REQUESTS_PENDING_GUARD,
            ));
        }
        stored.status = request.status;
        stored.responded_at = request.responded_at;
        let resolved = stored.clone();

        state.pending_pairs.remove(&pair);
        if resolved.status == FriendRequestStatus::Accepted {
            let at = resolved.responded_at.unwrap_or(resolved.created_at);
            for edge in Friendship::mirrored(&resolved, at) {
                state
                    .friendships
                    .entry((edge.owner_id, edge.friend_id))
                    .or_insert(edge);
            }
        }
        Ok(resolved)
    }

    async fn list_pending_for(
        &self,
        receiver_id: AccountId,
    ) -> Result<Vec<FriendRequest>, RepositoryError> {
        let state = self.state.read().await;
        let mut pending: Vec<FriendRequest> = state
            .friend_requests
            .values()
            .filter(|request| request.receiver_id == receiver_id && request.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pending)
    }
}

#[async_trait]
impl FriendshipRepository for MemoryStore {
    async fn are_friends(&self, a: AccountId, b: AccountId) -> Result<bool, RepositoryError> {
        Ok(self.state.read().await.friendships.contains_key(&(a, b)))
    }

    async fn list_friends(&self, owner_id: AccountId) -> Result<Vec<Account>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.accounts_sorted_by_handle(
            state
                .friendships
                .keys()
                .filter(|(owner, _)| *owner == owner_id)
                .map(|(_, friend)| *friend),
        ))
    }
}

#[async_trait]
impl BlockRepository for MemoryStore {
    async fn create(&self, block: BlockedUser) -> Result<BlockedUser, RepositoryError> {
        let mut state = self.state.write().await;
        state.require_account(block.blocker_id)?;
        state.require_account(block.blocked_id)?;
        let key = (block.blocker_id, block.blocked_id);
        if state.blocks.contains_key(&key) {
            return Err(RepositoryError::conflict(constraints::BLOCKED_USERS));
        }
        state.blocks.insert(key, block.clone());
        Ok(block)
    }

    async fn delete(
        &self,
        blocker_id: AccountId,
        blocked_id: AccountId,
    ) -> Result<(), RepositoryError> {
        self.state
            .write()
            .await
            .blocks
            .remove(&(blocker_id, blocked_id));
        Ok(())
    }

    async fn exists(
        &self,
        blocker_id: AccountId,
        blocked_id: AccountId,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .blocks
            .contains_key(&(blocker_id, blocked_id)))
    }

    async fn list_blocked(&self, blocker_id: AccountId) -> Result<Vec<Account>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.accounts_sorted_by_handle(
            state
                .blocks
                .keys()
                .filter(|(blocker, _)| *blocker == blocker_id)
                .map(|(_, blocked)| *blocked),
        ))
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let mut state = self.state.write().await;
        for participant in &conversation.participants {
            state.require_account(*participant)?;
        }
        if state.conversations.contains_key(&conversation.id) {
            return Err(RepositoryError::conflict("conversations_pkey"));
        }

        if conversation.kind == ConversationKind::Direct {
            let pair = conversation.direct_pair().ok_or_else(|| {
                RepositoryError::corrupted("direct conversation needs two distinct participants")
            })?;
            if state.direct_conversations.contains_key(&pair) {
                return Err(RepositoryError::conflict(constraints::CONVERSATIONS_DIRECT));
            }
            state.direct_conversations.insert(pair, conversation.id);
        }

        state
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.state.read().await.conversations.get(&id).cloned())
    }

    async fn find_direct(
        &self,
        pair: ParticipantPair,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .direct_conversations
            .get(&pair)
            .and_then(|id| state.conversations.get(id))
            .cloned())
    }

    async fn list_for(&self, account_id: AccountId) -> Result<Vec<Conversation>, RepositoryError> {
        let state = self.state.read().await;
        let mut conversations: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|conversation| conversation.has_participant(account_id))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(conversations)
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn append(
        &self,
        message: Message,
        conversation_id: ConversationId,
    ) -> Result<Message, RepositoryError> {
        let mut state = self.state.write().await;
        state.require_account(message.sender_id)?;
        state.require_account(message.receiver_id)?;
        if state.messages.contains_key(&message.id) {
            return Err(RepositoryError::conflict("messages_pkey"));
        }

        let conversation = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        conversation.touch(message.created_at);

        state.next_seq += 1;
        let seq = state.next_seq;
        state.messages.insert(
            message.id,
            StoredMessage {
                seq,
                message: message.clone(),
            },
        );
        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .messages
            .get(&id)
            .map(|stored| stored.message.clone()))
    }

    async fn list_between(
        &self,
        pair: ParticipantPair,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.read().await;
        let mut between: Vec<&StoredMessage> = state
            .messages
            .values()
            .filter(|stored| {
                let message = &stored.message;
                message.sender_id != message.receiver_id
                    && pair.contains(message.sender_id)
                    && pair.contains(message.receiver_id)
            })
            .collect();
        between.sort_by(|a, b| {
            b.message
                .created_at
                .cmp(&a.message.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        Ok(between
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|stored| stored.message.clone())
            .collect())
    }

    async fn mark_read(
        &self,
        id: MessageId,
        at: Timestamp,
    ) -> Result<ReadTransition, RepositoryError> {
        let mut state = self.state.write().await;
        let stored = state.messages.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if stored.message.mark_read(at) {
            Ok(ReadTransition::Marked(stored.message.clone()))
        } else {
            Ok(ReadTransition::AlreadyRead(stored.message.clone()))
        }
    }

    async fn delete(&self, id: MessageId) -> Result<(), RepositoryError> {
        self.state
            .write()
            .await
            .messages
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn unread_count(&self, receiver_id: AccountId) -> Result<u64, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .values()
            .filter(|stored| stored.message.receiver_id == receiver_id && !stored.message.is_read)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use domain::{Email, Handle, MessageBody, MessageKind};

    async fn register(store: &MemoryStore, handle: &str) -> Account {
        let account = Account::register(
            AccountId::generate(),
            Handle::parse(handle).unwrap(),
            Email::parse(format!("{handle}@example.com")).unwrap(),
            None,
            Utc::now(),
        );
        AccountRepository::create(store, account).await.unwrap()
    }

    #[tokio::test]
    async fn handle_and_email_are_unique() {
        let store = MemoryStore::new();
        let alice = register(&store, "alice").await;

        let mut clone = alice.clone();
        clone.id = AccountId::generate();
        let err = AccountRepository::create(&store, clone.clone()).await.unwrap_err();
        assert!(err.is_conflict_on(constraints::ACCOUNTS_HANDLE));

        clone.handle = Handle::parse("alice2").unwrap();
        let err = AccountRepository::create(&store, clone).await.unwrap_err();
        assert!(err.is_conflict_on(constraints::ACCOUNTS_EMAIL));
    }

    #[tokio::test]
    async fn pending_pair_is_unique_in_both_directions() {
        let store = MemoryStore::new();
        let a = register(&store, "a").await.id;
        let b = register(&store, "b").await.id;
        let now = Utc::now();

        FriendRequestRepository::create(
            &store,
            FriendRequest::new(FriendRequestId::generate(), a, b, now).unwrap(),
        )
        .await
        .unwrap();
        let err = FriendRequestRepository::create(
            &store,
            FriendRequest::new(FriendRequestId::generate(), b, a, now).unwrap(),
        )
        .await
        .unwrap_err();
        assert!(err.is_conflict_on(constraints::FRIEND_REQUESTS_PENDING_PAIR));
    }

    #[tokio::test]
    async fn resolve_happens_once_and_creates_mirrored_edges() {
        let store = MemoryStore::new();
        let a = register(&store, "a").await.id;
        let b = register(&store, "b").await.id;
        let now = Utc::now();
        let request = FriendRequestRepository::create(
            &store,
            FriendRequest::new(FriendRequestId::generate(), a, b, now).unwrap(),
        )
        .await
        .unwrap();

        let mut accepted = request.clone();
        accepted
            .resolve(domain::FriendRequestDecision::Accept, now)
            .unwrap();
        store.resolve(accepted.clone()).await.unwrap();
        assert!(store.are_friends(a, b).await.unwrap());
        assert!(store.are_friends(b, a).await.unwrap());

        let err = store.resolve(accepted).await.unwrap_err();
        assert!(err.is_conflict_on(constraints::FRIEND_REQUESTS_PENDING_GUARD));
    }

    #[tokio::test]
    async fn messages_with_equal_timestamps_keep_insertion_order() {
        let store = MemoryStore::new();
        let a = register(&store, "a").await.id;
        let b = register(&store, "b").await.id;
        let pair = ParticipantPair::new(a, b).unwrap();
        let now = Utc::now();
        let conversation = ConversationRepository::create(
            &store,
            Conversation::new_direct(ConversationId::generate(), a, pair, now),
        )
        .await
        .unwrap();

        for body in ["first", "second", "third"] {
            let message = Message::new(
                MessageId::generate(),
                a,
                b,
                MessageBody::new(body).unwrap(),
                MessageKind::Text,
                None,
                now + Duration::seconds(1),
            );
            store.append(message, conversation.id).await.unwrap();
        }

        let newest_first = store.list_between(pair, 10, 0).await.unwrap();
        let bodies: Vec<&str> = newest_first.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["third", "second", "first"]);

        let touched = ConversationRepository::find_by_id(&store, conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(touched.last_activity_at, now + Duration::seconds(1));

        let page = store.list_between(pair, 1, 1).await.unwrap();
        assert_eq!(page[0].body.as_str(), "second");
    }
}
