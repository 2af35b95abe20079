mod common;

use application::{DomainEvent, ErrorKind, PageRequest, SendMessageRequest};
use common::{drain, event_types, TestApp};
use domain::{AccountId, MessageKind};

fn text(sender_id: AccountId, receiver_id: AccountId, body: &str) -> SendMessageRequest {
    SendMessageRequest {
        sender_id,
        receiver_id,
        body: body.to_string(),
        kind: MessageKind::Text,
        attachment: None,
    }
}

#[tokio::test]
async fn sending_creates_conversation_and_notifies_both_sides() {
    let app = TestApp::start().await;
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    let mut bob_session = app.services.sessions.connect(&app.token(bob.id)).await.unwrap();
    drain(bob_session.events());

    let message = app
        .services
        .messages
        .send(text(alice.id, bob.id, "hi bob"))
        .await
        .unwrap();
    assert!(!message.is_read);
    assert_eq!(message.body.as_str(), "hi bob");

    let events = drain(bob_session.events());
    assert_eq!(
        event_types(&events),
        vec!["message.created", "conversations.changed"]
    );
    match &events[0] {
        DomainEvent::MessageCreated { message: view } => {
            assert_eq!(view.message.id, message.id);
            assert_eq!(view.sender.handle.as_str(), "alice");
            assert_eq!(view.receiver.handle.as_str(), "bob");
        }
        other => panic!("unexpected event {other:?}"),
    }

    let conversations = app
        .services
        .conversations
        .list_conversations(bob.id)
        .await
        .unwrap();
    assert_eq!(conversations.len(), 1);
    assert!(conversations[0].has_participant(alice.id));

    // 再次发送复用同一个私聊会话
    app.services
        .messages
        .send(text(bob.id, alice.id, "hello alice"))
        .await
        .unwrap();
    let conversations = app
        .services
        .conversations
        .list_conversations(alice.id)
        .await
        .unwrap();
    assert_eq!(conversations.len(), 1);
}

#[tokio::test]
async fn history_is_chronological_and_paged_from_the_newest() {
    let app = TestApp::start().await;
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    for body in ["one", "two", "three", "four"] {
        app.services
            .messages
            .send(text(alice.id, bob.id, body))
            .await
            .unwrap();
    }

    let all = app
        .services
        .messages
        .list_between(bob.id, alice.id, PageRequest::default())
        .await
        .unwrap();
    let bodies: Vec<&str> = all.iter().map(|message| message.body.as_str()).collect();
    assert_eq!(bodies, vec!["one", "two", "three", "four"]);

    let newest = app
        .services
        .messages
        .list_between(alice.id, bob.id, PageRequest::new(Some(2), 0))
        .await
        .unwrap();
    let bodies: Vec<&str> = newest.iter().map(|message| message.body.as_str()).collect();
    assert_eq!(bodies, vec!["three", "four"]);

    let older = app
        .services
        .messages
        .list_between(alice.id, bob.id, PageRequest::new(Some(2), 2))
        .await
        .unwrap();
    let bodies: Vec<&str> = older.iter().map(|message| message.body.as_str()).collect();
    assert_eq!(bodies, vec!["one", "two"]);

    let with_self = app
        .services
        .messages
        .list_between(alice.id, alice.id, PageRequest::default())
        .await
        .unwrap();
    assert!(with_self.is_empty());
}

#[tokio::test]
async fn only_the_receiver_marks_read_and_the_transition_happens_once() {
    let app = TestApp::start().await;
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    let message = app
        .services
        .messages
        .send(text(alice.id, bob.id, "read me"))
        .await
        .unwrap();
    assert_eq!(app.services.messages.unread_count(bob.id).await.unwrap(), 1);
    assert_eq!(app.services.messages.unread_count(alice.id).await.unwrap(), 0);

    let by_sender = app
        .services
        .messages
        .mark_read(alice.id, message.id)
        .await
        .unwrap_err();
    assert_eq!(by_sender.kind(), ErrorKind::NotFound);

    let mut alice_session = app.services.sessions.connect(&app.token(alice.id)).await.unwrap();
    drain(alice_session.events());

    let read = app.services.messages.mark_read(bob.id, message.id).await.unwrap();
    assert!(read.is_read);
    let read_at = read.read_at.expect("read_at is set");
    assert_eq!(event_types(&drain(alice_session.events())), vec!["message.read"]);

    let again = app.services.messages.mark_read(bob.id, message.id).await.unwrap();
    assert_eq!(again.read_at, Some(read_at));
    assert!(drain(alice_session.events()).is_empty());
    assert_eq!(app.services.messages.unread_count(bob.id).await.unwrap(), 0);
}

#[tokio::test]
async fn invalid_messages_are_rejected() {
    let app = TestApp::start().await;
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;
    let messages = &app.services.messages;

    let blank = messages.send(text(alice.id, bob.id, "   ")).await.unwrap_err();
    assert_eq!(blank.kind(), ErrorKind::InvalidArgument);

    let to_self = messages.send(text(alice.id, alice.id, "me")).await.unwrap_err();
    assert_eq!(to_self.kind(), ErrorKind::InvalidArgument);

    let too_long = "x".repeat(app.config.messaging.max_body_chars + 1);
    let long = messages.send(text(alice.id, bob.id, &too_long)).await.unwrap_err();
    assert_eq!(long.kind(), ErrorKind::InvalidArgument);

    let unknown = messages
        .send(text(alice.id, AccountId::generate(), "anyone?"))
        .await
        .unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::NotFound);

    assert!(app
        .services
        .conversations
        .list_conversations(alice.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn only_the_sender_deletes() {
    let app = TestApp::start().await;
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    let message = app
        .services
        .messages
        .send(text(alice.id, bob.id, "oops"))
        .await
        .unwrap();

    let by_receiver = app.services.messages.delete(bob.id, message.id).await.unwrap_err();
    assert_eq!(by_receiver.kind(), ErrorKind::Forbidden);

    app.services.messages.delete(alice.id, message.id).await.unwrap();
    let gone = app.services.messages.delete(alice.id, message.id).await.unwrap_err();
    assert_eq!(gone.kind(), ErrorKind::NotFound);
    assert_eq!(app.services.messages.unread_count(bob.id).await.unwrap(), 0);
}

#[tokio::test]
async fn conversations_are_listed_by_latest_activity() {
    let app = TestApp::start().await;
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;
    let carol = app.register("carol").await;

    let send = |to: AccountId, body: &'static str| {
        let messages = app.services.messages.clone();
        let from = alice.id;
        async move { messages.send(text(from, to, body)).await.unwrap() }
    };

    send(carol.id, "hi carol").await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    send(bob.id, "hi bob").await;

    let listed = app
        .services
        .conversations
        .list_conversations(alice.id)
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed[0].has_participant(bob.id));
    assert!(listed[1].has_participant(carol.id));

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    send(carol.id, "again").await;

    let listed = app
        .services
        .conversations
        .list_conversations(alice.id)
        .await
        .unwrap();
    assert!(listed[0].has_participant(carol.id));
    assert!(listed[1].has_participant(bob.id));
}

#[tokio::test]
async fn reading_one_of_two_unread_leaves_one() {
    let app = TestApp::start().await;
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    let first = app
        .services
        .messages
        .send(text(alice.id, bob.id, "one"))
        .await
        .unwrap();
    app.services
        .messages
        .send(text(alice.id, bob.id, "two"))
        .await
        .unwrap();
    assert_eq!(app.services.messages.unread_count(bob.id).await.unwrap(), 2);

    app.services.messages.mark_read(bob.id, first.id).await.unwrap();
    assert_eq!(app.services.messages.unread_count(bob.id).await.unwrap(), 1);
    // 发送方自己的未读数不受影响
    assert_eq!(app.services.messages.unread_count(alice.id).await.unwrap(), 0);
}
