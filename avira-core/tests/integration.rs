//! End-to-end send flows against scripted assistant responses.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use avira_core::{
    AssistantBackend, AssistantRequest, ByteStream, ChatSession, ConversationGateway, ConversationKey, Identity,
    MemoryGateway, MemoryGatewayError, Message, NewConversation, Persisted, RemoteConversation, RoundState, Sender,
    StoreEvent, UserProfile, NO_RESPONSE_BODY,
};
use bytes::Bytes;
use futures::stream;
use tokio::sync::{broadcast, mpsc, Notify};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct TestError(String);

enum Script {
    Chunks(Vec<&'static str>),
    NoBody,
    Refuse(&'static str),
    Broken(&'static str, &'static str),
    Live(mpsc::UnboundedReceiver<Result<Bytes, TestError>>),
    /// The request is sent but the response never starts.
    Stall,
}

/// Replies to each request with the next script in line.
struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    opened: mpsc::UnboundedSender<AssistantRequest>,
}

impl ScriptedBackend {
    fn new(scripts: Vec<Script>) -> (Self, mpsc::UnboundedReceiver<AssistantRequest>) {
        let (opened, requests) = mpsc::unbounded_channel();
        let backend = Self {
            scripts: Mutex::new(scripts.into()),
            opened,
        };
        (backend, requests)
    }
}

impl AssistantBackend for ScriptedBackend {
    type Error = TestError;

    async fn open_stream(&self, request: &AssistantRequest) -> Result<Option<ByteStream<TestError>>, TestError> {
        let script = self.scripts.lock().unwrap().pop_front();
        self.opened.send(request.clone()).unwrap();

        match script {
            Some(Script::Chunks(chunks)) => {
                let items = chunks.into_iter().map(|c| Ok(Bytes::from_static(c.as_bytes())));
                Ok(Some(Box::pin(stream::iter(items.collect::<Vec<_>>()))))
            }
            Some(Script::NoBody) => Ok(None),
            Some(Script::Refuse(reason)) => Err(TestError(reason.to_string())),
            Some(Script::Broken(chunk, reason)) => {
                let items = vec![
                    Ok(Bytes::from_static(chunk.as_bytes())),
                    Err(TestError(reason.to_string())),
                ];
                Ok(Some(Box::pin(stream::iter(items))))
            }
            Some(Script::Live(rx)) => {
                let body = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
                Ok(Some(Box::pin(body)))
            }
            Some(Script::Stall) => std::future::pending().await,
            None => panic!("No script left for {:?}", request.content),
        }
    }
}

/// A `MemoryGateway` whose next `create` or `append` can be parked until
/// the test releases it.
struct GatedGateway {
    inner: MemoryGateway,
    hold_create: AtomicBool,
    hold_append: AtomicBool,
    parked: mpsc::UnboundedSender<&'static str>,
    release: Notify,
}

impl GatedGateway {
    fn new() -> (Self, mpsc::UnboundedReceiver<&'static str>) {
        let (parked, calls) = mpsc::unbounded_channel();
        let gateway = Self {
            inner: MemoryGateway::new(),
            hold_create: AtomicBool::new(false),
            hold_append: AtomicBool::new(false),
            parked,
            release: Notify::new(),
        };
        (gateway, calls)
    }

    async fn park(&self, hold: &AtomicBool, call: &'static str) {
        if hold.swap(false, Ordering::SeqCst) {
            self.parked.send(call).unwrap();
            self.release.notified().await;
        }
    }
}

impl ConversationGateway for GatedGateway {
    type Error = MemoryGatewayError;

    async fn list(&self) -> Result<Vec<RemoteConversation>, Self::Error> {
        self.inner.list().await
    }

    async fn create(&self, conversation: &NewConversation) -> Result<Persisted<RemoteConversation>, Self::Error> {
        // Created before parking, so listings already see it.
        let created = self.inner.create(conversation).await;
        self.park(&self.hold_create, "create").await;
        created
    }

    async fn append(&self, conversation_id: &str, message: &Message) -> Result<Persisted<RemoteConversation>, Self::Error> {
        self.park(&self.hold_append, "append").await;
        self.inner.append(conversation_id, message).await
    }
}

type Session = ChatSession<ScriptedBackend, MemoryGateway>;
type GatedSession = ChatSession<ScriptedBackend, GatedGateway>;

fn ada() -> Identity {
    Identity::Authenticated(UserProfile {
        email: "ada@example.com".to_string(),
        name: Some("Ada".to_string()),
        avatar_url: None,
    })
}

fn session(scripts: Vec<Script>) -> (Arc<Session>, mpsc::UnboundedReceiver<AssistantRequest>) {
    let (backend, requests) = ScriptedBackend::new(scripts);
    (Arc::new(ChatSession::new(backend, MemoryGateway::new(), ada())), requests)
}

fn live() -> (mpsc::UnboundedSender<Result<Bytes, TestError>>, Script) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Script::Live(rx))
}

fn chunk(text: &'static str) -> Result<Bytes, TestError> {
    Ok(Bytes::from_static(text.as_bytes()))
}

fn gated_session(
    scripts: Vec<Script>,
) -> (Arc<GatedSession>, mpsc::UnboundedReceiver<AssistantRequest>, mpsc::UnboundedReceiver<&'static str>) {
    let (backend, requests) = ScriptedBackend::new(scripts);
    let (gateway, parked) = GatedGateway::new();
    (Arc::new(ChatSession::new(backend, gateway, ada())), requests, parked)
}

fn texts<G>(session: &ChatSession<ScriptedBackend, G>, key: ConversationKey) -> Vec<(Sender, String)>
where
    G: ConversationGateway,
{
    session
        .conversation(key)
        .unwrap()
        .messages()
        .iter()
        .map(|m| (m.sender, m.text.clone()))
        .collect()
}

fn persisted(session: &Session, key: ConversationKey) -> Vec<(Sender, String)> {
    stored(session.gateway(), session.conversation(key).unwrap().id())
}

fn stored(gateway: &MemoryGateway, id: Option<&str>) -> Vec<(Sender, String)> {
    let id = id.expect("conversation should have an id");
    gateway
        .get(id)
        .unwrap()
        .messages
        .into_iter()
        .map(|m| (m.sender, m.text))
        .collect()
}

async fn wait_for(events: &mut broadcast::Receiver<StoreEvent>, matches: impl Fn(&StoreEvent) -> bool) {
    loop {
        let event = events.recv().await.unwrap();
        if matches(&event) {
            return;
        }
    }
}

#[tokio::test]
async fn structured_stream_becomes_single_message() {
    let (session, _requests) = session(vec![Script::Chunks(vec![r#"{"out"#, r#"put": "Hel"#, r#"lo"}"#])]);

    let report = session.handle_send("Hi").await.unwrap();

    assert_eq!(report.state, RoundState::Completed);
    assert_eq!(report.text.as_deref(), Some("Hello"));
    let expected = vec![(Sender::User, "Hi".to_string()), (Sender::Assistant, "Hello".to_string())];
    assert_eq!(texts(&session, report.conversation), expected);
    assert_eq!(persisted(&session, report.conversation), expected);
}

#[tokio::test]
async fn raw_stream_becomes_single_message() {
    let (session, _requests) = session(vec![Script::Chunks(vec!["Hel", "lo there"])]);

    let report = session.handle_send("Hi").await.unwrap();

    assert_eq!(
        texts(&session, report.conversation),
        vec![(Sender::User, "Hi".to_string()), (Sender::Assistant, "Hello there".to_string())]
    );
}

#[tokio::test]
async fn first_send_creates_and_selects_conversation() {
    let (tx, script) = live();
    let (session, mut requests) = session(vec![script]);
    let input = "What is the capital city of Australia, again?";

    let task = {
        let session = session.clone();
        tokio::spawn(async move { session.handle_send(input).await })
    };
    requests.recv().await.unwrap();

    let selected = session.selected().unwrap();
    let conversation = session.conversation(selected).unwrap();
    assert_eq!(conversation.subject(), "What is the capital city of Au...");
    assert!(conversation.id().is_some());
    assert!(session.is_typing(selected));

    tx.send(chunk("Canberra.")).unwrap();
    drop(tx);
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.conversation, selected);
    assert!(!session.is_typing(selected));
    assert_eq!(session.conversations().len(), 1);
}

#[tokio::test]
async fn missing_body_adds_one_error_message() {
    let (session, _requests) = session(vec![Script::NoBody]);

    let report = session.handle_send("Hi").await.unwrap();

    assert_eq!(report.state, RoundState::Failed);
    assert_eq!(report.assistant_index, None);
    assert_eq!(
        texts(&session, report.conversation),
        vec![(Sender::User, "Hi".to_string()), (Sender::Error, NO_RESPONSE_BODY.to_string())]
    );
    // Error messages stay local.
    assert_eq!(persisted(&session, report.conversation), vec![(Sender::User, "Hi".to_string())]);
}

#[tokio::test]
async fn refused_request_shows_reason() {
    let (session, _requests) = session(vec![Script::Refuse("connection refused")]);

    let report = session.handle_send("Hi").await.unwrap();

    let messages = texts(&session, report.conversation);
    assert_eq!(messages[1], (Sender::Error, "connection refused".to_string()));
}

#[tokio::test]
async fn broken_stream_keeps_partial_reply() {
    let (session, _requests) = session(vec![Script::Broken("Half an ans", "connection reset")]);

    let report = session.handle_send("Hi").await.unwrap();

    assert_eq!(report.state, RoundState::Failed);
    assert_eq!(
        texts(&session, report.conversation),
        vec![
            (Sender::User, "Hi".to_string()),
            (Sender::Assistant, "Half an ans".to_string()),
            (Sender::Error, "connection reset".to_string()),
        ]
    );
    assert_eq!(persisted(&session, report.conversation).len(), 1);
}

#[tokio::test]
async fn blank_input_is_ignored() {
    let (session, _requests) = session(vec![]);

    assert!(session.handle_send("   \n").await.is_none());
    assert!(session.conversations().is_empty());
}

#[tokio::test]
async fn history_excludes_new_message() {
    let (session, mut requests) = session(vec![Script::Chunks(vec!["one"]), Script::Chunks(vec!["two"])]);

    session.handle_send("first").await.unwrap();
    session.handle_send("second").await.unwrap();

    let first = requests.recv().await.unwrap();
    assert!(first.history.is_empty());
    let second = requests.recv().await.unwrap();
    assert_eq!(second.content, "second");
    let history: Vec<_> = second.history.iter().map(|m| (m.sender, m.text.as_str())).collect();
    assert_eq!(history, vec![(Sender::User, "first"), (Sender::Assistant, "one")]);
}

#[tokio::test]
async fn switching_mid_round_keeps_rounds_apart() {
    let (tx, script) = live();
    let (session, mut requests) = session(vec![script, Script::Chunks(vec![r#"{"output": "Second"}"#])]);
    let alpha_id = session.gateway().insert("alpha...", vec![]);
    let beta_id = session.gateway().insert("beta...", vec![]);

    assert_eq!(session.load_history().await, 2);
    let alpha = session.with_store(|s| s.key_for_id(&alpha_id)).unwrap();
    let beta = session.with_store(|s| s.key_for_id(&beta_id)).unwrap();
    assert_eq!(session.selected(), Some(beta));

    let mut events = session.subscribe();
    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.handle_send("to beta").await })
    };
    requests.recv().await.unwrap();
    tx.send(chunk("First ")).unwrap();
    wait_for(&mut events, |e| {
        matches!(e, StoreEvent::MessageAppended { key, sender: Sender::Assistant, .. } if *key == beta)
    })
    .await;

    session.select(alpha).await.unwrap();
    let second = session.handle_send("to alpha").await.unwrap();
    assert_eq!(second.conversation, alpha);

    tx.send(chunk("answer")).unwrap();
    drop(tx);
    let first = first.await.unwrap().unwrap();

    assert_eq!(first.conversation, beta);
    assert_eq!(
        texts(&session, beta),
        vec![(Sender::User, "to beta".to_string()), (Sender::Assistant, "First answer".to_string())]
    );
    assert_eq!(
        texts(&session, alpha),
        vec![(Sender::User, "to alpha".to_string()), (Sender::Assistant, "Second".to_string())]
    );
    assert_eq!(persisted(&session, beta), texts(&session, beta));
    assert_eq!(persisted(&session, alpha), texts(&session, alpha));
}

#[tokio::test]
async fn anonymous_sends_stay_local() {
    let (backend, _requests) = ScriptedBackend::new(vec![Script::Chunks(vec!["Hello"])]);
    let session = ChatSession::new(backend, MemoryGateway::anonymous(), Identity::Anonymous);

    assert_eq!(session.load_history().await, 0);
    let report = session.handle_send("Hi").await.unwrap();

    let conversation = session.conversation(report.conversation).unwrap();
    assert!(conversation.is_pending());
    assert_eq!(conversation.messages().len(), 2);
    assert!(session.gateway().is_empty());
    assert_eq!(session.greeting(), "Hello, User!");
}

#[tokio::test]
async fn persistence_failure_keeps_local_state() {
    let (session, _requests) = session(vec![Script::Chunks(vec!["Hello"]), Script::Chunks(vec!["Again"])]);
    session.gateway().set_available(false);

    let report = session.handle_send("Hi").await.unwrap();
    session.gateway().set_available(true);
    session.handle_send("Still there?").await.unwrap();

    let conversation = session.conversation(report.conversation).unwrap();
    assert!(conversation.is_pending());
    assert_eq!(conversation.messages().len(), 4);
    assert_eq!(session.selected(), Some(report.conversation));
    assert!(session.gateway().is_empty());
}

#[tokio::test]
async fn cancel_keeps_partial_text_unpersisted() {
    let (tx, script) = live();
    let (session, mut requests) = session(vec![script]);
    let mut events = session.subscribe();

    let task = {
        let session = session.clone();
        tokio::spawn(async move { session.handle_send("Tell me a story").await })
    };
    requests.recv().await.unwrap();
    tx.send(chunk("Once upon")).unwrap();
    wait_for(&mut events, |e| {
        matches!(e, StoreEvent::MessageAppended { sender: Sender::Assistant, .. })
    })
    .await;

    let key = session.selected().unwrap();
    assert!(session.cancel(key));
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.state, RoundState::Cancelled);
    assert_eq!(
        texts(&session, key),
        vec![(Sender::User, "Tell me a story".to_string()), (Sender::Assistant, "Once upon".to_string())]
    );
    assert_eq!(persisted(&session, key), vec![(Sender::User, "Tell me a story".to_string())]);
    assert!(!session.cancel(key));
    drop(tx);
}

#[tokio::test]
async fn cancel_before_first_chunk_adds_nothing() {
    let (session, mut requests) = session(vec![Script::Stall]);

    let task = {
        let session = session.clone();
        tokio::spawn(async move { session.handle_send("Are you there?").await })
    };
    requests.recv().await.unwrap();

    let key = session.selected().unwrap();
    assert!(session.is_typing(key));
    assert!(session.cancel(key));
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.state, RoundState::Cancelled);
    assert_eq!(report.assistant_index, None);
    assert!(!session.is_typing(key));
    let expected = vec![(Sender::User, "Are you there?".to_string())];
    assert_eq!(texts(&session, key), expected);
    assert_eq!(persisted(&session, key), expected);
}

#[tokio::test]
async fn cancel_while_user_message_persists() {
    let (session, mut requests, mut parked) = gated_session(vec![Script::Chunks(vec!["full reply"])]);
    session.gateway().hold_append.store(true, Ordering::SeqCst);

    let task = {
        let session = session.clone();
        tokio::spawn(async move { session.handle_send("Hi").await })
    };
    assert_eq!(parked.recv().await, Some("append"));

    let key = session.selected().unwrap();
    assert!(session.is_typing(key));
    assert!(session.cancel(key));
    session.gateway().release.notify_one();
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.state, RoundState::Cancelled);
    assert_eq!(texts(&session, key), vec![(Sender::User, "Hi".to_string())]);
    let id = session.conversation(key).unwrap().id().map(str::to_owned);
    assert_eq!(stored(&session.gateway().inner, id.as_deref()), vec![(Sender::User, "Hi".to_string())]);
    // The assistant was never asked.
    assert!(requests.try_recv().is_err());
}

#[tokio::test]
async fn history_loaded_during_create_keeps_one_conversation() {
    let (session, _requests, mut parked) = gated_session(vec![Script::Chunks(vec!["Hello!"])]);
    session.gateway().hold_create.store(true, Ordering::SeqCst);

    let task = {
        let session = session.clone();
        tokio::spawn(async move { session.handle_send("Hello there").await })
    };
    assert_eq!(parked.recv().await, Some("create"));

    assert_eq!(session.load_history().await, 1);
    assert_eq!(session.conversations().len(), 2);
    session.gateway().release.notify_one();
    let report = task.await.unwrap().unwrap();

    let conversations = session.conversations();
    assert_eq!(conversations.len(), 1);
    let id = conversations[0].id().map(str::to_owned);
    assert_eq!(conversations[0].key(), report.conversation);
    assert_eq!(session.with_store(|s| s.key_for_id(id.as_deref().unwrap())), Some(report.conversation));
    assert_eq!(session.selected(), Some(report.conversation));

    let expected = vec![(Sender::User, "Hello there".to_string()), (Sender::Assistant, "Hello!".to_string())];
    assert_eq!(texts(&session, report.conversation), expected);
    assert_eq!(stored(&session.gateway().inner, id.as_deref()), expected);
}

#[tokio::test]
async fn search_and_new_conversation() {
    let (session, _requests) = session(vec![Script::Chunks(vec!["a"]), Script::Chunks(vec!["b"])]);

    session.handle_send("Rust lifetimes").await.unwrap();
    session.new_conversation();
    assert_eq!(session.selected(), None);
    session.handle_send("Sourdough recipe").await.unwrap();

    let found = session.search("RUST");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].subject(), "Rust lifetimes...");
    assert_eq!(session.conversations().len(), 2);
}

#[tokio::test]
async fn select_refreshes_from_store_of_record() {
    let (session, _requests) = session(vec![]);
    let id = session.gateway().insert("seeded...", vec![Message::user("old")]);
    session.load_history().await;
    let key = session.with_store(|s| s.key_for_id(&id)).unwrap();

    session.gateway().append(&id, &Message::assistant("new")).await.unwrap();
    session.new_conversation();
    session.select_id(&id).await.unwrap();

    assert_eq!(session.selected(), Some(key));
    assert_eq!(texts(&session, key).len(), 2);
}
