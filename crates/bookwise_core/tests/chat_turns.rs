//! End-to-end turns through `ChatService` against the in-memory store.

use async_trait::async_trait;
use bookwise_core::domain::DEFAULT_SESSION_TITLE;
use bookwise_core::{
    ChatError, ChatService, ChatSettings, CompletionRequest, CompletionResponse,
    CompletionService, ConversationMode, EventHub, HistoryEntry, LibraryStore, MemoryStore,
    Message, NewLibraryItem, NewMessage, PortError, PortResult, Role, Session, SessionStore,
    StoreEvent, Subscription, TextToSpeechService, Topic, TurnState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

//=========================================================================================
// Test Doubles
//=========================================================================================

/// Answers every request from a script and remembers what it was asked.
struct ScriptedCompletion {
    reply: Box<dyn Fn(&CompletionRequest) -> PortResult<CompletionResponse> + Send + Sync>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    fn answering(main: &str) -> Arc<Self> {
        let main = main.to_string();
        Self::with(move |_| Ok(CompletionResponse::new(main.clone())))
    }

    fn failing(message: &str) -> Arc<Self> {
        let message = message.to_string();
        Self::with(move |_| Err(PortError::Unexpected(message.clone())))
    }

    fn with(
        reply: impl Fn(&CompletionRequest) -> PortResult<CompletionResponse> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(reply),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> PortResult<CompletionResponse> {
        self.requests.lock().unwrap().push(request.clone());
        (self.reply)(request)
    }
}

struct FakeSpeech {
    fail: bool,
}

#[async_trait]
impl TextToSpeechService for FakeSpeech {
    async fn generate_audio(&self, text: &str) -> PortResult<String> {
        if self.fail {
            return Err(PortError::Unexpected("voice service down".into()));
        }
        Ok(format!("audio://{}", text.len()))
    }
}

/// Delegates to a `MemoryStore` but can be told to reject some operations.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    reject_appends: AtomicBool,
    reject_reads: AtomicBool,
    reject_renames: AtomicBool,
}

impl FlakyStore {
    fn over(inner: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            reject_appends: AtomicBool::new(false),
            reject_reads: AtomicBool::new(false),
            reject_renames: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn create_session(
        &self,
        owner: Uuid,
        title: &str,
        book_id: Option<Uuid>,
    ) -> PortResult<Session> {
        self.inner.create_session(owner, title, book_id).await
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        self.inner.get_session(session_id).await
    }

    async fn list_sessions(&self, owner: Uuid) -> PortResult<Vec<Session>> {
        self.inner.list_sessions(owner).await
    }

    async fn rename_session(&self, session_id: Uuid, title: &str) -> PortResult<Session> {
        if self.reject_renames.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("permission denied".into()));
        }
        self.inner.rename_session(session_id, title).await
    }

    async fn delete_session(&self, session_id: Uuid) -> PortResult<()> {
        self.inner.delete_session(session_id).await
    }

    async fn append_message(&self, session_id: Uuid, message: NewMessage) -> PortResult<Message> {
        if self.reject_appends.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("network unreachable".into()));
        }
        self.inner.append_message(session_id, message).await
    }

    async fn list_messages(&self, session_id: Uuid) -> PortResult<Vec<Message>> {
        if self.reject_reads.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("read timed out".into()));
        }
        self.inner.list_messages(session_id).await
    }

    fn subscribe(&self, topic: Topic) -> Subscription {
        self.inner.subscribe(topic)
    }
}

//=========================================================================================
// Fixtures
//=========================================================================================

fn chat_settings() -> ChatSettings {
    ChatSettings {
        model: "gemini-2.0-flash".into(),
        conversation_mode: ConversationMode::Chat,
    }
}

fn voice_settings() -> ChatSettings {
    ChatSettings {
        conversation_mode: ConversationMode::Voice,
        ..chat_settings()
    }
}

fn service(
    store: &Arc<MemoryStore>,
    completion: Arc<ScriptedCompletion>,
    speech: Option<Arc<dyn TextToSpeechService>>,
) -> ChatService {
    ChatService::new(store.clone(), store.clone(), completion, speech)
}

async fn add_book(store: &MemoryStore, owner: Uuid, title: &str, author: &str) -> Uuid {
    store
        .add_item(
            owner,
            NewLibraryItem {
                title: title.into(),
                author: author.into(),
                cover_ref: None,
            },
        )
        .await
        .unwrap()
        .id
}

//=========================================================================================
// Tests
//=========================================================================================

#[tokio::test]
async fn successful_turn_persists_both_sides_and_sends_clean_context() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    add_book(&store, owner, "1984", "George Orwell").await;
    let completion = ScriptedCompletion::answering("Hello there!");
    let chat = service(&store, completion.clone(), None);
    let session = chat.create_session(owner).await.unwrap();
    store
        .append_message(session.id, NewMessage::user("hi"))
        .await
        .unwrap();
    store
        .append_message(session.id, NewMessage::assistant("hello"))
        .await
        .unwrap();

    let outcome = chat
        .send_message(owner, session.id, "what is 1984 about?", &chat_settings())
        .await
        .unwrap();

    assert_eq!(outcome.state, TurnState::Completed);
    let request = &completion.requests()[0];
    assert_eq!(request.query, "what is 1984 about?");
    assert_eq!(
        request.chat_history,
        vec![
            HistoryEntry::new(Role::User, "hi"),
            HistoryEntry::new(Role::Assistant, "hello"),
        ]
    );
    assert_eq!(request.model.as_deref(), Some("gemini-2.0-flash"));
    assert_eq!(request.library.as_ref().unwrap()[0].author, "George Orwell");

    let transcript = store.list_messages(session.id).await.unwrap();
    assert_eq!(transcript.len(), 4);
    assert_eq!(transcript[2], outcome.user_message);
    assert_eq!(transcript[3], outcome.assistant_message);
    assert_eq!(transcript[3].content, "Hello there!");
}

#[tokio::test]
async fn completion_failure_appends_exactly_one_error_message() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let chat = service(&store, ScriptedCompletion::failing("quota exceeded"), None);
    let session = chat.create_session(owner).await.unwrap();

    let outcome = chat
        .send_message(owner, session.id, "Who wrote Moby Dick?", &chat_settings())
        .await
        .unwrap();

    assert_eq!(outcome.state, TurnState::Failed);
    let transcript = store.list_messages(session.id).await.unwrap();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[0].content, "Who wrote Moby Dick?");
    assert_eq!(transcript[1].role, Role::Assistant);
    assert!(transcript[1].content.starts_with("Sorry, I encountered an error."));
    assert!(transcript[1].content.contains("quota exceeded"));
    assert_eq!(
        store.get_session(session.id).await.unwrap().title,
        DEFAULT_SESSION_TITLE
    );
}

#[tokio::test]
async fn empty_input_is_rejected_before_any_io() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let completion = ScriptedCompletion::answering("unused");
    let chat = service(&store, completion.clone(), None);
    let session = chat.create_session(owner).await.unwrap();

    let err = chat
        .send_message(owner, session.id, "   \n", &chat_settings())
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::Validation(_)));
    assert!(completion.requests().is_empty());
    assert!(store.list_messages(session.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_user_append_leaves_transcript_untouched() {
    let memory = Arc::new(MemoryStore::new());
    let flaky = FlakyStore::over(memory.clone());
    let owner = Uuid::new_v4();
    let completion = ScriptedCompletion::answering("unused");
    let chat = ChatService::new(flaky.clone(), memory.clone(), completion.clone(), None);
    let session = chat.create_session(owner).await.unwrap();
    flaky.reject_appends.store(true, Ordering::SeqCst);

    let err = chat
        .send_message(owner, session.id, "Is anyone there?", &chat_settings())
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::Store(PortError::Unexpected(_))));
    assert!(completion.requests().is_empty());
    assert!(memory.list_messages(session.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn first_substantive_turn_renames_the_session() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let completion = ScriptedCompletion::with(|request| {
        Ok(CompletionResponse {
            relevant_book_title: request
                .query
                .contains("Bilbo")
                .then(|| "The Hobbit".to_string()),
            ..CompletionResponse::new("answer")
        })
    });
    let chat = service(&store, completion, None);
    let session = chat.create_session(owner).await.unwrap();

    let greeting = chat
        .send_message(owner, session.id, "hi", &chat_settings())
        .await
        .unwrap();
    assert_eq!(greeting.new_title, None);

    let topical = chat
        .send_message(owner, session.id, "Why does Bilbo leave home?", &chat_settings())
        .await
        .unwrap();
    assert_eq!(topical.new_title.as_deref(), Some("The Hobbit"));

    let later = chat
        .send_message(owner, session.id, "And Gandalf?", &chat_settings())
        .await
        .unwrap();
    assert_eq!(later.new_title, None);
    assert_eq!(store.get_session(session.id).await.unwrap().title, "The Hobbit");
}

#[tokio::test]
async fn second_turn_sees_the_first_in_order() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let completion = ScriptedCompletion::with(|request| {
        Ok(CompletionResponse::new(format!("re: {}", request.query)))
    });
    let chat = service(&store, completion.clone(), None);
    let session = chat.create_session(owner).await.unwrap();

    chat.send_message(owner, session.id, "one", &chat_settings())
        .await
        .unwrap();
    chat.send_message(owner, session.id, "two", &chat_settings())
        .await
        .unwrap();

    let second = &completion.requests()[1];
    assert_eq!(
        second.chat_history,
        vec![
            HistoryEntry::new(Role::User, "one"),
            HistoryEntry::new(Role::Assistant, "re: one"),
        ]
    );
}

#[tokio::test]
async fn voice_mode_attaches_audio_to_the_reply() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let speech: Arc<dyn TextToSpeechService> = Arc::new(FakeSpeech { fail: false });
    let chat = service(&store, ScriptedCompletion::answering("Call me Ishmael."), Some(speech));
    let session = chat.create_session(owner).await.unwrap();

    let outcome = chat
        .send_message(owner, session.id, "How does Moby Dick open?", &voice_settings())
        .await
        .unwrap();

    assert_eq!(outcome.assistant_message.audio_src.as_deref(), Some("audio://16"));
    assert_eq!(outcome.assistant_message.content, "Call me Ishmael.");
}

#[tokio::test]
async fn voice_failure_still_delivers_the_text() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let speech: Arc<dyn TextToSpeechService> = Arc::new(FakeSpeech { fail: true });
    let chat = service(&store, ScriptedCompletion::answering("Call me Ishmael."), Some(speech));
    let session = chat.create_session(owner).await.unwrap();

    let outcome = chat
        .send_message(owner, session.id, "How does Moby Dick open?", &voice_settings())
        .await
        .unwrap();

    assert_eq!(outcome.state, TurnState::Completed);
    assert_eq!(outcome.assistant_message.audio_src, None);
    assert!(outcome
        .assistant_message
        .content
        .ends_with("(Sorry, I couldn't generate the audio for this response.)"));
}

#[tokio::test]
async fn book_session_greets_and_focuses_the_book() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let book_id = add_book(&store, owner, "Pride and Prejudice", "Jane Austen").await;
    let completion = ScriptedCompletion::answering("Elizabeth Bennet, mostly.");
    let chat = service(&store, completion.clone(), None);

    let (session, greeting) = chat.start_book_session(owner, book_id).await.unwrap();
    chat.send_message(owner, session.id, "Who is the heroine?", &chat_settings())
        .await
        .unwrap();

    assert_eq!(session.title, "Pride and Prejudice");
    assert_eq!(session.book_id, Some(book_id));
    assert_eq!(
        greeting.content,
        "Hello! I'm your AI companion for \"Pride and Prejudice\". How can I help you today?"
    );
    let request = &completion.requests()[0];
    assert_eq!(request.focus_book.as_ref().unwrap().title, "Pride and Prejudice");
    assert_eq!(request.chat_history, vec![HistoryEntry::new(Role::Assistant, greeting.content)]);
}

#[tokio::test]
async fn other_users_cannot_post_into_a_session() {
    let store = Arc::new(MemoryStore::new());
    let chat = service(&store, ScriptedCompletion::answering("unused"), None);
    let session = chat.create_session(Uuid::new_v4()).await.unwrap();

    let err = chat
        .send_message(Uuid::new_v4(), session.id, "let me in", &chat_settings())
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::Store(PortError::Unauthorized)));
    assert!(store.list_messages(session.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn subscribers_see_the_turn_in_order() {
    let store = Arc::new(MemoryStore::with_events(EventHub::new(32)));
    let owner = Uuid::new_v4();
    let chat = service(&store, ScriptedCompletion::answering("pong"), None);
    let session = chat.create_session(owner).await.unwrap();
    let mut sub = store.subscribe(Topic::Session(session.id));

    chat.send_message(owner, session.id, "ping", &chat_settings())
        .await
        .unwrap();

    let mut contents = Vec::new();
    while contents.len() < 2 {
        match sub.recv().await {
            Some(StoreEvent::MessageAppended { message }) => contents.push(message.content),
            Some(_) => {}
            None => break,
        }
    }
    assert_eq!(contents, vec!["ping".to_string(), "pong".to_string()]);
}

#[tokio::test]
async fn deleting_a_session_after_a_conversation_leaves_no_messages() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let chat = service(&store, ScriptedCompletion::answering("sure"), None);
    let session = chat.create_session(owner).await.unwrap();
    chat.send_message(owner, session.id, "Tell me about Gatsby", &chat_settings())
        .await
        .unwrap();

    store.delete_session(session.id).await.unwrap();

    assert_eq!(store.message_count().await, 0);
    assert!(store.list_sessions(owner).await.unwrap().is_empty());
}

#[tokio::test]
async fn unreadable_transcript_aborts_before_the_query_is_saved() {
    let memory = Arc::new(MemoryStore::new());
    let flaky = FlakyStore::over(memory.clone());
    let owner = Uuid::new_v4();
    let completion = ScriptedCompletion::answering("unused");
    let chat = ChatService::new(flaky.clone(), memory.clone(), completion.clone(), None);
    let session = chat.create_session(owner).await.unwrap();
    flaky.reject_reads.store(true, Ordering::SeqCst);

    let err = chat
        .send_message(owner, session.id, "hello there", &chat_settings())
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::Store(PortError::Unexpected(_))));
    assert!(completion.requests().is_empty());
    assert!(memory.list_messages(session.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_rename_is_reported_without_failing_the_turn() {
    let memory = Arc::new(MemoryStore::new());
    let flaky = FlakyStore::over(memory.clone());
    let owner = Uuid::new_v4();
    let chat = ChatService::new(
        flaky.clone(),
        memory.clone(),
        ScriptedCompletion::answering("It is about a whale."),
        None,
    );
    let session = chat.create_session(owner).await.unwrap();
    flaky.reject_renames.store(true, Ordering::SeqCst);

    let outcome = chat
        .send_message(owner, session.id, "What is Moby Dick about?", &chat_settings())
        .await
        .unwrap();

    assert_eq!(outcome.state, TurnState::Completed);
    assert_eq!(outcome.new_title, None);
    assert_eq!(outcome.notices.len(), 1);
    assert!(outcome.notices[0].contains("permission denied"));
    assert_eq!(outcome.assistant_message.content, "It is about a whale.");
    assert_eq!(
        memory.get_session(session.id).await.unwrap().title,
        DEFAULT_SESSION_TITLE
    );
}

#[tokio::test]
async fn voice_mode_without_a_speech_service_adds_the_note() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let chat = service(&store, ScriptedCompletion::answering("Call me Ishmael."), None);
    let session = chat.create_session(owner).await.unwrap();

    let outcome = chat
        .send_message(owner, session.id, "How does Moby Dick open?", &voice_settings())
        .await
        .unwrap();

    assert_eq!(outcome.state, TurnState::Completed);
    assert_eq!(outcome.assistant_message.audio_src, None);
    assert_eq!(
        outcome.assistant_message.content,
        "Call me Ishmael.\n\n(Sorry, I couldn't generate the audio for this response.)"
    );
}

#[tokio::test]
async fn book_sessions_keep_the_book_title() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let title = "The Curious Incident of the Dog in the Night-Time";
    let book_id = add_book(&store, owner, title, "Mark Haddon").await;
    let chat = service(&store, ScriptedCompletion::answering("The narrator."), None);
    let (session, _) = chat.start_book_session(owner, book_id).await.unwrap();

    let outcome = chat
        .send_message(owner, session.id, "Who is Christopher?", &chat_settings())
        .await
        .unwrap();

    assert_eq!(outcome.new_title, None);
    assert_eq!(store.get_session(session.id).await.unwrap().title, title);
}
