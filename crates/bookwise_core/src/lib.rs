pub mod chat;
pub mod completion;
pub mod domain;
pub mod events;
pub mod history;
pub mod indexing;
pub mod memory;
pub mod ports;
pub mod settings;
pub mod validation;

pub use chat::{ChatError, ChatService, Turn, TurnOutcome, TurnState};
pub use completion::{CompletionRequest, CompletionResponse};
pub use domain::{
    ChatSettings, ConversationMode, LibraryItem, Message, NewLibraryItem, NewMessage, Role,
    Session,
};
pub use events::{EventHub, StoreEvent, Subscription, Topic, UnsubscribeHandle};
pub use history::{assemble_history, HistoryEntry, LibraryEntry};
pub use indexing::{BookIndexer, BookUpload, IndexBookOutcome, IndexBookRequest, UploadOutcome};
pub use memory::MemoryStore;
pub use ports::{
    BookIndexingService, CompletionService, KeyValueStore, LibraryStore, PortError, PortResult,
    SessionStore, TextToSpeechService,
};
pub use settings::SettingsRepository;
