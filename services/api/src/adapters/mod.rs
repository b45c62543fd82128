pub mod completion_llm;
pub mod db;
pub mod indexing_llm;
pub mod tts;

pub use completion_llm::OpenAiCompletionAdapter;
pub use db::DbAdapter;
pub use indexing_llm::OpenAiIndexingAdapter;
pub use tts::OpenAiTtsAdapter;
