//! crates/bookwise_core/src/chat.rs
//!
//! Orchestrates a single conversational turn: persist the user's message,
//! assemble context, call the completion service, persist the reply.
//!
//! A turn moves through `Idle -> Sending -> AwaitingCompletion -> Completed | Failed -> Idle`.
//! Nothing here retries; every failure ends the turn and the caller decides
//! whether to resubmit.

use crate::completion::{CompletionRequest, CompletionResponse};
use crate::domain::{
    ChatSettings, ConversationMode, Message, NewMessage, Session, DEFAULT_SESSION_TITLE,
};
use crate::history::{assemble_history, library_context, LibraryEntry};
use crate::ports::{
    CompletionService, LibraryStore, PortError, SessionStore, TextToSpeechService,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Titles longer than this are considered placeholders and get replaced.
const AUTO_TITLE_REPLACE_OVER: usize = 30;
const AUTO_TITLE_MAX_CHARS: usize = 40;
const AUTO_TITLE_KEEP_CHARS: usize = 37;

const FOLLOW_UP_HEADER: &str = "**Here are some things you could ask next:**";
const DID_YOU_KNOW_HEADER: &str = "**Did you know?**";
const AUDIO_FAILURE_NOTE: &str = "(Sorry, I couldn't generate the audio for this response.)";

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] PortError),

    #[error("Illegal turn transition from {from:?} to {to:?}")]
    Transition { from: TurnState, to: TurnState },
}

//=========================================================================================
// Turn State Machine
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    /// The user's message is being persisted.
    Sending,
    AwaitingCompletion,
    Completed,
    Failed,
}

impl TurnState {
    pub fn can_transition_to(self, next: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, next),
            (Idle, Sending)
                | (Sending, AwaitingCompletion)
                | (AwaitingCompletion, Completed)
                | (AwaitingCompletion, Failed)
                | (Completed, Idle)
                | (Failed, Idle)
        )
    }
}

/// Tracks the state of one turn and rejects out-of-order transitions.
#[derive(Debug)]
pub struct Turn {
    session_id: Uuid,
    state: TurnState,
}

impl Turn {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            state: TurnState::Idle,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn advance(&mut self, next: TurnState) -> Result<(), ChatError> {
        if !self.state.can_transition_to(next) {
            return Err(ChatError::Transition {
                from: self.state,
                to: next,
            });
        }
        debug!(session_id = %self.session_id, from = ?self.state, to = ?next, "Turn transition");
        self.state = next;
        Ok(())
    }

    /// Moves into `terminal` and straight back to `Idle`, returning `terminal`.
    pub fn finish(&mut self, terminal: TurnState) -> Result<TurnState, ChatError> {
        self.advance(terminal)?;
        self.advance(TurnState::Idle)?;
        Ok(terminal)
    }
}

/// Everything a caller needs to render the result of a turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// How the turn ended: `Completed` or `Failed`.
    pub state: TurnState,
    pub user_message: Message,
    pub assistant_message: Message,
    pub follow_up_questions: Vec<String>,
    /// The session's new title, when the turn renamed it.
    pub new_title: Option<String>,
    /// Non-fatal problems worth telling the user about.
    pub notices: Vec<String>,
}

//=========================================================================================
// Chat Service
//=========================================================================================

#[derive(Clone)]
pub struct ChatService {
    sessions: Arc<dyn SessionStore>,
    library: Arc<dyn LibraryStore>,
    completion: Arc<dyn CompletionService>,
    speech: Option<Arc<dyn TextToSpeechService>>,
}

impl ChatService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        library: Arc<dyn LibraryStore>,
        completion: Arc<dyn CompletionService>,
        speech: Option<Arc<dyn TextToSpeechService>>,
    ) -> Self {
        Self {
            sessions,
            library,
            completion,
            speech,
        }
    }

    /// Opens a general conversation for `owner`.
    pub async fn create_session(&self, owner: Uuid) -> Result<Session, ChatError> {
        let session = self
            .sessions
            .create_session(owner, DEFAULT_SESSION_TITLE, None)
            .await?;
        info!(session_id = %session.id, %owner, "Session created");
        Ok(session)
    }

    /// Opens a companion conversation about one library book and greets the user.
    pub async fn start_book_session(
        &self,
        owner: Uuid,
        book_id: Uuid,
    ) -> Result<(Session, Message), ChatError> {
        let book = self.library.get_item(book_id).await?;
        if book.owner != owner {
            return Err(PortError::Unauthorized.into());
        }
        let session = self
            .sessions
            .create_session(owner, &book.title, Some(book.id))
            .await?;
        let greeting = self
            .sessions
            .append_message(
                session.id,
                NewMessage::assistant(format!(
                    "Hello! I'm your AI companion for \"{}\". How can I help you today?",
                    book.title
                )),
            )
            .await?;
        info!(session_id = %session.id, %book_id, "Book companion session created");
        Ok((session, greeting))
    }

    /// Fetches a session, checking that `owner` may use it.
    pub async fn owned_session(&self, owner: Uuid, session_id: Uuid) -> Result<Session, ChatError> {
        let session = self.sessions.get_session(session_id).await?;
        if session.owner != owner {
            return Err(PortError::Unauthorized.into());
        }
        Ok(session)
    }

    /// Runs one full turn for `content` in `session_id`.
    ///
    /// Returns `Err` only when the user's message could not be accepted or a
    /// write failed; a failed completion call is recorded in the transcript and
    /// reported as a `Failed` outcome.
    pub async fn send_message(
        &self,
        owner: Uuid,
        session_id: Uuid,
        content: &str,
        settings: &ChatSettings,
    ) -> Result<TurnOutcome, ChatError> {
        let query = content.trim();
        if query.is_empty() {
            return Err(ChatError::Validation("message must not be empty".to_string()));
        }

        let session = self.owned_session(owner, session_id).await?;
        let library = self.library.list_items(owner).await?;
        let focus_book = session
            .book_id
            .and_then(|id| library.iter().find(|item| item.id == id))
            .map(LibraryEntry::from);

        // Context comes from the transcript as it stood before this turn, so
        // nothing can fail between persisting the query and answering it.
        let transcript = self.sessions.list_messages(session_id).await?;

        let mut turn = Turn::new(session_id);
        turn.advance(TurnState::Sending)?;
        let user_message = self
            .sessions
            .append_message(session_id, NewMessage::user(query))
            .await?;

        let request = CompletionRequest {
            query: query.to_string(),
            chat_history: assemble_history(&transcript, query),
            library: Some(library_context(&library)),
            focus_book,
            model: Some(settings.model.clone()),
        };

        turn.advance(TurnState::AwaitingCompletion)?;
        let started = Instant::now();
        let result = self.completion.complete(&request).await;
        info!(%session_id, elapsed = ?started.elapsed(), ok = result.is_ok(), "Completion call finished");

        match result {
            Ok(response) => {
                self.complete_turn(turn, session, user_message, response, query, settings)
                    .await
            }
            Err(e) => {
                error!(%session_id, error = %e, "Completion call failed");
                let assistant_message = self
                    .sessions
                    .append_message(
                        session_id,
                        NewMessage::assistant(format!(
                            "Sorry, I encountered an error. Error: {}",
                            e
                        )),
                    )
                    .await?;
                let state = turn.finish(TurnState::Failed)?;
                Ok(TurnOutcome {
                    state,
                    user_message,
                    assistant_message,
                    follow_up_questions: Vec::new(),
                    new_title: None,
                    notices: Vec::new(),
                })
            }
        }
    }

    async fn complete_turn(
        &self,
        mut turn: Turn,
        session: Session,
        user_message: Message,
        response: CompletionResponse,
        query: &str,
        settings: &ChatSettings,
    ) -> Result<TurnOutcome, ChatError> {
        let response = response.normalized();
        let mut notices = Vec::new();

        // Book companion sessions keep the book's title.
        let proposed = match session.book_id {
            Some(_) => None,
            None => auto_title(&session.title, query, &response),
        };
        let new_title = match proposed {
            Some(title) => match self.sessions.rename_session(session.id, &title).await {
                Ok(renamed) => Some(renamed.title),
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "Automatic rename failed");
                    notices.push(format!("Could not automatically rename chat: {}", e));
                    None
                }
            },
            None => None,
        };

        let mut reply = format_reply(&response);
        let mut audio_src = None;
        if settings.conversation_mode == ConversationMode::Voice {
            match &self.speech {
                Some(speech) => match speech.generate_audio(&response.main_response).await {
                    Ok(src) => audio_src = Some(src),
                    Err(e) => {
                        warn!(session_id = %session.id, error = %e, "Speech synthesis failed");
                        reply.push_str("\n\n");
                        reply.push_str(AUDIO_FAILURE_NOTE);
                    }
                },
                None => {
                    reply.push_str("\n\n");
                    reply.push_str(AUDIO_FAILURE_NOTE);
                }
            }
        }

        let assistant_message = self
            .sessions
            .append_message(
                session.id,
                NewMessage::assistant(reply).with_audio(audio_src),
            )
            .await?;
        let state = turn.finish(TurnState::Completed)?;

        Ok(TurnOutcome {
            state,
            user_message,
            assistant_message,
            follow_up_questions: response.follow_up_questions,
            new_title,
            notices,
        })
    }
}

//=========================================================================================
// Pure Helpers
//=========================================================================================

/// Decides whether a turn should rename its session, and to what.
///
/// Only placeholder titles are replaced: the default title or one longer than
/// 30 characters. The model's detected book wins; otherwise the query itself,
/// unless it is a bare greeting.
pub fn auto_title(current: &str, query: &str, response: &CompletionResponse) -> Option<String> {
    if current != DEFAULT_SESSION_TITLE && current.chars().count() <= AUTO_TITLE_REPLACE_OVER {
        return None;
    }

    if let Some(book) = &response.relevant_book_title {
        return Some(book.clone());
    }

    let query = query.trim();
    if query.is_empty() || query.eq_ignore_ascii_case("hi") {
        return None;
    }

    if query.chars().count() > AUTO_TITLE_MAX_CHARS {
        let head: String = query.chars().take(AUTO_TITLE_KEEP_CHARS).collect();
        Some(format!("{head}..."))
    } else {
        Some(query.to_string())
    }
}

/// Renders a completion into the text stored as the assistant's message.
pub fn format_reply(response: &CompletionResponse) -> String {
    let mut reply = response.main_response.clone();

    if !response.follow_up_questions.is_empty() {
        reply.push_str("\n\n");
        reply.push_str(FOLLOW_UP_HEADER);
        for question in &response.follow_up_questions {
            reply.push_str(&format!("\n- \"{}\"", question));
        }
    }

    if let Some(fact) = &response.did_you_know {
        reply.push_str(&format!("\n\n{}\n{}", DID_YOU_KNOW_HEADER, fact));
    }

    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_follows_the_happy_path() {
        let mut turn = Turn::new(Uuid::new_v4());
        for next in [
            TurnState::Sending,
            TurnState::AwaitingCompletion,
            TurnState::Completed,
            TurnState::Idle,
        ] {
            turn.advance(next).unwrap();
        }
        assert_eq!(turn.state(), TurnState::Idle);
    }

    #[test]
    fn finishing_reports_the_terminal_state_and_resets() {
        let mut turn = Turn::new(Uuid::new_v4());
        turn.advance(TurnState::Sending).unwrap();
        turn.advance(TurnState::AwaitingCompletion).unwrap();

        assert_eq!(turn.finish(TurnState::Failed).unwrap(), TurnState::Failed);
        assert_eq!(turn.state(), TurnState::Idle);
        assert!(turn.finish(TurnState::Completed).is_err());
    }

    #[test]
    fn turn_cannot_skip_persisting_the_user_message() {
        let mut turn = Turn::new(Uuid::new_v4());

        let err = turn.advance(TurnState::AwaitingCompletion).unwrap_err();

        assert!(matches!(
            err,
            ChatError::Transition {
                from: TurnState::Idle,
                to: TurnState::AwaitingCompletion
            }
        ));
        assert_eq!(turn.state(), TurnState::Idle);
    }

    #[test]
    fn finished_turn_cannot_be_reopened_without_returning_to_idle() {
        assert!(!TurnState::Failed.can_transition_to(TurnState::Sending));
        assert!(!TurnState::Completed.can_transition_to(TurnState::Failed));
        assert!(TurnState::Failed.can_transition_to(TurnState::Idle));
    }

    #[test]
    fn detected_book_title_wins() {
        let response = CompletionResponse {
            relevant_book_title: Some("1984".into()),
            ..CompletionResponse::new("...")
        };

        assert_eq!(
            auto_title(DEFAULT_SESSION_TITLE, "tell me about Winston", &response),
            Some("1984".to_string())
        );
    }

    #[test]
    fn long_queries_are_shortened() {
        let query = "Can you compare the narrators of Gatsby and Moby Dick in detail?";

        let title = auto_title(DEFAULT_SESSION_TITLE, query, &CompletionResponse::new("..."))
            .unwrap();

        assert_eq!(title.chars().count(), 40);
        assert!(title.ends_with("..."));
        assert!(query.starts_with(title.trim_end_matches("...")));
    }

    #[test]
    fn greeting_does_not_rename() {
        assert_eq!(
            auto_title(DEFAULT_SESSION_TITLE, " Hi ", &CompletionResponse::new("hello!")),
            None
        );
    }

    #[test]
    fn user_chosen_title_is_kept() {
        let response = CompletionResponse {
            relevant_book_title: Some("The Hobbit".into()),
            ..CompletionResponse::new("...")
        };

        assert_eq!(auto_title("Dragons", "who is Smaug?", &response), None);
    }

    #[test]
    fn overlong_title_is_replaced() {
        let current = "a title that is clearly longer than thirty characters";

        assert_eq!(
            auto_title(current, "Pride and Prejudice", &CompletionResponse::new("...")),
            Some("Pride and Prejudice".to_string())
        );
    }

    #[test]
    fn reply_lists_follow_ups_and_trivia() {
        let response = CompletionResponse {
            follow_up_questions: vec!["Who is Julia?".into(), "What is Room 101?".into()],
            did_you_know: Some("Orwell wrote it on Jura.".into()),
            ..CompletionResponse::new("It's a dystopia.")
        };

        assert_eq!(
            format_reply(&response),
            "It's a dystopia.\n\n**Here are some things you could ask next:**\n- \"Who is Julia?\"\n- \"What is Room 101?\"\n\n**Did you know?**\nOrwell wrote it on Jura."
        );
    }

    #[test]
    fn bare_reply_is_just_the_main_response() {
        assert_eq!(format_reply(&CompletionResponse::new("Sure.")), "Sure.");
    }
}
