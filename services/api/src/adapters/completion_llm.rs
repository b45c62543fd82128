//! services/api/src/adapters/completion_llm.rs
//!
//! This module contains the adapter for the conversational completion model.
//! It implements the `CompletionService` port from the `core` crate against any
//! OpenAI-compatible chat-completions endpoint (Gemini by default).

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use bookwise_core::completion::{CompletionRequest, CompletionResponse};
use bookwise_core::domain::Role;
use bookwise_core::history::LibraryEntry;
use bookwise_core::ports::{CompletionService, PortError, PortResult};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, instrument};

const PERSONA: &str = r#"You are a friendly and deeply knowledgeable AI book companion named BookWise. Your personality is that of an enthusiastic librarian and a well-read friend, eager to share insights and spark curiosity. You have read every book in the user's library and can recall details with perfect clarity.

Give responses that are accurate, engaging, detailed and human-like. Use a warm and approachable tone, as if you were having a real conversation."#;

const OUTPUT_FORMAT: &str = r#"Reply with a single JSON object and nothing else. Use these keys:
- "mainResponse": string. Your conversational answer to the user's latest message.
- "followUpQuestions": array of up to three strings. Interesting questions the user might ask next.
- "didYouKnow": optional string. A fun fact or piece of trivia related to the query or the library.
- "relevantBookTitle": optional string. The exact title of the library book the query is mainly about. Leave it out when the query is general.
- "pageReference": optional string. A chapter or page the answer draws on, when you know one.
- "quote": optional string. A short passage from the book that supports the answer."#;

/// Matches a reply wrapped in a markdown code fence, with or without a language tag.
static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(.*?)\n?\s*```\s*$").expect("valid fence regex")
});

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `CompletionService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiCompletionAdapter {
    client: Client<OpenAIConfig>,
    default_model: String,
}

impl OpenAiCompletionAdapter {
    /// Creates a new `OpenAiCompletionAdapter`.
    pub fn new(client: Client<OpenAIConfig>, default_model: String) -> Self {
        Self {
            client,
            default_model,
        }
    }

    fn model_for<'a>(&'a self, request: &'a CompletionRequest) -> &'a str {
        request
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&self.default_model)
    }

    /// Builds the full message list: system prompt, prior turns, then the query.
    fn build_messages(
        request: &CompletionRequest,
    ) -> PortResult<Vec<ChatCompletionRequestMessage>> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(
            request.chat_history.len() + 2,
        );

        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt(request))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        );

        for entry in &request.chat_history {
            let message = match entry.role {
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(entry.content.clone())
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(entry.content.clone())
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
                    .into(),
            };
            messages.push(message);
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.query.clone())
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        );

        Ok(messages)
    }
}

fn describe_book(book: &LibraryEntry) -> String {
    format!("\"{}\" by {}", book.title, book.author)
}

/// Renders the system prompt for a request.
fn system_prompt(request: &CompletionRequest) -> String {
    let mut prompt = String::from(PERSONA);

    prompt.push_str("\n\nUser's library:\n");
    match request.library.as_deref() {
        Some(books) if !books.is_empty() => {
            for book in books {
                prompt.push_str("- ");
                prompt.push_str(&describe_book(book));
                prompt.push('\n');
            }
        }
        _ => prompt.push_str("The user's library is currently empty.\n"),
    }

    if let Some(book) = &request.focus_book {
        prompt.push_str(&format!(
            "\nThis conversation is about {}. Answer as a companion to that book and set \"relevantBookTitle\" to \"{}\".\n",
            describe_book(book),
            book.title
        ));
    }

    if request.chat_history.is_empty() {
        prompt.push_str("\nThis is the beginning of your conversation.\n");
    }

    prompt.push('\n');
    prompt.push_str(OUTPUT_FORMAT);
    prompt
}

/// The reply without a surrounding markdown code fence, trimmed.
pub(crate) fn strip_code_fence(raw: &str) -> &str {
    match CODE_FENCE.captures(raw) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => raw,
    }
    .trim()
}

/// Parses the model's reply into a `CompletionResponse`.
///
/// Code fences are tolerated. A reply that is not JSON at all is kept as the
/// main response so the user still sees the answer.
pub fn parse_reply(raw: &str) -> PortResult<CompletionResponse> {
    let body = strip_code_fence(raw);

    if body.is_empty() {
        return Err(PortError::Unexpected(
            "Completion model returned an empty reply.".to_string(),
        ));
    }

    let parsed = if body.starts_with('{') {
        serde_json::from_str::<CompletionResponse>(body)
            .map_err(|e| PortError::Unexpected(format!("Malformed completion reply: {}", e)))?
    } else {
        debug!("Completion reply was plain text; using it as the main response");
        CompletionResponse::new(body)
    };

    let response = parsed.normalized();
    if response.main_response.is_empty() {
        return Err(PortError::Unexpected(
            "Completion reply contained no main response.".to_string(),
        ));
    }
    Ok(response)
}

//=========================================================================================
// `CompletionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl CompletionService for OpenAiCompletionAdapter {
    #[instrument(skip_all, fields(model = %self.model_for(request), history = request.chat_history.len()))]
    async fn complete(&self, request: &CompletionRequest) -> PortResult<CompletionResponse> {
        let messages = Self::build_messages(request)?;

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(self.model_for(request))
            .messages(messages)
            .response_format(ResponseFormat::JsonObject)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let raw = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("Completion model returned no choices.".to_string())
            })?;

        parse_reply(&raw)
    }
}
