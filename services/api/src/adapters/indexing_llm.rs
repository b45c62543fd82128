//! services/api/src/adapters/indexing_llm.rs
//!
//! Implements the `BookIndexingService` port. The uploaded PDF is attached to a
//! chat-completions request as a data URI and the model answers with a short
//! JSON verdict.

use crate::adapters::completion_llm::strip_code_fence;
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs,
        ImageUrlArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use bookwise_core::indexing::{IndexBookOutcome, IndexBookRequest};
use bookwise_core::ports::{BookIndexingService, PortError, PortResult};
use tracing::{info, instrument};

const INDEXING_PROMPT: &str = r#"You are an AI assistant that processes and indexes uploaded books.

Analyze the attached book so it can be discussed later. Reply with a single JSON object and nothing else. Use these keys:
- "success": boolean. Whether you could read and index the book.
- "message": string. A short note about the indexing, or why it failed.
- "title": optional string. The book's title, if you can tell.
- "author": optional string. The book's author, if you can tell."#;

/// An adapter that implements `BookIndexingService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiIndexingAdapter {
    client: Client<OpenAIConfig>,
    default_model: String,
}

impl OpenAiIndexingAdapter {
    pub fn new(client: Client<OpenAIConfig>, default_model: String) -> Self {
        Self {
            client,
            default_model,
        }
    }

    fn model_for<'a>(&'a self, request: &'a IndexBookRequest) -> &'a str {
        request
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&self.default_model)
    }
}

/// Parses the model's verdict. Anything but a JSON object is a failure.
pub fn parse_verdict(raw: &str) -> PortResult<IndexBookOutcome> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(PortError::Unexpected(
            "Indexing model returned an empty reply.".to_string(),
        ));
    }
    let mut outcome = serde_json::from_str::<IndexBookOutcome>(body)
        .map_err(|e| PortError::Unexpected(format!("Malformed indexing reply: {}", e)))?;

    outcome.message = outcome.message.trim().to_string();
    if outcome.message.is_empty() {
        outcome.message = if outcome.success {
            "Book indexed successfully.".to_string()
        } else {
            "The book could not be indexed.".to_string()
        };
    }
    outcome.title = outcome.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
    outcome.author = outcome.author.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
    Ok(outcome)
}

#[async_trait]
impl BookIndexingService for OpenAiIndexingAdapter {
    #[instrument(skip_all, fields(model = %self.model_for(request), bytes = request.book_data_uri.len()))]
    async fn index_book(&self, request: &IndexBookRequest) -> PortResult<IndexBookOutcome> {
        let parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(INDEXING_PROMPT)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(
                    ImageUrlArgs::default()
                        .url(request.book_data_uri.clone())
                        .build()
                        .map_err(|e| PortError::Unexpected(e.to_string()))?,
                )
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(parts)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(self.model_for(request))
            .messages([message.into()])
            .response_format(ResponseFormat::JsonObject)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

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
                PortError::Unexpected("Indexing model returned no choices.".to_string())
            })?;

        let outcome = parse_verdict(&raw)?;
        info!(success = outcome.success, "Indexing model answered");
        Ok(outcome)
    }
}
