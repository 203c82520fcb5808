//! services/api/src/adapters/llm.rs
//!
//! A thin wrapper over the OpenAI chat completions API for prompts that must
//! answer with a single JSON object. Used by the extraction and generation adapters.

use std::sync::OnceLock;
use std::time::Instant;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use autorfp_core::ports::{PortError, PortResult};
use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::adapters::retry::{with_retry, AttemptError};
use crate::config::RetryPolicy;

/// Sends JSON-mode chat completions with the shared retry policy.
#[derive(Clone)]
pub struct JsonChat {
    client: Client<OpenAIConfig>,
    model: String,
    retry: RetryPolicy,
}

impl JsonChat {
    pub fn new(client: Client<OpenAIConfig>, model: String, retry: RetryPolicy) -> Self {
        Self {
            client,
            model,
            retry,
        }
    }

    /// Sends `system` and `user` as one exchange and parses the reply as `T`.
    pub async fn complete<T>(&self, label: &str, system: &str, user: &str) -> PortResult<T>
    where
        T: DeserializeOwned + Send,
    {
        let request = self.request(system, user)?;
        let client = &self.client;
        let started = Instant::now();

        let value = with_retry(&self.retry, label, || {
            let request = request.clone();
            async move {
                let response = client.chat().create(request).await.map_err(classify)?;
                let content = response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .filter(|content| !content.trim().is_empty())
                    .ok_or_else(|| {
                        AttemptError::Fatal("the model returned no content".to_string())
                    })?;
                parse_json::<T>(&content).map_err(AttemptError::Fatal)
            }
        })
        .await?;

        debug!(
            label,
            model = %self.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chat completion parsed"
        );
        Ok(value)
    }

    fn request(&self, system: &str, user: &str) -> PortResult<CreateChatCompletionRequest> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(system)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(user)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![system.into(), user.into()])
            .response_format(ResponseFormat::JsonObject)
            .temperature(0.2)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

/// Sorts an OpenAI client error into retryable and terminal failures.
fn classify(e: OpenAIError) -> AttemptError {
    match e {
        OpenAIError::Reqwest(e) => AttemptError::from(e),
        OpenAIError::ApiError(api) => {
            let kind = api.r#type.clone().unwrap_or_default();
            let code = api.code.clone().unwrap_or_default();
            if kind.contains("server_error") || code.contains("rate_limit") {
                AttemptError::Transient(api.message)
            } else {
                AttemptError::Fatal(api.message)
            }
        }
        other => AttemptError::Fatal(other.to_string()),
    }
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("fence pattern is valid")
    })
}

/// Parses a model reply as JSON, tolerating markdown fences and surrounding prose.
pub fn parse_json<T: DeserializeOwned>(content: &str) -> Result<T, String> {
    let unfenced = fence_pattern()
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map_or(content, |m| m.as_str())
        .trim();

    match serde_json::from_str::<T>(unfenced) {
        Ok(value) => Ok(value),
        Err(first_error) => {
            // Fall back to the outermost object when the model wrapped it in prose.
            let object = unfenced
                .find('{')
                .zip(unfenced.rfind('}'))
                .filter(|(start, end)| start < end)
                .map(|(start, end)| &unfenced[start..=end]);
            object
                .and_then(|object| serde_json::from_str::<T>(object).ok())
                .ok_or_else(|| format!("malformed JSON from the model: {}", first_error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        answer: String,
    }

    #[test]
    fn plain_json_is_parsed() {
        let reply: Reply = parse_json(r#"{"answer": "yes"}"#).unwrap();
        assert_eq!(reply.answer, "yes");
    }

    #[test]
    fn fenced_json_is_parsed() {
        let reply: Reply = parse_json("```json\n{\"answer\": \"fenced\"}\n```").unwrap();
        assert_eq!(reply.answer, "fenced");
    }

    #[test]
    fn json_surrounded_by_prose_is_parsed() {
        let reply: Reply =
            parse_json("Here is the result: {\"answer\": \"inline\"} Hope it helps.").unwrap();
        assert_eq!(reply.answer, "inline");
    }

    #[test]
    fn malformed_replies_are_rejected() {
        let err = parse_json::<Reply>("I could not find any questions.").unwrap_err();
        assert!(err.contains("malformed JSON"));
        assert!(parse_json::<Reply>(r#"{"unexpected": 1}"#).is_err());
    }
}
