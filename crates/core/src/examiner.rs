use crate::message::Message;
use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// The grading/response service behind the exam: given the conversation so
/// far plus one instruction, it returns the examiner's next utterance
/// (feedback, a closing remark, or the final grade).
///
/// The session depends on this trait rather than a concrete client so unit
/// tests can drive the state machine with `mockall`'s `MockExaminer` instead
/// of real API calls. The call is a pure request/response round trip; the
/// core performs no retries.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait Examiner {
    async fn complete(&self, transcript: &[Message], instruction: &Message) -> Result<String>;
}

/// OpenAI chat-completions implementation of [`Examiner`].
pub struct ExaminerClient {
    client: Client,
    api_key: String,
    model: String,
}

impl ExaminerClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_client(Client::new(), api_key, model)
    }

    /// Accepts a pre-built client so the calling shell can enforce its
    /// external-call timeout at the client level.
    pub fn with_client(client: Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Examiner for ExaminerClient {
    async fn complete(&self, transcript: &[Message], instruction: &Message) -> Result<String> {
        let mut messages: Vec<serde_json::Value> = transcript
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        messages.push(json!({ "role": instruction.role, "content": instruction.content }));

        let body = json!({
            "model": self.model,
            "messages": messages,
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Chat completion request failed")?
            .error_for_status()
            .context("Chat completion request was rejected")?
            .json::<ChatResponse>()
            .await
            .context("Failed to parse chat completion response")?;

        resp.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("Chat completion returned no choices")
    }
}
