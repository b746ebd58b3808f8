use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

/// The exam is held in a single fixed locale.
pub const EXAM_LANGUAGE: &str = "de";

/// Converts a spoken answer into text. The shell treats one completed
/// transcription as one input event for the session.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait Transcriber {
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Whisper implementation of [`Transcriber`] over the OpenAI audio endpoint.
pub struct WhisperClient {
    client: Client,
    api_key: String,
}

impl WhisperClient {
    pub fn new(api_key: String) -> Self {
        Self::with_client(Client::new(), api_key)
    }

    pub fn with_client(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String> {
        let file = Part::bytes(audio.to_vec())
            .file_name("answer.wav")
            .mime_str("audio/wav")
            .context("Failed to build audio upload part")?;
        let form = Form::new()
            .text("model", "whisper-1")
            .text("language", language.to_string())
            .part("file", file);

        let resp = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Transcription request failed")?
            .error_for_status()
            .context("Transcription request was rejected")?
            .json::<TranscriptionResponse>()
            .await
            .context("Failed to parse transcription response")?;

        Ok(resp.text)
    }
}
