//! Chat-completion client for OpenAI-compatible endpoints (Groq, OpenAI).

use crate::config::AiProvider;
use crate::error::{AppError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// One prompt: system instruction, user text and sampling budget.
#[derive(Debug, Clone, Copy)]
pub struct ChatPrompt<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone)]
pub struct AiClient {
    http: reqwest::Client,
    provider: AiProvider,
}

impl AiClient {
    pub fn new(http: reqwest::Client, provider: AiProvider) -> Self {
        Self { http, provider }
    }

    pub fn model(&self) -> &str {
        &self.provider.model
    }

    /// Send the prompt and return the first choice's text. No retries.
    pub async fn complete(&self, prompt: &ChatPrompt<'_>) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.provider.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt.user,
                },
            ],
            temperature: prompt.temperature,
            max_tokens: prompt.max_tokens,
        };

        debug!(model = %self.provider.model, max_tokens = prompt.max_tokens, "Sending chat completion");

        let response = self
            .http
            .post(&self.provider.endpoint)
            .bearer_auth(&self.provider.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, model = %self.provider.model, "Chat completion rejected");
            return Err(AppError::AiApiError {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| AppError::ModelOutputMalformed("empty completion".into()))
    }

    /// Send the prompt and decode the reply as a JSON object of type `T`.
    pub async fn complete_json<T: DeserializeOwned>(&self, prompt: &ChatPrompt<'_>) -> Result<T> {
        let text = self.complete(prompt).await?;
        parse_model_json(&text)
    }
}

/// Decode model text into `T`, tolerating Markdown fences and chatter around the object.
pub fn parse_model_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let body = extract_json_object(text);
    serde_json::from_str(body).map_err(|e| {
        let preview: String = text.chars().take(200).collect();
        AppError::ModelOutputMalformed(format!("{e} (raw: {preview})"))
    })
}

fn extract_json_object(text: &str) -> &str {
    let trimmed = text.trim();
    let unfenced = match trimmed.split_once("```") {
        Some((_, rest)) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.split("```").next().unwrap_or(rest).trim()
        }
        None => trimmed,
    };
    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AiProvider, GROQ_MODEL};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Probe {
        ok: bool,
    }

    fn client_for(server: &MockServer) -> AiClient {
        AiClient::new(
            reqwest::Client::new(),
            AiProvider {
                endpoint: format!("{}/chat/completions", server.uri()),
                api_key: "test-key".into(),
                model: GROQ_MODEL.into(),
            },
        )
    }

    const PROMPT: ChatPrompt<'static> = ChatPrompt {
        system: "You answer in JSON.",
        user: "Say ok.",
        temperature: 0.2,
        max_tokens: 50,
    };

    #[test]
    fn parses_plain_and_fenced_json() {
        let plain: Probe = parse_model_json(r#"{"ok": true}"#).unwrap();
        assert!(plain.ok);

        let fenced: Probe =
            parse_model_json("Here you go:\n```json\n{\"ok\": false}\n```\nAnything else?").unwrap();
        assert!(!fenced.ok);

        let chatty: Probe = parse_model_json("Result: {\"ok\": true} -- done").unwrap();
        assert!(chatty.ok);
    }

    #[test]
    fn garbage_is_model_output_malformed() {
        let result: Result<Probe> = parse_model_json("I cannot help with that.");
        assert!(matches!(result, Err(AppError::ModelOutputMalformed(_))));
    }

    #[tokio::test]
    async fn complete_sends_model_and_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"model": GROQ_MODEL, "max_tokens": 50})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"ok\": true}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let probe: Probe = client_for(&server).complete_json(&PROMPT).await.unwrap();
        assert!(probe.ok);
    }

    #[tokio::test]
    async fn non_success_status_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&PROMPT).await.unwrap_err();
        match err {
            AppError::AiApiError { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid api key");
            }
            other => panic!("expected AiApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_are_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&PROMPT).await.unwrap_err();
        assert!(matches!(err, AppError::ModelOutputMalformed(_)));
    }
}
