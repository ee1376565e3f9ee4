//! OpenAI clients (chat.completions for questions, images/generations for
//! covers).
//!
//! We only request strict JSON objects from chat.completions and inline
//! base64 from the images endpoint. Calls are instrumented and log model
//! names, latencies, and response sizes (not contents).
//!
//! NOTE: we never log the API key and we keep payload truncations short.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::Prompts;
use crate::credentials::CredentialPool;
use crate::domain::{GeneratedItem, GenerationRequest, ProviderId};
use crate::error::ProviderError;
use crate::providers::{batch_prompt, item_from_json, items_from_json, regen_prompt, ImageProvider, TextProvider};
use crate::util::extract_json_object;

#[derive(Clone)]
pub struct OpenAiClient {
  client: reqwest::Client,
  keys: Arc<CredentialPool>,
  base_url: String,
  text_model: String,
  image_model: String,
}

impl OpenAiClient {
  /// Construct the client if OPENAI_API_KEY(S) is present; otherwise None.
  pub fn from_env() -> Option<Self> {
    let keys = Arc::new(CredentialPool::from_env("OPENAI_API_KEY")?);
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let text_model =
      std::env::var("OPENAI_TEXT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let image_model =
      std::env::var("OPENAI_IMAGE_MODEL").unwrap_or_else(|_| "dall-e-3".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .ok()?;

    Some(Self { client, keys, base_url, text_model, image_model })
  }

  /// JSON-object chat completion returning the raw message content.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.text_model))]
  async fn chat_json(&self, system: &str, user: &str) -> Result<String, ProviderError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.text_model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature: 0.9,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
    };

    let start = std::time::Instant::now();
    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "quizsmith-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.keys.next_key()))
      .json(&req)
      .send()
      .await
      .map_err(|e| ProviderError::Transient(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(ProviderError::classify(format!("OpenAI HTTP {}: {}", status, msg)));
    }

    let body: ChatCompletionResponse =
      res.json().await.map_err(|e| ProviderError::Transient(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(
        prompt_tokens = ?usage.prompt_tokens,
        completion_tokens = ?usage.completion_tokens,
        total_tokens = ?usage.total_tokens,
        "OpenAI usage"
      );
    }
    let text = body
      .choices
      .into_iter()
      .next()
      .and_then(|c| c.message.content)
      .unwrap_or_default();
    info!(elapsed = ?start.elapsed(), response_len = text.len(), "OpenAI text response received");
    Ok(text)
  }
}

#[async_trait]
impl TextProvider for OpenAiClient {
  fn id(&self) -> ProviderId {
    ProviderId::OpenAi
  }

  #[instrument(level = "info", skip_all, fields(topic = %req.topic, count = req.count))]
  async fn generate_batch(
    &self,
    req: &GenerationRequest,
    prompts: &Prompts,
  ) -> Result<Vec<GeneratedItem>, ProviderError> {
    let (system, user) = batch_prompt(req, prompts);
    let raw = self.chat_json(&system, &user).await?;
    let v = extract_json_object(&raw).map_err(ProviderError::Malformed)?;
    items_from_json(&v, req.item_type)
  }

  #[instrument(level = "info", skip_all, fields(topic = %req.topic, avoid = avoid.len()))]
  async fn generate_one(
    &self,
    req: &GenerationRequest,
    avoid: &[String],
    prompts: &Prompts,
  ) -> Result<GeneratedItem, ProviderError> {
    let (system, user) = regen_prompt(req, avoid, prompts);
    let raw = self.chat_json(&system, &user).await?;
    let v = extract_json_object(&raw).map_err(ProviderError::Malformed)?;
    item_from_json(&v, req.item_type)
  }
}

#[async_trait]
impl ImageProvider for OpenAiClient {
  fn id(&self) -> ProviderId {
    ProviderId::OpenAi
  }

  #[instrument(level = "info", skip_all, fields(model = %self.image_model, prompt_len = prompt.len()))]
  async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
    let url = format!("{}/images/generations", self.base_url);
    let req = ImageGenerationRequest {
      model: self.image_model.clone(),
      prompt: prompt.to_string(),
      n: 1,
      size: "1024x1024".into(),
      response_format: "b64_json".into(),
    };

    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "quizsmith-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.keys.next_key()))
      .json(&req)
      .send()
      .await
      .map_err(|e| ProviderError::Transient(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(ProviderError::classify(format!("OpenAI HTTP {}: {}", status, msg)));
    }

    let body: ImageGenerationResponse =
      res.json().await.map_err(|e| ProviderError::Transient(e.to_string()))?;
    let b64 = body
      .data
      .into_iter()
      .next()
      .and_then(|d| d.b64_json)
      .ok_or_else(|| ProviderError::Malformed("image response had no b64 payload".into()))?;
    base64::engine::general_purpose::STANDARD
      .decode(b64)
      .map_err(|e| ProviderError::Malformed(format!("invalid base64 image payload: {}", e)))
  }
}

// --- Wire DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
}
#[derive(Serialize)]
struct ChatMessageReq {
  role: String,
  content: String,
}
#[derive(Serialize)]
struct ResponseFormat {
  #[serde(rename = "type")]
  r#type: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)]
  usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
}
#[derive(Deserialize)]
struct ChatMessageResp {
  content: Option<String>,
}
#[derive(Deserialize)]
struct Usage {
  #[serde(default)]
  prompt_tokens: Option<u32>,
  #[serde(default)]
  completion_tokens: Option<u32>,
  #[serde(default)]
  total_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ImageGenerationRequest {
  model: String,
  prompt: String,
  n: u32,
  size: String,
  response_format: String,
}
#[derive(Deserialize)]
struct ImageGenerationResponse {
  #[serde(default)]
  data: Vec<ImageDatum>,
}
#[derive(Deserialize)]
struct ImageDatum {
  #[serde(default)]
  b64_json: Option<String>,
}

/// Try to extract a clean error message from an OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap {
    error: EObj,
  }
  #[derive(Deserialize)]
  struct EObj {
    message: String,
  }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
