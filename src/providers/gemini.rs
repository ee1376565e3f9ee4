//! Gemini clients (text generateContent + Imagen predict).
//!
//! We request strict JSON output for questions and decode inline base64 for
//! images. Calls are instrumented and log model names and latencies, never
//! payload contents.
//!
//! NOTE: keys rotate per call via the shared CredentialPool and are never
//! logged unmasked.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::Prompts;
use crate::credentials::CredentialPool;
use crate::domain::{GeneratedItem, GenerationRequest, ProviderId};
use crate::error::ProviderError;
use crate::providers::{batch_prompt, item_from_json, items_from_json, regen_prompt, ImageProvider, TextProvider};
use crate::util::extract_json_object;

#[derive(Clone)]
pub struct GeminiClient {
  client: reqwest::Client,
  keys: Arc<CredentialPool>,
  base_url: String,
  text_model: String,
  image_model: String,
}

impl GeminiClient {
  /// Construct the client if GEMINI_API_KEY(S) is present; otherwise None.
  pub fn from_env() -> Option<Self> {
    let keys = Arc::new(CredentialPool::from_env("GEMINI_API_KEY")?);
    let base_url = std::env::var("GEMINI_BASE_URL")
      .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into());
    let text_model =
      std::env::var("GEMINI_TEXT_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".into());
    let image_model =
      std::env::var("GEMINI_IMAGE_MODEL").unwrap_or_else(|_| "imagen-3.0-generate-002".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .ok()?;

    Some(Self { client, keys, base_url, text_model, image_model })
  }

  /// JSON-mode generateContent call returning the raw text part.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.text_model))]
  async fn generate_text(&self, system: &str, user: &str) -> Result<String, ProviderError> {
    let url = format!(
      "{}/models/{}:generateContent?key={}",
      self.base_url,
      self.text_model,
      self.keys.next_key()
    );
    let req = GenerateContentRequest {
      system_instruction: Some(ContentPart::text(system)),
      contents: vec![ContentPart::text(user)],
      generation_config: GenerationConfig { response_mime_type: "application/json".into() },
    };

    let start = std::time::Instant::now();
    let res = self
      .client
      .post(&url)
      .header(CONTENT_TYPE, "application/json")
      .json(&req)
      .send()
      .await
      .map_err(|e| ProviderError::Transient(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_gemini_error(&body).unwrap_or(body);
      return Err(ProviderError::classify(format!("Gemini HTTP {}: {}", status, msg)));
    }

    let body: GenerateContentResponse =
      res.json().await.map_err(|e| ProviderError::Transient(e.to_string()))?;
    let text = body
      .candidates
      .into_iter()
      .next()
      .and_then(|c| c.content.parts.into_iter().next())
      .and_then(|p| p.text)
      .unwrap_or_default();
    info!(elapsed = ?start.elapsed(), response_len = text.len(), "Gemini text response received");
    Ok(text)
  }
}

#[async_trait]
impl TextProvider for GeminiClient {
  fn id(&self) -> ProviderId {
    ProviderId::Gemini
  }

  #[instrument(level = "info", skip_all, fields(topic = %req.topic, count = req.count))]
  async fn generate_batch(
    &self,
    req: &GenerationRequest,
    prompts: &Prompts,
  ) -> Result<Vec<GeneratedItem>, ProviderError> {
    let (system, user) = batch_prompt(req, prompts);
    let raw = self.generate_text(&system, &user).await?;
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
    let raw = self.generate_text(&system, &user).await?;
    let v = extract_json_object(&raw).map_err(ProviderError::Malformed)?;
    item_from_json(&v, req.item_type)
  }
}

#[async_trait]
impl ImageProvider for GeminiClient {
  fn id(&self) -> ProviderId {
    ProviderId::Gemini
  }

  #[instrument(level = "info", skip_all, fields(model = %self.image_model, prompt_len = prompt.len()))]
  async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
    let url = format!(
      "{}/models/{}:predict?key={}",
      self.base_url,
      self.image_model,
      self.keys.next_key()
    );
    let req = PredictRequest {
      instances: vec![PredictInstance { prompt: prompt.to_string() }],
      parameters: PredictParameters { sample_count: 1 },
    };

    let res = self
      .client
      .post(&url)
      .header(CONTENT_TYPE, "application/json")
      .json(&req)
      .send()
      .await
      .map_err(|e| ProviderError::Transient(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_gemini_error(&body).unwrap_or(body);
      return Err(ProviderError::classify(format!("Gemini HTTP {}: {}", status, msg)));
    }

    let body: PredictResponse =
      res.json().await.map_err(|e| ProviderError::Transient(e.to_string()))?;
    let b64 = body
      .predictions
      .into_iter()
      .next()
      .map(|p| p.bytes_base64_encoded)
      .ok_or_else(|| ProviderError::Malformed("Imagen response had no predictions".into()))?;
    base64::engine::general_purpose::STANDARD
      .decode(b64)
      .map_err(|e| ProviderError::Malformed(format!("invalid base64 image payload: {}", e)))
  }
}

// --- Wire DTOs ---

#[derive(Serialize)]
struct GenerateContentRequest {
  #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
  system_instruction: Option<ContentPart>,
  contents: Vec<ContentPart>,
  #[serde(rename = "generationConfig")]
  generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct ContentPart {
  parts: Vec<TextPart>,
}
impl ContentPart {
  fn text(s: &str) -> Self {
    Self { parts: vec![TextPart { text: s.to_string() }] }
  }
}
#[derive(Serialize)]
struct TextPart {
  text: String,
}
#[derive(Serialize)]
struct GenerationConfig {
  #[serde(rename = "responseMimeType")]
  response_mime_type: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
  #[serde(default)]
  candidates: Vec<Candidate>,
}
#[derive(Deserialize)]
struct Candidate {
  content: CandidateContent,
}
#[derive(Deserialize)]
struct CandidateContent {
  #[serde(default)]
  parts: Vec<CandidatePart>,
}
#[derive(Deserialize)]
struct CandidatePart {
  #[serde(default)]
  text: Option<String>,
}

#[derive(Serialize)]
struct PredictRequest {
  instances: Vec<PredictInstance>,
  parameters: PredictParameters,
}
#[derive(Serialize)]
struct PredictInstance {
  prompt: String,
}
#[derive(Serialize)]
struct PredictParameters {
  #[serde(rename = "sampleCount")]
  sample_count: u32,
}
#[derive(Deserialize)]
struct PredictResponse {
  #[serde(default)]
  predictions: Vec<Prediction>,
}
#[derive(Deserialize)]
struct Prediction {
  #[serde(rename = "bytesBase64Encoded")]
  bytes_base64_encoded: String,
}

/// Try to extract a clean error message from a Gemini error body.
fn extract_gemini_error(body: &str) -> Option<String> {
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
