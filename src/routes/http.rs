//! HTTP endpoint handlers. These are thin wrappers that forward to the
//! engine. Each handler is instrumented and logs parameters and basic
//! result info.
//!
//! Two request headers steer every generation endpoint:
//!   X-AI-Provider : "gemini" (default) or "openai"; preferred provider
//!   X-User-Id     : quota/cache identity; falls back to the peer IP

use std::net::SocketAddr;

use axum::{
  extract::{ConnectInfo, Path, Query, State},
  http::{HeaderMap, StatusCode},
  response::{IntoResponse, Response},
  Json,
};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::domain::ProviderId;
use crate::error::EngineError;
use crate::protocol::*;
use crate::state::AppState;

/// Engine errors mapped onto HTTP statuses. Provider exhaustion splits into
/// "saturated, retry later" (503) vs "failed" (500); our own daily cap is a
/// 429 distinct from both.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
  fn from(e: EngineError) -> Self {
    ApiError(e)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, quota) = match &self.0 {
      EngineError::QuotaExceeded { used, limit } => (
        StatusCode::TOO_MANY_REQUESTS,
        Some(QuotaOut { used: *used, remaining: limit.saturating_sub(*used), limit: *limit }),
      ),
      EngineError::NoProvidersAvailable => (StatusCode::SERVICE_UNAVAILABLE, None),
      EngineError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, None),
      EngineError::NotFound(_) => (StatusCode::NOT_FOUND, None),
      EngineError::ProvidersFailed(_)
      | EngineError::GenerationFailed(_)
      | EngineError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
    };
    warn!(target: "quizsmith_backend", %status, error = %self.0, "Request failed");
    (status, Json(ErrorOut { error: self.0.to_string(), quota })).into_response()
  }
}

/// Preferred provider from X-AI-Provider; unknown values fall back to the
/// configured default rather than failing the request.
fn preferred_provider(headers: &HeaderMap, state: &AppState) -> ProviderId {
  match headers.get("x-ai-provider").and_then(|v| v.to_str().ok()) {
    Some("gemini") => ProviderId::Gemini,
    Some("openai") => ProviderId::OpenAi,
    Some(other) => {
      warn!(target: "quizsmith_backend", value = %other, "Unknown X-AI-Provider; using default");
      state.default_provider
    }
    None => state.default_provider,
  }
}

/// Quota/cache identity: authenticated callers by user id, anonymous ones
/// by peer address.
fn identity(headers: &HeaderMap, addr: &SocketAddr) -> String {
  match headers.get("x-user-id").and_then(|v| v.to_str().ok()) {
    Some(id) if !id.trim().is_empty() => format!("user:{}", id.trim()),
    _ => format!("ip:{}", addr.ip()),
  }
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse {
  Json(HealthOut { ok: true })
}

#[instrument(level = "info", skip(state, headers, body), fields(topic = %body.topic))]
pub async fn http_create_session(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(body): Json<SessionCreateIn>,
) -> Result<Json<SessionOut>, ApiError> {
  let preferred = preferred_provider(&headers, &state);
  let out = state
    .engine
    .create_session(&body.topic, body.category, body.difficulty, body.counts.as_pairs(), preferred)
    .await?;
  info!(
    target: "generation",
    session = %out.session.id,
    questions = out.session.latest_preview.len(),
    provider = %out.provider_used,
    "HTTP session created"
  );
  Ok(Json(SessionOut {
    session_id: out.session.id,
    topic: out.session.topic,
    category: out.session.category,
    difficulty: out.session.difficulty,
    questions: out.session.latest_preview,
    provider_used: Some(out.provider_used.as_str().into()),
    fallback_used: out.fallback_used,
  }))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_get_session(
  State(state): State<AppState>,
  Path(id): Path<String>,
) -> Result<Json<SessionOut>, ApiError> {
  let session = state.engine.get_session(&id).await?;
  Ok(Json(SessionOut {
    session_id: session.id,
    topic: session.topic,
    category: session.category,
    difficulty: session.difficulty,
    questions: session.latest_preview,
    provider_used: None,
    fallback_used: false,
  }))
}

#[instrument(level = "info", skip(state, headers, body), fields(session = ?body.session_id, item_type = ?body.item_type))]
pub async fn http_regenerate_question(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(body): Json<RegenerateIn>,
) -> Result<Json<RegenerateOut>, ApiError> {
  let preferred = preferred_provider(&headers, &state);
  let out = state
    .engine
    .regenerate_question(
      body.session_id.as_deref(),
      body.index,
      &body.topic,
      body.difficulty,
      body.item_type,
      body.current,
      &body.avoid,
      preferred,
    )
    .await?;
  info!(
    target: "generation",
    attempts = out.attempts_used,
    forced_fallback = out.forced_fallback,
    "HTTP question regenerated"
  );
  Ok(Json(RegenerateOut {
    question: out.item,
    provider_used: out.provider_used.map(|p| p.as_str().into()),
    fallback_used: out.fallback_used,
    forced_fallback: out.forced_fallback,
    attempts_used: out.attempts_used,
  }))
}

#[instrument(level = "info", skip(state, body), fields(session = %body.session_id, index = body.index))]
pub async fn http_confirm_question(
  State(state): State<AppState>,
  Json(body): Json<ConfirmIn>,
) -> Result<Json<ConfirmOut>, ApiError> {
  state.engine.confirm_replace(&body.session_id, body.index, body.question).await?;
  Ok(Json(ConfirmOut { ok: true }))
}

#[instrument(level = "info", skip(state, headers, body), fields(prompt_len = body.prompt.len()))]
pub async fn http_generate_cover(
  State(state): State<AppState>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
  Json(body): Json<CoverIn>,
) -> Result<Json<CoverOut>, ApiError> {
  let preferred = preferred_provider(&headers, &state);
  let identity = identity(&headers, &addr);
  let out = state.engine.generate_cover(&identity, &body.prompt, preferred).await?;
  info!(
    target: "generation",
    %identity,
    provider = %out.provider_used,
    reused = out.reused_from_cache,
    "HTTP cover generated"
  );
  Ok(Json(CoverOut {
    image_ref: out.artifact_ref,
    provider_used: out.provider_used.as_str().into(),
    reused_from_cache: out.reused_from_cache,
    quota: out.rate_status.into(),
  }))
}

#[derive(Debug, Deserialize)]
pub struct QuotaQuery {
  pub provider: Option<String>,
}

#[instrument(level = "info", skip(state, headers))]
pub async fn http_cover_quota(
  State(state): State<AppState>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
  Query(q): Query<QuotaQuery>,
) -> Result<Json<QuotaOut>, ApiError> {
  let identity = identity(&headers, &addr);
  let provider = match q.provider.as_deref() {
    Some("gemini") => Some(ProviderId::Gemini),
    Some("openai") => Some(ProviderId::OpenAi),
    Some(other) => {
      return Err(EngineError::InvalidRequest(format!("unknown provider: {other}")).into());
    }
    None => Some(preferred_provider(&headers, &state)),
  };
  let status = state.engine.cover_quota(&identity, provider).await?;
  Ok(Json(status.into()))
}
