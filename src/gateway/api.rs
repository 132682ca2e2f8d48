//! HTTP handlers for generation and session inspection.

use super::error::ApiError;
use super::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::generation::structure_document;
use crate::sessions::SessionId;

const SESSION_ID_KEY: &str = "session_id";
const HUMAN_INPUT_KEY: &str = "human_input";
const TEMPLATE_KEY: &str = "template";
const PROMPT_KEY: &str = "prompt";

// ── Request parsing ─────────────────────────────────────────────

/// A `/generate` body split into control keys and template fields.
#[derive(Debug, Default, PartialEq)]
pub struct GenerateRequest {
    pub session_id: Option<String>,
    pub human_input: String,
    pub template: Option<String>,
    /// Caller-written prompt. When non-blank it replaces the template.
    pub prompt: Option<String>,
    pub fields: HashMap<String, String>,
}

fn optional_string(body: &Map<String, Value>, key: &str) -> Result<Option<String>, ApiError> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ApiError::InvalidRequest(format!("'{key}' must be a string"))),
    }
}

impl GenerateRequest {
    /// Parse a JSON body. Every top-level key other than the control keys is a
    /// template field: strings as-is, numbers and booleans stringified, nulls
    /// ignored.
    pub fn from_json(raw: &[u8]) -> Result<Self, ApiError> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid JSON body: {e}")))?;
        let Value::Object(body) = value else {
            return Err(ApiError::InvalidRequest(
                "Request body must be a JSON object".into(),
            ));
        };

        let mut fields = HashMap::new();
        for (key, value) in &body {
            if matches!(
                key.as_str(),
                SESSION_ID_KEY | HUMAN_INPUT_KEY | TEMPLATE_KEY | PROMPT_KEY
            ) {
                continue;
            }
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(ApiError::InvalidRequest(format!(
                        "Field '{key}' must be a string, number or boolean"
                    )));
                }
            };
            fields.insert(key.clone(), text);
        }

        Ok(Self {
            session_id: optional_string(&body, SESSION_ID_KEY)?,
            human_input: optional_string(&body, HUMAN_INPUT_KEY)?.unwrap_or_default(),
            template: optional_string(&body, TEMPLATE_KEY)?,
            prompt: optional_string(&body, PROMPT_KEY)?,
            fields,
        })
    }

    /// The raw prompt, if the caller sent a non-blank one.
    pub fn raw_prompt(&self) -> Option<&str> {
        self.prompt.as_deref().filter(|p| !p.trim().is_empty())
    }
}

// ── Cookies ─────────────────────────────────────────────────────

/// Read the named cookie from the `Cookie` request headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
}

/// Build the `Set-Cookie` value, or `None` when the id would break out of the
/// cookie value (separators, whitespace, quotes or control characters).
fn session_cookie(name: &str, id: &SessionId) -> Option<HeaderValue> {
    let safe = id
        .as_str()
        .chars()
        .all(|c| c.is_ascii_graphic() && !matches!(c, ';' | ',' | '"' | '\\'));
    if !safe {
        tracing::debug!(session_id = %id, "Session id not representable as a cookie");
        return None;
    }
    HeaderValue::from_str(&format!("{name}={id}; Path=/; HttpOnly; SameSite=Lax")).ok()
}

// ── Handlers ────────────────────────────────────────────────────

/// GET /health: liveness probe
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// POST /generate: run one generation turn
pub async fn handle_generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = GenerateRequest::from_json(&body)?;

    let requested = request
        .session_id
        .clone()
        .or_else(|| cookie_value(&headers, &state.cookie_name));
    let session_id = state.generator.begin_or_resume(requested.as_deref());

    let text = match request.raw_prompt() {
        Some(prompt) => state.generator.run_prompt(&session_id, prompt).await?,
        None => {
            state
                .generator
                .run_turn_with(
                    &session_id,
                    request.template.as_deref(),
                    request.fields,
                    &request.human_input,
                )
                .await?
        }
    };

    let document = structure_document(&text);
    let mut response = Json(json!({
        "session_id": session_id,
        "text": text,
        "document": document,
    }))
    .into_response();

    if let Some(cookie) = session_cookie(&state.cookie_name, &session_id) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

/// GET /api/sessions/{id}/history: snapshot of one session's entries
pub async fn handle_session_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session_id = SessionId::parse(&id)
        .ok_or_else(|| ApiError::InvalidRequest("Session id must not be blank".into()))?;
    let entries = state.generator.store().history_of(&session_id)?;
    Ok(Json(json!({
        "session_id": session_id,
        "entries": entries,
    })))
}

/// DELETE /api/sessions/{id}: drop a session's memory
pub async fn handle_session_clear(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session_id = SessionId::parse(&id)
        .ok_or_else(|| ApiError::InvalidRequest("Session id must not be blank".into()))?;
    if state.generator.store().clear(&session_id) {
        tracing::info!(session_id = %session_id, "Session cleared");
        Ok(Json(json!({"cleared": true})))
    } else {
        Err(crate::error::GenerateError::SessionNotFound(session_id.to_string()).into())
    }
}

/// GET /api/status: system status overview
pub async fn handle_api_status(State(state): State<AppState>) -> impl IntoResponse {
    let options = state.generator.options();
    let store = state.generator.store();

    Json(json!({
        "provider": options.provider_name,
        "model": options.model,
        "temperature": options.temperature,
        "template": options.default_template,
        "template_loader": state.generator.templates().name(),
        "session_store": store.name(),
        "session_count": store.session_count(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}
