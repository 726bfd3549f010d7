//! POST /api/send-message: answers over server-sent events.
//!
//! Frames: unnamed events carry answer text in model order, one `complete`
//! event carries the persisted record, and an `error` event replaces it when
//! the model or the final write fails.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{error, info};

use crate::api::persona_api::{deserialize_age, non_empty, require_id};
use crate::error::{ChatError, Result};
use crate::memory_db::ProfileFields;
use crate::pipeline::{ChatTurnRequest, StreamItem};
use crate::shared_state::AppState;
use crate::utils::TextUtils;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub user_id: String,
    pub session_id: String,
    pub incoming_message: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_age")]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let started = Instant::now();
    require_id("user_id", &req.user_id)?;
    require_id("session_id", &req.session_id)?;
    if req.incoming_message.trim().is_empty() {
        return Err(ChatError::Validation("incoming_message must not be empty".to_string()));
    }

    let prompt_template = state
        .prompts
        .load()
        .await?
        .ok_or_else(|| ChatError::Config("system prompt is not configured".to_string()))?;

    let profile = ProfileFields {
        name: non_empty(req.name),
        age: req.age,
        gender: non_empty(req.gender),
        city: non_empty(req.city),
    };
    if state.database.personas.ensure_persona(&req.user_id, &profile)? {
        info!(user_id = %req.user_id, "registered persona on first message");
    }

    info!(
        user_id = %req.user_id,
        session_id = %req.session_id,
        query = %TextUtils::truncate_with_ellipsis(&req.incoming_message, 80),
        "answering message"
    );
    let responses = state.pipeline.respond(ChatTurnRequest {
        user_id: req.user_id,
        session_id: req.session_id,
        query: req.incoming_message,
        profile,
        prompt_template,
        started,
    });

    let events = responses.map(|item| Ok(to_event(item)));
    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn to_event(item: Result<StreamItem>) -> Event {
    match item {
        // SSE cannot carry carriage returns; line feeds become separate data lines.
        Ok(StreamItem::Chunk(text)) => Event::default().data(text.replace('\r', "")),
        Ok(StreamItem::Completed(record)) => match Event::default().event("complete").json_data(&record) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "failed to encode completion record");
                error_event(&ChatError::Storage(e.to_string()))
            }
        },
        Err(e) => {
            error!(event = e.kind(), error = %e, "response stream failed");
            error_event(&e)
        }
    }
}

fn error_event(e: &ChatError) -> Event {
    let message = match e {
        ChatError::Storage(_) => "The answer could not be saved.".to_string(),
        other => other.to_string(),
    };
    let payload = serde_json::json!({ "error": e.kind(), "message": message });
    Event::default().event("error").data(payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::CompletionRecord;

    #[test]
    fn request_accepts_string_age_and_missing_profile() {
        let req: SendMessageRequest = serde_json::from_str(
            r#"{"user_id":"u1","session_id":"s1","incoming_message":"hi","age":"41"}"#,
        )
        .unwrap();
        assert_eq!(req.age, Some(41));
        assert!(req.name.is_none());
    }

    async fn render(items: Vec<Result<StreamItem>>) -> String {
        use axum::response::IntoResponse;
        let events = futures_util::stream::iter(items.into_iter().map(|item| Ok::<_, Infallible>(to_event(item))));
        let body = Sse::new(events).into_response().into_body();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn items_render_as_text_complete_and_error_events() {
        let record = CompletionRecord {
            message_id: "m-1".into(),
            latency: 0.5,
            total_tokens: 3,
            prompt_tokens: 2,
            completion_tokens: 1,
            cost_inr: 0.0,
        };
        let sse = render(vec![
            Ok(StreamItem::Chunk("line\r\nnext".into())),
            Ok(StreamItem::Completed(record)),
            Err(ChatError::Model("boom".into())),
            Err(ChatError::Storage("disk I/O error at /var/db".into())),
        ])
        .await;

        assert!(sse.contains("data: line\ndata: next\n"));
        assert!(!sse.contains('\r'));
        assert!(sse.contains("event: complete\ndata: {\"message_id\":\"m-1\""));
        assert!(sse.contains("event: error\ndata: {\"error\":\"model_error\""));
        assert!(sse.contains("The answer could not be saved."));
        assert!(!sse.contains("/var/db"));
    }
}
