//! Persona registration and lookup.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::api::response::{success, ApiResult};
use crate::error::ChatError;
use crate::memory_db::{Persona, ProfileFields, UpsertOutcome};
use crate::shared_state::AppState;

#[derive(Debug, Deserialize)]
pub struct UpsertUserRequest {
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_age")]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpsertUserResponse {
    pub user_id: String,
    pub created: bool,
}

/// Clients send the age either as a number or as a numeric string.
pub(crate) fn deserialize_age<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Age {
        Number(u32),
        Text(String),
    }

    match Option::<Age>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Age::Number(n)) => Ok(Some(n)),
        Some(Age::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Age::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("age must be a whole number, got {:?}", s))),
    }
}

/// Empty strings from form clients mean "not provided".
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub(crate) fn require_id(field: &str, value: &str) -> Result<(), ChatError> {
    if value.trim().is_empty() {
        return Err(ChatError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// POST /api/upsert-user
pub async fn upsert_user(
    State(state): State<AppState>,
    Json(req): Json<UpsertUserRequest>,
) -> ApiResult<UpsertUserResponse> {
    require_id("user_id", &req.user_id)?;
    let fields = ProfileFields {
        name: non_empty(req.name),
        age: req.age,
        gender: non_empty(req.gender),
        city: non_empty(req.city),
    };

    let outcome = state.database.personas.upsert_persona(&req.user_id, &fields)?;
    info!(user_id = %req.user_id, ?outcome, "persona registered");
    let (message, created) = match outcome {
        UpsertOutcome::Created => ("User created successfully", true),
        UpsertOutcome::Updated => ("User updated successfully", false),
    };
    success(message, UpsertUserResponse { user_id: req.user_id, created })
}

/// GET /api/users/:user_id
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Persona> {
    let persona = state
        .database
        .personas
        .get_persona(&user_id)?
        .ok_or_else(|| ChatError::NotFound(format!("no persona for user {}", user_id)))?;
    success("User retrieved successfully", persona)
}

/// GET /api/users
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Vec<Persona>> {
    let personas = state.database.personas.list_personas()?;
    if personas.is_empty() {
        return Err(ChatError::NotFound("no users registered".to_string()));
    }
    success(format!("Retrieved {} users", personas.len()), personas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_accepts_numbers_and_numeric_strings() {
        let parse = |body: &str| serde_json::from_str::<UpsertUserRequest>(body).map(|r| r.age);
        assert_eq!(parse(r#"{"user_id":"u","age":34}"#).unwrap(), Some(34));
        assert_eq!(parse(r#"{"user_id":"u","age":"34"}"#).unwrap(), Some(34));
        assert_eq!(parse(r#"{"user_id":"u","age":""}"#).unwrap(), None);
        assert_eq!(parse(r#"{"user_id":"u"}"#).unwrap(), None);
        assert!(parse(r#"{"user_id":"u","age":"thirty"}"#).is_err());
    }

    #[test]
    fn blank_fields_are_dropped() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some(" Pune ".into())).as_deref(), Some("Pune"));
        assert!(require_id("user_id", " ").is_err());
    }
}
