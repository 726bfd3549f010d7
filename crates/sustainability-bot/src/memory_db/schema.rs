//! Record types for the chat database
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Durable profile of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub user_id: String,
    pub name: Option<String>,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub city: Option<String>,
    #[serde(rename = "personality_info")]
    pub traits: BTreeSet<String>,
    pub total_tokens: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_inr: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mutable profile columns. `None` keeps whatever the row already holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFields {
    pub name: Option<String>,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    Applied { traits_added: usize },
    NoSuchUser,
}

/// Tri-state message feedback stored as -1 / 0 / 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Feedback {
    Negative,
    #[default]
    Unset,
    Positive,
}

impl Feedback {
    pub fn as_i64(self) -> i64 {
        match self {
            Feedback::Negative => -1,
            Feedback::Unset => 0,
            Feedback::Positive => 1,
        }
    }

    /// Decode a stored column value.
    pub fn from_stored(value: i64) -> Option<Self> {
        match value {
            -1 => Some(Feedback::Negative),
            0 => Some(Feedback::Unset),
            1 => Some(Feedback::Positive),
            _ => None,
        }
    }

    /// Accepts an explicit user rating. 0 means "unset" and cannot be submitted.
    pub fn from_user_rating(value: i64) -> Result<Self, ChatError> {
        match value {
            -1 => Ok(Feedback::Negative),
            1 => Ok(Feedback::Positive),
            other => Err(ChatError::Validation(format!(
                "Invalid feedback value {}: expected -1 or 1",
                other
            ))),
        }
    }
}

impl Serialize for Feedback {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for Feedback {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        Feedback::from_stored(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid feedback value {}", value)))
    }
}

/// Token and cost accounting for one model call, or a delta applied to a persona.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub total_tokens: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_inr: f64,
}

impl UsageMetrics {
    pub fn is_zero(&self) -> bool {
        self.total_tokens == 0
            && self.prompt_tokens == 0
            && self.completion_tokens == 0
            && self.cost_inr == 0.0
    }

    /// Usage only accumulates: negative or non-finite values are rejected.
    pub fn validate(&self) -> Result<(), ChatError> {
        let counters = [
            ("total_tokens", self.total_tokens),
            ("prompt_tokens", self.prompt_tokens),
            ("completion_tokens", self.completion_tokens),
        ];
        for (field, value) in counters {
            if value < 0 {
                return Err(ChatError::InvalidDelta(format!("{} is negative ({})", field, value)));
            }
        }
        if !self.cost_inr.is_finite() || self.cost_inr < 0.0 {
            return Err(ChatError::InvalidDelta(format!(
                "cost_inr must be a non-negative number, got {}",
                self.cost_inr
            )));
        }
        Ok(())
    }
}

/// Insert payload for one completed exchange.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub user_id: String,
    pub session_id: String,
    pub question: String,
    pub answer: String,
    pub latency: f64,
    pub usage: UsageMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: String,
    pub user_id: String,
    pub session_id: String,
    pub user_question: String,
    pub answer: String,
    pub user_feedback: Feedback,
    pub latency: f64,
    pub total_tokens: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_inr: f64,
    pub timestamp: DateTime<Utc>,
}

/// One question/answer exchange of a conversation window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPair {
    pub user_question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub user_question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

/// Messages of one (user, session) inside the trailing activity window, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionActivity {
    pub user_id: String,
    pub session_id: String,
    pub conversations: Vec<ActivityEntry>,
}

/// Messages of one (user, session), newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessages {
    pub user_id: String,
    pub session_id: String,
    pub messages: Vec<StoredMessage>,
}

/// Aggregates over the message table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub total_messages: i64,
    pub total_users: i64,
    pub total_sessions: i64,
    pub avg_latency: Option<f64>,
    pub avg_total_tokens: Option<f64>,
    pub avg_input_tokens: Option<f64>,
    pub avg_output_tokens: Option<f64>,
    pub avg_cost_per_message: Option<f64>,
    pub total_tokens_used: i64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub positive_feedback: i64,
    pub negative_feedback: i64,
    pub no_feedback: i64,
    pub avg_sessions_per_user: Option<f64>,
    pub avg_messages_per_user: Option<f64>,
    pub avg_messages_per_session: Option<f64>,
    pub total_cost: f64,
}

#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub total_personas: i64,
    pub total_messages: i64,
    pub database_size_bytes: i64,
}

/// Current schema, applied in one batch for fresh in-memory databases.
pub const SCHEMA_SQL: &str = include_str!("migrations/001_initial.sql");
