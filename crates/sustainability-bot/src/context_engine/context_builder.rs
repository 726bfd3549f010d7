//! Builds the message list for one chat completion

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::memory_db::{ChatDatabase, ConversationPair, ProfileFields};
use crate::model_runtime::ChatMessage;

const UNKNOWN: &str = "unknown";

/// Newest-first pairs to chronological user/assistant turns.
pub fn assemble_history(newest_first: &[ConversationPair]) -> Vec<ChatMessage> {
    newest_first
        .iter()
        .rev()
        .flat_map(|pair| {
            [
                ChatMessage::user(pair.user_question.clone()),
                ChatMessage::assistant(pair.answer.clone()),
            ]
        })
        .collect()
}

/// Template followed by the user details line; missing values read `unknown`.
pub fn build_system_prompt(template: &str, profile: &ProfileFields) -> String {
    let age = profile.age.map(|a| a.to_string());
    format!(
        "{}\nHere are the user details: Name: {}, age: {}, gender: {}, city: {}",
        template,
        profile.name.as_deref().unwrap_or(UNKNOWN),
        age.as_deref().unwrap_or(UNKNOWN),
        profile.gender.as_deref().unwrap_or(UNKNOWN),
        profile.city.as_deref().unwrap_or(UNKNOWN),
    )
}

/// System prompt, prior turns, then the new query.
pub fn build_conversation(
    template: &str,
    profile: &ProfileFields,
    history: &[ConversationPair],
    query: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::system(build_system_prompt(template, profile)));
    messages.extend(assemble_history(history));
    messages.push(ChatMessage::user(query));
    messages
}

/// Reads the bounded window for a session and shapes it for the model.
#[derive(Clone)]
pub struct ContextAssembler {
    database: Arc<ChatDatabase>,
    history_limit: usize,
}

impl ContextAssembler {
    pub fn new(database: Arc<ChatDatabase>, history_limit: usize) -> Self {
        Self {
            database,
            history_limit,
        }
    }

    pub fn conversation(
        &self,
        user_id: &str,
        session_id: &str,
        template: &str,
        profile: &ProfileFields,
        query: &str,
    ) -> Result<Vec<ChatMessage>> {
        let pairs = self
            .database
            .messages
            .get_user_conversations(user_id, session_id, self.history_limit)?;
        debug!(user_id, session_id, history = pairs.len(), "assembled context window");
        Ok(build_conversation(template, profile, &pairs, query))
    }
}
