//! Batch pass that mines new persona traits from recent questions.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{ChatError, Result};
use crate::memory_db::{ChatDatabase, DeltaOutcome, SessionActivity, UsageMetrics};
use crate::model_runtime::{ChatMessage, CompletionOptions, CompletionProvider};
use crate::persona::parse_trait_response;
use crate::utils::TextUtils;

const EXTRACTION_INSTRUCTION: &str = "\
You analyze a user's conversation history to find new, distinct personal traits, \
habits or concerns that help understand the user better. Answer with short, specific \
keywords or phrases (for example \"frequent traveler\", \"vegetarian\", \"home gardener\").

Keywords already known for this user:
{existing_traits}

Conversation history:
{conversation_history}

Guidelines:
- Keywords only, no sentences or explanations.
- Do not repeat known keywords or return synonyms of them.
- If nothing new is found, return an empty response.

Output format: one new keyword or phrase per line and nothing else.";

#[derive(Debug, Clone)]
pub struct TraitMinerConfig {
    /// How far back activity is read. Slightly longer than the cadence so no
    /// message falls between two passes.
    pub window: chrono::Duration,
    /// Pause between users to stay under provider rate limits.
    pub pacing: Duration,
    pub options: CompletionOptions,
    pub usd_to_inr: f64,
}

impl Default for TraitMinerConfig {
    fn default() -> Self {
        Self {
            window: chrono::Duration::days(3) + chrono::Duration::hours(1),
            pacing: Duration::from_secs(1),
            options: CompletionOptions::default(),
            usd_to_inr: 90.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub users_seen: usize,
    pub users_updated: usize,
    pub users_skipped: usize,
    pub users_failed: usize,
    pub traits_added: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UserOutcome {
    Updated { traits_added: usize },
    Skipped,
}

/// Questions one user asked across all of their sessions, oldest first per session.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UserQuestions {
    user_id: String,
    questions: Vec<String>,
}

#[derive(Clone)]
pub struct TraitMiner {
    database: Arc<ChatDatabase>,
    provider: Arc<dyn CompletionProvider>,
    config: TraitMinerConfig,
}

impl TraitMiner {
    pub fn new(
        database: Arc<ChatDatabase>,
        provider: Arc<dyn CompletionProvider>,
        config: TraitMinerConfig,
    ) -> Self {
        Self { database, provider, config }
    }

    /// Process every user active in the trailing window, one at a time.
    ///
    /// Only a failure to read the activity window fails the pass. A failing
    /// user is logged and counted, and the pass moves on.
    pub async fn run_batch_pass(&self) -> Result<BatchReport> {
        info!(window_hours = self.config.window.num_hours(), "starting trait-mining pass");
        let activity = self
            .database
            .messages
            .get_recent_activity(self.config.window)
            .map_err(|e| {
                error!(error = %e, "could not read recent activity, aborting pass");
                e
            })?;

        let users = group_by_user(activity);
        let mut report = BatchReport {
            users_seen: users.len(),
            ..BatchReport::default()
        };

        for (i, user) in users.iter().enumerate() {
            if i > 0 && !self.config.pacing.is_zero() {
                tokio::time::sleep(self.config.pacing).await;
            }
            match self.process_user(user).await {
                Ok(UserOutcome::Updated { traits_added }) => {
                    report.users_updated += 1;
                    report.traits_added += traits_added;
                }
                Ok(UserOutcome::Skipped) => report.users_skipped += 1,
                Err(e) => {
                    error!(user_id = %user.user_id, error = %e, "trait mining failed for user");
                    report.users_failed += 1;
                }
            }
        }

        info!(
            users_seen = report.users_seen,
            users_updated = report.users_updated,
            users_skipped = report.users_skipped,
            users_failed = report.users_failed,
            traits_added = report.traits_added,
            "trait-mining pass finished"
        );
        Ok(report)
    }

    async fn process_user(&self, user: &UserQuestions) -> Result<UserOutcome> {
        if user.questions.is_empty() {
            debug!(user_id = %user.user_id, "no questions in window, skipping");
            return Ok(UserOutcome::Skipped);
        }

        let existing = match self.database.personas.get_persona(&user.user_id)? {
            Some(persona) => persona.traits,
            None => {
                warn!(user_id = %user.user_id, "activity without a persona, skipping");
                return Ok(UserOutcome::Skipped);
            }
        };

        let prompt = build_mining_prompt(&existing, &user.questions);
        let completion = self
            .provider
            .complete(vec![ChatMessage::user(prompt)], &self.config.options)
            .await?;
        debug!(
            user_id = %user.user_id,
            response = %TextUtils::truncate_with_ellipsis(&completion.content, 200),
            "model answered trait request"
        );

        let traits = parse_trait_response(&completion.content);
        let usage = UsageMetrics {
            total_tokens: completion.usage.total_tokens,
            prompt_tokens: completion.usage.prompt_tokens,
            completion_tokens: completion.usage.completion_tokens,
            cost_inr: completion.usage.cost_usd * self.config.usd_to_inr,
        };

        match self.database.personas.apply_persona_delta(&user.user_id, &traits, &usage)? {
            DeltaOutcome::Applied { traits_added } => {
                info!(user_id = %user.user_id, traits_added, tokens = usage.total_tokens, "persona updated");
                Ok(UserOutcome::Updated { traits_added })
            }
            // Removed between the read above and the write.
            DeltaOutcome::NoSuchUser => Err(ChatError::NotFound(format!(
                "persona {} disappeared during the pass",
                user.user_id
            ))),
        }
    }
}

/// Collapse per-session activity into one question list per user, keeping
/// the user order of the input.
fn group_by_user(activity: Vec<SessionActivity>) -> Vec<UserQuestions> {
    let mut users: Vec<UserQuestions> = Vec::new();
    for session in activity {
        let questions = session.conversations.into_iter().map(|c| c.user_question);
        match users.last_mut() {
            Some(last) if last.user_id == session.user_id => last.questions.extend(questions),
            _ => users.push(UserQuestions {
                user_id: session.user_id,
                questions: questions.collect(),
            }),
        }
    }
    users
}

fn build_mining_prompt(existing: &BTreeSet<String>, questions: &[String]) -> String {
    let existing_traits = if existing.is_empty() {
        "none".to_string()
    } else {
        existing.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    let conversation_history = questions
        .iter()
        .map(|q| format!("User Question: {}", q))
        .collect::<Vec<_>>()
        .join("\n");

    EXTRACTION_INSTRUCTION
        .replace("{existing_traits}", &existing_traits)
        .replace("{conversation_history}", &conversation_history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::{ActivityEntry, NewMessage, ProfileFields};
    use crate::model_runtime::{Completion, ScriptedRuntime, TokenUsage};
    use chrono::Utc;

    fn usage() -> TokenUsage {
        TokenUsage { prompt_tokens: 40, completion_tokens: 6, total_tokens: 46, cost_usd: 0.01 }
    }

    fn reply(content: &str) -> std::result::Result<Completion, String> {
        Ok(Completion { content: content.to_string(), usage: usage() })
    }

    fn config() -> TraitMinerConfig {
        TraitMinerConfig { pacing: Duration::ZERO, ..TraitMinerConfig::default() }
    }

    fn seed(db: &ChatDatabase, user: &str, question: &str) {
        db.personas.ensure_persona(user, &ProfileFields::default()).unwrap();
        db.messages
            .add_message(&NewMessage {
                user_id: user.to_string(),
                session_id: "s1".to_string(),
                question: question.to_string(),
                answer: "answer".to_string(),
                latency: 0.1,
                usage: UsageMetrics::default(),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_lines_become_one_trait() {
        let db = Arc::new(ChatDatabase::new_in_memory().unwrap());
        seed(&db, "u2", "Which trains have the lowest emissions?");
        let runtime = Arc::new(
            ScriptedRuntime::new(Vec::<String>::new(), usage())
                .with_replies(vec![reply("frequent traveler\nfrequent traveler")]),
        );
        let miner = TraitMiner::new(Arc::clone(&db), runtime.clone(), config());

        let report = miner.run_batch_pass().await.unwrap();
        assert_eq!(report.users_seen, 1);
        assert_eq!(report.users_updated, 1);
        assert_eq!(report.traits_added, 1);

        let persona = db.personas.get_persona("u2").unwrap().unwrap();
        assert_eq!(persona.traits.into_iter().collect::<Vec<_>>(), vec!["frequent traveler"]);
        assert_eq!(persona.total_tokens, 46);
        assert!((persona.cost_inr - 0.9).abs() < 1e-9);

        let request = runtime.last_request().unwrap();
        assert!(request[0]
            .content
            .contains("User Question: Which trains have the lowest emissions?"));
    }

    #[tokio::test]
    async fn one_failing_user_does_not_stop_the_pass() {
        let db = Arc::new(ChatDatabase::new_in_memory().unwrap());
        seed(&db, "a", "How do I compost?");
        seed(&db, "b", "Is cycling to work worth it?");
        let runtime = Arc::new(
            ScriptedRuntime::new(Vec::<String>::new(), usage())
                .with_replies(vec![Err("rate limited".into()), reply("cyclist")]),
        );
        let miner = TraitMiner::new(Arc::clone(&db), runtime.clone(), config());

        let report = miner.run_batch_pass().await.unwrap();
        assert_eq!(report.users_failed, 1);
        assert_eq!(report.users_updated, 1);
        assert_eq!(runtime.calls(), 2);
        assert!(db.personas.get_persona("a").unwrap().unwrap().traits.is_empty());
        assert!(db.personas.get_persona("b").unwrap().unwrap().traits.contains("cyclist"));
    }

    #[tokio::test]
    async fn rejection_answer_adds_usage_but_no_traits() {
        let db = Arc::new(ChatDatabase::new_in_memory().unwrap());
        seed(&db, "u1", "What is composting?");
        let runtime = Arc::new(
            ScriptedRuntime::new(Vec::<String>::new(), usage())
                .with_replies(vec![reply("No new traits identified")]),
        );
        let miner = TraitMiner::new(Arc::clone(&db), runtime, config());

        let report = miner.run_batch_pass().await.unwrap();
        assert_eq!(report.users_updated, 1);
        assert_eq!(report.traits_added, 0);
        let persona = db.personas.get_persona("u1").unwrap().unwrap();
        assert!(persona.traits.is_empty());
        assert_eq!(persona.prompt_tokens, 40);
    }

    #[tokio::test]
    async fn empty_window_calls_no_model() {
        let db = Arc::new(ChatDatabase::new_in_memory().unwrap());
        let runtime = Arc::new(ScriptedRuntime::new(Vec::<String>::new(), usage()));
        let miner = TraitMiner::new(db, runtime.clone(), config());

        assert_eq!(miner.run_batch_pass().await.unwrap(), BatchReport::default());
        assert_eq!(runtime.calls(), 0);
    }

    #[test]
    fn sessions_of_one_user_are_merged() {
        let entry = |q: &str| ActivityEntry {
            user_question: q.to_string(),
            answer: String::new(),
            timestamp: Utc::now(),
        };
        let activity = vec![
            SessionActivity { user_id: "a".into(), session_id: "s1".into(), conversations: vec![entry("q1")] },
            SessionActivity { user_id: "a".into(), session_id: "s2".into(), conversations: vec![entry("q2")] },
            SessionActivity { user_id: "b".into(), session_id: "s1".into(), conversations: vec![entry("q3")] },
        ];
        let users = group_by_user(activity);
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].questions, vec!["q1", "q2"]);
        assert_eq!(users[1].user_id, "b");
    }

    #[test]
    fn prompt_lists_known_traits() {
        let existing: BTreeSet<String> = ["cyclist".to_string(), "vegan".to_string()].into();
        let prompt = build_mining_prompt(&existing, &["Where can I recycle batteries?".to_string()]);
        assert!(prompt.contains("cyclist, vegan"));
        assert!(prompt.contains("User Question: Where can I recycle batteries?"));
        assert!(!prompt.contains("{existing_traits}"));
    }
}
