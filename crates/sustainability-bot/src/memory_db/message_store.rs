use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::memory_db::schema::*;
use crate::memory_db::{format_timestamp, parse_timestamp};

const MESSAGE_COLUMNS: &str = "message_id, user_id, session_id, user_question, answer, \
     user_feedback, latency, total_tokens, prompt_tokens, completion_tokens, cost_inr, timestamp";

/// Reads and writes rows of the `messages` table.
pub struct MessageStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl MessageStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    /// One checkout per operation; the guard returns the connection on drop.
    fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Persist a completed exchange and return its generated id.
    ///
    /// Fails with a storage error when the user has no persona row.
    pub fn add_message(&self, message: &NewMessage) -> Result<String> {
        message.usage.validate()?;
        let conn = self.get_conn()?;
        let message_id = Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO messages
             (message_id, user_id, session_id, user_question, answer, user_feedback,
              latency, total_tokens, prompt_tokens, completion_tokens, cost_inr, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                message_id,
                message.user_id,
                message.session_id,
                message.question,
                message.answer,
                message.latency,
                message.usage.total_tokens,
                message.usage.prompt_tokens,
                message.usage.completion_tokens,
                message.usage.cost_inr,
                format_timestamp(Utc::now()),
            ],
        )?;

        debug!(
            message_id = %message_id,
            user_id = %message.user_id,
            session_id = %message.session_id,
            "stored message"
        );
        Ok(message_id)
    }

    /// Set the feedback of one message. `None` when no row matches.
    pub fn update_feedback(
        &self,
        message_id: &str,
        feedback: Feedback,
    ) -> Result<Option<StoredMessage>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "UPDATE messages SET user_feedback = ?1 WHERE message_id = ?2 RETURNING {}",
            MESSAGE_COLUMNS
        );
        let updated = conn
            .query_row(&sql, params![feedback.as_i64(), message_id], map_message)
            .optional()?;
        Ok(updated)
    }

    pub fn get_message(&self, message_id: &str) -> Result<Option<StoredMessage>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM messages WHERE message_id = ?1", MESSAGE_COLUMNS);
        Ok(conn.query_row(&sql, [message_id], map_message).optional()?)
    }

    /// The `limit` most recent exchanges of one session, newest first.
    pub fn get_user_conversations(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationPair>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_question, answer FROM messages
             WHERE user_id = ?1 AND session_id = ?2
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?3",
        )?;
        let pairs = stmt
            .query_map(params![user_id, session_id, limit as i64], |row| {
                Ok(ConversationPair {
                    user_question: row.get(0)?,
                    answer: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
    }

    /// Every (user, session) with at least one message inside the trailing window.
    pub fn get_recent_activity(&self, window: chrono::Duration) -> Result<Vec<SessionActivity>> {
        self.get_activity_since(Utc::now() - window)
    }

    /// Groups sorted by user then session; entries oldest first.
    pub fn get_activity_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionActivity>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, session_id, user_question, answer, timestamp FROM messages
             WHERE timestamp >= ?1
             ORDER BY user_id ASC, session_id ASC, timestamp ASC, rowid ASC",
        )?;
        let mut rows = stmt.query([format_timestamp(cutoff)])?;

        let mut groups: Vec<SessionActivity> = Vec::new();
        while let Some(row) = rows.next()? {
            let user_id: String = row.get(0)?;
            let session_id: String = row.get(1)?;
            let entry = ActivityEntry {
                user_question: row.get(2)?,
                answer: row.get(3)?,
                timestamp: parse_timestamp(&row.get::<_, String>(4)?)?,
            };
            match groups.last_mut() {
                Some(group) if group.user_id == user_id && group.session_id == session_id => {
                    group.conversations.push(entry)
                }
                _ => groups.push(SessionActivity {
                    user_id,
                    session_id,
                    conversations: vec![entry],
                }),
            }
        }
        Ok(groups)
    }

    /// Messages of one user clustered by session, most recently active session first.
    pub fn get_user_messages(&self, user_id: &str) -> Result<Vec<SessionMessages>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM messages WHERE user_id = ?1 ORDER BY timestamp DESC, rowid DESC",
            MESSAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map([user_id], map_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cluster_by_session(messages))
    }

    /// All messages clustered by (user, session), most recently active cluster first.
    pub fn get_all_messages(&self) -> Result<Vec<SessionMessages>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM messages ORDER BY timestamp DESC, rowid DESC",
            MESSAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map([], map_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cluster_by_session(messages))
    }

    pub fn get_analytics(&self) -> Result<Analytics> {
        let conn = self.get_conn()?;

        let mut analytics = conn.query_row(
            "SELECT COUNT(*),
                    COUNT(DISTINCT user_id),
                    AVG(latency),
                    AVG(total_tokens),
                    AVG(prompt_tokens),
                    AVG(completion_tokens),
                    AVG(cost_inr),
                    COALESCE(SUM(total_tokens), 0),
                    COALESCE(SUM(prompt_tokens), 0),
                    COALESCE(SUM(completion_tokens), 0),
                    COALESCE(SUM(CASE WHEN user_feedback = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN user_feedback = -1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN user_feedback = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(cost_inr), 0.0)
             FROM messages",
            [],
            |row| {
                Ok(Analytics {
                    total_messages: row.get(0)?,
                    total_users: row.get(1)?,
                    avg_latency: row.get(2)?,
                    avg_total_tokens: row.get(3)?,
                    avg_input_tokens: row.get(4)?,
                    avg_output_tokens: row.get(5)?,
                    avg_cost_per_message: row.get(6)?,
                    total_tokens_used: row.get(7)?,
                    total_input_tokens: row.get(8)?,
                    total_output_tokens: row.get(9)?,
                    positive_feedback: row.get(10)?,
                    negative_feedback: row.get(11)?,
                    no_feedback: row.get(12)?,
                    total_cost: row.get(13)?,
                    ..Analytics::default()
                })
            },
        )?;

        analytics.total_sessions = conn.query_row(
            "SELECT COUNT(*) FROM (SELECT DISTINCT user_id, session_id FROM messages)",
            [],
            |row| row.get(0),
        )?;

        let ratio = |num: i64, den: i64| (den > 0).then(|| num as f64 / den as f64);
        analytics.avg_sessions_per_user = ratio(analytics.total_sessions, analytics.total_users);
        analytics.avg_messages_per_user = ratio(analytics.total_messages, analytics.total_users);
        analytics.avg_messages_per_session =
            ratio(analytics.total_messages, analytics.total_sessions);

        Ok(analytics)
    }
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let feedback_value: i64 = row.get(5)?;
    let user_feedback = Feedback::from_stored(feedback_value).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(5, feedback_value)
    })?;
    Ok(StoredMessage {
        message_id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        user_question: row.get(3)?,
        answer: row.get(4)?,
        user_feedback,
        latency: row.get(6)?,
        total_tokens: row.get(7)?,
        prompt_tokens: row.get(8)?,
        completion_tokens: row.get(9)?,
        cost_inr: row.get(10)?,
        timestamp: parse_timestamp(&row.get::<_, String>(11)?)?,
    })
}

/// Input must be newest first; cluster order follows first appearance.
fn cluster_by_session(messages: Vec<StoredMessage>) -> Vec<SessionMessages> {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut clusters: Vec<SessionMessages> = Vec::new();
    for message in messages {
        let key = (message.user_id.clone(), message.session_id.clone());
        match index.get(&key) {
            Some(&i) => clusters[i].messages.push(message),
            None => {
                index.insert(key, clusters.len());
                clusters.push(SessionMessages {
                    user_id: message.user_id.clone(),
                    session_id: message.session_id.clone(),
                    messages: vec![message],
                });
            }
        }
    }
    clusters
}
