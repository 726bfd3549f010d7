//! Persona storage: registration, listing and atomic delta application
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};

use crate::error::Result;
use crate::memory_db::schema::*;
use crate::memory_db::{format_timestamp, parse_timestamp};
use crate::persona::merge_traits;

const PERSONA_COLUMNS: &str = "user_id, name, age, gender, city, personality_info, \
     total_tokens, prompt_tokens, completion_tokens, cost_inr, created_at, updated_at";

pub struct PersonaStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl PersonaStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    pub fn get_persona(&self, user_id: &str) -> Result<Option<Persona>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM user_persona WHERE user_id = ?1", PERSONA_COLUMNS);
        Ok(conn.query_row(&sql, [user_id], map_persona).optional()?)
    }

    /// All personas, most recently updated first.
    pub fn list_personas(&self) -> Result<Vec<Persona>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM user_persona ORDER BY updated_at DESC, rowid DESC",
            PERSONA_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let personas = stmt
            .query_map([], map_persona)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(personas)
    }

    /// Insert a persona if none exists. An existing row is left untouched.
    ///
    /// Returns true when a row was created.
    pub fn ensure_persona(&self, user_id: &str, fields: &ProfileFields) -> Result<bool> {
        let conn = self.get_conn()?;
        let now = format_timestamp(Utc::now());
        let inserted = conn.execute(
            "INSERT INTO user_persona (user_id, name, age, gender, city, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(user_id) DO NOTHING",
            params![user_id, fields.name, fields.age, fields.gender, fields.city, now],
        )?;
        if inserted > 0 {
            info!(user_id, "created persona");
        }
        Ok(inserted > 0)
    }

    /// Register a user. Provided fields overwrite, absent ones keep the stored value;
    /// counters and traits are never touched.
    pub fn upsert_persona(&self, user_id: &str, fields: &ProfileFields) -> Result<UpsertOutcome> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existed = tx
            .query_row("SELECT 1 FROM user_persona WHERE user_id = ?1", [user_id], |_| Ok(()))
            .optional()?
            .is_some();

        let now = format_timestamp(Utc::now());
        tx.execute(
            "INSERT INTO user_persona (user_id, name, age, gender, city, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                name = COALESCE(excluded.name, user_persona.name),
                age = COALESCE(excluded.age, user_persona.age),
                gender = COALESCE(excluded.gender, user_persona.gender),
                city = COALESCE(excluded.city, user_persona.city),
                updated_at = excluded.updated_at",
            params![user_id, fields.name, fields.age, fields.gender, fields.city, now],
        )?;
        tx.commit()?;

        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }

    /// Merge traits and add usage to the counters in one immediate transaction.
    ///
    /// The persona must already exist; nothing is created here.
    pub fn apply_persona_delta(
        &self,
        user_id: &str,
        traits: &[String],
        usage: &UsageMetrics,
    ) -> Result<DeltaOutcome> {
        usage.validate()?;

        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored: Option<String> = tx
            .query_row(
                "SELECT personality_info FROM user_persona WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(stored) = stored else {
            return Ok(DeltaOutcome::NoSuchUser);
        };

        let existing: BTreeSet<String> = serde_json::from_str(&stored)?;
        let merged = merge_traits(&existing, traits);
        let traits_added = merged.len() - existing.len();

        tx.execute(
            "UPDATE user_persona SET
                personality_info = ?1,
                total_tokens = total_tokens + ?2,
                prompt_tokens = prompt_tokens + ?3,
                completion_tokens = completion_tokens + ?4,
                cost_inr = cost_inr + ?5,
                updated_at = ?6
             WHERE user_id = ?7",
            params![
                serde_json::to_string(&merged)?,
                usage.total_tokens,
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.cost_inr,
                format_timestamp(Utc::now()),
                user_id,
            ],
        )?;
        tx.commit()?;

        debug!(user_id, traits_added, "applied persona delta");
        Ok(DeltaOutcome::Applied { traits_added })
    }
}

fn map_persona(row: &Row<'_>) -> rusqlite::Result<Persona> {
    let traits_json: String = row.get(5)?;
    let traits: BTreeSet<String> = serde_json::from_str(&traits_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Persona {
        user_id: row.get(0)?,
        name: row.get(1)?,
        age: row.get(2)?,
        gender: row.get(3)?,
        city: row.get(4)?,
        traits,
        total_tokens: row.get(6)?,
        prompt_tokens: row.get(7)?,
        completion_tokens: row.get(8)?,
        cost_inr: row.get(9)?,
        created_at: parse_timestamp(&row.get::<_, String>(10)?)?,
        updated_at: parse_timestamp(&row.get::<_, String>(11)?)?,
    })
}
