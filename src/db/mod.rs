//! Database module for Mailwarden
//!
//! SQLite store for rules, dedup markers, notification history and the
//! activity log. Connection pooling via r2d2.

use crate::rules::{MatchCondition, NewRule, Rule, RuleStatus};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

const MAX_HISTORY_PAGE: u32 = 100;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Delivery status on a notification history row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        }
    }
}

/// Outcome status on an activity log row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Info,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Success => "success",
            ActivityStatus::Error => "error",
            ActivityStatus::Info => "info",
        }
    }
}

/// New notification history row
#[derive(Debug, Clone)]
pub struct NewNotificationRecord {
    pub account_id: i64,
    pub rule_name: String,
    pub channel: String,
    pub recipient: String,
    pub status: NotificationStatus,
    pub error: Option<String>,
}

/// Stored notification history row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub account_id: i64,
    pub rule_name: String,
    pub channel: String,
    pub recipient: String,
    pub status: String,
    pub error: Option<String>,
    pub created_at: String,
}

/// New activity log row
#[derive(Debug, Clone)]
pub struct NewActivityLogEntry {
    pub account_id: i64,
    pub event_type: String,
    pub title: String,
    pub description: String,
    pub status: ActivityStatus,
    pub details: Option<serde_json::Value>,
}

/// Stored activity log row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: i64,
    pub account_id: i64,
    pub event_type: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub details: Option<serde_json::Value>,
    pub created_at: String,
}

/// Database manager for thread-safe SQLite access
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl Database {
    /// Create a new database connection pool
    pub fn new(db_path: PathBuf) -> DbResult<Self> {
        let manager = SqliteConnectionManager::file(&db_path);

        let pool = Pool::builder()
            .max_size(10)
            .min_idle(Some(2))
            .connection_timeout(std::time::Duration::from_secs(10))
            .build(manager)?;

        let conn = pool.get()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        "#,
        )?;

        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create an in-memory database (for testing).
    /// Single-connection pool: every in-memory connection would otherwise
    /// see its own empty database.
    pub fn in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory();

        let pool = Pool::builder().max_size(1).build(manager)?;

        let conn = pool.get()?;
        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a connection from the pool
    #[inline]
    pub fn get_conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    // =========================================================================
    // RULES
    // =========================================================================

    /// Insert a new rule and return its id
    pub fn insert_rule(&self, rule: &NewRule) -> DbResult<i64> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO rules
            (account_id, name, subject_filter, sender_filter, keywords, condition,
             status, notification_emails, whatsapp_numbers, actions)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                rule.account_id,
                rule.name,
                rule.subject_filter,
                rule.sender_filter,
                to_json(&rule.keywords)?,
                rule.condition.as_str(),
                rule.status.as_str(),
                to_json(&rule.notification_emails)?,
                to_json(&rule.whatsapp_numbers)?,
                rule.actions.as_ref().map(|a| to_json(a)).transpose()?,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Update a rule's status (pause/resume)
    pub fn set_rule_status(&self, rule_id: i64, status: RuleStatus) -> DbResult<()> {
        let affected = self.execute(
            "UPDATE rules SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![status.as_str(), rule_id],
        )?;

        if affected == 0 {
            return Err(DbError::NotFound(format!("rule {}", rule_id)));
        }
        Ok(())
    }

    /// Delete a rule
    pub fn delete_rule(&self, rule_id: i64) -> DbResult<()> {
        self.execute("DELETE FROM rules WHERE id = ?1", params![rule_id])?;
        Ok(())
    }

    /// Get a single rule by id
    pub fn get_rule(&self, rule_id: i64) -> DbResult<Rule> {
        let rules = self.query(
            &format!("{} WHERE id = ?1", RULE_SELECT),
            params![rule_id],
            map_rule_row,
        )?;

        rules
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("rule {}", rule_id)))
    }

    /// All active rules for an account, oldest first
    pub fn list_active_rules(&self, account_id: i64) -> DbResult<Vec<Rule>> {
        self.query(
            &format!(
                "{} WHERE account_id = ?1 AND status = 'active' ORDER BY id ASC",
                RULE_SELECT
            ),
            params![account_id],
            map_rule_row,
        )
    }

    // =========================================================================
    // DEDUP MARKERS
    // =========================================================================

    /// True when a (message, rule) pair already has a processed marker
    pub fn has_processed(&self, message_id: &str, rule_id: i64) -> DbResult<bool> {
        let count: i64 = self.query_row(
            "SELECT COUNT(*) FROM processed_messages WHERE message_id = ?1 AND rule_id = ?2",
            params![message_id, rule_id],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    /// Record a processed marker. Returns false when the marker already
    /// existed: a duplicate insert from a concurrent trigger is benign.
    pub fn mark_processed(
        &self,
        account_id: i64,
        message_id: &str,
        rule_id: i64,
        action_type: &str,
    ) -> DbResult<bool> {
        let conn = self.get_conn()?;

        let result = conn.execute(
            r#"
            INSERT INTO processed_messages (account_id, message_id, rule_id, action_type)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![account_id, message_id, rule_id, action_type],
        );

        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                log::debug!(
                    "Marker for message {} / rule {} already present, skipping",
                    message_id,
                    rule_id
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // NOTIFICATION HISTORY
    // =========================================================================

    /// Insert one per-recipient delivery record
    pub fn insert_notification(&self, record: &NewNotificationRecord) -> DbResult<i64> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO notification_history
            (account_id, rule_name, channel, recipient, status, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.account_id,
                record.rule_name,
                record.channel,
                record.recipient,
                record.status.as_str(),
                record.error,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Most recent notification records for an account
    pub fn list_notifications(&self, account_id: i64, limit: u32) -> DbResult<Vec<NotificationRecord>> {
        let limit = limit.min(MAX_HISTORY_PAGE);

        self.query(
            r#"
            SELECT id, account_id, rule_name, channel, recipient, status, error, created_at
            FROM notification_history
            WHERE account_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "#,
            params![account_id, limit],
            |row| {
                Ok(NotificationRecord {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    rule_name: row.get(2)?,
                    channel: row.get(3)?,
                    recipient: row.get(4)?,
                    status: row.get(5)?,
                    error: row.get(6)?,
                    created_at: row.get(7)?,
                })
            },
        )
    }

    // =========================================================================
    // ACTIVITY LOG
    // =========================================================================

    /// Insert one activity log entry
    pub fn insert_log_entry(&self, entry: &NewActivityLogEntry) -> DbResult<i64> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO activity_log
            (account_id, event_type, title, description, status, details)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                entry.account_id,
                entry.event_type,
                entry.title,
                entry.description,
                entry.status.as_str(),
                entry.details.as_ref().map(|d| d.to_string()),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Most recent activity log entries for an account
    pub fn list_log_entries(&self, account_id: i64, limit: u32) -> DbResult<Vec<ActivityLogEntry>> {
        let limit = limit.min(MAX_HISTORY_PAGE);

        self.query(
            r#"
            SELECT id, account_id, event_type, title, description, status, details, created_at
            FROM activity_log
            WHERE account_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "#,
            params![account_id, limit],
            |row| {
                let details: Option<String> = row.get(6)?;
                Ok(ActivityLogEntry {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    event_type: row.get(2)?,
                    title: row.get(3)?,
                    description: row.get(4)?,
                    status: row.get(5)?,
                    details: details.and_then(|d| serde_json::from_str(&d).ok()),
                    created_at: row.get(7)?,
                })
            },
        )
    }

    // =========================================================================
    // SETTINGS
    // =========================================================================

    /// Get a typed setting value
    pub fn get_setting<T: serde::de::DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        let rows = self.query(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )?;

        match rows.into_iter().next() {
            Some(value) => serde_json::from_str(&value)
                .map(Some)
                .map_err(|e| DbError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Set a typed setting value
    pub fn set_setting<T: Serialize>(&self, key: &str, value: &T) -> DbResult<()> {
        let json = to_json(value)?;

        self.execute(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')
            "#,
            params![key, json],
        )?;
        Ok(())
    }

    // =========================================================================
    // HELPER METHODS
    // =========================================================================

    /// Execute a SQL statement and return affected rows
    pub fn execute<P>(&self, sql: &str, params: P) -> DbResult<usize>
    where
        P: rusqlite::Params,
    {
        let conn = self.get_conn()?;

        let affected = conn.execute(sql, params)?;
        Ok(affected)
    }

    /// Query database and map results
    pub fn query<T, P, F>(&self, sql: &str, params: P, f: F) -> DbResult<Vec<T>>
    where
        P: rusqlite::Params,
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, f)?;

        rows.collect::<rusqlite::Result<Vec<T>>>()
            .map_err(DbError::from)
    }

    /// Query single row
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> DbResult<T>
    where
        P: rusqlite::Params,
        F: FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.get_conn()?;

        conn.query_row(sql, params, f).map_err(DbError::from)
    }
}

const RULE_SELECT: &str = r#"
    SELECT id, account_id, name, subject_filter, sender_filter, keywords,
           condition, status, notification_emails, notification_email,
           whatsapp_numbers, actions, created_at, updated_at
    FROM rules
"#;

/// Map one rules row, tolerating malformed JSON columns
fn map_rule_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Rule> {
    let keywords_json: String = row.get(5)?;
    let condition_str: String = row.get(6)?;
    let status_str: String = row.get(7)?;
    let emails_json: String = row.get(8)?;
    let numbers_json: String = row.get(10)?;
    let actions_json: Option<String> = row.get(11)?;

    Ok(Rule {
        id: row.get(0)?,
        account_id: row.get(1)?,
        name: row.get(2)?,
        subject_filter: row.get(3)?,
        sender_filter: row.get(4)?,
        keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
        condition: MatchCondition::parse(&condition_str),
        status: RuleStatus::parse(&status_str),
        notification_emails: serde_json::from_str(&emails_json).unwrap_or_default(),
        notification_email: row.get(9)?,
        whatsapp_numbers: serde_json::from_str(&numbers_json).unwrap_or_default(),
        actions: actions_json.and_then(|a| serde_json::from_str(&a).ok()),
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn to_json<T: Serialize>(value: &T) -> DbResult<String> {
    serde_json::to_string(value).map_err(|e| DbError::Serialization(e.to_string()))
}
