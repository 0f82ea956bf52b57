//! PostgreSQL implementation of [`Store`] on a shared sqlx pool

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{ban_expiry, Ban, BroadcastRecord, LogEntry, LogKind, Stats, Store, User, UserProfile};
use crate::catalog::{Grade, NewTextbook, Subject, Textbook};
use crate::config::DatabaseConfig;

const SCHEMA: [(&str, &str); 8] = [
    (
        "users",
        "CREATE TABLE IF NOT EXISTS users (
            id BIGINT PRIMARY KEY,
            username TEXT,
            first_name TEXT,
            last_name TEXT,
            agreed_to_rules BOOLEAN NOT NULL DEFAULT FALSE,
            downloads BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_activity TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    ),
    (
        "banned_users",
        "CREATE TABLE IF NOT EXISTS banned_users (
            user_id BIGINT PRIMARY KEY,
            reason TEXT NOT NULL,
            banned_until TIMESTAMPTZ,
            banned_by BIGINT NOT NULL,
            banned_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    ),
    (
        "textbooks",
        "CREATE TABLE IF NOT EXISTS textbooks (
            id BIGSERIAL PRIMARY KEY,
            title TEXT NOT NULL,
            author TEXT NOT NULL,
            grade SMALLINT NOT NULL CHECK (grade BETWEEN 1 AND 11),
            subject TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size BIGINT,
            downloads BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    ),
    (
        "textbooks grade/subject index",
        "CREATE INDEX IF NOT EXISTS idx_textbooks_grade_subject ON textbooks (grade, subject)",
    ),
    (
        "logs",
        "CREATE TABLE IF NOT EXISTS logs (
            id BIGSERIAL PRIMARY KEY,
            log_type TEXT NOT NULL,
            user_id BIGINT,
            action TEXT NOT NULL,
            details JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    ),
    (
        "logs created_at index",
        "CREATE INDEX IF NOT EXISTS idx_logs_created_at ON logs (created_at)",
    ),
    (
        "users last_activity index",
        "CREATE INDEX IF NOT EXISTS idx_users_last_activity ON users (last_activity)",
    ),
    (
        "broadcasts",
        "CREATE TABLE IF NOT EXISTS broadcasts (
            id BIGSERIAL PRIMARY KEY,
            message TEXT NOT NULL,
            sent_count BIGINT NOT NULL DEFAULT 0,
            failed_count BIGINT NOT NULL DEFAULT 0,
            sent_by BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    ),
];

const USER_COLUMNS: &str =
    "id, username, first_name, last_name, agreed_to_rules, downloads, created_at, last_activity";
const BAN_COLUMNS: &str = "user_id, reason, banned_until, banned_by, banned_at";
const TEXTBOOK_COLUMNS: &str =
    "id, title, author, grade, subject, file_name, file_path, file_size, downloads, created_at";

/// Open the connection pool. Every session gets the configured statement timeout.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let timeout_ms = config.command_timeout.as_millis().to_string();
    let options = PgConnectOptions::from_str(&config.url)
        .context("Failed to parse DATABASE_URL")?
        .options([("statement_timeout", timeout_ms)]);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.command_timeout)
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    info!(max_connections = config.max_connections, "Database pool established");
    Ok(pool)
}

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema...");

    for (name, statement) in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create {}", name))?;
    }

    info!("Database schema initialized successfully");
    Ok(())
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    agreed_to_rules: bool,
    downloads: i64,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            agreed_to_rules: row.agreed_to_rules,
            downloads: row.downloads,
            created_at: row.created_at,
            last_activity: row.last_activity,
        }
    }
}

#[derive(FromRow)]
struct UpsertedUserRow {
    #[sqlx(flatten)]
    user: UserRow,
    inserted: bool,
}

#[derive(FromRow)]
struct BanRow {
    user_id: i64,
    reason: String,
    banned_until: Option<DateTime<Utc>>,
    banned_by: i64,
    banned_at: DateTime<Utc>,
}

impl From<BanRow> for Ban {
    fn from(row: BanRow) -> Self {
        Ban {
            user_id: row.user_id,
            reason: row.reason,
            banned_until: row.banned_until,
            banned_by: row.banned_by,
            banned_at: row.banned_at,
        }
    }
}

#[derive(FromRow)]
struct TextbookRow {
    id: i64,
    title: String,
    author: String,
    grade: i16,
    subject: String,
    file_name: String,
    file_path: String,
    file_size: Option<i64>,
    downloads: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<TextbookRow> for Textbook {
    type Error = anyhow::Error;

    fn try_from(row: TextbookRow) -> Result<Self> {
        let grade = u8::try_from(row.grade)
            .ok()
            .and_then(|g| Grade::try_from(g).ok())
            .with_context(|| format!("Textbook {} has invalid grade {}", row.id, row.grade))?;
        let subject = row
            .subject
            .parse::<Subject>()
            .with_context(|| format!("Textbook {} has invalid subject", row.id))?;

        Ok(Textbook {
            id: row.id,
            title: row.title,
            author: row.author,
            grade,
            subject,
            file_name: row.file_name,
            file_path: row.file_path,
            file_size: row.file_size,
            downloads: row.downloads,
            created_at: row.created_at,
        })
    }
}

fn textbooks_from_rows(rows: Vec<TextbookRow>) -> Vec<Textbook> {
    rows.into_iter()
        .filter_map(|row| match Textbook::try_from(row) {
            Ok(textbook) => Some(textbook),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable textbook row");
                None
            }
        })
        .collect()
}

#[derive(FromRow)]
struct LogRow {
    id: i64,
    log_type: String,
    user_id: Option<i64>,
    action: String,
    details: Json<Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for LogEntry {
    type Error = anyhow::Error;

    fn try_from(row: LogRow) -> Result<Self> {
        Ok(LogEntry {
            id: row.id,
            kind: row.log_type.parse()?,
            user_id: row.user_id,
            action: row.action,
            details: row.details.0,
            created_at: row.created_at,
        })
    }
}

fn logs_from_rows(rows: Vec<LogRow>) -> Vec<LogEntry> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            match LogEntry::try_from(row) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(log_id = id, error = %e, "Skipping unreadable log row");
                    None
                }
            }
        })
        .collect()
}

#[derive(FromRow)]
struct BroadcastRow {
    id: i64,
    message: String,
    sent_count: i64,
    failed_count: i64,
    sent_by: i64,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct StatsRow {
    total_users: i64,
    total_textbooks: i64,
    active_today: i64,
    total_downloads: i64,
    requests_today: i64,
    banned_users: i64,
}

/// Escape `%`, `_` and `\` for use inside an ILIKE pattern
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// [`Store`] backed by PostgreSQL
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Store for PgStore {
    async fn get_or_create_user(&self, profile: &UserProfile) -> Result<(User, bool)> {
        let sql = format!(
            "INSERT INTO users (id, username, first_name, last_name)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                last_activity = NOW()
             RETURNING {USER_COLUMNS}, (xmax = 0) AS inserted"
        );

        let row: UpsertedUserRow = sqlx::query_as(&sql)
            .bind(profile.id)
            .bind(&profile.username)
            .bind(&profile.first_name)
            .bind(&profile.last_name)
            .fetch_one(&self.pool)
            .await
            .context("Failed to get or create user")?;

        if row.inserted {
            info!(user_id = profile.id, "Registered new user");
        }
        Ok((row.user.into(), row.inserted))
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read user")?;
        Ok(row.map(User::from))
    }

    async fn touch_user(&self, profile: &UserProfile) -> Result<()> {
        sqlx::query(
            "UPDATE users SET username = $2, first_name = $3, last_name = $4, last_activity = NOW()
             WHERE id = $1",
        )
        .bind(profile.id)
        .bind(&profile.username)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .execute(&self.pool)
        .await
        .context("Failed to update user activity")?;
        Ok(())
    }

    async fn agree_to_rules(&self, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET agreed_to_rules = TRUE, last_activity = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to record rules agreement")?;
        Ok(())
    }

    async fn active_ban(&self, user_id: i64, at: DateTime<Utc>) -> Result<Option<Ban>> {
        let sql = format!(
            "SELECT {BAN_COLUMNS} FROM banned_users
             WHERE user_id = $1 AND (banned_until IS NULL OR banned_until > $2)"
        );
        let row: Option<BanRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to check ban status")?;
        Ok(row.map(Ban::from))
    }

    async fn ban_user(
        &self,
        user_id: i64,
        reason: &str,
        days: Option<u32>,
        admin_id: i64,
    ) -> Result<Ban> {
        let banned_until = ban_expiry(Utc::now(), days);
        let sql = format!(
            "INSERT INTO banned_users (user_id, reason, banned_until, banned_by)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id) DO UPDATE SET
                reason = EXCLUDED.reason,
                banned_until = EXCLUDED.banned_until,
                banned_by = EXCLUDED.banned_by,
                banned_at = NOW()
             RETURNING {BAN_COLUMNS}"
        );
        let row: BanRow = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(reason)
            .bind(banned_until)
            .bind(admin_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to ban user")?;

        info!(user_id, admin_id, ?banned_until, "User banned");
        Ok(row.into())
    }

    async fn unban_user(&self, user_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM banned_users WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to unban user")?;

        let removed = result.rows_affected() > 0;
        info!(user_id, removed, "Unban requested");
        Ok(removed)
    }

    async fn subjects_for_grade(&self, grade: Grade) -> Result<Vec<Subject>> {
        let codes: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT subject FROM textbooks WHERE grade = $1")
                .bind(i16::from(grade.number()))
                .fetch_all(&self.pool)
                .await
                .context("Failed to read subjects for grade")?;

        let mut subjects: Vec<Subject> = codes
            .iter()
            .filter_map(|code| match code.parse::<Subject>() {
                Ok(subject) => Some(subject),
                Err(e) => {
                    warn!(error = %e, "Ignoring unknown subject code in textbooks table");
                    None
                }
            })
            .collect();
        subjects.sort_by_key(|s| s.position());
        Ok(subjects)
    }

    async fn get_textbooks(&self, grade: Grade, subject: Subject) -> Result<Vec<Textbook>> {
        let sql = format!(
            "SELECT {TEXTBOOK_COLUMNS} FROM textbooks
             WHERE grade = $1 AND subject = $2
             ORDER BY title, id"
        );
        let rows: Vec<TextbookRow> = sqlx::query_as(&sql)
            .bind(i16::from(grade.number()))
            .bind(subject.code())
            .fetch_all(&self.pool)
            .await
            .context("Failed to read textbooks")?;

        debug!(grade = %grade, subject = %subject, count = rows.len(), "Loaded textbooks");
        Ok(textbooks_from_rows(rows))
    }

    async fn get_textbook(&self, textbook_id: i64) -> Result<Option<Textbook>> {
        let sql = format!("SELECT {TEXTBOOK_COLUMNS} FROM textbooks WHERE id = $1");
        let row: Option<TextbookRow> = sqlx::query_as(&sql)
            .bind(textbook_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read textbook")?;
        row.map(Textbook::try_from).transpose()
    }

    async fn search_textbooks(&self, query: &str, limit: i64) -> Result<Vec<Textbook>> {
        let sql = format!(
            "SELECT {TEXTBOOK_COLUMNS} FROM textbooks
             WHERE title ILIKE $1 ESCAPE '\\' OR author ILIKE $1 ESCAPE '\\'
             ORDER BY downloads DESC, title
             LIMIT $2"
        );
        let rows: Vec<TextbookRow> = sqlx::query_as(&sql)
            .bind(like_pattern(query.trim()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to search textbooks")?;
        Ok(textbooks_from_rows(rows))
    }

    async fn all_textbooks(&self) -> Result<Vec<Textbook>> {
        let sql = format!("SELECT {TEXTBOOK_COLUMNS} FROM textbooks ORDER BY grade, subject, title");
        let rows: Vec<TextbookRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list textbooks")?;

        let mut textbooks = textbooks_from_rows(rows);
        textbooks.sort_by(|a, b| {
            (a.grade, a.subject.position(), &a.title).cmp(&(b.grade, b.subject.position(), &b.title))
        });
        Ok(textbooks)
    }

    async fn add_textbook(&self, textbook: &NewTextbook) -> Result<Textbook> {
        let sql = format!(
            "INSERT INTO textbooks (title, author, grade, subject, file_name, file_path, file_size)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {TEXTBOOK_COLUMNS}"
        );
        let row: TextbookRow = sqlx::query_as(&sql)
            .bind(&textbook.title)
            .bind(&textbook.author)
            .bind(i16::from(textbook.grade.number()))
            .bind(textbook.subject.code())
            .bind(&textbook.file_name)
            .bind(&textbook.file_path)
            .bind(textbook.file_size)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert textbook")?;

        info!(textbook_id = row.id, title = %row.title, "Textbook added");
        Textbook::try_from(row)
    }

    async fn remove_textbook(&self, textbook_id: i64) -> Result<Option<Textbook>> {
        let sql = format!("DELETE FROM textbooks WHERE id = $1 RETURNING {TEXTBOOK_COLUMNS}");
        let row: Option<TextbookRow> = sqlx::query_as(&sql)
            .bind(textbook_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to delete textbook")?;

        if row.is_some() {
            info!(textbook_id, "Textbook removed");
        }
        row.map(Textbook::try_from).transpose()
    }

    async fn increment_download(&self, textbook_id: i64) -> Result<()> {
        sqlx::query("UPDATE textbooks SET downloads = downloads + 1 WHERE id = $1")
            .bind(textbook_id)
            .execute(&self.pool)
            .await
            .context("Failed to increment textbook downloads")?;
        Ok(())
    }

    async fn increment_user_download(&self, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET downloads = downloads + 1 WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to increment user downloads")?;
        Ok(())
    }

    async fn log_event(
        &self,
        kind: LogKind,
        user_id: Option<i64>,
        action: &str,
        details: Value,
    ) -> Result<()> {
        sqlx::query("INSERT INTO logs (log_type, user_id, action, details) VALUES ($1, $2, $3, $4)")
            .bind(kind.as_str())
            .bind(user_id)
            .bind(action)
            .bind(Json(details))
            .execute(&self.pool)
            .await
            .context("Failed to write log entry")?;
        Ok(())
    }

    async fn recent_logs(&self, limit: i64) -> Result<Vec<LogEntry>> {
        let rows: Vec<LogRow> = sqlx::query_as(
            "SELECT id, log_type, user_id, action, details, created_at
             FROM logs ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to read logs")?;

        Ok(logs_from_rows(rows))
    }

    async fn stats(&self, since: DateTime<Utc>) -> Result<Stats> {
        let row: StatsRow = sqlx::query_as(
            "SELECT
                (SELECT COUNT(*) FROM users) AS total_users,
                (SELECT COUNT(*) FROM textbooks) AS total_textbooks,
                (SELECT COUNT(*) FROM users WHERE last_activity >= $1) AS active_today,
                (SELECT COALESCE(SUM(downloads), 0)::BIGINT FROM textbooks) AS total_downloads,
                (SELECT COUNT(*) FROM logs WHERE created_at >= $1) AS requests_today,
                (SELECT COUNT(*) FROM banned_users
                    WHERE banned_until IS NULL OR banned_until > NOW()) AS banned_users",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("Failed to read statistics")?;

        Ok(Stats {
            total_users: row.total_users,
            total_textbooks: row.total_textbooks,
            active_today: row.active_today,
            total_downloads: row.total_downloads,
            requests_today: row.requests_today,
            banned_users: row.banned_users,
        })
    }

    async fn recent_users(&self, limit: i64) -> Result<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY last_activity DESC LIMIT $1");
        let rows: Vec<UserRow> = sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to read recent users")?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn broadcast_recipients(&self) -> Result<Vec<i64>> {
        sqlx::query_scalar(
            "SELECT u.id FROM users u
             WHERE u.agreed_to_rules = TRUE
               AND NOT EXISTS (
                   SELECT 1 FROM banned_users b
                   WHERE b.user_id = u.id
                     AND (b.banned_until IS NULL OR b.banned_until > NOW())
               )
             ORDER BY u.id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to read broadcast recipients")
    }

    async fn save_broadcast(
        &self,
        message: &str,
        sent_count: i64,
        failed_count: i64,
        admin_id: i64,
    ) -> Result<BroadcastRecord> {
        let row: BroadcastRow = sqlx::query_as(
            "INSERT INTO broadcasts (message, sent_count, failed_count, sent_by)
             VALUES ($1, $2, $3, $4)
             RETURNING id, message, sent_count, failed_count, sent_by, created_at",
        )
        .bind(message)
        .bind(sent_count)
        .bind(failed_count)
        .bind(admin_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to save broadcast")?;

        Ok(BroadcastRecord {
            id: row.id,
            message: row.message,
            sent_count: row.sent_count,
            failed_count: row.failed_count,
            sent_by: row.sent_by,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("алгебра"), "%алгебра%");
        assert_eq!(like_pattern("100%_done"), "%100\\%\\_done%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    fn log_row(id: i64, log_type: &str) -> LogRow {
        LogRow {
            id,
            log_type: log_type.to_string(),
            user_id: Some(7),
            action: "start_command".to_string(),
            details: Json(serde_json::json!({})),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_unknown_log_kind_rows_are_skipped() {
        let entries = logs_from_rows(vec![
            log_row(3, "ban"),
            log_row(2, "legacy_audit"),
            log_row(1, "user_action"),
        ]);

        let ids: Vec<i64> = entries.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert_eq!(entries[0].kind, LogKind::Ban);
    }
}
