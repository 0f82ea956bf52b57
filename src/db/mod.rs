//! # Persistence
//!
//! The [`Store`] trait is the single data-access interface used by the bot and
//! the catalog CLI. [`PgStore`] is the production implementation and
//! [`MemoryStore`] keeps everything in process memory.
//!
//! Every method is an independent statement: counter bumps and audit log
//! writes are not wrapped in a shared transaction.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::str::FromStr;

use crate::catalog::{Grade, NewTextbook, Subject, Textbook};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{connect, init_database_schema, PgStore};

/// Telegram profile fields captured on every interaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Bot user row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Telegram user id
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub agreed_to_rules: bool,
    pub downloads: i64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl User {
    /// Full name, then `@username`, then the numeric id
    pub fn display_name(&self) -> String {
        let full_name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if !full_name.is_empty() {
            return full_name;
        }
        match self.username.as_deref().filter(|u| !u.is_empty()) {
            Some(username) => format!("@{}", username),
            None => self.id.to_string(),
        }
    }
}

/// Access restriction for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ban {
    pub user_id: i64,
    pub reason: String,
    /// `None` for a permanent ban
    pub banned_until: Option<DateTime<Utc>>,
    pub banned_by: i64,
    pub banned_at: DateTime<Utc>,
}

impl Ban {
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.banned_until.map_or(true, |until| until > at)
    }
}

/// Audit log category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    UserAction,
    Ban,
    AdminAction,
    System,
    Error,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::UserAction => "user_action",
            LogKind::Ban => "ban",
            LogKind::AdminAction => "admin_action",
            LogKind::System => "system",
            LogKind::Error => "error",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user_action" => Ok(LogKind::UserAction),
            "ban" => Ok(LogKind::Ban),
            "admin_action" => Ok(LogKind::AdminAction),
            "system" => Ok(LogKind::System),
            "error" => Ok(LogKind::Error),
            other => Err(anyhow::anyhow!("Unknown log kind: {}", other)),
        }
    }
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub kind: LogKind,
    pub user_id: Option<i64>,
    pub action: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counters shown to the administrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub total_users: i64,
    pub total_textbooks: i64,
    /// Users with any activity since the start of the day
    pub active_today: i64,
    /// Sum of textbook download counters
    pub total_downloads: i64,
    /// Audit log entries written since the start of the day
    pub requests_today: i64,
    pub banned_users: i64,
}

/// Stored result of an administrator broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastRecord {
    pub id: i64,
    pub message: String,
    pub sent_count: i64,
    pub failed_count: i64,
    pub sent_by: i64,
    pub created_at: DateTime<Utc>,
}

/// Data access for users, bans, textbooks, audit logs and broadcasts
pub trait Store: Send + Sync {
    /// Returns the user row and whether it was created by this call
    fn get_or_create_user(
        &self,
        profile: &UserProfile,
    ) -> impl Future<Output = Result<(User, bool)>> + Send;

    fn get_user(&self, user_id: i64) -> impl Future<Output = Result<Option<User>>> + Send;

    /// Refresh profile fields and the last activity timestamp
    fn touch_user(&self, profile: &UserProfile) -> impl Future<Output = Result<()>> + Send;

    fn agree_to_rules(&self, user_id: i64) -> impl Future<Output = Result<()>> + Send;

    /// The ban in force for `user_id` at instant `at`, if any
    fn active_ban(
        &self,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Ban>>> + Send;

    fn is_banned(&self, user_id: i64) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.active_ban(user_id, Utc::now()).await?.is_some()) }
    }

    /// Insert or replace the ban for `user_id`. `days` of `None` or `0` is permanent.
    fn ban_user(
        &self,
        user_id: i64,
        reason: &str,
        days: Option<u32>,
        admin_id: i64,
    ) -> impl Future<Output = Result<Ban>> + Send;

    /// Returns whether a ban record existed
    fn unban_user(&self, user_id: i64) -> impl Future<Output = Result<bool>> + Send;

    /// Subjects that have at least one textbook for `grade`, in display order
    fn subjects_for_grade(&self, grade: Grade) -> impl Future<Output = Result<Vec<Subject>>> + Send;

    /// Textbooks for a grade and subject ordered by title
    fn get_textbooks(
        &self,
        grade: Grade,
        subject: Subject,
    ) -> impl Future<Output = Result<Vec<Textbook>>> + Send;

    fn get_textbook(&self, textbook_id: i64) -> impl Future<Output = Result<Option<Textbook>>> + Send;

    /// Case-insensitive title or author match, most downloaded first
    fn search_textbooks(
        &self,
        query: &str,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Textbook>>> + Send;

    /// Every textbook ordered by grade, subject and title
    fn all_textbooks(&self) -> impl Future<Output = Result<Vec<Textbook>>> + Send;

    fn add_textbook(&self, textbook: &NewTextbook) -> impl Future<Output = Result<Textbook>> + Send;

    /// Delete the row and return it
    fn remove_textbook(
        &self,
        textbook_id: i64,
    ) -> impl Future<Output = Result<Option<Textbook>>> + Send;

    fn increment_download(&self, textbook_id: i64) -> impl Future<Output = Result<()>> + Send;

    fn increment_user_download(&self, user_id: i64) -> impl Future<Output = Result<()>> + Send;

    fn log_event(
        &self,
        kind: LogKind,
        user_id: Option<i64>,
        action: &str,
        details: Value,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Newest entries first
    fn recent_logs(&self, limit: i64) -> impl Future<Output = Result<Vec<LogEntry>>> + Send;

    /// Aggregates, with "today" counters measured from `since`
    fn stats(&self, since: DateTime<Utc>) -> impl Future<Output = Result<Stats>> + Send;

    /// Most recently active users first
    fn recent_users(&self, limit: i64) -> impl Future<Output = Result<Vec<User>>> + Send;

    /// Ids of users who accepted the rules and are not banned
    fn broadcast_recipients(&self) -> impl Future<Output = Result<Vec<i64>>> + Send;

    fn save_broadcast(
        &self,
        message: &str,
        sent_count: i64,
        failed_count: i64,
        admin_id: i64,
    ) -> impl Future<Output = Result<BroadcastRecord>> + Send;
}

/// Expiry instant for a ban of `days` starting at `now`. A duration past the
/// representable calendar never expires.
pub fn ban_expiry(now: DateTime<Utc>, days: Option<u32>) -> Option<DateTime<Utc>> {
    days.filter(|d| *d > 0)
        .and_then(|d| now.checked_add_signed(chrono::Duration::days(i64::from(d))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user(first: Option<&str>, last: Option<&str>, username: Option<&str>) -> User {
        let now = Utc::now();
        User {
            id: 99,
            username: username.map(str::to_string),
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            agreed_to_rules: false,
            downloads: 0,
            created_at: now,
            last_activity: now,
        }
    }

    #[test]
    fn test_display_name_preference() {
        assert_eq!(user(Some("Иван"), Some("Петров"), Some("ivan")).display_name(), "Иван Петров");
        assert_eq!(user(None, None, Some("ivan")).display_name(), "@ivan");
        assert_eq!(user(None, None, None).display_name(), "99");
    }

    #[test]
    fn test_ban_activity_window() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut ban = Ban {
            user_id: 1,
            reason: "spam".to_string(),
            banned_until: ban_expiry(at, Some(2)),
            banned_by: 42,
            banned_at: at,
        };
        assert!(ban.is_active_at(at));
        assert!(ban.is_active_at(at + chrono::Duration::days(2) - chrono::Duration::seconds(1)));
        assert!(!ban.is_active_at(at + chrono::Duration::days(2)));

        ban.banned_until = ban_expiry(at, None);
        assert!(ban.is_active_at(at + chrono::Duration::days(10_000)));
        assert_eq!(ban_expiry(at, Some(0)), None);
    }

    #[test]
    fn test_ban_expiry_out_of_range_is_permanent() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(ban_expiry(at, Some(u32::MAX)), None);
        assert_eq!(ban_expiry(at, Some(999_999_999)), None);
        assert!(ban_expiry(at, Some(36_500)).is_some());
    }

    #[test]
    fn test_log_kind_codes() {
        for kind in [LogKind::UserAction, LogKind::Ban, LogKind::AdminAction, LogKind::System, LogKind::Error] {
            assert_eq!(kind.as_str().parse::<LogKind>().unwrap(), kind);
        }
    }
}
