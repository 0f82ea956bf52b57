//! In-process [`Store`] used by tests and local dry runs

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ban_expiry, Ban, BroadcastRecord, LogEntry, LogKind, Stats, Store, User, UserProfile};
use crate::catalog::{Grade, NewTextbook, Subject, Textbook};

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    bans: HashMap<i64, Ban>,
    textbooks: BTreeMap<i64, Textbook>,
    logs: Vec<LogEntry>,
    broadcasts: Vec<BroadcastRecord>,
    next_textbook_id: i64,
    next_log_id: i64,
    next_broadcast_id: i64,
}

/// Store that keeps every table in process memory
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every audit entry in insertion order
    pub fn logs(&self) -> Vec<LogEntry> {
        self.lock().logs.clone()
    }

    pub fn broadcasts(&self) -> Vec<BroadcastRecord> {
        self.lock().broadcasts.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sorted_by_title(mut textbooks: Vec<Textbook>) -> Vec<Textbook> {
    textbooks.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
    textbooks
}

impl Store for MemoryStore {
    async fn get_or_create_user(&self, profile: &UserProfile) -> Result<(User, bool)> {
        let mut tables = self.lock();
        let now = Utc::now();

        if let Some(user) = tables.users.get_mut(&profile.id) {
            user.username = profile.username.clone();
            user.first_name = profile.first_name.clone();
            user.last_name = profile.last_name.clone();
            user.last_activity = now;
            return Ok((user.clone(), false));
        }

        let user = User {
            id: profile.id,
            username: profile.username.clone(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            agreed_to_rules: false,
            downloads: 0,
            created_at: now,
            last_activity: now,
        };
        tables.users.insert(profile.id, user.clone());
        Ok((user, true))
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        Ok(self.lock().users.get(&user_id).cloned())
    }

    async fn touch_user(&self, profile: &UserProfile) -> Result<()> {
        if let Some(user) = self.lock().users.get_mut(&profile.id) {
            user.username = profile.username.clone();
            user.first_name = profile.first_name.clone();
            user.last_name = profile.last_name.clone();
            user.last_activity = Utc::now();
        }
        Ok(())
    }

    async fn agree_to_rules(&self, user_id: i64) -> Result<()> {
        if let Some(user) = self.lock().users.get_mut(&user_id) {
            user.agreed_to_rules = true;
            user.last_activity = Utc::now();
        }
        Ok(())
    }

    async fn active_ban(&self, user_id: i64, at: DateTime<Utc>) -> Result<Option<Ban>> {
        Ok(self
            .lock()
            .bans
            .get(&user_id)
            .filter(|ban| ban.is_active_at(at))
            .cloned())
    }

    async fn ban_user(
        &self,
        user_id: i64,
        reason: &str,
        days: Option<u32>,
        admin_id: i64,
    ) -> Result<Ban> {
        let now = Utc::now();
        let ban = Ban {
            user_id,
            reason: reason.to_string(),
            banned_until: ban_expiry(now, days),
            banned_by: admin_id,
            banned_at: now,
        };
        self.lock().bans.insert(user_id, ban.clone());
        Ok(ban)
    }

    async fn unban_user(&self, user_id: i64) -> Result<bool> {
        Ok(self.lock().bans.remove(&user_id).is_some())
    }

    async fn subjects_for_grade(&self, grade: Grade) -> Result<Vec<Subject>> {
        let tables = self.lock();
        Ok(Subject::ALL
            .into_iter()
            .filter(|subject| {
                tables
                    .textbooks
                    .values()
                    .any(|t| t.grade == grade && t.subject == *subject)
            })
            .collect())
    }

    async fn get_textbooks(&self, grade: Grade, subject: Subject) -> Result<Vec<Textbook>> {
        let textbooks = self
            .lock()
            .textbooks
            .values()
            .filter(|t| t.grade == grade && t.subject == subject)
            .cloned()
            .collect();
        Ok(sorted_by_title(textbooks))
    }

    async fn get_textbook(&self, textbook_id: i64) -> Result<Option<Textbook>> {
        Ok(self.lock().textbooks.get(&textbook_id).cloned())
    }

    async fn search_textbooks(&self, query: &str, limit: i64) -> Result<Vec<Textbook>> {
        let needle = query.trim().to_lowercase();
        let mut found: Vec<Textbook> = self
            .lock()
            .textbooks
            .values()
            .filter(|t| {
                t.title.to_lowercase().contains(&needle) || t.author.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();

        found.sort_by(|a, b| b.downloads.cmp(&a.downloads).then(a.title.cmp(&b.title)));
        found.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(found)
    }

    async fn all_textbooks(&self) -> Result<Vec<Textbook>> {
        let mut textbooks: Vec<Textbook> = self.lock().textbooks.values().cloned().collect();
        textbooks.sort_by(|a, b| {
            (a.grade, a.subject.position(), &a.title).cmp(&(b.grade, b.subject.position(), &b.title))
        });
        Ok(textbooks)
    }

    async fn add_textbook(&self, textbook: &NewTextbook) -> Result<Textbook> {
        let mut tables = self.lock();
        tables.next_textbook_id += 1;
        let stored = Textbook {
            id: tables.next_textbook_id,
            title: textbook.title.clone(),
            author: textbook.author.clone(),
            grade: textbook.grade,
            subject: textbook.subject,
            file_name: textbook.file_name.clone(),
            file_path: textbook.file_path.clone(),
            file_size: textbook.file_size,
            downloads: 0,
            created_at: Utc::now(),
        };
        tables.textbooks.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn remove_textbook(&self, textbook_id: i64) -> Result<Option<Textbook>> {
        Ok(self.lock().textbooks.remove(&textbook_id))
    }

    async fn increment_download(&self, textbook_id: i64) -> Result<()> {
        if let Some(textbook) = self.lock().textbooks.get_mut(&textbook_id) {
            textbook.downloads += 1;
        }
        Ok(())
    }

    async fn increment_user_download(&self, user_id: i64) -> Result<()> {
        if let Some(user) = self.lock().users.get_mut(&user_id) {
            user.downloads += 1;
        }
        Ok(())
    }

    async fn log_event(
        &self,
        kind: LogKind,
        user_id: Option<i64>,
        action: &str,
        details: Value,
    ) -> Result<()> {
        let mut tables = self.lock();
        tables.next_log_id += 1;
        let entry = LogEntry {
            id: tables.next_log_id,
            kind,
            user_id,
            action: action.to_string(),
            details,
            created_at: Utc::now(),
        };
        tables.logs.push(entry);
        Ok(())
    }

    async fn recent_logs(&self, limit: i64) -> Result<Vec<LogEntry>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self.lock().logs.iter().rev().take(limit).cloned().collect())
    }

    async fn stats(&self, since: DateTime<Utc>) -> Result<Stats> {
        let tables = self.lock();
        let now = Utc::now();
        Ok(Stats {
            total_users: tables.users.len() as i64,
            total_textbooks: tables.textbooks.len() as i64,
            active_today: tables
                .users
                .values()
                .filter(|u| u.last_activity >= since)
                .count() as i64,
            total_downloads: tables.textbooks.values().map(|t| t.downloads).sum(),
            requests_today: tables.logs.iter().filter(|l| l.created_at >= since).count() as i64,
            banned_users: tables.bans.values().filter(|b| b.is_active_at(now)).count() as i64,
        })
    }

    async fn recent_users(&self, limit: i64) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.lock().users.values().cloned().collect();
        users.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        users.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(users)
    }

    async fn broadcast_recipients(&self) -> Result<Vec<i64>> {
        let tables = self.lock();
        let now = Utc::now();
        Ok(tables
            .users
            .values()
            .filter(|u| u.agreed_to_rules)
            .filter(|u| {
                tables
                    .bans
                    .get(&u.id)
                    .map_or(true, |ban| !ban.is_active_at(now))
            })
            .map(|u| u.id)
            .collect())
    }

    async fn save_broadcast(
        &self,
        message: &str,
        sent_count: i64,
        failed_count: i64,
        admin_id: i64,
    ) -> Result<BroadcastRecord> {
        let mut tables = self.lock();
        tables.next_broadcast_id += 1;
        let record = BroadcastRecord {
            id: tables.next_broadcast_id,
            message: message.to_string(),
            sent_count,
            failed_count,
            sent_by: admin_id,
            created_at: Utc::now(),
        };
        tables.broadcasts.push(record.clone());
        Ok(record)
    }
}
