use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::json;

use ruuchebnik::catalog::{Grade, NewTextbook, Subject};
use ruuchebnik::db::{LogKind, MemoryStore, Store, UserProfile};

fn profile(id: i64, first_name: &str) -> UserProfile {
    UserProfile {
        id,
        username: None,
        first_name: Some(first_name.to_string()),
        last_name: None,
    }
}

fn textbook(title: &str, grade: u8, subject: Subject) -> NewTextbook {
    NewTextbook {
        title: title.to_string(),
        author: "Атанасян".to_string(),
        grade: Grade::try_from(grade).expect("valid grade"),
        subject,
        file_name: format!("{title}.pdf"),
        file_path: format!("{title}.pdf"),
        file_size: None,
    }
}

#[tokio::test]
async fn test_get_or_create_user_is_idempotent() -> Result<()> {
    let store = MemoryStore::new();

    let (first, created) = store.get_or_create_user(&profile(7, "Олег")).await?;
    assert!(created);
    assert!(!first.agreed_to_rules);

    store.agree_to_rules(7).await?;
    let (second, created) = store.get_or_create_user(&profile(7, "Олег П.")).await?;
    assert!(!created);
    assert!(second.agreed_to_rules);
    assert_eq!(second.first_name.as_deref(), Some("Олег П."));
    assert_eq!(second.created_at, first.created_at);
    Ok(())
}

#[tokio::test]
async fn test_temporary_ban_expires_lazily() -> Result<()> {
    let store = MemoryStore::new();
    let now = Utc::now();

    let ban = store.ban_user(8, "flood", Some(2), 1).await?;
    let until = ban.banned_until.expect("temporary ban");
    assert!(until > now + Duration::days(1));

    assert!(store.active_ban(8, now).await?.is_some());
    assert!(store.is_banned(8).await?);
    assert!(store.active_ban(8, now + Duration::days(3)).await?.is_none());

    // Permanent bans never lapse
    store.ban_user(9, "abuse", Some(0), 1).await?;
    let ban = store
        .active_ban(9, now + Duration::days(3650))
        .await?
        .expect("permanent ban");
    assert_eq!(ban.banned_until, None);
    Ok(())
}

#[tokio::test]
async fn test_ban_replaces_previous_record() -> Result<()> {
    let store = MemoryStore::new();
    store.ban_user(10, "first", None, 1).await?;
    store.ban_user(10, "second", Some(1), 1).await?;

    let ban = store.active_ban(10, Utc::now()).await?.expect("ban");
    assert_eq!(ban.reason, "second");

    assert!(store.unban_user(10).await?);
    assert!(!store.unban_user(10).await?);
    assert!(!store.is_banned(10).await?);
    Ok(())
}

#[tokio::test]
async fn test_catalog_queries() -> Result<()> {
    let store = MemoryStore::new();
    let geometry = store
        .add_textbook(&textbook("Геометрия", 8, Subject::Mathematics))
        .await?;
    store
        .add_textbook(&textbook("Алгебра", 8, Subject::Mathematics))
        .await?;
    store
        .add_textbook(&textbook("Русский язык", 8, Subject::Russian))
        .await?;
    store
        .add_textbook(&textbook("Биология", 9, Subject::Biology))
        .await?;

    let grade = Grade::try_from(8)?;
    assert_eq!(
        store.subjects_for_grade(grade).await?,
        vec![Subject::Mathematics, Subject::Russian]
    );

    let titles: Vec<String> = store
        .get_textbooks(grade, Subject::Mathematics)
        .await?
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, vec!["Алгебра", "Геометрия"]);

    store.increment_download(geometry.id).await?;
    let found = store.search_textbooks("АТАНАСЯН", 2).await?;
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].id, geometry.id);

    let removed = store.remove_textbook(geometry.id).await?;
    assert_eq!(removed.map(|t| t.id), Some(geometry.id));
    assert!(store.get_textbook(geometry.id).await?.is_none());
    assert_eq!(store.all_textbooks().await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_stats_and_recipients() -> Result<()> {
    let store = MemoryStore::new();
    for id in [1, 2, 3] {
        store.get_or_create_user(&profile(id, "Ученик")).await?;
    }
    store.agree_to_rules(1).await?;
    store.agree_to_rules(2).await?;
    store.ban_user(2, "spam", None, 99).await?;

    let book = store
        .add_textbook(&textbook("Физика", 7, Subject::Physics))
        .await?;
    store.increment_download(book.id).await?;
    store.increment_download(book.id).await?;
    store
        .log_event(LogKind::UserAction, Some(1), "start_command", json!({}))
        .await?;

    let stats = store.stats(Utc::now() - Duration::hours(1)).await?;
    assert_eq!(stats.total_users, 3);
    assert_eq!(stats.active_today, 3);
    assert_eq!(stats.total_textbooks, 1);
    assert_eq!(stats.total_downloads, 2);
    assert_eq!(stats.requests_today, 1);
    assert_eq!(stats.banned_users, 1);

    assert_eq!(store.broadcast_recipients().await?, vec![1]);

    let logs = store.recent_logs(10).await?;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].kind, LogKind::UserAction);
    Ok(())
}
