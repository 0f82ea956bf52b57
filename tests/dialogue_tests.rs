use anyhow::{anyhow, Result};
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::types::ChatId;

use ruuchebnik::bot::commit_after_delivery;
use ruuchebnik::catalog::{Grade, Subject};
use ruuchebnik::dialogue::{NavDialogue, NavState};
use ruuchebnik::navigation::Transition;

/// Transitions resolve against the current state
#[test]
fn test_transition_next_state() -> Result<()> {
    let current = NavState::SelectingSubject {
        grade: Grade::try_from(4)?,
    };

    assert_eq!(Transition::Stay.next_state(&current), current);
    assert_eq!(
        Transition::Enter(NavState::SelectingGrade).next_state(&current),
        NavState::SelectingGrade
    );
    assert_eq!(Transition::Reset.next_state(&current), NavState::Start);
    Ok(())
}

/// Dialogue states can be serialized/deserialized with serde_json
#[test]
fn test_dialogue_state_serialization() -> Result<()> {
    let state = NavState::ViewingTextbookList {
        grade: Grade::try_from(10)?,
        subject: Subject::SocialStudies,
        page: 2,
    };

    let json = serde_json::to_string(&state)?;
    assert!(json.contains("social_studies"));
    let restored: NavState = serde_json::from_str(&json)?;
    assert_eq!(restored, state);

    // Out of range grades are rejected on the way back in
    let invalid = json.replace("10", "12");
    assert!(serde_json::from_str::<NavState>(&invalid).is_err());
    Ok(())
}

/// Selections survive into deeper states
#[test]
fn test_state_context_accessors() -> Result<()> {
    let grade = Grade::try_from(6)?;

    let list = NavState::ViewingTextbookList {
        grade,
        subject: Subject::Geography,
        page: 3,
    };
    assert_eq!(list.grade(), Some(grade));
    assert_eq!(list.subject(), Some(Subject::Geography));
    assert_eq!(list.page(), 3);

    let detail = NavState::ViewingTextbookDetail {
        grade,
        subject: Subject::Geography,
        textbook_id: 17,
    };
    assert_eq!(detail.page(), 0);

    assert_eq!(NavState::default(), NavState::Start);
    assert_eq!(NavState::AwaitingBroadcast.grade(), None);
    Ok(())
}

/// A failed delivery leaves the stored state where it was
#[tokio::test]
async fn test_state_committed_only_after_delivery() -> Result<()> {
    let dialogue = NavDialogue::new(InMemStorage::<NavState>::new(), ChatId(77));
    dialogue.update(NavState::SelectingGrade).await?;

    let next = Transition::Enter(NavState::SelectingSubject {
        grade: Grade::try_from(5)?,
    });

    let committed =
        commit_after_delivery(&dialogue, &next, Err(anyhow!("network unreachable"))).await?;
    assert!(!committed);
    assert_eq!(dialogue.get().await?, Some(NavState::SelectingGrade));

    let committed = commit_after_delivery(&dialogue, &next, Ok(())).await?;
    assert!(committed);
    assert_eq!(
        dialogue.get().await?,
        Some(NavState::SelectingSubject {
            grade: Grade::try_from(5)?
        })
    );

    // A failed reset keeps the conversation too
    commit_after_delivery(&dialogue, &Transition::Reset, Err(anyhow!("timeout"))).await?;
    assert!(dialogue.get().await?.is_some());

    commit_after_delivery(&dialogue, &Transition::Reset, Ok(())).await?;
    assert_eq!(dialogue.get().await?, None);
    Ok(())
}
