//! Dispatch from business event to stored rows.

use std::collections::HashMap;

use chrono::TimeZone;
use chrono_tz::Tz;

use casedesk_core::config::NotificationsConfig;
use casedesk_core::error::ErrorKind;
use casedesk_core::types::id::{CaseId, FirmId, UserId};
use casedesk_entity::notification::{DeliveryStatus, NotificationEvent, RecipientStrategy};
use casedesk_service::Member;

use crate::helpers::{Directory, Pipeline, Preferences, at, overnight};

#[tokio::test]
async fn test_team_event_reaches_active_members_only() {
    let firm = FirmId::new();
    let mut members: Vec<Member> = (0..5).map(|_| Member::active(UserId::new())).collect();
    let departed = UserId::new();
    members.push(Member::inactive(departed));
    let pipeline = Pipeline::new(
        Directory {
            teams: HashMap::from([(firm, members)]),
            ..Default::default()
        },
        Preferences::default(),
        at(4, 10, 0),
    );

    let event = NotificationEvent::new(
        "team_announcement",
        RecipientStrategy::Team,
        firm,
        "memo-7",
        "Office closed Friday",
        "The office is closed on Friday.",
    );
    let created = pipeline.dispatcher.dispatch(&event).await.unwrap();

    assert_eq!(created.len(), 5);
    let rows = pipeline.store.all().await;
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|r| r.recipient_id != departed));
    assert!(rows.iter().all(|r| r.delivery_status == DeliveryStatus::Delivered));
    assert!(rows.iter().all(|r| !r.read && r.lifecycle_is_consistent()));
}

#[tokio::test]
async fn test_redispatch_writes_no_new_rows() {
    let (a, b) = (UserId::new(), UserId::new());
    let pipeline = Pipeline::new(Directory::default(), Preferences::default(), at(4, 10, 0));
    let event = NotificationEvent::new(
        "document_uploaded",
        RecipientStrategy::Custom,
        FirmId::new(),
        "doc-19",
        "New document",
        "Engagement letter uploaded",
    )
    .with_recipients([a, b, a]);

    let first = pipeline.dispatcher.dispatch_detailed(&event).await.unwrap();
    assert_eq!(first.created.len(), 2);

    let retry = pipeline.dispatcher.dispatch_detailed(&event).await.unwrap();
    assert!(retry.created.is_empty());
    assert_eq!(retry.duplicates.len(), 2);
    assert_eq!(pipeline.store.all().await.len(), 2);
}

#[tokio::test]
async fn test_case_members_include_actor_when_configured() {
    let case = CaseId::new();
    let (actor, colleague) = (UserId::new(), UserId::new());
    let config = NotificationsConfig {
        exclude_actor_from_case_members: false,
        ..NotificationsConfig::default()
    };
    let pipeline = Pipeline::with_config(
        Directory {
            cases: HashMap::from([(case, vec![actor, colleague])]),
            ..Default::default()
        },
        Preferences::default(),
        at(4, 10, 0),
        &config,
    );

    let event = NotificationEvent::new(
        "case_status_changed",
        RecipientStrategy::CaseMembers,
        FirmId::new(),
        "case-3",
        "Case closed",
        "Smith v. Jones was closed",
    )
    .with_case(case)
    .with_actor(actor);

    assert_eq!(pipeline.dispatcher.dispatch(&event).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_quiet_hours_follow_recipient_timezone() {
    let (night_owl, sleeper) = (UserId::new(), UserId::new());
    let new_york: Tz = "America/New_York".parse().unwrap();
    // 23:30 EDT is 03:30 UTC the next day.
    let occurred = new_york
        .with_ymd_and_hms(2024, 3, 12, 23, 30, 0)
        .unwrap()
        .with_timezone(&chrono::Utc);
    let pipeline = Pipeline::new(
        Directory::default(),
        Preferences {
            windows: HashMap::from([(sleeper, overnight(new_york))]),
            ..Default::default()
        },
        occurred,
    );

    let event = NotificationEvent::new(
        "hearing_scheduled",
        RecipientStrategy::Custom,
        FirmId::new(),
        "hearing-5",
        "Hearing scheduled",
        "Motion hearing set for Thursday",
    )
    .with_recipients([night_owl, sleeper])
    .occurred_at(occurred);
    pipeline.dispatcher.dispatch(&event).await.unwrap();

    let rows = pipeline.store.all().await;
    let owl = rows.iter().find(|r| r.recipient_id == night_owl).unwrap();
    let held = rows.iter().find(|r| r.recipient_id == sleeper).unwrap();

    assert_eq!(owl.delivery_status, DeliveryStatus::Delivered);
    assert_eq!(held.delivery_status, DeliveryStatus::Pending);
    let release = new_york
        .with_ymd_and_hms(2024, 3, 13, 7, 0, 0)
        .unwrap()
        .with_timezone(&chrono::Utc);
    assert_eq!(held.snoozed_until, Some(release));
}

#[tokio::test]
async fn test_unavailable_preferences_do_not_block_delivery() {
    let user = UserId::new();
    let pipeline = Pipeline::new(
        Directory::default(),
        Preferences {
            unavailable: true,
            ..Default::default()
        },
        at(4, 23, 0),
    );
    let event = NotificationEvent::new(
        "task_assigned",
        RecipientStrategy::Single,
        FirmId::new(),
        "task-11",
        "Task assigned",
        "Draft the reply brief",
    )
    .with_recipients([user]);

    pipeline.dispatcher.dispatch(&event).await.unwrap();
    let rows = pipeline.store.all().await;
    assert_eq!(rows[0].delivery_status, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn test_invalid_event_writes_nothing() {
    let pipeline = Pipeline::new(Directory::default(), Preferences::default(), at(4, 10, 0));
    let event = NotificationEvent::new(
        "case_updated",
        RecipientStrategy::CaseMembers,
        FirmId::new(),
        "case-9",
        "Case updated",
        "Missing case id",
    );

    let err = pipeline.dispatcher.dispatch(&event).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(pipeline.store.all().await.is_empty());
}
