//! Client-side delivery: polling fallback, realtime push and module counts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use chrono_tz::Tz;

use casedesk_core::types::id::{FirmId, UserId};
use casedesk_database::NotificationStore;
use casedesk_entity::notification::{AppModule, NotificationEvent, RecipientStrategy};
use casedesk_realtime::{ModuleAggregator, NotificationSession, PollListener, PollerOptions};

use crate::helpers::{
    Directory, Pipeline, Preferences, RecordingListener, at, overnight, wait_for_counts,
};

fn direct(event_type: &str, reference: &str, user: UserId) -> NotificationEvent {
    NotificationEvent::new(
        event_type,
        RecipientStrategy::Single,
        FirmId::new(),
        reference,
        "Update",
        "Something changed",
    )
    .with_recipients([user])
}

#[tokio::test]
async fn test_poller_reports_new_rows_and_advances_cursor() {
    let t0 = at(5, 9, 0);
    let user = UserId::new();
    let pipeline = Pipeline::new(Directory::default(), Preferences::default(), t0);
    let listener = Arc::new(RecordingListener::default());
    let poller = pipeline
        .pollers
        .get_or_create(PollerOptions::new(user, listener.clone()).since(t0))
        .unwrap();

    pipeline.clock.set(t0 + ChronoDuration::seconds(5));
    pipeline.dispatcher.dispatch(&direct("task_assigned", "task-1", user)).await.unwrap();
    pipeline.clock.set(t0 + ChronoDuration::seconds(10));
    pipeline.dispatcher.dispatch(&direct("task_assigned", "task-2", user)).await.unwrap();

    assert_eq!(poller.check_now().await.unwrap(), 2);
    assert_eq!(poller.cursor(), t0 + ChronoDuration::seconds(10));

    assert_eq!(poller.check_now().await.unwrap(), 0);
    assert_eq!(poller.cursor(), t0 + ChronoDuration::seconds(10));
    assert_eq!(listener.reports(), vec![2]);
}

#[tokio::test]
async fn test_poller_keeps_cursor_through_store_outage() {
    let t0 = at(5, 9, 0);
    let user = UserId::new();
    let pipeline = Pipeline::new(Directory::default(), Preferences::default(), t0);
    let listener = Arc::new(RecordingListener::default());
    let poller = pipeline
        .pollers
        .get_or_create(PollerOptions::new(user, listener.clone()).since(t0))
        .unwrap();

    pipeline.clock.set(t0 + ChronoDuration::seconds(3));
    pipeline.dispatcher.dispatch(&direct("note_added", "note-1", user)).await.unwrap();
    pipeline.store.fail_next_queries(1).await;

    assert!(poller.check_now().await.is_err());
    assert_eq!(poller.cursor(), t0);
    assert_eq!(listener.errors(), 1);

    assert_eq!(poller.check_now().await.unwrap(), 1);
}

#[tokio::test]
async fn test_module_counts_ignore_unclassified_types() {
    let user = UserId::new();
    let pipeline = Pipeline::new(Directory::default(), Preferences::default(), at(5, 9, 0));
    for (event_type, reference) in [
        ("task_assigned", "task-7"),
        ("hearing_scheduled", "hearing-7"),
        ("unknown_type", "x-7"),
    ] {
        pipeline.dispatcher.dispatch(&direct(event_type, reference, user)).await.unwrap();
    }

    let aggregator = ModuleAggregator::new(user, pipeline.store.clone());
    let counts = aggregator.refresh().await.unwrap();

    assert_eq!(counts[&AppModule::Tasks], 1);
    assert_eq!(counts[&AppModule::Hearings], 1);
    assert_eq!(counts.values().sum::<usize>(), 2);
    assert_eq!(aggregator.total(), 2);
}

#[tokio::test]
async fn test_both_channels_signal_one_row_without_double_counting() {
    let user = UserId::new();
    let pipeline = Pipeline::new(Directory::default(), Preferences::default(), at(5, 9, 0));
    let session = NotificationSession::open(user, pipeline.store.clone(), pipeline.pollers.clone())
        .await
        .unwrap();
    let mut watcher = session.watch_counts();

    let recorder = Arc::new(RecordingListener::default());
    let extra_listener: Arc<dyn PollListener> = recorder.clone();
    let poller = pipeline
        .pollers
        .get_or_create(PollerOptions::new(user, extra_listener.clone()))
        .unwrap();
    assert_eq!(pipeline.pollers.len(), 1);

    pipeline.clock.advance(ChronoDuration::seconds(1));
    let ids = pipeline
        .dispatcher
        .dispatch(&direct("task_assigned", "task-9", user))
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    // The poller and realtime both see the row; counts reflect it once.
    poller.check_now().await.unwrap();
    assert_eq!(recorder.reported_rows(), 1);
    let counts = wait_for_counts(&mut watcher, |c| c[&AppModule::Tasks] == 1).await;
    assert_eq!(counts.values().sum::<usize>(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.aggregator().total(), 1);
    assert_eq!(pipeline.store.all().await.len(), 1);

    assert!(!pipeline.pollers.release(user, &extra_listener));
    session.close().await;
}

#[tokio::test]
async fn test_promoted_and_read_rows_update_open_session() {
    let user = UserId::new();
    let pipeline = Pipeline::new(
        Directory::default(),
        Preferences {
            windows: HashMap::from([(user, overnight(Tz::UTC))]),
            ..Default::default()
        },
        at(5, 23, 0),
    );
    let session = NotificationSession::open(user, pipeline.store.clone(), pipeline.pollers.clone())
        .await
        .unwrap();
    let mut watcher = session.watch_counts();

    let ids = pipeline
        .dispatcher
        .dispatch(&direct("hearing_rescheduled", "hearing-3", user).occurred_at(at(5, 23, 0)))
        .await
        .unwrap();
    assert_eq!(session.aggregator().count(AppModule::Hearings), 0);

    pipeline.clock.set(at(6, 7, 0));
    pipeline.promoter.promote_queued(100).await.unwrap();
    wait_for_counts(&mut watcher, |c| c[&AppModule::Hearings] == 1).await;

    assert!(pipeline.store.mark_read(ids[0], user).await.unwrap());
    wait_for_counts(&mut watcher, |c| c[&AppModule::Hearings] == 0).await;

    session.close().await;
}

#[tokio::test]
async fn test_closing_sessions_releases_everything() {
    let pipeline = Pipeline::new(Directory::default(), Preferences::default(), at(5, 9, 0));
    let users: Vec<UserId> = (0..3).map(|_| UserId::new()).collect();

    let mut sessions = Vec::new();
    for user in &users {
        sessions.push(
            NotificationSession::open(*user, pipeline.store.clone(), pipeline.pollers.clone())
                .await
                .unwrap(),
        );
    }
    assert_eq!(pipeline.store.subscriber_count(), 3);
    assert_eq!(pipeline.pollers.active_count(), 3);

    let last = sessions.pop().unwrap();
    for session in sessions {
        session.close().await;
    }
    drop(last);

    // Dropped subscriptions release their receivers once their tasks observe
    // the cancellation.
    tokio::time::timeout(Duration::from_secs(1), async {
        while pipeline.store.subscriber_count() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("realtime subscriptions were not released");

    assert!(pipeline.pollers.is_empty());
    assert_eq!(pipeline.pollers.active_count(), 0);
}
