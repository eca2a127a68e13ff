//! Quiet-hours holds released by the promoter.

use std::collections::HashMap;

use chrono::Duration;
use chrono_tz::Tz;

use casedesk_core::config::NotificationsConfig;
use casedesk_core::types::id::{FirmId, UserId};
use casedesk_entity::notification::{AppModule, DeliveryStatus, NotificationEvent, RecipientStrategy};
use casedesk_realtime::ModuleAggregator;
use casedesk_worker::PROMOTION_JOB;

use crate::helpers::{Directory, Pipeline, Preferences, at, overnight};

fn hearing_moved(user: UserId, reference: &str) -> NotificationEvent {
    NotificationEvent::new(
        "hearing_rescheduled",
        RecipientStrategy::Single,
        FirmId::new(),
        reference,
        "Hearing moved",
        "Now at 10:00",
    )
    .with_recipients([user])
}

fn sleeping_user(now: chrono::DateTime<chrono::Utc>) -> (UserId, Pipeline) {
    let user = UserId::new();
    let pipeline = Pipeline::new(
        Directory::default(),
        Preferences {
            windows: HashMap::from([(user, overnight(Tz::UTC))]),
            ..Default::default()
        },
        now,
    );
    (user, pipeline)
}

#[tokio::test]
async fn test_overnight_event_is_held_then_released_at_seven() {
    let (user, pipeline) = sleeping_user(at(1, 23, 0));
    let event = hearing_moved(user, "hearing-1").occurred_at(at(1, 23, 0));

    let ids = pipeline.dispatcher.dispatch(&event).await.unwrap();
    let row = pipeline.store.get(ids[0]).await.unwrap();
    assert_eq!(row.delivery_status, DeliveryStatus::Pending);
    assert_eq!(row.snoozed_until, Some(at(2, 7, 0)));

    pipeline.clock.set(at(2, 6, 59));
    assert_eq!(pipeline.promoter.promote_queued(100).await.unwrap().promoted, 0);

    pipeline.clock.set(at(2, 7, 0));
    assert_eq!(pipeline.promoter.promote_queued(100).await.unwrap().promoted, 1);

    let row = pipeline.store.get(ids[0]).await.unwrap();
    assert_eq!(row.delivery_status, DeliveryStatus::Delivered);
    assert_eq!(row.snoozed_until, None);
    assert_eq!(row.delivered_at, Some(at(2, 7, 0)));
}

#[tokio::test]
async fn test_held_rows_are_not_counted_until_promoted() {
    let (user, pipeline) = sleeping_user(at(1, 23, 0));
    pipeline
        .dispatcher
        .dispatch(&hearing_moved(user, "hearing-2").occurred_at(at(1, 23, 0)))
        .await
        .unwrap();

    let aggregator = ModuleAggregator::new(user, pipeline.store.clone());
    assert_eq!(aggregator.refresh().await.unwrap()[&AppModule::Hearings], 0);

    pipeline.clock.set(at(2, 7, 5));
    pipeline.promoter.promote_queued(100).await.unwrap();

    assert_eq!(aggregator.refresh().await.unwrap()[&AppModule::Hearings], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn test_concurrent_scheduled_runs_split_due_rows() {
    let user = UserId::new();
    let config = NotificationsConfig {
        promotion_batch_size: 12,
        ..NotificationsConfig::default()
    };
    let pipeline = Pipeline::with_config(
        Directory::default(),
        Preferences {
            windows: HashMap::from([(user, overnight(Tz::UTC))]),
            ..Default::default()
        },
        at(1, 22, 0),
        &config,
    );
    for i in 0..30 {
        let occurred = at(1, 22, 0) + Duration::minutes(i);
        pipeline
            .dispatcher
            .dispatch(&hearing_moved(user, &format!("hearing-{i}")).occurred_at(occurred))
            .await
            .unwrap();
    }
    assert_eq!(pipeline.store.all().await.len(), 30);
    pipeline.clock.set(at(2, 8, 0));

    let runs = (0..3).map(|_| {
        let executor = pipeline.executor.clone();
        tokio::spawn(async move { executor.run(PROMOTION_JOB).await })
    });
    let (mut selected, mut promoted) = (0, 0);
    for run in runs.collect::<Vec<_>>() {
        let output = run.await.unwrap().unwrap().unwrap();
        let field = |name: &str| output[name].as_u64().unwrap() as usize;
        assert_eq!(field("failed"), 0);
        assert_eq!(field("skipped"), 0);
        assert!(field("selected") <= 12);
        selected += field("selected");
        promoted += field("promoted");
    }

    // Three runs of 12 cover the 30 due rows without overlap.
    assert_eq!(selected, 30);
    assert_eq!(promoted, 30);
    let rows = pipeline.store.all().await;
    assert!(rows.iter().all(|r| r.delivery_status == DeliveryStatus::Delivered));
    assert!(rows.iter().all(|r| r.delivered_at == Some(at(2, 8, 0))));
}

#[tokio::test]
async fn test_promotion_drains_in_batches() {
    let (user, pipeline) = sleeping_user(at(1, 22, 30));
    for i in 0..3 {
        pipeline
            .dispatcher
            .dispatch(&hearing_moved(user, &format!("batch-{i}")).occurred_at(at(1, 22, 30)))
            .await
            .unwrap();
    }
    pipeline.clock.set(at(2, 7, 0));

    let first = pipeline.promoter.promote_queued(2).await.unwrap();
    assert_eq!(first.promoted, 2);
    let second = pipeline.promoter.promote_queued(2).await.unwrap();
    assert_eq!(second.promoted, 1);
}
