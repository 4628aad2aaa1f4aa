//! Error isolation: transient faults are retried, everything else is fatal

use crate::*;
use cadence::StorageFault;
use cadence::daemon::Notification;
use cadence::{QueuedTrack, RetryConfig};

fn unregistered(alias: &str, descriptor: &str) -> NewEvent {
    NewEvent {
        id: uuid::Uuid::new_v4(),
        type_name: alias.to_string(),
        type_descriptor: descriptor.to_string(),
        data: b"{\"day\":4}".to_vec(),
    }
}

#[tokio::test(start_paused = true)]
async fn transient_faults_are_retried() {
    let store = trip_store(quick_settings());
    append_trips(&store, &StreamKey::new_id(), 4).await;
    let log = store.memory_log().unwrap();
    log.inject_faults(StorageFault::Connection, 2);
    let (fetcher, logger) = recording_fetcher(&store, &["trip_started"], 10);

    let page = fetcher.fetch_next_page(0).await.unwrap();

    assert_eq!(page.count(), 4);
    assert_eq!(log.window_queries(), 3);
    assert_eq!(
        logger.notifications(),
        vec![
            Notification::Retrying("trip_summary".into(), 1),
            Notification::Retrying("trip_summary".into(), 2),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn persistent_transient_faults_exhaust_the_retries() {
    let store = trip_store(quick_settings());
    store.memory_log().unwrap().inject_faults(StorageFault::Timeout, 10);
    let (fetcher, logger) = recording_fetcher(&store, &["trip_started"], 10);

    let err = fetcher.fetch_next_page(0).await.unwrap_err();

    match &err {
        Error::RetriesExhausted { attempts, last } => {
            assert_eq!(*attempts, 4);
            assert!(matches!(
                **last,
                Error::Storage {
                    fault: StorageFault::Timeout,
                    ..
                }
            ));
        }
        other => panic!("Expected exhausted retries, got {other}"),
    }
    assert!(err.is_fatal());
    assert_eq!(logger.count(|n| matches!(n, Notification::Retrying(..))), 3);
}

#[tokio::test]
async fn non_transient_faults_are_not_retried() {
    let store = trip_store(quick_settings());
    append_trips(&store, &StreamKey::new_id(), 1).await;
    store.memory_log().unwrap().inject_faults(StorageFault::Query, 1);
    let (fetcher, logger) = recording_fetcher(&store, &["trip_started"], 10);

    let err = fetcher.fetch_next_page(0).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Storage {
            fault: StorageFault::Query,
            ..
        }
    ));
    assert!(logger.notifications().is_empty());
    assert_eq!(fetcher.fetch_next_page(0).await.unwrap().count(), 1);
}

#[tokio::test]
async fn unknown_event_type_is_fatal() {
    let store = trip_store(quick_settings());
    store
        .append_encoded(
            &StreamKey::new_id(),
            None,
            vec![unregistered("trip_paused", "fleet::TripPaused")],
        )
        .await
        .unwrap();
    let (fetcher, _) = recording_fetcher(&store, &["trip_paused"], 10);

    let err = fetcher.fetch_next_page(0).await.unwrap_err();

    match err {
        Error::UnknownEventType { alias, descriptor } => {
            assert_eq!(alias, "trip_paused");
            assert_eq!(descriptor.as_deref(), Some("fleet::TripPaused"));
        }
        other => panic!("Expected an unknown event type, got {other}"),
    }
}

#[tokio::test]
async fn fatal_errors_end_the_polling_loop() {
    let store = trip_store(quick_settings());
    append_trips(&store, &StreamKey::new_id(), 2).await;
    store
        .append_encoded(
            &StreamKey::new_id(),
            None,
            vec![unregistered("trip_paused", "fleet::TripPaused")],
        )
        .await
        .unwrap();
    let (fetcher, logger) = recording_fetcher(&store, &["trip_started", "trip_paused"], 10);
    let (track, mut receiver) = QueuedTrack::new("trip_summary", 0);

    fetcher
        .start(track, DaemonLifecycle::Continuous, CancellationToken::new())
        .unwrap();
    wait_until_idle(&fetcher).await;

    assert!(receiver.try_recv().is_none());
    assert_eq!(fetcher.state(), FetcherState::Active);
    assert_eq!(
        logger.count(|n| matches!(n, Notification::Failed(name, _) if name == "trip_summary")),
        1
    );

    let err = fetcher.pause().join().await.unwrap_err();
    assert!(err.is_unknown_event_type());
    assert_eq!(fetcher.state(), FetcherState::Paused);
}

#[tokio::test]
async fn renamed_aliases_resolve_through_the_legacy_descriptor() {
    let store = trip_store(quick_settings());
    store
        .graph()
        .map_legacy_descriptor::<TripStarted>("fleet::TripBegun")
        .unwrap();
    store
        .append_encoded(
            &StreamKey::new_id(),
            None,
            vec![unregistered("trip_begun", "fleet::TripBegun")],
        )
        .await
        .unwrap();
    let (fetcher, _) = recording_fetcher(&store, &["trip_begun"], 10);

    let page = fetcher.fetch_next_page(0).await.unwrap();

    assert_eq!(page.count(), 1);
    assert_eq!(page.events()[0].data::<TripStarted>(), Some(&TripStarted { day: 4 }));
}

#[tokio::test]
async fn transient_faults_do_not_stop_a_running_fetcher() {
    let store = trip_store(
        quick_settings().with_retry(RetryConfig::default().with_base_delay_ms(10)),
    );
    append_trips(&store, &StreamKey::new_id(), 3).await;
    store.memory_log().unwrap().inject_faults(StorageFault::Busy, 2);
    let (fetcher, logger) = recording_fetcher(&store, &["trip_started"], 10);
    let (track, mut receiver) = QueuedTrack::new("trip_summary", 0);

    fetcher
        .start(track, DaemonLifecycle::Continuous, CancellationToken::new())
        .unwrap();
    let page = next_page(&mut receiver).await;

    assert_eq!(page.count(), 3);
    assert!(fetcher.is_running());
    assert_eq!(logger.count(|n| matches!(n, Notification::Retrying(..))), 2);
    assert_eq!(logger.count(|n| matches!(n, Notification::Failed(..))), 0);
    fetcher.stop().join().await.unwrap();
}
