//! Lifecycle transitions of a running fetcher

use crate::*;
use cadence::daemon::Notification;
use cadence::storage::ProgressionStore;
use cadence::QueuedTrack;

#[tokio::test]
async fn continuous_run_picks_up_new_events_after_the_cooldown() {
    let store = trip_store(quick_settings());
    let stream = StreamKey::new_id();
    append_trips(&store, &stream, 15).await;
    let (fetcher, logger) = recording_fetcher(&store, &["trip_started"], 10);
    let (track, mut receiver) = QueuedTrack::new("trip_summary", 0);

    fetcher
        .start(track, DaemonLifecycle::Continuous, CancellationToken::new())
        .unwrap();
    let first = next_page(&mut receiver).await;
    let second = next_page(&mut receiver).await;
    assert_eq!(first.count(), 10);
    assert_eq!(second.count(), 5);
    assert!(second.should_pause());

    append_trips(&store, &stream, 5).await;
    let third = next_page(&mut receiver).await;
    assert_eq!(third.from(), 15);
    assert_eq!(delivered_sequences(&[third]), (16..=20).collect::<Vec<_>>());

    fetcher.stop().join().await.unwrap();
    assert_eq!(fetcher.state(), FetcherState::Waiting);
    assert_eq!(fetcher.last_encountered(), 20);

    let notifications = logger.notifications();
    assert_eq!(notifications.first(), Some(&Notification::Started("trip_summary".into())));
    assert_eq!(notifications.last(), Some(&Notification::Stopped("trip_summary".into())));
    assert!(notifications.contains(&Notification::Pausing("trip_summary".into(), 15)));
    assert!(logger.count(|n| matches!(n, Notification::Resumed(_))) >= 1);
}

#[tokio::test]
async fn caught_up_runs_do_not_queue_empty_pages() {
    let store = trip_store(quick_settings());
    append_trips(&store, &StreamKey::new_id(), 3).await;
    let (fetcher, logger) = recording_fetcher(&store, &["trip_started"], 10);
    let (track, mut receiver) = QueuedTrack::new("trip_summary", 0);

    fetcher
        .start(track, DaemonLifecycle::Continuous, CancellationToken::new())
        .unwrap();
    next_page(&mut receiver).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(receiver.try_recv().is_none());
    assert!(logger.count(|n| matches!(n, Notification::AtEnd(_, 3))) >= 2);
    fetcher.stop().join().await.unwrap();
}

#[tokio::test]
async fn one_shot_rebuild_reports_the_final_checkpoint() {
    let store = trip_store(quick_settings());
    for _ in 0..3 {
        append_trips(&store, &StreamKey::new_id(), 40).await;
    }
    let (fetcher, logger) = recording_fetcher(&store, &["trip_started"], 50);
    let (track, mut receiver) = QueuedTrack::new("trip_summary", 0);

    fetcher
        .start(track, DaemonLifecycle::OneShot, CancellationToken::new())
        .unwrap();
    let (pages, checkpoint) = drain_until_finished(&mut receiver).await;
    wait_until_idle(&fetcher).await;

    assert_eq!(checkpoint, 120);
    assert_eq!(delivered_sequences(&pages), (1..=120).collect::<Vec<_>>());
    assert_eq!(fetcher.state(), FetcherState::Paused);
    assert!(logger
        .notifications()
        .contains(&Notification::AtEnd("trip_summary".into(), 120)));
    assert_eq!(logger.count(|n| matches!(n, Notification::Pausing(..))), 0);
}

#[tokio::test]
async fn paused_fetcher_can_be_restarted() {
    let store = trip_store(quick_settings());
    let stream = StreamKey::new_id();
    append_trips(&store, &stream, 5).await;
    let (fetcher, _) = recording_fetcher(&store, &["trip_started"], 10);
    let (track, mut receiver) = QueuedTrack::new("trip_summary", 0);

    fetcher
        .start(track.clone(), DaemonLifecycle::Continuous, CancellationToken::new())
        .unwrap();
    next_page(&mut receiver).await;
    fetcher.pause().join().await.unwrap();
    assert_eq!(fetcher.state(), FetcherState::Paused);

    append_trips(&store, &stream, 2).await;
    fetcher
        .start(track, DaemonLifecycle::Continuous, CancellationToken::new())
        .unwrap();
    let page = next_page(&mut receiver).await;
    assert_eq!(page.from(), 5);
    assert_eq!(delivered_sequences(&[page]), vec![6, 7]);
    fetcher.stop().join().await.unwrap();
}

#[tokio::test]
async fn starting_twice_is_an_invalid_transition() {
    let store = trip_store(quick_settings());
    let (fetcher, _) = recording_fetcher(&store, &["trip_started"], 10);
    let (track, _receiver) = QueuedTrack::new("trip_summary", 0);

    fetcher
        .start(track.clone(), DaemonLifecycle::Continuous, CancellationToken::new())
        .unwrap();
    let err = fetcher
        .start(track, DaemonLifecycle::Continuous, CancellationToken::new())
        .unwrap_err();

    assert!(matches!(err, Error::InvalidTransition { action: "start", .. }));
    fetcher.stop().join().await.unwrap();
}

#[tokio::test]
async fn cancellation_returns_the_fetcher_to_waiting() {
    let store = trip_store(quick_settings().with_fetching_cooldown(Duration::from_secs(60)));
    append_trips(&store, &StreamKey::new_id(), 3).await;
    let (fetcher, logger) = recording_fetcher(&store, &["trip_started"], 10);
    let (track, mut receiver) = QueuedTrack::new("trip_summary", 0);
    let token = CancellationToken::new();

    fetcher
        .start(track.clone(), DaemonLifecycle::Continuous, token.clone())
        .unwrap();
    next_page(&mut receiver).await;
    token.cancel();
    wait_until_idle(&fetcher).await;

    assert_eq!(fetcher.state(), FetcherState::Waiting);
    assert_eq!(logger.count(|n| matches!(n, Notification::Failed(..))), 0);
    assert_eq!(logger.notifications().last(), Some(&Notification::Stopped("trip_summary".into())));

    fetcher
        .start(track, DaemonLifecycle::Continuous, CancellationToken::new())
        .unwrap();
    assert_eq!(fetcher.state(), FetcherState::Active);
    fetcher.stop().join().await.unwrap();
}

#[tokio::test]
async fn tracks_resume_from_stored_progress() {
    let store = trip_store(quick_settings());
    append_trips(&store, &StreamKey::new_id(), 30).await;
    let (fetcher, _) = recording_fetcher(&store, &["trip_started"], 10);

    {
        let (track, mut receiver) = store.track("trip_summary").await.unwrap();
        fetcher
            .start(track, DaemonLifecycle::Continuous, CancellationToken::new())
            .unwrap();
        let page = next_page(&mut receiver).await;
        receiver.commit(page.ending()).await.unwrap();
        fetcher.stop().join().await.unwrap();
    }
    assert_eq!(
        store.progression().load_progress("trip_summary").await.unwrap(),
        Some(10)
    );

    let (fetcher, _) = recording_fetcher(&store, &["trip_started"], 10);
    let (track, mut receiver) = store.track("trip_summary").await.unwrap();
    fetcher
        .start(track, DaemonLifecycle::OneShot, CancellationToken::new())
        .unwrap();
    let (pages, checkpoint) = drain_until_finished(&mut receiver).await;

    assert_eq!(pages[0].from(), 10);
    assert_eq!(delivered_sequences(&pages), (11..=30).collect::<Vec<_>>());
    assert_eq!(checkpoint, 30);
}

#[tokio::test]
async fn independent_fetchers_poll_the_same_log() {
    let store = trip_store(quick_settings());
    let stream = StreamKey::new_id();
    let mut events = Vec::new();
    for day in 0..20 {
        events.push(trip_started(&store, day));
        events.push(trip_ended(&store, day));
    }
    store.append_encoded(&stream, None, events).await.unwrap();

    let (starts, _) = recording_fetcher(&store, &["trip_started"], 8);
    let (ends, _) = recording_fetcher(&store, &["trip_ended"], 8);
    let (start_track, mut start_pages) = QueuedTrack::new("starts", 0);
    let (end_track, mut end_pages) = QueuedTrack::new("ends", 0);

    starts
        .start(start_track, DaemonLifecycle::OneShot, CancellationToken::new())
        .unwrap();
    ends.start(end_track, DaemonLifecycle::OneShot, CancellationToken::new())
        .unwrap();
    let (start_run, start_end) = drain_until_finished(&mut start_pages).await;
    let (end_run, end_end) = drain_until_finished(&mut end_pages).await;

    assert_eq!(
        delivered_sequences(&start_run),
        (1..=40).step_by(2).collect::<Vec<_>>()
    );
    assert_eq!(
        delivered_sequences(&end_run),
        (2..=40).step_by(2).collect::<Vec<_>>()
    );
    assert_eq!(start_end, 40);
    assert_eq!(end_end, 40);
}
