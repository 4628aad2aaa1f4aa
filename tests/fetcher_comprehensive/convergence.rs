//! Gap convergence with in-flight and abandoned appends

use crate::*;
use cadence::daemon::Notification;

#[tokio::test(start_paused = true)]
async fn in_flight_append_is_waited_for() {
    let store = trip_store(quick_settings());
    let log = store.memory_log().unwrap().clone();
    let stream = StreamKey::new_id();
    append_trips(&store, &stream, 3).await;
    let pending = log
        .reserve(&StreamKey::new_id(), None, vec![trip_started(&store, 99)])
        .unwrap();
    append_trips(&store, &stream, 3).await;
    let (fetcher, logger) = recording_fetcher(&store, &["trip_started"], 10);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        pending.commit();
    });
    let page = fetcher.fetch_next_page(0).await.unwrap();

    assert_eq!(page.sequences(), &[1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(delivered_sequences(&[page]), vec![1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(logger.count(|n| matches!(n, Notification::Stalled(..))), 0);
}

#[tokio::test(start_paused = true)]
async fn convergence_reuses_one_session() {
    let store = trip_store(quick_settings());
    let log = store.memory_log().unwrap().clone();
    append_trips(&store, &StreamKey::new_id(), 2).await;
    let pending = log
        .reserve(&StreamKey::new_id(), None, vec![trip_started(&store, 0)])
        .unwrap();
    append_trips(&store, &StreamKey::new_id(), 2).await;
    let (fetcher, _) = recording_fetcher(&store, &["trip_started"], 10);

    let watcher = log.clone();
    let sessions_seen = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(600)).await;
        let sessions = watcher.open_sessions();
        pending.commit();
        sessions
    });
    fetcher.fetch_next_page(0).await.unwrap();

    assert_eq!(sessions_seen.await.unwrap(), 1);
    assert_eq!(log.open_sessions(), 0);
    assert!(log.window_queries() >= 3);
}

#[tokio::test(start_paused = true)]
async fn abandoned_gap_fails_the_fetch_under_fail_policy() {
    let store = trip_store(
        quick_settings()
            .with_max_convergence_attempts(4)
            .with_stall_policy(StallPolicy::Fail),
    );
    let log = store.memory_log().unwrap().clone();
    append_trips(&store, &StreamKey::new_id(), 2).await;
    log.reserve(&StreamKey::new_id(), None, vec![trip_started(&store, 0)])
        .unwrap()
        .abandon();
    append_trips(&store, &StreamKey::new_id(), 2).await;
    let (fetcher, logger) = recording_fetcher(&store, &["trip_started"], 10);

    let err = fetcher.fetch_next_page(0).await.unwrap_err();

    match err {
        Error::ConvergenceStalled {
            from,
            missing,
            attempts,
        } => {
            assert_eq!(from, 0);
            assert_eq!(missing, vec![3]);
            assert_eq!(attempts, 4);
        }
        other => panic!("Expected a stalled gap, got {other}"),
    }
    assert_eq!(
        logger.notifications(),
        vec![Notification::Stalled("trip_summary".into(), vec![3])]
    );
}

#[tokio::test(start_paused = true)]
async fn abandoned_gap_is_skipped_under_skip_policy() {
    let store = trip_store(
        quick_settings()
            .with_max_convergence_attempts(3)
            .with_stall_policy(StallPolicy::Skip),
    );
    let log = store.memory_log().unwrap().clone();
    append_trips(&store, &StreamKey::new_id(), 2).await;
    drop(
        log.reserve(&StreamKey::new_id(), None, vec![trip_started(&store, 0)])
            .unwrap(),
    );
    append_trips(&store, &StreamKey::new_id(), 2).await;
    let (fetcher, logger) = recording_fetcher(&store, &["trip_started"], 10);

    let page = fetcher.fetch_next_page(0).await.unwrap();

    assert_eq!(page.skipped_sequences(), &[3]);
    assert_eq!(delivered_sequences(&[page.clone()]), vec![1, 2, 4, 5]);
    assert_eq!(page.ending(), 5);
    assert_eq!(logger.count(|n| matches!(n, Notification::Stalled(..))), 1);
}

#[tokio::test(start_paused = true)]
async fn running_fetcher_moves_past_a_skipped_gap() {
    let store = trip_store(
        quick_settings()
            .with_max_convergence_attempts(2)
            .with_stall_policy(StallPolicy::Skip),
    );
    let log = store.memory_log().unwrap().clone();
    append_trips(&store, &StreamKey::new_id(), 3).await;
    log.reserve(&StreamKey::new_id(), None, vec![trip_started(&store, 0)])
        .unwrap()
        .abandon();
    append_trips(&store, &StreamKey::new_id(), 3).await;
    let (fetcher, _) = recording_fetcher(&store, &["trip_started"], 10);
    let (track, mut receiver) = cadence::QueuedTrack::new("trip_summary", 0);

    fetcher
        .start(track, DaemonLifecycle::OneShot, CancellationToken::new())
        .unwrap();
    let (pages, checkpoint) = drain_until_finished(&mut receiver).await;

    assert_eq!(delivered_sequences(&pages), vec![1, 2, 3, 5, 6, 7]);
    assert_eq!(pages[0].skipped_sequences(), &[4]);
    assert_eq!(checkpoint, 7);
    fetcher.pause().join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn leading_in_flight_sequence_holds_back_the_page() {
    let store = trip_store(quick_settings());
    let log = store.memory_log().unwrap().clone();
    append_trips(&store, &StreamKey::new_id(), 4).await;
    let pending = log
        .reserve(&StreamKey::new_id(), None, vec![trip_started(&store, 4)])
        .unwrap();
    append_trips(&store, &StreamKey::new_id(), 3).await;
    let (fetcher, logger) = recording_fetcher(&store, &["trip_started"], 10);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        pending.commit();
    });
    let page = fetcher.fetch_next_page(4).await.unwrap();

    assert_eq!(page.sequences(), &[5, 6, 7, 8]);
    assert_eq!(delivered_sequences(&[page]), vec![5, 6, 7, 8]);
    assert_eq!(logger.count(|n| matches!(n, Notification::Stalled(..))), 0);
}

#[tokio::test(start_paused = true)]
async fn in_flight_append_spanning_a_whole_page_is_not_skipped() {
    let store = trip_store(quick_settings());
    let log = store.memory_log().unwrap().clone();
    let pending = log
        .reserve(
            &StreamKey::new_id(),
            None,
            (0..10).map(|day| trip_started(&store, day)).collect(),
        )
        .unwrap();
    append_trips(&store, &StreamKey::new_id(), 1).await;
    let (fetcher, _) = recording_fetcher(&store, &["trip_started"], 10);
    let (track, mut receiver) = cadence::QueuedTrack::new("trip_summary", 0);

    fetcher
        .start(track, DaemonLifecycle::Continuous, CancellationToken::new())
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(fetcher.last_encountered(), 0);
    pending.commit();

    let mut pages = Vec::new();
    while delivered_sequences(&pages).len() < 11 {
        pages.push(next_page(&mut receiver).await);
    }
    assert_eq!(delivered_sequences(&pages), (1..=11).collect::<Vec<_>>());
    assert!(pages.iter().all(|p| p.skipped_sequences().is_empty()));
    fetcher.stop().join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn out_of_order_commits_are_delivered_without_loss() {
    let store = trip_store(quick_settings());
    let log = store.memory_log().unwrap().clone();
    let (fetcher, _) = recording_fetcher(&store, &["trip_started"], 5);
    let (track, mut receiver) = cadence::QueuedTrack::new("trip_summary", 0);
    fetcher
        .start(track, DaemonLifecycle::Continuous, CancellationToken::new())
        .unwrap();

    let pending: Vec<_> = (0..12)
        .map(|day| {
            log.reserve(&StreamKey::new_id(), None, vec![trip_started(&store, day)])
                .unwrap()
        })
        .collect();
    for append in pending.into_iter().rev() {
        append.commit();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let mut pages = Vec::new();
    while delivered_sequences(&pages).len() < 12 {
        pages.push(next_page(&mut receiver).await);
    }
    assert_eq!(delivered_sequences(&pages), (1..=12).collect::<Vec<_>>());
    fetcher.stop().join().await.unwrap();
}
