//! Paging over a settled log

use crate::*;

#[tokio::test]
async fn five_hundred_events_arrive_in_five_disjoint_pages() {
    let store = trip_store(quick_settings());
    for _ in 0..5 {
        append_trips(&store, &StreamKey::new_id(), 100).await;
    }
    let (fetcher, _) = recording_fetcher(&store, &["trip_started"], 100);

    let pages = fetch_to_tail(&fetcher, 0).await;

    let full: Vec<_> = pages.iter().filter(|p| p.count() > 0).collect();
    assert_eq!(full.len(), 5);
    for (i, page) in full.iter().enumerate() {
        let from = i as u64 * 100;
        assert_eq!(page.from(), from);
        assert_eq!(page.to(), from + 100);
        assert_eq!(page.count(), 100);
        assert!(page.is_sequential());
        assert!(page.events().iter().all(|e| e.sequence > from && e.sequence <= from + 100));
    }
    assert_eq!(delivered_sequences(&pages), (1..=500).collect::<Vec<_>>());

    let tail = pages.last().unwrap();
    assert!(tail.should_pause());
    assert_eq!(tail.ending(), 500);
}

#[tokio::test]
async fn page_boundaries_report_known_sequences() {
    let store = trip_store(quick_settings());
    append_trips(&store, &StreamKey::new_id(), 35).await;
    let (fetcher, _) = recording_fetcher(&store, &["trip_started"], 10);

    let page = fetcher.fetch_next_page(10).await.unwrap();
    assert_eq!(page.sequences(), (11..=20).collect::<Vec<_>>().as_slice());
    assert_eq!(page.next_known_sequence(), 21);
    assert_eq!(page.last_known_sequence(), 35);
    assert!(!page.should_pause());
    assert_eq!(page.last_encountered(), 20);
}

#[tokio::test]
async fn filtered_out_types_are_observed_but_not_delivered() {
    let store = trip_store(quick_settings());
    let stream = StreamKey::new_id();
    let mut events = Vec::new();
    for day in 0..10 {
        events.push(trip_started(&store, day));
        events.push(trip_ended(&store, day));
    }
    store.append_encoded(&stream, None, events).await.unwrap();
    let (fetcher, _) = recording_fetcher(&store, &["trip_ended"], 50);

    let page = fetcher.fetch_next_page(0).await.unwrap();
    assert_eq!(page.sequences().len(), 20);
    assert!(page.is_sequential());
    assert_eq!(page.count(), 10);
    assert!(page.events().iter().all(|e| e.type_name == "trip_ended"));
    assert!(page.events().iter().all(|e| e.sequence % 2 == 0));
    assert_eq!(page.events()[3].data::<TripEnded>(), Some(&TripEnded { day: 3 }));
}

#[tokio::test]
async fn sparse_matches_still_advance_the_cursor_page_by_page() {
    let store = trip_store(quick_settings());
    let stream = StreamKey::new_id();
    let mut events: Vec<_> = (0..30).map(|day| trip_started(&store, day)).collect();
    events.push(trip_ended(&store, 30));
    store.append_encoded(&stream, None, events).await.unwrap();
    let (fetcher, _) = recording_fetcher(&store, &["trip_ended"], 10);

    let pages = fetch_to_tail(&fetcher, 0).await;

    assert_eq!(delivered_sequences(&pages), vec![31]);
    assert!(pages.iter().all(|p| p.is_sequential()));
    assert_eq!(pages.last().unwrap().ending(), 31);
}

#[tokio::test]
async fn events_are_correlated_by_stream() {
    let store = trip_store(quick_settings());
    let streams: Vec<_> = (0..20).map(|_| StreamKey::new_id()).collect();
    let mut batch = Vec::new();
    for day in 0..5 {
        for stream in &streams {
            batch.push((stream.clone(), trip_started(&store, day)));
        }
    }
    let sequences = store.append_batch(None, batch).await.unwrap();
    assert_eq!(sequences, (1..=100).collect::<Vec<_>>());
    let (fetcher, _) = recording_fetcher(&store, &["trip_started"], 100);

    let page = fetcher.fetch_next_page(0).await.unwrap();
    let grouped = page.streams();

    assert_eq!(page.count(), 100);
    let commit_times: std::collections::HashSet<_> =
        page.events().iter().map(|e| e.timestamp).collect();
    assert_eq!(commit_times.len(), 1);
    assert_eq!(grouped.len(), 20);
    for (expected, stream) in streams.iter().zip(&grouped) {
        assert_eq!(&stream.id, expected);
        let versions: Vec<_> = stream.events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
        let days: Vec<_> = stream
            .events
            .iter()
            .map(|e| e.data::<TripStarted>().unwrap().day)
            .collect();
        assert_eq!(days, vec![0, 1, 2, 3, 4]);
    }
}

#[tokio::test]
async fn refetching_the_same_position_is_idempotent() {
    let store = trip_store(quick_settings());
    append_trips(&store, &StreamKey::new_id(), 12).await;
    let (fetcher, _) = recording_fetcher(&store, &["trip_started"], 10);

    let first = fetcher.fetch_next_page(0).await.unwrap();
    let second = fetcher.fetch_next_page(0).await.unwrap();

    assert_eq!(first.sequences(), second.sequences());
    let ids = |page: &EventPage| page.events().iter().map(|e| e.id).collect::<Vec<_>>();
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(fetcher.last_encountered(), 0);
}

#[tokio::test]
async fn young_rows_wait_for_the_leading_edge_buffer() {
    let store = trip_store(
        quick_settings().with_leading_edge_buffer(Duration::from_secs(60)),
    );
    let log = store.memory_log().unwrap();
    let stream = StreamKey::new_id();
    let settled = chrono::Utc::now() - chrono::Duration::seconds(300);
    log.reserve(&stream, None, (0..3).map(|d| trip_started(&store, d)).collect())
        .unwrap()
        .commit_at(settled);
    append_trips(&store, &stream, 3).await;
    let (fetcher, _) = recording_fetcher(&store, &["trip_started"], 10);

    let page = fetcher.fetch_next_page(0).await.unwrap();

    assert_eq!(page.sequences(), &[1, 2, 3]);
    assert!(page.is_sequential());
    assert!(page.should_pause());
    assert_eq!(page.ending(), 3);
}

#[tokio::test]
async fn string_streams_with_message_pack_payloads() {
    let store = EventStore::builder()
        .stream_identity(StreamIdentity::AsString)
        .serializer(SerializerKind::MessagePack)
        .daemon(quick_settings())
        .open()
        .unwrap();
    register_trip_types(&store);
    let stream = StreamKey::from("van-7");
    store
        .append(&stream, &[Breakdown { reason: "flat tyre".into() }])
        .await
        .unwrap();
    let (fetcher, _) = recording_fetcher(&store, &["breakdown"], 10);

    let page = fetcher.fetch_next_page(0).await.unwrap();

    assert_eq!(page.stream_identity(), StreamIdentity::AsString);
    let event = &page.events()[0];
    assert_eq!(event.stream.as_str(), Some("van-7"));
    assert_eq!(
        event.data::<Breakdown>().map(|b| b.reason.as_str()),
        Some("flat tyre")
    );
}
