use std::time::Duration;

use axum::http::StatusCode;
use rangecast_stream::{
    EventBus, MemorySink, ProbeError, SessionError, StreamConfig, StreamEvent, StreamSession,
};
use rangecast_test_utils::{MediaRoute, TestHttpServer, next_event, payload};
use rstest::*;
use url::Url;

const LEN: usize = 10_000;
const CHUNK: u64 = 1_000;
const TIMEOUT: Duration = Duration::from_secs(10);

fn config(src: Url, bus: &EventBus) -> StreamConfig {
    StreamConfig::new(src)
        .with_chunk_size(CHUNK)
        .with_events(bus.clone())
}

#[fixture]
fn route() -> MediaRoute {
    MediaRoute::new(payload(LEN, 0xc0ffee))
}

#[rstest]
#[case::head_length(false)]
#[case::content_range_fallback(true)]
#[tokio::test]
async fn streams_whole_resource(route: MediaRoute, #[case] omit_head_length: bool) {
    let route = if omit_head_length {
        route.without_head_length()
    } else {
        route
    };
    let server = TestHttpServer::new(route.router("/video.mp4")).await;
    let bus = EventBus::new(256);
    let mut events = bus.subscribe();
    let sink = MemorySink::new();

    let session = StreamSession::open_http(sink.clone(), config(server.url("/video.mp4"), &bus))
        .await
        .unwrap();

    let opened = next_event(&mut events, TIMEOUT, |e| {
        matches!(e, StreamEvent::Opened { .. })
    })
    .await;
    assert_eq!(
        opened,
        StreamEvent::Opened {
            content_length: LEN as u64,
            total_chunks: 10
        }
    );
    next_event(&mut events, TIMEOUT, |e| *e == StreamEvent::EndOfStream).await;

    assert_eq!(sink.contiguous_bytes(), payload(LEN, 0xc0ffee).to_vec());
    assert_eq!(sink.end_of_stream_calls(), 1);
    assert!(route.ranges().contains(&"bytes=0-999".to_string()));
    assert!(route.ranges().contains(&"bytes=9000-9999".to_string()));

    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.loaded.len(), 10);
    assert!(snapshot.ended);
}

#[rstest]
#[tokio::test]
async fn missing_resource_fails_probe(route: MediaRoute) {
    let server = TestHttpServer::new(route.router("/video.mp4")).await;
    let sink = MemorySink::new();

    let result =
        StreamSession::open_http(sink.clone(), config(server.url("/missing.mp4"), &EventBus::new(8)))
            .await;

    assert!(matches!(
        result,
        Err(SessionError::Probe(ProbeError::Unreachable(_)))
    ));
    assert!(sink.format().is_none());
}

#[rstest]
#[tokio::test]
async fn range_errors_surface_as_chunk_failures(route: MediaRoute) {
    let route = route.with_range_status(StatusCode::INTERNAL_SERVER_ERROR);
    let server = TestHttpServer::new(route.router("/video.mp4")).await;
    let bus = EventBus::new(256);
    let mut events = bus.subscribe();
    let sink = MemorySink::new();

    let _session = StreamSession::open_http(sink.clone(), config(server.url("/video.mp4"), &bus))
        .await
        .unwrap();

    let failed = next_event(&mut events, TIMEOUT, |e| {
        matches!(e, StreamEvent::ChunkFailed { .. })
    })
    .await;
    let StreamEvent::ChunkFailed { index, error } = failed else {
        unreachable!();
    };
    assert!(index < 2, "failure from the initial window, got {index}");
    assert_eq!(error, "HTTP status 500");
    assert!(sink.appended().is_empty());
}

#[rstest]
#[tokio::test]
async fn failing_chunks_are_requested_once(route: MediaRoute) {
    let route = route.with_range_status(StatusCode::INTERNAL_SERVER_ERROR);
    let server = TestHttpServer::new(route.router("/video.mp4")).await;
    let bus = EventBus::new(256);
    let mut events = bus.subscribe();

    let session = StreamSession::open_http(MemorySink::new(), config(server.url("/video.mp4"), &bus))
        .await
        .unwrap();

    let mut failed = Vec::new();
    while failed.len() < 4 {
        let event = next_event(&mut events, TIMEOUT, |e| {
            matches!(e, StreamEvent::ChunkFailed { .. })
        })
        .await;
        if let StreamEvent::ChunkFailed { index, .. } = event {
            failed.push(index);
        }
    }
    failed.sort_unstable();
    assert_eq!(failed, vec![0, 1, 2, 3]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut ranges = route.ranges();
    ranges.sort();
    assert_eq!(
        ranges,
        vec!["bytes=0-999", "bytes=1000-1999", "bytes=2000-2999", "bytes=3000-3999"]
    );
    assert_eq!(session.snapshot().await.unwrap().failed, vec![0, 1, 2, 3]);

    // A stall re-selects the failed chunks for exactly one more attempt each.
    session.buffering_started().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let retried = route.ranges().iter().filter(|r| *r == "bytes=1000-1999").count();
    assert_eq!(retried, 2);
}

#[rstest]
#[tokio::test]
async fn seek_over_slow_origin_skips_superseded_chunks(route: MediaRoute) {
    let route = route.with_delay(Duration::from_millis(300));
    let server = TestHttpServer::new(route.router("/video.mp4")).await;
    let bus = EventBus::new(256);
    let mut events = bus.subscribe();
    let sink = MemorySink::new();

    let session = StreamSession::open_http(sink.clone(), config(server.url("/video.mp4"), &bus))
        .await
        .unwrap();
    session
        .seek(Duration::from_secs(60), Duration::from_secs(100))
        .await
        .unwrap();

    let reseeded = next_event(&mut events, TIMEOUT, |e| {
        matches!(e, StreamEvent::SeekReseeded { .. })
    })
    .await;
    assert_eq!(
        reseeded,
        StreamEvent::SeekReseeded {
            target: 6,
            cancelled: vec![0, 1]
        }
    );

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let snapshot = session.snapshot().await.unwrap();
        if [6, 7, 8].iter().all(|i| snapshot.loaded.contains(i)) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "{snapshot:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let appended = sink.appended();
    assert!(!appended.contains(&0) && !appended.contains(&1), "{appended:?}");
    session.dispose().await;
}
