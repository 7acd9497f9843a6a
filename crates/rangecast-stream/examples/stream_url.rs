//! Example: stream a remote resource into an in-memory sink.
//!
//! Streams the whole resource, simulating a stall and a seek halfway through,
//! and logs every session event.
//!
//! Run with:
//! ```
//! cargo run -p rangecast-stream --example stream_url [URL]
//! ```

use std::{env::args, error::Error, time::Duration};

use rangecast_stream::{EventBus, MemorySink, StreamConfig, StreamEvent, StreamSession};
use tracing::{info, metadata::LevelFilter, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Nominal media duration used to map seeks onto chunks.
const DURATION: Duration = Duration::from_secs(10);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::default()
                .add_directive("rangecast_stream=debug".parse()?)
                .add_directive("rangecast_net=warn".parse()?)
                .add_directive(LevelFilter::INFO.into()),
        )
        .with_line_number(false)
        .with_file(false)
        .init();

    let url = args().nth(1).unwrap_or_else(|| {
        "https://test-videos.co.uk/vids/bigbuckbunny/mp4/h264/360/Big_Buck_Bunny_360_10s_1MB.mp4"
            .to_string()
    });
    info!("Opening: {}", url);

    let bus = EventBus::new(256);
    let mut events = bus.subscribe();
    let sink = MemorySink::new();
    let config = StreamConfig::new(Url::parse(&url)?)
        .with_chunk_size(128 * 1024)
        .with_events(bus);
    let session = StreamSession::open_http(sink.clone(), config).await?;

    session.buffering_started().await?;
    session.playback_resumed().await?;
    session.seek(DURATION / 2, DURATION).await?;

    while let Ok(event) = events.recv().await {
        info!(?event);
        match event {
            StreamEvent::EndOfStream | StreamEvent::Disposed => break,
            StreamEvent::ChunkFailed { index, error } => {
                warn!(index, %error, "chunk failed, giving up");
                break;
            }
            _ => {}
        }
        let snapshot = session.snapshot().await?;
        if !snapshot.pending.is_empty() {
            continue;
        }
        // Chunks skipped by the seek: jump to the middle of the first gap.
        if let Some(missing) = (0..snapshot.total_chunks).find(|i| !snapshot.loaded.contains(i)) {
            let fraction = (missing as f64 + 0.5) / snapshot.total_chunks as f64;
            session.seek(DURATION.mul_f64(fraction), DURATION).await?;
        }
    }

    info!(bytes = sink.contiguous_bytes().len(), "Streaming complete");
    session.dispose().await;
    Ok(())
}
