#![forbid(unsafe_code)]

//! Streaming session: the actor that owns scheduling state and the handle
//! the host player talks to.
//!
//! All mutation happens on one task. Fetch tasks and sink-retry timers report
//! back over a channel, so settlements for a superseded epoch are seen and
//! discarded in order with playback commands.

use std::{
    ops::ControlFlow,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rangecast_events::{EventBus, StreamEvent};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    config::StreamConfig,
    error::{ProbeError, SessionError, SessionResult},
    internal::{ChunkFetcher, Delivery, FetchOutcome, Finish, SinkFeeder},
    layout::{ChunkIndex, ChunkLayout},
    scheduler::{ChunkScheduler, Epoch, PlaybackState, SeekPlan},
    sink::{MediaSink, Segment},
    source::{HttpRangeSource, RangeSource},
};

/// Playback notifications from the host player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    /// The player is seeking to `position` of a `duration`-long asset.
    Seeking {
        position: Duration,
        duration: Duration,
    },
    /// The player ran out of data.
    Stalled,
    /// The player resumed after a stall.
    Resumed,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub content_length: u64,
    pub total_chunks: usize,
    /// Delivered chunks, ascending.
    pub loaded: Vec<ChunkIndex>,
    /// Chunks with a fetch or sink delivery outstanding, ascending.
    pub pending: Vec<ChunkIndex>,
    /// Chunks that failed since the last seek or stall, ascending.
    pub failed: Vec<ChunkIndex>,
    pub current_chunk: ChunkIndex,
    pub state: PlaybackState,
    pub epoch: Epoch,
    /// End-of-stream has been signalled to the sink.
    pub ended: bool,
}

enum Command {
    Playback(PlaybackEvent),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Dispose(oneshot::Sender<()>),
}

enum Internal {
    Fetched(FetchOutcome),
    RetryAppend {
        segment: Segment,
        epoch: Epoch,
        attempt: u32,
    },
    RecheckEnd,
}

impl From<FetchOutcome> for Internal {
    fn from(outcome: FetchOutcome) -> Self {
        Self::Fetched(outcome)
    }
}

/// Handle to a running session.
///
/// Dropping the handle cancels the session and every fetch it started.
pub struct StreamSession {
    commands: mpsc::Sender<Command>,
    bus: EventBus,
    cancel: CancellationToken,
    layout: ChunkLayout,
    disposed: Arc<AtomicBool>,
}

impl StreamSession {
    /// Probe `config.src`, open `sink`, and start fetching the initial window.
    ///
    /// `Opened` is published before any chunk is requested.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidConfig`] if `config` fails validation
    /// - [`SessionError::Probe`] if the content length cannot be determined
    /// - [`SessionError::Sink`] if the sink refuses to open
    /// - [`SessionError::Disposed`] if `config.cancel` fires while probing
    pub async fn open<S, K>(source: S, sink: K, config: StreamConfig) -> SessionResult<Self>
    where
        S: RangeSource,
        K: MediaSink,
    {
        config.validate()?;

        let bus = config
            .bus
            .clone()
            .unwrap_or_else(|| EventBus::new(config.event_channel_capacity));
        let cancel = config
            .cancel
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let source: Arc<dyn RangeSource> = Arc::new(source);

        let content_length = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SessionError::Disposed),
            probed = source.probe_length(&config.src) => probed.inspect_err(|error| {
                warn!(src = %config.src, %error, "content length probe failed");
            })?,
        };
        let layout = ChunkLayout::new(content_length, config.chunk_size);

        let mut feeder = SinkFeeder::new(Box::new(sink), config.sink_retry);
        feeder.open(&config.format).await?;

        info!(
            src = %config.src,
            content_length,
            total_chunks = layout.total_chunks(),
            chunk_size = config.chunk_size,
            format = %config.format,
            "session opened"
        );
        bus.publish(StreamEvent::Opened {
            content_length,
            total_chunks: layout.total_chunks(),
        });

        let (commands, command_rx) = mpsc::channel(config.command_channel_capacity);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let actor = SessionActor {
            scheduler: ChunkScheduler::new(
                layout,
                config.buffer_ahead,
                config.initial_buffer_size,
            ),
            feeder,
            fetcher: ChunkFetcher::new(source, config.src.clone(), layout, internal_tx.clone()),
            internal_tx,
            bus: bus.clone(),
            batch: cancel.child_token(),
            cancel: cancel.clone(),
            end_checks: 0,
        };
        tokio::spawn(actor.run(command_rx, internal_rx));

        Ok(Self {
            commands,
            bus,
            cancel,
            layout,
            disposed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// [`open`](Self::open) over HTTP, using `config.net` and `config.headers`.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open); a client that cannot be built is
    /// reported as [`ProbeError::Unreachable`].
    pub async fn open_http<K: MediaSink>(sink: K, config: StreamConfig) -> SessionResult<Self> {
        let source = HttpRangeSource::new(config.net.clone(), config.headers.clone())
            .map_err(ProbeError::from)?;
        Self::open(source, sink, config).await
    }

    pub fn layout(&self) -> ChunkLayout {
        self.layout
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribe to session events from now on.
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.bus.subscribe()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire) || self.cancel.is_cancelled()
    }

    /// Forward a playback notification.
    ///
    /// # Errors
    ///
    /// [`SessionError::Disposed`] once the session is disposed.
    pub async fn notify(&self, event: PlaybackEvent) -> SessionResult<()> {
        self.send(Command::Playback(event)).await
    }

    /// Shorthand for [`PlaybackEvent::Seeking`].
    ///
    /// # Errors
    ///
    /// [`SessionError::Disposed`] once the session is disposed.
    pub async fn seek(&self, position: Duration, duration: Duration) -> SessionResult<()> {
        self.notify(PlaybackEvent::Seeking { position, duration }).await
    }

    /// # Errors
    ///
    /// [`SessionError::Disposed`] once the session is disposed.
    pub async fn buffering_started(&self) -> SessionResult<()> {
        self.notify(PlaybackEvent::Stalled).await
    }

    /// # Errors
    ///
    /// [`SessionError::Disposed`] once the session is disposed.
    pub async fn playback_resumed(&self) -> SessionResult<()> {
        self.notify(PlaybackEvent::Resumed).await
    }

    /// # Errors
    ///
    /// [`SessionError::Disposed`] once the session is disposed.
    pub async fn snapshot(&self) -> SessionResult<SessionSnapshot> {
        let (reply, snapshot) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        snapshot.await.map_err(|_| SessionError::Disposed)
    }

    /// Cancel all fetches and release scheduling state. Idempotent.
    ///
    /// Returns once the actor has stopped.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let (ack, stopped) = oneshot::channel();
        if self.commands.send(Command::Dispose(ack)).await.is_ok() {
            let _ = stopped.await;
        }
        self.cancel.cancel();
    }

    async fn send(&self, command: Command) -> SessionResult<()> {
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Disposed)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SessionActor {
    scheduler: ChunkScheduler,
    feeder: SinkFeeder,
    fetcher: ChunkFetcher<Internal>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    bus: EventBus,
    /// Session-wide token; parent of `batch`.
    cancel: CancellationToken,
    /// Token of the current fetch batch. Replaced on every seek re-seed.
    batch: CancellationToken,
    end_checks: u32,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        debug!(
            total_chunks = self.scheduler.layout().total_chunks(),
            "session actor started"
        );
        let initial = self.scheduler.schedule_initial();
        self.dispatch(initial);
        self.maybe_finish().await;

        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("session cancelled");
                    self.shutdown();
                    return;
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("session handle dropped");
                        self.shutdown();
                        return;
                    };
                    if self.handle_command(command).is_break() {
                        return;
                    }
                }
                Some(message) = internal.recv() => self.handle_internal(message).await,
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Playback(event) => self.on_playback(event),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Dispose(ack) => {
                self.shutdown();
                let _ = ack.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn on_playback(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Seeking { position, duration } => self.on_seek(position, duration),
            PlaybackEvent::Stalled => {
                let issued = self.scheduler.on_buffering_start();
                debug!(
                    current = self.scheduler.current_chunk(),
                    ?issued,
                    "playback stalled, widening look-ahead"
                );
                self.bus.publish(StreamEvent::BufferingStarted);
                self.dispatch(issued);
            }
            PlaybackEvent::Resumed => {
                let issued = self.scheduler.on_resumed();
                debug!(?issued, "playback resumed");
                self.bus.publish(StreamEvent::PlaybackResumed);
                self.dispatch(issued);
            }
        }
    }

    fn on_seek(&mut self, position: Duration, duration: Duration) {
        let layout = *self.scheduler.layout();
        let Some(target) = layout.seek_target(position, duration) else {
            debug!(?position, ?duration, "seek ignored");
            return;
        };
        let covered = layout
            .byte_range(target)
            .is_some_and(|range| self.feeder.covers(&range));

        match self.scheduler.on_seek(target, covered) {
            SeekPlan::Covered { target } => {
                trace!(target, "seek target already buffered");
            }
            SeekPlan::Reseed {
                target,
                cancelled,
                fetch,
            } => {
                self.batch.cancel();
                self.batch = self.cancel.child_token();
                debug!(
                    target,
                    ?cancelled,
                    epoch = self.scheduler.epoch(),
                    "seek invalidated in-flight fetches"
                );
                self.bus
                    .publish(StreamEvent::SeekReseeded { target, cancelled });
                self.dispatch(fetch);
                self.advance();
            }
        }
    }

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Fetched(outcome) => self.on_fetched(outcome).await,
            Internal::RetryAppend {
                segment,
                epoch,
                attempt,
            } => {
                if !self.scheduler.is_current(segment.index, epoch) {
                    trace!(index = segment.index, epoch, "discarding stale sink retry");
                } else if !self.deliver(segment, epoch, attempt).await {
                    return;
                }
                self.advance();
            }
            Internal::RecheckEnd => self.maybe_finish().await,
        }
    }

    async fn on_fetched(&mut self, outcome: FetchOutcome) {
        let FetchOutcome {
            index,
            epoch,
            range,
            result,
        } = outcome;

        if !self.scheduler.is_current(index, epoch) {
            trace!(index, epoch, "discarding stale fetch");
            self.advance();
            return;
        }

        match result {
            Ok(data) => {
                let segment = Segment { index, range, data };
                if !self.deliver(segment, epoch, 0).await {
                    return;
                }
            }
            Err(error) if error.is_cancelled() => {
                trace!(index, epoch, "chunk fetch cancelled");
                self.scheduler.abandon(index, epoch);
            }
            Err(error) => {
                warn!(index, %error, "chunk fetch failed");
                self.fail(index, epoch, error.to_string());
            }
        }
        self.advance();
    }

    /// Offer `segment` to the sink. Returns `false` while a retry is scheduled
    /// and the chunk stays pending.
    async fn deliver(&mut self, segment: Segment, epoch: Epoch, attempt: u32) -> bool {
        let index = segment.index;
        match self.feeder.offer(&segment).await {
            Ok(Delivery::Appended) => {
                if let Some(progress) = self.scheduler.complete(index, epoch) {
                    debug!(
                        index,
                        loaded = progress.loaded_count,
                        total = progress.total_chunks,
                        "chunk appended"
                    );
                    self.bus.publish(progress);
                }
                self.maybe_finish().await;
                true
            }
            Ok(Delivery::Busy) if self.feeder.may_retry(attempt) => {
                trace!(index, attempt, "sink busy, retrying later");
                self.schedule(
                    self.feeder.retry_delay(),
                    Internal::RetryAppend {
                        segment,
                        epoch,
                        attempt: attempt + 1,
                    },
                );
                false
            }
            Ok(Delivery::Busy) => {
                warn!(index, attempts = attempt + 1, "sink stayed busy, dropping chunk");
                self.fail(index, epoch, "sink busy".to_string());
                true
            }
            Err(error) => {
                warn!(index, %error, "sink rejected chunk");
                self.fail(index, epoch, error.to_string());
                true
            }
        }
    }

    async fn maybe_finish(&mut self) {
        if self.feeder.is_ended() || !self.scheduler.is_complete() {
            return;
        }
        match self.feeder.finish().await {
            Ok(Finish::Ended) => {
                info!(
                    total_chunks = self.scheduler.layout().total_chunks(),
                    "end of stream signalled"
                );
                self.bus.publish(StreamEvent::EndOfStream);
            }
            Ok(Finish::Busy) if self.feeder.may_recheck_end(self.end_checks) => {
                self.end_checks += 1;
                trace!(checks = self.end_checks, "sink busy, deferring end of stream");
                self.schedule(self.feeder.retry_delay(), Internal::RecheckEnd);
            }
            Ok(Finish::Busy) => {
                warn!(checks = self.end_checks, "sink stayed busy, end of stream not signalled");
            }
            Err(error) => {
                warn!(%error, "end of stream failed");
            }
        }
    }

    /// Steady-state look-ahead after a settlement.
    fn advance(&mut self) {
        let issued = self.scheduler.steady_state();
        self.dispatch(issued);
    }

    fn dispatch(&self, indices: Vec<ChunkIndex>) {
        if indices.is_empty() {
            return;
        }
        let epoch = self.scheduler.epoch();
        debug!(?indices, epoch, "fetching chunks");
        for index in indices {
            self.fetcher.spawn(index, epoch, self.batch.clone());
        }
    }

    fn fail(&mut self, index: ChunkIndex, epoch: Epoch, error: String) {
        if self.scheduler.fail(index, epoch) {
            self.bus.publish(StreamEvent::ChunkFailed { index, error });
        }
    }

    /// Post `message` back to the actor after `delay`, unless the session ends first.
    fn schedule(&self, delay: Duration, message: Internal) {
        let tx = self.internal_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = tx.send(message);
                }
            }
        });
    }

    fn snapshot(&self) -> SessionSnapshot {
        let layout = self.scheduler.layout();
        SessionSnapshot {
            content_length: layout.content_length(),
            total_chunks: layout.total_chunks(),
            loaded: self.scheduler.loaded().collect(),
            pending: self.scheduler.pending().collect(),
            failed: self.scheduler.failed().collect(),
            current_chunk: self.scheduler.current_chunk(),
            state: self.scheduler.state(),
            epoch: self.scheduler.epoch(),
            ended: self.feeder.is_ended(),
        }
    }

    fn shutdown(&mut self) {
        self.batch.cancel();
        self.cancel.cancel();
        self.scheduler.clear();
        self.bus.publish(StreamEvent::Disposed);
        info!("session disposed");
    }
}
