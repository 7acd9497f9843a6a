//! Chunk selection policies.
//!
//! `ChunkScheduler` owns the loaded/pending bookkeeping and decides which
//! chunks to fetch next. It performs no I/O: the session actor turns its
//! plans into fetch tasks and feeds settlements back.

use std::collections::{BTreeMap, BTreeSet};

use rangecast_events::Progress;

use crate::layout::{ChunkIndex, ChunkLayout};

/// Fetch generation. Bumped on every seek re-seed; settlements tagged with an
/// older epoch are discarded.
pub type Epoch = u64;

/// Playback state as reported by the host player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Idle,
    Buffering,
    Playing,
}

/// Outcome of a seek notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekPlan {
    /// Target chunk is already in the sink; nothing changes.
    Covered { target: ChunkIndex },
    /// In-flight fetches were invalidated and a new window was seeded.
    Reseed {
        target: ChunkIndex,
        cancelled: Vec<ChunkIndex>,
        fetch: Vec<ChunkIndex>,
    },
}

#[derive(Debug)]
pub struct ChunkScheduler {
    layout: ChunkLayout,
    buffer_ahead: usize,
    initial_buffer_size: usize,
    loaded: BTreeSet<ChunkIndex>,
    pending: BTreeMap<ChunkIndex, Epoch>,
    /// Chunks whose fetch or delivery failed. Skipped by the steady-state
    /// policy until the next seek or stall.
    failed: BTreeSet<ChunkIndex>,
    current_chunk: ChunkIndex,
    state: PlaybackState,
    epoch: Epoch,
}

impl ChunkScheduler {
    pub fn new(layout: ChunkLayout, buffer_ahead: usize, initial_buffer_size: usize) -> Self {
        Self {
            layout,
            buffer_ahead,
            initial_buffer_size,
            loaded: BTreeSet::new(),
            pending: BTreeMap::new(),
            failed: BTreeSet::new(),
            current_chunk: 0,
            state: PlaybackState::Idle,
            epoch: 0,
        }
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn current_chunk(&self) -> ChunkIndex {
        self.current_chunk
    }

    pub fn is_loaded(&self, index: ChunkIndex) -> bool {
        self.loaded.contains(&index)
    }

    pub fn is_pending(&self, index: ChunkIndex) -> bool {
        self.pending.contains_key(&index)
    }

    pub fn loaded(&self) -> impl Iterator<Item = ChunkIndex> + '_ {
        self.loaded.iter().copied()
    }

    pub fn pending(&self) -> impl Iterator<Item = ChunkIndex> + '_ {
        self.pending.keys().copied()
    }

    pub fn failed(&self) -> impl Iterator<Item = ChunkIndex> + '_ {
        self.failed.iter().copied()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Every chunk has been delivered.
    pub fn is_complete(&self) -> bool {
        self.loaded.len() == self.layout.total_chunks()
    }

    /// Chunks `0..min(initial_buffer_size, total)`.
    pub fn schedule_initial(&mut self) -> Vec<ChunkIndex> {
        self.enqueue(0, self.initial_buffer_size)
    }

    /// Look-ahead after a settlement: `current+1 ..= current+buffer_ahead`.
    ///
    /// Yields nothing while fetches are outstanding or playback is stalled.
    pub fn steady_state(&mut self) -> Vec<ChunkIndex> {
        if self.has_pending() || self.state == PlaybackState::Buffering {
            return Vec::new();
        }
        self.enqueue(self.current_chunk + 1, self.buffer_ahead)
    }

    /// Playback stalled: widen the window to `current+1 ..= current+2*buffer_ahead`.
    ///
    /// The window is inclusive like the steady-state one, so it holds
    /// `2*buffer_ahead` chunks; a half-open reading would hold one fewer.
    /// Existing fetches are left alone and failed chunks become eligible again.
    pub fn on_buffering_start(&mut self) -> Vec<ChunkIndex> {
        self.state = PlaybackState::Buffering;
        self.failed.clear();
        self.enqueue(self.current_chunk + 1, self.buffer_ahead.saturating_mul(2))
    }

    /// Playback resumed: clear the stall flag, then apply the steady-state policy.
    pub fn on_resumed(&mut self) -> Vec<ChunkIndex> {
        self.state = PlaybackState::Playing;
        self.steady_state()
    }

    /// Seek to `target`. `covered` tells whether the sink already holds the
    /// target chunk's whole byte range.
    ///
    /// When not covered, every pending fetch is invalidated and
    /// `target ..= target+buffer_ahead-1` is seeded under a fresh epoch.
    pub fn on_seek(&mut self, target: ChunkIndex, covered: bool) -> SeekPlan {
        if covered {
            return SeekPlan::Covered { target };
        }
        self.epoch += 1;
        self.failed.clear();
        let cancelled: Vec<_> = std::mem::take(&mut self.pending).into_keys().collect();
        let fetch = self.enqueue(target, self.buffer_ahead);
        SeekPlan::Reseed {
            target,
            cancelled,
            fetch,
        }
    }

    /// Whether a settlement for `index` tagged `epoch` is still wanted.
    pub fn is_current(&self, index: ChunkIndex, epoch: Epoch) -> bool {
        self.pending.get(&index) == Some(&epoch)
    }

    /// Record a successful append. Returns `None` for stale settlements.
    pub fn complete(&mut self, index: ChunkIndex, epoch: Epoch) -> Option<Progress> {
        if !self.is_current(index, epoch) {
            return None;
        }
        self.pending.remove(&index);
        self.loaded.insert(index);
        self.current_chunk = self.current_chunk.max(index);
        Some(self.progress())
    }

    /// Drop a cancelled `index` from pending without loading it.
    ///
    /// Returns `false` for stale settlements.
    pub fn abandon(&mut self, index: ChunkIndex, epoch: Epoch) -> bool {
        if !self.is_current(index, epoch) {
            return false;
        }
        self.pending.remove(&index);
        true
    }

    /// Drop a failed `index` from pending. It stays out of the steady-state
    /// window until a seek or stall re-selects it.
    ///
    /// Returns `false` for stale settlements.
    pub fn fail(&mut self, index: ChunkIndex, epoch: Epoch) -> bool {
        if !self.abandon(index, epoch) {
            return false;
        }
        self.failed.insert(index);
        true
    }

    pub fn progress(&self) -> Progress {
        Progress {
            loaded_count: self.loaded.len(),
            total_chunks: self.layout.total_chunks(),
            current_chunk: self.current_chunk,
            is_buffering: self.state == PlaybackState::Buffering,
        }
    }

    /// Forget all outstanding work.
    pub fn clear_pending(&mut self) {
        self.epoch += 1;
        self.pending.clear();
    }

    /// Forget everything: pending work, delivered chunks and failures.
    pub fn clear(&mut self) {
        self.clear_pending();
        self.loaded.clear();
        self.failed.clear();
    }

    /// Mark up to `count` chunks starting at `start` as pending, ascending,
    /// skipping chunks already loaded, pending or failed.
    fn enqueue(&mut self, start: ChunkIndex, count: usize) -> Vec<ChunkIndex> {
        let end = start.saturating_add(count).min(self.layout.total_chunks());
        let mut issued = Vec::new();
        for index in start..end {
            if self.loaded.contains(&index)
                || self.pending.contains_key(&index)
                || self.failed.contains(&index)
            {
                continue;
            }
            self.pending.insert(index, self.epoch);
            issued.push(index);
        }
        issued
    }
}
