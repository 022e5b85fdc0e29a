use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::Duration,
};
use tracing::{debug, trace, warn};

use super::{
    decoder::FrameDecoder,
    frame::{Frame, FRAME_DURATION},
};
use crate::error::DecodeError;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique track identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(u64);

impl TrackId {
    fn next() -> Self {
        Self(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Pending,
    Active,
    Completed,
    Failed,
    Skipped,
}

impl TrackState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Why a track stopped producing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndReason {
    /// Source ran out of frames
    Completed,
    /// Another track took its place
    Replaced,
    /// Source failed to load or decode
    LoadFailed,
    /// Explicitly stopped (skip)
    Stopped,
    /// Session teardown; nothing should start after it
    Cleanup,
}

impl TrackEndReason {
    /// Whether the scheduler should move on to the next pending track
    pub fn may_start_next(self) -> bool {
        !matches!(self, Self::Cleanup)
    }

    pub fn terminal_state(self) -> TrackState {
        match self {
            Self::Completed => TrackState::Completed,
            Self::LoadFailed => TrackState::Failed,
            Self::Replaced | Self::Stopped | Self::Cleanup => TrackState::Skipped,
        }
    }
}

/// Result of asking a track for its next frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePoll {
    Ready(Frame),
    /// Nothing decoded yet; the track is still alive
    Pending,
    Ended(TrackEndReason),
}

enum FeedItem {
    Frame(Frame),
    End,
    Error(DecodeError),
}

enum FrameFeed {
    /// Decodes on the caller's thread
    Inline(Box<FrameDecoder>),
    /// Decodes on a dedicated worker thread into a bounded buffer
    ReadAhead(ReadAhead),
}

impl FrameFeed {
    fn start(&mut self, id: TrackId) {
        if let Self::ReadAhead(feed) = self {
            feed.start(id);
        }
    }

    fn poll(&mut self, id: TrackId) -> FramePoll {
        match self {
            Self::Inline(decoder) => match decoder.next_frame() {
                Ok(Some(frame)) => FramePoll::Ready(frame),
                Ok(None) => FramePoll::Ended(TrackEndReason::Completed),
                Err(e) => {
                    warn!("❌ Error de decodificación en pista {}: {}", id, e);
                    FramePoll::Ended(TrackEndReason::LoadFailed)
                }
            },
            Self::ReadAhead(feed) => feed.poll(id),
        }
    }
}

/// Read-ahead buffer whose worker only exists once the track is active.
///
/// Pending tracks hold just their decoder, so a long queue costs no threads.
struct ReadAhead {
    capacity: usize,
    decoder: Option<Box<FrameDecoder>>,
    rx: Option<Receiver<FeedItem>>,
}

impl ReadAhead {
    fn new(decoder: FrameDecoder, capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            decoder: Some(Box::new(decoder)),
            rx: None,
        }
    }

    fn is_started(&self) -> bool {
        self.rx.is_some()
    }

    fn start(&mut self, id: TrackId) {
        let Some(decoder) = self.decoder.take() else {
            return;
        };
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);

        // Fuera del pool de tokio: el hilo queda bloqueado en `send` mientras
        // el buffer está lleno
        let spawned = thread::Builder::new()
            .name(format!("decode-{}", id.0))
            .spawn(move || read_ahead_worker(*decoder, tx, id));
        if let Err(e) = spawned {
            // El emisor se liberó con el closure; el primer poll verá `Disconnected`
            warn!("❌ No se pudo iniciar el decodificador de la pista {}: {}", id, e);
        }

        self.rx = Some(rx);
    }

    fn poll(&mut self, id: TrackId) -> FramePoll {
        self.start(id);
        let Some(rx) = &self.rx else {
            return FramePoll::Ended(TrackEndReason::LoadFailed);
        };

        match rx.try_recv() {
            Ok(FeedItem::Frame(frame)) => FramePoll::Ready(frame),
            Ok(FeedItem::End) => FramePoll::Ended(TrackEndReason::Completed),
            Ok(FeedItem::Error(e)) => {
                warn!("❌ Error de decodificación en pista {}: {}", id, e);
                FramePoll::Ended(TrackEndReason::LoadFailed)
            }
            Err(TryRecvError::Empty) => FramePoll::Pending,
            Err(TryRecvError::Disconnected) => {
                warn!("❌ Pista {}: {}", id, DecodeError::WorkerGone);
                FramePoll::Ended(TrackEndReason::LoadFailed)
            }
        }
    }
}

fn read_ahead_worker(mut decoder: FrameDecoder, tx: Sender<FeedItem>, id: TrackId) {
    loop {
        let item = match decoder.next_frame() {
            Ok(Some(frame)) => FeedItem::Frame(frame),
            Ok(None) => FeedItem::End,
            Err(e) => FeedItem::Error(e),
        };
        let last = !matches!(item, FeedItem::Frame(_));

        if tx.send(item).is_err() {
            trace!("Pista {} descartada, deteniendo lectura anticipada", id);
            return;
        }
        if last {
            return;
        }
    }
}

/// One queued utterance: a lazy frame source plus playback bookkeeping.
pub struct Track {
    id: TrackId,
    label: String,
    feed: FrameFeed,
    lookahead: Option<FramePoll>,
    finished: Option<TrackEndReason>,
    position: u64,
    state: TrackState,
}

impl Track {
    /// Pista que decodifica en el mismo hilo que la consume
    pub fn inline(label: impl Into<String>, decoder: FrameDecoder) -> Self {
        Self::with_feed(label.into(), FrameFeed::Inline(Box::new(decoder)))
    }

    /// Track backed by a background decode worker buffering up to
    /// `capacity` frames. The worker starts when the track becomes active.
    pub fn read_ahead(label: impl Into<String>, decoder: FrameDecoder, capacity: usize) -> Self {
        Self::with_feed(label.into(), FrameFeed::ReadAhead(ReadAhead::new(decoder, capacity)))
    }

    fn with_feed(label: String, feed: FrameFeed) -> Self {
        Self {
            id: TrackId::next(),
            label,
            feed,
            lookahead: None,
            finished: None,
            position: 0,
            state: TrackState::Pending,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    /// Frames delivered so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether a background decode worker has been started for this track
    pub fn is_decoding(&self) -> bool {
        match &self.feed {
            FrameFeed::Inline(_) => false,
            FrameFeed::ReadAhead(feed) => feed.is_started(),
        }
    }

    pub fn played(&self) -> Duration {
        FRAME_DURATION * self.position as u32
    }

    pub(crate) fn activate(&mut self) {
        self.state = TrackState::Active;
        self.feed.start(self.id);
        debug!("▶️ Pista {} activa: {}", self.id, self.label);
    }

    pub(crate) fn finish(&mut self, reason: TrackEndReason) {
        self.state = reason.terminal_state();
        self.finished = Some(reason);
    }

    /// Next frame in decode order.
    pub fn next_frame(&mut self) -> FramePoll {
        let poll = match self.lookahead.take() {
            Some(poll) => poll,
            None => self.poll_feed(),
        };

        if let FramePoll::Ready(_) = poll {
            self.position += 1;
        }
        poll
    }

    /// Looks one frame ahead and reports whether the stream has ended.
    ///
    /// A ready frame is kept for the next [`Track::next_frame`]; a pending
    /// feed is left untouched.
    pub fn peek_end(&mut self) -> Option<TrackEndReason> {
        if self.lookahead.is_none() {
            match self.poll_feed() {
                FramePoll::Pending => return None,
                poll => self.lookahead = Some(poll),
            }
        }

        match self.lookahead {
            Some(FramePoll::Ended(reason)) => Some(reason),
            _ => None,
        }
    }

    fn poll_feed(&mut self) -> FramePoll {
        if let Some(reason) = self.finished {
            return FramePoll::Ended(reason);
        }

        let poll = self.feed.poll(self.id);
        if let FramePoll::Ended(reason) = poll {
            self.finished = Some(reason);
        }
        poll
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("position", &self.position)
            .field("state", &self.state)
            .finish()
    }
}
