/*!
 * Progress monitoring transform
 *
 * Counts bytes as they pass through and publishes events to subscribers:
 * - `Started` when the stage is wired into a transfer
 * - `Progress` after every chunk
 * - `Finished` once the stream ends, or `Failed` if it errors
 *
 * Events travel over a crossbeam channel so they can be consumed from a plain
 * thread (the CLI renders them with indicatif).
 */

use super::{
    lock, parse_options, Direction, StageContext, Transform, TransformFactory, TransformKind,
};
use crate::adapter::ByteStream;
use crate::error::Result;
use crate::stats::Stats;
use bytes::Bytes;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use futures::{future, stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::io;
use std::sync::{Arc, Mutex};

const IDENTITY: &str = "progress";

/// Progress event types
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Stage wired into a transfer
    Started {
        location: String,
        direction: Direction,
        stats: Stats,
    },

    /// A chunk passed through
    Progress { location: String, stats: Stats },

    /// Stream ended; totals are final
    Finished { location: String, stats: Stats },

    /// Stream failed
    Failed {
        location: String,
        error: String,
        stats: Stats,
    },
}

impl ProgressEvent {
    pub fn location(&self) -> &str {
        match self {
            ProgressEvent::Started { location, .. }
            | ProgressEvent::Progress { location, .. }
            | ProgressEvent::Finished { location, .. }
            | ProgressEvent::Failed { location, .. } => location,
        }
    }

    pub fn stats(&self) -> &Stats {
        match self {
            ProgressEvent::Started { stats, .. }
            | ProgressEvent::Progress { stats, .. }
            | ProgressEvent::Finished { stats, .. }
            | ProgressEvent::Failed { stats, .. } => stats,
        }
    }
}

/// Progress publisher - sends events to subscribers
#[derive(Clone, Debug)]
pub struct ProgressPublisher {
    sender: Option<Sender<ProgressEvent>>,
}

impl ProgressPublisher {
    /// Create a new publisher with bounded channel
    ///
    /// Publishing never blocks the transfer: events that find the buffer full
    /// are dropped.
    pub fn new(buffer_size: usize) -> (Self, ProgressSubscriber) {
        let (tx, rx) = bounded(buffer_size);
        (
            ProgressPublisher { sender: Some(tx) },
            ProgressSubscriber { receiver: rx },
        )
    }

    /// Create a new publisher with unbounded channel
    pub fn unbounded() -> (Self, ProgressSubscriber) {
        let (tx, rx) = unbounded();
        (
            ProgressPublisher { sender: Some(tx) },
            ProgressSubscriber { receiver: rx },
        )
    }

    /// Create a no-op publisher (for when nobody is listening)
    pub fn noop() -> Self {
        ProgressPublisher { sender: None }
    }

    /// Publish an event without waiting for the subscriber
    pub fn publish(&self, event: ProgressEvent) {
        if let Some(ref tx) = self.sender {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    tracing::trace!(location = event.location(), "Progress buffer full; event dropped");
                }
                // Subscriber may have dropped
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }
}

/// Progress subscriber - receives events
pub struct ProgressSubscriber {
    receiver: Receiver<ProgressEvent>,
}

impl ProgressSubscriber {
    pub fn receiver(&self) -> &Receiver<ProgressEvent> {
        &self.receiver
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Option<ProgressEvent> {
        self.receiver.try_recv().ok()
    }

    /// Receive an event (blocking); `None` once every publisher is gone
    pub fn recv(&self) -> Option<ProgressEvent> {
        self.receiver.recv().ok()
    }

    /// Iterate until every publisher is gone
    pub fn iter(&self) -> impl Iterator<Item = ProgressEvent> + '_ {
        self.receiver.iter()
    }

    /// Drain whatever is buffered right now
    pub fn drain(&self) -> Vec<ProgressEvent> {
        self.receiver.try_iter().collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ProgressOptions {
    /// Expected byte count, if the caller knows it
    total: Option<u64>,
}

struct ProgressState {
    location: String,
    stats: Stats,
    failed: bool,
}

/// Progress transform
///
/// Options: `total` (expected byte count). Result: the final [`Stats`].
pub struct Progress {
    publisher: ProgressPublisher,
    state: Arc<Mutex<ProgressState>>,
}

impl Progress {
    /// Create a progress stage that publishes to `publisher`
    pub fn with_publisher(options: &Value, publisher: ProgressPublisher) -> Result<Self> {
        let options: ProgressOptions = parse_options(IDENTITY, options)?;
        Ok(Self {
            publisher,
            state: Arc::new(Mutex::new(ProgressState {
                location: String::new(),
                stats: Stats::new(options.total),
                failed: false,
            })),
        })
    }

    /// Factory for registering a progress stage bound to `publisher`
    ///
    /// Every stage created by the factory publishes to the same channel;
    /// events carry the location to tell concurrent transfers apart.
    pub fn factory(publisher: ProgressPublisher) -> TransformFactory {
        Arc::new(move |options: &Value| {
            Ok(Box::new(Progress::with_publisher(options, publisher.clone())?) as Box<dyn Transform>)
        })
    }

    /// Snapshot of the current stats
    pub fn stats(&self) -> Stats {
        lock(&self.state).stats.clone()
    }
}

impl TransformKind for Progress {
    const IDENTITY: &'static str = IDENTITY;

    fn new(options: &Value) -> Result<Self> {
        Self::with_publisher(options, ProgressPublisher::noop())
    }
}

impl Transform for Progress {
    fn identity(&self) -> &str {
        IDENTITY
    }

    fn transform(&mut self, upstream: ByteStream, ctx: &StageContext<'_>) -> Result<ByteStream> {
        let options: ProgressOptions = parse_options(IDENTITY, ctx.options)?;

        let started = {
            let mut state = lock(&self.state);
            state.location = ctx.location.to_string();
            state.stats = Stats::new(options.total);
            ProgressEvent::Started {
                location: state.location.clone(),
                direction: ctx.direction,
                stats: state.stats.clone(),
            }
        };
        self.publisher.publish(started);

        let state = Arc::clone(&self.state);
        let publisher = self.publisher.clone();
        let monitored = upstream.map(move |item: io::Result<Bytes>| {
            let event = {
                let mut state = lock(&state);
                match &item {
                    Ok(chunk) => {
                        state.stats.mark_progress(chunk.len() as u64);
                        ProgressEvent::Progress {
                            location: state.location.clone(),
                            stats: state.stats.clone(),
                        }
                    }
                    Err(e) => {
                        state.failed = true;
                        ProgressEvent::Failed {
                            location: state.location.clone(),
                            error: e.to_string(),
                            stats: state.stats.clone(),
                        }
                    }
                }
            };
            publisher.publish(event);
            item
        });

        // Runs once the upstream is exhausted
        let state = Arc::clone(&self.state);
        let publisher = self.publisher.clone();
        let finish = stream::once(async move {
            let event = {
                let mut state = lock(&state);
                if state.failed {
                    None
                } else {
                    state.stats.mark_finished();
                    Some(ProgressEvent::Finished {
                        location: state.location.clone(),
                        stats: state.stats.clone(),
                    })
                }
            };
            if let Some(event) = event {
                publisher.publish(event);
            }
            None::<io::Result<Bytes>>
        })
        .filter_map(future::ready);

        Ok(Box::pin(monitored.chain(finish)))
    }

    fn results(&mut self) -> Value {
        serde_json::to_value(&lock(&self.state).stats).unwrap_or(Value::Null)
    }
}
