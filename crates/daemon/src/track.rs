//! Projection tracks: the consumer side of a fetcher
//!
//! A fetcher drives a [`ProjectionTrack`]: it queues pages in ascending
//! sequence order and, under a one-shot lifecycle, reports the final
//! checkpoint through [`finished`](ProjectionTrack::finished). The track owns
//! the durable checkpoint; the fetcher only reads it when starting.
//!
//! [`QueuedTrack`] is the channel-backed implementation. Pages go into an
//! unbounded queue so that queueing never suspends the polling loop; the
//! [`TrackReceiver`] half applies them and commits checkpoints, optionally
//! through a [`ProgressionStore`].

use cadence_core::{Error, EventPage, Result};
use cadence_storage::ProgressionStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Consumer driven by a fetcher
pub trait ProjectionTrack: Send + Sync {
    /// Projection name, used in notifications
    fn name(&self) -> &str;

    /// Last sequence fully and contiguously processed
    fn last_encountered(&self) -> u64;

    /// Accept the next page
    ///
    /// Must not block: the polling loop calls this between fetches.
    fn queue_page(&self, page: EventPage) -> Result<()>;

    /// A one-shot run reached the tail at `sequence`
    fn finished(&self, sequence: u64) -> Result<()>;
}

/// Item delivered to a [`TrackReceiver`]
#[derive(Debug, Clone, PartialEq)]
pub enum TrackMessage {
    /// The next page in sequence order
    Page(EventPage),
    /// The one-shot run ended at this checkpoint
    Finished(u64),
}

/// Channel-backed projection track
#[derive(Debug)]
pub struct QueuedTrack {
    name: String,
    checkpoint: Arc<AtomicU64>,
    sender: mpsc::UnboundedSender<TrackMessage>,
}

impl QueuedTrack {
    /// Create a track starting from `checkpoint`
    pub fn new(name: impl Into<String>, checkpoint: u64) -> (Arc<Self>, TrackReceiver) {
        let name = name.into();
        let checkpoint = Arc::new(AtomicU64::new(checkpoint));
        let (sender, receiver) = mpsc::unbounded_channel();

        let track = Arc::new(Self {
            name: name.clone(),
            checkpoint: Arc::clone(&checkpoint),
            sender,
        });
        let receiver = TrackReceiver {
            name,
            checkpoint,
            receiver,
            progression: None,
        };
        (track, receiver)
    }

    /// Create a track resuming from the checkpoint recorded in `store`
    ///
    /// Commits on the returned receiver are persisted to the same store.
    pub async fn resume(
        name: impl Into<String>,
        store: Arc<dyn ProgressionStore>,
    ) -> Result<(Arc<Self>, TrackReceiver)> {
        let name = name.into();
        let checkpoint = store.load_progress(&name).await?.unwrap_or(0);
        debug!(projection = %name, checkpoint, "resuming track");

        let (track, mut receiver) = Self::new(name, checkpoint);
        receiver.progression = Some(store);
        Ok((track, receiver))
    }

    fn send(&self, message: TrackMessage) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| Error::Internal(format!("track '{}' receiver was dropped", self.name)))
    }
}

impl ProjectionTrack for QueuedTrack {
    fn name(&self) -> &str {
        &self.name
    }

    fn last_encountered(&self) -> u64 {
        self.checkpoint.load(Ordering::SeqCst)
    }

    fn queue_page(&self, page: EventPage) -> Result<()> {
        self.send(TrackMessage::Page(page))
    }

    fn finished(&self, sequence: u64) -> Result<()> {
        self.send(TrackMessage::Finished(sequence))
    }
}

/// Receiving half of a [`QueuedTrack`]
pub struct TrackReceiver {
    name: String,
    checkpoint: Arc<AtomicU64>,
    receiver: mpsc::UnboundedReceiver<TrackMessage>,
    progression: Option<Arc<dyn ProgressionStore>>,
}

impl TrackReceiver {
    /// Next message, or `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<TrackMessage> {
        self.receiver.recv().await
    }

    /// Next message if one is already queued
    pub fn try_recv(&mut self) -> Option<TrackMessage> {
        self.receiver.try_recv().ok()
    }

    /// Record `sequence` as processed
    ///
    /// The checkpoint never moves backwards.
    pub async fn commit(&mut self, sequence: u64) -> Result<()> {
        let previous = self.checkpoint.fetch_max(sequence, Ordering::SeqCst);
        if sequence <= previous {
            return Ok(());
        }
        if let Some(store) = &self.progression {
            store.mark_progress(&self.name, sequence).await?;
        }
        Ok(())
    }

    /// Last committed checkpoint
    pub fn checkpoint(&self) -> u64 {
        self.checkpoint.load(Ordering::SeqCst)
    }

    /// Projection name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for TrackReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackReceiver")
            .field("name", &self.name)
            .field("checkpoint", &self.checkpoint())
            .finish()
    }
}
