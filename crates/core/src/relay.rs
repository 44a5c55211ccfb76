//! Per-session relay between the session handler and its recognition worker.
//!
//! One direction carries caller audio to the worker, the other carries
//! transcript events back, plus a completion flag. The channel is owned by
//! the session and handed to the worker at spawn time; nothing reaches it
//! through globals. Each queue preserves its own push order; no ordering is
//! guaranteed between the two.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// A transcript update published by the recognition worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eou_reason: Option<String>,
}

impl TranscriptEvent {
    /// The distinguished "no more transcript this turn" event.
    pub fn sentinel() -> Self {
        Self {
            text: String::new(),
            is_final: true,
            eou_reason: None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.is_final && self.text.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    audio: Mutex<VecDeque<Bytes>>,
    audio_ready: Notify,
    events: Mutex<VecDeque<TranscriptEvent>>,
    done: AtomicBool,
}

/// Cheaply clonable handle to the session's relay queues.
#[derive(Clone, Default)]
pub struct RelayChannel {
    inner: Arc<Inner>,
}

impl RelayChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a caller audio chunk for the worker.
    pub fn push_audio(&self, chunk: Bytes) {
        self.inner
            .audio
            .lock()
            .expect("relay audio lock poisoned")
            .push_back(chunk);
        self.inner.audio_ready.notify_one();
    }

    /// Dequeues the next audio chunk, waiting up to `timeout`.
    ///
    /// Returns `None` when nothing arrived within the window so the worker
    /// can poll again instead of spinning or terminating. Cancel-safe: a
    /// chunk is only removed from the queue when it is also returned.
    pub async fn pop_audio(&self, timeout: Duration) -> Option<Bytes> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(chunk) = self
                .inner
                .audio
                .lock()
                .expect("relay audio lock poisoned")
                .pop_front()
            {
                return Some(chunk);
            }
            let notified = self.inner.audio_ready.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Publishes a transcript event to the session handler.
    pub fn push_event(&self, event: TranscriptEvent) {
        self.inner
            .events
            .lock()
            .expect("relay event lock poisoned")
            .push_back(event);
    }

    /// Non-blocking poll for the next transcript event. The session handler
    /// is also servicing the caller socket, so it never parks here.
    pub fn pop_event(&self) -> Option<TranscriptEvent> {
        self.inner
            .events
            .lock()
            .expect("relay event lock poisoned")
            .pop_front()
    }

    /// Clears both queues and the completion flag.
    ///
    /// Called at the start of every turn so nothing from a prior turn leaks
    /// in. Only valid while no worker is writing.
    pub fn reset(&self) {
        self.inner
            .audio
            .lock()
            .expect("relay audio lock poisoned")
            .clear();
        self.inner
            .events
            .lock()
            .expect("relay event lock poisoned")
            .clear();
        self.inner.done.store(false, Ordering::SeqCst);
    }

    /// Marks the turn complete and publishes the sentinel event.
    ///
    /// Idempotent: whichever exit path reaches it first wins, every later
    /// call is a no-op, so the sentinel is published exactly once per turn.
    pub fn finish(&self) {
        if !self.inner.done.swap(true, Ordering::SeqCst) {
            self.push_event(TranscriptEvent::sentinel());
        }
    }

    pub fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::SeqCst)
    }
}
