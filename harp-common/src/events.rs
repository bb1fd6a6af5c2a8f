//! Event types for the harp event system
//!
//! Provides the shared event definitions and the EventBus the controller
//! publishes on. Events are serializable so subscribers can log or forward
//! them as JSON.

use crate::config::Channel;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Harp event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HarpEvent {
    /// Controller initialized and the ready screen is shown
    Ready {
        note_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A beam was blocked and its note was queued for playback
    NoteTriggered {
        receiver_channel: Channel,
        symbol: String,
        frequency: f64,
        /// 1-based position of the beam in the note list
        index: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A blocked beam became clear again (no audio side effect)
    BeamRestored {
        receiver_channel: Channel,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The most recent notes formed the target sequence
    SequenceMatched {
        /// Number of matches since startup, including this one
        occurrence: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A scan cycle failed
    ScanFailed {
        error: String,
        consecutive_failures: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Controller released all hardware
    ShutdownComplete {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl HarpEvent {
    /// Short event name for log lines
    pub fn name(&self) -> &'static str {
        match self {
            HarpEvent::Ready { .. } => "Ready",
            HarpEvent::NoteTriggered { .. } => "NoteTriggered",
            HarpEvent::BeamRestored { .. } => "BeamRestored",
            HarpEvent::SequenceMatched { .. } => "SequenceMatched",
            HarpEvent::ScanFailed { .. } => "ScanFailed",
            HarpEvent::ShutdownComplete { .. } => "ShutdownComplete",
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers never stall the scan loop)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HarpEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<HarpEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: HarpEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
