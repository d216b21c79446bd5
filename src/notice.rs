//! Structured notices published after every committed change.
//!
//! Notification delivery (chat, email) lives outside the core. Delivery
//! services subscribe to the notice stream; the core never waits on them and
//! a send with no subscribers is not an error. Notices are only published
//! once the transaction that caused them has committed.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::model::{BatchId, EventId, FateId, LaborId, QuestId};

/// A structured notice emitted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: NoticeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoticeKind {
    EventsRecorded {
        batch_id: Option<BatchId>,
        event_ids: Vec<EventId>,
    },
    LaborsOpened {
        labor_ids: Vec<LaborId>,
    },
    LaborsCompleted {
        labor_ids: Vec<LaborId>,
    },
    LaborAcknowledged {
        labor_id: LaborId,
        user: String,
    },
    FateCreated {
        fate_id: FateId,
    },
    QuestEmbarked {
        quest_id: QuestId,
        creator: String,
        labors: usize,
    },
    QuestCompleted {
        quest_id: QuestId,
        creator: String,
        /// Human-readable summary for the delivery collaborator.
        summary: String,
    },
}

/// Publisher side of the notice stream.
#[derive(Debug)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
    seq: AtomicU64,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            seq: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// Publish a notice. Returns its sequence number.
    pub fn publish(&self, kind: NoticeKind) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let notice = Notice {
            seq,
            timestamp: Utc::now(),
            kind,
        };
        // Sending with no receivers is not an error.
        if self.tx.send(notice).is_err() {
            trace!(seq, "notice dropped, no subscribers");
        }
        seq
    }

    pub fn publish_all(&self, kinds: impl IntoIterator<Item = NoticeKind>) {
        for kind in kinds {
            self.publish(kind);
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(1024)
    }
}
