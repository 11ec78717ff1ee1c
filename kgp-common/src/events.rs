//! Event types for the KGP event system
//!
//! Provides shared event definitions and the EventBus used to push live
//! progress to SSE clients.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// KGP event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// Status values are carried as their wire strings so this crate stays free
/// of service-specific types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KgpEvent {
    // ========================================================================
    // Content governance events
    // ========================================================================
    /// A candidate passed the admission gate and was stored
    ///
    /// Triggers:
    /// - SSE: Refresh pending / flagged queues
    ContentAdmitted {
        content_id: Uuid,
        /// "direct" or "migrated"
        origin: String,
        /// True when the record entered the quality-review lane
        flagged: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A governance or triage action changed a record
    ContentTransitioned {
        content_id: Uuid,
        old_status: String,
        new_status: String,
        /// Action name ("approve", "reject", "mark_safe", ...)
        action: String,
        actor: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    // ========================================================================
    // Migration job events
    // ========================================================================
    /// Migration job moved to in-progress
    JobStarted {
        job_id: Uuid,
        name: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Emitted after each batch
    JobProgress {
        job_id: Uuid,
        /// None until the source reports a count
        total: Option<u64>,
        processed: u64,
        succeeded: u64,
        failed: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Source exhausted without cancellation or fault
    JobCompleted {
        job_id: Uuid,
        succeeded: u64,
        failed: u64,
        duration_seconds: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Systemic fault ended the job
    JobFailed {
        job_id: Uuid,
        error_message: String,
        processed: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Cancellation settled
    JobCancelled {
        job_id: Uuid,
        processed: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl KgpEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            KgpEvent::ContentAdmitted { .. } => "ContentAdmitted",
            KgpEvent::ContentTransitioned { .. } => "ContentTransitioned",
            KgpEvent::JobStarted { .. } => "JobStarted",
            KgpEvent::JobProgress { .. } => "JobProgress",
            KgpEvent::JobCompleted { .. } => "JobCompleted",
            KgpEvent::JobFailed { .. } => "JobFailed",
            KgpEvent::JobCancelled { .. } => "JobCancelled",
        }
    }

    /// Job the event belongs to, if any
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            KgpEvent::JobStarted { job_id, .. }
            | KgpEvent::JobProgress { job_id, .. }
            | KgpEvent::JobCompleted { job_id, .. }
            | KgpEvent::JobFailed { job_id, .. }
            | KgpEvent::JobCancelled { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use kgp_common::events::{EventBus, KgpEvent};
/// use uuid::Uuid;
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(KgpEvent::JobCancelled {
///     job_id: Uuid::new_v4(),
///     processed: 0,
///     timestamp: chrono::Utc::now(),
/// });
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<KgpEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<KgpEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: KgpEvent,
    ) -> Result<usize, broadcast::error::SendError<KgpEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: KgpEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
