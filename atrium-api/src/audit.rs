//! Best-effort audit recording.
//!
//! [`AuditRecorder::record`] never returns an error. A failed write is
//! reported through its own channel: an `error!` event, the
//! `atrium_audit_failures_total` counter and [`AuditRecorder::failures`].
//!
//! In background mode entries are handed to a writer task over a bounded
//! mpsc channel and the caller does not wait for the store at all. When the
//! queue is full the entry is dropped and counted as a failure.

use crate::telemetry::AtriumMetrics;
use atrium_core::{AuditAction, AuditLogEntry, UserId, WorkspaceId};
use atrium_storage::AuditLogStore;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// Entries the background writer may have queued at once.
pub const DEFAULT_AUDIT_QUEUE_CAPACITY: usize = 1024;

enum WriterMessage {
    Entry(AuditLogEntry),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
enum Mode {
    Inline,
    Background(mpsc::Sender<WriterMessage>),
}

struct Sink {
    store: Arc<dyn AuditLogStore>,
    metrics: AtriumMetrics,
    failures: AtomicU64,
}

impl Sink {
    async fn write(&self, entry: &AuditLogEntry) {
        if let Err(e) = self.store.audit_append(entry).await {
            self.fail(entry, &e.to_string());
        } else {
            debug!(
                workspace_id = %entry.workspace_id,
                action = %entry.action,
                resource_id = %entry.resource_id,
                "Audit entry recorded"
            );
        }
    }

    fn fail(&self, entry: &AuditLogEntry, reason: &str) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_audit_failure();
        error!(
            workspace_id = %entry.workspace_id,
            user_id = %entry.user_id,
            action = %entry.action,
            resource_id = %entry.resource_id,
            error = %reason,
            "Failed to record audit entry"
        );
    }
}

/// Fire-and-forget front of the audit store.
#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<Sink>,
    mode: Mode,
}

impl AuditRecorder {
    /// Write each entry before `record` returns.
    pub fn inline(store: Arc<dyn AuditLogStore>, metrics: AtriumMetrics) -> Self {
        Self {
            sink: Arc::new(Sink {
                store,
                metrics,
                failures: AtomicU64::new(0),
            }),
            mode: Mode::Inline,
        }
    }

    /// Queue entries for a writer task spawned on the current runtime.
    ///
    /// At most `capacity` entries wait at a time. The writer stops once every
    /// clone of the recorder is dropped and the queue is drained.
    pub fn background(
        store: Arc<dyn AuditLogStore>,
        metrics: AtriumMetrics,
        capacity: usize,
    ) -> Self {
        let sink = Arc::new(Sink {
            store,
            metrics,
            failures: AtomicU64::new(0),
        });
        let (tx, mut rx) = mpsc::channel::<WriterMessage>(capacity.max(1));
        let writer = sink.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    WriterMessage::Entry(entry) => writer.write(&entry).await,
                    WriterMessage::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Audit writer stopped");
        });
        Self {
            sink,
            mode: Mode::Background(tx),
        }
    }

    /// Record one action. Never fails.
    pub async fn record(
        &self,
        workspace_id: WorkspaceId,
        user_id: &UserId,
        action: AuditAction,
        resource_id: impl Into<String>,
        changes: Value,
    ) {
        let entry = AuditLogEntry::new(workspace_id, user_id.clone(), action, resource_id, changes);
        match &self.mode {
            Mode::Inline => self.sink.write(&entry).await,
            Mode::Background(tx) => match tx.try_send(WriterMessage::Entry(entry)) {
                Ok(()) => {}
                Err(TrySendError::Full(WriterMessage::Entry(entry))) => {
                    self.sink.fail(&entry, "audit queue is full");
                }
                Err(TrySendError::Closed(WriterMessage::Entry(entry))) => {
                    self.sink.fail(&entry, "audit writer is not running");
                }
                Err(_) => {}
            },
        }
    }

    /// Wait until every entry queued before this call has been written.
    ///
    /// Returns immediately in inline mode.
    pub async fn flush(&self) {
        if let Mode::Background(tx) = &self.mode {
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(WriterMessage::Flush(done_tx)).await.is_ok() {
                let _ = done_rx.await;
            }
        }
    }

    /// Number of entries that could not be written.
    pub fn failures(&self) -> u64 {
        self.sink.failures.load(Ordering::Relaxed)
    }

    pub fn is_background(&self) -> bool {
        matches!(self.mode, Mode::Background(_))
    }
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder")
            .field("background", &self.is_background())
            .field("failures", &self.failures())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::{AuditLogFilter, EntityIdType};
    use atrium_test_utils::{FailingAuditStore, InMemoryStore};
    use serde_json::json;

    fn metrics() -> AtriumMetrics {
        match AtriumMetrics::unregistered() {
            Ok(metrics) => metrics,
            Err(e) => panic!("metrics: {}", e.message),
        }
    }

    #[tokio::test]
    async fn test_inline_record_persists() -> atrium_core::AtriumResult<()> {
        let store = Arc::new(InMemoryStore::new());
        let recorder = AuditRecorder::inline(store.clone(), metrics());
        let ws = WorkspaceId::now_v7();
        recorder
            .record(
                ws,
                &UserId::new("u"),
                AuditAction::WorkspaceCreated,
                ws.to_string(),
                json!({"name": "Acme"}),
            )
            .await;

        let (entries, total) = store.audit_list(&AuditLogFilter::for_workspace(ws)).await?;
        assert_eq!(total, 1);
        assert_eq!(entries[0].changes["name"], "Acme");
        assert_eq!(recorder.failures(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_inline_failure_is_counted_not_returned() {
        let store = Arc::new(FailingAuditStore::failing());
        let metrics = metrics();
        let recorder = AuditRecorder::inline(store.clone(), metrics.clone());
        recorder
            .record(
                WorkspaceId::now_v7(),
                &UserId::new("u"),
                AuditAction::ProjectCreated,
                "p",
                json!({}),
            )
            .await;
        assert_eq!(recorder.failures(), 1);
        assert_eq!(metrics.audit_failures(), 1);
        assert_eq!(store.attempts(), 1);
    }

    #[tokio::test]
    async fn test_background_flush_waits_for_writes() {
        let store = Arc::new(FailingAuditStore::default());
        let recorder =
            AuditRecorder::background(store.clone(), metrics(), DEFAULT_AUDIT_QUEUE_CAPACITY);
        assert!(recorder.is_background());
        for n in 0..5 {
            recorder
                .record(
                    WorkspaceId::now_v7(),
                    &UserId::new("u"),
                    AuditAction::MemberAdded,
                    format!("m{}", n),
                    json!({}),
                )
                .await;
        }
        recorder.flush().await;
        assert_eq!(store.attempts(), 5);
        assert_eq!(store.inner().audit_len().await, 5);
    }

    #[tokio::test]
    async fn test_background_failures_are_counted() {
        let store = Arc::new(FailingAuditStore::failing());
        let recorder = AuditRecorder::background(store, metrics(), DEFAULT_AUDIT_QUEUE_CAPACITY);
        recorder
            .record(
                WorkspaceId::now_v7(),
                &UserId::new("u"),
                AuditAction::MemberRemoved,
                "m",
                json!({}),
            )
            .await;
        recorder.flush().await;
        assert_eq!(recorder.failures(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let store = Arc::new(FailingAuditStore::default());
        let metrics = metrics();
        let recorder = AuditRecorder::background(store.clone(), metrics.clone(), 2);
        // The writer task cannot run until this task yields, so the queue
        // fills after two entries.
        for n in 0..5 {
            recorder
                .record(
                    WorkspaceId::now_v7(),
                    &UserId::new("u"),
                    AuditAction::ProjectUpdated,
                    format!("p{}", n),
                    json!({}),
                )
                .await;
        }
        assert_eq!(recorder.failures(), 3);
        assert_eq!(metrics.audit_failures(), 3);

        recorder.flush().await;
        assert_eq!(store.attempts(), 2);
        assert_eq!(store.inner().audit_len().await, 2);
        assert_eq!(recorder.failures(), 3);
    }
}
