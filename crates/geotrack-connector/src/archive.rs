//! # Archive Connector
//!
//! Appends every entity position to the position archive. Notifications
//! arrive on the publisher's task, so records are handed to a writer task
//! over a channel and written there in batches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use geotrack_domain::{EntityEvent, NotificationKind, SimulatorEvent};
use geotrack_persistence::{PositionRecord, SharedPositionRepository};
use geotrack_simulator::Vehicle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{Span, debug, info, warn};
use uuid::Uuid;

use crate::connector::{Attachments, Connector};
use crate::error::Result;

/// Upper bound on records written in one transaction.
const MAX_BATCH: usize = 256;

struct Inner {
    id: String,
    repository: SharedPositionRepository,
    sender: Mutex<Option<UnboundedSender<PositionRecord>>>,
    written: AtomicU64,
    errors: AtomicU64,
    dropped: AtomicU64,
    span: Span,
}

/// Connector that persists positions instead of sending them anywhere.
///
/// A failed write is logged and counted, never retried.
pub struct ArchiveConnector {
    inner: Arc<Inner>,
    writer: Mutex<Option<JoinHandle<()>>>,
    attachments: Attachments,
}

impl std::fmt::Debug for ArchiveConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveConnector")
            .field("id", &self.inner.id)
            .field("written", &self.written())
            .field("errors", &self.errors())
            .finish_non_exhaustive()
    }
}

impl ArchiveConnector {
    pub fn new(id: impl Into<String>, repository: SharedPositionRepository) -> Self {
        let id = id.into();
        let span = tracing::info_span!(
            "connector",
            component = "ArchiveConnector",
            connector_id = %id
        );
        Self {
            inner: Arc::new(Inner {
                id,
                repository,
                sender: Mutex::new(None),
                written: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                span,
            }),
            writer: Mutex::new(None),
            attachments: Attachments::new(),
        }
    }

    pub fn repository(&self) -> &SharedPositionRepository {
        &self.inner.repository
    }

    /// Records written successfully.
    pub fn written(&self) -> u64 {
        self.inner.written.load(Ordering::Relaxed)
    }

    /// Records whose write failed.
    pub fn errors(&self) -> u64 {
        self.inner.errors.load(Ordering::Relaxed)
    }

    /// Positions that arrived while the connector was not connected.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn writer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ArchiveConnector {
    fn drop(&mut self) {
        self.inner.sender().take();
    }
}

#[async_trait]
impl Connector for ArchiveConnector {
    fn id(&self) -> &str {
        &self.inner.id
    }

    async fn connect(&self) -> Result<()> {
        let mut writer = self.writer();
        if writer.as_ref().is_some_and(|w| !w.is_finished()) {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *writer = Some(tokio::spawn(Arc::clone(&self.inner).write_loop(rx)));
        *self.inner.sender() = Some(tx);
        drop(writer);

        info!(parent: &self.inner.span, "Archive writer started");
        Ok(())
    }

    /// Stop accepting positions and wait for queued ones to be written.
    async fn disconnect(&self) -> Result<()> {
        self.inner.sender().take();
        let writer = self.writer().take();
        if let Some(writer) = writer {
            if let Err(err) = writer.await {
                warn!(parent: &self.inner.span, error = %err, "Archive writer ended abnormally");
            }
        }
        info!(
            parent: &self.inner.span,
            written = self.written(),
            errors = self.errors(),
            "Archive writer stopped"
        );
        Ok(())
    }

    fn attach(&self, vehicle: &Vehicle) -> bool {
        let weak = Arc::downgrade(&self.inner);
        let attached = self.attachments.insert_with(vehicle.id(), || {
            vec![vehicle.events().subscribe(NotificationKind::Position, move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.forward(event);
                }
            })]
        });
        if attached {
            info!(parent: &self.inner.span, entity_id = %vehicle.id(), "Attached entity");
        }
        attached
    }

    fn detach(&self, entity_id: Uuid) -> bool {
        let detached = self.attachments.remove(entity_id);
        if detached {
            info!(parent: &self.inner.span, entity_id = %entity_id, "Detached entity");
        }
        detached
    }

    fn attached(&self) -> Vec<Uuid> {
        self.attachments.ids()
    }
}

impl Inner {
    fn sender(&self) -> MutexGuard<'_, Option<UnboundedSender<PositionRecord>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forward(&self, event: &EntityEvent) {
        let SimulatorEvent::Position(position) = &event.event else {
            return;
        };
        let record = PositionRecord::from_timed(event.entity_id, position);

        let queued = self
            .sender()
            .as_ref()
            .is_some_and(|tx| tx.send(record).is_ok());
        if !queued {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                parent: &self.span,
                entity_id = %event.entity_id,
                "Archive not connected, position not stored"
            );
        }
    }

    async fn write_loop(self: Arc<Self>, mut rx: UnboundedReceiver<PositionRecord>) {
        let mut batch = Vec::with_capacity(MAX_BATCH);
        while let Some(record) = rx.recv().await {
            batch.push(record);
            while batch.len() < MAX_BATCH {
                match rx.try_recv() {
                    Ok(record) => batch.push(record),
                    Err(_) => break,
                }
            }
            self.write(&batch).await;
            batch.clear();
        }
        debug!(parent: &self.span, "Archive channel closed");
    }

    async fn write(&self, batch: &[PositionRecord]) {
        let result = match batch {
            [record] => self.repository.insert(record).await.map(|()| 1),
            _ => self.repository.insert_batch(batch).await,
        };
        match result {
            Ok(n) => {
                self.written.fetch_add(n as u64, Ordering::Relaxed);
            }
            Err(err) => {
                self.errors.fetch_add(batch.len() as u64, Ordering::Relaxed);
                for record in batch {
                    warn!(
                        parent: &self.span,
                        entity_id = %record.entity_id,
                        timestamp_ms = record.timestamp_ms,
                        error = %err,
                        "Failed to archive position"
                    );
                }
            }
        }
    }
}
