//! Worker loop and per-record processing.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, mpsc};

use super::{BatchStats, RecordOrchestrator};
use crate::error::Result;
use crate::staging::{CommitReport, StagingArea, StagingState};
use crate::types::{Event, Record, RecordId, RecordStatus};

/// Exclusive claim on a record id, released on drop
pub(super) struct InFlight {
    set: Arc<std::sync::Mutex<HashSet<RecordId>>>,
    id: RecordId,
}

impl InFlight {
    /// Claim `id`, or `None` if another worker already holds it.
    pub(super) fn claim(
        set: &Arc<std::sync::Mutex<HashSet<RecordId>>>,
        id: &RecordId,
    ) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone());
        inserted.then(|| Self {
            set: Arc::clone(set),
            id: id.clone(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl RecordOrchestrator {
    /// Spawn one worker pulling records from the shared queue until it is
    /// closed or shutdown is requested.
    pub(super) fn spawn_worker(
        &self,
        worker_id: usize,
        queue: Arc<Mutex<mpsc::Receiver<Record>>>,
        stats: Arc<BatchStats>,
    ) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.clone();

        tokio::spawn(async move {
            loop {
                if orchestrator.shutdown.is_cancelled() {
                    break;
                }

                // Claim the next record; only one worker waits on the receiver at a time
                let record = {
                    let mut queue = queue.lock().await;
                    tokio::select! {
                        biased;
                        _ = orchestrator.shutdown.cancelled() => None,
                        record = queue.recv() => record,
                    }
                };

                let Some(record) = record else {
                    break;
                };
                let status = orchestrator.process(record).await;
                stats.record(status);
            }
            tracing::debug!(worker_id, "record worker stopped");
        })
    }

    /// Take one record to a terminal status.
    ///
    /// Already-committed records are skipped, and so is a record whose id
    /// another worker is processing. Failures are logged and leave the
    /// record's staging area in place for the next run.
    pub async fn process(&self, record: Record) -> RecordStatus {
        let id = record.conversation_hash.clone();

        if !id.is_path_safe() {
            tracing::error!(record_id = %id, "record id is not a valid file name");
            self.emit(Event::RecordFailed {
                id,
                error: "record id is not a valid file name".to_string(),
            });
            return RecordStatus::Failed;
        }

        // Held until the record is committed or failed, so a duplicate id
        // never reclaims a staging area that is still being written
        let Some(_claim) = InFlight::claim(&self.in_flight, &id) else {
            tracing::warn!(record_id = %id, "duplicate record id already in flight, skipping");
            self.emit(Event::RecordSkipped { id });
            return RecordStatus::Skipped;
        };

        if self.committer.is_committed(&id).await {
            tracing::debug!(record_id = %id, "already committed, skipping");
            self.emit(Event::RecordSkipped { id });
            return RecordStatus::Skipped;
        }

        tracing::info!(record_id = %id, "processing record");
        self.emit(Event::RecordStarted { id: id.clone() });

        match self.stage_and_commit(record).await {
            Ok(report) => {
                self.emit(Event::RecordCommitted {
                    id,
                    artifacts: report.relocated.len(),
                });
                RecordStatus::Committed
            }
            Err(e) => {
                tracing::error!(record_id = %id, error = %e, "record failed, staging left for retry");
                self.emit(Event::RecordFailed {
                    id,
                    error: e.to_string(),
                });
                RecordStatus::Failed
            }
        }
    }

    async fn stage_and_commit(&self, record: Record) -> Result<CommitReport> {
        let (area, state) =
            StagingArea::open(&self.config.staging_dir, &record.conversation_hash).await?;

        match state {
            StagingState::Fresh => {
                self.pipeline.run(&area, record).await?;
            }
            StagingState::ReadyToCommit => {
                tracing::info!(record_id = %area.id(), "resuming interrupted commit");
            }
        }

        Ok(self.committer.commit(area).await?)
    }
}
