//! Evolution recorder: persists every step and the scheduled snapshots.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::EvolutionConfig;
use crate::error::CoreResult;
use crate::events::{StepEvent, StepListener};
use crate::repository::EvolutionStore;
use crate::session::{EvolutionStep, SessionId, SnapshotKey};

/// Step listener writing history and snapshots to an [`EvolutionStore`].
///
/// A step carries a snapshot key when one is due; the recorder writes the
/// buffer under that key and then prunes the session down to
/// `max_snapshots`, oldest first. Failures are logged, never propagated.
pub struct EvolutionRecorder {
    store: Arc<dyn EvolutionStore>,
    config: EvolutionConfig,
}

impl EvolutionRecorder {
    pub fn new(store: Arc<dyn EvolutionStore>, config: EvolutionConfig) -> Self {
        Self { store, config }
    }

    /// Recorded steps of a session, in order.
    pub async fn history(&self, session_id: SessionId) -> CoreResult<Vec<EvolutionStep>> {
        self.store.load_history(session_id).await
    }

    /// Code buffer stored for `(session_id, iteration)`.
    pub async fn snapshot(&self, session_id: SessionId, iteration: u32) -> CoreResult<String> {
        self.store
            .read_snapshot(SnapshotKey {
                session_id,
                iteration,
            })
            .await
    }

    /// Iterations with a retained snapshot.
    pub async fn snapshots(&self, session_id: SessionId) -> CoreResult<Vec<u32>> {
        self.store.list_snapshots(session_id).await
    }

    async fn write_snapshot(&self, key: SnapshotKey, code: &str) -> CoreResult<()> {
        self.store.write_snapshot(key, code).await?;

        let retained = self.store.list_snapshots(key.session_id).await?;
        let excess = retained.len().saturating_sub(self.config.max_snapshots);
        for iteration in retained.into_iter().take(excess) {
            debug!(session_id = %key.session_id, iteration, "Pruning snapshot");
            self.store
                .remove_snapshot(SnapshotKey {
                    session_id: key.session_id,
                    iteration,
                })
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StepListener for EvolutionRecorder {
    async fn on_step(&self, event: &StepEvent) {
        let iteration = event.step.iteration;
        if let Err(e) = self.store.append_step(event.session_id, &event.step).await {
            warn!(session_id = %event.session_id, iteration, error = %e, "Failed to append evolution step");
        }

        if let Some(key) = event.step.snapshot {
            if let Err(e) = self.write_snapshot(key, &event.code).await {
                warn!(session_id = %event.session_id, iteration, error = %e, "Snapshot write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEvolutionStore;
    use crate::models::ConsensusDecision;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(session_id: SessionId, iteration: u32, snapshot: bool) -> StepEvent {
        StepEvent {
            session_id,
            step: EvolutionStep {
                iteration,
                applied: None,
                decision: ConsensusDecision::empty(),
                timestamp: Utc::now(),
                snapshot: snapshot.then_some(SnapshotKey {
                    session_id,
                    iteration,
                }),
                candidates: 0,
                agent_failures: Vec::new(),
                rejections: Vec::new(),
            },
            code: format!("code at {}", iteration),
        }
    }

    #[tokio::test]
    async fn test_records_history_and_due_snapshots() {
        let store = Arc::new(MemoryEvolutionStore::new());
        let recorder = EvolutionRecorder::new(store.clone(), EvolutionConfig::default());
        let id = Uuid::new_v4();

        recorder.on_step(&event(id, 0, true)).await;
        recorder.on_step(&event(id, 1, false)).await;

        let history = recorder.history(id).await.unwrap();
        assert_eq!(history.iter().map(|s| s.iteration).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(recorder.snapshot(id, 0).await.unwrap(), "code at 0");
        assert!(recorder.snapshot(id, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_prunes_oldest_snapshots() {
        let store = Arc::new(MemoryEvolutionStore::new());
        let config = EvolutionConfig {
            max_snapshots: 2,
            ..Default::default()
        };
        let recorder = EvolutionRecorder::new(store, config);
        let id = Uuid::new_v4();

        for iteration in 0..4 {
            recorder.on_step(&event(id, iteration, true)).await;
        }
        assert_eq!(recorder.snapshots(id).await.unwrap(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_not_fatal() {
        let store = Arc::new(MemoryEvolutionStore::new());
        let recorder = EvolutionRecorder::new(store, EvolutionConfig::default());
        let id = Uuid::new_v4();

        recorder.on_step(&event(id, 0, true)).await;
        // duplicate key: the snapshot write fails but the step is still appended
        recorder.on_step(&event(id, 0, true)).await;

        assert_eq!(recorder.history(id).await.unwrap().len(), 2);
        assert_eq!(recorder.snapshot(id, 0).await.unwrap(), "code at 0");
    }
}
