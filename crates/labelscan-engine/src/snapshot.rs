// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Read-only per-stage view of a scan, published on a watch channel after
// every transition.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use labelscan_core::error::ErrorCode;
use labelscan_core::types::{ScanSession, ScanStep, SessionId, Stage};
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StageSnapshot {
    pub status: StageStatus,
    pub duration_ms: Option<u64>,
    pub confidence: Option<f32>,
    pub error_code: Option<ErrorCode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSnapshot {
    pub session_id: SessionId,
    pub step: ScanStep,
    pub progress: u8,
    pub error_code: Option<ErrorCode>,
    pub was_aborted: bool,
    pub stages: BTreeMap<Stage, StageSnapshot>,
    pub updated_at: DateTime<Utc>,
}

impl ScanSnapshot {
    pub fn idle(session: &ScanSession) -> Self {
        Self {
            session_id: session.id,
            step: session.step,
            progress: session.progress,
            error_code: session.error_code,
            was_aborted: session.was_aborted,
            stages: Stage::ALL
                .iter()
                .map(|stage| (*stage, StageSnapshot::default()))
                .collect(),
            updated_at: Utc::now(),
        }
    }

    pub fn stage(&self, stage: Stage) -> &StageSnapshot {
        // Every stage is inserted up front.
        static PENDING: StageSnapshot = StageSnapshot {
            status: StageStatus::Pending,
            duration_ms: None,
            confidence: None,
            error_code: None,
        };
        self.stages.get(&stage).unwrap_or(&PENDING)
    }
}

/// Tracks stage timings for one session and publishes snapshots.
#[derive(Debug)]
pub struct StageTracker {
    tx: watch::Sender<ScanSnapshot>,
    stages: BTreeMap<Stage, StageSnapshot>,
    started: BTreeMap<Stage, Instant>,
}

impl StageTracker {
    pub fn new(session: &ScanSession) -> Self {
        let snapshot = ScanSnapshot::idle(session);
        let stages = snapshot.stages.clone();
        let (tx, _rx) = watch::channel(snapshot);
        Self {
            tx,
            stages,
            started: BTreeMap::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanSnapshot> {
        self.tx.subscribe()
    }

    /// Forget previous timings when a new session begins.
    pub fn clear(&mut self) {
        for stage in self.stages.values_mut() {
            *stage = StageSnapshot::default();
        }
        self.started.clear();
    }

    pub fn begin(&mut self, stage: Stage) {
        self.started.insert(stage, Instant::now());
        self.stages.insert(
            stage,
            StageSnapshot {
                status: StageStatus::Running,
                ..StageSnapshot::default()
            },
        );
    }

    pub fn finish(
        &mut self,
        stage: Stage,
        status: StageStatus,
        confidence: Option<f32>,
        error_code: Option<ErrorCode>,
    ) {
        let duration_ms = self
            .started
            .remove(&stage)
            .map(|t| t.elapsed().as_millis() as u64);
        self.stages.insert(
            stage,
            StageSnapshot {
                status,
                duration_ms,
                confidence,
                error_code,
            },
        );
    }

    /// Mark whatever is still running as aborted.
    pub fn abort_running(&mut self) {
        let running: Vec<Stage> = self
            .stages
            .iter()
            .filter(|(_, s)| s.status == StageStatus::Running)
            .map(|(stage, _)| *stage)
            .collect();
        for stage in running {
            self.finish(stage, StageStatus::Aborted, None, Some(ErrorCode::Aborted));
        }
    }

    pub fn publish(&self, session: &ScanSession) {
        self.tx.send_replace(ScanSnapshot {
            session_id: session.id,
            step: session.step,
            progress: session.progress,
            error_code: session.error_code,
            was_aborted: session.was_aborted,
            stages: self.stages.clone(),
            updated_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_stage_carries_duration_and_code() {
        let session = ScanSession::new();
        let mut tracker = StageTracker::new(&session);
        let rx = tracker.subscribe();

        tracker.begin(Stage::Barcode);
        tracker.finish(
            Stage::Barcode,
            StageStatus::Failed,
            None,
            Some(ErrorCode::BarcodeTimeout),
        );
        tracker.begin(Stage::Ocr);
        tracker.publish(&session);

        let snapshot = rx.borrow().clone();
        let barcode = snapshot.stage(Stage::Barcode);
        assert_eq!(barcode.status, StageStatus::Failed);
        assert!(barcode.duration_ms.is_some());
        assert_eq!(barcode.error_code, Some(ErrorCode::BarcodeTimeout));
        assert_eq!(snapshot.stage(Stage::Ocr).status, StageStatus::Running);
        assert_eq!(snapshot.stage(Stage::Search).status, StageStatus::Pending);
    }

    #[test]
    fn abort_marks_running_stages() {
        let session = ScanSession::new();
        let mut tracker = StageTracker::new(&session);
        let rx = tracker.subscribe();
        tracker.begin(Stage::Ocr);
        tracker.abort_running();
        tracker.publish(&session);

        assert_eq!(rx.borrow().stage(Stage::Ocr).status, StageStatus::Aborted);
    }

    #[test]
    fn snapshot_serializes_stage_names() {
        let snapshot = ScanSnapshot::idle(&ScanSession::new());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["step"], "idle");
        assert_eq!(json["stages"]["manual_correction"]["status"], "pending");
    }
}
