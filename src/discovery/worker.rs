//! One engine thread and what it reports back.

use serde::Serialize;
use std::io;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::device::DeviceSession;
use crate::engine::{BootstrapEngine, EngineExit, Outcome, Phase};
use crate::logging::now_utc_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashStatus {
    Success,
    Destroyed,
    Failed,
}

/// Result of one engine, as written to the run manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlashRecord {
    pub chip_id: String,
    pub status: FlashStatus,
    /// Last phase entered.
    pub phase: Option<Phase>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub started_at_utc: String,
    pub finished_at_utc: String,
}

impl FlashRecord {
    fn from_exit(chip_id: String, exit: EngineExit, started_at_utc: String) -> Self {
        let (status, error, error_kind) = match exit.result {
            Ok(Outcome::Completed) => (FlashStatus::Success, None, None),
            Ok(Outcome::Destroyed) => (FlashStatus::Destroyed, None, None),
            Err(err) => (
                FlashStatus::Failed,
                Some(err.to_string()),
                Some(err.kind().to_string()),
            ),
        };
        Self {
            chip_id,
            status,
            phase: exit.phase,
            error,
            error_kind,
            started_at_utc,
            finished_at_utc: now_utc_timestamp(),
        }
    }

    /// Stand-in for an engine thread that died without reporting.
    pub(crate) fn panicked(chip_id: String, started_at_utc: String) -> Self {
        Self {
            chip_id,
            status: FlashStatus::Failed,
            phase: None,
            error: Some("worker panicked".to_string()),
            error_kind: Some("panic".to_string()),
            started_at_utc,
            finished_at_utc: now_utc_timestamp(),
        }
    }
}

pub(crate) struct Worker {
    pub(crate) session: Arc<DeviceSession>,
    pub(crate) handle: JoinHandle<()>,
    pub(crate) started_at_utc: String,
}

impl Worker {
    /// Start `engine` on its own named thread. The record is sent on
    /// `reports` just before the thread exits.
    pub(crate) fn spawn(engine: BootstrapEngine, reports: Sender<FlashRecord>) -> io::Result<Self> {
        let session = Arc::clone(engine.session());
        let chip_id = session.chip_id().to_string();
        let started_at_utc = now_utc_timestamp();

        let started = started_at_utc.clone();
        let handle = thread::Builder::new()
            .name(format!("flash-{chip_id}"))
            .spawn(move || {
                let exit = engine.run();
                // The orchestrator may already be gone at shutdown.
                let _ = reports.send(FlashRecord::from_exit(chip_id, exit, started));
            })?;

        Ok(Self {
            session,
            handle,
            started_at_utc,
        })
    }
}
