//! Discovery loop: the one place that watches the bus.
//!
//! ```text
//! every poll_interval:
//!   update scan ──► addresses
//!   reap finished engines
//!   for each address not seen last poll:
//!     probe chip id ── not ready ──► try again next poll
//!       │
//!       ├── unknown chip ──► new DeviceSession + engine thread
//!       └── known chip   ──► session.mark_reconnected(address)
//!   remember this poll's addresses
//! ```
//!
//! The orchestrator owns the chip id to worker table outright. Engines never
//! touch it; they only report through a channel when they finish.

mod manifest;
mod worker;

pub use manifest::{sha256_file, RunManifest};
pub use worker::{FlashRecord, FlashStatus};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::device::{probe_chip_id, scan_bus, DeviceSession};
use crate::engine::{BootstrapEngine, EngineContext};
use crate::logging::DeviceLog;
use worker::Worker;

/// What one poll did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub spawned: usize,
    pub reconnected: usize,
    pub reaped: usize,
}

pub struct Orchestrator {
    ctx: EngineContext,
    /// Where device logs go; `None` discards them.
    devices_dir: Option<PathBuf>,
    workers: HashMap<String, Worker>,
    previous: HashSet<String>,
    reports_tx: Sender<FlashRecord>,
    reports_rx: Receiver<FlashRecord>,
    records: Vec<FlashRecord>,
}

impl Orchestrator {
    pub fn new(ctx: EngineContext, devices_dir: Option<PathBuf>) -> Self {
        let (reports_tx, reports_rx) = mpsc::channel();
        Self {
            ctx,
            devices_dir,
            workers: HashMap::new(),
            previous: HashSet::new(),
            reports_tx,
            reports_rx,
            records: Vec::new(),
        }
    }

    /// Poll until `cancel` is set. Running engines are left to finish on
    /// their own.
    pub fn run(&mut self, cancel: &AtomicBool) {
        info!("Waiting for device connect...");
        while !cancel.load(Ordering::SeqCst) {
            self.poll_once();
            self.ctx.clock.sleep(self.ctx.timing.poll_interval);
        }
        self.reap();

        let active = self.active_chip_ids();
        if !active.is_empty() {
            warn!(
                "Stopped polling with {} board(s) still flashing: {}",
                active.len(),
                active.join(", ")
            );
        }
    }

    pub fn poll_once(&mut self) -> PollSummary {
        let addresses = scan_bus(self.ctx.executor.as_ref());
        let mut summary = PollSummary {
            reaped: self.reap(),
            ..PollSummary::default()
        };

        let mut seen = HashSet::with_capacity(addresses.len());
        for address in addresses {
            if self.previous.contains(&address) {
                seen.insert(address);
                continue;
            }
            let Some(chip_id) = probe_chip_id(self.ctx.executor.as_ref(), &address) else {
                continue;
            };

            match self.workers.get(&chip_id) {
                Some(worker) => {
                    if worker.session.mark_reconnected(&address) {
                        info!("{} Reconnected", worker.session.describe());
                    } else {
                        info!("{} Seen again", worker.session.describe());
                    }
                    summary.reconnected += 1;
                }
                None => {
                    info!("New device: {address}");
                    if self.spawn(&chip_id, &address) {
                        summary.spawned += 1;
                    }
                }
            }
            seen.insert(address);
        }
        self.previous = seen;
        summary
    }

    fn spawn(&mut self, chip_id: &str, address: &str) -> bool {
        let session = Arc::new(DeviceSession::new(chip_id, address));
        let log = self.open_device_log(chip_id);
        let engine = BootstrapEngine::new(Arc::clone(&session), self.ctx.clone(), log);

        match Worker::spawn(engine, self.reports_tx.clone()) {
            Ok(worker) => {
                self.workers.insert(chip_id.to_string(), worker);
                true
            }
            Err(err) => {
                error!("{} can't start flashing thread: {err}", session.describe());
                false
            }
        }
    }

    fn open_device_log(&self, chip_id: &str) -> DeviceLog {
        let Some(dir) = &self.devices_dir else {
            return DeviceLog::sink();
        };
        DeviceLog::open(dir, chip_id).unwrap_or_else(|err| {
            warn!("[{chip_id}] device log unavailable in '{}': {err}", dir.display());
            DeviceLog::sink()
        })
    }

    /// Drop finished engines and collect their records.
    pub fn reap(&mut self) -> usize {
        let finished: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, worker)| worker.handle.is_finished())
            .map(|(chip_id, _)| chip_id.clone())
            .collect();

        for chip_id in &finished {
            let Some(worker) = self.workers.remove(chip_id) else {
                continue;
            };
            if worker.handle.join().is_err() {
                error!("{} flashing thread panicked", worker.session.describe());
                self.records
                    .push(FlashRecord::panicked(chip_id.clone(), worker.started_at_utc));
            }
        }

        self.records.extend(self.reports_rx.try_iter());
        finished.len()
    }

    /// Chip ids with a live engine, sorted.
    pub fn active_chip_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn session(&self, chip_id: &str) -> Option<Arc<DeviceSession>> {
        self.workers
            .get(chip_id)
            .map(|worker| Arc::clone(&worker.session))
    }

    /// Records of every engine reaped so far, in reaping order.
    pub fn records(&self) -> &[FlashRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingPolicy;
    use crate::device::clock::ManualClock;
    use crate::device::SystemClock;
    use crate::engine::{FlashOptions, PartScope};
    use crate::executor::mock::ScriptedExecutor;
    use crate::executor::CommandOutput;
    use crate::soc::SocFamily;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    const BUS_A: &str = "Bus 001 Device 005: ID 1b8e:c003";
    const BUS_B: &str = "Bus 001 Device 006: ID 1b8e:c003";
    const BUS_C: &str = "Bus 002 Device 003: ID 1b8e:c003";

    struct Rig {
        _temp: TempDir,
        exec: Arc<ScriptedExecutor>,
        ctx: EngineContext,
    }

    /// Boards flash one partition and, with `reset`, wait on the bus for a
    /// reconnect that the test drives.
    fn rig(reset: bool, clock: Arc<dyn crate::device::Clock>) -> Rig {
        let temp = TempDir::new().unwrap();
        let image = Arc::new(crate::image::tests::fixture(&temp));
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond(
            &format!("chipid path-{BUS_A}"),
            CommandOutput::ok("ChipID is:0x1a2b3c"),
        );
        exec.respond(
            &format!("chipid path-{BUS_B}"),
            CommandOutput::ok("ChipID is:0x1a2b3c"),
        );
        exec.respond(
            &format!("chipid path-{BUS_C}"),
            CommandOutput::ok("ChipID is:0x4d5e6f"),
        );

        let mut options = FlashOptions::new(SocFamily::Gxl, PartScope::parse("boot"));
        options.reset = reset;
        let timing = TimingPolicy {
            poll_interval: Duration::from_millis(5),
            reset_timeout: Duration::from_secs(10),
            ..TimingPolicy::default()
        };
        let ctx = EngineContext {
            image,
            options: Arc::new(options),
            timing,
            executor: exec.clone(),
            clock,
        };
        Rig {
            _temp: temp,
            exec,
            ctx,
        }
    }

    fn scans(rig: &Rig, listings: &[&[&str]]) {
        let outputs = listings
            .iter()
            .map(|addrs| CommandOutput::ok(addrs.join("\n")))
            .collect();
        rig.exec.respond_seq("update scan", outputs);
    }

    fn record(orch: &Orchestrator, chip_id: &str) -> FlashRecord {
        orch.records()
            .iter()
            .find(|r| r.chip_id == chip_id)
            .cloned()
            .unwrap()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn one_engine_per_chip_across_polls() {
        let rig = rig(true, Arc::new(SystemClock));
        scans(&rig, &[&[BUS_A], &[], &[BUS_A], &[BUS_A, BUS_C], &[BUS_A, BUS_C]]);
        let mut orch = Orchestrator::new(rig.ctx.clone(), None);

        let mut spawned = 0;
        for _ in 0..5 {
            spawned += orch.poll_once().spawned;
        }
        assert_eq!(spawned, 2);
        assert!(orch.active_chip_ids().contains(&"0x4d5e6f".to_string()));
        assert_eq!(rig.exec.calls_containing(&format!("chipid path-{BUS_A}")).len(), 2);

        // Seeing BUS_A again may already have released the first engine.
        wait_until(|| {
            for chip in orch.active_chip_ids() {
                if let Some(session) = orch.session(&chip) {
                    if session.reconnect_pending() {
                        session.mark_reconnected(BUS_B);
                    }
                }
            }
            orch.reap();
            orch.active_chip_ids().is_empty()
        });
        let mut chips: Vec<_> = orch.records().iter().map(|r| r.chip_id.as_str()).collect();
        chips.sort();
        assert_eq!(chips, ["0x1a2b3c", "0x4d5e6f"]);
    }

    #[test]
    fn reconnect_at_new_address_releases_the_same_session() {
        let rig = rig(true, Arc::new(SystemClock));
        scans(&rig, &[&[BUS_A], &[BUS_B]]);
        let mut orch = Orchestrator::new(rig.ctx.clone(), None);

        assert_eq!(orch.poll_once().spawned, 1);
        let session = orch.session("0x1a2b3c").unwrap();
        wait_until(|| session.reconnect_pending());

        let summary = orch.poll_once();
        assert_eq!(summary.spawned, 0);
        assert_eq!(summary.reconnected, 1);
        assert!(Arc::ptr_eq(&session, &orch.session("0x1a2b3c").unwrap()));
        assert_eq!(session.bus_address(), BUS_B);

        wait_until(|| {
            orch.reap();
            !orch.records().is_empty()
        });
        let record = &orch.records()[0];
        assert_eq!(record.chip_id, "0x1a2b3c");
        assert_eq!(record.status, FlashStatus::Success);
        assert_eq!(rig.exec.calls_containing("burn_complete 1").len(), 1);
    }

    #[test]
    fn unresolved_address_is_probed_again() {
        let rig = rig(false, Arc::new(ManualClock::new()));
        scans(&rig, &[&[BUS_C]]);
        rig.exec.respond_seq(
            &format!("chipid path-{BUS_C}"),
            vec![
                CommandOutput::ok("device not ready"),
                CommandOutput::ok("ChipID is:0x4d5e6f"),
            ],
        );
        let mut orch = Orchestrator::new(rig.ctx.clone(), None);

        assert_eq!(orch.poll_once().spawned, 0);
        assert_eq!(orch.poll_once().spawned, 1);
        assert_eq!(orch.poll_once().spawned, 0);
        assert_eq!(rig.exec.calls_containing("chipid").len(), 2);

        wait_until(|| {
            orch.reap();
            !orch.records().is_empty()
        });
        assert_eq!(orch.records()[0].status, FlashStatus::Success);
    }

    #[test]
    fn failed_engine_is_reaped_with_its_error() {
        let rig = rig(false, Arc::new(ManualClock::new()));
        scans(&rig, &[&[BUS_A]]);
        rig.exec
            .respond("update partition", CommandOutput::failed(1, "write error"));
        let mut orch = Orchestrator::new(rig.ctx.clone(), None);
        orch.poll_once();

        wait_until(|| {
            orch.reap();
            !orch.records().is_empty()
        });
        let record = &orch.records()[0];
        assert_eq!(record.status, FlashStatus::Failed);
        assert_eq!(record.error_kind.as_deref(), Some("command_failure"));
        assert!(orch.active_chip_ids().is_empty());
    }

    #[test]
    fn one_board_failing_leaves_others_and_discovery_running() {
        const BUS_D: &str = "Bus 003 Device 002: ID 1b8e:c003";
        let rig = rig(false, Arc::new(ManualClock::new()));
        scans(&rig, &[&[BUS_A, BUS_C], &[BUS_A, BUS_C], &[BUS_D]]);
        rig.exec.respond(
            &format!("chipid path-{BUS_D}"),
            CommandOutput::ok("ChipID is:0x7a8b9c"),
        );
        rig.exec.respond(
            &format!("partition path-{BUS_C}"),
            CommandOutput::failed(1, "write error"),
        );
        let mut orch = Orchestrator::new(rig.ctx.clone(), None);

        assert_eq!(orch.poll_once().spawned, 2);
        wait_until(|| {
            orch.reap();
            orch.records().len() == 2
        });
        let a = record(&orch, "0x1a2b3c");
        assert_eq!(a.status, FlashStatus::Success);
        assert_eq!(a.error_kind, None);
        let c = record(&orch, "0x4d5e6f");
        assert_eq!(c.status, FlashStatus::Failed);
        assert_eq!(c.error_kind.as_deref(), Some("command_failure"));
        assert_eq!(rig.exec.calls_containing(&format!("partition path-{BUS_A}")).len(), 1);

        assert_eq!(orch.poll_once().spawned, 0);
        assert_eq!(orch.poll_once().spawned, 1);
        assert_eq!(orch.active_chip_ids().len() + orch.records().len(), 3);
        wait_until(|| {
            orch.reap();
            orch.records().len() == 3
        });
        assert_eq!(record(&orch, "0x7a8b9c").status, FlashStatus::Success);
    }

    #[test]
    fn device_logs_are_opened_per_chip() {
        let rig = rig(false, Arc::new(ManualClock::new()));
        scans(&rig, &[&[BUS_A]]);
        let logs = TempDir::new().unwrap();
        let mut orch = Orchestrator::new(rig.ctx.clone(), Some(logs.path().to_path_buf()));
        orch.poll_once();
        wait_until(|| {
            orch.reap();
            !orch.records().is_empty()
        });

        let log = std::fs::read_to_string(logs.path().join("chipid_0x1a2b3c.log")).unwrap();
        assert!(log.contains("Command: update partition"));
    }

    #[test]
    fn run_stops_when_cancelled() {
        let cancel = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicUsize::new(0));
        let (flag, count) = (Arc::clone(&cancel), Arc::clone(&ticks));
        let clock = ManualClock::with_hook(move |_| {
            if count.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                flag.store(true, Ordering::SeqCst);
            }
        });
        let rig = rig(false, Arc::new(clock));
        let mut orch = Orchestrator::new(rig.ctx.clone(), None);

        orch.run(&cancel);
        assert_eq!(rig.exec.calls_containing("update scan").len(), 3);
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }
}
