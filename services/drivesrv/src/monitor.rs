//! Busy-monitor scheduler
//!
//! One background thread polls every tracked controller. Each tick adds
//! `tick / step_period` to a controller's accumulator; once the accumulator
//! passes the controller's threshold the motor is polled, and when it has
//! stopped the controller's busy-dependent processes are released and the
//! entry is dropped.
//!
//! Lock order: the entry list lock is held only while the list is copied or
//! mutated, never across a bus round-trip. A tick polls from a snapshot and
//! then retires entries by sequence number, so an entry re-added while the
//! tick was polling survives.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use errors::{DriveError, DriveResult};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::controller::{ControllerId, StepperController};

pub const DEFAULT_TICK_MS: u64 = 1;

#[derive(Clone)]
struct MonitorEntry {
    /// Unique per add; distinguishes a re-added controller from its old entry
    seq: u64,
    id: ControllerId,
    label: String,
    controller: Weak<dyn StepperController>,
    step_period_us: u32,
}

struct MonitorShared {
    tick: Duration,
    entries: Mutex<Vec<MonitorEntry>>,
    next_seq: AtomicU64,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
    ticks: AtomicU64,
    released: AtomicU64,
    poll_failures: AtomicU64,
    last_tick: Mutex<Option<DateTime<Utc>>>,
}

/// Snapshot of the scheduler for status output
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub tick_ms: u64,
    pub tracked: Vec<ControllerId>,
    pub ticks: u64,
    pub released: u64,
    pub poll_failures: u64,
    pub last_tick: Option<DateTime<Utc>>,
}

/// Cloneable handle to the scheduler; all clones share one entry list
#[derive(Clone)]
pub struct BusyMonitor {
    shared: Arc<MonitorShared>,
}

impl BusyMonitor {
    pub fn new(tick: Duration) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                tick: tick.max(Duration::from_millis(1)),
                entries: Mutex::new(Vec::new()),
                next_seq: AtomicU64::new(1),
                running: AtomicBool::new(false),
                thread: Mutex::new(None),
                ticks: AtomicU64::new(0),
                released: AtomicU64::new(0),
                poll_failures: AtomicU64::new(0),
                last_tick: Mutex::new(None),
            }),
        }
    }

    pub fn tick(&self) -> Duration {
        self.shared.tick
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the polling thread; a second start is a no-op
    pub fn start(&self) -> DriveResult<()> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Busy monitor already running");
            return Ok(());
        }

        let monitor = self.clone();
        let handle = std::thread::Builder::new()
            .name("busy-monitor".to_string())
            .spawn(move || monitor.run())
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                DriveError::Internal(format!("failed to spawn busy monitor: {e}"))
            })?;
        *self.shared.thread.lock() = Some(handle);
        info!("Busy monitor started (tick {:?})", self.shared.tick);
        Ok(())
    }

    /// Stop the polling thread and wait for it; takes up to one tick
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        let handle = self.shared.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Busy monitor thread panicked");
            }
            info!("Busy monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn run(&self) {
        while self.is_running() {
            std::thread::sleep(self.shared.tick);
            if !self.is_running() {
                break;
            }
            self.tick_once();
        }
    }

    // ========================================================================
    // Entries
    // ========================================================================

    /// Track `controller` until its motor stops; restarts its accumulator
    pub fn add_controller(&self, controller: &Arc<dyn StepperController>) -> DriveResult<()> {
        let core = controller.core();
        let mut entries = self.shared.entries.lock();
        if entries.iter().any(|entry| entry.id == core.id()) {
            return Err(DriveError::AlreadyMonitored(core.label()));
        }
        core.restart_monitor_time();
        entries.push(MonitorEntry {
            seq: self.shared.next_seq.fetch_add(1, Ordering::Relaxed),
            id: core.id(),
            label: core.label(),
            controller: Arc::downgrade(controller),
            step_period_us: core.step_period_us(),
        });
        debug!("Monitoring {} ({} tracked)", core.label(), entries.len());
        Ok(())
    }

    pub fn remove_controller(&self, controller: &dyn StepperController) -> DriveResult<()> {
        self.remove_id(controller.id())
    }

    pub fn remove_id(&self, id: ControllerId) -> DriveResult<()> {
        let mut entries = self.shared.entries.lock();
        let pos = entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or_else(|| DriveError::NotMonitored(format!("controller #{id}")))?;
        let entry = entries.remove(pos);
        debug!("Stopped monitoring {}", entry.label);
        Ok(())
    }

    pub fn contains(&self, id: ControllerId) -> bool {
        self.shared.entries.lock().iter().any(|entry| entry.id == id)
    }

    pub fn list_size(&self) -> usize {
        self.shared.entries.lock().len()
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Run one loop body: advance every entry and release stopped motors
    pub fn tick_once(&self) {
        let tick_us = self.shared.tick.as_micros() as f64;
        let snapshot: Vec<MonitorEntry> = self.shared.entries.lock().clone();

        let mut finished: Vec<u64> = Vec::new();
        for entry in &snapshot {
            let Some(controller) = entry.controller.upgrade() else {
                warn!("{} dropped while monitored, entry discarded", entry.label);
                finished.push(entry.seq);
                continue;
            };
            if !self.poll_entry(entry, controller.as_ref(), tick_us) {
                finished.push(entry.seq);
            }
        }

        if !finished.is_empty() {
            self.shared
                .entries
                .lock()
                .retain(|entry| !finished.contains(&entry.seq));
        }

        self.shared.ticks.fetch_add(1, Ordering::Relaxed);
        *self.shared.last_tick.lock() = Some(Utc::now());
    }

    /// Returns false once the entry's controller has been released
    fn poll_entry(&self, entry: &MonitorEntry, controller: &dyn StepperController, tick_us: f64) -> bool {
        let core = controller.core();
        let periods = tick_us / f64::from(entry.step_period_us.max(1));
        if !core.advance_monitor_time(periods) {
            return true;
        }

        match controller.is_motor_busy() {
            Ok(true) => true,
            Ok(false) => match controller.permit_busy_dependent_processes() {
                Ok(()) => {
                    core.restart_monitor_time();
                    self.shared.released.fetch_add(1, Ordering::Relaxed);
                    debug!("{} stopped, write permitted", entry.label);
                    false
                },
                Err(e) => {
                    self.shared.poll_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("{} release failed, retrying next tick: {}", entry.label, e);
                    true
                },
            },
            Err(e) => {
                self.shared.poll_failures.fetch_add(1, Ordering::Relaxed);
                warn!("{} busy poll failed: {}", entry.label, e);
                true
            },
        }
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            running: self.is_running(),
            tick_ms: self.shared.tick.as_millis() as u64,
            tracked: self.shared.entries.lock().iter().map(|entry| entry.id).collect(),
            ticks: self.shared.ticks.load(Ordering::Relaxed),
            released: self.shared.released.load(Ordering::Relaxed),
            poll_failures: self.shared.poll_failures.load(Ordering::Relaxed),
            last_tick: *self.shared.last_tick.lock(),
        }
    }
}

impl Default for BusyMonitor {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_TICK_MS))
    }
}

impl std::fmt::Debug for BusyMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusyMonitor")
            .field("tick", &self.shared.tick)
            .field("running", &self.is_running())
            .field("tracked", &self.list_size())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::controller::WriteOutcome;
    use crate::crk525::{Crk525, Crk525Behavior};
    use stepdrive_link::{DeviceBehavior, RegisterMemory, SimulatedBus};
    use tracing_test::traced_test;

    const BUS: u8 = 3;

    fn setup(busy_polls: u32) -> (BusyMonitor, Arc<dyn StepperController>) {
        let bus = Arc::new(SimulatedBus::new());
        bus.add_device_with_behavior(BUS, Crk525Behavior::memory(), Crk525Behavior::new(busy_polls));
        let monitor = BusyMonitor::default();
        let controller = Crk525::create(1, bus).unwrap();
        controller.core().set_bus_address(BUS).unwrap();
        controller.core().attach_monitor(monitor.clone());
        (monitor, controller)
    }

    #[test]
    fn test_release_after_motor_stops() {
        let (monitor, controller) = setup(2);
        assert_eq!(controller.write_position(200).unwrap(), WriteOutcome::Accepted);
        assert!(!controller.is_write_permitted());
        assert_eq!(monitor.list_size(), 1);

        // Second write while moving never reaches the drive
        assert_eq!(controller.write_position(50).unwrap(), WriteOutcome::Deferred);

        monitor.tick_once();
        monitor.tick_once();
        assert!(monitor.contains(controller.id()));
        assert!(!controller.is_write_permitted());

        monitor.tick_once();
        assert!(!monitor.contains(controller.id()));
        assert!(controller.is_write_permitted());

        let status = monitor.status();
        assert_eq!(status.ticks, 3);
        assert_eq!(status.released, 1);
        assert!(status.tracked.is_empty());
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let (monitor, controller) = setup(2);
        monitor.add_controller(&controller).unwrap();
        let err = monitor.add_controller(&controller).unwrap_err();
        assert!(matches!(err, DriveError::AlreadyMonitored(_)));
        assert_eq!(monitor.list_size(), 1);

        monitor.remove_controller(controller.as_ref()).unwrap();
        assert!(matches!(monitor.remove_id(controller.id()), Err(DriveError::NotMonitored(_))));
    }

    #[test]
    fn test_threshold_delays_first_poll() {
        let (monitor, controller) = setup(0);
        // 1 ms tick at 10 us per step is 100 periods per tick
        controller.core().set_monitor_threshold(250);
        controller.write_position(10).unwrap();

        monitor.tick_once();
        monitor.tick_once();
        assert!(monitor.contains(controller.id()));
        monitor.tick_once();
        assert!(!monitor.contains(controller.id()));
    }

    #[traced_test]
    #[test]
    fn test_dropped_controller_discarded() {
        let (monitor, controller) = setup(5);
        monitor.add_controller(&controller).unwrap();
        let id = controller.id();
        // Dropping the last handle also removes the entry; re-add a stale one
        let weak = Arc::downgrade(&controller);
        monitor.shared.entries.lock().push(MonitorEntry {
            seq: 0,
            id: id + 100,
            label: "CRK525#stale".to_string(),
            controller: weak,
            step_period_us: 10,
        });
        drop(controller);
        assert_eq!(monitor.list_size(), 1);

        monitor.tick_once();
        assert_eq!(monitor.list_size(), 0);
        assert!(logs_contain("entry discarded"));
    }

    #[traced_test]
    #[test]
    fn test_deferred_write_is_logged() {
        let (_monitor, controller) = setup(3);
        controller.write_position(1).unwrap();
        assert_eq!(controller.write_position(2).unwrap(), WriteOutcome::Deferred);
        assert!(logs_contain("position write deferred"));
    }

    /// Records whether the monitor's entry list was free during each status read
    struct LockWatch {
        inner: Crk525Behavior,
        monitor: BusyMonitor,
        reads: Arc<AtomicU64>,
        locked_reads: Arc<AtomicU64>,
    }

    impl DeviceBehavior for LockWatch {
        fn after_write(&mut self, memory: &mut RegisterMemory, address: u16, count: u16) {
            self.inner.after_write(memory, address, count);
        }

        fn before_read(&mut self, memory: &mut RegisterMemory, address: u16, count: u16) {
            self.reads.fetch_add(1, Ordering::Relaxed);
            if self.monitor.shared.entries.try_lock().is_none() {
                self.locked_reads.fetch_add(1, Ordering::Relaxed);
            }
            self.inner.before_read(memory, address, count);
        }
    }

    #[test]
    fn test_entry_list_unlocked_during_bus_poll() {
        let monitor = BusyMonitor::default();
        let reads = Arc::new(AtomicU64::new(0));
        let locked_reads = Arc::new(AtomicU64::new(0));
        let bus = Arc::new(SimulatedBus::new());
        bus.add_device_with_behavior(
            BUS,
            Crk525Behavior::memory(),
            LockWatch {
                inner: Crk525Behavior::new(1),
                monitor: monitor.clone(),
                reads: Arc::clone(&reads),
                locked_reads: Arc::clone(&locked_reads),
            },
        );
        let controller = Crk525::create(1, bus).unwrap();
        controller.core().set_bus_address(BUS).unwrap();
        controller.core().attach_monitor(monitor.clone());

        controller.write_position(100).unwrap();
        monitor.tick_once();
        monitor.tick_once();

        assert!(!monitor.contains(controller.id()));
        assert!(reads.load(Ordering::Relaxed) >= 2);
        assert_eq!(locked_reads.load(Ordering::Relaxed), 0);
    }

    /// Re-tracks the controller from inside the next status read once armed
    struct Retrack {
        inner: Crk525Behavior,
        monitor: BusyMonitor,
        controller: Arc<Mutex<Option<Weak<dyn StepperController>>>>,
        armed: Arc<AtomicBool>,
    }

    impl DeviceBehavior for Retrack {
        fn after_write(&mut self, memory: &mut RegisterMemory, address: u16, count: u16) {
            self.inner.after_write(memory, address, count);
        }

        fn before_read(&mut self, memory: &mut RegisterMemory, address: u16, count: u16) {
            if self.armed.swap(false, Ordering::AcqRel) {
                if let Some(controller) = self.controller.lock().as_ref().and_then(Weak::upgrade) {
                    self.monitor.remove_id(controller.id()).unwrap();
                    self.monitor.add_controller(&controller).unwrap();
                }
            }
            self.inner.before_read(memory, address, count);
        }
    }

    #[test]
    fn test_entry_retracked_during_poll_survives() {
        let monitor = BusyMonitor::default();
        let slot = Arc::new(Mutex::new(None));
        let armed = Arc::new(AtomicBool::new(false));
        let bus = Arc::new(SimulatedBus::new());
        bus.add_device_with_behavior(
            BUS,
            Crk525Behavior::memory(),
            Retrack {
                inner: Crk525Behavior::new(0),
                monitor: monitor.clone(),
                controller: Arc::clone(&slot),
                armed: Arc::clone(&armed),
            },
        );
        let controller = Crk525::create(1, bus).unwrap();
        controller.core().set_bus_address(BUS).unwrap();
        controller.core().attach_monitor(monitor.clone());
        *slot.lock() = Some(Arc::downgrade(&controller));

        controller.write_position(100).unwrap();
        armed.store(true, Ordering::Release);

        // The polled entry is retired; the one added mid-poll stays
        monitor.tick_once();
        assert_eq!(monitor.status().released, 1);
        assert!(monitor.contains(controller.id()));

        monitor.tick_once();
        assert!(!monitor.contains(controller.id()));
        assert_eq!(monitor.status().released, 2);
    }

    #[test]
    fn test_start_and_stop() {
        let monitor = BusyMonitor::new(Duration::from_millis(1));
        monitor.start().unwrap();
        assert!(monitor.is_running());
        assert!(monitor.start().is_ok());
        std::thread::sleep(Duration::from_millis(20));
        monitor.stop();
        assert!(!monitor.is_running());
        assert!(monitor.status().ticks > 0);
    }
}
