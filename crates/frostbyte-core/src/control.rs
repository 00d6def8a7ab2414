//! Freeze/thaw controller: owns the frozen set and reconciles it against
//! signals sent by other actors.
//!
//! Shells (`fg`), users (`kill -CONT`) and window managers also send stop and
//! continue signals; the kernel's T-state on the next scan is the ground
//! truth, not our bookkeeping.

use std::collections::{HashMap, HashSet};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::ProcessTable;
use crate::notify::NotificationBatcher;
use crate::procfs::{self, ProcSource};

/// Stop/continue signal delivery. The daemon sends real signals; tests
/// record the calls instead.
pub trait Signaller {
    fn stop(&mut self, pid: u32) -> Result<()>;
    fn cont(&mut self, pid: u32) -> Result<()>;
}

/// Sends real SIGSTOP/SIGCONT via the kernel.
pub struct KernelSignaller;

impl Signaller for KernelSignaller {
    fn stop(&mut self, pid: u32) -> Result<()> {
        kill(Pid::from_raw(pid as i32), Signal::SIGSTOP)
            .map_err(|e| Error::Signal(format!("SIGSTOP pid {}: {}", pid, e)))
    }

    fn cont(&mut self, pid: u32) -> Result<()> {
        kill(Pid::from_raw(pid as i32), Signal::SIGCONT)
            .map_err(|e| Error::Signal(format!("SIGCONT pid {}: {}", pid, e)))
    }
}

/// Owns the frozen set and the freeze timestamps.
///
/// Invariant, enforced on every mutation: `frozen_at` has exactly the keys
/// in `frozen`.
pub struct FreezeController {
    frozen: HashSet<u32>,
    frozen_at: HashMap<u32, u64>,
    /// The daemon's own pid and ancestor chain; never valid freeze targets.
    own_lineage: HashSet<u32>,
}

impl FreezeController {
    /// `own_lineage` walks upward from the daemon's own pid so the daemon
    /// can never stop its own shell, terminal or session.
    pub fn new(src: &dyn ProcSource) -> Self {
        Self {
            frozen: HashSet::new(),
            frozen_at: HashMap::new(),
            own_lineage: own_lineage(std::process::id(), src),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_test() -> Self {
        Self {
            frozen: HashSet::new(),
            frozen_at: HashMap::new(),
            own_lineage: HashSet::new(),
        }
    }

    pub fn is_frozen(&self, pid: u32) -> bool {
        self.frozen.contains(&pid)
    }

    pub fn frozen_pids(&self) -> Vec<u32> {
        self.frozen.iter().copied().collect()
    }

    pub fn frozen_count(&self) -> usize {
        self.frozen.len()
    }

    pub fn frozen_since(&self, pid: u32) -> Option<u64> {
        self.frozen_at.get(&pid).copied()
    }

    /// SIGSTOP a pid and record it. Idempotent: re-freezing refreshes the
    /// bookkeeping without complaint.
    pub fn freeze(
        &mut self,
        pid: u32,
        reason: &str,
        now: u64,
        table: &mut ProcessTable,
        signaller: &mut dyn Signaller,
        notifier: &mut NotificationBatcher,
    ) {
        if self.own_lineage.contains(&pid) {
            warn!("refusing to freeze own lineage pid {}", pid);
            return;
        }
        if self.frozen.contains(&pid) {
            // Already stopped by us: refresh the timestamp, no second signal.
            self.frozen_at.insert(pid, now);
            debug!("pid {} already frozen, bookkeeping refreshed", pid);
            return;
        }
        if let Err(e) = signaller.stop(pid) {
            debug!("freeze pid {} failed: {}", pid, e);
            return;
        }
        self.frozen.insert(pid);
        self.frozen_at.insert(pid, now);

        let label = match table.get_mut(pid) {
            Some(proc) => {
                proc.frozen = true;
                format!("{} ({} MB)", proc.name, proc.rss_mb)
            }
            None => format!("pid {}", pid),
        };
        info!("froze pid {} ({}): {}", pid, label, reason);
        notifier.notify("Frozen", label);
    }

    /// SIGCONT a pid and drop it from the bookkeeping.
    pub fn thaw(
        &mut self,
        pid: u32,
        table: &mut ProcessTable,
        signaller: &mut dyn Signaller,
        notifier: &mut NotificationBatcher,
    ) {
        if let Err(e) = signaller.cont(pid) {
            debug!("thaw pid {} failed: {}", pid, e);
        }
        let was_ours = self.frozen.remove(&pid);
        self.frozen_at.remove(&pid);

        let label = match table.get_mut(pid) {
            Some(proc) => {
                proc.frozen = false;
                proc.name.clone()
            }
            None => format!("pid {}", pid),
        };
        info!("thawed pid {} ({})", pid, label);
        if was_ours {
            notifier.notify("Thawed", label);
        }
    }

    /// Drop state for pids that disappeared from the process model.
    pub fn purge(&mut self, dead: &[u32]) {
        for pid in dead {
            if self.frozen.remove(pid) {
                debug!("purged dead frozen pid {}", pid);
            }
            self.frozen_at.remove(pid);
        }
    }

    /// Reconcile bookkeeping against observed kernel state.
    ///
    /// A pid we believe frozen but which the kernel reports as not stopped
    /// was resumed by someone else; the record is dropped without sending
    /// any further signal. Stale bookkeeping here would corrupt both the
    /// safety thaw and the focus scheduler.
    pub fn reconcile(&mut self, src: &dyn ProcSource, table: &mut ProcessTable) {
        let believed: Vec<u32> = self.frozen.iter().copied().collect();
        for pid in believed {
            if !table.contains(pid) {
                self.frozen.remove(&pid);
                self.frozen_at.remove(&pid);
                continue;
            }
            if !procfs::is_stopped(src, pid) {
                info!("pid {} resumed externally, dropping record", pid);
                self.frozen.remove(&pid);
                self.frozen_at.remove(&pid);
                if let Some(proc) = table.get_mut(pid) {
                    proc.frozen = false;
                }
            }
        }
    }

    /// Force-thaw anything frozen longer than `max_freeze_hours`.
    ///
    /// A bound of 0 disables the safety net entirely ("never auto-thaw" is
    /// an explicit policy, not a fallback). Runs focus-independently.
    pub fn safety_thaw(
        &mut self,
        max_freeze_hours: f64,
        now: u64,
        table: &mut ProcessTable,
        signaller: &mut dyn Signaller,
        notifier: &mut NotificationBatcher,
    ) {
        if max_freeze_hours <= 0.0 {
            return;
        }
        let bound_secs = (max_freeze_hours * 3600.0) as u64;
        let overdue: Vec<u32> = self
            .frozen_at
            .iter()
            .filter(|(_, &at)| now.saturating_sub(at) > bound_secs)
            .map(|(&pid, _)| pid)
            .collect();
        for pid in overdue {
            info!("safety thaw for pid {} after {}h bound", pid, max_freeze_hours);
            self.thaw(pid, table, signaller, notifier);
        }
    }

    /// The invariant every mutation must preserve.
    pub fn is_consistent(&self) -> bool {
        self.frozen.len() == self.frozen_at.len()
            && self.frozen.iter().all(|pid| self.frozen_at.contains_key(pid))
    }
}

/// Collect a pid and its ancestors, cycle-guarded.
fn own_lineage(pid: u32, src: &dyn ProcSource) -> HashSet<u32> {
    let mut lineage = HashSet::new();
    let mut cur = pid;
    while cur > 1 && lineage.insert(cur) {
        match procfs::stat_of(src, cur) {
            Some(stat) => cur = stat.ppid,
            None => break,
        }
    }
    lineage.insert(1);
    lineage
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records signals instead of delivering them.
    #[derive(Default)]
    pub struct NullSignaller {
        pub stopped: Vec<u32>,
        pub continued: Vec<u32>,
    }

    impl Signaller for NullSignaller {
        fn stop(&mut self, pid: u32) -> Result<()> {
            self.stopped.push(pid);
            Ok(())
        }

        fn cont(&mut self, pid: u32) -> Result<()> {
            self.continued.push(pid);
            Ok(())
        }
    }
}
