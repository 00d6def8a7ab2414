//! Focus-driven lazy thaw.
//!
//! A browser regaining focus can own dozens of frozen helpers; resuming all
//! of them at once causes a latency spike. The scheduler releases the most
//! recently active descendant immediately and drains the rest one per tick,
//! discarding the queue the moment focus moves elsewhere.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::control::{FreezeController, Signaller};
use crate::model::ProcessTable;
use crate::notify::NotificationBatcher;
use crate::procfs::{self, ProcSource};

/// Read the focused top-level pid from the externally maintained focus file.
///
/// Read failure means no focus action this tick.
pub fn read_focus_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Pending one-per-tick releases for the currently focused ancestor.
#[derive(Default)]
pub struct FocusScheduler {
    queue: VecDeque<u32>,
    source_pid: Option<u32>,
}

impl FocusScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn source_pid(&self) -> Option<u32> {
        self.source_pid
    }

    /// One scheduler step for this tick.
    pub fn tick(
        &mut self,
        focused: Option<u32>,
        src: &dyn ProcSource,
        table: &mut ProcessTable,
        controller: &mut FreezeController,
        signaller: &mut dyn Signaller,
        notifier: &mut NotificationBatcher,
    ) {
        let Some(focused) = focused else {
            return;
        };

        // Focus moved: the old queue is discarded unconditionally. Siblings
        // of the previous focus stay frozen; the thaw burst is bounded to
        // the app the user is actually switching into.
        if self.source_pid.is_some() && self.source_pid != Some(focused) {
            debug!(
                "focus moved to {}, discarding {} queued thaws",
                focused,
                self.queue.len()
            );
            self.queue.clear();
            self.source_pid = None;
        }

        // Draining: release exactly one queued pid per tick. Entries that
        // stopped being ours (reconciled away, exited) are skipped.
        if self.source_pid == Some(focused) {
            while let Some(pid) = self.queue.pop_front() {
                if controller.is_frozen(pid) {
                    controller.thaw(pid, table, signaller, notifier);
                    break;
                }
            }
            if self.queue.is_empty() {
                self.source_pid = None;
            }
            return;
        }

        // Idle: the focused pid itself, or a frozen ancestor of it, wins
        // before any descendant work.
        if controller.is_frozen(focused) {
            controller.thaw(focused, table, signaller, notifier);
            return;
        }
        if let Some(ancestor) = find_stopped_ancestor(focused, src, controller) {
            controller.thaw(ancestor, table, signaller, notifier);
            return;
        }

        let mut own_frozen = frozen_descendants(focused, table, controller);
        if own_frozen.is_empty() {
            return;
        }

        // Most recently active first.
        own_frozen.sort_by(|a, b| {
            let la = table.get(*a).map(|p| p.last_active).unwrap_or(0);
            let lb = table.get(*b).map(|p| p.last_active).unwrap_or(0);
            lb.cmp(&la).then(a.cmp(b))
        });

        let first = own_frozen[0];
        controller.thaw(first, table, signaller, notifier);

        if own_frozen.len() > 1 {
            self.queue.extend(own_frozen.into_iter().skip(1));
            self.source_pid = Some(focused);
            debug!(
                "lazy thaw queue for {}: {} pids pending",
                focused,
                self.queue.len()
            );
        }
    }
}

/// Frozen descendants of a focused pid: direct children, plus one level of
/// indirection through non-frozen children (the terminal-server case, where
/// the frozen process is a grandchild behind a shell).
///
/// Only pids the controller itself froze qualify; a descendant that is
/// stopped but not ours is never thawed.
fn frozen_descendants(
    focused: u32,
    table: &ProcessTable,
    controller: &FreezeController,
) -> Vec<u32> {
    let mut found = Vec::new();
    for &child in table.children_of(focused) {
        if controller.is_frozen(child) {
            found.push(child);
        } else {
            for &grandchild in table.children_of(child) {
                if controller.is_frozen(grandchild) {
                    found.push(grandchild);
                }
            }
        }
    }
    found
}

/// Walk the focused pid's parent chain for a pid we froze, cycle-guarded.
fn find_stopped_ancestor(
    pid: u32,
    src: &dyn ProcSource,
    controller: &FreezeController,
) -> Option<u32> {
    let mut visited = std::collections::HashSet::new();
    let mut cur = pid;
    while cur > 1 && visited.insert(cur) {
        let stat = procfs::stat_of(src, cur)?;
        if stat.ppid <= 1 {
            return None;
        }
        if controller.is_frozen(stat.ppid) {
            return Some(stat.ppid);
        }
        cur = stat.ppid;
    }
    None
}
