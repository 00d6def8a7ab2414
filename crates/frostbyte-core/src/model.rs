//! Process model rebuilt from procfs every scan.

use std::collections::HashMap;

use crate::procfs::{self, ProcSource};

/// One live process as observed on the most recent scan.
#[derive(Debug, Clone)]
pub struct Proc {
    pub pid: u32,
    pub name: String,
    pub cmdline: String,
    /// Accumulated utime + stime in clock ticks.
    pub cpu: u64,
    pub rss_mb: u64,
    /// Epoch seconds of the last observed CPU activity.
    pub last_active: u64,
    /// Mirrors the controller's frozen set.
    pub frozen: bool,
}

/// Per-pid process map plus the parent→children index, rebuilt each scan.
pub struct ProcessTable {
    procs: HashMap<u32, Proc>,
    children: HashMap<u32, Vec<u32>>,
    /// When set, only processes owned by this uid are modeled. The daemon
    /// cannot signal other users' processes anyway.
    uid_filter: Option<u32>,
}

impl ProcessTable {
    pub fn new(uid_filter: Option<u32>) -> Self {
        Self {
            procs: HashMap::new(),
            children: HashMap::new(),
            uid_filter,
        }
    }

    /// Refresh the model from the currently listable pids.
    ///
    /// `last_active` advances only when a pid's CPU ticks increased since the
    /// previous observation; pids seen for the first time start at `now`.
    /// The frozen flag survives refreshes. Returns the pids that disappeared
    /// since the previous scan so the caller can drop its own state for them.
    pub fn refresh(&mut self, src: &dyn ProcSource, now: u64) -> Vec<u32> {
        let page_mb = procfs::page_size() as f64 / (1024.0 * 1024.0);
        let mut fresh: HashMap<u32, Proc> = HashMap::new();
        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();

        for pid in src.list_pids() {
            let Some(stat) = procfs::stat_of(src, pid) else {
                continue; // gone between listdir and read
            };
            if let Some(uid) = self.uid_filter {
                match src.read_status(pid).and_then(|s| procfs::parse_uid(&s)) {
                    Some(owner) if owner == uid => {}
                    _ => continue,
                }
            }
            let cmdline = match src.read_cmdline(pid) {
                Some(c) if !c.is_empty() => c,
                _ => stat.comm.clone(),
            };

            let cpu = stat.cpu_ticks;
            let (last_active, frozen) = match self.procs.get(&pid) {
                Some(prev) if cpu > prev.cpu => (now, prev.frozen),
                Some(prev) => (prev.last_active, prev.frozen),
                None => (now, false),
            };

            children.entry(stat.ppid).or_default().push(pid);
            fresh.insert(
                pid,
                Proc {
                    pid,
                    name: stat.comm,
                    cmdline,
                    cpu,
                    rss_mb: (stat.rss_pages as f64 * page_mb) as u64,
                    last_active,
                    frozen,
                },
            );
        }

        let purged: Vec<u32> = self
            .procs
            .keys()
            .filter(|pid| !fresh.contains_key(pid))
            .copied()
            .collect();

        self.procs = fresh;
        self.children = children;
        purged
    }

    pub fn get(&self, pid: u32) -> Option<&Proc> {
        self.procs.get(&pid)
    }

    pub fn get_mut(&mut self, pid: u32) -> Option<&mut Proc> {
        self.procs.get_mut(&pid)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.procs.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.procs.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Proc> {
        self.procs.values()
    }

    /// Direct children of a pid per the latest scan.
    pub fn children_of(&self, pid: u32) -> &[u32] {
        self.children.get(&pid).map(Vec::as_slice).unwrap_or(&[])
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&mut self, proc: Proc) {
        self.procs.insert(proc.pid, proc);
    }

    #[cfg(test)]
    pub(crate) fn set_children_for_test(&mut self, pid: u32, kids: Vec<u32>) {
        self.children.insert(pid, kids);
    }
}
