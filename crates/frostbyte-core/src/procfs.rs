//! Per-pid kernel info files.
//!
//! Everything here fails soft: a pid whose files vanish mid-read is simply
//! "gone" (`None`), never an error. Processes terminate between `listdir`
//! and `read` all the time and that race is normal operation.

use std::fs;
use std::sync::OnceLock;

/// Source of per-pid kernel information.
///
/// The daemon uses [`ProcDir`] (the real `/proc`); tests substitute an
/// in-memory fake so tree shapes, stat lines and races can be scripted.
pub trait ProcSource {
    /// Pids currently listable, in no particular order.
    fn list_pids(&self) -> Vec<u32>;

    /// Raw first line of the pid's stat file, or `None` if the process is gone.
    fn read_stat(&self, pid: u32) -> Option<String>;

    /// Raw status file contents, or `None` if the process is gone.
    fn read_status(&self, pid: u32) -> Option<String>;

    /// Command line with NUL separators replaced by spaces, or `None` if gone.
    fn read_cmdline(&self, pid: u32) -> Option<String>;
}

/// The real `/proc` filesystem.
pub struct ProcDir;

impl ProcSource for ProcDir {
    fn list_pids(&self) -> Vec<u32> {
        let Ok(entries) = fs::read_dir("/proc") else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse::<u32>().ok()))
            .collect()
    }

    fn read_stat(&self, pid: u32) -> Option<String> {
        fs::read_to_string(format!("/proc/{}/stat", pid)).ok()
    }

    fn read_status(&self, pid: u32) -> Option<String> {
        fs::read_to_string(format!("/proc/{}/status", pid)).ok()
    }

    fn read_cmdline(&self, pid: u32) -> Option<String> {
        let raw = fs::read(format!("/proc/{}/cmdline", pid)).ok()?;
        let text: String = raw
            .iter()
            .map(|&b| if b == 0 { ' ' } else { b as char })
            .collect();
        Some(text.trim_end().to_string())
    }
}

/// Parsed fields of a stat line.
#[derive(Debug, Clone)]
pub struct Stat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    /// utime + stime, in clock ticks.
    pub cpu_ticks: u64,
    /// Resident set size in pages.
    pub rss_pages: u64,
}

/// Parse a `/proc/<pid>/stat` line.
///
/// The comm field is parenthesized and may itself contain spaces or
/// parentheses, so fields are split after the *last* `)`. Truncated lines
/// (state and ppid present, counters missing) still parse, with zeroed
/// counters.
pub fn parse_stat(line: &str) -> Option<Stat> {
    let open = line.find('(')?;
    let close = line.rfind(')')?;
    let pid: u32 = line[..open].trim().parse().ok()?;
    let comm = line[open + 1..close].to_string();

    let rest: Vec<&str> = line[close + 1..].split_whitespace().collect();
    let state = rest.first()?.chars().next()?;
    let ppid: u32 = rest.get(1)?.parse().ok()?;

    let field = |idx: usize| rest.get(idx).and_then(|f| f.parse::<u64>().ok());
    let utime = field(11).unwrap_or(0);
    let stime = field(12).unwrap_or(0);
    let rss_pages = field(21).unwrap_or(0);

    Some(Stat {
        pid,
        comm,
        state,
        ppid,
        cpu_ticks: utime + stime,
        rss_pages,
    })
}

/// Read and parse the stat line for a pid.
pub fn stat_of(src: &dyn ProcSource, pid: u32) -> Option<Stat> {
    parse_stat(&src.read_stat(pid)?)
}

/// Whether the kernel currently reports the process as stopped (T-state).
///
/// A missing process reads as not stopped.
pub fn is_stopped(src: &dyn ProcSource, pid: u32) -> bool {
    stat_of(src, pid).map(|s| s.state == 'T').unwrap_or(false)
}

/// Real uid from a status file's `Uid:` line.
pub fn parse_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find(|l| l.starts_with("Uid:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

/// System page size in bytes, cached after the first query.
pub fn page_size() -> u64 {
    static PAGE_SIZE: OnceLock<u64> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as u64
        } else {
            4096
        }
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    /// Scriptable in-memory proc source for unit tests.
    #[derive(Default)]
    pub struct FakeProc {
        pub stats: HashMap<u32, String>,
        pub statuses: HashMap<u32, String>,
        pub cmdlines: HashMap<u32, String>,
        pub read_log: std::cell::RefCell<Vec<u32>>,
    }

    impl FakeProc {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a pid with a synthetic stat line.
        pub fn add(&mut self, pid: u32, comm: &str, state: char, ppid: u32) -> &mut Self {
            self.add_full(pid, comm, state, ppid, 150, 25600)
        }

        pub fn add_full(
            &mut self,
            pid: u32,
            comm: &str,
            state: char,
            ppid: u32,
            cpu_ticks: u64,
            rss_pages: u64,
        ) -> &mut Self {
            // 22 fields after the comm: state ppid ... utime(11) stime(12) ... rss(21)
            let mut fields = vec!["0".to_string(); 22];
            fields[0] = state.to_string();
            fields[1] = ppid.to_string();
            fields[11] = cpu_ticks.to_string();
            fields[12] = "0".to_string();
            fields[21] = rss_pages.to_string();
            self.stats
                .insert(pid, format!("{} ({}) {}", pid, comm, fields.join(" ")));
            self.statuses
                .insert(pid, format!("Name:\t{}\nUid:\t1000\t1000\t1000\t1000\n", comm));
            self.cmdlines.insert(pid, comm.to_string());
            self
        }
    }

    impl ProcSource for FakeProc {
        fn list_pids(&self) -> Vec<u32> {
            let mut pids: Vec<u32> = self.stats.keys().copied().collect();
            pids.sort_unstable();
            pids
        }

        fn read_stat(&self, pid: u32) -> Option<String> {
            self.read_log.borrow_mut().push(pid);
            self.stats.get(&pid).cloned()
        }

        fn read_status(&self, pid: u32) -> Option<String> {
            self.statuses.get(&pid).cloned()
        }

        fn read_cmdline(&self, pid: u32) -> Option<String> {
            self.cmdlines.get(&pid).cloned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_full_line() {
        let line = "5000 (renderer) S 3000 0 0 0 0 0 0 0 0 0 100 50 0 0 0 0 0 0 0 0 0 25600";
        let stat = parse_stat(line).unwrap();
        assert_eq!(stat.pid, 5000);
        assert_eq!(stat.comm, "renderer");
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.ppid, 3000);
        assert_eq!(stat.cpu_ticks, 150); // utime 100 + stime 50
        assert_eq!(stat.rss_pages, 25600);
    }

    #[test]
    fn test_parse_stat_short_line() {
        // Truncated lines still yield state and ppid with zeroed counters.
        let stat = parse_stat("100 (app) S 200 0 0 0").unwrap();
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.ppid, 200);
        assert_eq!(stat.cpu_ticks, 0);
        assert_eq!(stat.rss_pages, 0);
    }

    #[test]
    fn test_parse_stat_comm_with_spaces_and_parens() {
        let stat = parse_stat("42 (Web Content (x)) T 1 0 0 0").unwrap();
        assert_eq!(stat.comm, "Web Content (x)");
        assert_eq!(stat.state, 'T');
        assert_eq!(stat.ppid, 1);
    }

    #[test]
    fn test_parse_stat_garbage() {
        assert!(parse_stat("").is_none());
        assert!(parse_stat("not a stat line").is_none());
        assert!(parse_stat("12 (app)").is_none());
    }

    #[test]
    fn test_is_stopped() {
        let mut fake = testing::FakeProc::new();
        fake.add(123, "app", 'T', 1);
        fake.add(124, "app", 'S', 1);
        assert!(is_stopped(&fake, 123));
        assert!(!is_stopped(&fake, 124));
        // Missing process reads as not stopped
        assert!(!is_stopped(&fake, 999));
    }

    #[test]
    fn test_parse_uid() {
        let status = "Name:\tbash\nUid:\t1000\t1000\t1000\t1000\nGid:\t1000\n";
        assert_eq!(parse_uid(status), Some(1000));
        assert_eq!(parse_uid("Name:\tbash\n"), None);
    }

    #[test]
    fn test_page_size_positive() {
        assert!(page_size() >= 1024);
    }

    #[test]
    fn test_procdir_lists_self() {
        let own = std::process::id();
        assert!(ProcDir.list_pids().contains(&own));
        let stat = stat_of(&ProcDir, own).unwrap();
        assert_eq!(stat.pid, own);
    }
}
