//! Audio exemption: processes with active sink inputs, plus their lineage.
//!
//! A browser's audio usually comes from a helper process; freezing the parent
//! would still kill playback, so the whole ancestor chain is exempted.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::cmd;
use crate::procfs::{self, ProcSource};

const AUDIO_TOOL: &str = "pactl";
const AUDIO_ARGS: [&str; 2] = ["list", "sink-inputs"];
const AUDIO_TIMEOUT: Duration = Duration::from_secs(5);

/// Pids exempt from freezing because they are producing audio, rebuilt fresh
/// on every refresh (no stale entries carried over).
#[derive(Default)]
pub struct AudioExemptions {
    pids: HashSet<u32>,
}

impl AudioExemptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query the audio tool and replace the exemption set.
    ///
    /// A missing, failing or hung tool yields an empty set; freezing must
    /// never crash merely because audio tooling is absent.
    pub fn refresh(&mut self, src: &dyn ProcSource) {
        let output = cmd::capture(AUDIO_TOOL, &AUDIO_ARGS, AUDIO_TIMEOUT).unwrap_or_default();
        let leaves = parse_sink_input_pids(&output);
        self.pids = expand_with_ancestors(&leaves, src);
        if !self.pids.is_empty() {
            debug!("audio exemptions: {} pids", self.pids.len());
        }
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn set_for_test(&mut self, pids: HashSet<u32>) {
        self.pids = pids;
    }
}

/// Extract every `application.process.id = "<pid>"` property from the audio
/// tool's free-form listing output.
pub fn parse_sink_input_pids(output: &str) -> Vec<u32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"application\.process\.id\s*=\s*"(\d+)""#).unwrap());
    re.captures_iter(output)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// Expand audio leaf pids with every ancestor up to pid 1.
///
/// The walk is iterative with a refresh-global visited set. The set is both
/// the cycle guard (corrupt ppid data must terminate the walk, not loop
/// forever) and the memo: an ancestor shared by several leaves has its stat
/// read exactly once per refresh.
pub fn expand_with_ancestors(leaves: &[u32], src: &dyn ProcSource) -> HashSet<u32> {
    let mut visited: HashSet<u32> = HashSet::new();
    for &leaf in leaves {
        let mut cur = leaf;
        loop {
            if cur <= 1 || !visited.insert(cur) {
                break;
            }
            match procfs::stat_of(src, cur) {
                Some(stat) => cur = stat.ppid,
                None => break, // gone mid-walk; keep what we have
            }
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfs::testing::FakeProc;

    const SAMPLE: &str = r#"Sink Input #42
    Driver: protocol-native.c
    Properties:
        application.name = "Firefox"
        application.process.id = "5000"
Sink Input #43
    Properties:
        application.process.id = "6000"
"#;

    #[test]
    fn test_parse_sink_input_pids() {
        assert_eq!(parse_sink_input_pids(SAMPLE), vec![5000, 6000]);
        assert!(parse_sink_input_pids("").is_empty());
        assert!(parse_sink_input_pids("no properties here").is_empty());
    }

    #[test]
    fn test_ancestors_included() {
        // renderer 5000 -> firefox 3000 -> init 1
        let mut fake = FakeProc::new();
        fake.add(5000, "renderer", 'S', 3000);
        fake.add(3000, "firefox", 'S', 1);

        let set = expand_with_ancestors(&[5000], &fake);
        assert!(set.contains(&5000), "audio leaf should be in set");
        assert!(set.contains(&3000), "parent should be in set");
        assert!(!set.contains(&1), "walk stops at pid 1");
    }

    #[test]
    fn test_cycle_terminates() {
        // Corrupt ppid data forming a cycle: 100 -> 200 -> 100
        let mut fake = FakeProc::new();
        fake.add(100, "app", 'S', 200);
        fake.add(200, "parent", 'S', 100);

        let set = expand_with_ancestors(&[100], &fake);
        assert!(set.contains(&100));
        assert!(set.contains(&200));
    }

    #[test]
    fn test_shared_ancestors_read_once() {
        // 1 -> 10 -> {100, 200}; both leaves report audio
        let mut fake = FakeProc::new();
        fake.add(100, "chrome", 'S', 10);
        fake.add(200, "chrome", 'S', 10);
        fake.add(10, "chrome", 'S', 1);

        let set = expand_with_ancestors(&[100, 200], &fake);
        assert_eq!(set, [100, 200, 10].into_iter().collect());

        let reads = fake.read_log.borrow();
        let reads_of_10 = reads.iter().filter(|&&p| p == 10).count();
        assert_eq!(reads_of_10, 1, "shared ancestor read exactly once");
    }

    #[test]
    fn test_missing_stat_keeps_leaf() {
        let fake = FakeProc::new();
        let set = expand_with_ancestors(&[7777], &fake);
        assert!(set.contains(&7777));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_refresh_with_missing_tool_is_empty() {
        // cmd::capture fails soft for an absent tool, so a refresh in an
        // environment without the audio tool must leave the set empty.
        let mut audio = AudioExemptions::new();
        let fake = FakeProc::new();
        audio.refresh(&fake);
        // Either the tool is absent (empty) or present with real sink inputs;
        // in both cases contains() must not panic.
        let _ = audio.contains(1);
    }
}
