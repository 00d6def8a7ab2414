//! Freeze eligibility policy.

use crate::audio::AudioExemptions;
use crate::config::{CompiledRule, Config};
use crate::model::Proc;

/// Why a process is, or is not, freeze-eligible right now.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Eligible; carries the idle minutes and the threshold that tripped.
    Freeze { idle_minutes: f64, threshold_minutes: f64 },
    /// Producing audio (or an ancestor of something that is).
    Audio,
    /// Name or cmdline matches a whitelist substring.
    Whitelisted,
    /// RSS below the floor; not worth freezing.
    TooSmall,
    /// Recently active.
    Active,
}

impl Decision {
    pub fn is_freeze(&self) -> bool {
        matches!(self, Decision::Freeze { .. })
    }
}

/// Idle threshold for a process: the first matching rule wins, else the
/// global default.
pub fn threshold_minutes(proc: &Proc, config: &Config, rules: &[CompiledRule]) -> f64 {
    rules
        .iter()
        .find(|rule| rule.regex.is_match(&proc.name) || rule.regex.is_match(&proc.cmdline))
        .map(|rule| rule.freeze_after_minutes)
        .unwrap_or(config.freeze_after_minutes)
}

pub fn is_whitelisted(proc: &Proc, config: &Config) -> bool {
    config
        .whitelist
        .iter()
        .any(|entry| proc.name.contains(entry) || proc.cmdline.contains(entry))
}

/// Decide eligibility, short-circuiting in order: audio exemption,
/// whitelist, RSS floor, idle duration against the effective threshold.
pub fn evaluate(
    proc: &Proc,
    config: &Config,
    rules: &[CompiledRule],
    audio: &AudioExemptions,
    now: u64,
) -> Decision {
    if audio.contains(proc.pid) {
        return Decision::Audio;
    }
    if is_whitelisted(proc, config) {
        return Decision::Whitelisted;
    }
    let threshold = threshold_minutes(proc, config, rules);
    if (proc.rss_mb as f64) < config.min_rss_mb {
        return Decision::TooSmall;
    }
    let idle_minutes = now.saturating_sub(proc.last_active) as f64 / 60.0;
    if idle_minutes >= threshold {
        Decision::Freeze {
            idle_minutes,
            threshold_minutes: threshold,
        }
    } else {
        Decision::Active
    }
}
