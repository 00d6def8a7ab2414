//! Configuration: defensive validation of untyped JSON and hot reload.
//!
//! The on-disk file is user-edited JSON and must be treated as hostile input:
//! numeric fields may arrive as strings, booleans, nulls or lists. Everything
//! is repaired field-by-field; no component downstream of [`Config`] ever
//! sees an unvalidated value.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::persist;

pub const DEFAULT_POLL_INTERVAL: f64 = 1.0;
pub const DEFAULT_SCAN_INTERVAL: f64 = 30.0;
pub const DEFAULT_FREEZE_AFTER_MINUTES: f64 = 10.0;
pub const DEFAULT_MIN_RSS_MB: f64 = 100.0;
pub const DEFAULT_MAX_FREEZE_HOURS: f64 = 4.0;

/// One per-app rule: processes matching `pattern` get their own idle
/// threshold instead of the global default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSpec {
    pub pattern: String,
    pub freeze_after_minutes: f64,
}

/// A rule with its pattern compiled. Invalid patterns are dropped at
/// compile time, never fatal.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub regex: Regex,
    pub freeze_after_minutes: f64,
}

/// Fully validated configuration. Every numeric field holds a finite,
/// in-range value; see the field table in the module docs of each sanitizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Tick period in seconds, (0, 3600].
    pub poll_interval: f64,
    /// Heavy-scan period in seconds, (0, 3600].
    pub scan_interval: f64,
    /// Global idle threshold in minutes, (0, 1440].
    pub freeze_after_minutes: f64,
    /// Processes below this RSS are not worth freezing, [0, 65536].
    pub min_rss_mb: f64,
    /// Safety auto-thaw bound in hours, [0, 168]; 0 disables the safety net.
    pub max_freeze_hours: f64,
    /// Name/cmdline substrings never frozen.
    pub whitelist: Vec<String>,
    /// Ordered per-app rules, first match wins.
    pub rules: Vec<RuleSpec>,
    /// Desktop notifications on freeze/thaw.
    pub notifications: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            freeze_after_minutes: DEFAULT_FREEZE_AFTER_MINUTES,
            min_rss_mb: DEFAULT_MIN_RSS_MB,
            max_freeze_hours: DEFAULT_MAX_FREEZE_HOURS,
            whitelist: Vec::new(),
            rules: Vec::new(),
            notifications: true,
        }
    }
}

/// Interpret an arbitrary JSON value as a number.
///
/// Booleans are rejected even though they are structurally integers, and so
/// are strings spelling infinity or NaN (case-insensitive). Numeric strings
/// parse normally.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(_) => None,
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => {
            let trimmed = s.trim();
            let lower = trimmed.to_ascii_lowercase();
            if lower.contains("inf") || lower.contains("nan") {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

/// Sanitize an interval field: non-numeric or non-positive values fall back
/// to the default (a non-positive tick makes the loop meaningless, not
/// merely "small"); oversized values clamp to an hour.
fn sanitize_interval(raw: Option<&Value>, default: f64) -> f64 {
    match raw.and_then(as_number) {
        Some(v) if v > 0.0 && v <= 3600.0 => v,
        Some(v) if v > 3600.0 => 3600.0,
        _ => default,
    }
}

/// Sanitize a field with a closed positive domain (0, max]: invalid or
/// non-positive values default, oversized values clamp.
fn sanitize_positive(raw: Option<&Value>, default: f64, max: f64) -> f64 {
    match raw.and_then(as_number) {
        Some(v) if v > 0.0 && v <= max => v,
        Some(v) if v > max => max,
        _ => default,
    }
}

/// Sanitize a field with domain [0, max]: invalid values default, negatives
/// clamp to 0, oversized values clamp to max.
///
/// For `max_freeze_hours` the 0 produced by a negative input is a valid
/// terminal value meaning "never auto-thaw", distinct from the default.
fn sanitize_clamped(raw: Option<&Value>, default: f64, max: f64) -> f64 {
    match raw.and_then(as_number) {
        Some(v) => v.clamp(0.0, max),
        None => default,
    }
}

fn sanitize_whitelist(raw: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .filter(|s| !s.is_empty())
        .collect()
}

fn sanitize_rules(raw: Option<&Value>) -> Vec<RuleSpec> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let pattern = obj.get("pattern")?.as_str()?.to_string();
            let minutes = as_number(obj.get("freeze_after_minutes")?)?;
            if minutes <= 0.0 {
                return None;
            }
            Some(RuleSpec {
                pattern,
                freeze_after_minutes: minutes.min(1440.0),
            })
        })
        .collect()
}

impl Config {
    /// Build a validated config from an untyped JSON mapping. Anything
    /// malformed is silently repaired; this never fails.
    pub fn from_value(value: &Value) -> Self {
        let empty = Map::new();
        let map: &Map<String, Value> = value.as_object().unwrap_or(&empty);

        Self {
            poll_interval: sanitize_interval(map.get("poll_interval"), DEFAULT_POLL_INTERVAL),
            scan_interval: sanitize_interval(map.get("scan_interval"), DEFAULT_SCAN_INTERVAL),
            freeze_after_minutes: sanitize_positive(
                map.get("freeze_after_minutes"),
                DEFAULT_FREEZE_AFTER_MINUTES,
                1440.0,
            ),
            min_rss_mb: sanitize_clamped(map.get("min_rss_mb"), DEFAULT_MIN_RSS_MB, 65536.0),
            max_freeze_hours: sanitize_clamped(
                map.get("max_freeze_hours"),
                DEFAULT_MAX_FREEZE_HOURS,
                168.0,
            ),
            whitelist: sanitize_whitelist(map.get("whitelist")),
            rules: sanitize_rules(map.get("rules")),
            notifications: map
                .get("notifications")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        }
    }

    /// Load and validate the config file. A missing file yields defaults;
    /// unreadable or syntactically broken JSON is an error so the hot-reload
    /// watcher can retry instead of adopting a half-written file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let value: Value =
            serde_json::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_value(&value))
    }

    /// Write the config atomically (temp file beside the target + rename).
    pub fn save_atomic(&self, path: &Path) -> Result<()> {
        let value = serde_json::to_value(self).map_err(|e| Error::Config(e.to_string()))?;
        persist::write_json_atomic(path, &value)
    }

    /// Heavier-scan cadence in ticks, always an integer β‰₯ 1 even when the
    /// intervals were supplied as floats.
    pub fn scans_per_tick(&self) -> u64 {
        ((self.scan_interval / self.poll_interval).floor() as u64).max(1)
    }

    /// Add a whitelist entry. Returns false if it was already present.
    pub fn add_whitelist(&mut self, entry: &str) -> bool {
        if self.whitelist.iter().any(|w| w == entry) {
            return false;
        }
        self.whitelist.push(entry.to_string());
        true
    }

    /// Remove a whitelist entry. Returns false if it was not present.
    pub fn remove_whitelist(&mut self, entry: &str) -> bool {
        let before = self.whitelist.len();
        self.whitelist.retain(|w| w != entry);
        self.whitelist.len() != before
    }

    /// Example config used by `generate-config`.
    pub fn example_value() -> Value {
        json!({
            "poll_interval": DEFAULT_POLL_INTERVAL,
            "scan_interval": DEFAULT_SCAN_INTERVAL,
            "freeze_after_minutes": DEFAULT_FREEZE_AFTER_MINUTES,
            "min_rss_mb": DEFAULT_MIN_RSS_MB,
            "max_freeze_hours": DEFAULT_MAX_FREEZE_HOURS,
            "whitelist": ["mpv", "obs"],
            "rules": [{"pattern": "^firefox", "freeze_after_minutes": 30}],
            "notifications": true,
        })
    }
}

/// Compile the rule patterns, dropping any that fail to compile.
pub fn compile_rules(rules: &[RuleSpec]) -> Vec<CompiledRule> {
    rules
        .iter()
        .filter_map(|rule| match Regex::new(&rule.pattern) {
            Ok(regex) => Some(CompiledRule {
                regex,
                freeze_after_minutes: rule.freeze_after_minutes,
            }),
            Err(e) => {
                warn!("dropping rule with bad pattern {:?}: {}", rule.pattern, e);
                None
            }
        })
        .collect()
}

/// Watches the config file's mtime and reloads on change.
pub struct ReloadWatcher {
    last_mtime: Option<SystemTime>,
}

impl ReloadWatcher {
    /// Start from the file's current mtime so the initial load is not
    /// immediately re-applied.
    pub fn new(path: &Path) -> Self {
        Self {
            last_mtime: mtime_of(path),
        }
    }

    /// Reload if the file changed since the last applied config.
    ///
    /// The recorded mtime is only advanced after a successful load, so a
    /// half-written or unreadable file is retried on the next tick instead
    /// of being adopted as "seen".
    pub fn check(&mut self, path: &Path) -> Option<Config> {
        let mtime = mtime_of(path)?;
        if self.last_mtime == Some(mtime) {
            return None;
        }
        match Config::load(path) {
            Ok(config) => {
                self.last_mtime = Some(mtime);
                info!("config reloaded from {}", path.display());
                Some(config)
            }
            Err(e) => {
                warn!("config reload failed, will retry: {}", e);
                None
            }
        }
    }
}

fn mtime_of(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
