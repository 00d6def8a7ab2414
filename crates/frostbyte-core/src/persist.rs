//! Atomic JSON persistence for the status snapshot and saved config.
//!
//! Writers serialize to a temp file beside the target and rename over it, so
//! a reader never observes a partial file at the final path.

use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::control::FreezeController;
use crate::error::Result;
use crate::model::ProcessTable;

/// Machine-readable snapshot of what is currently frozen.
#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub frozen: Vec<FrozenEntry>,
    pub saved_mb: u64,
    pub updated: String,
}

#[derive(Debug, Serialize)]
pub struct FrozenEntry {
    pub pid: u32,
    pub name: String,
    pub rss_mb: u64,
    pub frozen_for_secs: u64,
}

impl StatusSnapshot {
    pub fn collect(table: &ProcessTable, controller: &FreezeController, now: u64) -> Self {
        let mut frozen: Vec<FrozenEntry> = controller
            .frozen_pids()
            .iter()
            .filter_map(|&pid| {
                let proc = table.get(pid)?;
                Some(FrozenEntry {
                    pid,
                    name: proc.name.clone(),
                    rss_mb: proc.rss_mb,
                    frozen_for_secs: now.saturating_sub(controller.frozen_since(pid).unwrap_or(now)),
                })
            })
            .collect();
        frozen.sort_by_key(|e| e.pid);
        let saved_mb = frozen.iter().map(|e| e.rss_mb).sum();

        Self {
            frozen,
            saved_mb,
            updated: Utc::now().to_rfc3339(),
        }
    }
}

/// Write a JSON value atomically: temp file beside the target, then rename.
pub fn write_json_atomic(path: &Path, value: &Value) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value).unwrap_or_default())?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Write the status snapshot for external consumers.
pub fn write_status(
    path: &Path,
    table: &ProcessTable,
    controller: &FreezeController,
    now: u64,
) -> Result<()> {
    let snapshot = StatusSnapshot::collect(table, controller, now);
    let value = serde_json::to_value(&snapshot)
        .map_err(|e| crate::error::Error::Other(e.to_string()))?;
    write_json_atomic(path, &value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::testing::NullSignaller;
    use crate::model::Proc;
    use crate::notify::NotificationBatcher;

    fn proc_entry(pid: u32, name: &str, rss_mb: u64) -> Proc {
        Proc {
            pid,
            name: name.to_string(),
            cmdline: name.to_string(),
            cpu: 0,
            rss_mb,
            last_active: 0,
            frozen: true,
        }
    }

    #[test]
    fn test_empty_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frostbyte-status.json");
        let table = ProcessTable::new(None);
        let controller = FreezeController::new_for_test();

        write_status(&path, &table, &controller, 100).unwrap();

        let data: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(data["saved_mb"], 0);
        assert!(data["frozen"].as_array().unwrap().is_empty());
        assert!(!path.with_extension("tmp").exists(), "no temp file left behind");
    }

    #[test]
    fn test_status_lists_frozen_with_savings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frostbyte-status.json");

        let mut table = ProcessTable::new(None);
        table.insert_for_test(proc_entry(100, "firefox", 150));
        table.insert_for_test(proc_entry(200, "chrome", 250));

        let mut controller = FreezeController::new_for_test();
        let mut notifier = NotificationBatcher::new(false);
        let mut sig = NullSignaller::default();
        controller.freeze(100, "idle", 50, &mut table, &mut sig, &mut notifier);
        controller.freeze(200, "idle", 80, &mut table, &mut sig, &mut notifier);

        write_status(&path, &table, &controller, 100).unwrap();

        let data: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(data["saved_mb"], 400);
        let frozen = data["frozen"].as_array().unwrap();
        assert_eq!(frozen.len(), 2);
        assert_eq!(frozen[0]["name"], "firefox");
        assert_eq!(frozen[0]["frozen_for_secs"], 50);
        assert!(data["updated"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_write_json_atomic_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json_atomic(&path, &serde_json::json!({"v": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"v": 2})).unwrap();
        let data: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(data["v"], 2);
    }
}
