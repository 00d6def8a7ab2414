//! Per-cycle notification batching.
//!
//! Freezing a browser can touch a dozen helper processes in one scan; the
//! user gets one merged desktop notification per category instead of a storm.

use std::collections::BTreeMap;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::thread;

use tracing::debug;

const NOTIFY_TOOL: &str = "notify-send";
const APP_NAME: &str = "FrostByte";
const ICON: &str = "weather-snow-symbolic";

/// Buffers user-facing events per poll cycle and flushes them as one merged
/// message per category ("Frozen", "Thawed", ...).
pub struct NotificationBatcher {
    enabled: bool,
    pending: BTreeMap<String, Vec<String>>,
}

impl NotificationBatcher {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            pending: BTreeMap::new(),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Queue an event; a no-op when notifications are disabled.
    pub fn notify(&mut self, category: &str, text: impl Into<String>) {
        if !self.enabled {
            return;
        }
        self.pending
            .entry(category.to_string())
            .or_default()
            .push(text.into());
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Take exactly one (title, body) per distinct pending category: a single
    /// item is sent verbatim, two or more are merged into a summary. Pending
    /// state is cleared unconditionally.
    pub fn drain(&mut self) -> Vec<(String, String)> {
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .map(|(category, items)| {
                let body = if items.len() == 1 {
                    items.into_iter().next().unwrap()
                } else {
                    format!("{} apps: {}", items.len(), items.join(", "))
                };
                (category, body)
            })
            .collect()
    }

    /// Send everything pending through the external notify tool.
    pub fn flush(&mut self) {
        for (title, body) in self.drain() {
            send(&title, &body);
        }
    }
}

fn send(title: &str, body: &str) {
    spawn_detached(NOTIFY_TOOL, &["-a", APP_NAME, "-i", ICON, title, body]);
}

/// Spawn a tool detached in its own session so its lifecycle (and any
/// failure) never blocks the daemon. A reaper thread waits on the child;
/// it stays the daemon's child even after `setsid` and would otherwise
/// linger as a zombie once it exits. Returns the child pid on success.
fn spawn_detached(program: &str, args: &[&str]) -> Option<u32> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    unsafe {
        command.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }
    match command.spawn() {
        Ok(mut child) => {
            let pid = child.id();
            thread::spawn(move || {
                let _ = child.wait();
            });
            Some(pid)
        }
        Err(e) => {
            debug!("{} unavailable: {}", program, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_events_one_merged_message() {
        let mut batcher = NotificationBatcher::new(true);
        for i in 0..5 {
            batcher.notify("Frozen", format!("app{} (100 MB)", i));
        }
        let sent = batcher.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "Frozen");
        assert!(sent[0].1.contains("5 apps"));
        assert!(sent[0].1.contains("app0 (100 MB)"));
    }

    #[test]
    fn test_single_event_sent_verbatim() {
        let mut batcher = NotificationBatcher::new(true);
        batcher.notify("Frozen", "firefox (200 MB)");
        let sent = batcher.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "firefox (200 MB)");
    }

    #[test]
    fn test_mixed_categories_batch_separately() {
        let mut batcher = NotificationBatcher::new(true);
        batcher.notify("Frozen", "app1");
        batcher.notify("Frozen", "app2");
        batcher.notify("Thawed", "app3");
        let sent = batcher.drain();
        assert_eq!(sent.len(), 2);
        let titles: Vec<&str> = sent.iter().map(|(t, _)| t.as_str()).collect();
        assert!(titles.contains(&"Frozen"));
        assert!(titles.contains(&"Thawed"));
    }

    #[test]
    fn test_drain_clears_pending() {
        let mut batcher = NotificationBatcher::new(true);
        batcher.notify("Frozen", "app1");
        assert_eq!(batcher.pending_count(), 1);
        batcher.drain();
        assert_eq!(batcher.pending_count(), 0);
        assert!(batcher.drain().is_empty());
    }

    #[test]
    fn test_disabled_is_noop() {
        let mut batcher = NotificationBatcher::new(false);
        batcher.notify("Frozen", "test-app");
        assert_eq!(batcher.pending_count(), 0);
    }

    #[test]
    fn test_detached_child_is_reaped() {
        let pid = spawn_detached("true", &[]).expect("spawn of /bin/true failed");

        // The reaper thread must collect the exit status, after which the
        // pid entry disappears. A momentary Z state before the wait is fine;
        // an unwaited child would sit in Z state forever.
        let stat_path = format!("/proc/{}/stat", pid);
        let mut reaped = false;
        for _ in 0..200 {
            if std::fs::read_to_string(&stat_path).is_err() {
                reaped = true;
                break;
            }
            thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(reaped, "child pid {} stayed a zombie, never waited on", pid);
    }

    #[test]
    fn test_reenabling_applies_to_new_events() {
        let mut batcher = NotificationBatcher::new(false);
        batcher.notify("Frozen", "dropped");
        batcher.set_enabled(true);
        batcher.notify("Frozen", "kept");
        let sent = batcher.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "kept");
    }
}
