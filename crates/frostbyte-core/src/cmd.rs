//! Bounded invocation of external collaborator tools.
//!
//! The audio query and notification tools are untrusted and possibly absent;
//! a missing, failing or hung tool must degrade to "no output", never stall
//! the tick loop.

use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::debug;

/// Run a command and capture stdout, bounded by `timeout`.
///
/// Returns `None` when the tool is missing, exits nonzero, or outlives the
/// timeout (in which case it is killed).
pub fn capture(program: &str, args: &[&str], timeout: Duration) -> Option<String> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn();
    let child = match child {
        Ok(c) => c,
        Err(e) => {
            debug!("{} unavailable: {}", program, e);
            return None;
        }
    };
    let child_pid = child.id();

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(out)) if out.status.success() => {
            Some(String::from_utf8_lossy(&out.stdout).into_owned())
        }
        Ok(_) => None,
        Err(_) => {
            debug!("{} timed out after {:?}, killing", program, timeout);
            let _ = kill(Pid::from_raw(child_pid as i32), Signal::SIGKILL);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_output() {
        let out = capture("echo", &["hello"], Duration::from_secs(5)).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_missing_tool_fails_soft() {
        assert!(capture("frostbyte-no-such-tool", &[], Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_nonzero_exit_fails_soft() {
        assert!(capture("false", &[], Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_timeout_kills_child() {
        let start = std::time::Instant::now();
        let out = capture("sleep", &["10"], Duration::from_millis(200));
        assert!(out.is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
