//! FrostByte Core Library
//!
//! Decision-and-control engine for FrostByte: builds a process model from
//! procfs, exempts audio-producing lineages, decides freeze eligibility,
//! executes and reconciles SIGSTOP/SIGCONT, and releases focused apps'
//! helpers gradually.

pub mod audio;
pub mod cmd;
pub mod config;
pub mod control;
pub mod error;
pub mod focus;
pub mod model;
pub mod notify;
pub mod persist;
pub mod policy;
pub mod procfs;

pub use audio::AudioExemptions;
pub use config::{compile_rules, CompiledRule, Config, ReloadWatcher, RuleSpec};
pub use control::{FreezeController, KernelSignaller, Signaller};
pub use error::{Error, Result};
pub use focus::FocusScheduler;
pub use model::{Proc, ProcessTable};
pub use notify::NotificationBatcher;
pub use policy::Decision;
pub use procfs::{ProcDir, ProcSource};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current wall-clock time as epoch seconds; all bookkeeping timestamps use
/// this resolution.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
