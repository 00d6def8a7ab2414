//! The tick loop orchestrator.
//!
//! One struct owns every piece of mutable daemon state; mutation happens
//! only inside the components it delegates to, in a fixed per-tick order.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use frostbyte_core::{
    compile_rules, epoch_secs, focus, persist, policy, AudioExemptions, CompiledRule, Config,
    Decision, FocusScheduler, FreezeController, NotificationBatcher, ProcSource, ReloadWatcher,
    Signaller,
};

/// Filesystem touchpoints of the daemon.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config_file: PathBuf,
    pub status_file: PathBuf,
    pub focus_file: PathBuf,
}

impl Paths {
    /// Default locations: config under the user's config dir, runtime files
    /// under /tmp where the window-manager collaborator writes the focus pid.
    pub fn default_locations() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self {
            config_file: PathBuf::from(home).join(".config/frostbyte/config.json"),
            status_file: PathBuf::from("/tmp/frostbyte-status.json"),
            focus_file: PathBuf::from("/tmp/frostbyte-focus"),
        }
    }
}

/// FrostByte daemon: freezes idle processes, thaws them on focus or after
/// the safety bound, and keeps its view reconciled with reality.
pub struct FrostByteDaemon<S: ProcSource, G: Signaller> {
    config: Config,
    rules: Vec<CompiledRule>,
    watcher: ReloadWatcher,
    table: frostbyte_core::ProcessTable,
    audio: AudioExemptions,
    controller: FreezeController,
    scheduler: FocusScheduler,
    notifier: NotificationBatcher,
    src: S,
    signaller: G,
    paths: Paths,
    tick_count: u64,
}

impl<S: ProcSource, G: Signaller> FrostByteDaemon<S, G> {
    pub fn new(config: Config, paths: Paths, src: S, signaller: G, uid_filter: Option<u32>) -> Self {
        let rules = compile_rules(&config.rules);
        let notifier = NotificationBatcher::new(config.notifications);
        let watcher = ReloadWatcher::new(&paths.config_file);
        let controller = FreezeController::new(&src);
        Self {
            rules,
            watcher,
            notifier,
            controller,
            table: frostbyte_core::ProcessTable::new(uid_filter),
            audio: AudioExemptions::new(),
            scheduler: FocusScheduler::new(),
            src,
            signaller,
            paths,
            config,
            tick_count: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> &FreezeController {
        &self.controller
    }

    /// One iteration of the loop. Cheap pass every tick; the audio refresh
    /// and full policy sweep only every `scans_per_tick` ticks.
    pub fn tick(&mut self) {
        self.reload_config_if_changed();

        let now = epoch_secs();
        let purged = self.table.refresh(&self.src, now);
        self.controller.purge(&purged);
        self.controller.reconcile(&self.src, &mut self.table);

        if self.tick_count % self.config.scans_per_tick() == 0 {
            self.audio.refresh(&self.src);
            self.sweep(now);
            self.controller.safety_thaw(
                self.config.max_freeze_hours,
                now,
                &mut self.table,
                &mut self.signaller,
                &mut self.notifier,
            );
            if let Err(e) =
                persist::write_status(&self.paths.status_file, &self.table, &self.controller, now)
            {
                warn!("status write failed: {}", e);
            }
        }

        let focused = focus::read_focus_pid(&self.paths.focus_file);
        self.scheduler.tick(
            focused,
            &self.src,
            &mut self.table,
            &mut self.controller,
            &mut self.signaller,
            &mut self.notifier,
        );

        self.notifier.flush();
        self.tick_count = self.tick_count.wrapping_add(1);
    }

    /// Run forever at the configured poll interval.
    pub async fn run(&mut self) {
        info!(
            "tick loop starting: poll {}s, scan every {} ticks",
            self.config.poll_interval,
            self.config.scans_per_tick()
        );
        loop {
            self.tick();
            tokio::time::sleep(Duration::from_secs_f64(self.config.poll_interval)).await;
        }
    }

    fn reload_config_if_changed(&mut self) {
        if let Some(fresh) = self.watcher.check(&self.paths.config_file) {
            self.rules = compile_rules(&fresh.rules);
            self.notifier.set_enabled(fresh.notifications);
            self.config = fresh;
            info!(
                "config applied: scan every {} ticks, {} rules",
                self.config.scans_per_tick(),
                self.rules.len()
            );
        }
    }

    /// Evaluate the freeze policy over the whole model.
    fn sweep(&mut self, now: u64) {
        let mut to_freeze: Vec<(u32, String)> = Vec::new();
        for proc in self.table.iter() {
            if self.controller.is_frozen(proc.pid) {
                continue;
            }
            match policy::evaluate(proc, &self.config, &self.rules, &self.audio, now) {
                Decision::Freeze {
                    idle_minutes,
                    threshold_minutes,
                } => {
                    to_freeze.push((
                        proc.pid,
                        format!("idle {:.0}m >= {:.0}m", idle_minutes, threshold_minutes),
                    ));
                }
                other => debug!("pid {} not eligible: {:?}", proc.pid, other),
            }
        }
        for (pid, reason) in to_freeze {
            self.controller.freeze(
                pid,
                &reason,
                now,
                &mut self.table,
                &mut self.signaller,
                &mut self.notifier,
            );
        }
    }
}
