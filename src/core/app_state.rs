use std::sync::Arc;
use std::time::Duration;

use crate::core::config;
use crate::session::{ChromiumLauncher, SessionLauncher};

/// Service-wide settings, read-only after startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Run each session inside a per-request virtual display.
    pub server_mode: bool,
    /// Emit per-round orchestrator logs. The old global log toggle, made explicit.
    pub log_rounds: bool,
    /// Fixed wait between polling rounds; never backs off.
    pub poll_interval: Duration,
    /// Optional wall-clock ceiling on top of the attempt budget. `None`
    /// keeps the count-only bound.
    pub deadline: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_mode: false,
            log_rounds: true,
            poll_interval: Duration::from_secs(2),
            deadline: None,
        }
    }
}

impl Settings {
    pub fn from_env(server_flag: bool, nolog: bool) -> Self {
        Self {
            server_mode: server_flag || config::server_mode_from_env(),
            log_rounds: !nolog,
            poll_interval: config::poll_interval(),
            deadline: config::deadline(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    /// Browser driver seam. The real launcher spawns Chromium; tests swap in
    /// a scripted one.
    pub launcher: Arc<dyn SessionLauncher>,
    pub settings: Arc<Settings>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("settings", &self.settings)
            .finish()
    }
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let launcher = Arc::new(ChromiumLauncher::new(settings.server_mode));
        Self {
            launcher,
            settings: Arc::new(settings),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn SessionLauncher>) -> Self {
        self.launcher = launcher;
        self
    }
}
