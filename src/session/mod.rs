//! Browser session lifecycle.
//!
//! `SessionLauncher` acquires a session (virtual display first when in
//! server mode, then the browser process, navigation last); `close()`
//! releases the browser and then the display, on every terminal path. The
//! traits are the seam between the orchestrator and the real CDP driver —
//! tests drive the orchestrator through a scripted implementation.

pub mod chromium;
pub mod display;

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::bypass::detector::ChallengeState;

/// One driven browser page, exclusive to a single clearance request.
#[async_trait]
pub trait BypassSession: Send {
    /// Classify the current page state.
    async fn detect(&mut self) -> Result<ChallengeState>;

    /// Locate the challenge widget and perform a single activation on it.
    /// `Ok(true)` when the widget was found and clicked, `Ok(false)` when it
    /// is not present (yet).
    async fn activate_widget(&mut self) -> Result<bool>;

    /// Cookie jar in store order as `(name, value)` pairs.
    async fn cookie_jar(&mut self) -> Result<Vec<(String, String)>>;

    async fn user_agent(&mut self) -> Result<String>;

    /// Rendered markup of the current document.
    async fn page_html(&mut self) -> Result<String>;

    /// Release the browser process and, when one was started, the virtual
    /// display — in that order. Idempotent.
    async fn close(&mut self);
}

/// Opens sessions already navigated to their target.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn open(&self, target: &Url, proxy: Option<&str>) -> Result<Box<dyn BypassSession>>;
}

pub use chromium::{find_chrome_executable, ChromiumLauncher};
pub use display::VirtualDisplay;
