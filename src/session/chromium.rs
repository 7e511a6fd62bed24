//! The real browser driver: spawns a Chromium process, attaches over CDP,
//! and exposes it as a [`BypassSession`].
//!
//! The process is spawned directly (not through the CDP library's launcher)
//! so each session can inherit its own `DISPLAY` in server mode; the
//! websocket endpoint is then discovered via the `/json/version` debug API
//! and attached with `Browser::connect`.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::display::VirtualDisplay;
use super::{BypassSession, SessionLauncher};
use crate::bypass::detector::{classify, ChallengeState, PageSignals, PROBE_JS};
use crate::core::config;

const DISPLAY_WIDTH: u32 = 1920;
const DISPLAY_HEIGHT: u32 = 1080;

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Held down long enough to register as a deliberate click.
const CLICK_HOLD: Duration = Duration::from_millis(80);

/// Fixed launch-argument template, identical for every session so runs are
/// indistinguishable from one another: first-run UI off, GPU off, fixed
/// locale, default-browser checks off, permission prompts denied.
const LAUNCH_ARGS: &[&str] = &[
    "--no-first-run",
    "--force-color-profile=srgb",
    "--metrics-recording-only",
    "--password-store=basic",
    "--use-mock-keychain",
    "--export-tagged-pdf",
    "--no-default-browser-check",
    "--disable-background-mode",
    "--enable-features=NetworkService,NetworkServiceInProcess,LoadCryptoTokenExtension,PermuteTLSExtensions",
    "--disable-features=FlashDeprecationWarning,EnablePasswordsAccountStorage",
    "--deny-permission-prompts",
    "--disable-gpu",
    "--accept-lang=en-US",
];

// Each concurrent session gets its own debug port and scratch profile.
static NEXT_DEBUG_PORT: AtomicU16 = AtomicU16::new(9330);

fn next_debug_port() -> u16 {
    NEXT_DEBUG_PORT.fetch_add(1, Ordering::Relaxed)
}

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan — finds package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Some(p) = config::chrome_executable_override() {
        return Some(p);
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/brave-browser",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

// ── Launcher ─────────────────────────────────────────────────────────────────

/// Launches one exclusive browser per request. The executable path and the
/// launch-argument template are fixed at construction; nothing here mutates
/// after startup.
pub struct ChromiumLauncher {
    exe: Option<String>,
    server_mode: bool,
}

impl ChromiumLauncher {
    pub fn new(server_mode: bool) -> Self {
        Self {
            exe: find_chrome_executable(),
            server_mode,
        }
    }

    async fn attach(port: u16) -> Result<(Browser, chromiumoxide::Handler)> {
        let version_url = format!("http://127.0.0.1:{}/json/version", port);
        let mut last_error = None;

        for attempt in 1..=CONNECT_ATTEMPTS {
            // The debug port takes a moment to come up after spawn.
            tokio::time::sleep(CONNECT_BACKOFF).await;

            let ws_url: Result<String> = async {
                let response = reqwest::get(&version_url)
                    .await
                    .map_err(|e| anyhow!("debug endpoint request failed: {}", e))?;
                let json: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| anyhow!("debug endpoint returned invalid JSON: {}", e))?;
                json["webSocketDebuggerUrl"]
                    .as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| anyhow!("no webSocketDebuggerUrl in debug endpoint response"))
            }
            .await;

            match ws_url {
                Ok(ws) => match Browser::connect(ws).await {
                    Ok(pair) => return Ok(pair),
                    Err(e) => last_error = Some(anyhow!("CDP connect failed: {}", e)),
                },
                Err(e) => last_error = Some(e),
            }

            if attempt < CONNECT_ATTEMPTS {
                debug!("CDP attach attempt {}/{} failed, retrying", attempt, CONNECT_ATTEMPTS);
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("CDP attach failed (port {})", port)))
    }
}

#[async_trait]
impl SessionLauncher for ChromiumLauncher {
    async fn open(&self, target: &Url, proxy: Option<&str>) -> Result<Box<dyn BypassSession>> {
        let exe = self.exe.clone().ok_or_else(|| {
            anyhow!(
                "No browser found. Install Chrome or Chromium, or set CHROME_EXECUTABLE to the binary path."
            )
        })?;

        // Display before browser, so the browser always has a surface to draw on.
        let display = if self.server_mode {
            let d = VirtualDisplay::start(DISPLAY_WIDTH, DISPLAY_HEIGHT)?;
            // Give the X server a moment to create its socket.
            tokio::time::sleep(Duration::from_millis(250)).await;
            Some(d)
        } else {
            None
        };

        let port = next_debug_port();
        let profile_dir = std::env::temp_dir().join(format!("cleargate-profile-{port}"));
        std::fs::create_dir_all(&profile_dir)
            .map_err(|e| anyhow!("scratch profile dir {}: {}", profile_dir.display(), e))?;

        let mut cmd = Command::new(&exe);
        cmd.args(LAUNCH_ARGS)
            .arg(format!("--remote-debugging-port={port}"))
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg(format!("--window-size={DISPLAY_WIDTH},{DISPLAY_HEIGHT}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if self.server_mode {
            cmd.arg("--no-sandbox");
        }
        if let Some(proxy) = proxy {
            cmd.arg(format!("--proxy-server={proxy}"));
        }
        if let Some(d) = &display {
            cmd.env("DISPLAY", d.name());
        }

        info!("🚀 launching browser for {} (debug port {})", target, port);
        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn browser ({}): {}", exe, e))?;

        let (browser, mut handler) = match Self::attach(port).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = std::fs::remove_dir_all(&profile_dir);
                return Err(e);
            }
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler event error: {}", e);
                }
            }
        });

        // Navigation is the final step of open; the orchestrator takes over
        // from a page that is already on its way to the target.
        let page = match browser.new_page(target.as_str()).await {
            Ok(p) => p,
            Err(e) => {
                let mut browser = browser;
                let _ = browser.close().await;
                handler_task.abort();
                let _ = child.kill();
                let _ = child.wait();
                let _ = std::fs::remove_dir_all(&profile_dir);
                return Err(anyhow!("navigation to {} failed: {}", target, e));
            }
        };

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task,
            child,
            profile_dir,
            display,
            closed: false,
        }))
    }
}

// ── Live session ─────────────────────────────────────────────────────────────

/// Result of the widget-locate script: viewport coordinates of the
/// challenge checkbox region, when the widget is present and laid out.
#[derive(Debug, Deserialize)]
struct WidgetPoint {
    x: f64,
    y: f64,
}

/// Finds the interstitial's verification widget. The checkbox sits at the
/// left edge of the widget container, so the click point is offset into it.
const LOCATE_WIDGET_JS: &str = r#"(() => {
    const el = document.querySelector('div.cf-turnstile, #turnstile-wrapper')
        || Array.from(document.querySelectorAll('iframe')).find(f => {
            const src = (f.getAttribute('src') || '').toLowerCase();
            return src.includes('challenges.cloudflare.com')
                || src.includes('/cdn-cgi/challenge-platform/');
        });
    if (!el) return JSON.stringify(null);
    const box = el.getBoundingClientRect();
    if (box.width === 0 || box.height === 0) return JSON.stringify(null);
    return JSON.stringify({ x: box.left + 28, y: box.top + box.height / 2 });
})()"#;

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: tokio::task::JoinHandle<()>,
    child: Child,
    profile_dir: PathBuf,
    display: Option<VirtualDisplay>,
    closed: bool,
}

impl ChromiumSession {
    async fn eval_string(&self, js: &'static str, what: &str) -> Result<String> {
        self.page
            .evaluate(js)
            .await
            .map_err(|e| anyhow!("{} failed: {}", what, e))?
            .into_value::<String>()
            .map_err(|e| anyhow!("{} returned unexpected value: {}", what, e))
    }
}

#[async_trait]
impl BypassSession for ChromiumSession {
    async fn detect(&mut self) -> Result<ChallengeState> {
        let raw = self.eval_string(PROBE_JS, "page probe").await?;
        let signals: PageSignals =
            serde_json::from_str(&raw).map_err(|e| anyhow!("page probe parse: {}", e))?;
        Ok(classify(&signals))
    }

    async fn activate_widget(&mut self) -> Result<bool> {
        let raw = self.eval_string(LOCATE_WIDGET_JS, "widget locate").await?;
        let point: Option<WidgetPoint> =
            serde_json::from_str(&raw).map_err(|e| anyhow!("widget locate parse: {}", e))?;
        let Some(point) = point else {
            return Ok(false);
        };

        // One trusted press/release pair; the widget is inside a cross-origin
        // frame, so the click goes through the input domain, not the DOM.
        let down = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(point.x)
            .y(point.y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(|e| anyhow!("mouse press params: {}", e))?;
        self.page
            .execute(down)
            .await
            .map_err(|e| anyhow!("mouse press failed: {}", e))?;

        tokio::time::sleep(CLICK_HOLD).await;

        let up = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(point.x)
            .y(point.y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(|e| anyhow!("mouse release params: {}", e))?;
        self.page
            .execute(up)
            .await
            .map_err(|e| anyhow!("mouse release failed: {}", e))?;

        Ok(true)
    }

    async fn cookie_jar(&mut self) -> Result<Vec<(String, String)>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| anyhow!("cookie read failed: {}", e))?;
        Ok(cookies
            .into_iter()
            .map(|c| (c.name, c.value))
            .collect())
    }

    async fn user_agent(&mut self) -> Result<String> {
        self.eval_string("navigator.userAgent", "user agent read")
            .await
    }

    async fn page_html(&mut self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| anyhow!("page content read failed: {}", e))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        // Browser goes down first, then the display it was drawing to.
        if let Err(e) = self.browser.close().await {
            debug!("browser close: {}", e);
        }
        self.handler_task.abort();
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Err(e) = std::fs::remove_dir_all(&self.profile_dir) {
            debug!("scratch profile cleanup: {}", e);
        }
        if let Some(mut display) = self.display.take() {
            display.stop();
        }
        debug!("browser session closed");
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // close() was skipped; make sure no browser process outlives the request.
        warn!("browser session dropped without close — force-killing");
        self.handler_task.abort();
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.profile_dir);
        // `display` stops itself on drop.
    }
}
