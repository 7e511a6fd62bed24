//! Per-session Xvfb handle for hosts without a physical display.

use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{anyhow, Result};
use tracing::debug;

// Display numbers below 99 are commonly taken by real X servers.
static NEXT_DISPLAY: AtomicU32 = AtomicU32::new(99);

/// A running Xvfb server. Stopped explicitly by the session's `close()`;
/// `Drop` is the backstop so an early-return path cannot leak the process.
pub struct VirtualDisplay {
    child: Child,
    name: String,
}

impl VirtualDisplay {
    /// Spawn an Xvfb server on a fresh display number. The browser process
    /// must be started *after* this, with `DISPLAY` set to [`Self::name`].
    pub fn start(width: u32, height: u32) -> Result<Self> {
        let number = NEXT_DISPLAY.fetch_add(1, Ordering::Relaxed);
        let name = format!(":{number}");
        let child = Command::new("Xvfb")
            .arg(&name)
            .args(["-screen", "0"])
            .arg(format!("{width}x{height}x24"))
            .args(["-nolisten", "tcp"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn Xvfb on display {}: {}", name, e))?;
        debug!("virtual display {} started ({}x{})", name, width, height);
        Ok(Self { child, name })
    }

    /// The `DISPLAY` value for processes rendering onto this display.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stop(&mut self) {
        if self.child.kill().is_ok() {
            let _ = self.child.wait();
            debug!("virtual display {} stopped", self.name);
        }
    }
}

impl Drop for VirtualDisplay {
    fn drop(&mut self) {
        self.stop();
    }
}
