//! The bypass orchestrator: the detect → act → wait → re-detect state
//! machine, bounded by the request's retry budget, plus the request pipeline
//! that owns the session's single release point.

pub mod detector;

use std::time::Instant;

use anyhow::anyhow;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::core::app_state::{AppState, Settings};
use crate::core::types::{BypassOutcome, BypassRequest};
use crate::extract;
use crate::safety;
use crate::session::BypassSession;

pub use detector::{classify, ChallengeState, PageSignals};

#[derive(Debug, Error)]
pub enum BypassError {
    /// The safety gate rejected the target; no session was opened.
    #[error("invalid target URL: {0}")]
    InvalidTarget(String),

    /// The retry budget ran out before the challenge cleared.
    #[error("challenge not cleared after {attempts} attempts")]
    ChallengeNotCleared { attempts: u32 },

    /// The browser or driver failed unexpectedly at some step.
    #[error("browser driver failure: {0}")]
    DriverFailure(anyhow::Error),
}

impl From<anyhow::Error> for BypassError {
    fn from(cause: anyhow::Error) -> Self {
        Self::DriverFailure(cause)
    }
}

/// Run one clearance request end to end: gate the target, open an exclusive
/// session, drive it until a terminal state, harvest, and close.
///
/// The session is released here exactly once, whatever the terminal state —
/// the orchestrator itself never releases resources. There is no explicit
/// cancellation: if the caller goes away mid-bypass, the loop still reaches
/// one of its own bounds and the close below still runs.
pub async fn clear(
    state: &AppState,
    req: &BypassRequest,
    capture_html: bool,
) -> Result<BypassOutcome, BypassError> {
    if !safety::is_safe(&req.target) {
        return Err(BypassError::InvalidTarget(req.target.clone()));
    }
    let target = Url::parse(&req.target)
        .map_err(|_| BypassError::InvalidTarget(req.target.clone()))?;

    let mut session = state.launcher.open(&target, req.proxy.as_deref()).await?;

    let driven = drive(session.as_mut(), req, &state.settings).await;
    let outcome = match driven {
        Ok(attempts) => extract::harvest(session.as_mut(), attempts, capture_html)
            .await
            .map_err(BypassError::from),
        Err(e) => Err(e),
    };

    session.close().await;
    outcome
}

/// The polling loop. Returns the number of attempts consumed on clearance.
///
/// Each round consumes one attempt. An `Active` round performs at most one
/// widget activation — re-clicking within a round can re-arm the challenge.
/// An `Indeterminate` round consumes budget without interacting. The wait
/// between rounds is fixed and never backs off.
pub async fn drive(
    session: &mut dyn BypassSession,
    req: &BypassRequest,
    settings: &Settings,
) -> Result<u32, BypassError> {
    let budget = req.retries.max(1);
    let started = Instant::now();
    let mut attempts: u32 = 0;
    let mut active_rounds: u32 = 0;
    let mut activations: u32 = 0;

    loop {
        if let Some(deadline) = settings.deadline {
            if started.elapsed() >= deadline {
                warn!(
                    "bypass deadline of {:?} hit after {} attempt(s)",
                    deadline, attempts
                );
                return Err(BypassError::ChallengeNotCleared { attempts });
            }
        }

        attempts += 1;
        match session.detect().await? {
            ChallengeState::Cleared => {
                info!("✅ challenge cleared after {} attempt(s)", attempts);
                return Ok(attempts);
            }
            ChallengeState::Active => {
                active_rounds += 1;
                if session.activate_widget().await? {
                    activations += 1;
                    if req.log_rounds {
                        info!("round {}: challenge active, widget clicked", attempts);
                    }
                } else if req.log_rounds {
                    info!("round {}: challenge active, widget not present yet", attempts);
                }
            }
            ChallengeState::Indeterminate => {
                if req.log_rounds {
                    info!("round {}: page state indeterminate, waiting", attempts);
                }
            }
        }

        if attempts >= budget {
            if active_rounds > 0 && activations == 0 {
                // The challenge was visible the whole time but its widget
                // never materialized — that is a driver-level failure, not
                // an ordinary exhaustion.
                return Err(BypassError::DriverFailure(anyhow!(
                    "challenge widget never located in {} attempts",
                    attempts
                )));
            }
            return Err(BypassError::ChallengeNotCleared { attempts });
        }

        tokio::time::sleep(settings.poll_interval).await;
    }
}
